//! Unix-socket accept loop: one task per connection, reading newline-
//! delimited JSON requests and writing responses back through a queue so a
//! slow request never blocks the next line from being read. No handshake,
//! no broadcast events — just `{ id, method, params }` in and
//! `{ id, result | error }` out.

use std::path::Path;
use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::mpsc;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::dispatch::{dispatch, Context};
use crate::frames::{ReqFrame, ResFrame};
use crate::principal;

/// Accept connections until `shutdown` resolves. Each connection is handled
/// on its own task so one slow request never blocks another connection.
pub async fn serve(socket_path: &str, ctx: Arc<Context>, mut shutdown: tokio::sync::watch::Receiver<bool>) -> std::io::Result<()> {
    if Path::new(socket_path).exists() {
        std::fs::remove_file(socket_path)?;
    }
    let listener = UnixListener::bind(socket_path)?;
    info!(socket = %socket_path, "IPC socket listening");

    loop {
        tokio::select! {
            accepted = listener.accept() => {
                let (stream, _addr) = accepted?;
                let ctx = ctx.clone();
                let conn_id = Uuid::new_v4().to_string();
                tokio::spawn(async move {
                    if let Err(e) = handle_connection(conn_id.clone(), stream, ctx).await {
                        warn!(conn_id = %conn_id, error = %e, "connection ended with error");
                    }
                });
            }
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    info!("IPC server shutting down");
                    break;
                }
            }
        }
    }
    let _ = std::fs::remove_file(socket_path);
    Ok(())
}

/// Per-connection task: a reader loop that spawns one task per request, and
/// a writer loop that serializes their responses back onto the socket in
/// whatever order they complete — request ids, not ordering, pin replies to
/// requests.
#[instrument(skip(stream, ctx))]
async fn handle_connection(conn_id: String, stream: UnixStream, ctx: Arc<Context>) -> std::io::Result<()> {
    let (read_half, mut write_half) = stream.into_split();
    let mut lines = BufReader::new(read_half).lines();
    let (tx, mut rx) = mpsc::unbounded_channel::<ResFrame>();

    let writer = tokio::spawn(async move {
        while let Some(frame) = rx.recv().await {
            let mut line = serde_json::to_string(&frame).unwrap_or_default();
            line.push('\n');
            if write_half.write_all(line.as_bytes()).await.is_err() {
                break;
            }
        }
    });

    info!(conn_id = %conn_id, "IPC connection opened");

    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }
        let tx = tx.clone();
        let ctx = ctx.clone();
        tokio::spawn(async move {
            let response = handle_line(&ctx, &line).await;
            let _ = tx.send(response);
        });
    }

    drop(tx);
    let _ = writer.await;
    info!(conn_id = %conn_id, "IPC connection closed");
    Ok(())
}

async fn handle_line(ctx: &Context, line: &str) -> ResFrame {
    let req: ReqFrame = match serde_json::from_str(line) {
        Ok(req) => req,
        Err(e) => {
            return ResFrame::err(
                "unknown",
                &crate::error::IpcError::Core(hiboss_core::HiBossError::InvalidInput(format!(
                    "malformed request: {e}"
                ))),
            )
        }
    };

    match handle_request(ctx, &req).await {
        Ok(result) => ResFrame::ok(req.id, result),
        Err(e) => ResFrame::err(req.id, &e),
    }
}

async fn handle_request(ctx: &Context, req: &ReqFrame) -> Result<serde_json::Value, crate::error::IpcError> {
    let token = req
        .params
        .get("token")
        .and_then(serde_json::Value::as_str)
        .unwrap_or("");
    let who = principal::resolve(&ctx.store, token)?;

    let required = ctx.store.get_config()?.permission_policy.required_level(&req.method);
    if who.level(&ctx.store)? < required {
        return Err(crate::error::IpcError::Core(hiboss_core::HiBossError::Unauthorized(format!(
            "'{}' requires {required} or higher",
            req.method
        ))));
    }

    dispatch(ctx, &who, &req.method, req.params.clone()).await
}
