//! The local control socket: request parsing, principal resolution,
//! permission-policy enforcement, and method dispatch.

pub mod dispatch;
pub mod error;
pub mod frames;
pub mod principal;
pub mod server;

pub use dispatch::{dispatch, Context};
pub use error::{IpcError, Result};
pub use frames::{ErrorShape, ReqFrame, ResFrame};
pub use principal::{resolve as resolve_principal, Principal};
pub use server::serve;
