pub mod auth;
pub mod config;
pub mod error;
pub mod types;

pub use auth::hash_token;
pub use error::{HiBossError, Result};
pub use types::{format_address, parse_address, Address};
