//! Subcommand implementations.

pub mod cart;
pub mod session;
pub mod wishlist;

use std::io::Write;

use hearthwood_cart::{CartError, ConfigError};
use serde_json::Value;
use thiserror::Error;

/// Errors that can occur while running a command.
#[derive(Debug, Error)]
pub enum CliError {
    /// Configuration is incomplete for the requested command.
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// The engine rejected or failed the operation.
    #[error("{}", .0.user_message())]
    Cart(#[from] CartError),

    /// `login` was run without a token.
    #[error("A customer token is required (--token or CART_CUSTOMER_TOKEN)")]
    MissingToken,

    /// Writing output failed.
    #[error("Output error: {0}")]
    Output(#[from] std::io::Error),

    /// Serializing output failed.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Write `value` to stdout as pretty JSON.
pub fn emit(value: &Value) -> Result<(), CliError> {
    let mut stdout = std::io::stdout().lock();
    serde_json::to_writer_pretty(&mut stdout, value)?;
    writeln!(stdout)?;
    Ok(())
}
