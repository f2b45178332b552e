//! Error types for the TCL RPC client and the bring-up tool

use std::path::PathBuf;
use thiserror::Error;

use crate::session::SessionState;

/// Main error type for the RPC client layers
#[derive(Error, Debug)]
pub enum RpcError {
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Connection closed by server")]
    ConnectionClosed,

    #[error("Command timeout")]
    Timeout,

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Response exceeded {limit} bytes without a terminator")]
    ResponseTooLarge { limit: usize },

    #[error("Session is {0}, command requires an open connection")]
    InvalidState(SessionState),

    #[error("Unsupported word length {0}, must be 1, 2 or 4 bytes")]
    InvalidWordLen(u8),

    #[error("Refusing to write an absent value")]
    AbsentValue,

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for convenience
pub type Result<T> = std::result::Result<T, RpcError>;

/// Errors from the board bring-up sequence
#[derive(Error, Debug)]
pub enum BringupError {
    #[error("SWD ID mismatch: got 0x{got:08x}, wanted 0x{want:08x}")]
    SwdIdMismatch { got: u32, want: u32 },

    #[error("DAP ID mismatch: got 0x{got:08x}, wanted 0x{want:08x}")]
    DapIdMismatch { got: u32, want: u32 },

    #[error("Target failed to halt after {0} attempts")]
    HaltAttemptsExhausted(u32),

    #[error("Firmware image not found: {}", .0.display())]
    ImageNotFound(PathBuf),

    #[error("RPC error: {0}")]
    Rpc(#[from] RpcError),
}
