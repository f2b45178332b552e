//! OpenOCD TCL RPC client
//!
//! A client for OpenOCD's TCL server (default port 6666). Commands are ASCII
//! strings terminated by 0x1a (SUB); responses use the same framing. On top
//! of the framed transport sit a typed command codec (scalar reads/writes),
//! the scratch-array choreography for bulk memory transfer, and a session
//! lifecycle that guarantees one command in flight and a graceful `exit` on
//! close. The `bringup` module drives a board through ID checks, halt
//! stabilization and firmware flashing using that API.

pub mod bringup;
pub mod codec;
pub mod config;
pub mod error;
pub mod marshal;
pub mod session;
pub mod transport;

pub use codec::{hexify, HexWord, WordLen};
pub use config::{Args, Config};
pub use error::{BringupError, Result, RpcError};
pub use session::{OpenocdSession, SessionState};
