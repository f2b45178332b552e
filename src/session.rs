//! Session lifecycle for the TCL RPC connection
//!
//! A session moves `Unconnected → Connected → Closed`; `Closed` is terminal.
//! Every command requires `Connected` and is serialized by `&mut self`, so a
//! session can never have two commands in flight. Sharing a session across
//! tasks requires an external mutex around it.

use std::fmt;

use tracing::{info, warn};

use crate::codec::{self, HexWord, WordLen};
use crate::config::RpcConfig;
use crate::error::{Result, RpcError};
use crate::marshal;
use crate::transport::TclTransport;

/// Observable lifecycle state of a session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Unconnected,
    Connected,
    Closed,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionState::Unconnected => write!(f, "unconnected"),
            SessionState::Connected => write!(f, "connected"),
            SessionState::Closed => write!(f, "closed"),
        }
    }
}

enum Link {
    Unconnected,
    Connected(TclTransport),
    Closed,
}

/// One OpenOCD TCL session: exclusive owner of the underlying socket.
pub struct OpenocdSession {
    config: RpcConfig,
    link: Link,
}

impl OpenocdSession {
    pub fn new(config: RpcConfig) -> Self {
        Self {
            config,
            link: Link::Unconnected,
        }
    }

    pub fn state(&self) -> SessionState {
        match self.link {
            Link::Unconnected => SessionState::Unconnected,
            Link::Connected(_) => SessionState::Connected,
            Link::Closed => SessionState::Closed,
        }
    }

    /// Establish the connection. Valid only from `Unconnected`; a closed
    /// session cannot be reconnected.
    pub async fn connect(&mut self) -> Result<()> {
        match self.link {
            Link::Unconnected => {}
            Link::Connected(_) => return Err(RpcError::InvalidState(SessionState::Connected)),
            Link::Closed => return Err(RpcError::InvalidState(SessionState::Closed)),
        }

        let transport = TclTransport::connect(&self.config).await?;
        self.link = Link::Connected(transport);
        info!("TCL session connected to {}:{}", self.config.host, self.config.port);
        Ok(())
    }

    fn transport(&mut self) -> Result<&mut TclTransport> {
        match &mut self.link {
            Link::Connected(transport) => Ok(transport),
            Link::Unconnected => Err(RpcError::InvalidState(SessionState::Unconnected)),
            Link::Closed => Err(RpcError::InvalidState(SessionState::Closed)),
        }
    }

    /// Raw command escape hatch for protocol features the codec does not
    /// wrap (reset, halt, transport init, flash image writes, ...).
    pub async fn send(&mut self, command: &str) -> Result<String> {
        self.transport()?.send(command).await
    }

    /// Read one word at `address`. Absent when the reply carries no value.
    pub async fn read_scalar(&mut self, address: u32) -> Result<HexWord> {
        let reply = self
            .transport()?
            .send(&codec::scalar_read_command(address))
            .await?;
        codec::parse_scalar_reply(&reply)
    }

    /// Write one word to `address`. An absent value is refused before any
    /// I/O rather than silently written as zero.
    pub async fn write_scalar(&mut self, address: u32, value: HexWord) -> Result<()> {
        let value = value.value().ok_or(RpcError::AbsentValue)?;
        self.transport()?
            .send(&codec::scalar_write_command(address, value))
            .await?;
        Ok(())
    }

    /// Read a block of `count` words through the read scratch array.
    pub async fn read_block(
        &mut self,
        word_len: WordLen,
        address: u32,
        count: usize,
    ) -> Result<Vec<u32>> {
        marshal::read_block(self.transport()?, word_len, address, count).await
    }

    /// Write `data` as a block through the write scratch array.
    pub async fn write_block(
        &mut self,
        word_len: WordLen,
        address: u32,
        data: &[u32],
    ) -> Result<()> {
        marshal::write_block(self.transport()?, word_len, address, data).await
    }

    /// Graceful shutdown: best-effort `exit` command, then close the socket.
    ///
    /// Idempotent: closing an unconnected or already-closed session is a
    /// no-op, and a failed `exit` send still closes the socket. Dropping the
    /// session instead closes the socket without the `exit` handshake.
    pub async fn close(&mut self) -> Result<()> {
        match std::mem::replace(&mut self.link, Link::Closed) {
            Link::Connected(mut transport) => {
                if let Err(e) = transport.send("exit").await {
                    warn!("Exit command during close: {}", e);
                }
                transport.shutdown().await;
                info!("TCL session closed");
            }
            Link::Unconnected | Link::Closed => {}
        }
        Ok(())
    }
}
