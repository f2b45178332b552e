//! Framed transport for the OpenOCD TCL socket
//!
//! Communicates with OpenOCD's TCL server (default port 6666).
//! Protocol: send the command as ASCII terminated by 0x1a (SUB character);
//! the response is ASCII text terminated by 0x1a. Framing is a single-byte
//! sentinel scan; the terminator never appears inside a well-formed payload.

use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::{debug, warn};

use crate::config::RpcConfig;
use crate::error::{Result, RpcError};

/// TCL protocol terminator byte (ASCII SUB / Ctrl-Z)
pub const COMMAND_TERMINATOR: u8 = 0x1a;

/// A connected TCL socket with request/response framing.
///
/// One command is outstanding at a time; `send` blocks until the full
/// terminator-delimited response has arrived or the read deadline expires.
#[derive(Debug)]
pub struct TclTransport {
    stream: TcpStream,
    recv_buffer_size: usize,
    read_timeout: Duration,
    max_response_bytes: usize,
}

impl TclTransport {
    /// Establish a single outbound connection to the TCL server.
    pub async fn connect(config: &RpcConfig) -> Result<Self> {
        let endpoint = format!("{}:{}", config.host, config.port);
        let connect_timeout = Duration::from_millis(config.connect_timeout_ms);

        let stream = match tokio::time::timeout(connect_timeout, TcpStream::connect(&endpoint)).await
        {
            Ok(Ok(stream)) => stream,
            Ok(Err(e)) => {
                return Err(RpcError::ConnectionFailed(format!("{}: {}", endpoint, e)));
            }
            Err(_) => return Err(RpcError::Timeout),
        };

        debug!("Connected to TCL server at {}", endpoint);

        Ok(Self {
            stream,
            recv_buffer_size: config.recv_buffer_size,
            read_timeout: Duration::from_millis(config.read_timeout_ms),
            max_response_bytes: config.max_response_bytes,
        })
    }

    /// Send one command and read its response.
    ///
    /// The command must be terminator-free ASCII; the terminator is appended
    /// on the wire and stripped from the returned response.
    pub async fn send(&mut self, command: &str) -> Result<String> {
        if !command.is_ascii() {
            return Err(RpcError::Protocol(format!(
                "command is not ASCII: {:?}",
                command
            )));
        }
        if command.bytes().any(|b| b == COMMAND_TERMINATOR) {
            return Err(RpcError::Protocol(
                "command contains the terminator byte".to_string(),
            ));
        }

        debug!("TCL command: {}", command);

        let mut payload = command.as_bytes().to_vec();
        payload.push(COMMAND_TERMINATOR);
        self.stream.write_all(&payload).await?;

        let response = self.read_response().await?;
        debug!("TCL response: {}", response);
        Ok(response)
    }

    /// Accumulate fixed-size chunks until one contains the terminator, then
    /// decode: ASCII only, trailing whitespace trimmed, final terminator
    /// character stripped.
    async fn read_response(&mut self) -> Result<String> {
        let mut data = Vec::with_capacity(self.recv_buffer_size);
        let mut chunk = vec![0u8; self.recv_buffer_size];
        let deadline = tokio::time::Instant::now() + self.read_timeout;

        loop {
            let n = match tokio::time::timeout_at(deadline, self.stream.read(&mut chunk)).await {
                Ok(Ok(0)) => return Err(RpcError::ConnectionClosed),
                Ok(Ok(n)) => n,
                Ok(Err(e)) => return Err(RpcError::Io(e)),
                Err(_) => return Err(RpcError::Timeout),
            };

            data.extend_from_slice(&chunk[..n]);
            if data.len() > self.max_response_bytes {
                return Err(RpcError::ResponseTooLarge {
                    limit: self.max_response_bytes,
                });
            }
            if chunk[..n].contains(&COMMAND_TERMINATOR) {
                break;
            }
        }

        if !data.is_ascii() {
            return Err(RpcError::Protocol(
                "response contains non-ASCII bytes".to_string(),
            ));
        }
        let text = std::str::from_utf8(&data)
            .map_err(|e| RpcError::Protocol(format!("response decode failed: {}", e)))?;
        let text = text.trim_end();
        let text = text
            .strip_suffix(COMMAND_TERMINATOR as char)
            .unwrap_or(text);
        Ok(text.to_string())
    }

    /// Best-effort socket shutdown; never fails the caller.
    pub async fn shutdown(mut self) {
        if let Err(e) = self.stream.shutdown().await {
            warn!("Socket shutdown: {}", e);
        }
    }
}
