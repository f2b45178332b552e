//! Board bring-up: ID verification, halt stabilization, register dump,
//! firmware flash
//!
//! Everything board-specific (target name, expected IDs, register map, erase
//! command) comes from the `BoardConfig` profile, and the halt-retry cap is a
//! caller-supplied policy. The client layers underneath know nothing about
//! any particular board.

use std::path::Path;
use std::time::{Duration, Instant};

use tracing::{info, warn};

use crate::codec::{self, HexWord};
use crate::config::BoardConfig;
use crate::error::{BringupError, RpcError};
use crate::session::OpenocdSession;

/// Retry policy for the halt-stabilization loop.
#[derive(Debug, Clone)]
pub struct HaltPolicy {
    /// Maximum reset-halt attempts; `None` retries until the target halts.
    pub max_attempts: Option<u32>,
    /// Server-side settle delay between polls.
    pub settle: Duration,
}

impl Default for HaltPolicy {
    fn default() -> Self {
        Self {
            max_attempts: Some(10),
            settle: Duration::from_millis(1000),
        }
    }
}

/// Outcome of a completed bring-up run
#[derive(Debug)]
pub struct BringupReport {
    pub swd_id: u32,
    pub dap_id: u32,
    /// Reset-halt attempts needed beyond the initial reset
    pub halt_attempts: u32,
    pub mass_erased: bool,
    pub registers: Vec<(String, HexWord)>,
    pub flash_time_ms: u64,
}

/// Parse the SWD ID out of an `ocd_transport init` reply.
///
/// Reply shape: `<transport> <state> 0x<id>`; the ID is the third token.
fn parse_transport_init_reply(reply: &str) -> Result<u32, BringupError> {
    let token = reply.split_whitespace().nth(2).ok_or_else(|| {
        BringupError::Rpc(RpcError::Protocol(format!(
            "transport init reply too short: '{}'",
            reply.trim()
        )))
    })?;
    codec::parse_hex_word(token).map_err(BringupError::Rpc)
}

/// Drives one board through check, halt, erase, flash and restart.
pub struct BringupSequence<'a> {
    session: &'a mut OpenocdSession,
    board: &'a BoardConfig,
    policy: HaltPolicy,
}

impl<'a> BringupSequence<'a> {
    pub fn new(session: &'a mut OpenocdSession, board: &'a BoardConfig, policy: HaltPolicy) -> Self {
        Self {
            session,
            board,
            policy,
        }
    }

    /// Check SWD and DAP IDs against the board profile.
    pub async fn verify_ids(&mut self) -> Result<(u32, u32), BringupError> {
        let reply = self.session.send("ocd_transport init").await?;
        let swd_id = parse_transport_init_reply(&reply)?;
        info!("SWD ID: {}", codec::hexify(Some(swd_id)));
        if swd_id != self.board.swd_id {
            return Err(BringupError::SwdIdMismatch {
                got: swd_id,
                want: self.board.swd_id,
            });
        }

        let reply = self.session.send("ocd_dap apid").await?;
        let dap_id = codec::parse_hex_word(&reply).map_err(BringupError::Rpc)?;
        info!("DAP ID: {}", codec::hexify(Some(dap_id)));
        if dap_id != self.board.dap_id {
            return Err(BringupError::DapIdMismatch {
                got: dap_id,
                want: self.board.dap_id,
            });
        }

        Ok((swd_id, dap_id))
    }

    /// Poll until the target reports halted and its SDID register reads back
    /// the expected part, issuing `reset halt` between attempts. Returns the
    /// number of reset-halt attempts that were needed.
    pub async fn stabilize(&mut self) -> Result<u32, BringupError> {
        let mut attempts: u32 = 0;
        loop {
            self.session
                .send(&format!("sleep {}", self.policy.settle.as_millis()))
                .await?;
            let state = self.session.send(&format!("{} curstate", self.board.target)).await?;
            if state.trim() == "halted" {
                let sdid = self.session.read_scalar(self.board.sdid_address).await?;
                if sdid.value() == Some(self.board.sdid_value) {
                    return Ok(attempts);
                }
            }
            warn!("Target not stable (state: {}), retrying", state.trim());
            if let Some(cap) = self.policy.max_attempts {
                if attempts >= cap {
                    return Err(BringupError::HaltAttemptsExhausted(attempts));
                }
            }
            self.session.send("reset halt").await?;
            attempts += 1;
        }
    }

    /// Full bring-up: ID checks, reset into halt, mass erase for boards that
    /// needed repeated resets, register dump, flash image write, restart.
    pub async fn run(&mut self, firmware: &Path, restart: bool) -> Result<BringupReport, BringupError> {
        if !firmware.exists() {
            return Err(BringupError::ImageNotFound(firmware.to_path_buf()));
        }

        let (swd_id, dap_id) = self.verify_ids().await?;

        info!("Halting CPU");
        self.session.send(&format!("{} curstate", self.board.target)).await?;
        self.session.send("reset halt").await?;

        let halt_attempts = self.stabilize().await?;

        let mass_erased = halt_attempts > 1;
        if mass_erased {
            info!("New board, running mass erase");
            self.session.send(&self.board.mass_erase_command).await?;
        } else {
            info!("Board reset cleanly");
        }

        let mut registers = Vec::with_capacity(self.board.registers.len());
        for reg in &self.board.registers {
            let value = self.session.read_scalar(reg.address).await?;
            info!("{}: {}", reg.name, value);
            registers.push((reg.name.clone(), value));
        }

        info!("Writing flash image {}", firmware.display());
        let start = Instant::now();
        self.session
            .send(&format!("flash write_image {}", firmware.display()))
            .await?;
        let flash_time_ms = start.elapsed().as_millis() as u64;

        if restart {
            info!("Restarting board");
            self.session.send("reset").await?;
        }

        Ok(BringupReport {
            swd_id,
            dap_id,
            halt_attempts,
            mass_erased,
            registers,
            flash_time_ms,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::SocketAddr;
    use std::sync::{Arc, Mutex};
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    use crate::config::{Config, RpcConfig};
    use crate::transport::COMMAND_TERMINATOR;

    /// A scripted target that halts only after `resets_needed` reset-halt
    /// commands have been seen.
    struct ScriptedTarget {
        swd_id: u32,
        dap_id: u32,
        sdid_address: u32,
        sdid_value: u32,
        resets_needed: u32,
        resets_seen: u32,
    }

    impl ScriptedTarget {
        fn for_board(board: &crate::config::BoardConfig, resets_needed: u32) -> Self {
            Self {
                swd_id: board.swd_id,
                dap_id: board.dap_id,
                sdid_address: board.sdid_address,
                sdid_value: board.sdid_value,
                resets_needed,
                resets_seen: 0,
            }
        }

        fn handle(&mut self, cmd: &str) -> String {
            if cmd == "ocd_transport init" {
                return format!("swd ready 0x{:08x}", self.swd_id);
            }
            if cmd == "ocd_dap apid" {
                return format!("0x{:08x}", self.dap_id);
            }
            if cmd == "reset halt" {
                self.resets_seen += 1;
                return String::new();
            }
            if cmd.ends_with("curstate") {
                return if self.resets_seen >= self.resets_needed {
                    "halted".to_string()
                } else {
                    "running".to_string()
                };
            }
            if cmd.starts_with("ocd_mdw") {
                // Only the SDID register is mapped; other reads come back empty
                if cmd == format!("ocd_mdw 0x{:x}", self.sdid_address) {
                    return format!("0x{:08x}: 0x{:08x}", self.sdid_address, self.sdid_value);
                }
                return String::new();
            }
            String::new()
        }
    }

    async fn spawn_scripted_server(
        mut target: ScriptedTarget,
    ) -> (SocketAddr, Arc<Mutex<Vec<String>>>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let log = Arc::new(Mutex::new(Vec::new()));
        let server_log = log.clone();
        tokio::spawn(async move {
            let (mut sock, _) = listener.accept().await.unwrap();
            let mut buf = Vec::new();
            let mut chunk = [0u8; 1024];
            loop {
                let n = match sock.read(&mut chunk).await {
                    Ok(0) | Err(_) => return,
                    Ok(n) => n,
                };
                buf.extend_from_slice(&chunk[..n]);
                while let Some(pos) = buf.iter().position(|&b| b == COMMAND_TERMINATOR) {
                    let frame: Vec<u8> = buf.drain(..=pos).collect();
                    let cmd = String::from_utf8(frame[..frame.len() - 1].to_vec()).unwrap();
                    server_log.lock().unwrap().push(cmd.clone());
                    if cmd == "exit" {
                        return;
                    }
                    let mut reply = target.handle(&cmd).into_bytes();
                    reply.push(COMMAND_TERMINATOR);
                    if sock.write_all(&reply).await.is_err() {
                        return;
                    }
                }
            }
        });
        (addr, log)
    }

    async fn session_for(addr: SocketAddr) -> OpenocdSession {
        let config = RpcConfig {
            port: addr.port(),
            ..RpcConfig::default()
        };
        let mut session = OpenocdSession::new(config);
        session.connect().await.unwrap();
        session
    }

    fn orchard() -> crate::config::BoardConfig {
        Config::default().board("orchard").unwrap().clone()
    }

    fn fast_policy(max_attempts: Option<u32>) -> HaltPolicy {
        HaltPolicy {
            max_attempts,
            settle: Duration::from_millis(1),
        }
    }

    #[test]
    fn test_parse_transport_init_reply() {
        assert_eq!(parse_transport_init_reply("swd ready 0x0bc11477").unwrap(), 0x0bc11477);
        assert_eq!(parse_transport_init_reply("swd ready 0bc11477\r\n").unwrap(), 0x0bc11477);
        assert!(parse_transport_init_reply("swd ready").is_err());
        assert!(parse_transport_init_reply("").is_err());
    }

    #[test]
    fn test_default_policy_is_bounded() {
        let policy = HaltPolicy::default();
        assert_eq!(policy.max_attempts, Some(10));
        assert_eq!(policy.settle, Duration::from_millis(1000));
    }

    #[tokio::test]
    async fn test_run_clean_board() {
        let board = orchard();
        let (addr, log) = spawn_scripted_server(ScriptedTarget::for_board(&board, 1)).await;
        let mut session = session_for(addr).await;
        let firmware = tempfile::NamedTempFile::new().unwrap();

        let report = BringupSequence::new(&mut session, &board, fast_policy(Some(10)))
            .run(firmware.path(), true)
            .await
            .unwrap();
        session.close().await.unwrap();

        assert_eq!(report.swd_id, board.swd_id);
        assert_eq!(report.dap_id, board.dap_id);
        assert_eq!(report.halt_attempts, 0);
        assert!(!report.mass_erased);
        assert_eq!(report.registers.len(), 6);
        assert_eq!(report.registers[0].1, HexWord::new(board.sdid_value));

        let log = log.lock().unwrap();
        assert!(log.iter().any(|c| c.starts_with("flash write_image")));
        assert!(log.iter().any(|c| c.as_str() == "reset"));
        assert!(!log.iter().any(|c| c.as_str() == board.mass_erase_command));
    }

    #[tokio::test]
    async fn test_run_new_board_mass_erases() {
        let board = orchard();
        let (addr, log) = spawn_scripted_server(ScriptedTarget::for_board(&board, 4)).await;
        let mut session = session_for(addr).await;
        let firmware = tempfile::NamedTempFile::new().unwrap();

        let report = BringupSequence::new(&mut session, &board, fast_policy(Some(10)))
            .run(firmware.path(), false)
            .await
            .unwrap();
        session.close().await.unwrap();

        assert_eq!(report.halt_attempts, 3);
        assert!(report.mass_erased);

        let log = log.lock().unwrap();
        assert!(log.iter().any(|c| c.as_str() == board.mass_erase_command));
        assert!(!log.iter().any(|c| c.as_str() == "reset"));
    }

    #[tokio::test]
    async fn test_stabilize_exhausts_attempt_cap() {
        let board = orchard();
        let (addr, _log) = spawn_scripted_server(ScriptedTarget::for_board(&board, u32::MAX)).await;
        let mut session = session_for(addr).await;

        let err = BringupSequence::new(&mut session, &board, fast_policy(Some(2)))
            .stabilize()
            .await
            .unwrap_err();
        assert!(matches!(err, BringupError::HaltAttemptsExhausted(2)));
        session.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_swd_id_mismatch() {
        let board = orchard();
        let mut wrong = ScriptedTarget::for_board(&board, 1);
        wrong.swd_id = 0x2ba01477;
        let (addr, _log) = spawn_scripted_server(wrong).await;
        let mut session = session_for(addr).await;

        let err = BringupSequence::new(&mut session, &board, fast_policy(Some(10)))
            .verify_ids()
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            BringupError::SwdIdMismatch { got: 0x2ba01477, .. }
        ));
        session.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_missing_firmware_image() {
        let board = orchard();
        let mut session = OpenocdSession::new(RpcConfig::default());
        let err = BringupSequence::new(&mut session, &board, HaltPolicy::default())
            .run(Path::new("/nonexistent/orchard.elf"), true)
            .await
            .unwrap_err();
        assert!(matches!(err, BringupError::ImageNotFound(_)));
    }
}
