//! Configuration for the RPC client and the bring-up tool

use std::collections::HashMap;
use std::path::PathBuf;

use clap::Parser;
use serde::{Deserialize, Serialize};

use crate::error::{Result, RpcError};

/// Command line arguments
#[derive(Parser, Debug)]
#[command(name = "openocd-rpc")]
#[command(about = "TCL RPC client for OpenOCD with board bring-up and flashing")]
#[command(version)]
pub struct Args {
    /// Path to configuration file
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Log level (error, warn, info, debug, trace)
    #[arg(long, default_value = "info")]
    pub log_level: String,

    /// Log file path (defaults to stderr)
    #[arg(long)]
    pub log_file: Option<PathBuf>,

    /// TCL server host
    #[arg(long)]
    pub host: Option<String>,

    /// TCL server port
    #[arg(long)]
    pub port: Option<u16>,

    /// Response read deadline in milliseconds
    #[arg(long)]
    pub read_timeout: Option<u64>,

    /// Firmware image to flash
    #[arg(long)]
    pub firmware: Option<PathBuf>,

    /// Board profile name
    #[arg(long, default_value = "orchard")]
    pub board: String,

    /// Cap on reset-halt attempts (0 retries forever)
    #[arg(long)]
    pub max_halt_attempts: Option<u32>,

    /// Generate default configuration file
    #[arg(long)]
    pub generate_config: bool,

    /// Validate configuration and exit
    #[arg(long)]
    pub validate_config: bool,

    /// Show current configuration and exit
    #[arg(long)]
    pub show_config: bool,
}

/// Main configuration structure
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Config {
    pub rpc: RpcConfig,
    pub bringup: BringupConfig,
    pub flash: FlashConfig,
    pub boards: HashMap<String, BoardConfig>,
    pub logging: LoggingConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            rpc: RpcConfig::default(),
            bringup: BringupConfig::default(),
            flash: FlashConfig::default(),
            boards: Self::default_boards(),
            logging: LoggingConfig::default(),
        }
    }
}

impl Config {
    /// Load configuration from file or create default
    pub fn load(config_path: Option<&PathBuf>) -> Result<Self> {
        if let Some(path) = config_path {
            let content = std::fs::read_to_string(path).map_err(|e| {
                RpcError::InvalidConfig(format!("Failed to read config file: {}", e))
            })?;
            let config: Config = toml::from_str(&content)
                .map_err(|e| RpcError::InvalidConfig(format!("Invalid TOML syntax: {}", e)))?;
            config.validate()?;
            Ok(config)
        } else {
            Ok(Config::default())
        }
    }

    /// Merge command line arguments into configuration
    pub fn merge_args(&mut self, args: &Args) {
        if let Some(host) = &args.host {
            self.rpc.host = host.clone();
        }
        if let Some(port) = args.port {
            self.rpc.port = port;
        }
        if let Some(ms) = args.read_timeout {
            self.rpc.read_timeout_ms = ms;
        }
        if let Some(image) = &args.firmware {
            self.flash.image = Some(image.clone());
        }
        if let Some(cap) = args.max_halt_attempts {
            self.bringup.max_halt_attempts = if cap == 0 { None } else { Some(cap) };
        }
        self.logging.level = args.log_level.clone();
        self.logging.file = args.log_file.clone();
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.rpc.port == 0 {
            return Err(RpcError::InvalidConfig("rpc.port must be > 0".to_string()));
        }
        if self.rpc.recv_buffer_size == 0 {
            return Err(RpcError::InvalidConfig(
                "rpc.recv_buffer_size must be > 0".to_string(),
            ));
        }
        if self.rpc.max_response_bytes < self.rpc.recv_buffer_size {
            return Err(RpcError::InvalidConfig(
                "rpc.max_response_bytes must be >= rpc.recv_buffer_size".to_string(),
            ));
        }
        if self.rpc.read_timeout_ms == 0 {
            return Err(RpcError::InvalidConfig(
                "rpc.read_timeout_ms must be > 0".to_string(),
            ));
        }
        for (key, board) in &self.boards {
            if board.target.is_empty() {
                return Err(RpcError::InvalidConfig(format!(
                    "boards.{}.target must not be empty",
                    key
                )));
            }
        }
        Ok(())
    }

    /// Generate TOML configuration string
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self)
            .map_err(|e| RpcError::InvalidConfig(format!("Failed to serialize config: {}", e)))
    }

    /// Look up a board profile by name
    pub fn board(&self, name: &str) -> Result<&BoardConfig> {
        self.boards
            .get(name)
            .ok_or_else(|| RpcError::InvalidConfig(format!("Unknown board profile: {}", name)))
    }

    /// Get default board profiles
    fn default_boards() -> HashMap<String, BoardConfig> {
        let mut boards = HashMap::new();

        boards.insert(
            "orchard".to_string(),
            BoardConfig {
                name: "Kosagi Orchard (KW01Z128)".to_string(),
                target: "klx.cpu".to_string(),
                swd_id: 0x0bc11477,
                dap_id: 0x04770031,
                sdid_address: 0x40048024,
                sdid_value: 0x16151502,
                mass_erase_command: "kinetis mdm mass_erase".to_string(),
                registers: vec![
                    NamedRegister { name: "SDID".to_string(), address: 0x40048024 },
                    NamedRegister { name: "FCFG1".to_string(), address: 0x4004804C },
                    NamedRegister { name: "FCFG2".to_string(), address: 0x40048050 },
                    NamedRegister { name: "UIDMH".to_string(), address: 0x40048058 },
                    NamedRegister { name: "UIDML".to_string(), address: 0x4004805C },
                    NamedRegister { name: "UIDL".to_string(), address: 0x40048060 },
                ],
            },
        );

        boards
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct RpcConfig {
    pub host: String,
    pub port: u16,
    pub recv_buffer_size: usize,
    pub connect_timeout_ms: u64,
    pub read_timeout_ms: u64,
    pub max_response_bytes: usize,
}

impl Default for RpcConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 6666,
            recv_buffer_size: 4096,
            connect_timeout_ms: 5000,
            read_timeout_ms: 10000,
            max_response_bytes: 1048576, // 1MB
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct BringupConfig {
    /// Reset-halt attempt cap; absent means retry until halted
    pub max_halt_attempts: Option<u32>,
    /// Server-side settle delay between halt polls, in milliseconds
    pub settle_ms: u64,
}

impl Default for BringupConfig {
    fn default() -> Self {
        Self {
            max_halt_attempts: Some(10),
            settle_ms: 1000,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct FlashConfig {
    pub image: Option<PathBuf>,
    pub restart_after_flash: bool,
}

impl Default for FlashConfig {
    fn default() -> Self {
        Self {
            image: None,
            restart_after_flash: true,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct BoardConfig {
    pub name: String,
    /// Target name as OpenOCD knows it (e.g. "klx.cpu")
    pub target: String,
    pub swd_id: u32,
    pub dap_id: u32,
    /// System device ID register confirming the halted target is the right part
    pub sdid_address: u32,
    pub sdid_value: u32,
    pub mass_erase_command: String,
    pub registers: Vec<NamedRegister>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct NamedRegister {
    pub name: String,
    pub address: u32,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct LoggingConfig {
    pub level: String,
    pub file: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            file: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.rpc.host, "127.0.0.1");
        assert_eq!(config.rpc.port, 6666);
        assert_eq!(config.rpc.recv_buffer_size, 4096);
    }

    #[test]
    fn test_default_board_profile() {
        let config = Config::default();
        let board = config.board("orchard").unwrap();
        assert_eq!(board.target, "klx.cpu");
        assert_eq!(board.swd_id, 0x0bc11477);
        assert_eq!(board.dap_id, 0x04770031);
        assert_eq!(board.registers.len(), 6);
    }

    #[test]
    fn test_unknown_board_profile() {
        let config = Config::default();
        assert!(matches!(
            config.board("stm32f4disco"),
            Err(RpcError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_validate_rejects_zero_buffer() {
        let mut config = Config::default();
        config.rpc.recv_buffer_size = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_bound_below_buffer() {
        let mut config = Config::default();
        config.rpc.max_response_bytes = 16;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_merge_args() {
        let args = Args::parse_from([
            "openocd-rpc",
            "--host", "10.0.0.5",
            "--port", "7777",
            "--read-timeout", "250",
            "--firmware", "build/orchard.elf",
            "--max-halt-attempts", "0",
        ]);
        let mut config = Config::default();
        config.merge_args(&args);
        assert_eq!(config.rpc.host, "10.0.0.5");
        assert_eq!(config.rpc.port, 7777);
        assert_eq!(config.rpc.read_timeout_ms, 250);
        assert_eq!(config.flash.image.unwrap().to_str().unwrap(), "build/orchard.elf");
        assert_eq!(config.bringup.max_halt_attempts, None);
    }

    #[test]
    fn test_toml_round_trip() {
        let config = Config::default();
        let toml_str = config.to_toml().unwrap();
        assert!(toml_str.contains("[rpc]"));
        assert!(toml_str.contains("[boards.orchard]"));
        let parsed: Config = toml::from_str(&toml_str).unwrap();
        assert!(parsed.validate().is_ok());
        assert_eq!(parsed.rpc.port, config.rpc.port);
        assert_eq!(parsed.board("orchard").unwrap().sdid_value, 0x16151502);
    }
}
