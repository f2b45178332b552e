//! openocd-rpc: flash a board through OpenOCD's TCL interface

use std::time::Duration;

use clap::Parser;
use tracing::{debug, error, info, warn};
use tracing_subscriber::{fmt, EnvFilter};

use openocd_rpc::bringup::{BringupSequence, HaltPolicy};
use openocd_rpc::{hexify, Args, Config, OpenocdSession, RpcError};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    if args.generate_config {
        let config = Config::default();
        println!("{}", config.to_toml()?);
        return Ok(());
    }

    init_logging(&args)?;

    info!("Starting openocd-rpc v{}", env!("CARGO_PKG_VERSION"));

    let mut config = Config::load(args.config.as_ref())?;
    config.merge_args(&args);

    if args.validate_config {
        config.validate()?;
        println!("Configuration is valid");
        return Ok(());
    }

    if args.show_config {
        println!("{}", config.to_toml()?);
        return Ok(());
    }

    config.validate()?;

    if let Err(e) = run(&config, &args.board).await {
        error!("Bring-up failed: {}", e);
        eprintln!("Failed to connect to OpenOCD. Make sure it is running. E.g.:");
        eprintln!("    sudo openocd -f flash-firmware-openocd-rpi.cfg");
        std::process::exit(1);
    }

    Ok(())
}

async fn run(config: &Config, board_name: &str) -> Result<(), Box<dyn std::error::Error>> {
    let board = config.board(board_name)?;
    let firmware = config.flash.image.clone().ok_or_else(|| {
        RpcError::InvalidConfig("No firmware image configured, pass --firmware".to_string())
    })?;

    let policy = HaltPolicy {
        max_attempts: config.bringup.max_halt_attempts,
        settle: Duration::from_millis(config.bringup.settle_ms),
    };

    let mut session = OpenocdSession::new(config.rpc.clone());
    session.connect().await?;

    // close() must run on every exit path and must not mask an earlier error
    let outcome = BringupSequence::new(&mut session, board, policy)
        .run(&firmware, config.flash.restart_after_flash)
        .await;
    if let Err(e) = session.close().await {
        warn!("Session close: {}", e);
    }
    let report = outcome?;

    println!("SWD ID: {}", hexify(Some(report.swd_id)));
    println!("DAP ID: {}", hexify(Some(report.dap_id)));
    if report.mass_erased {
        println!("New board, mass erase performed");
    } else {
        println!("Board reset cleanly");
    }
    println!("Interesting registers:");
    for (name, value) in &report.registers {
        println!("  {}: {}", name, value);
    }
    println!(
        "Flash image {} written in {} ms",
        firmware.display(),
        report.flash_time_ms
    );

    Ok(())
}

/// Initialize logging system
fn init_logging(args: &Args) -> Result<(), Box<dyn std::error::Error>> {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&args.log_level));

    let subscriber = fmt::Subscriber::builder()
        .with_env_filter(env_filter)
        .with_target(true)
        .with_file(false)
        .with_line_number(false);

    if let Some(log_file) = &args.log_file {
        let file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(log_file)?;
        subscriber.with_writer(file).init();
    } else {
        subscriber.with_writer(std::io::stderr).init();
    }

    debug!("Logging initialized with level: {}", args.log_level);
    Ok(())
}

#[cfg(test)]
mod tests {
    use clap::Parser;
    use openocd_rpc::{Args, Config};

    #[test]
    fn test_args_parsing_defaults() {
        let args = Args::parse_from(["openocd-rpc"]);
        assert!(args.config.is_none());
        assert!(args.firmware.is_none());
        assert_eq!(args.board, "orchard");
        assert_eq!(args.log_level, "info");
    }

    #[test]
    fn test_args_parsing_with_options() {
        let args = Args::parse_from([
            "openocd-rpc",
            "--host", "192.168.1.20",
            "--port", "6666",
            "--firmware", "build/orchard.elf",
            "--log-level", "debug",
        ]);
        assert_eq!(args.host.unwrap(), "192.168.1.20");
        assert_eq!(args.port.unwrap(), 6666);
        assert_eq!(args.firmware.unwrap().to_str().unwrap(), "build/orchard.elf");
        assert_eq!(args.log_level, "debug");
    }

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.rpc.port, 6666);
        assert!(config.board("orchard").is_ok());
    }
}
