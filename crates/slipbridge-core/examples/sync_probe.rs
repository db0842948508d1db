//! Bootloader Sync Probe
//!
//! Resets a board into its ROM bootloader and synchronizes with it.
//!
//! Usage:
//!   cargo run --example sync_probe -- [OPTIONS] [PORT]
//!
//! Options:
//!   --port PORT       Serial port or tcp://host:port (default: first port found)
//!   --baud RATE       Baud rate (default: 115200)
//!   --timeout MS      Response window in ms (default: 1000)
//!   --attempts N      Sync attempts (default: 10)
//!   --config FILE     Load settings from a JSON file first
//!   --no-reset        Skip the DTR/RTS reset into the bootloader
//!   --run             Reset into the application when done
//!   --monitor         Print the device's console output afterwards
//!   --list            List serial ports and exit

use std::io::Write;

use anyhow::{bail, Context};
use slipbridge_core::prelude::*;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args: Vec<String> = std::env::args().collect();

    let mut config = ConnectionConfig::default();
    let mut reset = true;
    let mut run_after = false;
    let mut monitor = false;

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--port" | "-p" => {
                i += 1;
                if i < args.len() {
                    config.port_name = args[i].clone();
                }
            }
            "--baud" | "-b" => {
                i += 1;
                if i < args.len() {
                    config.baud_rate = args[i].parse().context("invalid baud rate")?;
                }
            }
            "--timeout" | "-t" => {
                i += 1;
                if i < args.len() {
                    config.timeout_ms = args[i].parse().context("invalid timeout")?;
                }
            }
            "--attempts" | "-n" => {
                i += 1;
                if i < args.len() {
                    config.sync_attempts = args[i].parse().context("invalid attempt count")?;
                }
            }
            "--config" | "-c" => {
                i += 1;
                if i < args.len() {
                    config = ConnectionConfig::from_file(&args[i])
                        .with_context(|| format!("loading {}", args[i]))?;
                }
            }
            "--no-reset" => reset = false,
            "--run" => run_after = true,
            "--monitor" | "-m" => monitor = true,
            "--list" | "-l" => {
                print_ports();
                return Ok(());
            }
            "--help" | "-h" => {
                print_help();
                return Ok(());
            }
            arg if !arg.starts_with('-') => {
                config.port_name = arg.to_string();
            }
            other => {
                eprintln!("Unknown option: {}", other);
            }
        }
        i += 1;
    }

    if config.port_name.is_empty() {
        match list_ports().into_iter().next() {
            Some(port) => config.port_name = port.name,
            None => bail!("no serial ports found; pass --port"),
        }
    }
    config.mode = LinkMode::Framed;

    println!("Port:      {}", config.port_name);
    println!("Baud rate: {}", config.baud_rate);
    println!("Window:    {}ms x {}", config.timeout_ms, config.sync_attempts);
    println!();

    let mut conn = Connection::new(config);
    conn.connect().await.context("opening port")?;

    if reset {
        conn.enter_programming_mode()
            .await
            .context("resetting into bootloader")?;
    }

    let outcome = conn.sync().await;
    match &outcome {
        Ok(frame) => println!("✓ In sync, response: {:02X?}", frame.as_bytes()),
        Err(e) => println!("❌ {}", e),
    }

    if run_after && conn.is_connected() {
        conn.reset_to_run().await.context("resetting into application")?;
        println!("✓ Application started");
    }

    let counters = conn.counters();
    println!();
    println!(
        "tx {} bytes, rx {} bytes, {} frames ({} flushed, {} malformed)",
        counters.tx_bytes,
        counters.rx_bytes,
        counters.frames_received,
        counters.frames_flushed,
        counters.malformed_escapes
    );

    conn.disconnect().await;
    outcome?;

    if monitor {
        let mut config = conn.config().clone();
        config.mode = LinkMode::Pump;
        let mut console = Connection::new(config);
        console.connect().await.context("reopening port for monitor")?;

        if let Some(handle) = console.close_handle() {
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    handle.close();
                }
            });
        }

        println!("--- monitor (Ctrl-C to stop) ---");
        console
            .pump(|text| {
                print!("{}", text);
                let _ = std::io::stdout().flush();
            })
            .await?;
    }

    Ok(())
}

fn print_ports() {
    let ports = list_ports();
    if ports.is_empty() {
        println!("No serial ports found");
        return;
    }
    for port in ports {
        let usb = match (port.vid, port.pid) {
            (Some(vid), Some(pid)) => format!(" [{:04x}:{:04x}]", vid, pid),
            _ => String::new(),
        };
        let product = port.product.as_deref().unwrap_or("");
        println!("{}{} {}", port.name, usb, product);
    }
}

fn print_help() {
    println!("Bootloader Sync Probe");
    println!();
    println!("Usage: sync_probe [OPTIONS] [PORT]");
    println!();
    println!("Options:");
    println!("  -p, --port PORT      Serial port or tcp://host:port");
    println!("  -b, --baud RATE      Baud rate (default: 115200)");
    println!("  -t, --timeout MS     Response window in ms (default: 1000)");
    println!("  -n, --attempts N     Sync attempts (default: 10)");
    println!("  -c, --config FILE    Load settings from a JSON file first");
    println!("      --no-reset       Skip the reset into the bootloader");
    println!("      --run            Reset into the application when done");
    println!("  -m, --monitor        Print the device's console output afterwards");
    println!("  -l, --list           List serial ports and exit");
    println!("  -h, --help           Show this help");
}
