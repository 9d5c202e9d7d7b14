mod attendance;
mod client;
mod config;
mod hid;
mod init_tracing;
mod kiosk;
#[cfg(test)]
mod testing;
mod time_trace;
mod view;

use anyhow::{Context, Result};
use camino::Utf8PathBuf;
use clap::Parser;
use std::io::BufRead;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{error, info};
use url::Url;

use client::AttendanceClient;
use config::Config;
use hid::{HidProvider, NoHid, SysfsHid};
use kiosk::Kiosk;

/// Attendance check-in kiosk for QR codes and barcode scanners.
#[derive(Debug, Parser)]
#[command(version, about)]
struct Args {
    /// Path to the YAML config file.
    #[arg(long, env = "CONFIG", default_value = "config.yaml")]
    config: Utf8PathBuf,

    /// Backend base url, overriding `backend.base_url`.
    #[arg(long, env = "BACKEND_URL")]
    backend_url: Option<Url>,
}

/// Reads stdin on a dedicated thread; a scanner "types" each code followed by Enter.
fn spawn_line_reader() -> mpsc::Receiver<String> {
    let (tx, rx) = mpsc::channel(1);
    std::thread::spawn(move || {
        for line in std::io::stdin().lock().lines() {
            match line {
                Ok(line) => {
                    if tx.blocking_send(line).is_err() {
                        break;
                    }
                }
                Err(e) => {
                    error!("Reading input failed: {}", e);
                    break;
                }
            }
        }
    });
    rx
}

fn hid_provider(config: &config::Scanner) -> Arc<dyn HidProvider> {
    if cfg!(target_os = "linux") {
        Arc::new(SysfsHid::new(
            config.sysfs_root.clone(),
            config.dev_root.clone(),
        ))
    } else {
        Arc::new(NoHid)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_tracing::init_tracing().context("Setting up tracing")?;

    let config = Config::read(&args.config, args.backend_url.as_ref())?;
    info!("Starting qr-checkin against {}", config.backend.base_url);

    let client = Arc::new(AttendanceClient::new(&config.backend).context("Creating backend client")?);
    let kiosk = Kiosk::new(
        client,
        hid_provider(&config.scanner),
        config.scanner.product_filter.clone(),
    );

    let renderer = tokio::spawn(view::run_renderer(kiosk.subscribe(), tokio::io::stdout()));

    let mut session = kiosk.mount(config.scanner.poll_interval).await;
    let mut lines = spawn_line_reader();
    kiosk.run(&mut lines, &mut session).await;

    drop(session);
    drop(kiosk);
    renderer.await.context("Renderer panicked")??;

    init_tracing::shutdown_tracing();
    Ok(())
}
