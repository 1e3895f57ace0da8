use anyhow::{anyhow, Context, Result};
use log::{error, info};
use std::fs;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tokio::signal::unix::{signal, SignalKind};

use pdi_bridge::config::{Config, ImageSource};
use pdi_bridge::image::RgbImage;
use pdi_bridge::observer::LogObserver;
use pdi_bridge::{
    sched, BitBangSpi, BridgeError, ChannelTransfer, HalfPeriod, ImageGeometry, MmioRegisters,
    TransferOptions,
};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    init_logger();

    // Parse command line arguments
    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "/etc/pdi-bridge/config.yaml".to_string());

    info!("PDI bridge starting...");
    info!("Loading configuration from: {}", config_path);

    let config_content = fs::read_to_string(&config_path)
        .context(format!("Failed to read config file: {}", config_path))?;
    let config: Config =
        serde_yaml::from_str(&config_content).context("Failed to parse configuration file")?;
    config
        .validate()
        .map_err(|e| anyhow!("Configuration error: {}", e))?;

    info!("Configuration loaded successfully");

    // The transfer spins on the bus, so it gets a blocking thread of its own
    let stop = Arc::new(AtomicBool::new(false));
    let worker_stop = Arc::clone(&stop);
    let mut worker = tokio::task::spawn_blocking(move || run_bridge(config, worker_stop));

    let mut sigterm = signal(SignalKind::terminate()).context("Failed to setup SIGTERM handler")?;
    let mut sigint = signal(SignalKind::interrupt()).context("Failed to setup SIGINT handler")?;

    let finished = tokio::select! {
        result = &mut worker => Some(result),
        _ = sigterm.recv() => {
            info!("Received SIGTERM, stopping transfer");
            None
        }
        _ = sigint.recv() => {
            info!("Received SIGINT, stopping transfer");
            None
        }
    };

    let result = match finished {
        Some(result) => result,
        None => {
            stop.store(true, Ordering::SeqCst);
            worker.await
        }
    };

    if let Err(e) = result.context("Transfer worker panicked")? {
        error!("Transfer failed: {:#}", e);
        return Err(e);
    }

    info!("PDI bridge shutdown complete");
    Ok(())
}

fn run_bridge(config: Config, stop: Arc<AtomicBool>) -> Result<()> {
    sched::apply(config.scheduling.realtime_priority);

    let geometry = config.geometry();
    let image = load_image(&config.image.source, geometry)?;

    let registers = MmioRegisters::open(&config.bus).context("Failed to open register bus")?;
    let half_period = HalfPeriod::from(config.timing);
    match half_period.approx_frequency_hz() {
        Some(hz) => info!("SPI half period {:?} (~{} Hz)", half_period, hz),
        None => info!("SPI half period {:?}", half_period),
    }

    let mut spi = BitBangSpi::new(registers, half_period);
    if config.debug.bringup {
        spi.bringup();
    }

    let mut transfer = ChannelTransfer::new(spi, TransferOptions::from_config(&config))
        .with_observer(Box::new(LogObserver::new(config.debug.log_bytes)))
        .with_stop_flag(Arc::clone(&stop));

    info!(
        "Sending {}x{} image over channels {:?}",
        geometry.height, geometry.width, config.channels
    );

    loop {
        match transfer.run(&image) {
            Ok(report) => {
                info!(
                    "Gesture: {} (PDI attempts: {})",
                    report.results.gesture(),
                    report.pdi_attempts
                );
            }
            Err(BridgeError::Cancelled) => {
                info!("Transfer cancelled");
                return Ok(());
            }
            Err(e) => return Err(e).context("Transfer failed"),
        }

        if !config.run.continuous {
            return Ok(());
        }

        let deadline = Instant::now() + Duration::from_millis(config.run.interval_ms);
        while Instant::now() < deadline {
            if stop.load(Ordering::SeqCst) {
                return Ok(());
            }
            thread::sleep(Duration::from_millis(10));
        }
    }
}

fn load_image(source: &ImageSource, geometry: ImageGeometry) -> Result<RgbImage> {
    match source {
        ImageSource::Synthetic { seed } => {
            info!("Using synthetic image, seed 0x{:08x}", seed);
            Ok(RgbImage::synthetic(geometry, *seed))
        }
        ImageSource::Planar { path } => RgbImage::from_planar_file(path, geometry)
            .context(format!("Failed to load image: {}", path)),
    }
}

fn init_logger() {
    // Use `env_logger` for logging. Systemd/journald will capture stdout/stderr.
    if std::env::var("RUST_LOG").is_err() {
        std::env::set_var("RUST_LOG", "info");
    }
    env_logger::init();
}
