//! pulsetrack: run the vitals pipeline with scripted network outages

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::Parser;
use log::info;
use tokio::time;

use pulsetrack::auth::SessionFlag;
use pulsetrack::network::SimulatedNetwork;
use pulsetrack::storage::{FileStore, KvStore};
use pulsetrack::{Pipeline, PipelineConfig, PipelineDeps, TimeRange, VitalStatus};

#[derive(Parser)]
#[command(name = "pulsetrack", about = "Realtime vitals pipeline simulator")]
struct Cli {
    /// JSON config file; built-in defaults otherwise
    #[arg(long)]
    config: Option<PathBuf>,

    /// Directory for the offline queue (overrides the config's queue path)
    #[arg(long)]
    data_dir: Option<PathBuf>,

    /// RNG seed for a reproducible feed
    #[arg(long)]
    seed: Option<u64>,

    /// How long to run before printing a summary
    #[arg(long, default_value_t = 30)]
    duration_secs: u64,

    /// Take the network down this many seconds in
    #[arg(long)]
    offline_at: Option<u64>,

    /// Bring the network back this many seconds in
    #[arg(long)]
    online_at: Option<u64>,
}

impl Cli {
    fn load_config(&self) -> Result<PipelineConfig> {
        let mut config = match &self.config {
            Some(path) => PipelineConfig::from_json_file(path)
                .with_context(|| format!("loading {}", path.display()))?,
            None => PipelineConfig::default(),
        };
        if let Some(dir) = &self.data_dir {
            config.queue.path = dir.join("offline_queue.log");
        }
        if self.seed.is_some() {
            config.seed = self.seed;
        }
        config.validate()?;
        Ok(config)
    }

    fn check_schedule(&self) -> Result<()> {
        if let (Some(off), Some(on)) = (self.offline_at, self.online_at) {
            if on <= off {
                bail!("--online-at ({}) must come after --offline-at ({})", on, off);
            }
        }
        Ok(())
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    cli.check_schedule()?;
    let config = cli.load_config()?;

    let store = Arc::new(
        FileStore::open(&config.queue.path)
            .await
            .with_context(|| format!("opening offline queue at {}", config.queue.path.display()))?,
    );
    let leftover = store.count().await?;
    if leftover > 0 {
        info!("{} reading(s) left over from a previous run", leftover);
    }

    let network = SimulatedNetwork::new(true);
    let deps = PipelineDeps::new(
        network.clone(),
        Arc::new(SessionFlag::new(true)),
        store.clone(),
    );
    let handle = Pipeline::new(&config, deps).spawn();

    let mut notices = handle.subscribe_notices();
    tokio::spawn(async move {
        while let Ok(notice) = notices.recv().await {
            println!("[notice] {}", notice.message());
        }
    });

    let mut status = handle.watch_status();
    tokio::spawn(async move {
        while status.changed().await.is_ok() {
            let state = *status.borrow_and_update();
            println!("[status] {}", state);
        }
    });

    for second in 1..=cli.duration_secs {
        tokio::select! {
            _ = time::sleep(Duration::from_secs(1)) => {}
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted after {}s", second - 1);
                break;
            }
        }
        if cli.offline_at == Some(second) {
            network.set_online(false);
        }
        if cli.online_at == Some(second) {
            network.set_online(true);
        }
    }

    let history = handle.history();
    println!("history: {} reading(s)", history.len());
    println!(
        "last {}: {} reading(s)",
        TimeRange::OneMinute,
        history.window(TimeRange::OneMinute).len()
    );
    if let Some(latest) = history.latest() {
        let status = latest.overall_status();
        println!("latest ({}):", status);
        println!("{}", serde_json::to_string_pretty(&latest)?);
        if let Some(note) = describe_status(status) {
            println!("{}", note);
        }
    }
    println!("queued offline: {}", store.count().await?);
    println!("finished at {}", chrono::Utc::now().to_rfc3339());

    handle.shutdown().await?;
    Ok(())
}

/// Note printed under the latest reading when any metric is out of band.
fn describe_status(status: VitalStatus) -> Option<&'static str> {
    match status {
        VitalStatus::Normal => None,
        VitalStatus::Warning => Some("latest reading has a value outside the normal band"),
        VitalStatus::Critical => Some("latest reading has a critical value"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_out_of_band_readings_are_described() {
        assert_eq!(describe_status(VitalStatus::Normal), None);
        assert!(describe_status(VitalStatus::Warning).is_some());
        assert!(describe_status(VitalStatus::Critical)
            .unwrap()
            .contains("critical"));
    }
}
