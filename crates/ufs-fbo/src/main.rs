#![warn(missing_docs)]

//! `ufs-fbo`: runs FBO endpoint reads and writes against a simulated device.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{anyhow, bail, Result};
use clap::Parser;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};
use ufs_fbo::{attrs, DeviceProfile, FboAttribute, FboConfig, FboError, MockUfsDevice, UfsHost};

#[derive(Parser)]
#[command(name = "ufs-fbo")]
#[command(about = "Exercise UFS FBO endpoints against a simulated device", long_about = None)]
struct Cli {
    /// FBO config file (.toml or .json)
    #[arg(short, long, env = "UFS_FBO_CONFIG")]
    config: Option<PathBuf>,

    /// Simulated device profile (.toml)
    #[arg(short, long)]
    device: Option<PathBuf>,

    /// Steps in order: `<endpoint>` reads, `<endpoint>=<value>` writes
    #[arg(required = true)]
    steps: Vec<String>,
}

enum Step {
    Show(FboAttribute),
    Store(FboAttribute, String),
}

fn parse_step(raw: &str) -> Result<Step> {
    let (name, value) = match raw.split_once('=') {
        Some((name, value)) => (name, Some(value)),
        None => (raw, None),
    };
    let attr = FboAttribute::from_name(name).ok_or_else(|| {
        let known: Vec<_> = FboAttribute::ALL.iter().map(|a| a.name()).collect();
        anyhow!("unknown endpoint {:?}, expected one of {}", name, known.join(", "))
    })?;
    Ok(match value {
        Some(value) => Step::Store(attr, value.to_string()),
        None => Step::Show(attr),
    })
}

fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let steps = cli
        .steps
        .iter()
        .map(|s| parse_step(s))
        .collect::<Result<Vec<_>>>()?;

    let config = match &cli.config {
        Some(path) => FboConfig::from_file(path)?,
        None => FboConfig::default(),
    };
    let profile = match &cli.device {
        Some(path) => DeviceProfile::from_file(path)?,
        None => DeviceProfile::default(),
    };

    let device = Arc::new(MockUfsDevice::from_profile(profile));
    let mut host = UfsHost::new(device.clone(), config);
    match host.probe_fbo(&device.device_descriptor()) {
        Ok(()) | Err(FboError::NotSupported) => {}
        Err(e) => tracing::warn!("FBO probe failed: {}", e),
    }

    let mut failures = 0usize;
    for step in steps {
        let outcome = match &step {
            Step::Show(attr) => attrs::show(&host, *attr).map(|text| {
                print!("{}", text);
            }),
            Step::Store(attr, value) => attrs::store(&host, *attr, value).map(|n| {
                tracing::debug!("{}: wrote {} bytes", attr, n);
            }),
        };
        if let Err(e) = outcome {
            let attr = match &step {
                Step::Show(attr) | Step::Store(attr, _) => attr,
            };
            eprintln!("{}: {}", attr, e);
            failures += 1;
        }
    }

    if failures > 0 {
        bail!("{} step(s) failed", failures);
    }
    Ok(())
}
