#![deny(unsafe_code)]

//! solo CLI: forwards to the resident instance or becomes it.

use std::path::PathBuf;

use anyhow::{Context, Result};
use solo_config::AppConfig;
use solo_core::{Instance, InstanceError, Outcome, logging};
use tracing::info;

/// Environment variable naming the configuration file.
const CONFIG_ENV: &str = "SOLO_CONFIG";

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let config = load_config().await?;
    let log = logging::init(&config.logging).context("failed to initialise logging")?;
    let instance = Instance::new(config, log)?;

    let args = std::env::args_os().map(|arg| arg.to_string_lossy().into_owned());
    match instance.run(args).await {
        Ok(Outcome::Dispatched { response }) => {
            if let Some(text) = response.filter(|text| !text.is_empty()) {
                println!("{}", text.trim_end());
            }
        }
        Ok(Outcome::Displayed(text)) => println!("{}", text.trim_end()),
        Ok(Outcome::Served) => info!("Exiting"),
        Err(InstanceError::Usage(err)) => err.exit(),
        Err(e) => return Err(e.into()),
    }

    Ok(())
}

async fn load_config() -> Result<AppConfig> {
    match std::env::var_os(CONFIG_ENV) {
        Some(path) => {
            let path = PathBuf::from(path);
            AppConfig::load(&path)
                .await
                .with_context(|| format!("failed to load configuration from {}", path.display()))
        }
        None => Ok(AppConfig::default()),
    }
}
