//! Configuration builders for tests.
//!
//! Every [`TestEnv`] owns a fresh temporary directory that holds its
//! endpoint, so tests running in parallel never find each other's
//! instances.

use std::path::{Path, PathBuf};

use solo_config::AppConfig;
use tempfile::TempDir;

/// Fluent builder for an isolated [`AppConfig`].
///
/// # Example
///
/// ```ignore
/// let env = TestConfigBuilder::new()
///     .client_timeout_ms(100)
///     .build();
/// let endpoint_dir = env.dir();
/// ```
pub struct TestConfigBuilder {
    config: AppConfig,
}

impl TestConfigBuilder {
    /// Defaults with the ticker turned off.
    pub fn new() -> Self {
        let mut config = AppConfig::default();
        config.ticker.enabled = false;
        Self { config }
    }

    pub fn endpoint_name(mut self, name: &str) -> Self {
        self.config.endpoint.name = name.to_string();
        self
    }

    pub fn client_timeout_ms(mut self, ms: u64) -> Self {
        self.config.client.connect_timeout_ms = ms;
        self.config.client.write_timeout_ms = ms;
        self.config.client.read_timeout_ms = ms;
        self
    }

    pub fn race_retries(mut self, retries: u32, delay_ms: u64) -> Self {
        self.config.client.race_retries = retries;
        self.config.client.race_retry_delay_ms = delay_ms;
        self
    }

    /// Finish the config, placing the endpoint in a new temp directory.
    ///
    /// Panics if the temp directory cannot be created.
    pub fn build(mut self) -> TestEnv {
        let temp_dir = TempDir::new().expect("failed to create temp dir");
        self.config.endpoint.dir = Some(temp_dir.path().to_path_buf());
        TestEnv {
            config: self.config,
            temp_dir,
        }
    }
}

impl Default for TestConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// A test-scoped configuration. The endpoint directory is deleted when this
/// value is dropped.
pub struct TestEnv {
    pub config: AppConfig,
    temp_dir: TempDir,
}

impl TestEnv {
    /// Directory holding the endpoint socket and lock.
    pub fn dir(&self) -> &Path {
        self.temp_dir.path()
    }

    /// Write the config as TOML into the temp directory and return its path.
    pub fn write_config_file(&self) -> PathBuf {
        let path = self.dir().join("solo.toml");
        let content = toml::to_string(&self.config).expect("failed to serialize test config");
        std::fs::write(&path, content).expect("failed to write test config");
        path
    }
}
