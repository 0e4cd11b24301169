//! Instance bootstrap: decide whether this process forwards or serves.

use solo_config::AppConfig;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::endpoint::{Endpoint, EndpointError};
use crate::ipc::{Client, Dispatch, Server, ServerHandle, wire};
use crate::logging::LogControl;
use crate::router::{ParseMode, Reply, RouteError, Router};
use crate::ticker::Ticker;

/// Shutdown signal sent via broadcast channel.
#[derive(Debug, Clone)]
pub struct ShutdownSignal;

/// Text shown when `--quit` finds nobody to stop.
pub const NO_RUNNING_INSTANCE: &str = "No running instance";

/// How an invocation ended. Every outcome maps to exit status 0.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// A resident instance took the arguments.
    Dispatched { response: Option<String> },
    /// Nothing to serve; show this text and exit.
    Displayed(String),
    /// This process was the resident instance and has shut down.
    Served,
}

#[derive(Debug, thiserror::Error)]
pub enum InstanceError {
    /// The process's own arguments did not parse.
    #[error(transparent)]
    Usage(clap::Error),

    #[error(transparent)]
    Endpoint(#[from] EndpointError),
}

impl From<RouteError> for InstanceError {
    fn from(err: RouteError) -> Self {
        match err {
            RouteError::Usage(e) => InstanceError::Usage(e),
        }
    }
}

/// One invocation of the program.
pub struct Instance {
    config: AppConfig,
    endpoint: Endpoint,
    router: Router,
    shutdown_tx: broadcast::Sender<ShutdownSignal>,
}

impl Instance {
    pub fn new(config: AppConfig, log: LogControl) -> Result<Self, InstanceError> {
        let endpoint = Endpoint::from_config(&config.endpoint)?;
        let (shutdown_tx, _) = broadcast::channel(4);
        Ok(Self {
            config,
            endpoint,
            router: Router::new(log),
            shutdown_tx,
        })
    }

    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    /// Request a graceful shutdown of a serving instance.
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(ShutdownSignal);
    }

    /// Run the invocation with its full argument vector (program name first).
    ///
    /// Forwards to a resident instance when one answers. Otherwise applies
    /// the arguments locally and, unless they only asked for help, version
    /// or quit, serves the endpoint until shutdown.
    pub async fn run<I, S>(&self, args: I) -> Result<Outcome, InstanceError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let args: Vec<String> = args.into_iter().map(Into::into).collect();
        let line = wire::request_line(&args);
        let client = Client::new(self.endpoint.clone(), self.config.client.clone());

        debug!(endpoint = %self.endpoint, "Dispatching");
        if let Dispatch::Delivered { response } = client.try_dispatch(&line).await {
            return Ok(Outcome::Dispatched { response });
        }

        match self.router.process(args.iter(), ParseMode::Strict)? {
            Reply::Help(text) | Reply::Version(text) => return Ok(Outcome::Displayed(text)),
            Reply::Applied { quit: true, .. } => {
                return Ok(Outcome::Displayed(NO_RUNNING_INSTANCE.to_string()));
            }
            Reply::Applied { lines, .. } => {
                for line in lines {
                    info!("{line}");
                }
            }
        }

        let mut shutdown_rx = self.shutdown_tx.subscribe();
        let server = match self.serve() {
            Ok(server) => Some(server),
            Err(EndpointError::AlreadyRunning { .. }) => {
                info!(endpoint = %self.endpoint, "Lost the endpoint to a concurrent instance, forwarding");
                match client.dispatch_with_retries(&line).await {
                    Dispatch::Delivered { response } => return Ok(Outcome::Dispatched { response }),
                    Dispatch::NotFound => {
                        warn!(endpoint = %self.endpoint, "Endpoint is held but nobody answers; running unreachable");
                        None
                    }
                }
            }
            Err(e) => {
                warn!(error = %e, "Server is not started; running unreachable");
                None
            }
        };

        let ticker = Ticker::spawn(&self.config.ticker, &self.shutdown_tx);
        info!(endpoint = %self.endpoint, "Serving");

        self.wait_for_shutdown(&mut shutdown_rx).await;

        if let Some(server) = server {
            server.shutdown().await;
        }
        ticker.join().await;
        info!("Instance stopped");
        Ok(Outcome::Served)
    }

    fn serve(&self) -> Result<ServerHandle, EndpointError> {
        Server::listen(
            &self.endpoint,
            self.router.clone(),
            &self.config.server,
            self.shutdown_tx.clone(),
        )
    }

    async fn wait_for_shutdown(&self, shutdown_rx: &mut broadcast::Receiver<ShutdownSignal>) {
        let terminate = async {
            match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
                Ok(mut stream) => {
                    stream.recv().await;
                }
                Err(e) => {
                    warn!(error = %e, "Cannot listen for SIGTERM");
                    std::future::pending::<()>().await;
                }
            }
        };

        tokio::select! {
            _ = shutdown_rx.recv() => {
                info!("Shutdown signal received, stopping instance");
            }
            _ = tokio::signal::ctrl_c() => {
                warn!("Ctrl-C received, initiating graceful shutdown");
            }
            _ = terminate => {
                warn!("SIGTERM received, initiating graceful shutdown");
            }
        }
        let _ = self.shutdown_tx.send(ShutdownSignal);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::build_info::version_string;
    use crate::logging;
    use crate::router::help_text;
    use pretty_assertions::assert_eq;
    use solo_test_utils::config::{TestConfigBuilder, TestEnv};
    use solo_test_utils::tracing_setup::CapturedWriter;
    use std::sync::Arc;
    use std::time::Duration;

    fn instance(env: &TestEnv) -> (Instance, Box<dyn tracing::Subscriber + Send + Sync>) {
        let (subscriber, log) =
            logging::build(&env.config.logging, CapturedWriter::default()).unwrap();
        let instance = Instance::new(env.config.clone(), log).unwrap();
        (instance, Box::new(subscriber))
    }

    async fn wait_for_socket(endpoint: &Endpoint) {
        for _ in 0..200 {
            if endpoint.socket_path().exists() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("server never bound {}", endpoint.socket_path().display());
    }

    #[tokio::test]
    async fn test_help_alone_is_displayed() {
        let env = TestConfigBuilder::new().build();
        let (instance, _sub) = instance(&env);
        let outcome = instance.run(["solo", "--help"]).await.unwrap();
        assert_eq!(outcome, Outcome::Displayed(help_text()));
    }

    #[tokio::test]
    async fn test_bad_own_arguments_are_usage_errors() {
        let env = TestConfigBuilder::new().build();
        let (instance, _sub) = instance(&env);
        let result = instance.run(["solo", "--bogus"]).await;
        assert!(matches!(result, Err(InstanceError::Usage(_))));
    }

    #[tokio::test]
    async fn test_quit_without_resident() {
        let env = TestConfigBuilder::new().build();
        let (instance, _sub) = instance(&env);
        let outcome = instance.run(["solo", "--quit"]).await.unwrap();
        assert_eq!(outcome, Outcome::Displayed(NO_RUNNING_INSTANCE.to_string()));
        assert!(!instance.endpoint().socket_path().exists());
    }

    #[tokio::test]
    async fn test_serve_forward_and_quit() {
        let env = TestConfigBuilder::new().build();
        let (resident, _sub_a) = instance(&env);
        let resident = Arc::new(resident);
        let serving = tokio::spawn({
            let resident = Arc::clone(&resident);
            async move { resident.run(["solo"]).await }
        });
        wait_for_socket(resident.endpoint()).await;

        let (second, _sub_b) = instance(&env);
        let outcome = second.run(["solo", "--version"]).await.unwrap();
        assert_eq!(
            outcome,
            Outcome::Dispatched {
                response: Some(version_string())
            }
        );

        let outcome = second.run(["solo", "--quit"]).await.unwrap();
        assert_eq!(
            outcome,
            Outcome::Dispatched {
                response: Some("Shutdown requested".to_string())
            }
        );

        let served = tokio::time::timeout(Duration::from_secs(5), serving)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert_eq!(served, Outcome::Served);
        assert!(!resident.endpoint().socket_path().exists());
    }

    #[tokio::test]
    async fn test_external_shutdown_stops_serving() {
        let env = TestConfigBuilder::new().build();
        let (resident, _sub) = instance(&env);
        let resident = Arc::new(resident);
        let serving = tokio::spawn({
            let resident = Arc::clone(&resident);
            async move { resident.run(["solo", "--logging-rules", "debug"]).await }
        });
        wait_for_socket(resident.endpoint()).await;

        resident.shutdown();
        let served = tokio::time::timeout(Duration::from_secs(5), serving)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert_eq!(served, Outcome::Served);
    }
}
