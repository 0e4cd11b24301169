//! IPC client: probes the endpoint and forwards an invocation's arguments.
//!
//! Every step is bounded by a timeout from [`ClientConfig`]. Failing to
//! connect is the normal outcome for the first invocation and means "become
//! the resident instance". Once connected, write and read problems are only
//! warnings: a resident instance exists, so the dispatch counts as done.

use solo_config::ClientConfig;
use tokio::io::AsyncWriteExt;
use tokio::net::UnixStream;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use super::wire;
use crate::endpoint::Endpoint;

/// Largest reply the client accepts.
const MAX_RESPONSE_BYTES: usize = 256 * 1024;

/// Result of a dispatch attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Dispatch {
    /// Nobody is listening on the endpoint.
    NotFound,
    /// A resident instance accepted the request. `response` is `None` when
    /// no reply arrived in time.
    Delivered { response: Option<String> },
}

impl Dispatch {
    pub fn is_delivered(&self) -> bool {
        matches!(self, Dispatch::Delivered { .. })
    }
}

/// Client side of the endpoint.
#[derive(Debug, Clone)]
pub struct Client {
    endpoint: Endpoint,
    config: ClientConfig,
}

impl Client {
    pub fn new(endpoint: Endpoint, config: ClientConfig) -> Self {
        Self { endpoint, config }
    }

    /// Try to hand `line` to a resident instance.
    pub async fn try_dispatch(&self, line: &str) -> Dispatch {
        let path = self.endpoint.socket_path();
        debug!(endpoint = %self.endpoint, path = %path.display(), "Connect to server");

        let stream = match timeout(self.config.connect_timeout(), UnixStream::connect(&path)).await {
            Ok(Ok(stream)) => stream,
            Ok(Err(e)) => {
                debug!(endpoint = %self.endpoint, error = %e, "Server is not found");
                return Dispatch::NotFound;
            }
            Err(_) => {
                debug!(
                    endpoint = %self.endpoint,
                    timeout_ms = self.config.connect_timeout_ms,
                    "Server is not found (connect timed out)"
                );
                return Dispatch::NotFound;
            }
        };
        info!(endpoint = %self.endpoint, "Connected to server");

        let (reader, mut writer) = stream.into_split();

        info!(request = line, "Write data");
        let written = timeout(self.config.write_timeout(), async {
            writer.write_all(line.as_bytes()).await?;
            writer.flush().await
        })
        .await;
        match written {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!(error = %e, "Failed to write request"),
            Err(_) => warn!(
                timeout_ms = self.config.write_timeout_ms,
                "Timed out writing request"
            ),
        }

        let read = timeout(
            self.config.read_timeout(),
            wire::read_available(&reader, MAX_RESPONSE_BYTES),
        )
        .await;
        let response = match read {
            Ok(Ok(bytes)) if bytes.is_empty() => {
                warn!("No response: server closed the connection");
                None
            }
            Ok(Ok(bytes)) => Some(String::from_utf8_lossy(&bytes).into_owned()),
            Ok(Err(e)) => {
                warn!(error = %e, "No response");
                None
            }
            Err(_) => {
                warn!(timeout_ms = self.config.read_timeout_ms, "No response");
                None
            }
        };

        if let Some(text) = &response {
            info!(response = %text, "Response received");
        }
        Dispatch::Delivered { response }
    }

    /// Dispatch, retrying while nobody answers.
    ///
    /// Used after losing the endpoint to a concurrent invocation: the winner
    /// may not be listening yet.
    pub async fn dispatch_with_retries(&self, line: &str) -> Dispatch {
        let mut attempt = 0;
        loop {
            let dispatch = self.try_dispatch(line).await;
            if dispatch.is_delivered() || attempt >= self.config.race_retries {
                return dispatch;
            }
            attempt += 1;
            debug!(attempt, "Resident not answering yet, retrying dispatch");
            tokio::time::sleep(self.config.race_retry_delay()).await;
        }
    }
}
