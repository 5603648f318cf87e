use std::sync::Arc;
use std::time::Duration;

use sha2::{Digest, Sha256};
use tracing::{error, info, warn};

use crate::transport::RedfishTransport;

/// Background task: when a CA URI is configured, poll it for the current chain and
/// install it via [`RedfishTransport::set_security`] whenever it changes (§4.3).
///
/// Until the first successful install, the transport's `rfTransportReady` flag stays
/// false and the readiness endpoint reports "not ready".
pub fn spawn_ca_poller(
    transport: Arc<RedfishTransport>,
    ca_uri: String,
    poll_interval: Duration,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let client = reqwest::Client::new();
        let mut last_hash: Option<[u8; 32]> = None;
        loop {
            match client.get(&ca_uri).send().await {
                Ok(resp) => match resp.bytes().await {
                    Ok(bytes) => {
                        let hash: [u8; 32] = Sha256::digest(&bytes).into();
                        if last_hash != Some(hash) {
                            match transport.set_security(&bytes).await {
                                Ok(()) => {
                                    info!(ca_uri = %ca_uri, "CA chain changed, new transport installed");
                                    last_hash = Some(hash);
                                }
                                Err(err) => {
                                    error!(ca_uri = %ca_uri, error = %err, "failed to install new CA chain");
                                }
                            }
                        }
                    }
                    Err(err) => warn!(ca_uri = %ca_uri, error = %err, "failed to read CA chain body"),
                },
                Err(err) => warn!(ca_uri = %ca_uri, error = %err, "failed to poll CA chain"),
            }
            tokio::time::sleep(poll_interval).await;
        }
    })
}
