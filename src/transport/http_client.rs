use crate::config::ReliabilityConfig;
use crate::error::TransportError;
use reqwest::Client;
use std::time::Duration;

/// Build the client used for every host endpoint call.
///
/// Dial and TLS handshake share the connect bound; header and body reads share
/// the read bound. Building an unbounded fallback client is not an option, so
/// a builder failure is returned to the caller.
pub fn build_host_client(reliability: &ReliabilityConfig) -> Result<Client, TransportError> {
    Client::builder()
        .connect_timeout(Duration::from_secs(reliability.connect_timeout_secs.max(1)))
        .read_timeout(Duration::from_secs(reliability.read_timeout_secs.max(1)))
        .pool_max_idle_per_host(4)
        .pool_idle_timeout(Duration::from_secs(90))
        .tcp_keepalive(Duration::from_secs(60))
        .no_proxy()
        .build()
        .map_err(TransportError::Request)
}
