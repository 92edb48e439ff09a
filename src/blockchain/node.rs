use reqwest::blocking::Client;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;
use utoipa::ToSchema;

use std::time::Duration;

use super::block::Block;

/// Request timeout for peer chain fetches. A slow peer only delays its own
/// evaluation, never the rest of the resolve sweep.
const PEER_TIMEOUT: Duration = Duration::from_secs(5);

/// Errors from talking to a peer during fork choice. They all mean the same
/// thing to the engine: this peer contributes no candidate chain.
#[derive(Debug, Error)]
pub enum PeerError {
    #[error("request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("peer returned status {0}")]
    Status(StatusCode),

    #[error("invalid peer address: {0}")]
    InvalidAddress(String),
}

/// A chain as reported over the wire: the shape `/chain` serves and fork
/// choice consumes.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ChainSnapshot {
    /// Number of blocks the node claims to hold.
    pub length: usize,

    /// The blocks themselves, genesis first.
    pub chain: Vec<Block>,
}

/// Source of candidate chains for fork choice. The engine talks to peers
/// through this seam so that resolution can be exercised without a network.
pub trait PeerSource {
    /// Fetches the full chain a peer currently reports.
    fn fetch_chain(&self, peer: &str) -> Result<ChainSnapshot, PeerError>;
}

/// Fetches peer chains over HTTP with a bounded per-request timeout.
pub struct HttpPeerSource {
    http: Client,
}

impl HttpPeerSource {
    pub fn new() -> Self {
        let http = Client::builder()
            .timeout(PEER_TIMEOUT)
            .build()
            .expect("failed to build HTTP client");

        HttpPeerSource { http }
    }
}

impl Default for HttpPeerSource {
    fn default() -> Self {
        Self::new()
    }
}

impl PeerSource for HttpPeerSource {
    fn fetch_chain(&self, peer: &str) -> Result<ChainSnapshot, PeerError> {
        let response = self.http.get(format!("http://{peer}/api/v1/chain")).send()?;

        if !response.status().is_success() {
            return Err(PeerError::Status(response.status()));
        }

        Ok(response.json()?)
    }
}

/// Normalizes a peer address down to its `host:port` authority. Accepts a
/// full URL or a bare authority.
pub fn peer_authority(address: &str) -> Result<String, PeerError> {
    let with_scheme = if address.contains("://") {
        address.to_string()
    } else {
        format!("http://{address}")
    };

    let url = Url::parse(&with_scheme)
        .map_err(|_| PeerError::InvalidAddress(address.to_string()))?;
    let host = url
        .host_str()
        .ok_or_else(|| PeerError::InvalidAddress(address.to_string()))?;

    Ok(match url.port() {
        Some(port) => format!("{host}:{port}"),
        None => host.to_string(),
    })
}
