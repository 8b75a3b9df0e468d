//! Transport seam between the run coordinator and the control server.
//!
//! The coordinator only needs four operations; putting them behind a trait
//! keeps the state machine testable against an in-process mock and free of
//! any HTTP detail.

use std::pin::Pin;

use async_trait::async_trait;
use bytes::Bytes;
use futures::{Stream, TryStreamExt};
use thiserror::Error;

use super::{PrecheckReport, RunResponse, StopResponse};
use crate::params::BenchParams;

/// Raw chunk sequence of a streaming run, as delivered by the transport.
/// Chunk sizes carry no alignment guarantees.
pub type ChunkStream = Pin<Box<dyn Stream<Item = Result<Bytes, TransportError>> + Send>>;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("server rejected request ({status}): {body}")]
    Rejected { status: u16, body: String },

    #[error("stream read failed: {0}")]
    Read(String),
}

/// Operations the coordinator needs from the remote side.
#[async_trait]
pub trait BenchTransport: Send + Sync {
    /// Query per-node GPU occupancy for the named host list.
    async fn precheck(&self, hostlist: &str) -> Result<PrecheckReport, TransportError>;

    /// Begin a streaming run and return its chunk stream.
    async fn run_stream(&self, params: &BenchParams) -> Result<ChunkStream, TransportError>;

    /// Run to completion in one blocking call.
    async fn run_blocking(&self, params: &BenchParams) -> Result<RunResponse, TransportError>;

    /// Ask the remote to cancel the current run. Fire-and-forget relative
    /// to any open stream; the stream itself stays open until the remote
    /// closes it.
    async fn stop(&self) -> Result<StopResponse, TransportError>;
}

/// HTTP implementation against the fabricbench control server.
pub struct HttpTransport {
    client: reqwest::Client,
    base_url: String,
}

impl HttpTransport {
    pub fn new(base_url: impl Into<String>) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Self {
            client: reqwest::Client::new(),
            base_url,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }

    async fn check(resp: reqwest::Response) -> Result<reqwest::Response, TransportError> {
        let status = resp.status();
        if status.is_success() {
            return Ok(resp);
        }
        let body = resp.text().await.unwrap_or_default();
        Err(TransportError::Rejected {
            status: status.as_u16(),
            body,
        })
    }
}

#[async_trait]
impl BenchTransport for HttpTransport {
    async fn precheck(&self, hostlist: &str) -> Result<PrecheckReport, TransportError> {
        let resp = self
            .client
            .get(self.url("/api/v1/bench/precheck"))
            .query(&[("hostlist", hostlist)])
            .send()
            .await?;
        Ok(Self::check(resp).await?.json().await?)
    }

    async fn run_stream(&self, params: &BenchParams) -> Result<ChunkStream, TransportError> {
        let resp = self
            .client
            .post(self.url("/api/v1/bench/run-stream"))
            .json(params)
            .send()
            .await?;
        let resp = Self::check(resp).await?;
        Ok(Box::pin(resp.bytes_stream().map_err(TransportError::from)))
    }

    async fn run_blocking(&self, params: &BenchParams) -> Result<RunResponse, TransportError> {
        let resp = self
            .client
            .post(self.url("/api/v1/bench/run"))
            .json(params)
            .send()
            .await?;
        Ok(Self::check(resp).await?.json().await?)
    }

    async fn stop(&self) -> Result<StopResponse, TransportError> {
        let resp = self
            .client
            .post(self.url("/api/v1/bench/stop"))
            .send()
            .await?;
        Ok(Self::check(resp).await?.json().await?)
    }
}
