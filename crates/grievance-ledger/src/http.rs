use std::time::Duration;

use async_trait::async_trait;
use grievance_core::{GrievanceStatus, ReputationEvent};
use reqwest::{Client, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::{
    BlockRange, EventKindFilter, GrievanceLedger, HistoryEntry, LedgerError, LedgerEvent,
    ReputationLedger, TxReceipt, DEFAULT_MAX_EVENT_SPAN,
};

const DEFAULT_TIMEOUT_SECS: u64 = 15;
const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(5);

#[derive(Debug, Serialize)]
struct RegisterBody<'a> {
    canonical_hash: &'a str,
}

#[derive(Debug, Serialize)]
struct StatusBody<'a> {
    status: GrievanceStatus,
    message: &'a str,
}

#[derive(Debug, Deserialize)]
struct ExistsResponse {
    exists: bool,
}

#[derive(Debug, Deserialize)]
struct HeadResponse {
    block: u64,
}

#[derive(Debug, Deserialize)]
struct ScoreResponse {
    score: u16,
}

#[derive(Debug, Clone)]
struct GatewayClient {
    client: Client,
    base_url: String,
}

impl GatewayClient {
    fn new(base_url: &str, timeout: Duration) -> Result<Self, LedgerError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|err| LedgerError::Unavailable(format!("failed to build http client: {err}")))?;
        Ok(Self { client, base_url: base_url.trim_end_matches('/').to_string() })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }

    async fn get<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, String)],
    ) -> Result<Option<T>, LedgerError> {
        let response = self
            .client
            .get(self.url(path))
            .query(query)
            .send()
            .await
            .map_err(|err| LedgerError::Unavailable(err.to_string()))?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        decode(response).await.map(Some)
    }

    async fn post<B: Serialize + Sync, T: DeserializeOwned>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T, LedgerError> {
        let response = self
            .client
            .post(self.url(path))
            .json(body)
            .send()
            .await
            .map_err(|err| LedgerError::Unavailable(err.to_string()))?;
        decode(response).await
    }
}

async fn decode<T: DeserializeOwned>(response: reqwest::Response) -> Result<T, LedgerError> {
    let status = response.status();
    if status.is_success() {
        return response.json::<T>().await.map_err(|err| LedgerError::Decode(err.to_string()));
    }

    let body = response.text().await.unwrap_or_default();
    Err(classify(status, &body))
}

fn classify(status: StatusCode, body: &str) -> LedgerError {
    if status == StatusCode::TOO_MANY_REQUESTS {
        LedgerError::RateLimited
    } else if status.is_client_error() {
        LedgerError::Rejected(format!("{status}: {body}"))
    } else {
        LedgerError::Unavailable(format!("{status}: {body}"))
    }
}

/// Grievance ledger reached through an HTTP gateway.
///
/// The gateway has no push channel, so `subscribe` polls the head and pages
/// new blocks through `/events` in windows of at most `max_span` blocks.
#[derive(Debug, Clone)]
pub struct HttpLedgerGateway {
    inner: GatewayClient,
    poll_interval: Duration,
    max_span: u64,
}

impl HttpLedgerGateway {
    /// # Errors
    /// Returns [`LedgerError::Unavailable`] when the HTTP client cannot be built.
    pub fn new(base_url: &str) -> Result<Self, LedgerError> {
        Ok(Self {
            inner: GatewayClient::new(base_url, Duration::from_secs(DEFAULT_TIMEOUT_SECS))?,
            poll_interval: DEFAULT_POLL_INTERVAL,
            max_span: DEFAULT_MAX_EVENT_SPAN,
        })
    }

    #[must_use]
    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    #[must_use]
    pub fn with_max_span(mut self, max_span: u64) -> Self {
        self.max_span = max_span.max(1);
        self
    }

    async fn forward_new_blocks(
        &self,
        watermark: &mut u64,
        sender: &mpsc::Sender<LedgerEvent>,
    ) -> Result<bool, LedgerError> {
        let head = self.head_block().await?;
        while *watermark < head {
            let range = BlockRange {
                from: *watermark + 1,
                to: watermark.saturating_add(self.max_span).min(head),
            };
            for event in self.events_between(range, EventKindFilter::All).await? {
                if sender.send(event).await.is_err() {
                    return Ok(false);
                }
            }
            *watermark = range.to;
        }
        Ok(true)
    }
}

#[async_trait]
impl GrievanceLedger for HttpLedgerGateway {
    async fn register(&self, canonical_hash: &str) -> Result<TxReceipt, LedgerError> {
        self.inner.post("/grievances", &RegisterBody { canonical_hash }).await
    }

    async fn record_status(
        &self,
        canonical_hash: &str,
        status: GrievanceStatus,
        message: &str,
    ) -> Result<TxReceipt, LedgerError> {
        self.inner
            .post(&format!("/grievances/{canonical_hash}/status"), &StatusBody { status, message })
            .await
    }

    async fn exists(&self, canonical_hash: &str) -> Result<bool, LedgerError> {
        let response: Option<ExistsResponse> =
            self.inner.get(&format!("/grievances/{canonical_hash}/exists"), &[]).await?;
        Ok(response.is_some_and(|body| body.exists))
    }

    async fn history(&self, canonical_hash: &str) -> Result<Vec<HistoryEntry>, LedgerError> {
        let entries: Option<Vec<HistoryEntry>> =
            self.inner.get(&format!("/grievances/{canonical_hash}/history"), &[]).await?;
        Ok(entries.unwrap_or_default())
    }

    async fn head_block(&self) -> Result<u64, LedgerError> {
        let head: Option<HeadResponse> = self.inner.get("/head", &[]).await?;
        head.map(|body| body.block)
            .ok_or_else(|| LedgerError::Unavailable("gateway has no /head endpoint".to_string()))
    }

    async fn events_between(
        &self,
        range: BlockRange,
        filter: EventKindFilter,
    ) -> Result<Vec<LedgerEvent>, LedgerError> {
        if range.is_empty() {
            return Ok(Vec::new());
        }
        let query = [
            ("from", range.from.to_string()),
            ("to", range.to.to_string()),
            ("kind", filter.as_str().to_string()),
        ];
        let events: Option<Vec<LedgerEvent>> = self.inner.get("/events", &query).await?;
        Ok(events.unwrap_or_default())
    }

    async fn subscribe(&self, buffer: usize) -> Result<mpsc::Receiver<LedgerEvent>, LedgerError> {
        let start = self.head_block().await?;
        let (sender, receiver) = mpsc::channel(buffer.max(1));
        let gateway = self.clone();

        tokio::spawn(async move {
            let mut watermark = start;
            let mut ticker = tokio::time::interval(gateway.poll_interval);
            loop {
                ticker.tick().await;
                if sender.is_closed() {
                    break;
                }
                match gateway.forward_new_blocks(&mut watermark, &sender).await {
                    Ok(true) => {}
                    Ok(false) => break,
                    Err(err) => {
                        tracing::warn!(block = watermark, error = %err, "ledger poll failed");
                    }
                }
            }
            tracing::debug!(block = watermark, "ledger subscription closed");
        });

        Ok(receiver)
    }
}

/// Reputation contract reached through the same HTTP gateway.
#[derive(Debug, Clone)]
pub struct HttpReputationGateway {
    inner: GatewayClient,
}

impl HttpReputationGateway {
    /// # Errors
    /// Returns [`LedgerError::Unavailable`] when the HTTP client cannot be built.
    pub fn new(base_url: &str) -> Result<Self, LedgerError> {
        Ok(Self { inner: GatewayClient::new(base_url, Duration::from_secs(DEFAULT_TIMEOUT_SECS))? })
    }
}

#[async_trait]
impl ReputationLedger for HttpReputationGateway {
    async fn record(
        &self,
        account: &str,
        event: ReputationEvent,
    ) -> Result<TxReceipt, LedgerError> {
        self.inner.post(&format!("/reputation/{account}/events"), &event).await
    }

    async fn score(&self, account: &str) -> Result<Option<u16>, LedgerError> {
        let score: Option<ScoreResponse> =
            self.inner.get(&format!("/reputation/{account}"), &[]).await?;
        Ok(score.map(|body| body.score))
    }
}
