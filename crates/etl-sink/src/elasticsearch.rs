//! Elasticsearch bulk sink.
//!
//! Sends each batch as one `_bulk` request in NDJSON form, with an `index`
//! action per document so existing documents are replaced. When several
//! hosts are configured, consecutive requests rotate through them, which
//! spreads retries of the same batch across the cluster.

use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{debug, info};

use etl_types::{ElasticsearchSettings, IndexDocument};

use crate::error::{DocumentError, SinkError};
use crate::sink::BulkSink;

const NDJSON: &str = "application/x-ndjson";

/// Rejected documents carried into a [`SinkError::DocumentErrors`].
const MAX_REPORTED_ERRORS: usize = 10;

pub struct ElasticsearchSink {
    client: Client,
    hosts: Vec<String>,
    next_host: AtomicUsize,
}

impl ElasticsearchSink {
    pub fn new(settings: &ElasticsearchSettings) -> Result<Self, SinkError> {
        let hosts: Vec<String> = settings
            .hosts
            .iter()
            .map(|h| h.trim_end_matches('/').to_string())
            .filter(|h| !h.is_empty())
            .collect();
        if hosts.is_empty() {
            return Err(SinkError::Rejected {
                status: 0,
                body: "no elasticsearch hosts configured".to_string(),
            });
        }

        let client = Client::builder()
            .timeout(settings.request_timeout())
            .build()
            .map_err(|e| SinkError::Transport(e.to_string()))?;

        info!(hosts = ?hosts, "Configured search index sink");

        Ok(Self {
            client,
            hosts,
            next_host: AtomicUsize::new(0),
        })
    }

    fn host(&self) -> &str {
        let i = self.next_host.fetch_add(1, Ordering::Relaxed) % self.hosts.len();
        &self.hosts[i]
    }
}

#[async_trait]
impl BulkSink for ElasticsearchSink {
    async fn bulk_upsert(
        &self,
        index: &str,
        documents: &[IndexDocument],
    ) -> Result<(), SinkError> {
        if documents.is_empty() {
            return Ok(());
        }

        let body = build_bulk_body(index, documents)?;
        let url = format!("{}/_bulk", self.host());
        debug!(url = %url, index = index, docs = documents.len(), "Sending bulk request");

        let response = self
            .client
            .post(&url)
            .header(reqwest::header::CONTENT_TYPE, NDJSON)
            .body(body)
            .send()
            .await
            .map_err(|e| SinkError::Transport(e.to_string()))?;

        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| SinkError::Transport(e.to_string()))?;

        if !status.is_success() {
            return Err(classify_status(status, text));
        }

        parse_bulk_response(&text, documents.len())
    }

    fn name(&self) -> &str {
        "elasticsearch"
    }
}

/// Action line plus source line per document, newline-terminated.
pub(crate) fn build_bulk_body(
    index: &str,
    documents: &[IndexDocument],
) -> Result<Vec<u8>, SinkError> {
    let mut body = Vec::with_capacity(documents.len() * 256);
    for doc in documents {
        let action = json!({ "index": { "_index": index, "_id": doc.id } });
        serde_json::to_writer(&mut body, &action)?;
        body.push(b'\n');
        serde_json::to_writer(&mut body, &doc.body)?;
        body.push(b'\n');
    }
    Ok(body)
}

/// Throttling and server-side failures are worth retrying; anything else
/// means the request is wrong.
pub(crate) fn classify_status(status: StatusCode, body: String) -> SinkError {
    if status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
        SinkError::Unavailable {
            status: status.as_u16(),
            body,
        }
    } else {
        SinkError::Rejected {
            status: status.as_u16(),
            body,
        }
    }
}

#[derive(Debug, Deserialize)]
struct BulkResponse {
    #[serde(default)]
    errors: bool,
    #[serde(default)]
    items: Vec<BulkItem>,
}

#[derive(Debug, Deserialize)]
struct BulkItem {
    index: Option<BulkItemResult>,
}

#[derive(Debug, Deserialize)]
struct BulkItemResult {
    #[serde(rename = "_id", default)]
    id: String,
    #[serde(default)]
    status: u16,
    error: Option<Value>,
}

pub(crate) fn parse_bulk_response(text: &str, total: usize) -> Result<(), SinkError> {
    let response: BulkResponse = serde_json::from_str(text)
        .map_err(|e| SinkError::InvalidResponse(e.to_string()))?;
    if !response.errors {
        return Ok(());
    }

    let failed: Vec<DocumentError> = response
        .items
        .into_iter()
        .filter_map(|item| item.index)
        .filter(|result| result.error.is_some() || result.status >= 300)
        .map(|result| DocumentError {
            id: result.id,
            status: result.status,
            reason: result
                .error
                .as_ref()
                .map(error_reason)
                .unwrap_or_else(|| "unknown".to_string()),
        })
        .collect();

    if failed.is_empty() {
        return Err(SinkError::InvalidResponse(
            "errors flag set but no failed items".to_string(),
        ));
    }

    Err(SinkError::DocumentErrors {
        failed: failed.len(),
        total,
        errors: failed.into_iter().take(MAX_REPORTED_ERRORS).collect(),
    })
}

fn error_reason(error: &Value) -> String {
    match (error.get("type"), error.get("reason")) {
        (Some(kind), Some(reason)) => format!(
            "{}: {}",
            kind.as_str().unwrap_or_default(),
            reason.as_str().unwrap_or_default()
        ),
        _ => error.to_string(),
    }
}
