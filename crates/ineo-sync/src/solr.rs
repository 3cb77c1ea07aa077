//! HTTP client for the Solr index holding the harvested records.

use std::collections::HashSet;

use async_trait::async_trait;
use futures::{FutureExt, StreamExt, TryStreamExt, stream};
use ineo_core::{Record, UpdatePayload, fields};
use serde::Deserialize;
use serde_json::{Map, Value, json};
use tracing::{debug, info, warn};

use crate::SyncError;
use crate::error::check_status;

pub const DEFAULT_WINDOW_SIZE: usize = 10_000;
pub const DEFAULT_FETCH_CONCURRENCY: usize = 8;
pub const DEFAULT_WRITE_CONCURRENCY: usize = 12;
pub const DEFAULT_COMMIT_WITHIN_MS: u64 = 1_000;

/// Read and write access to the record store.
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Number of records matching `query`.
    async fn count(&self, query: &str) -> Result<u64, SyncError>;

    /// All records matching `query`, in no particular order.
    async fn fetch_all(&self, query: &str) -> Result<Vec<Record>, SyncError>;

    /// Write every payload. All writes run to completion; the first failure
    /// is returned afterwards.
    async fn update_batch(&self, payloads: &[UpdatePayload]) -> Result<(), SyncError>;
}

/// Paging and concurrency settings for [`SolrClient`].
#[derive(Debug, Clone)]
pub struct ClientOptions {
    /// Rows per fetch request.
    pub window_size: usize,
    /// Fetch requests in flight at once.
    pub fetch_concurrency: usize,
    /// Update requests in flight at once.
    pub write_concurrency: usize,
    /// `commitWithin` sent with every update.
    pub commit_within_ms: u64,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            window_size: DEFAULT_WINDOW_SIZE,
            fetch_concurrency: DEFAULT_FETCH_CONCURRENCY,
            write_concurrency: DEFAULT_WRITE_CONCURRENCY,
            commit_within_ms: DEFAULT_COMMIT_WITHIN_MS,
        }
    }
}

#[derive(Debug, Clone)]
struct Credentials {
    username: String,
    password: String,
}

#[derive(Deserialize)]
struct SelectResponse {
    response: SelectBody,
}

#[derive(Deserialize)]
struct SelectBody {
    #[serde(rename = "numFound")]
    num_found: u64,
    #[serde(default)]
    docs: Vec<Value>,
}

/// Solr client for the `select` and `update` handlers of one core.
pub struct SolrClient {
    client: reqwest::Client,
    base_url: String,
    credentials: Option<Credentials>,
    options: ClientOptions,
}

impl SolrClient {
    /// Create a client for the given core URL.
    ///
    /// `base_url` should be like `http://localhost:8983/solr/vlo-index`.
    pub fn new(base_url: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            credentials: None,
            options: ClientOptions::default(),
        }
    }

    /// Use HTTP basic auth for every request.
    pub fn with_credentials(mut self, username: String, password: String) -> Self {
        self.credentials = Some(Credentials { username, password });
        self
    }

    pub fn with_options(mut self, options: ClientOptions) -> Self {
        self.options = options;
        self
    }

    pub fn options(&self) -> &ClientOptions {
        &self.options
    }

    fn authorize(&self, req: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.credentials {
            Some(c) => req.basic_auth(&c.username, Some(&c.password)),
            None => req,
        }
    }

    async fn select(&self, query: &str, start: u64, rows: usize) -> Result<SelectBody, SyncError> {
        let url = format!("{}/select", self.base_url);
        let params = [
            ("q", query.to_string()),
            ("wt", "json".to_string()),
            ("start", start.to_string()),
            ("rows", rows.to_string()),
        ];
        let resp = self
            .authorize(self.client.get(&url).query(&params))
            .send()
            .await?;
        let resp = check_status(resp).await?;
        let body: SelectResponse = resp.json().await?;
        Ok(body.response)
    }

    async fn fetch_window(&self, query: &str, start: u64) -> Result<Vec<Record>, SyncError> {
        let body = self.select(query, start, self.options.window_size).await?;
        debug!(start, rows = body.docs.len(), "fetched window");
        body.docs
            .into_iter()
            .map(|doc| Record::from_doc(doc).map_err(SyncError::from))
            .collect()
    }

    async fn update_one(&self, payload: &UpdatePayload) -> Result<(), SyncError> {
        let url = format!("{}/update", self.base_url);
        let body = json!({
            "add": {
                "doc": update_document(payload),
                "commitWithin": self.options.commit_within_ms,
            }
        });
        let resp = self
            .authorize(self.client.post(&url).json(&body))
            .send()
            .await?;
        check_status(resp).await?;
        debug!(id = %payload.id, "record updated");
        Ok(())
    }
}

#[async_trait]
impl RecordStore for SolrClient {
    async fn count(&self, query: &str) -> Result<u64, SyncError> {
        Ok(self.select(query, 0, 0).await?.num_found)
    }

    async fn fetch_all(&self, query: &str) -> Result<Vec<Record>, SyncError> {
        let total = self.count(query).await?;
        let window = self.options.window_size.max(1);
        let starts: Vec<u64> = (0..total).step_by(window).collect();
        info!(total, windows = starts.len(), query, "fetching records");

        let mut windows = stream::iter(starts)
            .map(|start| self.fetch_window(query, start))
            .buffer_unordered(self.options.fetch_concurrency.max(1));

        let mut records = Vec::with_capacity(total as usize);
        let mut seen = HashSet::with_capacity(total as usize);
        let mut duplicates = 0usize;
        while let Some(batch) = windows.try_next().await? {
            for record in batch {
                if seen.insert(record.id.clone()) {
                    records.push(record);
                } else {
                    duplicates += 1;
                }
            }
        }

        if duplicates > 0 {
            warn!(duplicates, "record store returned duplicate ids across windows");
        }
        if records.len() as u64 != total {
            warn!(expected = total, fetched = records.len(), "record count changed during fetch");
        }
        info!(count = records.len(), "fetched records");
        Ok(records)
    }

    async fn update_batch(&self, payloads: &[UpdatePayload]) -> Result<(), SyncError> {
        // Boxed up front: a lazily mapped stream of borrowing futures is not
        // `Send` under `async_trait`.
        let writes: Vec<_> = payloads.iter().map(|p| self.update_one(p).boxed()).collect();
        let results: Vec<Result<(), SyncError>> = stream::iter(writes)
            .buffer_unordered(self.options.write_concurrency.max(1))
            .collect()
            .await;

        let failures = results.iter().filter(|r| r.is_err()).count();
        if failures > 0 {
            warn!(failures, total = payloads.len(), "record updates failed");
        }
        results.into_iter().collect::<Result<Vec<()>, _>>()?;
        info!(count = payloads.len(), "batch written");
        Ok(())
    }
}

/// Solr atomic-update document for one payload.
///
/// `fair_score` is only set when the payload carries a score.
pub fn update_document(payload: &UpdatePayload) -> Value {
    let mut doc = Map::new();
    doc.insert(fields::ID.to_string(), Value::String(payload.id.clone()));
    doc.insert(
        fields::INEO_RECORD.to_string(),
        json!({ "set": payload.is_member }),
    );
    if let Some(score) = payload.assessment_score {
        doc.insert(fields::FAIR_SCORE.to_string(), json!({ "set": score }));
    }
    Value::Object(doc)
}
