//! HTTP client for the SiYuan kernel API.
//!
//! Every kernel endpoint answers with the envelope `{code, msg, data}`; a
//! non-zero `code` is an application-level failure even when the HTTP status
//! is 200. Binary endpoints (`/api/file/getFile`) skip the envelope unless
//! they fail.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use bytes::Bytes;
use chrono::{DateTime, Local};
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::debug;

use crate::block::{sort_blocks, Block};
use crate::error::{NotesError, Result};

/// Sentinel for "block count not fetched yet".
const COUNT_UNKNOWN: u64 = u64::MAX;

/// Response envelope used by every JSON endpoint of the kernel.
#[derive(Debug, Deserialize)]
struct ApiEnvelope<T> {
    code: i64,
    #[serde(default)]
    msg: String,
    data: Option<T>,
}

/// An entry returned by `/api/file/readDir`.
#[derive(Debug, Clone, Deserialize)]
pub struct DirEntry {
    /// File or directory name
    pub name: String,

    /// Whether the entry is a directory
    #[serde(rename = "isDir", default)]
    pub is_dir: bool,
}

/// Stateless client for the SiYuan kernel HTTP API.
///
/// Shared behind an `Arc`; the pooled connections are released when the
/// last handle drops, on every exit path.
#[derive(Debug)]
pub struct NotesClient {
    http: reqwest::Client,
    base_url: String,
    /// Total block count, used as the `LIMIT` of unbounded SQL queries.
    block_count: AtomicU64,
}

impl NotesClient {
    /// Create a client for the kernel at `base_url`.
    ///
    /// When `token` is set it is sent as `Authorization: Token <token>` on
    /// every request.
    pub fn new(base_url: impl Into<String>, token: Option<&str>) -> Result<Self> {
        let mut headers = HeaderMap::new();
        if let Some(token) = token {
            let value = HeaderValue::from_str(&format!("Token {token}"))
                .map_err(|_| NotesError::InvalidResponse("siyuan token is not a valid header value".into()))?;
            headers.insert(AUTHORIZATION, value);
        }

        let http = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(Duration::from_secs(30))
            .build()?;

        Ok(Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            block_count: AtomicU64::new(COUNT_UNKNOWN),
        })
    }

    /// Base URL this client talks to.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// POST a JSON body and unwrap the kernel envelope.
    async fn post_envelope<T: DeserializeOwned>(&self, path: &str, body: Value) -> Result<Option<T>> {
        let response = self
            .http
            .post(format!("{}{}", self.base_url, path))
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(NotesError::api(
                format!("request to {path} failed"),
                status.as_u16(),
            ));
        }

        let envelope: ApiEnvelope<T> = response.json().await?;
        if envelope.code != 0 {
            return Err(NotesError::api(envelope.msg, status.as_u16()));
        }

        Ok(envelope.data)
    }

    /// Execute a raw SQL query against the kernel database.
    async fn raw_query(&self, stmt: &str) -> Result<Vec<Value>> {
        debug!(stmt, "executing kernel SQL query");
        let rows: Option<Vec<Value>> = self
            .post_envelope("/api/query/sql", json!({ "stmt": stmt }))
            .await?;
        Ok(rows.unwrap_or_default())
    }

    /// Number of blocks in the kernel database.
    ///
    /// Also refreshes the cached count used as the `LIMIT` of unbounded
    /// queries.
    pub async fn count_blocks(&self) -> Result<u64> {
        let rows = self.raw_query("SELECT COUNT(*) FROM blocks").await?;
        let count = rows
            .first()
            .and_then(|row| row.get("COUNT(*)"))
            .and_then(Value::as_u64)
            .ok_or_else(|| {
                NotesError::InvalidResponse("COUNT(*) missing from block count response".into())
            })?;

        self.block_count.store(count, Ordering::Relaxed);
        Ok(count)
    }

    /// Cached block count, fetching it when unknown.
    async fn block_limit(&self) -> Result<u64> {
        match self.block_count.load(Ordering::Relaxed) {
            COUNT_UNKNOWN => self.count_blocks().await,
            count => Ok(count),
        }
    }

    /// All blocks updated strictly after `since_epoch_secs`.
    ///
    /// The kernel caps SQL results at a small default page, so the query
    /// carries an explicit `LIMIT` equal to the latest known block count.
    /// `since_epoch_secs == 0` returns every block.
    pub async fn blocks_updated_after(&self, since_epoch_secs: u64) -> Result<Vec<Block>> {
        let limit = self.block_limit().await?;
        let updated_after = format_siyuan_timestamp(since_epoch_secs);
        let stmt =
            format!("SELECT * FROM blocks WHERE updated > '{updated_after}' LIMIT {limit}");

        let rows = self.raw_query(&stmt).await?;
        rows.into_iter()
            .map(|row| {
                serde_json::from_value(row)
                    .map_err(|e| NotesError::InvalidResponse(format!("malformed block row: {e}")))
            })
            .collect()
    }

    /// Look up a single block by id.
    pub async fn block(&self, block_id: &str) -> Result<Option<Block>> {
        let stmt = format!("SELECT * FROM blocks WHERE id='{block_id}'");
        let mut rows = self.raw_query(&stmt).await?;

        if rows.is_empty() {
            return Ok(None);
        }
        serde_json::from_value(rows.remove(0))
            .map(Some)
            .map_err(|e| NotesError::InvalidResponse(format!("malformed block row: {e}")))
    }

    /// All blocks of a document, in reading order.
    pub async fn document_blocks(&self, document_id: &str) -> Result<Vec<Block>> {
        let limit = self.block_limit().await?;
        let stmt = format!("SELECT * FROM blocks WHERE root_id = '{document_id}' LIMIT {limit}");

        let rows = self.raw_query(&stmt).await?;
        let blocks = rows
            .into_iter()
            .map(|row| {
                serde_json::from_value(row)
                    .map_err(|e| NotesError::InvalidResponse(format!("malformed block row: {e}")))
            })
            .collect::<Result<Vec<Block>>>()?;

        Ok(sort_blocks(blocks))
    }

    /// Render a document to standard markdown.
    pub async fn document_markdown(&self, document_id: &str) -> Result<String> {
        self.post_envelope("/api/lute/copyStdMarkdown", json!({ "id": document_id }))
            .await?
            .ok_or_else(|| NotesError::InvalidResponse("markdown export returned no data".into()))
    }

    /// Plain text of a document: block contents joined in reading order,
    /// zero-width spaces stripped, blank lines dropped and repeated lines
    /// kept only at their first occurrence.
    pub async fn document_plaintext(&self, document_id: &str) -> Result<String> {
        let blocks = self.document_blocks(document_id).await?;

        let joined: String = blocks
            .iter()
            .map(|b| b.content.as_str())
            .collect::<Vec<_>>()
            .join("\n")
            .replace('\u{200b}', "");

        let mut seen = std::collections::HashSet::new();
        let lines: Vec<&str> = joined
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty() && seen.insert(line.to_string()))
            .collect();

        Ok(lines.join("\n"))
    }

    /// List the entries of a workspace directory.
    pub async fn list_assets(&self, path: &str) -> Result<Vec<DirEntry>> {
        let entries: Option<Vec<DirEntry>> = self
            .post_envelope("/api/file/readDir", json!({ "path": path }))
            .await?;
        Ok(entries.unwrap_or_default())
    }

    /// Download a workspace file.
    ///
    /// On success the kernel streams the raw bytes; on failure it falls back
    /// to the JSON envelope, which is surfaced as an API error.
    pub async fn asset(&self, path: &str) -> Result<Bytes> {
        let response = self
            .http
            .post(format!("{}/api/file/getFile", self.base_url))
            .json(&json!({ "path": path }))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(NotesError::api(
                format!("failed to fetch file '{path}'"),
                status.as_u16(),
            ));
        }

        let is_json = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|v| v.starts_with("application/json"));

        let body = response.bytes().await?;
        if is_json {
            if let Ok(envelope) = serde_json::from_slice::<ApiEnvelope<Value>>(&body) {
                if envelope.code != 0 {
                    return Err(NotesError::api(envelope.msg, 404));
                }
            }
        }

        Ok(body)
    }

    /// Create a document from markdown under `path` in `notebook`.
    ///
    /// Returns the new document id when the kernel reports one.
    pub async fn create_document(
        &self,
        notebook: &str,
        path: &str,
        markdown: &str,
    ) -> Result<Option<String>> {
        self.post_envelope(
            "/api/filetree/createDoc",
            json!({ "notebook": notebook, "path": path, "markdown": markdown }),
        )
        .await
    }

    /// Insert a markdown block after `previous_id` or as a child of `parent_id`.
    pub async fn insert_block(
        &self,
        markdown: &str,
        previous_id: Option<&str>,
        parent_id: Option<&str>,
    ) -> Result<Value> {
        let mut body = json!({ "dataType": "markdown", "data": markdown });
        if let Some(id) = previous_id {
            body["previousID"] = json!(id);
        }
        if let Some(id) = parent_id {
            body["parentID"] = json!(id);
        }

        let data: Option<Value> = self.post_envelope("/api/block/insertBlock", body).await?;
        Ok(data.unwrap_or(Value::Null))
    }

    /// Set custom attributes on a block.
    pub async fn set_block_attrs(
        &self,
        block_id: &str,
        attrs: &HashMap<String, String>,
    ) -> Result<()> {
        self.post_envelope::<Value>(
            "/api/attr/setBlockAttrs",
            json!({ "id": block_id, "attrs": attrs }),
        )
        .await?;
        Ok(())
    }
}

/// Format an epoch-seconds instant the way the kernel stores timestamps:
/// `YYYYMMDDHHMMSS` in local time.
pub fn format_siyuan_timestamp(epoch_secs: u64) -> String {
    let time = std::time::UNIX_EPOCH + Duration::from_secs(epoch_secs);
    DateTime::<Local>::from(time).format("%Y%m%d%H%M%S").to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_base_url_trailing_slash_trimmed() {
        let client = NotesClient::new("http://localhost:6806/", None).unwrap();
        assert_eq!(client.base_url(), "http://localhost:6806");
    }

    #[test]
    fn test_timestamp_format_shape() {
        let formatted = format_siyuan_timestamp(1_700_000_000);
        assert_eq!(formatted.len(), 14);
        assert!(formatted.chars().all(|c| c.is_ascii_digit()));
    }

    #[test]
    fn test_timestamp_is_monotonic() {
        let earlier = format_siyuan_timestamp(1_700_000_000);
        let later = format_siyuan_timestamp(1_700_003_600);
        assert!(later > earlier);
    }
}
