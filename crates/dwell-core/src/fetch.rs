//! Paginated collection fetches against the Jira REST API.
//!
//! The HTTP stack itself lives behind [`Transport`]: one `GET(path)` returning
//! a status code and a body, with authentication already attached. This
//! module turns a collection endpoint into a sequence of page requests and
//! accumulates the entries of each page until the server signals the end.
//!
//! # Termination
//!
//! A page is the last one when its `isLast` flag is `true`, or, when the flag
//! is absent, when `startAt + maxResults >= total`. No request is retried:
//! a failed page aborts the whole collection.

use std::sync::atomic::{AtomicUsize, Ordering};

use serde_json::{Map, Value as JsonValue};
use tracing::debug;

use crate::model::{BoardId, IssueId, SprintId};

/// Prefix for board, sprint, and sprint-issue endpoints.
pub const AGILE_API: &str = "/rest/agile/1.0";
/// Prefix for search and issue changelog endpoints.
pub const PLATFORM_API: &str = "/rest/api/3";

/// Results-array key used by most collection endpoints.
pub const VALUES_KEY: &str = "values";
/// Results-array key used by issue listings.
pub const ISSUES_KEY: &str = "issues";

const AUTH_FAILURE_MARKER: &str = "Client must be authenticated";

// ---------------------------------------------------------------------------
// Transport seam
// ---------------------------------------------------------------------------

/// A raw HTTP response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    pub status: u16,
    pub body: String,
}

impl Response {
    #[must_use]
    pub const fn is_success(&self) -> bool {
        self.status >= 200 && self.status < 300
    }
}

/// The request could not be completed at all (DNS, TLS, socket, ...).
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{message}")]
pub struct TransportError {
    pub message: String,
}

impl TransportError {
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Issues authenticated `GET` requests relative to the API host.
///
/// Implementations must be shareable across the fetch worker threads.
pub trait Transport: Send + Sync {
    /// Perform one `GET` request.
    ///
    /// Non-2xx statuses are returned as a [`Response`], not as an error.
    ///
    /// # Errors
    ///
    /// [`TransportError`] when no response was received.
    fn get(&self, path: &str) -> Result<Response, TransportError>;
}

impl<T: Transport + ?Sized> Transport for &T {
    fn get(&self, path: &str) -> Result<Response, TransportError> {
        (**self).get(path)
    }
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Errors from fetching one collection.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FetchError {
    /// The server answered with a non-success status.
    #[error("request to {path} failed with HTTP {status}: {body}")]
    RequestFailed {
        path: String,
        status: u16,
        body: String,
    },

    /// No response was received.
    #[error("request to {path} failed: {source}")]
    Transport {
        path: String,
        #[source]
        source: TransportError,
    },

    /// The body is not the JSON document the endpoint contract promises.
    #[error("unexpected response shape from {path}: {detail}")]
    UnexpectedResponseShape { path: String, detail: String },
}

impl FetchError {
    /// True when Jira rejected the credentials (or their permissions).
    #[must_use]
    pub fn is_authentication_failure(&self) -> bool {
        matches!(self, Self::RequestFailed { body, .. } if body.contains(AUTH_FAILURE_MARKER))
    }

    fn shape(path: &str, detail: impl Into<String>) -> Self {
        Self::UnexpectedResponseShape {
            path: path.to_string(),
            detail: detail.into(),
        }
    }
}

// ---------------------------------------------------------------------------
// Endpoints
// ---------------------------------------------------------------------------

#[must_use]
pub fn boards_path() -> String {
    format!("{AGILE_API}/board")
}

#[must_use]
pub fn board_sprints_path(board_id: BoardId) -> String {
    format!("{AGILE_API}/board/{board_id}/sprint")
}

#[must_use]
pub fn sprint_issues_path(sprint_id: SprintId) -> String {
    format!("{AGILE_API}/sprint/{sprint_id}/issue?expand=changelog")
}

#[must_use]
pub fn issue_changelog_path(issue_id: IssueId) -> String {
    format!("{PLATFORM_API}/issue/{issue_id}/changelog")
}

#[must_use]
pub fn search_path(jql: &str) -> String {
    format!(
        "{PLATFORM_API}/search?expand=changelog&jql={}",
        urlencoding::encode(jql)
    )
}

fn page_path(path: &str, start_at: usize) -> String {
    let separator = if path.contains('?') { '&' } else { '?' };
    format!("{path}{separator}startAt={start_at}")
}

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

/// Paginating JSON client over a [`Transport`].
#[derive(Debug)]
pub struct JiraClient<T> {
    transport: T,
    requests: AtomicUsize,
}

impl<T: Transport> JiraClient<T> {
    #[must_use]
    pub const fn new(transport: T) -> Self {
        Self {
            transport,
            requests: AtomicUsize::new(0),
        }
    }

    /// Number of HTTP requests issued so far.
    #[must_use]
    pub fn request_count(&self) -> usize {
        self.requests.load(Ordering::Relaxed)
    }

    /// Fetch a single JSON document.
    ///
    /// # Errors
    ///
    /// [`FetchError::RequestFailed`] on a non-2xx status,
    /// [`FetchError::Transport`] when no response arrived, and
    /// [`FetchError::UnexpectedResponseShape`] when the body is not JSON.
    pub fn get_json(&self, path: &str) -> Result<JsonValue, FetchError> {
        self.requests.fetch_add(1, Ordering::Relaxed);
        debug!(path, "requesting endpoint");

        let response = self
            .transport
            .get(path)
            .map_err(|source| FetchError::Transport {
                path: path.to_string(),
                source,
            })?;

        if !response.is_success() {
            return Err(FetchError::RequestFailed {
                path: path.to_string(),
                status: response.status,
                body: response.body,
            });
        }

        serde_json::from_str(&response.body)
            .map_err(|err| FetchError::shape(path, format!("body is not valid JSON: {err}")))
    }

    /// Fetch every entry of a paginated collection.
    ///
    /// Pages are requested with `startAt` set to the number of entries
    /// accumulated so far. `values_key` names the results array in each page.
    ///
    /// # Errors
    ///
    /// Any [`FetchError`] from a page aborts the whole collection. A page
    /// without the results array, without a usable termination signal, or
    /// empty while the collection is not finished is
    /// [`FetchError::UnexpectedResponseShape`].
    pub fn fetch_all(&self, path: &str, values_key: &str) -> Result<Vec<JsonValue>, FetchError> {
        let mut entries = Vec::new();

        loop {
            let request_path = page_path(path, entries.len());
            let JsonValue::Object(mut page) = self.get_json(&request_path)? else {
                return Err(FetchError::shape(&request_path, "page is not a JSON object"));
            };

            let Some(JsonValue::Array(values)) = page.remove(values_key) else {
                return Err(FetchError::shape(
                    &request_path,
                    format!("missing '{values_key}' array"),
                ));
            };

            let received = values.len();
            entries.extend(values);

            let is_last =
                is_last_page(&page).map_err(|detail| FetchError::shape(&request_path, detail))?;
            if is_last {
                break;
            }

            if received == 0 {
                return Err(FetchError::shape(
                    &request_path,
                    "empty page before end of collection",
                ));
            }
        }

        Ok(entries)
    }
}

fn is_last_page(page: &Map<String, JsonValue>) -> Result<bool, String> {
    if let Some(flag) = page.get("isLast") {
        return flag
            .as_bool()
            .ok_or_else(|| format!("'isLast' is not a boolean: {flag}"));
    }

    let field = |name: &str| {
        page.get(name)
            .and_then(JsonValue::as_u64)
            .ok_or_else(|| format!("missing 'isLast' and integer '{name}'"))
    };

    let start_at = field("startAt")?;
    let max_results = field("maxResults")?;
    let total = field("total")?;

    Ok(start_at.saturating_add(max_results) >= total)
}
