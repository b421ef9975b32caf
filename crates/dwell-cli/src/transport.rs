//! Blocking HTTP transport and credential loading.

use std::fmt;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::time::Duration;

use dwell_core::fetch::{Response, Transport, TransportError};

/// Default location of the pre-encoded basic-auth token.
pub const DEFAULT_AUTH_FILE: &str = ".jira-base64-auth";
/// Environment fallback for the token.
pub const AUTH_ENV: &str = "JIRA_BASE64_AUTH";
/// Environment fallback for the Jira site URL.
pub const BASE_URL_ENV: &str = "JIRA_BASE_URL";

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const READ_TIMEOUT: Duration = Duration::from_secs(60);

/// Sends authenticated GETs to one Jira site.
pub struct UreqTransport {
    agent: ureq::Agent,
    base_url: String,
    authorization: String,
}

impl UreqTransport {
    pub fn new(base_url: &str, token: &str) -> Self {
        let agent = ureq::AgentBuilder::new()
            .timeout_connect(CONNECT_TIMEOUT)
            .timeout_read(READ_TIMEOUT)
            .user_agent(concat!("dwell/", env!("CARGO_PKG_VERSION")))
            .build();

        Self {
            agent,
            base_url: base_url.trim_end_matches('/').to_string(),
            authorization: format!("Basic {token}"),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }
}

impl fmt::Debug for UreqTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UreqTransport")
            .field("base_url", &self.base_url)
            .finish_non_exhaustive()
    }
}

impl Transport for UreqTransport {
    fn get(&self, path: &str) -> Result<Response, TransportError> {
        let result = self
            .agent
            .get(&self.url(path))
            .set("Authorization", &self.authorization)
            .set("Content-Type", "application/json")
            .call();

        // Non-2xx statuses still carry a body worth surfacing.
        let response = match result {
            Ok(response) | Err(ureq::Error::Status(_, response)) => response,
            Err(ureq::Error::Transport(err)) => return Err(TransportError::new(err.to_string())),
        };

        let status = response.status();
        let body = read_body(response.into_reader())?;
        Ok(Response { status, body })
    }
}

/// Read a whole response body. Unlike `into_string`, there is no size cap.
fn read_body(mut reader: impl Read) -> Result<String, TransportError> {
    let mut body = String::new();
    reader
        .read_to_string(&mut body)
        .map_err(|err| TransportError::new(format!("failed to read body: {err}")))?;
    Ok(body)
}

/// No token in the auth file or the environment.
#[derive(Debug)]
pub struct MissingCredentials {
    pub auth_file: PathBuf,
}

impl fmt::Display for MissingCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "no Jira token found in {} or ${AUTH_ENV}",
            self.auth_file.display()
        )
    }
}

impl std::error::Error for MissingCredentials {}

/// Read the token from `auth_file`, falling back to `$JIRA_BASE64_AUTH`.
pub fn load_token(auth_file: &Path) -> Result<String, MissingCredentials> {
    let from_file = std::fs::read_to_string(auth_file).ok();
    let from_env = std::env::var(AUTH_ENV).ok();
    pick_token(from_file, from_env).ok_or_else(|| MissingCredentials {
        auth_file: auth_file.to_path_buf(),
    })
}

fn pick_token(from_file: Option<String>, from_env: Option<String>) -> Option<String> {
    [from_file, from_env]
        .into_iter()
        .flatten()
        .map(|raw| raw.trim().to_string())
        .find(|token| !token.is_empty())
}
