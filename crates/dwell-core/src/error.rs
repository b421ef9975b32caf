use std::fmt;

use crate::catalog::CatalogError;
use crate::config::ConfigError;
use crate::fetch::FetchError;
use crate::model::ModelError;
use crate::policy::{ConfigurationError, PolicyViolation};
use crate::reducer::MalformedChangelog;

/// Machine-readable error codes for scripts and operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    InvalidPolicyTables,
    ConfigParseError,
    InvalidConfigValue,
    MissingCredentials,
    RequestFailed,
    AuthenticationFailed,
    TransportFailed,
    UnexpectedResponseShape,
    DecodeFailed,
    UnknownBoardType,
    MalformedChangelog,
    DuplicateIssue,
    PolicyViolation,
}

impl ErrorCode {
    /// Stable code identifier (`E####`) for machine parsing.
    #[must_use]
    pub const fn code(self) -> &'static str {
        match self {
            Self::InvalidPolicyTables => "E1001",
            Self::ConfigParseError => "E1002",
            Self::InvalidConfigValue => "E1003",
            Self::MissingCredentials => "E1004",
            Self::RequestFailed => "E2001",
            Self::AuthenticationFailed => "E2002",
            Self::TransportFailed => "E2003",
            Self::UnexpectedResponseShape => "E2004",
            Self::DecodeFailed => "E3001",
            Self::UnknownBoardType => "E3002",
            Self::MalformedChangelog => "E3003",
            Self::DuplicateIssue => "E3004",
            Self::PolicyViolation => "E4001",
        }
    }

    /// Short human-facing summary for logs and terminal output.
    #[must_use]
    pub const fn message(self) -> &'static str {
        match self {
            Self::InvalidPolicyTables => "Policy tables overlap or are incomplete",
            Self::ConfigParseError => "Config file parse error",
            Self::InvalidConfigValue => "Invalid config value",
            Self::MissingCredentials => "Jira credentials not found",
            Self::RequestFailed => "Jira request failed",
            Self::AuthenticationFailed => "Jira rejected the credentials",
            Self::TransportFailed => "Could not reach Jira",
            Self::UnexpectedResponseShape => "Unexpected Jira response shape",
            Self::DecodeFailed => "Jira entity could not be decoded",
            Self::UnknownBoardType => "Unknown board type",
            Self::MalformedChangelog => "Malformed issue changelog",
            Self::DuplicateIssue => "Duplicate issue in one result set",
            Self::PolicyViolation => "Unclassified issue type or status",
        }
    }

    /// Optional remediation hint that can be surfaced to operators.
    #[must_use]
    pub const fn hint(self) -> Option<&'static str> {
        match self {
            Self::InvalidPolicyTables => Some(
                "Make each [policy] pair disjoint and give both status pairs the same universe.",
            ),
            Self::ConfigParseError => Some("Fix syntax in dwell.toml and retry."),
            Self::InvalidConfigValue => Some("Check the value against `dwell --help`."),
            Self::MissingCredentials => Some(
                "Write a base64 `email:api-token` to .jira-base64-auth or set JIRA_BASE64_AUTH.",
            ),
            Self::AuthenticationFailed => Some(
                "Regenerate the API token, then base64-encode `email:token` into .jira-base64-auth.",
            ),
            Self::TransportFailed => Some("Check the base URL and network access, then retry."),
            Self::PolicyViolation => {
                Some("Add the listed values to the matching lists in the [policy] section.")
            }
            Self::RequestFailed
            | Self::UnexpectedResponseShape
            | Self::DecodeFailed
            | Self::UnknownBoardType
            | Self::MalformedChangelog
            | Self::DuplicateIssue => None,
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code())
    }
}

/// Any failure that aborts a run.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Configuration(#[from] ConfigurationError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error(transparent)]
    Model(#[from] ModelError),

    #[error(transparent)]
    Catalog(CatalogError),

    #[error(transparent)]
    MalformedChangelog(#[from] MalformedChangelog),

    #[error(transparent)]
    PolicyViolation(#[from] PolicyViolation),
}

impl From<CatalogError> for Error {
    fn from(err: CatalogError) -> Self {
        match err {
            CatalogError::Fetch(err) => Self::Fetch(err),
            CatalogError::Model(err) => Self::Model(err),
            err @ CatalogError::DuplicateIssue { .. } => Self::Catalog(err),
        }
    }
}

impl Error {
    #[must_use]
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::Configuration(_) => ErrorCode::InvalidPolicyTables,
            Self::Config(ConfigError::Parse { .. } | ConfigError::Read { .. }) => {
                ErrorCode::ConfigParseError
            }
            Self::Config(ConfigError::Invalid { .. }) => ErrorCode::InvalidConfigValue,
            Self::Fetch(err) => match err {
                FetchError::RequestFailed { .. } if err.is_authentication_failure() => {
                    ErrorCode::AuthenticationFailed
                }
                FetchError::RequestFailed { .. } => ErrorCode::RequestFailed,
                FetchError::Transport { .. } => ErrorCode::TransportFailed,
                FetchError::UnexpectedResponseShape { .. } => ErrorCode::UnexpectedResponseShape,
            },
            Self::Model(ModelError::Decode { .. }) => ErrorCode::DecodeFailed,
            Self::Model(ModelError::UnknownBoardType { .. }) => ErrorCode::UnknownBoardType,
            Self::Catalog(_) => ErrorCode::DuplicateIssue,
            Self::MalformedChangelog(_) => ErrorCode::MalformedChangelog,
            Self::PolicyViolation(_) => ErrorCode::PolicyViolation,
        }
    }
}
