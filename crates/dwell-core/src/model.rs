//! Boards, sprints, issues, and changelog entries as fetched from Jira.
//!
//! Entities are decoded once from the paginated JSON payloads and never
//! mutated afterwards, except that an issue's changelog may be replaced by a
//! complete re-fetch before the issue leaves its fetch job.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::de::{self, DeserializeOwned, Deserializer};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

pub type BoardId = u64;
pub type SprintId = u64;
pub type IssueId = u64;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Errors from decoding a fetched entity.
#[derive(Debug, thiserror::Error)]
pub enum ModelError {
    #[error("failed to decode {entity}: {source}")]
    Decode {
        entity: &'static str,
        #[source]
        source: serde_json::Error,
    },

    #[error("unknown board type '{raw}': expected one of scrum, kanban, simple")]
    UnknownBoardType { raw: String },
}

fn decode<T: DeserializeOwned>(entity: &'static str, value: JsonValue) -> Result<T, ModelError> {
    serde_json::from_value(value).map_err(|source| ModelError::Decode { entity, source })
}

// ---------------------------------------------------------------------------
// Timestamps and ids
// ---------------------------------------------------------------------------

/// Parse a Jira timestamp.
///
/// Agile endpoints emit RFC 3339 (`2024-03-01T09:00:00.000Z`); platform
/// endpoints emit a colon-less offset (`2024-03-01T09:00:00.000-0500`).
///
/// # Errors
///
/// [`chrono::ParseError`] when neither format matches.
pub fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>, chrono::ParseError> {
    DateTime::parse_from_rfc3339(raw)
        .or_else(|_| DateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f%z"))
        .map(|ts| ts.with_timezone(&Utc))
}

fn de_timestamp<'de, D: Deserializer<'de>>(deserializer: D) -> Result<DateTime<Utc>, D::Error> {
    let raw = String::deserialize(deserializer)?;
    parse_timestamp(&raw).map_err(|err| de::Error::custom(format!("invalid timestamp '{raw}': {err}")))
}

fn de_opt_timestamp<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> Result<Option<DateTime<Utc>>, D::Error> {
    let raw = Option::<String>::deserialize(deserializer)?;
    raw.map(|raw| {
        parse_timestamp(&raw)
            .map_err(|err| de::Error::custom(format!("invalid timestamp '{raw}': {err}")))
    })
    .transpose()
}

/// Jira serializes issue ids as strings and board/sprint ids as numbers.
fn de_id<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u64, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum RawId {
        Number(u64),
        Text(String),
    }

    match RawId::deserialize(deserializer)? {
        RawId::Number(id) => Ok(id),
        RawId::Text(raw) => raw
            .parse()
            .map_err(|_| de::Error::custom(format!("invalid id '{raw}'"))),
    }
}

// ---------------------------------------------------------------------------
// Board
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum BoardKind {
    Scrum,
    Kanban,
    Simple,
}

impl BoardKind {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Scrum => "scrum",
            Self::Kanban => "kanban",
            Self::Simple => "simple",
        }
    }

    /// Scrum boards own sprints; kanban and simple boards are searched by
    /// project instead.
    #[must_use]
    pub const fn has_sprints(self) -> bool {
        matches!(self, Self::Scrum)
    }
}

impl fmt::Display for BoardKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BoardKind {
    type Err = ModelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "scrum" => Ok(Self::Scrum),
            "kanban" => Ok(Self::Kanban),
            "simple" => Ok(Self::Simple),
            _ => Err(ModelError::UnknownBoardType { raw: s.to_string() }),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Board {
    pub id: BoardId,
    pub kind: BoardKind,
    pub project_key: Option<String>,
    pub project_name: Option<String>,
}

#[derive(Deserialize)]
struct RawBoard {
    id: BoardId,
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    location: Option<RawLocation>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawLocation {
    #[serde(default)]
    project_key: Option<String>,
    #[serde(default)]
    project_name: Option<String>,
}

impl Board {
    /// Decode one entry of `GET /board`.
    ///
    /// # Errors
    ///
    /// [`ModelError::Decode`] for a malformed payload and
    /// [`ModelError::UnknownBoardType`] for an unsupported board type.
    pub fn from_json(value: JsonValue) -> Result<Self, ModelError> {
        let raw: RawBoard = decode("board", value)?;
        let location = raw.location.unwrap_or(RawLocation {
            project_key: None,
            project_name: None,
        });

        Ok(Self {
            id: raw.id,
            kind: raw.kind.parse()?,
            project_key: location.project_key,
            project_name: location.project_name,
        })
    }
}

// ---------------------------------------------------------------------------
// Sprint
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SprintState {
    Active,
    Closed,
    Future,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Sprint {
    pub id: SprintId,
    pub origin_board_id: BoardId,
    pub state: SprintState,
    pub name: String,
    #[serde(default, deserialize_with = "de_opt_timestamp")]
    pub created_date: Option<DateTime<Utc>>,
    #[serde(default, deserialize_with = "de_opt_timestamp")]
    pub start_date: Option<DateTime<Utc>>,
    #[serde(default, deserialize_with = "de_opt_timestamp")]
    pub end_date: Option<DateTime<Utc>>,
    #[serde(default, deserialize_with = "de_opt_timestamp")]
    pub complete_date: Option<DateTime<Utc>>,
}

impl Sprint {
    /// Decode one entry of `GET /board/{id}/sprint`.
    ///
    /// # Errors
    ///
    /// [`ModelError::Decode`] for a malformed payload.
    pub fn from_json(value: JsonValue) -> Result<Self, ModelError> {
        decode("sprint", value)
    }
}

// ---------------------------------------------------------------------------
// Issue and changelog
// ---------------------------------------------------------------------------

/// One field change inside a changelog entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeItem {
    pub field: String,
    #[serde(default)]
    pub fieldtype: String,
    #[serde(rename = "fieldId", default)]
    pub field_id: Option<String>,
    #[serde(rename = "fromString", default)]
    pub from_display: Option<String>,
    #[serde(rename = "toString", default)]
    pub to_display: Option<String>,
}

impl ChangeItem {
    /// True for a change of the workflow status field itself, as opposed to
    /// a custom field that happens to be labelled "status".
    #[must_use]
    pub fn is_status_change(&self) -> bool {
        self.field == "status"
            && self.fieldtype == "jira"
            && self.field_id.as_deref().is_none_or(|id| id == "status")
    }
}

/// A changelog record: every field changed by one edit, at one timestamp.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangelogEntry {
    #[serde(deserialize_with = "de_timestamp")]
    pub created: DateTime<Utc>,
    #[serde(default)]
    pub items: Vec<ChangeItem>,
}

impl ChangelogEntry {
    /// Decode one entry of `GET /issue/{id}/changelog`.
    ///
    /// # Errors
    ///
    /// [`ModelError::Decode`] for a malformed payload.
    pub fn from_json(value: JsonValue) -> Result<Self, ModelError> {
        decode("changelog entry", value)
    }
}

/// A workflow status transition extracted from a changelog entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StatusChangeEvent {
    pub at: DateTime<Utc>,
    pub from_status: String,
    pub to_status: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Issue {
    pub id: IssueId,
    pub key: String,
    pub issue_type: String,
    pub status: String,
    pub created_at: DateTime<Utc>,
    pub epic_key: Option<String>,
    pub changelog: Vec<ChangelogEntry>,
    /// The embedded changelog is a truncated page of the full history.
    pub changelog_truncated: bool,
}

#[derive(Deserialize)]
struct RawIssue {
    #[serde(deserialize_with = "de_id")]
    id: IssueId,
    key: String,
    fields: RawFields,
    #[serde(default)]
    changelog: Option<RawChangelog>,
}

#[derive(Deserialize)]
struct RawFields {
    issuetype: RawNamed,
    status: RawNamed,
    #[serde(deserialize_with = "de_timestamp")]
    created: DateTime<Utc>,
    #[serde(default)]
    epic: Option<RawEpic>,
}

#[derive(Deserialize)]
struct RawNamed {
    name: String,
}

#[derive(Deserialize)]
struct RawEpic {
    key: String,
}

#[derive(Deserialize)]
struct RawChangelog {
    #[serde(default)]
    total: Option<usize>,
    #[serde(default)]
    histories: Vec<ChangelogEntry>,
}

impl Issue {
    /// Decode one entry of a sprint-issue or search response.
    ///
    /// An issue without an embedded changelog, or whose embedded page holds
    /// fewer histories than its reported total, is marked truncated.
    ///
    /// # Errors
    ///
    /// [`ModelError::Decode`] for a malformed payload.
    pub fn from_json(value: JsonValue) -> Result<Self, ModelError> {
        let raw: RawIssue = decode("issue", value)?;

        let (changelog, changelog_truncated) = match raw.changelog {
            Some(changelog) => {
                let truncated = changelog
                    .total
                    .is_some_and(|total| changelog.histories.len() < total);
                (changelog.histories, truncated)
            }
            None => (Vec::new(), true),
        };

        Ok(Self {
            id: raw.id,
            key: raw.key,
            issue_type: raw.fields.issuetype.name,
            status: raw.fields.status.name,
            created_at: raw.fields.created,
            epic_key: raw.fields.epic.map(|epic| epic.key),
            changelog,
            changelog_truncated,
        })
    }

    /// Replace a truncated changelog with the complete history.
    #[must_use]
    pub fn with_full_changelog(self, changelog: Vec<ChangelogEntry>) -> Self {
        Self {
            changelog,
            changelog_truncated: false,
            ..self
        }
    }
}
