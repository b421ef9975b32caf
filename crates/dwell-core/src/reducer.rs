//! Reduce an issue's status changelog to time spent per status.
//!
//! The walk starts at the issue's creation time. Each status change at time
//! `t` closes the open segment: `t - segment_start` is credited to the
//! status the issue moved *out of*, and `t` becomes the new segment start.
//! The time spent in the current status is therefore never counted, and an
//! issue that never changed status reduces to an empty map.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::model::{ChangelogEntry, Issue, StatusChangeEvent};

/// Cumulative seconds per departed-from status.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct DurationMap(BTreeMap<String, f64>);

impl DurationMap {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn add(&mut self, status: &str, seconds: f64) {
        *self.0.entry(status.to_string()).or_insert(0.0) += seconds;
    }

    #[must_use]
    pub fn get(&self, status: &str) -> Option<f64> {
        self.0.get(status).copied()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, f64)> {
        self.0.iter().map(|(status, seconds)| (status.as_str(), *seconds))
    }

    #[must_use]
    pub fn total_seconds(&self) -> f64 {
        self.0.values().sum()
    }

    /// Serialized `{"status": seconds}` payload.
    #[must_use]
    pub fn to_json(&self) -> String {
        serde_json::to_string(&self.0).unwrap_or_else(|_| "{}".to_string())
    }
}

/// The changelog contradicts itself.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ChangelogFault {
    #[error("changelog entry at {at} carries {count} status changes")]
    MultipleStatusChanges { at: DateTime<Utc>, count: usize },

    #[error("status change at {at} is missing its from/to status")]
    MissingStatus { at: DateTime<Utc> },

    #[error("negative duration in status '{status}': {start} -> {end}")]
    NegativeDuration {
        status: String,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    },
}

/// A [`ChangelogFault`] attributed to an issue.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("malformed changelog for {issue_key}: {fault}")]
pub struct MalformedChangelog {
    pub issue_key: String,
    #[source]
    pub fault: ChangelogFault,
}

/// Pick the workflow-status change out of each changelog entry.
///
/// Entries without a status change are skipped. The result is in input
/// order; [`reduce`] sorts.
///
/// # Errors
///
/// [`ChangelogFault::MultipleStatusChanges`] when one entry changes status
/// more than once, [`ChangelogFault::MissingStatus`] when the change lacks a
/// from or to status.
pub fn status_events(entries: &[ChangelogEntry]) -> Result<Vec<StatusChangeEvent>, ChangelogFault> {
    let mut events = Vec::new();

    for entry in entries {
        let mut changes = entry.items.iter().filter(|item| item.is_status_change());
        let Some(item) = changes.next() else {
            continue;
        };

        let extra = changes.count();
        if extra > 0 {
            return Err(ChangelogFault::MultipleStatusChanges {
                at: entry.created,
                count: extra + 1,
            });
        }

        let (Some(from_status), Some(to_status)) = (&item.from_display, &item.to_display) else {
            return Err(ChangelogFault::MissingStatus { at: entry.created });
        };

        events.push(StatusChangeEvent {
            at: entry.created,
            from_status: from_status.clone(),
            to_status: to_status.clone(),
        });
    }

    Ok(events)
}

/// Sum time per departed-from status.
///
/// Events are sorted by timestamp first (ties broken by status names), so
/// any permutation of the same events reduces to the same map.
///
/// # Errors
///
/// [`ChangelogFault::NegativeDuration`] when an event precedes the running
/// segment start (for example, a transition dated before issue creation).
pub fn reduce(
    created_at: DateTime<Utc>,
    events: &[StatusChangeEvent],
) -> Result<DurationMap, ChangelogFault> {
    let mut ordered: Vec<&StatusChangeEvent> = events.iter().collect();
    ordered.sort_by(|a, b| {
        a.at.cmp(&b.at)
            .then_with(|| a.from_status.cmp(&b.from_status))
            .then_with(|| a.to_status.cmp(&b.to_status))
    });

    let mut durations = DurationMap::new();
    let mut segment_start = created_at;

    for event in ordered {
        let elapsed = event.at - segment_start;
        if elapsed < chrono::TimeDelta::zero() {
            return Err(ChangelogFault::NegativeDuration {
                status: event.from_status.clone(),
                start: segment_start,
                end: event.at,
            });
        }

        #[allow(clippy::cast_precision_loss)]
        let seconds = elapsed.num_milliseconds() as f64 / 1000.0;
        durations.add(&event.from_status, seconds);
        segment_start = event.at;
    }

    Ok(durations)
}

/// Reduce one issue's full changelog.
///
/// # Errors
///
/// [`MalformedChangelog`] naming the issue.
pub fn reduce_issue(issue: &Issue) -> Result<DurationMap, MalformedChangelog> {
    status_events(&issue.changelog)
        .and_then(|events| reduce(issue.created_at, &events))
        .map_err(|fault| MalformedChangelog {
            issue_key: issue.key.clone(),
            fault,
        })
}
