//! Per-issue rows and per-project cycle-time statistics.
//!
//! Percentiles use the nearest-rank rule `sorted[round(n * q) - 1]` with
//! round-half-up, not interpolation. A rank of zero (only possible for a
//! small group and a low quantile) selects the last element.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::warn;

use crate::catalog::Catalog;
use crate::model::{BoardId, Issue, IssueId, SprintId};
use crate::policy::{PolicyTables, PolicyViolation};
use crate::reducer::DurationMap;

pub const Q85: f64 = 0.85;
pub const Q75: f64 = 0.75;
pub const Q50: f64 = 0.50;
pub const Q25: f64 = 0.25;

/// Minimum eligible rows for a group to enter the highlight ranking.
pub const DEFAULT_MIN_GROUP_SIZE: usize = 10;
/// Number of groups surfaced by the highlight ranking.
pub const DEFAULT_HIGHLIGHT_COUNT: usize = 3;

const SECONDS_PER_HOUR: f64 = 3600.0;

/// Round to two decimal places, half away from zero.
#[must_use]
pub fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

// ---------------------------------------------------------------------------
// Rows
// ---------------------------------------------------------------------------

/// One materialized issue, ready for the raw tabular artifact.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IssueRow {
    pub board_id: Option<BoardId>,
    pub project_name: Option<String>,

    pub sprint_id: Option<SprintId>,
    pub sprint_name: Option<String>,
    pub sprint_created: Option<DateTime<Utc>>,
    pub sprint_complete: Option<DateTime<Utc>>,
    pub sprint_start: Option<DateTime<Utc>>,
    pub sprint_end: Option<DateTime<Utc>>,

    pub issue_id: IssueId,
    pub issue_key: String,
    pub issue_created: DateTime<Utc>,
    pub epic_key: Option<String>,
    pub issue_type: String,
    pub issue_status: String,

    pub is_cycle_time_task: bool,
    pub is_cycle_time_status: bool,
    pub is_cycle_time_data: bool,

    pub in_flight_hours: f64,
    pub durations: DurationMap,
}

impl IssueRow {
    /// Passes all three eligibility filters.
    #[must_use]
    pub const fn is_eligible(&self) -> bool {
        self.is_cycle_time_task && self.is_cycle_time_status && self.is_cycle_time_data
    }
}

/// Hours spent in in-flight statuses, rounded to two decimals.
///
/// # Errors
///
/// [`PolicyViolation`] when a departed-from status is unclassified.
pub fn in_flight_hours(
    durations: &DurationMap,
    policy: &PolicyTables,
) -> Result<f64, PolicyViolation> {
    let mut seconds = 0.0;
    for (status, elapsed) in durations.iter() {
        if policy.is_in_flight(status)? {
            seconds += elapsed;
        }
    }
    Ok(round2(seconds / SECONDS_PER_HOUR))
}

/// Build the row for `issue` from its catalog association and reduced
/// durations. An issue without a resolvable board is still emitted, with
/// empty project fields.
///
/// # Errors
///
/// [`PolicyViolation`] when the issue type or a status is unclassified.
pub fn materialize(
    catalog: &Catalog,
    issue: &Issue,
    durations: DurationMap,
    policy: &PolicyTables,
) -> Result<IssueRow, PolicyViolation> {
    let association = catalog.association(issue.id);
    if association.board.is_none() {
        warn!(
            issue_id = issue.id,
            issue_key = issue.key.as_str(),
            board_id = association.board_id,
            sprint_id = association.sprint.map(|sprint| sprint.id),
            "missing board for issue"
        );
    }

    let hours = in_flight_hours(&durations, policy)?;
    let sprint = association.sprint;

    Ok(IssueRow {
        board_id: association.board_id,
        project_name: association.board.and_then(|board| board.project_name.clone()),

        sprint_id: sprint.map(|s| s.id),
        sprint_name: sprint.map(|s| s.name.clone()),
        sprint_created: sprint.and_then(|s| s.created_date),
        sprint_complete: sprint.and_then(|s| s.complete_date),
        sprint_start: sprint.and_then(|s| s.start_date),
        sprint_end: sprint.and_then(|s| s.end_date),

        issue_id: issue.id,
        issue_key: issue.key.clone(),
        issue_created: issue.created_at,
        epic_key: issue.epic_key.clone(),
        issue_type: issue.issue_type.clone(),
        issue_status: issue.status.clone(),

        is_cycle_time_task: policy.is_cycle_time_task(&issue.issue_type)?,
        is_cycle_time_status: policy.is_cycle_time_status(&issue.status)?,
        is_cycle_time_data: policy.is_cycle_time_data(hours),

        in_flight_hours: hours,
        durations,
    })
}

// ---------------------------------------------------------------------------
// Statistics
// ---------------------------------------------------------------------------

/// Nearest-rank percentile over ascending `sorted`. `None` when empty.
#[must_use]
pub fn nearest_rank(sorted: &[f64], quantile: f64) -> Option<f64> {
    let last = sorted.len().checked_sub(1)?;

    #[allow(
        clippy::cast_precision_loss,
        clippy::cast_possible_truncation,
        clippy::cast_sign_loss
    )]
    let rank = (sorted.len() as f64 * quantile).round().max(0.0) as usize;

    let index = rank.checked_sub(1).map_or(last, |index| index.min(last));
    sorted.get(index).copied()
}

/// Descriptive statistics for one project.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GroupStatistic {
    pub project_name: Option<String>,
    pub count: usize,
    pub mean: f64,
    pub p25: f64,
    pub p50: f64,
    pub p75: f64,
    pub p85: f64,
    pub min: f64,
    pub max: f64,
    pub earliest_window_start: Option<DateTime<Utc>>,
    pub latest_window_end: Option<DateTime<Utc>>,
}

impl GroupStatistic {
    /// Statistics over one group's rows. `None` for an empty group.
    #[must_use]
    pub fn from_rows(project_name: Option<String>, rows: &[&IssueRow]) -> Option<Self> {
        let mut points: Vec<f64> = rows.iter().map(|row| row.in_flight_hours).collect();
        points.sort_by(f64::total_cmp);

        let count = points.len();
        #[allow(clippy::cast_precision_loss)]
        let mean = round2(points.iter().sum::<f64>() / count as f64);

        Some(Self {
            project_name,
            count,
            mean,
            p25: nearest_rank(&points, Q25)?,
            p50: nearest_rank(&points, Q50)?,
            p75: nearest_rank(&points, Q75)?,
            p85: nearest_rank(&points, Q85)?,
            min: *points.first()?,
            max: *points.last()?,
            earliest_window_start: rows.iter().filter_map(|row| row.sprint_start).min(),
            latest_window_end: rows.iter().filter_map(|row| row.sprint_end).max(),
        })
    }
}

/// Group eligible rows by project name and summarize each group.
///
/// Groups come back ordered by project name; rows without a project form
/// their own group, first.
#[must_use]
pub fn summarize(rows: &[IssueRow]) -> Vec<GroupStatistic> {
    let mut groups: BTreeMap<Option<&str>, Vec<&IssueRow>> = BTreeMap::new();
    for row in rows.iter().filter(|row| row.is_eligible()) {
        groups.entry(row.project_name.as_deref()).or_default().push(row);
    }

    groups
        .into_iter()
        .filter_map(|(name, members)| GroupStatistic::from_rows(name.map(str::to_string), &members))
        .collect()
}

/// Lowest-p85 groups among those with enough data.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Highlight {
    pub groups: Vec<GroupStatistic>,
    /// How many slots could not be filled.
    pub shortfall: usize,
}

/// Rank groups with `count >= min_group_size` by ascending p85 and keep the
/// first `limit`. Fewer qualifying groups is reported, not an error.
#[must_use]
pub fn fastest_groups(stats: &[GroupStatistic], min_group_size: usize, limit: usize) -> Highlight {
    let mut qualifying: Vec<&GroupStatistic> = stats
        .iter()
        .filter(|stat| stat.count >= min_group_size)
        .collect();
    qualifying.sort_by(|a, b| {
        a.p85
            .total_cmp(&b.p85)
            .then_with(|| a.project_name.cmp(&b.project_name))
    });

    let groups: Vec<GroupStatistic> = qualifying.into_iter().take(limit).cloned().collect();
    let shortfall = limit.saturating_sub(groups.len());
    if shortfall > 0 {
        warn!(
            qualifying = groups.len(),
            wanted = limit,
            min_group_size,
            "insufficient groups for highlight ranking"
        );
    }

    Highlight { groups, shortfall }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(day: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, day, 0, 0, 0).single().expect("valid date")
    }

    fn row(project: Option<&str>, hours: f64, eligible: bool) -> IssueRow {
        IssueRow {
            board_id: Some(1),
            project_name: project.map(str::to_string),
            sprint_id: None,
            sprint_name: None,
            sprint_created: None,
            sprint_complete: None,
            sprint_start: None,
            sprint_end: None,
            issue_id: 1,
            issue_key: "PAY-1".to_string(),
            issue_created: at(1),
            epic_key: None,
            issue_type: "Story".to_string(),
            issue_status: "Done".to_string(),
            is_cycle_time_task: true,
            is_cycle_time_status: eligible,
            is_cycle_time_data: hours > 0.0,
            in_flight_hours: hours,
            durations: DurationMap::new(),
        }
    }

    fn stat(name: &str, count: usize, p85: f64) -> GroupStatistic {
        GroupStatistic {
            project_name: Some(name.to_string()),
            count,
            mean: p85,
            p25: p85,
            p50: p85,
            p75: p85,
            p85,
            min: p85,
            max: p85,
            earliest_window_start: None,
            latest_window_end: None,
        }
    }

    #[test]
    fn nearest_rank_matches_known_examples() {
        let points: Vec<f64> = (1..=10).map(f64::from).collect();
        assert_eq!(nearest_rank(&points, Q85), Some(9.0));
        assert_eq!(nearest_rank(&points, Q75), Some(8.0));
        assert_eq!(nearest_rank(&points, Q50), Some(5.0));
        assert_eq!(nearest_rank(&points, Q25), Some(3.0));
    }

    #[test]
    fn nearest_rank_single_point() {
        for q in [Q85, Q75, Q50, Q25] {
            assert_eq!(nearest_rank(&[4.5], q), Some(4.5));
        }
    }

    #[test]
    fn nearest_rank_empty_is_none() {
        assert_eq!(nearest_rank(&[], Q50), None);
    }

    #[test]
    fn round2_rounds_half_up() {
        assert!((round2(1.005_1) - 1.01).abs() < f64::EPSILON);
        assert!((round2(25.0) - 25.0).abs() < f64::EPSILON);
        assert!((round2(2.344) - 2.34).abs() < f64::EPSILON);
    }

    #[test]
    fn summarize_filters_and_groups() {
        let rows = vec![
            row(Some("Payments"), 4.0, true),
            row(Some("Payments"), 2.0, true),
            row(Some("Payments"), 9.0, false),
            row(Some("Payments"), 0.0, true),
            row(Some("Search"), 1.5, true),
            row(None, 3.0, true),
        ];

        let stats = summarize(&rows);
        let names: Vec<Option<&str>> = stats.iter().map(|s| s.project_name.as_deref()).collect();
        assert_eq!(names, vec![None, Some("Payments"), Some("Search")]);

        let payments = &stats[1];
        assert_eq!(payments.count, 2);
        assert!((payments.mean - 3.0).abs() < f64::EPSILON);
        assert!((payments.min - 2.0).abs() < f64::EPSILON);
        assert!((payments.max - 4.0).abs() < f64::EPSILON);
        assert!((payments.p50 - 2.0).abs() < f64::EPSILON);
        assert!((payments.p85 - 4.0).abs() < f64::EPSILON);
    }

    #[test]
    fn window_bounds_skip_missing_sprint_dates() {
        let mut first = row(Some("Payments"), 1.0, true);
        first.sprint_start = Some(at(3));
        first.sprint_end = Some(at(17));
        let mut second = row(Some("Payments"), 2.0, true);
        second.sprint_start = Some(at(10));
        second.sprint_end = Some(at(24));
        let board_only = row(Some("Payments"), 3.0, true);

        let stats = summarize(&[first, second, board_only]);
        assert_eq!(stats[0].earliest_window_start, Some(at(3)));
        assert_eq!(stats[0].latest_window_end, Some(at(24)));

        let stats = summarize(&[row(Some("Ops"), 1.0, true)]);
        assert_eq!(stats[0].earliest_window_start, None);
        assert_eq!(stats[0].latest_window_end, None);
    }

    #[test]
    fn fastest_groups_ranks_by_p85() {
        let stats = vec![
            stat("A", 12, 30.0),
            stat("B", 10, 10.0),
            stat("C", 9, 1.0),
            stat("D", 40, 20.0),
            stat("E", 11, 50.0),
        ];
        let highlight = fastest_groups(&stats, DEFAULT_MIN_GROUP_SIZE, DEFAULT_HIGHLIGHT_COUNT);
        let names: Vec<&str> = highlight
            .groups
            .iter()
            .filter_map(|s| s.project_name.as_deref())
            .collect();
        assert_eq!(names, vec!["B", "D", "A"]);
        assert_eq!(highlight.shortfall, 0);
    }

    #[test]
    fn fastest_groups_reports_shortfall() {
        let stats = vec![stat("A", 12, 30.0), stat("C", 2, 1.0)];
        let highlight = fastest_groups(&stats, DEFAULT_MIN_GROUP_SIZE, DEFAULT_HIGHLIGHT_COUNT);
        assert_eq!(highlight.groups.len(), 1);
        assert_eq!(highlight.shortfall, 2);

        let empty = fastest_groups(&[], DEFAULT_MIN_GROUP_SIZE, DEFAULT_HIGHLIGHT_COUNT);
        assert!(empty.groups.is_empty());
        assert_eq!(empty.shortfall, 3);
    }
}
