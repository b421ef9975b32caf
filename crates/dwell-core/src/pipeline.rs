//! One batch run: catalog → audit → reduce → rows → statistics.
//!
//! Policy tables arrive already validated (constructing a [`PolicyTables`]
//! is the validation), so a misconfigured run fails before the first
//! request. Every later failure aborts the run with no partial report.

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::info;

use crate::aggregate::{self, GroupStatistic, Highlight, IssueRow};
use crate::catalog::{Catalog, SearchWindow};
use crate::config::Config;
use crate::error::Error;
use crate::fetch::{JiraClient, Transport};
use crate::policy::{PolicyTables, PolicyViolation};
use crate::reducer;

/// Knobs for a single run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunOptions {
    pub max_concurrency: usize,
    pub min_group_size: usize,
    pub highlight_count: usize,
    /// Reference instant for sprint scope selection.
    pub now: DateTime<Utc>,
}

impl RunOptions {
    #[must_use]
    pub const fn from_config(config: &Config, now: DateTime<Utc>) -> Self {
        Self {
            max_concurrency: config.fetch.max_concurrency,
            min_group_size: config.report.min_group_size,
            highlight_count: config.report.highlight_count,
            now,
        }
    }
}

/// Everything a run produces.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Report {
    pub generated_at: DateTime<Utc>,
    pub board_count: usize,
    pub sprint_count: usize,
    pub issue_count: usize,
    pub request_count: usize,
    pub search_window: Option<SearchWindow>,
    pub rows: Vec<IssueRow>,
    pub groups: Vec<GroupStatistic>,
    pub highlight: Highlight,
}

/// Fetch everything and build the report.
///
/// # Errors
///
/// The first [`Error`] from any stage.
pub fn run<T: Transport>(
    client: &JiraClient<T>,
    policy: &PolicyTables,
    options: &RunOptions,
) -> Result<Report, Error> {
    let catalog = Catalog::load(client, options.max_concurrency, options.now)?;
    let mut report = build_report(&catalog, policy, options)?;
    report.request_count = client.request_count();
    info!(requests = report.request_count, "run complete");
    Ok(report)
}

/// Build the report from an already loaded catalog.
///
/// # Errors
///
/// [`Error::PolicyViolation`] when the data holds unclassified values, or
/// [`Error::MalformedChangelog`] for the first issue that cannot be reduced.
pub fn build_report(
    catalog: &Catalog,
    policy: &PolicyTables,
    options: &RunOptions,
) -> Result<Report, Error> {
    audit(catalog, policy)?;

    let mut rows = Vec::with_capacity(catalog.issue_count());
    for issue in catalog.issues() {
        let durations = reducer::reduce_issue(issue)?;
        rows.push(aggregate::materialize(catalog, issue, durations, policy)?);
    }

    let groups = aggregate::summarize(&rows);
    let highlight =
        aggregate::fastest_groups(&groups, options.min_group_size, options.highlight_count);
    info!(
        rows = rows.len(),
        eligible = rows.iter().filter(|row| row.is_eligible()).count(),
        groups = groups.len(),
        "aggregated cycle times"
    );

    Ok(Report {
        generated_at: options.now,
        board_count: catalog.boards().count(),
        sprint_count: catalog.sprints().count(),
        issue_count: catalog.issue_count(),
        request_count: 0,
        search_window: catalog.window().copied(),
        rows,
        groups,
        highlight,
    })
}

/// Check every issue type and every status the catalog mentions (current
/// statuses and both ends of each status change) against the tables.
///
/// # Errors
///
/// [`PolicyViolation`] listing all unclassified values of one dimension.
pub fn audit(catalog: &Catalog, policy: &PolicyTables) -> Result<(), PolicyViolation> {
    let issue_types = catalog.issues().map(|issue| issue.issue_type.as_str());

    let statuses = catalog.issues().flat_map(|issue| {
        let changed = issue
            .changelog
            .iter()
            .flat_map(|entry| &entry.items)
            .filter(|item| item.is_status_change())
            .flat_map(|item| [item.from_display.as_deref(), item.to_display.as_deref()])
            .flatten();
        std::iter::once(issue.status.as_str()).chain(changed)
    });

    policy.audit(issue_types, statuses)
}
