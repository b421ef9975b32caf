//! In-memory catalog of boards, sprints, and issues for one run.
//!
//! # Loading
//!
//! 1. `GET /board`, sorted by id.
//! 2. One sprint-listing job per scrum board, fanned out through
//!    [`pool::fan_out`]. Kanban and simple boards own no sprints.
//! 3. Two issue fan-outs:
//!    - one job per in-scope sprint (`GET /sprint/{id}/issue`);
//!    - one job per kanban/simple project, searching for issues resolved
//!      inside the median window of the in-scope sprints.
//!
//! Jobs return owned results; the cross-reference maps are built on the
//! calling thread after each fan-out completes, so no map is shared with
//! the workers.
//!
//! # Merge policy
//!
//! - Within one job, the same issue id twice is a fatal
//!   [`CatalogError::DuplicateIssue`].
//! - Across sprint jobs (carry-over between sprints), the highest sprint id
//!   wins.
//! - Across the two fan-outs, the sprint association wins over the board
//!   association.
//!
//! Once built, the catalog is read-only.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt;

use chrono::{DateTime, TimeDelta, Utc};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::fetch::{self, FetchError, ISSUES_KEY, JiraClient, Transport, VALUES_KEY};
use crate::model::{
    Board, BoardId, ChangelogEntry, Issue, IssueId, ModelError, Sprint, SprintId, SprintState,
};
use crate::pool;

/// Trailing window, in days, for a closed sprint to be in scope.
pub const SPRINT_WINDOW_DAYS: i64 = 28;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum CatalogError {
    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error(transparent)]
    Model(#[from] ModelError),

    #[error("issue {issue_id} returned more than once by {origin}")]
    DuplicateIssue {
        issue_id: IssueId,
        origin: IssueOrigin,
    },
}

// ---------------------------------------------------------------------------
// Provenance
// ---------------------------------------------------------------------------

/// Which fan-out job discovered an issue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case", tag = "kind", content = "id")]
pub enum IssueOrigin {
    Sprint(SprintId),
    Board(BoardId),
}

impl fmt::Display for IssueOrigin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Sprint(id) => write!(f, "sprint {id}"),
            Self::Board(id) => write!(f, "board {id}"),
        }
    }
}

/// An issue together with the job that found it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourcedIssue {
    pub origin: IssueOrigin,
    pub issue: Issue,
}

/// Date range used to search kanban/simple projects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SearchWindow {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl SearchWindow {
    /// JQL for issues of `project_key` resolved inside the window.
    #[must_use]
    pub fn jql(&self, project_key: &str) -> String {
        format!(
            r#"project = "{project_key}" AND resolved > "{}" AND resolved <= "{}" ORDER BY id"#,
            self.start.format("%Y-%m-%d"),
            self.end.format("%Y-%m-%d"),
        )
    }
}

// ---------------------------------------------------------------------------
// Loading stages
// ---------------------------------------------------------------------------

/// Fetch every board, sorted by id.
///
/// # Errors
///
/// [`CatalogError`] from the fetch or from decoding a board.
pub fn load_boards<T: Transport>(client: &JiraClient<T>) -> Result<Vec<Board>, CatalogError> {
    let mut boards = client
        .fetch_all(&fetch::boards_path(), VALUES_KEY)?
        .into_iter()
        .map(Board::from_json)
        .collect::<Result<Vec<_>, _>>()?;

    boards.sort_by_key(|board| board.id);
    boards.dedup_by_key(|board| board.id);
    info!(count = boards.len(), "found boards");
    Ok(boards)
}

/// Fetch the sprints of every scrum board, deduplicated and sorted by id.
///
/// # Errors
///
/// The first failing board job fails the whole load.
pub fn load_sprints<T: Transport>(
    client: &JiraClient<T>,
    boards: &[Board],
    max_concurrency: usize,
) -> Result<Vec<Sprint>, CatalogError> {
    let scrum_boards: Vec<&Board> = boards.iter().filter(|board| board.kind.has_sprints()).collect();

    let mut sprints = pool::fan_out(
        scrum_boards,
        max_concurrency,
        |board| -> Result<Vec<Sprint>, CatalogError> {
            let sprints = client
                .fetch_all(&fetch::board_sprints_path(board.id), VALUES_KEY)?
                .into_iter()
                .map(Sprint::from_json)
                .collect::<Result<Vec<_>, _>>()?;
            Ok(sprints)
        },
    )?;

    sprints.sort_by_key(|sprint| sprint.id);
    sprints.dedup_by_key(|sprint| sprint.id);
    info!(count = sprints.len(), "found sprints");
    Ok(sprints)
}

/// Closed sprints that ended within the trailing window before `now`.
#[must_use]
pub fn sprints_in_scope(sprints: &[Sprint], now: DateTime<Utc>) -> Vec<Sprint> {
    let window_start = now - TimeDelta::days(SPRINT_WINDOW_DAYS);

    let in_scope: Vec<Sprint> = sprints
        .iter()
        .filter(|sprint| {
            sprint.state == SprintState::Closed
                && sprint
                    .end_date
                    .is_some_and(|end| end < now && end >= window_start)
        })
        .cloned()
        .collect();

    info!(
        in_scope = in_scope.len(),
        total = sprints.len(),
        "selected sprints by state and end date"
    );

    let starts = in_scope.iter().filter_map(|sprint| sprint.start_date);
    let ends = in_scope.iter().filter_map(|sprint| sprint.end_date);
    info!(
        earliest_start = ?starts.clone().min(),
        latest_start = ?starts.max(),
        earliest_end = ?ends.clone().min(),
        latest_end = ?ends.max(),
        "sprint window bounds"
    );

    in_scope
}

/// Median start and median end of the given sprints.
///
/// Uses the upper median for an even count. `None` when no sprint has both
/// dates to contribute.
#[must_use]
pub fn search_window(sprints: &[Sprint]) -> Option<SearchWindow> {
    fn median(mut values: Vec<DateTime<Utc>>) -> Option<DateTime<Utc>> {
        values.sort_unstable();
        values.get(values.len() / 2).copied()
    }

    let start = median(sprints.iter().filter_map(|s| s.start_date).collect())?;
    let end = median(sprints.iter().filter_map(|s| s.end_date).collect())?;
    Some(SearchWindow { start, end })
}

/// Fetch the issues of each sprint, with complete changelogs.
///
/// # Errors
///
/// The first failing sprint job fails the whole load.
pub fn load_sprint_issues<T: Transport>(
    client: &JiraClient<T>,
    sprints: &[Sprint],
    max_concurrency: usize,
) -> Result<Vec<SourcedIssue>, CatalogError> {
    let jobs: Vec<SprintId> = sprints.iter().map(|sprint| sprint.id).collect();

    pool::fan_out(jobs, max_concurrency, |sprint_id| {
        fetch_issues(
            client,
            &fetch::sprint_issues_path(sprint_id),
            IssueOrigin::Sprint(sprint_id),
        )
    })
}

/// Search each kanban/simple project for issues resolved inside `window`.
///
/// Boards without a project key are skipped; boards sharing a project key
/// are searched once, under the lowest board id.
///
/// # Errors
///
/// The first failing search job fails the whole load.
pub fn load_board_issues<T: Transport>(
    client: &JiraClient<T>,
    boards: &[Board],
    window: &SearchWindow,
    max_concurrency: usize,
) -> Result<Vec<SourcedIssue>, CatalogError> {
    let mut seen_projects = HashSet::new();
    let mut ordered: Vec<&Board> = boards.iter().collect();
    ordered.sort_by_key(|board| board.id);

    let jobs: Vec<(BoardId, String)> = ordered
        .into_iter()
        .filter(|board| !board.kind.has_sprints())
        .filter_map(|board| Some((board.id, board.project_key.clone()?)))
        .filter(|(_, key)| seen_projects.insert(key.clone()))
        .collect();

    pool::fan_out(jobs, max_concurrency, |(board_id, project_key)| {
        fetch_issues(
            client,
            &fetch::search_path(&window.jql(&project_key)),
            IssueOrigin::Board(board_id),
        )
    })
}

fn fetch_issues<T: Transport>(
    client: &JiraClient<T>,
    path: &str,
    origin: IssueOrigin,
) -> Result<Vec<SourcedIssue>, CatalogError> {
    let issues = client
        .fetch_all(path, ISSUES_KEY)?
        .into_iter()
        .map(Issue::from_json)
        .collect::<Result<Vec<_>, _>>()?;

    let mut seen = HashSet::with_capacity(issues.len());
    for issue in &issues {
        if !seen.insert(issue.id) {
            return Err(CatalogError::DuplicateIssue {
                issue_id: issue.id,
                origin,
            });
        }
    }

    issues
        .into_iter()
        .map(|issue| {
            complete_changelog(client, issue).map(|issue| SourcedIssue { origin, issue })
        })
        .collect()
}

fn complete_changelog<T: Transport>(
    client: &JiraClient<T>,
    issue: Issue,
) -> Result<Issue, CatalogError> {
    if !issue.changelog_truncated {
        return Ok(issue);
    }

    debug!(issue = issue.key.as_str(), "re-fetching truncated changelog");
    let changelog = client
        .fetch_all(&fetch::issue_changelog_path(issue.id), VALUES_KEY)?
        .into_iter()
        .map(ChangelogEntry::from_json)
        .collect::<Result<Vec<_>, _>>()?;

    Ok(issue.with_full_changelog(changelog))
}

// ---------------------------------------------------------------------------
// Catalog
// ---------------------------------------------------------------------------

/// Where an issue sits: its sprint (scrum path) and its board.
#[derive(Debug, Clone, Copy, Default)]
pub struct Association<'a> {
    pub sprint: Option<&'a Sprint>,
    pub board_id: Option<BoardId>,
    pub board: Option<&'a Board>,
}

/// Read-only indices over the entities of one run.
#[derive(Debug, Clone, Default)]
pub struct Catalog {
    boards: BTreeMap<BoardId, Board>,
    sprints: BTreeMap<SprintId, Sprint>,
    issues: BTreeMap<IssueId, Issue>,
    issue_sprint: HashMap<IssueId, SprintId>,
    issue_board: HashMap<IssueId, BoardId>,
    window: Option<SearchWindow>,
}

impl Catalog {
    /// Run every loading stage against the API.
    ///
    /// # Errors
    ///
    /// Any [`CatalogError`]; nothing partial is returned.
    pub fn load<T: Transport>(
        client: &JiraClient<T>,
        max_concurrency: usize,
        now: DateTime<Utc>,
    ) -> Result<Self, CatalogError> {
        let boards = load_boards(client)?;
        let sprints = load_sprints(client, &boards, max_concurrency)?;
        let in_scope = sprints_in_scope(&sprints, now);
        let window = search_window(&in_scope);

        let sprint_issues = load_sprint_issues(client, &in_scope, max_concurrency)?;
        let board_issues = match &window {
            Some(window) => load_board_issues(client, &boards, window, max_concurrency)?,
            None => {
                if boards.iter().any(|board| !board.kind.has_sprints()) {
                    warn!("no in-scope sprints to derive a search window; skipping kanban/simple boards");
                }
                Vec::new()
            }
        };

        let catalog = Self::assemble(boards, sprints, window, sprint_issues, board_issues);
        info!(count = catalog.issues.len(), "found issues");
        Ok(catalog)
    }

    /// Merge fetched entities into indices, applying the merge policy.
    #[must_use]
    pub fn assemble(
        boards: Vec<Board>,
        sprints: Vec<Sprint>,
        window: Option<SearchWindow>,
        mut sprint_issues: Vec<SourcedIssue>,
        mut board_issues: Vec<SourcedIssue>,
    ) -> Self {
        let mut catalog = Self {
            boards: boards.into_iter().map(|board| (board.id, board)).collect(),
            sprints: sprints.into_iter().map(|sprint| (sprint.id, sprint)).collect(),
            window,
            ..Self::default()
        };

        sprint_issues.sort_by_key(|sourced| (sourced.issue.id, sourced.origin));
        for SourcedIssue { origin, issue } in sprint_issues {
            if let IssueOrigin::Sprint(sprint_id) = origin {
                catalog.issue_sprint.insert(issue.id, sprint_id);
            }
            catalog.issues.insert(issue.id, issue);
        }

        board_issues.sort_by_key(|sourced| (sourced.issue.id, sourced.origin));
        for SourcedIssue { origin, issue } in board_issues {
            if catalog.issue_sprint.contains_key(&issue.id) {
                debug!(issue = issue.key.as_str(), "sprint association preferred over board search");
                continue;
            }
            if catalog.issue_board.contains_key(&issue.id) {
                continue;
            }
            if let IssueOrigin::Board(board_id) = origin {
                catalog.issue_board.insert(issue.id, board_id);
            }
            catalog.issues.insert(issue.id, issue);
        }

        catalog
    }

    pub fn boards(&self) -> impl Iterator<Item = &Board> {
        self.boards.values()
    }

    pub fn sprints(&self) -> impl Iterator<Item = &Sprint> {
        self.sprints.values()
    }

    /// Issues in ascending id order.
    pub fn issues(&self) -> impl Iterator<Item = &Issue> {
        self.issues.values()
    }

    #[must_use]
    pub fn issue_count(&self) -> usize {
        self.issues.len()
    }

    #[must_use]
    pub fn board(&self, id: BoardId) -> Option<&Board> {
        self.boards.get(&id)
    }

    #[must_use]
    pub fn sprint(&self, id: SprintId) -> Option<&Sprint> {
        self.sprints.get(&id)
    }

    #[must_use]
    pub const fn window(&self) -> Option<&SearchWindow> {
        self.window.as_ref()
    }

    /// Resolve an issue's sprint and board. Sprint association takes
    /// precedence; its board is the sprint's origin board.
    #[must_use]
    pub fn association(&self, issue_id: IssueId) -> Association<'_> {
        let sprint = self
            .issue_sprint
            .get(&issue_id)
            .and_then(|sprint_id| self.sprints.get(sprint_id));

        let board_id = sprint
            .map(|sprint| sprint.origin_board_id)
            .or_else(|| self.issue_board.get(&issue_id).copied());

        Association {
            sprint,
            board_id,
            board: board_id.and_then(|id| self.boards.get(&id)),
        }
    }
}
