//! Classification tables for issue types and workflow statuses.
//!
//! Every dimension is a pair of disjoint sets: a "yes" side and a "no" side.
//! A value that belongs to neither side is never defaulted; the predicates
//! return a [`PolicyViolation`] naming it so the tables can be extended.
//!
//! # Invariants (checked by [`PolicyTables::new`])
//!
//! - The two sides of each pair are disjoint.
//! - The terminal-status pair and the in-flight-status pair cover exactly the
//!   same status universe.

use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};

pub const CYCLE_TIME_ISSUE_TYPES: &[&str] = &["production defect", "spike", "story", "task"];

pub const IGNORED_ISSUE_TYPES: &[&str] = &[
    "bug",
    "epic",
    "initiative",
    "portfolio",
    "sub-task",
    "vulnerability",
];

pub const TERMINAL_STATUSES: &[&str] = &[
    "code merged",
    "completed",
    "deployed",
    "deployed/completed",
    "done",
    "merged",
    "pending production deployment",
];

pub const NON_TERMINAL_STATUSES: &[&str] = &[
    "abandoned",
    "abandoned in development",
    "assigned",
    "assigned for work",
    "assigned to domain team",
    "backlog",
    "bi discovery",
    "canceled",
    "cancelled",
    "code review",
    "discovery",
    "engineer testing",
    "gathering requirements",
    "hold",
    "in dev test",
    "in progress",
    "in review",
    "in test",
    "in validation",
    "investigations",
    "new",
    "on-hold",
    "open",
    "product backlog",
    "pull request submitted",
    "ready for execution",
    "ready for external share",
    "ready for finalization",
    "ready for qe",
    "ready for test",
    "ready for test/ review complet",
    "ready for test/review complete",
    "ready to begin",
    "ready to review",
    "request created",
    "review",
    "rework",
    "seen",
    "scoping",
    "selected for development",
    "stale/abandoned",
    "test done",
    "test plan in progress",
    "tickets ready for team",
    "to do",
    "to test",
    "triage",
    "up next",
    "waiting for approval",
    "waiting for support",
    "work requests",
];

pub const IN_FLIGHT_STATUSES: &[&str] = &[
    "code review",
    "engineer testing",
    "in dev test",
    "in progress",
    "in review",
    "in test",
    "in validation",
    "pull request submitted",
    "ready to review",
    "ready for qe",
    "ready for test",
    "ready for test/ review complet",
    "ready for test/review complete",
    "rework",
    "review",
    "test done",
    "to test",
];

pub const NOT_IN_FLIGHT_STATUSES: &[&str] = &[
    "abandoned",
    "abandoned in development",
    "assigned",
    "assigned for work",
    "assigned to domain team",
    "backlog",
    "bi discovery",
    "canceled",
    "cancelled",
    "code merged",
    "completed",
    "deployed",
    "deployed/completed",
    "discovery",
    "done",
    "gathering requirements",
    "hold",
    "investigations",
    "merged",
    "new",
    "on-hold",
    "open",
    "pending production deployment",
    "product backlog",
    "ready for execution",
    "ready for external share",
    "ready for finalization",
    "ready to begin",
    "request created",
    "seen",
    "scoping",
    "selected for development",
    "stale/abandoned",
    "test plan in progress",
    "tickets ready for team",
    "to do",
    "triage",
    "up next",
    "waiting for approval",
    "waiting for support",
    "work requests",
];

// ---------------------------------------------------------------------------
// Naming
// ---------------------------------------------------------------------------

/// The value space a classification applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Dimension {
    IssueType,
    Status,
}

impl Dimension {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::IssueType => "issue type",
            Self::Status => "issue status",
        }
    }
}

impl fmt::Display for Dimension {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One of the three yes/no classification pairs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Pair {
    /// Cycle-time issue types vs ignored issue types.
    CycleTimeTask,
    /// Terminal statuses vs non-terminal statuses.
    Terminal,
    /// In-flight statuses vs not-in-flight statuses.
    InFlight,
}

impl Pair {
    #[must_use]
    pub const fn dimension(self) -> Dimension {
        match self {
            Self::CycleTimeTask => Dimension::IssueType,
            Self::Terminal | Self::InFlight => Dimension::Status,
        }
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::CycleTimeTask => "issue type",
            Self::Terminal => "terminal issue status",
            Self::InFlight => "in-flight issue status",
        }
    }
}

impl fmt::Display for Pair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// The tables themselves are inconsistent. Raised before any fetch begins.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigurationError {
    #[error("overlapping {pair} values: {}", .values.join(", "))]
    Overlap { pair: Pair, values: Vec<String> },

    #[error(
        "inconsistent terminal issue statuses vs in-flight issue statuses: \
         unclassified by in-flight tables [{}], unclassified by terminal tables [{}]",
        .missing_from_in_flight.join(", "),
        .missing_from_terminal.join(", ")
    )]
    Incomplete {
        missing_from_in_flight: Vec<String>,
        missing_from_terminal: Vec<String>,
    },
}

/// A classified value that belongs to neither side of its pair.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unexpected {dimension} values: {}", .values.join(", "))]
pub struct PolicyViolation {
    pub dimension: Dimension,
    /// Offending values, lower-cased, sorted, deduplicated.
    pub values: Vec<String>,
}

// ---------------------------------------------------------------------------
// Tables
// ---------------------------------------------------------------------------

fn normalize(value: &str) -> String {
    value.to_lowercase()
}

/// A yes/no membership pair over normalized (lower-cased) values.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClassificationPair {
    pair: Pair,
    yes: BTreeSet<String>,
    no: BTreeSet<String>,
}

impl ClassificationPair {
    #[must_use]
    pub fn new<Y, N, S>(pair: Pair, yes: Y, no: N) -> Self
    where
        Y: IntoIterator<Item = S>,
        N: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            pair,
            yes: yes.into_iter().map(|v| normalize(v.as_ref())).collect(),
            no: no.into_iter().map(|v| normalize(v.as_ref())).collect(),
        }
    }

    /// `Some(true)` for the yes side, `Some(false)` for the no side, `None`
    /// when the value is unclassified.
    #[must_use]
    pub fn classify(&self, value: &str) -> Option<bool> {
        let value = normalize(value);
        if self.yes.contains(&value) {
            Some(true)
        } else if self.no.contains(&value) {
            Some(false)
        } else {
            None
        }
    }

    fn check(&self, value: &str) -> Result<bool, PolicyViolation> {
        self.classify(value).ok_or_else(|| PolicyViolation {
            dimension: self.pair.dimension(),
            values: vec![normalize(value)],
        })
    }

    #[must_use]
    pub fn universe(&self) -> BTreeSet<String> {
        self.yes.union(&self.no).cloned().collect()
    }

    fn overlap(&self) -> Vec<String> {
        self.yes.intersection(&self.no).cloned().collect()
    }

    #[must_use]
    pub fn yes_len(&self) -> usize {
        self.yes.len()
    }

    #[must_use]
    pub fn no_len(&self) -> usize {
        self.no.len()
    }
}

/// Raw lists, as written in the built-in constants or a `[policy]` config
/// section.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyLists {
    pub cycle_time_issue_types: Vec<String>,
    pub ignored_issue_types: Vec<String>,
    pub terminal_statuses: Vec<String>,
    pub non_terminal_statuses: Vec<String>,
    pub in_flight_statuses: Vec<String>,
    pub not_in_flight_statuses: Vec<String>,
}

impl PolicyLists {
    #[must_use]
    pub fn builtin() -> Self {
        fn owned(values: &[&str]) -> Vec<String> {
            values.iter().map(|v| (*v).to_string()).collect()
        }

        Self {
            cycle_time_issue_types: owned(CYCLE_TIME_ISSUE_TYPES),
            ignored_issue_types: owned(IGNORED_ISSUE_TYPES),
            terminal_statuses: owned(TERMINAL_STATUSES),
            non_terminal_statuses: owned(NON_TERMINAL_STATUSES),
            in_flight_statuses: owned(IN_FLIGHT_STATUSES),
            not_in_flight_statuses: owned(NOT_IN_FLIGHT_STATUSES),
        }
    }
}

impl Default for PolicyLists {
    fn default() -> Self {
        Self::builtin()
    }
}

/// Validated classification tables. Immutable once built.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PolicyTables {
    task: ClassificationPair,
    terminal: ClassificationPair,
    in_flight: ClassificationPair,
}

impl PolicyTables {
    /// Build and validate tables.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigurationError::Overlap`] when a value sits on both sides
    /// of a pair, or [`ConfigurationError::Incomplete`] when the terminal and
    /// in-flight pairs do not cover the same status universe.
    pub fn new(
        task: ClassificationPair,
        terminal: ClassificationPair,
        in_flight: ClassificationPair,
    ) -> Result<Self, ConfigurationError> {
        for pair in [&task, &terminal, &in_flight] {
            let values = pair.overlap();
            if !values.is_empty() {
                return Err(ConfigurationError::Overlap {
                    pair: pair.pair,
                    values,
                });
            }
        }

        let terminal_universe = terminal.universe();
        let in_flight_universe = in_flight.universe();
        if terminal_universe != in_flight_universe {
            return Err(ConfigurationError::Incomplete {
                missing_from_in_flight: terminal_universe
                    .difference(&in_flight_universe)
                    .cloned()
                    .collect(),
                missing_from_terminal: in_flight_universe
                    .difference(&terminal_universe)
                    .cloned()
                    .collect(),
            });
        }

        Ok(Self {
            task,
            terminal,
            in_flight,
        })
    }

    /// Build tables from raw lists.
    ///
    /// # Errors
    ///
    /// See [`PolicyTables::new`].
    pub fn from_lists(lists: &PolicyLists) -> Result<Self, ConfigurationError> {
        Self::new(
            ClassificationPair::new(
                Pair::CycleTimeTask,
                &lists.cycle_time_issue_types,
                &lists.ignored_issue_types,
            ),
            ClassificationPair::new(
                Pair::Terminal,
                &lists.terminal_statuses,
                &lists.non_terminal_statuses,
            ),
            ClassificationPair::new(
                Pair::InFlight,
                &lists.in_flight_statuses,
                &lists.not_in_flight_statuses,
            ),
        )
    }

    /// The built-in tables.
    ///
    /// # Errors
    ///
    /// Only if the built-in constants were edited into an inconsistent state.
    pub fn builtin() -> Result<Self, ConfigurationError> {
        Self::from_lists(&PolicyLists::builtin())
    }

    /// Whether issues of this type count toward cycle time.
    ///
    /// # Errors
    ///
    /// [`PolicyViolation`] when the type is in neither table.
    pub fn is_cycle_time_task(&self, issue_type: &str) -> Result<bool, PolicyViolation> {
        self.task.check(issue_type)
    }

    /// Whether an issue currently in this status counts toward cycle time
    /// (i.e. the status is terminal).
    ///
    /// # Errors
    ///
    /// [`PolicyViolation`] when the status is in neither table.
    pub fn is_cycle_time_status(&self, status: &str) -> Result<bool, PolicyViolation> {
        self.terminal.check(status)
    }

    /// Whether time spent in this status is active engineering work.
    ///
    /// # Errors
    ///
    /// [`PolicyViolation`] when the status is in neither table.
    pub fn is_in_flight(&self, status: &str) -> Result<bool, PolicyViolation> {
        self.in_flight.check(status)
    }

    /// Whether a reduced in-flight duration carries any signal.
    #[must_use]
    #[allow(clippy::unused_self)]
    pub fn is_cycle_time_data(&self, in_flight_hours: f64) -> bool {
        in_flight_hours > 0.0
    }

    /// Check every observed value against the table universes at once.
    ///
    /// Issue types are checked first; all unknown values of the failing
    /// dimension are reported together.
    ///
    /// # Errors
    ///
    /// [`PolicyViolation`] listing every unclassified value.
    pub fn audit<'a, T, S>(&self, issue_types: T, statuses: S) -> Result<(), PolicyViolation>
    where
        T: IntoIterator<Item = &'a str>,
        S: IntoIterator<Item = &'a str>,
    {
        let unknown_types: BTreeSet<String> = issue_types
            .into_iter()
            .filter(|value| self.task.classify(value).is_none())
            .map(normalize)
            .collect();
        if !unknown_types.is_empty() {
            return Err(PolicyViolation {
                dimension: Dimension::IssueType,
                values: unknown_types.into_iter().collect(),
            });
        }

        let unknown_statuses: BTreeSet<String> = statuses
            .into_iter()
            .filter(|value| self.terminal.classify(value).is_none())
            .map(normalize)
            .collect();
        if !unknown_statuses.is_empty() {
            return Err(PolicyViolation {
                dimension: Dimension::Status,
                values: unknown_statuses.into_iter().collect(),
            });
        }

        Ok(())
    }

    #[must_use]
    pub const fn pairs(&self) -> [&ClassificationPair; 3] {
        [&self.task, &self.terminal, &self.in_flight]
    }
}

impl ClassificationPair {
    #[must_use]
    pub const fn pair(&self) -> Pair {
        self.pair
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn builtin() -> PolicyTables {
        PolicyTables::builtin().expect("built-in tables must validate")
    }

    #[test]
    fn builtin_tables_validate() {
        let tables = builtin();
        let [task, terminal, in_flight] = tables.pairs();
        assert_eq!(task.yes_len(), 4);
        assert_eq!(task.no_len(), 6);
        assert_eq!(terminal.universe(), in_flight.universe());
        assert_eq!(terminal.universe().len(), 58);
    }

    #[test]
    fn predicates_are_case_insensitive() {
        let tables = builtin();
        assert_eq!(tables.is_cycle_time_task("Story"), Ok(true));
        assert_eq!(tables.is_cycle_time_task("vulnerability"), Ok(false));
        assert_eq!(tables.is_cycle_time_status("Done"), Ok(true));
        assert_eq!(tables.is_cycle_time_status("In Progress"), Ok(false));
        assert_eq!(tables.is_in_flight("In Progress"), Ok(true));
        assert_eq!(tables.is_in_flight("to do"), Ok(false));
    }

    #[test]
    fn unknown_type_is_a_violation_not_false() {
        let err = builtin()
            .is_cycle_time_task("nonsense-type")
            .expect_err("unknown type must raise");
        assert_eq!(err.dimension, Dimension::IssueType);
        assert_eq!(err.values, vec!["nonsense-type".to_string()]);
    }

    #[test]
    fn unknown_status_is_a_violation() {
        let tables = builtin();
        assert!(tables.is_in_flight("Limbo").is_err());
        assert!(tables.is_cycle_time_status("Limbo").is_err());
    }

    #[test]
    fn cycle_time_data_requires_positive_hours() {
        let tables = builtin();
        assert!(tables.is_cycle_time_data(0.01));
        assert!(!tables.is_cycle_time_data(0.0));
    }

    #[test]
    fn overlapping_pair_is_rejected() {
        let mut lists = PolicyLists::builtin();
        lists.ignored_issue_types.push("Story".to_string());

        let err = PolicyTables::from_lists(&lists).expect_err("overlap must fail");
        assert_eq!(
            err,
            ConfigurationError::Overlap {
                pair: Pair::CycleTimeTask,
                values: vec!["story".to_string()],
            }
        );
    }

    #[test]
    fn status_universes_must_match() {
        let mut lists = PolicyLists::builtin();
        lists.non_terminal_statuses.push("parked".to_string());

        let err = PolicyTables::from_lists(&lists).expect_err("mismatch must fail");
        assert_eq!(
            err,
            ConfigurationError::Incomplete {
                missing_from_in_flight: vec!["parked".to_string()],
                missing_from_terminal: Vec::new(),
            }
        );
    }

    #[test]
    fn audit_reports_all_unknown_values_sorted() {
        let tables = builtin();
        let err = tables
            .audit(["Story", "Chore"], ["Done", "Limbo", "Abyss", "limbo"])
            .expect_err("unknown type first");
        assert_eq!(err.dimension, Dimension::IssueType);
        assert_eq!(err.values, vec!["chore".to_string()]);

        let err = tables
            .audit(["Story"], ["Done", "Limbo", "Abyss", "limbo"])
            .expect_err("unknown statuses");
        assert_eq!(err.dimension, Dimension::Status);
        assert_eq!(err.values, vec!["abyss".to_string(), "limbo".to_string()]);

        assert!(tables.audit(["Task"], ["In Review", "Done"]).is_ok());
    }

    #[test]
    fn violation_message_lists_values() {
        let err = PolicyViolation {
            dimension: Dimension::Status,
            values: vec!["abyss".to_string(), "limbo".to_string()],
        };
        assert_eq!(err.to_string(), "unexpected issue status values: abyss, limbo");
    }
}
