//! `dwell report`: run the batch and write the CSV artifacts.

use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::Context;
use chrono::Utc;
use clap::Args;
use dwell_core::aggregate::{GroupStatistic, Highlight};
use dwell_core::catalog::SearchWindow;
use dwell_core::config::{Config, ConfigError};
use dwell_core::fetch::JiraClient;
use dwell_core::pipeline::{self, RunOptions};
use serde::Serialize;
use tracing::info;

use crate::csv;
use crate::output::{OutputMode, pretty_kv, pretty_section, render_mode};
use crate::transport::{BASE_URL_ENV, DEFAULT_AUTH_FILE, UreqTransport, load_token};

/// Arguments for `dwell report`.
#[derive(Args, Debug, Clone, PartialEq, Eq)]
pub struct ReportArgs {
    /// Jira site URL; overrides `[jira].base_url` and `$JIRA_BASE_URL`.
    #[arg(long, value_name = "URL")]
    pub base_url: Option<String>,

    /// File holding the base64 `email:api-token` basic-auth token.
    #[arg(long, value_name = "PATH", default_value = DEFAULT_AUTH_FILE)]
    pub auth_file: PathBuf,

    /// Directory for the CSV artifacts; overrides `[report].output_dir`.
    #[arg(long, value_name = "DIR")]
    pub output_dir: Option<PathBuf>,

    /// Maximum simultaneous fetch jobs; overrides `[fetch].max_concurrency`.
    #[arg(long, value_name = "N")]
    pub max_concurrency: Option<usize>,
}

/// Paths of the two written artifacts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Artifacts {
    pub raw_csv: PathBuf,
    pub summary_csv: PathBuf,
}

#[derive(Debug, Serialize)]
struct ReportOutput<'a> {
    artifacts: Artifacts,
    boards: usize,
    sprints: usize,
    issues: usize,
    requests: usize,
    search_window: Option<&'a SearchWindow>,
    groups: &'a [GroupStatistic],
    fastest: &'a Highlight,
    min_group_size: usize,
}

/// Execute `dwell report`.
pub fn run_report(args: &ReportArgs, config: &Config, output: OutputMode) -> anyhow::Result<()> {
    // Policy problems must surface before the first request.
    let policy = config.policy_tables().map_err(dwell_core::Error::from)?;

    let base_url = resolve_base_url(
        args.base_url.as_deref(),
        config.jira.base_url.as_deref(),
        std::env::var(BASE_URL_ENV).ok(),
    )?;
    let max_concurrency = resolve_max_concurrency(args.max_concurrency, config)?;
    let token = load_token(&args.auth_file)?;

    let now = Utc::now();
    let options = RunOptions {
        max_concurrency,
        ..RunOptions::from_config(config, now)
    };

    info!(base_url = base_url.as_str(), max_concurrency, "starting report");
    let client = JiraClient::new(UreqTransport::new(&base_url, &token));
    let report = pipeline::run(&client, &policy, &options)?;

    let output_dir = args
        .output_dir
        .clone()
        .unwrap_or_else(|| config.report.output_dir.clone());
    let artifacts = write_artifacts(
        &output_dir,
        now.timestamp(),
        &csv::render_raw(&report.rows),
        &csv::render_summary(&report.groups),
    )?;

    let payload = ReportOutput {
        artifacts,
        boards: report.board_count,
        sprints: report.sprint_count,
        issues: report.issue_count,
        requests: report.request_count,
        search_window: report.search_window.as_ref(),
        groups: &report.groups,
        fastest: &report.highlight,
        min_group_size: options.min_group_size,
    };

    render_mode(output, &payload, render_report_text, render_report_pretty)
}

fn resolve_base_url(
    flag: Option<&str>,
    configured: Option<&str>,
    from_env: Option<String>,
) -> Result<String, dwell_core::Error> {
    let url = flag
        .map(str::to_string)
        .or_else(|| configured.map(str::to_string))
        .or(from_env)
        .filter(|url| !url.trim().is_empty())
        .ok_or_else(|| ConfigError::Invalid {
            key: "jira.base_url",
            reason: format!("not set; pass --base-url, set [jira].base_url, or export {BASE_URL_ENV}"),
        })?;

    if url.starts_with("https://") || url.starts_with("http://") {
        Ok(url)
    } else {
        Err(ConfigError::Invalid {
            key: "jira.base_url",
            reason: format!("'{url}' is not an http(s) URL"),
        }
        .into())
    }
}

fn resolve_max_concurrency(flag: Option<usize>, config: &Config) -> Result<usize, dwell_core::Error> {
    match flag {
        Some(0) => Err(ConfigError::Invalid {
            key: "fetch.max_concurrency",
            reason: "must be at least 1".to_string(),
        }
        .into()),
        Some(n) => Ok(n),
        None => Ok(config.fetch.max_concurrency),
    }
}

/// Write both artifacts. Called only once the whole run has succeeded.
fn write_artifacts(dir: &Path, stamp: i64, raw: &str, summary: &str) -> anyhow::Result<Artifacts> {
    std::fs::create_dir_all(dir)
        .with_context(|| format!("Failed to create output directory {}", dir.display()))?;

    let artifacts = Artifacts {
        raw_csv: dir.join(format!("time-in-status-raw-{stamp}.csv")),
        summary_csv: dir.join(format!("time-in-status-summary-{stamp}.csv")),
    };

    std::fs::write(&artifacts.raw_csv, raw)
        .with_context(|| format!("Failed to write {}", artifacts.raw_csv.display()))?;
    std::fs::write(&artifacts.summary_csv, summary)
        .with_context(|| format!("Failed to write {}", artifacts.summary_csv.display()))?;

    info!(raw = %artifacts.raw_csv.display(), summary = %artifacts.summary_csv.display(), "wrote artifacts");
    Ok(artifacts)
}

fn project_label(group: &GroupStatistic) -> &str {
    group.project_name.as_deref().unwrap_or("(no project)")
}

fn render_report_text(payload: &ReportOutput<'_>, w: &mut dyn Write) -> std::io::Result<()> {
    writeln!(w, "raw_csv={}", payload.artifacts.raw_csv.display())?;
    writeln!(w, "summary_csv={}", payload.artifacts.summary_csv.display())?;
    writeln!(
        w,
        "boards={} sprints={} issues={} requests={}",
        payload.boards, payload.sprints, payload.issues, payload.requests
    )?;
    for group in payload.groups {
        writeln!(
            w,
            "group project={:?} n={} p85={} p50={} avg={}",
            project_label(group),
            group.count,
            group.p85,
            group.p50,
            group.mean
        )?;
    }
    for (rank, group) in payload.fastest.groups.iter().enumerate() {
        writeln!(
            w,
            "fastest rank={} project={:?} p85={}",
            rank + 1,
            project_label(group),
            group.p85
        )?;
    }
    if payload.fastest.shortfall > 0 {
        writeln!(w, "fastest_shortfall={}", payload.fastest.shortfall)?;
    }
    Ok(())
}

fn render_report_pretty(payload: &ReportOutput<'_>, w: &mut dyn Write) -> std::io::Result<()> {
    pretty_section(w, "Time in status")?;
    pretty_kv(w, "Raw data", payload.artifacts.raw_csv.display().to_string())?;
    pretty_kv(w, "Summary", payload.artifacts.summary_csv.display().to_string())?;
    pretty_kv(w, "Boards", payload.boards.to_string())?;
    pretty_kv(w, "Sprints", payload.sprints.to_string())?;
    pretty_kv(w, "Issues", payload.issues.to_string())?;
    pretty_kv(w, "Requests", payload.requests.to_string())?;
    if let Some(window) = payload.search_window {
        pretty_kv(
            w,
            "Kanban window",
            format!(
                "{} .. {}",
                window.start.format("%Y-%m-%d"),
                window.end.format("%Y-%m-%d")
            ),
        )?;
    }

    writeln!(w)?;
    pretty_section(w, "In-flight hours by project")?;
    if payload.groups.is_empty() {
        writeln!(w, "No eligible issues.")?;
    }
    for group in payload.groups {
        writeln!(
            w,
            "{:<32} n={:<4} p85={:<8} p50={:<8} avg={}",
            project_label(group),
            group.count,
            group.p85,
            group.p50,
            group.mean
        )?;
    }

    writeln!(w)?;
    pretty_section(w, "Fastest teams (lowest p85)")?;
    for (rank, group) in payload.fastest.groups.iter().enumerate() {
        writeln!(w, "{}. {} ({} hours)", rank + 1, project_label(group), group.p85)?;
    }
    if payload.fastest.shortfall > 0 {
        writeln!(
            w,
            "Only {} project(s) have at least {} eligible issues.",
            payload.fastest.groups.len(),
            payload.min_group_size
        )?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use dwell_core::ErrorCode;

    fn group(name: &str, p85: f64) -> GroupStatistic {
        GroupStatistic {
            project_name: Some(name.to_string()),
            count: 12,
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
    fn base_url_precedence() {
        let url = resolve_base_url(
            Some("https://flag.example"),
            Some("https://config.example"),
            Some("https://env.example".to_string()),
        )
        .expect("flag");
        assert_eq!(url, "https://flag.example");

        let url = resolve_base_url(None, Some("https://config.example"), None).expect("config");
        assert_eq!(url, "https://config.example");

        let url = resolve_base_url(None, None, Some("https://env.example".to_string())).expect("env");
        assert_eq!(url, "https://env.example");
    }

    #[test]
    fn missing_base_url_is_a_config_error() {
        let err = resolve_base_url(None, None, None).expect_err("missing");
        assert_eq!(err.code(), ErrorCode::InvalidConfigValue);

        let err = resolve_base_url(Some("acme.atlassian.net"), None, None).expect_err("no scheme");
        assert!(err.to_string().contains("not an http(s) URL"));
    }

    #[test]
    fn zero_concurrency_flag_is_rejected() {
        let config = Config::default();
        assert!(resolve_max_concurrency(Some(0), &config).is_err());
        assert_eq!(resolve_max_concurrency(Some(4), &config).expect("flag"), 4);
        assert_eq!(resolve_max_concurrency(None, &config).expect("default"), 10);
    }

    #[test]
    fn artifacts_are_written_with_shared_stamp() {
        let dir = tempfile::tempdir().expect("tempdir");
        let out = dir.path().join("nested/output");

        let artifacts = write_artifacts(&out, 1_718_841_600, "raw\n", "summary\n").expect("write");
        assert!(artifacts.raw_csv.ends_with("time-in-status-raw-1718841600.csv"));
        assert!(artifacts.summary_csv.ends_with("time-in-status-summary-1718841600.csv"));
        assert_eq!(std::fs::read_to_string(&artifacts.raw_csv).expect("raw"), "raw\n");
        assert_eq!(std::fs::read_to_string(&artifacts.summary_csv).expect("summary"), "summary\n");
    }

    #[test]
    fn pretty_report_notes_highlight_shortfall() {
        let groups = vec![group("Payments", 20.5)];
        let fastest = Highlight {
            groups: groups.clone(),
            shortfall: 2,
        };
        let payload = ReportOutput {
            artifacts: Artifacts {
                raw_csv: PathBuf::from("output/raw.csv"),
                summary_csv: PathBuf::from("output/summary.csv"),
            },
            boards: 2,
            sprints: 5,
            issues: 40,
            requests: 9,
            search_window: None,
            groups: &groups,
            fastest: &fastest,
            min_group_size: 10,
        };

        let mut buf = Vec::new();
        render_report_pretty(&payload, &mut buf).expect("render");
        let text = String::from_utf8(buf).expect("utf8");
        assert!(text.contains("1. Payments (20.5 hours)"));
        assert!(text.contains("Only 1 project(s) have at least 10 eligible issues."));
        assert!(!text.contains("2. "));

        let mut buf = Vec::new();
        render_report_text(&payload, &mut buf).expect("render");
        let text = String::from_utf8(buf).expect("utf8");
        assert!(text.contains("fastest rank=1 project=\"Payments\" p85=20.5"));
        assert!(text.contains("fastest_shortfall=2"));
    }
}
