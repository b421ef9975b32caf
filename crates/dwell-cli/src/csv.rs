//! CSV rendering for the raw and summary artifacts.
//!
//! Fields containing a comma, quote, or line break are quoted with inner
//! quotes doubled. Timestamps are RFC 3339, missing values are empty.

use chrono::{DateTime, SecondsFormat, Utc};
use dwell_core::aggregate::{GroupStatistic, IssueRow};

pub const RAW_HEADER: [&str; 19] = [
    "board_id",
    "project_name",
    "sprint_id",
    "sprint_name",
    "sprint_created_date",
    "sprint_complete_date",
    "sprint_start_date",
    "sprint_end_date",
    "issue_id",
    "issue_key",
    "issue_created",
    "epic_key",
    "issue_type",
    "issue_status",
    "is_cycle_time_task",
    "is_cycle_time_status",
    "is_cycle_time_data",
    "in_flight_hours",
    "raw_sums_payload",
];

pub const SUMMARY_HEADER: [&str; 11] = [
    "project_name",
    "in_flight_hours_p85",
    "earliest_sprint_start_date",
    "latest_sprint_end_date",
    "in_flight_hours_n",
    "in_flight_hours_avg",
    "in_flight_hours_p75",
    "in_flight_hours_p50",
    "in_flight_hours_p25",
    "in_flight_hours_min",
    "in_flight_hours_max",
];

fn escape(field: &str) -> String {
    if field.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", field.replace('"', "\"\""))
    } else {
        field.to_string()
    }
}

fn write_record<S: AsRef<str>>(out: &mut String, fields: &[S]) {
    let line: Vec<String> = fields.iter().map(|field| escape(field.as_ref())).collect();
    out.push_str(&line.join(","));
    out.push('\n');
}

fn opt<T: ToString>(value: Option<T>) -> String {
    value.map(|v| v.to_string()).unwrap_or_default()
}

/// Hours always carry a decimal point (`25.0`, not `25`).
fn decimal(value: f64) -> String {
    format!("{value:?}")
}

fn timestamp(value: Option<DateTime<Utc>>) -> String {
    value
        .map(|ts| ts.to_rfc3339_opts(SecondsFormat::Millis, true))
        .unwrap_or_default()
}

/// One row per issue, in the order given.
pub fn render_raw(rows: &[IssueRow]) -> String {
    let mut out = String::new();
    write_record(&mut out, &RAW_HEADER);

    for row in rows {
        write_record(
            &mut out,
            &[
                opt(row.board_id),
                opt(row.project_name.as_deref()),
                opt(row.sprint_id),
                opt(row.sprint_name.as_deref()),
                timestamp(row.sprint_created),
                timestamp(row.sprint_complete),
                timestamp(row.sprint_start),
                timestamp(row.sprint_end),
                row.issue_id.to_string(),
                row.issue_key.clone(),
                timestamp(Some(row.issue_created)),
                opt(row.epic_key.as_deref()),
                row.issue_type.clone(),
                row.issue_status.clone(),
                row.is_cycle_time_task.to_string(),
                row.is_cycle_time_status.to_string(),
                row.is_cycle_time_data.to_string(),
                decimal(row.in_flight_hours),
                row.durations.to_json(),
            ],
        );
    }

    out
}

/// One row per project group.
pub fn render_summary(groups: &[GroupStatistic]) -> String {
    let mut out = String::new();
    write_record(&mut out, &SUMMARY_HEADER);

    for group in groups {
        write_record(
            &mut out,
            &[
                opt(group.project_name.as_deref()),
                decimal(group.p85),
                timestamp(group.earliest_window_start),
                timestamp(group.latest_window_end),
                group.count.to_string(),
                decimal(group.mean),
                decimal(group.p75),
                decimal(group.p50),
                decimal(group.p25),
                decimal(group.min),
                decimal(group.max),
            ],
        );
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use dwell_core::reducer::DurationMap;

    fn row() -> IssueRow {
        IssueRow {
            board_id: Some(1),
            project_name: Some("Payments, Core".to_string()),
            sprint_id: Some(10),
            sprint_name: Some("Sprint \"10\"".to_string()),
            sprint_created: None,
            sprint_complete: None,
            sprint_start: Some(Utc.with_ymd_and_hms(2024, 5, 27, 9, 0, 0).single().expect("date")),
            sprint_end: None,
            issue_id: 10001,
            issue_key: "PAY-1".to_string(),
            issue_created: Utc.with_ymd_and_hms(2024, 6, 3, 9, 0, 0).single().expect("date"),
            epic_key: None,
            issue_type: "Story".to_string(),
            issue_status: "Done".to_string(),
            is_cycle_time_task: true,
            is_cycle_time_status: true,
            is_cycle_time_data: true,
            in_flight_hours: 25.0,
            durations: DurationMap::new(),
        }
    }

    #[test]
    fn escape_quotes_only_when_needed() {
        assert_eq!(escape("plain"), "plain");
        assert_eq!(escape("a,b"), "\"a,b\"");
        assert_eq!(escape("say \"hi\""), "\"say \"\"hi\"\"\"");
        assert_eq!(escape("two\nlines"), "\"two\nlines\"");
    }

    #[test]
    fn raw_rows_follow_the_header() {
        let csv = render_raw(&[row()]);
        let mut lines = csv.lines();
        assert_eq!(lines.next(), Some(RAW_HEADER.join(",").as_str()));
        assert_eq!(
            lines.next(),
            Some(
                "1,\"Payments, Core\",10,\"Sprint \"\"10\"\"\",,,2024-05-27T09:00:00.000Z,,\
                 10001,PAY-1,2024-06-03T09:00:00.000Z,,Story,Done,true,true,true,25.0,{}"
            )
        );
        assert_eq!(lines.next(), None);
    }

    #[test]
    fn summary_hours_always_have_a_decimal_point() {
        let group = GroupStatistic {
            project_name: Some("Payments".to_string()),
            count: 1,
            mean: 25.0,
            p25: 25.0,
            p50: 25.0,
            p75: 25.0,
            p85: 25.0,
            min: 25.0,
            max: 25.0,
            earliest_window_start: None,
            latest_window_end: None,
        };
        let csv = render_summary(&[group]);
        assert_eq!(
            csv.lines().nth(1),
            Some("Payments,25.0,,,1,25.0,25.0,25.0,25.0,25.0,25.0")
        );
        assert_eq!(decimal(0.0), "0.0");
        assert_eq!(decimal(12.34), "12.34");
    }

    #[test]
    fn summary_with_no_groups_is_header_only() {
        assert_eq!(render_summary(&[]), format!("{}\n", SUMMARY_HEADER.join(",")));
    }
}
