use chrono::{DateTime, Utc};
use comfy_table::{Cell, Table};
use kube::ResourceExt;
use serde::Serialize;
use training_core::{TrainingJob, TrainingJobStatus};

pub fn render_json<T: Serialize>(value: &T) -> Result<String, serde_json::Error> {
    colored_json::to_colored_json_auto(&serde_json::to_value(value)?)
}

pub fn print_json<T: Serialize>(value: &T) -> Result<(), serde_json::Error> {
    println!("{}", render_json(value)?);
    Ok(())
}

pub fn jobs_table(jobs: &[TrainingJob], now: DateTime<Utc>) -> Table {
    let mut table = Table::new();
    table.set_header(vec!["Name", "Namespace", "State", "Replicas", "Restarts", "Started", "Duration"]);
    for job in jobs {
        table.add_row(job_row(job, now));
    }
    table
}

fn job_row(job: &TrainingJob, now: DateTime<Utc>) -> Vec<Cell> {
    let status = job.status.clone().unwrap_or_default();
    let state = match job.state() {
        "" => "Pending",
        state => state,
    };
    vec![
        Cell::new(job.name_any()),
        Cell::new(job.namespace().unwrap_or_default()),
        Cell::new(state),
        Cell::new(format_replicas(&status, job.spec.total_replicas())),
        Cell::new(status.restart_count),
        Cell::new(format_started(status.start_time.as_deref())),
        Cell::new(format_duration(&status, now)),
    ]
}

/// `active/succeeded/failed` over the declared total.
fn format_replicas(status: &TrainingJobStatus, total: i32) -> String {
    let (active, succeeded, failed) = status
        .replica_statuses
        .values()
        .fold((0, 0, 0), |(a, s, f), r| (a + r.active, s + r.succeeded, f + r.failed));
    format!("{active}/{succeeded}/{failed} of {total}")
}

fn parse(timestamp: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(timestamp)
        .ok()
        .map(|t| t.with_timezone(&Utc))
}

fn format_started(start: Option<&str>) -> String {
    match start {
        Some(ts) => match parse(ts) {
            Some(dt) => dt.format("%Y-%m-%d %H:%M:%S UTC").to_string(),
            None => ts.to_string(),
        },
        None => "-".to_string(),
    }
}

/// Time from start to completion, or to `now` while the job runs.
fn format_duration(status: &TrainingJobStatus, now: DateTime<Utc>) -> String {
    let Some(start) = status.start_time.as_deref().and_then(parse) else {
        return "-".to_string();
    };
    let end = status.completion_time.as_deref().and_then(parse).unwrap_or(now);
    match (end - start).to_std() {
        Ok(elapsed) => {
            humantime::format_duration(std::time::Duration::from_secs(elapsed.as_secs())).to_string()
        }
        Err(_) => "-".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use training_core::ReplicaStatus;

    fn status(start: &str, completion: Option<&str>) -> TrainingJobStatus {
        TrainingJobStatus {
            start_time: Some(start.to_string()),
            completion_time: completion.map(str::to_string),
            replica_statuses: BTreeMap::from([
                (
                    "Master".to_string(),
                    ReplicaStatus {
                        succeeded: 1,
                        ..Default::default()
                    },
                ),
                (
                    "Worker".to_string(),
                    ReplicaStatus {
                        active: 1,
                        failed: 1,
                        ..Default::default()
                    },
                ),
            ]),
            ..Default::default()
        }
    }

    #[test]
    fn replicas_are_summed_across_types() {
        let s = status("2024-05-01T10:00:00Z", None);
        assert_eq!(format_replicas(&s, 3), "1/1/1 of 3");
    }

    #[test]
    fn duration_uses_completion_when_finished() {
        let now = parse("2024-05-01T12:00:00Z").unwrap();
        let done = status("2024-05-01T10:00:00Z", Some("2024-05-01T10:01:30Z"));
        assert_eq!(format_duration(&done, now), "1m 30s");

        let running = status("2024-05-01T10:00:00Z", None);
        assert_eq!(format_duration(&running, now), "2h");

        assert_eq!(format_duration(&TrainingJobStatus::default(), now), "-");
    }

    #[test]
    fn json_output_keeps_wire_names() {
        let mut job = TrainingJob::new("mnist", training_core::TrainingJobSpec::default());
        job.status = Some(status("2024-05-01T10:00:00Z", None));
        let rendered = render_json(&job).unwrap();
        // Escape codes are only emitted on a terminal; strip them regardless.
        let plain = strip_ansi(&rendered);
        let value: serde_json::Value = serde_json::from_str(&plain).unwrap();
        assert_eq!(value["metadata"]["name"], "mnist");
        assert_eq!(value["status"]["startTime"], "2024-05-01T10:00:00Z");
        assert_eq!(value["status"]["replicaStatuses"]["Worker"]["failed"], 1);

        let list = render_json(&[&job, &job]).unwrap();
        let value: serde_json::Value = serde_json::from_str(&strip_ansi(&list)).unwrap();
        assert_eq!(value.as_array().map(Vec::len), Some(2));
    }

    fn strip_ansi(s: &str) -> String {
        let mut out = String::with_capacity(s.len());
        let mut chars = s.chars();
        while let Some(c) = chars.next() {
            if c == '\u{1b}' {
                for c in chars.by_ref() {
                    if c == 'm' {
                        break;
                    }
                }
            } else {
                out.push(c);
            }
        }
        out
    }

    #[test]
    fn started_is_human_readable() {
        assert_eq!(
            format_started(Some("2024-05-01T10:00:00+00:00")),
            "2024-05-01 10:00:00 UTC"
        );
        assert_eq!(format_started(Some("yesterday")), "yesterday");
        assert_eq!(format_started(None), "-");
    }
}
