//! Human and JSON renderings of command results

use serde::Serialize;

use dumpvault_core::{BackupJob, ScheduleDefinition, StatusSnapshot};
use dumpvault_engine::{CleanupReport, format_bytes};

use crate::commands::CliError;

pub struct Output {
    json: bool,
}

impl Output {
    pub fn new(json: bool) -> Self {
        Self { json }
    }

    fn emit<T: Serialize>(&self, value: &T, human: impl FnOnce() -> String) -> Result<(), CliError> {
        if self.json {
            println!("{}", serde_json::to_string_pretty(value)?);
        } else {
            println!("{}", human());
        }
        Ok(())
    }

    pub fn job(&self, job: &BackupJob) -> Result<(), CliError> {
        self.emit(job, || job_detail(job))
    }

    pub fn jobs(&self, jobs: &[BackupJob]) -> Result<(), CliError> {
        self.emit(&jobs, || {
            if jobs.is_empty() {
                return "no backups".to_string();
            }
            jobs.iter().map(job_line).collect::<Vec<_>>().join("\n")
        })
    }

    pub fn status(&self, snapshot: &StatusSnapshot) -> Result<(), CliError> {
        self.emit(snapshot, || {
            let mut line = format!(
                "job {} {}: {}",
                snapshot.job_id, snapshot.operation, snapshot.state
            );
            if let Some(progress) = snapshot.progress {
                line.push_str(&format!(" ({progress}%)"));
            }
            if let Some(elapsed) = snapshot.elapsed_secs {
                line.push_str(&format!(", {elapsed}s elapsed"));
            }
            if let Some(size) = snapshot.file_size {
                line.push_str(&format!(", {}", format_bytes(size)));
            }
            if let Some(error) = &snapshot.error {
                line.push_str(&format!("\n  error: {error}"));
            }
            line
        })
    }

    pub fn schedule(&self, schedule: &ScheduleDefinition) -> Result<(), CliError> {
        self.emit(schedule, || schedule_line(schedule))
    }

    pub fn schedules(&self, schedules: &[ScheduleDefinition]) -> Result<(), CliError> {
        self.emit(&schedules, || {
            if schedules.is_empty() {
                return "no schedules".to_string();
            }
            schedules
                .iter()
                .map(schedule_line)
                .collect::<Vec<_>>()
                .join("\n")
        })
    }

    pub fn cleanup(&self, report: &CleanupReport) -> Result<(), CliError> {
        #[derive(Serialize)]
        struct Report<'a> {
            deleted: usize,
            errors: &'a [String],
        }
        let value = Report {
            deleted: report.deleted_count,
            errors: &report.errors,
        };
        self.emit(&value, || {
            let mut text = format!("{} expired backup(s) deleted", report.deleted_count);
            for error in &report.errors {
                text.push_str(&format!("\n  error: {error}"));
            }
            text
        })
    }

    pub fn message(&self, key: &str, text: String) -> Result<(), CliError> {
        let mut value = serde_json::Map::new();
        value.insert(key.to_string(), serde_json::Value::String(text.clone()));
        self.emit(&value, || text)
    }
}

fn job_line(job: &BackupJob) -> String {
    let size = job.file_size.map(format_bytes).unwrap_or_else(|| "-".to_string());
    format!(
        "{:>6}  {:<12} {:<10} {:<9} {:>10}  {}",
        job.id.get(),
        job.kind.as_str(),
        job.database.as_str(),
        job.status.as_str(),
        size,
        job.created_at.format("%Y-%m-%d %H:%M:%S")
    )
}

fn job_detail(job: &BackupJob) -> String {
    let mut text = job_line(job);
    text.push_str(&format!("\n  file: {}", job.file_path.display()));
    if !job.tables.is_empty() {
        let tables: Vec<&str> = job.tables.iter().map(|t| t.as_str()).collect();
        text.push_str(&format!("\n  tables: {}", tables.join(", ")));
    }
    if let Some(remote) = &job.remote_path {
        text.push_str(&format!("\n  remote: {remote}"));
    }
    if let Some(error) = &job.error {
        text.push_str(&format!("\n  error: {error}"));
    }
    text
}

fn schedule_line(schedule: &ScheduleDefinition) -> String {
    let tables: Vec<&str> = schedule.tables.iter().map(|t| t.as_str()).collect();
    format!(
        "{:>4}  {:<8} {:<12} {:<10} {:<20} {}",
        schedule.id.get(),
        if schedule.enabled { "enabled" } else { "disabled" },
        schedule.kind.as_str(),
        schedule.database.as_str(),
        schedule.cron.as_str(),
        tables.join(",")
    )
}
