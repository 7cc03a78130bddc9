//! Run report: final status, exit code and the human-readable summary

use crate::core::error::PipelineError;
use crate::orchestration::publish_orchestrator::{PairOutcome, PublishRecord};
use chrono::{DateTime, Utc};
use std::time::Duration;

/// Exit code for a successful run
pub const EXIT_SUCCESS: i32 = 0;
/// Exit code when the driver errored or the build stage aborted
pub const EXIT_FAILURE: i32 = 1;
/// Exit code for partial success under `--strict`
pub const EXIT_PARTIAL: i32 = 2;
/// Exit code after Ctrl-C
pub const EXIT_INTERRUPTED: i32 = 130;

/// Final status of a run
#[derive(Debug, Clone)]
pub enum RunStatus {
    /// Every pair was published and granted
    CompleteSuccess,
    /// The matrix ran to completion but some pairs failed
    PartialSuccess { failed: usize },
    /// A fatal error stopped the run before anything was published
    AbortedDuringBuild { error: PipelineError },
    /// Ctrl-C arrived while pairs were in flight; `unfinished` pairs have no record
    InterruptedDuringPublish { unfinished: usize },
}

/// Everything a run produced
#[derive(Debug, Clone)]
pub struct RunReport {
    pub status: RunStatus,
    pub records: Vec<PublishRecord>,
    pub started_at: DateTime<Utc>,
    pub duration: Duration,
}

impl RunReport {
    pub fn from_records(records: Vec<PublishRecord>, started_at: DateTime<Utc>) -> Self {
        let failed = records.iter().filter(|r| !r.is_success()).count();
        let status = if failed == 0 {
            RunStatus::CompleteSuccess
        } else {
            RunStatus::PartialSuccess { failed }
        };

        Self {
            status,
            records,
            started_at,
            duration: elapsed(started_at),
        }
    }

    pub fn aborted(error: PipelineError, started_at: DateTime<Utc>) -> Self {
        Self {
            status: RunStatus::AbortedDuringBuild { error },
            records: Vec::new(),
            started_at,
            duration: elapsed(started_at),
        }
    }

    /// Report of a publish stage cut short, keeping the pairs that finished
    pub fn interrupted(
        records: Vec<PublishRecord>,
        unfinished: usize,
        started_at: DateTime<Utc>,
    ) -> Self {
        Self {
            status: RunStatus::InterruptedDuringPublish { unfinished },
            records,
            started_at,
            duration: elapsed(started_at),
        }
    }

    pub fn succeeded(&self) -> impl Iterator<Item = &PublishRecord> {
        self.records.iter().filter(|r| r.is_success())
    }

    pub fn failed(&self) -> impl Iterator<Item = &PublishRecord> {
        self.records.iter().filter(|r| !r.is_success())
    }

    /// Process exit code; partial success only fails the process when `strict`
    pub fn exit_code(&self, strict: bool) -> i32 {
        match self.status {
            RunStatus::CompleteSuccess => EXIT_SUCCESS,
            RunStatus::PartialSuccess { .. } if strict => EXIT_PARTIAL,
            RunStatus::PartialSuccess { .. } => EXIT_SUCCESS,
            RunStatus::AbortedDuringBuild { .. } => EXIT_FAILURE,
            RunStatus::InterruptedDuringPublish { .. } => EXIT_INTERRUPTED,
        }
    }

    /// One-line status label
    pub fn status_line(&self) -> String {
        match &self.status {
            RunStatus::CompleteSuccess => "✅ COMPLETE SUCCESS".to_string(),
            RunStatus::PartialSuccess { failed } => {
                format!("⚠️  PARTIAL SUCCESS ({} of {} pairs failed)", failed, self.records.len())
            }
            RunStatus::AbortedDuringBuild { error } => {
                format!("❌ ABORTED DURING BUILD [{}]", error.code())
            }
            RunStatus::InterruptedDuringPublish { unfinished } => {
                format!("⏹️  INTERRUPTED DURING PUBLISH ({} pairs unfinished)", unfinished)
            }
        }
    }

    /// Print the run summary
    pub fn print_summary(&self) {
        println!("\n{}", "=".repeat(60));
        println!("📊 Layer Publish Summary");
        println!("{}", "=".repeat(60));
        println!(
            "Started: {} ({:.1}s)",
            self.started_at.format("%Y-%m-%d %H:%M:%S UTC"),
            self.duration.as_secs_f64()
        );

        if let RunStatus::AbortedDuringBuild { error } = &self.status {
            println!("\n❌ {}", error);
            for action in error.suggested_actions() {
                println!("   - {}", action);
            }
        }

        let succeeded: Vec<_> = self.succeeded().collect();
        if !self.records.is_empty() {
            println!("\n✅ Succeeded: {}", succeeded.len());
            for record in &succeeded {
                println!(
                    "   - {} {} → version {}{}",
                    record.region,
                    record.variant,
                    record.version_identifier().unwrap_or("-"),
                    attempts_suffix(record)
                );
            }

            let failed: Vec<_> = self.failed().collect();
            println!("\n❌ Failed: {}", failed.len());
            for record in &failed {
                println!("   - {} {}: {}", record.region, record.variant, describe(record));
            }
        }

        if let RunStatus::InterruptedDuringPublish { unfinished } = &self.status {
            println!("\n⏹️  Unfinished: {}", unfinished);
            println!("   - An unfinished pair may still have created a version remotely");
        }

        println!("\n{}", "=".repeat(60));
        println!("Overall Status: {}", self.status_line());
        println!("{}\n", "=".repeat(60));
    }
}

fn elapsed(started_at: DateTime<Utc>) -> Duration {
    (Utc::now() - started_at).to_std().unwrap_or_default()
}

fn attempts_suffix(record: &PublishRecord) -> String {
    if record.publish_attempts > 1 {
        format!(" ({} attempts)", record.publish_attempts)
    } else {
        String::new()
    }
}

fn describe(record: &PublishRecord) -> String {
    match &record.outcome {
        PairOutcome::Granted { .. } => "granted".to_string(),
        PairOutcome::PublishFailed { error } => error.to_string(),
        PairOutcome::GrantFailed { version, error } => {
            format!("version {} published but not granted: {}", version, error)
        }
    }
}
