use std::io::{self, Write};

use serde::Serialize;

use crate::orchestrator::{ProgressEvent, ProgressSink, RunReport, TaskStatus};
use crate::safety::Fingerprint;

#[derive(Debug, Clone, Copy)]
pub enum OutputMode {
    Text,
    Json,
}

pub struct JsonOutput;

impl JsonOutput {
    pub fn print_report(report: &RunReport) -> io::Result<()> {
        Self::print_json(report)
    }

    pub fn print_fingerprint(fingerprint: &Fingerprint, allow_listed: bool) -> io::Result<()> {
        #[derive(Serialize)]
        struct FingerprintOutput<'a> {
            fingerprint: &'a Fingerprint,
            allow_listed: bool,
        }
        Self::print_json(&FingerprintOutput {
            fingerprint,
            allow_listed,
        })
    }

    fn print_json<T: Serialize>(value: &T) -> io::Result<()> {
        let json = serde_json::to_string_pretty(value).map_err(io::Error::other)?;
        let mut stdout = io::stdout();
        stdout.write_all(json.as_bytes())?;
        stdout.write_all(b"\n")?;
        Ok(())
    }
}

impl ProgressSink for JsonOutput {
    fn event(&self, _event: ProgressEvent) {}
}

pub struct TextOutput;

impl TextOutput {
    pub fn print_summary(report: &RunReport) -> io::Result<()> {
        writeln!(
            io::stdout(),
            "{} downloaded, {} skipped, {} failed",
            report.count(TaskStatus::Downloaded),
            report.count(TaskStatus::Skipped),
            report.count(TaskStatus::Failed)
        )
    }

    pub fn print_plan(report: &RunReport) -> io::Result<()> {
        let mut stdout = io::stdout().lock();
        for task in &report.tasks {
            let action = match task.status {
                TaskStatus::Skipped => "skip",
                _ => "download",
            };
            writeln!(
                stdout,
                "{}-{:02}  {:<8}  {}",
                task.year, task.month, action, task.path
            )?;
        }
        writeln!(
            stdout,
            "{} to download, {} already present",
            report.count(TaskStatus::Pending),
            report.count(TaskStatus::Skipped)
        )
    }

    pub fn print_fingerprint(fingerprint: &Fingerprint, allow_listed: bool) -> io::Result<()> {
        let status = if allow_listed {
            "allow-listed"
        } else {
            "not allow-listed"
        };
        writeln!(io::stdout(), "{fingerprint}  {status}")
    }
}

impl ProgressSink for TextOutput {
    fn event(&self, event: ProgressEvent) {
        let line = match event {
            ProgressEvent::Skipped { task } => format!("{task}  skipped (already present)"),
            ProgressEvent::Succeeded {
                task,
                attempt,
                elapsed,
            } => format!(
                "{task}  downloaded (attempt {}, {:.1}s)",
                attempt + 1,
                elapsed.as_secs_f64()
            ),
            ProgressEvent::Exhausted { task, attempts } => {
                format!("{task}  failed after {attempts} attempts")
            }
            ProgressEvent::Started { .. } | ProgressEvent::AttemptFailed { .. } => return,
        };
        let _ = writeln!(io::stdout(), "{line}");
    }
}
