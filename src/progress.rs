//! Publish progress reporting.
//!
//! Renders [`PublishProgressEvent`]s from the pipeline so a CI log shows
//! which connector and release is being processed and how the run ended.
//! Progress is emitted on **stderr** so stdout remains parseable for scripts.

use std::io::Write;

use hub_publish_core::progress::{NoProgress, PublishProgressEvent, PublishProgressReporter};

/// Human-friendly progress on stderr: "publish acme/db @ v1.0.0  building new_version".
pub struct StderrProgress;

impl PublishProgressReporter for StderrProgress {
    fn report(&self, event: PublishProgressEvent) {
        let line = match &event {
            PublishProgressEvent::Classified { changes, releases } => format!(
                "publish  classified {} changes ({} releases)\n",
                format_number(*changes as u64),
                format_number(*releases as u64)
            ),
            PublishProgressEvent::Building {
                bucket,
                identity,
                version,
            } => {
                let bucket = serde_json::to_value(bucket)
                    .ok()
                    .and_then(|v| v.as_str().map(str::to_string))
                    .unwrap_or_default();
                match version {
                    Some(v) => format!("publish {} @ {}  building {}\n", identity, v, bucket),
                    None => format!("publish {}  building {}\n", identity, bucket),
                }
            }
            PublishProgressEvent::ReleaseSkipped {
                identity,
                version,
                generation,
            } => format!(
                "publish {} @ {}  skipped ({} packaging)\n",
                identity, version, generation
            ),
            PublishProgressEvent::ReleaseFailed {
                identity,
                version,
                error,
            } => format!("publish {} @ {}  FAILED: {}\n", identity, version, error),
            PublishProgressEvent::Submitting { rows, versions } => format!(
                "publish  submitting {} rows ({} versions)\n",
                format_number(*rows as u64),
                format_number(*versions as u64)
            ),
            PublishProgressEvent::Committed { rows } => {
                format!("publish  committed {} rows\n", format_number(*rows as u64))
            }
            PublishProgressEvent::RolledBack {
                attempted,
                deleted,
                failed,
            } => format!(
                "publish  rolled back: deleted {} of {} uploaded packages ({} failed)\n",
                deleted, attempted, failed
            ),
        };
        let _ = std::io::stderr().lock().write_all(line.as_bytes());
        let _ = std::io::stderr().lock().flush();
    }
}

/// Machine-readable progress: one JSON object per line on stderr.
pub struct JsonProgress;

impl PublishProgressReporter for JsonProgress {
    fn report(&self, event: PublishProgressEvent) {
        if let Ok(line) = serde_json::to_string(&event) {
            let _ = writeln!(std::io::stderr().lock(), "{}", line);
            let _ = std::io::stderr().lock().flush();
        }
    }
}

fn format_number(n: u64) -> String {
    let s = n.to_string();
    let mut result = String::with_capacity(s.len() + (s.len() - 1) / 3);
    for (i, c) in s.chars().rev().enumerate() {
        if i > 0 && i % 3 == 0 {
            result.push(',');
        }
        result.push(c);
    }
    result.chars().rev().collect()
}

/// Progress mode for the CLI: off, human (stderr), or JSON (stderr).
#[derive(Clone, Copy, Debug, Eq, PartialEq, clap::ValueEnum)]
pub enum ProgressMode {
    Off,
    Human,
    Json,
}

impl ProgressMode {
    /// Default: human progress when stderr is a TTY, otherwise off.
    pub fn default_for_tty() -> Self {
        if atty::is(atty::Stream::Stderr) {
            ProgressMode::Human
        } else {
            ProgressMode::Off
        }
    }

    pub fn reporter(&self) -> Box<dyn PublishProgressReporter> {
        match self {
            ProgressMode::Off => Box::new(NoProgress),
            ProgressMode::Human => Box::new(StderrProgress),
            ProgressMode::Json => Box::new(JsonProgress),
        }
    }
}
