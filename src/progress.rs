//! Run progress reporting.
//!
//! Reports which lesson is being processed and how it ended, so a long batch
//! is visibly moving. Progress goes to **stderr** so stdout stays reserved
//! for the run summary.

use std::io::Write;

/// A single progress event for a generation run.
#[derive(Clone, Debug)]
pub enum RunProgressEvent {
    /// Catalog scan finished; `total` lessons are in scope.
    Scoped { kind: String, total: u64 },
    /// Lesson `n` of `total` entered a new state.
    Lesson {
        code: String,
        state: &'static str,
        n: u64,
        total: u64,
    },
}

/// Reports run progress. Implementations write to stderr (human or JSON).
pub trait RunProgressReporter: Send + Sync {
    fn report(&self, event: RunProgressEvent);
}

/// Human-friendly progress on stderr: `"readnow  C3.2.9  rendered  4 / 12"`.
pub struct StderrProgress;

impl RunProgressReporter for StderrProgress {
    fn report(&self, event: RunProgressEvent) {
        let line = match &event {
            RunProgressEvent::Scoped { kind, total } => {
                format!("{}  {} lessons in scope\n", kind, format_number(*total))
            }
            RunProgressEvent::Lesson {
                code,
                state,
                n,
                total,
            } => format!(
                "{:<10} {:<10} {} / {}\n",
                code,
                state,
                format_number(*n),
                format_number(*total)
            ),
        };
        let mut stderr = std::io::stderr().lock();
        let _ = stderr.write_all(line.as_bytes());
        let _ = stderr.flush();
    }
}

/// Machine-readable progress: one JSON object per line on stderr.
pub struct JsonProgress;

impl RunProgressReporter for JsonProgress {
    fn report(&self, event: RunProgressEvent) {
        let obj = match &event {
            RunProgressEvent::Scoped { kind, total } => serde_json::json!({
                "event": "scoped",
                "kind": kind,
                "total": total
            }),
            RunProgressEvent::Lesson {
                code,
                state,
                n,
                total,
            } => serde_json::json!({
                "event": "lesson",
                "code": code,
                "state": state,
                "n": n,
                "total": total
            }),
        };
        if let Ok(line) = serde_json::to_string(&obj) {
            let mut stderr = std::io::stderr().lock();
            let _ = writeln!(stderr, "{}", line);
            let _ = stderr.flush();
        }
    }
}

pub struct NoProgress;

impl RunProgressReporter for NoProgress {
    fn report(&self, _event: RunProgressEvent) {}
}

pub(crate) fn format_number(n: u64) -> String {
    let s = n.to_string();
    let mut result = String::with_capacity(s.len() + s.len() / 3);
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
    /// Human progress when stderr is a TTY, otherwise off.
    pub fn default_for_tty() -> Self {
        if atty::is(atty::Stream::Stderr) {
            ProgressMode::Human
        } else {
            ProgressMode::Off
        }
    }

    pub fn reporter(&self) -> Box<dyn RunProgressReporter> {
        match self {
            ProgressMode::Off => Box::new(NoProgress),
            ProgressMode::Human => Box::new(StderrProgress),
            ProgressMode::Json => Box::new(JsonProgress),
        }
    }
}
