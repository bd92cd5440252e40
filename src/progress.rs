//! Scan progress reporting.
//!
//! Reports observable progress during `docsync scan` and `docsync reindex`
//! so users see what is being walked, how many files are left, and what
//! happened to each one. Progress is emitted on **stderr** so stdout
//! remains parseable for scripts.

use std::io::Write;

/// A single progress event for a scan.
#[derive(Clone, Debug)]
pub enum ScanProgressEvent {
    /// Walking the scan root (total unknown).
    Discovering { root: String },
    /// File `n` of `total` was handled with the given outcome.
    File {
        n: u64,
        total: u64,
        filename: String,
        outcome: &'static str,
    },
    /// The scan finished or stopped early.
    Finished { new: u64, skipped: u64, failed: u64 },
}

/// Reports scan progress. Implementations write to stderr (human or JSON).
pub trait ScanProgressReporter: Send + Sync {
    /// Emit a progress event. Called from the scan loop.
    fn report(&self, event: ScanProgressEvent);
}

/// Human-friendly progress on stderr: "scan  1,234 / 5,000  report.pdf  new".
pub struct StderrProgress;

impl ScanProgressReporter for StderrProgress {
    fn report(&self, event: ScanProgressEvent) {
        let line = match &event {
            ScanProgressEvent::Discovering { root } => format!("scan {}  discovering...\n", root),
            ScanProgressEvent::File {
                n,
                total,
                filename,
                outcome,
            } => format!(
                "scan  {} / {}  {}  {}\n",
                format_number(*n),
                format_number(*total),
                filename,
                outcome
            ),
            ScanProgressEvent::Finished {
                new,
                skipped,
                failed,
            } => format!(
                "scan done  {} new, {} skipped, {} failed\n",
                format_number(*new),
                format_number(*skipped),
                format_number(*failed)
            ),
        };
        let mut stderr = std::io::stderr().lock();
        let _ = stderr.write_all(line.as_bytes());
        let _ = stderr.flush();
    }
}

/// Machine-readable progress: one JSON object per line on stderr.
pub struct JsonProgress;

impl JsonProgress {
    fn to_json(event: &ScanProgressEvent) -> serde_json::Value {
        match event {
            ScanProgressEvent::Discovering { root } => serde_json::json!({
                "event": "progress",
                "phase": "discovering",
                "root": root
            }),
            ScanProgressEvent::File {
                n,
                total,
                filename,
                outcome,
            } => serde_json::json!({
                "event": "progress",
                "phase": "scanning",
                "n": n,
                "total": total,
                "file": filename,
                "outcome": outcome
            }),
            ScanProgressEvent::Finished {
                new,
                skipped,
                failed,
            } => serde_json::json!({
                "event": "done",
                "new": new,
                "skipped": skipped,
                "failed": failed
            }),
        }
    }
}

impl ScanProgressReporter for JsonProgress {
    fn report(&self, event: ScanProgressEvent) {
        if let Ok(line) = serde_json::to_string(&Self::to_json(&event)) {
            let mut stderr = std::io::stderr().lock();
            let _ = writeln!(stderr, "{}", line);
            let _ = stderr.flush();
        }
    }
}

/// No-op reporter when progress is disabled.
pub struct NoProgress;

impl ScanProgressReporter for NoProgress {
    fn report(&self, _event: ScanProgressEvent) {}
}

fn format_number(n: u64) -> String {
    let s = n.to_string();
    let mut result = String::with_capacity(s.len() + (s.len() - 1) / 3);
    let chars: Vec<char> = s.chars().rev().collect();
    for (i, c) in chars.iter().enumerate() {
        if i > 0 && i % 3 == 0 {
            result.push(',');
        }
        result.push(*c);
    }
    result.chars().rev().collect()
}

/// Progress mode for the CLI: off, human (stderr), or JSON (stderr).
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ProgressMode {
    Off,
    Human,
    Json,
}

impl std::str::FromStr for ProgressMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "off" => Ok(ProgressMode::Off),
            "human" => Ok(ProgressMode::Human),
            "json" => Ok(ProgressMode::Json),
            other => Err(format!(
                "unknown progress mode '{}': expected off, human, or json",
                other
            )),
        }
    }
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

    /// Build a reporter for this mode.
    pub fn reporter(&self) -> Box<dyn ScanProgressReporter> {
        match self {
            ProgressMode::Off => Box::new(NoProgress),
            ProgressMode::Human => Box::new(StderrProgress),
            ProgressMode::Json => Box::new(JsonProgress),
        }
    }
}
