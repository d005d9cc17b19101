//! Model-load and indexing progress on the command line.
//!
//! Progress is emitted on **stderr** so stdout stays parseable for scripts
//! (`coach ask --json`).

use std::io::Write;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use trail_coach_core::progress::{NoProgress, ProgressEvent, ProgressSink};

use crate::worker::CoachEvent;

/// Human-friendly progress on stderr: "indexing  120 / 312 (38%)".
pub struct StderrProgress;

impl ProgressSink for StderrProgress {
    fn report(&self, event: ProgressEvent) {
        let line = if event.total == 0 {
            format!("{}  {}...\n", event.label, format_number(event.completed as u64))
        } else {
            format!(
                "{}  {} / {} ({}%)\n",
                event.label,
                format_number(event.completed as u64),
                format_number(event.total as u64),
                event.percent()
            )
        };
        let mut stderr = std::io::stderr().lock();
        let _ = stderr.write_all(line.as_bytes());
        let _ = stderr.flush();
    }
}

/// Machine-readable progress: one JSON object per line on stderr.
pub struct JsonProgress;

impl ProgressSink for JsonProgress {
    fn report(&self, event: ProgressEvent) {
        let obj = serde_json::json!({
            "event": "progress",
            "label": event.label,
            "completed": event.completed,
            "total": event.total,
            "percent": event.percent(),
        });
        if let Ok(line) = serde_json::to_string(&obj) {
            let mut stderr = std::io::stderr().lock();
            let _ = writeln!(stderr, "{}", line);
            let _ = stderr.flush();
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
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
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

    pub fn reporter(&self) -> Box<dyn ProgressSink> {
        match self {
            ProgressMode::Off => Box::new(NoProgress),
            ProgressMode::Human => Box::new(StderrProgress),
            ProgressMode::Json => Box::new(JsonProgress),
        }
    }
}

/// Drain worker events, rendering progress with `mode` and logging the rest.
///
/// Answers are not printed here; callers receive them from
/// [`CoachHandle::ask`](crate::worker::CoachHandle::ask).
pub fn spawn_event_renderer(
    mut events: mpsc::UnboundedReceiver<CoachEvent>,
    mode: ProgressMode,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let reporter = mode.reporter();
        while let Some(event) = events.recv().await {
            match event {
                CoachEvent::Progress { percent, label } => {
                    reporter.report(ProgressEvent::new(percent as usize, 100, label))
                }
                CoachEvent::Indexing { done, total } => reporter.report(ProgressEvent::new(
                    done,
                    total,
                    trail_coach_core::index::INDEXING_LABEL,
                )),
                CoachEvent::Status { text } => tracing::info!("{}", text),
                CoachEvent::Error { message } => tracing::warn!("{}", message),
                other => tracing::debug!(event = ?other, "coach event"),
            }
        }
    })
}
