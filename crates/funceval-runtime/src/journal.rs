//! Evaluation journal
//!
//! Keeps a record of what each evaluation did so a debugger front end (or a
//! test) can inspect it after control has left the engine.

use crate::handles::HandleId;
use serde::Serialize;
use std::collections::VecDeque;
use std::fmt;
use std::sync::{Arc, Mutex};
use std::time::{SystemTime, UNIX_EPOCH};

/// Things worth recording about an evaluation
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum EvalEvent {
    /// Call evaluation produced a registered value or null
    CallCompleted {
        target: u64,
        arguments: usize,
        handle: u32,
    },
    /// String value synthesized without a call
    StringMaterialized { length: usize, handle: u32 },
    /// Types were built on demand for a signature
    TypesConstructed { count: usize },
    /// Evaluation was abandoned and reported to the debugger
    Failed { code: u32, message: String },
    /// Debugger released a pinned value
    HandleReleased { handle: u32 },
}

impl EvalEvent {
    pub(crate) fn released(id: HandleId) -> Self {
        EvalEvent::HandleReleased { handle: id.raw() }
    }
}

impl fmt::Display for EvalEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EvalEvent::CallCompleted {
                target,
                arguments,
                handle,
            } => write!(
                f,
                "Call to {:#x} with {} arguments completed (handle {})",
                target, arguments, handle
            ),
            EvalEvent::StringMaterialized { length, handle } => {
                write!(f, "String of {} units materialized (handle {})", length, handle)
            }
            EvalEvent::TypesConstructed { count } => {
                write!(f, "Constructed {} types", count)
            }
            EvalEvent::Failed { code, message } => {
                write!(f, "Evaluation failed with code {}: {}", code, message)
            }
            EvalEvent::HandleReleased { handle } => write!(f, "Handle {} released", handle),
        }
    }
}

/// Journal entry with timestamp
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct JournalEntry {
    /// Unix timestamp in milliseconds
    pub timestamp: u64,
    pub event: EvalEvent,
}

impl JournalEntry {
    pub fn new(event: EvalEvent) -> Self {
        Self {
            timestamp: current_timestamp_ms(),
            event,
        }
    }

    /// Format as a log line
    pub fn to_log_line(&self) -> String {
        format!(
            "[{}.{:03}] {}",
            self.timestamp / 1000,
            self.timestamp % 1000,
            self.event
        )
    }
}

fn current_timestamp_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Journal backend
pub trait EvalJournal: Send + Sync {
    fn record(&self, event: EvalEvent);

    /// Entries currently held, oldest first
    fn entries(&self) -> Vec<JournalEntry>;

    fn clear(&self);
}

/// Bounded in-memory journal; the oldest entries drop out first
#[derive(Debug, Clone)]
pub struct MemoryJournal {
    entries: Arc<Mutex<VecDeque<JournalEntry>>>,
    capacity: usize,
}

impl MemoryJournal {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: Arc::new(Mutex::new(VecDeque::with_capacity(capacity.min(1024)))),
            capacity: capacity.max(1),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

impl EvalJournal for MemoryJournal {
    fn record(&self, event: EvalEvent) {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        if entries.len() == self.capacity {
            entries.pop_front();
        }
        entries.push_back(JournalEntry::new(event));
    }

    fn entries(&self) -> Vec<JournalEntry> {
        let entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        entries.iter().cloned().collect()
    }

    fn clear(&self) {
        self.entries
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clear();
    }
}

/// Journal that drops everything
#[derive(Debug, Clone, Copy, Default)]
pub struct NullJournal;

impl EvalJournal for NullJournal {
    fn record(&self, _event: EvalEvent) {}

    fn entries(&self) -> Vec<JournalEntry> {
        Vec::new()
    }

    fn clear(&self) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_display() {
        let event = EvalEvent::CallCompleted {
            target: 0x4000,
            arguments: 2,
            handle: 3,
        };
        assert_eq!(
            event.to_string(),
            "Call to 0x4000 with 2 arguments completed (handle 3)"
        );
    }

    #[test]
    fn test_log_line_has_timestamp() {
        let entry = JournalEntry::new(EvalEvent::TypesConstructed { count: 2 });
        let line = entry.to_log_line();
        assert!(line.starts_with('['));
        assert!(line.ends_with("Constructed 2 types"));
    }

    #[test]
    fn test_memory_journal_is_bounded() {
        let journal = MemoryJournal::new(2);
        for handle in 1..=3 {
            journal.record(EvalEvent::HandleReleased { handle });
        }

        let handles: Vec<EvalEvent> = journal.entries().into_iter().map(|e| e.event).collect();
        assert_eq!(
            handles,
            vec![
                EvalEvent::HandleReleased { handle: 2 },
                EvalEvent::HandleReleased { handle: 3 },
            ]
        );
    }

    #[test]
    fn test_memory_journal_clear() {
        let journal = MemoryJournal::new(4);
        journal.record(EvalEvent::TypesConstructed { count: 1 });
        journal.clear();
        assert!(journal.entries().is_empty());
    }

    #[test]
    fn test_null_journal_keeps_nothing() {
        let journal = NullJournal;
        journal.record(EvalEvent::TypesConstructed { count: 1 });
        assert!(journal.entries().is_empty());
    }

    #[test]
    fn test_event_serializes_tagged() {
        let json = serde_json::to_string(&EvalEvent::Failed {
            code: 4,
            message: "Unsupported func-eval mode 9".to_string(),
        })
        .unwrap();
        assert_eq!(
            json,
            r#"{"event":"failed","code":4,"message":"Unsupported func-eval mode 9"}"#
        );
    }
}
