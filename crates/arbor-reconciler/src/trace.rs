#![forbid(unsafe_code)]

//! Bounded render trace.
//!
//! The reconciler records one [`TraceEntry`] per scheduling decision, render
//! pass, and commit. Tests assert on the sequence; hosts can export it as
//! JSONL for offline inspection.
//!
//! # Invariants
//!
//! - `seq` increases by one per recorded entry, including entries that were
//!   later evicted.
//! - At most `capacity` entries are retained; the oldest are evicted first.
//! - A capacity of zero records nothing.

use std::collections::VecDeque;
use std::time::Duration;

use arbor_core::{Lane, Lanes, RootId, SchedulerPriority, TaskHandle};
use slotmap::Key;

use crate::work_loop::RootExitStatus;

/// One recorded reconciler event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TraceEvent {
    UpdateScheduled { root: RootId, lane: Lane },
    MicrotaskScheduled,
    TaskScheduled {
        root: RootId,
        priority: SchedulerPriority,
        handle: TaskHandle,
    },
    /// An existing host task at the same priority was kept.
    TaskReused { root: RootId, handle: TaskHandle },
    TaskCancelled { root: RootId, handle: TaskHandle },
    RenderStarted {
        root: RootId,
        lanes: Lanes,
        concurrent: bool,
    },
    RenderYielded { root: RootId },
    /// In-progress work was discarded before it finished.
    RenderInterrupted { root: RootId },
    RenderFinished {
        root: RootId,
        lanes: Lanes,
        status: RootExitStatus,
    },
    /// A render that hit an uncaught error is retried synchronously.
    ErrorRetry { root: RootId, lanes: Lanes },
    CommitStarted { root: RootId, lanes: Lanes },
    CommitFinished { root: RootId },
    /// A suspended commit was delayed to keep a fallback on screen.
    CommitThrottled { root: RootId, delay: Duration },
    PassiveEffectsFlushed { root: RootId },
    Pinged { root: RootId, lanes: Lanes },
    RetryScheduled { root: RootId, lane: Lane },
}

impl TraceEvent {
    /// Short machine-readable name.
    pub fn name(&self) -> &'static str {
        match self {
            Self::UpdateScheduled { .. } => "update_scheduled",
            Self::MicrotaskScheduled => "microtask_scheduled",
            Self::TaskScheduled { .. } => "task_scheduled",
            Self::TaskReused { .. } => "task_reused",
            Self::TaskCancelled { .. } => "task_cancelled",
            Self::RenderStarted { .. } => "render_started",
            Self::RenderYielded { .. } => "render_yielded",
            Self::RenderInterrupted { .. } => "render_interrupted",
            Self::RenderFinished { .. } => "render_finished",
            Self::ErrorRetry { .. } => "error_retry",
            Self::CommitStarted { .. } => "commit_started",
            Self::CommitFinished { .. } => "commit_finished",
            Self::CommitThrottled { .. } => "commit_throttled",
            Self::PassiveEffectsFlushed { .. } => "passive_effects_flushed",
            Self::Pinged { .. } => "pinged",
            Self::RetryScheduled { .. } => "retry_scheduled",
        }
    }

    /// Root the event concerns, if any.
    pub fn root(&self) -> Option<RootId> {
        match *self {
            Self::MicrotaskScheduled => None,
            Self::UpdateScheduled { root, .. }
            | Self::TaskScheduled { root, .. }
            | Self::TaskReused { root, .. }
            | Self::TaskCancelled { root, .. }
            | Self::RenderStarted { root, .. }
            | Self::RenderYielded { root }
            | Self::RenderInterrupted { root }
            | Self::RenderFinished { root, .. }
            | Self::ErrorRetry { root, .. }
            | Self::CommitStarted { root, .. }
            | Self::CommitFinished { root }
            | Self::CommitThrottled { root, .. }
            | Self::PassiveEffectsFlushed { root }
            | Self::Pinged { root, .. }
            | Self::RetryScheduled { root, .. } => Some(root),
        }
    }

    fn detail_json(&self) -> String {
        match self {
            Self::UpdateScheduled { lane, .. } | Self::RetryScheduled { lane, .. } => {
                format!(r#","lane":"{lane}""#)
            }
            Self::TaskScheduled {
                priority, handle, ..
            } => format!(r#","priority":"{priority:?}","handle":{}"#, handle.0),
            Self::TaskReused { handle, .. } | Self::TaskCancelled { handle, .. } => {
                format!(r#","handle":{}"#, handle.0)
            }
            Self::RenderStarted {
                lanes, concurrent, ..
            } => format!(r#","lanes":"{lanes}","concurrent":{concurrent}"#),
            Self::RenderFinished { lanes, status, .. } => {
                format!(r#","lanes":"{lanes}","status":"{status:?}""#)
            }
            Self::ErrorRetry { lanes, .. }
            | Self::CommitStarted { lanes, .. }
            | Self::Pinged { lanes, .. } => format!(r#","lanes":"{lanes}""#),
            Self::CommitThrottled { delay, .. } => {
                format!(r#","delay_ms":{}"#, delay.as_millis())
            }
            Self::MicrotaskScheduled
            | Self::RenderYielded { .. }
            | Self::RenderInterrupted { .. }
            | Self::CommitFinished { .. }
            | Self::PassiveEffectsFlushed { .. } => String::new(),
        }
    }
}

/// A recorded event with its sequence number and host time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TraceEntry {
    pub seq: u64,
    pub at: Duration,
    pub event: TraceEvent,
}

impl TraceEntry {
    /// Serialize as one JSON object on a single line.
    pub fn to_jsonl(&self) -> String {
        let root = match self.event.root() {
            Some(root) => root.data().as_ffi().to_string(),
            None => "null".to_string(),
        };
        format!(
            r#"{{"seq":{},"at_us":{},"event":"{}","root":{}{}}}"#,
            self.seq,
            self.at.as_micros(),
            self.event.name(),
            root,
            self.event.detail_json()
        )
    }
}

/// Ring buffer of trace entries.
#[derive(Debug, Clone)]
pub struct RenderTrace {
    entries: VecDeque<TraceEntry>,
    capacity: usize,
    next_seq: u64,
}

impl RenderTrace {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: VecDeque::with_capacity(capacity.min(256)),
            capacity,
            next_seq: 0,
        }
    }

    pub fn record(&mut self, at: Duration, event: TraceEvent) {
        if self.capacity == 0 {
            return;
        }
        if self.entries.len() == self.capacity {
            self.entries.pop_front();
        }
        self.entries.push_back(TraceEntry {
            seq: self.next_seq,
            at,
            event,
        });
        self.next_seq += 1;
    }

    pub fn entries(&self) -> impl Iterator<Item = &TraceEntry> {
        self.entries.iter()
    }

    pub fn events(&self) -> impl Iterator<Item = &TraceEvent> {
        self.entries.iter().map(|e| &e.event)
    }

    /// Number of retained entries whose event has `name`.
    pub fn count(&self, name: &str) -> usize {
        self.events().filter(|e| e.name() == name).count()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// All retained entries, one JSON object per line.
    pub fn to_jsonl(&self) -> String {
        let mut out = String::new();
        for entry in &self.entries {
            out.push_str(&entry.to_jsonl());
            out.push('\n');
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use slotmap::KeyData;

    fn root() -> RootId {
        RootId::from(KeyData::from_ffi(7))
    }

    #[test]
    fn ring_evicts_oldest_and_keeps_counting() {
        let mut trace = RenderTrace::new(2);
        for i in 0..3 {
            trace.record(Duration::from_millis(i), TraceEvent::MicrotaskScheduled);
        }
        let seqs: Vec<u64> = trace.entries().map(|e| e.seq).collect();
        assert_eq!(seqs, vec![1, 2]);
    }

    #[test]
    fn zero_capacity_records_nothing() {
        let mut trace = RenderTrace::new(0);
        trace.record(Duration::ZERO, TraceEvent::MicrotaskScheduled);
        assert!(trace.is_empty());
    }

    #[test]
    fn jsonl_line_shape() {
        let mut trace = RenderTrace::new(4);
        trace.record(
            Duration::from_millis(3),
            TraceEvent::RenderStarted {
                root: root(),
                lanes: Lanes::DEFAULT,
                concurrent: false,
            },
        );
        let line = trace.to_jsonl();
        assert!(line.ends_with('\n'));
        assert!(line.starts_with(r#"{"seq":0,"at_us":3000,"event":"render_started","root":"#));
        assert!(line.contains(r#""concurrent":false"#));
        assert_eq!(line.matches('{').count(), line.matches('}').count());
    }

    #[test]
    fn count_by_name() {
        let mut trace = RenderTrace::new(8);
        trace.record(Duration::ZERO, TraceEvent::CommitFinished { root: root() });
        trace.record(Duration::ZERO, TraceEvent::MicrotaskScheduled);
        trace.record(Duration::ZERO, TraceEvent::CommitFinished { root: root() });
        assert_eq!(trace.count("commit_finished"), 2);
        assert_eq!(trace.events().next().and_then(TraceEvent::root), Some(root()));
    }
}
