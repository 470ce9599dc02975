//! Record of inlining decisions.

use std::fmt;

use crate::ci::MethodId;
use crate::compile::Compile;
use crate::jvms::JvmsId;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InlineOutcome {
    Success,
    Failure,
}

/// One decision about one call site.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InlineRecord {
    pub method: MethodId,
    /// Depth of the caller frame.
    pub depth: u32,
    pub bci: i32,
    pub outcome: InlineOutcome,
    pub msg: String,
}

impl fmt::Display for InlineRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tag = match self.outcome {
            InlineOutcome::Success => "inline",
            InlineOutcome::Failure => "fail",
        };
        write!(
            f,
            "{:indent$}@ {} {} [{}] {}",
            "",
            self.bci,
            self.method,
            tag,
            self.msg,
            indent = self.depth as usize * 2
        )
    }
}

/// Decisions made during one compile, in order.
#[derive(Debug, Default, Clone)]
pub struct InlineLog {
    records: Vec<InlineRecord>,
}

impl InlineLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, record: InlineRecord) {
        self.records.push(record);
    }

    pub fn records(&self) -> &[InlineRecord] {
        &self.records
    }

    pub fn successes(&self) -> impl Iterator<Item = &InlineRecord> {
        self.records
            .iter()
            .filter(|r| r.outcome == InlineOutcome::Success)
    }

    pub fn failures(&self) -> impl Iterator<Item = &InlineRecord> {
        self.records
            .iter()
            .filter(|r| r.outcome == InlineOutcome::Failure)
    }

    /// Latest decision about `method`.
    pub fn find(&self, method: MethodId) -> Option<&InlineRecord> {
        self.records.iter().rev().find(|r| r.method == method)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn clear(&mut self) {
        self.records.clear();
    }
}

impl Compile {
    /// Record a decision about the call to `method` at the frame `jvms`.
    pub fn print_inlining(&mut self, method: MethodId, jvms: JvmsId, outcome: InlineOutcome, msg: impl Into<String>) {
        let state = self.jvms.get(jvms);
        let record = InlineRecord {
            method,
            depth: state.depth(),
            bci: state.bci(),
            outcome,
            msg: msg.into(),
        };
        tracing::debug!(
            method = %record.method,
            depth = record.depth,
            bci = record.bci,
            outcome = ?record.outcome,
            "{}",
            record.msg
        );
        self.inline_log_mut().record(record);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rec(method: u32, outcome: InlineOutcome, msg: &str) -> InlineRecord {
        InlineRecord {
            method: MethodId(method),
            depth: 1,
            bci: 4,
            outcome,
            msg: msg.to_string(),
        }
    }

    #[test]
    fn test_log_queries() {
        let mut log = InlineLog::new();
        log.record(rec(1, InlineOutcome::Failure, "too big"));
        log.record(rec(2, InlineOutcome::Success, "inline"));
        log.record(rec(1, InlineOutcome::Success, "inline (hot)"));
        assert_eq!(log.len(), 3);
        assert_eq!(log.successes().count(), 2);
        assert_eq!(log.failures().count(), 1);
        assert_eq!(log.find(MethodId(1)).map(|r| r.msg.as_str()), Some("inline (hot)"));
        log.clear();
        assert!(log.is_empty());
    }

    #[test]
    fn test_record_display_indents_by_depth() {
        let r = rec(3, InlineOutcome::Failure, "too big");
        let text = r.to_string();
        assert!(text.starts_with("  @ 4"));
        assert!(text.ends_with("[fail] too big"));
    }
}
