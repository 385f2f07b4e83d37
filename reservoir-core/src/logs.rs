//! Error and Performance Logs
//!
//! The error log and the render records are append-only. Expression timings
//! are folded into running totals instead, since every pass evaluates many
//! expressions. Both logs are cheap cloneable handles so the store and the
//! runtime can share one instance.

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;
use std::time::Duration;

use crate::error::Error;

/// One failed lookup or evaluation.
#[derive(Debug, Clone)]
pub struct ErrorEntry {
    /// The expression text (or store key) that failed.
    pub expression: String,
    /// What went wrong.
    pub error: Rc<Error>,
}

/// Process-wide ordered record of failures.
#[derive(Debug, Clone, Default)]
pub struct ErrorLog {
    entries: Rc<RefCell<Vec<ErrorEntry>>>,
}

impl ErrorLog {
    /// Create an empty log.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an entry.
    pub fn record(&self, expression: impl Into<String>, error: Error) {
        self.entries.borrow_mut().push(ErrorEntry {
            expression: expression.into(),
            error: Rc::new(error),
        });
    }

    /// Snapshot of every entry, oldest first.
    pub fn entries(&self) -> Vec<ErrorEntry> {
        self.entries.borrow().clone()
    }

    /// The most recent entry.
    pub fn last(&self) -> Option<ErrorEntry> {
        self.entries.borrow().last().cloned()
    }

    pub fn len(&self) -> usize {
        self.entries.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.borrow().is_empty()
    }
}

/// What a render record measured.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RenderTarget {
    /// A full pass starting at the document root.
    Document,
    /// One component render, by tag name.
    Component(String),
}

/// Timing of one render.
#[derive(Debug, Clone)]
pub struct RenderRecord {
    pub target: RenderTarget,
    pub elapsed: Duration,
}

impl fmt::Display for RenderRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let ms = self.elapsed.as_secs_f64() * 1000.0;
        match &self.target {
            RenderTarget::Document => write!(f, "Hydrated document in {ms:.3}ms"),
            RenderTarget::Component(name) => write!(f, "'{name}' rendered in {ms:.3}ms"),
        }
    }
}

/// Running totals over every expression evaluation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EvaluationStats {
    pub count: u64,
    pub total: Duration,
    pub max: Duration,
}

impl EvaluationStats {
    fn add(&mut self, elapsed: Duration) {
        self.count += 1;
        self.total += elapsed;
        self.max = self.max.max(elapsed);
    }

    /// Mean evaluation time, zero before the first evaluation.
    pub fn mean(&self) -> Duration {
        match u32::try_from(self.count) {
            Ok(0) => Duration::ZERO,
            Ok(count) => self.total / count,
            Err(_) => Duration::from_secs_f64(self.total.as_secs_f64() / self.count as f64),
        }
    }
}

#[derive(Debug, Default)]
struct PerfData {
    renders: Vec<RenderRecord>,
    evaluations: EvaluationStats,
}

/// Timing log for passes, component renders and expression evaluations.
#[derive(Debug, Clone, Default)]
pub struct PerfLog {
    data: Rc<RefCell<PerfData>>,
}

impl PerfLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn record_render(&self, target: RenderTarget, elapsed: Duration) {
        self.data
            .borrow_mut()
            .renders
            .push(RenderRecord { target, elapsed });
    }

    pub(crate) fn record_evaluation(&self, elapsed: Duration) {
        self.data.borrow_mut().evaluations.add(elapsed);
    }

    /// Every render record, oldest first.
    pub fn renders(&self) -> Vec<RenderRecord> {
        self.data.borrow().renders.clone()
    }

    pub fn evaluations(&self) -> EvaluationStats {
        self.data.borrow().evaluations
    }

    /// Number of completed full-document passes.
    pub fn document_passes(&self) -> usize {
        self.data
            .borrow()
            .renders
            .iter()
            .filter(|r| r.target == RenderTarget::Document)
            .count()
    }
}
