//! Per-stage pipeline counters

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

/// Counters for one stage
#[derive(Debug, Default)]
pub struct StageCounters {
    received: AtomicU64,
    acknowledged: AtomicU64,
    skipped: AtomicU64,
    failed: AtomicU64,
}

impl StageCounters {
    pub fn received(&self, n: u64) {
        self.received.fetch_add(n, Ordering::Relaxed);
    }

    pub fn acknowledged(&self) {
        self.acknowledged.fetch_add(1, Ordering::Relaxed);
    }

    pub fn skipped(&self) {
        self.skipped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn failed(&self) {
        self.failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StageSnapshot {
        StageSnapshot {
            received: self.received.load(Ordering::Relaxed),
            acknowledged: self.acknowledged.load(Ordering::Relaxed),
            skipped: self.skipped.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time copy of [`StageCounters`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StageSnapshot {
    pub received: u64,
    pub acknowledged: u64,
    pub skipped: u64,
    pub failed: u64,
}

/// Counters for the whole pipeline, shared by every stage
#[derive(Debug, Default)]
pub struct PipelineStats {
    pub dispatch: StageCounters,
    pub tracker: StageCounters,
    pub mover: StageCounters,
    jobs_submitted: AtomicU64,
    routing_emitted: AtomicU64,
    documents_moved: AtomicU64,
}

impl PipelineStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn job_submitted(&self) {
        self.jobs_submitted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn routing_emitted(&self, n: u64) {
        self.routing_emitted.fetch_add(n, Ordering::Relaxed);
    }

    pub fn document_moved(&self) {
        self.documents_moved.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> PipelineSnapshot {
        PipelineSnapshot {
            dispatch: self.dispatch.snapshot(),
            tracker: self.tracker.snapshot(),
            mover: self.mover.snapshot(),
            jobs_submitted: self.jobs_submitted.load(Ordering::Relaxed),
            routing_emitted: self.routing_emitted.load(Ordering::Relaxed),
            documents_moved: self.documents_moved.load(Ordering::Relaxed),
        }
    }
}

/// Serializable pipeline statistics
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PipelineSnapshot {
    pub dispatch: StageSnapshot,
    pub tracker: StageSnapshot,
    pub mover: StageSnapshot,
    pub jobs_submitted: u64,
    pub routing_emitted: u64,
    pub documents_moved: u64,
}
