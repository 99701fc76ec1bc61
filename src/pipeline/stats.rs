// Pipeline counters - a lock-free snapshot of graph activity
//
// The worker bumps these atomics on its own thread; any other thread can
// take a consistent-enough snapshot for status displays or shutdown
// summaries without touching the graph.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

use crate::instruments::Instrument;

#[derive(Default)]
pub struct PipelineStats {
    frames: AtomicU64,
    hits: [AtomicU64; Instrument::COUNT],
    forecast_emissions: AtomicU64,
    commands_emitted: AtomicU64,
    samples_dropped: AtomicU64,
    commands_dropped: AtomicU64,
}

/// Point-in-time copy of the counters.
#[derive(Debug, Clone, Serialize)]
pub struct StatsSnapshot {
    pub frames: u64,
    pub hits: [u64; Instrument::COUNT],
    pub forecast_emissions: u64,
    pub commands_emitted: u64,
    pub samples_dropped: u64,
    pub commands_dropped: u64,
}

impl PipelineStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_frame(&self) {
        self.frames.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_hit(&self, instrument: Instrument) {
        self.hits[instrument.index()].fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_forecast_emission(&self) {
        self.forecast_emissions.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_commands(&self, count: u64) {
        self.commands_emitted.fetch_add(count, Ordering::Relaxed);
    }

    pub fn set_samples_dropped(&self, total: u64) {
        self.samples_dropped.store(total, Ordering::Relaxed);
    }

    pub fn set_commands_dropped(&self, total: u64) {
        self.commands_dropped.store(total, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            frames: self.frames.load(Ordering::Relaxed),
            hits: Instrument::ALL.map(|i| self.hits[i.index()].load(Ordering::Relaxed)),
            forecast_emissions: self.forecast_emissions.load(Ordering::Relaxed),
            commands_emitted: self.commands_emitted.load(Ordering::Relaxed),
            samples_dropped: self.samples_dropped.load(Ordering::Relaxed),
            commands_dropped: self.commands_dropped.load(Ordering::Relaxed),
        }
    }
}
