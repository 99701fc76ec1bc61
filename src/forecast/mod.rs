// Forecaster - horizon-limited hit projection with calibrated uncertainty
//
// For every warm instrument the next hits are projected forward from the
// tracked phase, each carrying a blended confidence and a 95% interval
// derived from the tracker covariance plus IOI jitter. Emission is driven
// by hits and backstopped by a heartbeat so downstream consumers see fresh
// state even through quiet stretches.

use serde::Serialize;

use crate::config::{ForecasterConfig, TrackerConfig};
use crate::instruments::Instrument;
use crate::tracker::TempoTracker;

/// Confidence interval half-width multiplier (95% two-sided normal).
const CI_Z: f64 = 1.96;

/// Floor on the projected time uncertainty, seconds.
const MIN_SIGMA_T: f64 = 0.001;

/// One projected hit.
#[derive(Debug, Clone, Serialize)]
pub struct ForecastHit {
    pub t_pred_sec: f64,
    pub ci_low_sec: f64,
    pub ci_high_sec: f64,
    pub confidence: f64,
    /// 1-based position in projection order
    pub hit_index: usize,
}

/// Per-instrument summary plus its projected hits.
#[derive(Debug, Clone, Serialize)]
pub struct InstrumentForecast {
    pub instrument: Instrument,
    pub tempo_bpm: f64,
    pub period_sec: f64,
    pub phase: f64,
    pub confidence_global: f64,
    pub warmup_complete: bool,
    pub hits: Vec<ForecastHit>,
}

/// One emission: all five instruments in fixed order.
#[derive(Debug, Clone, Serialize)]
pub struct ForecastFrame {
    pub timestamp_sec: f64,
    pub frame_idx: u64,
    pub predictions: Vec<InstrumentForecast>,
}

pub struct Forecaster {
    horizon_seconds: f64,
    max_predictions: usize,
    confidence_threshold_min: f64,
    periodic_interval_sec: f64,
    decay_rate: f64,
    last_emission_time: f64,
}

impl Forecaster {
    pub fn new(config: &ForecasterConfig, tracker_config: &TrackerConfig) -> Self {
        Self {
            horizon_seconds: config.horizon_seconds,
            max_predictions: config.max_predictions_per_instrument,
            confidence_threshold_min: config.confidence_threshold_min,
            periodic_interval_sec: config.periodic_interval_sec,
            decay_rate: tracker_config.confidence_decay_rate,
            last_emission_time: 0.0,
        }
    }

    /// Emission cadence: always on a hit frame, otherwise the heartbeat.
    pub fn should_emit(&self, t_now: f64, any_hit: bool) -> bool {
        any_hit || (t_now - self.last_emission_time) >= self.periodic_interval_sec
    }

    /// Build one forecast frame and stamp the emission time.
    pub fn emit(
        &mut self,
        t_now: f64,
        frame_idx: u64,
        trackers: &mut [TempoTracker; Instrument::COUNT],
    ) -> ForecastFrame {
        let mut predictions = Vec::with_capacity(Instrument::COUNT);

        for inst in Instrument::ALL {
            let tracker = &mut trackers[inst.index()];
            let hits = self.project(tracker, t_now);
            predictions.push(InstrumentForecast {
                instrument: inst,
                tempo_bpm: tracker.tempo_bpm(),
                period_sec: tracker.period(),
                phase: tracker.phase(),
                confidence_global: tracker.confidence_global(),
                warmup_complete: tracker.warmup_done(),
                hits,
            });
        }

        self.last_emission_time = t_now;
        ForecastFrame {
            timestamp_sec: t_now,
            frame_idx,
            predictions,
        }
    }

    /// Project the next hits for one instrument within the horizon.
    fn project(&self, tracker: &mut TempoTracker, t_now: f64) -> Vec<ForecastHit> {
        let mut hits = Vec::new();
        if !tracker.warmup_done() || tracker.period() <= 1e-6 {
            return hits;
        }

        let confidence = self.confidence(tracker, t_now);
        tracker.set_confidence_global(confidence);

        let sigma_t = Self::time_uncertainty(tracker);
        let period = tracker.period();
        let mut t_next = t_now + (1.0 - tracker.phase()) * period;

        let mut hit_index = 1;
        while hit_index <= self.max_predictions && t_next <= t_now + self.horizon_seconds {
            if confidence >= self.confidence_threshold_min {
                hits.push(ForecastHit {
                    t_pred_sec: t_next,
                    ci_low_sec: t_next - CI_Z * sigma_t,
                    ci_high_sec: t_next + CI_Z * sigma_t,
                    confidence,
                    hit_index,
                });
            }
            t_next += period;
            hit_index += 1;
        }

        hits
    }

    /// confidence = 0.4 c_phase + 0.3 c_ioi + 0.3 c_recency
    fn confidence(&self, tracker: &TempoTracker, t_now: f64) -> f64 {
        let period = tracker.period();
        let (_, _, p11) = tracker.covariance();

        let c_ioi = (1.0 - tracker.period_mad() / period).clamp(0.0, 1.0);
        let c_phase = (1.0 - 10.0 * p11.sqrt()).clamp(0.0, 1.0);
        let c_recency =
            (-(t_now - tracker.last_hit_time()) / (self.decay_rate * period)).exp();

        0.4 * c_phase + 0.3 * c_ioi + 0.3 * c_recency
    }

    /// sigma_t^2 = (phase * sqrt(P00))^2 + (period * sqrt(P11))^2
    ///           + 0.25 * period_mad^2, floored at 1 ms.
    fn time_uncertainty(tracker: &TempoTracker) -> f64 {
        let (p00, _, p11) = tracker.covariance();
        let phase_term = tracker.phase() * p00.sqrt();
        let period_term = tracker.period() * p11.sqrt();
        let mad = tracker.period_mad();

        let variance = phase_term * phase_term + period_term * period_term + 0.25 * mad * mad;
        variance.sqrt().max(MIN_SIGMA_T)
    }

    pub fn last_emission_time(&self) -> f64 {
        self.last_emission_time
    }

    pub fn reset(&mut self) {
        self.last_emission_time = 0.0;
    }
}
