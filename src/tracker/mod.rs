// TempoTracker - per-instrument Kalman/PLL tempo and phase estimation
//
// State is (period, phase) with an explicit 2x2 covariance kept as three
// scalars (p00, p01, p11; p10 mirrors p01). The math is small and
// numerically sensitive to its floors, so it is written out rather than
// routed through a matrix library.
//
// Lifecycle: hits accumulate into a bounded window until the robust IOI
// seed (median / scaled MAD) arms the tracker; from then on every frame
// runs the predict step and every observed hit runs the phase-residual
// measurement update. The preferred impact phase is 0, so the residual is
// simply the wrapped phase.

use std::collections::VecDeque;

use crate::config::TrackerConfig;
use crate::dsp::stats;

/// Hits retained for IOI statistics.
const MAX_HITS: usize = 20;

/// Covariance diagonal floor.
const MIN_VARIANCE: f64 = 1e-6;

/// Innovation covariance below this aborts the measurement update.
const MIN_INNOVATION: f64 = 1e-9;

/// Residual magnitude beyond which the damped period correction engages.
const LARGE_RESIDUAL: f64 = 0.1;

/// Normal-consistency scale for the MAD.
const MAD_SCALE: f64 = 1.4826;

/// Wrap to [0, 1).
pub fn wrap01(x: f64) -> f64 {
    let wrapped = x - x.floor();
    if wrapped >= 1.0 {
        0.0
    } else {
        wrapped
    }
}

/// Wrap to [-0.5, 0.5).
pub fn wrap_signed(x: f64) -> f64 {
    let mut r = x - x.round();
    if r >= 0.5 {
        r -= 1.0;
    } else if r < -0.5 {
        r += 1.0;
    }
    r
}

pub struct TempoTracker {
    min_hits_for_seed: usize,
    min_period: f64,
    max_period: f64,
    q_period: f64,
    q_phase: f64,
    r_base: f64,

    warmup_done: bool,
    hits: VecDeque<f64>,
    iois: Vec<f64>,
    period_median: f64,
    period_mad: f64,

    period: f64,
    phase: f64,
    p00: f64,
    p01: f64,
    p11: f64,

    last_hit_time: f64,
    last_update_frame: u64,
    hit_count: u64,
    confidence_global: f64,

    scratch: Vec<f64>,
}

impl TempoTracker {
    pub fn new(config: &TrackerConfig) -> Self {
        Self {
            min_hits_for_seed: config.min_hits_for_seed,
            min_period: 60.0 / config.max_bpm,
            max_period: 60.0 / config.min_bpm,
            q_period: config.q_period,
            q_phase: config.q_phase,
            r_base: config.r_base,
            warmup_done: false,
            hits: VecDeque::with_capacity(MAX_HITS),
            iois: Vec::with_capacity(MAX_HITS),
            period_median: 0.0,
            period_mad: 0.0,
            period: 0.5,
            phase: 0.0,
            p00: 0.01,
            p01: 0.0,
            p11: 0.01,
            last_hit_time: -1.0,
            last_update_frame: 0,
            hit_count: 0,
            confidence_global: 0.0,
            scratch: Vec::with_capacity(MAX_HITS),
        }
    }

    /// Kalman predict step, run once per frame.
    ///
    /// Period drifts (process noise only); phase advances by dt/period.
    /// Phase uncertainty inherits period uncertainty through the Jacobian
    /// term s = -dt/period^2.
    pub fn predict(&mut self, dt: f64) {
        if !self.warmup_done {
            return;
        }

        self.p00 += self.q_period * dt;

        if self.period > 1e-6 {
            self.phase = wrap01(self.phase + dt / self.period);
        }

        let s = -dt / (self.period * self.period);
        self.p11 += self.q_phase * dt + s * s * self.p00;
        self.p01 += s * self.p00;
    }

    /// Absorb an observed hit at audio time `t`.
    pub fn observe_hit(&mut self, t: f64, frame: u64) {
        self.hits.push_back(t);
        if self.hits.len() > MAX_HITS {
            self.hits.pop_front();
        }
        self.last_hit_time = t;
        self.last_update_frame = frame;
        self.hit_count += 1;

        if self.hits.len() >= 2 {
            self.update_ioi_statistics();

            if !self.warmup_done
                && self.hit_count >= self.min_hits_for_seed as u64
                && self.iois.len() >= self.min_hits_for_seed - 1
            {
                self.warmup_done = true;
                self.period = self.period_median;
                self.phase = 0.0;
                self.p00 = self.period_mad * self.period_mad;
                self.p11 = 0.01;
                self.p01 = 0.0;
            }
        }

        if self.warmup_done {
            let residual = wrap_signed(self.phase);
            self.measurement_update(residual);
            self.period = self.period.clamp(self.min_period, self.max_period);
        }
    }

    /// Phase-residual measurement update with H = (0, 1).
    fn measurement_update(&mut self, residual: f64) {
        // Measurement noise widens with IOI jitter
        let r = self.r_base * (1.0 + self.period_mad / self.period);
        let s = self.p11 + r;
        if s < MIN_INNOVATION {
            return;
        }

        let k0 = self.p01 / s;
        let k1 = self.p11 / s;

        self.period -= k0 * residual;
        self.phase = wrap01(self.phase - k1 * residual);

        let p00_new = self.p00 - k0 * s * k0;
        let p01_new = self.p01 - k0 * s * k1;
        let p11_new = self.p11 - k1 * s * k1;

        self.p00 = p00_new.max(MIN_VARIANCE);
        self.p01 = p01_new;
        self.p11 = p11_new.max(MIN_VARIANCE);

        // A persistently large residual means the period itself is off;
        // bleed a damped fraction of it into the period estimate.
        if residual.abs() > LARGE_RESIDUAL {
            self.period += -LARGE_RESIDUAL * residual * self.period;
        }
    }

    /// Rebuild the IOI window from consecutive hit pairs and refresh the
    /// robust seed statistics.
    fn update_ioi_statistics(&mut self) {
        self.iois.clear();
        let mut prev = None;
        for &t in &self.hits {
            if let Some(p) = prev {
                let ioi: f64 = t - p;
                // gaps up to 4 periods are kept so dropped hits do not
                // poison the window
                if ioi >= self.min_period && ioi <= self.max_period * 4.0 {
                    self.iois.push(ioi);
                }
            }
            prev = Some(t);
        }

        if self.iois.len() >= 2 {
            let (median, mad) =
                stats::median_mad(self.iois.iter().copied(), &mut self.scratch);
            self.period_median = median;
            self.period_mad = MAD_SCALE * mad;
        }
    }

    pub fn reset(&mut self) {
        self.warmup_done = false;
        self.hits.clear();
        self.iois.clear();
        self.period_median = 0.0;
        self.period_mad = 0.0;
        self.period = 0.5;
        self.phase = 0.0;
        self.p00 = 0.01;
        self.p01 = 0.0;
        self.p11 = 0.01;
        self.last_hit_time = -1.0;
        self.last_update_frame = 0;
        self.hit_count = 0;
        self.confidence_global = 0.0;
    }

    // Accessors used by the forecaster and the egress serializers.

    pub fn warmup_done(&self) -> bool {
        self.warmup_done
    }

    pub fn period(&self) -> f64 {
        self.period
    }

    pub fn phase(&self) -> f64 {
        self.phase
    }

    pub fn tempo_bpm(&self) -> f64 {
        if self.period > 1e-6 {
            60.0 / self.period
        } else {
            0.0
        }
    }

    pub fn period_mad(&self) -> f64 {
        self.period_mad
    }

    pub fn period_median(&self) -> f64 {
        self.period_median
    }

    /// (p00, p01, p11); p10 mirrors p01.
    pub fn covariance(&self) -> (f64, f64, f64) {
        (self.p00, self.p01, self.p11)
    }

    pub fn last_hit_time(&self) -> f64 {
        self.last_hit_time
    }

    pub fn hit_count(&self) -> u64 {
        self.hit_count
    }

    pub fn confidence_global(&self) -> f64 {
        self.confidence_global
    }

    pub(crate) fn set_confidence_global(&mut self, confidence: f64) {
        self.confidence_global = confidence;
    }
}
