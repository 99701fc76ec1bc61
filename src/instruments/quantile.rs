// QuantileGate - hysteresis detector on online quantile thresholds
//
// Arms when the band energy rises above the running q_hi quantile and
// fires on the next drop below the q_lo quantile, so one sustained swell
// produces exactly one hit on its way down. The quantiles are tracked with
// the P-square algorithm: five markers per quantile, O(1) per frame, no
// sample history.
//
// Bootstrap: both estimators draw on a single seed pool owned by the gate.
// Each frame feeds the pool twice (once per estimator update), so the high
// estimator fills it first and initializes from interleaved duplicates
// after three frames, while the low estimator initializes four frames
// later from distinct samples. The staggered arming this produces during
// warmup is part of the gate's observable behavior.

use crate::config::QuantileGateConfig;

/// P-square online quantile estimator (Jain & Chlamtac).
///
/// Tracks a single quantile with five markers whose heights approximate
/// the minimum, the quantile neighborhood, and the maximum of the stream.
/// The five-sample bootstrap pool lives in the gate, not here.
struct P2Quantile {
    q: f64,
    /// Marker heights
    m: [f64; 5],
    /// Marker positions
    n: [f64; 5],
    /// Desired marker positions
    np: [f64; 5],
    /// Desired position increments
    dn: [f64; 5],
    initialized: bool,
}

impl P2Quantile {
    fn new(q: f64) -> Self {
        Self {
            q,
            m: [0.0; 5],
            n: [0.0; 5],
            np: [0.0; 5],
            dn: [0.0; 5],
            initialized: false,
        }
    }

    fn init_from_seed(&mut self, seed: &[f64]) {
        let mut sorted = seed.to_vec();
        sorted.sort_by(f64::total_cmp);
        for i in 0..5 {
            self.m[i] = sorted[i];
            self.n[i] = (i + 1) as f64;
        }
        let q = self.q;
        self.np = [1.0, 1.0 + 2.0 * q, 1.0 + 4.0 * q, 1.0 + 6.0 * q, 5.0];
        self.dn = [0.0, q / 2.0, q, (1.0 + q) / 2.0, 1.0];
        self.initialized = true;
    }

    fn parabolic(&self, i: usize) -> f64 {
        let n = &self.n;
        let m = &self.m;
        let a = (n[i] - n[i - 1] + (n[i + 1] - n[i]))
            * ((m[i + 1] - m[i]) / (n[i + 1] - n[i]) - (m[i] - m[i - 1]) / (n[i] - n[i - 1]));
        m[i] + a / (n[i + 1] - n[i - 1])
    }

    fn linear(&self, i: usize, di: i32) -> f64 {
        let j = (i as i32 + di) as usize;
        self.m[i] + di as f64 * (self.m[j] - self.m[i]) / (self.n[j] - self.n[i])
    }

    fn update(&mut self, x: f64, seed: &mut Vec<f64>) {
        if !self.initialized {
            seed.push(x);
            if seed.len() == 5 {
                self.init_from_seed(seed);
                seed.clear();
            }
            return;
        }

        let k = if x < self.m[0] {
            self.m[0] = x;
            0
        } else if x >= self.m[4] {
            self.m[4] = x;
            3
        } else {
            let mut k = 0;
            while k < 4 {
                if x < self.m[k + 1] {
                    break;
                }
                k += 1;
            }
            k
        };

        for i in 0..5 {
            if i <= k {
                self.n[i] += 1.0;
            }
            self.np[i] += self.dn[i];
        }

        for i in 1..=3 {
            let d = self.np[i] - self.n[i];
            if (d >= 1.0 && self.n[i + 1] - self.n[i] > 1.0)
                || (d <= -1.0 && self.n[i] - self.n[i - 1] > 1.0)
            {
                let di = if d >= 1.0 { 1 } else { -1 };
                let candidate = self.parabolic(i);
                let bounded = if candidate > self.m[i - 1] && candidate < self.m[i + 1] {
                    candidate
                } else {
                    self.linear(i, di)
                };
                self.m[i] = bounded;
                self.n[i] += di as f64;
            }
        }
    }

    fn value(&self) -> f64 {
        self.m[2]
    }

    fn is_initialized(&self) -> bool {
        self.initialized
    }
}

pub struct QuantileGate {
    refractory: u32,
    warmup: u64,
    hi: P2Quantile,
    lo: P2Quantile,
    /// Bootstrap pool shared by both estimators
    seed: Vec<f64>,
    armed: bool,
    ref_count: u32,
    frames_seen: u64,
}

impl QuantileGate {
    pub fn new(config: &QuantileGateConfig) -> Self {
        Self {
            refractory: config.refractory,
            warmup: config.warmup,
            hi: P2Quantile::new(config.q_hi),
            lo: P2Quantile::new(config.q_lo),
            seed: Vec::with_capacity(5),
            armed: false,
            ref_count: 0,
            frames_seen: 0,
        }
    }

    /// Process one frame of band energy; returns exactly 0.0 or 1.0.
    pub fn process(&mut self, band_energy: f32) -> f32 {
        let x = band_energy as f64;
        self.frames_seen += 1;

        // One pool, two updates per frame: see the module comment for the
        // staggered initialization this implies.
        self.hi.update(x, &mut self.seed);
        self.lo.update(x, &mut self.seed);

        if self.ref_count > 0 {
            self.ref_count -= 1;
        }

        let mut hit = 0.0_f32;

        if self.frames_seen > self.warmup && self.hi.is_initialized() && self.lo.is_initialized()
        {
            let t_hi = self.hi.value();
            let t_lo = self.lo.value();

            if !self.armed && self.ref_count == 0 && x > t_hi {
                self.armed = true;
            }
            if self.armed && x < t_lo {
                hit = 1.0;
                self.armed = false;
                self.ref_count = self.refractory;
            }
        }

        hit
    }

    pub fn reset(&mut self) {
        let q_hi = self.hi.q;
        let q_lo = self.lo.q;
        self.hi = P2Quantile::new(q_hi);
        self.lo = P2Quantile::new(q_lo);
        self.seed.clear();
        self.armed = false;
        self.ref_count = 0;
        self.frames_seen = 0;
    }
}
