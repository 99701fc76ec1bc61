// MultiFrameGate - sliding-window spike detection over band energy
//
// Unlike the edge-triggered onset gate, this detector votes over a whole
// window of recent frames: a z-score peak test, a first-half/second-half
// trend ratio, and a variance-growth test. The combined mode requires two
// of the three to agree, trading latency for robustness on noisy bands.

use serde::{Deserialize, Serialize};

use crate::config::MultiFrameGateConfig;

/// Detection strategy over the sliding window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DetectionMode {
    /// z-score of the current frame against the window
    Peak,
    /// ratio of second-half to first-half mean
    Trend,
    /// ratio of second-half to first-half variance
    Variance,
    /// two-of-three vote over the other modes
    Combined,
}

pub struct MultiFrameGate {
    window_size: usize,
    peak_threshold: f32,
    trend_threshold: f32,
    variance_threshold: f32,
    refractory: u32,
    warmup: u64,
    mode: DetectionMode,

    history: Vec<f32>,
    ref_count: u32,
    frames_seen: u64,
    detection_enabled: bool,
}

impl MultiFrameGate {
    pub fn new(config: &MultiFrameGateConfig) -> Self {
        Self {
            window_size: config.window_size.max(2),
            peak_threshold: config.peak_threshold,
            trend_threshold: config.trend_threshold,
            variance_threshold: config.variance_threshold,
            refractory: config.refractory,
            warmup: config.warmup,
            mode: config.detection_mode,
            history: Vec::with_capacity(config.window_size * 2),
            ref_count: 0,
            frames_seen: 0,
            detection_enabled: false,
        }
    }

    /// Process one frame of band energy; returns exactly 0.0 or 1.0.
    pub fn process(&mut self, band_energy: f32) -> f32 {
        self.frames_seen += 1;

        self.history.push(band_energy);
        if self.history.len() > self.window_size {
            self.history.remove(0);
        }

        if self.ref_count > 0 {
            self.ref_count -= 1;
        }

        if self.frames_seen >= self.warmup {
            self.detection_enabled = true;
        }

        let mut hit = 0.0_f32;

        if self.detection_enabled && self.ref_count == 0 && self.history.len() >= self.window_size
        {
            let detected = match self.mode {
                DetectionMode::Peak => self.detect_peak(band_energy),
                DetectionMode::Trend => self.detect_trend(),
                DetectionMode::Variance => self.detect_variance(band_energy),
                DetectionMode::Combined => {
                    let votes = self.detect_peak(band_energy) as u8
                        + self.detect_trend() as u8
                        + self.detect_variance(band_energy) as u8;
                    votes >= 2
                }
            };

            if detected {
                hit = 1.0;
                self.ref_count = self.refractory;
            }
        }

        hit
    }

    /// z-score of the current frame against the window excluding it.
    fn detect_peak(&self, current: f32) -> bool {
        if self.history.len() < 3 {
            return false;
        }
        let recent = &self.history[..self.history.len() - 1];
        let m = mean(recent);
        let sd = std_dev(recent, m);
        if sd < 1e-6 {
            return false;
        }
        (current - m) / sd > self.peak_threshold
    }

    /// Sustained rise: second-half mean over first-half mean.
    fn detect_trend(&self) -> bool {
        if self.history.len() < 4 {
            return false;
        }
        trend_ratio(&self.history) > self.trend_threshold
    }

    /// Activity burst: variance of the recent half grows past the ratio.
    fn detect_variance(&self, current: f32) -> bool {
        if self.history.len() < 6 {
            return false;
        }
        let mid = self.history.len() / 2;
        let first = &self.history[..mid];
        let mut second: Vec<f32> = self.history[mid..self.history.len() - 1].to_vec();
        second.push(current);

        let var1 = variance(first, mean(first));
        let var2 = variance(&second, mean(&second));
        if var1 < 1e-6 {
            return false;
        }
        var2 / var1 > self.variance_threshold
    }

    pub fn reset(&mut self) {
        self.history.clear();
        self.ref_count = 0;
        self.frames_seen = 0;
        self.detection_enabled = false;
    }
}

fn mean(data: &[f32]) -> f32 {
    if data.is_empty() {
        return 0.0;
    }
    data.iter().sum::<f32>() / data.len() as f32
}

fn variance(data: &[f32], mean: f32) -> f32 {
    if data.len() < 2 {
        return 0.0;
    }
    let sum_sq: f32 = data.iter().map(|v| (v - mean) * (v - mean)).sum();
    sum_sq / (data.len() - 1) as f32
}

fn std_dev(data: &[f32], mean: f32) -> f32 {
    variance(data, mean).sqrt()
}

/// Second-half mean over first-half mean; 1.0 when flat or degenerate.
fn trend_ratio(data: &[f32]) -> f32 {
    if data.len() < 2 {
        return 1.0;
    }
    let mid = data.len() / 2;
    let first = mean(&data[..mid]);
    let second = mean(&data[mid..]);
    if first < 1e-6 {
        return 1.0;
    }
    second / first
}
