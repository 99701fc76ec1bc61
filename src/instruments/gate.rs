// OnsetGate - adaptive-threshold edge-triggered percussive detector
//
// One gate per instrument consumes that instrument's band energy each frame
// and emits exactly 0.0 or 1.0. The detection function is smoothed by a
// short moving average and compared against a rolling median + k*MAD
// threshold; a hit fires only on the rising crossing of that threshold.
// The refractory counter suppresses output without stalling state: the
// smoothing window, rolling history, and edge flag all advance while the
// gate is closed.

use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

use crate::config::GateConfig;
use crate::dsp::stats;

/// Minimum history before the adaptive threshold takes over from the
/// configured fallback.
const MIN_HISTORY_FOR_ADAPTIVE: usize = 8;

/// Floor for the MAD multiplier.
const MIN_MAD_MULTIPLIER: f64 = 0.3;

/// Floor for the MAD itself, so a flat history cannot zero the threshold.
const MAD_FLOOR: f64 = 1e-6;

/// Onset detection function selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GateMethod {
    /// Positive energy difference (high-frequency-content flavored)
    Hfc,
    /// Positive energy difference (spectral-flux flavored)
    Flux,
    /// Raw band energy
    Rms,
    /// Positive energy difference
    Default,
}

pub struct OnsetGate {
    method: GateMethod,
    threshold: f32,
    refractory: u32,
    warmup: u64,
    /// Recognized for configuration compatibility; not applied to the ODF.
    #[allow(dead_code)]
    sensitivity: f32,
    smooth_window: usize,
    odf_window: usize,

    frames_seen: u64,
    ref_count: u32,
    detection_enabled: bool,
    /// Band energy of the previous frame, once detection is enabled
    last_input: Option<f32>,
    smooth_buf: VecDeque<f32>,
    history: VecDeque<f32>,
    prev_smoothed: f32,
    was_above: bool,
    scratch: Vec<f64>,
}

impl OnsetGate {
    pub fn new(config: &GateConfig) -> Self {
        Self {
            method: config.method,
            threshold: config.threshold,
            refractory: config.refractory,
            warmup: config.warmup,
            sensitivity: config.sensitivity,
            smooth_window: config.smooth_window.max(1),
            odf_window: config.odf_window,
            frames_seen: 0,
            ref_count: 0,
            detection_enabled: false,
            last_input: None,
            smooth_buf: VecDeque::with_capacity(config.smooth_window.max(1)),
            history: VecDeque::with_capacity(config.odf_window),
            prev_smoothed: 0.0,
            was_above: false,
            scratch: Vec::with_capacity(config.odf_window),
        }
    }

    /// Process one frame of band energy; returns exactly 0.0 or 1.0.
    pub fn process(&mut self, band_energy: f32) -> f32 {
        self.frames_seen += 1;

        if self.ref_count > 0 {
            self.ref_count -= 1;
        }

        if self.frames_seen >= self.warmup {
            self.detection_enabled = true;
        }

        let mut hit = 0.0_f32;

        if self.detection_enabled {
            let odf = self.detection_function(band_energy);
            let smoothed = self.smooth(odf);

            self.history.push_back(smoothed);
            if self.history.len() > self.odf_window {
                self.history.pop_front();
            }

            let threshold = self.adaptive_threshold();

            let above = smoothed > threshold;
            let rising = smoothed >= self.prev_smoothed;
            if above && !self.was_above && rising {
                hit = 1.0;
            }
            // Edge flag and smoothing state advance even when the
            // refractory counter later suppresses the output.
            self.was_above = above;
            self.prev_smoothed = smoothed;
        }

        if self.ref_count != 0 {
            hit = 0.0;
        }
        if hit == 1.0 {
            self.ref_count = self.refractory;
        }

        hit
    }

    fn detection_function(&mut self, x: f32) -> f32 {
        let odf = match self.method {
            GateMethod::Rms => x,
            GateMethod::Hfc | GateMethod::Flux | GateMethod::Default => match self.last_input {
                Some(prev) => (x - prev).max(0.0),
                None => 0.0,
            },
        };
        self.last_input = Some(x);
        odf
    }

    fn smooth(&mut self, odf: f32) -> f32 {
        self.smooth_buf.push_back(odf);
        if self.smooth_buf.len() > self.smooth_window {
            self.smooth_buf.pop_front();
        }
        let sum: f32 = self.smooth_buf.iter().sum();
        sum / self.smooth_buf.len() as f32
    }

    /// median + max(k, 0.3) * max(MAD, 1e-6) once the history is long
    /// enough; the raw configured threshold before that.
    fn adaptive_threshold(&mut self) -> f32 {
        if self.history.len() < MIN_HISTORY_FOR_ADAPTIVE {
            return self.threshold;
        }
        let (median, mad) = stats::median_mad(
            self.history.iter().map(|&v| v as f64),
            &mut self.scratch,
        );
        let k = (self.threshold as f64).max(MIN_MAD_MULTIPLIER);
        (median + k * mad.max(MAD_FLOOR)) as f32
    }

    pub fn reset(&mut self) {
        self.frames_seen = 0;
        self.ref_count = 0;
        self.detection_enabled = false;
        self.last_input = None;
        self.smooth_buf.clear();
        self.history.clear();
        self.prev_smoothed = 0.0;
        self.was_above = false;
    }

    pub fn frames_seen(&self) -> u64 {
        self.frames_seen
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_config() -> GateConfig {
        GateConfig {
            method: GateMethod::Hfc,
            threshold: 0.5,
            refractory: 0,
            warmup: 0,
            sensitivity: 1.0,
            smooth_window: 1,
            odf_window: 64,
            ..GateConfig::default()
        }
    }

    #[test]
    fn test_output_is_binary() {
        let mut gate = OnsetGate::new(&test_config());
        for i in 0..200 {
            let x = if i % 17 == 0 { 5.0 } else { 0.1 };
            let out = gate.process(x);
            assert!(out == 0.0 || out == 1.0, "non-binary output {}", out);
        }
    }

    #[test]
    fn test_no_hits_during_warmup() {
        let mut config = test_config();
        config.warmup = 10;
        let mut gate = OnsetGate::new(&config);

        for i in 0..9 {
            // huge steps that would trivially fire once enabled
            let out = gate.process((i * 100) as f32);
            assert_eq!(out, 0.0, "hit during warmup at frame {}", i);
        }
    }

    #[test]
    fn test_step_fires_once() {
        let mut gate = OnsetGate::new(&test_config());

        // settle a quiet baseline
        for _ in 0..20 {
            assert_eq!(gate.process(0.1), 0.0);
        }
        // a jump fires on its rising edge only
        assert_eq!(gate.process(10.0), 1.0);
        // holding the level produces no further hits (ODF falls back to 0)
        for _ in 0..10 {
            assert_eq!(gate.process(10.0), 0.0);
        }
    }

    #[test]
    fn test_refractory_window() {
        // A spike train that would re-trigger the edge detector every other
        // frame is held to exactly one emission per 6-frame window.
        let mut config = test_config();
        config.refractory = 6;
        config.method = GateMethod::Rms;
        // k floors at 0.3, so the adaptive threshold settles near
        // median + 0.3*MAD = 6.5 against the 0/10 train
        config.threshold = 0.0;
        config.odf_window = 8;
        let mut gate = OnsetGate::new(&config);

        let mut hits = Vec::new();
        for i in 0..60u32 {
            let x = if i % 2 == 0 { 10.0 } else { 0.0 };
            if gate.process(x) >= 0.5 {
                hits.push(i);
            }
        }

        assert_eq!(hits[0], 0);
        for pair in hits.windows(2) {
            assert_eq!(
                pair[1] - pair[0],
                6,
                "hits at {} and {} break the 6-frame cadence",
                pair[0],
                pair[1]
            );
        }
        assert!(hits.len() >= 9, "expected one hit per window, got {:?}", hits);
    }

    #[test]
    fn test_rms_method_uses_raw_energy() {
        let mut config = test_config();
        config.method = GateMethod::Rms;
        config.threshold = 0.5; // fallback threshold while history is short
        let mut gate = OnsetGate::new(&config);

        assert_eq!(gate.process(0.1), 0.0);
        assert_eq!(gate.process(1.0), 1.0);
    }

    #[test]
    fn test_crossing_fires_on_rising_edge() {
        let mut config = test_config();
        config.method = GateMethod::Rms;
        config.threshold = 0.5;
        config.smooth_window = 1;
        let mut gate = OnsetGate::new(&config);

        gate.process(0.4);
        gate.process(0.4);
        assert_eq!(gate.process(0.6), 1.0);
        // still above: no second edge
        assert_eq!(gate.process(0.7), 0.0);
        // drop below re-arms the edge, next crossing fires again
        assert_eq!(gate.process(0.3), 0.0);
        assert_eq!(gate.process(0.6), 1.0);
    }

    #[test]
    fn test_adaptive_threshold_takes_over() {
        // With a busy history the threshold becomes median + k*MAD; a value
        // just above the old fixed threshold but inside the noise floor
        // must not fire.
        let mut config = test_config();
        config.method = GateMethod::Rms;
        config.threshold = 2.0; // k = 2 once adaptive
        let mut gate = OnsetGate::new(&config);

        // noisy baseline around 1.0
        for i in 0..64 {
            gate.process(1.0 + 0.1 * ((i % 3) as f32 - 1.0));
        }
        // 1.15 is inside median + 2*MAD of that history
        assert_eq!(gate.process(1.15), 0.0);
        // a real spike clears it
        assert_eq!(gate.process(3.0), 1.0);
    }

    #[test]
    fn test_flat_history_mad_floor() {
        // A perfectly flat history degenerates MAD to zero; the 1e-6 floor
        // keeps the threshold strictly above the median so the flat signal
        // itself never fires.
        let mut config = test_config();
        config.method = GateMethod::Rms;
        config.threshold = 2.0; // fallback sits above the flat level too
        let mut gate = OnsetGate::new(&config);

        for _ in 0..100 {
            assert_eq!(gate.process(1.0), 0.0);
        }
    }

    #[test]
    fn test_state_advances_during_refractory() {
        // While the gate is closed, history keeps accumulating so the
        // adaptive threshold reflects frames seen during refractory.
        let mut config = test_config();
        config.refractory = 8;
        config.method = GateMethod::Rms;
        config.threshold = 0.0;
        let mut gate = OnsetGate::new(&config);

        gate.process(1.0); // fires, closes gate
        let frames_before = gate.frames_seen();
        for _ in 0..4 {
            gate.process(2.0);
        }
        assert_eq!(gate.frames_seen(), frames_before + 4);
        assert_eq!(gate.history.len() as u64, gate.frames_seen());
    }

    #[test]
    fn test_reset_clears_state() {
        let mut gate = OnsetGate::new(&test_config());
        for i in 0..50 {
            gate.process(i as f32);
        }
        gate.reset();
        assert_eq!(gate.frames_seen(), 0);
        assert!(gate.history.is_empty());
        assert_eq!(gate.last_input, None);
    }

    #[test]
    fn test_method_serde_names() {
        assert_eq!(serde_json::to_string(&GateMethod::Hfc).unwrap(), "\"hfc\"");
        assert_eq!(serde_json::to_string(&GateMethod::Flux).unwrap(), "\"flux\"");
        assert_eq!(serde_json::to_string(&GateMethod::Rms).unwrap(), "\"rms\"");
        assert_eq!(
            serde_json::to_string(&GateMethod::Default).unwrap(),
            "\"default\""
        );
        let parsed: GateMethod = serde_json::from_str("\"flux\"").unwrap();
        assert_eq!(parsed, GateMethod::Flux);
    }
}
