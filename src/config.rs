//! Configuration management for the forecasting pipeline
//!
//! This module provides runtime configuration loading from JSON files,
//! enabling tuning without recompilation. Every option the core recognizes
//! lives here; validation happens once at configure time and a rejected
//! parameter names itself and its expected range.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

use crate::error::ConfigError;
use crate::instruments::gate::GateMethod;
use crate::instruments::multiframe::DetectionMode;
use crate::instruments::Instrument;

/// Complete application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub audio: AudioConfig,
    pub gates: GatesConfig,
    pub tracker: TrackerConfig,
    pub forecaster: ForecasterConfig,
    pub filter: FilterConfig,
    pub publisher: PublisherConfig,
    pub logger: LoggerConfig,
    pub runtime: RuntimeConfig,
}

/// Audio front-end parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioConfig {
    /// Sample rate in Hz
    pub sample_rate: u32,
    /// Analysis frame size in samples (power of two)
    pub frame_size: usize,
    /// Hop size in samples between consecutive frames
    pub hop_size: usize,
    /// Number of mel bands produced per frame
    pub num_bands: usize,
    /// Edge fraction of each instrument mask lobe (flat-topped Hann)
    pub lobe_rolloff: f32,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            sample_rate: 44100,
            frame_size: 1024,
            hop_size: 256,
            num_bands: 64,
            lobe_rolloff: 0.15,
        }
    }
}

/// Which detector implementation a gate lane runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GateKind {
    /// Adaptive-threshold edge-triggered onset detector (the default)
    Onset,
    /// Arm/fire hysteresis on online quantile thresholds
    Quantile,
    /// Sliding-window peak/trend/variance voting
    MultiFrame,
}

impl Default for GateKind {
    fn default() -> Self {
        GateKind::Onset
    }
}

/// Parameters of a single onset gate
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GateConfig {
    /// Detector implementation for this lane
    pub kind: GateKind,
    /// Onset detection function
    pub method: GateMethod,
    /// MAD multiplier for the adaptive threshold (also the fallback
    /// threshold while the rolling history is still short)
    pub threshold: f32,
    /// Frames to hold the gate closed after a hit
    pub refractory: u32,
    /// Frames before detection is enabled
    pub warmup: u64,
    /// Recognized for compatibility; not applied to the detection path
    pub sensitivity: f32,
    /// Moving-average length for ODF smoothing
    pub smooth_window: usize,
    /// Rolling history length for the adaptive threshold
    pub odf_window: usize,
    /// Parameters used when `kind` is `quantile`
    pub quantile: QuantileGateConfig,
    /// Parameters used when `kind` is `multiframe`
    pub multiframe: MultiFrameGateConfig,
}

impl Default for GateConfig {
    fn default() -> Self {
        Self {
            kind: GateKind::Onset,
            method: GateMethod::Hfc,
            threshold: 0.3,
            refractory: 6,
            warmup: 10,
            sensitivity: 1.0,
            smooth_window: 3,
            odf_window: 64,
            quantile: QuantileGateConfig::default(),
            multiframe: MultiFrameGateConfig::default(),
        }
    }
}

/// Quantile-hysteresis gate parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QuantileGateConfig {
    /// Arming quantile; the gate arms when energy exceeds it
    pub q_hi: f64,
    /// Firing quantile; an armed gate fires when energy drops below it
    pub q_lo: f64,
    /// Frames to hold the gate closed after a hit
    pub refractory: u32,
    /// Frames before detection is enabled
    pub warmup: u64,
}

impl Default for QuantileGateConfig {
    fn default() -> Self {
        Self {
            q_hi: 0.98,
            q_lo: 0.80,
            refractory: 4,
            warmup: 8,
        }
    }
}

/// Multi-frame sliding-window gate parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MultiFrameGateConfig {
    /// Sliding window length in frames
    pub window_size: usize,
    /// z-score threshold for the peak test
    pub peak_threshold: f32,
    /// Half-window mean ratio threshold for the trend test
    pub trend_threshold: f32,
    /// Half-window variance ratio threshold for the variance test
    pub variance_threshold: f32,
    /// Frames to hold the gate closed after a hit
    pub refractory: u32,
    /// Frames before detection is enabled
    pub warmup: u64,
    /// Which tests fire the gate
    pub detection_mode: DetectionMode,
}

impl Default for MultiFrameGateConfig {
    fn default() -> Self {
        Self {
            window_size: 8,
            peak_threshold: 2.5,
            trend_threshold: 1.5,
            variance_threshold: 2.0,
            refractory: 4,
            warmup: 8,
            detection_mode: DetectionMode::Combined,
        }
    }
}

/// One gate configuration per instrument.
///
/// Defaults are the tuned production values: the kick rides a high MAD
/// multiplier and a long refractory because its band has the most energy
/// swing; the hats use shorter rolling windows to follow faster patterns.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GatesConfig {
    pub kick: GateConfig,
    pub snare: GateConfig,
    pub clap: GateConfig,
    pub chat: GateConfig,
    pub ohc: GateConfig,
}

impl Default for GatesConfig {
    fn default() -> Self {
        Self {
            kick: GateConfig {
                method: GateMethod::Hfc,
                threshold: 10.0,
                refractory: 30,
                warmup: 8,
                sensitivity: 5.0,
                smooth_window: 2,
                odf_window: 64,
                ..GateConfig::default()
            },
            snare: GateConfig {
                method: GateMethod::Flux,
                threshold: 1.4,
                refractory: 4,
                warmup: 8,
                sensitivity: 1.8,
                smooth_window: 2,
                odf_window: 64,
                ..GateConfig::default()
            },
            clap: GateConfig {
                method: GateMethod::Flux,
                threshold: 1.4,
                refractory: 3,
                warmup: 8,
                sensitivity: 1.8,
                smooth_window: 2,
                odf_window: 48,
                ..GateConfig::default()
            },
            chat: GateConfig {
                method: GateMethod::Hfc,
                threshold: 1.6,
                refractory: 3,
                warmup: 8,
                sensitivity: 1.6,
                smooth_window: 2,
                odf_window: 48,
                ..GateConfig::default()
            },
            ohc: GateConfig {
                method: GateMethod::Hfc,
                threshold: 1.5,
                refractory: 4,
                warmup: 8,
                sensitivity: 1.6,
                smooth_window: 2,
                odf_window: 64,
                ..GateConfig::default()
            },
        }
    }
}

impl GatesConfig {
    pub fn for_instrument(&self, instrument: Instrument) -> &GateConfig {
        match instrument {
            Instrument::Kick => &self.kick,
            Instrument::Snare => &self.snare,
            Instrument::Clap => &self.clap,
            Instrument::ClosedHat => &self.chat,
            Instrument::OpenHatCrash => &self.ohc,
        }
    }
}

/// Kalman/PLL tempo-phase tracker parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackerConfig {
    /// Hits required before the robust seed arms the tracker
    pub min_hits_for_seed: usize,
    /// Tempo clamp, lower bound (BPM)
    pub min_bpm: f64,
    /// Tempo clamp, upper bound (BPM)
    pub max_bpm: f64,
    /// Process noise on the period state, per second
    pub q_period: f64,
    /// Process noise on the phase state, per second
    pub q_phase: f64,
    /// Measurement noise base; scaled up by IOI jitter
    pub r_base: f64,
    /// Recency decay alpha for the confidence blend
    pub confidence_decay_rate: f64,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            min_hits_for_seed: 8,
            min_bpm: 60.0,
            max_bpm: 200.0,
            q_period: 1e-6,
            q_phase: 1e-8,
            r_base: 1e-4,
            confidence_decay_rate: 0.1,
        }
    }
}

/// Hit projection parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ForecasterConfig {
    /// Maximum lead-time for projected hits, seconds
    pub horizon_seconds: f64,
    /// Hits projected per instrument per emission
    pub max_predictions_per_instrument: usize,
    /// Minimum confidence for a hit to appear in a forecast
    pub confidence_threshold_min: f64,
    /// Heartbeat interval when no hits arrive, seconds
    pub periodic_interval_sec: f64,
}

impl Default for ForecasterConfig {
    fn default() -> Self {
        Self {
            horizon_seconds: 2.0,
            max_predictions_per_instrument: 2,
            confidence_threshold_min: 0.3,
            periodic_interval_sec: 0.15,
        }
    }
}

/// Lighting command filter parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FilterConfig {
    /// Minimum confidence for a forecast to become a command
    pub confidence_threshold: f64,
    /// Lead-time window lower bound, seconds
    pub min_latency_sec: f64,
    /// Lead-time window upper bound, seconds
    pub max_latency_sec: f64,
    /// Two commands with the same event id closer than this are duplicates
    pub duplicate_window_sec: f64,
    /// Instruments allowed to emit commands
    pub instrument_allow_set: Vec<Instrument>,
}

impl Default for FilterConfig {
    fn default() -> Self {
        Self {
            confidence_threshold: 0.3,
            min_latency_sec: 0.05,
            max_latency_sec: 2.0,
            duplicate_window_sec: 0.1,
            instrument_allow_set: vec![Instrument::Kick],
        }
    }
}

/// MQTT transport parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PublisherConfig {
    /// Broker URI, `tcp://<host>:<port>`
    pub broker_uri: String,
    /// Topic lighting commands are published on
    pub topic: String,
    /// MQTT client id
    pub client_id: String,
}

impl Default for PublisherConfig {
    fn default() -> Self {
        Self {
            broker_uri: "tcp://localhost:1883".to_string(),
            topic: "beat/events/schedule".to_string(),
            client_id: "essentia_lighting".to_string(),
        }
    }
}

/// Hit/forecast log file parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggerConfig {
    /// Directory log files are created in
    pub log_dir: String,
    /// Disable to run without a log file
    pub enabled: bool,
}

impl Default for LoggerConfig {
    fn default() -> Self {
        Self {
            log_dir: "logs".to_string(),
            enabled: true,
        }
    }
}

/// Run-level options
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Bound for unattended runs; `None` runs until stopped
    pub run_timeout_seconds: Option<u64>,
}

impl AppConfig {
    /// Load configuration from a JSON file.
    ///
    /// An unreadable or unparsable file degrades to the defaults with a
    /// logged warning instead of failing; validation is a separate step,
    /// so the fallback itself is never silently rejected.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Self {
        let path = path.as_ref();
        match Self::read_json(path) {
            Ok(config) => {
                log::info!("config: using {}", path.display());
                config
            }
            Err(reason) => {
                log::warn!(
                    "config: {} ({}), running on defaults",
                    reason,
                    path.display()
                );
                Self::default()
            }
        }
    }

    fn read_json(path: &Path) -> Result<Self, String> {
        let contents =
            fs::read_to_string(path).map_err(|err| format!("unreadable file: {}", err))?;
        serde_json::from_str(&contents).map_err(|err| format!("bad JSON: {}", err))
    }

    /// Validate every recognized option against its documented range.
    ///
    /// Returns the first violation; construction errors are fatal to
    /// start-up only.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let a = &self.audio;
        if !(8000..=192_000).contains(&a.sample_rate) {
            return Err(ConfigError::out_of_range(
                "audio.sample_rate",
                a.sample_rate,
                "[8000, 192000] Hz",
            ));
        }
        if !(128..=8192).contains(&a.frame_size) || !a.frame_size.is_power_of_two() {
            return Err(ConfigError::out_of_range(
                "audio.frame_size",
                a.frame_size,
                "power of two in [128, 8192]",
            ));
        }
        if a.hop_size == 0 || a.hop_size > a.frame_size {
            return Err(ConfigError::out_of_range(
                "audio.hop_size",
                a.hop_size,
                "[1, frame_size]",
            ));
        }
        if !(8..=256).contains(&a.num_bands) {
            return Err(ConfigError::out_of_range(
                "audio.num_bands",
                a.num_bands,
                "[8, 256]",
            ));
        }
        if !(a.lobe_rolloff > 0.0 && a.lobe_rolloff <= 0.49) {
            return Err(ConfigError::out_of_range(
                "audio.lobe_rolloff",
                a.lobe_rolloff,
                "(0, 0.49]",
            ));
        }

        for inst in Instrument::ALL {
            let g = self.gates.for_instrument(inst);
            if g.threshold < 0.0 {
                return Err(ConfigError::out_of_range(
                    "gates.threshold",
                    g.threshold,
                    ">= 0",
                ));
            }
            if g.sensitivity <= 0.0 {
                return Err(ConfigError::out_of_range(
                    "gates.sensitivity",
                    g.sensitivity,
                    "> 0",
                ));
            }
            if g.smooth_window == 0 {
                return Err(ConfigError::out_of_range(
                    "gates.smooth_window",
                    g.smooth_window,
                    ">= 1",
                ));
            }
            if g.odf_window < 8 {
                return Err(ConfigError::out_of_range(
                    "gates.odf_window",
                    g.odf_window,
                    ">= 8",
                ));
            }
            let q = &g.quantile;
            if !(q.q_lo > 0.0 && q.q_lo < q.q_hi && q.q_hi < 1.0) {
                return Err(ConfigError::out_of_range(
                    "gates.quantile.q_lo/q_hi",
                    format!("({}, {})", q.q_lo, q.q_hi),
                    "0 < q_lo < q_hi < 1",
                ));
            }
            let m = &g.multiframe;
            if m.window_size < 2 {
                return Err(ConfigError::out_of_range(
                    "gates.multiframe.window_size",
                    m.window_size,
                    ">= 2",
                ));
            }
            if m.peak_threshold <= 0.0 || m.trend_threshold <= 0.0 || m.variance_threshold <= 0.0
            {
                return Err(ConfigError::out_of_range(
                    "gates.multiframe.thresholds",
                    format!(
                        "({}, {}, {})",
                        m.peak_threshold, m.trend_threshold, m.variance_threshold
                    ),
                    "> 0",
                ));
            }
        }

        let t = &self.tracker;
        if !(3..=20).contains(&t.min_hits_for_seed) {
            return Err(ConfigError::out_of_range(
                "tracker.min_hits_for_seed",
                t.min_hits_for_seed,
                "[3, 20]",
            ));
        }
        if !(30.0..=120.0).contains(&t.min_bpm) {
            return Err(ConfigError::out_of_range(
                "tracker.min_bpm",
                t.min_bpm,
                "[30, 120] BPM",
            ));
        }
        if !(120.0..=300.0).contains(&t.max_bpm) || t.max_bpm <= t.min_bpm {
            return Err(ConfigError::out_of_range(
                "tracker.max_bpm",
                t.max_bpm,
                "[120, 300] BPM and > min_bpm",
            ));
        }
        if !(1e-9..=1e-3).contains(&t.q_period) {
            return Err(ConfigError::out_of_range(
                "tracker.q_period",
                t.q_period,
                "[1e-9, 1e-3]",
            ));
        }
        if !(1e-9..=1e-3).contains(&t.q_phase) {
            return Err(ConfigError::out_of_range(
                "tracker.q_phase",
                t.q_phase,
                "[1e-9, 1e-3]",
            ));
        }
        if !(1e-6..=1e-2).contains(&t.r_base) {
            return Err(ConfigError::out_of_range(
                "tracker.r_base",
                t.r_base,
                "[1e-6, 1e-2]",
            ));
        }
        if !(0.01..=0.5).contains(&t.confidence_decay_rate) {
            return Err(ConfigError::out_of_range(
                "tracker.confidence_decay_rate",
                t.confidence_decay_rate,
                "[0.01, 0.5]",
            ));
        }

        let f = &self.forecaster;
        if !(0.5..=5.0).contains(&f.horizon_seconds) {
            return Err(ConfigError::out_of_range(
                "forecaster.horizon_seconds",
                f.horizon_seconds,
                "[0.5, 5.0] s",
            ));
        }
        if !(1..=5).contains(&f.max_predictions_per_instrument) {
            return Err(ConfigError::out_of_range(
                "forecaster.max_predictions_per_instrument",
                f.max_predictions_per_instrument,
                "[1, 5]",
            ));
        }
        if !(0.0..=1.0).contains(&f.confidence_threshold_min) {
            return Err(ConfigError::out_of_range(
                "forecaster.confidence_threshold_min",
                f.confidence_threshold_min,
                "[0, 1]",
            ));
        }
        if !(0.05..=1.0).contains(&f.periodic_interval_sec) {
            return Err(ConfigError::out_of_range(
                "forecaster.periodic_interval_sec",
                f.periodic_interval_sec,
                "[0.05, 1.0] s",
            ));
        }

        let l = &self.filter;
        if !(0.0..=1.0).contains(&l.confidence_threshold) {
            return Err(ConfigError::out_of_range(
                "filter.confidence_threshold",
                l.confidence_threshold,
                "[0, 1]",
            ));
        }
        if !(0.01..=1.0).contains(&l.min_latency_sec) {
            return Err(ConfigError::out_of_range(
                "filter.min_latency_sec",
                l.min_latency_sec,
                "[0.01, 1.0] s",
            ));
        }
        if !(0.1..=10.0).contains(&l.max_latency_sec) || l.max_latency_sec <= l.min_latency_sec {
            return Err(ConfigError::out_of_range(
                "filter.max_latency_sec",
                l.max_latency_sec,
                "[0.1, 10.0] s and > min_latency_sec",
            ));
        }
        if !(0.01..=1.0).contains(&l.duplicate_window_sec) {
            return Err(ConfigError::out_of_range(
                "filter.duplicate_window_sec",
                l.duplicate_window_sec,
                "[0.01, 1.0] s",
            ));
        }

        crate::publish::parse_broker_uri(&self.publisher.broker_uri)?;
        if self.publisher.topic.is_empty() {
            return Err(ConfigError::invalid("publisher.topic", "must not be empty"));
        }
        if self.publisher.client_id.is_empty() {
            return Err(ConfigError::invalid(
                "publisher.client_id",
                "must not be empty",
            ));
        }

        Ok(())
    }
}
