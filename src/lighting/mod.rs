// LightingFilter - from forecasts to deduplicated lighting commands
//
// Every projected hit is fingerprinted by instrument and its prediction
// time rounded to 10 ms. A command survives only if its confidence clears
// the filter threshold, its lead time falls inside the latency window, and
// its fingerprint has not been sent within the duplicate window. The
// allow-set then decides which instruments may actually emit; fingerprints
// of withheld commands are still recorded so a later allow-set change
// cannot resend stale events.

use std::collections::HashMap;

use crate::config::FilterConfig;
use crate::forecast::ForecastFrame;
use crate::instruments::Instrument;

/// Sent-map garbage collection cadence, in processed forecast frames.
pub const CLEANUP_INTERVAL: u32 = 50;

/// One scheduled lighting event.
#[derive(Debug, Clone, PartialEq)]
pub struct LightingCommand {
    pub instrument: Instrument,
    pub t_pred_sec: f64,
    pub confidence: f64,
    pub r: u8,
    pub g: u8,
    pub b: u8,
    pub event_id: String,
}

/// Fixed color mapping: kick red, snare green, everything else blue.
pub fn instrument_color(instrument: Instrument) -> (u8, u8, u8) {
    match instrument {
        Instrument::Kick => (1, 0, 0),
        Instrument::Snare => (0, 1, 0),
        _ => (0, 0, 1),
    }
}

/// Dedup fingerprint: `<instrument>_<tPred rounded to 0.01, 2dp>`.
pub fn event_id(instrument: Instrument, t_pred_sec: f64) -> String {
    let rounded = (t_pred_sec * 100.0).round() / 100.0;
    format!("{}_{:.2}", instrument.name(), rounded)
}

pub struct LightingFilter {
    confidence_threshold: f64,
    min_latency_sec: f64,
    max_latency_sec: f64,
    duplicate_window_sec: f64,
    allowed: [bool; Instrument::COUNT],
    /// event_id -> prediction time of the recorded send
    sent: HashMap<String, f64>,
    cleanup_counter: u32,
}

impl LightingFilter {
    pub fn new(config: &FilterConfig) -> Self {
        let mut allowed = [false; Instrument::COUNT];
        for &inst in &config.instrument_allow_set {
            allowed[inst.index()] = true;
        }
        Self {
            confidence_threshold: config.confidence_threshold,
            min_latency_sec: config.min_latency_sec,
            max_latency_sec: config.max_latency_sec,
            duplicate_window_sec: config.duplicate_window_sec,
            allowed,
            sent: HashMap::new(),
            cleanup_counter: 0,
        }
    }

    /// Filter one forecast frame into lighting commands.
    pub fn process(&mut self, frame: &ForecastFrame, out: &mut Vec<LightingCommand>) {
        out.clear();
        let t_now = frame.timestamp_sec;

        self.cleanup_counter += 1;
        if self.cleanup_counter >= CLEANUP_INTERVAL {
            self.cleanup(t_now);
            self.cleanup_counter = 0;
        }

        for pred in &frame.predictions {
            for hit in &pred.hits {
                let id = event_id(pred.instrument, hit.t_pred_sec);

                if !self.should_send(hit.confidence, hit.t_pred_sec, t_now, &id) {
                    continue;
                }

                if self.allowed[pred.instrument.index()] {
                    let (r, g, b) = instrument_color(pred.instrument);
                    out.push(LightingCommand {
                        instrument: pred.instrument,
                        t_pred_sec: hit.t_pred_sec,
                        confidence: hit.confidence,
                        r,
                        g,
                        b,
                        event_id: id.clone(),
                    });
                }

                // Recorded even when the allow-set withholds the command,
                // keyed on prediction time so late duplicates are caught
                // until the predicted instant has passed.
                self.sent.insert(id, hit.t_pred_sec);
            }
        }
    }

    fn should_send(&self, confidence: f64, t_pred: f64, t_now: f64, id: &str) -> bool {
        if confidence < self.confidence_threshold {
            return false;
        }

        let latency = t_pred - t_now;
        if latency < self.min_latency_sec || latency > self.max_latency_sec {
            return false;
        }

        if let Some(&sent_t_pred) = self.sent.get(id) {
            if t_pred - sent_t_pred < self.duplicate_window_sec {
                return false;
            }
        }

        true
    }

    /// Drop fingerprints whose predicted instant has passed by more than
    /// the duplicate window.
    fn cleanup(&mut self, t_now: f64) {
        let window = self.duplicate_window_sec;
        self.sent.retain(|_, &mut t_pred| t_now - t_pred <= window);
    }

    /// Live fingerprints (bounded by the periodic cleanup).
    pub fn sent_len(&self) -> usize {
        self.sent.len()
    }

    pub fn reset(&mut self) {
        self.sent.clear();
        self.cleanup_counter = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::forecast::{ForecastHit, InstrumentForecast};

    fn filter_config() -> FilterConfig {
        FilterConfig {
            confidence_threshold: 0.3,
            min_latency_sec: 0.05,
            max_latency_sec: 2.0,
            duplicate_window_sec: 0.1,
            instrument_allow_set: vec![Instrument::Kick],
        }
    }

    fn frame_with(
        t_now: f64,
        instrument: Instrument,
        hits: Vec<(f64, f64)>, // (t_pred, confidence)
    ) -> ForecastFrame {
        let predictions = Instrument::ALL
            .iter()
            .map(|&inst| InstrumentForecast {
                instrument: inst,
                tempo_bpm: 120.0,
                period_sec: 0.5,
                phase: 0.0,
                confidence_global: 0.9,
                warmup_complete: true,
                hits: if inst == instrument {
                    hits.iter()
                        .enumerate()
                        .map(|(i, &(t_pred, confidence))| ForecastHit {
                            t_pred_sec: t_pred,
                            ci_low_sec: t_pred - 0.01,
                            ci_high_sec: t_pred + 0.01,
                            confidence,
                            hit_index: i + 1,
                        })
                        .collect()
                } else {
                    Vec::new()
                },
            })
            .collect();
        ForecastFrame {
            timestamp_sec: t_now,
            frame_idx: 0,
            predictions,
        }
    }

    #[test]
    fn test_passing_forecast_becomes_command() {
        let mut filter = LightingFilter::new(&filter_config());
        let mut out = Vec::new();

        filter.process(&frame_with(10.0, Instrument::Kick, vec![(10.5, 0.9)]), &mut out);

        assert_eq!(out.len(), 1);
        let cmd = &out[0];
        assert_eq!(cmd.instrument, Instrument::Kick);
        assert_eq!((cmd.r, cmd.g, cmd.b), (1, 0, 0));
        assert_eq!(cmd.event_id, "kick_10.50");
        assert_eq!(cmd.confidence, 0.9);
    }

    #[test]
    fn test_low_confidence_rejected() {
        let mut filter = LightingFilter::new(&filter_config());
        let mut out = Vec::new();

        filter.process(&frame_with(10.0, Instrument::Kick, vec![(10.5, 0.2)]), &mut out);
        assert!(out.is_empty());
        // rejected forecasts leave no fingerprint
        assert_eq!(filter.sent_len(), 0);
    }

    #[test]
    fn test_latency_window() {
        let mut filter = LightingFilter::new(&filter_config());
        let mut out = Vec::new();

        // 0.02 s lead: below min -> dropped
        filter.process(&frame_with(10.0, Instrument::Kick, vec![(10.02, 0.9)]), &mut out);
        assert!(out.is_empty());

        // 0.10 s lead: inside window -> emitted
        filter.process(&frame_with(10.0, Instrument::Kick, vec![(10.10, 0.9)]), &mut out);
        assert_eq!(out.len(), 1);

        // 3.0 s lead: beyond max -> dropped
        filter.process(&frame_with(10.0, Instrument::Kick, vec![(13.0, 0.9)]), &mut out);
        assert!(out.is_empty());
    }

    #[test]
    fn test_duplicate_suppression() {
        // Two forecasts with the same event id 50 ms apart inside a 100 ms
        // duplicate window: exactly one command.
        let mut filter = LightingFilter::new(&filter_config());
        let mut out = Vec::new();
        let mut published = 0;

        filter.process(&frame_with(10.0, Instrument::Kick, vec![(10.5, 0.9)]), &mut out);
        published += out.len();

        // 50 ms later the same predicted instant rounds to the same id
        filter.process(&frame_with(10.05, Instrument::Kick, vec![(10.5, 0.9)]), &mut out);
        published += out.len();

        assert_eq!(published, 1);
    }

    #[test]
    fn test_dedup_by_rounded_fingerprint() {
        let mut filter = LightingFilter::new(&filter_config());
        let mut out = Vec::new();

        filter.process(&frame_with(10.0, Instrument::Kick, vec![(10.5, 0.9)]), &mut out);
        assert_eq!(out.len(), 1);

        // 10.504 rounds to the same 10 ms cell as 10.5 -> duplicate
        filter.process(&frame_with(10.1, Instrument::Kick, vec![(10.504, 0.9)]), &mut out);
        assert!(out.is_empty(), "near-identical prediction must dedup");

        // a different rounded cell is a fresh fingerprint
        filter.process(&frame_with(10.2, Instrument::Kick, vec![(10.61, 0.9)]), &mut out);
        assert_eq!(out.len(), 1);
    }

    #[test]
    fn test_allow_set_withholds_but_records() {
        let mut filter = LightingFilter::new(&filter_config());
        let mut out = Vec::new();

        // snare passes every check but is not in the allow set
        filter.process(&frame_with(10.0, Instrument::Snare, vec![(10.5, 0.9)]), &mut out);
        assert!(out.is_empty());
        assert_eq!(filter.sent_len(), 1, "withheld command must still be recorded");
    }

    #[test]
    fn test_allow_set_extension_emits_others() {
        let mut config = filter_config();
        config.instrument_allow_set = vec![Instrument::Kick, Instrument::Snare, Instrument::Clap];
        let mut filter = LightingFilter::new(&config);
        let mut out = Vec::new();

        filter.process(&frame_with(10.0, Instrument::Snare, vec![(10.5, 0.9)]), &mut out);
        assert_eq!(out.len(), 1);
        assert_eq!((out[0].r, out[0].g, out[0].b), (0, 1, 0));

        filter.process(&frame_with(10.0, Instrument::Clap, vec![(10.7, 0.9)]), &mut out);
        assert_eq!(out.len(), 1);
        // non-kick, non-snare map to blue
        assert_eq!((out[0].r, out[0].g, out[0].b), (0, 0, 1));
    }

    #[test]
    fn test_event_id_format() {
        assert_eq!(event_id(Instrument::Kick, 10.5), "kick_10.50");
        assert_eq!(event_id(Instrument::ClosedHat, 1.234), "chat_1.23");
        assert_eq!(event_id(Instrument::OpenHatCrash, 1.235), "ohc_1.24");
        assert_eq!(event_id(Instrument::Snare, 0.0), "snare_0.00");
    }

    #[test]
    fn test_cleanup_bounds_sent_map() {
        let mut filter = LightingFilter::new(&filter_config());
        let mut out = Vec::new();

        // plant fingerprints over many frames, advancing time well past
        // each predicted instant
        for i in 0..(CLEANUP_INTERVAL as usize * 2) {
            let t_now = i as f64;
            filter.process(
                &frame_with(t_now, Instrument::Kick, vec![(t_now + 0.5, 0.9)]),
                &mut out,
            );
        }

        // the periodic cleanup keeps only fingerprints whose predicted
        // instant has not passed by more than the duplicate window
        assert!(
            filter.sent_len() < CLEANUP_INTERVAL as usize + 2,
            "sent map grew to {}",
            filter.sent_len()
        );
    }

    #[test]
    fn test_no_two_live_entries_share_id() {
        // The sent map is keyed by event id, so the invariant holds by
        // construction; verify a resend replaces rather than accumulates.
        let mut config = filter_config();
        config.duplicate_window_sec = 0.01;
        let mut filter = LightingFilter::new(&config);
        let mut out = Vec::new();

        filter.process(&frame_with(10.0, Instrument::Kick, vec![(10.5, 0.9)]), &mut out);
        filter.process(&frame_with(10.01, Instrument::Kick, vec![(10.504, 0.9)]), &mut out);
        assert_eq!(filter.sent_len(), 1);
    }
}
