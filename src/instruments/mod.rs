// Instrument identity and per-instrument processing stages
//
// The five tracked instruments form a fixed fan-out: every per-frame stage
// (mask projection, gating, tracking, forecasting) runs once per instrument
// in the order of `Instrument::ALL`. Instrument identity is a tag carried
// through the graph, not a type.

pub mod gate;
pub mod masks;
pub mod multiframe;
pub mod quantile;

use serde::de::{self, Deserializer, Visitor};
use serde::ser::Serializer;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::config::{GateConfig, GateKind};
use gate::OnsetGate;
use multiframe::MultiFrameGate;
use quantile::QuantileGate;

/// One detector lane, dispatching to the configured implementation.
///
/// All three detectors share the same contract: one band-energy scalar in,
/// exactly 0.0 or 1.0 out, per frame.
pub enum BandGate {
    Onset(OnsetGate),
    Quantile(QuantileGate),
    MultiFrame(MultiFrameGate),
}

impl BandGate {
    pub fn from_config(config: &GateConfig) -> Self {
        match config.kind {
            GateKind::Onset => BandGate::Onset(OnsetGate::new(config)),
            GateKind::Quantile => BandGate::Quantile(QuantileGate::new(&config.quantile)),
            GateKind::MultiFrame => {
                BandGate::MultiFrame(MultiFrameGate::new(&config.multiframe))
            }
        }
    }

    /// Process one frame of band energy; returns exactly 0.0 or 1.0.
    pub fn process(&mut self, band_energy: f32) -> f32 {
        match self {
            BandGate::Onset(gate) => gate.process(band_energy),
            BandGate::Quantile(gate) => gate.process(band_energy),
            BandGate::MultiFrame(gate) => gate.process(band_energy),
        }
    }

    pub fn reset(&mut self) {
        match self {
            BandGate::Onset(gate) => gate.reset(),
            BandGate::Quantile(gate) => gate.reset(),
            BandGate::MultiFrame(gate) => gate.reset(),
        }
    }
}

/// One of the five tracked percussive instruments.
///
/// The discriminant doubles as the fan-out index; `ALL` is the canonical
/// processing and serialization order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(usize)]
pub enum Instrument {
    Kick = 0,
    Snare = 1,
    Clap = 2,
    ClosedHat = 3,
    OpenHatCrash = 4,
}

impl Instrument {
    pub const COUNT: usize = 5;

    /// Canonical fan-out order: kick, snare, clap, chat, ohc.
    pub const ALL: [Instrument; Instrument::COUNT] = [
        Instrument::Kick,
        Instrument::Snare,
        Instrument::Clap,
        Instrument::ClosedHat,
        Instrument::OpenHatCrash,
    ];

    /// Wire name used in every JSON surface (egress, log records, event ids).
    pub fn name(self) -> &'static str {
        match self {
            Instrument::Kick => "kick",
            Instrument::Snare => "snare",
            Instrument::Clap => "clap",
            Instrument::ClosedHat => "chat",
            Instrument::OpenHatCrash => "ohc",
        }
    }

    pub fn index(self) -> usize {
        self as usize
    }

    pub fn from_name(name: &str) -> Option<Instrument> {
        match name {
            "kick" => Some(Instrument::Kick),
            "snare" => Some(Instrument::Snare),
            "clap" => Some(Instrument::Clap),
            "chat" => Some(Instrument::ClosedHat),
            "ohc" => Some(Instrument::OpenHatCrash),
            _ => None,
        }
    }
}

impl fmt::Display for Instrument {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl Serialize for Instrument {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.name())
    }
}

struct InstrumentVisitor;

impl Visitor<'_> for InstrumentVisitor {
    type Value = Instrument;

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("one of \"kick\", \"snare\", \"clap\", \"chat\", \"ohc\"")
    }

    fn visit_str<E: de::Error>(self, value: &str) -> Result<Instrument, E> {
        Instrument::from_name(value)
            .ok_or_else(|| E::invalid_value(de::Unexpected::Str(value), &self))
    }
}

impl<'de> Deserialize<'de> for Instrument {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Instrument, D::Error> {
        deserializer.deserialize_str(InstrumentVisitor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_all_order_matches_indices() {
        for (i, inst) in Instrument::ALL.iter().enumerate() {
            assert_eq!(inst.index(), i);
        }
    }

    #[test]
    fn test_wire_names() {
        let names: Vec<&str> = Instrument::ALL.iter().map(|i| i.name()).collect();
        assert_eq!(names, vec!["kick", "snare", "clap", "chat", "ohc"]);
    }

    #[test]
    fn test_name_round_trip() {
        for inst in Instrument::ALL {
            assert_eq!(Instrument::from_name(inst.name()), Some(inst));
        }
        assert_eq!(Instrument::from_name("tom"), None);
    }

    #[test]
    fn test_serde_round_trip() {
        for inst in Instrument::ALL {
            let json = serde_json::to_string(&inst).unwrap();
            assert_eq!(json, format!("\"{}\"", inst.name()));
            let back: Instrument = serde_json::from_str(&json).unwrap();
            assert_eq!(back, inst);
        }
    }

    #[test]
    fn test_unknown_name_rejected() {
        let result: Result<Instrument, _> = serde_json::from_str("\"cowbell\"");
        assert!(result.is_err());
    }

    #[test]
    fn test_band_gate_dispatch() {
        let mut config = GateConfig::default();

        config.kind = GateKind::Onset;
        assert!(matches!(
            BandGate::from_config(&config),
            BandGate::Onset(_)
        ));

        config.kind = GateKind::Quantile;
        assert!(matches!(
            BandGate::from_config(&config),
            BandGate::Quantile(_)
        ));

        config.kind = GateKind::MultiFrame;
        assert!(matches!(
            BandGate::from_config(&config),
            BandGate::MultiFrame(_)
        ));
    }

    #[test]
    fn test_band_gate_output_is_binary_for_all_kinds() {
        for kind in [GateKind::Onset, GateKind::Quantile, GateKind::MultiFrame] {
            let config = GateConfig {
                kind,
                ..GateConfig::default()
            };
            let mut gate = BandGate::from_config(&config);
            for i in 0..100u64 {
                let x = (i % 13) as f32 + if i % 29 == 0 { 20.0 } else { 0.0 };
                let out = gate.process(x);
                assert!(out == 0.0 || out == 1.0);
            }
        }
    }
}
