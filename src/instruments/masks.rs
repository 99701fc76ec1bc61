// Band-mask table - projects B mel bands onto K instrument energies
//
// Built once at configure time from (sample_rate, num_bands, rolloff) and
// immutable for the life of the graph. Each instrument row is a sum of
// flat-topped Hann lobes over fixed Hz intervals, evaluated at the mel band
// centers and normalized to unit sum, so a row acts as a weighted average
// of band energies.

use std::f32::consts::PI;

use crate::dsp::mel::{hz_to_mel, mel_to_hz};
use crate::instruments::Instrument;

/// (low Hz, high Hz, lobe weight)
type Lobe = (f32, f32, f32);

// Kick rides the sub-bass fundamental alone; its 110-180 Hz body overlaps
// the snare shell and is deliberately excluded.
const KICK_LOBES: &[Lobe] = &[(40.0, 75.0, 0.75)];
const SNARE_LOBES: &[Lobe] = &[
    (180.0, 280.0, 0.35),
    (350.0, 600.0, 0.10),
    (2000.0, 5000.0, 0.35),
    (6000.0, 10000.0, 0.20),
];
const CLAP_LOBES: &[Lobe] = &[
    (800.0, 1600.0, 0.30),
    (2000.0, 6000.0, 0.50),
    (6000.0, 10000.0, 0.20),
];
const CHAT_LOBES: &[Lobe] = &[
    (3000.0, 6000.0, 0.25),
    (7000.0, 12000.0, 0.55),
    (12000.0, 16000.0, 0.20),
];
const OHC_LOBES: &[Lobe] = &[
    (3000.0, 6000.0, 0.25),
    (6000.0, 12000.0, 0.50),
    (12000.0, 16000.0, 0.25),
];

fn lobes_for(instrument: Instrument) -> &'static [Lobe] {
    match instrument {
        Instrument::Kick => KICK_LOBES,
        Instrument::Snare => SNARE_LOBES,
        Instrument::Clap => CLAP_LOBES,
        Instrument::ClosedHat => CHAT_LOBES,
        Instrument::OpenHatCrash => OHC_LOBES,
    }
}

/// Immutable per-instrument weight table over the mel bands.
pub struct MaskTable {
    num_bands: usize,
    weights: [Vec<f32>; Instrument::COUNT],
}

impl MaskTable {
    /// Build the table for `num_bands` mel bands spanning [0, fs/2].
    ///
    /// Band centers are placed by inverting the mel mapping at half-band
    /// offsets, matching how the filterbank spaces its triangles.
    pub fn build(sample_rate: f32, num_bands: usize, lobe_rolloff: f32) -> Self {
        let nyquist = sample_rate * 0.5;
        let centers = band_centers_hz(num_bands, nyquist);

        let weights = Instrument::ALL.map(|inst| {
            let mut row = vec![0.0_f32; num_bands];
            for &(f1, f2, weight) in lobes_for(inst) {
                add_hann_lobe(&mut row, &centers, f1, f2, weight, lobe_rolloff);
            }
            normalize(&mut row);
            row
        });

        Self { num_bands, weights }
    }

    pub fn num_bands(&self) -> usize {
        self.num_bands
    }

    pub fn weights(&self, instrument: Instrument) -> &[f32] {
        &self.weights[instrument.index()]
    }

    /// Project one frame of band energies onto the five instruments.
    pub fn project(&self, bands: &[f32]) -> [f32; Instrument::COUNT] {
        debug_assert_eq!(bands.len(), self.num_bands);
        let mut out = [0.0_f32; Instrument::COUNT];
        for (k, row) in self.weights.iter().enumerate() {
            let mut sum = 0.0;
            for (w, b) in row.iter().zip(bands.iter()) {
                sum += w * b;
            }
            out[k] = sum;
        }
        out
    }
}

/// Band-center frequencies at half-band mel offsets over [0, nyquist].
fn band_centers_hz(num_bands: usize, nyquist: f32) -> Vec<f32> {
    let mel0 = hz_to_mel(0.0);
    let mel_n = hz_to_mel(nyquist);
    (0..num_bands)
        .map(|i| {
            let mel = mel0 + (mel_n - mel0) * (i as f32 + 0.5) / num_bands as f32;
            mel_to_hz(mel)
        })
        .collect()
}

/// Accumulate one flat-topped Hann lobe over [f1, f2] into `dest`.
///
/// The edge fraction of the span ramps with a raised cosine; the core is
/// flat at 1. `rolloff` is capped at 0.49 so the two edges never cross.
fn add_hann_lobe(
    dest: &mut [f32],
    band_centers: &[f32],
    f1: f32,
    f2: f32,
    weight: f32,
    rolloff: f32,
) {
    if f2 <= f1 {
        return;
    }
    let span = f2 - f1;
    let edge = (span * rolloff).clamp(0.0, span * 0.49);
    let core1 = f1 + edge;
    let core2 = f2 - edge;

    for (dest_w, &f) in dest.iter_mut().zip(band_centers.iter()) {
        let w = if f >= core1 && f <= core2 {
            1.0
        } else if f >= f1 && f < core1 {
            let x = (f - f1) / edge.max(1e-9);
            0.5 * (1.0 - (PI * x).cos())
        } else if f > core2 && f <= f2 {
            let x = (f2 - f) / edge.max(1e-9);
            0.5 * (1.0 - (PI * x).cos())
        } else {
            0.0
        };
        *dest_w += weight * w;
    }
}

fn normalize(row: &mut [f32]) {
    let sum: f32 = row.iter().sum();
    if sum <= 0.0 {
        return;
    }
    let inv = 1.0 / sum;
    for w in row.iter_mut() {
        *w *= inv;
    }
}
