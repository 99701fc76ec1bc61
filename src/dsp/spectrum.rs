// Magnitude spectrum via rustfft
//
// The forward plan is built once at construction and reused every frame;
// the scratch buffer is owned so the per-frame path does not allocate.

use rustfft::num_complex::Complex;
use rustfft::{Fft, FftPlanner};
use std::sync::Arc;

/// Computes magnitude spectra from windowed frames.
pub struct SpectrumAnalyzer {
    fft: Arc<dyn Fft<f32>>,
    size: usize,
    buffer: Vec<Complex<f32>>,
}

impl SpectrumAnalyzer {
    pub fn new(size: usize) -> Self {
        let mut planner = FftPlanner::new();
        let fft = planner.plan_fft_forward(size);
        Self {
            fft,
            size,
            buffer: vec![Complex::new(0.0, 0.0); size],
        }
    }

    /// Number of spectrum bins produced per frame (`size / 2 + 1`).
    pub fn bins(&self) -> usize {
        self.size / 2 + 1
    }

    /// Compute the magnitude spectrum of a (windowed) frame into `out`.
    ///
    /// Only positive frequencies are kept, exploiting the symmetry of the
    /// real-valued FFT.
    pub fn compute(&mut self, frame: &[f32], out: &mut Vec<f32>) {
        debug_assert_eq!(frame.len(), self.size);

        for (slot, &sample) in self.buffer.iter_mut().zip(frame.iter()) {
            *slot = Complex::new(sample, 0.0);
        }
        self.fft.process(&mut self.buffer);

        out.clear();
        out.extend(self.buffer[..self.bins()].iter().map(|c| c.norm()));
    }
}
