// Mel filterbank - B band energies per frame
//
// Triangular filters spaced equally on the mel scale across [0, fs/2].
// Band output is the filter-weighted sum of squared bin magnitudes, an
// energy-like scale so a percussive hit moves the band by the square of its
// amplitude change. The mel mapping here (2595 * log10(1 + hz/700)) is the
// same one the instrument masks invert to place their lobes.

/// Hz -> mel (HTK formula).
pub fn hz_to_mel(hz: f32) -> f32 {
    2595.0 * (1.0 + hz / 700.0).log10()
}

/// Mel -> Hz (inverse HTK formula).
pub fn mel_to_hz(mel: f32) -> f32 {
    700.0 * (10.0_f32.powf(mel / 2595.0) - 1.0)
}

/// Precomputed triangular filterbank.
pub struct MelBands {
    num_bands: usize,
    /// Per band: (first spectrum bin, triangle weights from that bin)
    filters: Vec<(usize, Vec<f32>)>,
}

impl MelBands {
    /// Build `num_bands` filters for spectra of `fft_size / 2 + 1` bins at
    /// `sample_rate`, spanning 0 Hz to Nyquist.
    pub fn new(num_bands: usize, fft_size: usize, sample_rate: f32) -> Self {
        assert!(num_bands >= 1);
        let nyquist = sample_rate * 0.5;
        let bins = fft_size / 2 + 1;
        let hz_per_bin = sample_rate / fft_size as f32;

        // num_bands + 2 edge frequencies, equally spaced in mel
        let mel_max = hz_to_mel(nyquist);
        let edges_hz: Vec<f32> = (0..num_bands + 2)
            .map(|i| mel_to_hz(mel_max * i as f32 / (num_bands + 1) as f32))
            .collect();

        let mut filters = Vec::with_capacity(num_bands);
        for band in 0..num_bands {
            let f_lo = edges_hz[band];
            let f_center = edges_hz[band + 1];
            let f_hi = edges_hz[band + 2];

            let bin_lo = (f_lo / hz_per_bin).ceil() as usize;
            let bin_hi = ((f_hi / hz_per_bin).floor() as usize).min(bins - 1);

            let mut weights = Vec::new();
            let mut first = bin_lo;
            let mut started = false;
            for bin in bin_lo..=bin_hi {
                let f = bin as f32 * hz_per_bin;
                let w = if f <= f_center {
                    if f_center > f_lo {
                        (f - f_lo) / (f_center - f_lo)
                    } else {
                        0.0
                    }
                } else if f_hi > f_center {
                    (f_hi - f) / (f_hi - f_center)
                } else {
                    0.0
                };
                if !started {
                    if w <= 0.0 {
                        first = bin + 1;
                        continue;
                    }
                    started = true;
                }
                weights.push(w.max(0.0));
            }
            filters.push((first, weights));
        }

        Self { num_bands, filters }
    }

    pub fn num_bands(&self) -> usize {
        self.num_bands
    }

    /// Compute band energies for one magnitude spectrum into `out`.
    pub fn compute(&self, spectrum: &[f32], out: &mut Vec<f32>) {
        out.clear();
        out.resize(self.num_bands, 0.0);
        for (band, (first, weights)) in self.filters.iter().enumerate() {
            let mut energy = 0.0;
            for (offset, &w) in weights.iter().enumerate() {
                let bin = first + offset;
                if bin < spectrum.len() {
                    let mag = spectrum[bin];
                    energy += w * mag * mag;
                }
            }
            out[band] = energy;
        }
    }
}
