// DSP front end - framing, windowing, spectrum, mel bands
//
// Stateless between frames apart from the framer's overlap buffer and the
// cached FFT plan. Stages are driven synchronously by the pipeline worker,
// one token per frame.

pub mod framer;
pub mod mel;
pub mod spectrum;
pub mod stats;
pub mod window;
