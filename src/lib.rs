// Beatlight - real-time percussive hit forecasting for lighting control
//
// A live mono audio stream is framed, projected onto per-instrument band
// masks, and gated into percussive hit streams. Per-instrument Kalman/PLL
// trackers estimate tempo and phase, a forecaster projects the next hits
// with calibrated uncertainty, and a filter turns surviving forecasts into
// wall-clock-stamped lighting commands published over MQTT.

// Module declarations
pub mod audio;
pub mod config;
pub mod dsp;
pub mod error;
pub mod forecast;
pub mod instruments;
pub mod lighting;
pub mod logging;
pub mod pipeline;
pub mod publish;
pub mod testing;
pub mod tracker;

// Re-exports for convenience
pub use config::AppConfig;
pub use instruments::Instrument;
pub use pipeline::{HitEvent, Pipeline, PipelineHandle};
