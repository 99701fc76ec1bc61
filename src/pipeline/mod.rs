// Pipeline - the graph worker and its lifecycle
//
// Two threads participate: the capture callback fills the sample ring, and
// one graph worker drives everything from framing to publishing. Per frame
// the worker runs window -> spectrum -> mel -> masks, then the five
// instrument lanes in fixed order (the kick lane advances the shared log
// frame counter before any other lane touches the logger), then the
// forecaster, filter, and publisher. The MQTT transport owns its own
// threads behind a bounded queue, so the worker never blocks on the
// network.
//
// Shutdown is cooperative: the stop flag ends the feeder loop, remaining
// ring content is drained through the graph, the transport is shut down,
// and the log file is closed with its trailer.

pub mod stats;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::broadcast;

use crate::audio::ring::{sample_ring, RingConsumer};
use crate::audio::CaptureStream;
use crate::config::AppConfig;
use crate::dsp::framer::Framer;
use crate::dsp::mel::MelBands;
use crate::dsp::spectrum::SpectrumAnalyzer;
use crate::dsp::window::BlackmanHarris;
use crate::error::{log_audio_error, AudioError, StartError};
use crate::forecast::{ForecastFrame, Forecaster};
use crate::instruments::BandGate;
use crate::instruments::masks::MaskTable;
use crate::instruments::Instrument;
use crate::lighting::{LightingCommand, LightingFilter};
use crate::logging::HitLogger;
use crate::publish::MqttPublisher;
use crate::tracker::TempoTracker;
use stats::{PipelineStats, StatsSnapshot};

/// Ring capacity in seconds of audio.
const RING_SECONDS: usize = 5;

/// Feeder sleep while the ring holds less than one hop.
const FEEDER_IDLE_SLEEP: Duration = Duration::from_millis(1);

/// Idle polls between underrun log lines.
const IDLE_POLLS_PER_LOG: u64 = 1000;

/// Broadcast channel depth for the observational egress streams.
const EGRESS_CHANNEL_CAPACITY: usize = 256;

/// One observed gate hit, broadcast to observational subscribers.
#[derive(Debug, Clone, Serialize)]
pub struct HitEvent {
    pub instrument: Instrument,
    pub frame: u64,
    pub audio_time: f64,
}

/// The synchronous processing graph driven by the worker thread.
///
/// Public so integration tests can feed a ring directly without opening an
/// audio device.
pub struct GraphWorker {
    hop_size: usize,
    dt: f64,

    consumer: RingConsumer,
    framer: Framer,
    window: BlackmanHarris,
    spectrum: SpectrumAnalyzer,
    mel: MelBands,
    masks: MaskTable,
    gates: [BandGate; Instrument::COUNT],
    trackers: [TempoTracker; Instrument::COUNT],
    forecaster: Forecaster,
    filter: LightingFilter,
    publisher: Option<MqttPublisher>,
    logger: Arc<HitLogger>,
    stats: Arc<PipelineStats>,

    hit_tx: broadcast::Sender<HitEvent>,
    forecast_tx: broadcast::Sender<ForecastFrame>,

    // Per-frame scratch, allocated once
    frame_buf: Vec<f32>,
    spectrum_buf: Vec<f32>,
    bands_buf: Vec<f32>,
    commands_buf: Vec<LightingCommand>,

    idle_polls: u64,
    frames_processed: u64,
}

impl GraphWorker {
    pub fn new(
        config: &AppConfig,
        consumer: RingConsumer,
        publisher: Option<MqttPublisher>,
        logger: Arc<HitLogger>,
        stats: Arc<PipelineStats>,
        hit_tx: broadcast::Sender<HitEvent>,
        forecast_tx: broadcast::Sender<ForecastFrame>,
    ) -> Self {
        let audio = &config.audio;
        let sample_rate = audio.sample_rate as f32;

        let gates = Instrument::ALL.map(|inst| BandGate::from_config(config.gates.for_instrument(inst)));
        let trackers = Instrument::ALL.map(|_| TempoTracker::new(&config.tracker));

        Self {
            hop_size: audio.hop_size,
            dt: audio.hop_size as f64 / audio.sample_rate as f64,
            consumer,
            framer: Framer::new(audio.frame_size, audio.hop_size),
            window: BlackmanHarris::new(audio.frame_size),
            spectrum: SpectrumAnalyzer::new(audio.frame_size),
            mel: MelBands::new(audio.num_bands, audio.frame_size, sample_rate),
            masks: MaskTable::build(sample_rate, audio.num_bands, audio.lobe_rolloff),
            gates,
            trackers,
            forecaster: Forecaster::new(&config.forecaster, &config.tracker),
            filter: LightingFilter::new(&config.filter),
            publisher,
            logger,
            stats,
            hit_tx,
            forecast_tx,
            frame_buf: vec![0.0; audio.frame_size],
            spectrum_buf: Vec::with_capacity(audio.frame_size / 2 + 1),
            bands_buf: Vec::with_capacity(audio.num_bands),
            commands_buf: Vec::new(),
            idle_polls: 0,
            frames_processed: 0,
        }
    }

    /// Feeder + graph loop; returns when the stop flag is set and the ring
    /// has been drained.
    pub fn run(&mut self, stop: &AtomicBool) {
        let mut chunk = vec![0.0_f32; self.hop_size];

        while !stop.load(Ordering::Acquire) {
            if self.consumer.pop_exact(&mut chunk) {
                self.idle_polls = 0;
                self.process_chunk(&chunk);
            } else {
                self.idle_polls += 1;
                if self.idle_polls % IDLE_POLLS_PER_LOG == 0 {
                    log::warn!("feeder: no data for {} polls", self.idle_polls);
                }
                std::thread::sleep(FEEDER_IDLE_SLEEP);
            }
        }

        // Drain whole hops that were already captured before the stop.
        while self.consumer.pop_exact(&mut chunk) {
            self.process_chunk(&chunk);
        }

        self.finish();
    }

    /// Push one hop of samples through the graph.
    pub fn process_chunk(&mut self, chunk: &[f32]) {
        self.framer.push(chunk);
        while let Some(frame_idx) = self.framer.pop_frame(&mut self.frame_buf) {
            self.process_frame(frame_idx);
        }
    }

    fn process_frame(&mut self, frame_idx: u64) {
        let t_now = frame_idx as f64 * self.dt;

        self.window.apply(&mut self.frame_buf);
        self.spectrum.compute(&self.frame_buf, &mut self.spectrum_buf);
        self.mel.compute(&self.spectrum_buf, &mut self.bands_buf);
        let sums = self.masks.project(&self.bands_buf);

        // Instrument lanes in fixed order; the kick lane advances the
        // shared log frame counter before anyone else reads it. The packed
        // gate vector is what the tracking stage consumes.
        let mut gate_vector = [0.0_f32; Instrument::COUNT];
        for inst in Instrument::ALL {
            let k = inst.index();
            gate_vector[k] = self.gates[k].process(sums[k]);

            let log_frame = if k == 0 {
                self.logger.advance_frame()
            } else {
                self.logger.current_frame()
            };

            if gate_vector[k] >= 0.5 {
                self.logger.log_gate_hit(inst, gate_vector[k], log_frame, t_now);
                self.stats.record_hit(inst);
                let _ = self.hit_tx.send(HitEvent {
                    instrument: inst,
                    frame: frame_idx,
                    audio_time: t_now,
                });
            }
        }

        let mut any_hit = false;
        for inst in Instrument::ALL {
            let k = inst.index();
            self.trackers[k].predict(self.dt);
            if gate_vector[k] >= 0.5 {
                any_hit = true;
                self.trackers[k].observe_hit(t_now, frame_idx);
            }
        }

        if self.forecaster.should_emit(t_now, any_hit) {
            let forecast = self.forecaster.emit(t_now, frame_idx, &mut self.trackers);

            self.logger.log_forecasts(frame_idx, &forecast);
            self.filter.process(&forecast, &mut self.commands_buf);
            if let Some(publisher) = self.publisher.as_mut() {
                for command in &self.commands_buf {
                    publisher.publish(command);
                }
            }
            self.stats.record_forecast_emission();
            self.stats.record_commands(self.commands_buf.len() as u64);
            let _ = self.forecast_tx.send(forecast);
        }

        self.frames_processed += 1;
        self.stats.record_frame();
    }

    fn finish(&mut self) {
        if let Some(publisher) = self.publisher.as_mut() {
            let dropped = publisher.dropped_commands();
            if dropped > 0 {
                log::warn!("{} lighting commands dropped at the transport queue", dropped);
            }
            self.stats.set_commands_dropped(dropped);
            publisher.shutdown();
        }

        let dropped_samples = self.consumer.dropped_samples();
        if dropped_samples > 0 {
            log::warn!("capture overflow dropped {} samples", dropped_samples);
        }
        self.stats.set_samples_dropped(dropped_samples);

        self.logger.close();
        log::info!("graph worker stopped after {} frames", self.frames_processed);
    }

    pub fn frames_processed(&self) -> u64 {
        self.frames_processed
    }
}

/// Entry point: builds the graph, opens capture, and spawns the worker.
pub struct Pipeline;

impl Pipeline {
    /// Validate the configuration, open the capture device, and start the
    /// graph worker.
    pub fn start(config: AppConfig) -> Result<PipelineHandle, StartError> {
        config.validate()?;

        let audio = &config.audio;
        let (producer, consumer) = sample_ring(audio.sample_rate as usize * RING_SECONDS);

        let logger = Arc::new(HitLogger::create(
            &config.logger,
            audio.sample_rate,
            audio.hop_size,
        ));

        let publisher = match MqttPublisher::connect(&config.publisher) {
            Ok(publisher) => Some(publisher),
            Err(err) => return Err(StartError::Config(err)),
        };

        let (hit_tx, _) = broadcast::channel(EGRESS_CHANNEL_CAPACITY);
        let (forecast_tx, _) = broadcast::channel(EGRESS_CHANNEL_CAPACITY);
        let stats = Arc::new(PipelineStats::new());

        let mut worker = GraphWorker::new(
            &config,
            consumer,
            publisher,
            Arc::clone(&logger),
            Arc::clone(&stats),
            hit_tx.clone(),
            forecast_tx.clone(),
        );

        let stop = Arc::new(AtomicBool::new(false));
        let worker_stop = Arc::clone(&stop);
        let worker_thread = std::thread::Builder::new()
            .name("beatlight-graph".to_string())
            .spawn(move || worker.run(&worker_stop))
            .map_err(|e| StartError::Audio(AudioError::HardwareError {
                details: format!("failed to spawn graph worker: {}", e),
            }))?;

        let capture = match CaptureStream::start(audio.sample_rate, producer) {
            Ok(capture) => capture,
            Err(err) => {
                log_audio_error(&err, "Pipeline::start");
                stop.store(true, Ordering::Release);
                let _ = worker_thread.join();
                return Err(err.into());
            }
        };

        Ok(PipelineHandle {
            capture: Some(capture),
            worker: Some(worker_thread),
            stop,
            hit_tx,
            forecast_tx,
            logger,
            stats,
        })
    }
}

/// Running pipeline: stop it, or subscribe to its egress streams.
pub struct PipelineHandle {
    capture: Option<CaptureStream>,
    worker: Option<JoinHandle<()>>,
    stop: Arc<AtomicBool>,
    hit_tx: broadcast::Sender<HitEvent>,
    forecast_tx: broadcast::Sender<ForecastFrame>,
    logger: Arc<HitLogger>,
    stats: Arc<PipelineStats>,
}

impl PipelineHandle {
    /// Observational stream of gate hits.
    pub fn subscribe_hits(&self) -> broadcast::Receiver<HitEvent> {
        self.hit_tx.subscribe()
    }

    /// Observational stream of forecast emissions.
    pub fn subscribe_forecasts(&self) -> broadcast::Receiver<ForecastFrame> {
        self.forecast_tx.subscribe()
    }

    /// Point-in-time activity counters.
    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    /// Whether the hit log is still writing.
    pub fn log_enabled(&self) -> bool {
        self.logger.is_enabled()
    }

    /// Cooperative shutdown: stop capture, drain the graph, close the log.
    pub fn stop(mut self) -> Result<(), AudioError> {
        if self.worker.is_none() {
            return Err(AudioError::NotRunning);
        }

        // Stop capture first so the ring stops filling, then let the
        // worker drain what remains.
        if let Some(capture) = self.capture.take() {
            capture.stop();
        }
        self.stop.store(true, Ordering::Release);
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
        Ok(())
    }

    /// Run until the timeout elapses (or forever when `None`), then stop.
    pub fn run_for(self, timeout: Option<Duration>) -> Result<(), AudioError> {
        match timeout {
            Some(duration) => std::thread::sleep(duration),
            None => loop {
                std::thread::sleep(Duration::from_millis(500));
            },
        }
        self.stop()
    }
}

impl Drop for PipelineHandle {
    fn drop(&mut self) {
        if self.worker.is_some() {
            if let Some(capture) = self.capture.take() {
                capture.stop();
            }
            self.stop.store(true, Ordering::Release);
            if let Some(worker) = self.worker.take() {
                let _ = worker.join();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_config() -> AppConfig {
        let mut config = AppConfig::default();
        config.logger.enabled = false;
        config
    }

    fn test_worker(config: &AppConfig) -> (GraphWorker, crate::audio::ring::RingProducer) {
        let (producer, consumer) = sample_ring(config.audio.sample_rate as usize);
        let (hit_tx, _) = broadcast::channel(EGRESS_CHANNEL_CAPACITY);
        let (forecast_tx, _) = broadcast::channel(EGRESS_CHANNEL_CAPACITY);
        let logger = Arc::new(HitLogger::disabled());
        let stats = Arc::new(PipelineStats::new());
        let worker = GraphWorker::new(config, consumer, None, logger, stats, hit_tx, forecast_tx);
        (worker, producer)
    }

    #[test]
    fn test_worker_processes_frames_from_chunks() {
        let config = test_config();
        let (mut worker, _producer) = test_worker(&config);

        // frame_size samples prime the framer; each further hop yields one
        // frame
        let hop = vec![0.01_f32; config.audio.hop_size];
        let hops_to_prime = config.audio.frame_size / config.audio.hop_size;
        for _ in 0..hops_to_prime {
            worker.process_chunk(&hop);
        }
        assert_eq!(worker.frames_processed(), 1);

        for _ in 0..10 {
            worker.process_chunk(&hop);
        }
        assert_eq!(worker.frames_processed(), 11);
    }

    #[test]
    fn test_worker_run_drains_ring_on_stop() {
        let config = test_config();
        let (mut worker, mut producer) = test_worker(&config);

        // preload two frames' worth of audio, then run with stop already set
        let samples = vec![0.01_f32; config.audio.frame_size + config.audio.hop_size];
        assert_eq!(producer.push(&samples), samples.len());

        let stop = AtomicBool::new(true);
        worker.run(&stop);
        assert_eq!(worker.frames_processed(), 2);
    }

    #[test]
    fn test_worker_stop_flag_ends_run() {
        let config = test_config();
        let (worker, _producer) = test_worker(&config);
        let stop = Arc::new(AtomicBool::new(false));

        let stop_clone = Arc::clone(&stop);
        let handle = std::thread::spawn(move || {
            let mut worker = worker;
            worker.run(&stop_clone);
            worker.frames_processed()
        });

        std::thread::sleep(Duration::from_millis(50));
        stop.store(true, Ordering::Release);
        let frames = handle.join().unwrap();
        assert_eq!(frames, 0);
    }

    #[test]
    fn test_logger_frame_counter_advances_once_per_frame() {
        let config = test_config();
        let (producer, consumer) = sample_ring(config.audio.sample_rate as usize);
        let _ = producer;
        let (hit_tx, _) = broadcast::channel(16);
        let (forecast_tx, _) = broadcast::channel(16);
        let logger = Arc::new(HitLogger::disabled());
        let stats = Arc::new(PipelineStats::new());
        let mut worker = GraphWorker::new(
            &config,
            consumer,
            None,
            Arc::clone(&logger),
            stats,
            hit_tx,
            forecast_tx,
        );

        let hop = vec![0.0_f32; config.audio.hop_size];
        let hops_to_prime = config.audio.frame_size / config.audio.hop_size;
        for _ in 0..hops_to_prime + 4 {
            worker.process_chunk(&hop);
        }

        assert_eq!(worker.frames_processed(), 5);
        assert_eq!(logger.frames_total(), 5);
    }
}
