//! Hit/forecast log - JSON lines with a shared frame counter
//!
//! One timestamped file per run. Records share a prefix (frame, audio
//! time, wall-clock milliseconds, relative wall time) so hits and
//! forecasts can be joined offline against external captures. The logger
//! owns the frame counter used by every gate sink: the kick sink advances
//! it exactly once per frame, the other sinks read it.
//!
//! A disk error disables further writes but never stops the graph; the
//! `is_enabled` predicate makes the degradation observable.

use std::fs::{self, File};
use std::io::Write;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::{Instant, SystemTime, UNIX_EPOCH};

use crate::config::LoggerConfig;
use crate::forecast::ForecastFrame;
use crate::instruments::Instrument;

/// Gate outputs at or above this are logged as hits.
const HIT_LOG_THRESHOLD: f32 = 0.5;

struct LoggerInner {
    file: Option<File>,
    path: Option<PathBuf>,
}

pub struct HitLogger {
    inner: Mutex<LoggerInner>,
    frame_counter: AtomicU64,
    started: Instant,
}

impl HitLogger {
    /// Open a timestamped log file under the configured directory.
    ///
    /// Failure to create the directory or file logs a warning and yields a
    /// disabled logger.
    pub fn create(config: &LoggerConfig, sample_rate: u32, hop_size: usize) -> Self {
        if !config.enabled {
            return Self::disabled();
        }

        let file = Self::open_log_file(&config.log_dir).and_then(|(mut file, path)| {
            let header = format!(
                "# Hit and Prediction Log\n\
                 # Sample Rate: {} Hz\n\
                 # Hop Size: {} samples\n\
                 # Format: JSON Lines (one object per line)\n\
                 # Fields: frame, audio_time, wall_time_ms, wall_time_rel, type, instrument, ...\n\
                 #\n",
                sample_rate, hop_size
            );
            match file.write_all(header.as_bytes()) {
                Ok(()) => Some((file, path)),
                Err(err) => {
                    log::warn!("failed to write log header: {}", err);
                    None
                }
            }
        });

        match file {
            Some((file, path)) => {
                log::info!("writing hit/prediction log to {}", path.display());
                Self {
                    inner: Mutex::new(LoggerInner {
                        file: Some(file),
                        path: Some(path),
                    }),
                    frame_counter: AtomicU64::new(0),
                    started: Instant::now(),
                }
            }
            None => Self::disabled(),
        }
    }

    /// A logger that counts frames but never writes.
    pub fn disabled() -> Self {
        Self {
            inner: Mutex::new(LoggerInner {
                file: None,
                path: None,
            }),
            frame_counter: AtomicU64::new(0),
            started: Instant::now(),
        }
    }

    fn open_log_file(log_dir: &str) -> Option<(File, PathBuf)> {
        if let Err(err) = fs::create_dir_all(log_dir) {
            log::warn!("could not create log directory {}: {}", log_dir, err);
            return None;
        }
        let stamp = chrono::Local::now().format("%Y%m%d_%H%M%S");
        let path = PathBuf::from(log_dir).join(format!("hits_predictions_{}.log", stamp));
        match File::create(&path) {
            Ok(file) => Some((file, path)),
            Err(err) => {
                log::warn!("could not open log file {}: {}", path.display(), err);
                None
            }
        }
    }

    /// Whether writes are still going to disk.
    pub fn is_enabled(&self) -> bool {
        self.inner.lock().map(|g| g.file.is_some()).unwrap_or(false)
    }

    /// Path of the open log file, if any.
    pub fn path(&self) -> Option<PathBuf> {
        self.inner.lock().ok().and_then(|g| g.path.clone())
    }

    /// Advance the shared frame counter; called once per frame by the
    /// kick (index 0) sink. Returns the frame index being processed.
    pub fn advance_frame(&self) -> u64 {
        self.frame_counter.fetch_add(1, Ordering::Relaxed)
    }

    /// Frame index currently being processed; read-only access for the
    /// non-zero instrument sinks.
    pub fn current_frame(&self) -> u64 {
        self.frame_counter
            .load(Ordering::Relaxed)
            .saturating_sub(1)
    }

    /// Total frames counted so far.
    pub fn frames_total(&self) -> u64 {
        self.frame_counter.load(Ordering::Relaxed)
    }

    /// Log one fired gate (values below 0.5 are ignored).
    pub fn log_gate_hit(&self, instrument: Instrument, value: f32, frame: u64, audio_time: f64) {
        if value < HIT_LOG_THRESHOLD {
            return;
        }
        let line = format!(
            "{{\"frame\":{},\"audio_time\":{:.6},\"wall_time_ms\":{},\"wall_time_rel\":{:.6},\
             \"type\":\"hit\",\"instrument\":\"{}\",\"value\":{:.6}}}\n",
            frame,
            audio_time,
            wall_time_ms(),
            self.started.elapsed().as_secs_f64(),
            instrument.name(),
            value
        );
        self.write_line(&line);
    }

    /// Log every projected hit of one forecast emission.
    pub fn log_forecasts(&self, frame: u64, forecast: &ForecastFrame) {
        if !self.is_enabled() {
            return;
        }
        let wall_ms = wall_time_ms();
        let wall_rel = self.started.elapsed().as_secs_f64();

        for pred in &forecast.predictions {
            for hit in &pred.hits {
                let line = format!(
                    "{{\"frame\":{},\"audio_time\":{:.6},\"wall_time_ms\":{},\
                     \"wall_time_rel\":{:.6},\"type\":\"prediction\",\"instrument\":\"{}\",\
                     \"predicted_time\":{:.6},\"confidence\":{:.6},\"ci_low\":{:.6},\
                     \"ci_high\":{:.6},\"hit_index\":{}}}\n",
                    frame,
                    forecast.timestamp_sec,
                    wall_ms,
                    wall_rel,
                    pred.instrument.name(),
                    hit.t_pred_sec,
                    hit.confidence,
                    hit.ci_low_sec,
                    hit.ci_high_sec,
                    hit.hit_index
                );
                self.write_line(&line);
            }
        }
    }

    /// Write the trailer and close the file.
    pub fn close(&self) {
        let mut guard = match self.inner.lock() {
            Ok(guard) => guard,
            Err(_) => return,
        };
        if let Some(mut file) = guard.file.take() {
            let trailer = format!(
                "# Log ended. Total frames logged: {}\n",
                self.frame_counter.load(Ordering::Relaxed)
            );
            let _ = file.write_all(trailer.as_bytes());
            let _ = file.flush();
        }
    }

    fn write_line(&self, line: &str) {
        let mut guard = match self.inner.lock() {
            Ok(guard) => guard,
            Err(_) => return,
        };
        let Some(file) = guard.file.as_mut() else {
            return;
        };
        // Flush-per-write: the log doubles as a live debugging tap.
        let result = file.write_all(line.as_bytes()).and_then(|_| file.flush());
        if let Err(err) = result {
            log::error!("log write failed, disabling hit log: {}", err);
            guard.file = None;
        }
    }
}

fn wall_time_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::forecast::{ForecastHit, InstrumentForecast};

    fn temp_log_dir(tag: &str) -> String {
        let dir = std::env::temp_dir().join(format!(
            "beatlight_log_test_{}_{}",
            tag,
            std::process::id()
        ));
        let _ = fs::remove_dir_all(&dir);
        dir.to_string_lossy().into_owned()
    }

    fn logger_in(dir: &str) -> HitLogger {
        HitLogger::create(
            &LoggerConfig {
                log_dir: dir.to_string(),
                enabled: true,
            },
            44100,
            256,
        )
    }

    fn read_log(logger: &HitLogger) -> String {
        let path = logger.path().expect("log file path");
        fs::read_to_string(path).expect("read log file")
    }

    #[test]
    fn test_creates_timestamped_file_with_header() {
        let dir = temp_log_dir("header");
        let logger = logger_in(&dir);
        assert!(logger.is_enabled());

        let path = logger.path().unwrap();
        let name = path.file_name().unwrap().to_string_lossy().into_owned();
        assert!(name.starts_with("hits_predictions_"));
        assert!(name.ends_with(".log"));

        let contents = read_log(&logger);
        assert!(contents.starts_with("# Hit and Prediction Log\n"));
        assert!(contents.contains("# Sample Rate: 44100 Hz"));
        assert!(contents.contains("# Hop Size: 256 samples"));

        let _ = fs::remove_dir_all(dir);
    }

    #[test]
    fn test_frame_counter_protocol() {
        let logger = HitLogger::disabled();

        // kick sink advances, others read the same frame
        assert_eq!(logger.advance_frame(), 0);
        assert_eq!(logger.current_frame(), 0);
        assert_eq!(logger.advance_frame(), 1);
        assert_eq!(logger.current_frame(), 1);
        assert_eq!(logger.frames_total(), 2);
    }

    #[test]
    fn test_gate_hit_record_shape() {
        let dir = temp_log_dir("hit");
        let logger = logger_in(&dir);

        logger.log_gate_hit(Instrument::Snare, 1.0, 42, 0.243810);

        let line = read_log(&logger)
            .lines()
            .find(|l| !l.starts_with('#'))
            .map(String::from)
            .expect("one record");
        let value: serde_json::Value = serde_json::from_str(&line).unwrap();
        assert_eq!(value["frame"], 42);
        assert_eq!(value["type"], "hit");
        assert_eq!(value["instrument"], "snare");
        assert_eq!(value["value"], 1.0);
        assert!(value["audio_time"].is_f64());
        assert!(value["wall_time_ms"].is_i64());
        assert!(value["wall_time_rel"].is_f64());

        let _ = fs::remove_dir_all(dir);
    }

    #[test]
    fn test_sub_threshold_values_not_logged() {
        let dir = temp_log_dir("subthreshold");
        let logger = logger_in(&dir);

        logger.log_gate_hit(Instrument::Kick, 0.0, 1, 0.01);
        logger.log_gate_hit(Instrument::Kick, 0.49, 2, 0.02);

        let records = read_log(&logger)
            .lines()
            .filter(|l| !l.starts_with('#'))
            .count();
        assert_eq!(records, 0);

        let _ = fs::remove_dir_all(dir);
    }

    #[test]
    fn test_forecast_records() {
        let dir = temp_log_dir("forecast");
        let logger = logger_in(&dir);

        let forecast = ForecastFrame {
            timestamp_sec: 5.0,
            frame_idx: 860,
            predictions: vec![InstrumentForecast {
                instrument: Instrument::Kick,
                tempo_bpm: 120.0,
                period_sec: 0.5,
                phase: 0.1,
                confidence_global: 0.8,
                warmup_complete: true,
                hits: vec![
                    ForecastHit {
                        t_pred_sec: 5.45,
                        ci_low_sec: 5.40,
                        ci_high_sec: 5.50,
                        confidence: 0.8,
                        hit_index: 1,
                    },
                    ForecastHit {
                        t_pred_sec: 5.95,
                        ci_low_sec: 5.90,
                        ci_high_sec: 6.00,
                        confidence: 0.8,
                        hit_index: 2,
                    },
                ],
            }],
        };
        logger.log_forecasts(860, &forecast);

        let contents = read_log(&logger);
        let records: Vec<serde_json::Value> = contents
            .lines()
            .filter(|l| !l.starts_with('#'))
            .map(|l| serde_json::from_str(l).unwrap())
            .collect();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0]["type"], "prediction");
        assert_eq!(records[0]["instrument"], "kick");
        assert_eq!(records[0]["hit_index"], 1);
        assert_eq!(records[1]["hit_index"], 2);
        assert!((records[0]["predicted_time"].as_f64().unwrap() - 5.45).abs() < 1e-9);

        let _ = fs::remove_dir_all(dir);
    }

    #[test]
    fn test_close_writes_trailer() {
        let dir = temp_log_dir("trailer");
        let logger = logger_in(&dir);

        logger.advance_frame();
        logger.advance_frame();
        logger.advance_frame();
        logger.close();
        assert!(!logger.is_enabled());

        let contents = read_log(&logger);
        assert!(contents.ends_with("# Log ended. Total frames logged: 3\n"));

        let _ = fs::remove_dir_all(dir);
    }

    #[test]
    fn test_disabled_logger_is_inert() {
        let logger = HitLogger::disabled();
        assert!(!logger.is_enabled());
        assert!(logger.path().is_none());
        // no panics on any operation
        logger.log_gate_hit(Instrument::Kick, 1.0, 0, 0.0);
        logger.close();
    }
}
