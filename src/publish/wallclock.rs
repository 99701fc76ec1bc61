// Wall-clock composition - pipeline lead-time to absolute POSIX instants
//
// The baseline (whole seconds + microseconds) is captured once at configure
// time; every command's prediction time is then split into whole seconds
// and rounded microseconds and added component-wise, so a large epoch never
// meets a fractional second inside one f64.

use std::time::{SystemTime, UNIX_EPOCH};

const MICROS_PER_SEC: i64 = 1_000_000;

/// Wall-clock baseline captured at pipeline start.
#[derive(Debug, Clone, Copy)]
pub struct WallClock {
    epoch_sec: i64,
    micro_sec: i64,
}

impl WallClock {
    /// Capture the current wall clock as the baseline.
    pub fn now() -> Self {
        let since_epoch = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default();
        Self {
            epoch_sec: since_epoch.as_secs() as i64,
            micro_sec: since_epoch.subsec_micros() as i64,
        }
    }

    /// Fixed baseline, for deterministic composition.
    pub fn with_parts(epoch_sec: i64, micro_sec: i64) -> Self {
        Self {
            epoch_sec,
            micro_sec,
        }
    }

    /// Compose a pipeline-relative prediction time into
    /// `(unix_time, microseconds)` with `microseconds` in [0, 999999].
    pub fn compose(&self, t_pred_sec: f64) -> (i64, i64) {
        let whole_sec = t_pred_sec.floor() as i64;
        let frac_us = ((t_pred_sec - whole_sec as f64) * 1e6).round() as i64;

        let mut out_sec = self.epoch_sec + whole_sec;
        let mut out_us = self.micro_sec + frac_us;

        if out_us >= MICROS_PER_SEC {
            out_sec += out_us / MICROS_PER_SEC;
            out_us %= MICROS_PER_SEC;
        }
        if out_us < 0 {
            let borrow = (-out_us + MICROS_PER_SEC - 1) / MICROS_PER_SEC;
            out_sec -= borrow;
            out_us += borrow * MICROS_PER_SEC;
        }

        (out_sec, out_us)
    }
}
