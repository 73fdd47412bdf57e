use serde::{Deserialize, Serialize};

#[derive(Debug, thiserror::Error, PartialEq)]
pub enum ConfigError {
    #[error("frame rate must be positive, got {0}")]
    BadFrameRate(f64),
    #[error("background cycle must be at least one frame")]
    ZeroBackgroundCycle,
    #[error("nib timeout must be positive, got {0}")]
    BadTimeout(f64),
}

/// Executive construction values. Parsing and file loading are external;
/// this is the plain value surface they produce.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecConfig {
    /// External tick rate in frames per second.
    pub frame_rate_hz: f64,
    /// Requested time-critical workers; clamped to CPUs - 1 at startup.
    pub tc_threads: usize,
    /// Background housekeeping cadence in frames.
    pub background_frames: u16,
    /// Fold measured frame overrun into the next dt instead of resetting.
    pub variable_dt: bool,
    /// Simulated time-of-day start, seconds past midnight (wall clock when
    /// unset).
    pub time_of_day: Option<f64>,
    /// Simulated calendar date override (year, month, day).
    pub date: Option<(u16, u8, u8)>,
    /// Minimum value the wrapping id generators restart from.
    pub id_floor: u16,
    /// Window after which an input NIB with timeouts enabled goes stale.
    pub nib_timeout_secs: f64,
}

impl Default for ExecConfig {
    fn default() -> Self {
        Self {
            frame_rate_hz: 50.0,
            tc_threads: 2,
            background_frames: 16,
            variable_dt: false,
            time_of_day: None,
            date: None,
            id_floor: 1,
            nib_timeout_secs: 12.5,
        }
    }
}

impl ExecConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(self.frame_rate_hz > 0.0) {
            return Err(ConfigError::BadFrameRate(self.frame_rate_hz));
        }
        if self.background_frames == 0 {
            return Err(ConfigError::ZeroBackgroundCycle);
        }
        if !(self.nib_timeout_secs > 0.0) {
            return Err(ConfigError::BadTimeout(self.nib_timeout_secs));
        }
        Ok(())
    }
}
