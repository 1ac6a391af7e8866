use std::{path::PathBuf, str::FromStr};

#[cfg(feature = "serde")]
use serde::Deserialize;

use crate::{error::Error, prelude::Duration};

/// Stream formats we know how to decode
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum StreamFormat {
    /// RTCM 3.x
    Rtcm3,
}

impl FromStr for StreamFormat {
    type Err = Error;
    /// Source tables describe formats loosely ("RTCM_3", "RTCM_3.2", "RTCM_3_MSM"..)
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let upper = s.trim().to_uppercase();
        if upper.contains("RTCM_3") {
            Ok(Self::Rtcm3)
        } else {
            Err(Error::UnsupportedStreamFormat(s.to_string()))
        }
    }
}

impl std::fmt::Display for StreamFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            Self::Rtcm3 => write!(f, "RTCM_3"),
        }
    }
}

fn default_stream_format() -> String {
    "RTCM_3".to_string()
}

fn default_raw_output_path() -> PathBuf {
    PathBuf::from("raw.rtcm3")
}

fn default_rinex_path() -> PathBuf {
    PathBuf::from("./")
}

fn default_rinex_version() -> f64 {
    3.01
}

fn default_max_epoch_offset() -> Duration {
    Duration::from_seconds(600.0)
}

fn default_chunk_size() -> usize {
    4096
}

fn default_backoff() -> Duration {
    Duration::from_seconds(1.0)
}

fn default_max_backoff() -> Duration {
    Duration::from_seconds(60.0)
}

fn default_user_agent() -> String {
    format!("NTRIP gnss-ntrip/{}", env!("CARGO_PKG_VERSION"))
}

fn default_connect_timeout() -> Duration {
    Duration::from_seconds(10.0)
}

fn default_read_timeout() -> Duration {
    Duration::from_seconds(5.0)
}

/// RINEX production, forwarded once to the decoder's writer.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Deserialize))]
pub struct RinexOpts {
    /// Turn RINEX production on or off
    #[cfg_attr(feature = "serde", serde(default))]
    pub write: bool,
    /// Output directory
    #[cfg_attr(feature = "serde", serde(default = "default_rinex_path"))]
    pub path: PathBuf,
    /// RINEX revision
    #[cfg_attr(feature = "serde", serde(default = "default_rinex_version"))]
    pub version: f64,
}

impl Default for RinexOpts {
    fn default() -> Self {
        Self {
            write: false,
            path: default_rinex_path(),
            version: default_rinex_version(),
        }
    }
}

/// [RetryPolicy] applies to network failures. Mount point
/// failures are never retried.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Deserialize))]
pub struct RetryPolicy {
    /// Number of consecutive reconnections we allow before giving up.
    /// Zero means the task stops on the first network failure.
    #[cfg_attr(feature = "serde", serde(default))]
    pub max_retries: u32,
    /// Initial delay, doubled on each consecutive failure
    #[cfg_attr(feature = "serde", serde(default = "default_backoff"))]
    pub backoff: Duration,
    /// Upper bound of the delay
    #[cfg_attr(feature = "serde", serde(default = "default_max_backoff"))]
    pub max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 0,
            backoff: default_backoff(),
            max_backoff: default_max_backoff(),
        }
    }
}

impl RetryPolicy {
    /// Delay to apply before the n-th (starting at 1) consecutive retry
    pub fn delay(&self, attempt: u32) -> Duration {
        let factor = 2.0_f64.powi(attempt.saturating_sub(1).min(16) as i32);
        let delay = self.backoff * factor;
        if delay > self.max_backoff {
            self.max_backoff
        } else {
            delay
        }
    }
}

/// Streaming task [Config]
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Deserialize))]
pub struct Config {
    /// Stream format label, see [StreamFormat]
    #[cfg_attr(feature = "serde", serde(default = "default_stream_format"))]
    pub stream_format: String,
    /// Capture the raw stream. Raw capture also disables
    /// staleness and duplicate filtering.
    #[cfg_attr(feature = "serde", serde(default))]
    pub raw_output: bool,
    /// Raw capture file
    #[cfg_attr(feature = "serde", serde(default = "default_raw_output_path"))]
    pub raw_output_path: PathBuf,
    /// RINEX production
    #[cfg_attr(feature = "serde", serde(default))]
    pub rinex: RinexOpts,
    /// Observations further away from "now" are considered stale.
    #[cfg_attr(feature = "serde", serde(default = "default_max_epoch_offset"))]
    pub max_epoch_offset: Duration,
    /// Largest number of bytes received per request.
    /// Following bytes are received on the next request.
    #[cfg_attr(feature = "serde", serde(default = "default_chunk_size"))]
    pub chunk_size: usize,
    /// [RetryPolicy] on network failure
    #[cfg_attr(feature = "serde", serde(default))]
    pub retry: RetryPolicy,
    /// User-Agent announced to the caster
    #[cfg_attr(feature = "serde", serde(default = "default_user_agent"))]
    pub user_agent: String,
    #[cfg_attr(feature = "serde", serde(default = "default_connect_timeout"))]
    pub connect_timeout: Duration,
    /// A request with nothing to read after this delay is "not yet receivable"
    #[cfg_attr(feature = "serde", serde(default = "default_read_timeout"))]
    pub read_timeout: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            stream_format: default_stream_format(),
            raw_output: false,
            raw_output_path: default_raw_output_path(),
            rinex: RinexOpts::default(),
            max_epoch_offset: default_max_epoch_offset(),
            chunk_size: default_chunk_size(),
            retry: RetryPolicy::default(),
            user_agent: default_user_agent(),
            connect_timeout: default_connect_timeout(),
            read_timeout: default_read_timeout(),
        }
    }
}

impl Config {
    /// Copies and returns [Config] with raw capture to given file.
    pub fn with_raw_output(&self, path: PathBuf) -> Self {
        let mut s = self.clone();
        s.raw_output = true;
        s.raw_output_path = path;
        s
    }

    /// Copies and returns [Config] with RINEX production in given directory.
    pub fn with_rinex(&self, path: PathBuf, version: f64) -> Self {
        let mut s = self.clone();
        s.rinex = RinexOpts {
            write: true,
            path,
            version,
        };
        s
    }

    /// Copies and returns [Config] with desired [RetryPolicy]
    pub fn with_retry(&self, retry: RetryPolicy) -> Self {
        let mut s = self.clone();
        s.retry = retry;
        s
    }

    /// Copies and returns [Config] with desired stream format
    pub fn with_stream_format(&self, format: &str) -> Self {
        let mut s = self.clone();
        s.stream_format = format.to_string();
        s
    }

    /// Configured [StreamFormat]
    pub fn stream_format(&self) -> Result<StreamFormat, Error> {
        StreamFormat::from_str(&self.stream_format)
    }

    /// Verifies this [Config] prior deployment.
    pub fn validate(&self) -> Result<(), Error> {
        let _ = self.stream_format()?;
        if self.chunk_size == 0 {
            return Err(Error::InvalidChunkSize);
        }
        if self.rinex.version.trunc() as u8 != 3 {
            return Err(Error::UnsupportedRinexVersion(self.rinex.version));
        }
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::{Config, RetryPolicy, StreamFormat};
    use crate::{error::Error, prelude::Duration};
    use std::{path::PathBuf, str::FromStr};

    #[test]
    fn stream_format_parsing() {
        for label in ["RTCM_3", "RTCM_3.2", "rtcm_3_msm", " RTCM_3 "] {
            assert_eq!(StreamFormat::from_str(label).unwrap(), StreamFormat::Rtcm3);
        }
        for label in ["RTCM_2", "CMR+", "RAW", ""] {
            assert!(matches!(
                StreamFormat::from_str(label),
                Err(Error::UnsupportedStreamFormat(_))
            ));
        }
    }

    #[test]
    fn config_validation() {
        assert!(Config::default().validate().is_ok());

        let cfg = Config::default().with_stream_format("CMR+");
        assert!(matches!(cfg.validate(), Err(Error::UnsupportedStreamFormat(_))));

        let mut cfg = Config::default();
        cfg.chunk_size = 0;
        assert!(matches!(cfg.validate(), Err(Error::InvalidChunkSize)));

        let cfg = Config::default().with_rinex(PathBuf::from("/tmp"), 2.11);
        assert!(matches!(
            cfg.validate(),
            Err(Error::UnsupportedRinexVersion(_))
        ));

        let mut cfg = Config::default();
        cfg.rinex.version = 3.05;
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn retry_delay() {
        let retry = RetryPolicy {
            max_retries: 10,
            backoff: Duration::from_seconds(1.0),
            max_backoff: Duration::from_seconds(5.0),
        };
        assert_eq!(retry.delay(1), Duration::from_seconds(1.0));
        assert_eq!(retry.delay(2), Duration::from_seconds(2.0));
        assert_eq!(retry.delay(3), Duration::from_seconds(4.0));
        assert_eq!(retry.delay(4), Duration::from_seconds(5.0));
        assert_eq!(retry.delay(100), Duration::from_seconds(5.0));
    }

    #[cfg(feature = "serde")]
    #[test]
    fn config_deserialization() {
        let content = r#"{
            "stream_format": "RTCM_3.2",
            "raw_output": true,
            "raw_output_path": "/tmp/raw.rtcm3",
            "rinex": { "write": true, "path": "/data/rinex" },
            "chunk_size": 8192
        }"#;

        let cfg: Config = serde_json::from_str(content).unwrap();
        assert!(cfg.raw_output);
        assert_eq!(cfg.raw_output_path, PathBuf::from("/tmp/raw.rtcm3"));
        assert!(cfg.rinex.write);
        assert_eq!(cfg.rinex.version, 3.01);
        assert_eq!(cfg.chunk_size, 8192);
        assert_eq!(cfg.max_epoch_offset, Duration::from_seconds(600.0));
        assert_eq!(cfg.retry.max_retries, 0);
        assert!(cfg.validate().is_ok());
    }
}
