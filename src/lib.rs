#![doc = include_str!("../README.md")]
#![cfg_attr(docrs, feature(doc_cfg))]

extern crate gnss_rs as gnss;

// private modules
mod cfg;
mod decoder;
mod error;
mod filter;
mod mountpoint;
mod nmea;
mod observation;
mod query;
mod rinex;
mod sink;
mod task;
mod time;

#[cfg(test)]
mod tests;

// prelude
pub mod prelude {
    pub use crate::cfg::{Config, RetryPolicy, RinexOpts, StreamFormat};
    pub use crate::decoder::{Decoder, DecoderFactory, Rtcm3Decoder, StreamFormatFactory};
    pub use crate::error::{Error, Severity};
    pub use crate::filter::{EpochFilter, Rejection};
    pub use crate::mountpoint::{Endpoint, MountPoint, NtripVersion, DEFAULT_CASTER_PORT};
    pub use crate::nmea::gga_sentence;
    pub use crate::observation::{Batch, SatelliteObservation, Signal};
    pub use crate::query::{NetworkQuery, Ntrip1Query, QueryStatus};
    pub use crate::rinex::{RinexObsWriter, RinexWriter};
    pub use crate::sink::{ObservationCenter, ObservationSink};
    pub use crate::task::{CancelToken, Task, TaskStats};
    pub use crate::time::{SystemClock, TimeSource};
    // re-export
    pub use gnss::prelude::{Constellation, SV};
    pub use hifitime::{Duration, Epoch, TimeScale};
}

// pub export
pub use error::Error;
