//! Stream decoders
use std::sync::Arc;

use crate::{
    cfg::StreamFormat,
    error::Error,
    mountpoint::MountPoint,
    observation::SatelliteObservation,
    rinex::RinexWriter,
    time::TimeSource,
};

mod bits;
mod rtcm3;

pub use rtcm3::Rtcm3Decoder;

/// [Decoder] turns received bytes into [SatelliteObservation]s.
/// It owns the produced observations, and an optional [RinexWriter].
pub trait Decoder: Send {
    /// Completes the decoder setup, once, prior first use.
    fn init_rinex(&mut self, mountpoint: &MountPoint);

    /// True once the decoder may be used. The streaming task will not
    /// use a decoder that is not ready.
    fn is_ready(&self) -> bool;

    /// Decodes this buffer, appending new observations to the internal list.
    /// Incomplete messages are kept until following bytes are presented.
    /// Returns the number of complete messages that were consumed.
    fn decode(&mut self, buf: &[u8]) -> Result<usize, Error>;

    /// Observations decoded so far
    fn observations(&self) -> &[SatelliteObservation];

    /// Drops all decoded observations
    fn clear_observations(&mut self);

    /// [RinexWriter] owned by this decoder, if any.
    fn rinex_writer(&mut self) -> Option<&mut dyn RinexWriter>;

    /// Forwards one accepted observation to the [RinexWriter].
    fn dump_rinex_epoch(&mut self, obs: &SatelliteObservation, format: &str) -> Result<(), Error>;

    /// Releases all resources held by this decoder.
    fn close(&mut self) -> Result<(), Error> {
        match self.rinex_writer() {
            Some(writer) => writer.close(),
            None => Ok(()),
        }
    }
}

/// [DecoderFactory] builds a [Decoder] for a given [StreamFormat].
pub trait DecoderFactory: Send {
    fn build(&self, format: StreamFormat, station: &str) -> Result<Box<dyn Decoder>, Error>;
}

/// [StreamFormatFactory] builds our own [Decoder]s.
pub struct StreamFormatFactory {
    clock: Arc<dyn TimeSource + Sync>,
}

impl StreamFormatFactory {
    /// Builds new [StreamFormatFactory]. Decoders will
    /// use this [TimeSource] to resolve partial timestamps.
    pub fn new(clock: Arc<dyn TimeSource + Sync>) -> Self {
        Self { clock }
    }
}

impl DecoderFactory for StreamFormatFactory {
    fn build(&self, format: StreamFormat, station: &str) -> Result<Box<dyn Decoder>, Error> {
        match format {
            StreamFormat::Rtcm3 => Ok(Box::new(Rtcm3Decoder::new(
                station,
                Box::new(self.clock.clone()),
            ))),
        }
    }
}
