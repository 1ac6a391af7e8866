//! Network queries against a caster
use std::io::Write;

use crate::{error::Error, mountpoint::Endpoint};

mod ntrip1;
pub use ntrip1::Ntrip1Query;

/// [QueryStatus] after a request cycle
#[derive(Default, Debug, Copy, Clone, PartialEq, Eq)]
pub enum QueryStatus {
    /// Nothing requested yet
    #[default]
    Init,
    /// Connected, waiting for data
    Running,
    /// Data was received and may be decoded
    DataReceivable,
    /// Caster ended the session gracefully
    Finished,
    /// Permanent failure
    Error,
}

/// [NetworkQuery] performs one request/response cycle against a caster.
/// Implementations may block for a meaningful duration.
pub trait NetworkQuery: Send {
    /// Requests data from the caster. `buf` is cleared and refilled
    /// with whatever was received during this cycle: its length
    /// is the received length.
    /// `nmea` is the position sentence to attach, when the mount point requires it.
    fn start_request(
        &mut self,
        endpoint: &Endpoint,
        nmea: Option<&str>,
        buf: &mut Vec<u8>,
    ) -> Result<QueryStatus, Error>;

    /// [QueryStatus] of the latest cycle
    fn status(&self) -> QueryStatus;

    /// Writes received data verbatim, without any framing.
    fn write_raw_data(&self, w: &mut dyn Write, buf: &[u8]) -> Result<(), Error> {
        w.write_all(buf)?;
        Ok(())
    }
}
