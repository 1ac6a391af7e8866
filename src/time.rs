use crate::{error::Error, prelude::Epoch};

/// [TimeSource] provides the current [Epoch].
/// Both the staleness check and the RTCM time of week resolution
/// depend on it, which makes them deterministic in tests.
pub trait TimeSource: Send {
    /// Current [Epoch], in any [crate::prelude::TimeScale].
    fn now(&self) -> Result<Epoch, Error>;
}

/// [SystemClock] is the [TimeSource] used in production.
#[derive(Debug, Default, Copy, Clone)]
pub struct SystemClock {}

impl TimeSource for SystemClock {
    fn now(&self) -> Result<Epoch, Error> {
        Epoch::now().map_err(|_| Error::SystemTime)
    }
}

impl<T: TimeSource + Sync + ?Sized> TimeSource for std::sync::Arc<T> {
    fn now(&self) -> Result<Epoch, Error> {
        self.as_ref().now()
    }
}
