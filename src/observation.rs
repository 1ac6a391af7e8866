//! Satellite observations
use crate::prelude::{Epoch, SV};

/// One observed value, labeled by its RINEX observable code.
#[derive(Debug, Clone, PartialEq)]
pub struct Signal {
    /// RINEX observable ("C1C", "L1C", "S1C"..)
    pub observable: String,
    /// Observed value: meters for code, cycles for phase, dB-Hz for SNR
    pub value: f64,
}

impl Signal {
    pub fn new(observable: &str, value: f64) -> Self {
        Self {
            value,
            observable: observable.to_string(),
        }
    }
}

/// [SatelliteObservation] as produced by a [crate::prelude::Decoder]:
/// all signals observed on one [SV] at one [Epoch].
#[derive(Debug, Clone, PartialEq)]
pub struct SatelliteObservation {
    /// Sampling [Epoch], expressed in the constellation [crate::prelude::TimeScale]
    pub t: Epoch,
    /// [SV]
    pub sv: SV,
    /// Station that produced this observation
    pub station: String,
    /// Observed [Signal]s
    pub signals: Vec<Signal>,
}

impl SatelliteObservation {
    /// Builds a new [SatelliteObservation] without any signal.
    pub fn new(t: Epoch, sv: SV, station: &str) -> Self {
        Self {
            t,
            sv,
            station: station.to_string(),
            signals: Vec::new(),
        }
    }

    /// Copies and returns [SatelliteObservation] with one more [Signal]
    pub fn with_signal(&self, observable: &str, value: f64) -> Self {
        let mut s = self.clone();
        s.signals.push(Signal::new(observable, value));
        s
    }

    /// Returns value observed for given RINEX observable, if any
    pub fn value(&self, observable: &str) -> Option<f64> {
        self.signals
            .iter()
            .find(|sig| sig.observable == observable)
            .map(|sig| sig.value)
    }
}

/// Accepted [SatelliteObservation]s, gathered within one iteration.
pub type Batch = Vec<SatelliteObservation>;
