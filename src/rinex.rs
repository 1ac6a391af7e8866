//! RINEX observation production
use std::{
    collections::HashMap,
    fs::File,
    io::{BufWriter, Write},
    path::{Path, PathBuf},
    str::FromStr,
};

use itertools::Itertools;
use log::{debug, info, warn};

use rinex::{
    marker::GeodeticMarker,
    observation::HeaderFields as ObsHeader,
    prelude::{
        obs::{EpochFlag, ObsKey, Observations, SignalObservation},
        Header, Observable,
    },
};

use crate::{
    error::Error,
    observation::SatelliteObservation,
    prelude::{Constellation, Epoch, TimeScale},
};

/// [RinexWriter] is the format writer owned by a [crate::prelude::Decoder].
pub trait RinexWriter: Send {
    /// Turn file production on or off
    fn set_write_file(&mut self, enabled: bool);
    /// Output directory
    fn set_file_path(&mut self, path: &Path);
    /// RINEX revision to produce
    fn set_rinex_version(&mut self, version: f64) -> Result<(), Error>;
    /// Stores one accepted [SatelliteObservation]
    fn dump_epoch(&mut self, obs: &SatelliteObservation) -> Result<(), Error>;
    /// Flushes pending data and releases the file
    fn close(&mut self) -> Result<(), Error>;
}

/// GPST (year, day of year) of this [Epoch], day of year starting at 1
fn gpst_day(t: Epoch) -> (i32, u16) {
    let t = t.to_time_scale(TimeScale::GPST);
    let (y, _, _, _, _, _, _) = t.to_gregorian(TimeScale::GPST);
    (y, t.day_of_year().floor() as u16 + 1)
}

fn formatting_error<E: std::fmt::Display>(e: E) -> Error {
    Error::RinexFormatting(e.to_string())
}

/// [RinexObsWriter] produces daily RINEX V3 observation files,
/// gathering [SatelliteObservation]s into epochs.
///
/// Observables are declared in the header: they should be declared
/// with [RinexObsWriter::declare_observables] prior production, observables
/// of the very first epoch are appended to the declared ones.
/// Observables not declared in the header cannot be written.
pub struct RinexObsWriter {
    station: String,
    enabled: bool,
    directory: PathBuf,
    version: f64,
    declared: HashMap<Constellation, Vec<Observable>>,
    /// Header of the file being produced
    header: Option<Header>,
    fd: Option<BufWriter<File>>,
    /// GPST day covered by the file being produced
    day: Option<(i32, u16)>,
    /// Epoch being gathered
    pending: Vec<SatelliteObservation>,
}

impl RinexObsWriter {
    /// Builds a new [RinexObsWriter], disabled by default
    pub fn new(station: &str) -> Self {
        Self {
            station: station.to_string(),
            enabled: false,
            directory: PathBuf::from("./"),
            version: 3.01,
            declared: HashMap::new(),
            header: None,
            fd: None,
            day: None,
            pending: Vec::new(),
        }
    }

    /// Declares these observables ("C1C", "L1C"..) for this [Constellation].
    /// Applies to the files created from now on.
    pub fn declare_observables(
        &mut self,
        constellation: Constellation,
        codes: &[&str],
    ) -> Result<(), Error> {
        let declared = self.declared.entry(constellation).or_default();
        for code in codes {
            let observable = Observable::from_str(code)
                .map_err(|_| Error::RinexFormatting(format!("invalid observable \"{}\"", code)))?;
            if !declared.contains(&observable) {
                declared.push(observable);
            }
        }
        Ok(())
    }

    /// Returns true when RINEX production is turned on
    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// RINEX revision being produced
    pub fn version(&self) -> f64 {
        self.version
    }

    /// Output directory
    pub fn directory(&self) -> &Path {
        &self.directory
    }

    /// RINEX V3 long file name, for this [Epoch]
    pub fn filename(&self, t: Epoch) -> String {
        let (y, _, _, hh, mm, _, _) = t.to_gregorian(TimeScale::GPST);
        let (_, doy) = gpst_day(t);
        let mut name = self
            .station
            .to_uppercase()
            .chars()
            .filter(|c| c.is_ascii_alphanumeric())
            .take(9)
            .collect::<String>();
        while name.len() < 9 {
            name.push('0');
        }
        format!(
            "{}_R_{:04}{:03}{:02}{:02}_01D_MO.rnx",
            name, y, doy, hh, mm
        )
    }

    /// Header of a new file starting at this [Epoch]
    fn build_header(&self, t: Epoch) -> Result<Header, Error> {
        let mut header = Header::default();
        let mut obs_header = ObsHeader::default();

        header.version.major = 3;
        header.version.minor = ((self.version - 3.0) * 100.0).round() as u8;

        let mut codes = self.declared.clone();
        for obs in self.pending.iter() {
            let observables = codes.entry(obs.sv.constellation).or_default();
            for signal in obs.signals.iter() {
                let observable = Observable::from_str(&signal.observable).map_err(|_| {
                    Error::RinexFormatting(format!("invalid observable \"{}\"", signal.observable))
                })?;
                if !observables.contains(&observable) {
                    observables.push(observable);
                }
            }
        }

        header.constellation = match codes.keys().exactly_one() {
            Ok(constellation) => Some(*constellation),
            Err(_) => Some(Constellation::Mixed),
        };

        for (constellation, observables) in codes.into_iter() {
            obs_header.codes.insert(constellation, observables);
        }

        obs_header.timeof_first_obs = Some(t);

        header.program = Some(format!("gnss-ntrip v{}", env!("CARGO_PKG_VERSION")));

        // file creation time
        if let Ok(now) = Epoch::now() {
            let (y, m, d, hh, mm, ss, _) = now.to_gregorian_utc();
            header.date = Some(format!(
                "{:04}{:02}{:02} {:02}{:02}{:02} UTC",
                y, m, d, hh, mm, ss
            ));
        }

        header.geodetic_marker = Some(GeodeticMarker::default().with_name(&self.station));
        header.obs = Some(obs_header);
        Ok(header)
    }

    /// Creates a new file, starting at this [Epoch]
    fn create_file(&mut self, t: Epoch) -> Result<(), Error> {
        let header = self.build_header(t)?;
        let path = self.directory.join(self.filename(t));
        info!("{} - creating {}", self.station, path.display());

        let mut fd = BufWriter::new(File::create(&path)?);
        header.format(&mut fd).map_err(formatting_error)?;
        fd.flush()?;

        self.fd = Some(fd);
        self.header = Some(header);
        self.day = Some(gpst_day(t));
        Ok(())
    }

    /// Flushes and releases the file being produced
    fn release_file(&mut self) -> Result<(), Error> {
        self.header = None;
        self.day = None;
        if let Some(mut fd) = self.fd.take() {
            fd.flush()?;
        }
        Ok(())
    }

    /// Releases the epoch being gathered
    fn flush_epoch(&mut self) -> Result<(), Error> {
        let Some(t) = self.pending.first().map(|obs| obs.t) else {
            return Ok(());
        };

        // one file per day
        if self.day.is_some_and(|day| day != gpst_day(t)) {
            self.release_file()?;
        }

        if self.fd.is_none() {
            self.create_file(t)?;
        }

        let (Some(header), Some(fd)) = (self.header.as_ref(), self.fd.as_mut()) else {
            return Ok(());
        };

        let Some(obs_header) = header.obs.as_ref() else {
            return Ok(());
        };

        let mut observations = Observations::default();

        for obs in self.pending.iter().sorted_by_key(|obs| obs.sv) {
            let declared = obs_header.codes.get(&obs.sv.constellation);
            for signal in obs.signals.iter() {
                let Ok(observable) = Observable::from_str(&signal.observable) else {
                    warn!("{} - invalid observable {}", self.station, signal.observable);
                    continue;
                };
                if !declared.is_some_and(|codes| codes.contains(&observable)) {
                    warn!(
                        "{}({}) - {} not declared in header",
                        t, obs.sv, signal.observable
                    );
                    continue;
                }
                observations.signals.push(SignalObservation {
                    sv: obs.sv,
                    lli: None,
                    snr: None,
                    value: signal.value,
                    observable,
                });
            }
        }

        let key = ObsKey {
            epoch: t,
            flag: EpochFlag::Ok,
        };

        observations
            .format(false, &key, obs_header, fd)
            .map_err(formatting_error)?;
        fd.flush()?;

        debug!("{} - {} rinex epoch released", self.station, t);
        self.pending.clear();
        Ok(())
    }
}

impl RinexWriter for RinexObsWriter {
    fn set_write_file(&mut self, enabled: bool) {
        self.enabled = enabled;
    }

    fn set_file_path(&mut self, path: &Path) {
        self.directory = path.to_path_buf();
    }

    fn set_rinex_version(&mut self, version: f64) -> Result<(), Error> {
        if version.trunc() as u8 != 3 {
            return Err(Error::UnsupportedRinexVersion(version));
        }
        self.version = version;
        Ok(())
    }

    fn dump_epoch(&mut self, obs: &SatelliteObservation) -> Result<(), Error> {
        if !self.enabled {
            return Ok(());
        }
        if let Some(pending) = self.pending.first() {
            if pending.t != obs.t {
                self.flush_epoch()?;
            }
        }
        self.pending.push(obs.clone());
        Ok(())
    }

    fn close(&mut self) -> Result<(), Error> {
        self.flush_epoch()?;
        self.release_file()
    }
}
