
use std::{
    collections::VecDeque,
    path::{Path, PathBuf},
    sync::{Arc, Mutex},
};

use log::LevelFilter;
use std::sync::Once;

use crate::{
    cfg::StreamFormat,
    decoder::{Decoder, DecoderFactory},
    error::Error,
    mountpoint::{Endpoint, MountPoint},
    observation::SatelliteObservation,
    prelude::Epoch,
    query::{NetworkQuery, QueryStatus},
    rinex::RinexWriter,
    task::CancelToken,
    time::TimeSource,
};

static INIT: Once = Once::new();

pub fn init_logger() {
    INIT.call_once(|| {
        env_logger::builder()
            .is_test(true)
            .filter_level(LevelFilter::Debug)
            .init();
    });
}

/// [TimeSource] frozen at one [Epoch]
#[derive(Debug, Copy, Clone)]
pub struct FixedClock {
    t: Epoch,
}

impl FixedClock {
    pub fn new(t: Epoch) -> Self {
        Self { t }
    }
}

impl TimeSource for FixedClock {
    fn now(&self) -> Result<Epoch, Error> {
        Ok(self.t)
    }
}

/// One scripted caster reply
pub enum Reply {
    /// Bytes received
    Data(Vec<u8>),
    /// Nothing to receive yet
    NotYet,
    /// [QueryStatus::Error]
    Failure,
    /// Request failure
    Err(Error),
}

/// [NetworkQuery] replaying a script. The [CancelToken] is
/// cancelled once the script is exhausted.
pub struct ScriptedQuery {
    status: QueryStatus,
    token: CancelToken,
    replies: VecDeque<Reply>,
    /// Position sentences we were requested with
    pub requests: Arc<Mutex<Vec<Option<String>>>>,
}

impl ScriptedQuery {
    pub fn new(token: &CancelToken, replies: Vec<Reply>) -> Self {
        Self {
            status: QueryStatus::Init,
            token: token.clone(),
            replies: replies.into_iter().collect(),
            requests: Default::default(),
        }
    }
}

impl NetworkQuery for ScriptedQuery {
    fn start_request(
        &mut self,
        _endpoint: &Endpoint,
        nmea: Option<&str>,
        buf: &mut Vec<u8>,
    ) -> Result<QueryStatus, Error> {
        self.requests
            .lock()
            .unwrap()
            .push(nmea.map(|s| s.to_string()));

        buf.clear();

        self.status = match self.replies.pop_front() {
            Some(Reply::Data(data)) => {
                buf.extend_from_slice(&data);
                QueryStatus::DataReceivable
            },
            Some(Reply::NotYet) => QueryStatus::Running,
            Some(Reply::Failure) => QueryStatus::Error,
            Some(Reply::Err(e)) => {
                self.status = QueryStatus::Error;
                return Err(e);
            },
            None => {
                self.token.cancel();
                QueryStatus::Finished
            },
        };
        Ok(self.status)
    }

    fn status(&self) -> QueryStatus {
        self.status
    }
}

/// What happened to our [MockDecoder]s
#[derive(Default)]
pub struct MockState {
    /// Decoding outcomes, one per decode call
    pub outcomes: VecDeque<Result<Vec<SatelliteObservation>, Error>>,
    /// Number of decode calls
    pub decoded: usize,
    /// RINEX (write, path, version) as forwarded
    pub rinex: (bool, PathBuf, f64),
    /// Observations forwarded to the RINEX writer
    pub dumped: Vec<SatelliteObservation>,
    pub closed: bool,
}

pub type SharedState = Arc<Mutex<MockState>>;

struct MockWriter {
    state: SharedState,
}

impl RinexWriter for MockWriter {
    fn set_write_file(&mut self, enabled: bool) {
        self.state.lock().unwrap().rinex.0 = enabled;
    }

    fn set_file_path(&mut self, path: &Path) {
        self.state.lock().unwrap().rinex.1 = path.to_path_buf();
    }

    fn set_rinex_version(&mut self, version: f64) -> Result<(), Error> {
        self.state.lock().unwrap().rinex.2 = version;
        Ok(())
    }

    fn dump_epoch(&mut self, obs: &SatelliteObservation) -> Result<(), Error> {
        self.state.lock().unwrap().dumped.push(obs.clone());
        Ok(())
    }

    fn close(&mut self) -> Result<(), Error> {
        self.state.lock().unwrap().closed = true;
        Ok(())
    }
}

/// [Decoder] replaying scripted outcomes
pub struct MockDecoder {
    ready: bool,
    readiness: bool,
    writer: MockWriter,
    observations: Vec<SatelliteObservation>,
}

impl Decoder for MockDecoder {
    fn init_rinex(&mut self, _mountpoint: &MountPoint) {
        self.ready = self.readiness;
    }

    fn is_ready(&self) -> bool {
        self.ready
    }

    fn decode(&mut self, _buf: &[u8]) -> Result<usize, Error> {
        let mut state = self.writer.state.lock().unwrap();
        state.decoded += 1;
        match state.outcomes.pop_front() {
            Some(Ok(observations)) => {
                self.observations.extend(observations);
                Ok(1)
            },
            Some(Err(e)) => Err(e),
            None => Ok(0),
        }
    }

    fn observations(&self) -> &[SatelliteObservation] {
        &self.observations
    }

    fn clear_observations(&mut self) {
        self.observations.clear();
    }

    fn rinex_writer(&mut self) -> Option<&mut dyn RinexWriter> {
        Some(&mut self.writer)
    }

    fn dump_rinex_epoch(&mut self, obs: &SatelliteObservation, _format: &str) -> Result<(), Error> {
        self.writer.dump_epoch(obs)
    }
}

/// [DecoderFactory] building [MockDecoder]s,
/// failing the first `failures` attempts.
pub struct MockFactory {
    state: SharedState,
    failures: usize,
    ready: bool,
    /// Build attempts
    pub attempts: Arc<Mutex<usize>>,
}

impl MockFactory {
    pub fn new(state: &SharedState) -> Self {
        Self {
            state: state.clone(),
            failures: 0,
            ready: true,
            attempts: Default::default(),
        }
    }

    pub fn with_failures(mut self, failures: usize) -> Self {
        self.failures = failures;
        self
    }

    pub fn never_ready(mut self) -> Self {
        self.ready = false;
        self
    }
}

impl DecoderFactory for MockFactory {
    fn build(&self, _format: StreamFormat, _station: &str) -> Result<Box<dyn Decoder>, Error> {
        let mut attempts = self.attempts.lock().unwrap();
        *attempts += 1;
        if *attempts <= self.failures {
            return Err(Error::DecoderUnavailable);
        }
        Ok(Box::new(MockDecoder {
            ready: false,
            readiness: self.ready,
            observations: Vec::new(),
            writer: MockWriter {
                state: self.state.clone(),
            },
        }))
    }
}
