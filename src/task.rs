//! Streaming task
use std::{
    fs::File,
    io::{BufWriter, Write},
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    thread::JoinHandle,
};

use log::{debug, error, info, warn};

use crate::{
    cfg::{Config, StreamFormat},
    decoder::{Decoder, DecoderFactory, StreamFormatFactory},
    error::{Error, Severity},
    filter::EpochFilter,
    mountpoint::{MountPoint, NtripVersion},
    nmea::gga_sentence,
    observation::Batch,
    prelude::{Duration, Epoch, SV},
    query::{NetworkQuery, Ntrip1Query, QueryStatus},
    sink::ObservationSink,
    time::{SystemClock, TimeSource},
};

/// Cancellation is verified on this period, while waiting
const CANCEL_POLL_PERIOD: std::time::Duration = std::time::Duration::from_millis(50);

/// [CancelToken] stops one or several [Task]s.
/// Tasks verify it on every iteration boundary.
#[derive(Debug, Default, Clone)]
pub struct CancelToken {
    cancelled: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// Waits for this [Duration], unless cancelled in the meantime.
    /// Returns true if cancelled.
    pub fn wait(&self, dt: Duration) -> bool {
        let mut remaining = std::time::Duration::from_secs_f64(dt.to_seconds().max(0.0));
        while !self.is_cancelled() && !remaining.is_zero() {
            let step = remaining.min(CANCEL_POLL_PERIOD);
            std::thread::sleep(step);
            remaining -= step;
        }
        self.is_cancelled()
    }
}

/// [Task] statistics
#[derive(Debug, Default, Copy, Clone, PartialEq)]
pub struct TaskStats {
    /// Request cycles
    pub iterations: u64,
    /// Bytes received
    pub received_bytes: u64,
    /// Iterations dropped due to decoding failure
    pub decoding_failures: u64,
    /// Observations accepted
    pub accepted: u64,
    /// Observations rejected (stale, old or duplicate)
    pub rejected: u64,
    /// Batches published
    pub batches: u64,
}

/// [Task] streams one [MountPoint]: it requests data from the caster,
/// decodes it, filters the resulting observations and publishes them.
/// It runs until cancelled or until a fatal error happens.
pub struct Task {
    mountpoint: MountPoint,
    cfg: Config,
    format: StreamFormat,
    query: Box<dyn NetworkQuery>,
    factory: Box<dyn DecoderFactory>,
    /// Created on first use, at most once
    decoder: Option<Box<dyn Decoder>>,
    decoders_built: usize,
    clock: Box<dyn TimeSource>,
    sink: Arc<dyn ObservationSink>,
    filter: EpochFilter,
    buffer: Vec<u8>,
    raw: Option<BufWriter<File>>,
    /// Consecutive network retries
    retries: u32,
    stats: TaskStats,
}

impl Task {
    /// Builds a new [Task] streaming this [MountPoint] and publishing to this [ObservationSink].
    /// Fails when the [MountPoint] or [Config] cannot be supported.
    pub fn new(
        mountpoint: MountPoint,
        cfg: Config,
        sink: Arc<dyn ObservationSink>,
    ) -> Result<Self, Error> {
        let query: Box<dyn NetworkQuery> = match mountpoint.version {
            NtripVersion::V1 => Box::new(Ntrip1Query::new(&cfg)),
            NtripVersion::V2 | NtripVersion::V2S => {
                return Err(Error::UnsupportedNtripVersion(
                    mountpoint.version.to_string(),
                ));
            },
        };

        let factory = StreamFormatFactory::new(Arc::new(SystemClock::default()));

        Self::with_components(
            mountpoint,
            cfg,
            query,
            Box::new(factory),
            Box::new(SystemClock::default()),
            sink,
        )
    }

    /// Builds a new [Task] from custom components.
    pub fn with_components(
        mountpoint: MountPoint,
        cfg: Config,
        query: Box<dyn NetworkQuery>,
        factory: Box<dyn DecoderFactory>,
        clock: Box<dyn TimeSource>,
        sink: Arc<dyn ObservationSink>,
    ) -> Result<Self, Error> {
        cfg.validate()?;
        let format = cfg.stream_format()?;
        Ok(Self {
            query,
            factory,
            clock,
            sink,
            format,
            decoder: None,
            decoders_built: 0,
            raw: None,
            retries: 0,
            buffer: Vec::with_capacity(cfg.chunk_size),
            filter: EpochFilter::new(cfg.max_epoch_offset),
            stats: TaskStats::default(),
            mountpoint,
            cfg,
        })
    }

    /// [MountPoint] being streamed
    pub fn mountpoint(&self) -> &MountPoint {
        &self.mountpoint
    }

    /// [TaskStats] so far
    pub fn stats(&self) -> TaskStats {
        self.stats
    }

    /// Number of [Decoder]s created so far: 0 or 1
    pub fn decoders_built(&self) -> usize {
        self.decoders_built
    }

    /// Latest accepted [Epoch] for this [SV]
    pub fn last_epoch(&self, sv: SV) -> Option<Epoch> {
        self.filter.last_epoch(sv)
    }

    /// Returns the [Decoder], creating it if need be.
    /// None when it could not be created or is not ready yet.
    pub fn decoder(&mut self) -> Option<&mut (dyn Decoder + 'static)> {
        if self.decoder.is_none() {
            if let Err(e) = self.init_decoder() {
                warn!("{} - decoder unavailable: {}", self.mountpoint.station, e);
                return None;
            }
        }
        let decoder = self.decoder.as_deref_mut()?;
        if decoder.is_ready() {
            Some(decoder)
        } else {
            debug!("{} - decoder not ready", self.mountpoint.station);
            None
        }
    }

    fn init_decoder(&mut self) -> Result<(), Error> {
        let station = &self.mountpoint.station;
        let mut decoder = self.factory.build(self.format, station)?;

        decoder.init_rinex(&self.mountpoint);

        if let Some(writer) = decoder.rinex_writer() {
            writer.set_write_file(self.cfg.rinex.write);
            writer.set_file_path(&self.cfg.rinex.path);
            writer.set_rinex_version(self.cfg.rinex.version)?;
        }

        info!("{} - {} decoder created", station, self.format);
        self.decoder = Some(decoder);
        self.decoders_built += 1;
        Ok(())
    }

    /// Position sentence to attach to the request
    fn nmea(&self) -> Option<String> {
        if !self.mountpoint.nmea_required {
            return None;
        }
        let (lat, lon) = (self.mountpoint.latitude, self.mountpoint.longitude);
        if lat == 0.0 && lon == 0.0 {
            return Some(String::new());
        }
        match self.clock.now() {
            Ok(t) => Some(gga_sentence(lat, lon, t)),
            Err(_) => Some(String::new()),
        }
    }

    /// One request, decode, validate and dispatch cycle.
    fn iterate(&mut self) -> Result<(), Error> {
        let station = self.mountpoint.station.clone();
        self.stats.iterations += 1;

        let nmea = self.nmea();

        let status =
            self.query
                .start_request(&self.mountpoint.endpoint, nmea.as_deref(), &mut self.buffer)?;

        match status {
            QueryStatus::DataReceivable => {},
            QueryStatus::Error => return Err(Error::QueryFailure),
            status => {
                debug!("{} - {:?}: nothing to receive", station, status);
                return Ok(());
            },
        }

        // link is healthy
        self.retries = 0;
        self.stats.received_bytes += self.buffer.len() as u64;

        if let Some(raw) = self.raw.as_mut() {
            self.query.write_raw_data(raw, &self.buffer)?;
        }

        if self.decoder().is_none() {
            return Ok(());
        }

        let Some(decoder) = self.decoder.as_mut() else {
            return Ok(());
        };

        decoder.clear_observations();

        if !self.buffer.is_empty() {
            if let Err(e) = decoder.decode(&self.buffer) {
                self.stats.decoding_failures += 1;
                warn!("{} - decoding failure: {}", station, e);
                return Ok(());
            }
        }

        let observations = decoder.observations().to_vec();
        if observations.is_empty() {
            return Ok(());
        }

        // raw capture is a pass-through
        let now = if self.cfg.raw_output {
            None
        } else {
            Some(self.clock.now()?)
        };

        let format = self.format.to_string();
        let mut batch = Batch::with_capacity(observations.len());

        for obs in observations {
            if let Err(rejection) = self.filter.check(&obs, now) {
                warn!("{} - {}({}): {}", obs.station, obs.t, obs.sv, rejection);
                self.stats.rejected += 1;
                continue;
            }

            if let Err(e) = decoder.dump_rinex_epoch(&obs, &format) {
                error!("{} - rinex: {}", station, e);
            }

            self.stats.accepted += 1;
            batch.push(obs);
        }

        if !batch.is_empty() {
            debug!("{} - publishing {} observations", station, batch.len());
            self.stats.batches += 1;
            self.sink.publish(batch);
        }

        Ok(())
    }

    fn retry_allowed(&self, e: &Error) -> bool {
        e.severity() == Severity::Network && self.retries < self.cfg.retry.max_retries
    }

    fn run_loop(&mut self, token: &CancelToken) -> Result<(), Error> {
        while !token.is_cancelled() {
            match self.iterate() {
                Ok(()) => {},
                Err(e) if e.is_fatal() => {
                    if !self.retry_allowed(&e) {
                        error!("{} - {}", self.mountpoint.station, e);
                        return Err(e);
                    }
                    self.retries += 1;
                    let delay = self.cfg.retry.delay(self.retries);
                    warn!(
                        "{} - {}: retry {}/{} in {}",
                        self.mountpoint.station, e, self.retries, self.cfg.retry.max_retries, delay
                    );
                    if token.wait(delay) {
                        break;
                    }
                },
                Err(e) => {
                    error!(
                        "{} - {} (endpoint: {})",
                        self.mountpoint.station, e, self.mountpoint.endpoint
                    );
                },
            }
        }
        info!("{} - cancelled", self.mountpoint.station);
        Ok(())
    }

    /// Releases raw capture and decoder resources
    fn release(&mut self) {
        if let Some(mut raw) = self.raw.take() {
            if let Err(e) = raw.flush() {
                error!("{} - raw capture: {}", self.mountpoint.station, e);
            }
        }
        if let Some(decoder) = self.decoder.as_mut() {
            if let Err(e) = decoder.close() {
                error!("{} - decoder release: {}", self.mountpoint.station, e);
            }
        }
    }

    /// Streams until cancelled (Ok) or until a fatal error happens.
    /// Raw capture and decoder resources are released in both cases.
    pub fn run(&mut self, token: &CancelToken) -> Result<(), Error> {
        info!(
            "{} - streaming {} (ntrip v{})",
            self.mountpoint.station, self.mountpoint.endpoint, self.mountpoint.version
        );

        if self.cfg.raw_output {
            let fd = File::create(&self.cfg.raw_output_path)?;
            self.raw = Some(BufWriter::new(fd));
        }

        let result = self.run_loop(token);
        self.release();
        result
    }

    /// Runs this [Task] on a dedicated thread.
    pub fn spawn(mut self, token: CancelToken) -> Result<JoinHandle<Result<(), Error>>, Error> {
        let handle = std::thread::Builder::new()
            .name(format!("ntrip-{}", self.mountpoint.station))
            .spawn(move || self.run(&token))?;
        Ok(handle)
    }
}
