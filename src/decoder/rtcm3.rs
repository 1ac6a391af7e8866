//! RTCM 3 decoding
use log::{debug, warn};

use crate::{
    decoder::{
        bits::{crc24q, BitReader},
        Decoder,
    },
    error::Error,
    mountpoint::MountPoint,
    observation::SatelliteObservation,
    prelude::{Constellation, Epoch, TimeScale, SV},
    rinex::{RinexObsWriter, RinexWriter},
    time::TimeSource,
};

/// RTCM 3 frame preamble
const PREAMBLE: u8 = 0xD3;

/// Header (preamble, reserved, length) and CRC sizes
const HEADER_SIZE: usize = 3;
const CRC_SIZE: usize = 3;

const SPEED_OF_LIGHT_M_S: f64 = 299_792_458.0;

/// GPS pseudo range ambiguity unit (1 light millisecond)
const PRUNIT_GPS_M: f64 = 299_792.458;

const GPS_L1_FREQ_HZ: f64 = 1575.42E6;
const GPS_L2_FREQ_HZ: f64 = 1227.60E6;

/// Invalid "phase range - pseudo range" (DF012, DF018)
const INVALID_PHASE_RANGE: i64 = -524_288;

/// Invalid "L2 - L1 pseudo range" (DF017)
const INVALID_L2_PSEUDO_RANGE: i64 = -8192;

const WEEK_NANOS: u64 = 604_800 * 1_000_000_000;

/// Observables 1001-1004 may provide, declared in RINEX headers
const GPS_LEGACY_OBSERVABLES: [&str; 12] = [
    "C1C", "L1C", "S1C", "C1W", "L1W", "S1W", "C2X", "L2X", "S2X", "C2W", "L2W", "S2W",
];

/// Legacy GPS RTK observation messages
#[derive(Debug, Copy, Clone, PartialEq)]
struct GpsLegacy {
    /// L1 CNR and ambiguity are provided
    extended: bool,
    /// L2 signals are provided
    dual_frequency: bool,
}

impl GpsLegacy {
    fn from_message(msg: u64) -> Option<Self> {
        match msg {
            1001 => Some(Self {
                extended: false,
                dual_frequency: false,
            }),
            1002 => Some(Self {
                extended: true,
                dual_frequency: false,
            }),
            1003 => Some(Self {
                extended: false,
                dual_frequency: true,
            }),
            1004 => Some(Self {
                extended: true,
                dual_frequency: true,
            }),
            _ => None,
        }
    }
}

/// [Rtcm3Decoder] decodes RTCM 3 frames. It supports the legacy
/// GPS RTK observation messages (1001-1004), others are ignored.
pub struct Rtcm3Decoder {
    station: String,
    ready: bool,
    clock: Box<dyn TimeSource>,
    /// Bytes of a frame not entirely received yet
    pending: Vec<u8>,
    observations: Vec<SatelliteObservation>,
    rinex: RinexObsWriter,
}

impl Rtcm3Decoder {
    /// Builds a new [Rtcm3Decoder]. The [TimeSource] is used to
    /// determine the week of GPS time of week stamps.
    pub fn new(station: &str, clock: Box<dyn TimeSource>) -> Self {
        Self {
            clock,
            ready: false,
            pending: Vec::with_capacity(1024),
            observations: Vec::new(),
            station: station.to_string(),
            rinex: RinexObsWriter::new(station),
        }
    }

    /// Number of bytes waiting for the end of their frame
    pub fn pending_bytes(&self) -> usize {
        self.pending.len()
    }

    /// Resolves a GPS time of week (in milliseconds) as the [Epoch] nearest to now.
    fn gps_epoch(&self, tow_ms: u64) -> Result<Epoch, Error> {
        let tow_nanos = tow_ms * 1_000_000;
        if tow_nanos >= WEEK_NANOS {
            return Err(Error::Decoding(format!("invalid time of week {}ms", tow_ms)));
        }

        let now = self.clock.now()?.to_time_scale(TimeScale::GPST);
        let (mut week, now_nanos) = now.to_time_of_week();

        if tow_nanos + WEEK_NANOS / 2 < now_nanos {
            week += 1;
        } else if tow_nanos > now_nanos + WEEK_NANOS / 2 {
            week = week.saturating_sub(1);
        }

        Ok(Epoch::from_time_of_week(week, tow_nanos, TimeScale::GPST))
    }

    /// Decodes one message (frame payload)
    fn message(&mut self, payload: &[u8]) -> Result<(), Error> {
        if payload.is_empty() {
            // keep alive
            return Ok(());
        }

        let mut reader = BitReader::new(payload);
        let msg = reader.u(12)?;

        match GpsLegacy::from_message(msg) {
            Some(legacy) => self.gps_legacy(&mut reader, legacy),
            None => {
                debug!("{} - rtcm message {} ignored", self.station, msg);
                Ok(())
            },
        }
    }

    /// Decodes 1001, 1002, 1003 or 1004
    fn gps_legacy(&mut self, reader: &mut BitReader, legacy: GpsLegacy) -> Result<(), Error> {
        let _station_id = reader.u(12)?;
        let tow_ms = reader.u(30)?;
        let _synchronous = reader.u(1)?;
        let nsat = reader.u(5)?;
        let _smoothing = reader.u(1)?;
        let _smoothing_interval = reader.u(3)?;

        let t = self.gps_epoch(tow_ms)?;

        let lambda_l1 = SPEED_OF_LIGHT_M_S / GPS_L1_FREQ_HZ;
        let lambda_l2 = SPEED_OF_LIGHT_M_S / GPS_L2_FREQ_HZ;

        for _ in 0..nsat {
            let prn = reader.u(6)? as u8;
            let l1_code = reader.u(1)?;
            let l1_pr = reader.u(24)?;
            let l1_ppr = reader.s(20)?;
            let _l1_lock = reader.u(7)?;

            let (ambiguity, l1_cnr) = if legacy.extended {
                (reader.u(8)?, reader.u(8)?)
            } else {
                (0, 0)
            };

            let l2 = if legacy.dual_frequency {
                let l2_code = reader.u(2)?;
                let l2_pr = reader.s(14)?;
                let l2_ppr = reader.s(20)?;
                let _l2_lock = reader.u(7)?;
                let l2_cnr = if legacy.extended { reader.u(8)? } else { 0 };
                Some((l2_code, l2_pr, l2_ppr, l2_cnr))
            } else {
                None
            };

            if !(1..=32).contains(&prn) {
                debug!("{} - gps prn#{} not supported", self.station, prn);
                continue;
            }

            let sv = SV::new(Constellation::GPS, prn);
            let mut obs = SatelliteObservation::new(t, sv, &self.station);

            let l1 = if l1_code == 0 { "1C" } else { "1W" };
            let pr1 = l1_pr as f64 * 0.02 + ambiguity as f64 * PRUNIT_GPS_M;

            obs = obs.with_signal(&format!("C{}", l1), pr1);
            if l1_ppr != INVALID_PHASE_RANGE {
                let cp1 = (pr1 + l1_ppr as f64 * 0.0005) / lambda_l1;
                obs = obs.with_signal(&format!("L{}", l1), cp1);
            }
            if l1_cnr > 0 {
                obs = obs.with_signal(&format!("S{}", l1), l1_cnr as f64 * 0.25);
            }

            if let Some((l2_code, l2_pr, l2_ppr, l2_cnr)) = l2 {
                let l2 = if l2_code == 0 { "2X" } else { "2W" };
                if l2_pr != INVALID_L2_PSEUDO_RANGE {
                    obs = obs.with_signal(&format!("C{}", l2), pr1 + l2_pr as f64 * 0.02);
                }
                if l2_ppr != INVALID_PHASE_RANGE {
                    let cp2 = (pr1 + l2_ppr as f64 * 0.0005) / lambda_l2;
                    obs = obs.with_signal(&format!("L{}", l2), cp2);
                }
                if l2_cnr > 0 {
                    obs = obs.with_signal(&format!("S{}", l2), l2_cnr as f64 * 0.25);
                }
            }

            self.observations.push(obs);
        }
        Ok(())
    }
}

impl Decoder for Rtcm3Decoder {
    fn init_rinex(&mut self, mountpoint: &MountPoint) {
        self.station = mountpoint.station.clone();
        self.rinex = RinexObsWriter::new(&mountpoint.station);
        if let Err(e) = self
            .rinex
            .declare_observables(Constellation::GPS, &GPS_LEGACY_OBSERVABLES)
        {
            warn!("{} - rinex: {}", self.station, e);
        }
        self.ready = true;
    }

    fn is_ready(&self) -> bool {
        self.ready
    }

    fn decode(&mut self, buf: &[u8]) -> Result<usize, Error> {
        self.pending.extend_from_slice(buf);

        let pending = std::mem::take(&mut self.pending);
        let size = pending.len();

        let mut pos = 0;
        let mut messages = 0;
        let mut failure = Option::<Error>::None;

        loop {
            match pending[pos..].iter().position(|b| *b == PREAMBLE) {
                Some(offset) => pos += offset,
                None => {
                    pos = size;
                    break;
                },
            }

            if size - pos < HEADER_SIZE {
                break;
            }

            // 6 reserved bits must be zero
            if pending[pos + 1] & 0xFC != 0 {
                pos += 1;
                continue;
            }

            let length = ((pending[pos + 1] as usize & 0x03) << 8) | pending[pos + 2] as usize;
            let frame_size = HEADER_SIZE + length + CRC_SIZE;

            if size - pos < frame_size {
                // wait for following bytes
                break;
            }

            let frame = &pending[pos..pos + frame_size];
            let crc = ((frame[frame_size - 3] as u32) << 16)
                | ((frame[frame_size - 2] as u32) << 8)
                | frame[frame_size - 1] as u32;

            if crc24q(&frame[..HEADER_SIZE + length]) != crc {
                warn!("{} - rtcm frame checksum mismatch", self.station);
                failure.get_or_insert(Error::BadChecksum);
                pos += 1;
                continue;
            }

            match self.message(&frame[HEADER_SIZE..HEADER_SIZE + length]) {
                Ok(()) => messages += 1,
                Err(e) => {
                    warn!("{} - rtcm message error: {}", self.station, e);
                    failure.get_or_insert(e);
                },
            }

            pos += frame_size;
        }

        // at most one partial frame remains
        self.pending = pending[pos..].to_vec();

        match failure {
            Some(e) => Err(e),
            None => Ok(messages),
        }
    }

    fn observations(&self) -> &[SatelliteObservation] {
        &self.observations
    }

    fn clear_observations(&mut self) {
        self.observations.clear();
    }

    fn rinex_writer(&mut self) -> Option<&mut dyn RinexWriter> {
        Some(&mut self.rinex)
    }

    fn dump_rinex_epoch(&mut self, obs: &SatelliteObservation, _format: &str) -> Result<(), Error> {
        self.rinex.dump_epoch(obs)
    }
}
