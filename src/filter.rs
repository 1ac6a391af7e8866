//! Observation validation: staleness, ordering and duplicates
use std::collections::HashMap;

use thiserror::Error;

use crate::{
    observation::SatelliteObservation,
    prelude::{Duration, Epoch, SV},
};

/// Reason why a [SatelliteObservation] was not accepted.
#[derive(Clone, Debug, PartialEq, Error)]
pub enum Rejection {
    /// Too far away from current time
    #[error("wrong observation epoch (|dt|={0})")]
    Stale(Duration),
    /// Prior to the latest accepted epoch for this SV
    #[error("old observation")]
    Old,
    /// Same epoch as the latest accepted one for this SV
    #[error("observation coming more than once")]
    Duplicate,
}

/// [EpochFilter] keeps track of the latest accepted [Epoch] for each [SV].
/// Accepted epochs are strictly increasing, per [SV].
#[derive(Debug, Clone)]
pub struct EpochFilter {
    max_offset: Duration,
    last_epoch: HashMap<SV, Epoch>,
}

impl EpochFilter {
    /// Builds a new [EpochFilter] rejecting observations
    /// further than `max_offset` away from current time.
    pub fn new(max_offset: Duration) -> Self {
        Self {
            max_offset,
            last_epoch: HashMap::with_capacity(32),
        }
    }

    /// Latest accepted [Epoch] for this [SV]
    pub fn last_epoch(&self, sv: SV) -> Option<Epoch> {
        self.last_epoch.get(&sv).copied()
    }

    /// Number of [SV] tracked so far
    pub fn len(&self) -> usize {
        self.last_epoch.len()
    }

    pub fn is_empty(&self) -> bool {
        self.last_epoch.is_empty()
    }

    /// Verifies this [SatelliteObservation]. `now` is the current [Epoch];
    /// when None (raw capture), all verifications are bypassed and the
    /// internal state is left untouched.
    /// On rejection, the internal state is left untouched.
    pub fn check(
        &mut self,
        obs: &SatelliteObservation,
        now: Option<Epoch>,
    ) -> Result<(), Rejection> {
        let Some(now) = now else {
            return Ok(());
        };

        let now = now.to_time_scale(obs.t.time_scale);
        let dt = (now - obs.t).abs();
        if dt > self.max_offset {
            return Err(Rejection::Stale(dt));
        }

        if let Some(last) = self.last_epoch.get(&obs.sv) {
            if obs.t < *last {
                return Err(Rejection::Old);
            } else if obs.t == *last {
                return Err(Rejection::Duplicate);
            }
        }

        self.last_epoch.insert(obs.sv, obs.t);
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::{EpochFilter, Rejection};
    use crate::{
        observation::SatelliteObservation,
        prelude::{Duration, Epoch, TimeScale, SV},
    };
    use rand::{rngs::SmallRng, Rng, SeedableRng};
    use rstest::*;
    use std::str::FromStr;

    fn obs(sv: &str, t: Epoch) -> SatelliteObservation {
        SatelliteObservation::new(t, SV::from_str(sv).unwrap(), "WTZR0")
    }

    fn t0() -> Epoch {
        Epoch::from_str("2024-01-01T12:00:00 GPST").unwrap()
    }

    #[rstest]
    #[case(0.0, true)]
    #[case(1.0, true)]
    #[case(-599.999, true)]
    #[case(600.0, true)]
    #[case(-600.0, true)]
    #[case(600.0001, false)]
    #[case(-600.0001, false)]
    #[case(3600.0, false)]
    fn staleness(#[case] age_s: f64, #[case] accepted: bool) {
        let mut filter = EpochFilter::new(Duration::from_seconds(600.0));
        let now = t0();
        let t = now - Duration::from_seconds(age_s);

        let result = filter.check(&obs("G01", t), Some(now));
        assert_eq!(result.is_ok(), accepted, "|dt|={}s", age_s);

        if accepted {
            assert_eq!(filter.last_epoch(SV::from_str("G01").unwrap()), Some(t));
        } else {
            assert!(matches!(result, Err(Rejection::Stale(_))));
            assert!(filter.is_empty());
        }
    }

    #[test]
    fn staleness_across_timescales() {
        let mut filter = EpochFilter::new(Duration::from_seconds(600.0));
        let now = t0();

        // same instant, expressed in UTC
        let now_utc = now.to_time_scale(TimeScale::UTC);
        assert!(filter.check(&obs("G01", now), Some(now_utc)).is_ok());
    }

    #[test]
    fn ordering_and_duplicates() {
        let mut filter = EpochFilter::new(Duration::from_seconds(600.0));
        let now = t0();
        let g01 = SV::from_str("G01").unwrap();
        let t = now - Duration::from_seconds(10.0);

        assert!(filter.check(&obs("G01", t), Some(now)).is_ok());

        assert_eq!(
            filter.check(&obs("G01", t), Some(now)),
            Err(Rejection::Duplicate)
        );
        assert_eq!(filter.last_epoch(g01), Some(t));

        let older = t - Duration::from_seconds(1.0);
        assert_eq!(filter.check(&obs("G01", older), Some(now)), Err(Rejection::Old));
        assert_eq!(filter.last_epoch(g01), Some(t));

        // other SV are independent
        assert!(filter.check(&obs("G02", older), Some(now)).is_ok());

        let newer = t + Duration::from_seconds(1.0);
        assert!(filter.check(&obs("G01", newer), Some(now)).is_ok());
        assert_eq!(filter.last_epoch(g01), Some(newer));
        assert_eq!(filter.len(), 2);
    }

    #[test]
    fn raw_capture_bypass() {
        let mut filter = EpochFilter::new(Duration::from_seconds(600.0));
        let t = t0() - Duration::from_seconds(86400.0);

        assert!(filter.check(&obs("G01", t), None).is_ok());
        assert!(filter.check(&obs("G01", t), None).is_ok());
        assert!(filter.is_empty());
    }

    #[test]
    fn accepted_epochs_strictly_increase() {
        let mut rng = SmallRng::seed_from_u64(0);
        let mut filter = EpochFilter::new(Duration::from_seconds(600.0));
        let now = t0();

        let mut accepted = Vec::<(String, Epoch)>::new();

        for _ in 0..1000 {
            let prn = rng.random_range(1..=4);
            let offset_s = rng.random_range(-700..=700) as f64;
            let sv = format!("G{:02}", prn);
            let t = now + Duration::from_seconds(offset_s);
            if filter.check(&obs(&sv, t), Some(now)).is_ok() {
                accepted.push((sv, t));
            }
        }

        assert!(!accepted.is_empty());

        for prn in 1..=4 {
            let sv = format!("G{:02}", prn);
            let epochs = accepted
                .iter()
                .filter_map(|(k, t)| if *k == sv { Some(*t) } else { None })
                .collect::<Vec<_>>();
            for pair in epochs.windows(2) {
                assert!(pair[1] > pair[0], "{}: {} >= {}", sv, pair[0], pair[1]);
            }
        }
    }
}
