use crate::metrics_provider::Broker;

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

#[derive(Debug, Error, PartialEq)]
pub enum LimitsError {
    #[error("minimum must be > 0")]
    InvalidMinimum,
    #[error("{0} must be > 0 and <= 100")]
    InvalidPortion(&'static str),
    #[error("unknown instance type: {0}")]
    UnknownInstanceType(String),
    #[error("invalid replica role: {0}")]
    InvalidRole(String),
}

/// Which side of a reassignment a broker is serving during the current tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ReplicaRole {
    /// Sending replica data out (outbound utilization governs).
    Source,
    /// Receiving replica data (inbound utilization governs).
    Destination,
}

impl ReplicaRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReplicaRole::Source => "source",
            ReplicaRole::Destination => "destination",
        }
    }
}

impl fmt::Display for ReplicaRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ReplicaRole {
    type Err = LimitsError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "source" => Ok(ReplicaRole::Source),
            "destination" => Ok(ReplicaRole::Destination),
            other => Err(LimitsError::InvalidRole(other.to_string())),
        }
    }
}

/// Input for building a validated [`Limits`].
#[derive(Debug, Clone)]
pub struct LimitsConfig {
    /// Min throttle rate in MB/s.
    pub minimum: f64,
    /// Max throttle rate as a portion of capacity (legacy global cap).
    pub maximum: f64,
    /// Max source broker throttle rate as a portion of capacity.
    pub source_maximum: f64,
    /// Max destination broker throttle rate as a portion of capacity.
    pub destination_maximum: f64,
    /// Map of instance-type to total network capacity in MB/s.
    pub capacity_map: HashMap<String, f64>,
}

/// Validated throttle limits. The scalar fields are checked once at
/// construction and never mutated; the capacity map is only checked for
/// presence at lookup time.
#[derive(Debug, Clone)]
pub struct Limits {
    minimum: f64,
    maximum: f64,
    source_maximum: f64,
    destination_maximum: f64,
    capacity: HashMap<String, f64>,
}

impl Limits {
    pub fn new(c: LimitsConfig) -> Result<Self, LimitsError> {
        if c.minimum <= 0.0 {
            return Err(LimitsError::InvalidMinimum);
        }
        if c.maximum <= 0.0 || c.maximum > 100.0 {
            return Err(LimitsError::InvalidPortion("maximum"));
        }
        if c.source_maximum <= 0.0 || c.source_maximum > 100.0 {
            return Err(LimitsError::InvalidPortion("source maximum"));
        }
        if c.destination_maximum <= 0.0 || c.destination_maximum > 100.0 {
            return Err(LimitsError::InvalidPortion("destination maximum"));
        }

        Ok(Limits {
            minimum: c.minimum,
            maximum: c.maximum,
            source_maximum: c.source_maximum,
            destination_maximum: c.destination_maximum,
            capacity: c.capacity_map,
        })
    }

    /// The configured floor rate in MB/s. Callers fall back to this value
    /// whenever a headroom computation errors.
    pub fn minimum(&self) -> f64 {
        self.minimum
    }

    fn capacity_for(&self, broker: &Broker) -> Result<f64, LimitsError> {
        self.capacity
            .get(&broker.instance_type)
            .copied()
            .ok_or_else(|| LimitsError::UnknownInstanceType(broker.instance_type.clone()))
    }

    /// Legacy global-cap variant, superseded by
    /// [`replication_headroom`](Self::replication_headroom) on the tick path.
    ///
    /// Returns the headroom available for replication based on utilization
    /// vs capacity. Subtracting the previously applied throttle rate from
    /// the current outbound utilization gives a crude approximation of the
    /// non-replication throughput being demanded; that and any overage past
    /// capacity are subtracted from total capacity, and the configured
    /// portion of what remains is eligible for replication, floored at the
    /// minimum rate.
    #[allow(dead_code)]
    pub fn headroom(&self, broker: &Broker, prev_throttle: f64) -> Result<f64, LimitsError> {
        let capacity = self.capacity_for(broker)?;

        let non_throttle_util = (broker.net_tx - prev_throttle).max(0.0);
        let over_cap = (broker.net_tx - capacity).max(0.0);

        Ok(((capacity - non_throttle_util - over_cap) * (self.maximum / 100.0)).max(self.minimum))
    }

    /// Role-aware variant of [`headroom`](Self::headroom): the source role
    /// reads outbound utilization against the source portion cap, the
    /// destination role reads inbound utilization against the destination
    /// portion cap.
    ///
    /// The non-throttle utilization term is derived from outbound
    /// utilization for both roles. The asymmetry is intentional:
    /// deployed clusters are tuned around it, so it must not be changed
    /// without operator sign-off.
    pub fn replication_headroom(
        &self,
        broker: &Broker,
        role: ReplicaRole,
        prev_throttle: f64,
    ) -> Result<f64, LimitsError> {
        let (curr_net_utilization, max_ratio) = match role {
            ReplicaRole::Source => (broker.net_tx, self.source_maximum),
            ReplicaRole::Destination => (broker.net_rx, self.destination_maximum),
        };

        let capacity = self.capacity_for(broker)?;

        let non_throttle_util = (broker.net_tx - prev_throttle).max(0.0);
        let over_cap = (curr_net_utilization - capacity).max(0.0);

        Ok(((capacity - non_throttle_util - over_cap) * (max_ratio / 100.0)).max(self.minimum))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_limits() -> Limits {
        let mut capacity_map = HashMap::new();
        capacity_map.insert("d2.2xlarge".to_string(), 120.0);
        Limits::new(LimitsConfig {
            minimum: 20.0,
            maximum: 90.0,
            source_maximum: 80.0,
            destination_maximum: 60.0,
            capacity_map,
        })
        .unwrap()
    }

    fn broker(net_tx: f64, net_rx: f64) -> Broker {
        Broker {
            id: 1001,
            instance_type: "d2.2xlarge".to_string(),
            net_tx,
            net_rx,
        }
    }

    #[test]
    fn test_new_limits_validation() {
        let base = LimitsConfig {
            minimum: 20.0,
            maximum: 90.0,
            source_maximum: 80.0,
            destination_maximum: 60.0,
            capacity_map: HashMap::new(),
        };

        assert!(Limits::new(base.clone()).is_ok());

        let mut c = base.clone();
        c.minimum = 0.0;
        assert_eq!(Limits::new(c).unwrap_err(), LimitsError::InvalidMinimum);

        let mut c = base.clone();
        c.minimum = -1.0;
        assert_eq!(Limits::new(c).unwrap_err(), LimitsError::InvalidMinimum);

        // 100 is a valid boundary; anything past it is rejected.
        let mut c = base.clone();
        c.maximum = 100.0;
        assert!(Limits::new(c).is_ok());

        let mut c = base.clone();
        c.maximum = 100.0001;
        assert_eq!(
            Limits::new(c).unwrap_err(),
            LimitsError::InvalidPortion("maximum")
        );

        let mut c = base.clone();
        c.source_maximum = 0.0;
        assert_eq!(
            Limits::new(c).unwrap_err(),
            LimitsError::InvalidPortion("source maximum")
        );

        let mut c = base.clone();
        c.destination_maximum = 101.0;
        assert_eq!(
            Limits::new(c).unwrap_err(),
            LimitsError::InvalidPortion("destination maximum")
        );
    }

    #[test]
    fn test_headroom_basic() {
        let limits = test_limits();

        // capacity 120, net_tx 80, prev 30: non-throttle 50, no overage.
        // (120 - 50) * 0.9 = 63.
        let rate = limits.headroom(&broker(80.0, 0.0), 30.0).unwrap();
        assert!((rate - 63.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_headroom_never_below_minimum() {
        let limits = test_limits();

        // Saturated outbound with no previous throttle leaves no headroom;
        // the floor must hold.
        for net_tx in [0.0, 60.0, 120.0, 500.0, 10_000.0] {
            for prev in [0.0, 20.0, 120.0, 1_000.0] {
                let rate = limits.headroom(&broker(net_tx, 0.0), prev).unwrap();
                assert!(rate >= 20.0, "net_tx={} prev={} rate={}", net_tx, prev, rate);
            }
        }
    }

    #[test]
    fn test_headroom_monotonicity() {
        let limits = test_limits();

        // Non-increasing as utilization grows.
        let mut last = f64::MAX;
        for net_tx in [10.0, 40.0, 80.0, 120.0, 200.0] {
            let rate = limits.headroom(&broker(net_tx, 0.0), 10.0).unwrap();
            assert!(rate <= last);
            last = rate;
        }

        // Non-decreasing as the previous rate grows.
        let mut last = 0.0;
        for prev in [0.0, 10.0, 40.0, 80.0, 120.0] {
            let rate = limits.headroom(&broker(100.0, 0.0), prev).unwrap();
            assert!(rate >= last);
            last = rate;
        }
    }

    #[test]
    fn test_headroom_unknown_instance_type() {
        let limits = test_limits();
        let b = Broker {
            id: 2002,
            instance_type: "q9.mega".to_string(),
            net_tx: 50.0,
            net_rx: 50.0,
        };

        let err = limits.headroom(&b, 0.0).unwrap_err();
        assert_eq!(err, LimitsError::UnknownInstanceType("q9.mega".to_string()));
        // Callers apply the safe floor on error.
        assert!((limits.minimum() - 20.0).abs() < f64::EPSILON);

        let err = limits
            .replication_headroom(&b, ReplicaRole::Source, 0.0)
            .unwrap_err();
        assert_eq!(err, LimitsError::UnknownInstanceType("q9.mega".to_string()));
    }

    #[test]
    fn test_replication_headroom_role_selection() {
        let limits = test_limits();

        // Outbound is idle, inbound is past capacity: the source role sees
        // plenty of headroom, the destination role is floored.
        let b = broker(0.0, 240.0);

        let src = limits
            .replication_headroom(&b, ReplicaRole::Source, 0.0)
            .unwrap();
        // (120 - 0 - 0) * 0.8 = 96.
        assert!((src - 96.0).abs() < f64::EPSILON);

        let dst = limits
            .replication_headroom(&b, ReplicaRole::Destination, 0.0)
            .unwrap();
        assert!((dst - 20.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_replication_headroom_non_throttle_term_reads_outbound() {
        let limits = test_limits();

        // Pins the preserved asymmetry: for the destination role, the
        // non-throttle term still comes from net_tx. Two brokers with the
        // same inbound picture but different outbound must compute
        // different destination headroom.
        let quiet_tx = broker(10.0, 30.0);
        let busy_tx = broker(90.0, 30.0);

        let quiet = limits
            .replication_headroom(&quiet_tx, ReplicaRole::Destination, 0.0)
            .unwrap();
        let busy = limits
            .replication_headroom(&busy_tx, ReplicaRole::Destination, 0.0)
            .unwrap();
        assert!(quiet > busy);
    }

    #[test]
    fn test_replication_headroom_never_below_minimum() {
        let limits = test_limits();
        for role in [ReplicaRole::Source, ReplicaRole::Destination] {
            for util in [0.0, 119.9, 120.0, 400.0] {
                let rate = limits
                    .replication_headroom(&broker(util, util), role, 0.0)
                    .unwrap();
                assert!(rate >= 20.0);
            }
        }
    }

    #[test]
    fn test_replica_role_from_str() {
        assert_eq!("source".parse::<ReplicaRole>().unwrap(), ReplicaRole::Source);
        assert_eq!(
            "destination".parse::<ReplicaRole>().unwrap(),
            ReplicaRole::Destination
        );
        assert_eq!(
            "leader".parse::<ReplicaRole>().unwrap_err(),
            LimitsError::InvalidRole("leader".to_string())
        );
    }
}
