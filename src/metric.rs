//! The snapshot data model shared by every collector.

use chrono::{DateTime, Utc};
use crate::error::Error;
use std::collections::HashMap;

/// One point-in-time observation set, metric name to value.
///
/// A snapshot is built fresh on every collection call and handed to the
/// caller whole; collectors never return a partially filled one.
pub type MetricSnapshot = HashMap<String, f64>;

/// A single `(timestamp, value)` sample returned by a metrics API query.
#[derive(Clone, Debug, PartialEq)]
pub struct Datapoint {
    /// When the sample was taken.
    pub timestamp: DateTime<Utc>,
    /// The sample's value for the requested statistic.
    pub value: f64,
}

impl Datapoint {
    /// Create a new `Datapoint`.
    pub fn new(timestamp: DateTime<Utc>, value: f64) -> Datapoint {
        Datapoint { timestamp, value }
    }
}

/// Identifies the monitored resource a metrics API query targets.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Dimension {
    /// Dimension name, e.g. `InstanceId`.
    pub name: String,
    /// Dimension value, e.g. `i-0123456789abcdef0`.
    pub value: String,
}

impl Dimension {
    /// Create a new `Dimension`.
    pub fn new<S, V>(name: S, value: V) -> Dimension
    where
        S: Into<String>,
        V: Into<String>,
    {
        Dimension {
            name: name.into(),
            value: value.into(),
        }
    }
}

/// Something able to report where this process is running.
pub trait IdentitySource {
    /// The region this process runs in.
    fn region(&mut self) -> Result<String, Error>;
    /// The instance identifier of the machine this process runs on.
    fn instance_id(&mut self) -> Result<String, Error>;
}

/// Region and instance identifier of the monitored resource.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ResourceIdentity {
    /// Cloud region, e.g. `us-east-1`.
    pub region: String,
    /// Instance identifier.
    pub instance_id: String,
}

impl ResourceIdentity {
    /// Resolve the monitored resource once, at startup.
    ///
    /// Explicit values are used only when both are non-empty. Otherwise both
    /// region and instance identifier come from `source`, so a lone explicit
    /// value is never paired with a discovered one.
    pub fn resolve(
        region: Option<&str>,
        instance_id: Option<&str>,
        source: &mut dyn IdentitySource,
    ) -> Result<ResourceIdentity, Error> {
        match (region, instance_id) {
            (Some(r), Some(i)) if !r.is_empty() && !i.is_empty() => Ok(ResourceIdentity {
                region: r.to_string(),
                instance_id: i.to_string(),
            }),
            _ => {
                debug!("region or instance id not supplied, discovering from instance metadata");
                Ok(ResourceIdentity {
                    region: source.region()?,
                    instance_id: source.instance_id()?,
                })
            }
        }
    }
}
