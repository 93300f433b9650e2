//! EC2 CPU credit usage and balance.

use chrono::Utc;
use crate::cloudwatch::{self, MetricsApi};
use crate::collector::Collector;
use crate::error::Error;
use crate::graph::{GraphDefinition, GraphRegistry, MetricDefinition};
use crate::metric::{Dimension, MetricSnapshot};

/// CloudWatch namespace of EC2 instance metrics.
pub const NAMESPACE: &str = "AWS/EC2";
/// Dimension name scoping queries to one instance.
pub const DIMENSION_NAME: &str = "InstanceId";
/// Graph holding both credit metrics.
pub const GRAPH_NAME: &str = "ec2.cpucredit";

/// Snapshot key and CloudWatch metric name, in fetch order.
const METRICS: [(&str, &str); 2] = [("usage", "CPUCreditUsage"), ("balance", "CPUCreditBalance")];

/// Graph metadata for `CpuCreditCollector`. Credits are gauges.
pub fn graphs() -> GraphRegistry {
    GraphRegistry::new(vec![(
        GRAPH_NAME.to_string(),
        GraphDefinition::new(
            "EC2 CPU Credit",
            "float",
            vec![
                MetricDefinition::gauge("usage", "Usage"),
                MetricDefinition::gauge("balance", "Balance"),
            ],
        ),
    )])
}

/// Collects CPU credit usage and balance for one instance.
pub struct CpuCreditCollector<A> {
    api: A,
    dimension: Dimension,
}

impl<A> CpuCreditCollector<A>
where
    A: MetricsApi,
{
    /// Collect for `instance_id` through an already authenticated `api`.
    pub fn new(api: A, instance_id: &str) -> CpuCreditCollector<A> {
        CpuCreditCollector {
            api,
            dimension: Dimension::new(DIMENSION_NAME, instance_id),
        }
    }
}

impl<A> Collector for CpuCreditCollector<A>
where
    A: MetricsApi,
{
    fn fetch_metrics(&mut self) -> Result<MetricSnapshot, Error> {
        let now = Utc::now();
        let mut snapshot = MetricSnapshot::with_capacity(METRICS.len());
        for &(key, metric_name) in &METRICS {
            let value = cloudwatch::fetch_latest_value(
                &self.api,
                NAMESPACE,
                &self.dimension,
                metric_name,
                now,
            )?;
            debug!("{} {} = {}", self.dimension.value, metric_name, value);
            snapshot.insert(key.to_string(), value);
        }
        Ok(snapshot)
    }

    fn graphs(&self) -> GraphRegistry {
        graphs()
    }
}
