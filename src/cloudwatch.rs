//! Latest-value fetching from the CloudWatch metrics API.
//!
//! CloudWatch is eventually consistent: the most recent minute is often not
//! yet published when we ask for it. We therefore query a ten minute window
//! at one minute resolution and keep only the newest sample it contains.

use chrono::{DateTime, Duration, SecondsFormat, Utc};
use crate::error::Error;
use crate::metric::{Datapoint, Dimension};
use rusoto_cloudwatch::{self, CloudWatch, CloudWatchClient, GetMetricStatisticsInput};
use rusoto_core::credential::{DefaultCredentialsProvider, StaticProvider};
use rusoto_core::{HttpClient, Region};
use std::str::FromStr;
use tokio::runtime;

/// Lookback window, in seconds, of every statistics query.
pub const WINDOW_SECONDS: i64 = 600;
/// Resolution, in seconds, of every statistics query.
pub const PERIOD_SECONDS: i64 = 60;
/// The only statistic requested.
pub const STATISTIC: &str = "Average";

/// A GetMetricStatistics query, stripped to what the fetcher depends on.
#[derive(Clone, Debug, PartialEq)]
pub struct StatisticsRequest {
    /// Metric namespace, e.g. `AWS/EC2`.
    pub namespace: String,
    /// Metric name, e.g. `CPUCreditUsage`.
    pub metric_name: String,
    /// Dimensions scoping the query to one resource.
    pub dimensions: Vec<Dimension>,
    /// Inclusive window start.
    pub start_time: DateTime<Utc>,
    /// Window end.
    pub end_time: DateTime<Utc>,
    /// Resolution in seconds.
    pub period: i64,
    /// Requested statistics.
    pub statistics: Vec<String>,
}

impl StatisticsRequest {
    /// Build the fixed-shape request for the window ending at `now`.
    pub fn windowed(
        namespace: &str,
        dimension: &Dimension,
        metric_name: &str,
        now: DateTime<Utc>,
    ) -> StatisticsRequest {
        StatisticsRequest {
            namespace: namespace.to_string(),
            metric_name: metric_name.to_string(),
            dimensions: vec![dimension.clone()],
            start_time: now - Duration::seconds(WINDOW_SECONDS),
            end_time: now,
            period: PERIOD_SECONDS,
            statistics: vec![STATISTIC.to_string()],
        }
    }
}

/// A metrics backend able to answer statistics queries.
pub trait MetricsApi {
    /// Run `request` and return every usable datapoint in its window, in
    /// whatever order the backend produced them.
    fn get_metric_statistics(&self, request: &StatisticsRequest) -> Result<Vec<Datapoint>, Error>;
}

/// Select the datapoint with the latest timestamp.
///
/// This is a single linear pass with a non-strict comparison: when several
/// datapoints share the maximum timestamp, the last one in iteration order
/// wins. Backend response order is not guaranteed, so neither is the winner
/// of a tie across retries.
pub fn latest_datapoint(datapoints: &[Datapoint]) -> Option<&Datapoint> {
    let mut latest: Option<&Datapoint> = None;
    for dp in datapoints {
        match latest {
            Some(cur) if dp.timestamp < cur.timestamp => continue,
            _ => latest = Some(dp),
        }
    }
    latest
}

/// Fetch the most recent value of `metric_name` for `dimension`.
///
/// Backend errors are returned unchanged. A window without datapoints is
/// `Error::NoData`. No retries are attempted here.
pub fn fetch_latest_value<A>(
    api: &A,
    namespace: &str,
    dimension: &Dimension,
    metric_name: &str,
    now: DateTime<Utc>,
) -> Result<f64, Error>
where
    A: MetricsApi + ?Sized,
{
    let request = StatisticsRequest::windowed(namespace, dimension, metric_name, now);
    let datapoints = api.get_metric_statistics(&request)?;
    trace!(
        "{} datapoints for {}/{} {}={}",
        datapoints.len(),
        namespace,
        metric_name,
        dimension.name,
        dimension.value
    );
    match latest_datapoint(&datapoints) {
        Some(dp) => Ok(dp.value),
        None => Err(Error::NoData),
    }
}

/// Optional static credentials. When absent, rusoto's default provider chain
/// (environment, profile file, instance role) is consulted.
#[derive(Clone, Debug, Default)]
pub struct Credentials {
    /// Access key id.
    pub access_key_id: Option<String>,
    /// Secret access key.
    pub secret_access_key: Option<String>,
}

/// `MetricsApi` backed by rusoto's CloudWatch client.
///
/// The client is asynchronous; calls are driven to completion on a private
/// current-thread runtime so callers see a plain blocking API.
pub struct RusotoMetricsApi {
    client: CloudWatchClient,
    runtime: runtime::Runtime,
}

impl RusotoMetricsApi {
    /// Authenticate and connect to CloudWatch in `region`.
    pub fn connect(region: &str, credentials: &Credentials) -> Result<RusotoMetricsApi, Error> {
        let region = Region::from_str(region)
            .map_err(|e| Error::Transport(format!("unknown region {}: {}", region, e)))?;
        let dispatcher = HttpClient::new()
            .map_err(|e| Error::Transport(format!("could not build http client: {}", e)))?;
        let client = match (&credentials.access_key_id, &credentials.secret_access_key) {
            (Some(key), Some(secret)) if !key.is_empty() && !secret.is_empty() => {
                debug!("using static credentials for {}", region.name());
                let provider = StaticProvider::new_minimal(key.clone(), secret.clone());
                CloudWatchClient::new_with(dispatcher, provider, region)
            }
            _ => {
                debug!("using default credentials chain for {}", region.name());
                let provider = DefaultCredentialsProvider::new()
                    .map_err(|e| Error::Transport(format!("no credentials: {}", e)))?;
                CloudWatchClient::new_with(dispatcher, provider, region)
            }
        };
        let runtime = runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(|e| Error::Transport(format!("could not start runtime: {}", e)))?;
        Ok(RusotoMetricsApi { client, runtime })
    }
}

fn to_input(request: &StatisticsRequest) -> GetMetricStatisticsInput {
    GetMetricStatisticsInput {
        namespace: request.namespace.clone(),
        metric_name: request.metric_name.clone(),
        dimensions: Some(
            request
                .dimensions
                .iter()
                .map(|d| rusoto_cloudwatch::Dimension {
                    name: d.name.clone(),
                    value: d.value.clone(),
                })
                .collect(),
        ),
        start_time: request.start_time.to_rfc3339_opts(SecondsFormat::Secs, true),
        end_time: request.end_time.to_rfc3339_opts(SecondsFormat::Secs, true),
        period: request.period,
        statistics: Some(request.statistics.clone()),
        ..Default::default()
    }
}

fn from_output(dp: &rusoto_cloudwatch::Datapoint) -> Option<Datapoint> {
    let value = dp.average?;
    let raw = dp.timestamp.as_ref()?;
    match DateTime::parse_from_rfc3339(raw) {
        Ok(ts) => Some(Datapoint::new(ts.with_timezone(&Utc), value)),
        Err(e) => {
            debug!("dropping datapoint with unparsable timestamp {:?}: {}", raw, e);
            None
        }
    }
}

impl MetricsApi for RusotoMetricsApi {
    fn get_metric_statistics(&self, request: &StatisticsRequest) -> Result<Vec<Datapoint>, Error> {
        let input = to_input(request);
        let output = self
            .runtime
            .block_on(self.client.get_metric_statistics(input))
            .map_err(|e| Error::Transport(format!("{}", e)))?;
        let raw = output.datapoints.unwrap_or_default();
        let total = raw.len();
        let datapoints: Vec<Datapoint> = raw.iter().filter_map(from_output).collect();
        if datapoints.len() != total {
            debug!(
                "dropped {} of {} datapoints without timestamp or average",
                total - datapoints.len(),
                total
            );
        }
        Ok(datapoints)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use quickcheck::{QuickCheck, TestResult};
    use std::cell::RefCell;

    struct Canned {
        result: RefCell<Option<Result<Vec<Datapoint>, Error>>>,
        seen: RefCell<Vec<StatisticsRequest>>,
    }

    impl Canned {
        fn new(result: Result<Vec<Datapoint>, Error>) -> Canned {
            Canned {
                result: RefCell::new(Some(result)),
                seen: RefCell::new(Vec::new()),
            }
        }
    }

    impl MetricsApi for Canned {
        fn get_metric_statistics(
            &self,
            request: &StatisticsRequest,
        ) -> Result<Vec<Datapoint>, Error> {
            self.seen.borrow_mut().push(request.clone());
            self.result.borrow_mut().take().expect("queried twice")
        }
    }

    fn at(secs: i64, value: f64) -> Datapoint {
        Datapoint::new(Utc.timestamp_opt(secs, 0).unwrap(), value)
    }

    fn now() -> DateTime<Utc> {
        Utc.timestamp_opt(1_500_000_000, 0).unwrap()
    }

    #[test]
    fn request_shape() {
        let dim = Dimension::new("InstanceId", "i-abc");
        let api = Canned::new(Ok(vec![at(1_499_999_940, 1.5)]));
        fetch_latest_value(&api, "AWS/EC2", &dim, "CPUCreditUsage", now()).unwrap();

        let seen = api.seen.borrow();
        assert_eq!(1, seen.len());
        let req = &seen[0];
        assert_eq!("AWS/EC2", req.namespace);
        assert_eq!("CPUCreditUsage", req.metric_name);
        assert_eq!(vec![dim.clone()], req.dimensions);
        assert_eq!(now(), req.end_time);
        assert_eq!(600, (req.end_time - req.start_time).num_seconds());
        assert_eq!(60, req.period);
        assert_eq!(vec!["Average".to_string()], req.statistics);
    }

    #[test]
    fn picks_latest_regardless_of_position() {
        let dim = Dimension::new("InstanceId", "i-abc");
        let api = Canned::new(Ok(vec![at(120, 2.0), at(300, 5.0), at(60, 1.0)]));
        let v = fetch_latest_value(&api, "AWS/EC2", &dim, "CPUCreditBalance", now()).unwrap();
        assert_eq!(5.0, v);
    }

    #[test]
    fn empty_window_is_no_data() {
        let dim = Dimension::new("InstanceId", "i-abc");
        let api = Canned::new(Ok(Vec::new()));
        match fetch_latest_value(&api, "AWS/EC2", &dim, "CPUCreditUsage", now()) {
            Err(Error::NoData) => {}
            other => panic!("expected no data, got {:?}", other),
        }
    }

    #[test]
    fn transport_error_is_unchanged() {
        let dim = Dimension::new("InstanceId", "i-abc");
        let api = Canned::new(Err(Error::Transport("403 forbidden".to_string())));
        match fetch_latest_value(&api, "AWS/EC2", &dim, "CPUCreditUsage", now()) {
            Err(Error::Transport(msg)) => assert_eq!("403 forbidden", msg),
            other => panic!("expected transport error, got {:?}", other),
        }
    }

    #[test]
    fn ties_go_to_last_in_iteration_order() {
        let dps = vec![at(60, 1.0), at(300, 2.0), at(300, 3.0), at(120, 4.0)];
        assert_eq!(3.0, latest_datapoint(&dps).unwrap().value);
    }

    #[test]
    fn latest_is_order_independent() {
        fn inner(offsets: Vec<u16>, rotate: usize) -> TestResult {
            let mut secs: Vec<i64> = offsets.into_iter().map(i64::from).collect();
            secs.sort();
            secs.dedup();
            if secs.is_empty() {
                return TestResult::discard();
            }
            // value encodes timestamp so the winner is identifiable
            let mut dps: Vec<Datapoint> = secs.iter().map(|s| at(*s, *s as f64)).collect();
            let max = *secs.last().unwrap() as f64;

            assert_eq!(max, latest_datapoint(&dps).unwrap().value);
            dps.reverse();
            assert_eq!(max, latest_datapoint(&dps).unwrap().value);
            let len = dps.len();
            dps.rotate_left(rotate % len);
            assert_eq!(max, latest_datapoint(&dps).unwrap().value);
            TestResult::passed()
        }
        QuickCheck::new()
            .tests(1000)
            .max_tests(10000)
            .quickcheck(inner as fn(Vec<u16>, usize) -> TestResult);
    }

    #[test]
    fn output_conversion_drops_unusable() {
        let good = rusoto_cloudwatch::Datapoint {
            average: Some(3.25),
            timestamp: Some("2017-07-14T02:40:00Z".to_string()),
            ..Default::default()
        };
        let no_avg = rusoto_cloudwatch::Datapoint {
            timestamp: Some("2017-07-14T02:41:00Z".to_string()),
            ..Default::default()
        };
        let bad_ts = rusoto_cloudwatch::Datapoint {
            average: Some(1.0),
            timestamp: Some("yesterday".to_string()),
            ..Default::default()
        };
        let dp = from_output(&good).unwrap();
        assert_eq!(3.25, dp.value);
        assert_eq!(1_500_000_000, dp.timestamp.timestamp());
        assert!(from_output(&no_avg).is_none());
        assert!(from_output(&bad_ts).is_none());
    }

    #[test]
    fn input_conversion() {
        let dim = Dimension::new("InstanceId", "i-abc");
        let req = StatisticsRequest::windowed("AWS/EC2", &dim, "CPUCreditUsage", now());
        let input = to_input(&req);
        assert_eq!("2017-07-14T02:30:00Z", input.start_time);
        assert_eq!("2017-07-14T02:40:00Z", input.end_time);
        assert_eq!(Some(vec!["Average".to_string()]), input.statistics);
        let dims = input.dimensions.unwrap();
        assert_eq!("InstanceId", dims[0].name);
        assert_eq!("i-abc", dims[0].value);
    }
}
