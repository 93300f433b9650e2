//! The agent-facing plugin host.
//!
//! The monitoring agent runs a plugin once per interval. Depending on the
//! environment the plugin either prints its graph metadata or collects one
//! snapshot and prints values. Counters flagged `diff` are turned into
//! per-minute rates against the snapshot persisted by the previous run.

use crate::collector::Collector;
use crate::error::Error;
use crate::graph::GraphRegistry;
use crate::metric::MetricSnapshot;
use serde_json;
use std::collections::HashMap;
use std::env;
use std::ffi::OsString;
use std::fmt;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

/// Environment variable switching the plugin to metadata output.
pub const META_ENV: &str = "MACKEREL_AGENT_PLUGIN_META";
/// First line of metadata output.
pub const META_HEADER: &str = "# mackerel-agent-plugin";
/// Longest gap, in seconds, over which a counter delta is still reported.
pub const MAX_DIFF_SECONDS: i64 = 600;

/// What a plugin invocation prints.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Mode {
    /// Graph metadata.
    Definitions,
    /// Metric values.
    Values,
}

impl Mode {
    /// Choose the mode from `META_ENV`; set and non-empty means metadata.
    pub fn from_env() -> Mode {
        Mode::from_value(env::var_os(META_ENV))
    }

    /// Choose the mode from an already read value of `META_ENV`.
    pub fn from_value(value: Option<OsString>) -> Mode {
        match value {
            Some(ref v) if !v.is_empty() => Mode::Definitions,
            _ => Mode::Values,
        }
    }
}

/// Host level failure.
#[derive(Debug)]
pub enum HostError {
    /// The collector failed; nothing was printed.
    Collect(Error),
    /// Writing output or the snapshot cache failed.
    Io(io::Error),
    /// The snapshot cache or metadata could not be serialized.
    Cache(serde_json::Error),
    /// Invalid configuration.
    Config(String),
}

impl fmt::Display for HostError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match *self {
            HostError::Collect(ref e) => write!(f, "{}", e),
            HostError::Io(ref e) => write!(f, "io error: {}", e),
            HostError::Cache(ref e) => write!(f, "cache error: {}", e),
            HostError::Config(ref msg) => write!(f, "configuration error: {}", msg),
        }
    }
}

impl ::std::error::Error for HostError {}

impl From<Error> for HostError {
    fn from(e: Error) -> HostError {
        HostError::Collect(e)
    }
}

impl From<io::Error> for HostError {
    fn from(e: io::Error) -> HostError {
        HostError::Io(e)
    }
}

impl From<serde_json::Error> for HostError {
    fn from(e: serde_json::Error) -> HostError {
        HostError::Cache(e)
    }
}

/// A snapshot as persisted between invocations.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CachedSnapshot {
    /// Unix time, in seconds, of collection.
    pub timestamp: i64,
    /// The raw snapshot.
    pub values: HashMap<String, f64>,
}

/// Read the previous snapshot. A missing or unreadable cache is treated as
/// no previous snapshot, which only delays diff metrics by one run.
pub fn load_previous(path: &Path) -> Option<CachedSnapshot> {
    let buf = match fs::read_to_string(path) {
        Ok(buf) => buf,
        Err(ref e) if e.kind() == io::ErrorKind::NotFound => {
            debug!("no previous snapshot at {}", path.display());
            return None;
        }
        Err(e) => {
            warn!("could not read previous snapshot {}: {}", path.display(), e);
            return None;
        }
    };
    match serde_json::from_str(&buf) {
        Ok(snap) => Some(snap),
        Err(e) => {
            warn!("discarding corrupt snapshot {}: {}", path.display(), e);
            None
        }
    }
}

/// Persist `snapshot` for the next invocation.
pub fn store(path: &Path, snapshot: &CachedSnapshot) -> Result<(), HostError> {
    let buf = serde_json::to_vec(snapshot)?;
    fs::write(path, buf)?;
    Ok(())
}

/// Per-minute rate of a counter between two observations.
///
/// `None` when the interval is empty, negative or longer than
/// `MAX_DIFF_SECONDS`, or when the counter went backwards (a reset).
pub fn per_minute(current: f64, previous: f64, elapsed: i64) -> Option<f64> {
    if elapsed <= 0 || elapsed > MAX_DIFF_SECONDS {
        return None;
    }
    let delta = current - previous;
    if delta < 0.0 {
        return None;
    }
    Some(delta * 60.0 / elapsed as f64)
}

/// Render value lines, `graph.metric<TAB>value<TAB>epoch`, in registry order.
pub fn render_values(
    registry: &GraphRegistry,
    snapshot: &MetricSnapshot,
    previous: Option<&CachedSnapshot>,
    now: i64,
) -> Vec<String> {
    for orphan in registry.orphans(snapshot) {
        warn!("metric {} has no graph definition, not reporting it", orphan);
    }
    let mut lines = Vec::with_capacity(snapshot.len());
    for (graph, def) in registry.iter() {
        for metric in &def.metrics {
            let current = match snapshot.get(&metric.name) {
                Some(v) => *v,
                None => continue,
            };
            let value = if metric.diff {
                let prev = previous
                    .and_then(|p| p.values.get(&metric.name).map(|v| (p.timestamp, *v)));
                match prev {
                    None => {
                        debug!("no previous value for {}, skipping this run", metric.name);
                        continue;
                    }
                    Some((then, last)) => match per_minute(current, last, now - then) {
                        Some(rate) => rate,
                        None => {
                            info!(
                                "not reporting {}: {} -> {} over {}s",
                                metric.name,
                                last,
                                current,
                                now - then
                            );
                            continue;
                        }
                    },
                }
            } else {
                current
            };
            lines.push(format!("{}.{}\t{}\t{}", graph, metric.name, value, now));
        }
    }
    lines
}

/// Print the metadata block for `registry`.
pub fn output_definitions<W>(registry: &GraphRegistry, out: &mut W) -> Result<(), HostError>
where
    W: Write,
{
    writeln!(out, "{}", META_HEADER)?;
    serde_json::to_writer(&mut *out, registry)?;
    writeln!(out)?;
    Ok(())
}

/// A collector bound to its snapshot cache.
pub struct Plugin<C> {
    collector: C,
    tempfile: PathBuf,
}

impl<C> Plugin<C>
where
    C: Collector,
{
    /// Create a new `Plugin` persisting snapshots at `tempfile`.
    pub fn new<P>(collector: C, tempfile: P) -> Plugin<C>
    where
        P: Into<PathBuf>,
    {
        Plugin {
            collector,
            tempfile: tempfile.into(),
        }
    }

    /// Collect one snapshot and print its values as of `now`.
    ///
    /// Nothing is printed and the cache is left alone when collection
    /// fails. The new snapshot is persisted before any line is printed, so
    /// a failed cache write prints nothing either.
    pub fn output_values<W>(&mut self, now: i64, out: &mut W) -> Result<(), HostError>
    where
        W: Write,
    {
        let snapshot = self.collector.fetch_metrics()?;
        let registry = self.collector.graphs();
        let previous = load_previous(&self.tempfile);
        let lines = render_values(&registry, &snapshot, previous.as_ref(), now);
        store(
            &self.tempfile,
            &CachedSnapshot {
                timestamp: now,
                values: snapshot,
            },
        )?;
        for line in lines {
            writeln!(out, "{}", line)?;
        }
        Ok(())
    }

    /// Run in `mode`.
    pub fn run<W>(&mut self, mode: Mode, now: i64, out: &mut W) -> Result<(), HostError>
    where
        W: Write,
    {
        match mode {
            Mode::Definitions => output_definitions(&self.collector.graphs(), out),
            Mode::Values => self.output_values(now, out),
        }
    }

    /// Give the collector back.
    pub fn into_inner(self) -> C {
        self.collector
    }
}
