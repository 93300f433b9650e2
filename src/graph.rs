//! Static graph metadata.
//!
//! A `GraphRegistry` groups metrics for display and records, per metric,
//! whether the host should report the raw value or its difference against
//! the previous snapshot. Registries are built explicitly by each collector
//! and are immutable once built.

use crate::metric::MetricSnapshot;
use serde::ser::{Serialize, SerializeMap, Serializer};

/// One metric within a graph.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct MetricDefinition {
    /// Snapshot key of the metric.
    pub name: String,
    /// Display label.
    pub label: String,
    /// When true the host reports the per-interval delta rather than the
    /// raw cumulative value.
    pub diff: bool,
}

impl MetricDefinition {
    /// A metric reported as-is.
    pub fn gauge(name: &str, label: &str) -> MetricDefinition {
        MetricDefinition {
            name: name.to_string(),
            label: label.to_string(),
            diff: false,
        }
    }

    /// A monotonically increasing counter reported as a delta.
    pub fn counter(name: &str, label: &str) -> MetricDefinition {
        MetricDefinition {
            name: name.to_string(),
            label: label.to_string(),
            diff: true,
        }
    }
}

/// A group of related metrics sharing a label and unit.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct GraphDefinition {
    /// Display label.
    pub label: String,
    /// Unit string understood by the agent, e.g. `float` or `integer`.
    pub unit: String,
    /// Metrics in display order.
    pub metrics: Vec<MetricDefinition>,
}

impl GraphDefinition {
    /// Create a new `GraphDefinition`.
    pub fn new(label: &str, unit: &str, metrics: Vec<MetricDefinition>) -> GraphDefinition {
        GraphDefinition {
            label: label.to_string(),
            unit: unit.to_string(),
            metrics,
        }
    }
}

/// Graph name to definition, in declaration order.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct GraphRegistry {
    graphs: Vec<(String, GraphDefinition)>,
}

impl GraphRegistry {
    /// Build a registry from `(graph name, definition)` pairs. A later pair
    /// with an already seen name replaces the earlier one in place.
    pub fn new<I>(graphs: I) -> GraphRegistry
    where
        I: IntoIterator<Item = (String, GraphDefinition)>,
    {
        let mut registry: Vec<(String, GraphDefinition)> = Vec::new();
        for (name, def) in graphs {
            match registry.iter().position(|&(ref n, _)| *n == name) {
                Some(idx) => registry[idx].1 = def,
                None => registry.push((name, def)),
            }
        }
        GraphRegistry { graphs: registry }
    }

    /// Iterate graphs in declaration order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &GraphDefinition)> {
        self.graphs.iter().map(|&(ref n, ref g)| (n.as_str(), g))
    }

    /// Look up a graph by name.
    pub fn graph(&self, name: &str) -> Option<&GraphDefinition> {
        self.iter().find(|&(n, _)| n == name).map(|(_, g)| g)
    }

    /// Look up a metric by snapshot key, returning its graph name too.
    pub fn metric(&self, name: &str) -> Option<(&str, &MetricDefinition)> {
        for (graph, def) in self.iter() {
            if let Some(m) = def.metrics.iter().find(|m| m.name == name) {
                return Some((graph, m));
            }
        }
        None
    }

    /// Whether `name` is a diff metric. Unknown keys are not.
    pub fn is_diff(&self, name: &str) -> bool {
        self.metric(name).map_or(false, |(_, m)| m.diff)
    }

    /// Snapshot keys without a definition in this registry, sorted.
    pub fn orphans(&self, snapshot: &MetricSnapshot) -> Vec<String> {
        let mut orphans: Vec<String> = snapshot
            .keys()
            .filter(|k| self.metric(k).is_none())
            .cloned()
            .collect();
        orphans.sort();
        orphans
    }

    /// Number of graphs.
    pub fn len(&self) -> usize {
        self.graphs.len()
    }

    /// True when the registry holds no graphs.
    pub fn is_empty(&self) -> bool {
        self.graphs.is_empty()
    }
}

struct Graphs<'a>(&'a [(String, GraphDefinition)]);

impl<'a> Serialize for Graphs<'a> {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let mut map = serializer.serialize_map(Some(self.0.len()))?;
        for &(ref name, ref def) in self.0 {
            map.serialize_entry(name, def)?;
        }
        map.end()
    }
}

impl Serialize for GraphRegistry {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let mut map = serializer.serialize_map(Some(1))?;
        map.serialize_entry("graphs", &Graphs(&self.graphs))?;
        map.end()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json;

    fn registry() -> GraphRegistry {
        GraphRegistry::new(vec![
            (
                "demo.gauges".to_string(),
                GraphDefinition::new(
                    "Gauges",
                    "float",
                    vec![MetricDefinition::gauge("level", "Level")],
                ),
            ),
            (
                "demo.counters".to_string(),
                GraphDefinition::new(
                    "Counters",
                    "integer",
                    vec![
                        MetricDefinition::counter("hits", "Hits"),
                        MetricDefinition::counter("misses", "Misses"),
                    ],
                ),
            ),
        ])
    }

    #[test]
    fn lookups() {
        let reg = registry();
        assert_eq!(2, reg.len());
        assert_eq!("Gauges", reg.graph("demo.gauges").unwrap().label);
        assert_eq!(Some("demo.counters"), reg.metric("misses").map(|(g, _)| g));
        assert!(reg.is_diff("hits"));
        assert!(!reg.is_diff("level"));
        assert!(!reg.is_diff("nope"));
    }

    #[test]
    fn orphans_are_reported() {
        let reg = registry();
        let mut snap = MetricSnapshot::new();
        snap.insert("hits".to_string(), 1.0);
        snap.insert("zeta".to_string(), 2.0);
        snap.insert("alpha".to_string(), 3.0);
        assert_eq!(vec!["alpha".to_string(), "zeta".to_string()], reg.orphans(&snap));
    }

    #[test]
    fn duplicate_graph_replaces_in_place() {
        let reg = GraphRegistry::new(vec![
            ("a".to_string(), GraphDefinition::new("A", "float", vec![])),
            ("b".to_string(), GraphDefinition::new("B", "float", vec![])),
            ("a".to_string(), GraphDefinition::new("A2", "float", vec![])),
        ]);
        let names: Vec<&str> = reg.iter().map(|(n, _)| n).collect();
        assert_eq!(vec!["a", "b"], names);
        assert_eq!("A2", reg.graph("a").unwrap().label);
    }

    #[test]
    fn json_keeps_declaration_order() {
        let json = serde_json::to_string(&registry()).unwrap();
        assert_eq!(
            concat!(
                r#"{"graphs":{"demo.gauges":{"label":"Gauges","unit":"float","metrics":"#,
                r#"[{"name":"level","label":"Level","diff":false}]},"#,
                r#""demo.counters":{"label":"Counters","unit":"integer","metrics":"#,
                r#"[{"name":"hits","label":"Hits","diff":true},"#,
                r#"{"name":"misses","label":"Misses","diff":true}]}}}"#
            ),
            json
        );
    }
}
