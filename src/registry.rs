//! Thread-safe metric registry and Prometheus text exposition.
//!
//! Families (name, help, type, label names) are declared once at startup;
//! after that the refresh loop upserts individual series while scrape
//! requests render snapshots concurrently. The lock is held per upsert and
//! per render, never across a refresh cycle.

use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::sync::Arc;

use parking_lot::RwLock;
use serde::Serialize;
use tracing::warn;

use crate::normalize::Observation;

/// Gauge: available addresses per subnet. Labels: vpc, subnet, name.
pub const SUBNET_AVAILABLE_IPS: &str = "aws_vpc_subnet_available_ip_address_count";
/// Gauge: total addresses per subnet, derived from the CIDR block.
pub const SUBNET_TOTAL_IPS: &str = "aws_vpc_subnet_total_ip_address_count";
/// Enumerated state of EventBridge partner event sources. Label: source_name.
pub const PARTNER_SOURCE_STATE: &str = "aws_eventbridge_partner_sources_state";

/// How a metric family renders in the exposition text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FamilyKind {
    Gauge,
    /// Enumerated state: one 0/1 line per declared state, with the metric
    /// name repeated as the extra label name.
    State { states: &'static [&'static str] },
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum SeriesValue {
    Gauge(f64),
    State(&'static str),
}

/// One metric family with its declared shape and live series.
struct Family {
    help: &'static str,
    kind: FamilyKind,
    label_names: &'static [&'static str],
    /// Label values (in declared order) → last written value.
    /// Series are created on first write and never deleted.
    series: BTreeMap<Vec<String>, SeriesValue>,
}

/// Cumulative refresh statistics, exposed on `/status`.
#[derive(Debug, Clone, Default, Serialize)]
pub struct RefreshStats {
    /// Completed refresh cycles (including partially failed ones).
    pub cycles_completed: u64,
    /// Observations written into the registry.
    pub observations_published: u64,
    /// Records dropped by normalization errors.
    pub records_skipped: u64,
    /// Resource-kind fetches that failed outright.
    pub fetch_failures: u64,
}

/// Thread-safe store of the exporter's metric series.
pub struct MetricRegistry {
    families: RwLock<BTreeMap<&'static str, Family>>,
    stats: RwLock<RefreshStats>,
}

/// Shareable registry handle passed to the refresher and the HTTP server.
pub type SharedRegistry = Arc<MetricRegistry>;

impl MetricRegistry {
    /// Empty registry with no declared families.
    pub fn new() -> Self {
        Self {
            families: RwLock::new(BTreeMap::new()),
            stats: RwLock::new(RefreshStats::default()),
        }
    }

    /// Registry pre-declared with the exporter's metric catalog.
    pub fn for_exporter() -> Self {
        let mut registry = Self::new();
        registry.register_gauge(
            SUBNET_AVAILABLE_IPS,
            "Number of available IPs per subnet",
            &["vpc", "subnet", "name"],
        );
        registry.register_gauge(
            SUBNET_TOTAL_IPS,
            "Total number of IPs per subnet",
            &["vpc", "subnet", "name"],
        );
        registry.register_state(
            PARTNER_SOURCE_STATE,
            "State of EventBridge partner event sources",
            &["source_name"],
            &["ACTIVE", "PENDING", "DELETED"],
        );
        registry
    }

    /// Declare a gauge family. Label names are fixed for process lifetime.
    pub fn register_gauge(
        &mut self,
        name: &'static str,
        help: &'static str,
        label_names: &'static [&'static str],
    ) {
        self.families.get_mut().insert(
            name,
            Family {
                help,
                kind: FamilyKind::Gauge,
                label_names,
                series: BTreeMap::new(),
            },
        );
    }

    /// Declare an enumerated-state family with its fixed state set.
    pub fn register_state(
        &mut self,
        name: &'static str,
        help: &'static str,
        label_names: &'static [&'static str],
        states: &'static [&'static str],
    ) {
        self.families.get_mut().insert(
            name,
            Family {
                help,
                kind: FamilyKind::State { states },
                label_names,
                series: BTreeMap::new(),
            },
        );
    }

    /// Upsert a gauge series. The latest write for a label set wins.
    ///
    /// Writes against an undeclared family or with the wrong label arity are
    /// dropped with a warning; they indicate a programming error, not bad
    /// input data.
    pub fn set_gauge(&self, metric: &str, labels: Vec<String>, value: f64) {
        let mut families = self.families.write();
        let Some(family) = families.get_mut(metric) else {
            warn!(metric, "write to undeclared metric dropped");
            return;
        };
        if family.kind != FamilyKind::Gauge {
            warn!(metric, "gauge write to non-gauge metric dropped");
            return;
        }
        if labels.len() != family.label_names.len() {
            warn!(
                metric,
                expected = family.label_names.len(),
                got = labels.len(),
                "label arity mismatch, write dropped"
            );
            return;
        }
        family.series.insert(labels, SeriesValue::Gauge(value));
    }

    /// Upsert an enumerated-state series.
    pub fn set_state(&self, metric: &str, labels: Vec<String>, state: &str) {
        let mut families = self.families.write();
        let Some(family) = families.get_mut(metric) else {
            warn!(metric, "write to undeclared metric dropped");
            return;
        };
        let FamilyKind::State { states } = family.kind else {
            warn!(metric, "state write to non-state metric dropped");
            return;
        };
        if labels.len() != family.label_names.len() {
            warn!(
                metric,
                expected = family.label_names.len(),
                got = labels.len(),
                "label arity mismatch, write dropped"
            );
            return;
        }
        let Some(canonical) = states.iter().copied().find(|candidate| *candidate == state)
        else {
            warn!(metric, state, "state outside declared set dropped");
            return;
        };
        family.series.insert(labels, SeriesValue::State(canonical));
    }

    /// Write one normalized observation.
    pub fn publish(&self, observation: Observation) {
        match observation {
            Observation::Gauge {
                metric,
                labels,
                value,
            } => self.set_gauge(metric, labels, value),
            Observation::State {
                metric,
                labels,
                state,
            } => self.set_state(metric, labels, state.as_str()),
        }
    }

    /// Current number of stored series across all families.
    pub fn series_count(&self) -> usize {
        self.families
            .read()
            .values()
            .map(|family| family.series.len())
            .sum()
    }

    /// Fold one completed refresh cycle into the cumulative statistics.
    pub fn note_cycle(&self, published: u64, skipped: u64, failed_kinds: u64) {
        let mut stats = self.stats.write();
        stats.cycles_completed += 1;
        stats.observations_published += published;
        stats.records_skipped += skipped;
        stats.fetch_failures += failed_kinds;
    }

    /// Snapshot of the cumulative refresh statistics.
    pub fn stats(&self) -> RefreshStats {
        self.stats.read().clone()
    }

    /// Render all series in the Prometheus text exposition format.
    ///
    /// Families and series are sorted, so output is deterministic for a given
    /// registry state.
    pub fn render(&self) -> String {
        let families = self.families.read();
        let mut output = String::with_capacity(families.len() * 128);

        for (name, family) in families.iter() {
            writeln!(output, "# HELP {} {}", name, family.help).ok();
            writeln!(output, "# TYPE {} gauge", name).ok();

            for (label_values, value) in &family.series {
                match value {
                    SeriesValue::Gauge(v) => {
                        let labels = format_labels(
                            family
                                .label_names
                                .iter()
                                .copied()
                                .zip(label_values.iter().map(String::as_str)),
                        );
                        writeln!(output, "{}{} {}", name, labels, format_value(*v)).ok();
                    }
                    SeriesValue::State(current) => {
                        let FamilyKind::State { states } = family.kind else {
                            continue;
                        };
                        for &state in states {
                            let labels = format_labels(
                                family
                                    .label_names
                                    .iter()
                                    .copied()
                                    .zip(label_values.iter().map(String::as_str))
                                    .chain(std::iter::once((*name, state))),
                            );
                            let flag = if state == *current { 1.0 } else { 0.0 };
                            writeln!(output, "{}{} {}", name, labels, format_value(flag)).ok();
                        }
                    }
                }
            }
        }

        output
    }
}

impl Default for MetricRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Format label pairs for the exposition format.
fn format_labels<'a>(pairs: impl Iterator<Item = (&'a str, &'a str)>) -> String {
    let parts: Vec<String> = pairs
        .map(|(k, v)| format!("{}=\"{}\"", k, escape_label_value(v)))
        .collect();

    if parts.is_empty() {
        String::new()
    } else {
        format!("{{{}}}", parts.join(","))
    }
}

/// Escape special characters in label values.
fn escape_label_value(value: &str) -> String {
    let mut result = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '\\' => result.push_str("\\\\"),
            '"' => result.push_str("\\\""),
            '\n' => result.push_str("\\n"),
            _ => result.push(c),
        }
    }
    result
}

/// Format a value for the exposition format; integral values print without a
/// decimal point.
fn format_value(value: f64) -> String {
    if value.is_nan() {
        "NaN".to_string()
    } else if value.is_infinite() {
        if value.is_sign_positive() {
            "+Inf".to_string()
        } else {
            "-Inf".to_string()
        }
    } else if value.fract() == 0.0 {
        format!("{:.0}", value)
    } else {
        format!("{}", value)
    }
}
