use std::collections::BTreeMap;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::{PoisonError, RwLock};

/// Label pairs identifying one series of a metric family.
pub type Labels<'a> = &'a [(&'a str, &'a str)];

/// A lightweight, thread-safe metrics registry that renders in Prometheus text exposition format.
/// Families are registered up front; series inside a family are created on first use.
pub struct MetricsRegistry {
    counters: RwLock<BTreeMap<String, Family<AtomicU64>>>,
    gauges: RwLock<BTreeMap<String, Family<AtomicI64>>>,
}

struct Family<V> {
    help: String,
    /// Rendered label set (e.g. `kind="RoleBinding"`) -> value
    series: BTreeMap<String, V>,
}

impl<V> Family<V> {
    fn new(help: &str) -> Self {
        Self {
            help: help.to_string(),
            series: BTreeMap::new(),
        }
    }
}

fn escape_label_value(value: &str) -> String {
    value
        .replace('\\', "\\\\")
        .replace('"', "\\\"")
        .replace('\n', "\\n")
}

fn render_labels(labels: Labels<'_>) -> String {
    labels
        .iter()
        .map(|(k, v)| format!("{}=\"{}\"", k, escape_label_value(v)))
        .collect::<Vec<_>>()
        .join(",")
}

fn series_name(name: &str, labels: &str) -> String {
    if labels.is_empty() {
        name.to_string()
    } else {
        format!("{}{{{}}}", name, labels)
    }
}

impl MetricsRegistry {
    pub fn new() -> Self {
        Self {
            counters: RwLock::new(BTreeMap::new()),
            gauges: RwLock::new(BTreeMap::new()),
        }
    }

    /// Register a counter family. If it already exists, this is a no-op.
    pub fn register_counter(&self, name: &str, help: &str) {
        let mut counters = self.counters.write().unwrap_or_else(PoisonError::into_inner);
        counters
            .entry(name.to_string())
            .or_insert_with(|| Family::new(help));
    }

    /// Register a gauge family. If it already exists, this is a no-op.
    pub fn register_gauge(&self, name: &str, help: &str) {
        let mut gauges = self.gauges.write().unwrap_or_else(PoisonError::into_inner);
        gauges
            .entry(name.to_string())
            .or_insert_with(|| Family::new(help));
    }

    /// Increment a counter series by 1. Unregistered families are ignored.
    pub fn counter_inc(&self, name: &str, labels: Labels<'_>) {
        self.counter_add(name, labels, 1);
    }

    /// Increment a counter series by a given amount.
    pub fn counter_add(&self, name: &str, labels: Labels<'_>, val: u64) {
        let key = render_labels(labels);
        {
            let counters = self.counters.read().unwrap_or_else(PoisonError::into_inner);
            match counters.get(name) {
                None => return,
                Some(family) => {
                    if let Some(c) = family.series.get(&key) {
                        c.fetch_add(val, Ordering::Relaxed);
                        return;
                    }
                }
            }
        }
        let mut counters = self.counters.write().unwrap_or_else(PoisonError::into_inner);
        if let Some(family) = counters.get_mut(name) {
            family
                .series
                .entry(key)
                .or_insert_with(|| AtomicU64::new(0))
                .fetch_add(val, Ordering::Relaxed);
        }
    }

    /// Current value of a counter series, if it exists.
    pub fn counter_value(&self, name: &str, labels: Labels<'_>) -> Option<u64> {
        let counters = self.counters.read().unwrap_or_else(PoisonError::into_inner);
        counters
            .get(name)?
            .series
            .get(&render_labels(labels))
            .map(|c| c.load(Ordering::Relaxed))
    }

    /// Set a gauge series to a specific value.
    pub fn gauge_set(&self, name: &str, labels: Labels<'_>, val: i64) {
        let mut gauges = self.gauges.write().unwrap_or_else(PoisonError::into_inner);
        if let Some(family) = gauges.get_mut(name) {
            family
                .series
                .entry(render_labels(labels))
                .or_insert_with(|| AtomicI64::new(0))
                .store(val, Ordering::Relaxed);
        }
    }

    /// Current value of a gauge series, if it exists.
    pub fn gauge_value(&self, name: &str, labels: Labels<'_>) -> Option<i64> {
        let gauges = self.gauges.read().unwrap_or_else(PoisonError::into_inner);
        gauges
            .get(name)?
            .series
            .get(&render_labels(labels))
            .map(|g| g.load(Ordering::Relaxed))
    }

    /// Drop one gauge series so it is no longer exported.
    pub fn gauge_remove(&self, name: &str, labels: Labels<'_>) {
        let mut gauges = self.gauges.write().unwrap_or_else(PoisonError::into_inner);
        if let Some(family) = gauges.get_mut(name) {
            family.series.remove(&render_labels(labels));
        }
    }

    /// Render all metrics in Prometheus text exposition format.
    pub fn render(&self) -> String {
        let mut output = String::new();

        let counters = self.counters.read().unwrap_or_else(PoisonError::into_inner);
        for (name, family) in counters.iter() {
            output.push_str(&format!("# HELP {} {}\n", name, family.help));
            output.push_str(&format!("# TYPE {} counter\n", name));
            for (labels, value) in &family.series {
                output.push_str(&format!(
                    "{} {}\n",
                    series_name(name, labels),
                    value.load(Ordering::Relaxed)
                ));
            }
        }

        let gauges = self.gauges.read().unwrap_or_else(PoisonError::into_inner);
        for (name, family) in gauges.iter() {
            output.push_str(&format!("# HELP {} {}\n", name, family.help));
            output.push_str(&format!("# TYPE {} gauge\n", name));
            for (labels, value) in &family.series {
                output.push_str(&format!(
                    "{} {}\n",
                    series_name(name, labels),
                    value.load(Ordering::Relaxed)
                ));
            }
        }

        output
    }
}

impl Default for MetricsRegistry {
    fn default() -> Self {
        Self::new()
    }
}
