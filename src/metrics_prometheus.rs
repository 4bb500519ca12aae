//! Metric sink abstraction and a Prometheus text-exposition implementation.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, PoisonError};

/// Static description of a histogram instrument.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct HistogramDescriptor {
    pub name: &'static str,
    pub help: &'static str,
    pub boundaries: &'static [f64],
}

pub trait HistogramInstrument: Send + Sync {
    fn record(&self, value: u64, labels: &[(&'static str, &str)]);
}

/// Process-wide metric registry.
///
/// Registration is idempotent: asking twice for the same instrument name hands
/// back the instrument created first.
pub trait MetricsSink: Send + Sync {
    fn get_or_create_histogram(
        &self,
        descriptor: &HistogramDescriptor,
    ) -> Arc<dyn HistogramInstrument>;
}

#[derive(Clone, Debug)]
pub struct PrometheusMetricsConfig {
    pub max_series: usize,
}

impl Default for PrometheusMetricsConfig {
    fn default() -> Self {
        Self { max_series: 1024 }
    }
}

#[derive(Debug, Default)]
pub struct PrometheusRegistry {
    config: PrometheusMetricsConfig,
    histograms: Mutex<BTreeMap<&'static str, Arc<PrometheusHistogram>>>,
}

impl PrometheusRegistry {
    pub fn new(config: PrometheusMetricsConfig) -> Self {
        Self {
            config,
            histograms: Mutex::new(BTreeMap::new()),
        }
    }

    pub fn render(&self) -> String {
        let histograms: Vec<Arc<PrometheusHistogram>> = self
            .histograms
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect();

        let mut out = String::new();
        for histogram in histograms {
            histogram.render(&mut out);
        }
        out
    }

    /// All series of one histogram merged together.
    pub fn histogram_snapshot(&self, name: &str) -> Option<HistogramSnapshot> {
        let histogram = self
            .histograms
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .cloned()?;
        Some(histogram.snapshot())
    }
}

impl MetricsSink for PrometheusRegistry {
    fn get_or_create_histogram(
        &self,
        descriptor: &HistogramDescriptor,
    ) -> Arc<dyn HistogramInstrument> {
        let mut histograms = self
            .histograms
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if let Some(existing) = histograms.get(descriptor.name) {
            if existing.descriptor.boundaries != descriptor.boundaries {
                tracing::warn!(
                    metric = descriptor.name,
                    "histogram already registered with different boundaries"
                );
            }
            return existing.clone();
        }
        let histogram = Arc::new(PrometheusHistogram::new(
            *descriptor,
            self.config.max_series,
        ));
        histograms.insert(descriptor.name, histogram.clone());
        histogram
    }
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct HistogramSnapshot {
    pub count: u64,
    pub sum: u64,
    /// Cumulative counts per upper bound.
    pub buckets: Vec<(f64, u64)>,
}

#[derive(Debug)]
struct PrometheusHistogram {
    descriptor: HistogramDescriptor,
    max_series: usize,
    series: Mutex<HashMap<String, BucketHistogram>>,
}

impl PrometheusHistogram {
    fn new(descriptor: HistogramDescriptor, max_series: usize) -> Self {
        Self {
            descriptor,
            max_series,
            series: Mutex::new(HashMap::new()),
        }
    }

    fn snapshot(&self) -> HistogramSnapshot {
        let series = self.series.lock().unwrap_or_else(PoisonError::into_inner);
        let mut merged = BucketHistogram::new(self.descriptor.boundaries.len());
        for hist in series.values() {
            merged.merge(hist);
        }
        HistogramSnapshot {
            count: merged.count,
            sum: merged.sum,
            buckets: self
                .descriptor
                .boundaries
                .iter()
                .copied()
                .zip(merged.bucket_counts.iter().copied())
                .collect(),
        }
    }

    fn render(&self, out: &mut String) {
        let metric = self.descriptor.name;
        out.push_str(&format!("# HELP {metric} {}\n", self.descriptor.help));
        out.push_str(&format!("# TYPE {metric} histogram\n"));

        let series = self.series.lock().unwrap_or_else(PoisonError::into_inner);
        let mut entries: Vec<(&String, &BucketHistogram)> = series.iter().collect();
        entries.sort_by(|(a, _), (b, _)| a.cmp(b));
        for (labels, hist) in entries {
            let prefix = if labels.is_empty() {
                String::new()
            } else {
                format!("{labels},")
            };
            for (idx, bound) in self.descriptor.boundaries.iter().enumerate() {
                out.push_str(&format!(
                    "{metric}_bucket{{{prefix}le=\"{bound}\"}} {}\n",
                    hist.bucket_counts[idx]
                ));
            }
            out.push_str(&format!(
                "{metric}_bucket{{{prefix}le=\"+Inf\"}} {}\n",
                hist.count
            ));
            out.push_str(&format!("{metric}_sum{{{labels}}} {}\n", hist.sum));
            out.push_str(&format!("{metric}_count{{{labels}}} {}\n", hist.count));
        }
    }
}

impl HistogramInstrument for PrometheusHistogram {
    fn record(&self, value: u64, labels: &[(&'static str, &str)]) {
        let key = encode_labels(labels);
        let mut series = self.series.lock().unwrap_or_else(PoisonError::into_inner);
        let key = limit_label(key, &series, self.max_series);
        series
            .entry(key)
            .or_insert_with(|| BucketHistogram::new(self.descriptor.boundaries.len()))
            .observe(value, self.descriptor.boundaries);
    }
}

#[derive(Clone, Debug)]
struct BucketHistogram {
    bucket_counts: Vec<u64>,
    sum: u64,
    count: u64,
}

impl BucketHistogram {
    fn new(buckets: usize) -> Self {
        Self {
            bucket_counts: vec![0; buckets],
            sum: 0,
            count: 0,
        }
    }

    fn observe(&mut self, value: u64, boundaries: &[f64]) {
        self.sum = self.sum.saturating_add(value);
        self.count = self.count.saturating_add(1);
        let value = value as f64;
        for (idx, bound) in boundaries.iter().enumerate() {
            if value <= *bound {
                self.bucket_counts[idx] = self.bucket_counts[idx].saturating_add(1);
            }
        }
    }

    fn merge(&mut self, other: &BucketHistogram) {
        self.sum = self.sum.saturating_add(other.sum);
        self.count = self.count.saturating_add(other.count);
        for (mine, theirs) in self.bucket_counts.iter_mut().zip(&other.bucket_counts) {
            *mine = mine.saturating_add(*theirs);
        }
    }
}

fn limit_label<T>(key: String, map: &HashMap<String, T>, max_series: usize) -> String {
    if map.contains_key(&key) || map.len() < max_series {
        key
    } else {
        "series=\"__overflow__\"".to_string()
    }
}

fn encode_labels(labels: &[(&'static str, &str)]) -> String {
    labels
        .iter()
        .map(|(name, value)| format!("{name}=\"{}\"", escape_label_value(value)))
        .collect::<Vec<_>>()
        .join(",")
}

fn escape_label_value(value: &str) -> String {
    let mut out = String::new();
    for c in value.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '"' => out.push_str("\\\""),
            _ => out.push(c),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    const BOUNDS: &[f64] = &[1.0, 2.0, 4.0];
    const DESCRIPTOR: HistogramDescriptor = HistogramDescriptor {
        name: "test_histogram",
        help: "Test histogram.",
        boundaries: BOUNDS,
    };

    #[test]
    fn escapes_label_values() {
        assert_eq!(escape_label_value("a"), "a");
        assert_eq!(escape_label_value("a\"b"), "a\\\"b");
        assert_eq!(escape_label_value("a\\b"), "a\\\\b");
        assert_eq!(escape_label_value("a\nb"), "a\\nb");
    }

    #[test]
    fn registration_is_idempotent() {
        let registry = PrometheusRegistry::default();
        let first = registry.get_or_create_histogram(&DESCRIPTOR);
        let second = registry.get_or_create_histogram(&DESCRIPTOR);
        first.record(1, &[]);
        second.record(3, &[]);

        let snapshot = registry
            .histogram_snapshot("test_histogram")
            .expect("registered");
        assert_eq!(snapshot.count, 2);
        assert_eq!(snapshot.sum, 4);
        assert_eq!(snapshot.buckets, vec![(1.0, 1), (2.0, 1), (4.0, 2)]);
    }

    #[test]
    fn renders_cumulative_buckets_per_series() {
        let registry = PrometheusRegistry::default();
        let histogram = registry.get_or_create_histogram(&DESCRIPTOR);
        histogram.record(2, &[("phase", "prepare")]);

        let rendered = registry.render();
        assert!(rendered.contains("# TYPE test_histogram histogram\n"));
        assert!(rendered.contains("test_histogram_bucket{phase=\"prepare\",le=\"1\"} 0\n"));
        assert!(rendered.contains("test_histogram_bucket{phase=\"prepare\",le=\"2\"} 1\n"));
        assert!(rendered.contains("test_histogram_bucket{phase=\"prepare\",le=\"+Inf\"} 1\n"));
        assert!(rendered.contains("test_histogram_sum{phase=\"prepare\"} 2\n"));
        assert!(rendered.contains("test_histogram_count{phase=\"prepare\"} 1\n"));
    }

    #[test]
    fn series_beyond_limit_collapse_into_overflow() {
        let registry = PrometheusRegistry::new(PrometheusMetricsConfig { max_series: 1 });
        let histogram = registry.get_or_create_histogram(&DESCRIPTOR);
        histogram.record(1, &[("origin", "a")]);
        histogram.record(1, &[("origin", "b")]);
        histogram.record(1, &[("origin", "c")]);

        let rendered = registry.render();
        assert!(rendered.contains("test_histogram_count{origin=\"a\"} 1\n"));
        assert!(rendered.contains("test_histogram_count{series=\"__overflow__\"} 2\n"));
    }
}
