//! Performance monitoring: metric samples, memory probes, summary statistics
//! and report export.

use crate::error::Result;
use crate::model::Attributes;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::path::Path;
use tracing::debug;

/// One recorded sample
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PerformanceMetric {
    /// Metric name
    pub name: String,
    /// Value
    pub value: f64,
    /// Unit (`ms`, `MB`, `count`, ...)
    pub unit: String,
    /// When it was recorded
    pub timestamp: DateTime<Utc>,
    /// Free-form context
    #[serde(default)]
    pub context: Attributes,
}

/// Summary statistics of one metric
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricStatistics {
    /// Samples
    pub count: usize,
    /// Smallest value
    pub min: f64,
    /// Largest value
    pub max: f64,
    /// Arithmetic mean
    pub mean: f64,
    /// Median
    pub median: f64,
    /// Sample standard deviation, 0 for a single sample
    pub std_dev: f64,
    /// Unit of the samples
    pub unit: String,
}

impl MetricStatistics {
    fn from_values(values: &mut [f64], unit: &str) -> Option<Self> {
        if values.is_empty() {
            return None;
        }
        values.sort_by(|a, b| a.total_cmp(b));
        let count = values.len();
        let mean = values.iter().sum::<f64>() / count as f64;
        let median = if count % 2 == 1 {
            values[count / 2]
        } else {
            (values[count / 2 - 1] + values[count / 2]) / 2.0
        };
        let std_dev = if count > 1 {
            (values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (count - 1) as f64).sqrt()
        } else {
            0.0
        };
        Some(Self {
            count,
            min: values[0],
            max: values[count - 1],
            mean,
            median,
            std_dev,
            unit: unit.to_string(),
        })
    }
}

/// Process memory at one point in time
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MemoryUsage {
    /// Resident set size, MB
    pub rss_mb: f64,
    /// Virtual memory size, MB
    pub vms_mb: f64,
}

/// Host description included in exports
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SystemInfo {
    /// Operating system
    pub os: String,
    /// CPU architecture
    pub arch: String,
    /// Logical CPUs
    pub cpu_count: usize,
    /// Process id
    pub pid: u32,
}

impl SystemInfo {
    /// Describe the current host
    pub fn current() -> Self {
        Self {
            os: std::env::consts::OS.to_string(),
            arch: std::env::consts::ARCH.to_string(),
            cpu_count: std::thread::available_parallelism().map(|n| n.get()).unwrap_or(1),
            pid: std::process::id(),
        }
    }
}

/// Exported metrics document
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsExport {
    /// Host description
    pub system_info: SystemInfo,
    /// Every sample, in recording order
    pub metrics: Vec<PerformanceMetric>,
    /// Statistics per metric name
    pub statistics: BTreeMap<String, MetricStatistics>,
    /// Export time
    pub export_time: DateTime<Utc>,
}

/// Thread-safe metric recorder
#[derive(Debug, Default)]
pub struct PerformanceMonitor {
    metrics: Mutex<Vec<PerformanceMetric>>,
}

impl PerformanceMonitor {
    /// Create an empty monitor
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one sample
    pub fn record_metric(&self, name: &str, value: f64, unit: &str, context: Attributes) {
        debug!(metric = name, value, unit, "metric recorded");
        self.metrics.lock().push(PerformanceMetric {
            name: name.to_string(),
            value,
            unit: unit.to_string(),
            timestamp: Utc::now(),
            context,
        });
    }

    /// Record process memory as `<label>_memory_rss` and `<label>_memory_vms`.
    /// Returns `None` where memory cannot be read.
    pub fn measure_memory(&self, label: &str, context: Attributes) -> Option<MemoryUsage> {
        let usage = current_memory_usage()?;
        self.record_metric(&format!("{label}_memory_rss"), usage.rss_mb, "MB", context.clone());
        self.record_metric(&format!("{label}_memory_vms"), usage.vms_mb, "MB", context);
        Some(usage)
    }

    /// All samples, in recording order
    pub fn metrics(&self) -> Vec<PerformanceMetric> {
        self.metrics.lock().clone()
    }

    /// Statistics for one metric name
    pub fn statistics(&self, name: &str) -> Option<MetricStatistics> {
        let metrics = self.metrics.lock();
        let unit = metrics.iter().find(|m| m.name == name)?.unit.clone();
        let mut values: Vec<f64> = metrics.iter().filter(|m| m.name == name).map(|m| m.value).collect();
        MetricStatistics::from_values(&mut values, &unit)
    }

    /// Statistics for every metric name
    pub fn all_statistics(&self) -> BTreeMap<String, MetricStatistics> {
        let metrics = self.metrics.lock();
        let mut grouped: BTreeMap<String, (String, Vec<f64>)> = BTreeMap::new();
        for metric in metrics.iter() {
            grouped
                .entry(metric.name.clone())
                .or_insert_with(|| (metric.unit.clone(), Vec::new()))
                .1
                .push(metric.value);
        }
        grouped
            .into_iter()
            .filter_map(|(name, (unit, mut values))| {
                MetricStatistics::from_values(&mut values, &unit).map(|s| (name, s))
            })
            .collect()
    }

    /// Human-readable summary of everything recorded
    pub fn report(&self) -> String {
        let stats = self.all_statistics();
        let system = SystemInfo::current();
        let mut out = String::new();
        let rule = "=".repeat(60);

        let _ = writeln!(out, "{rule}");
        let _ = writeln!(out, "PERFORMANCE REPORT");
        let _ = writeln!(out, "{rule}");
        let _ = writeln!(out, "Generated: {}", Utc::now().format("%Y-%m-%d %H:%M:%S UTC"));
        let _ = writeln!(out, "System: {} {}, {} CPUs", system.os, system.arch, system.cpu_count);

        let sections: [(&str, fn(&str) -> bool); 3] = [
            ("Durations", |n| n.ends_with("_duration")),
            ("Memory", |n| n.contains("_memory_")),
            ("Other metrics", |n| !n.ends_with("_duration") && !n.contains("_memory_")),
        ];
        for (title, matches) in sections {
            let entries: Vec<_> = stats.iter().filter(|(name, _)| matches(name)).collect();
            if entries.is_empty() {
                continue;
            }
            let _ = writeln!(out, "\n{title}");
            for (name, s) in entries {
                if s.count == 1 {
                    let _ = writeln!(out, "  {name}: {:.2} {}", s.mean, s.unit);
                } else {
                    let _ = writeln!(
                        out,
                        "  {name}: mean {:.2} {} (min {:.2}, max {:.2}, median {:.2}, std dev {:.2}, n={})",
                        s.mean, s.unit, s.min, s.max, s.median, s.std_dev, s.count
                    );
                }
            }
        }
        out
    }

    /// Build the export document
    pub fn export(&self) -> MetricsExport {
        MetricsExport {
            system_info: SystemInfo::current(),
            metrics: self.metrics(),
            statistics: self.all_statistics(),
            export_time: Utc::now(),
        }
    }

    /// Write the export document as pretty JSON
    pub fn export_metrics(&self, path: impl AsRef<Path>) -> Result<()> {
        let json = serde_json::to_string_pretty(&self.export())?;
        std::fs::write(path.as_ref(), json)?;
        debug!(path = %path.as_ref().display(), "metrics exported");
        Ok(())
    }
}

/// Current process memory, Linux only
pub fn current_memory_usage() -> Option<MemoryUsage> {
    #[cfg(target_os = "linux")]
    {
        let status = std::fs::read_to_string("/proc/self/status").ok()?;
        parse_proc_status(&status)
    }
    #[cfg(not(target_os = "linux"))]
    {
        None
    }
}

#[cfg_attr(not(target_os = "linux"), allow(dead_code))]
fn parse_proc_status(status: &str) -> Option<MemoryUsage> {
    let field = |prefix: &str| -> Option<f64> {
        let line = status.lines().find(|l| l.starts_with(prefix))?;
        let kb: f64 = line.split_whitespace().nth(1)?.parse().ok()?;
        Some(kb / 1024.0)
    };
    Some(MemoryUsage {
        rss_mb: field("VmRSS:")?,
        vms_mb: field("VmSize:").unwrap_or(0.0),
    })
}
