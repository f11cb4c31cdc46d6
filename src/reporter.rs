//! Reporters receive the final aggregate once a run completes.

use tracing::info;

use crate::command::Command;
use crate::metric::{Metric, MetricGroup};

/// Invoked once at the end of a successful run.
pub trait Reporter: Send + Sync {
    fn report(&self, command: &Command, groups: &[MetricGroup]);
}

impl<F> Reporter for F
where
    F: Fn(&Command, &[MetricGroup]) + Send + Sync,
{
    fn report(&self, command: &Command, groups: &[MetricGroup]) {
        self(command, groups)
    }
}

/// Logs every group and its metrics at info level.
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultReporter;

impl Reporter for DefaultReporter {
    fn report(&self, _command: &Command, groups: &[MetricGroup]) {
        for group in groups {
            info!("{}", group.name);
            for metric in &group.metrics {
                info!("  {}", format_metric(metric));
            }
        }
    }
}

/// Formats a metric as `name: value unit (c1, c2, ...)` with two decimals.
pub fn format_metric(metric: &Metric) -> String {
    let line = format!("{}: {:.2} {}", metric.name, metric.value, metric.unit);
    match &metric.component_values {
        Some(values) => {
            let components = values
                .iter()
                .map(|v| format!("{:.2}", v))
                .collect::<Vec<_>>()
                .join(", ");
            format!("{} ({})", line, components)
        }
        None => line,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[test]
    fn test_format_metric_plain() {
        let metric = Metric::new("Elapsed Time", "ms", 1234.5678);
        assert_eq!(format_metric(&metric), "Elapsed Time: 1234.57 ms");
    }

    #[test]
    fn test_format_metric_with_components() {
        let metric = Metric {
            component_values: Some(vec![1.0, 2.5]),
            ..Metric::new("Peak CPU usage", "%", 1.75)
        };
        assert_eq!(
            format_metric(&metric),
            "Peak CPU usage: 1.75 % (1.00, 2.50)"
        );
    }

    #[test]
    fn test_closure_reporter_receives_groups() {
        let seen = Mutex::new(Vec::new());
        let reporter = |command: &Command, groups: &[MetricGroup]| {
            seen.lock()
                .unwrap()
                .push((command.program().to_string(), groups.len()));
        };

        let command = Command::new("true", vec![], "/", 0);
        let groups = vec![MetricGroup::new("Process Stats", vec![])];
        reporter.report(&command, &groups);

        assert_eq!(*seen.lock().unwrap(), vec![("true".to_string(), 1)]);
    }

    #[test]
    fn test_default_reporter_does_not_panic() {
        let command = Command::new("true", vec![], "/", 0);
        let groups = vec![MetricGroup::new(
            "Process Stats",
            vec![Metric::new("Elapsed Time", "ms", 10.0)],
        )];
        DefaultReporter.report(&command, &groups);
    }
}
