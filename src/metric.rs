//! Metric values produced by captures and folded across iterations.

/// A single named measurement.
///
/// When `component_values` is present, `value` is their mean. Each merge appends
/// the raw values of the other operand, so later merges can keep an exact
/// running mean without the original samples.
#[derive(Debug, Clone, PartialEq)]
pub struct Metric {
    pub name: String,
    pub unit: String,
    pub value: f64,
    pub component_values: Option<Vec<f64>>,
}

impl Metric {
    pub fn new(name: impl Into<String>, unit: impl Into<String>, value: f64) -> Self {
        Self {
            name: name.into(),
            unit: unit.into(),
            value,
            component_values: None,
        }
    }

    /// The raw values this metric stands for: its components, or just its value.
    pub fn values(&self) -> Vec<f64> {
        match &self.component_values {
            Some(values) => values.clone(),
            None => vec![self.value],
        }
    }
}

/// An ordered list of metrics under a common name.
#[derive(Debug, Clone, PartialEq)]
pub struct MetricGroup {
    pub name: String,
    pub metrics: Vec<Metric>,
}

impl MetricGroup {
    pub fn new(name: impl Into<String>, metrics: Vec<Metric>) -> Self {
        Self {
            name: name.into(),
            metrics,
        }
    }

    pub fn metric(&self, name: &str) -> Option<&Metric> {
        self.metrics.iter().find(|m| m.name == name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_values_without_components() {
        let metric = Metric::new("Elapsed Time", "ms", 12.5);
        assert_eq!(metric.values(), vec![12.5]);
    }

    #[test]
    fn test_values_with_components() {
        let metric = Metric {
            component_values: Some(vec![1.0, 3.0]),
            ..Metric::new("Elapsed Time", "ms", 2.0)
        };
        assert_eq!(metric.values(), vec![1.0, 3.0]);
    }

    #[test]
    fn test_group_lookup_by_name() {
        let group = MetricGroup::new(
            "Process Stats",
            vec![Metric::new("A", "ms", 1.0), Metric::new("B", "%", 2.0)],
        );
        assert_eq!(group.metric("B").map(|m| m.value), Some(2.0));
        assert!(group.metric("C").is_none());
    }
}
