//! Pure arithmetic for folding metrics from successive iterations.

use crate::error::{BenchError, Result};
use crate::metric::{Metric, MetricGroup};

/// Returns `b` only when it is strictly greater than `a`; ties keep `a`.
pub fn max<T: PartialOrd>(a: T, b: T) -> T {
    if b > a {
        b
    } else {
        a
    }
}

/// Folds `val` into a mean `acc` that was computed over `n` values.
pub fn cumulative_moving_average(acc: f64, val: f64, n: usize) -> f64 {
    let n = n as f64;
    (val + n * acc) / (n + 1.0)
}

/// Merges two measurements of the same metric.
///
/// `m1.value` is taken as the mean of its component values, and every value of
/// `m2` is folded into it in order.
pub fn merge_metric(m1: &Metric, m2: &Metric) -> Result<Metric> {
    if m1.name != m2.name || m1.unit != m2.unit {
        return Err(BenchError::MetricMismatch(format!(
            "'{}' ({}) and '{}' ({}) have different names or units",
            m1.name, m1.unit, m2.name, m2.unit
        )));
    }

    let mut component_values = m1.values();
    let seed = component_values.len();
    let right = m2.values();

    let value = right
        .iter()
        .enumerate()
        .fold(m1.value, |acc, (idx, &val)| {
            cumulative_moving_average(acc, val, seed + idx)
        });
    component_values.extend(right);

    Ok(Metric {
        name: m1.name.clone(),
        unit: m1.unit.clone(),
        value,
        component_values: Some(component_values),
    })
}

/// Merges two groups metric by metric. Metrics correspond by index, not name.
pub fn merge_group(g1: &MetricGroup, g2: &MetricGroup) -> Result<MetricGroup> {
    if g1.name != g2.name || g1.metrics.len() != g2.metrics.len() {
        return Err(BenchError::MetricMismatch(format!(
            "groups '{}' ({} metrics) and '{}' ({} metrics) do not match",
            g1.name,
            g1.metrics.len(),
            g2.name,
            g2.metrics.len()
        )));
    }

    let metrics = g1
        .metrics
        .iter()
        .zip(&g2.metrics)
        .map(|(m1, m2)| merge_metric(m1, m2))
        .collect::<Result<Vec<_>>>()?;

    Ok(MetricGroup {
        name: g1.name.clone(),
        metrics,
    })
}

/// Merges an iteration's groups into the running aggregate, index by index.
///
/// An empty aggregate simply takes the new groups.
pub fn merge_groups(aggregate: &[MetricGroup], groups: Vec<MetricGroup>) -> Result<Vec<MetricGroup>> {
    if aggregate.is_empty() {
        return Ok(groups);
    }
    if aggregate.len() != groups.len() {
        return Err(BenchError::MetricMismatch(format!(
            "expected {} metric groups but got {}",
            aggregate.len(),
            groups.len()
        )));
    }
    aggregate
        .iter()
        .zip(&groups)
        .map(|(acc, group)| merge_group(acc, group))
        .collect()
}
