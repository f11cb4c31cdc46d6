//! Captures reduce one iteration's sample stream to a single metric group.

use std::thread;

use crate::aggregate::{cumulative_moving_average, max};
use crate::error::{BenchError, Result};
use crate::metric::{Metric, MetricGroup};
use crate::process::{ProcessSample, Subscription};

/// Turns the samples of one iteration into a [`MetricGroup`].
///
/// The iterator ends when the iteration's sampling window closes. A capture
/// must always return metrics in the same order, because iterations are
/// merged by index.
pub trait Capture: Send + Sync {
    fn capture(&self, samples: &mut dyn Iterator<Item = ProcessSample>) -> MetricGroup;
}

impl<F> Capture for F
where
    F: Fn(&mut dyn Iterator<Item = ProcessSample>) -> MetricGroup + Send + Sync,
{
    fn capture(&self, samples: &mut dyn Iterator<Item = ProcessSample>) -> MetricGroup {
        self(samples)
    }
}

const BYTES_TO_MB: f64 = 1e-6;

#[derive(Debug, Default, Clone, Copy, PartialEq)]
struct StatsAccumulator {
    elapsed: u64,
    avg_processes: f64,
    peak_processes: f64,
    avg_cpu: f64,
    peak_cpu: f64,
    avg_memory: f64,
    peak_memory: f64,
}

impl StatsAccumulator {
    fn fold(self, idx: usize, sample: &ProcessSample) -> Self {
        let processes = sample.process_count as f64;
        let memory = sample.memory_bytes as f64;
        Self {
            elapsed: sample.elapsed,
            avg_processes: cumulative_moving_average(self.avg_processes, processes, idx),
            peak_processes: max(self.peak_processes, processes),
            avg_cpu: cumulative_moving_average(self.avg_cpu, sample.cpu_percent, idx),
            peak_cpu: max(self.peak_cpu, sample.cpu_percent),
            avg_memory: cumulative_moving_average(self.avg_memory, memory, idx),
            peak_memory: max(self.peak_memory, memory),
        }
    }
}

/// The default capture: elapsed time plus average and peak process count,
/// CPU and memory.
#[derive(Debug, Default, Clone, Copy)]
pub struct ProcessStatsCapture;

impl ProcessStatsCapture {
    pub const GROUP_NAME: &'static str = "Process Stats";
}

impl Capture for ProcessStatsCapture {
    fn capture(&self, samples: &mut dyn Iterator<Item = ProcessSample>) -> MetricGroup {
        let stats = samples
            .enumerate()
            .fold(StatsAccumulator::default(), |acc, (idx, sample)| {
                acc.fold(idx, &sample)
            });

        MetricGroup::new(
            Self::GROUP_NAME,
            vec![
                Metric::new("Elapsed Time", "ms", stats.elapsed as f64),
                Metric::new("Average Process usage", "process(es)", stats.avg_processes),
                Metric::new("Peak Process usage", "process(es)", stats.peak_processes),
                Metric::new("Average CPU usage", "%", stats.avg_cpu),
                Metric::new("Peak CPU usage", "%", stats.peak_cpu),
                Metric::new("Average Memory usage", "MB", stats.avg_memory * BYTES_TO_MB),
                Metric::new("Peak Memory usage", "MB", stats.peak_memory * BYTES_TO_MB),
            ],
        )
    }
}

/// Runs each capture on its own thread, each reading its own subscription,
/// and returns their groups in capture order once every stream has ended.
pub fn run_captures(
    captures: &[Box<dyn Capture>],
    subscriptions: Vec<Subscription<ProcessSample>>,
) -> Result<Vec<MetricGroup>> {
    thread::scope(|scope| {
        let handles: Vec<_> = captures
            .iter()
            .zip(subscriptions)
            .map(|(capture, mut samples)| scope.spawn(move || capture.capture(&mut samples)))
            .collect();

        handles
            .into_iter()
            .map(|handle| {
                handle
                    .join()
                    .map_err(|_| BenchError::Monitor("capture thread panicked".into()))
            })
            .collect()
    })
}
