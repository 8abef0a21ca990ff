use crate::datagram::{format_number, Datagram, MetricType};

use super::TypeAggregator;

/// Reduces timings and histograms to percentile sums and counts, with optional cumulative buckets.
///
/// For a group of `n` samples and every configured percentile `p`, the samples are sorted and the lowest
/// `round(p / 100 * n)` of them are summed and counted. A negative percentile selects the highest samples instead, and
/// is labeled with a `top` prefix, so `-10` yields `sum_top10` and `count_top10`.
///
/// The output, in order, is:
///
/// - `<name>.sum_<p>` for each percentile, keeping the input metric type
/// - `<name>.sum`
/// - `<name>.count_<p>` for each percentile, as counters
/// - `<name>.count`
/// - `<name>.bucket` counters, one per configured bucket tagged `le:<bucket>` and one tagged `le:+Inf`
///
/// All outputs carry the sample rate and tags of the last datagram in the group.
#[derive(Clone, Debug, Default)]
pub struct Timing {
    percentiles: Vec<f64>,
    buckets: Vec<f64>,
}

impl Timing {
    /// Creates a new `Timing` aggregator.
    ///
    /// Buckets are sorted in ascending order.
    pub fn new(percentiles: Vec<f64>, mut buckets: Vec<f64>) -> Self {
        buckets.sort_by(f64::total_cmp);
        buckets.dedup();
        Timing { percentiles, buckets }
    }
}

impl TypeAggregator for Timing {
    fn aggregate(&self, group: Vec<Datagram>) -> Vec<Datagram> {
        let Some(last) = group.last() else {
            return Vec::new();
        };

        let mut values = group.iter().map(Datagram::value).collect::<Vec<_>>();
        values.sort_by(f64::total_cmp);

        let count = values.len();
        let cumulative = values
            .iter()
            .scan(0.0, |acc, value| {
                *acc += value;
                Some(*acc)
            })
            .collect::<Vec<f64>>();
        let sum = cumulative[count - 1];

        let mut sums = Vec::with_capacity(self.percentiles.len() + 1);
        let mut counts = Vec::with_capacity(self.percentiles.len() + 1);
        for &percentile in &self.percentiles {
            let rank = ((percentile.abs() / 100.0 * count as f64).round() as usize).min(count);
            if rank == 0 {
                continue;
            }

            let percentile_sum = if percentile > 0.0 {
                cumulative[rank - 1]
            } else if rank < count {
                sum - cumulative[count - rank - 1]
            } else {
                sum
            };

            let label = percentile_label(percentile);
            sums.push((format!("sum_{label}"), percentile_sum));
            counts.push((format!("count_{label}"), rank as f64));
        }
        sums.push(("sum".to_string(), sum));
        counts.push(("count".to_string(), count as f64));

        let derive = |suffix: &str, metric_type: MetricType, value: f64| {
            Datagram::new(format!("{}.{suffix}", last.name()), metric_type, value)
                .with_sample_rate(last.sample_rate())
                .with_tags(last.tags().iter().cloned())
        };

        let mut output = Vec::with_capacity(sums.len() + counts.len() + self.buckets.len() + 1);
        output.extend(sums.into_iter().map(|(suffix, value)| derive(&suffix, last.metric_type(), value)));
        output.extend(counts.into_iter().map(|(suffix, value)| derive(&suffix, MetricType::Counter, value)));

        if !self.buckets.is_empty() {
            let bucket_bounds = self
                .buckets
                .iter()
                .map(|bucket| (format_number(*bucket), values.partition_point(|value| value <= bucket)))
                .chain(std::iter::once(("+Inf".to_string(), count)));

            for (bound, bucket_count) in bucket_bounds {
                let tags = last.tags().iter().cloned().chain(std::iter::once(format!("le:{bound}")));
                output.push(
                    Datagram::new(format!("{}.bucket", last.name()), MetricType::Counter, bucket_count as f64)
                        .with_sample_rate(last.sample_rate())
                        .with_tags(tags),
                );
            }
        }

        output
    }
}

fn percentile_label(percentile: f64) -> String {
    let label = format_number(percentile).replace('.', "_");
    match label.strip_prefix('-') {
        Some(rest) => format!("top{rest}"),
        None => label,
    }
}
