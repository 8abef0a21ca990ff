use crate::datagram::{Datagram, MetricType};

use super::TypeAggregator;

/// Sums a group of counters into a single `<name>.total` counter.
///
/// The output carries the sample rate and tags of the last datagram in the group.
#[derive(Clone, Copy, Debug, Default)]
pub struct Sum;

impl TypeAggregator for Sum {
    fn aggregate(&self, group: Vec<Datagram>) -> Vec<Datagram> {
        let Some(last) = group.last() else {
            return Vec::new();
        };

        let total = group.iter().map(Datagram::value).sum();
        let datagram = Datagram::new(format!("{}.total", last.name()), MetricType::Counter, total)
            .with_sample_rate(last.sample_rate())
            .with_tags(last.tags().iter().cloned());

        vec![datagram]
    }
}
