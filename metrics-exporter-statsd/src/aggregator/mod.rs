//! Client-side aggregation of raw datagrams.
//!
//! A packet's worth of datagrams is parsed, grouped first by metric type and then by [`DatagramKey`], and every group
//! is reduced by the aggregator registered for its type:
//!
//! | type | aggregator |
//! |---|---|
//! | counter | [`Sum`] |
//! | gauge | [`LastValue`] |
//! | timing, histogram | [`Timing`] |
//! | anything else | [`Unsupported`] |
//!
//! Groups are visited in the order they were first seen, so the output is deterministic for a given input.
use indexmap::IndexMap;
use tracing::{trace, warn};

use crate::datagram::{Datagram, DatagramKey, MetricType};

mod last_value;
pub use self::last_value::LastValue;

mod sum;
pub use self::sum::Sum;

mod timing;
pub use self::timing::Timing;

/// Reduces a group of datagrams sharing a metric type and key into zero or more datagrams.
pub trait TypeAggregator {
    /// Aggregates the group.
    ///
    /// Datagrams are given in arrival order.
    fn aggregate(&self, group: Vec<Datagram>) -> Vec<Datagram>;
}

/// Drops every datagram of a type that has no aggregator.
#[derive(Clone, Copy, Debug, Default)]
pub struct Unsupported;

impl TypeAggregator for Unsupported {
    fn aggregate(&self, group: Vec<Datagram>) -> Vec<Datagram> {
        if let Some(last) = group.last() {
            warn!(
                metric_type = last.metric_type().as_str(),
                metric_name = last.name(),
                events_dropped = group.len(),
                "Events were dropped because no aggregator is defined for the metric type."
            );
        }

        Vec::new()
    }
}

/// Result of aggregating a packet.
#[derive(Debug, Default)]
pub struct Aggregation {
    /// Aggregated datagrams.
    pub datagrams: Vec<Datagram>,

    /// Number of non-empty input lines, whether or not they parsed.
    pub pre_aggregation_count: usize,

    /// Number of input lines that could not be parsed.
    pub parse_failure_count: usize,
}

/// Parses and aggregates raw packets.
#[derive(Clone, Debug, Default)]
pub struct Aggregator {
    timing: Timing,
}

impl Aggregator {
    /// Creates a new `Aggregator`.
    ///
    /// `percentiles` and `histogram_buckets` configure the output of timing and histogram groups. See [`Timing`].
    pub fn new(percentiles: Vec<f64>, histogram_buckets: Vec<f64>) -> Self {
        Aggregator { timing: Timing::new(percentiles, histogram_buckets) }
    }

    /// Aggregates every datagram in `packet`, one datagram per line.
    ///
    /// Lines that fail to parse are counted and skipped without affecting the rest of the packet. Blank lines are
    /// ignored entirely.
    pub fn aggregate(&self, packet: &str) -> Aggregation {
        let mut pre_aggregation_count = 0;
        let mut parse_failure_count = 0;
        let mut groups: IndexMap<MetricType, IndexMap<DatagramKey, Vec<Datagram>>> = IndexMap::new();

        for line in packet.lines().filter(|line| !line.trim().is_empty()) {
            pre_aggregation_count += 1;
            match Datagram::parse(line) {
                Ok(datagram) => groups
                    .entry(datagram.metric_type())
                    .or_default()
                    .entry(datagram.key())
                    .or_default()
                    .push(datagram),
                Err(e) => {
                    trace!(error = %e, line, "Skipping unparseable datagram.");
                    parse_failure_count += 1;
                }
            }
        }

        let mut datagrams = Vec::new();
        for (metric_type, groups_by_key) in groups {
            let aggregator = self.aggregator_for(metric_type);
            for (_, group) in groups_by_key {
                datagrams.extend(aggregator.aggregate(group));
            }
        }

        Aggregation { datagrams, pre_aggregation_count, parse_failure_count }
    }

    fn aggregator_for(&self, metric_type: MetricType) -> &dyn TypeAggregator {
        match metric_type {
            MetricType::Counter => &Sum,
            MetricType::Gauge => &LastValue,
            MetricType::Timing | MetricType::Histogram => &self.timing,
            MetricType::Set | MetricType::Distribution => &Unsupported,
        }
    }
}
