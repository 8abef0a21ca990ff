use std::{
    sync::atomic::{AtomicU64, Ordering},
    time::Duration,
};

use crate::datagram::{Datagram, MetricType};

/// Counters shared between producers and the dispatch thread.
#[derive(Debug, Default)]
pub(crate) struct SinkCounters {
    dropped_buffer_full: AtomicU64,
}

impl SinkCounters {
    pub fn increment_dropped(&self) {
        self.dropped_buffer_full.fetch_add(1, Ordering::Relaxed);
    }

    pub fn dropped(&self) -> u64 {
        self.dropped_buffer_full.load(Ordering::Relaxed)
    }
}

/// Self-describing statistics about a single remote write flush.
///
/// Request counters reflect the state before the current request is attempted.
#[derive(Clone, Debug, Default)]
pub(crate) struct FlushStats {
    pub metrics_since_last_flush: usize,
    pub metrics_since_last_flush_pre_aggregation: usize,
    pub http_requests_attempted: u64,
    pub http_requests_succeeded: u64,
    pub datagrams_dropped_buffer_full: u64,
    pub time_since_last_flush_initiated: Duration,
    pub datagram_parse_failures: usize,
}

impl FlushStats {
    /// Renders the statistics as gauges carrying `default_tags`.
    pub fn into_datagrams(self, default_tags: &[String]) -> Vec<Datagram> {
        let gauge = |name: &str, value: f64| {
            Datagram::new(name, MetricType::Gauge, value).with_tags(default_tags.iter().cloned())
        };

        vec![
            gauge("metrics_since_last_flush", self.metrics_since_last_flush as f64),
            gauge(
                "metrics_since_last_flush_pre_aggregation",
                self.metrics_since_last_flush_pre_aggregation as f64,
            ),
            gauge("http_requests_attempted", self.http_requests_attempted as f64),
            gauge("http_requests_succeeded", self.http_requests_succeeded as f64),
            gauge("datagrams_dropped_buffer_full", self.datagrams_dropped_buffer_full as f64),
            gauge("time_since_last_flush_initiated", self.time_since_last_flush_initiated.as_secs_f64()),
            gauge("datagram_parse_failures", self.datagram_parse_failures as f64),
        ]
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::{FlushStats, SinkCounters};

    #[test]
    fn renders_every_statistic_as_a_tagged_gauge() {
        let stats = FlushStats {
            metrics_since_last_flush: 3,
            metrics_since_last_flush_pre_aggregation: 10,
            http_requests_attempted: 4,
            http_requests_succeeded: 2,
            datagrams_dropped_buffer_full: 7,
            time_since_last_flush_initiated: Duration::from_millis(1500),
            datagram_parse_failures: 1,
        };

        let rendered = stats
            .into_datagrams(&["env:test".to_string()])
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>();

        assert_eq!(
            rendered,
            vec![
                "metrics_since_last_flush:3|g|#env:test",
                "metrics_since_last_flush_pre_aggregation:10|g|#env:test",
                "http_requests_attempted:4|g|#env:test",
                "http_requests_succeeded:2|g|#env:test",
                "datagrams_dropped_buffer_full:7|g|#env:test",
                "time_since_last_flush_initiated:1.5|g|#env:test",
                "datagram_parse_failures:1|g|#env:test",
            ]
        );
    }

    #[test]
    fn drop_counter() {
        let counters = SinkCounters::default();
        counters.increment_dropped();
        counters.increment_dropped();
        assert_eq!(counters.dropped(), 2);
    }
}
