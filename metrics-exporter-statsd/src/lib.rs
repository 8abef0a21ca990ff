//! A batching StatsD sink that ships metrics to a UDP collector or a Prometheus remote write endpoint.
//!
//! # Usage
//!
//! Sinks are created through [`BatchedSinkBuilder`]:
//!
//! ```no_run
//! # use metrics_exporter_statsd::BatchedSinkBuilder;
//! // Send plain StatsD datagrams over UDP, batched into packets of up to 1472 bytes.
//! let sink = BatchedSinkBuilder::default()
//!     .with_remote_address("127.0.0.1:8125")
//!     .expect("invalid address")
//!     .build()
//!     .expect("failed to build sink");
//!
//! sink.push("requests:1|c|#route:index").push("latency:12.5|ms");
//!
//! // Shutting down drains everything still buffered before returning.
//! sink.shutdown(true);
//! ```
//!
//! # Features
//!
//! ## Non-blocking producers
//!
//! Calls to [`BatchedSink::push`] never block and never fail. Datagrams land in a bounded buffer, and a single
//! background thread per sink drains that buffer. When the buffer is full, the datagram is dropped and counted.
//!
//! ## Size-bounded packets
//!
//! Datagrams are joined with newlines into packets that never exceed the configured maximum packet size. The
//! default of 1472 bytes for UDP keeps packets under a typical Ethernet MTU.
//!
//! ## Prometheus remote write
//!
//! When the remote address is an `http://` or `https://` URI, the sink switches to a periodic dispatcher that only
//! flushes when the buffer is filling up or when the flush interval elapses. Every packet is parsed, aggregated
//! (counters are summed, gauges keep their last value, timings are reduced to percentile sums and counts plus
//! optional cumulative histogram buckets), and then encoded as a snappy-compressed remote write request. Each request
//! also carries a handful of self-describing metrics about the sink itself.
//!
//! ## Retry once, then drop
//!
//! Both transports own their connection on the background thread. When a send fails, the connection is torn down,
//! rebuilt, and the send retried exactly once. If that fails as well, the packet is logged and dropped.

#![deny(clippy::all)]
#![deny(clippy::pedantic)]
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::cast_precision_loss)]
#![allow(clippy::cast_sign_loss)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::module_name_repetitions)]
#![deny(missing_docs)]
#![cfg_attr(docsrs, feature(doc_cfg), deny(rustdoc::broken_intra_doc_links))]

pub mod aggregator;
pub use self::aggregator::{Aggregation, Aggregator};

mod buffer;
pub use self::buffer::{Buffer, PushError};

mod builder;
pub use self::builder::{BatchedSinkBuilder, BuildError};

mod datagram;
pub use self::datagram::{Datagram, DatagramKey, MetricType, ParseError};

mod dispatcher;
mod flush_stats;
pub mod proto;

mod serializer;
pub use self::serializer::{sanitize_metric_name, DefaultLabels, Identity, Serializer};

mod sink;
pub use self::sink::BatchedSink;

mod transport;
mod writer;
