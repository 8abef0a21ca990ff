use std::{net::SocketAddr, sync::Arc, time::Duration};

use hyper::header::HeaderValue;
use thiserror::Error;

use crate::{
    dispatcher::{Dispatcher, DispatcherConfiguration, FlushPolicy, PeriodicConfiguration},
    flush_stats::SinkCounters,
    serializer::DefaultLabels,
    sink::BatchedSink,
    transport::{
        basic_auth, bearer_auth, RemoteAddr, RemoteWriteConfiguration, RemoteWriteTransport, Transport,
        UdpTransport,
    },
    writer::SMALLEST_VALID_DATAGRAM,
};

const DEFAULT_BUFFER_CAPACITY: usize = 5000;
const DEFAULT_UDP_MAX_PACKET_SIZE: usize = 1472;
const DEFAULT_REMOTE_WRITE_MAX_PACKET_SIZE: usize = 1_200_000;
const DEFAULT_WRITE_TIMEOUT: Duration = Duration::from_secs(1);
const DEFAULT_HTTP_WRITE_TIMEOUT: Duration = Duration::from_secs(10);
const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(2);
const DEFAULT_READ_TIMEOUT: Duration = Duration::from_secs(10);
const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);
const DEFAULT_FLUSH_INTERVAL: Duration = Duration::from_secs(60);
const DEFAULT_MAX_FILL_RATIO: f64 = 0.8;
const DEFAULT_PERCENTILES: [f64; 2] = [95.0, 99.0];

const DISPATCHER_THREAD_NAME: &str = "metrics-exporter-statsd-dispatcher";

/// Errors that could occur while building a sink.
#[derive(Debug, Error)]
pub enum BuildError {
    /// Failed to parse the remote address.
    #[error("invalid remote address: {reason}")]
    InvalidRemoteAddress {
        /// Details about the parsing failure.
        reason: String,
    },

    /// A configuration value was out of range.
    #[error("invalid configuration: {reason}")]
    InvalidConfiguration {
        /// Details about the invalid value.
        reason: String,
    },

    /// Failed to spawn the background thread.
    #[error("failed to spawn background thread for sink")]
    Backend,

    /// Failed to create the runtime used by the remote write transport.
    #[error("failed to create HTTP runtime: {0}")]
    Runtime(#[source] std::io::Error),
}

#[derive(Clone, Debug)]
enum Authorization {
    Bearer(String),
    Basic { username: String, password: Option<String> },
}

/// Builder for a [`BatchedSink`].
#[derive(Debug)]
pub struct BatchedSinkBuilder {
    remote_addr: RemoteAddr,
    buffer_capacity: usize,
    max_packet_len: Option<usize>,
    thread_priority: Option<i32>,
    write_timeout: Option<Duration>,
    connect_timeout: Duration,
    read_timeout: Duration,
    authorization: Option<Authorization>,
    percentiles: Vec<f64>,
    histogram_buckets: Vec<f64>,
    default_labels: DefaultLabels,
    default_tags: Vec<String>,
    poll_interval: Duration,
    flush_interval: Duration,
    max_fill_ratio: f64,
    log_dispatch: Option<tracing::Dispatch>,
}

impl BatchedSinkBuilder {
    /// Set the remote address to send datagrams to.
    ///
    /// An address in the format of `<host>:<port>` sends plain StatsD datagrams over UDP. An `http://` or `https://`
    /// URI aggregates the datagrams and writes them to a Prometheus remote write endpoint instead.
    ///
    /// Defaults to sending to `127.0.0.1:8125` over UDP.
    ///
    /// # Errors
    ///
    /// If the given address is not able to be parsed as a valid address, an error will be returned indicating the
    /// reason.
    pub fn with_remote_address<A>(mut self, addr: A) -> Result<Self, BuildError>
    where
        A: AsRef<str>,
    {
        self.remote_addr = RemoteAddr::try_from(addr.as_ref())
            .map_err(|reason| BuildError::InvalidRemoteAddress { reason })?;
        Ok(self)
    }

    /// Set the Prometheus remote write endpoint to write aggregated metrics to.
    ///
    /// # Errors
    ///
    /// If the given endpoint is not a valid `http://` or `https://` URI, an error will be returned indicating the
    /// reason.
    pub fn with_remote_write_endpoint<E>(self, endpoint: E) -> Result<Self, BuildError>
    where
        E: AsRef<str>,
    {
        let endpoint = endpoint.as_ref();
        if !(endpoint.starts_with("http://") || endpoint.starts_with("https://")) {
            return Err(BuildError::InvalidRemoteAddress {
                reason: format!("'{endpoint}' is not an http:// or https:// URI"),
            });
        }

        self.with_remote_address(endpoint)
    }

    /// Set the capacity of the buffer, in datagrams.
    ///
    /// Datagrams pushed while the buffer is full are dropped.
    ///
    /// Defaults to 5,000.
    #[must_use]
    pub fn with_buffer_capacity(mut self, capacity: usize) -> Self {
        self.buffer_capacity = capacity;
        self
    }

    /// Set the maximum size of a single packet, in bytes.
    ///
    /// Datagrams are packed together up to this size. A datagram that is larger than this on its own is dropped.
    ///
    /// Defaults to 1,472 bytes for UDP, which fits a typical Ethernet MTU, and to 1,200,000 bytes for remote write.
    #[must_use]
    pub fn with_maximum_packet_size(mut self, max_packet_len: usize) -> Self {
        self.max_packet_len = Some(max_packet_len);
        self
    }

    /// Set the priority of the background thread, as a Linux niceness value.
    ///
    /// Lower values mean higher priority. Raising the priority above the default generally requires elevated
    /// privileges. On other platforms, this setting is ignored.
    ///
    /// Defaults to inheriting the priority of the thread calling [`build`](BatchedSinkBuilder::build).
    #[must_use]
    pub fn with_thread_priority(mut self, niceness: i32) -> Self {
        self.thread_priority = Some(niceness);
        self
    }

    /// Set the write timeout.
    ///
    /// Defaults to 1 second for UDP, and to 10 seconds for remote write.
    #[must_use]
    pub fn with_write_timeout(mut self, timeout: Duration) -> Self {
        self.write_timeout = Some(timeout);
        self
    }

    /// Set the timeout for connecting to a remote write endpoint.
    ///
    /// Defaults to 2 seconds.
    #[must_use]
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Set the timeout for reading the response of a remote write endpoint.
    ///
    /// Defaults to 10 seconds.
    #[must_use]
    pub fn with_read_timeout(mut self, timeout: Duration) -> Self {
        self.read_timeout = timeout;
        self
    }

    /// Authenticate to the remote write endpoint with a bearer token.
    #[must_use]
    pub fn with_bearer_auth<T>(mut self, token: T) -> Self
    where
        T: Into<String>,
    {
        self.authorization = Some(Authorization::Bearer(token.into()));
        self
    }

    /// Authenticate to the remote write endpoint with HTTP basic authentication.
    #[must_use]
    pub fn with_basic_auth<U>(mut self, username: U, password: Option<String>) -> Self
    where
        U: Into<String>,
    {
        self.authorization = Some(Authorization::Basic { username: username.into(), password });
        self
    }

    /// Set the percentiles computed for timings and histograms sent to a remote write endpoint.
    ///
    /// A negative percentile selects the highest values instead of the lowest.
    ///
    /// Defaults to 95 and 99.
    #[must_use]
    pub fn with_percentiles(mut self, percentiles: &[f64]) -> Self {
        self.percentiles = percentiles.to_vec();
        self
    }

    /// Set the upper bounds of the cumulative buckets emitted for timings and histograms sent to a remote write
    /// endpoint.
    ///
    /// Defaults to no buckets.
    #[must_use]
    pub fn with_histogram_buckets(mut self, buckets: &[f64]) -> Self {
        self.histogram_buckets = buckets.to_vec();
        self
    }

    /// Set the labels attached to every time series written to a remote write endpoint.
    ///
    /// Defaults to no labels.
    #[must_use]
    pub fn with_default_labels(mut self, labels: DefaultLabels) -> Self {
        self.default_labels = labels;
        self
    }

    /// Set the tags attached to the statistics the sink reports about itself on every remote write.
    ///
    /// Defaults to no tags.
    #[must_use]
    pub fn with_default_tags<I, T>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<String>,
    {
        self.default_tags = tags.into_iter().map(Into::into).collect();
        self
    }

    /// Set how often the remote write dispatcher checks whether it should flush.
    ///
    /// Defaults to 1 second.
    #[must_use]
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Set how often the remote write dispatcher flushes, regardless of how full the buffer is.
    ///
    /// Defaults to 60 seconds.
    #[must_use]
    pub fn with_flush_interval(mut self, interval: Duration) -> Self {
        self.flush_interval = interval;
        self
    }

    /// Set how full the buffer may get, as a fraction of its capacity, before the remote write dispatcher flushes
    /// early.
    ///
    /// Defaults to 0.8.
    #[must_use]
    pub fn with_max_fill_ratio(mut self, ratio: f64) -> Self {
        self.max_fill_ratio = ratio;
        self
    }

    /// Set where the background thread sends its logs.
    ///
    /// Defaults to the dispatcher that is current on the thread calling [`build`](BatchedSinkBuilder::build).
    #[must_use]
    pub fn with_log_dispatch(mut self, dispatch: tracing::Dispatch) -> Self {
        self.log_dispatch = Some(dispatch);
        self
    }

    fn validate(&self) -> Result<(), BuildError> {
        let invalid = |reason: String| Err(BuildError::InvalidConfiguration { reason });

        if self.buffer_capacity == 0 {
            return invalid("buffer capacity must be greater than zero".to_string());
        }
        if let Some(max_packet_len) = self.max_packet_len {
            if max_packet_len < SMALLEST_VALID_DATAGRAM.len() {
                return invalid(format!(
                    "maximum packet size must be at least {} bytes",
                    SMALLEST_VALID_DATAGRAM.len()
                ));
            }
        }
        if self.max_fill_ratio.is_nan() || self.max_fill_ratio <= 0.0 || self.max_fill_ratio > 1.0 {
            return invalid(format!("maximum fill ratio must be in (0, 1], got {}", self.max_fill_ratio));
        }
        if self.poll_interval.is_zero() || self.flush_interval.is_zero() {
            return invalid("poll and flush intervals must be greater than zero".to_string());
        }
        if let Some(percentile) = self.percentiles.iter().find(|p| !(p.is_finite() && p.abs() <= 100.0)) {
            return invalid(format!("percentiles must be within [-100, 100], got {percentile}"));
        }
        if let Some(bucket) = self.histogram_buckets.iter().find(|b| !b.is_finite()) {
            return invalid(format!("histogram buckets must be finite, got {bucket}"));
        }

        Ok(())
    }

    fn authorization_header(&self) -> Result<Option<HeaderValue>, BuildError> {
        match &self.authorization {
            None => Ok(None),
            Some(Authorization::Basic { username, password }) => {
                Ok(Some(basic_auth(username, password.as_deref())))
            }
            Some(Authorization::Bearer(token)) => bearer_auth(token)
                .map(Some)
                .map_err(|e| BuildError::InvalidConfiguration { reason: format!("invalid bearer token: {e}") }),
        }
    }

    /// Builds the sink.
    ///
    /// The background thread is spawned immediately. For remote write, no connection is made until the first flush.
    ///
    /// # Errors
    ///
    /// If the configuration is invalid, or if the background thread or the HTTP runtime could not be created, an error
    /// will be returned.
    pub fn build(self) -> Result<BatchedSink, BuildError> {
        self.validate()?;

        let counters = Arc::new(SinkCounters::default());
        let log_dispatch =
            self.log_dispatch.clone().unwrap_or_else(|| tracing::dispatcher::get_default(|current| current.clone()));

        let mut dispatcher_config = DispatcherConfiguration {
            thread_name: DISPATCHER_THREAD_NAME.to_string(),
            buffer_capacity: self.buffer_capacity,
            max_packet_len: self.max_packet_len.unwrap_or(DEFAULT_UDP_MAX_PACKET_SIZE),
            thread_priority: self.thread_priority,
            policy: FlushPolicy::Continuous,
            log_dispatch,
        };

        let (dispatcher, transport_id) = match &self.remote_addr {
            RemoteAddr::Udp(addrs) => {
                let transport =
                    UdpTransport::new(addrs.clone(), self.write_timeout.unwrap_or(DEFAULT_WRITE_TIMEOUT));
                spawn(dispatcher_config, transport)?
            }
            RemoteAddr::RemoteWrite(endpoint) => {
                dispatcher_config.max_packet_len =
                    self.max_packet_len.unwrap_or(DEFAULT_REMOTE_WRITE_MAX_PACKET_SIZE);
                dispatcher_config.policy = FlushPolicy::Periodic(PeriodicConfiguration {
                    poll_interval: self.poll_interval,
                    flush_interval: self.flush_interval,
                    max_fill_ratio: self.max_fill_ratio,
                });

                let remote_write_config = RemoteWriteConfiguration {
                    endpoint: endpoint.clone(),
                    authorization: self.authorization_header()?,
                    connect_timeout: self.connect_timeout,
                    read_timeout: self.read_timeout,
                    write_timeout: self.write_timeout.unwrap_or(DEFAULT_HTTP_WRITE_TIMEOUT),
                    percentiles: self.percentiles,
                    histogram_buckets: self.histogram_buckets,
                    default_labels: self.default_labels,
                    default_tags: self.default_tags,
                };
                let transport = RemoteWriteTransport::new(remote_write_config, Arc::clone(&counters))
                    .map_err(BuildError::Runtime)?;
                spawn(dispatcher_config, transport)?
            }
        };

        Ok(BatchedSink::new(dispatcher, counters, transport_id))
    }
}

fn spawn<T>(config: DispatcherConfiguration, transport: T) -> Result<(Dispatcher, &'static str), BuildError>
where
    T: Transport,
{
    let transport_id = transport.transport_id();
    let dispatcher = Dispatcher::spawn(config, transport).map_err(|_| BuildError::Backend)?;
    Ok((dispatcher, transport_id))
}

impl Default for BatchedSinkBuilder {
    fn default() -> Self {
        BatchedSinkBuilder {
            remote_addr: RemoteAddr::Udp(vec![SocketAddr::from(([127, 0, 0, 1], 8125))]),
            buffer_capacity: DEFAULT_BUFFER_CAPACITY,
            max_packet_len: None,
            thread_priority: None,
            write_timeout: None,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            read_timeout: DEFAULT_READ_TIMEOUT,
            authorization: None,
            percentiles: DEFAULT_PERCENTILES.to_vec(),
            histogram_buckets: Vec::new(),
            default_labels: DefaultLabels::default(),
            default_tags: Vec::new(),
            poll_interval: DEFAULT_POLL_INTERVAL,
            flush_interval: DEFAULT_FLUSH_INTERVAL,
            max_fill_ratio: DEFAULT_MAX_FILL_RATIO,
            log_dispatch: None,
        }
    }
}
