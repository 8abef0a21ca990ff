use std::{
    io,
    sync::Arc,
    time::{Duration, Instant, SystemTime, UNIX_EPOCH},
};

use http_body_util::{BodyExt as _, Full};
use hyper::{
    body::Bytes,
    header::{self, HeaderValue},
    Method, Request, Uri,
};
use hyper_rustls::{HttpsConnector, HttpsConnectorBuilder};
use hyper_util::{
    client::legacy::{connect::HttpConnector, Client, ResponseFuture},
    rt::TokioExecutor,
};
use tokio::runtime::{self, Runtime};
use tracing::{debug, trace};

use crate::{
    aggregator::Aggregator,
    flush_stats::{FlushStats, SinkCounters},
    proto::{CONTENT_ENCODING, CONTENT_TYPE, HEADER_NAME_REMOTE_WRITE_VERSION, REMOTE_WRITE_VERSION_01},
    serializer::{DefaultLabels, Serializer},
};

use super::{Connect, Connection, Transport, TransportError};

const USER_AGENT: &str = concat!("metrics-exporter-statsd/", env!("CARGO_PKG_VERSION"));

/// Remote write transport configuration.
#[derive(Clone, Debug)]
pub(crate) struct RemoteWriteConfiguration {
    pub endpoint: Uri,
    pub authorization: Option<HeaderValue>,
    pub connect_timeout: Duration,
    pub read_timeout: Duration,
    pub write_timeout: Duration,
    pub percentiles: Vec<f64>,
    pub histogram_buckets: Vec<f64>,
    pub default_labels: DefaultLabels,
    pub default_tags: Vec<String>,
}

enum HttpClient {
    Plain(Client<HttpConnector, Full<Bytes>>),
    Tls(Client<HttpsConnector<HttpConnector>, Full<Bytes>>),
}

impl HttpClient {
    fn request(&self, request: Request<Full<Bytes>>) -> ResponseFuture {
        match self {
            HttpClient::Plain(client) => client.request(request),
            HttpClient::Tls(client) => client.request(request),
        }
    }
}

struct HttpClientConnector {
    connect_timeout: Duration,
    tls: bool,
}

impl Connect for HttpClientConnector {
    type Connection = HttpClient;

    fn connect(&self) -> Result<HttpClient, TransportError> {
        let mut http = HttpConnector::new();
        http.set_connect_timeout(Some(self.connect_timeout));

        let mut builder = Client::builder(TokioExecutor::new());
        builder.pool_idle_timeout(Duration::from_secs(30));

        if !self.tls {
            return Ok(HttpClient::Plain(builder.build(http)));
        }

        http.enforce_http(false);
        let https =
            HttpsConnectorBuilder::new().with_native_roots()?.https_only().enable_http1().wrap_connector(http);
        Ok(HttpClient::Tls(builder.build(https)))
    }
}

/// Aggregates every packet and writes the result to a Prometheus remote write endpoint.
pub(crate) struct RemoteWriteTransport {
    runtime: Runtime,
    connection: Connection<HttpClientConnector>,
    endpoint: Uri,
    authorization: Option<HeaderValue>,
    request_timeout: Duration,
    read_timeout: Duration,
    aggregator: Aggregator,
    serializer: Serializer,
    default_tags: Vec<String>,
    counters: Arc<SinkCounters>,
    requests_attempted: u64,
    requests_succeeded: u64,
    last_flush_initiated: Instant,
}

impl RemoteWriteTransport {
    pub fn new(config: RemoteWriteConfiguration, counters: Arc<SinkCounters>) -> io::Result<Self> {
        let runtime = runtime::Builder::new_current_thread().enable_all().build()?;
        let tls = config.endpoint.scheme_str() == Some("https");

        Ok(RemoteWriteTransport {
            runtime,
            connection: Connection::new(HttpClientConnector { connect_timeout: config.connect_timeout, tls }),
            endpoint: config.endpoint,
            authorization: config.authorization,
            request_timeout: config.write_timeout.saturating_add(config.read_timeout),
            read_timeout: config.read_timeout,
            aggregator: Aggregator::new(config.percentiles, config.histogram_buckets),
            serializer: Serializer::new(&config.default_labels),
            default_tags: config.default_tags,
            counters,
            requests_attempted: 0,
            requests_succeeded: 0,
            last_flush_initiated: Instant::now(),
        })
    }

    fn build_body(&self, packet: &[u8], flush_started: Instant) -> Result<Bytes, TransportError> {
        let aggregation = self.aggregator.aggregate(&String::from_utf8_lossy(packet));

        let stats = FlushStats {
            metrics_since_last_flush: aggregation.datagrams.len(),
            metrics_since_last_flush_pre_aggregation: aggregation.pre_aggregation_count,
            http_requests_attempted: self.requests_attempted,
            http_requests_succeeded: self.requests_succeeded,
            datagrams_dropped_buffer_full: self.counters.dropped(),
            time_since_last_flush_initiated: flush_started.saturating_duration_since(self.last_flush_initiated),
            datagram_parse_failures: aggregation.parse_failure_count,
        };

        let mut datagrams = aggregation.datagrams;
        datagrams.extend(stats.into_datagrams(&self.default_tags));

        let timestamp_ms = SystemTime::now().duration_since(UNIX_EPOCH).map_or(0, |since| since.as_millis() as i64);
        let request = self.serializer.serialize(&datagrams, timestamp_ms);
        trace!(series = request.timeseries.len(), "Serialized write request.");

        Ok(request.encode_compressed()?.into())
    }

    fn post(&mut self, body: &Bytes) -> Result<(), TransportError> {
        let RemoteWriteTransport {
            runtime,
            connection,
            endpoint,
            authorization,
            request_timeout,
            read_timeout,
            requests_attempted,
            ..
        } = self;

        let (status, response_body) = connection.run_with_retry(|client| {
            *requests_attempted += 1;
            let request = build_http_request(endpoint, authorization.as_ref(), body.clone())?;

            runtime.block_on(async {
                let response = tokio::time::timeout(*request_timeout, client.request(request))
                    .await
                    .map_err(|_| TransportError::Timeout(*request_timeout))??;

                // The body is always read so that the connection can go back to the pool.
                let status = response.status();
                let body = tokio::time::timeout(*read_timeout, response.into_body().collect())
                    .await
                    .map_err(|_| TransportError::Timeout(*read_timeout))??
                    .to_bytes();

                Ok::<_, TransportError>((status, body))
            })
        })?;

        if !status.is_success() {
            return Err(TransportError::UnexpectedStatus { status, body: read_body(&response_body) });
        }

        self.requests_succeeded += 1;
        Ok(())
    }
}

impl Transport for RemoteWriteTransport {
    fn transport_id(&self) -> &'static str {
        "remote_write"
    }

    fn send(&mut self, packet: &[u8]) -> Result<(), TransportError> {
        let flush_started = Instant::now();

        let result = self.build_body(packet, flush_started).and_then(|body| {
            debug!(endpoint = %self.endpoint, body_len = body.len(), "Writing to remote write endpoint.");
            self.post(&body)
        });

        self.last_flush_initiated = flush_started;
        result
    }

    fn flush_idle(&mut self) -> Result<(), TransportError> {
        // An empty packet still carries the flush statistics.
        self.send(&[])
    }
}

fn build_http_request(
    endpoint: &Uri,
    authorization: Option<&HeaderValue>,
    body: Bytes,
) -> Result<Request<Full<Bytes>>, TransportError> {
    let mut builder = Request::builder()
        .method(Method::POST)
        .uri(endpoint)
        .header(header::CONTENT_TYPE, CONTENT_TYPE)
        .header(header::CONTENT_ENCODING, CONTENT_ENCODING)
        .header(HEADER_NAME_REMOTE_WRITE_VERSION, REMOTE_WRITE_VERSION_01)
        .header(header::USER_AGENT, USER_AGENT);
    if let Some(authorization) = authorization {
        builder = builder.header(header::AUTHORIZATION, authorization.clone());
    }

    Ok(builder.body(Full::new(body))?)
}

fn read_body(body: &Bytes) -> String {
    match std::str::from_utf8(body) {
        Ok(body) => body.to_string(),
        Err(_) => String::from("<failed to read response body>"),
    }
}

/// Builds a `Basic` authorization header value.
pub(crate) fn basic_auth(username: &str, password: Option<&str>) -> HeaderValue {
    use base64::prelude::BASE64_STANDARD;
    use base64::write::EncoderWriter;
    use std::io::Write;

    let mut buf = b"Basic ".to_vec();
    {
        // Writing into a `Vec` cannot fail. Dropping the encoder writes the final padding.
        let mut encoder = EncoderWriter::new(&mut buf, &BASE64_STANDARD);
        let _ = write!(encoder, "{username}:");
        if let Some(password) = password {
            let _ = write!(encoder, "{password}");
        }
    }

    // Base64 output is always a valid header value.
    let mut header = HeaderValue::from_bytes(&buf).unwrap_or_else(|_| HeaderValue::from_static("Basic"));
    header.set_sensitive(true);
    header
}

/// Builds a `Bearer` authorization header value.
pub(crate) fn bearer_auth(token: &str) -> Result<HeaderValue, header::InvalidHeaderValue> {
    let mut header = HeaderValue::from_str(&format!("Bearer {token}"))?;
    header.set_sensitive(true);
    Ok(header)
}
