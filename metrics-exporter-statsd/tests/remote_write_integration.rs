use std::{
    collections::HashMap,
    io::{BufRead as _, BufReader, Read as _, Write as _},
    net::{SocketAddr, TcpListener},
    sync::mpsc,
    thread,
    time::Duration,
};

use metrics_exporter_statsd::{
    proto::{WriteRequest, LABEL_NAME},
    BatchedSinkBuilder, DefaultLabels,
};
use prost::Message as _;

#[derive(Clone, Copy)]
enum Reply {
    Status(u16),
    HangUp,
}

struct ReceivedRequest {
    headers: HashMap<String, String>,
    write_request: WriteRequest,
}

impl ReceivedRequest {
    fn value_of(&self, name: &str) -> Option<f64> {
        self.write_request
            .timeseries
            .iter()
            .find(|series| series.label(LABEL_NAME) == Some(name))
            .map(|series| series.samples[0].value)
    }

    fn labels_of(&self, name: &str) -> HashMap<String, String> {
        self.write_request
            .timeseries
            .iter()
            .find(|series| series.label(LABEL_NAME) == Some(name))
            .map(|series| series.labels.iter().map(|l| (l.name.clone(), l.value.clone())).collect())
            .unwrap_or_default()
    }
}

/// Serves one connection per reply, answering in order, then stops accepting.
///
/// Every request that is answered with a status is decoded and handed back over the channel.
fn spawn_endpoint(replies: Vec<Reply>) -> (SocketAddr, mpsc::Receiver<ReceivedRequest>) {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    let (tx, rx) = mpsc::channel();

    thread::spawn(move || {
        for reply in replies {
            let Ok((stream, _)) = listener.accept() else { return };
            let mut reader = BufReader::new(stream);

            let mut headers = HashMap::new();
            let mut line = String::new();
            reader.read_line(&mut line).unwrap();
            loop {
                line.clear();
                reader.read_line(&mut line).unwrap();
                let header = line.trim_end();
                if header.is_empty() {
                    break;
                }
                if let Some((name, value)) = header.split_once(':') {
                    headers.insert(name.trim().to_ascii_lowercase(), value.trim().to_string());
                }
            }

            let content_length = headers.get("content-length").map_or(0, |len| len.parse().unwrap());
            let mut body = vec![0u8; content_length];
            reader.read_exact(&mut body).unwrap();

            let status = match reply {
                Reply::HangUp => continue,
                Reply::Status(status) => status,
            };

            let response = format!(
                "HTTP/1.1 {status} Whatever\r\ncontent-length: 4\r\nconnection: close\r\n\r\nnope"
            );
            reader.get_mut().write_all(response.as_bytes()).unwrap();

            let decompressed = snap::raw::Decoder::new().decompress_vec(&body).unwrap();
            let write_request = WriteRequest::decode(decompressed.as_slice()).unwrap();
            if tx.send(ReceivedRequest { headers, write_request }).is_err() {
                return;
            }
        }
    });

    (addr, rx)
}

fn endpoint_uri(addr: SocketAddr) -> String {
    format!("http://{addr}/api/v1/write")
}

fn receive(rx: &mpsc::Receiver<ReceivedRequest>) -> ReceivedRequest {
    rx.recv_timeout(Duration::from_secs(10)).expect("no remote write request received")
}

#[test]
fn test_remote_write_aggregates_and_reports_flush_stats() {
    let (addr, rx) = spawn_endpoint(vec![Reply::Status(200)]);

    let sink = BatchedSinkBuilder::default()
        .with_remote_write_endpoint(endpoint_uri(addr))
        .unwrap()
        .with_bearer_auth("s3cr3t")
        .with_default_labels(DefaultLabels::new("web", "checkout").with_deployment("prod", "7"))
        .with_default_tags(["env:test"])
        .with_flush_interval(Duration::from_secs(3600))
        .with_max_fill_ratio(1.0)
        .build()
        .unwrap();

    sink.push("foo:10|c|#route:index")
        .push("foo:1|c|#route:index")
        .push("foo:1|c|#route:index")
        .push("foo:2|c|#route:index")
        .push("queue.depth:5|g")
        .push("queue.depth:3|g")
        .push("not a datagram");
    sink.shutdown(true);

    let request = receive(&rx);
    assert_eq!(request.headers["authorization"], "Bearer s3cr3t");
    assert_eq!(request.headers["content-type"], "application/x-protobuf");
    assert_eq!(request.headers["content-encoding"], "snappy");
    assert_eq!(request.headers["x-prometheus-remote-write-version"], "0.1.0");
    assert!(request.headers["user-agent"].starts_with("metrics-exporter-statsd/"));

    assert_eq!(request.value_of("foo_total"), Some(14.0));
    assert_eq!(request.value_of("queue_depth"), Some(3.0));

    let labels = request.labels_of("foo_total");
    assert_eq!(labels["route"], "index");
    assert_eq!(labels["application"], "web");
    assert_eq!(labels["subsystem"], "checkout");
    assert_eq!(labels["deployment"], "prod");
    assert_eq!(labels["slot"], "7");

    assert_eq!(request.value_of("metrics_since_last_flush"), Some(2.0));
    assert_eq!(request.value_of("metrics_since_last_flush_pre_aggregation"), Some(7.0));
    assert_eq!(request.value_of("datagram_parse_failures"), Some(1.0));
    assert_eq!(request.value_of("http_requests_attempted"), Some(0.0));
    assert_eq!(request.value_of("http_requests_succeeded"), Some(0.0));
    assert_eq!(request.value_of("datagrams_dropped_buffer_full"), Some(0.0));
    assert!(request.value_of("time_since_last_flush_initiated").is_some());
    assert_eq!(request.labels_of("metrics_since_last_flush")["env"], "test");

    // Labels of every series are sorted by name.
    for series in &request.write_request.timeseries {
        let names = series.labels.iter().map(|label| label.name.clone()).collect::<Vec<_>>();
        let mut sorted = names.clone();
        sorted.sort();
        assert_eq!(names, sorted);
        assert_eq!(series.samples.len(), 1);
    }
}

#[test]
fn test_remote_write_counts_buffer_full_drops() {
    let (addr, rx) = spawn_endpoint(vec![Reply::Status(200)]);

    let sink = BatchedSinkBuilder::default()
        .with_remote_write_endpoint(endpoint_uri(addr))
        .unwrap()
        .with_buffer_capacity(3)
        .with_flush_interval(Duration::from_secs(3600))
        .with_max_fill_ratio(1.0)
        .build()
        .unwrap();

    for _ in 0..6 {
        sink.push("foo:1|c");
    }
    assert_eq!(sink.dropped_datagrams(), 3);
    sink.shutdown(true);

    let request = receive(&rx);
    assert_eq!(request.value_of("foo_total"), Some(3.0));
    assert_eq!(request.value_of("datagrams_dropped_buffer_full"), Some(3.0));
}

#[test]
fn test_remote_write_retries_once_and_tracks_requests() {
    // The first connection is dropped without a response, so the first flush is sent twice.
    let replies = vec![Reply::HangUp, Reply::Status(200), Reply::Status(500), Reply::Status(200)];
    let (addr, rx) = spawn_endpoint(replies);

    let sink = BatchedSinkBuilder::default()
        .with_remote_write_endpoint(endpoint_uri(addr))
        .unwrap()
        .with_poll_interval(Duration::from_millis(10))
        .with_flush_interval(Duration::from_secs(3600))
        .with_max_fill_ratio(0.0001)
        .build()
        .unwrap();

    // A single buffered datagram is over the fill ratio, so every push is flushed on its own.
    sink.push("first:1|c");
    let first = receive(&rx);
    assert_eq!(first.value_of("first_total"), Some(1.0));

    sink.push("second:1|c");
    let second = receive(&rx);
    assert_eq!(second.value_of("second_total"), Some(1.0));
    assert_eq!(second.value_of("http_requests_attempted"), Some(2.0));
    assert_eq!(second.value_of("http_requests_succeeded"), Some(1.0));

    // The second flush was answered with a 500, which is dropped rather than retried.
    sink.push("third:1|c");
    let third = receive(&rx);
    assert_eq!(third.value_of("second_total"), None);
    assert_eq!(third.value_of("third_total"), Some(1.0));
    assert_eq!(third.value_of("http_requests_attempted"), Some(3.0));
    assert_eq!(third.value_of("http_requests_succeeded"), Some(1.0));

    sink.shutdown(true);
}

#[test]
fn test_remote_write_reports_flush_stats_while_idle() {
    let (addr, rx) = spawn_endpoint(vec![Reply::Status(200)]);

    let sink = BatchedSinkBuilder::default()
        .with_remote_write_endpoint(endpoint_uri(addr))
        .unwrap()
        .with_default_tags(["env:test"])
        .with_poll_interval(Duration::from_millis(10))
        .with_flush_interval(Duration::from_millis(50))
        .build()
        .unwrap();

    let request = receive(&rx);
    assert_eq!(request.write_request.timeseries.len(), 7);
    assert_eq!(request.value_of("metrics_since_last_flush"), Some(0.0));
    assert_eq!(request.value_of("metrics_since_last_flush_pre_aggregation"), Some(0.0));
    assert_eq!(request.value_of("datagram_parse_failures"), Some(0.0));
    assert_eq!(request.value_of("datagrams_dropped_buffer_full"), Some(0.0));
    assert!(request.value_of("time_since_last_flush_initiated").is_some());
    assert_eq!(request.labels_of("metrics_since_last_flush")["env"], "test");

    sink.shutdown(false);
}
