use std::time::Duration;

use metrics_exporter_statsd::{BatchedSinkBuilder, DefaultLabels};

fn main() {
    tracing_subscriber::fmt::init();

    let sink = BatchedSinkBuilder::default()
        .with_remote_write_endpoint("http://localhost:9090/api/v1/write")
        .expect("failed to parse remote write endpoint")
        .with_default_labels(DefaultLabels::new("demo", "worker").with_host("localhost", std::process::id()))
        .with_percentiles(&[50.0, 95.0, -10.0])
        .with_histogram_buckets(&[10.0, 50.0, 100.0, 500.0])
        .with_flush_interval(Duration::from_secs(5))
        .build()
        .expect("failed to build remote write sink");

    for i in 0..20_000u32 {
        sink.push("jobs_processed:1|c|#queue:default")
            .push(format!("job_latency:{}|ms|#queue:default", i % 700))
            .push(format!("queue_depth:{}|g|#queue:default", 20_000 - i));

        if i % 100 == 0 {
            std::thread::sleep(Duration::from_millis(25));
        }
    }

    sink.shutdown(true);
}
