use std::time::{Duration, Instant};

use metrics_exporter_statsd::{BatchedSink, BatchedSinkBuilder};

fn main() {
    tracing_subscriber::fmt::init();

    let sink = BatchedSinkBuilder::default()
        .with_remote_address("localhost:9125")
        .expect("failed to parse remote address")
        .build()
        .expect("failed to build StatsD sink");

    let started = Instant::now();
    let mut loops = 0u64;

    // Loop for a while, pretending to do some work.
    while started.elapsed() < Duration::from_secs(10) {
        loops += 1;
        let delta_ms = rand::random::<f64>() * 1000.0;

        sink.push("tcp_server_loops:1|c|#system:foo");
        if BatchedSink::sample(0.1) {
            sink.push(format!("tcp_server_loop_delta:{delta_ms}|ms|@0.1|#system:foo"));
        }
        if loops % 1000 == 0 {
            sink.push(format!("lucky_iterations:{loops}|g"));
        }

        std::thread::sleep(Duration::from_millis(1));
    }

    sink.shutdown(true);
    println!("sent {loops} loops, dropped {} datagrams", sink.dropped_datagrams());
}
