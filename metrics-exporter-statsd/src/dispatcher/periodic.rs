use std::{thread, time::Instant};

use tracing::trace;

use crate::transport::Transport;

use super::{PeriodicConfiguration, Worker};

/// Sends datagrams in bulk.
///
/// The thread wakes up every poll interval, or earlier when a producer notices the buffer filling up, and flushes
/// when the buffer is fuller than the maximum fill ratio or when the flush interval has elapsed since the last flush.
/// A flush triggered by the interval happens even when nothing is buffered. After the buffer is closed, whatever is
/// still buffered is flushed one last time.
pub(super) fn run<T: Transport>(worker: &mut Worker<T>, config: PeriodicConfiguration) {
    let mut last_flush = Instant::now();

    while !worker.buffer().is_closed() {
        thread::park_timeout(config.poll_interval);

        let fill_ratio = worker.buffer().fill_ratio();
        let interval_elapsed = last_flush.elapsed() >= config.flush_interval;
        if fill_ratio > config.max_fill_ratio || interval_elapsed {
            trace!(fill_ratio, interval_elapsed, "Flushing buffered datagrams.");
            last_flush = Instant::now();
            drain(worker, interval_elapsed);
        }
    }

    drain(worker, false);
}

/// Packs and sends every datagram buffered at the time of the call.
///
/// Datagrams pushed while draining are left for the next flush. When the buffer was empty and `report_idle` is set,
/// the transport is told that the flush came due with nothing to send.
fn drain<T: Transport>(worker: &mut Worker<T>, report_idle: bool) {
    let mut written = 0;
    let pending = worker.buffer().len();
    for _ in 0..pending {
        match worker.buffer().pop_nonblocking() {
            Some(datagram) => {
                worker.write(&datagram);
                written += 1;
            }
            None => break,
        }
    }

    if written == 0 && report_idle {
        worker.flush_idle();
    } else {
        worker.flush();
    }
}
