use std::{fmt, sync::Arc};

use tracing::trace;

use crate::{
    buffer::PushError,
    dispatcher::{Dispatcher, DispatcherState},
    flush_stats::SinkCounters,
};

/// A batching StatsD sink.
///
/// Datagrams pushed into the sink are buffered and handed to a background thread, which packs them into packets and
/// sends them to the configured destination. Pushing never blocks: when the buffer is full, the datagram is dropped and
/// counted instead.
///
/// Dropping the sink shuts it down without waiting. Call [`shutdown`](BatchedSink::shutdown) with `blocking` set to
/// `true` first to make sure buffered datagrams are sent.
pub struct BatchedSink {
    dispatcher: Dispatcher,
    counters: Arc<SinkCounters>,
    transport_id: &'static str,
}

impl BatchedSink {
    pub(crate) fn new(dispatcher: Dispatcher, counters: Arc<SinkCounters>, transport_id: &'static str) -> Self {
        BatchedSink { dispatcher, counters, transport_id }
    }

    /// Returns `true` if a datagram with the given sample rate should be sent.
    ///
    /// Rates of 1.0 or greater are always sent. Lower rates are sent with the corresponding probability.
    pub fn sample(rate: f64) -> bool {
        rate >= 1.0 || rand::random::<f64>() < rate
    }

    /// Pushes a single datagram into the sink.
    ///
    /// The datagram is expected to be in the StatsD wire format. A trailing newline is allowed.
    pub fn push<D>(&self, datagram: D) -> &Self
    where
        D: Into<String>,
    {
        match self.dispatcher.push(datagram.into()) {
            Ok(()) => {}
            Err(PushError::Full(_)) => self.counters.increment_dropped(),
            Err(PushError::Closed(datagram)) => {
                trace!(transport = self.transport_id, %datagram, "Sink is shut down, dropping datagram.");
            }
        }

        self
    }

    /// Shuts the sink down.
    ///
    /// When `blocking` is `true`, every datagram pushed before this call is sent before it returns. Otherwise, the
    /// background thread is asked to stop as soon as possible and this method returns immediately.
    ///
    /// Datagrams pushed after shutdown are discarded. Shutting down more than once has no further effect.
    pub fn shutdown(&self, blocking: bool) {
        self.dispatcher.shutdown(blocking);
    }

    /// Returns `true` if the sink has been shut down.
    pub fn is_shut_down(&self) -> bool {
        self.dispatcher.state() != DispatcherState::Running
    }

    /// Returns the number of datagrams dropped so far because the buffer was full.
    pub fn dropped_datagrams(&self) -> u64 {
        self.counters.dropped()
    }

    /// Returns the number of datagrams waiting in the buffer.
    pub fn pending(&self) -> usize {
        self.dispatcher.pending()
    }

    /// Returns a short identifier of the transport in use, such as `udp`.
    pub fn transport_id(&self) -> &'static str {
        self.transport_id
    }
}

impl fmt::Debug for BatchedSink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BatchedSink")
            .field("transport", &self.transport_id)
            .field("pending", &self.pending())
            .field("dropped_datagrams", &self.dropped_datagrams())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::BatchedSink;

    #[test]
    fn sampling() {
        assert!((0..1_000).all(|_| BatchedSink::sample(1.0)));
        assert!((0..1_000).all(|_| BatchedSink::sample(2.0)));
        assert!((0..1_000).all(|_| !BatchedSink::sample(0.0)));

        let draws = 100_000;
        let sampled = (0..draws).filter(|_| BatchedSink::sample(0.5)).count();
        let ratio = sampled as f64 / f64::from(draws);
        assert!((0.45..0.55).contains(&ratio), "sampled ratio was {ratio}");
    }
}
