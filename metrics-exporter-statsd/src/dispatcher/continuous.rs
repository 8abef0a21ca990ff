use crate::transport::Transport;

use super::Worker;

/// Sends datagrams as soon as possible.
///
/// The thread blocks until a datagram arrives, then keeps packing whatever else is already buffered into the current
/// packet. A packet is sent when the next datagram would not fit, or when the buffer runs dry. Once the buffer is
/// closed and empty, the thread exits. An aborted dispatcher stops after sending its current packet.
pub(super) fn run<T: Transport>(worker: &mut Worker<T>) {
    while let Some(datagram) = worker.buffer().pop_blocking() {
        worker.write(&datagram);

        while !worker.aborted() {
            match worker.buffer().pop_nonblocking() {
                Some(datagram) => worker.write(&datagram),
                None => break,
            }
        }

        worker.flush();

        if worker.aborted() {
            break;
        }
    }
}
