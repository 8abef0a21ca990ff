use std::{
    io,
    sync::{
        atomic::{AtomicBool, AtomicU8, Ordering},
        Arc,
    },
    thread::{self, JoinHandle, Thread},
    time::Duration,
};

use parking_lot::Mutex;
use tracing::{debug, error, trace, warn};

use crate::{
    buffer::{Buffer, PushError},
    transport::Transport,
    writer::PacketWriter,
};

mod continuous;
mod periodic;

/// When the dispatch thread sends packets.
#[derive(Clone, Copy, Debug)]
pub(crate) enum FlushPolicy {
    /// Send as soon as a packet fills up or the buffer runs dry.
    Continuous,

    /// Accumulate datagrams and send them all at once, either on a timer or when the buffer is filling up.
    Periodic(PeriodicConfiguration),
}

#[derive(Clone, Copy, Debug)]
pub(crate) struct PeriodicConfiguration {
    pub poll_interval: Duration,
    pub flush_interval: Duration,
    pub max_fill_ratio: f64,
}

/// Lifecycle of a dispatcher.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub(crate) enum DispatcherState {
    Running = 0,
    Draining = 1,
    Stopped = 2,
}

impl DispatcherState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => DispatcherState::Running,
            1 => DispatcherState::Draining,
            _ => DispatcherState::Stopped,
        }
    }
}

/// Dispatcher configuration.
#[derive(Clone, Debug)]
pub(crate) struct DispatcherConfiguration {
    pub thread_name: String,
    pub buffer_capacity: usize,
    pub max_packet_len: usize,
    pub thread_priority: Option<i32>,
    pub policy: FlushPolicy,
    pub log_dispatch: tracing::Dispatch,
}

struct Shared {
    buffer: Buffer<String>,
    state: AtomicU8,
    abort: AtomicBool,
}

impl Shared {
    fn set_state(&self, state: DispatcherState) {
        self.state.store(state as u8, Ordering::Release);
    }

    fn aborted(&self) -> bool {
        self.abort.load(Ordering::Acquire)
    }
}

// Marks the dispatcher as stopped when the dispatch thread exits, however it exits.
struct StoppedOnDrop(Arc<Shared>);

impl Drop for StoppedOnDrop {
    fn drop(&mut self) {
        self.0.set_state(DispatcherState::Stopped);
    }
}

/// Handle to a background thread that drains a buffer of datagrams into a transport.
pub(crate) struct Dispatcher {
    shared: Arc<Shared>,
    handle: Mutex<Option<JoinHandle<()>>>,
    thread: Thread,
    wake_fill_ratio: Option<f64>,
}

impl Dispatcher {
    /// Spawns the dispatch thread.
    ///
    /// # Errors
    ///
    /// If the thread could not be spawned, an error is returned.
    pub fn spawn<T>(config: DispatcherConfiguration, transport: T) -> io::Result<Self>
    where
        T: Transport,
    {
        let shared = Arc::new(Shared {
            buffer: Buffer::new(config.buffer_capacity),
            state: AtomicU8::new(DispatcherState::Running as u8),
            abort: AtomicBool::new(false),
        });

        let wake_fill_ratio = match config.policy {
            FlushPolicy::Continuous => None,
            FlushPolicy::Periodic(periodic) => Some(periodic.max_fill_ratio),
        };

        let mut worker = Worker {
            shared: Arc::clone(&shared),
            writer: PacketWriter::new(config.max_packet_len),
            transport,
        };
        let policy = config.policy;
        let thread_priority = config.thread_priority;
        let log_dispatch = config.log_dispatch;

        let handle = thread::Builder::new().name(config.thread_name).spawn(move || {
            tracing::dispatcher::with_default(&log_dispatch, || {
                let _stopped = StoppedOnDrop(Arc::clone(&worker.shared));

                if let Some(niceness) = thread_priority {
                    if let Err(e) = set_thread_priority(niceness) {
                        warn!(error = %e, niceness, "Failed to set dispatch thread priority.");
                    }
                }

                debug!(transport = worker.transport.transport_id(), ?policy, "Dispatch thread started.");
                match policy {
                    FlushPolicy::Continuous => continuous::run(&mut worker),
                    FlushPolicy::Periodic(periodic) => periodic::run(&mut worker, periodic),
                }
                debug!(transport = worker.transport.transport_id(), "Dispatch thread stopped.");
            });
        })?;

        Ok(Dispatcher {
            shared,
            thread: handle.thread().clone(),
            handle: Mutex::new(Some(handle)),
            wake_fill_ratio,
        })
    }

    /// Enqueues a datagram without blocking.
    ///
    /// # Errors
    ///
    /// If the buffer is full or the dispatcher is shutting down, the datagram is handed back.
    pub fn push(&self, datagram: String) -> Result<(), PushError<String>> {
        self.shared.buffer.try_push(datagram)?;

        if let Some(max_fill_ratio) = self.wake_fill_ratio {
            if self.shared.buffer.fill_ratio() > max_fill_ratio {
                self.thread.unpark();
            }
        }

        Ok(())
    }

    /// Returns the number of datagrams waiting to be sent.
    pub fn pending(&self) -> usize {
        self.shared.buffer.len()
    }

    /// Returns the current state of the dispatcher.
    pub fn state(&self) -> DispatcherState {
        DispatcherState::from_u8(self.shared.state.load(Ordering::Acquire))
    }

    /// Stops the dispatcher.
    ///
    /// New datagrams are refused from this point on. When `blocking` is `true`, everything already buffered is sent
    /// before returning. Otherwise, the dispatch thread is told to wrap up as soon as possible and this method returns
    /// immediately.
    ///
    /// Calling this more than once is harmless.
    pub fn shutdown(&self, blocking: bool) {
        if self.state() == DispatcherState::Running {
            self.shared.set_state(DispatcherState::Draining);
        }
        if !blocking {
            self.shared.abort.store(true, Ordering::Release);
        }

        self.shared.buffer.close();
        self.thread.unpark();

        if !blocking {
            return;
        }

        let Some(handle) = self.handle.lock().take() else {
            return;
        };

        if handle.thread().id() == thread::current().id() {
            return;
        }

        if handle.join().is_err() {
            error!("Dispatch thread panicked.");
        }
    }
}

impl Drop for Dispatcher {
    fn drop(&mut self) {
        self.shutdown(false);
    }
}

struct Worker<T> {
    shared: Arc<Shared>,
    writer: PacketWriter,
    transport: T,
}

impl<T: Transport> Worker<T> {
    fn buffer(&self) -> &Buffer<String> {
        &self.shared.buffer
    }

    fn aborted(&self) -> bool {
        self.shared.aborted()
    }

    /// Adds a datagram to the current packet, sending everything written so far first if it would not fit.
    fn write(&mut self, datagram: &str) {
        if self.writer.would_overflow(datagram.as_bytes()) {
            self.flush();
        }

        if !self.writer.write(datagram.as_bytes()) {
            warn!(
                datagram_len = datagram.len(),
                max_packet_len = self.writer.max_packet_len(),
                "Datagram was dropped because it does not fit in a single packet."
            );
        }
    }

    /// Sends every packet written so far.
    fn flush(&mut self) {
        if self.writer.is_empty() {
            return;
        }

        let transport_id = self.transport.transport_id();
        let mut packets = self.writer.packets();
        let mut packets_sent = 0;
        let mut packets_dropped = 0;

        while let Some(packet) = packets.next_packet() {
            match self.transport.send(packet) {
                Ok(()) => packets_sent += 1,
                Err(e) => {
                    error!(transport = transport_id, error = %e, packet_len = packet.len(), "Failed to send packet.");
                    packets_dropped += 1;
                }
            }
        }

        debug!(transport = transport_id, packets_sent, packets_dropped, "Finished sending packets.");
    }

    /// Lets the transport know that a flush came due with nothing to send.
    fn flush_idle(&mut self) {
        let transport_id = self.transport.transport_id();
        match self.transport.flush_idle() {
            Ok(()) => trace!(transport = transport_id, "Finished idle flush."),
            Err(e) => error!(transport = transport_id, error = %e, "Failed to send idle flush."),
        }
    }
}

#[cfg(target_os = "linux")]
fn set_thread_priority(niceness: i32) -> io::Result<()> {
    // SAFETY: `gettid` takes no arguments and cannot fail.
    let tid = unsafe { libc::syscall(libc::SYS_gettid) } as libc::id_t;

    // SAFETY: `setpriority` only reads its arguments, and on Linux a thread ID addresses that single thread.
    let result = unsafe { libc::setpriority(libc::PRIO_PROCESS, tid, niceness) };
    if result == -1 {
        Err(io::Error::last_os_error())
    } else {
        Ok(())
    }
}

#[cfg(not(target_os = "linux"))]
fn set_thread_priority(_niceness: i32) -> io::Result<()> {
    Err(io::Error::new(io::ErrorKind::Unsupported, "thread priority is only supported on Linux"))
}
