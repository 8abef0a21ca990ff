use std::collections::VecDeque;

use parking_lot::{Condvar, Mutex};

/// Error returned when an item could not be pushed into a [`Buffer`].
///
/// The rejected item is handed back to the caller.
#[derive(Debug, PartialEq, Eq)]
pub enum PushError<T> {
    /// The buffer is at capacity.
    Full(T),

    /// The buffer has been closed.
    Closed(T),
}

impl<T> PushError<T> {
    /// Returns the item that could not be pushed.
    pub fn into_inner(self) -> T {
        match self {
            PushError::Full(item) | PushError::Closed(item) => item,
        }
    }
}

struct State<T> {
    items: VecDeque<T>,
    closed: bool,
}

/// A fixed-capacity FIFO queue shared between many producers and a single consumer.
///
/// Producers never block: pushing into a full or closed buffer fails immediately. The consumer can either block until
/// an item is available or poll without blocking. Closing the buffer wakes a blocked consumer, which will then drain
/// whatever is left before being told the buffer is closed.
pub struct Buffer<T> {
    state: Mutex<State<T>>,
    not_empty: Condvar,
    capacity: usize,
}

impl<T> Buffer<T> {
    /// Creates a new `Buffer` that holds at most `capacity` items.
    pub fn new(capacity: usize) -> Self {
        Buffer {
            state: Mutex::new(State { items: VecDeque::with_capacity(capacity), closed: false }),
            not_empty: Condvar::new(),
            capacity,
        }
    }

    /// Attempts to push an item without blocking.
    ///
    /// # Errors
    ///
    /// If the buffer is at capacity, or has been closed, the item is returned in the error.
    pub fn try_push(&self, item: T) -> Result<(), PushError<T>> {
        let mut state = self.state.lock();
        if state.closed {
            return Err(PushError::Closed(item));
        }
        if state.items.len() >= self.capacity {
            return Err(PushError::Full(item));
        }

        state.items.push_back(item);
        drop(state);

        self.not_empty.notify_one();
        Ok(())
    }

    /// Pushes an item without blocking, returning `false` if the buffer is full or closed.
    pub fn push_nonblocking(&self, item: T) -> bool {
        self.try_push(item).is_ok()
    }

    /// Pops the oldest item, blocking until one is available.
    ///
    /// Returns `None` once the buffer has been closed and fully drained.
    pub fn pop_blocking(&self) -> Option<T> {
        let mut state = self.state.lock();
        loop {
            if let Some(item) = state.items.pop_front() {
                return Some(item);
            }
            if state.closed {
                return None;
            }
            self.not_empty.wait(&mut state);
        }
    }

    /// Pops the oldest item if one is available.
    pub fn pop_nonblocking(&self) -> Option<T> {
        self.state.lock().items.pop_front()
    }

    /// Closes the buffer.
    ///
    /// Subsequent pushes fail, and any consumer blocked in [`pop_blocking`][Self::pop_blocking] is woken up. Items
    /// already in the buffer can still be popped.
    pub fn close(&self) {
        self.state.lock().closed = true;
        self.not_empty.notify_all();
    }

    /// Returns `true` if the buffer has been closed.
    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }

    /// Returns the number of items currently in the buffer.
    pub fn len(&self) -> usize {
        self.state.lock().items.len()
    }

    /// Returns `true` if the buffer holds no items.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns the maximum number of items the buffer can hold.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Returns the ratio of occupied slots to capacity.
    pub fn fill_ratio(&self) -> f64 {
        if self.capacity == 0 {
            return 1.0;
        }

        self.len() as f64 / self.capacity as f64
    }
}

impl<T> std::fmt::Debug for Buffer<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Buffer").field("capacity", &self.capacity).field("len", &self.len()).finish()
    }
}
