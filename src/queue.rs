//! Bounded many-producer, single-consumer command queue
//!
//! Producers run in radio callbacks and must never block for long, so
//! [`BoundedQueue::post`] gives up after a bounded wait and drops the item.
//! The dispatcher is the only consumer and blocks in [`BoundedQueue::take`].

use std::collections::VecDeque;
use std::fmt;
use std::net::Ipv4Addr;
use std::sync::{Condvar, Mutex, PoisonError};
use std::time::{Duration, Instant};

use common::COMMAND_MAX_LEN;

use crate::error::QueueError;

/// One command line as received from the peer, stored inline.
pub type CommandLine = heapless::String<COMMAND_MAX_LEN>;

pub type CommandQueue = BoundedQueue<Request>;

/// Something that happened on the radio side and wants a status push.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum BridgeEvent {
    ScanFinished { found: usize },
    ScanFailed,
    AddressAcquired(Ipv4Addr),
    LinkDropped { reason: u8 },
    PeerSubscribed,
}

/// Unit of work for the dispatcher.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Request {
    Line(CommandLine),
    Event(BridgeEvent),
}

impl Request {
    /// `None` if the text does not fit in a [`CommandLine`].
    pub fn line(text: &str) -> Option<Self> {
        let mut line = CommandLine::new();
        line.push_str(text).ok()?;
        Some(Request::Line(line))
    }
}

impl fmt::Display for Request {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            // Arguments may hold a password
            Request::Line(line) => write!(f, "{}(..)", line.split('(').next().unwrap_or_default().trim()),
            Request::Event(event) => write!(f, "{:?}", event),
        }
    }
}

pub struct BoundedQueue<T> {
    items: Mutex<VecDeque<T>>,
    capacity: usize,
    post_timeout: Duration,
    not_empty: Condvar,
    not_full: Condvar,
}

impl<T: fmt::Display> BoundedQueue<T> {
    pub fn new(capacity: usize, post_timeout: Duration) -> Self {
        let capacity = capacity.max(1);
        Self {
            items: Mutex::new(VecDeque::with_capacity(capacity)),
            capacity,
            post_timeout,
            not_empty: Condvar::new(),
            not_full: Condvar::new(),
        }
    }

    /// Append `item`, waiting at most the post timeout for room. On timeout
    /// the item is dropped and logged; it is never retried.
    pub fn post(&self, item: T) -> Result<(), QueueError> {
        let deadline = Instant::now() + self.post_timeout;
        let mut items = self.items.lock().unwrap_or_else(PoisonError::into_inner);

        while items.len() >= self.capacity {
            let now = Instant::now();
            if now >= deadline {
                drop(items);
                warn!("queue: full, dropped {}", item);
                return Err(QueueError::Full(self.post_timeout.as_millis() as u64));
            }

            let (guard, _) = self
                .not_full
                .wait_timeout(items, deadline - now)
                .unwrap_or_else(PoisonError::into_inner);
            items = guard;
        }

        items.push_back(item);
        drop(items);
        self.not_empty.notify_one();
        Ok(())
    }

    /// Block until an item is available.
    pub fn take(&self) -> T {
        let mut items = self.items.lock().unwrap_or_else(PoisonError::into_inner);
        loop {
            if let Some(item) = items.pop_front() {
                drop(items);
                self.not_full.notify_one();
                return item;
            }
            items = self
                .not_empty
                .wait(items)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }

    pub fn try_take(&self) -> Option<T> {
        let item = self
            .items
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop_front();
        if item.is_some() {
            self.not_full.notify_one();
        }
        item
    }

    pub fn len(&self) -> usize {
        self.items.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
