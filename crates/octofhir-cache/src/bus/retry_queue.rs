//! Queue of messages whose publish failed.

use std::collections::VecDeque;

use parking_lot::Mutex;

use crate::bus::message::BusMessage;

/// FIFO queue with an optional bound. When full the oldest message is dropped.
#[derive(Debug)]
pub struct RetryQueue {
    messages: Mutex<VecDeque<BusMessage>>,
    max_size: Option<usize>,
}

impl RetryQueue {
    /// A `max_size` of zero is treated as one.
    pub fn new(max_size: Option<usize>) -> Self {
        Self {
            messages: Mutex::new(VecDeque::new()),
            max_size: max_size.map(|max| max.max(1)),
        }
    }

    /// Append a message. Returns the message dropped to make room, if any.
    pub fn push(&self, message: BusMessage) -> Option<BusMessage> {
        let mut messages = self.messages.lock();
        let dropped = match self.max_size {
            Some(max) if messages.len() >= max => messages.pop_front(),
            _ => None,
        };
        messages.push_back(message);
        dropped
    }

    pub fn pop_front(&self) -> Option<BusMessage> {
        self.messages.lock().pop_front()
    }

    /// Put a message back at the head after a failed retry.
    ///
    /// If newer messages filled the queue meanwhile, this one is the oldest
    /// and is dropped instead.
    pub fn push_front(&self, message: BusMessage) -> bool {
        let mut messages = self.messages.lock();
        if self.max_size.is_some_and(|max| messages.len() >= max) {
            return false;
        }
        messages.push_front(message);
        true
    }

    pub fn len(&self) -> usize {
        self.messages.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.lock().is_empty()
    }

    pub fn clear(&self) {
        self.messages.lock().clear();
    }
}
