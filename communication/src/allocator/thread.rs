//! A single-rank transport: no peers, loopback only.
//!
//! Grounded on `timely_communication::allocator::thread::Thread`, which
//! plays the same "one rank, no real channel needed" role for a
//! single-threaded timely worker. Unlike the teacher's version this one
//! uses a `Mutex` rather than `Rc<RefCell<_>>`: a `ttg` rank runs a pool of
//! worker threads (spec §4.7), any of which may call `send`/`try_recv`.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use super::TransportBuilder;

/// Builds a `Thread` transport.
#[derive(Default)]
pub struct ThreadBuilder;

impl TransportBuilder for ThreadBuilder {
    type Transport = Thread;
    fn build(self) -> Thread { Thread::new() }
}

/// The sole rank in a single-rank deployment.
///
/// `send`/`try_recv` loop a message back to the same rank; this only ever
/// happens if a keymap maps a key to a rank other than 0 while `peers() ==
/// 1`, which is a configuration error callers should avoid, but the
/// loopback keeps it a silent no-op rather than a panic.
pub struct Thread {
    queue: Arc<Mutex<VecDeque<Vec<u8>>>>,
}

impl Thread {
    /// Allocates a new single-rank transport.
    pub fn new() -> Self {
        Thread { queue: Arc::new(Mutex::new(VecDeque::new())) }
    }
}

impl Default for Thread {
    fn default() -> Self { Thread::new() }
}

impl Clone for Thread {
    fn clone(&self) -> Self { Thread { queue: self.queue.clone() } }
}

impl super::Transport for Thread {
    fn index(&self) -> usize { 0 }
    fn peers(&self) -> usize { 1 }
    fn send(&self, _target: usize, wire: Vec<u8>) {
        self.queue.lock().unwrap().push_back(wire);
    }
    fn try_recv(&mut self) -> Option<Vec<u8>> {
        self.queue.lock().unwrap().pop_front()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::allocator::Transport;

    #[test]
    fn loopback_delivers_in_order() {
        let mut t = Thread::new();
        t.send(0, vec![1]);
        t.send(0, vec![2]);
        assert_eq!(t.try_recv(), Some(vec![1]));
        assert_eq!(t.try_recv(), Some(vec![2]));
        assert_eq!(t.try_recv(), None);
    }
}
