//! A typed, buffered event logging registry.
//!
//! Adapted from the timely-dataflow `timely_logging` crate. The original
//! registry and logger are `Rc`/`RefCell`-based because each timely worker
//! is single-threaded. `ttg` runs a pool of worker threads per rank, so the
//! buffer here is protected by a mutex instead and the action closures are
//! required to be `Send + Sync`.

use std::any::Any;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

/// A registry of named, typed loggers.
///
/// Binds string names (e.g. `"ttg/scheduler"`, `"ttg/transport"`) to an
/// action invoked on batches of logged events. Intended to be shared behind
/// an `Arc<Mutex<Registry>>` by every worker thread of a rank.
pub struct Registry {
    time: Instant,
    map: HashMap<String, Box<dyn Any + Send>>,
}

impl Registry {
    /// Creates a new registry rooted at `time`.
    pub fn new(time: Instant) -> Self {
        Registry { time, map: HashMap::new() }
    }

    /// Binds a log name to an action on log event batches.
    ///
    /// Returns any previously bound logger of the same name, downcast and
    /// dropped by the caller if no longer wanted. Existing clones of the
    /// previous `Logger` keep writing to the old action; only newly
    /// retrieved loggers see the replacement.
    pub fn insert<T: Send + 'static>(
        &mut self,
        name: &str,
        action: Box<dyn Fn(&Duration, &[(Duration, T)]) + Send + Sync>,
    ) -> Option<Box<dyn Any + Send>> {
        let logger = Logger::<T>::new(self.time, action);
        self.map.insert(name.to_owned(), Box::new(logger))
    }

    /// Removes a bound logger, signalling end-of-stream to its consumers.
    pub fn remove(&mut self, name: &str) -> Option<Box<dyn Any + Send>> {
        self.map.remove(name)
    }

    /// Retrieves a shared logger, if one has been inserted under `name`.
    pub fn get<T: Send + 'static>(&self, name: &str) -> Option<Logger<T>> {
        self.map
            .get(name)
            .and_then(|entry| entry.downcast_ref::<Logger<T>>())
            .cloned()
    }
}

/// A cloneable, buffering logger for events of type `T`.
pub struct Logger<T> {
    time: Instant,
    action: Arc<dyn Fn(&Duration, &[(Duration, T)]) + Send + Sync>,
    buffer: Arc<Mutex<Vec<(Duration, T)>>>,
}

impl<T> Clone for Logger<T> {
    fn clone(&self) -> Self {
        Logger {
            time: self.time,
            action: self.action.clone(),
            buffer: self.buffer.clone(),
        }
    }
}

impl<T: Send + 'static> Logger<T> {
    /// Allocates a new shareable logger bound to a write destination.
    pub fn new(time: Instant, action: Box<dyn Fn(&Duration, &[(Duration, T)]) + Send + Sync>) -> Self {
        Logger {
            time,
            action: Arc::from(action),
            buffer: Arc::new(Mutex::new(Vec::with_capacity(1024))),
        }
    }

    /// Logs an event, timestamped at the moment of the call.
    ///
    /// The event may be delayed by buffering; it is written when the
    /// buffer reaches capacity or `flush` is called explicitly.
    pub fn log(&self, event: T) {
        let mut buffer = self.buffer.lock().unwrap();
        buffer.push((self.time.elapsed(), event));
        if buffer.len() == buffer.capacity() {
            (self.action)(&self.time.elapsed(), &buffer[..]);
            buffer.clear();
        }
    }

    /// Flushes any buffered events through the action.
    pub fn flush(&self) {
        let mut buffer = self.buffer.lock().unwrap();
        (self.action)(&self.time.elapsed(), &buffer[..]);
        buffer.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn logger_buffers_until_flush() {
        let seen = Arc::new(AtomicUsize::new(0));
        let seen2 = seen.clone();
        let logger: Logger<u32> = Logger::new(
            Instant::now(),
            Box::new(move |_time, batch| { seen2.fetch_add(batch.len(), Ordering::SeqCst); }),
        );
        logger.log(1);
        logger.log(2);
        assert_eq!(seen.load(Ordering::SeqCst), 0);
        logger.flush();
        assert_eq!(seen.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn registry_round_trips_named_logger() {
        let mut registry = Registry::new(Instant::now());
        registry.insert::<u32>("ttg/test", Box::new(|_, _| {}));
        assert!(registry.get::<u32>("ttg/test").is_some());
        assert!(registry.get::<u64>("ttg/test").is_none());
        registry.remove("ttg/test");
        assert!(registry.get::<u32>("ttg/test").is_none());
    }
}
