//! Unbounded FIFO buffer shared between producers and a single draining
//! consumer.
//!
//! [`Pipe`] is the primitive under [`EventQueue`](crate::queue::EventQueue)
//! and under every session's send queue. Adding never blocks; draining awaits
//! until at least one item is queued and then moves the whole batch out. A
//! `None` sentinel pushed with [`Pipe::add_exit`] tells the consumer that no
//! further meaningful items will arrive: items queued ahead of (or after) the
//! sentinel in the same batch are still handed to the caller, which processes
//! them before honouring the exit flag.

use std::collections::VecDeque;
use std::sync::Mutex;

use tokio::sync::Notify;

/// Unbounded multi-producer queue with batch drain and a shutdown sentinel.
pub struct Pipe<T> {
    list: Mutex<VecDeque<Option<T>>>,
    ready: Notify,
}

impl<T> Pipe<T> {
    pub fn new() -> Self {
        Self {
            list: Mutex::new(VecDeque::new()),
            ready: Notify::new(),
        }
    }

    /// Appends an item to the tail. Never blocks.
    pub fn add(&self, item: T) {
        self.list.lock().unwrap().push_back(Some(item));
        self.ready.notify_one();
    }

    /// Appends the shutdown sentinel. After the consumer drains past it, the
    /// consumer is expected to stop.
    pub fn add_exit(&self) {
        self.list.lock().unwrap().push_back(None);
        self.ready.notify_one();
    }

    /// Number of queued entries, sentinel included.
    pub fn len(&self) -> usize {
        self.list.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.list.lock().unwrap().is_empty()
    }

    /// Discards everything queued, without waking the consumer.
    pub fn reset(&self) {
        self.list.lock().unwrap().clear();
    }

    /// Waits until the buffer is non-empty, then moves every queued item into
    /// `out` in FIFO order and truncates the buffer. Returns `true` iff a
    /// shutdown sentinel was observed during the move.
    pub async fn drain(&self, out: &mut Vec<T>) -> bool {
        loop {
            {
                let mut list = self.list.lock().unwrap();
                if !list.is_empty() {
                    let mut exit = false;
                    for entry in list.drain(..) {
                        match entry {
                            Some(item) => out.push(item),
                            None => exit = true,
                        }
                    }
                    return exit;
                }
            }

            self.ready.notified().await;
        }
    }
}

impl<T> Default for Pipe<T> {
    fn default() -> Self {
        Self::new()
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[tokio::test]
    async fn drain_preserves_fifo_order() {
        let pipe = Pipe::new();
        for i in 0..100 {
            pipe.add(i);
        }

        let mut out = Vec::new();
        let exit = pipe.drain(&mut out).await;

        assert!(!exit);
        assert_eq!(out, (0..100).collect::<Vec<_>>());
        assert!(pipe.is_empty());
    }

    #[tokio::test]
    async fn sentinel_sets_exit_and_keeps_items() {
        let pipe = Pipe::new();
        pipe.add(1);
        pipe.add(2);
        pipe.add_exit();

        let mut out = Vec::new();
        let exit = pipe.drain(&mut out).await;

        assert!(exit);
        assert_eq!(out, vec![1, 2]);
    }

    #[tokio::test]
    async fn drain_blocks_until_add() {
        let pipe = Arc::new(Pipe::new());

        let consumer = {
            let pipe = pipe.clone();
            tokio::spawn(async move {
                let mut out = Vec::new();
                pipe.drain(&mut out).await;
                out
            })
        };

        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        pipe.add(7);

        let out = consumer.await.unwrap();
        assert_eq!(out, vec![7]);
    }

    #[tokio::test]
    async fn reset_discards_queued_items() {
        let pipe = Pipe::new();
        pipe.add(1);
        pipe.add(2);
        assert_eq!(pipe.len(), 2);

        pipe.reset();
        assert!(pipe.is_empty());

        pipe.add(3);
        let mut out = Vec::new();
        assert!(!pipe.drain(&mut out).await);
        assert_eq!(out, vec![3]);
    }
}
