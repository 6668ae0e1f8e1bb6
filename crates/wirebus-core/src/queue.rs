//! Single-consumer event queue.
//!
//! An [`EventQueue`] serializes closures onto one consumer task. Every
//! user-visible callback in the runtime is posted here, which is what gives
//! application logic single-threaded semantics. The consumer is started at
//! most once and never restarted; [`EventQueue::stop_loop`] pushes the
//! shutdown sentinel and [`EventQueue::wait`] blocks until every previously
//! posted closure has run.

use std::any::Any;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};

use tokio::sync::watch;
use tracing::error;

use crate::pipe::Pipe;

type QueuedFn = Box<dyn FnOnce() + Send>;

/// Callback invoked when a posted closure panics and capture is enabled.
pub type PanicNotifyFn = Arc<dyn Fn(&(dyn Any + Send), &EventQueue) + Send + Sync>;

struct QueueInner {
    pipe: Pipe<QueuedFn>,
    capture_panic: AtomicBool,
    on_panic: RwLock<PanicNotifyFn>,
    started: AtomicBool,
    done_tx: watch::Sender<bool>,
    done_rx: watch::Receiver<bool>,
}

/// A cloneable handle to a single-consumer task queue.
#[derive(Clone)]
pub struct EventQueue {
    inner: Arc<QueueInner>,
}

impl EventQueue {
    pub fn new() -> Self {
        let (done_tx, done_rx) = watch::channel(false);
        Self {
            inner: Arc::new(QueueInner {
                pipe: Pipe::new(),
                capture_panic: AtomicBool::new(false),
                on_panic: RwLock::new(Arc::new(default_panic_notify)),
                started: AtomicBool::new(false),
                done_tx,
                done_rx,
            }),
        }
    }

    /// Enables or disables panic capture around posted closures.
    pub fn enable_capture_panic(&self, v: bool) {
        self.inner.capture_panic.store(v, Ordering::Relaxed);
    }

    /// Replaces the panic notification callback used when capture is on.
    pub fn set_capture_panic_notify(&self, cb: PanicNotifyFn) {
        *self.inner.on_panic.write().unwrap() = cb;
    }

    /// Posts a closure to be run by the consumer, in post order.
    pub fn post(&self, f: impl FnOnce() + Send + 'static) {
        self.inner.pipe.add(Box::new(f));
    }

    /// Number of queued entries not yet consumed.
    pub fn count(&self) -> usize {
        self.inner.pipe.len()
    }

    /// Spawns the consumer task. A queue is started at most once; repeated
    /// calls are no-ops.
    pub fn start_loop(&self) -> &Self {
        if self.inner.started.swap(true, Ordering::SeqCst) {
            return self;
        }

        let queue = self.clone();
        tokio::spawn(async move {
            let mut batch: Vec<QueuedFn> = Vec::new();

            loop {
                batch.clear();
                let exit = queue.inner.pipe.drain(&mut batch).await;

                for f in batch.drain(..) {
                    queue.protected_call(f);
                }

                if exit {
                    break;
                }
            }

            let _ = queue.inner.done_tx.send(true);
        });

        self
    }

    /// Posts the shutdown sentinel. Closures posted before this call are
    /// still consumed before the loop exits.
    pub fn stop_loop(&self) -> &Self {
        self.inner.pipe.add_exit();
        self
    }

    /// Waits until the consumer has exited.
    pub async fn wait(&self) {
        let mut rx = self.inner.done_rx.clone();
        while !*rx.borrow() {
            if rx.changed().await.is_err() {
                break;
            }
        }
    }

    fn protected_call(&self, f: QueuedFn) {
        if self.inner.capture_panic.load(Ordering::Relaxed) {
            if let Err(payload) = catch_unwind(AssertUnwindSafe(f)) {
                let notify = self.inner.on_panic.read().unwrap().clone();
                notify(payload.as_ref(), self);
            }
        } else {
            f();
        }
    }
}

impl Default for EventQueue {
    fn default() -> Self {
        Self::new()
    }
}

fn default_panic_notify(payload: &(dyn Any + Send), _queue: &EventQueue) {
    let text = payload
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string());

    error!("event queue callback panic: {}", text);
}

/// Runs `f` through the queue when one is present, inline otherwise.
pub fn queued_call(queue: Option<&EventQueue>, f: impl FnOnce() + Send + 'static) {
    match queue {
        Some(q) => q.post(f),
        None => f(),
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Mutex;

    #[tokio::test]
    async fn posts_run_in_order_before_wait_returns() {
        let queue = EventQueue::new();
        queue.start_loop();

        let seen = Arc::new(Mutex::new(Vec::new()));
        for i in 0..50 {
            let seen = seen.clone();
            queue.post(move || seen.lock().unwrap().push(i));
        }

        queue.stop_loop();
        queue.wait().await;

        assert_eq!(*seen.lock().unwrap(), (0..50).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn panic_capture_keeps_consumer_alive() {
        let queue = EventQueue::new();
        queue.enable_capture_panic(true);

        let panics = Arc::new(AtomicUsize::new(0));
        {
            let panics = panics.clone();
            queue.set_capture_panic_notify(Arc::new(move |_, _| {
                panics.fetch_add(1, Ordering::SeqCst);
            }));
        }

        queue.start_loop();

        let ran = Arc::new(AtomicUsize::new(0));
        queue.post(|| panic!("boom"));
        {
            let ran = ran.clone();
            queue.post(move || {
                ran.fetch_add(1, Ordering::SeqCst);
            });
        }

        queue.stop_loop();
        queue.wait().await;

        assert_eq!(panics.load(Ordering::SeqCst), 1);
        assert_eq!(ran.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn start_loop_is_at_most_once() {
        let queue = EventQueue::new();
        queue.start_loop();
        queue.start_loop();

        let hits = Arc::new(AtomicUsize::new(0));
        {
            let hits = hits.clone();
            queue.post(move || {
                hits.fetch_add(1, Ordering::SeqCst);
            });
        }

        queue.stop_loop();
        queue.wait().await;

        // A second consumer would have raced the drain and double-run items.
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn queued_call_runs_inline_without_queue() {
        let hit = Arc::new(AtomicUsize::new(0));
        {
            let hit = hit.clone();
            queued_call(None, move || {
                hit.fetch_add(1, Ordering::SeqCst);
            });
        }
        assert_eq!(hit.load(Ordering::SeqCst), 1);
    }
}
