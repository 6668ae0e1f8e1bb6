//! One-shot and looping timers targeting an event queue.
//!
//! Fired callbacks are posted onto the queue when one is given, which keeps
//! timer work on the same consumer as the rest of the application logic.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};

use tokio::task::JoinHandle;
use tokio::time::Duration;

use crate::queue::{queued_call, EventQueue};

// ----------------------------------------------------------------------------
// One-shot
// ----------------------------------------------------------------------------

/// Handle to a scheduled one-shot; supports cancellation.
pub struct TimerHandle {
    fired: Arc<AtomicBool>,
    task: JoinHandle<()>,
}

impl TimerHandle {
    /// Cancels the timer. Returns true iff it was cancelled before firing.
    pub fn stop(&self) -> bool {
        if self
            .fired
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
        {
            self.task.abort();
            true
        } else {
            false
        }
    }
}

/// Schedules `f` to run after `duration`, posted onto `queue` when one is
/// given and invoked inline on the timer task otherwise.
pub fn after(
    queue: Option<EventQueue>,
    duration: Duration,
    f: impl FnOnce() + Send + 'static,
) -> TimerHandle {
    let fired = Arc::new(AtomicBool::new(false));

    let task = {
        let fired = fired.clone();
        tokio::spawn(async move {
            tokio::time::sleep(duration).await;
            if fired
                .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
                .is_ok()
            {
                queued_call(queue.as_ref(), f);
            }
        })
    };

    TimerHandle { fired, task }
}

// ----------------------------------------------------------------------------
// Tick Loop
// ----------------------------------------------------------------------------

type LoopCallback = Arc<dyn Fn(&TickLoop) + Send + Sync>;

struct LoopInner {
    queue: Option<EventQueue>,
    duration: Duration,
    running: AtomicBool,
    callback: RwLock<Option<LoopCallback>>,
}

/// A cancellable tick loop. The next tick is re-armed *before* the user
/// callback runs, so a panicking callback does not stop the loop.
#[derive(Clone)]
pub struct TickLoop {
    inner: Arc<LoopInner>,
}

impl TickLoop {
    pub fn new(
        queue: Option<EventQueue>,
        duration: Duration,
        callback: impl Fn(&TickLoop) + Send + Sync + 'static,
    ) -> Self {
        assert!(!duration.is_zero(), "tick loop duration must be nonzero");

        Self {
            inner: Arc::new(LoopInner {
                queue,
                duration,
                running: AtomicBool::new(false),
                callback: RwLock::new(Some(Arc::new(callback))),
            }),
        }
    }

    pub fn running(&self) -> bool {
        self.inner.running.load(Ordering::SeqCst)
    }

    /// Starts ticking. Returns false when the loop is already running.
    pub fn start(&self) -> bool {
        if self.inner.running.swap(true, Ordering::SeqCst) {
            return false;
        }

        self.arm_next();
        true
    }

    /// Stops re-arming; ticks already scheduled do not invoke the callback
    /// chain any further once the flag is down.
    pub fn stop(&self) {
        self.inner.running.store(false, Ordering::SeqCst);
    }

    /// Posts an immediate extra tick without replacing the scheduled one.
    pub fn next_loop(&self) {
        let this = self.clone();
        queued_call(self.inner.queue.as_ref(), move || this.tick(true));
    }

    fn arm_next(&self) {
        if !self.running() {
            return;
        }

        let this = self.clone();
        after(self.inner.queue.clone(), self.inner.duration, move || {
            this.tick(false)
        });
    }

    fn tick(&self, extra: bool) {
        // re-arm first so a panicking callback cannot halt the loop
        if !extra && self.running() {
            self.arm_next();
        }

        if !self.running() {
            return;
        }

        let callback = self.inner.callback.read().unwrap().clone();
        if let Some(cb) = callback {
            cb(self);
        }
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[tokio::test]
    async fn after_fires_once() {
        let hits = Arc::new(AtomicUsize::new(0));
        {
            let hits = hits.clone();
            after(None, Duration::from_millis(10), move || {
                hits.fetch_add(1, Ordering::SeqCst);
            });
        }

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn stop_before_fire_cancels() {
        let hits = Arc::new(AtomicUsize::new(0));
        let handle = {
            let hits = hits.clone();
            after(None, Duration::from_millis(100), move || {
                hits.fetch_add(1, Ordering::SeqCst);
            })
        };

        assert!(handle.stop());
        assert!(!handle.stop()); // second stop reports already-resolved

        tokio::time::sleep(Duration::from_millis(150)).await;
        assert_eq!(hits.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn stop_after_fire_returns_false() {
        let handle = after(None, Duration::from_millis(5), || {});
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!handle.stop());
    }

    #[tokio::test]
    async fn loop_ticks_until_stopped() {
        let hits = Arc::new(AtomicUsize::new(0));
        let tick = {
            let hits = hits.clone();
            TickLoop::new(None, Duration::from_millis(10), move |_| {
                hits.fetch_add(1, Ordering::SeqCst);
            })
        };

        assert!(tick.start());
        assert!(!tick.start()); // already running

        tokio::time::sleep(Duration::from_millis(100)).await;
        tick.stop();
        let at_stop = hits.load(Ordering::SeqCst);
        assert!(at_stop >= 3, "expected several ticks, got {at_stop}");

        tokio::time::sleep(Duration::from_millis(60)).await;
        let after_stop = hits.load(Ordering::SeqCst);
        assert!(
            after_stop <= at_stop + 1,
            "loop kept ticking after stop: {at_stop} -> {after_stop}"
        );
    }

    #[tokio::test]
    async fn queue_bound_loop_survives_callback_panic() {
        let queue = EventQueue::new();
        queue.enable_capture_panic(true);
        queue.set_capture_panic_notify(Arc::new(|_, _| {}));
        queue.start_loop();

        let hits = Arc::new(AtomicUsize::new(0));
        let tick = {
            let hits = hits.clone();
            TickLoop::new(Some(queue.clone()), Duration::from_millis(10), move |_| {
                hits.fetch_add(1, Ordering::SeqCst);
                panic!("tick callback failure");
            })
        };

        tick.start();
        tokio::time::sleep(Duration::from_millis(100)).await;
        tick.stop();

        // the re-arm precedes the callback, so panics never halt the loop
        assert!(hits.load(Ordering::SeqCst) >= 3);

        queue.stop_loop();
        queue.wait().await;
    }

    #[tokio::test]
    async fn next_loop_posts_an_extra_tick() {
        let hits = Arc::new(AtomicUsize::new(0));
        let tick = {
            let hits = hits.clone();
            TickLoop::new(None, Duration::from_secs(3600), move |_| {
                hits.fetch_add(1, Ordering::SeqCst);
            })
        };

        tick.start();
        tick.next_loop();
        tokio::time::sleep(Duration::from_millis(30)).await;
        tick.stop();

        // only the immediate tick fired; the hour-long arm never did
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }
}
