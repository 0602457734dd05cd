//! The single-threaded event loop every listener and hook runs on.
//!
//! A [`Reactor`] is a Tokio *current-thread* runtime plus a [`LocalSet`].
//! Everything the server does (accept loops, TLS handshakes, connection
//! dispatch, hook invocation) happens on the thread that called
//! [`Reactor::run`], interleaved at `.await` points and never concurrently.
//!
//! # Why a `LocalSet`?
//!
//! A `LocalSet` lets tasks hold `Rc` and `RefCell` values (they are never moved
//! to another thread), which is what allows the server to hand out cheap
//! `Rc` handles to itself, its logger and its connection handler without any
//! locking.
//!
//! # Stopping
//!
//! [`Reactor::stop`] is cooperative: it flags the loop and wakes it; the task
//! that called `stop()` finishes its current poll, the loop processes any
//! cancellations that were just requested, and [`Reactor::run`] returns.

use std::cell::Cell;
use std::future::Future;

use thiserror::Error;
use tokio::runtime::{Builder, EnterGuard, Runtime};
use tokio::sync::Notify;
use tokio::task::{JoinHandle, LocalSet};
use tracing::debug;

/// Error type for reactor operations.
#[derive(Debug, Error)]
pub enum ReactorError {
    /// The underlying Tokio runtime could not be built (e.g. no fds left).
    #[error("failed to build event loop runtime: {0}")]
    Runtime(#[source] std::io::Error),

    /// `run()` was called while the loop was already running.
    #[error("the event loop is already running")]
    AlreadyRunning,
}

/// Single-threaded cooperative event loop with a run/stop control surface.
pub struct Reactor {
    // Declared before `runtime` so local tasks (and the sockets they own) are
    // dropped while the I/O driver still exists.
    tasks: LocalSet,
    runtime: Runtime,
    wake: Notify,
    running: Cell<bool>,
    stop_requested: Cell<bool>,
}

impl Reactor {
    /// Builds a new, idle reactor with I/O and timers enabled.
    ///
    /// # Errors
    ///
    /// Returns [`ReactorError::Runtime`] if the runtime cannot be created.
    pub fn new() -> Result<Self, ReactorError> {
        let runtime = Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(ReactorError::Runtime)?;

        Ok(Self {
            tasks: LocalSet::new(),
            runtime,
            wake: Notify::new(),
            running: Cell::new(false),
            stop_requested: Cell::new(false),
        })
    }

    /// Drives the loop on the current thread until [`Reactor::stop`] is called.
    ///
    /// # Errors
    ///
    /// Returns [`ReactorError::AlreadyRunning`] on re-entrant calls (for
    /// example from inside a task or hook).
    pub fn run(&self) -> Result<(), ReactorError> {
        if self.running.get() {
            return Err(ReactorError::AlreadyRunning);
        }

        self.running.set(true);
        debug!("event loop entered");

        self.runtime.block_on(self.tasks.run_until(async {
            while !self.stop_requested.get() {
                self.wake.notified().await;
            }
            // One more turn so tasks aborted by the stopper are dropped (and
            // their sockets closed) before control returns to the caller.
            tokio::task::yield_now().await;
        }));

        self.running.set(false);
        self.stop_requested.set(false);
        debug!("event loop exited");
        Ok(())
    }

    /// Asks a running loop to halt.  Has no effect on an idle reactor.
    pub fn stop(&self) {
        if !self.running.get() {
            return;
        }
        self.stop_requested.set(true);
        self.wake.notify_waiters();
    }

    /// `true` while [`Reactor::run`] is on the stack.
    pub fn is_running(&self) -> bool {
        self.running.get()
    }

    /// `true` between a `stop()` call and the moment `run()` returns.
    pub fn stop_requested(&self) -> bool {
        self.stop_requested.get()
    }

    /// Queues a task on the loop.  It first runs once the loop is driven.
    pub fn spawn<F>(&self, future: F) -> JoinHandle<()>
    where
        F: Future<Output = ()> + 'static,
    {
        self.tasks.spawn_local(future)
    }

    /// Drives the loop until `future` completes, independent of `stop()`.
    ///
    /// Useful for short setup/teardown work and for tests.
    pub fn block_on<F: Future>(&self, future: F) -> F::Output {
        self.runtime.block_on(self.tasks.run_until(future))
    }

    /// Enters the runtime context so sockets can be registered with the I/O
    /// driver from synchronous code.
    pub fn enter(&self) -> EnterGuard<'_> {
        self.runtime.enter()
    }
}

impl std::fmt::Debug for Reactor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Reactor")
            .field("running", &self.running.get())
            .field("stop_requested", &self.stop_requested.get())
            .finish()
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::rc::Rc;

    #[test]
    fn test_new_reactor_is_idle() {
        let reactor = Reactor::new().unwrap();
        assert!(!reactor.is_running());
        assert!(!reactor.stop_requested());
    }

    #[test]
    fn test_run_returns_after_stop_from_a_task() {
        // Arrange
        let reactor = Rc::new(Reactor::new().unwrap());
        let inner = Rc::clone(&reactor);
        let observed_running = Rc::new(Cell::new(false));
        let seen = Rc::clone(&observed_running);
        reactor.spawn(async move {
            seen.set(inner.is_running());
            inner.stop();
        });

        // Act
        reactor.run().unwrap();

        // Assert
        assert!(observed_running.get(), "task must run inside the loop");
        assert!(!reactor.is_running());
        assert!(!reactor.stop_requested());
    }

    #[test]
    fn test_tasks_run_in_spawn_order() {
        let reactor = Rc::new(Reactor::new().unwrap());
        let order = Rc::new(RefCell::new(Vec::new()));
        for i in 0..3 {
            let order = Rc::clone(&order);
            reactor.spawn(async move { order.borrow_mut().push(i) });
        }
        let stopper = Rc::clone(&reactor);
        reactor.spawn(async move { stopper.stop() });

        reactor.run().unwrap();

        assert_eq!(*order.borrow(), vec![0, 1, 2]);
    }

    #[test]
    fn test_stop_on_idle_reactor_is_ignored() {
        // Arrange: a stop before run must not leave a stale request behind.
        let reactor = Rc::new(Reactor::new().unwrap());
        reactor.stop();
        assert!(!reactor.stop_requested());

        // Act: the loop must still wait for a real stop.
        let ticks = Rc::new(Cell::new(0));
        let (inner, counter) = (Rc::clone(&reactor), Rc::clone(&ticks));
        reactor.spawn(async move {
            for _ in 0..3 {
                counter.set(counter.get() + 1);
                tokio::task::yield_now().await;
            }
            inner.stop();
        });
        reactor.run().unwrap();

        // Assert
        assert_eq!(ticks.get(), 3);
    }

    #[test]
    fn test_reentrant_run_is_rejected() {
        let reactor = Rc::new(Reactor::new().unwrap());
        let inner = Rc::clone(&reactor);
        let nested = Rc::new(RefCell::new(None));
        let slot = Rc::clone(&nested);
        reactor.spawn(async move {
            *slot.borrow_mut() = Some(inner.run());
            inner.stop();
        });

        reactor.run().unwrap();

        assert!(matches!(
            nested.borrow_mut().take(),
            Some(Err(ReactorError::AlreadyRunning))
        ));
    }

    #[test]
    fn test_aborted_task_is_dropped_before_run_returns() {
        // Arrange: a task that never finishes, aborted by the stopper.
        let reactor = Rc::new(Reactor::new().unwrap());
        let marker = Rc::new(());
        let held = Rc::clone(&marker);
        let forever = reactor.spawn(async move {
            let _held = held;
            std::future::pending::<()>().await;
        });
        let inner = Rc::clone(&reactor);
        reactor.spawn(async move {
            forever.abort();
            inner.stop();
        });

        // Act
        reactor.run().unwrap();

        // Assert: the aborted future (and its Rc) has been dropped.
        assert_eq!(Rc::strong_count(&marker), 1);
    }

    #[test]
    fn test_block_on_drives_local_tasks() {
        let reactor = Reactor::new().unwrap();
        let handle = reactor.spawn(async {});
        let result = reactor.block_on(handle);
        assert!(result.is_ok());
    }
}
