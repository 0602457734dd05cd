//! Ordered multi-callback hook slots.
//!
//! A [`HookRegistry`] is one named extension point (`on_create`, `on_start`,
//! `on_stop`).  Any number of callbacks may be appended; they are invoked in
//! the order they were registered, synchronously, on the caller's thread.
//!
//! # Why `Rc` + `RefCell`?
//!
//! The server runs on a single-threaded event loop, so hooks never need to be
//! `Send`.  The callback list sits behind a `RefCell` so that a hook may
//! register *another* hook while its own slot is being invoked: invocation
//! iterates over a snapshot of the list, and a callback appended mid-invocation
//! only runs the next time the slot fires.

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

/// An append-only, ordered list of callbacks of type `F`.
///
/// `F` is usually an unsized closure type such as
/// `dyn Fn(&Server) -> anyhow::Result<()>`.
///
/// # Example
///
/// ```rust
/// use std::rc::Rc;
/// use wsd_core::HookRegistry;
///
/// let hooks: HookRegistry<dyn Fn(&mut Vec<u8>)> = HookRegistry::new();
/// hooks.register(Rc::new(|out: &mut Vec<u8>| out.push(1)));
/// hooks.register(Rc::new(|out: &mut Vec<u8>| out.push(2)));
///
/// let mut out = Vec::new();
/// hooks
///     .try_invoke(|hook| -> Result<(), ()> {
///         hook(&mut out);
///         Ok(())
///     })
///     .unwrap();
/// assert_eq!(out, vec![1, 2]);
/// ```
pub struct HookRegistry<F: ?Sized> {
    callbacks: RefCell<Vec<Rc<F>>>,
}

impl<F: ?Sized> HookRegistry<F> {
    /// Creates an empty slot.
    pub fn new() -> Self {
        Self {
            callbacks: RefCell::new(Vec::new()),
        }
    }

    /// Appends a callback.  There is no removal.
    pub fn register(&self, callback: Rc<F>) {
        self.callbacks.borrow_mut().push(callback);
    }

    /// Number of registered callbacks.
    pub fn len(&self) -> usize {
        self.callbacks.borrow().len()
    }

    /// `true` if no callback has been registered.
    pub fn is_empty(&self) -> bool {
        self.callbacks.borrow().is_empty()
    }

    /// Invokes every callback in registration order through `call`.
    ///
    /// Stops at the first callback for which `call` returns an error and
    /// returns that error; later callbacks in the slot are not invoked.
    ///
    /// # Errors
    ///
    /// Propagates the first error returned by `call`.
    pub fn try_invoke<E>(&self, mut call: impl FnMut(&F) -> Result<(), E>) -> Result<(), E> {
        // Clone the Rc handles so no borrow is held while user code runs.
        let snapshot: Vec<Rc<F>> = self.callbacks.borrow().clone();
        for callback in &snapshot {
            call(callback)?;
        }
        Ok(())
    }
}

impl<F: ?Sized> Default for HookRegistry<F> {
    fn default() -> Self {
        Self::new()
    }
}

impl<F: ?Sized> fmt::Debug for HookRegistry<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HookRegistry")
            .field("callbacks", &self.len())
            .finish()
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
