//! The server lifecycle: listeners, dispatch and hooks.
//!
//! [`Server`] owns the two listeners of a WebSocket endpoint and moves them
//! through an explicit lifecycle:
//!
//! ```text
//!  Uncreated ──create()──▶ Created ──run()──▶ Running ──stop()──▶ Stopped
//!              │                      │                  │
//!              └ on_create hooks      └ on_start hooks   └ on_stop hooks
//! ```
//!
//! # Responsibilities
//!
//! 1. **create()** binds the primary listener on `{address}:{port}` (or takes
//!    an injected one), wraps it in a [`TlsListener`] when TLS is enabled,
//!    binds the legacy-policy listener, wires both into the connection
//!    handler, logs the startup banner and fires `on_create`.
//! 2. **run()** fires `on_start` and hands the thread to the [`Reactor`]
//!    until something calls `stop()`.
//! 3. **stop()** fires `on_stop`, closes both listeners and halts the reactor.
//!
//! # Dispatch
//!
//! Each listener reports into its own channel, drained by one dispatcher
//! task.  The dispatcher spawns a task per connection that calls the
//! handler's primary or policy entry point, in acceptance order.  Those
//! tasks are detached: connections already handed to the handler outlive
//! `stop()`, and closing them is the handler's business.
//!
//! Listener errors never reach the caller of `create()` or `run()`; they are
//! logged at error severity and the listener keeps accepting.
//!
//! # Sharing (for beginners)
//!
//! `Server` is a cheap handle around an `Rc`.  Cloning it does not copy the
//! server; every clone refers to the same listeners and hooks.  Hooks receive
//! a `&Server` and can clone it into a reactor task, which is how a Ctrl+C
//! watcher or a test calls `stop()` while `run()` is blocking.  To avoid a
//! reference cycle from a long-lived task back to the server, such tasks can
//! hold a [`WeakServer`] instead.

use std::cell::{Cell, RefCell};
use std::fmt;
use std::net::SocketAddr;
use std::rc::{Rc, Weak};

use thiserror::Error;
use tokio::sync::mpsc::{self, UnboundedReceiver};
use wsd_core::{HookRegistry, LifecycleError, LifecycleOperation, LifecycleState, ServerConfig};

use crate::application::logger::{Logger, NullLogger};
use crate::infrastructure::handler::ConnectionHandler;
use crate::infrastructure::listener::{
    Binder, Listener, ListenerError, ListenerEvent, ListenerGuard, SocketBinder,
};
use crate::infrastructure::reactor::{Reactor, ReactorError};
use crate::infrastructure::tls::{load_acceptor, Handshake, TlsError, TlsListener};

/// Name and version reported in the startup banner.
pub const SERVER_VERSION: &str = concat!("wsd/", env!("CARGO_PKG_VERSION"));

/// Result type returned by lifecycle hooks.
pub type HookResult = anyhow::Result<()>;

/// Callback fired once listeners are live.
pub type CreateHook = dyn Fn(&Server) -> HookResult;

/// Callback fired before the reactor loop is entered.
pub type StartHook = dyn Fn(&Reactor, &Server) -> HookResult;

/// Callback fired before the reactor is told to halt.
pub type StopHook = dyn Fn(&Reactor, &Server) -> HookResult;

/// Which of the two listeners an error or address belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListenerRole {
    Primary,
    Policy,
}

impl fmt::Display for ListenerRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ListenerRole::Primary => "primary",
            ListenerRole::Policy => "policy",
        })
    }
}

/// Hook slot names, used in [`ServerError::Hook`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HookSlot {
    OnCreate,
    OnStart,
    OnStop,
}

impl fmt::Display for HookSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            HookSlot::OnCreate => "on_create",
            HookSlot::OnStart => "on_start",
            HookSlot::OnStop => "on_stop",
        })
    }
}

/// Error type for server lifecycle operations.
#[derive(Debug, Error)]
pub enum ServerError {
    /// The operation is not valid in the current lifecycle state.
    #[error(transparent)]
    Lifecycle(#[from] LifecycleError),

    /// A listener could not be bound.
    #[error("failed to set up {role} listener: {source}")]
    Listener {
        role: ListenerRole,
        #[source]
        source: ListenerError,
    },

    /// The TLS certificate or key could not be loaded.
    #[error("failed to load TLS material: {0}")]
    Tls(#[from] TlsError),

    /// The reactor failed to run.
    #[error(transparent)]
    Reactor(#[from] ReactorError),

    /// A lifecycle hook returned an error.
    #[error("{slot} hook failed: {source}")]
    Hook {
        slot: HookSlot,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },
}

/// Local addresses of the two listeners.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ListenerAddrs {
    pub primary: Option<SocketAddr>,
    pub policy: Option<SocketAddr>,
}

struct Listeners {
    primary: ListenerGuard,
    policy: ListenerGuard,
}

struct ServerInner {
    reactor: Rc<Reactor>,
    config: ServerConfig,
    handler: Rc<dyn ConnectionHandler>,
    logger: Rc<dyn Logger>,
    binder: Rc<dyn Binder>,
    handshake: Option<Rc<dyn Handshake>>,
    state: Cell<LifecycleState>,
    listeners: RefCell<Option<Listeners>>,
    on_create: HookRegistry<CreateHook>,
    on_start: HookRegistry<StartHook>,
    on_stop: HookRegistry<StopHook>,
}

/// Handle to a WebSocket server.  Clones share the same server.
#[derive(Clone)]
pub struct Server {
    inner: Rc<ServerInner>,
}

/// Non-owning handle to a [`Server`].
#[derive(Clone)]
pub struct WeakServer {
    inner: Weak<ServerInner>,
}

impl WeakServer {
    /// The server, if it still exists.
    pub fn upgrade(&self) -> Option<Server> {
        self.inner.upgrade().map(|inner| Server { inner })
    }
}

// ── Builder ───────────────────────────────────────────────────────────────────

/// Assembles a [`Server`] from its collaborators.
///
/// ```rust,no_run
/// use std::rc::Rc;
/// use wsd::{Reactor, Server, TracingLogger, WebSocketHandler};
/// use wsd_core::ServerConfig;
///
/// # fn main() -> anyhow::Result<()> {
/// let reactor = Rc::new(Reactor::new()?);
/// let config = ServerConfig::new("127.0.0.1".parse()?, 8080);
/// let server = Server::builder(reactor, config, Rc::new(WebSocketHandler::default()))
///     .logger(Rc::new(TracingLogger))
///     .build();
/// server.create(None)?;
/// # Ok(())
/// # }
/// ```
pub struct ServerBuilder {
    reactor: Rc<Reactor>,
    config: ServerConfig,
    handler: Rc<dyn ConnectionHandler>,
    logger: Rc<dyn Logger>,
    binder: Rc<dyn Binder>,
    handshake: Option<Rc<dyn Handshake>>,
}

impl ServerBuilder {
    /// Sets the logger.  Defaults to [`NullLogger`].
    pub fn logger(mut self, logger: Rc<dyn Logger>) -> Self {
        self.logger = logger;
        self
    }

    /// Sets how listeners are bound.  Defaults to [`SocketBinder`].
    pub fn binder(mut self, binder: Rc<dyn Binder>) -> Self {
        self.binder = binder;
        self
    }

    /// Uses `handshake` for TLS instead of loading the configured PEM files.
    /// Only consulted when TLS is enabled.
    pub fn handshake(mut self, handshake: Rc<dyn Handshake>) -> Self {
        self.handshake = Some(handshake);
        self
    }

    pub fn build(self) -> Server {
        Server {
            inner: Rc::new(ServerInner {
                reactor: self.reactor,
                config: self.config,
                handler: self.handler,
                logger: self.logger,
                binder: self.binder,
                handshake: self.handshake,
                state: Cell::new(LifecycleState::Uncreated),
                listeners: RefCell::new(None),
                on_create: HookRegistry::new(),
                on_start: HookRegistry::new(),
                on_stop: HookRegistry::new(),
            }),
        }
    }
}

// ── Server ────────────────────────────────────────────────────────────────────

impl Server {
    /// Starts building a server on `reactor`.
    pub fn builder(
        reactor: Rc<Reactor>,
        config: ServerConfig,
        handler: Rc<dyn ConnectionHandler>,
    ) -> ServerBuilder {
        ServerBuilder {
            reactor,
            config,
            handler,
            logger: Rc::new(NullLogger),
            binder: Rc::new(SocketBinder),
            handshake: None,
        }
    }

    /// Shorthand for a server with default logger and binder.
    pub fn new(reactor: Rc<Reactor>, config: ServerConfig, handler: Rc<dyn ConnectionHandler>) -> Self {
        Self::builder(reactor, config, handler).build()
    }

    pub fn state(&self) -> LifecycleState {
        self.inner.state.get()
    }

    pub fn config(&self) -> &ServerConfig {
        &self.inner.config
    }

    pub fn reactor(&self) -> &Rc<Reactor> {
        &self.inner.reactor
    }

    pub fn downgrade(&self) -> WeakServer {
        WeakServer {
            inner: Rc::downgrade(&self.inner),
        }
    }

    /// Local addresses of the live listeners; `None` unless Created or Running.
    pub fn listener_addrs(&self) -> Option<ListenerAddrs> {
        self.inner
            .listeners
            .borrow()
            .as_ref()
            .map(|listeners| ListenerAddrs {
                primary: listeners.primary.local_addr(),
                policy: listeners.policy.local_addr(),
            })
    }

    // ── Hooks ─────────────────────────────────────────────────────────────────

    /// Appends a hook fired at the end of `create()`.
    pub fn on_create<F>(&self, hook: F)
    where
        F: Fn(&Server) -> HookResult + 'static,
    {
        self.inner.on_create.register(Rc::new(hook));
    }

    /// Appends a hook fired by `run()` before the reactor loop is entered.
    pub fn on_start<F>(&self, hook: F)
    where
        F: Fn(&Reactor, &Server) -> HookResult + 'static,
    {
        self.inner.on_start.register(Rc::new(hook));
    }

    /// Appends a hook fired by `stop()` before the reactor is told to halt.
    pub fn on_stop<F>(&self, hook: F)
    where
        F: Fn(&Reactor, &Server) -> HookResult + 'static,
    {
        self.inner.on_stop.register(Rc::new(hook));
    }

    // ── Lifecycle ─────────────────────────────────────────────────────────────

    /// Binds and wires both listeners, logs the banner, fires `on_create`.
    ///
    /// `listener` replaces the primary socket (tests pass a mock here); it is
    /// still TLS-wrapped when TLS is enabled.
    ///
    /// # Errors
    ///
    /// - [`ServerError::Lifecycle`] unless the server is Uncreated.
    /// - [`ServerError::Listener`] / [`ServerError::Tls`] if a listener
    ///   cannot be set up.  Nothing is left bound, no hook has fired and the
    ///   server stays Uncreated.
    /// - [`ServerError::Hook`] if an `on_create` hook fails.  The listeners
    ///   are live at that point and the server is Created.
    pub fn create(&self, listener: Option<Box<dyn Listener>>) -> Result<(), ServerError> {
        let inner = &self.inner;
        let next = inner.state.get().transition(LifecycleOperation::Create)?;
        let reactor = inner.reactor.as_ref();
        let config = &inner.config;

        let primary = match listener {
            Some(listener) => listener,
            None => inner
                .binder
                .bind(reactor, config.bind_target())
                .map_err(|source| ServerError::Listener {
                    role: ListenerRole::Primary,
                    source,
                })?,
        };

        let primary: Box<dyn Listener> = match config.tls_settings() {
            Some(settings) => {
                let handshake: Rc<dyn Handshake> = match &inner.handshake {
                    Some(handshake) => Rc::clone(handshake),
                    None => Rc::new(load_acceptor(settings)?),
                };
                Box::new(TlsListener::new(
                    primary,
                    handshake,
                    settings.handshake_timeout(),
                ))
            }
            None => primary,
        };

        let policy = inner
            .binder
            .bind(reactor, config.policy_bind_target())
            .map_err(|source| ServerError::Listener {
                role: ListenerRole::Policy,
                source,
            })?;

        let listeners = Listeners {
            primary: self.start_listener(primary, ListenerRole::Primary),
            policy: self.start_listener(policy, ListenerRole::Policy),
        };
        *inner.listeners.borrow_mut() = Some(listeners);
        inner.state.set(next);

        inner.logger.debug(&format!("Starting {SERVER_VERSION}"));
        inner.logger.debug(&format!(
            "Launching WebSocket server on: {}",
            config.bind_target()
        ));

        inner
            .on_create
            .try_invoke(|hook| hook(self))
            .map_err(|e| hook_error(HookSlot::OnCreate, e))
    }

    /// Fires `on_start`, then runs the reactor until [`Server::stop`].
    ///
    /// A hook may call `stop()` directly.  The loop is then never entered
    /// and `run()` returns as soon as the hooks are done.
    ///
    /// # Errors
    ///
    /// - [`ServerError::Lifecycle`] unless the server is Created.
    /// - [`ServerError::Hook`] if an `on_start` hook fails.  The reactor is
    ///   not entered and the server goes back to Created (listeners still
    ///   live), so `run()` may be retried.  If an earlier hook already
    ///   stopped the server it stays Stopped.
    /// - [`ServerError::Reactor`] if the reactor is already running.
    pub fn run(&self) -> Result<(), ServerError> {
        let inner = &self.inner;
        let next = inner.state.get().transition(LifecycleOperation::Run)?;
        let reactor: &Reactor = &inner.reactor;
        inner.state.set(next);

        let started = inner.on_start.try_invoke(|hook| hook(reactor, self));
        if let Err(e) = started {
            if inner.state.get() == LifecycleState::Running {
                inner.state.set(LifecycleState::Created);
            }
            return Err(hook_error(HookSlot::OnStart, e));
        }

        // Stopped from inside a hook: the reactor was idle, so its stop
        // request was dropped and the loop would never return.
        if inner.state.get() != LifecycleState::Running {
            return Ok(());
        }

        reactor.run()?;
        Ok(())
    }

    /// Fires `on_stop`, closes both listeners and halts the reactor.
    ///
    /// Teardown happens even if a hook fails; the hook's error is returned
    /// afterwards.  Connections already dispatched are left alone.
    ///
    /// # Errors
    ///
    /// - [`ServerError::Lifecycle`] unless the server is Running.
    /// - [`ServerError::Hook`] if an `on_stop` hook fails.
    pub fn stop(&self) -> Result<(), ServerError> {
        let inner = &self.inner;
        let next = inner.state.get().transition(LifecycleOperation::Stop)?;
        let reactor: &Reactor = &inner.reactor;

        let hooks = inner
            .on_stop
            .try_invoke(|hook| hook(reactor, self))
            .map_err(|e| hook_error(HookSlot::OnStop, e));

        // Dropping the guards aborts the accept loops and closes the sockets.
        let listeners = inner.listeners.borrow_mut().take();
        drop(listeners);
        inner.state.set(next);
        reactor.stop();

        hooks
    }

    /// Starts `listener` and a dispatcher draining its events.
    fn start_listener(&self, listener: Box<dyn Listener>, role: ListenerRole) -> ListenerGuard {
        let inner = &self.inner;
        let (events, received) = mpsc::unbounded_channel();
        let mut guard = listener.start(&inner.reactor, events);

        let dispatcher = inner.reactor.spawn(dispatch(
            received,
            role,
            Rc::clone(&inner.handler),
            Rc::clone(&inner.logger),
        ));
        guard.push(dispatcher);
        guard
    }
}

impl fmt::Debug for Server {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Server")
            .field("config", &self.inner.config)
            .field("state", &self.inner.state.get())
            .field("on_create", &self.inner.on_create)
            .field("on_start", &self.inner.on_start)
            .field("on_stop", &self.inner.on_stop)
            .finish_non_exhaustive()
    }
}

fn hook_error(slot: HookSlot, error: anyhow::Error) -> ServerError {
    ServerError::Hook {
        slot,
        source: error.into(),
    }
}

/// Forwards one listener's events to the handler, in arrival order.
async fn dispatch(
    mut events: UnboundedReceiver<ListenerEvent>,
    role: ListenerRole,
    handler: Rc<dyn ConnectionHandler>,
    logger: Rc<dyn Logger>,
) {
    while let Some(event) = events.recv().await {
        match event {
            ListenerEvent::Accepted(connection) => {
                let handler = Rc::clone(&handler);
                tokio::task::spawn_local(async move {
                    match role {
                        ListenerRole::Primary => handler.handle_connect(connection).await,
                        ListenerRole::Policy => handler.handle_policy_connect(connection).await,
                    }
                });
            }
            ListenerEvent::Failed(error) => match role {
                ListenerRole::Primary => {
                    logger.error(&format!("Could not establish connection: {error}"))
                }
                ListenerRole::Policy => logger.error(&format!("Policy listener error: {error}")),
            },
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
