//! Refcounted connection lifecycle, one handle per identity.
//!
//! All lifecycle transitions of a handle happen under its own async lock:
//! the 0→1 acquire connects, the 1→0 release disconnects and retires the handle.
//! The registry map itself is only touched in short synchronous sections.

use super::identity::ConnectionIdentity;
use crate::backend::{Backend, UserInfo};
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::{Arc, Mutex, OnceLock, PoisonError};
use tracing::{debug, info, warn};

/// Builds the backend for a newly created handle.
pub type BackendFactory = Arc<dyn Fn(&ConnectionIdentity) -> Arc<dyn Backend> + Send + Sync>;

type RemovalHook = Arc<dyn Fn(&ConnectionIdentity) + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandleState {
    Uninitialized,
    /// `connected` is false when the first connect failed; the failure is
    /// reported by the first call instead.
    Active {
        connected: bool,
    },
    Draining,
    Removed,
}

#[derive(Debug)]
struct Lifecycle {
    refcount: usize,
    state: HandleState,
}

/// Shared state for one identity's backend session.
pub struct ConnectionHandle {
    identity: ConnectionIdentity,
    backend: Arc<dyn Backend>,
    lifecycle: tokio::sync::Mutex<Lifecycle>,
    me: Mutex<Option<UserInfo>>,
}

impl ConnectionHandle {
    fn new(identity: ConnectionIdentity, backend: Arc<dyn Backend>) -> Self {
        Self {
            identity,
            backend,
            lifecycle: tokio::sync::Mutex::new(Lifecycle {
                refcount: 0,
                state: HandleState::Uninitialized,
            }),
            me: Mutex::new(None),
        }
    }

    pub fn identity(&self) -> &ConnectionIdentity {
        &self.identity
    }

    pub async fn refcount(&self) -> usize {
        self.lifecycle.lock().await.refcount
    }

    pub async fn state(&self) -> HandleState {
        self.lifecycle.lock().await.state
    }

    /// The account resolved by bootstrap, if it has run on this handle.
    pub fn me(&self) -> Option<UserInfo> {
        self.me
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub(crate) fn set_me(&self, me: UserInfo) {
        *self.me.lock().unwrap_or_else(PoisonError::into_inner) = Some(me);
    }

    pub(crate) fn backend(&self) -> &Arc<dyn Backend> {
        &self.backend
    }
}

impl fmt::Debug for ConnectionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionHandle")
            .field("identity", &self.identity)
            .finish_non_exhaustive()
    }
}

/// Result of giving back a lease.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReleaseOutcome {
    pub remaining: usize,
    pub removed: bool,
}

struct Inner {
    factory: BackendFactory,
    handles: Mutex<HashMap<ConnectionIdentity, Arc<ConnectionHandle>>>,
    on_removed: OnceLock<RemovalHook>,
}

#[derive(Clone)]
pub struct ConnectionRegistry {
    inner: Arc<Inner>,
}

impl ConnectionRegistry {
    pub fn new(factory: BackendFactory) -> Self {
        Self {
            inner: Arc::new(Inner {
                factory,
                handles: Mutex::new(HashMap::new()),
                on_removed: OnceLock::new(),
            }),
        }
    }

    /// Run `hook` whenever a handle is retired, before it leaves the map.
    pub fn on_removed<F>(self, hook: F) -> Self
    where
        F: Fn(&ConnectionIdentity) + Send + Sync + 'static,
    {
        if self.inner.on_removed.set(Arc::new(hook)).is_err() {
            warn!("connection registry removal hook already set, ignoring");
        }
        self
    }

    fn handles(&self) -> std::sync::MutexGuard<'_, HashMap<ConnectionIdentity, Arc<ConnectionHandle>>> {
        self.inner
            .handles
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Existing handle for `identity`, or a new uninitialized one.
    pub fn get_or_create(&self, identity: &ConnectionIdentity) -> Arc<ConnectionHandle> {
        let mut handles = self.handles();
        if let Some(handle) = handles.get(identity) {
            return handle.clone();
        }
        debug!("creating connection handle for {}", identity);
        let backend = (self.inner.factory)(identity);
        let handle = Arc::new(ConnectionHandle::new(identity.clone(), backend));
        handles.insert(identity.clone(), handle.clone());
        handle
    }

    pub fn get(&self, identity: &ConnectionIdentity) -> Option<Arc<ConnectionHandle>> {
        self.handles().get(identity).cloned()
    }

    pub fn len(&self) -> usize {
        self.handles().len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles().is_empty()
    }

    /// Take a share of `handle`. Returns `None` if the handle was retired
    /// while this caller waited for its lock.
    ///
    /// The transition runs on its own task, so a caller cancelled mid-connect
    /// cannot leave a share behind: the lease it would have received is
    /// dropped and released in the background.
    pub async fn acquire_handle(&self, handle: &Arc<ConnectionHandle>) -> Option<Lease> {
        let registry = self.clone();
        let handle = handle.clone();
        run_transition(async move { registry.acquire_transition(handle).await })
            .await
            .flatten()
    }

    async fn acquire_transition(&self, handle: Arc<ConnectionHandle>) -> Option<Lease> {
        let mut life = handle.lifecycle.lock().await;
        if life.state == HandleState::Removed {
            return None;
        }
        if life.refcount == 0 {
            let connected = match handle.backend.connect().await {
                Ok(authorized) => {
                    if !authorized {
                        warn!("{} connected without an authorized session", handle.identity);
                    }
                    info!("connected {}", handle.identity);
                    true
                }
                Err(e) => {
                    warn!("connect failed for {}: {}", handle.identity, e);
                    false
                }
            };
            life.state = HandleState::Active { connected };
        }
        life.refcount += 1;
        debug!("acquired {} (refcount {})", handle.identity, life.refcount);
        drop(life);
        Some(Lease {
            handle,
            registry: self.clone(),
            released: false,
        })
    }

    /// Share the connection for `identity`, connecting it if nobody holds it.
    pub async fn acquire(&self, identity: &ConnectionIdentity) -> Lease {
        loop {
            let handle = self.get_or_create(identity);
            if let Some(lease) = self.acquire_handle(&handle).await {
                return lease;
            }
            debug!("handle for {} retired during acquire, retrying", identity);
        }
    }

    pub async fn release(&self, lease: Lease) -> ReleaseOutcome {
        lease.release().await
    }

    async fn release_handle(&self, handle: &Arc<ConnectionHandle>) -> ReleaseOutcome {
        let mut life = handle.lifecycle.lock().await;
        if life.refcount == 0 {
            warn!("release of {} with no outstanding lease", handle.identity);
            return ReleaseOutcome {
                remaining: 0,
                removed: false,
            };
        }
        life.refcount -= 1;
        if life.refcount > 0 {
            debug!("released {} (refcount {})", handle.identity, life.refcount);
            return ReleaseOutcome {
                remaining: life.refcount,
                removed: false,
            };
        }

        life.state = HandleState::Draining;
        if let Err(e) = handle.backend.disconnect().await {
            warn!("disconnect failed for {}: {}", handle.identity, e);
        }
        if let Some(hook) = self.inner.on_removed.get() {
            hook(&handle.identity);
        }
        {
            let mut handles = self.handles();
            if handles
                .get(&handle.identity)
                .is_some_and(|current| Arc::ptr_eq(current, handle))
            {
                handles.remove(&handle.identity);
            }
        }
        handle
            .me
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        life.state = HandleState::Removed;
        info!("disconnected {}", handle.identity);
        ReleaseOutcome {
            remaining: 0,
            removed: true,
        }
    }
}

/// Run a lifecycle transition to completion on its own task.
///
/// Returns `None` only when the runtime shut the task down; a panic inside
/// the backend is resumed on the caller.
async fn run_transition<T, F>(transition: F) -> Option<T>
where
    T: Send + 'static,
    F: Future<Output = T> + Send + 'static,
{
    match tokio::spawn(transition).await {
        Ok(value) => Some(value),
        Err(e) if e.is_panic() => std::panic::resume_unwind(e.into_panic()),
        Err(e) => {
            warn!("connection lifecycle transition did not finish: {}", e);
            None
        }
    }
}

/// One holder's share of a connection.
///
/// Give it back with [`Lease::release`]. A lease dropped without release is
/// released on the current runtime in the background.
pub struct Lease {
    handle: Arc<ConnectionHandle>,
    registry: ConnectionRegistry,
    released: bool,
}

impl Lease {
    pub fn handle(&self) -> &Arc<ConnectionHandle> {
        &self.handle
    }

    pub fn identity(&self) -> &ConnectionIdentity {
        &self.handle.identity
    }

    pub(crate) fn backend(&self) -> Arc<dyn Backend> {
        self.handle.backend().clone()
    }

    pub async fn release(mut self) -> ReleaseOutcome {
        let handle = self.handle.clone();
        let registry = self.registry.clone();
        // From here on the spawned transition owns the share, even if this
        // caller is cancelled while it runs.
        self.released = true;
        run_transition(async move { registry.release_handle(&handle).await })
            .await
            .unwrap_or(ReleaseOutcome {
                remaining: 0,
                removed: false,
            })
    }
}

impl Drop for Lease {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        let handle = self.handle.clone();
        let registry = self.registry.clone();
        if let Ok(runtime) = tokio::runtime::Handle::try_current() {
            debug!("lease for {} dropped, releasing in background", handle.identity);
            runtime.spawn(async move {
                registry.release_handle(&handle).await;
            });
        } else {
            warn!(
                "lease for {} dropped outside a runtime, connection left open",
                handle.identity
            );
        }
    }
}

impl fmt::Debug for Lease {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Lease")
            .field("identity", &self.handle.identity)
            .field("released", &self.released)
            .finish()
    }
}
