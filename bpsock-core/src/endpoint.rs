//! Endpoint service: opens an endpoint for a listener, runs its receive loop, sends on its behalf
//! and closes it again.

use std::collections::HashSet;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::thread;

use tracing::{debug, info, warn};

use crate::bundle::Bundle;
use crate::config::ClientConfig;
use crate::eid::EndpointId;
use crate::engine::{Engine, RegistrationToken, StatusCell};
use crate::error::{DtnError, Result};
use crate::listener::BundleListener;
use crate::receiver::{ReceiveLoop, ReceiverConfig, ReceiverHandle};
use crate::socket::BundleSocket;

type OpenSet = Arc<Mutex<HashSet<String>>>;

fn lock_set(set: &OpenSet) -> MutexGuard<'_, HashSet<String>> {
    set.lock().unwrap_or_else(|e| e.into_inner())
}

pub struct EndpointService {
    engine: Arc<dyn Engine>,
    status: StatusCell,
    config: ClientConfig,
    open: OpenSet,
}

impl EndpointService {
    pub fn new(engine: Arc<dyn Engine>, status: StatusCell, config: ClientConfig) -> Self {
        Self {
            engine,
            status,
            config,
            open: Arc::default(),
        }
    }

    /// Register an endpoint for `listener` and start its receive loop.
    ///
    /// Fails with `IllegalState` when the engine is not started or the local endpoint is already
    /// open; registration failures surface as from [`BundleSocket::register`].
    pub fn open_endpoint(
        &self,
        dtn_demux: &str,
        ipn_demux: i32,
        listener: Arc<dyn BundleListener>,
    ) -> Result<Endpoint> {
        if !self.status.is_started() {
            return Err(DtnError::IllegalState("engine is not started".into()));
        }
        let socket = BundleSocket::register(self.engine.clone(), dtn_demux, ipn_demux)?
            .with_config(&self.config);
        let eid = socket.local_eid().ok_or(DtnError::LocalEid)?;
        if !lock_set(&self.open).insert(eid.to_string()) {
            // dropping `socket` releases the duplicate registration
            return Err(DtnError::IllegalState(format!(
                "endpoint {} is already open",
                eid
            )));
        }
        let inner = Arc::new(EndpointInner {
            eid: eid.clone(),
            status: self.status.clone(),
            open: self.open.clone(),
            closed: AtomicBool::new(false),
            receiver: Mutex::new(None),
            token: socket.token(),
            socket,
        });
        let weak: Weak<EndpointInner> = Arc::downgrade(&inner);
        let spawned = ReceiveLoop::new(
            self.engine.clone(),
            self.status.clone(),
            inner.token,
            listener,
            ReceiverConfig::from(&self.config),
        )
        .on_listener_death(move || {
            if let Some(inner) = weak.upgrade() {
                inner.close(false).ok();
            }
        })
        .spawn();
        match spawned {
            Ok(handle) => {
                *inner.lock_receiver() = Some(handle);
            }
            Err(e) => {
                inner.close(false).ok();
                return Err(e.into());
            }
        }
        info!(eid = %eid, token = inner.token, "endpoint opened");
        Ok(Endpoint { inner })
    }

    pub fn is_open(&self, eid: &EndpointId) -> bool {
        lock_set(&self.open).contains(&eid.to_string())
    }
}

/// Handle to an open endpoint. Clones share the same endpoint.
#[derive(Clone)]
pub struct Endpoint {
    inner: Arc<EndpointInner>,
}

struct EndpointInner {
    eid: EndpointId,
    token: RegistrationToken,
    socket: BundleSocket,
    status: StatusCell,
    open: OpenSet,
    closed: AtomicBool,
    receiver: Mutex<Option<ReceiverHandle>>,
}

impl EndpointInner {
    fn lock_receiver(&self) -> MutexGuard<'_, Option<ReceiverHandle>> {
        self.receiver.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Stop the loop and unregister. The loop is never joined from its own thread.
    fn close(&self, join: bool) -> Result<()> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        let receiver = self.lock_receiver().take();
        if let Some(r) = &receiver {
            r.interrupt();
        }
        lock_set(&self.open).remove(&self.eid.to_string());
        let result = self.socket.unregister();
        if let Err(e) = &result {
            warn!(eid = %self.eid, error = %e, "unregister on close failed");
        }
        if let Some(r) = receiver {
            if join && r.thread_id() != thread::current().id() {
                let exit = r.join();
                debug!(eid = %self.eid, reason = ?exit, "receive loop joined");
            }
        }
        info!(eid = %self.eid, "endpoint closed");
        result
    }
}

impl Drop for EndpointInner {
    fn drop(&mut self) {
        self.close(false).ok();
    }
}

impl Endpoint {
    pub fn local_eid(&self) -> &EndpointId {
        &self.inner.eid
    }

    /// False once the endpoint was closed or its receive loop has ended.
    pub fn is_open(&self) -> bool {
        !self.inner.closed.load(Ordering::Acquire)
            && self
                .inner
                .lock_receiver()
                .as_ref()
                .map_or(true, |r| !r.is_finished())
    }

    /// Send `bundle` from this endpoint. Refused while the engine is not started.
    pub fn send(&self, bundle: &mut Bundle) -> Result<()> {
        if !self.inner.status.is_started() {
            return Err(DtnError::IllegalState("engine is not started".into()));
        }
        if self.inner.closed.load(Ordering::Acquire) {
            return Err(DtnError::NotRegistered);
        }
        self.inner.socket.send(bundle)
    }

    /// Interrupt the receive loop, wait for it and unregister. Later calls do nothing.
    pub fn close(&self) -> Result<()> {
        self.inner.close(true)
    }
}

impl fmt::Debug for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Endpoint")
            .field("eid", &self.inner.eid)
            .field("token", &self.inner.token)
            .field("open", &self.is_open())
            .finish()
    }
}
