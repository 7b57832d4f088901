//! Transport socket: one registration with the engine, bound to one local endpoint.

use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread;
use std::time::Duration;

use tracing::debug;

use crate::bundle::Bundle;
use crate::config::ClientConfig;
use crate::eid::EndpointId;
use crate::engine::{Engine, RegistrationToken};
use crate::error::{
    receive_error, register_error, send_error, unregister_error, DtnError, Result, StatusCode,
};
use crate::payload::PayloadLocation;

/// Poll window used by receives without a timeout.
pub const DEFAULT_POLL_WINDOW: Duration = Duration::from_secs(60);

/// Handler for a failed background receive.
pub type ErrorHandler = Box<dyn FnOnce(DtnError) + Send + 'static>;

/// Registered endpoint handle.
///
/// States: registered after [`BundleSocket::register`], unregistered (for good) after
/// [`BundleSocket::unregister`]. Send and receive on an unregistered socket fail with
/// [`DtnError::NotRegistered`]. Equality and hashing use the registration token only.
pub struct BundleSocket {
    engine: Arc<dyn Engine>,
    token: RegistrationToken,
    registered: Mutex<bool>,
    payload_location: PayloadLocation,
    poll_window: Duration,
}

impl BundleSocket {
    /// Register a local endpoint. `ipn_demux > 0` binds an IPN endpoint, otherwise `dtn_demux`
    /// names a DTN one.
    pub fn register(engine: Arc<dyn Engine>, dtn_demux: &str, ipn_demux: i32) -> Result<Self> {
        if ipn_demux < 0 {
            return Err(DtnError::InvalidArgument(
                "ipn demux number can't be negative".into(),
            ));
        }
        let token = engine
            .register(dtn_demux, ipn_demux)
            .map_err(register_error)?;
        debug!(token, dtn_demux, ipn_demux, "socket registered");
        Ok(Self {
            engine,
            token,
            registered: Mutex::new(true),
            payload_location: PayloadLocation::default(),
            poll_window: DEFAULT_POLL_WINDOW,
        })
    }

    pub fn register_ipn(engine: Arc<dyn Engine>, ipn_demux: i32) -> Result<Self> {
        Self::register(engine, "", ipn_demux)
    }

    pub fn register_dtn(engine: Arc<dyn Engine>, dtn_demux: &str) -> Result<Self> {
        if dtn_demux.is_empty() {
            return Err(DtnError::InvalidArgument(
                "dtn demux string can't be empty".into(),
            ));
        }
        Self::register(engine, dtn_demux, 0)
    }

    /// Take the payload location preference and poll window from `config`.
    pub fn with_config(mut self, config: &ClientConfig) -> Self {
        self.payload_location = config.payload_location;
        self.poll_window = config.receive_poll();
        self
    }

    pub fn token(&self) -> RegistrationToken {
        self.token
    }

    pub fn payload_location(&self) -> PayloadLocation {
        self.payload_location
    }

    /// Where received payloads go when a receive does not say otherwise.
    pub fn set_payload_location(&mut self, location: PayloadLocation) {
        self.payload_location = location;
    }

    pub fn poll_window(&self) -> Duration {
        self.poll_window
    }

    /// Window of each engine wait while receiving without a timeout. Zero is raised to one second.
    pub fn set_poll_window(&mut self, window: Duration) {
        self.poll_window = window.max(Duration::from_secs(1));
    }

    pub fn local_eid(&self) -> Option<EndpointId> {
        self.engine
            .local_eid(self.token)
            .and_then(|s| EndpointId::parse(&s))
    }

    pub fn is_registered(&self) -> bool {
        *self.lock()
    }

    /// Release the registration. Only the first call succeeds.
    pub fn unregister(&self) -> Result<()> {
        let mut registered = self.lock();
        if !*registered {
            return Err(DtnError::NotRegistered);
        }
        self.engine
            .unregister(self.token)
            .map_err(unregister_error)?;
        *registered = false;
        debug!(token = self.token, "socket unregistered");
        Ok(())
    }

    /// Validate and send `bundle`. A missing source is filled with the local endpoint.
    pub fn send(&self, bundle: &mut Bundle) -> Result<()> {
        bundle.validate_for_send()?;
        self.ensure_registered()?;
        if bundle.source.is_none() {
            bundle.source = self.local_eid();
        }
        self.engine
            .send(self.token, bundle)
            .map_err(send_error)?;
        debug!(
            token = self.token,
            destination = ?bundle.destination.as_ref().map(ToString::to_string),
            "bundle sent"
        );
        Ok(())
    }

    /// Block until a bundle arrives, using the preferred payload location.
    pub fn receive(&self) -> Result<Bundle> {
        self.receive_with(None, None)
    }

    /// Single bounded attempt; [`DtnError::Timeout`] when nothing arrives within `timeout`.
    /// A zero timeout polls once.
    pub fn receive_timeout(&self, timeout: Duration) -> Result<Bundle> {
        self.receive_with(None, Some(timeout))
    }

    /// General receive. `location: None` uses the socket preference. `timeout: None` waits
    /// forever, retrying engine timeouts every poll window; `Some` is one bounded attempt.
    pub fn receive_with(
        &self,
        location: Option<PayloadLocation>,
        timeout: Option<Duration>,
    ) -> Result<Bundle> {
        self.ensure_registered()?;
        let location = location.unwrap_or(self.payload_location);
        match timeout {
            Some(timeout) => self
                .engine
                .receive(self.token, location, timeout)
                .map_err(receive_error),
            None => loop {
                match self.engine.receive(self.token, location, self.poll_window) {
                    Ok(bundle) => return Ok(bundle),
                    Err(StatusCode::Timeout) => continue,
                    Err(code) => return Err(receive_error(code)),
                }
            },
        }
    }

    /// One-shot background receive on a dedicated thread, waiting forever with the preferred
    /// location. See [`BundleSocket::receive_async_with`].
    pub fn receive_async<F>(self: &Arc<Self>, handler: F, on_error: Option<ErrorHandler>) -> Result<()>
    where
        F: FnOnce(Bundle) + Send + 'static,
    {
        self.receive_async_with(None, None, handler, on_error)
    }

    /// One-shot background receive. The bundle goes to `handler`; a failure goes to `on_error`
    /// when given and is otherwise dropped. Fails only if the thread cannot be spawned.
    pub fn receive_async_with<F>(
        self: &Arc<Self>,
        location: Option<PayloadLocation>,
        timeout: Option<Duration>,
        handler: F,
        on_error: Option<ErrorHandler>,
    ) -> Result<()>
    where
        F: FnOnce(Bundle) + Send + 'static,
    {
        let socket = Arc::clone(self);
        thread::Builder::new()
            .name(format!("bundle-receive-{}", self.token))
            .spawn(move || match socket.receive_with(location, timeout) {
                Ok(bundle) => handler(bundle),
                Err(e) => match on_error {
                    Some(on_error) => on_error(e),
                    None => debug!(token = socket.token, error = %e, "async receive failed"),
                },
            })?;
        Ok(())
    }

    /// Receive on the tokio blocking pool. Must be called from inside a runtime.
    /// Aborting the returned handle abandons the result; the engine wait itself ends with its
    /// timeout or with [`BundleSocket::unregister`].
    pub fn receive_task(
        self: &Arc<Self>,
        location: Option<PayloadLocation>,
        timeout: Option<Duration>,
    ) -> Result<tokio::task::JoinHandle<Result<Bundle>>> {
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| DtnError::IllegalState(format!("no tokio runtime: {}", e)))?;
        let socket = Arc::clone(self);
        Ok(runtime.spawn_blocking(move || socket.receive_with(location, timeout)))
    }

    fn ensure_registered(&self) -> Result<()> {
        if *self.lock() {
            Ok(())
        } else {
            Err(DtnError::NotRegistered)
        }
    }

    fn lock(&self) -> MutexGuard<'_, bool> {
        self.registered.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl Drop for BundleSocket {
    fn drop(&mut self) {
        if self.is_registered() {
            if let Err(e) = self.unregister() {
                debug!(token = self.token, error = %e, "unregister on drop failed");
            }
        }
    }
}

impl PartialEq for BundleSocket {
    fn eq(&self, other: &Self) -> bool {
        self.token == other.token
    }
}

impl Eq for BundleSocket {}

impl Hash for BundleSocket {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.token.hash(state);
    }
}

impl fmt::Debug for BundleSocket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BundleSocket")
            .field("token", &self.token)
            .field("registered", &self.is_registered())
            .field("payload_location", &self.payload_location)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::loopback::LoopbackEngine;
    use crate::payload::Payload;
    use std::sync::mpsc;
    use std::time::Instant;

    fn engine() -> (tempfile::TempDir, Arc<LoopbackEngine>) {
        let dir = tempfile::tempdir().unwrap();
        let engine = Arc::new(LoopbackEngine::new(1, dir.path()));
        engine.start();
        (dir, engine)
    }

    #[test]
    fn lifecycle() {
        let (_dir, engine) = engine();
        let socket = BundleSocket::register_ipn(engine.clone(), 10).unwrap();
        assert_eq!(socket.local_eid(), Some(EndpointId::ipn(1, 10).unwrap()));
        socket.unregister().unwrap();
        assert!(matches!(socket.unregister(), Err(DtnError::NotRegistered)));
        let mut b = Bundle::new(EndpointId::ipn(1, 20).unwrap()).with_data(b"x");
        assert!(matches!(socket.send(&mut b), Err(DtnError::NotRegistered)));
        assert!(matches!(
            socket.receive_timeout(Duration::ZERO),
            Err(DtnError::NotRegistered)
        ));
    }

    #[test]
    fn register_errors() {
        let (_dir, engine) = engine();
        assert!(matches!(
            BundleSocket::register(engine.clone(), "", -1),
            Err(DtnError::InvalidArgument(_))
        ));
        assert!(matches!(
            BundleSocket::register(engine.clone(), "", 0),
            Err(DtnError::LocalEid)
        ));
        let _first = BundleSocket::register_dtn(engine.clone(), "chat").unwrap();
        assert!(matches!(
            BundleSocket::register_dtn(engine, "chat"),
            Err(DtnError::Register { .. })
        ));
    }

    #[test]
    fn invalid_bundle_never_reaches_engine() {
        let (_dir, engine) = engine();
        let socket = BundleSocket::register_ipn(engine.clone(), 10).unwrap();
        let dest = EndpointId::ipn(1, 20).unwrap();
        let mut b = Bundle::new(dest.clone()).with_data(b"x").with_expiration(0);
        assert!(matches!(socket.send(&mut b), Err(DtnError::InvalidArgument(_))));
        assert!(b.source.is_none());
        assert_eq!(engine.pending(&dest), 0);
    }

    #[test]
    fn send_fills_source() {
        let (_dir, engine) = engine();
        let socket = BundleSocket::register_ipn(engine.clone(), 10).unwrap();
        let mut b = Bundle::new(EndpointId::ipn(1, 20).unwrap()).with_data(b"x");
        socket.send(&mut b).unwrap();
        assert_eq!(b.source, socket.local_eid());
    }

    #[test]
    fn receive_timeout_is_bounded() {
        let (_dir, engine) = engine();
        let socket = BundleSocket::register_ipn(engine, 10).unwrap();
        let start = Instant::now();
        assert!(matches!(
            socket.receive_timeout(Duration::from_millis(200)),
            Err(DtnError::Timeout)
        ));
        assert!(start.elapsed() >= Duration::from_millis(200));
    }

    #[test]
    fn preferred_location_applies() {
        let (_dir, engine) = engine();
        let mut socket = BundleSocket::register_ipn(engine.clone(), 10).unwrap();
        socket.set_payload_location(PayloadLocation::File);
        let mut b = Bundle::new(EndpointId::ipn(1, 10).unwrap()).with_data(b"file me");
        socket.send(&mut b).unwrap();
        let got = socket.receive_timeout(Duration::from_secs(1)).unwrap();
        let payload = got.payload.unwrap();
        assert!(matches!(payload, Payload::File(_)));
        assert_eq!(payload.data().unwrap(), b"file me");
    }

    #[test]
    fn async_failure_goes_to_error_handler() {
        let (_dir, engine) = engine();
        let socket = Arc::new(BundleSocket::register_ipn(engine, 10).unwrap());
        let (tx, rx) = mpsc::channel();
        socket
            .receive_async_with(
                None,
                Some(Duration::from_millis(50)),
                |_| panic!("nothing was sent"),
                Some(Box::new(move |e: DtnError| tx.send(e).unwrap())),
            )
            .unwrap();
        let err = rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert!(matches!(err, DtnError::Timeout));
    }

    #[test]
    fn drop_unregisters() {
        let (_dir, engine) = engine();
        let socket = BundleSocket::register_ipn(engine.clone(), 10).unwrap();
        let token = socket.token();
        drop(socket);
        assert!(engine.local_eid(token).is_none());
        assert!(BundleSocket::register_ipn(engine, 10).is_ok());
    }

    #[test]
    fn identity_by_token() {
        let (_dir, engine) = engine();
        let a = BundleSocket::register_ipn(engine.clone(), 10).unwrap();
        let b = BundleSocket::register_ipn(engine, 11).unwrap();
        assert_ne!(a, b);
        assert_eq!(a, a);
    }
}
