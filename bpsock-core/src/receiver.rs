//! Continuous receive loop: pulls bundles for one registration and hands them to a listener until
//! the listener dies, the loop is interrupted, or the engine stops.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle, ThreadId};
use std::time::Duration;

use tempfile::NamedTempFile;
use tracing::{debug, error, info, warn};

use crate::bundle::Bundle;
use crate::config::ClientConfig;
use crate::engine::{Engine, RegistrationToken, StatusCell};
use crate::listener::{BundleListener, DeathWatch, Delivery, ListenerError};
use crate::payload::Payload;

/// Shortest bounded wait a loop will use, whatever it was configured with.
pub const MIN_LOOP_WAIT: Duration = Duration::from_millis(10);

/// Runs once when the loop finds its listener dead or unreachable.
pub type EndpointCloser = Box<dyn FnOnce() + Send + 'static>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReceiverConfig {
    /// Payloads of at least this many bytes are delivered through the scratch file.
    pub payload_threshold: usize,
    pub scratch_dir: PathBuf,
    /// Bounded wait per iteration; also bounds how long interrupts take to be noticed.
    pub wait: Duration,
}

impl From<&ClientConfig> for ReceiverConfig {
    fn from(c: &ClientConfig) -> Self {
        Self {
            payload_threshold: c.payload_threshold,
            scratch_dir: c.scratch_dir.clone(),
            wait: c.loop_wait(),
        }
    }
}

/// Why a loop ended. Loops never restart.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopExit {
    ScratchUnavailable,
    DeathLinkFailed,
    EngineStopped,
    Interrupted,
    ListenerDied,
    ListenerUnreachable,
    Panicked,
}

/// Cooperative stop request, checked once per iteration.
#[derive(Debug, Clone, Default)]
pub struct InterruptHandle(Arc<AtomicBool>);

impl InterruptHandle {
    pub fn interrupt(&self) {
        self.0.store(true, Ordering::Release);
    }

    pub fn is_interrupted(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

pub struct ReceiveLoop {
    engine: Arc<dyn Engine>,
    status: StatusCell,
    token: RegistrationToken,
    listener: Arc<dyn BundleListener>,
    config: ReceiverConfig,
    interrupt: InterruptHandle,
    closer: Option<EndpointCloser>,
}

impl ReceiveLoop {
    pub fn new(
        engine: Arc<dyn Engine>,
        status: StatusCell,
        token: RegistrationToken,
        listener: Arc<dyn BundleListener>,
        mut config: ReceiverConfig,
    ) -> Self {
        config.wait = config.wait.max(MIN_LOOP_WAIT);
        Self {
            engine,
            status,
            token,
            listener,
            config,
            interrupt: InterruptHandle::default(),
            closer: None,
        }
    }

    /// Close the endpoint on behalf of a dead or unreachable listener.
    pub fn on_listener_death(mut self, closer: impl FnOnce() + Send + 'static) -> Self {
        self.closer = Some(Box::new(closer));
        self
    }

    pub fn interrupt_handle(&self) -> InterruptHandle {
        self.interrupt.clone()
    }

    /// Run on a dedicated thread.
    pub fn spawn(self) -> std::io::Result<ReceiverHandle> {
        let interrupt = self.interrupt.clone();
        let thread = thread::Builder::new()
            .name(format!("bundle-listener-{}", self.token))
            .spawn(move || self.run())?;
        Ok(ReceiverHandle { interrupt, thread })
    }

    /// Run on the current thread until an exit condition holds.
    pub fn run(mut self) -> LoopExit {
        let token = self.token;
        let scratch = match tempfile::Builder::new()
            .prefix("bundle-scratch-")
            .tempfile_in(&self.config.scratch_dir)
        {
            Ok(f) => f,
            Err(e) => {
                error!(token, error = %e, dir = %self.config.scratch_dir.display(), "cannot create scratch file");
                return LoopExit::ScratchUnavailable;
            }
        };
        let watch = DeathWatch::new();
        if let Err(e) = self.listener.link_to_death(watch.clone()) {
            error!(token, error = %e, "cannot watch listener");
            return LoopExit::DeathLinkFailed;
        }
        info!(token, "receive loop started");
        let exit = self.pump(&scratch, &watch);
        info!(token, reason = ?exit, "receive loop finished");
        exit
    }

    fn pump(&mut self, scratch: &NamedTempFile, watch: &DeathWatch) -> LoopExit {
        loop {
            let next = self.engine.wait_for_bundle(
                self.token,
                self.config.payload_threshold,
                scratch.path(),
                self.config.wait,
            );
            if !self.status.is_started() {
                return LoopExit::EngineStopped;
            }
            if self.interrupt.is_interrupted() {
                return LoopExit::Interrupted;
            }
            if watch.is_tripped() {
                self.close_endpoint();
                return LoopExit::ListenerDied;
            }
            let Some(bundle) = next else {
                continue;
            };
            match self.dispatch(bundle, scratch) {
                Ok(()) => {}
                Err(ListenerError::Unreachable) => {
                    warn!(token = self.token, "listener unreachable");
                    self.close_endpoint();
                    return LoopExit::ListenerUnreachable;
                }
                Err(ListenerError::Io(e)) => {
                    warn!(token = self.token, error = %e, "delivery failed");
                }
            }
        }
    }

    fn close_endpoint(&mut self) {
        if let Some(close) = self.closer.take() {
            close();
        }
    }

    fn dispatch(&self, bundle: Bundle, scratch: &NamedTempFile) -> Result<(), ListenerError> {
        if !matches!(bundle.payload, Some(Payload::File(_))) {
            return self.listener.on_bundle_received(Delivery::InMemory(bundle));
        }
        debug!(token = self.token, len = bundle.orig_length, "delivering through scratch file");
        let result = scratch
            .reopen()
            .map_err(ListenerError::from)
            .and_then(|file| {
                self.listener
                    .on_bundle_received(Delivery::File { bundle, file })
            });
        if let Err(e) = scratch.as_file().set_len(0) {
            warn!(token = self.token, error = %e, "cannot truncate scratch file");
        }
        result
    }
}

pub struct ReceiverHandle {
    interrupt: InterruptHandle,
    thread: JoinHandle<LoopExit>,
}

impl ReceiverHandle {
    pub fn interrupt(&self) {
        self.interrupt.interrupt();
    }

    pub fn is_finished(&self) -> bool {
        self.thread.is_finished()
    }

    /// Id of the loop's thread; joining from that thread would deadlock.
    pub fn thread_id(&self) -> ThreadId {
        self.thread.thread().id()
    }

    pub fn join(self) -> LoopExit {
        self.thread.join().unwrap_or(LoopExit::Panicked)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::eid::EndpointId;
    use crate::error::StatusCode;
    use crate::loopback::LoopbackEngine;
    use crate::payload::PayloadLocation;
    use std::path::Path;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Recorder {
        seen: Mutex<Vec<(bool, Vec<u8>, u64)>>,
        scratch: Mutex<Option<PathBuf>>,
        watch: Mutex<Option<DeathWatch>>,
    }

    impl BundleListener for Recorder {
        fn on_bundle_received(&self, mut delivery: Delivery) -> Result<(), ListenerError> {
            let is_file = matches!(delivery, Delivery::File { .. });
            if let Some(Payload::File(src)) = &delivery.bundle().payload {
                *self.scratch.lock().unwrap() = Some(src.path().to_path_buf());
            }
            let len = match &delivery {
                Delivery::File { file, .. } => file.metadata()?.len(),
                Delivery::InMemory(_) => 0,
            };
            let data = delivery.read_payload()?;
            self.seen.lock().unwrap().push((is_file, data, len));
            Ok(())
        }

        fn link_to_death(&self, watch: DeathWatch) -> Result<(), ListenerError> {
            *self.watch.lock().unwrap() = Some(watch);
            Ok(())
        }
    }

    struct Setup {
        dir: tempfile::TempDir,
        engine: Arc<LoopbackEngine>,
        rx: RegistrationToken,
        dest: EndpointId,
    }

    fn setup() -> Setup {
        let dir = tempfile::tempdir().unwrap();
        let engine = Arc::new(LoopbackEngine::new(1, dir.path().join("spool")));
        engine.start();
        let rx = engine.register("", 20).unwrap();
        Setup {
            dir,
            engine,
            rx,
            dest: EndpointId::ipn(1, 20).unwrap(),
        }
    }

    fn receive_loop(s: &Setup, listener: Arc<dyn BundleListener>, threshold: usize) -> ReceiveLoop {
        ReceiveLoop::new(
            s.engine.clone(),
            s.engine.status_cell(),
            s.rx,
            listener,
            ReceiverConfig {
                payload_threshold: threshold,
                scratch_dir: s.dir.path().to_path_buf(),
                wait: Duration::from_millis(50),
            },
        )
    }

    fn wait_until(mut cond: impl FnMut() -> bool) {
        for _ in 0..200 {
            if cond() {
                return;
            }
            thread::sleep(Duration::from_millis(10));
        }
        panic!("condition not reached");
    }

    #[test]
    fn large_payload_goes_through_truncated_scratch_file() {
        let s = setup();
        let listener = Arc::new(Recorder::default());
        let handle = receive_loop(&s, listener.clone(), 1000).spawn().unwrap();
        let payload = vec![7u8; 2000];
        s.engine
            .send(s.rx, &Bundle::new(s.dest.clone()).with_data(&payload))
            .unwrap();
        s.engine
            .send(s.rx, &Bundle::new(s.dest.clone()).with_data(b"small"))
            .unwrap();
        wait_until(|| listener.seen.lock().unwrap().len() == 2);
        {
            let seen = listener.seen.lock().unwrap();
            assert_eq!(seen[0], (true, payload, 2000));
            assert_eq!(seen[1], (false, b"small".to_vec(), 0));
        }
        let scratch = listener.scratch.lock().unwrap().clone().unwrap();
        assert_eq!(std::fs::metadata(&scratch).unwrap().len(), 0);
        handle.interrupt();
        assert_eq!(handle.join(), LoopExit::Interrupted);
    }

    #[test]
    fn dead_listener_closes_endpoint_once() {
        let s = setup();
        let listener = Arc::new(Recorder::default());
        let closed = Arc::new(AtomicUsize::new(0));
        let counter = closed.clone();
        let handle = receive_loop(&s, listener.clone(), 1000)
            .on_listener_death(move || {
                counter.fetch_add(1, Ordering::SeqCst);
            })
            .spawn()
            .unwrap();
        wait_until(|| listener.watch.lock().unwrap().is_some());
        listener.watch.lock().unwrap().as_ref().unwrap().trip();
        assert_eq!(handle.join(), LoopExit::ListenerDied);
        assert_eq!(closed.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn engine_stop_ends_loop() {
        let s = setup();
        let handle = receive_loop(&s, Arc::new(Recorder::default()), 1000)
            .spawn()
            .unwrap();
        s.engine.stop();
        assert_eq!(handle.join(), LoopExit::EngineStopped);
    }

    #[test]
    fn missing_scratch_dir_aborts() {
        let s = setup();
        let mut l = receive_loop(&s, Arc::new(Recorder::default()), 1000);
        l.config.scratch_dir = s.dir.path().join("does/not/exist");
        assert_eq!(l.run(), LoopExit::ScratchUnavailable);
    }

    #[test]
    fn unreachable_listener_closes_endpoint_once() {
        let s = setup();
        let closed = Arc::new(AtomicUsize::new(0));
        let counter = closed.clone();
        let handle = receive_loop(&s, Arc::new(Hangup), 1000)
            .on_listener_death(move || {
                counter.fetch_add(1, Ordering::SeqCst);
            })
            .spawn()
            .unwrap();
        s.engine
            .send(s.rx, &Bundle::new(s.dest.clone()).with_data(b"gone"))
            .unwrap();
        assert_eq!(handle.join(), LoopExit::ListenerUnreachable);
        assert_eq!(closed.load(Ordering::SeqCst), 1);
    }

    /// Counts engine waits so a spinning loop shows up.
    struct CountingEngine {
        inner: Arc<LoopbackEngine>,
        waits: AtomicUsize,
    }

    impl Engine for CountingEngine {
        fn register(&self, dtn_demux: &str, ipn_demux: i32) -> Result<RegistrationToken, StatusCode> {
            self.inner.register(dtn_demux, ipn_demux)
        }

        fn unregister(&self, token: RegistrationToken) -> Result<(), StatusCode> {
            self.inner.unregister(token)
        }

        fn send(&self, token: RegistrationToken, bundle: &Bundle) -> Result<(), StatusCode> {
            self.inner.send(token, bundle)
        }

        fn receive(
            &self,
            token: RegistrationToken,
            location: PayloadLocation,
            timeout: Duration,
        ) -> Result<Bundle, StatusCode> {
            self.inner.receive(token, location, timeout)
        }

        fn local_eid(&self, token: RegistrationToken) -> Option<String> {
            self.inner.local_eid(token)
        }

        fn wait_for_bundle(
            &self,
            token: RegistrationToken,
            threshold: usize,
            scratch: &Path,
            wait: Duration,
        ) -> Option<Bundle> {
            self.waits.fetch_add(1, Ordering::SeqCst);
            self.inner.wait_for_bundle(token, threshold, scratch, wait)
        }
    }

    #[test]
    fn zero_wait_does_not_spin() {
        let s = setup();
        let engine = Arc::new(CountingEngine {
            inner: s.engine.clone(),
            waits: AtomicUsize::new(0),
        });
        let l = ReceiveLoop::new(
            engine.clone(),
            s.engine.status_cell(),
            s.rx,
            Arc::new(Recorder::default()),
            ReceiverConfig {
                payload_threshold: 1000,
                scratch_dir: s.dir.path().to_path_buf(),
                wait: Duration::ZERO,
            },
        );
        assert_eq!(l.config.wait, MIN_LOOP_WAIT);
        let handle = l.spawn().unwrap();
        thread::sleep(Duration::from_millis(200));
        handle.interrupt();
        assert_eq!(handle.join(), LoopExit::Interrupted);
        let waits = engine.waits.load(Ordering::SeqCst);
        assert!(waits <= 40, "{} waits in 200ms", waits);
    }

    #[test]
    fn handle_reports_loop_thread() {
        let s = setup();
        let handle = receive_loop(&s, Arc::new(Recorder::default()), 1000)
            .spawn()
            .unwrap();
        assert_ne!(handle.thread_id(), thread::current().id());
        handle.interrupt();
        handle.join();
    }

    struct Hangup;

    impl BundleListener for Hangup {
        fn on_bundle_received(&self, _: Delivery) -> Result<(), ListenerError> {
            Err(ListenerError::Unreachable)
        }
        fn link_to_death(&self, _: DeathWatch) -> Result<(), ListenerError> {
            Ok(())
        }
    }

    struct Unwatchable;

    impl BundleListener for Unwatchable {
        fn on_bundle_received(&self, _: Delivery) -> Result<(), ListenerError> {
            Ok(())
        }
        fn link_to_death(&self, _: DeathWatch) -> Result<(), ListenerError> {
            Err(ListenerError::Unreachable)
        }
    }

    #[test]
    fn failed_death_link_aborts() {
        let s = setup();
        assert_eq!(
            receive_loop(&s, Arc::new(Unwatchable), 1000).run(),
            LoopExit::DeathLinkFailed
        );
    }
}
