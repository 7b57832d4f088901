//! In-process engine: registrations, per-endpoint queues and payload spooling, all in one process.
//! Bundles addressed to an endpoint nobody has registered yet are kept until they expire.

use std::collections::{HashMap, HashSet, VecDeque};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Condvar, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use tracing::{debug, warn};

use crate::bundle::Bundle;
use crate::eid::EndpointId;
use crate::engine::{Engine, EngineStatus, RegistrationToken, StatusCell};
use crate::error::StatusCode;
use crate::payload::{Payload, PayloadLocation};
use crate::timestamp::BundleTimestamp;

struct Queued {
    bundle: Bundle,
    expires_at: Instant,
}

struct Registration {
    eid: EndpointId,
}

#[derive(Default)]
struct State {
    next_token: RegistrationToken,
    sequence: u64,
    registrations: HashMap<RegistrationToken, Registration>,
    queues: HashMap<String, VecDeque<Queued>>,
    interrupted: HashSet<RegistrationToken>,
}

pub struct LoopbackEngine {
    node: u64,
    dtn_name: String,
    spool_dir: PathBuf,
    status: StatusCell,
    state: Mutex<State>,
    arrivals: Condvar,
}

impl LoopbackEngine {
    /// New engine for IPN node `node`, spooling file payloads into `spool_dir`. Starts stopped.
    pub fn new(node: u64, spool_dir: impl Into<PathBuf>) -> Self {
        Self {
            node,
            dtn_name: format!("//node{}", node),
            spool_dir: spool_dir.into(),
            status: StatusCell::default(),
            state: Mutex::new(State {
                next_token: 1,
                ..State::default()
            }),
            arrivals: Condvar::new(),
        }
    }

    /// Same engine with a shared status cell, e.g. one the host already hands to receive loops.
    pub fn with_status_cell(mut self, status: StatusCell) -> Self {
        self.status = status;
        self
    }

    pub fn status_cell(&self) -> StatusCell {
        self.status.clone()
    }

    pub fn start(&self) {
        self.status.set(EngineStatus::Started);
        debug!(node = self.node, "loopback engine started");
    }

    /// Stop the engine; blocked receivers wake up with `ReceptionInterrupted`.
    pub fn stop(&self) {
        self.status.set(EngineStatus::Stopping);
        self.arrivals.notify_all();
        self.status.set(EngineStatus::Stopped);
        debug!(node = self.node, "loopback engine stopped");
    }

    /// Wake a receiver blocked on `token`; its pending receive returns `ReceptionInterrupted`.
    pub fn interrupt(&self, token: RegistrationToken) {
        let mut state = self.lock();
        if state.registrations.contains_key(&token) {
            state.interrupted.insert(token);
        }
        drop(state);
        self.arrivals.notify_all();
    }

    /// Number of unexpired bundles waiting for `eid`.
    pub fn pending(&self, eid: &EndpointId) -> usize {
        let now = Instant::now();
        self.lock()
            .queues
            .get(&eid.to_string())
            .map(|q| q.iter().filter(|e| e.expires_at > now).count())
            .unwrap_or(0)
    }

    /// Number of destinations with queued bundles, expired ones included until the next send.
    pub fn queued_destinations(&self) -> usize {
        self.lock().queues.len()
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn local_endpoint(&self, dtn_demux: &str, ipn_demux: i32) -> Option<EndpointId> {
        if ipn_demux > 0 {
            return EndpointId::ipn(self.node as i64, ipn_demux as i64).ok();
        }
        if dtn_demux.is_empty() {
            return None;
        }
        EndpointId::dtn(&self.dtn_name, Some(dtn_demux)).ok()
    }

    /// Block until a bundle for `token` is available or `timeout` elapses.
    fn take(&self, token: RegistrationToken, timeout: Duration) -> Result<Bundle, StatusCode> {
        let deadline = Instant::now() + timeout;
        let mut state = self.lock();
        loop {
            if !self.status.is_started() {
                return Err(StatusCode::ReceptionInterrupted);
            }
            let key = match state.registrations.get(&token) {
                Some(reg) => reg.eid.to_string(),
                None => return Err(StatusCode::NotRegistered),
            };
            if state.interrupted.remove(&token) {
                return Err(StatusCode::ReceptionInterrupted);
            }
            let now = Instant::now();
            if let Some(queue) = state.queues.get_mut(&key) {
                while let Some(entry) = queue.pop_front() {
                    if entry.expires_at > now {
                        return Ok(entry.bundle);
                    }
                    debug!(eid = %key, "dropping expired bundle");
                }
            }
            if now >= deadline {
                return Err(StatusCode::Timeout);
            }
            let (guard, _) = self
                .arrivals
                .wait_timeout(state, deadline - now)
                .unwrap_or_else(|e| e.into_inner());
            state = guard;
        }
    }

    fn spool(&self, data: &[u8]) -> std::io::Result<PathBuf> {
        fs::create_dir_all(&self.spool_dir)?;
        let path = self
            .spool_dir
            .join(format!("bundle-{}.payload", uuid::Uuid::new_v4()));
        fs::write(&path, data)?;
        Ok(path)
    }

    fn place_payload(&self, bundle: &mut Bundle, location: PayloadLocation) -> Result<(), StatusCode> {
        let data = match &bundle.payload {
            Some(Payload::Memory(bytes)) => bytes.clone(),
            _ => return Err(StatusCode::Receive),
        };
        let payload = match location {
            PayloadLocation::Memory => Payload::Memory(data),
            PayloadLocation::File | PayloadLocation::TemporaryFile => {
                let path = self.spool(&data).map_err(|e| {
                    warn!(error = %e, "could not spool payload");
                    StatusCode::Receive
                })?;
                if location == PayloadLocation::File {
                    Payload::file(path).map_err(|_| StatusCode::Receive)?
                } else {
                    Payload::temporary_file(path).map_err(|_| StatusCode::Receive)?
                }
            }
        };
        bundle.payload = Some(payload);
        Ok(())
    }
}

impl Engine for LoopbackEngine {
    fn register(&self, dtn_demux: &str, ipn_demux: i32) -> Result<RegistrationToken, StatusCode> {
        if !self.status.is_started() {
            return Err(StatusCode::Init);
        }
        if ipn_demux < 0 {
            return Err(StatusCode::IpnParameters);
        }
        let eid = self
            .local_endpoint(dtn_demux, ipn_demux)
            .ok_or(StatusCode::LocalEid)?;
        let mut state = self.lock();
        if state.registrations.values().any(|r| r.eid == eid) {
            return Err(StatusCode::Register);
        }
        let token = state.next_token;
        state.next_token += 1;
        debug!(token, eid = %eid, "registered");
        state.registrations.insert(
            token,
            Registration { eid },
        );
        Ok(token)
    }

    fn unregister(&self, token: RegistrationToken) -> Result<(), StatusCode> {
        let mut state = self.lock();
        let reg = state
            .registrations
            .remove(&token)
            .ok_or(StatusCode::NotRegistered)?;
        state.interrupted.remove(&token);
        drop(state);
        debug!(token, eid = %reg.eid, "unregistered");
        self.arrivals.notify_all();
        Ok(())
    }

    fn send(&self, token: RegistrationToken, bundle: &Bundle) -> Result<(), StatusCode> {
        if !self.status.is_started() {
            return Err(StatusCode::Send);
        }
        let destination = bundle.destination.as_ref().ok_or(StatusCode::NoReceiver)?;
        let data = match &bundle.payload {
            Some(p) => p.data().map_err(|e| {
                warn!(error = %e, "could not read payload for sending");
                StatusCode::Send
            })?,
            None => return Err(StatusCode::NullPointer),
        };
        let expiration = u64::try_from(bundle.expiration).map_err(|_| StatusCode::Send)?;
        let mut state = self.lock();
        if !state.registrations.contains_key(&token) {
            return Err(StatusCode::NotRegistered);
        }
        let sequence = state.sequence;
        state.sequence += 1;
        let now = Instant::now();
        state.queues.retain(|_, queue| {
            queue.retain(|entry| entry.expires_at > now);
            !queue.is_empty()
        });
        let mut copy = bundle.clone();
        copy.payload = Some(Payload::Memory(data.to_vec()));
        copy.creation_timestamp = BundleTimestamp::now(sequence);
        copy.orig_length = data.len() as u32;
        state
            .queues
            .entry(destination.to_string())
            .or_default()
            .push_back(Queued {
                bundle: copy,
                expires_at: now + Duration::from_secs(expiration),
            });
        drop(state);
        self.arrivals.notify_all();
        Ok(())
    }

    fn receive(
        &self,
        token: RegistrationToken,
        location: PayloadLocation,
        timeout: Duration,
    ) -> Result<Bundle, StatusCode> {
        let mut bundle = self.take(token, timeout)?;
        self.place_payload(&mut bundle, location)?;
        Ok(bundle)
    }

    fn local_eid(&self, token: RegistrationToken) -> Option<String> {
        self.lock()
            .registrations
            .get(&token)
            .map(|r| r.eid.to_string())
    }

    fn wait_for_bundle(
        &self,
        token: RegistrationToken,
        size_threshold: usize,
        scratch: &Path,
        wait: Duration,
    ) -> Option<Bundle> {
        let mut bundle = self.take(token, wait).ok()?;
        let data = match &bundle.payload {
            Some(Payload::Memory(bytes)) => bytes.clone(),
            _ => return None,
        };
        if data.len() >= size_threshold {
            if let Err(e) = fs::write(scratch, &data) {
                warn!(error = %e, path = %scratch.display(), "could not write scratch file");
                return None;
            }
            bundle.payload = Some(Payload::file(scratch).ok()?);
        }
        Some(bundle)
    }
}
