//! Engine boundary: the primitives the bundle protocol engine provides, and its lifecycle status.

use std::path::Path;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::bundle::Bundle;
use crate::error::StatusCode;
use crate::payload::PayloadLocation;

/// Opaque registration handle issued by the engine.
pub type RegistrationToken = i64;

/// Engine primitives. Implementations translate native outcomes into `StatusCode`;
/// sockets and receive loops turn those into `DtnError`s.
pub trait Engine: Send + Sync {
    /// Bind a local endpoint. Either demux may be empty/zero when its scheme is unused.
    fn register(&self, dtn_demux: &str, ipn_demux: i32) -> Result<RegistrationToken, StatusCode>;

    fn unregister(&self, token: RegistrationToken) -> Result<(), StatusCode>;

    /// Send a bundle that already passed validation and carries a source.
    fn send(&self, token: RegistrationToken, bundle: &Bundle) -> Result<(), StatusCode>;

    /// Wait up to `timeout` for one bundle; a zero timeout polls once.
    fn receive(
        &self,
        token: RegistrationToken,
        location: PayloadLocation,
        timeout: Duration,
    ) -> Result<Bundle, StatusCode>;

    fn local_eid(&self, token: RegistrationToken) -> Option<String>;

    /// Bounded wait used by receive loops. Payloads of at least `size_threshold` bytes are written
    /// to `scratch` and returned as a file payload over it; smaller ones come back in memory.
    /// `None` means nothing arrived (or the wait failed).
    fn wait_for_bundle(
        &self,
        token: RegistrationToken,
        size_threshold: usize,
        scratch: &Path,
        wait: Duration,
    ) -> Option<Bundle>;
}

/// Global lifecycle state of the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum EngineStatus {
    Stopped = 0,
    Starting = 1,
    Started = 2,
    Stopping = 3,
}

impl EngineStatus {
    pub fn from_value(v: u8) -> Option<Self> {
        match v {
            0 => Some(EngineStatus::Stopped),
            1 => Some(EngineStatus::Starting),
            2 => Some(EngineStatus::Started),
            3 => Some(EngineStatus::Stopping),
            _ => None,
        }
    }
}

/// Shared engine status, set by whoever drives the engine lifecycle and read by receive loops.
#[derive(Debug, Clone)]
pub struct StatusCell(Arc<AtomicU8>);

impl StatusCell {
    pub fn new(initial: EngineStatus) -> Self {
        Self(Arc::new(AtomicU8::new(initial as u8)))
    }

    pub fn get(&self) -> EngineStatus {
        EngineStatus::from_value(self.0.load(Ordering::Acquire)).unwrap_or(EngineStatus::Stopped)
    }

    pub fn set(&self, status: EngineStatus) {
        self.0.store(status as u8, Ordering::Release);
    }

    pub fn is_started(&self) -> bool {
        self.get() == EngineStatus::Started
    }
}

impl Default for StatusCell {
    fn default() -> Self {
        Self::new(EngineStatus::Stopped)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_cell_is_shared() {
        let cell = StatusCell::default();
        let other = cell.clone();
        assert!(!cell.is_started());
        other.set(EngineStatus::Started);
        assert!(cell.is_started());
        other.set(EngineStatus::Stopping);
        assert_eq!(cell.get(), EngineStatus::Stopping);
    }

    #[test]
    fn status_values() {
        for s in [
            EngineStatus::Stopped,
            EngineStatus::Starting,
            EngineStatus::Started,
            EngineStatus::Stopping,
        ] {
            assert_eq!(EngineStatus::from_value(s as u8), Some(s));
        }
        assert!(EngineStatus::from_value(7).is_none());
    }
}
