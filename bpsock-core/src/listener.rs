//! Listener contract for receive loops, plus a listener that forwards frames over a byte stream.

use std::fs::File;
use std::io::{self, Read, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use crate::bundle::Bundle;
use crate::wire::{encode_frame, BundleFrame, FrameEncodeError};

/// A bundle handed to a listener.
#[derive(Debug)]
pub enum Delivery {
    /// Payload carried in the bundle.
    InMemory(Bundle),
    /// Payload left in the loop's scratch file. `file` is open for reading from the start and
    /// is only valid during the callback: the loop truncates the file afterwards.
    File { bundle: Bundle, file: File },
}

impl Delivery {
    pub fn bundle(&self) -> &Bundle {
        match self {
            Delivery::InMemory(bundle) | Delivery::File { bundle, .. } => bundle,
        }
    }

    /// Read the whole payload, from the scratch file handle when there is one.
    pub fn read_payload(&mut self) -> io::Result<Vec<u8>> {
        match self {
            Delivery::InMemory(bundle) => match bundle.data() {
                Some(data) => Ok(data?.to_vec()),
                None => Ok(Vec::new()),
            },
            Delivery::File { file, .. } => {
                let mut out = Vec::new();
                file.read_to_end(&mut out)?;
                Ok(out)
            }
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ListenerError {
    #[error("listener is unreachable")]
    Unreachable,
    #[error("listener I/O error: {0}")]
    Io(#[from] io::Error),
}

impl From<FrameEncodeError> for ListenerError {
    fn from(e: FrameEncodeError) -> Self {
        ListenerError::Io(io::Error::new(io::ErrorKind::InvalidData, e))
    }
}

/// Flag tripped once the listener it was linked to has gone away.
#[derive(Debug, Clone, Default)]
pub struct DeathWatch(Arc<AtomicBool>);

impl DeathWatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn trip(&self) {
        self.0.store(true, Ordering::Release);
    }

    pub fn is_tripped(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

/// Consumer of bundles pulled by a receive loop.
pub trait BundleListener: Send + Sync {
    fn on_bundle_received(&self, delivery: Delivery) -> Result<(), ListenerError>;

    /// Keep `watch` and trip it when this listener dies. An error aborts the loop before it starts.
    fn link_to_death(&self, watch: DeathWatch) -> Result<(), ListenerError>;
}

/// Listener living on the far side of a byte stream (pipe, socket). Each delivery is written as
/// one length-prefixed frame; a broken stream marks the listener dead.
pub struct StreamListener<W: Write + Send> {
    sink: Mutex<W>,
    watches: Mutex<Vec<DeathWatch>>,
}

impl<W: Write + Send> StreamListener<W> {
    pub fn new(sink: W) -> Self {
        Self {
            sink: Mutex::new(sink),
            watches: Mutex::new(Vec::new()),
        }
    }

    /// The peer hung up: trip every linked watch.
    pub fn peer_lost(&self) {
        let watches = self.watches.lock().unwrap_or_else(|e| e.into_inner());
        for watch in watches.iter() {
            watch.trip();
        }
    }

    pub fn into_inner(self) -> W {
        self.sink.into_inner().unwrap_or_else(|e| e.into_inner())
    }
}

fn is_disconnect(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::BrokenPipe | io::ErrorKind::ConnectionReset | io::ErrorKind::NotConnected
    )
}

impl<W: Write + Send> BundleListener for StreamListener<W> {
    fn on_bundle_received(&self, mut delivery: Delivery) -> Result<(), ListenerError> {
        let frame = encode_frame(&BundleFrame::from_delivery(&mut delivery)?)?;
        let mut sink = self.sink.lock().unwrap_or_else(|e| e.into_inner());
        match sink.write_all(&frame).and_then(|_| sink.flush()) {
            Ok(()) => Ok(()),
            Err(e) if is_disconnect(&e) => {
                drop(sink);
                self.peer_lost();
                Err(ListenerError::Unreachable)
            }
            Err(e) => Err(e.into()),
        }
    }

    fn link_to_death(&self, watch: DeathWatch) -> Result<(), ListenerError> {
        self.watches
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(watch);
        Ok(())
    }
}
