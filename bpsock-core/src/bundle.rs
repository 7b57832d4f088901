//! Bundle envelope: addressing, class of service, extension blocks and payload.

use std::hash::{Hash, Hasher};
use std::time::SystemTime;

use serde::{Deserialize, Serialize};

use crate::eid::EndpointId;
use crate::error::DtnError;
use crate::options::{DeliveryOption, DeliveryOptions};
use crate::payload::Payload;
use crate::priority::Priority;
use crate::status_report::StatusReport;
use crate::timestamp::BundleTimestamp;

/// Default lifetime of a bundle in seconds.
pub const DEFAULT_EXPIRATION_SECS: i64 = 60;

/// Opaque extension block carried alongside the payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtensionBlock {
    pub block_type: u32,
    pub flags: u32,
    pub data: Vec<u8>,
}

/// Metadata block (RFC 6258 style).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetadataBlock {
    pub metadata_type: u32,
    pub flags: u32,
    pub data: Vec<u8>,
}

/// A bundle as sent or received through a socket.
///
/// Identity is `(source, creation_timestamp, fragment_offset, orig_length)`; two bundles with the
/// same identity compare equal regardless of payload.
#[derive(Debug, Clone)]
pub struct Bundle {
    pub source: Option<EndpointId>,
    pub destination: Option<EndpointId>,
    pub reply_to: Option<EndpointId>,
    pub priority: Priority,
    pub delivery_options: DeliveryOptions,
    /// Lifetime in seconds. Must be positive to send.
    pub expiration: i64,
    pub delivery_reg_id: u32,
    pub critical: bool,
    pub unreliable: bool,
    pub flow_label: u32,
    pub blocks: Vec<ExtensionBlock>,
    pub metadata: Vec<MetadataBlock>,
    pub fragment_offset: u32,
    pub orig_length: u32,
    pub creation_timestamp: BundleTimestamp,
    pub payload: Option<Payload>,
    status_report: Option<StatusReport>,
}

impl Default for Bundle {
    fn default() -> Self {
        Self {
            source: None,
            destination: None,
            reply_to: None,
            priority: Priority::default(),
            delivery_options: DeliveryOptions::default(),
            expiration: DEFAULT_EXPIRATION_SECS,
            delivery_reg_id: 0,
            critical: false,
            unreliable: false,
            flow_label: 0,
            blocks: Vec::new(),
            metadata: Vec::new(),
            fragment_offset: 0,
            orig_length: 0,
            creation_timestamp: BundleTimestamp::default(),
            payload: None,
            status_report: None,
        }
    }
}

impl Bundle {
    pub fn new(destination: EndpointId) -> Self {
        Self {
            destination: Some(destination),
            ..Self::default()
        }
    }

    pub fn with_payload(mut self, payload: Payload) -> Self {
        self.payload = Some(payload);
        self
    }

    /// Set an in-memory payload (copied).
    pub fn with_data(self, data: &[u8]) -> Self {
        self.with_payload(Payload::memory(data))
    }

    pub fn with_expiration(mut self, seconds: i64) -> Self {
        self.expiration = seconds;
        self
    }

    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_source(mut self, source: EndpointId) -> Self {
        self.source = Some(source);
        self
    }

    pub fn with_reply_to(mut self, reply_to: EndpointId) -> Self {
        self.reply_to = Some(reply_to);
        self
    }

    pub fn with_option(mut self, option: DeliveryOption) -> Self {
        self.delivery_options.insert(option);
        self
    }

    pub fn with_block(mut self, block: ExtensionBlock) -> Self {
        self.blocks.push(block);
        self
    }

    pub fn with_metadata(mut self, metadata: MetadataBlock) -> Self {
        self.metadata.push(metadata);
        self
    }

    pub fn status_report(&self) -> Option<&StatusReport> {
        self.status_report.as_ref()
    }

    /// Status report of this bundle, created on first access.
    pub fn status_report_mut(&mut self) -> &mut StatusReport {
        self.status_report.get_or_insert_with(StatusReport::default)
    }

    /// Payload bytes, if a payload is set.
    pub fn data(&self) -> Option<std::io::Result<&[u8]>> {
        self.payload.as_ref().map(Payload::data)
    }

    /// Replace the status report, e.g. when rebuilding a bundle an engine delivered.
    pub fn set_status_report(&mut self, report: Option<StatusReport>) {
        self.status_report = report;
    }

    /// Creation time as wall-clock time (DTN epoch based); `None` if out of range.
    pub fn creation_time(&self) -> Option<SystemTime> {
        self.creation_timestamp.to_system_time()
    }

    /// Checks run before handing a bundle to the engine.
    pub fn validate_for_send(&self) -> Result<(), DtnError> {
        if self.expiration <= 0 {
            return Err(DtnError::InvalidArgument(
                "the expiration can't be <= 0".into(),
            ));
        }
        match &self.destination {
            Some(dest) if !dest.to_string().is_empty() => {}
            _ => {
                return Err(DtnError::InvalidArgument(
                    "the destination can't be empty".into(),
                ))
            }
        }
        if self.payload.is_none() {
            return Err(DtnError::InvalidArgument(
                "the payload can't be empty".into(),
            ));
        }
        if self.delivery_options.requests_status_report() {
            match &self.reply_to {
                None => {
                    return Err(DtnError::IllegalState(
                        "status report options need a reply-to endpoint".into(),
                    ))
                }
                Some(r) if r.is_none_endpoint() => {
                    return Err(DtnError::IllegalState(
                        "status report options can't use dtn:none as reply-to".into(),
                    ))
                }
                Some(_) => {}
            }
        }
        Ok(())
    }
}

impl PartialEq for Bundle {
    fn eq(&self, other: &Self) -> bool {
        self.source == other.source
            && self.creation_timestamp == other.creation_timestamp
            && self.fragment_offset == other.fragment_offset
            && self.orig_length == other.orig_length
    }
}

impl Eq for Bundle {}

impl Hash for Bundle {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.source.hash(state);
        self.creation_timestamp.hash(state);
        self.fragment_offset.hash(state);
        self.orig_length.hash(state);
    }
}
