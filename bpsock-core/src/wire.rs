//! Framing for out-of-process listeners: length-prefix (4 bytes LE) + bincode `BundleFrame`.

use std::io;

use serde::{Deserialize, Serialize};

use crate::bundle::{Bundle, ExtensionBlock, MetadataBlock};
use crate::eid::EndpointId;
use crate::listener::Delivery;
use crate::options::DeliveryOptions;
use crate::payload::Payload;
use crate::priority::Priority;
use crate::status_report::StatusReport;
use crate::timestamp::BundleTimestamp;

const LEN_SIZE: usize = 4;
const MAX_FRAME_LEN: u32 = 16 * 1024 * 1024; // 16 MiB

/// A delivered bundle with its payload inlined.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BundleFrame {
    pub source: Option<EndpointId>,
    pub destination: Option<EndpointId>,
    pub reply_to: Option<EndpointId>,
    pub priority: Priority,
    pub delivery_options: DeliveryOptions,
    pub expiration: i64,
    pub delivery_reg_id: u32,
    pub critical: bool,
    pub unreliable: bool,
    pub flow_label: u32,
    pub creation_timestamp: BundleTimestamp,
    pub fragment_offset: u32,
    pub orig_length: u32,
    pub blocks: Vec<ExtensionBlock>,
    pub metadata: Vec<MetadataBlock>,
    pub status_report: Option<StatusReport>,
    pub payload: Vec<u8>,
}

impl BundleFrame {
    fn from_parts(bundle: &Bundle, payload: Vec<u8>) -> Self {
        Self {
            source: bundle.source.clone(),
            destination: bundle.destination.clone(),
            reply_to: bundle.reply_to.clone(),
            priority: bundle.priority,
            delivery_options: bundle.delivery_options,
            expiration: bundle.expiration,
            delivery_reg_id: bundle.delivery_reg_id,
            critical: bundle.critical,
            unreliable: bundle.unreliable,
            flow_label: bundle.flow_label,
            creation_timestamp: bundle.creation_timestamp,
            fragment_offset: bundle.fragment_offset,
            orig_length: bundle.orig_length,
            blocks: bundle.blocks.clone(),
            metadata: bundle.metadata.clone(),
            status_report: bundle.status_report().cloned(),
            payload,
        }
    }

    /// Frame a bundle, reading its payload (a temporary file payload is consumed).
    pub fn from_bundle(bundle: &Bundle) -> io::Result<Self> {
        let payload = match bundle.data() {
            Some(data) => data?.to_vec(),
            None => Vec::new(),
        };
        Ok(Self::from_parts(bundle, payload))
    }

    /// Frame a delivery; file deliveries are read through their handle.
    pub fn from_delivery(delivery: &mut Delivery) -> io::Result<Self> {
        let payload = delivery.read_payload()?;
        Ok(Self::from_parts(delivery.bundle(), payload))
    }

    pub fn into_bundle(self) -> Bundle {
        let mut bundle = Bundle::default();
        bundle.source = self.source;
        bundle.destination = self.destination;
        bundle.reply_to = self.reply_to;
        bundle.priority = self.priority;
        bundle.delivery_options = self.delivery_options;
        bundle.expiration = self.expiration;
        bundle.delivery_reg_id = self.delivery_reg_id;
        bundle.critical = self.critical;
        bundle.unreliable = self.unreliable;
        bundle.flow_label = self.flow_label;
        bundle.creation_timestamp = self.creation_timestamp;
        bundle.fragment_offset = self.fragment_offset;
        bundle.orig_length = self.orig_length;
        bundle.blocks = self.blocks;
        bundle.metadata = self.metadata;
        bundle.set_status_report(self.status_report);
        bundle.payload = Some(Payload::Memory(self.payload));
        bundle
    }
}

/// Encode a frame: 4 bytes LE length + bincode payload.
pub fn encode_frame(frame: &BundleFrame) -> Result<Vec<u8>, FrameEncodeError> {
    let payload = bincode::serialize(frame).map_err(FrameEncodeError::Encode)?;
    let len = u32::try_from(payload.len()).map_err(|_| FrameEncodeError::TooLarge)?;
    if len > MAX_FRAME_LEN {
        return Err(FrameEncodeError::TooLarge);
    }
    let mut out = Vec::with_capacity(LEN_SIZE + payload.len());
    out.extend_from_slice(&len.to_le_bytes());
    out.extend_from_slice(&payload);
    Ok(out)
}

/// Error encoding a frame (bincode or size limit).
#[derive(Debug, thiserror::Error)]
pub enum FrameEncodeError {
    #[error("encode error: {0}")]
    Encode(#[from] bincode::Error),
    #[error("frame too large")]
    TooLarge,
}

/// Decode one frame from the front of `bytes`. Returns the frame and the number of bytes consumed.
/// `NeedMore` means the buffer holds a partial frame; retry once more bytes arrived.
pub fn decode_frame(bytes: &[u8]) -> Result<(BundleFrame, usize), FrameDecodeError> {
    if bytes.len() < LEN_SIZE {
        return Err(FrameDecodeError::NeedMore);
    }
    let len = u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]) as usize;
    if len > MAX_FRAME_LEN as usize {
        return Err(FrameDecodeError::TooLarge);
    }
    if bytes.len() < LEN_SIZE + len {
        return Err(FrameDecodeError::NeedMore);
    }
    let frame: BundleFrame = bincode::deserialize(&bytes[LEN_SIZE..LEN_SIZE + len])
        .map_err(FrameDecodeError::Decode)?;
    Ok((frame, LEN_SIZE + len))
}

/// Error decoding a frame (need more bytes, too large, or bincode failure).
#[derive(Debug, thiserror::Error)]
pub enum FrameDecodeError {
    #[error("need more bytes")]
    NeedMore,
    #[error("frame too large")]
    TooLarge,
    #[error("decode error: {0}")]
    Decode(#[from] bincode::Error),
}
