//! Bundle Protocol client transport.
//! Endpoint ids, bundles and payloads; sockets and listener receive loops over an engine the host
//! provides (in-process `LoopbackEngine`, or a native one through `ffi`).

pub mod bundle;
pub mod config;
pub mod eid;
pub mod endpoint;
pub mod engine;
pub mod error;
pub mod ffi;
pub mod listener;
pub mod loopback;
pub mod options;
pub mod payload;
pub mod priority;
pub mod receiver;
pub mod socket;
pub mod status_report;
pub mod timestamp;
pub mod wire;

pub use bundle::{Bundle, ExtensionBlock, MetadataBlock, DEFAULT_EXPIRATION_SECS};
pub use config::{ClientConfig, ConfigError};
pub use eid::{EndpointId, NONE_ENDPOINT};
pub use endpoint::{Endpoint, EndpointService};
pub use engine::{Engine, EngineStatus, RegistrationToken, StatusCell};
pub use error::{DtnError, Result, StatusCode};
pub use listener::{BundleListener, DeathWatch, Delivery, ListenerError, StreamListener};
pub use loopback::LoopbackEngine;
pub use options::{DeliveryOption, DeliveryOptions};
pub use payload::{Payload, PayloadLocation};
pub use priority::{Cardinal, Priority};
pub use receiver::{LoopExit, ReceiveLoop, ReceiverConfig, ReceiverHandle};
pub use socket::BundleSocket;
pub use status_report::{StatusReport, StatusReportFlag, StatusReportFlags, StatusReportReason};
pub use timestamp::BundleTimestamp;
pub use wire::{decode_frame, encode_frame, BundleFrame, FrameDecodeError, FrameEncodeError};
