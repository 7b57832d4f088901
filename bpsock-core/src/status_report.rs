//! Status reports: delivery outcomes reported back for a bundle instead of payload.

use serde::{Deserialize, Serialize};

use crate::eid::EndpointId;
use crate::timestamp::BundleTimestamp;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum StatusReportReason {
    #[default]
    NoInfo,
    LifetimeExpired,
    UnidirectionalForward,
    Cancelled,
    StorageDepleted,
    UnintelligibleEndpoint,
    NoRoute,
    NoTimelyContact,
    UnintelligibleBlock,
}

impl StatusReportReason {
    pub fn from_code(code: u32) -> Option<Self> {
        use StatusReportReason::*;
        Some(match code {
            0 => NoInfo,
            1 => LifetimeExpired,
            2 => UnidirectionalForward,
            3 => Cancelled,
            4 => StorageDepleted,
            5 => UnintelligibleEndpoint,
            6 => NoRoute,
            7 => NoTimelyContact,
            8 => UnintelligibleBlock,
            _ => return None,
        })
    }

    pub fn code(self) -> u32 {
        self as u32
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StatusReportFlag {
    Received,
    CustodyAccepted,
    Forwarded,
    Delivered,
    Deleted,
    AckedByApp,
}

impl StatusReportFlag {
    pub const ALL: [StatusReportFlag; 6] = [
        StatusReportFlag::Received,
        StatusReportFlag::CustodyAccepted,
        StatusReportFlag::Forwarded,
        StatusReportFlag::Delivered,
        StatusReportFlag::Deleted,
        StatusReportFlag::AckedByApp,
    ];

    pub fn bit(self) -> u32 {
        1 << (self as u32)
    }
}

/// Outcome flags carried by a status report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct StatusReportFlags(u32);

impl StatusReportFlags {
    pub fn decode(value: u32) -> Self {
        let mut out = Self::default();
        for flag in StatusReportFlag::ALL {
            if value & flag.bit() != 0 {
                out.insert(flag);
            }
        }
        out
    }

    pub fn encode(&self) -> u32 {
        self.0
    }

    pub fn insert(&mut self, flag: StatusReportFlag) {
        self.0 |= flag.bit();
    }

    pub fn contains(&self, flag: StatusReportFlag) -> bool {
        self.0 & flag.bit() != 0
    }

    pub fn is_empty(&self) -> bool {
        self.0 == 0
    }

    pub fn iter(&self) -> impl Iterator<Item = StatusReportFlag> + '_ {
        StatusReportFlag::ALL
            .into_iter()
            .filter(move |f| self.contains(*f))
    }
}

/// Report about a previously sent bundle, identified by its source and creation timestamp.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct StatusReport {
    pub source: Option<EndpointId>,
    pub creation_timestamp: Option<BundleTimestamp>,
    pub fragment_offset: u32,
    pub orig_length: u32,
    pub reason: StatusReportReason,
    pub flags: StatusReportFlags,
    pub receipt_timestamp: Option<BundleTimestamp>,
    pub custody_timestamp: Option<BundleTimestamp>,
    pub forwarding_timestamp: Option<BundleTimestamp>,
    pub delivery_timestamp: Option<BundleTimestamp>,
    pub deletion_timestamp: Option<BundleTimestamp>,
    pub ack_by_app_timestamp: Option<BundleTimestamp>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reason_codes() {
        for code in 0..9 {
            let reason = StatusReportReason::from_code(code).unwrap();
            assert_eq!(reason.code(), code);
        }
        assert!(StatusReportReason::from_code(9).is_none());
    }

    #[test]
    fn flags_decode() {
        let flags = StatusReportFlags::decode(0b10_1001);
        let got: Vec<_> = flags.iter().collect();
        assert_eq!(
            got,
            vec![
                StatusReportFlag::Received,
                StatusReportFlag::Delivered,
                StatusReportFlag::AckedByApp
            ]
        );
        assert_eq!(StatusReportFlags::decode(1 << 12), StatusReportFlags::default());
    }
}
