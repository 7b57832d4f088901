//! Bundle priority: cardinal class plus an ordinal for expedited traffic.

use serde::{Deserialize, Serialize};

use crate::error::DtnError;

/// Cardinal class of service. `Reserved` exists on the wire but is never a legal priority.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Cardinal {
    Bulk = 0,
    Normal = 1,
    Expedited = 2,
    Reserved = 3,
}

impl Cardinal {
    pub fn value(self) -> u8 {
        self as u8
    }

    pub fn from_value(v: u8) -> Option<Self> {
        match v {
            0 => Some(Cardinal::Bulk),
            1 => Some(Cardinal::Normal),
            2 => Some(Cardinal::Expedited),
            3 => Some(Cardinal::Reserved),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "RawPriority")]
pub struct Priority {
    cardinal: Cardinal,
    ordinal: u8,
}

/// Unchecked shape used when decoding, so decoded priorities go through `Priority::new`.
#[derive(Deserialize)]
struct RawPriority {
    cardinal: Cardinal,
    ordinal: u8,
}

impl TryFrom<RawPriority> for Priority {
    type Error = DtnError;

    fn try_from(raw: RawPriority) -> Result<Self, Self::Error> {
        Priority::new(raw.cardinal, raw.ordinal)
    }
}

impl Priority {
    /// Validated constructor: ordinal must be 0 unless cardinal is `Expedited`; `Reserved` is rejected.
    pub fn new(cardinal: Cardinal, ordinal: u8) -> Result<Self, DtnError> {
        if cardinal == Cardinal::Reserved {
            return Err(DtnError::InvalidArgument(
                "reserved is not a valid priority".into(),
            ));
        }
        if ordinal != 0 && cardinal != Cardinal::Expedited {
            return Err(DtnError::InvalidArgument(format!(
                "ordinal {} only allowed with expedited priority",
                ordinal
            )));
        }
        Ok(Self { cardinal, ordinal })
    }

    pub const fn bulk() -> Self {
        Self {
            cardinal: Cardinal::Bulk,
            ordinal: 0,
        }
    }

    pub const fn normal() -> Self {
        Self {
            cardinal: Cardinal::Normal,
            ordinal: 0,
        }
    }

    pub fn expedited(ordinal: u8) -> Self {
        Self {
            cardinal: Cardinal::Expedited,
            ordinal,
        }
    }

    /// Rebuild from engine-provided raw values.
    pub fn from_raw(cardinal: u8, ordinal: u8) -> Result<Self, DtnError> {
        let c = Cardinal::from_value(cardinal).ok_or_else(|| {
            DtnError::InvalidArgument(format!("unknown priority class {}", cardinal))
        })?;
        Self::new(c, ordinal)
    }

    pub fn cardinal(&self) -> Cardinal {
        self.cardinal
    }

    pub fn ordinal(&self) -> u8 {
        self.ordinal
    }
}

impl Default for Priority {
    fn default() -> Self {
        Self::bulk()
    }
}
