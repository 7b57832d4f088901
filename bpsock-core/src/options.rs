//! Delivery options: the processing flags a sender requests for a bundle.

use std::fmt;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum DeliveryOption {
    None,
    Custody,
    DeliveryReceipt,
    ReceiveReceipt,
    ForwardReceipt,
    CustodyReceipt,
    DeleteReceipt,
    SingletonDestination,
    MultinodeDestination,
    DoNotFragment,
}

impl DeliveryOption {
    pub const ALL: [DeliveryOption; 10] = [
        DeliveryOption::None,
        DeliveryOption::Custody,
        DeliveryOption::DeliveryReceipt,
        DeliveryOption::ReceiveReceipt,
        DeliveryOption::ForwardReceipt,
        DeliveryOption::CustodyReceipt,
        DeliveryOption::DeleteReceipt,
        DeliveryOption::SingletonDestination,
        DeliveryOption::MultinodeDestination,
        DeliveryOption::DoNotFragment,
    ];

    /// Bit value used by the engine. `None` is zero.
    pub fn bit(self) -> u32 {
        match self {
            DeliveryOption::None => 0,
            DeliveryOption::Custody => 1 << 0,
            DeliveryOption::DeliveryReceipt => 1 << 1,
            DeliveryOption::ReceiveReceipt => 1 << 2,
            DeliveryOption::ForwardReceipt => 1 << 3,
            DeliveryOption::CustodyReceipt => 1 << 4,
            DeliveryOption::DeleteReceipt => 1 << 5,
            DeliveryOption::SingletonDestination => 1 << 6,
            DeliveryOption::MultinodeDestination => 1 << 7,
            DeliveryOption::DoNotFragment => 1 << 8,
        }
    }

    /// Options that ask the network to send status reports back to `reply_to`.
    pub fn requests_status_report(self) -> bool {
        matches!(
            self,
            DeliveryOption::DeliveryReceipt
                | DeliveryOption::ReceiveReceipt
                | DeliveryOption::ForwardReceipt
                | DeliveryOption::CustodyReceipt
                | DeliveryOption::DeleteReceipt
        )
    }
}

/// Set of delivery options backed by the engine bitmask.
/// `None` is the empty set: it is contained exactly when no other option is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct DeliveryOptions(u32);

impl DeliveryOptions {
    const MASK: u32 = (1 << 9) - 1;

    pub fn new() -> Self {
        Self(0)
    }

    /// Decode an engine bitmask; bits outside the defined options are ignored.
    pub fn decode(value: u32) -> Self {
        let mut out = Self::new();
        for opt in DeliveryOption::ALL {
            if opt.bit() != 0 && value & opt.bit() != 0 {
                out.insert(opt);
            }
        }
        out
    }

    pub fn encode(&self) -> u32 {
        self.iter().map(DeliveryOption::bit).sum()
    }

    /// Inserting `None` clears the set.
    pub fn insert(&mut self, opt: DeliveryOption) {
        match opt {
            DeliveryOption::None => self.0 = 0,
            other => self.0 |= other.bit(),
        }
    }

    pub fn remove(&mut self, opt: DeliveryOption) -> bool {
        let had = self.contains(opt);
        self.0 &= !opt.bit();
        had && opt != DeliveryOption::None
    }

    pub fn contains(&self, opt: DeliveryOption) -> bool {
        match opt {
            DeliveryOption::None => self.0 & Self::MASK == 0,
            other => self.0 & other.bit() != 0,
        }
    }

    pub fn clear(&mut self) {
        self.0 = 0;
    }

    pub fn iter(&self) -> impl Iterator<Item = DeliveryOption> + '_ {
        DeliveryOption::ALL
            .into_iter()
            .filter(move |opt| self.contains(*opt))
    }

    pub fn requests_status_report(&self) -> bool {
        self.iter().any(DeliveryOption::requests_status_report)
    }
}

impl FromIterator<DeliveryOption> for DeliveryOptions {
    fn from_iter<I: IntoIterator<Item = DeliveryOption>>(iter: I) -> Self {
        let mut out = Self::new();
        for opt in iter {
            out.insert(opt);
        }
        out
    }
}

impl fmt::Display for DeliveryOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<String> = self.iter().map(|o| format!("{:?}", o)).collect();
        write!(f, "[{}]", names.join(", "))
    }
}
