//! Endpoint identifiers: `ipn:<node>.<service>` and `dtn:<name>[/<demux>]`.

use std::fmt;
use std::hash::{Hash, Hasher};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::DtnError;

/// Canonical form of the "no endpoint" identifier.
pub const NONE_ENDPOINT: &str = "dtn:none";

const IPN_SCHEME: &str = "ipn";
const DTN_SCHEME: &str = "dtn";

/// A bundle endpoint in one of the two naming schemes.
///
/// Equality and hashing go through the canonical string, so `Dtn { local: "//a", demux: Some("b") }`
/// and `Dtn { local: "//a/b", demux: None }` are the same endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum EndpointId {
    Ipn { node: u64, service: u64 },
    Dtn { local: String, demux: Option<String> },
}

impl EndpointId {
    /// Build an IPN endpoint. Negative numbers are rejected.
    pub fn ipn(node: i64, service: i64) -> Result<Self, DtnError> {
        if node < 0 || service < 0 {
            return Err(DtnError::InvalidArgument(format!(
                "ipn numbers must be non-negative, got {}.{}",
                node, service
            )));
        }
        Ok(EndpointId::Ipn {
            node: node as u64,
            service: service as u64,
        })
    }

    /// Build a DTN endpoint. `local` must be non-empty.
    pub fn dtn(local: &str, demux: Option<&str>) -> Result<Self, DtnError> {
        if local.is_empty() {
            return Err(DtnError::InvalidArgument(
                "dtn local name can't be empty".into(),
            ));
        }
        Ok(EndpointId::Dtn {
            local: local.to_string(),
            demux: demux.map(str::to_string),
        })
    }

    /// The `dtn:none` endpoint.
    pub fn none() -> Self {
        EndpointId::Dtn {
            local: "none".to_string(),
            demux: None,
        }
    }

    pub fn is_none_endpoint(&self) -> bool {
        self.to_string() == NONE_ENDPOINT
    }

    pub fn scheme(&self) -> &'static str {
        match self {
            EndpointId::Ipn { .. } => IPN_SCHEME,
            EndpointId::Dtn { .. } => DTN_SCHEME,
        }
    }

    /// Parse a string or URI. Returns `None` for malformed input or an unknown scheme.
    pub fn parse(s: &str) -> Option<Self> {
        let (scheme, ssp) = s.trim().split_once(':')?;
        match scheme.to_ascii_lowercase().as_str() {
            IPN_SCHEME => {
                let (node, service) = ssp.split_once('.')?;
                Some(EndpointId::Ipn {
                    node: parse_number(node)?,
                    service: parse_number(service)?,
                })
            }
            DTN_SCHEME => {
                let (local, demux) = split_dtn(ssp);
                if local.is_empty() {
                    return None;
                }
                Some(EndpointId::Dtn {
                    local: local.to_string(),
                    demux: demux.map(str::to_string),
                })
            }
            _ => None,
        }
    }
}

fn parse_number(s: &str) -> Option<u64> {
    if s.is_empty() || !s.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    s.parse().ok()
}

/// Split a dtn scheme-specific part into local name and demux.
/// `//node/app/x` keeps the authority in the local name: (`//node`, `app/x`).
fn split_dtn(ssp: &str) -> (&str, Option<&str>) {
    let search_from = if ssp.starts_with("//") { 2 } else { 0 };
    match ssp[search_from..].find('/') {
        Some(i) => {
            let at = search_from + i;
            (&ssp[..at], Some(&ssp[at + 1..]))
        }
        None => (ssp, None),
    }
}

impl fmt::Display for EndpointId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EndpointId::Ipn { node, service } => write!(f, "ipn:{}.{}", node, service),
            EndpointId::Dtn { local, demux: None } => write!(f, "dtn:{}", local),
            EndpointId::Dtn {
                local,
                demux: Some(d),
            } => write!(f, "dtn:{}/{}", local, d),
        }
    }
}

impl FromStr for EndpointId {
    type Err = DtnError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        EndpointId::parse(s)
            .ok_or_else(|| DtnError::InvalidArgument(format!("not an endpoint id: {:?}", s)))
    }
}

impl TryFrom<String> for EndpointId {
    type Error = DtnError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<EndpointId> for String {
    fn from(eid: EndpointId) -> Self {
        eid.to_string()
    }
}

impl PartialEq for EndpointId {
    fn eq(&self, other: &Self) -> bool {
        self.to_string() == other.to_string()
    }
}

impl Eq for EndpointId {}

impl Hash for EndpointId {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.to_string().hash(state);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ipn_canonical_form() {
        let eid = EndpointId::ipn(1, 20).unwrap();
        assert_eq!(eid.to_string(), "ipn:1.20");
        assert_eq!(eid.scheme(), "ipn");
    }

    #[test]
    fn negative_ipn_rejected() {
        assert!(matches!(
            EndpointId::ipn(-1, 0),
            Err(DtnError::InvalidArgument(_))
        ));
        assert!(matches!(
            EndpointId::ipn(3, -7),
            Err(DtnError::InvalidArgument(_))
        ));
    }

    #[test]
    fn empty_dtn_local_rejected() {
        assert!(matches!(
            EndpointId::dtn("", Some("app")),
            Err(DtnError::InvalidArgument(_))
        ));
    }

    #[test]
    fn roundtrip_through_canonical_string() {
        let samples = [
            EndpointId::ipn(0, 0).unwrap(),
            EndpointId::ipn(268484800, 64).unwrap(),
            EndpointId::dtn("//node", Some("app")).unwrap(),
            EndpointId::dtn("//node", None).unwrap(),
            EndpointId::dtn("//node", Some("")).unwrap(),
            EndpointId::dtn("local", Some("a/b")).unwrap(),
            EndpointId::none(),
        ];
        for eid in samples {
            let parsed = EndpointId::parse(&eid.to_string()).unwrap();
            assert_eq!(parsed, eid);
            assert_eq!(parsed.to_string(), eid.to_string());
        }
    }

    #[test]
    fn none_endpoint() {
        let none = EndpointId::parse(NONE_ENDPOINT).unwrap();
        assert!(none.is_none_endpoint());
        assert_eq!(none, EndpointId::none());
        assert!(!EndpointId::ipn(1, 1).unwrap().is_none_endpoint());
    }

    #[test]
    fn malformed_input_is_none() {
        for s in [
            "", "ipn", "ipn:", "ipn:1", "ipn:a.b", "ipn:-1.2", "ipn:1.2.3", "dtn:", "dtn:/x",
            "http://x", "nocolon",
        ] {
            assert!(EndpointId::parse(s).is_none(), "{:?} should not parse", s);
        }
        assert!("ftp:foo".parse::<EndpointId>().is_err());
    }

    #[test]
    fn equality_is_by_canonical_form() {
        let a = EndpointId::dtn("//a", Some("b")).unwrap();
        let b = EndpointId::dtn("//a/b", None).unwrap();
        assert_eq!(a, b);
        let mut set = std::collections::HashSet::new();
        set.insert(a);
        assert!(set.contains(&b));
    }
}
