//! Error taxonomy: engine status codes and the typed failures they map to.

use std::io;

/// Crate result type.
pub type Result<T> = std::result::Result<T, DtnError>;

/// Outcome of an engine primitive. `Success` is never carried in an `Err`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StatusCode {
    Success,
    NullPointer,
    Init,
    Open,
    LocalEid,
    Register,
    Close,
    Unregister,
    NotRegistered,
    Send,
    Receive,
    ReceptionInterrupted,
    Timeout,
    NoReceiver,
    DtnParameters,
    IpnParameters,
    NoImplementation,
    Other(i32),
}

impl StatusCode {
    pub fn from_raw(code: i32) -> Self {
        use StatusCode::*;
        match code {
            0 => Success,
            1 => NullPointer,
            2 => Init,
            3 => Open,
            4 => LocalEid,
            5 => Register,
            6 => Close,
            7 => Unregister,
            8 => NotRegistered,
            9 => Send,
            10 => Receive,
            11 => ReceptionInterrupted,
            12 => Timeout,
            13 => NoReceiver,
            14 => DtnParameters,
            15 => IpnParameters,
            16 => NoImplementation,
            other => Other(other),
        }
    }

    pub fn raw(self) -> i32 {
        use StatusCode::*;
        match self {
            Success => 0,
            NullPointer => 1,
            Init => 2,
            Open => 3,
            LocalEid => 4,
            Register => 5,
            Close => 6,
            Unregister => 7,
            NotRegistered => 8,
            Send => 9,
            Receive => 10,
            ReceptionInterrupted => 11,
            Timeout => 12,
            NoReceiver => 13,
            DtnParameters => 14,
            IpnParameters => 15,
            NoImplementation => 16,
            Other(code) => code,
        }
    }

    /// `Ok(())` for success, the code itself otherwise.
    pub fn check(code: i32) -> std::result::Result<(), StatusCode> {
        match StatusCode::from_raw(code) {
            StatusCode::Success => Ok(()),
            other => Err(other),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum DtnError {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error("illegal state: {0}")]
    IllegalState(String),
    #[error("null pointer passed to the engine")]
    NullPointer,
    #[error("engine initialisation failed")]
    Init,
    #[error("could not open the engine channel")]
    Open,
    #[error("could not build the local endpoint id")]
    LocalEid,
    #[error("registration failed")]
    Register {
        #[source]
        cause: Option<Box<DtnError>>,
    },
    #[error("error closing the registration")]
    Close,
    #[error("unregistration failed")]
    Unregister {
        #[source]
        cause: Option<Box<DtnError>>,
    },
    #[error("socket is not registered")]
    NotRegistered,
    #[error("send failed")]
    Send {
        #[source]
        cause: Option<Box<DtnError>>,
    },
    #[error("receive failed")]
    Receive {
        #[source]
        cause: Option<Box<DtnError>>,
    },
    #[error("reception interrupted")]
    ReceptionInterrupted,
    #[error("timed out waiting for a bundle")]
    Timeout,
    #[error("no receiver (destination) configured")]
    NoReceiver,
    #[error("invalid parameters for the dtn scheme")]
    DtnParameters,
    #[error("invalid parameters for the ipn scheme")]
    IpnParameters,
    #[error("no bundle protocol implementation found")]
    NoImplementation,
    #[error("engine error code {0}")]
    General(i32),
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl DtnError {
    fn wrap(cause: DtnError) -> Option<Box<DtnError>> {
        Some(Box::new(cause))
    }

    /// Safe to retry on the same socket.
    pub fn is_transient(&self) -> bool {
        matches!(self, DtnError::Timeout | DtnError::ReceptionInterrupted)
    }

    /// The socket can no longer be used.
    pub fn is_terminal(&self) -> bool {
        matches!(self, DtnError::NotRegistered | DtnError::Close)
    }

    /// Engine status code this error stands for, if any. Wrapped errors report their own kind.
    pub fn status_code(&self) -> Option<StatusCode> {
        let code = match self {
            DtnError::NullPointer => StatusCode::NullPointer,
            DtnError::Init => StatusCode::Init,
            DtnError::Open => StatusCode::Open,
            DtnError::LocalEid => StatusCode::LocalEid,
            DtnError::Register { .. } => StatusCode::Register,
            DtnError::Close => StatusCode::Close,
            DtnError::Unregister { .. } => StatusCode::Unregister,
            DtnError::NotRegistered => StatusCode::NotRegistered,
            DtnError::Send { .. } => StatusCode::Send,
            DtnError::Receive { .. } => StatusCode::Receive,
            DtnError::ReceptionInterrupted => StatusCode::ReceptionInterrupted,
            DtnError::Timeout => StatusCode::Timeout,
            DtnError::NoReceiver => StatusCode::NoReceiver,
            DtnError::DtnParameters => StatusCode::DtnParameters,
            DtnError::IpnParameters => StatusCode::IpnParameters,
            DtnError::NoImplementation => StatusCode::NoImplementation,
            DtnError::General(code) => StatusCode::Other(*code),
            DtnError::InvalidArgument(_) | DtnError::IllegalState(_) | DtnError::Io(_) => {
                return None
            }
        };
        Some(code)
    }

    /// The caller passed something the core refuses before reaching the engine.
    pub fn is_caller_bug(&self) -> bool {
        matches!(
            self,
            DtnError::InvalidArgument(_) | DtnError::IllegalState(_)
        )
    }
}

impl From<StatusCode> for DtnError {
    fn from(code: StatusCode) -> Self {
        match code {
            StatusCode::Success => DtnError::General(0),
            StatusCode::NullPointer => DtnError::NullPointer,
            StatusCode::Init => DtnError::Init,
            StatusCode::Open => DtnError::Open,
            StatusCode::LocalEid => DtnError::LocalEid,
            StatusCode::Register => DtnError::Register { cause: None },
            StatusCode::Close => DtnError::Close,
            StatusCode::Unregister => DtnError::Unregister { cause: None },
            StatusCode::NotRegistered => DtnError::NotRegistered,
            StatusCode::Send => DtnError::Send { cause: None },
            StatusCode::Receive => DtnError::Receive { cause: None },
            StatusCode::ReceptionInterrupted => DtnError::ReceptionInterrupted,
            StatusCode::Timeout => DtnError::Timeout,
            StatusCode::NoReceiver => DtnError::NoReceiver,
            StatusCode::DtnParameters => DtnError::DtnParameters,
            StatusCode::IpnParameters => DtnError::IpnParameters,
            StatusCode::NoImplementation => DtnError::NoImplementation,
            StatusCode::Other(code) => DtnError::General(code),
        }
    }
}

/// Register outcome: endpoint, channel and IPN parameter failures surface as-is, a negative
/// IPN demux is an invalid argument, everything else is wrapped in `Register`.
pub fn register_error(code: StatusCode) -> DtnError {
    match code {
        StatusCode::LocalEid => DtnError::LocalEid,
        StatusCode::Open => DtnError::Open,
        StatusCode::IpnParameters => {
            DtnError::InvalidArgument("ipn demux number can't be negative".into())
        }
        StatusCode::Register => DtnError::Register { cause: None },
        other => DtnError::Register {
            cause: DtnError::wrap(other.into()),
        },
    }
}

pub fn unregister_error(code: StatusCode) -> DtnError {
    match code {
        StatusCode::NotRegistered => DtnError::NotRegistered,
        StatusCode::Close => DtnError::Close,
        StatusCode::Unregister => DtnError::Unregister { cause: None },
        other => DtnError::Unregister {
            cause: DtnError::wrap(other.into()),
        },
    }
}

pub fn send_error(code: StatusCode) -> DtnError {
    match code {
        StatusCode::NotRegistered => DtnError::NotRegistered,
        StatusCode::NoReceiver => DtnError::NoReceiver,
        StatusCode::NullPointer => DtnError::NullPointer,
        StatusCode::Send => DtnError::Send { cause: None },
        other => DtnError::Send {
            cause: DtnError::wrap(other.into()),
        },
    }
}

pub fn receive_error(code: StatusCode) -> DtnError {
    match code {
        StatusCode::NotRegistered => DtnError::NotRegistered,
        StatusCode::Timeout => DtnError::Timeout,
        StatusCode::ReceptionInterrupted => DtnError::ReceptionInterrupted,
        StatusCode::Receive => DtnError::Receive { cause: None },
        other => DtnError::Receive {
            cause: DtnError::wrap(other.into()),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error;

    #[test]
    fn raw_codes_roundtrip() {
        for raw in -3..20 {
            assert_eq!(StatusCode::from_raw(raw).raw(), raw);
        }
        assert_eq!(StatusCode::check(0), Ok(()));
        assert_eq!(StatusCode::check(12), Err(StatusCode::Timeout));
        assert_eq!(StatusCode::check(99), Err(StatusCode::Other(99)));
    }

    #[test]
    fn register_mapping() {
        assert!(matches!(register_error(StatusCode::LocalEid), DtnError::LocalEid));
        assert!(matches!(register_error(StatusCode::Open), DtnError::Open));
        assert!(matches!(
            register_error(StatusCode::IpnParameters),
            DtnError::InvalidArgument(_)
        ));
        let wrapped = register_error(StatusCode::Init);
        assert!(matches!(wrapped, DtnError::Register { cause: Some(_) }));
        assert!(wrapped.source().is_some());
    }

    #[test]
    fn send_mapping_keeps_specific_causes() {
        assert!(matches!(send_error(StatusCode::NotRegistered), DtnError::NotRegistered));
        assert!(matches!(send_error(StatusCode::NoReceiver), DtnError::NoReceiver));
        assert!(matches!(
            send_error(StatusCode::Other(77)),
            DtnError::Send { cause: Some(c) } if matches!(*c, DtnError::General(77))
        ));
    }

    #[test]
    fn receive_and_unregister_mapping() {
        assert!(matches!(receive_error(StatusCode::Timeout), DtnError::Timeout));
        assert!(matches!(
            receive_error(StatusCode::ReceptionInterrupted),
            DtnError::ReceptionInterrupted
        ));
        assert!(matches!(
            receive_error(StatusCode::Send),
            DtnError::Receive { cause: Some(_) }
        ));
        assert!(matches!(unregister_error(StatusCode::Close), DtnError::Close));
        assert!(matches!(
            unregister_error(StatusCode::NotRegistered),
            DtnError::NotRegistered
        ));
    }

    #[test]
    fn status_code_reverses_mapping() {
        assert_eq!(DtnError::Timeout.status_code(), Some(StatusCode::Timeout));
        assert_eq!(
            send_error(StatusCode::Other(40)).status_code(),
            Some(StatusCode::Send)
        );
        assert_eq!(DtnError::InvalidArgument("x".into()).status_code(), None);
    }

    #[test]
    fn classification() {
        assert!(DtnError::Timeout.is_transient());
        assert!(DtnError::ReceptionInterrupted.is_transient());
        assert!(DtnError::NotRegistered.is_terminal());
        assert!(DtnError::Close.is_terminal());
        assert!(DtnError::InvalidArgument("x".into()).is_caller_bug());
        assert!(DtnError::IllegalState("x".into()).is_caller_bug());
        assert!(!DtnError::Timeout.is_caller_bug());
    }
}
