//! Errors raised by the bridge

use strum::{EnumDiscriminants, EnumIter, IntoStaticStr};

use crate::dds::{DdsDuration, ReturnCode, StatusMask};
use crate::host::{HostError, HostErrorKind};

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Clone, thiserror::Error, EnumDiscriminants)]
#[strum_discriminants(name(ErrorKind), derive(Hash, EnumIter, IntoStaticStr))]
pub enum Error {
    #[error("{0}")]
    Init(String),

    #[error("{role} is missing a valid native {expected}")]
    HandleMissing {
        role: &'static str,
        expected: &'static str,
    },

    #[error("{0} is not a valid PyOpenDDS type")]
    UnknownType(String),

    #[error("{value} is out of range for {target}")]
    Range { target: &'static str, value: String },

    #[error("{0}")]
    Type(String),

    #[error("'{codec}' codec can't {action}: {reason}")]
    Encoding {
        codec: &'static str,
        action: &'static str,
        reason: String,
    },

    #[error("{operation} failed with {code}")]
    DdsOperation {
        operation: &'static str,
        code: ReturnCode,
    },

    #[error("no sample available on {0}")]
    NoDataAvailable(String),

    #[error("timed out after {timeout} waiting for {mask}")]
    Timeout { timeout: DdsDuration, mask: StatusMask },

    #[error("sample serialization failed: {0}")]
    Serialization(String),

    #[error(transparent)]
    Host(#[from] HostError),
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        ErrorKind::from(self)
    }

    pub(crate) fn range<T>(value: impl ToString) -> Self {
        Error::Range {
            target: std::any::type_name::<T>(),
            value: value.to_string(),
        }
    }

    pub(crate) fn type_error(message: impl Into<String>) -> Self {
        Error::Type(message.into())
    }

    /// The native return code behind this error, if there is one.
    pub fn return_code(&self) -> Option<ReturnCode> {
        match self {
            Error::DdsOperation { code, .. } => Some(*code),
            Error::NoDataAvailable(_) => Some(ReturnCode::NoData),
            Error::Timeout { .. } => Some(ReturnCode::Timeout),
            _ => None,
        }
    }

    /// Polling loops treat these as "try again later".
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Error::NoDataAvailable(_) | Error::Timeout { .. })
    }

    /// The host's own error, unchanged, when this error came from the host.
    pub fn as_host_error(&self) -> Option<&HostError> {
        match self {
            Error::Host(err) => Some(err),
            _ => None,
        }
    }
}

impl ErrorKind {
    /// Name of the host exception class raised for this kind.
    pub fn exception_name(self) -> &'static str {
        match self {
            ErrorKind::Init => "InitError",
            ErrorKind::HandleMissing => "HandleMissing",
            ErrorKind::UnknownType => "UnknownType",
            ErrorKind::Range => "RangeError",
            ErrorKind::Type => "TypeMismatchError",
            ErrorKind::Encoding => "EncodingError",
            ErrorKind::DdsOperation => "DdsOperationError",
            ErrorKind::NoDataAvailable => "NoDataAvailable",
            ErrorKind::Timeout => "TimeoutError",
            ErrorKind::Serialization => "SerializationError",
            ErrorKind::Host => "PyOpenDDS_Error",
        }
    }

    /// Host built-in exception the class also derives from, so host code
    /// catching the built-in keeps working.
    pub fn builtin_base(self) -> Option<&'static str> {
        match self {
            ErrorKind::Range => Some("OverflowError"),
            ErrorKind::Type => Some("TypeError"),
            ErrorKind::Encoding => Some("ValueError"),
            ErrorKind::Timeout => Some("TimeoutError"),
            _ => None,
        }
    }
}

pub(crate) fn from_host_number<T>(host_value: impl FnOnce() -> String, err: HostError) -> Error {
    match err.kind {
        HostErrorKind::Overflow => Error::range::<T>(host_value()),
        HostErrorKind::Type => Error::Type(err.message),
        _ => Error::Host(err),
    }
}
