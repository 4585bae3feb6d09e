/*!
Specialized `Error` and `Result` types for memscope.
*/

use std::{error, fmt, result, str};

use log::{debug, error, info, trace, warn};

use crate::architecture::PageTableLevel;

/// Error type of every fallible memscope operation.
///
/// The first field names the component the error was raised in,
/// the second field describes what went wrong.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub struct Error(pub ErrorOrigin, pub ErrorKind);

impl Error {
    /// Returns a static string representing the type of error.
    pub fn as_str(&self) -> &'static str {
        self.1.to_str()
    }

    pub const fn origin(&self) -> ErrorOrigin {
        self.0
    }

    pub const fn kind(&self) -> ErrorKind {
        self.1
    }

    /// Returns true if some bytes were transferred before the copy failed.
    pub const fn is_partial(&self) -> bool {
        matches!(self.1, ErrorKind::CopyFailed { transferred } if transferred > 0)
    }

    /// Converts the error into the negative status code returned across the request boundary.
    pub const fn into_status(self) -> i32 {
        -self.1.code()
    }

    /// Recovers the error kind from a status code returned by the dispatcher.
    ///
    /// Returns `None` for non-negative values. The transferred byte count of
    /// `CopyFailed` does not cross the boundary and is reported as 0.
    pub fn from_status(status: i32) -> Option<ErrorKind> {
        if status >= 0 {
            return None;
        }

        Some(
            status
                .checked_neg()
                .and_then(ErrorKind::from_code)
                .unwrap_or(ErrorKind::Unknown),
        )
    }

    pub fn log_error(self, err: impl fmt::Display) -> Self {
        error!("{}: {} ({})", self.0.to_str(), self.1, err);
        self
    }

    pub fn log_warn(self, err: impl fmt::Display) -> Self {
        warn!("{}: {} ({})", self.0.to_str(), self.1, err);
        self
    }

    pub fn log_info(self, err: impl fmt::Display) -> Self {
        info!("{}: {} ({})", self.0.to_str(), self.1, err);
        self
    }

    pub fn log_debug(self, err: impl fmt::Display) -> Self {
        debug!("{}: {} ({})", self.0.to_str(), self.1, err);
        self
    }

    pub fn log_trace(self, err: impl fmt::Display) -> Self {
        trace!("{}: {} ({})", self.0.to_str(), self.1, err);
        self
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}: {}", self.0.to_str(), self.1)
    }
}

impl error::Error for Error {}

/// Convert from str::Utf8Error
impl From<str::Utf8Error> for Error {
    fn from(_err: str::Utf8Error) -> Self {
        Error(ErrorOrigin::Other, ErrorKind::Encoding)
    }
}

#[repr(u16)]
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum ErrorOrigin {
    ProcessResolver,
    VirtualTranslate,
    PhysicalMemory,
    PhysicalWindow,
    MappingEnumerator,
    Dispatcher,
    CallerMemory,

    Connector,
    Args,

    Other,
}

impl ErrorOrigin {
    /// Returns a static string representing the type of error.
    pub fn to_str(self) -> &'static str {
        match self {
            ErrorOrigin::ProcessResolver => "process resolver",
            ErrorOrigin::VirtualTranslate => "virtual translate",
            ErrorOrigin::PhysicalMemory => "physical memory",
            ErrorOrigin::PhysicalWindow => "physical window",
            ErrorOrigin::MappingEnumerator => "mapping enumerator",
            ErrorOrigin::Dispatcher => "dispatcher",
            ErrorOrigin::CallerMemory => "caller memory",

            ErrorOrigin::Connector => "connector",
            ErrorOrigin::Args => "args",

            ErrorOrigin::Other => "other",
        }
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum ErrorKind {
    ProcessNotFound,
    NoMemoryContext,
    /// The page walk hit an absent or malformed entry at the given level.
    TranslationFailed(PageTableLevel),
    WindowMapFailed,
    /// Copy across the caller boundary failed after `transferred` bytes.
    CopyFailed {
        transferred: usize,
    },

    NotFound,
    OutOfBounds,
    InvalidArgument,
    Encoding,
    PermissionDenied,
    UnableToReadFile,
    UnableToMapFile,
    UnableToWriteFile,
    NotSupported,
    Configuration,

    Unknown,
}

impl ErrorKind {
    /// Returns a static string representing the type of error.
    pub fn to_str(self) -> &'static str {
        match self {
            ErrorKind::ProcessNotFound => "process not found",
            ErrorKind::NoMemoryContext => "process has no memory context",
            ErrorKind::TranslationFailed(_) => "virtual address translation failed",
            ErrorKind::WindowMapFailed => "unable to map physical window",
            ErrorKind::CopyFailed { .. } => "copy across caller boundary failed",

            ErrorKind::NotFound => "not found",
            ErrorKind::OutOfBounds => "out of bounds",
            ErrorKind::InvalidArgument => "invalid argument",
            ErrorKind::Encoding => "encoding error",
            ErrorKind::PermissionDenied => "permission denied",
            ErrorKind::UnableToReadFile => "unable to read file",
            ErrorKind::UnableToMapFile => "unable to map file",
            ErrorKind::UnableToWriteFile => "unable to write file",
            ErrorKind::NotSupported => "not supported",
            ErrorKind::Configuration => "invalid configuration",

            ErrorKind::Unknown => "unknown error",
        }
    }

    /// Stable positive code of the kind, negated on the request boundary.
    pub const fn code(self) -> i32 {
        match self {
            ErrorKind::ProcessNotFound => 1,
            ErrorKind::NoMemoryContext => 2,
            ErrorKind::TranslationFailed(PageTableLevel::Top) => 3,
            ErrorKind::TranslationFailed(PageTableLevel::Upper) => 4,
            ErrorKind::TranslationFailed(PageTableLevel::Middle) => 5,
            ErrorKind::TranslationFailed(PageTableLevel::Leaf) => 6,
            ErrorKind::WindowMapFailed => 7,
            ErrorKind::CopyFailed { .. } => 8,
            ErrorKind::NotFound => 9,
            ErrorKind::OutOfBounds => 10,
            ErrorKind::InvalidArgument => 11,
            ErrorKind::Encoding => 12,
            ErrorKind::PermissionDenied => 13,
            ErrorKind::UnableToReadFile => 14,
            ErrorKind::UnableToMapFile => 15,
            ErrorKind::UnableToWriteFile => 16,
            ErrorKind::NotSupported => 17,
            ErrorKind::Configuration => 18,
            ErrorKind::Unknown => 19,
        }
    }

    pub fn from_code(code: i32) -> Option<Self> {
        let kind = match code {
            1 => ErrorKind::ProcessNotFound,
            2 => ErrorKind::NoMemoryContext,
            3 => ErrorKind::TranslationFailed(PageTableLevel::Top),
            4 => ErrorKind::TranslationFailed(PageTableLevel::Upper),
            5 => ErrorKind::TranslationFailed(PageTableLevel::Middle),
            6 => ErrorKind::TranslationFailed(PageTableLevel::Leaf),
            7 => ErrorKind::WindowMapFailed,
            8 => ErrorKind::CopyFailed { transferred: 0 },
            9 => ErrorKind::NotFound,
            10 => ErrorKind::OutOfBounds,
            11 => ErrorKind::InvalidArgument,
            12 => ErrorKind::Encoding,
            13 => ErrorKind::PermissionDenied,
            14 => ErrorKind::UnableToReadFile,
            15 => ErrorKind::UnableToMapFile,
            16 => ErrorKind::UnableToWriteFile,
            17 => ErrorKind::NotSupported,
            18 => ErrorKind::Configuration,
            19 => ErrorKind::Unknown,
            _ => return None,
        };
        Some(kind)
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            ErrorKind::TranslationFailed(level) => {
                write!(f, "{} at {} level", self.to_str(), level)
            }
            ErrorKind::CopyFailed { transferred } if *transferred > 0 => {
                write!(f, "{} after {} bytes", self.to_str(), transferred)
            }
            _ => f.write_str(self.to_str()),
        }
    }
}

/// Specialized `Result` type for memscope results.
pub type Result<T> = result::Result<T, Error>;
