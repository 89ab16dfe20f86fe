pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Error {
    OutOfMemory,
    Busy,
    Interrupted,
    InvalidArgument(String),
    NotSupported(u32),
    NoSuchDevice(usize),
    /// The handle's open mode does not allow the operation
    BadMode,
    InvalidState(String),
}

impl Error {
    /// Negative errno-style code, the error half of a completion result.
    pub fn code(&self) -> i32 {
        match self {
            Error::OutOfMemory => -12, // ENOMEM
            Error::Busy => -16, // EBUSY
            Error::Interrupted => -512, // ERESTARTSYS
            Error::InvalidArgument(_) => -22, // EINVAL
            Error::NotSupported(_) => -25, // ENOTTY
            Error::NoSuchDevice(_) => -19, // ENODEV
            Error::BadMode => -9, // EBADF
            Error::InvalidState(_) => -5, // EIO
        }
    }
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Error::OutOfMemory => write!(f, "Out of memory"),
            Error::Busy => write!(f, "Store is busy: mapped views are active"),
            Error::Interrupted => write!(f, "Interrupted while waiting for the store guard"),
            Error::InvalidArgument(msg) => write!(f, "Invalid argument: {}", msg),
            Error::NotSupported(cmd) => write!(f, "Control command {:#06x} not supported", cmd),
            Error::NoSuchDevice(index) => write!(f, "No such device: {}", index),
            Error::BadMode => write!(f, "Handle was not opened for this operation"),
            Error::InvalidState(msg) => write!(f, "Invalid state: {}", msg),
        }
    }
}

impl std::error::Error for Error {}

impl From<std::collections::TryReserveError> for Error {
    fn from(_: std::collections::TryReserveError) -> Self {
        Error::OutOfMemory
    }
}
