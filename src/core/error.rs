use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Unknown,
    Request,        // malformed input, duplicate key, unknown db
    Permission,     // mutation against a read-only shard
    Config,
    External,       // object source unreachable
    Plugin,         // extractor rejected the input
    FileSystem,
    Internal,       // invariant violation
    NotImplemented,
    OutOfMemory,
    Proxy,
}

impl ErrorKind {
    /// Stable numeric code, preserved across process boundaries by front ends.
    pub fn code(&self) -> i64 {
        match self {
            ErrorKind::Unknown => 0x0001,
            ErrorKind::Request => 0x0101,
            ErrorKind::Permission => 0x0102,
            ErrorKind::Config => 0x0103,
            ErrorKind::External => 0x0104,
            ErrorKind::Plugin => 0x0105,
            ErrorKind::FileSystem => 0x0106,
            ErrorKind::Internal => 0x0107,
            ErrorKind::NotImplemented => 0x0108,
            ErrorKind::OutOfMemory => 0x0109,
            ErrorKind::Proxy => 0x010A,
        }
    }

    pub fn from_code(code: i64) -> ErrorKind {
        match code {
            0x0101 => ErrorKind::Request,
            0x0102 => ErrorKind::Permission,
            0x0103 => ErrorKind::Config,
            0x0104 => ErrorKind::External,
            0x0105 => ErrorKind::Plugin,
            0x0106 => ErrorKind::FileSystem,
            0x0107 => ErrorKind::Internal,
            0x0108 => ErrorKind::NotImplemented,
            0x0109 => ErrorKind::OutOfMemory,
            0x010A => ErrorKind::Proxy,
            _ => ErrorKind::Unknown,
        }
    }
}

#[derive(Debug)]
pub struct Error {
    pub kind: ErrorKind,
    pub context: String,
}

impl Error {
    pub fn new(kind: ErrorKind, context: String) -> Self {
        Error { kind, context }
    }

    pub fn request(context: impl Into<String>) -> Self {
        Error::new(ErrorKind::Request, context.into())
    }

    pub fn permission(context: impl Into<String>) -> Self {
        Error::new(ErrorKind::Permission, context.into())
    }

    pub fn config(context: impl Into<String>) -> Self {
        Error::new(ErrorKind::Config, context.into())
    }

    pub fn external(context: impl Into<String>) -> Self {
        Error::new(ErrorKind::External, context.into())
    }

    pub fn plugin(context: impl Into<String>) -> Self {
        Error::new(ErrorKind::Plugin, context.into())
    }

    pub fn internal(context: impl Into<String>) -> Self {
        Error::new(ErrorKind::Internal, context.into())
    }

    pub fn not_implemented(context: impl Into<String>) -> Self {
        Error::new(ErrorKind::NotImplemented, context.into())
    }

    pub fn out_of_memory(context: impl Into<String>) -> Self {
        Error::new(ErrorKind::OutOfMemory, context.into())
    }

    pub fn code(&self) -> i64 {
        self.kind.code()
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{:?}: {}", self.kind, self.context)
    }
}

impl std::error::Error for Error {}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error {
            kind: ErrorKind::FileSystem,
            context: err.to_string(),
        }
    }
}

impl From<bincode::Error> for Error {
    fn from(err: bincode::Error) -> Self {
        Error {
            kind: ErrorKind::Internal,
            context: format!("encoding error: {}", err),
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error {
            kind: ErrorKind::Config,
            context: err.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
