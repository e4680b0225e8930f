use std::fmt;
use std::io;

#[derive(Debug)]
pub enum Error {
    Io(io::Error),
    NoEntropy(String),
    InvalidArgs(String),
    NotSeeded,
    PoolIndex(u8),
    EntropyLength(usize),
    RequestTooLarge(usize),
    Closed,
    QueueFull,
    Device(String),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Io(e) => write!(f, "I/O error: {}", e),
            Error::NoEntropy(msg) => write!(f, "entropy error: {}", msg),
            Error::InvalidArgs(msg) => write!(f, "invalid arguments: {}", msg),
            Error::NotSeeded => write!(f, "generator not yet seeded"),
            Error::PoolIndex(i) => write!(f, "pool index {} out of range", i),
            Error::EntropyLength(n) => {
                write!(f, "entropy payload of {} bytes not in 1..=32", n)
            }
            Error::RequestTooLarge(n) => {
                write!(f, "request for {} bytes exceeds 1048576", n)
            }
            Error::Closed => write!(f, "generator closed"),
            Error::QueueFull => write!(f, "entropy write queue full"),
            Error::Device(msg) => write!(f, "{}", msg),
        }
    }
}

impl std::error::Error for Error {}

impl From<io::Error> for Error {
    fn from(e: io::Error) -> Self {
        Error::Io(e)
    }
}
