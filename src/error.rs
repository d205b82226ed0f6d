use std::fmt;

use crate::types::{Cid, Dp};

#[derive(Debug)]
pub enum Error {
    /// Opening the link or the handshake failed.
    Connection(String),
    /// I/O failure on an already open link.
    Transport(String),
    Protocol(String),
    Timeout,
    NotConnected,
    /// A status query completed without returning any data.
    NoStatus(Option<Cid>),
    UnknownEntity { dp: Dp, cid: Option<Cid> },
    InvalidEntityKey(String),
    Io(std::io::Error),
    Json(serde_json::Error),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Connection(msg) => write!(f, "connection failed: {msg}"),
            Error::Transport(msg) => write!(f, "transport error: {msg}"),
            Error::Protocol(msg) => write!(f, "protocol error: {msg}"),
            Error::Timeout => write!(f, "device did not answer in time"),
            Error::NotConnected => write!(f, "not connected"),
            Error::NoStatus(Some(cid)) => write!(f, "no status returned for sub device {cid}"),
            Error::NoStatus(None) => write!(f, "no status returned"),
            Error::UnknownEntity { dp, cid: Some(cid) } => {
                write!(f, "missing entity config for cid {cid} (dp {dp})")
            }
            Error::UnknownEntity { dp, cid: None } => write!(f, "missing entity config for id {dp}"),
            Error::InvalidEntityKey(key) => write!(f, "invalid entity key: {key}"),
            Error::Io(e) => write!(f, "IO error: {e}"),
            Error::Json(e) => write!(f, "JSON error: {e}"),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Io(e) => Some(e),
            Error::Json(e) => Some(e),
            _ => None,
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::Io(e)
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Json(e)
    }
}

pub type Result<T> = std::result::Result<T, Error>;
