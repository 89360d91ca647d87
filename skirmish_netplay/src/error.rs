// Error type for the session layer.
//
// Public fallible operations return `NetResult<T>`. The steady-state receive
// path deliberately does not: per-connection failures there are logged and
// absorbed (the connection is closed or the message dropped) so one broken
// peer never stalls the session.

use std::io;

use skirmish_protocol::{CodecError, DescriptorError};
use thiserror::Error;

use crate::directory::DirectoryError;

pub type NetResult<T> = Result<T, NetError>;

#[derive(Debug, Error)]
pub enum NetError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    #[error("codec error: {0}")]
    Codec(#[from] CodecError),
    #[error("descriptor error: {0}")]
    Descriptor(#[from] DescriptorError),
    #[error("directory error: {0}")]
    Directory(#[from] DirectoryError),
    #[error("cannot resolve {0}")]
    Resolve(String),
    #[error("timed out waiting for {0}")]
    Timeout(&'static str),
    #[error("connection closed by peer")]
    Disconnected,
    #[error("join rejected: {0}")]
    JoinRejected(String),
    #[error("protocol violation: {0}")]
    Protocol(String),
    #[error("operation requires a networked session")]
    NotNetworked,
    #[error("invalid configuration: {0}")]
    Config(#[from] serde_json::Error),
}
