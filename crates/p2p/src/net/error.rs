//! Peer-to-peer networking errors.
use std::io;

use thiserror::Error;

/// An error occurring in the reactor or its socket layer.
#[derive(Error, Debug)]
pub enum Error {
    #[error("i/o error: {0}")]
    Io(#[from] io::Error),

    #[error("channel error: {0}")]
    Channel(Box<dyn std::error::Error + Send + Sync + 'static>),
}
