//! Client-facing error types, as opposed to the lower transport/wire errors
//! in [`crate::net::error`].
use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error(transparent)]
    Handle(#[from] crate::client::handle::Error),

    #[error(transparent)]
    Net(#[from] crate::net::error::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// The command channel disconnected, meaning the reactor thread exited.
    #[error("command channel disconnected")]
    Channel,
}

impl<T> From<flume::SendError<T>> for Error {
    fn from(_: flume::SendError<T>) -> Self {
        Self::Channel
    }
}

impl From<flume::RecvError> for Error {
    fn from(_: flume::RecvError) -> Self {
        Self::Channel
    }
}
