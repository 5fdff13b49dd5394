//! The client-facing half of the engine: a synchronous reactor run on its
//! own thread, driven from the outside through a cloneable [`handle::Handle`].
mod controller;
pub use controller::{spawn, Client, ClientHandle, P2PConfig};

mod error;
pub use error::Error;

pub mod handle;

mod service;
