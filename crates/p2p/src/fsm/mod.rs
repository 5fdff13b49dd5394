//! The protocol state machine: a handler per concern (addresses, peers,
//! inventory), a shared event/output vocabulary, and the top-level
//! [`handler::StateMachine`] that wires them together for the reactor.
pub mod addrmgr;
pub mod event;
pub mod handler;
pub mod invmgr;
pub mod output;
pub mod peermgr;
