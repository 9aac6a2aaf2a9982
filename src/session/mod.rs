//! Session lifecycle
//!
//! [`SessionStateMachine`] is the single source of truth for where a session
//! is; [`Negotiator`] drives it through the offer/answer handshake. Media and
//! the coordinate channel wait on it for `Connected`.

pub mod negotiator;
pub mod state;

pub use negotiator::{NegotiationEnd, Negotiator, Role, SessionEndpoint};
pub use state::{wait_until_closed, wait_until_connected, SessionState, SessionStateMachine};
