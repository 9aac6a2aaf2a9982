//! Coordinate channel
//!
//! The simulator side opens a `coordinates` data channel and greets. From
//! then on the two sides ping-pong: the detector side answers every message
//! with its latest detection, the simulator side scores each pair against
//! ground truth and acknowledges. There are no request ids; at most one
//! request is in flight per channel.

pub mod channel;
pub mod handler;
pub mod protocol;

pub use channel::{ChannelDispatcher, ChannelEvent, ChannelSender, DispatchStats};
pub use handler::{CoordinateHandler, ExchangeReport, Reporter, Requester};
pub use protocol::{CoordinateMessage, ACK, GREETING};
