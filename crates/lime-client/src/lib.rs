//! Client channel and session handshake driver for the LIME protocol.
//!
//! [`ChannelBase`] dispatches inbound envelopes to typed subscribers and
//! enforces which operations are legal in each session state.
//! [`ClientChannel`] layers the client half of the handshake on top:
//! `new → negotiating → authenticating → established → finishing`.
//!
//! Channels are generic over [`Transport`], so the same driver runs over
//! the real TCP transport and over in-memory fakes in tests.

mod channel;
mod client;
mod error;

pub use channel::{ChannelBase, ChannelConfig, ListenerHandle};
pub use client::{ClientChannel, ClientChannelConfig};
pub use error::ChannelError;

pub use lime_transport::Transport;
