use std::sync::Arc;

use huddle_protocol::SignalMessage;
use tokio::sync::mpsc;

use crate::error::RtcError;

/// Outbound half of the signaling channel.
///
/// The transport itself (websocket, in-process bus, whatever the host app
/// uses) lives outside this crate; the core only needs a way to hand typed
/// messages to it. Inbound messages are fed back through
/// [`CallSession::handle_signal`](crate::session::CallSession::handle_signal).
pub trait SignalingRelay: Send + Sync + 'static {
    fn send(&self, msg: SignalMessage) -> Result<(), RtcError>;
}

/// Relay backed by an unbounded channel, for hosts that pump messages to
/// their transport from an async task.
pub struct ChannelRelay {
    tx: mpsc::UnboundedSender<SignalMessage>,
}

impl ChannelRelay {
    pub fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<SignalMessage>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Arc::new(Self { tx }), rx)
    }
}

impl SignalingRelay for ChannelRelay {
    fn send(&self, msg: SignalMessage) -> Result<(), RtcError> {
        self.tx.send(msg).map_err(|_| RtcError::RelayClosed)
    }
}
