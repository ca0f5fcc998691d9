//! WebSocket connection manager.
//!
//! One socket task per connection attempt, tagged with an epoch. The task
//! owns the socket end to end and reports lifecycle and frames back to the
//! core over its channel; the core never touches the socket directly. Policy
//! (when to reconnect) lives in [`ReconnectPolicy`] so it stays unit-testable
//! without a server.

use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc::UnboundedReceiver;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, warn};

use crate::updates::{CoreMsg, InternalEvent};
use crate::wire::{self, ClientFrame};

/// Fixed-delay reconnect with at most one timer pending at a time. Repeated
/// close notifications while a timer is armed do not stack; the socket epoch
/// handles anything an already-fired timer might race with.
pub struct ReconnectPolicy {
    delay: Duration,
    pending: bool,
}

impl ReconnectPolicy {
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            pending: false,
        }
    }

    /// The socket closed (or failed to open). Returns the delay to arm a
    /// timer for, or None if one is already armed.
    pub fn on_closed(&mut self) -> Option<Duration> {
        if self.pending {
            return None;
        }
        self.pending = true;
        Some(self.delay)
    }

    /// The armed timer fired. Returns whether a reconnect should actually be
    /// attempted (false when the policy was reset in the meantime).
    pub fn timer_fired(&mut self) -> bool {
        let was_pending = self.pending;
        self.pending = false;
        was_pending
    }

    /// Drop any armed timer's claim, e.g. on logout or an explicit reconnect.
    pub fn reset(&mut self) {
        self.pending = false;
    }

    pub fn pending(&self) -> bool {
        self.pending
    }
}

/// Connect and pump the socket until it dies. Always terminates with a
/// `SocketClosed` for this epoch, including when the connect itself fails.
pub async fn run_socket(
    url: String,
    epoch: u64,
    mut outbound: UnboundedReceiver<ClientFrame>,
    core: flume::Sender<CoreMsg>,
) {
    let send = |event: InternalEvent| {
        let _ = core.send(CoreMsg::Internal(Box::new(event)));
    };

    let ws = match connect_async(url.as_str()).await {
        Ok((ws, _)) => ws,
        Err(err) => {
            warn!(epoch, %err, "websocket connect failed");
            send(InternalEvent::SocketClosed { epoch });
            return;
        }
    };
    debug!(epoch, "websocket open");
    send(InternalEvent::SocketOpened { epoch });

    let (mut sink, mut stream) = ws.split();
    loop {
        tokio::select! {
            frame = outbound.recv() => {
                let Some(frame) = frame else { break };
                let text = match wire::encode(&frame) {
                    Ok(text) => text,
                    Err(err) => {
                        warn!(epoch, %err, "dropping unencodable frame");
                        continue;
                    }
                };
                if let Err(err) = sink.send(Message::Text(text.into())).await {
                    warn!(epoch, %err, "websocket send failed");
                    break;
                }
            }
            incoming = stream.next() => {
                match incoming {
                    Some(Ok(Message::Text(text))) => match wire::decode(&text) {
                        Ok(event) => send(InternalEvent::SocketEvent { epoch, event }),
                        // A frame we don't understand is dropped; the
                        // connection stays up.
                        Err(err) => warn!(epoch, %err, "ignoring unknown socket frame"),
                    },
                    Some(Ok(Message::Ping(_) | Message::Pong(_) | Message::Binary(_) | Message::Frame(_))) => {}
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Err(err)) => {
                        warn!(epoch, %err, "websocket read failed");
                        break;
                    }
                }
            }
        }
    }

    debug!(epoch, "websocket closed");
    send(InternalEvent::SocketClosed { epoch });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn close_arms_exactly_one_timer() {
        let mut policy = ReconnectPolicy::new(Duration::from_millis(3000));
        assert_eq!(policy.on_closed(), Some(Duration::from_millis(3000)));
        // Further closes while the timer is armed do not stack.
        assert_eq!(policy.on_closed(), None);
        assert_eq!(policy.on_closed(), None);
        assert!(policy.pending());
    }

    #[test]
    fn timer_fire_allows_rearming() {
        let mut policy = ReconnectPolicy::new(Duration::from_millis(3000));
        policy.on_closed();
        assert!(policy.timer_fired());
        assert!(!policy.pending());
        // The next close after a fired timer arms a fresh one.
        assert!(policy.on_closed().is_some());
    }

    #[test]
    fn reset_cancels_armed_timer() {
        let mut policy = ReconnectPolicy::new(Duration::from_millis(3000));
        policy.on_closed();
        policy.reset();
        // The stale timer fires but must not drive a reconnect.
        assert!(!policy.timer_fired());
    }
}
