//! Shared modem transport.
//!
//! The PLM is a single half-duplex channel. Writers push frames into one outgoing
//! channel drained by the port writer task; frames read from the port are fanned out
//! to every registered listener. Listeners receive [`TransportEvent`]s on their own
//! unbounded channel so a slow consumer never blocks the IO side.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use log::{debug, trace, warn};
use tokio::sync::mpsc;

use crate::errors::TransportError;
use crate::insteon::msg::Msg;

#[derive(Debug, Clone)]
pub enum TransportEvent {
    MessageReceived(Msg),
    MessageSent(Msg),
    Disconnected,
}

/// Registration returned by [`Transport::add_listener`].
pub struct TransportListener {
    pub id: u64,
    pub rx: mpsc::UnboundedReceiver<TransportEvent>,
}

struct Inner {
    outgoing: mpsc::UnboundedSender<Msg>,
    listeners: Mutex<HashMap<u64, mpsc::UnboundedSender<TransportEvent>>>,
    next_listener_id: AtomicU64,
    connected: AtomicBool,
}

#[derive(Clone)]
pub struct Transport {
    inner: Arc<Inner>,
}

impl Transport {
    /// Create a connected transport. The returned receiver yields every frame
    /// written through [`write_message`](Self::write_message), in order.
    pub fn new() -> (Self, mpsc::UnboundedReceiver<Msg>) {
        let (outgoing, outgoing_rx) = mpsc::unbounded_channel();
        let transport = Transport {
            inner: Arc::new(Inner {
                outgoing,
                listeners: Mutex::new(HashMap::new()),
                next_listener_id: AtomicU64::new(1),
                connected: AtomicBool::new(true),
            }),
        };
        (transport, outgoing_rx)
    }

    fn listeners(&self) -> std::sync::MutexGuard<'_, HashMap<u64, mpsc::UnboundedSender<TransportEvent>>> {
        self.inner
            .listeners
            .lock()
            .expect("transport listener mutex poisoned")
    }

    pub fn is_connected(&self) -> bool {
        self.inner.connected.load(Ordering::SeqCst)
    }

    pub fn add_listener(&self) -> TransportListener {
        let id = self.inner.next_listener_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::unbounded_channel();
        self.listeners().insert(id, tx);
        trace!("transport listener {} added", id);
        TransportListener { id, rx }
    }

    pub fn remove_listener(&self, id: u64) {
        if self.listeners().remove(&id).is_some() {
            trace!("transport listener {} removed", id);
        }
    }

    pub fn listener_count(&self) -> usize {
        self.listeners().len()
    }

    fn notify(&self, event: TransportEvent) {
        // drop listeners whose receiver is gone
        self.listeners()
            .retain(|_, tx| tx.send(event.clone()).is_ok());
    }

    /// Queue a frame for the modem.
    pub fn write_message(&self, msg: Msg) -> Result<(), TransportError> {
        if !self.is_connected() {
            return Err(TransportError::NotConnected);
        }
        trace!("TX {}", msg);
        self.inner
            .outgoing
            .send(msg.clone())
            .map_err(|_| TransportError::ChannelClosed)?;
        self.notify(TransportEvent::MessageSent(msg));
        Ok(())
    }

    /// Deliver a frame read from the modem to all listeners.
    pub fn dispatch(&self, msg: Msg) {
        trace!("RX {}", msg);
        self.notify(TransportEvent::MessageReceived(msg));
    }

    /// Mark the port as gone and tell every listener.
    pub fn disconnected(&self) {
        if self.inner.connected.swap(false, Ordering::SeqCst) {
            warn!("modem transport disconnected");
            self.notify(TransportEvent::Disconnected);
        } else {
            debug!("transport already disconnected");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::insteon::address::InsteonAddress;

    #[tokio::test]
    async fn fans_out_and_unregisters() {
        let (transport, mut out) = Transport::new();
        let mut a = transport.add_listener();
        let b = transport.add_listener();
        assert_eq!(transport.listener_count(), 2);

        let msg = Msg::standard(InsteonAddress::new(1, 2, 3), 0x19, 0x00);
        tokio_test::assert_ok!(transport.write_message(msg.clone()));
        assert_eq!(out.recv().await.unwrap(), msg);
        assert!(matches!(a.rx.recv().await, Some(TransportEvent::MessageSent(_))));

        transport.remove_listener(b.id);
        assert_eq!(transport.listener_count(), 1);

        transport.disconnected();
        assert!(matches!(a.rx.recv().await, Some(TransportEvent::Disconnected)));
        assert!(matches!(
            transport.write_message(msg),
            Err(TransportError::NotConnected)
        ));
    }
}
