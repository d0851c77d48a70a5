//! In-process channel transport
//!
//! Two connected ends. Sending on one end calls the other end's sink on the
//! sending thread. Events that arrive before the receiving end is started are
//! buffered and flushed, in order, by [`Transport::start`].

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::frame::Frame;
use crate::transport::{
    Credentials, InboundSink, Transport, TransportError, TransportEvent, TransportKind,
};

#[derive(Default)]
struct Inbox {
    sink: Option<InboundSink>,
    backlog: VecDeque<TransportEvent>,
}

#[derive(Default)]
struct EndState {
    inbox: Mutex<Inbox>,
    closed: AtomicBool,
}

impl EndState {
    fn deliver(&self, event: TransportEvent) {
        let sink = {
            let mut inbox = self.inbox.lock();
            match &inbox.sink {
                Some(sink) if inbox.backlog.is_empty() => Arc::clone(sink),
                _ => {
                    inbox.backlog.push_back(event);
                    return;
                }
            }
        };
        sink(event);
    }
}

/// One end of an in-process link
pub struct ChannelTransport {
    local: Arc<EndState>,
    peer: Arc<EndState>,
    credentials: Credentials,
}

impl ChannelTransport {
    /// Creates two connected ends
    pub fn pair() -> (ChannelTransport, ChannelTransport) {
        let a = Arc::new(EndState::default());
        let b = Arc::new(EndState::default());
        let credentials = Credentials::current_process();
        (
            ChannelTransport {
                local: Arc::clone(&a),
                peer: Arc::clone(&b),
                credentials,
            },
            ChannelTransport {
                local: b,
                peer: a,
                credentials,
            },
        )
    }
}

impl Transport for ChannelTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::Channel
    }

    fn start(&self, sink: InboundSink) {
        loop {
            let backlog = {
                let mut inbox = self.local.inbox.lock();
                if inbox.backlog.is_empty() {
                    inbox.sink = Some(sink);
                    return;
                }
                std::mem::take(&mut inbox.backlog)
            };
            for event in backlog {
                sink(event);
            }
        }
    }

    fn send(&self, frame: Frame) -> Result<(), TransportError> {
        if self.is_closed() {
            return Err(TransportError::Closed);
        }
        self.peer.deliver(TransportEvent::Frame(frame));
        Ok(())
    }

    fn close(&self) {
        if self.local.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.local.inbox.lock().backlog.clear();
        if !self.peer.closed.load(Ordering::Acquire) {
            self.peer.deliver(TransportEvent::Closed);
        }
    }

    fn is_closed(&self) -> bool {
        self.local.closed.load(Ordering::Acquire) || self.peer.closed.load(Ordering::Acquire)
    }

    fn peer_credentials(&self) -> Option<Credentials> {
        Some(self.credentials)
    }
}

impl Drop for ChannelTransport {
    fn drop(&mut self) {
        self.close();
    }
}
