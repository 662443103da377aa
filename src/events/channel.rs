//! Crossbeam-backed event plumbing.

use super::Event;
use crossbeam_channel::{bounded, unbounded, Receiver, Sender};
use std::time::Duration;

/// Cloneable handle the engine publishes events through
///
/// A sender without a channel drops every event, and so does a sender whose
/// receiver has gone away.
#[derive(Debug, Clone, Default)]
pub struct EventSender {
    inner: Option<Sender<Event>>,
}

impl EventSender {
    pub fn new(sender: Sender<Event>) -> Self {
        Self {
            inner: Some(sender),
        }
    }

    pub fn send(&self, event: Event) {
        if let Some(sender) = &self.inner {
            let _ = sender.send(event);
        }
    }

    /// Whether this sender is attached to a channel at all
    pub fn is_connected(&self) -> bool {
        self.inner.is_some()
    }
}

/// Consumer side, for progress displays
#[derive(Debug)]
pub struct EventReceiver {
    inner: Receiver<Event>,
}

impl EventReceiver {
    pub fn recv(&self) -> Option<Event> {
        self.inner.recv().ok()
    }

    /// `None` on timeout or once every sender is gone
    pub fn recv_timeout(&self, timeout: Duration) -> Option<Event> {
        self.inner.recv_timeout(timeout).ok()
    }

    /// Everything already queued, without blocking
    pub fn drain(&self) -> Vec<Event> {
        self.inner.try_iter().collect()
    }

    /// Blocks until every sender is dropped
    pub fn iter(&self) -> impl Iterator<Item = Event> + '_ {
        self.inner.iter()
    }
}

pub struct EventChannel;

impl EventChannel {
    #[allow(clippy::new_ret_no_self)]
    pub fn new() -> (EventSender, EventReceiver) {
        let (sender, receiver) = unbounded();
        (EventSender::new(sender), EventReceiver { inner: receiver })
    }

    /// A channel whose senders block once `capacity` events are queued
    pub fn bounded(capacity: usize) -> (EventSender, EventReceiver) {
        let (sender, receiver) = bounded(capacity);
        (EventSender::new(sender), EventReceiver { inner: receiver })
    }
}

/// A sender that goes nowhere
pub fn null_sender() -> EventSender {
    EventSender::default()
}
