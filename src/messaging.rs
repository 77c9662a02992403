use std::collections::VecDeque;

use nix::sys::signal::Signal;
use tokio::sync::{mpsc, oneshot};

use crate::{status::StatusSnapshot, worker::WorkerExit};

/// Everything that can advance the coordinator, serialized into one stream.
#[derive(Debug)]
pub(crate) enum Event {
    /// A control signal, from the OS or from a `StarterHandle`.
    Signal(Signal),
    /// Sent by an exit watcher once its worker has been reaped.
    Exited(WorkerExit),
    /// Sent by a `StarterHandle` asking for the current registry.
    Snapshot(oneshot::Sender<StatusSnapshot>),
}

/// The coordinator's inbound queue.
///
/// Events pulled off the channel while a launch is waiting out its grace
/// period are parked in `deferred` and handed back, in order, before anything
/// newer.
pub(crate) struct Inbox {
    rx: mpsc::UnboundedReceiver<Event>,
    deferred: VecDeque<Event>,
}

impl Inbox {
    pub(crate) fn new(rx: mpsc::UnboundedReceiver<Event>) -> Self {
        Self {
            rx,
            deferred: VecDeque::new(),
        }
    }

    /// Next event for the coordinator. `None` once every sender is gone.
    pub(crate) async fn next(&mut self) -> Option<Event> {
        if let Some(event) = self.deferred.pop_front() {
            return Some(event);
        }
        self.rx.recv().await
    }

    /// Next event straight off the channel, skipping the deferred queue.
    pub(crate) async fn recv_fresh(&mut self) -> Option<Event> {
        self.rx.recv().await
    }

    pub(crate) fn defer(&mut self, event: Event) {
        self.deferred.push_back(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn deferred_events_come_first_in_order() {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut inbox = Inbox::new(rx);

        tx.send(Event::Signal(Signal::SIGQUIT)).unwrap();
        inbox.defer(Event::Signal(Signal::SIGHUP));
        inbox.defer(Event::Signal(Signal::SIGTERM));

        let order: Vec<Signal> = [
            inbox.next().await,
            inbox.next().await,
            inbox.next().await,
        ]
        .into_iter()
        .map(|event| match event {
            Some(Event::Signal(sig)) => sig,
            other => panic!("unexpected event {other:?}"),
        })
        .collect();
        assert_eq!(order, vec![Signal::SIGHUP, Signal::SIGTERM, Signal::SIGQUIT]);
    }

    #[tokio::test]
    async fn closed_channel_ends_the_stream() {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut inbox = Inbox::new(rx);
        drop(tx);
        assert!(inbox.next().await.is_none());
    }
}
