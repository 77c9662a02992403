use std::io;

use nix::sys::signal::Signal;
use tokio::{
    signal::unix::{signal, SignalKind},
    sync::mpsc,
    task::JoinHandle,
};
use tokio_util::sync::CancellationToken;

use crate::{
    messaging::Event,
    signals::{signal_name, HANDLED_SIGNALS},
};

/// Forwards HUP, INT, TERM and QUIT into the coordinator's event stream.
pub(crate) struct SignalForwarder {
    token: CancellationToken,
    task: JoinHandle<()>,
}

impl SignalForwarder {
    /// Installs the handlers. Fails if any of them cannot be registered.
    pub(crate) fn install(events: mpsc::UnboundedSender<Event>) -> io::Result<Self> {
        let [hup, int, term, quit] = HANDLED_SIGNALS;
        let mut on_hup = signal(SignalKind::from_raw(hup as i32))?;
        let mut on_int = signal(SignalKind::from_raw(int as i32))?;
        let mut on_term = signal(SignalKind::from_raw(term as i32))?;
        let mut on_quit = signal(SignalKind::from_raw(quit as i32))?;

        let token = CancellationToken::new();
        let cancelled = token.clone();
        let task = tokio::spawn(async move {
            loop {
                let received: Signal = tokio::select! {
                    _ = cancelled.cancelled() => break,
                    Some(()) = on_hup.recv() => hup,
                    Some(()) = on_int.recv() => int,
                    Some(()) = on_term.recv() => term,
                    Some(()) = on_quit.recv() => quit,
                };
                tracing::debug!(signal = signal_name(received), "caught signal");
                if events.send(Event::Signal(received)).is_err() {
                    break;
                }
            }
        });

        Ok(Self { token, task })
    }

    pub(crate) async fn stop(self) {
        self.token.cancel();
        let _ = self.task.await;
    }
}
