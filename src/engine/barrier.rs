//! Join point for the two stream readers of a run.
//!
//! Reaping is gated on this barrier so the process is never waited on, and the
//! workspace never removed, while a reader could still be reading.

use tokio::sync::oneshot;

/// Fires once, either through [`DoneSignal::signal`] or when dropped.
#[derive(Debug)]
pub struct DoneSignal {
    tx: oneshot::Sender<()>,
}

impl DoneSignal {
    pub fn signal(self) {
        let _ = self.tx.send(());
    }
}

/// Resolves after both participants have signalled.
#[derive(Debug)]
pub struct Completion {
    first: oneshot::Receiver<()>,
    second: oneshot::Receiver<()>,
}

impl Completion {
    pub async fn wait(self) {
        // A dropped sender counts as done.
        let _ = tokio::join!(self.first, self.second);
    }
}

pub fn done_pair() -> (DoneSignal, DoneSignal, Completion) {
    let (first_tx, first) = oneshot::channel();
    let (second_tx, second) = oneshot::channel();
    (
        DoneSignal { tx: first_tx },
        DoneSignal { tx: second_tx },
        Completion { first, second },
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn waits_for_both_signals() {
        let (a, b, done) = done_pair();
        let waiter = tokio::spawn(done.wait());

        a.signal();
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiter.is_finished());

        b.signal();
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .expect("barrier should release")
            .unwrap();
    }

    #[tokio::test]
    async fn dropped_signal_counts_as_done() {
        let (a, b, done) = done_pair();
        drop(a);
        b.signal();
        tokio::time::timeout(Duration::from_secs(1), done.wait())
            .await
            .expect("barrier should release");
    }
}
