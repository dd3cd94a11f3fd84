//! Handoff between stream readers and the display consumer.
//!
//! The channel holds a single event, so a fast engine is throttled to the rate
//! at which the consumer takes events instead of buffering without bound.

use crate::model::DisplayEvent;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TryRecvError;

const QUEUE_DEPTH: usize = 1;

/// Returned by [`EventSender::push`] once the consumer has gone away.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConsumerGone;

#[derive(Debug, Clone)]
pub struct EventSender {
    tx: mpsc::Sender<DisplayEvent>,
}

#[derive(Debug)]
pub struct EventReceiver {
    rx: mpsc::Receiver<DisplayEvent>,
}

pub fn event_queue() -> (EventSender, EventReceiver) {
    let (tx, rx) = mpsc::channel(QUEUE_DEPTH);
    (EventSender { tx }, EventReceiver { rx })
}

impl EventSender {
    /// Hand an event to the consumer, waiting while the queue is full.
    pub async fn push(&self, event: DisplayEvent) -> Result<(), ConsumerGone> {
        self.tx.send(event).await.map_err(|_| ConsumerGone)
    }
}

impl EventReceiver {
    /// Take one event if one is ready. Never waits.
    pub fn try_take(&mut self) -> Option<DisplayEvent> {
        match self.rx.try_recv() {
            Ok(ev) => Some(ev),
            Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => None,
        }
    }

    /// Wait for the next event. `None` once every sender is dropped.
    pub async fn recv(&mut self) -> Option<DisplayEvent> {
        self.rx.recv().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn try_take_is_non_blocking_on_empty_queue() {
        let (_tx, mut rx) = event_queue();
        assert_eq!(rx.try_take(), None);
    }

    #[tokio::test]
    async fn push_waits_for_consumer_when_full() {
        let (tx, mut rx) = event_queue();
        tx.push(DisplayEvent::output("first")).await.unwrap();

        let blocked = tokio::time::timeout(
            Duration::from_millis(50),
            tx.push(DisplayEvent::output("second")),
        )
        .await;
        assert!(blocked.is_err(), "second push should park until a take");

        assert_eq!(rx.try_take(), Some(DisplayEvent::output("first")));
        tx.push(DisplayEvent::output("second")).await.unwrap();
        assert_eq!(rx.try_take(), Some(DisplayEvent::output("second")));
    }

    #[tokio::test]
    async fn push_fails_once_consumer_dropped() {
        let (tx, rx) = event_queue();
        drop(rx);
        assert_eq!(tx.push(DisplayEvent::error("x")).await, Err(ConsumerGone));
    }

    #[tokio::test]
    async fn polling_drains_every_event_from_two_producers() {
        let (tx, mut rx) = event_queue();
        let out = tx.clone();
        let err = tx;
        let a = tokio::spawn(async move {
            for i in 0..50 {
                out.push(DisplayEvent::output(format!("o{i}"))).await.unwrap();
            }
        });
        let b = tokio::spawn(async move {
            for i in 0..50 {
                err.push(DisplayEvent::error(format!("e{i}"))).await.unwrap();
            }
        });

        let mut outputs = Vec::new();
        let mut errors = Vec::new();
        let mut tick = tokio::time::interval(Duration::from_millis(1));
        while outputs.len() + errors.len() < 100 {
            tick.tick().await;
            if let Some(ev) = rx.try_take() {
                match ev.channel {
                    crate::model::Channel::Output => outputs.push(ev.payload),
                    crate::model::Channel::Error => errors.push(ev.payload),
                }
            }
        }
        a.await.unwrap();
        b.await.unwrap();

        let expected_out: Vec<String> = (0..50).map(|i| format!("o{i}")).collect();
        let expected_err: Vec<String> = (0..50).map(|i| format!("e{i}")).collect();
        assert_eq!(outputs, expected_out);
        assert_eq!(errors, expected_err);
    }
}
