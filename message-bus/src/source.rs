//! Notification sources
//!
//! A source delivers ledger notifications in commit order, each tagged with
//! a cursor. Handing a cursor back as `resume_after` continues right after
//! that notification.

use crate::{metrics::NOTIFICATION_RECEIVE_TOTAL, Error, Result};
use async_trait::async_trait;
use futures::stream::{self, BoxStream, StreamExt, TryStreamExt};
use ledger_core::{Ledger, Notification};
use tokio_stream::wrappers::{errors::BroadcastStreamRecvError, BroadcastStream};

/// A notification and its position in the source
#[derive(Debug, Clone, PartialEq)]
pub struct SourcedNotification {
    /// Resume position
    pub cursor: u64,
    /// The notification
    pub notification: Notification,
}

/// Stream returned by [`NotificationSource::subscribe`]
pub type NotificationStream = BoxStream<'static, Result<SourcedNotification>>;

/// Delivers ledger notifications
#[async_trait]
pub trait NotificationSource: Send + Sync {
    /// Name used in logs and metrics
    fn name(&self) -> &str;

    /// Subscribe; `None` starts with notifications committed from now on
    async fn subscribe(&self, resume_after: Option<u64>) -> Result<NotificationStream>;
}

/// In-process source reading straight from a ledger
///
/// Replays the persisted notification log after the cursor, then continues
/// with live notifications. The cursor is the notification sequence.
#[derive(Clone)]
pub struct LedgerSource {
    ledger: Ledger,
    replay_page: usize,
}

impl LedgerSource {
    /// Source over `ledger`
    pub fn new(ledger: Ledger) -> Self {
        Self {
            ledger,
            replay_page: 256,
        }
    }

    /// Notifications loaded per replay page
    pub fn with_replay_page(mut self, replay_page: usize) -> Self {
        self.replay_page = replay_page.max(1);
        self
    }
}

#[async_trait]
impl NotificationSource for LedgerSource {
    fn name(&self) -> &str {
        "ledger"
    }

    async fn subscribe(&self, resume_after: Option<u64>) -> Result<NotificationStream> {
        // Subscribe before reading the log so nothing committed in between is lost
        let live = BroadcastStream::new(self.ledger.subscribe());
        let start = match resume_after {
            Some(cursor) => cursor,
            None => self.ledger.last_sequence()?,
        };

        tracing::info!(
            start,
            head = self.ledger.last_sequence()?,
            "Subscribing to ledger notifications"
        );

        let ledger = self.ledger.clone();
        let page = self.replay_page;
        let replay = stream::try_unfold(start, move |after| {
            let ledger = ledger.clone();
            async move {
                let batch = ledger.notifications_after(after, page)?;
                let Some(next) = batch.last().map(|n| n.sequence) else {
                    return Ok(None);
                };
                NOTIFICATION_RECEIVE_TOTAL
                    .with_label_values(&["ledger", "replay"])
                    .inc_by(batch.len() as u64);
                let items = stream::iter(batch.into_iter().map(Ok::<Notification, Error>));
                Ok::<_, Error>(Some((items, next)))
            }
        })
        .try_flatten();

        let live = live.map(|received| match received {
            Ok(notification) => {
                NOTIFICATION_RECEIVE_TOTAL
                    .with_label_values(&["ledger", "live"])
                    .inc();
                Ok(notification)
            }
            Err(BroadcastStreamRecvError::Lagged(skipped)) => Err(Error::Lagged(skipped)),
        });

        let mut last = start;
        let stream = replay
            .chain(live)
            .filter_map(move |item| {
                let item = match item {
                    // Live copies of notifications already replayed
                    Ok(notification) if notification.sequence <= last => None,
                    Ok(notification) => {
                        last = notification.sequence;
                        Some(Ok(SourcedNotification {
                            cursor: notification.sequence,
                            notification,
                        }))
                    }
                    Err(e) => Some(Err(e)),
                };
                futures::future::ready(item)
            })
            .boxed();

        Ok(stream)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ledger_core::{ClientIdentity, Config};

    fn issuer(id: &str) -> ClientIdentity {
        ClientIdentity::new(id, "IssuerMSP")
    }

    async fn next_cursor(stream: &mut NotificationStream) -> u64 {
        tokio::time::timeout(std::time::Duration::from_secs(1), stream.next())
            .await
            .expect("timed out")
            .expect("stream ended")
            .expect("stream error")
            .cursor
    }

    #[tokio::test]
    async fn test_resume_replays_exactly_missed_notifications() {
        let ledger = Ledger::in_memory(Config::default()).unwrap();
        for id in ["a", "b", "c"] {
            ledger.create_user_account(&issuer(id)).await.unwrap();
        }

        let source = LedgerSource::new(ledger.clone()).with_replay_page(2);
        let mut stream = source.subscribe(Some(1)).await.unwrap();
        assert_eq!(next_cursor(&mut stream).await, 2);
        assert_eq!(next_cursor(&mut stream).await, 3);

        ledger.create_user_account(&issuer("d")).await.unwrap();
        assert_eq!(next_cursor(&mut stream).await, 4);
    }

    #[tokio::test]
    async fn test_subscribe_from_now_skips_history() {
        let ledger = Ledger::in_memory(Config::default()).unwrap();
        ledger.create_user_account(&issuer("a")).await.unwrap();

        let source = LedgerSource::new(ledger.clone());
        let mut stream = source.subscribe(None).await.unwrap();
        ledger.create_user_account(&issuer("b")).await.unwrap();

        let received = stream.next().await.unwrap().unwrap();
        assert_eq!(received.cursor, 2);
        assert_eq!(received.notification.events[0].event_type, "user-info");
    }

    #[tokio::test]
    async fn test_replay_from_start() {
        let ledger = Ledger::in_memory(Config::default()).unwrap();
        ledger.create_user_account(&issuer("a")).await.unwrap();
        ledger.create_user_account(&issuer("b")).await.unwrap();

        let mut stream = LedgerSource::new(ledger).subscribe(Some(0)).await.unwrap();
        assert_eq!(next_cursor(&mut stream).await, 1);
        assert_eq!(next_cursor(&mut stream).await, 2);
    }
}
