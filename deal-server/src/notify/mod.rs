//! Notification emitter
//!
//! Fire-and-forget side channel to the counter-party. The coordinator calls
//! [`NotificationEmitter::emit`] after a transition has committed; a failed
//! emit is logged and never rolls the transition back.

use async_trait::async_trait;
use shared::Notification;
use thiserror::Error;
use tokio::sync::mpsc;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum NotifyError {
    #[error("Notification channel closed")]
    Closed,

    #[error("Notification channel full, dropped notification for {0}")]
    Full(String),

    #[error("Notification delivery failed: {0}")]
    Delivery(String),
}

/// Delivery sink for counter-party notifications
#[async_trait]
pub trait NotificationEmitter: Send + Sync {
    async fn emit(&self, notification: Notification) -> Result<(), NotifyError>;
}

/// Emitter backed by a bounded mpsc channel
///
/// Never blocks the caller: a full channel drops the notification.
#[derive(Debug, Clone)]
pub struct ChannelEmitter {
    tx: mpsc::Sender<Notification>,
}

impl ChannelEmitter {
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<Notification>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { tx }, rx)
    }
}

#[async_trait]
impl NotificationEmitter for ChannelEmitter {
    async fn emit(&self, notification: Notification) -> Result<(), NotifyError> {
        match self.tx.try_send(notification) {
            Ok(()) => Ok(()),
            Err(mpsc::error::TrySendError::Full(n)) => {
                tracing::warn!(
                    recipient = %n.recipient_id,
                    kind = ?n.kind,
                    "Notification channel full, dropping"
                );
                Err(NotifyError::Full(n.recipient_id))
            }
            Err(mpsc::error::TrySendError::Closed(_)) => Err(NotifyError::Closed),
        }
    }
}

/// Emitter that discards everything
#[derive(Debug, Clone, Default)]
pub struct NoopEmitter;

#[async_trait]
impl NotificationEmitter for NoopEmitter {
    async fn emit(&self, _notification: Notification) -> Result<(), NotifyError> {
        Ok(())
    }
}
