//! Out-of-band delivery and the guardian's notification feed

use crate::crypto::Address;
use crate::errors::Result;
use crate::vault::OpId;
use async_trait::async_trait;
use tokio::sync::broadcast;
use tracing::info;

/// Sends short messages to a human outside the ledger (SMS, email, ...)
#[async_trait]
pub trait OobChannel: Send + Sync {
    async fn send(&self, recipient: &str, message: &str) -> Result<()>;
}

/// Channel that only logs, for development hosts
#[derive(Debug, Default, Clone, Copy)]
pub struct LogChannel;

#[async_trait]
impl OobChannel for LogChannel {
    async fn send(&self, recipient: &str, message: &str) -> Result<()> {
        info!(recipient = %recipient, "Out-of-band message: {}", message);
        Ok(())
    }
}

/// What the guardian did, for anyone listening
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GuardianNotice {
    Tracked {
        account: Address,
        op_id: OpId,
        due_time: u64,
    },
    Resolved {
        account: Address,
        op_id: OpId,
    },
    Submitted {
        account: Address,
        op_id: OpId,
        action: &'static str,
    },
    SubmissionFailed {
        account: Address,
        op_id: OpId,
        action: &'static str,
        error: String,
    },
    ChallengeSent {
        account: Address,
        op_id: OpId,
    },
    Rejected {
        account: Address,
        op_id: OpId,
        reason: String,
    },
    DeviceValidated {
        account: Address,
        device: Address,
    },
}

/// Bounded fan-out of notices. Slow subscribers lose the oldest entries.
#[derive(Debug, Clone)]
pub struct NoticeBus {
    tx: broadcast::Sender<GuardianNotice>,
}

impl NoticeBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<GuardianNotice> {
        self.tx.subscribe()
    }

    /// Publish without waiting; having no subscribers is fine
    pub fn publish(&self, notice: GuardianNotice) {
        let _ = self.tx.send(notice);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::Hash32;
    use tokio::sync::broadcast::error::RecvError;

    fn resolved(n: u8) -> GuardianNotice {
        GuardianNotice::Resolved {
            account: Address::repeat_byte(1),
            op_id: Hash32([n; 32]),
        }
    }

    #[tokio::test]
    async fn test_slow_subscriber_loses_oldest() {
        let bus = NoticeBus::new(2);
        let mut rx = bus.subscribe();
        for n in 0..4 {
            bus.publish(resolved(n));
        }

        assert!(matches!(rx.recv().await, Err(RecvError::Lagged(2))));
        assert_eq!(rx.recv().await.unwrap(), resolved(2));
        assert_eq!(rx.recv().await.unwrap(), resolved(3));
    }

    #[tokio::test]
    async fn test_publish_without_subscribers() {
        let bus = NoticeBus::new(4);
        bus.publish(resolved(0));
        let mut rx = bus.subscribe();
        bus.publish(resolved(1));
        assert_eq!(rx.recv().await.unwrap(), resolved(1));
    }

    #[tokio::test]
    async fn test_log_channel_accepts_messages() {
        LogChannel.send("+15550100", "hello").await.unwrap();
    }
}
