//! Notification channel towards the external notification sink.
//!
//! Services emit a [`GovernanceEvent`] after each successful state transition.
//! Emission never blocks and never fails: when nobody is subscribed, or a
//! subscriber lags behind, events are dropped for that subscriber.
use serde::Serialize;
use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;

use crate::governance::{
    config::DEFAULT_NOTIFICATION_CAPACITY,
    infrastructure::naming::{ConsentId, DataType, RequestId, Timestamp},
};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "kebab-case", rename_all_fields = "camelCase")]
pub enum GovernanceEvent {
    ConsentGranted {
        consent_id: ConsentId,
        subject_id: String,
        data_type: DataType,
        purpose: String,
        expires_at: Timestamp,
    },
    ConsentRevoked {
        consent_id: ConsentId,
        subject_id: String,
        data_type: DataType,
        purpose: String,
    },
    ConsentExpired {
        consent_id: ConsentId,
        subject_id: String,
        data_type: DataType,
        purpose: String,
    },
    RequestOpened {
        request_id: RequestId,
        requester_id: String,
        subject_id: String,
    },
    RequestApproved {
        request_id: RequestId,
        requester_id: String,
        subject_id: String,
        consent_ids: Vec<ConsentId>,
    },
    RequestDenied {
        request_id: RequestId,
        requester_id: String,
        subject_id: String,
    },
}

#[derive(Debug, Clone)]
pub struct NotificationService {
    sender: broadcast::Sender<GovernanceEvent>,
}

impl Default for NotificationService {
    fn default() -> Self {
        Self::new(DEFAULT_NOTIFICATION_CAPACITY)
    }
}

impl NotificationService {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Fire-and-forget emission.
    pub fn emit(&self, event: GovernanceEvent) {
        // Ignore send errors, no subscriber is a valid state
        let _ = self.sender.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<GovernanceEvent> {
        self.sender.subscribe()
    }

    /// Events as a stream, lagging subscribers observe an error item.
    pub fn events(&self) -> BroadcastStream<GovernanceEvent> {
        BroadcastStream::new(self.sender.subscribe())
    }
}
