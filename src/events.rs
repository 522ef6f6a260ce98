//! Events emitted by the engine for the notification collaborator.
//!
//! Delivery is out of the engine's hands: it calls [`Notifier::notify`]
//! and moves on. The broadcast notifier fans events out to any number of
//! subscribers (the event journal, tests, future webhooks).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::{Mutex, PoisonError};
use tokio::sync::broadcast;
use tracing::debug;

use crate::model::{AcceptedVia, SuggestionId, UnitKey, UserId};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ReviewEvent {
    SuggestionAdded {
        unit: UnitKey,
        suggestion_id: SuggestionId,
        author: UserId,
        at: DateTime<Utc>,
    },
    SuggestionAccepted {
        unit: UnitKey,
        suggestion_id: SuggestionId,
        author: UserId,
        text: String,
        via: AcceptedVia,
        at: DateTime<Utc>,
    },
    SuggestionWithdrawn {
        unit: UnitKey,
        suggestion_id: SuggestionId,
        by: UserId,
        at: DateTime<Utc>,
    },
    TranslationSaved {
        unit: UnitKey,
        author: UserId,
        text: String,
        at: DateTime<Utc>,
    },
    LockAcquired {
        unit: UnitKey,
        holder: UserId,
        expires_at: DateTime<Utc>,
        at: DateTime<Utc>,
    },
    LockReleased {
        unit: UnitKey,
        holder: UserId,
        by: UserId,
        at: DateTime<Utc>,
    },
    LockExpired {
        unit: UnitKey,
        holder: UserId,
        expired_at: DateTime<Utc>,
    },
}

impl ReviewEvent {
    /// Stable name of the event kind, used as the journal discriminator
    pub fn kind(&self) -> &'static str {
        match self {
            Self::SuggestionAdded { .. } => "suggestion_added",
            Self::SuggestionAccepted { .. } => "suggestion_accepted",
            Self::SuggestionWithdrawn { .. } => "suggestion_withdrawn",
            Self::TranslationSaved { .. } => "translation_saved",
            Self::LockAcquired { .. } => "lock_acquired",
            Self::LockReleased { .. } => "lock_released",
            Self::LockExpired { .. } => "lock_expired",
        }
    }

    pub fn unit(&self) -> &UnitKey {
        match self {
            Self::SuggestionAdded { unit, .. }
            | Self::SuggestionAccepted { unit, .. }
            | Self::SuggestionWithdrawn { unit, .. }
            | Self::TranslationSaved { unit, .. }
            | Self::LockAcquired { unit, .. }
            | Self::LockReleased { unit, .. }
            | Self::LockExpired { unit, .. } => unit,
        }
    }

    /// When the event happened
    pub fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            Self::SuggestionAdded { at, .. }
            | Self::SuggestionAccepted { at, .. }
            | Self::SuggestionWithdrawn { at, .. }
            | Self::TranslationSaved { at, .. }
            | Self::LockAcquired { at, .. }
            | Self::LockReleased { at, .. } => *at,
            Self::LockExpired { expired_at, .. } => *expired_at,
        }
    }
}

/// Notification collaborator. Must not block.
pub trait Notifier: Send + Sync {
    fn notify(&self, event: ReviewEvent);
}

/// Drops every event
#[derive(Debug, Default, Clone, Copy)]
pub struct NullNotifier;

impl Notifier for NullNotifier {
    fn notify(&self, _event: ReviewEvent) {}
}

/// Fans events out over a tokio broadcast channel.
#[derive(Debug, Clone)]
pub struct BroadcastNotifier {
    sender: broadcast::Sender<ReviewEvent>,
}

impl BroadcastNotifier {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ReviewEvent> {
        self.sender.subscribe()
    }
}

impl Notifier for BroadcastNotifier {
    fn notify(&self, event: ReviewEvent) {
        // No receivers is not an error: nobody is listening yet
        if self.sender.send(event).is_err() {
            debug!("Review event dropped, no subscribers");
        }
    }
}

/// Keeps every event in memory, in order.
#[derive(Debug, Default)]
pub struct RecordingNotifier {
    events: Mutex<Vec<ReviewEvent>>,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<ReviewEvent> {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Kinds of the recorded events, in order
    pub fn kinds(&self) -> Vec<&'static str> {
        self.events().iter().map(ReviewEvent::kind).collect()
    }
}

impl Notifier for RecordingNotifier {
    fn notify(&self, event: ReviewEvent) {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(event);
    }
}
