use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Number of nanoERG in one ERG.
pub const NANOERG_PER_ERG: i64 = 1_000_000_000;

/// ERG movements at or below this many nanoERG (0.0001 ERG) are dust and
/// are not notified unless tokens moved too.
pub const DUST_THRESHOLD_NANOERG: i64 = 100_000;

/// A Telegram chat, optionally scoped to a forum topic.
///
/// Identity is the `(chat_id, topic_id)` pair.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Destination {
    pub chat_id: String,
    #[serde(default)]
    pub topic_id: Option<i64>,
}

impl Destination {
    pub fn new(chat_id: impl Into<String>, topic_id: Option<i64>) -> Self {
        Self {
            chat_id: chat_id.into(),
            topic_id,
        }
    }
}

impl std::fmt::Display for Destination {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.topic_id {
            Some(topic) => write!(f, "{}#{}", self.chat_id, topic),
            None => write!(f, "{}", self.chat_id),
        }
    }
}

/// A watched address with its resolved notification routing.
///
/// Immutable after load. An empty `destinations` list means events are
/// detected but cannot be delivered anywhere.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MonitoredAddress {
    pub address: String,
    pub nickname: String,
    pub destinations: Vec<Destination>,
}

impl MonitoredAddress {
    pub fn is_deliverable(&self) -> bool {
        !self.destinations.is_empty()
    }
}

/// Net change of a single token for the watched address within one transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenDelta {
    pub token_id: String,
    pub name: Option<String>,
    pub decimals: Option<u32>,
    /// Raw token units; positive when received.
    pub amount: i64,
}

/// Which way value moved for the watched address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    Received,
    Sent,
    SelfTransfer,
}

impl std::fmt::Display for Direction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Direction::Received => write!(f, "received"),
            Direction::Sent => write!(f, "sent"),
            Direction::SelfTransfer => write!(f, "self_transfer"),
        }
    }
}

/// What an explorer transaction meant for the watched address.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct EventPayload {
    pub inclusion_height: Option<u64>,
    /// Net nanoERG change; positive when the address received funds.
    pub value_delta: i64,
    /// Non-zero token changes, sorted by token id.
    pub tokens: Vec<TokenDelta>,
}

impl EventPayload {
    /// Sign of the ERG change; a token-only transfer takes the sign of its
    /// first token movement. Zero net change of everything is a self transfer.
    pub fn direction(&self) -> Direction {
        match self.value_delta {
            v if v > 0 => Direction::Received,
            v if v < 0 => Direction::Sent,
            _ => match self.tokens.first().map(|t| t.amount) {
                Some(a) if a > 0 => Direction::Received,
                Some(a) if a < 0 => Direction::Sent,
                _ => Direction::SelfTransfer,
            },
        }
    }

    /// No tokens moved and the ERG change is within [`DUST_THRESHOLD_NANOERG`].
    pub fn is_dust(&self) -> bool {
        self.tokens.is_empty() && self.value_delta.unsigned_abs() <= DUST_THRESHOLD_NANOERG as u64
    }
}

/// Confirmed holding of one token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenBalance {
    pub token_id: String,
    pub name: Option<String>,
    pub decimals: Option<u32>,
    /// Raw token units.
    pub amount: u64,
}

/// Confirmed balance of an address.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct AddressBalance {
    pub nano_ergs: u64,
    pub tokens: Vec<TokenBalance>,
}

/// A single on-chain activity item for an address.
///
/// `id` is explorer-assigned and is the deduplication key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    pub payload: EventPayload,
}

/// Per-address marker of the most recently processed event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cursor {
    pub last_event_id: Option<String>,
    pub last_event_at: Option<DateTime<Utc>>,
    pub last_checked_at: DateTime<Utc>,
}

impl Cursor {
    /// A cursor positioned at `event`.
    pub fn at(event: &Event, checked_at: DateTime<Utc>) -> Self {
        Self {
            last_event_id: Some(event.id.clone()),
            last_event_at: Some(event.timestamp),
            last_checked_at: checked_at,
        }
    }

    /// A cursor for an address that has been checked but has no activity yet.
    pub fn empty(checked_at: DateTime<Utc>) -> Self {
        Self {
            last_event_id: None,
            last_event_at: None,
            last_checked_at: checked_at,
        }
    }

    /// Whether this cursor still needs the bootstrap policy.
    pub fn is_bootstrap(&self) -> bool {
        self.last_event_id.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn payload(value_delta: i64, tokens: Vec<i64>) -> EventPayload {
        EventPayload {
            inclusion_height: Some(1),
            value_delta,
            tokens: tokens
                .into_iter()
                .enumerate()
                .map(|(i, amount)| TokenDelta {
                    token_id: format!("token{}", i),
                    name: None,
                    decimals: None,
                    amount,
                })
                .collect(),
        }
    }

    #[test]
    fn test_direction_from_value() {
        assert_eq!(payload(5, vec![]).direction(), Direction::Received);
        assert_eq!(payload(-5, vec![]).direction(), Direction::Sent);
        assert_eq!(payload(0, vec![]).direction(), Direction::SelfTransfer);
    }

    #[test]
    fn test_direction_token_only() {
        assert_eq!(payload(0, vec![10]).direction(), Direction::Received);
        assert_eq!(payload(0, vec![-10]).direction(), Direction::Sent);
        assert_eq!(payload(0, vec![-10, 10]).direction(), Direction::Sent);
    }

    #[test]
    fn test_direction_value_wins_over_tokens() {
        assert_eq!(payload(5, vec![-10]).direction(), Direction::Received);
        assert_eq!(payload(-5, vec![10]).direction(), Direction::Sent);
    }

    #[test]
    fn test_dust_threshold() {
        assert!(payload(0, vec![]).is_dust());
        assert!(payload(DUST_THRESHOLD_NANOERG, vec![]).is_dust());
        assert!(payload(-DUST_THRESHOLD_NANOERG, vec![]).is_dust());
        assert!(!payload(DUST_THRESHOLD_NANOERG + 1, vec![]).is_dust());
        assert!(!payload(-DUST_THRESHOLD_NANOERG - 1, vec![]).is_dust());
        assert!(!payload(1, vec![3]).is_dust());
        assert!(!payload(i64::MIN, vec![]).is_dust());
    }

    #[test]
    fn test_destination_display() {
        assert_eq!(Destination::new("-100123", Some(7)).to_string(), "-100123#7");
        assert_eq!(Destination::new("42", None).to_string(), "42");
    }

    #[test]
    fn test_destination_topic_defaults_to_none() {
        let dest: Destination = serde_json::from_str(r#"{"chat_id": "42"}"#).unwrap();
        assert_eq!(dest.topic_id, None);
    }

    #[test]
    fn test_cursor_bootstrap() {
        let now = Utc::now();
        assert!(Cursor::empty(now).is_bootstrap());

        let event = Event {
            id: "e1".to_string(),
            timestamp: now,
            payload: EventPayload::default(),
        };
        let cursor = Cursor::at(&event, now);
        assert!(!cursor.is_bootstrap());
        assert_eq!(cursor.last_event_id.as_deref(), Some("e1"));
        assert_eq!(cursor.last_event_at, Some(now));
    }
}
