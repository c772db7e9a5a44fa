//! Change detection: which explorer events have not been notified yet.
//!
//! Policies:
//! - Ordering: events are stable-sorted by timestamp. Events sharing a
//!   timestamp keep the order the explorer client produced (oldest-first), so
//!   the explorer's own ordering breaks ties.
//! - Bootstrap: with no cursor, or a cursor that never saw an event, every
//!   event inside the lookback window is new. The window bounds the backlog.
//! - Established cursor: events after the cursor's event in that order are
//!   new. If the cursor's event is missing from the result (aged out of the
//!   window, or dropped by the explorer), events strictly newer than the
//!   cursor's timestamp are new.
//! - Same-timestamp siblings: in that fallback, an unseen event carrying
//!   exactly the cursor's timestamp is treated as already notified. The
//!   window cuts by timestamp, so an aged-out cursor event takes its siblings
//!   with it; only a sibling the explorer first reports after the cursor's
//!   own event disappeared is lost. Duplicates are the worse failure here.
//! - The cursor moves to the latest event of the whole returned set and never
//!   moves backwards in time.

use std::collections::HashSet;

use chrono::{DateTime, Utc};

use chainwatch_common::types::{Cursor, Event};

/// Outcome of one detection pass.
#[derive(Debug, Clone, PartialEq)]
pub struct Detection {
    /// New events in chronological order.
    pub new_events: Vec<Event>,
    pub next_cursor: Cursor,
}

pub struct ChangeDetector;

impl ChangeDetector {
    pub fn detect(events: Vec<Event>, cursor: Option<&Cursor>, now: DateTime<Utc>) -> Detection {
        let ordered = Self::chronological(events);

        let new_events = match cursor {
            None => ordered.clone(),
            Some(cursor) if cursor.is_bootstrap() => ordered.clone(),
            Some(cursor) => Self::after_cursor(&ordered, cursor),
        };

        let next_cursor = Self::advance(cursor, ordered.last(), now);

        Detection {
            new_events,
            next_cursor,
        }
    }

    /// Drop repeated ids (first occurrence wins), then stable-sort by timestamp.
    fn chronological(events: Vec<Event>) -> Vec<Event> {
        let mut seen = HashSet::new();
        let mut unique: Vec<Event> = events
            .into_iter()
            .filter(|e| seen.insert(e.id.clone()))
            .collect();
        unique.sort_by_key(|e| e.timestamp);
        unique
    }

    fn after_cursor(ordered: &[Event], cursor: &Cursor) -> Vec<Event> {
        if let Some(last_id) = cursor.last_event_id.as_deref()
            && let Some(pos) = ordered.iter().position(|e| e.id == last_id)
        {
            return ordered[pos + 1..].to_vec();
        }

        // The cursor's event is no longer in the window.
        let boundary = cursor.last_event_at.unwrap_or(cursor.last_checked_at);
        ordered
            .iter()
            .filter(|e| e.timestamp > boundary)
            .cloned()
            .collect()
    }

    fn advance(previous: Option<&Cursor>, latest: Option<&Event>, now: DateTime<Utc>) -> Cursor {
        match (previous, latest) {
            (Some(prev), Some(latest))
                if prev
                    .last_event_at
                    .is_some_and(|at| latest.timestamp < at) =>
            {
                Cursor {
                    last_checked_at: now,
                    ..prev.clone()
                }
            }
            (_, Some(latest)) => Cursor::at(latest, now),
            (Some(prev), None) => Cursor {
                last_checked_at: now,
                ..prev.clone()
            },
            (None, None) => Cursor::empty(now),
        }
    }
}
