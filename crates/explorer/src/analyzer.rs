//! Reduces an explorer transaction to what it meant for one watched address.

use std::collections::BTreeMap;

use chrono::DateTime;

use chainwatch_common::types::{Event, EventPayload, TokenDelta};

use crate::wire::{ExplorerBox, ExplorerTransaction};

pub struct TransactionAnalyzer;

impl TransactionAnalyzer {
    /// Build an [`Event`] for `address` from a raw explorer transaction.
    ///
    /// Returns `None` when the transaction carries an unusable timestamp.
    pub fn to_event(tx: &ExplorerTransaction, address: &str) -> Option<Event> {
        let Some(timestamp) = DateTime::from_timestamp_millis(tx.timestamp) else {
            tracing::warn!(tx_id = %tx.id, timestamp = tx.timestamp, "Skipping transaction with invalid timestamp");
            return None;
        };

        Some(Event {
            id: tx.id.clone(),
            timestamp,
            payload: Self::analyze(tx, address),
        })
    }

    /// Net ERG and token movement for `address`: outputs to it minus inputs from it.
    pub fn analyze(tx: &ExplorerTransaction, address: &str) -> EventPayload {
        let mut value_delta: i64 = 0;
        let mut tokens: BTreeMap<String, TokenDelta> = BTreeMap::new();

        let owned = |b: &&ExplorerBox| b.address.as_deref() == Some(address);

        for (sign, boxes) in [(-1i64, &tx.inputs), (1i64, &tx.outputs)] {
            for b in boxes.iter().filter(owned) {
                value_delta = value_delta.saturating_add(sign.saturating_mul(b.value));

                for asset in &b.assets {
                    let entry = tokens
                        .entry(asset.token_id.clone())
                        .or_insert_with(|| TokenDelta {
                            token_id: asset.token_id.clone(),
                            name: None,
                            decimals: None,
                            amount: 0,
                        });
                    if entry.name.is_none() {
                        entry.name = asset.name.clone().filter(|n| !n.is_empty());
                    }
                    if entry.decimals.is_none() {
                        entry.decimals = asset.decimals;
                    }
                    entry.amount = entry
                        .amount
                        .saturating_add(sign.saturating_mul(asset.amount));
                }
            }
        }

        EventPayload {
            inclusion_height: tx.inclusion_height,
            value_delta,
            tokens: tokens.into_values().filter(|t| t.amount != 0).collect(),
        }
    }
}
