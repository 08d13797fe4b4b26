// SPDX-License-Identifier: MIT OR Apache-2.0
//! reach-notify
//!
//! Stateful, per-process de-dupe and aggregation of user-visible
//! notifications: a 30-second keyed suppression window, plus silent
//! accumulation of passive-level notifications into a periodic aggregate.
#![deny(unsafe_code)]
#![warn(missing_docs)]

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Keyed suppression window: emissions with the same key inside this
/// window are dropped.
const SUPPRESSION_WINDOW_SECS: i64 = 30;
/// Passive notifications accumulate silently until this many have arrived.
const PASSIVE_AGGREGATE_THRESHOLD: u32 = 3;
/// Key the aggregated passive notification is emitted under.
pub const PASSIVE_AGGREGATE_KEY: &str = "aggregate.passive";

/// Whether a notification is passive (low-priority, worth aggregating) or
/// active (worth surfacing immediately, subject only to keyed dedupe).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Level {
    /// Low-priority; accumulated and periodically aggregated.
    Passive,
    /// Surfaced immediately, subject only to keyed suppression.
    Active,
}

/// A notification submitted to the filter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Notification {
    /// Dedup key. Empty/absent means no keyed suppression applies.
    pub key: Option<String>,
    /// Passive vs. active.
    pub level: Level,
    /// Opaque payload surfaced to the user on emission.
    pub payload: serde_json::Value,
}

/// Per-process notification de-dupe/aggregation state.
#[derive(Debug, Default)]
pub struct NotificationFilter {
    last_emitted: HashMap<String, DateTime<Utc>>,
    passive_counter: u32,
}

impl NotificationFilter {
    /// A fresh filter with no suppression history.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Evaluate `notification` against the filter's rules at time `now`.
    /// Returns `true` if it (or its aggregate) was emitted.
    ///
    /// `now` is an explicit parameter rather than a wall-clock read so
    /// callers can drive the 30-second window deterministically in tests.
    pub fn push(&mut self, notification: &Notification, now: DateTime<Utc>) -> bool {
        if let Some(key) = notification.key.as_deref() {
            if let Some(last) = self.last_emitted.get(key) {
                if now - *last < Duration::seconds(SUPPRESSION_WINDOW_SECS) {
                    return false;
                }
            }
        }

        match notification.level {
            Level::Passive => {
                self.passive_counter += 1;
                if self.passive_counter >= PASSIVE_AGGREGATE_THRESHOLD {
                    self.passive_counter = 0;
                    self.last_emitted.insert(PASSIVE_AGGREGATE_KEY.to_string(), now);
                    if let Some(key) = notification.key.as_deref() {
                        self.last_emitted.insert(key.to_string(), now);
                    }
                    true
                } else {
                    false
                }
            }
            Level::Active => {
                self.passive_counter = 0;
                if let Some(key) = notification.key.as_deref() {
                    self.last_emitted.insert(key.to_string(), now);
                }
                true
            }
        }
    }
}
