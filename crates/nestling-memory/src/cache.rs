//! Local persisted timeline cache.
//!
//! One JSON file holding the display list, used for optimistic/offline
//! rendering between authoritative fetches. Reads and writes are
//! synchronous and best-effort: a corrupt or unwritable file is logged and
//! treated as an empty cache, never an error to the caller — freshly
//! captured events must still be shown even when the previous cache is
//! unreadable.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use chrono::{DateTime, FixedOffset};

use nestling_schema::TimelineEvent;

#[derive(Clone)]
pub struct TimelineCache {
    path: PathBuf,
}

impl TimelineCache {
    pub fn open(data_dir: &Path) -> Self {
        Self {
            path: data_dir.join("timeline_events.json"),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the cached list. Missing file, corrupt JSON or a failed read
    /// all yield an empty list.
    pub fn load(&self) -> Vec<TimelineEvent> {
        if !self.path.exists() {
            return Vec::new();
        }
        let content = match std::fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) => {
                tracing::warn!(path = %self.path.display(), error = %e, "failed to read timeline cache");
                return Vec::new();
            }
        };
        match serde_json::from_str(&content) {
            Ok(events) => events,
            Err(e) => {
                tracing::warn!(path = %self.path.display(), error = %e, "corrupt timeline cache, starting empty");
                Vec::new()
            }
        }
    }

    /// Merge a freshly extracted batch into the cache.
    ///
    /// New events are prepended (most-recent-first order is assumed from
    /// the extraction result, not verified); on an id collision the new
    /// copy wins and the stale cached copy is dropped. Merging the same
    /// batch twice leaves the visible set unchanged. The merged list is
    /// returned even when persisting it fails.
    pub fn merge(&self, new_events: Vec<TimelineEvent>) -> Vec<TimelineEvent> {
        let existing = self.load();
        let mut seen: HashSet<String> = HashSet::new();
        let mut merged: Vec<TimelineEvent> = Vec::with_capacity(new_events.len() + existing.len());
        for event in new_events.into_iter().chain(existing) {
            if seen.insert(event.id.clone()) {
                merged.push(event);
            }
        }
        self.persist(&merged);
        merged
    }

    /// Clear the one-shot entrance-animation flag on every cached record
    /// after the display window; a cleared record never re-animates.
    pub fn clear_new_flags(&self) {
        let mut events = self.load();
        if events.iter().all(|e| !e.is_new) {
            return;
        }
        for event in &mut events {
            event.is_new = false;
        }
        self.persist(&events);
    }

    /// Cached list ordered for display: sort timestamps descending, with
    /// records lacking a timestamp kept in their cached position at the
    /// tail. The stored order is untouched.
    pub fn sorted_for_display(&self) -> Vec<TimelineEvent> {
        let mut events = self.load();
        events.sort_by(|a, b| sort_key(b).cmp(&sort_key(a)));
        events
    }

    fn persist(&self, events: &[TimelineEvent]) {
        if let Some(parent) = self.path.parent() {
            if let Err(e) = std::fs::create_dir_all(parent) {
                tracing::warn!(path = %self.path.display(), error = %e, "failed to create cache directory");
                return;
            }
        }
        let json = match serde_json::to_string_pretty(events) {
            Ok(json) => json,
            Err(e) => {
                tracing::warn!(error = %e, "failed to serialize timeline cache");
                return;
            }
        };
        if let Err(e) = std::fs::write(&self.path, json) {
            tracing::warn!(path = %self.path.display(), error = %e, "failed to write timeline cache");
        }
    }
}

fn sort_key(event: &TimelineEvent) -> Option<DateTime<FixedOffset>> {
    event
        .timestamp
        .as_deref()
        .and_then(|t| DateTime::parse_from_rfc3339(t).ok())
}
