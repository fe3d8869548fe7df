/// Ordered room view: deduplicated, time-ordered messages for one room
use crate::chat_types::{Author, Message, MessageKey, MessageKind, MessageRecord, ModerationLevel};
use crate::store::{DeliveryMode, StreamUpdate};
use chrono::{DateTime, Utc};
use std::time::Duration;
use tracing::debug;

#[derive(Debug, Clone)]
struct Entry {
    message: Message,
    /// Tie-breaker for equal timestamps
    arrival: u64,
    /// Delivered by the stream (as opposed to promoted locally by `confirm`)
    authoritative: bool,
    /// Already accounts for one local send
    claimed: bool,
}

impl Entry {
    fn is_pending(&self) -> bool {
        self.message.pending
    }
}

pub struct RoomView {
    room_id: String,
    limit: usize,
    tolerance: Duration,
    entries: Vec<Entry>,
    next_arrival: u64,
}

impl RoomView {
    pub fn new(room_id: impl Into<String>, limit: usize, tolerance: Duration) -> Self {
        Self {
            room_id: room_id.into(),
            limit,
            tolerance,
            entries: Vec::new(),
            next_arrival: 0,
        }
    }

    pub fn room_id(&self) -> &str {
        &self.room_id
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn pending_count(&self) -> usize {
        self.entries.iter().filter(|e| e.is_pending()).count()
    }

    pub fn contains(&self, key: &MessageKey) -> bool {
        self.position(key).is_some()
    }

    /// Snapshot of the view in display order
    pub fn messages(&self) -> Vec<Message> {
        self.entries.iter().map(|e| e.message.clone()).collect()
    }

    /// Insert a pending entry stamped with the local clock.
    ///
    /// An unclaimed stream record of the same message that got here first is
    /// adopted instead, and nothing pending is added. Returns whether a
    /// pending entry was inserted.
    pub fn insert_optimistic(
        &mut self,
        key: MessageKey,
        content: String,
        author: &Author,
        level: ModerationLevel,
        now: DateTime<Utc>,
    ) -> bool {
        if let Some(index) = self.match_unclaimed(&author.id, &content, now) {
            debug!(
                "Optimistic {} adopts earlier echo {}",
                key, self.entries[index].message.key
            );
            self.entries[index].claimed = true;
            return false;
        }

        let message = Message {
            key,
            room_id: self.room_id.clone(),
            author_id: author.id.clone(),
            author_name: author.name.clone(),
            content,
            kind: MessageKind::User,
            created_at: now,
            pending: true,
            moderation_level: level,
        };
        self.push(message, false, false);
        self.sort();
        true
    }

    /// Promote a pending entry to its store-assigned id. Returns whether the view changed.
    pub fn confirm(&mut self, temp: &MessageKey, confirmed_id: &str) -> bool {
        let Some(index) = self.pending_position(temp) else {
            // The stream echo already replaced it
            return false;
        };

        let confirmed = MessageKey::remote(confirmed_id);
        if self.contains(&confirmed) {
            self.entries.remove(index);
            return true;
        }

        let entry = &mut self.entries[index];
        entry.message.key = confirmed;
        entry.message.pending = false;
        entry.claimed = true;
        self.evict();
        true
    }

    /// Drop a pending entry. Returns whether the view changed.
    pub fn reject(&mut self, temp: &MessageKey) -> bool {
        match self.pending_position(temp) {
            Some(index) => {
                self.entries.remove(index);
                true
            }
            None => false,
        }
    }

    /// Apply one stream delivery. Returns whether the view changed.
    pub fn apply(&mut self, update: &StreamUpdate) -> bool {
        let changed = match update.mode {
            DeliveryMode::Incremental => self.merge_incremental(&update.records),
            DeliveryMode::Snapshot => self.replace_snapshot(&update.records),
        };
        if changed {
            self.sort();
            self.evict();
        }
        changed
    }

    fn merge_incremental(&mut self, records: &[MessageRecord]) -> bool {
        let mut changed = false;

        for record in records {
            if !self.accepts(record) {
                continue;
            }
            let key = MessageKey::remote(record.id.clone());

            if let Some(index) = self.position(&key) {
                // Known id: only a locally promoted copy gets superseded
                if !self.entries[index].authoritative {
                    let arrival = self.take_arrival();
                    self.entries[index] = Entry {
                        message: Message::from_record(record),
                        arrival,
                        authoritative: true,
                        claimed: true,
                    };
                    changed = true;
                }
                continue;
            }

            let replaced = self.match_pending(record, &[]);
            if let Some(index) = replaced {
                debug!(
                    "Stream echo {} replaces optimistic {}",
                    record.id, self.entries[index].message.key
                );
                self.entries.remove(index);
            }
            self.push(Message::from_record(record), true, replaced.is_some());
            changed = true;
        }

        changed
    }

    fn replace_snapshot(&mut self, records: &[MessageRecord]) -> bool {
        let before = self.messages();

        let mut matched: Vec<usize> = Vec::new();
        for record in records.iter().filter(|r| self.accepts(r)) {
            if let Some(index) = self.match_pending(record, &matched) {
                matched.push(index);
            }
        }

        let pending: Vec<Entry> = self
            .entries
            .iter()
            .enumerate()
            .filter(|(index, e)| e.is_pending() && !matched.contains(index))
            .map(|(_, e)| e.clone())
            .collect();

        self.entries = pending;
        for record in records {
            if !self.accepts(record) || self.contains(&MessageKey::remote(record.id.clone())) {
                continue;
            }
            // Snapshots restate history; only incremental echoes wait for their send
            self.push(Message::from_record(record), true, true);
        }

        self.sort();
        self.messages() != before
    }

    fn accepts(&self, record: &MessageRecord) -> bool {
        if record.room_id != self.room_id {
            debug!("Ignoring record {} for room {}", record.id, record.room_id);
            return false;
        }
        true
    }

    /// Closest pending entry that is the same logical message as `record`
    fn match_pending(&self, record: &MessageRecord, exclude: &[usize]) -> Option<usize> {
        self.entries
            .iter()
            .enumerate()
            .filter(|(index, e)| e.is_pending() && !exclude.contains(index))
            .filter(|(_, e)| {
                e.message.author_id == record.author_id
                    && e.message.content == record.content
                    && e.message.room_id == record.room_id
            })
            .filter_map(|(index, e)| {
                let gap = distance(e.message.created_at, record.created_at)?;
                (gap < self.tolerance).then_some((index, gap))
            })
            .min_by_key(|(_, gap)| *gap)
            .map(|(index, _)| index)
    }

    /// Closest stream record of ours that no local send has accounted for yet
    fn match_unclaimed(&self, author_id: &str, content: &str, at: DateTime<Utc>) -> Option<usize> {
        self.entries
            .iter()
            .enumerate()
            .filter(|(_, e)| e.authoritative && !e.claimed && !e.is_pending())
            .filter(|(_, e)| e.message.author_id == author_id && e.message.content == content)
            .filter_map(|(index, e)| {
                let gap = distance(e.message.created_at, at)?;
                (gap < self.tolerance).then_some((index, gap))
            })
            .min_by_key(|(_, gap)| *gap)
            .map(|(index, _)| index)
    }

    fn position(&self, key: &MessageKey) -> Option<usize> {
        self.entries.iter().position(|e| e.message.key == *key)
    }

    fn pending_position(&self, key: &MessageKey) -> Option<usize> {
        if !key.is_local() {
            return None;
        }
        self.entries
            .iter()
            .position(|e| e.is_pending() && e.message.key == *key)
    }

    fn take_arrival(&mut self) -> u64 {
        let arrival = self.next_arrival;
        self.next_arrival += 1;
        arrival
    }

    fn push(&mut self, message: Message, authoritative: bool, claimed: bool) {
        let arrival = self.take_arrival();
        self.entries.push(Entry {
            message,
            arrival,
            authoritative,
            claimed,
        });
    }

    fn sort(&mut self) {
        self.entries.sort_by(|a, b| {
            a.message
                .created_at
                .cmp(&b.message.created_at)
                .then(a.arrival.cmp(&b.arrival))
        });
    }

    /// Keep at most `limit` confirmed entries, dropping the oldest; pending entries stay
    fn evict(&mut self) {
        let confirmed = self.entries.iter().filter(|e| !e.is_pending()).count();
        let mut excess = confirmed.saturating_sub(self.limit);
        if excess == 0 {
            return;
        }
        self.entries.retain(|e| {
            if excess > 0 && !e.is_pending() {
                excess -= 1;
                false
            } else {
                true
            }
        });
    }
}

fn distance(a: DateTime<Utc>, b: DateTime<Utc>) -> Option<Duration> {
    let delta = if a > b { a - b } else { b - a };
    delta.to_std().ok()
}
