//! Change tracking for the in-memory backend.
//!
//! Entities are tracked by `(set name, key)` as serialized documents. Each
//! entry keeps the snapshot it was attached with so change detection can
//! tell a real modification from a no-op update.

use std::collections::BTreeSet;

use datakit_core::error::AppError;
use datakit_core::result::AppResult;
use datakit_core::traits::EntityKey;
use datakit_core::types::EntityState;

/// One tracked entity.
#[derive(Debug, Clone)]
pub struct TrackedEntry {
    /// Set the entity belongs to.
    pub table: &'static str,
    /// Primary key.
    pub key: EntityKey,
    /// Tracker state.
    pub state: EntityState,
    /// Current document.
    pub current: serde_json::Value,
    /// Document as it was when attached, if it came from the store.
    pub original: Option<serde_json::Value>,
    /// Properties marked modified. `None` marks the whole entity.
    pub modified: Option<BTreeSet<String>>,
}

/// Change tracker shared by every clone of a context.
#[derive(Debug)]
pub struct ChangeTracker {
    entries: Vec<TrackedEntry>,
    auto_detect: bool,
}

impl Default for ChangeTracker {
    fn default() -> Self {
        Self {
            entries: Vec::new(),
            auto_detect: true,
        }
    }
}

impl ChangeTracker {
    /// An empty tracker with automatic detection enabled.
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether automatic change detection is on.
    pub fn auto_detect(&self) -> bool {
        self.auto_detect
    }

    /// Toggle automatic change detection.
    pub fn set_auto_detect(&mut self, enabled: bool) {
        self.auto_detect = enabled;
    }

    fn position(&self, table: &str, key: &EntityKey) -> Option<usize> {
        self.entries
            .iter()
            .position(|e| e.table == table && &e.key == key)
    }

    /// Entry for an entity, if tracked.
    pub fn entry(&self, table: &str, key: &EntityKey) -> Option<&TrackedEntry> {
        self.position(table, key).map(|i| &self.entries[i])
    }

    /// State of an entity; `Detached` when not tracked.
    pub fn state(&self, table: &str, key: &EntityKey) -> EntityState {
        self.entry(table, key)
            .map_or(EntityState::Detached, |e| e.state)
    }

    /// Attach a row loaded by a tracked query. Already tracked entities keep
    /// their entry.
    pub fn attach(&mut self, table: &'static str, key: EntityKey, document: serde_json::Value) {
        if self.position(table, &key).is_some() {
            return;
        }
        self.entries.push(TrackedEntry {
            table,
            key,
            state: EntityState::Unchanged,
            original: Some(document.clone()),
            current: document,
            modified: None,
        });
    }

    /// Stage an insert.
    pub fn add(
        &mut self,
        table: &'static str,
        key: EntityKey,
        document: serde_json::Value,
    ) -> AppResult<()> {
        match self.position(table, &key) {
            None => {
                self.entries.push(TrackedEntry {
                    table,
                    key,
                    state: EntityState::Added,
                    current: document,
                    original: None,
                    modified: None,
                });
                Ok(())
            }
            Some(i) => {
                let entry = &mut self.entries[i];
                match entry.state {
                    // Re-adding a deleted row turns the delete into an update.
                    EntityState::Deleted => {
                        entry.state = EntityState::Modified;
                        entry.current = document;
                        entry.modified = None;
                        Ok(())
                    }
                    EntityState::Added => {
                        entry.current = document;
                        Ok(())
                    }
                    _ => Err(AppError::invalid_state(format!(
                        "An entity of '{table}' with key '{key}' is already being tracked"
                    ))),
                }
            }
        }
    }

    /// Stage an update of the whole entity or of the named properties.
    pub fn update(
        &mut self,
        table: &'static str,
        key: EntityKey,
        document: serde_json::Value,
        properties: &[&str],
    ) {
        let named: Option<BTreeSet<String>> = if properties.is_empty() {
            None
        } else {
            Some(properties.iter().map(|p| p.trim().to_string()).collect())
        };

        let Some(i) = self.position(table, &key) else {
            self.entries.push(TrackedEntry {
                table,
                key,
                state: EntityState::Modified,
                current: document,
                original: None,
                modified: named,
            });
            return;
        };

        let entry = &mut self.entries[i];
        entry.current = document;
        match entry.state {
            EntityState::Added => {}
            EntityState::Modified => {
                entry.modified = match (entry.modified.take(), named) {
                    (Some(mut existing), Some(named)) => {
                        existing.extend(named);
                        Some(existing)
                    }
                    _ => None,
                };
            }
            _ => {
                entry.state = EntityState::Modified;
                entry.modified = named;
            }
        }
    }

    /// Stage a delete. Removing a pending insert simply forgets it.
    pub fn remove(&mut self, table: &'static str, key: EntityKey, document: serde_json::Value) {
        match self.position(table, &key) {
            Some(i) if self.entries[i].state == EntityState::Added => {
                self.entries.remove(i);
            }
            Some(i) => {
                let entry = &mut self.entries[i];
                entry.state = EntityState::Deleted;
                entry.modified = None;
            }
            None => self.entries.push(TrackedEntry {
                table,
                key,
                state: EntityState::Deleted,
                current: document,
                original: None,
                modified: None,
            }),
        }
    }

    /// Turn whole-entity modifications whose document equals the snapshot
    /// back into unchanged entries.
    pub fn detect_changes(&mut self) {
        for entry in &mut self.entries {
            if entry.state == EntityState::Modified
                && entry.modified.is_none()
                && entry.original.as_ref() == Some(&entry.current)
            {
                entry.state = EntityState::Unchanged;
            }
        }
    }

    /// Whether any entry is pending.
    pub fn has_changes(&self) -> bool {
        self.entries.iter().any(|e| e.state.is_pending())
    }

    /// Clones of the pending entries in staging order.
    pub fn pending(&self) -> Vec<TrackedEntry> {
        self.entries
            .iter()
            .filter(|e| e.state.is_pending())
            .cloned()
            .collect()
    }

    /// Mark every pending entry as persisted.
    pub fn accept_all(&mut self) {
        self.entries.retain(|e| e.state != EntityState::Deleted);
        for entry in &mut self.entries {
            entry.state = EntityState::Unchanged;
            entry.original = Some(entry.current.clone());
            entry.modified = None;
        }
    }

    /// Forget every entry.
    pub fn detach_all(&mut self) {
        self.entries.clear();
    }

    /// Number of tracked entries, pending or not.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether nothing is tracked.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
