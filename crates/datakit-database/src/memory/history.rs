//! Automatic change history.
//!
//! When a save is asked to ensure history, every pending insert, update and
//! delete is described by an [`AutoHistory`] row staged in the same save.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;

use datakit_core::result::AppResult;
use datakit_core::traits::{Entity, EntityKey};
use datakit_core::types::EntityState;

use super::tracker::TrackedEntry;

/// Length limits applied to history rows.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AutoHistoryOptions {
    /// Maximum length of `row_id`.
    pub row_id_max_length: usize,
    /// Maximum length of `table_name`.
    pub table_name_max_length: usize,
    /// Maximum length of the `changed` payload; unlimited when absent.
    pub changed_max_length: Option<usize>,
}

impl Default for AutoHistoryOptions {
    fn default() -> Self {
        Self {
            row_id_max_length: 50,
            table_name_max_length: 128,
            changed_max_length: None,
        }
    }
}

/// One audit row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AutoHistory {
    /// History row id.
    pub id: i64,
    /// Key of the changed row.
    pub row_id: String,
    /// Set the changed row belongs to.
    pub table_name: String,
    /// JSON description of the change.
    pub changed: String,
    /// Kind of change.
    pub kind: EntityState,
    /// When the history row was created.
    pub created: DateTime<Utc>,
}

impl Entity for AutoHistory {
    const NAME: &'static str = "auto_history";

    fn key(&self) -> EntityKey {
        self.id.into()
    }
}

impl AutoHistory {
    /// Describe a pending change.
    ///
    /// Inserts record the new document, deletes the removed one and updates
    /// a `before`/`after` pair restricted to the modified properties.
    pub fn describe(id: i64, entry: &TrackedEntry, options: &AutoHistoryOptions) -> AppResult<Self> {
        let changed = match entry.state {
            EntityState::Modified => {
                let (before, after) = match &entry.modified {
                    None => (entry.original.clone(), Some(entry.current.clone())),
                    Some(properties) => {
                        let pick = |document: &serde_json::Value| {
                            let fields: serde_json::Map<String, serde_json::Value> = properties
                                .iter()
                                .filter_map(|p| document.get(p).map(|v| (p.clone(), v.clone())))
                                .collect();
                            serde_json::Value::Object(fields)
                        };
                        (entry.original.as_ref().map(pick), Some(pick(&entry.current)))
                    }
                };
                json!({ "before": before, "after": after })
            }
            EntityState::Deleted => entry.original.clone().unwrap_or(entry.current.clone()),
            _ => entry.current.clone(),
        };

        let mut changed = serde_json::to_string(&changed)?;
        if let Some(max) = options.changed_max_length {
            truncate(&mut changed, max);
        }
        let mut row_id = entry.key.to_string();
        truncate(&mut row_id, options.row_id_max_length);
        let mut table_name = entry.table.to_string();
        truncate(&mut table_name, options.table_name_max_length);

        Ok(Self {
            id,
            row_id,
            table_name,
            changed,
            kind: entry.state,
            created: Utc::now(),
        })
    }
}

fn truncate(text: &mut String, max_chars: usize) {
    if let Some((index, _)) = text.char_indices().nth(max_chars) {
        text.truncate(index);
    }
}
