//! Fixtures shared by unit tests.

use serde::{Deserialize, Serialize};

use datakit_core::traits::{Entity, EntityKey};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Person {
    pub id: i64,
    pub name: String,
    pub age: i64,
    pub active: bool,
}

impl Person {
    pub fn new(id: i64, name: &str, age: i64) -> Self {
        Self {
            id,
            name: name.to_string(),
            age,
            active: true,
        }
    }
}

impl Entity for Person {
    const NAME: &'static str = "people";

    fn key(&self) -> EntityKey {
        self.id.into()
    }
}

/// Ten people; ids 1..=10, ages 5..=50 in steps of 5, every third inactive.
pub fn people() -> Vec<Person> {
    (1..=10)
        .map(|id| Person {
            id,
            name: format!("person-{id:02}"),
            age: id * 5,
            active: id % 3 != 0,
        })
        .collect()
}
