//! Shared test helpers for integration tests.

use serde::{Deserialize, Serialize};

use datakit::prelude::*;

/// Postal address embedded in a user document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Address {
    pub city: String,
}

/// Test entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    pub id: i64,
    pub name: String,
    pub age: i64,
    pub deleted: bool,
    pub address: Option<Address>,
}

impl Entity for User {
    const NAME: &'static str = "users";

    fn key(&self) -> EntityKey {
        self.id.into()
    }
}

/// A second entity, stored in its own set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Order {
    pub id: i64,
    pub user_id: i64,
    pub total: f64,
}

impl Entity for Order {
    const NAME: &'static str = "orders";

    fn key(&self) -> EntityKey {
        self.id.into()
    }
}

/// Build a single user.
pub fn user(id: i64, name: &str, age: i64) -> User {
    User {
        id,
        name: name.to_string(),
        age,
        deleted: false,
        address: None,
    }
}

/// `count` users with ids `1..=count` and ages `10..`.
///
/// Names run backwards (`id 1` is the last name alphabetically) so name
/// order differs from insertion order. Every fifth user is soft-deleted and
/// even ids carry an address in one of three cities.
pub fn users(count: i64) -> Vec<User> {
    (1..=count)
        .map(|id| User {
            id,
            name: format!("user-{:02}", count + 1 - id),
            age: 9 + id,
            deleted: id % 5 == 0,
            address: (id % 2 == 0).then(|| Address {
                city: format!("city-{}", id % 3),
            }),
        })
        .collect()
}

/// Test application context: one store seeded with users.
pub struct TestApp {
    /// The in-memory store shared by every context of the test.
    pub store: MemoryStore,
}

impl TestApp {
    /// An empty store.
    pub fn new() -> Self {
        Self {
            store: MemoryStore::new(),
        }
    }

    /// A store seeded with [`users`].
    pub fn with_users(count: i64) -> Self {
        let app = Self::new();
        app.store
            .seed(users(count))
            .expect("Failed to seed users");
        app
    }

    /// A unit of work on a fresh connection.
    pub fn unit_of_work(&self) -> UnitOfWork<MemoryContext> {
        UnitOfWork::new(self.store.context())
    }

    /// A user repository on a fresh connection.
    pub fn users(&self) -> Repository<User, MemoryContext> {
        Repository::new(self.store.context())
    }

    /// Stored users in insertion order.
    pub fn stored_users(&self) -> Vec<User> {
        self.store.rows::<User>().expect("Failed to read users")
    }
}

/// Ids of a slice of users.
pub fn ids(users: &[User]) -> Vec<i64> {
    users.iter().map(|u| u.id).collect()
}
