//! Repository tests: single-row reads, aggregates, staged and bulk writes.

use std::sync::Arc;

use datakit::prelude::*;

use crate::helpers::{self, TestApp, User};

/// A hand-written repository resolved through the registry.
struct AdultUsers {
    users: Repository<User, MemoryContext>,
}

impl AdultUsers {
    async fn names(&self) -> AppResult<Vec<String>> {
        let mut query = self
            .users
            .query()
            .and_filter(Predicate::new(|u: &User| u.age >= 18))
            .order_by("name")
            .select_as(|u: &User| u.name.clone());
        self.users.search_as(&mut query).await
    }
}

#[tokio::test]
async fn test_single_or_default() {
    let app = TestApp::with_users(10);
    let users = app.users();

    let mut one = users.query().and_filter(Predicate::new(|u: &User| u.id == 4));
    assert_eq!(users.single_or_default(&mut one).await.unwrap().unwrap().id, 4);

    let mut none = users.query().and_filter(Predicate::new(|u: &User| u.id > 100));
    assert!(users.single_or_default(&mut none).await.unwrap().is_none());

    let mut many = users.query().and_filter(Predicate::new(|u: &User| u.id > 5));
    let err = users.single_or_default(&mut many).await.unwrap_err();
    assert!(err.is(ErrorKind::InvalidState));
}

#[tokio::test]
async fn test_first_and_last_follow_sorting() {
    let app = TestApp::with_users(10);
    let users = app.users();

    let mut query = users.query().order_by("name");
    let first = users.first_or_default(&mut query).await.unwrap().unwrap();
    let last = users.last_or_default(&mut query).await.unwrap().unwrap();

    assert_eq!(first.name, "user-01");
    assert_eq!(last.name, "user-10");
}

#[tokio::test]
async fn test_projected_first() {
    let app = TestApp::with_users(10);
    let users = app.users();

    let mut query = users
        .query()
        .order_by_descending("age")
        .select_as(|u: &User| u.age);
    assert_eq!(users.first_or_default_as(&mut query).await.unwrap(), Some(19));
}

#[tokio::test]
async fn test_find_by_key_tracks_entity() {
    let app = TestApp::with_users(5);
    let users = app.users();

    let found = users.find(3_i64).await.unwrap().unwrap();
    assert_eq!(found.name, "user-03");
    assert_eq!(users.entity_state(&found), EntityState::Unchanged);

    assert!(users.find(42_i64).await.unwrap().is_none());
}

#[tokio::test]
async fn test_find_respects_global_filter() {
    let app = TestApp::with_users(5);
    app.store
        .add_query_filter(Predicate::new(|u: &User| !u.deleted));
    let users = app.users();

    assert!(users.find(5_i64).await.unwrap().is_none());
    assert!(users.find(4_i64).await.unwrap().is_some());
}

#[tokio::test]
async fn test_aggregates() {
    let app = TestApp::with_users(10);
    let users = app.users();

    assert!(users.any(None).await.unwrap());
    assert!(
        !users
            .any(Some(Predicate::new(|u: &User| u.age > 100)))
            .await
            .unwrap()
    );
    assert_eq!(users.count(None).await.unwrap(), 10);
    assert_eq!(
        users
            .count(Some(Predicate::new(|u: &User| u.age >= 15)))
            .await
            .unwrap(),
        5
    );
    assert_eq!(users.max(|u: &User| u.age, None).await.unwrap(), Some(19));
    assert_eq!(users.min(|u: &User| u.age, None).await.unwrap(), Some(10));
    assert_eq!(users.sum(|u: &User| u.age as f64, None).await.unwrap(), 145.0);
    assert_eq!(
        users.average(|u: &User| u.age as f64, None).await.unwrap(),
        Some(14.5)
    );
}

#[tokio::test]
async fn test_aggregates_over_empty_set() {
    let app = TestApp::new();
    let users = app.users();

    assert_eq!(users.count(None).await.unwrap(), 0);
    assert_eq!(users.max(|u: &User| u.age, None).await.unwrap(), None);
    assert_eq!(users.sum(|u: &User| u.age as f64, None).await.unwrap(), 0.0);
    assert_eq!(users.average(|u: &User| u.age as f64, None).await.unwrap(), None);
}

#[tokio::test]
async fn test_partial_update_writes_named_properties_only() {
    let app = TestApp::with_users(3);
    let mut uow = app.unit_of_work();
    let users = uow.repository::<User>();

    let mut changed = users.find(2_i64).await.unwrap().unwrap();
    changed.age = 99;
    changed.name = "ignored".to_string();
    users.update(changed.clone(), &["age"]).unwrap();
    assert_eq!(users.entity_state(&changed), EntityState::Modified);

    assert_eq!(uow.save().await.unwrap(), 1);

    let stored = app.stored_users();
    assert_eq!(stored[1].age, 99);
    assert_eq!(stored[1].name, "user-02");
}

#[tokio::test]
async fn test_update_with_unknown_property_fails() {
    let app = TestApp::with_users(3);
    let users = app.users();

    let user = helpers::user(1, "x", 1);
    let err = users.update(user, &["nickname"]).unwrap_err();
    assert!(err.is(ErrorKind::Argument));
}

#[tokio::test]
async fn test_staged_range_operations() {
    let app = TestApp::with_users(4);
    let mut uow = app.unit_of_work();
    let users = uow.repository::<User>();

    users
        .add_range(vec![helpers::user(10, "ten", 40), helpers::user(11, "eleven", 41)])
        .unwrap();
    let mut existing = app.stored_users();
    existing.truncate(2);
    users.remove_range(existing).unwrap();

    assert_eq!(uow.save().await.unwrap(), 4);
    assert_eq!(
        helpers::ids(&app.stored_users()),
        vec![3, 4, 10, 11]
    );
}

#[tokio::test]
async fn test_add_then_remove_cancels_out() {
    let app = TestApp::new();
    let mut uow = app.unit_of_work();
    let users = uow.repository::<User>();

    let user = helpers::user(1, "transient", 20);
    users.add(user.clone()).unwrap();
    users.remove(user.clone()).unwrap();

    assert_eq!(users.entity_state(&user), EntityState::Detached);
    assert!(!uow.has_changes());
    assert_eq!(uow.save().await.unwrap(), 0);
    assert_eq!(app.store.row_count(User::NAME), 0);
}

#[tokio::test]
async fn test_update_where_and_remove_where() {
    let app = TestApp::with_users(10);
    let users = app.users();

    let updated = users
        .update_where(Predicate::new(|u: &User| u.age < 13), |u: &mut User| {
            u.deleted = true
        })
        .await
        .unwrap();
    assert_eq!(updated, 3);

    let removed = users
        .remove_where(Predicate::new(|u: &User| u.deleted))
        .await
        .unwrap();
    // Ids 1..=3 plus ids 5 and 10 seeded as deleted.
    assert_eq!(removed, 5);
    assert_eq!(
        helpers::ids(&app.stored_users()),
        vec![4, 6, 7, 8, 9]
    );
}

#[tokio::test]
async fn test_bulk_delete_inside_transaction_rolls_back() {
    let app = TestApp::with_users(6);
    let mut uow = app.unit_of_work();
    uow.begin_transaction(IsolationLevel::ReadCommitted)
        .await
        .unwrap();

    let removed = uow
        .repository::<User>()
        .remove_where(Predicate::new(|u: &User| u.id % 2 == 0))
        .await
        .unwrap();
    assert_eq!(removed, 3);
    assert_eq!(app.store.row_count(User::NAME), 3);

    uow.rollback().await;
    assert_eq!(app.store.row_count(User::NAME), 6);
}

#[tokio::test]
async fn test_custom_repository_from_registry() {
    let app = TestApp::with_users(12);
    let registry = RepositoryRegistry::<MemoryContext>::new().register(|context| AdultUsers {
        users: Repository::new(context),
    });
    let uow = app.unit_of_work().with_registry(Arc::new(registry));

    let adults = uow.custom_repository::<AdultUsers>().unwrap();
    let names = adults.names().await.unwrap();
    // Ages 18 to 21 belong to ids 9 to 12.
    assert_eq!(names, vec!["user-01", "user-02", "user-03", "user-04"]);
}

#[tokio::test]
async fn test_unregistered_custom_repository_is_not_found() {
    let app = TestApp::new();
    let uow = app.unit_of_work();

    let err = uow.custom_repository::<AdultUsers>().err().unwrap();
    assert!(err.is(ErrorKind::NotFound));
}

#[tokio::test]
async fn test_blank_sql_is_rejected() {
    let app = TestApp::new();
    let users = app.users();

    let err = users.execute_sql("  ", &[]).await.unwrap_err();
    assert!(err.is(ErrorKind::Argument));
}
