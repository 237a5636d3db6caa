//! Query specification tests: filtering, sorting, paging and projection.

use datakit::prelude::*;

use crate::helpers::{self, Address, TestApp, User};

fn adults() -> Predicate<User> {
    Predicate::new(|u: &User| u.age > 18)
}

#[tokio::test]
async fn test_filtered_sorted_first_page() {
    let app = TestApp::with_users(25);
    let users = app.users();

    let mut query = users
        .query()
        .and_filter(adults())
        .order_by("name")
        .page(Some(1), Some(10));
    let page = users.search(&mut query).await.unwrap();

    assert_eq!(page.len(), 10);
    assert_eq!(page[0].name, "user-01");
    assert_eq!(page[9].name, "user-10");
    assert_eq!(helpers::ids(&page), (16..=25).rev().collect::<Vec<_>>());
    assert_eq!(query.state().paging().total_count, 16);
}

#[tokio::test]
async fn test_last_page_is_partial() {
    let app = TestApp::with_users(25);
    let users = app.users();

    let mut query = users
        .query()
        .and_filter(adults())
        .order_by("name")
        .page(Some(2), Some(10));
    let page = users.search(&mut query).await.unwrap();

    assert_eq!(helpers::ids(&page), (10..=15).rev().collect::<Vec<_>>());
    assert_eq!(query.state().paging().total_count, 16);
}

#[tokio::test]
async fn test_page_past_the_end_is_empty_with_total() {
    let app = TestApp::with_users(25);
    let users = app.users();

    let mut query = users.query().page(Some(9), Some(10));
    let page = users.search(&mut query).await.unwrap();

    assert!(page.is_empty());
    assert_eq!(query.state().paging().total_count, 25);
}

#[tokio::test]
async fn test_total_count_ignores_top() {
    let app = TestApp::with_users(25);
    let users = app.users();

    let mut query = users
        .query()
        .and_filter(adults())
        .order_by_descending("age")
        .top(Some(4))
        .page(Some(1), Some(3));
    let page = users.search(&mut query).await.unwrap();

    // top(4) then page(1, 3) keeps the three oldest.
    assert_eq!(helpers::ids(&page), vec![25, 24, 23]);
    assert_eq!(query.state().paging().total_count, 16);
}

#[tokio::test]
async fn test_unpaged_query_leaves_total_untouched() {
    let app = TestApp::with_users(5);
    let users = app.users();

    let mut query = users.query().top(Some(2));
    let rows = users.search(&mut query).await.unwrap();

    assert_eq!(rows.len(), 2);
    assert_eq!(query.state().paging().total_count, 0);
}

#[tokio::test]
async fn test_or_filter_on_fresh_query_replaces_match_all() {
    let app = TestApp::with_users(25);
    let users = app.users();

    let mut query = users
        .query()
        .or_filter(Predicate::new(|u: &User| u.id == 3))
        .or_filter(Predicate::new(|u: &User| u.id == 7))
        .order_by_key(|u: &User| u.id);
    let rows = users.search(&mut query).await.unwrap();

    assert_eq!(helpers::ids(&rows), vec![3, 7]);
}

#[tokio::test]
async fn test_and_after_or_groups_left_to_right() {
    let app = TestApp::with_users(25);
    let users = app.users();

    // (id < 3 OR id > 23) AND age > 18
    let mut query = users
        .query()
        .and_filter(Predicate::new(|u: &User| u.id < 3))
        .or_filter(Predicate::new(|u: &User| u.id > 23))
        .and_filter(adults())
        .order_by_key(|u: &User| u.id);
    let rows = users.search(&mut query).await.unwrap();

    assert_eq!(helpers::ids(&rows), vec![24, 25]);
}

#[tokio::test]
async fn test_none_filter_is_noop() {
    let app = TestApp::with_users(6);
    let users = app.users();

    let mut query = users
        .query()
        .and_filter(None::<Predicate<User>>)
        .or_filter(None::<Predicate<User>>);
    assert_eq!(users.search(&mut query).await.unwrap().len(), 6);
}

#[tokio::test]
async fn test_multi_key_sort_priority_follows_call_order() {
    let app = TestApp::new();
    app.store
        .seed(vec![
            helpers::user(1, "carol", 30),
            helpers::user(2, "alice", 30),
            helpers::user(3, "bob", 20),
            helpers::user(4, "dave", 20),
        ])
        .unwrap();
    let users = app.users();

    let mut query = users.query().order_by_descending("age").then_by("name");
    let rows = users.search(&mut query).await.unwrap();

    assert_eq!(helpers::ids(&rows), vec![2, 1, 3, 4]);
}

#[tokio::test]
async fn test_sort_on_unknown_field_fails() {
    let app = TestApp::with_users(3);
    let users = app.users();

    let mut query = users.query().order_by("nickname");
    let err = users.search(&mut query).await.unwrap_err();
    assert!(err.is(ErrorKind::Argument));
}

#[tokio::test]
async fn test_global_filter_and_bypass() {
    let app = TestApp::with_users(25);
    app.store
        .add_query_filter(Predicate::new(|u: &User| !u.deleted));
    let users = app.users();

    let mut visible = users.query();
    assert_eq!(users.search(&mut visible).await.unwrap().len(), 20);
    assert_eq!(users.count(None).await.unwrap(), 20);

    let mut everything = users.query().use_ignore_query_filters(true);
    assert_eq!(users.search(&mut everything).await.unwrap().len(), 25);
}

#[tokio::test]
async fn test_global_filter_applies_to_page_total() {
    let app = TestApp::with_users(25);
    app.store
        .add_query_filter(Predicate::new(|u: &User| !u.deleted));
    let users = app.users();

    // Adults are ids 10..=25; 10, 15, 20 and 25 are soft-deleted.
    let mut query = users.query().and_filter(adults()).page(Some(1), Some(5));
    let page = users.search(&mut query).await.unwrap();

    assert_eq!(page.len(), 5);
    assert_eq!(query.state().paging().total_count, 12);
}

#[tokio::test]
async fn test_select_as_projects_rows() {
    let app = TestApp::with_users(25);
    let users = app.users();

    let mut query = users
        .query()
        .and_filter(adults())
        .order_by("name")
        .page(Some(1), Some(3))
        .select_as(|u: &User| u.name.clone());
    let names = users.search_as(&mut query).await.unwrap();

    assert_eq!(names, vec!["user-01", "user-02", "user-03"]);
    assert_eq!(query.state().paging().total_count, 16);
}

#[tokio::test]
async fn test_same_type_select_reshapes_rows() {
    let app = TestApp::with_users(4);
    let users = app.users();

    let mut query = users
        .query()
        .order_by_key(|u: &User| u.id)
        .select(|u: &User| User {
            name: u.name.to_uppercase(),
            ..u.clone()
        });
    let rows = users.search(&mut query).await.unwrap();

    assert_eq!(rows[0].name, "USER-04");
}

#[tokio::test]
async fn test_projected_query_without_selector_fails() {
    let app = TestApp::with_users(25);
    let users = app.users();

    let mut query = users
        .projected_query::<String>()
        .page(Some(1), Some(10));
    let err = users.search_as(&mut query).await.unwrap_err();

    assert!(err.is(ErrorKind::Configuration));
    // Fails before the count runs.
    assert_eq!(query.state().paging().total_count, 0);
}

#[tokio::test]
async fn test_includes_resolve_embedded_navigation() {
    let app = TestApp::with_users(6);
    let users = app.users();

    let mut query = users
        .query()
        .include(["address", " "])
        .and_filter(Predicate::new(|u: &User| u.address.is_some()))
        .order_by("address.city")
        .then_by_key(|u: &User| u.id);
    let rows = users.search(&mut query).await.unwrap();

    assert_eq!(query.state().includes().len(), 1);
    // Even ids: 2 -> city-2, 4 -> city-1, 6 -> city-0.
    assert_eq!(helpers::ids(&rows), vec![6, 4, 2]);
    assert_eq!(
        rows[0].address,
        Some(Address {
            city: "city-0".to_string()
        })
    );
}

#[tokio::test]
async fn test_no_tracking_is_default() {
    let app = TestApp::with_users(3);
    let users = app.users();

    let mut query = users.query();
    let rows = users.search(&mut query).await.unwrap();

    assert_eq!(query.state().tracking(), TrackingMode::NoTracking);
    assert_eq!(users.entity_state(&rows[0]), EntityState::Detached);
}

#[tokio::test]
async fn test_tracked_query_attaches_rows() {
    let app = TestApp::with_users(3);
    let users = app.users();

    let mut query = users.query().use_tracking(TrackingMode::Tracked);
    let rows = users.search(&mut query).await.unwrap();

    assert!(
        rows.iter()
            .all(|u| users.entity_state(u) == EntityState::Unchanged)
    );
}

#[tokio::test]
async fn test_paged_list_metadata() {
    let app = TestApp::with_users(25);
    let users = app.users();

    let mut query = users
        .query()
        .and_filter(adults())
        .order_by("name")
        .page(Some(2), Some(5));
    let page = users.search_paged(&mut query).await.unwrap();

    assert_eq!(page.len(), 5);
    assert_eq!(page.total_count, 16);
    assert_eq!(page.total_pages, 4);
    assert!(page.has_next);
    assert!(page.has_previous);
}
