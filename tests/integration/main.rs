//! Integration tests for DataKit.

mod helpers;
mod query_test;
mod repository_test;
mod unit_of_work_test;
