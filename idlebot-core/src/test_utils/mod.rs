// File: idlebot-core/src/test_utils/mod.rs
//
// Shared fixtures for unit and integration tests.

pub mod fake_connection;
pub mod helpers;

pub use fake_connection::{FakeCall, FakeConnector, LogOnScript};
pub use helpers::{setup_test_database, setup_test_repository, test_encryptor, TEST_KEY};
