//! Startup behaviour of the PostgreSQL store when the database never comes up.

#![cfg(feature = "connections")]

use std::time::{Duration, Instant};

use lib_common::connections::PostgresAlertStore;
use lib_common::{StoreError, StoreSettings};

#[tokio::test]
async fn unreachable_database_exhausts_the_retry_budget() {
    let settings = StoreSettings {
        host: "127.0.0.1".to_string(),
        port: 1,
        max_attempts: 3,
        retry_pause: Duration::from_millis(50),
        acquire_timeout: Duration::from_secs(2),
        ..StoreSettings::default()
    };

    let started = Instant::now();
    let result = PostgresAlertStore::connect(&settings).await;

    match result {
        Err(StoreError::Unavailable { attempts, last_error }) => {
            assert_eq!(attempts, 3);
            assert!(!last_error.is_empty());
        }
        Err(other) => panic!("unexpected error: {other}"),
        Ok(_) => panic!("connected to a port nothing listens on"),
    }
    // Two pauses between three attempts, none after the last.
    assert!(started.elapsed() >= Duration::from_millis(100));
}
