use tracing_subscriber::EnvFilter;

const DEFAULT_TEST_LOG_FILTER: &str = "wamp_session=debug,test_utils=debug";

/// Prepares the process for an integration test.
///
/// Session and router logs are captured by the test harness, so they only show up for failing
/// tests. `RUST_LOG` overrides the default filter. Safe to call from every test.
pub fn setup_test_environment() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(DEFAULT_TEST_LOG_FILTER));
    // Only the first test in the process installs the subscriber.
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_test_writer()
        .try_init()
        .ok();
}
