//! Global subscriber installation.
//!
//! Kept in its own test binary: it installs the process-wide dispatcher.

use frelon_sync::config::SyncConfig;
use frelon_sync::logging::{self, OutputFormat, TracingConfig};
use frelon_sync::SyncError;
use tracing::Level;

#[test]
fn test_init_is_idempotent() {
    let config = TracingConfig::new(Level::DEBUG)
        .with_format(OutputFormat::Compact)
        .with_span_events(true);

    logging::init(config.clone()).unwrap();
    logging::init(config).unwrap();
    logging::init_from_config(&SyncConfig::default()).unwrap();

    tracing::info!("subscriber installed");
}

#[test]
fn test_bad_level_in_config_rejected() {
    let mut config = SyncConfig::default();
    config.application.log_level = "loud".to_string();
    assert!(matches!(
        logging::init_from_config(&config),
        Err(SyncError::Configuration(_))
    ));
}
