// Copyright AGNTCY Contributors (https://github.com/agntcy)
// SPDX-License-Identifier: Apache-2.0

use std::time::Duration;

use keel_config::client::ClientResilienceConfig;
use keel_config::errors::ConfigError;
use keel_config::provider::{FileConfigProvider, load_yaml};
use keel_config::server::ServerGovernanceConfig;

static TEST_PATH: &str = concat!(env!("CARGO_MANIFEST_DIR"), "/tests");

#[test]
fn test_load_server_config() {
    let config: ServerGovernanceConfig = load_yaml(
        &FileConfigProvider,
        &format!("{}/testdata/server.yaml", TEST_PATH),
    )
    .unwrap();

    assert_eq!(config.service_name, "inventory");
    assert_eq!(config.default_timeout, Duration::from_secs(10));
    assert_eq!(config.slow_threshold, Duration::from_millis(500));
    assert_eq!(config.headers.request_id, "x-correlation-id");
    assert_eq!(config.headers.user_id, "x-user-id");
}

#[test]
fn test_load_client_config() {
    let config: ClientResilienceConfig = load_yaml(
        &FileConfigProvider,
        &format!("{}/testdata/client.yaml", TEST_PATH),
    )
    .unwrap();

    assert_eq!(config.retry.max_retries, 3);
    assert_eq!(config.retry.max_backoff, Duration::from_secs(1));
    assert_eq!(config.circuit_breaker.half_open_max_calls, 2);
}

#[test]
fn test_invalid_config_is_rejected() {
    let res: Result<ServerGovernanceConfig, _> = load_yaml(
        &FileConfigProvider,
        &format!("{}/testdata/invalid_server.yaml", TEST_PATH),
    );
    assert!(matches!(res, Err(ConfigError::MissingServiceName)));
}

#[test]
fn test_missing_file() {
    let res: Result<ServerGovernanceConfig, _> =
        load_yaml(&FileConfigProvider, "/nonexistent/keel.yaml");
    assert!(matches!(res, Err(ConfigError::Io(_))));
}
