// Copyright 2026 Parrot project contributors (see CONTRIBUTORS.md).
// Licensed under the Apache License, Version 2.0 (see LICENSE).
use crate::{Cli, Config, Policy};

fn cli(config: Option<&str>) -> Cli {
    Cli { config: config.map(Into::into), host: None, port: None }
}

#[test]
fn defaults_apply_with_no_config_file() {
    let config = Config::load(&cli(None)).unwrap();
    assert_eq!(config.os.host, "127.0.0.1");
    assert_eq!(config.os.port, 8080);
    assert_eq!(config.dispatcher.policy, Policy::Fifo);
}

#[test]
fn a_partial_toml_file_fills_the_rest_from_defaults() {
    let dir = std::env::temp_dir();
    let path = dir.join(format!("parrot-config-test-{}.toml", std::process::id()));
    std::fs::write(&path, "[os]\nport = 9090\n").unwrap();

    let config = Config::load(&cli(path.to_str())).unwrap();
    assert_eq!(config.os.port, 9090);
    assert_eq!(config.os.host, "127.0.0.1");
    assert_eq!(config.dispatcher.max_queued_per_engine, 16);

    std::fs::remove_file(&path).unwrap();
}

#[test]
fn cli_flags_win_over_the_config_file() {
    let mut overrides = cli(None);
    overrides.host = Some("0.0.0.0".to_owned());
    overrides.port = Some(1234);

    let config = Config::load(&overrides).unwrap();
    assert_eq!(config.os.host, "0.0.0.0");
    assert_eq!(config.os.port, 1234);
}

#[test]
fn missing_config_file_fails_with_io_error() {
    let err = Config::load(&cli(Some("/nonexistent/parrot-config-missing.toml"))).unwrap_err();
    assert!(matches!(err, crate::ConfigError::Io(_)));
}
