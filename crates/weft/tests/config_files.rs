//! Loading configuration files.
#![cfg(feature = "config")]

use std::io::Write;

use weft::{ConfigError, LogFormat, WeftConfig};

fn file_with(suffix: &str, contents: &str) -> tempfile::NamedTempFile {
    let mut file = tempfile::Builder::new().suffix(suffix).tempfile().unwrap();
    file.write_all(contents.as_bytes()).unwrap();
    file
}

#[test]
fn toml_files_load_by_extension() {
    let file = file_with(
        ".toml",
        "[preserve]\nignores_keys = true\n\n[logging]\nformat = \"pretty\"\n",
    );
    let config = WeftConfig::load(file.path()).unwrap();
    assert!(config.preserve.ignores_keys);
    assert_eq!(config.logging.format, LogFormat::Pretty);
}

#[test]
fn json_files_load_by_extension() {
    let file = file_with(".json", r#"{"normalize": {"ignore_differences": true}}"#);
    let config = WeftConfig::load(file.path()).unwrap();
    assert!(config.normalize.ignore_differences);
    assert!(config.preserve.destroy_obsolete);
}

#[test]
fn unknown_extensions_and_missing_files_fail() {
    let file = file_with(".yaml", "preserve: {}");
    assert!(matches!(
        WeftConfig::load(file.path()),
        Err(ConfigError::UnknownFormat { .. })
    ));
    let missing = file.path().with_extension("toml");
    assert!(matches!(
        WeftConfig::load(&missing),
        Err(ConfigError::Io { .. })
    ));
}
