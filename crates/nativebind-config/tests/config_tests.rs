//! Configuration loading and precedence tests

use nativebind_config::{ConfigError, ConfigLoader, GlobalConfig, ProjectConfig};
use pretty_assertions::assert_eq;
use rstest::rstest;
use serial_test::serial;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

fn create_config_file(dir: &Path, content: &str) -> PathBuf {
    let config_path = dir.join("nativebind.toml");
    fs::write(&config_path, content).unwrap();
    config_path
}

fn create_global_file(dir: &Path, content: &str) -> PathBuf {
    let global_path = dir.join("global.toml");
    fs::write(&global_path, content).unwrap();
    global_path
}

// ============================================================================
// Config Loading Tests
// ============================================================================

#[test]
#[serial]
fn test_load_with_empty_config() {
    let temp_dir = TempDir::new().unwrap();
    create_config_file(temp_dir.path(), "");

    let mut loader = ConfigLoader::with_global_config_path(temp_dir.path().join("missing.toml"));
    let config = loader.load_from_directory(temp_dir.path()).unwrap();

    // Empty config is valid (all fields optional)
    assert!(config.is_project());
    assert_eq!(config.calling_convention(), "cdecl");
}

#[test]
#[serial]
fn test_global_and_project_search_paths_are_ordered() {
    let temp_dir = TempDir::new().unwrap();
    create_config_file(
        temp_dir.path(),
        r#"
[loader]
search_paths = ["/project/lib"]
"#,
    );
    let global_path = create_global_file(
        temp_dir.path(),
        r#"
[loader]
search_paths = ["/global/lib"]

[logging]
filter = "debug"
"#,
    );

    let mut loader = ConfigLoader::with_global_config_path(global_path);
    let config = loader.load_from_directory(temp_dir.path()).unwrap();

    assert_eq!(
        config.search_paths(),
        vec![PathBuf::from("/project/lib"), PathBuf::from("/global/lib")]
    );
    assert_eq!(config.log_filter(), Some("debug"));
}

#[test]
#[serial]
fn test_env_search_path_comes_first() {
    let temp_dir = TempDir::new().unwrap();
    create_config_file(
        temp_dir.path(),
        r#"
[loader]
search_paths = ["/project/lib"]
"#,
    );

    let joined = env::join_paths([Path::new("/env/a"), Path::new("/env/b")]).unwrap();
    env::set_var("NATIVEBIND_SEARCH_PATH", &joined);

    let mut loader = ConfigLoader::with_global_config_path(temp_dir.path().join("missing.toml"));
    let config = loader.load_from_directory(temp_dir.path());

    env::remove_var("NATIVEBIND_SEARCH_PATH");

    assert_eq!(
        config.unwrap().search_paths(),
        vec![
            PathBuf::from("/env/a"),
            PathBuf::from("/env/b"),
            PathBuf::from("/project/lib"),
        ]
    );
}

#[test]
#[serial]
fn test_invalid_toml_reports_file() {
    let temp_dir = TempDir::new().unwrap();
    let path = create_config_file(temp_dir.path(), "[calls\ncalling_convention = 1");

    let mut loader = ConfigLoader::with_global_config_path(temp_dir.path().join("missing.toml"));
    let result = loader.load_from_file(&path);

    match result {
        Err(ConfigError::TomlParseError { file, .. }) => assert_eq!(file, path),
        other => panic!("expected TOML parse error, got {:?}", other),
    }
}

#[test]
fn test_missing_project_file_is_not_found() {
    let temp_dir = TempDir::new().unwrap();
    let result = ProjectConfig::load_from_file(&temp_dir.path().join("nativebind.toml"));
    assert!(matches!(result, Err(ConfigError::NotFound(_))));
}

#[test]
fn test_invalid_global_file_is_rejected() {
    let temp_dir = TempDir::new().unwrap();
    let path = create_global_file(
        temp_dir.path(),
        r#"
[logging]
filter = ""
"#,
    );

    assert!(matches!(
        GlobalConfig::load_from_file(&path),
        Err(ConfigError::InvalidValue { .. })
    ));
}

// ============================================================================
// Validation Tests
// ============================================================================

#[rstest]
#[case("cdecl", true)]
#[case("stdcall", true)]
#[case("fastcall", true)]
#[case("thiscall", true)]
#[case("winapi", true)]
#[case("pascal", false)]
#[case("CDECL", false)]
fn test_calling_convention_validation(#[case] convention: &str, #[case] valid: bool) {
    let content = format!("[calls]\ncalling_convention = \"{}\"\n", convention);
    let config: ProjectConfig = toml::from_str(&content).unwrap();
    assert_eq!(config.validate().is_ok(), valid);
}

#[rstest]
#[case("do-not-destroy", true)]
#[case("destroy-after-call", true)]
#[case("destroy-on-garbage-collect", true)]
#[case("destroy-on-interception-garbage-collect", false)]
fn test_pointer_mode_validation(#[case] mode: &str, #[case] valid: bool) {
    let content = format!("[memory]\nreturn_pointer_mode = \"{}\"\n", mode);
    let config: ProjectConfig = toml::from_str(&content).unwrap();
    assert_eq!(config.validate().is_ok(), valid);
}
