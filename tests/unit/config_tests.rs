//! Unit tests for configuration parsing and validation.

use session_fleet::config::GlobalConfig;
use session_fleet::AppError;

fn minimal_toml(root: &str) -> String {
    format!(
        r#"
profiles_dir = '{root}/profiles'
data_dir = '{root}/data'

[worker]
command = "echo"

[provision]
command = "echo"
"#
    )
}

#[test]
fn minimal_config_parses_with_defaults() {
    let temp = tempfile::tempdir().expect("tempdir");
    let root = temp.path().to_str().expect("utf8");

    let config = GlobalConfig::from_toml_str(&minimal_toml(root)).expect("valid config");

    assert_eq!(config.http_port, 5000);
    assert_eq!(config.log_buffer, 1024);
    assert_eq!(config.timeouts.grace_seconds, 10);
    assert_eq!(config.timeouts.sequential_slot_seconds, 1800);
    assert_eq!(config.provision.timeout_seconds, 300);
    assert!(config.worker.args.is_empty());
}

#[test]
fn validation_creates_directories() {
    let temp = tempfile::tempdir().expect("tempdir");
    let root = temp.path().to_str().expect("utf8");

    let config = GlobalConfig::from_toml_str(&minimal_toml(root)).expect("valid config");

    assert!(config.profiles_dir.is_dir());
    assert!(config.data_dir.is_dir());
    assert!(config.db_path().ends_with("sessions.db"));
}

#[test]
fn empty_worker_command_rejected() {
    let temp = tempfile::tempdir().expect("tempdir");
    let root = temp.path().to_str().expect("utf8");
    let toml = minimal_toml(root).replace("command = \"echo\"", "command = \"  \"");

    let result = GlobalConfig::from_toml_str(&toml);
    assert!(matches!(result, Err(AppError::Config(_))));
}

#[test]
fn zero_grace_rejected() {
    let temp = tempfile::tempdir().expect("tempdir");
    let root = temp.path().to_str().expect("utf8");
    let toml = format!("{}\n[timeouts]\ngrace_seconds = 0\n", minimal_toml(root));

    let result = GlobalConfig::from_toml_str(&toml);
    assert!(matches!(result, Err(AppError::Config(_))));
}

#[test]
fn zero_log_buffer_rejected() {
    let temp = tempfile::tempdir().expect("tempdir");
    let root = temp.path().to_str().expect("utf8");
    let toml = format!("log_buffer = 0\n{}", minimal_toml(root));

    let result = GlobalConfig::from_toml_str(&toml);
    assert!(matches!(result, Err(AppError::Config(_))));
}

#[test]
fn missing_worker_section_rejected() {
    let temp = tempfile::tempdir().expect("tempdir");
    let root = temp.path().to_str().expect("utf8");
    let toml = format!(
        "profiles_dir = '{root}/p'\ndata_dir = '{root}/d'\n\n[provision]\ncommand = \"echo\"\n"
    );

    let result = GlobalConfig::from_toml_str(&toml);
    assert!(matches!(result, Err(AppError::Config(_))));
}

#[test]
fn durations_convert_to_std() {
    let temp = tempfile::tempdir().expect("tempdir");
    let root = temp.path().to_str().expect("utf8");
    let toml = format!(
        "{}\n[timeouts]\ngrace_seconds = 3\nsequential_slot_seconds = 7\n",
        minimal_toml(root)
    );

    let config = GlobalConfig::from_toml_str(&toml).expect("valid config");
    assert_eq!(config.grace_timeout().as_secs(), 3);
    assert_eq!(config.sequential_slot_timeout().as_secs(), 7);
}
