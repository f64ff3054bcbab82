use agent_pty_runtime::config::{
    AgentConfig, Config, ParserKind, PermissionMode, RuntimeSettings, DEFAULT_BINARY_PATH,
    DESIGNATED_RUNTIME,
};
use agent_pty_runtime::AppError;

fn sample_toml(workspace: &str) -> String {
    format!(
        r#"
[agent]
id = "builder"
name = "Builder"
workspace = '{workspace}'
binary_path = "/opt/agent/bin/claude"
permission_mode = "acceptEdits"
model = "sonnet"
team_mode = true
runtime = "claude-code"

[agent.env]
ANTHROPIC_LOG = "debug"

[runtime]
settle_delay_ms = 250
grace_period_ms = 1000
output_buffer_capacity = 16
parser = "structured"
"#
    )
}

fn minimal_toml(workspace: &str) -> String {
    format!(
        r#"
[agent]
id = "builder"
workspace = '{workspace}'
runtime = "claude-code"
"#
    )
}

#[test]
fn parses_full_config() {
    let dir = tempfile::tempdir().expect("tempdir");
    let config = Config::from_toml_str(&sample_toml(&dir.path().to_string_lossy()))
        .expect("config should parse");

    assert_eq!(config.agent.id, "builder");
    assert_eq!(config.agent.name, "Builder");
    assert_eq!(config.agent.workspace, dir.path());
    assert_eq!(
        config.agent.binary_path.to_string_lossy(),
        "/opt/agent/bin/claude"
    );
    assert_eq!(config.agent.permission_mode, PermissionMode::AcceptEdits);
    assert_eq!(config.agent.model.as_deref(), Some("sonnet"));
    assert!(config.agent.team_mode);
    assert_eq!(
        config.agent.env.get("ANTHROPIC_LOG").map(String::as_str),
        Some("debug")
    );

    assert_eq!(config.runtime.settle_delay_ms, 250);
    assert_eq!(config.runtime.grace_period_ms, 1000);
    assert_eq!(config.runtime.output_buffer_capacity, 16);
    assert_eq!(config.runtime.parser, ParserKind::Structured);
    // Unset keys keep their defaults.
    assert_eq!(config.runtime.pty_rows, 40);
    assert_eq!(config.runtime.pty_cols, 120);
}

#[test]
fn minimal_config_uses_defaults() {
    let dir = tempfile::tempdir().expect("tempdir");
    let config = Config::from_toml_str(&minimal_toml(&dir.path().to_string_lossy()))
        .expect("config should parse");

    assert_eq!(config.agent.binary_path.to_string_lossy(), DEFAULT_BINARY_PATH);
    assert_eq!(config.agent.permission_mode, PermissionMode::Default);
    assert!(config.agent.model.is_none());
    assert!(config.agent.env.is_empty());
    assert!(!config.agent.team_mode);
    assert_eq!(config.runtime, RuntimeSettings::default());
}

#[test]
fn default_settings_match_documented_values() {
    let settings = RuntimeSettings::default();
    assert_eq!(settings.settle_delay().as_millis(), 500);
    assert_eq!(settings.grace_period().as_millis(), 5000);
    assert_eq!(settings.output_buffer_capacity, 100);
    assert_eq!(settings.availability_timeout().as_millis(), 5000);
    assert_eq!(settings.parser, ParserKind::Heuristic);
    assert_eq!(settings.event_capacity, 1024);
}

#[test]
fn load_from_path_reads_file() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("config.toml");
    std::fs::write(&path, minimal_toml(&dir.path().to_string_lossy())).expect("write config");

    let config = Config::load_from_path(&path).expect("config should load");
    assert_eq!(config.agent.id, "builder");
}

#[test]
fn load_from_missing_path_is_config_error() {
    let dir = tempfile::tempdir().expect("tempdir");
    let result = Config::load_from_path(dir.path().join("absent.toml"));
    assert!(matches!(result, Err(AppError::Config(_))));
}

#[test]
fn invalid_toml_is_config_error() {
    let result = Config::from_toml_str("[agent\nid = ");
    assert!(matches!(result, Err(AppError::Config(_))));
}

#[test]
fn wrong_runtime_discriminator_is_rejected() {
    let mut agent = AgentConfig::new("builder", "/tmp");
    agent.runtime = "other-cli".into();

    let err = agent.validate().expect_err("discriminator must be checked");
    assert!(matches!(err, AppError::Config(_)));
    assert!(err.to_string().contains(DESIGNATED_RUNTIME));
}

#[test]
fn empty_agent_id_is_rejected() {
    let agent = AgentConfig::new("  ", "/tmp");
    assert!(matches!(agent.validate(), Err(AppError::Config(_))));
}

#[test]
fn empty_workspace_is_rejected() {
    let agent = AgentConfig::new("builder", "");
    assert!(matches!(agent.validate(), Err(AppError::Config(_))));
}

#[test]
fn zero_buffer_capacity_is_rejected() {
    let settings = RuntimeSettings {
        output_buffer_capacity: 0,
        ..RuntimeSettings::default()
    };
    assert!(matches!(settings.validate(), Err(AppError::Config(_))));
}

#[test]
fn invalid_ready_pattern_is_rejected() {
    let settings = RuntimeSettings {
        ready_pattern: "(unclosed".into(),
        ..RuntimeSettings::default()
    };
    let err = settings.validate().expect_err("pattern must compile");
    assert!(err.to_string().contains("ready_pattern"));
}

#[test]
fn permission_mode_cli_spelling() {
    assert_eq!(PermissionMode::Default.as_str(), "default");
    assert_eq!(PermissionMode::AcceptEdits.as_str(), "acceptEdits");
    assert_eq!(PermissionMode::BypassPermissions.as_str(), "bypassPermissions");
    assert_eq!(PermissionMode::Plan.as_str(), "plan");
}
