//! Argument, environment, and working-directory planning for agent launches.

use std::collections::BTreeMap;
use std::path::PathBuf;

use tokio::process::Child;
use tracing::debug;

use crate::config::AgentConfig;
use crate::models::spawn::SpawnOptions;
use crate::{AppError, Result};

/// Environment flag enabling the agent CLI's experimental team mode.
pub const EXPERIMENTAL_TEAMS_ENV: &str = "CLAUDE_CODE_EXPERIMENTAL_AGENT_TEAMS";

/// Terminal type advertised to the agent when the host does not set one.
pub const DEFAULT_TERM: &str = "xterm-256color";

/// Fully resolved process invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchPlan {
    /// Binary to execute.
    pub program: PathBuf,
    /// Command-line arguments.
    pub args: Vec<String>,
    /// Directory the process starts in.
    pub working_dir: PathBuf,
    /// Complete environment; nothing else is inherited.
    pub env: BTreeMap<String, String>,
}

/// Resolve the invocation for `options` against `agent`.
///
/// # Errors
///
/// Returns `AppError::Config` when both a resume id and the continue flag
/// are set.
pub fn plan_launch(agent: &AgentConfig, options: &SpawnOptions) -> Result<LaunchPlan> {
    plan_launch_with_env(agent, options, std::env::vars())
}

/// [`plan_launch`] over an explicit base environment.
///
/// # Errors
///
/// Returns `AppError::Config` when both a resume id and the continue flag
/// are set.
pub fn plan_launch_with_env(
    agent: &AgentConfig,
    options: &SpawnOptions,
    base_env: impl IntoIterator<Item = (String, String)>,
) -> Result<LaunchPlan> {
    if options.resume_session_id.is_some() && options.continue_last {
        return Err(AppError::Config(
            "resume_session_id and continue_last are mutually exclusive".into(),
        ));
    }

    let mut args = Vec::new();
    if let Some(resume) = &options.resume_session_id {
        args.push("--resume".to_owned());
        args.push(resume.clone());
    } else if options.continue_last {
        args.push("--continue".to_owned());
    }

    let permission_mode = options.permission_mode.unwrap_or(agent.permission_mode);
    args.push("--permission-mode".to_owned());
    args.push(permission_mode.as_str().to_owned());

    if let Some(model) = options.model.as_ref().or(agent.model.as_ref()) {
        args.push("--model".to_owned());
        args.push(model.clone());
    }

    if let Some(format) = options.output_format {
        args.push("--output-format".to_owned());
        args.push(format.as_str().to_owned());
    }

    let working_dir = match (&options.working_dir, options.continue_last) {
        (Some(dir), true) => dir.clone(),
        _ => agent.workspace.clone(),
    };

    let mut env: BTreeMap<String, String> = base_env.into_iter().collect();
    env.extend(agent.env.iter().map(|(k, v)| (k.clone(), v.clone())));
    if agent.team_mode || options.team_mode {
        env.insert(EXPERIMENTAL_TEAMS_ENV.to_owned(), "1".to_owned());
    }
    env.entry("TERM".to_owned())
        .or_insert_with(|| DEFAULT_TERM.to_owned());

    Ok(LaunchPlan {
        program: agent.binary_path.clone(),
        args,
        working_dir,
        env,
    })
}

/// Allocate a PTY of `rows` x `cols` and start `plan` attached to it.
///
/// # Errors
///
/// Returns `AppError::Process` if the PTY cannot be allocated or the binary
/// cannot be started.
pub fn spawn_in_pty(plan: &LaunchPlan, rows: u16, cols: u16) -> Result<(pty_process::Pty, Child)> {
    let (pty, pts) = pty_process::open()
        .map_err(|err| AppError::Process(format!("failed to open pty: {err}")))?;
    pty.resize(pty_process::Size::new(rows, cols))
        .map_err(|err| AppError::Process(format!("failed to size pty: {err}")))?;

    // Builder methods consume self.
    let mut cmd = pty_process::Command::new(&plan.program)
        .args(&plan.args)
        .env_clear()
        .current_dir(&plan.working_dir);
    for (key, value) in &plan.env {
        cmd = cmd.env(key, value);
    }

    let child = cmd.spawn(pts).map_err(|err| {
        AppError::Process(format!(
            "failed to spawn {}: {err}",
            plan.program.display()
        ))
    })?;

    debug!(
        program = %plan.program.display(),
        args = ?plan.args,
        cwd = %plan.working_dir.display(),
        "agent process attached to pty"
    );

    Ok((pty, child))
}
