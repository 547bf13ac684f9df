//! Child-command dispatch.
//!
//! Each distinct command line has at most one execution in flight;
//! triggers that arrive while it runs coalesce into at most one
//! follow-up run. Commands go through the shell, inherit the
//! environment produced by their exec block, and are killed after
//! their timeout.

use std::collections::HashMap;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use rand::Rng;
use tokio::process::Command;
use tracing::{debug, error, info, warn};

use crate::config::ExecConfig;
use crate::errors::CommandError;

#[derive(Clone, Copy, Debug, PartialEq)]
enum RunState {
    Running,
    RunningWithFollowUp,
}

/// Deduplicating dispatcher shared by all templates and the global
/// exec block.
#[derive(Debug, Default)]
pub(crate) struct CommandSet {
    states: Arc<Mutex<HashMap<String, RunState>>>,
}

impl CommandSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fires the exec block's command. Returns immediately; the child
    /// runs on its own task. A no-op when the block is disabled or has
    /// no command.
    pub fn trigger(&self, exec: &ExecConfig) {
        if !exec.enabled {
            return;
        }
        let Some(command) = exec.command.clone().filter(|c| !c.trim().is_empty()) else {
            return;
        };

        {
            let mut states = self.states.lock();
            if let Some(state) = states.get_mut(&command) {
                // Already running: coalesce into one follow-up.
                debug!("(command) {:?} already running, queueing follow-up", command);
                *state = RunState::RunningWithFollowUp;
                return;
            }
            states.insert(command.clone(), RunState::Running);
        }

        let states = Arc::clone(&self.states);
        let exec = exec.clone();
        tokio::spawn(async move {
            loop {
                if let Err(e) = run_once(&command, &exec).await {
                    error!("(command) {}", e);
                }
                let mut states = states.lock();
                match states.get(&command) {
                    Some(RunState::RunningWithFollowUp) => {
                        states.insert(command.clone(), RunState::Running);
                    }
                    _ => {
                        states.remove(&command);
                        return;
                    }
                }
            }
        });
    }

    /// Whether any command is still in flight.
    pub fn busy(&self) -> bool {
        !self.states.lock().is_empty()
    }
}

async fn run_once(command: &str, exec: &ExecConfig) -> Result<(), CommandError> {
    let splay = exec.splay();
    if splay > Duration::ZERO {
        let delay = rand::thread_rng().gen_range(Duration::ZERO..splay);
        debug!("(command) splaying {:?} for {:?}", delay, command);
        tokio::time::sleep(delay).await;
    }

    info!("(command) running {:?}", command);
    let env = exec.env.build(std::env::vars());
    let mut cmd = Command::new("sh");
    cmd.arg("-c")
        .arg(command)
        .env_clear()
        .envs(env)
        .stdin(Stdio::null());
    let mut child = cmd.spawn().map_err(|source| CommandError::Spawn {
        command: command.to_string(),
        source,
    })?;

    let timeout = exec.timeout();
    match tokio::time::timeout(timeout, child.wait()).await {
        Err(_) => {
            warn!("(command) {:?} exceeded {:?}, killing", command, timeout);
            let _ = child.start_kill();
            let _ = tokio::time::timeout(exec.kill_timeout(), child.wait()).await;
            Err(CommandError::Timeout {
                command: command.to_string(),
                timeout,
            })
        }
        Ok(Err(source)) => Err(CommandError::Spawn {
            command: command.to_string(),
            source,
        }),
        Ok(Ok(status)) if !status.success() => Err(CommandError::NonZeroExit {
            command: command.to_string(),
            code: status.code(),
        }),
        Ok(Ok(_)) => {
            debug!("(command) {:?} completed", command);
            Ok(())
        }
    }
}
