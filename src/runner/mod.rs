//! The top-level watch-execute-render loop.
//!
//! The Runner drains View updates into the Brain, executes every
//! template, registers newly discovered dependencies, renders templates
//! whose dependency set is closed, and dispatches change commands. It
//! terminates on shutdown signal, on fatal Vault token failure, or (in
//! once mode) when every template has rendered from a closed set.

mod command;
mod quiescence;

use std::collections::{BTreeMap, HashMap, HashSet};
use std::io::Write;

use tokio::sync::mpsc;
use tokio::time::{sleep_until, Instant};
use tracing::{error, info, warn};

use crate::brain::Brain;
use crate::clients::ClientSet;
use crate::config::{ExecConfig, TemplarConfig, TemplateConfig};
use crate::constants::{DEFAULT_VAULT_TTL_ZERO_CAP, DEFAULT_WAIT_TIME};
use crate::errors::{Error, Result};
use crate::renderer::{self, RenderInput};
use crate::template::Template;
use crate::watch::{
    is_token_fatal, watch_vault_token, ViewConfig, Watcher, WatcherChannels,
};

use self::command::CommandSet;
use self::quiescence::Quiescence;

#[cfg(test)]
mod runner_test;

#[derive(Clone, Copy, Debug, Default)]
pub struct RunnerOptions {
    /// Render once and exit instead of watching forever.
    pub once: bool,
    /// Report what would change without touching the filesystem or
    /// running commands.
    pub dry: bool,
}

enum Event {
    Data(crate::watch::ViewUpdate),
    ViewFailed(crate::watch::ViewError),
    TokenFatal(Error),
    QuiescenceDue,
    Reload,
    Shutdown,
    Closed,
}

#[derive(Debug)]
struct TemplateEntry {
    template: Template,
    config: TemplateConfig,
    quiescence: Option<Quiescence>,
    last_output: Option<String>,
    rendered: bool,
    missing: bool,
}

#[derive(Debug)]
pub struct Runner {
    config: TemplarConfig,
    entries: Vec<TemplateEntry>,
    brain: Brain,
    watcher: std::sync::Arc<Watcher>,
    channels: WatcherChannels,
    token_fatal_rx: Option<mpsc::UnboundedReceiver<Error>>,
    commands: CommandSet,
    once: bool,
    dry: bool,
}

impl Runner {
    pub async fn new(
        config: TemplarConfig,
        clients: ClientSet,
        options: RunnerOptions,
    ) -> Result<Self> {
        let mut entries = Vec::with_capacity(config.templates.len());
        for template_config in &config.templates {
            template_config
                .validate()
                .map_err(Error::Fatal)?;
            if template_config.destination.is_none() && !options.dry {
                return Err(Error::Fatal(format!(
                    "template {:?} has no destination and dry mode is off",
                    template_config.source
                )));
            }
            let template = Template::new(template_config)?;
            let wait = template_config.wait.or(config.wait);
            entries.push(TemplateEntry {
                template,
                config: template_config.clone(),
                quiescence: wait.map(Quiescence::new),
                last_output: None,
                rendered: false,
                missing: true,
            });
        }

        let view_config = ViewConfig {
            once: options.once,
            wait_time: DEFAULT_WAIT_TIME,
            max_stale: config.max_stale_duration(),
            retry: config.consul.retry,
            rate_limit: config.consul.rate_limit,
            ttl_zero_cap: DEFAULT_VAULT_TTL_ZERO_CAP,
            ttl_zero_attempts: None,
        };
        let (watcher, channels) = Watcher::new(clients.clone(), view_config);

        let token_fatal_rx = if clients.vault().is_ok() {
            Some(watch_vault_token(&watcher, &config.vault).await?)
        } else {
            None
        };

        Ok(Self {
            config,
            entries,
            brain: Brain::new(),
            watcher,
            channels,
            token_fatal_rx,
            commands: CommandSet::new(),
            once: options.once,
            dry: options.dry,
        })
    }

    /// Runs until shutdown, fatal error, or once-mode convergence.
    pub async fn start(&mut self) -> Result<()> {
        self.write_pid()?;
        let result = self.run_loop().await;
        self.watcher.stop();
        self.remove_pid();
        result
    }

    async fn run_loop(&mut self) -> Result<()> {
        let (reload_tx, mut reload_rx) = mpsc::unbounded_channel();
        let (shutdown_tx, mut shutdown_rx) = mpsc::unbounded_channel();
        spawn_signal_listener(self.config.reload_signal.as_deref(), reload_tx);
        spawn_shutdown_listener(self.config.kill_signal.as_deref(), shutdown_tx);

        info!("(runner) starting with {} template(s)", self.entries.len());
        self.run_iteration().await?;

        loop {
            if self.once && self.converged() {
                info!("(runner) once mode complete");
                self.drain_commands().await;
                return Ok(());
            }

            let deadline = self.next_deadline();
            let event = tokio::select! {
                update = self.channels.data_rx.recv() => match update {
                    Some(update) => Event::Data(update),
                    None => Event::Closed,
                },
                err = self.channels.err_rx.recv() => match err {
                    Some(err) => Event::ViewFailed(err),
                    None => Event::Closed,
                },
                fatal = recv_token_fatal(&mut self.token_fatal_rx) => Event::TokenFatal(fatal),
                _ = sleep_until(deadline.unwrap_or_else(far_future)), if deadline.is_some() => {
                    Event::QuiescenceDue
                }
                _ = reload_rx.recv() => Event::Reload,
                _ = shutdown_rx.recv() => Event::Shutdown,
            };

            eprintln!("EVT {:?} now={:?}", std::mem::discriminant(&event), Instant::now());
            match event {
                Event::Data(update) => {
                    self.receive(update);
                    // Drain whatever else is already queued so one
                    // iteration sees a consistent batch.
                    while let Ok(update) = self.channels.data_rx.try_recv() {
                        self.receive(update);
                    }
                }
                Event::ViewFailed(err) => {
                    if is_token_fatal(&err) {
                        error!("(runner) vault token lifecycle failed: {}", err.error);
                        return Err(Error::Fatal(format!(
                            "vault token lifecycle failed: {}",
                            err.error
                        )));
                    }
                    if self.once {
                        return Err(Error::Fetch(err.error));
                    }
                    warn!("(runner) {} failed: {}", err.dep, err.error);
                }
                Event::TokenFatal(fatal) => return Err(fatal),
                Event::QuiescenceDue => {}
                Event::Reload => self.reload(),
                Event::Shutdown => {
                    info!("(runner) shutdown signal received");
                    return Ok(());
                }
                Event::Closed => return Ok(()),
            }

            self.run_iteration().await?;
        }
    }

    /// Stores an update unless its view has since been pruned; a value
    /// for a dependency no templates use anymore is stale by definition.
    fn receive(&mut self, update: crate::watch::ViewUpdate) {
        if !self.watcher.watching(update.dep.fingerprint()) {
            return;
        }
        self.brain.remember(&update.dep, update.value);
    }

    /// One pass over every template: execute, register discoveries,
    /// render what is due, dispatch commands, garbage-collect views.
    async fn run_iteration(&mut self) -> Result<()> {
        let now = Instant::now();
        let mut used_union: HashSet<String> = HashSet::new();
        let mut any_changed = false;
        // Template configs sharing a source execute once per iteration.
        let mut executed: HashMap<String, crate::template::ExecuteResult> = HashMap::new();
        // Commands fire after the pass, each distinct command line once,
        // in first-trigger order.
        let mut pending_commands: Vec<ExecConfig> = Vec::new();
        let mut seen_commands: HashSet<String> = HashSet::new();

        for entry in &mut self.entries {
            let result = match executed.get(entry.template.id()) {
                Some(result) => result.clone(),
                None => match entry.template.execute(&self.brain, &BTreeMap::new()) {
                    Ok(result) => {
                        executed.insert(entry.template.id().to_string(), result.clone());
                        result
                    }
                    Err(e) => {
                        error!(
                            "(runner) template {} execution failed: {}",
                            entry.template.id(),
                            e
                        );
                        continue;
                    }
                },
            };
            used_union.extend(result.used.keys().cloned());
            entry.missing = !result.missing.is_empty();

            if entry.missing {
                for dep in result.missing.into_values() {
                    self.watcher.add(dep);
                }
                continue;
            }

            let changed = entry.last_output.as_deref() != Some(result.output.as_str());
            entry.last_output = Some(result.output.clone());
            let due = match &mut entry.quiescence {
                None => true,
                Some(q) => {
                    if changed {
                        q.tick(now);
                    }
                    q.pending() && q.due(now)
                }
            };
            if !due {
                continue;
            }

            let Some(dest) = &entry.config.destination else {
                // Dry mode without a destination streams to stdout.
                let mut stdout = std::io::stdout();
                let _ = writeln!(stdout, "> (inline template {})", entry.template.id());
                let _ = stdout.write_all(result.output.as_bytes());
                entry.rendered = true;
                if let Some(q) = &mut entry.quiescence {
                    q.reset();
                }
                continue;
            };

            let render = renderer::render(&RenderInput {
                contents: &result.output,
                dest,
                perms: entry.config.perms.as_deref(),
                backup: entry.config.backup,
                dry: self.dry,
            });
            match render {
                Err(e) => {
                    // Retried next iteration; the quiescence timer stays
                    // armed so the render is re-attempted.
                    error!("(runner) {}", e);
                }
                Ok(outcome) => {
                    entry.rendered = true;
                    if let Some(q) = &mut entry.quiescence {
                        q.reset();
                    }
                    if outcome.did_render {
                        any_changed = true;
                        if let Some(exec) = entry.config.effective_exec() {
                            if let Some(command) = exec.command.as_deref() {
                                if seen_commands.insert(command.to_string()) {
                                    pending_commands.push(exec);
                                }
                            }
                        }
                    }
                }
            }
        }

        self.watcher.prune(&used_union);

        for exec in &pending_commands {
            self.commands.trigger(exec);
        }
        if any_changed && self.entries.iter().all(|e| e.rendered) {
            if let Some(exec) = &self.config.exec {
                let duplicate = exec
                    .command
                    .as_deref()
                    .is_some_and(|c| seen_commands.contains(c));
                if !duplicate {
                    self.commands.trigger(exec);
                }
            }
        }
        Ok(())
    }

    fn converged(&self) -> bool {
        !self.entries.is_empty() && self.entries.iter().all(|e| e.rendered && !e.missing)
    }

    fn next_deadline(&self) -> Option<Instant> {
        self.entries
            .iter()
            .filter_map(|e| e.quiescence.as_ref().and_then(Quiescence::next_deadline))
            .min()
    }

    /// Re-parses template sources in place. A template that fails to
    /// parse keeps its previous body.
    fn reload(&mut self) {
        info!("(runner) reload signal received, re-reading templates");
        for entry in &mut self.entries {
            match Template::new(&entry.config) {
                Ok(template) => {
                    entry.template = template;
                    entry.last_output = None;
                    entry.rendered = false;
                }
                Err(e) => {
                    error!(
                        "(runner) reload of template {:?} failed, keeping previous: {}",
                        entry.config.source, e
                    );
                }
            }
        }
    }

    /// Once mode waits for in-flight commands before exiting.
    async fn drain_commands(&self) {
        while self.commands.busy() {
            tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        }
    }

    fn write_pid(&self) -> Result<()> {
        if let Some(path) = &self.config.pid_file {
            std::fs::write(path, std::process::id().to_string())
                .map_err(|e| Error::Fatal(format!("failed to write pid file {:?}: {}", path, e)))?;
            info!("(runner) wrote pid file {:?}", path);
        }
        Ok(())
    }

    fn remove_pid(&self) {
        if let Some(path) = &self.config.pid_file {
            let _ = std::fs::remove_file(path);
        }
    }
}

async fn recv_token_fatal(rx: &mut Option<mpsc::UnboundedReceiver<Error>>) -> Error {
    match rx {
        Some(rx) => match rx.recv().await {
            Some(e) => e,
            None => std::future::pending().await,
        },
        None => std::future::pending().await,
    }
}

fn far_future() -> Instant {
    Instant::now() + std::time::Duration::from_secs(86400 * 365)
}

#[cfg(unix)]
fn signal_kind(name: &str) -> Option<tokio::signal::unix::SignalKind> {
    use tokio::signal::unix::SignalKind;
    match name {
        "SIGHUP" => Some(SignalKind::hangup()),
        "SIGINT" => Some(SignalKind::interrupt()),
        "SIGTERM" => Some(SignalKind::terminate()),
        "SIGQUIT" => Some(SignalKind::quit()),
        "SIGUSR1" => Some(SignalKind::user_defined1()),
        "SIGUSR2" => Some(SignalKind::user_defined2()),
        _ => None,
    }
}

#[cfg(unix)]
fn spawn_signal_listener(name: Option<&str>, tx: mpsc::UnboundedSender<()>) {
    let Some(kind) = name.and_then(signal_kind) else { return };
    tokio::spawn(async move {
        let Ok(mut stream) = tokio::signal::unix::signal(kind) else {
            return;
        };
        while stream.recv().await.is_some() {
            if tx.send(()).is_err() {
                return;
            }
        }
    });
}

#[cfg(not(unix))]
fn spawn_signal_listener(_name: Option<&str>, _tx: mpsc::UnboundedSender<()>) {}

fn spawn_shutdown_listener(name: Option<&str>, tx: mpsc::UnboundedSender<()>) {
    // The configured kill signal, when it maps to a listenable one;
    // ctrl-c otherwise.
    #[cfg(unix)]
    if let Some(kind) = name.and_then(signal_kind) {
        tokio::spawn(async move {
            let Ok(mut stream) = tokio::signal::unix::signal(kind) else {
                return;
            };
            if stream.recv().await.is_some() {
                let _ = tx.send(());
            }
        });
        return;
    }
    #[cfg(not(unix))]
    let _ = name;
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            let _ = tx.send(());
        }
    });
}
