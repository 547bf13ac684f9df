//! Vault token lifecycle supervision.
//!
//! Given a VaultConfig with a token (raw or wrapped) and an optional
//! agent token file, this wires the renew-only View and the token-file
//! View, swaps the in-use token on the Vault client when the file
//! changes, and re-establishes renewal afterwards. The first fatal
//! error surfaces on the returned channel.

use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{error, info};

use super::view::{ViewError, ViewUpdate};
use super::watcher::Watcher;
use crate::config::VaultConfig;
use crate::dependency::{Dep, VaultAgentToken, VaultToken};
use crate::errors::{Error, FetchError};

const RENEW_FINGERPRINT: &str = "vault.token.renew";

/// Registers the token-renewal and token-file Views for the given
/// config and returns the channel their first fatal error arrives on.
///
/// Token unwrapping, when enabled, happens once before any View starts.
pub async fn watch_vault_token(
    watcher: &Arc<Watcher>,
    config: &VaultConfig,
) -> Result<mpsc::UnboundedReceiver<Error>, Error> {
    let (fatal_tx, fatal_rx) = mpsc::unbounded_channel();

    let vault = watcher.clients().vault().map_err(Error::Fetch)?.clone();

    if config.unwrap_token {
        let wrapped = vault.token();
        let inner = vault.unwrap_token(&wrapped).await.map_err(Error::Fetch)?;
        info!("(vault-token) unwrapped initial token");
        vault.set_token(&inner);
    }

    if config.renew_token {
        watcher.add_protected(Arc::new(VaultToken::new(config.token_renew_increment)));
    }

    if let Some(file) = &config.agent_token_file {
        let (token_tx, token_rx) = mpsc::unbounded_channel::<ViewUpdate>();
        let (err_tx, err_rx) = mpsc::unbounded_channel::<ViewError>();
        let dep: Dep = Arc::new(VaultAgentToken::new(file));
        watcher.add_with_channels(dep, token_tx, err_tx);

        tokio::spawn(supervise_token_file(
            Arc::clone(watcher),
            config.clone(),
            token_rx,
            err_rx,
            fatal_tx.clone(),
        ));
    }

    // Renewal failures flow through the watcher's shared error channel;
    // the Runner treats exhausted token renewal as fatal by fingerprint.
    Ok(fatal_rx)
}

/// Whether a surfaced View error belongs to the token lifecycle and is
/// fatal for the whole process.
pub fn is_token_fatal(err: &ViewError) -> bool {
    err.dep.fingerprint() == RENEW_FINGERPRINT
        || err.dep.fingerprint().starts_with("vault.token.file")
}

async fn supervise_token_file(
    watcher: Arc<Watcher>,
    config: VaultConfig,
    mut token_rx: mpsc::UnboundedReceiver<ViewUpdate>,
    mut err_rx: mpsc::UnboundedReceiver<ViewError>,
    fatal_tx: mpsc::UnboundedSender<Error>,
) {
    loop {
        tokio::select! {
            update = token_rx.recv() => {
                let Some(update) = update else { return };
                let Some(token) = update.value.as_str() else { continue };
                if token.is_empty() {
                    continue;
                }
                if let Err(e) = apply_token(&watcher, &config, token).await {
                    error!("(vault-token) failed to apply new token: {}", e);
                    let _ = fatal_tx.send(Error::Fetch(e));
                    return;
                }
            }
            err = err_rx.recv() => {
                let Some(err) = err else { return };
                error!("(vault-token) token file watch failed: {}", err.error);
                let _ = fatal_tx.send(Error::Fetch(err.error));
                return;
            }
        }
    }
}

/// Resolves (possibly unwraps) the new token, swaps it on the client,
/// and restarts renewal so the ladder begins from the fresh lease.
async fn apply_token(
    watcher: &Arc<Watcher>,
    config: &VaultConfig,
    token: &str,
) -> Result<(), FetchError> {
    let vault = watcher.clients().vault()?.clone();
    let resolved = if config.unwrap_token {
        vault.unwrap_token(token).await?
    } else {
        token.to_string()
    };
    info!("(vault-token) token file changed, swapping client token");
    vault.set_token(&resolved);

    if config.renew_token {
        watcher.remove(RENEW_FINGERPRINT);
        watcher.add_protected(Arc::new(VaultToken::new(config.token_renew_increment)));
    }
    Ok(())
}
