//! Rendezvous socket listener.
//!
//! Binds a Unix domain socket at the configured path using the
//! `interprocess` crate and hands every accepted stream to
//! [`Broker::serve_connection`]. Only the socket's owner may connect; there is
//! no other authentication.

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use interprocess::local_socket::{
    tokio::prelude::*, GenericFilePath, ListenerOptions, ToFsName,
};
use tokio::task::JoinHandle;
use tracing::{debug, info, info_span, warn, Instrument};

use super::Broker;
use crate::{AppError, Result};

/// A bound listener.
#[derive(Debug)]
pub struct BrokerHandle {
    socket_path: PathBuf,
    accept: JoinHandle<()>,
}

impl BrokerHandle {
    /// Path the listener is bound to.
    #[must_use]
    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }

    /// Wait for the accept loop to stop (after [`Broker::shutdown`]).
    pub async fn join(self) {
        if let Err(err) = self.accept.await {
            warn!(%err, "accept task failed");
        }
    }
}

impl Broker {
    /// Bind the rendezvous socket and start accepting connections.
    ///
    /// A stale socket file left at the path by a previous run is removed
    /// first. On Unix the socket is restricted to mode `0o600`.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Ipc` if the path cannot be prepared or the listener
    /// cannot be created.
    pub fn bind(self: &Arc<Self>) -> Result<BrokerHandle> {
        let socket_path = self.settings.socket_path.clone();

        if let Some(parent) = socket_path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|err| {
                AppError::Ipc(format!(
                    "failed to create socket directory '{}': {err}",
                    parent.display()
                ))
            })?;
        }

        match fs::remove_file(&socket_path) {
            Ok(()) => debug!(path = %socket_path.display(), "removed stale socket"),
            Err(err) if err.kind() == ErrorKind::NotFound => {}
            Err(err) => {
                return Err(AppError::Ipc(format!(
                    "failed to remove stale socket '{}': {err}",
                    socket_path.display()
                )));
            }
        }

        let name = socket_path
            .as_path()
            .to_fs_name::<GenericFilePath>()
            .map_err(|err| {
                AppError::Ipc(format!(
                    "invalid socket path '{}': {err}",
                    socket_path.display()
                ))
            })?;

        let listener = ListenerOptions::new()
            .name(name)
            .create_tokio()
            .map_err(|err| AppError::Ipc(format!("failed to create listener: {err}")))?;

        restrict_permissions(&socket_path)?;
        info!(path = %socket_path.display(), "broker listening");

        let broker = Arc::clone(self);
        let cancel = self.shutdown.clone();
        let span = info_span!("listener", path = %socket_path.display());
        let accept = self.tasks.spawn(
            async move {
                loop {
                    tokio::select! {
                        () = cancel.cancelled() => {
                            info!("listener shutting down");
                            break;
                        }
                        accept_result = listener.accept() => {
                            match accept_result {
                                Ok(stream) => {
                                    let (reader, writer) = stream.split();
                                    let conn = Arc::clone(&broker);
                                    broker.tasks.spawn(conn.serve_connection(reader, writer));
                                }
                                Err(err) => {
                                    warn!(%err, "accept failed");
                                }
                            }
                        }
                    }
                }
            }
            .instrument(span),
        );

        Ok(BrokerHandle {
            socket_path,
            accept,
        })
    }
}

/// Remove the rendezvous file, ignoring a file that is already gone.
pub fn remove_socket_file(path: &Path) {
    match fs::remove_file(path) {
        Ok(()) => debug!(path = %path.display(), "socket file removed"),
        Err(err) if err.kind() == ErrorKind::NotFound => {}
        Err(err) => warn!(%err, path = %path.display(), "failed to remove socket file"),
    }
}

#[cfg(unix)]
fn restrict_permissions(path: &Path) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;

    fs::set_permissions(path, fs::Permissions::from_mode(0o600)).map_err(|err| {
        AppError::Ipc(format!(
            "failed to set permissions on '{}': {err}",
            path.display()
        ))
    })
}

#[cfg(not(unix))]
fn restrict_permissions(_path: &Path) -> Result<()> {
    Ok(())
}
