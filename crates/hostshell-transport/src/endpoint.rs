//! Filesystem-backed rendezvous endpoint.
//!
//! The socket file's presence is itself a signal to clients: a refused
//! connection means "host is (re)starting", a missing file means "host
//! removed the endpoint on purpose".

use std::{
    io,
    path::{Path, PathBuf},
};

use hostshell_core::SessionId;
use thiserror::Error;
use tokio::net::{UnixListener, UnixStream};
use uuid::Uuid;

/// Endpoint error.
#[derive(Debug, Error)]
pub enum EndpointError {
    #[error("failed to bind {path}: {source}")]
    Bind { path: PathBuf, source: io::Error },
    #[error("failed to remove {path}: {source}")]
    Unbind { path: PathBuf, source: io::Error },
    #[error("accept failed: {0}")]
    Accept(#[from] io::Error),
}

/// Why a dial attempt failed, as far as the reconnect policy cares.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DialFailure {
    /// The socket file exists but nothing is listening.
    Refused,
    /// The socket file does not exist.
    Missing,
    /// Any other I/O failure.
    Other,
}

impl DialFailure {
    /// Classify a connect error.
    #[must_use]
    pub fn classify(err: &io::Error) -> Self {
        match err.kind() {
            io::ErrorKind::ConnectionRefused => Self::Refused,
            io::ErrorKind::NotFound => Self::Missing,
            _ => Self::Other,
        }
    }
}

/// The host's single listener on the rendezvous path.
///
/// Dropping the endpoint closes the listener but leaves the socket file in
/// place, so clients of a restarting host see a refused connection rather
/// than a vanished endpoint. Call [`Endpoint::unbind`] to tear it down.
#[derive(Debug)]
pub struct Endpoint {
    listener: UnixListener,
    path: PathBuf,
}

impl Endpoint {
    /// Bind a fresh listener at `path`, replacing any stale artifact.
    ///
    /// # Errors
    /// Returns error if the listener cannot be created.
    pub fn bind(path: impl AsRef<Path>) -> Result<Self, EndpointError> {
        let path = path.as_ref().to_path_buf();

        match std::fs::remove_file(&path) {
            Ok(()) => tracing::debug!(path = %path.display(), "Removed stale endpoint"),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "Failed to remove stale endpoint");
            }
        }

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|source| EndpointError::Bind {
                path: path.clone(),
                source,
            })?;
        }

        let listener = UnixListener::bind(&path).map_err(|source| EndpointError::Bind {
            path: path.clone(),
            source,
        })?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            if let Err(e) = std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o600)) {
                tracing::warn!(path = %path.display(), error = %e, "Failed to restrict endpoint permissions");
            }
        }

        tracing::info!(path = %path.display(), "Shell endpoint listening");
        Ok(Self { listener, path })
    }

    /// Rendezvous path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Wait for the next client and assign it a session id.
    ///
    /// # Errors
    /// Returns error if accepting fails.
    pub async fn accept(&self) -> Result<(SessionId, UnixStream), EndpointError> {
        let (stream, _addr) = self.listener.accept().await?;
        Ok((Uuid::new_v4(), stream))
    }

    /// Remove the rendezvous file.
    ///
    /// # Errors
    /// Returns error if the file exists but cannot be removed.
    pub fn unbind(&self) -> Result<(), EndpointError> {
        unbind(&self.path)
    }
}

/// Remove the rendezvous file at `path`; a missing file is not an error.
///
/// # Errors
/// Returns error if the file exists but cannot be removed.
pub fn unbind(path: impl AsRef<Path>) -> Result<(), EndpointError> {
    let path = path.as_ref();
    match std::fs::remove_file(path) {
        Ok(()) => {
            tracing::info!(path = %path.display(), "Shell endpoint removed");
            Ok(())
        }
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(source) => Err(EndpointError::Unbind {
            path: path.to_path_buf(),
            source,
        }),
    }
}

/// Connect to the rendezvous path.
///
/// # Errors
/// Returns the raw connect error; classify it with [`DialFailure::classify`].
pub async fn dial(path: impl AsRef<Path>) -> io::Result<UnixStream> {
    UnixStream::connect(path).await
}

#[cfg(test)]
mod tests {
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    use super::*;

    #[tokio::test]
    async fn test_bind_replaces_stale_socket() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("shell.sock");

        // A listener that went away without cleaning up.
        drop(std::os::unix::net::UnixListener::bind(&path).unwrap());
        assert!(path.exists());
        let err = dial(&path).await.unwrap_err();
        assert_eq!(DialFailure::classify(&err), DialFailure::Refused);

        let endpoint = Endpoint::bind(&path).unwrap();
        let (mut client, accepted) = tokio::join!(
            async { dial(&path).await.unwrap() },
            async { endpoint.accept().await.unwrap() }
        );
        let (_id, mut server) = accepted;
        client.write_all(b"ping\n").await.unwrap();
        let mut buf = [0u8; 5];
        server.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"ping\n");
    }

    #[tokio::test]
    async fn test_bind_creates_parent_directory() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tmp").join("shell.sock");
        let endpoint = Endpoint::bind(&path).unwrap();
        assert_eq!(endpoint.path(), path);
        assert!(path.exists());
    }

    #[tokio::test]
    async fn test_drop_keeps_file_unbind_removes_it() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("shell.sock");

        drop(Endpoint::bind(&path).unwrap());
        assert!(path.exists(), "restart must leave the rendezvous in place");

        let endpoint = Endpoint::bind(&path).unwrap();
        endpoint.unbind().unwrap();
        assert!(!path.exists());
        let err = dial(&path).await.unwrap_err();
        assert_eq!(DialFailure::classify(&err), DialFailure::Missing);

        // Idempotent.
        tokio_test::assert_ok!(unbind(&path));
    }

    #[test]
    fn test_classify_other() {
        let err = io::Error::new(io::ErrorKind::PermissionDenied, "nope");
        assert_eq!(DialFailure::classify(&err), DialFailure::Other);
    }
}
