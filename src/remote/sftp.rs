//! SFTP backend on top of libssh2.
//!
//! libssh2 is blocking, so every session is owned by a dedicated worker thread.
//! Async callers send commands over a channel and await the reply on a
//! oneshot. Dropping the [`SftpSession`] handle closes the command channel; the
//! worker then disconnects and exits, so the connection is released on every
//! exit path including timeouts.

use async_trait::async_trait;
use bytes::Bytes;
use chrono::DateTime;
use std::collections::HashMap;
use std::io::Read;
use std::net::{TcpStream, ToSocketAddrs};
use std::path::Path;
use std::sync::mpsc;
use std::time::Duration;
use tokio::sync::oneshot;
use tracing::{debug, warn};

use super::{RemoteConnector, RemoteEntry, RemoteFile, RemoteSession};
use crate::error::RemoteError;

/// Login details for one SFTP source.
#[derive(Clone)]
pub struct SftpCredentials {
    pub username: String,
    pub password: Option<String>,
}

impl std::fmt::Debug for SftpCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SftpCredentials")
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "***"))
            .finish()
    }
}

/// Connector for one SFTP host.
#[derive(Debug, Clone)]
pub struct SftpConnector {
    host: String,
    port: u16,
    credentials: SftpCredentials,
    /// Applied to TCP connect and to every blocking libssh2 call.
    io_timeout: Duration,
    target: String,
}

impl SftpConnector {
    pub fn new(
        host: impl Into<String>,
        port: u16,
        credentials: SftpCredentials,
        io_timeout: Duration,
    ) -> Self {
        let host = host.into();
        let target = format!("{host}:{port}");
        Self {
            host,
            port,
            credentials,
            io_timeout,
            target,
        }
    }
}

#[async_trait]
impl RemoteConnector for SftpConnector {
    fn target(&self) -> &str {
        &self.target
    }

    async fn connect(&self) -> Result<Box<dyn RemoteSession>, RemoteError> {
        let (commands, inbox) = mpsc::channel();
        let (ready_tx, ready_rx) = oneshot::channel();
        let connector = self.clone();

        std::thread::Builder::new()
            .name(format!("sftp-{}", self.target))
            .spawn(move || match connector.open_blocking() {
                Ok(worker) => {
                    if ready_tx.send(Ok(())).is_ok() {
                        worker.run(inbox);
                    } else {
                        // Caller gave up (connect timeout); release the connection.
                        worker.disconnect();
                    }
                }
                Err(e) => {
                    let _ = ready_tx.send(Err(e));
                }
            })
            .map_err(|e| RemoteError::Connect {
                target: self.target.clone(),
                message: format!("failed to spawn worker: {e}"),
            })?;

        match ready_rx.await {
            Ok(Ok(())) => Ok(Box::new(SftpSession {
                commands: Some(commands),
                target: self.target.clone(),
            })),
            Ok(Err(e)) => Err(e),
            Err(_) => Err(RemoteError::WorkerGone {
                target: self.target.clone(),
            }),
        }
    }
}

impl SftpConnector {
    fn connect_error(&self, message: impl ToString) -> RemoteError {
        RemoteError::Connect {
            target: self.target.clone(),
            message: message.to_string(),
        }
    }

    /// Connect, handshake and authenticate. Runs on the worker thread.
    fn open_blocking(&self) -> Result<Worker, RemoteError> {
        let addr = (self.host.as_str(), self.port)
            .to_socket_addrs()
            .map_err(|e| self.connect_error(e))?
            .next()
            .ok_or_else(|| self.connect_error("host resolved to no addresses"))?;

        let tcp = TcpStream::connect_timeout(&addr, self.io_timeout)
            .map_err(|e| self.connect_error(e))?;

        let mut session = ssh2::Session::new().map_err(|e| self.connect_error(e))?;
        session.set_timeout(self.io_timeout.as_millis().min(u32::MAX as u128) as u32);
        session.set_tcp_stream(tcp);
        session.handshake().map_err(|e| self.connect_error(e))?;

        let password = self.credentials.password.as_deref().unwrap_or("");
        let auth_error = |message: String| RemoteError::Authenticate {
            target: self.target.clone(),
            user: self.credentials.username.clone(),
            message,
        };
        session
            .userauth_password(&self.credentials.username, password)
            .map_err(|e| auth_error(e.to_string()))?;
        if !session.authenticated() {
            return Err(auth_error(
                "server did not accept the credentials".to_string(),
            ));
        }

        let sftp = session.sftp().map_err(|e| self.connect_error(e))?;
        debug!(target = %self.target, "SFTP session established");

        Ok(Worker {
            session,
            sftp,
            files: HashMap::new(),
            next_handle: 0,
            target: self.target.clone(),
        })
    }
}

type Reply<T> = oneshot::Sender<Result<T, RemoteError>>;

enum Command {
    List {
        path: String,
        reply: Reply<Vec<RemoteEntry>>,
    },
    Open {
        path: String,
        reply: Reply<u64>,
    },
    Read {
        handle: u64,
        path: String,
        reply: Reply<Bytes>,
    },
    Release {
        handle: u64,
    },
    Close {
        reply: oneshot::Sender<()>,
    },
}

/// Owns the libssh2 session on its thread.
struct Worker {
    session: ssh2::Session,
    sftp: ssh2::Sftp,
    files: HashMap<u64, ssh2::File>,
    next_handle: u64,
    target: String,
}

impl Worker {
    fn run(mut self, inbox: mpsc::Receiver<Command>) {
        while let Ok(command) = inbox.recv() {
            match command {
                Command::List { path, reply } => {
                    let _ = reply.send(self.list(&path));
                }
                Command::Open { path, reply } => {
                    let _ = reply.send(self.open(&path));
                }
                Command::Read {
                    handle,
                    path,
                    reply,
                } => {
                    let _ = reply.send(self.read(handle, &path));
                }
                Command::Release { handle } => {
                    self.files.remove(&handle);
                }
                Command::Close { reply } => {
                    self.disconnect();
                    let _ = reply.send(());
                    return;
                }
            }
        }
        self.disconnect();
    }

    fn list(&mut self, path: &str) -> Result<Vec<RemoteEntry>, RemoteError> {
        let listing = self
            .sftp
            .readdir(Path::new(path))
            .map_err(|e| RemoteError::List {
                path: path.to_string(),
                message: e.to_string(),
            })?;

        let mut entries: Vec<RemoteEntry> = listing
            .into_iter()
            .filter_map(|(entry_path, stat)| {
                let name = entry_path.file_name()?.to_string_lossy().into_owned();
                if name == "." || name == ".." {
                    return None;
                }
                Some(RemoteEntry {
                    path: crate::paths::join(path, &name),
                    name,
                    is_dir: stat.is_dir(),
                    size: stat.size,
                    modified: stat
                        .mtime
                        .and_then(|secs| DateTime::from_timestamp(secs as i64, 0)),
                })
            })
            .collect();
        entries.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(entries)
    }

    fn open(&mut self, path: &str) -> Result<u64, RemoteError> {
        let file = self
            .sftp
            .open(Path::new(path))
            .map_err(|e| RemoteError::Open {
                path: path.to_string(),
                message: e.to_string(),
            })?;
        let handle = self.next_handle;
        self.next_handle += 1;
        self.files.insert(handle, file);
        Ok(handle)
    }

    fn read(&mut self, handle: u64, path: &str) -> Result<Bytes, RemoteError> {
        let Some(file) = self.files.get_mut(&handle) else {
            return Err(RemoteError::Open {
                path: path.to_string(),
                message: "file handle already released".to_string(),
            });
        };
        let mut buf = Vec::new();
        file.read_to_end(&mut buf)
            .map_err(|source| RemoteError::Read {
                source,
                path: path.to_string(),
            })?;
        Ok(Bytes::from(buf))
    }

    fn disconnect(mut self) {
        self.files.clear();
        if let Err(e) = self.session.disconnect(None, "closing", None) {
            warn!(target = %self.target, error = %e, "SFTP disconnect failed");
        } else {
            debug!(target = %self.target, "SFTP session closed");
        }
    }
}

/// Async handle to a worker-owned SFTP session.
#[derive(Debug)]
pub struct SftpSession {
    commands: Option<mpsc::Sender<Command>>,
    target: String,
}

impl SftpSession {
    fn gone(&self) -> RemoteError {
        RemoteError::WorkerGone {
            target: self.target.clone(),
        }
    }

    async fn call<T>(
        &self,
        make: impl FnOnce(Reply<T>) -> Command,
    ) -> Result<T, RemoteError> {
        let commands = self.commands.as_ref().ok_or_else(|| self.gone())?;
        let (tx, rx) = oneshot::channel();
        commands.send(make(tx)).map_err(|_| self.gone())?;
        rx.await.map_err(|_| self.gone())?
    }
}

impl std::fmt::Debug for Command {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Command::List { path, .. } => write!(f, "List({path})"),
            Command::Open { path, .. } => write!(f, "Open({path})"),
            Command::Read { handle, .. } => write!(f, "Read({handle})"),
            Command::Release { handle } => write!(f, "Release({handle})"),
            Command::Close { .. } => f.write_str("Close"),
        }
    }
}

#[async_trait]
impl RemoteSession for SftpSession {
    async fn list_dir(&mut self, path: &str) -> Result<Vec<RemoteEntry>, RemoteError> {
        let path = path.to_string();
        self.call(|reply| Command::List { path, reply }).await
    }

    async fn open(&mut self, path: &str) -> Result<Box<dyn RemoteFile>, RemoteError> {
        let owned = path.to_string();
        let handle = self
            .call(|reply| Command::Open {
                path: owned,
                reply,
            })
            .await?;
        let commands = self.commands.clone().ok_or_else(|| self.gone())?;
        Ok(Box::new(SftpFile {
            commands,
            handle,
            path: path.to_string(),
            target: self.target.clone(),
        }))
    }

    async fn close(&mut self) -> Result<(), RemoteError> {
        let Some(commands) = self.commands.take() else {
            return Ok(());
        };
        let (tx, rx) = oneshot::channel();
        if commands.send(Command::Close { reply: tx }).is_ok() {
            let _ = rx.await;
        }
        Ok(())
    }
}

struct SftpFile {
    commands: mpsc::Sender<Command>,
    handle: u64,
    path: String,
    target: String,
}

#[async_trait]
impl RemoteFile for SftpFile {
    async fn read_all(&mut self) -> Result<Bytes, RemoteError> {
        let gone = || RemoteError::WorkerGone {
            target: self.target.clone(),
        };
        let (tx, rx) = oneshot::channel();
        self.commands
            .send(Command::Read {
                handle: self.handle,
                path: self.path.clone(),
                reply: tx,
            })
            .map_err(|_| gone())?;
        rx.await.map_err(|_| gone())?
    }
}

impl Drop for SftpFile {
    fn drop(&mut self) {
        let _ = self.commands.send(Command::Release {
            handle: self.handle,
        });
    }
}
