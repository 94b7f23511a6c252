//! Collaborators through which tools reach the outside world
//!
//! Tools never touch the filesystem or spawn processes directly; they go
//! through the [`FileSystem`] and [`Terminal`] carried by the execution
//! context. The local implementations confine paths to the workspace root.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::io;
use std::path::{Component, Path, PathBuf};
use std::time::Duration;
use tokio::io::AsyncReadExt;
use tokio::process::Command;

/// One entry returned by [`FileSystem::list_dir`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirEntryInfo {
    pub name: String,
    pub is_dir: bool,
    pub size: u64,
}

/// File access used by tools and sandboxed code
#[async_trait]
pub trait FileSystem: Send + Sync {
    async fn read_to_string(&self, path: &Path) -> io::Result<String>;

    /// Write a file, creating parent directories
    async fn write(&self, path: &Path, contents: &str) -> io::Result<()>;

    /// Entries sorted by name
    async fn list_dir(&self, path: &Path) -> io::Result<Vec<DirEntryInfo>>;
}

/// Output of a finished process
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandOutput {
    /// Exit status (-1 when killed by a signal)
    pub status: i32,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.status == 0
    }
}

/// Process execution used by tools and sandboxed code
#[async_trait]
pub trait Terminal: Send + Sync {
    async fn run(
        &self,
        program: &str,
        args: &[String],
        cwd: &Path,
        timeout: Duration,
    ) -> io::Result<CommandOutput>;
}

/// Resolve `path` against `cwd` and reject anything outside `root`
///
/// Resolution is lexical: `..` components are folded before the prefix
/// check, so `sub/../../etc` cannot escape.
pub fn confine_path(root: &Path, cwd: &Path, path: &Path) -> io::Result<PathBuf> {
    let joined = if path.is_absolute() {
        path.to_path_buf()
    } else {
        cwd.join(path)
    };

    let mut normalized = PathBuf::new();
    for component in joined.components() {
        match component {
            Component::ParentDir => {
                if !normalized.pop() {
                    return Err(outside_workspace(path));
                }
            }
            Component::CurDir => {}
            other => normalized.push(other.as_os_str()),
        }
    }

    if normalized.starts_with(root) {
        Ok(normalized)
    } else {
        Err(outside_workspace(path))
    }
}

fn outside_workspace(path: &Path) -> io::Error {
    io::Error::new(
        io::ErrorKind::PermissionDenied,
        format!("path '{}' is outside the workspace", path.display()),
    )
}

/// Filesystem rooted at a workspace directory
///
/// Paths are confined lexically first, then symlinks are resolved: the
/// target (or its nearest existing ancestor, for files not created yet)
/// must still lie under the canonical root.
#[derive(Debug, Clone)]
pub struct LocalFileSystem {
    root: PathBuf,
    canonical_root: PathBuf,
}

impl LocalFileSystem {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        let canonical_root = std::fs::canonicalize(&root).unwrap_or_else(|_| root.clone());
        Self {
            root,
            canonical_root,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    async fn check(&self, path: &Path) -> io::Result<PathBuf> {
        let lexical = confine_path(&self.root, &self.root, path)?;

        let mut probe = lexical.as_path();
        loop {
            match tokio::fs::canonicalize(probe).await {
                Ok(real) if real.starts_with(&self.canonical_root) => return Ok(lexical),
                Ok(_) => return Err(outside_workspace(path)),
                Err(e) if e.kind() == io::ErrorKind::NotFound => {
                    // a dangling link would be followed by a later write
                    if tokio::fs::symlink_metadata(probe).await.is_ok() {
                        return Err(outside_workspace(path));
                    }
                    match probe.parent() {
                        Some(parent) => probe = parent,
                        None => return Err(outside_workspace(path)),
                    }
                }
                Err(e) => return Err(e),
            }
        }
    }
}

#[async_trait]
impl FileSystem for LocalFileSystem {
    async fn read_to_string(&self, path: &Path) -> io::Result<String> {
        let path = self.check(path).await?;
        tokio::fs::read_to_string(path).await
    }

    async fn write(&self, path: &Path, contents: &str) -> io::Result<()> {
        let path = self.check(path).await?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(path, contents).await
    }

    async fn list_dir(&self, path: &Path) -> io::Result<Vec<DirEntryInfo>> {
        let path = self.check(path).await?;
        let mut reader = tokio::fs::read_dir(path).await?;
        let mut entries = Vec::new();
        while let Some(entry) = reader.next_entry().await? {
            let metadata = entry.metadata().await?;
            entries.push(DirEntryInfo {
                name: entry.file_name().to_string_lossy().into_owned(),
                is_dir: metadata.is_dir(),
                size: metadata.len(),
            });
        }
        entries.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(entries)
    }
}

/// Runs processes with `tokio::process`
#[derive(Debug, Clone)]
pub struct LocalTerminal {
    max_output_bytes: usize,
}

impl Default for LocalTerminal {
    fn default() -> Self {
        Self {
            max_output_bytes: 1024 * 1024,
        }
    }
}

impl LocalTerminal {
    pub fn new(max_output_bytes: usize) -> Self {
        Self { max_output_bytes }
    }
}

#[async_trait]
impl Terminal for LocalTerminal {
    async fn run(
        &self,
        program: &str,
        args: &[String],
        cwd: &Path,
        timeout: Duration,
    ) -> io::Result<CommandOutput> {
        tracing::debug!(program, ?args, cwd = %cwd.display(), "spawning process");

        let mut child = Command::new(program)
            .args(args)
            .current_dir(cwd)
            .stdin(std::process::Stdio::null())
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::piped())
            .kill_on_drop(true)
            .spawn()?;

        let stdout = child.stdout.take();
        let stderr = child.stderr.take();
        let limit = self.max_output_bytes as u64;

        let collect = async {
            let (out, err, status) = tokio::join!(
                read_limited(stdout, limit),
                read_limited(stderr, limit),
                child.wait()
            );
            Ok::<_, io::Error>(CommandOutput {
                status: status?.code().unwrap_or(-1),
                stdout: out?,
                stderr: err?,
            })
        };

        match tokio::time::timeout(timeout, collect).await {
            Ok(result) => result,
            Err(_) => Err(io::Error::new(
                io::ErrorKind::TimedOut,
                format!("'{}' did not finish within {:?}", program, timeout),
            )),
        }
    }
}

async fn read_limited<R>(reader: Option<R>, limit: u64) -> io::Result<String>
where
    R: tokio::io::AsyncRead + Unpin,
{
    let Some(reader) = reader else {
        return Ok(String::new());
    };
    let mut buf = Vec::new();
    let mut limited = reader.take(limit);
    limited.read_to_end(&mut buf).await?;
    // drain the rest so the child never blocks on a full pipe
    let mut rest = limited.into_inner();
    tokio::io::copy(&mut rest, &mut tokio::io::sink()).await?;
    Ok(String::from_utf8_lossy(&buf).into_owned())
}
