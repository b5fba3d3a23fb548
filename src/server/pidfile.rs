use anyhow::{bail, Context, Result};
use std::fs::OpenOptions;
use std::io::{BufRead, BufReader, ErrorKind, Write};
use std::os::unix::net::UnixStream;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Exclusive PID file, removed on drop.
#[derive(Debug)]
pub struct PidFile {
    path: PathBuf,
    pid: u32,
}

impl PidFile {
    /// Create the PID file. An existing file whose daemon still answers on
    /// `socket` is a refusal; otherwise it is stale and replaced.
    pub fn acquire(path: &Path, socket: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("failed to create directory {}", parent.display()))?;
        }

        for _ in 0..2 {
            match OpenOptions::new().write(true).create_new(true).open(path) {
                Ok(mut file) => {
                    let pid = std::process::id();
                    writeln!(file, "{pid}")
                        .with_context(|| format!("failed to write {}", path.display()))?;
                    return Ok(Self {
                        path: path.to_path_buf(),
                        pid,
                    });
                }
                Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                    let holder = read_pid(path);
                    if socket_answers(socket) {
                        bail!(
                            "daemon already running (pid {}) on {}",
                            holder.map_or_else(|| "unknown".to_string(), |p| p.to_string()),
                            socket.display()
                        );
                    }
                    tracing::warn!(path = %path.display(), stale_pid = ?holder, "replacing stale pid file");
                    std::fs::remove_file(path)
                        .with_context(|| format!("failed to remove stale {}", path.display()))?;
                }
                Err(e) => {
                    return Err(e).with_context(|| format!("failed to create {}", path.display()))
                }
            }
        }
        bail!("could not acquire pid file {}", path.display())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn pid(&self) -> u32 {
        self.pid
    }
}

impl Drop for PidFile {
    fn drop(&mut self) {
        // Leave a file another process has since written alone.
        if read_pid(&self.path) == Some(self.pid) {
            if let Err(e) = std::fs::remove_file(&self.path) {
                tracing::warn!(path = %self.path.display(), error = %e, "failed to remove pid file");
            }
        }
    }
}

/// PID recorded in `path`, if readable.
pub fn read_pid(path: &Path) -> Option<u32> {
    std::fs::read_to_string(path).ok()?.trim().parse().ok()
}

/// Whether something on `socket` answers a ping.
fn socket_answers(socket: &Path) -> bool {
    let Ok(mut stream) = UnixStream::connect(socket) else {
        return false;
    };
    let timeout = Some(Duration::from_millis(500));
    if stream.set_read_timeout(timeout).is_err() || stream.set_write_timeout(timeout).is_err() {
        return false;
    }
    if stream.write_all(b"{\"method\":\"ping\"}\n").is_err() {
        return false;
    }
    let mut line = String::new();
    match BufReader::new(stream).read_line(&mut line) {
        Ok(n) if n > 0 => serde_json::from_str::<serde_json::Value>(&line)
            .map(|v| v["status"] == "ok")
            .unwrap_or(false),
        _ => false,
    }
}
