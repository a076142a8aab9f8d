//! Process singleton lock via an advisory `flock` on a pidfile, so two
//! ingest processes never attach to the same replication slot at once.

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::os::unix::fs::OpenOptionsExt;
use std::os::unix::io::AsRawFd;
use std::path::PathBuf;

use anyhow::{bail, Context};

pub struct Pidfile {
    path: PathBuf,
    file: File,
}

impl Pidfile {
    /// Acquires an exclusive, non-blocking `flock` on `/tmp/bw_<slot>.pid`,
    /// writing the current process id. A second process against the same
    /// slot fails fast rather than silently running two ingest loops
    /// against the same replication slot.
    pub fn acquire(slot: &str) -> anyhow::Result<Self> {
        let path = PathBuf::from(format!("/tmp/bw_{slot}.pid"));
        let mut file = OpenOptions::new()
            .create(true)
            .write(true)
            .mode(0o644)
            .open(&path)
            .with_context(|| format!("failed to open pidfile {}", path.display()))?;

        let rc = unsafe { libc::flock(file.as_raw_fd(), libc::LOCK_EX | libc::LOCK_NB) };
        if rc != 0 {
            bail!(
                "another process already holds the lock on {} (is bottledwater already running for slot {slot}?)",
                path.display()
            );
        }

        file.set_len(0)
            .with_context(|| format!("failed to truncate pidfile {}", path.display()))?;
        writeln!(file, "{}", std::process::id())
            .with_context(|| format!("failed to write pid to {}", path.display()))?;

        Ok(Pidfile { path, file })
    }
}

impl Drop for Pidfile {
    fn drop(&mut self) {
        if let Err(err) = std::fs::remove_file(&self.path) {
            tracing::warn!(path = %self.path.display(), error = %err, "failed to remove pidfile on shutdown");
        }
    }
}
