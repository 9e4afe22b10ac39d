use std::fs::{self, File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};

use super::SupervisorError;

const PID_FILE: &str = "bridge.pid";
const ADDR_FILE: &str = "bridge.addr";
const LOG_FILE: &str = "bridge.log";

/// Directory holding the PID, address and log files of a background bridge.
#[derive(Debug, Clone)]
pub struct StateDir {
    root: PathBuf,
}

impl StateDir {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// `explicit` if given, else a per-user runtime or cache directory.
    pub fn resolve(explicit: Option<PathBuf>) -> Self {
        let root = explicit.unwrap_or_else(|| {
            dirs::runtime_dir()
                .or_else(dirs::cache_dir)
                .unwrap_or_else(std::env::temp_dir)
                .join(env!("CARGO_PKG_NAME"))
        });
        Self::new(root)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn pid_file(&self) -> PathBuf {
        self.root.join(PID_FILE)
    }

    pub fn addr_file(&self) -> PathBuf {
        self.root.join(ADDR_FILE)
    }

    pub fn log_file(&self) -> PathBuf {
        self.root.join(LOG_FILE)
    }

    pub fn ensure(&self) -> Result<(), SupervisorError> {
        fs::create_dir_all(&self.root).map_err(|e| io_error(&self.root, e))
    }

    pub fn read_pid(&self) -> Result<Option<u32>, SupervisorError> {
        let path = self.pid_file();
        let Some(content) = read_optional(&path)? else {
            return Ok(None);
        };
        content
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| SupervisorError::BadPidFile { path, content })
    }

    pub fn write_pid(&self, pid: u32) -> Result<(), SupervisorError> {
        let path = self.pid_file();
        fs::write(&path, format!("{pid}\n")).map_err(|e| io_error(&path, e))
    }

    /// Address the bridge answers on, as `(host, port)`.
    pub fn read_addr(&self) -> Result<Option<(String, u16)>, SupervisorError> {
        let Some(content) = read_optional(&self.addr_file())? else {
            return Ok(None);
        };
        Ok(content.trim().rsplit_once(':').and_then(|(host, port)| {
            port.parse().ok().map(|port| (host.to_string(), port))
        }))
    }

    pub fn write_addr(&self, host: &str, port: u16) -> Result<(), SupervisorError> {
        let path = self.addr_file();
        fs::write(&path, format!("{host}:{port}\n")).map_err(|e| io_error(&path, e))
    }

    /// Forget the running bridge. Missing files are fine.
    pub fn clear(&self) -> Result<(), SupervisorError> {
        for path in [self.pid_file(), self.addr_file()] {
            match fs::remove_file(&path) {
                Ok(()) => {}
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => return Err(io_error(&path, e)),
            }
        }
        Ok(())
    }

    pub fn open_log(&self) -> Result<File, SupervisorError> {
        let path = self.log_file();
        OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|e| io_error(&path, e))
    }

    /// Last `lines` lines of the log; empty if there is no log yet.
    pub fn tail_log(&self, lines: usize) -> Result<Vec<String>, SupervisorError> {
        let Some(content) = read_optional(&self.log_file())? else {
            return Ok(Vec::new());
        };
        let all: Vec<&str> = content.lines().collect();
        let start = all.len().saturating_sub(lines);
        Ok(all[start..].iter().map(|l| l.to_string()).collect())
    }
}

fn read_optional(path: &Path) -> Result<Option<String>, SupervisorError> {
    match fs::read_to_string(path) {
        Ok(content) => Ok(Some(content)),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(io_error(path, e)),
    }
}

fn io_error(path: &Path, source: io::Error) -> SupervisorError {
    SupervisorError::Io {
        path: path.to_path_buf(),
        source,
    }
}
