//! Launching and supervising the external load generator process.
//!
//! The controller only ever talks to the [`ProcessLauncher`] and
//! [`RunningProcess`] traits; [`SubprocessLauncher`] is the default
//! implementation backed by `std::process`.

use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::error::{PbenchError, Result};

/// Everything needed to start the generator for one run.
#[derive(Debug, Clone, PartialEq)]
pub struct LaunchSpec {
    pub binary: PathBuf,
    /// Exported to the child as `LD_LIBRARY_PATH`.
    pub modules_path: Option<PathBuf>,
    pub args: Vec<String>,
    pub env: Vec<(String, String)>,
    pub working_dir: PathBuf,
    pub stdout: PathBuf,
    pub stderr: PathBuf,
    pub schedule_file: PathBuf,
    pub duration: Option<Duration>,
    pub concurrency: u32,
}

impl LaunchSpec {
    /// Environment the child should see, modules path included.
    pub fn effective_env(&self) -> Vec<(String, String)> {
        let mut env = self.env.clone();
        if let Some(modules) = &self.modules_path {
            let mut value = modules.display().to_string();
            if let Ok(existing) = std::env::var("LD_LIBRARY_PATH") {
                if !existing.is_empty() {
                    value = format!("{}:{}", value, existing);
                }
            }
            env.push(("LD_LIBRARY_PATH".to_string(), value));
        }
        env
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessStatus {
    Running,
    /// Exit code, `None` when killed by a signal.
    Exited(Option<i32>),
}

/// Handle to a started generator process.
pub trait RunningProcess: Send {
    /// Query status without blocking.
    fn poll(&mut self) -> io::Result<ProcessStatus>;

    /// Complete output lines produced since the previous call.
    fn drain_output(&mut self) -> io::Result<Vec<String>>;

    /// Stop the process if it is still running and reap it.
    fn terminate(&mut self) -> io::Result<()>;
}

pub trait ProcessLauncher: Send {
    fn launch(&self, spec: &LaunchSpec) -> io::Result<Box<dyn RunningProcess>>;
}

/// Find the generator binary. Paths with a directory part must exist, bare
/// names are searched on `PATH`.
pub fn resolve_tool(path: &Path) -> Result<PathBuf> {
    let missing = || PbenchError::MissingTool {
        path: path.display().to_string(),
    };

    if path.components().count() > 1 || path.is_absolute() {
        return if path.is_file() { Ok(path.to_path_buf()) } else { Err(missing()) };
    }

    let search = std::env::var_os("PATH").ok_or_else(missing)?;
    std::env::split_paths(&search)
        .map(|dir| dir.join(path))
        .find(|candidate| candidate.is_file())
        .ok_or_else(missing)
}

/// Tails a file the child writes to, yielding whole lines only.
#[derive(Debug)]
struct OutputTail {
    path: PathBuf,
    offset: u64,
    /// Bytes after the last newline, kept raw so split characters survive.
    partial: Vec<u8>,
}

impl OutputTail {
    fn new(path: PathBuf) -> Self {
        Self {
            path,
            offset: 0,
            partial: Vec::new(),
        }
    }

    fn read_lines(&mut self, lines: &mut Vec<String>) -> io::Result<()> {
        let mut file = match File::open(&self.path) {
            Ok(f) => f,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(e),
        };
        file.seek(SeekFrom::Start(self.offset))?;
        let read = file.read_to_end(&mut self.partial)?;
        self.offset += read as u64;

        while let Some(pos) = self.partial.iter().position(|&b| b == b'\n') {
            let line: Vec<u8> = self.partial.drain(..=pos).collect();
            lines.push(String::from_utf8_lossy(&line).trim_end().to_string());
        }
        Ok(())
    }
}

/// Child process whose stdout/stderr are redirected to files.
pub struct Subprocess {
    child: Child,
    stdout: OutputTail,
    stderr: OutputTail,
}

impl RunningProcess for Subprocess {
    fn poll(&mut self) -> io::Result<ProcessStatus> {
        Ok(match self.child.try_wait()? {
            Some(status) => ProcessStatus::Exited(status.code()),
            None => ProcessStatus::Running,
        })
    }

    fn drain_output(&mut self) -> io::Result<Vec<String>> {
        let mut lines = Vec::new();
        self.stdout.read_lines(&mut lines)?;
        self.stderr.read_lines(&mut lines)?;
        Ok(lines)
    }

    fn terminate(&mut self) -> io::Result<()> {
        if self.child.try_wait()?.is_some() {
            debug!(pid = self.child.id(), "Process already exited");
            return Ok(());
        }
        warn!(pid = self.child.id(), "Terminating load generator");
        self.child.kill()?;
        self.child.wait()?;
        Ok(())
    }
}

/// Launches the generator with `std::process::Command`.
#[derive(Debug, Default, Clone)]
pub struct SubprocessLauncher;

impl ProcessLauncher for SubprocessLauncher {
    fn launch(&self, spec: &LaunchSpec) -> io::Result<Box<dyn RunningProcess>> {
        let stdout = File::create(&spec.stdout)?;
        let stderr = File::create(&spec.stderr)?;

        let child = Command::new(&spec.binary)
            .args(&spec.args)
            .envs(spec.effective_env())
            .current_dir(&spec.working_dir)
            .stdin(Stdio::null())
            .stdout(stdout)
            .stderr(stderr)
            .spawn()?;

        info!(
            pid = child.id(),
            binary = %spec.binary.display(),
            args = ?spec.args,
            "Started load generator"
        );

        Ok(Box::new(Subprocess {
            child,
            stdout: OutputTail::new(spec.stdout.clone()),
            stderr: OutputTail::new(spec.stderr.clone()),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_resolve_missing_tool() {
        let err = resolve_tool(Path::new("/notexistent")).unwrap_err();
        assert!(matches!(err, PbenchError::MissingTool { .. }));
        assert!(err.to_string().contains("please install it manually"));
    }

    #[test]
    fn test_resolve_existing_path() {
        let dir = tempfile::tempdir().unwrap();
        let tool = dir.path().join("phantom");
        File::create(&tool).unwrap();
        assert_eq!(resolve_tool(&tool).unwrap(), tool);
    }

    #[test]
    fn test_output_tail_returns_whole_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.log");
        let mut file = File::create(&path).unwrap();
        let mut tail = OutputTail::new(path.clone());

        let mut lines = Vec::new();
        tail.read_lines(&mut lines).unwrap();
        assert!(lines.is_empty());

        write!(file, "first\nsecond part").unwrap();
        file.flush().unwrap();
        tail.read_lines(&mut lines).unwrap();
        assert_eq!(lines, vec!["first"]);

        writeln!(file, " done").unwrap();
        file.flush().unwrap();
        lines.clear();
        tail.read_lines(&mut lines).unwrap();
        assert_eq!(lines, vec!["second part done"]);
    }

    #[test]
    fn test_output_tail_keeps_split_characters() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.log");
        let mut file = File::create(&path).unwrap();
        let mut tail = OutputTail::new(path.clone());
        let text = "latency µs\n".as_bytes();
        let split = text.iter().position(|&b| b >= 0x80).unwrap() + 1;

        let mut lines = Vec::new();
        file.write_all(&text[..split]).unwrap();
        file.flush().unwrap();
        tail.read_lines(&mut lines).unwrap();
        assert!(lines.is_empty());

        file.write_all(&text[split..]).unwrap();
        file.flush().unwrap();
        tail.read_lines(&mut lines).unwrap();
        assert_eq!(lines, vec!["latency µs"]);
    }

    #[test]
    fn test_missing_output_file_is_empty() {
        let mut tail = OutputTail::new(PathBuf::from("/nonexistent/out.log"));
        let mut lines = Vec::new();
        tail.read_lines(&mut lines).unwrap();
        assert!(lines.is_empty());
    }

    #[test]
    fn test_modules_path_exported() {
        let spec = LaunchSpec {
            binary: PathBuf::from("phantom"),
            modules_path: Some(PathBuf::from("/opt/phantom/lib")),
            args: vec![],
            env: vec![("A".to_string(), "1".to_string())],
            working_dir: PathBuf::from("."),
            stdout: PathBuf::from("out"),
            stderr: PathBuf::from("err"),
            schedule_file: PathBuf::from("pbench.sched"),
            duration: None,
            concurrency: 1,
        };
        let env = spec.effective_env();
        assert_eq!(env[0], ("A".to_string(), "1".to_string()));
        assert_eq!(env[1].0, "LD_LIBRARY_PATH");
        assert!(env[1].1.starts_with("/opt/phantom/lib"));
    }
}
