//! PBench executor: the [`RunModule`] that prepares, launches and supervises
//! the external load generator.

use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use serde::Serialize;
use tracing::{debug, info, instrument, warn};

use crate::compiler::{self, Target};
use crate::config::{RunConfig, ScenarioConfig};
use crate::error::{PbenchError, Result};
use crate::launcher::{
    resolve_tool, LaunchSpec, ProcessLauncher, ProcessStatus, RunningProcess, SubprocessLauncher,
};
use crate::lifecycle::RunModule;
use crate::profile::LoadProfile;
use crate::schedule;
use crate::testcase::{read_test_cases, TestCase};

/// Files a run writes into its artifacts directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ArtifactPaths {
    pub dir: PathBuf,
    pub schedule: PathBuf,
    pub config: PathBuf,
    pub results: PathBuf,
    pub stdout: PathBuf,
    pub stderr: PathBuf,
}

impl ArtifactPaths {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        let dir = dir.into();
        Self {
            schedule: dir.join("pbench.sched"),
            config: dir.join("pbench.conf"),
            results: dir.join("pbench-kpi.txt"),
            stdout: dir.join("pbench.out"),
            stderr: dir.join("pbench.err"),
            dir,
        }
    }
}

/// Snapshot for progress displays.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Progress {
    pub elapsed: Duration,
    /// `None` for unbounded runs.
    pub duration: Option<Duration>,
    pub target: String,
}

impl Progress {
    /// Completed fraction in `[0, 1]`, `None` when the duration is unknown.
    pub fn fraction(&self) -> Option<f64> {
        let total = self.duration?.as_secs_f64();
        if total <= 0.0 {
            return Some(1.0);
        }
        Some((self.elapsed.as_secs_f64() / total).min(1.0))
    }
}

/// Receives the raw result file once the run has been post-processed.
pub trait ResultSink: Send {
    fn results_ready(&mut self, path: &Path) -> Result<()>;
}

/// Sink that only records where the results landed.
#[derive(Debug, Default)]
pub struct LogResultSink {
    pub delivered: Option<PathBuf>,
}

impl ResultSink for LogResultSink {
    fn results_ready(&mut self, path: &Path) -> Result<()> {
        let size = fs::metadata(path)?.len();
        info!(path = %path.display(), bytes = size, "Raw results ready");
        self.delivered = Some(path.to_path_buf());
        Ok(())
    }
}

/// Base names of files that must ship alongside the schedule.
pub fn resource_files(scenario: &ScenarioConfig) -> Vec<String> {
    scenario
        .script
        .as_deref()
        .and_then(Path::file_name)
        .map(|name| vec![name.to_string_lossy().into_owned()])
        .unwrap_or_default()
}

pub struct PBenchExecutor {
    config: RunConfig,
    artifacts: ArtifactPaths,
    launcher: Box<dyn ProcessLauncher>,
    sink: Box<dyn ResultSink>,
    tool: Option<PathBuf>,
    target: Option<Target>,
    planned_items: Option<u64>,
    process: Option<Box<dyn RunningProcess>>,
    started_at: Option<Instant>,
}

impl PBenchExecutor {
    pub fn new(config: RunConfig) -> Self {
        let artifacts = ArtifactPaths::new(config.settings.artifacts_dir.clone());
        Self {
            config,
            artifacts,
            launcher: Box::new(SubprocessLauncher),
            sink: Box::new(LogResultSink::default()),
            tool: None,
            target: None,
            planned_items: None,
            process: None,
            started_at: None,
        }
    }

    pub fn with_launcher(mut self, launcher: impl ProcessLauncher + 'static) -> Self {
        self.launcher = Box::new(launcher);
        self
    }

    pub fn with_sink(mut self, sink: impl ResultSink + 'static) -> Self {
        self.sink = Box::new(sink);
        self
    }

    pub fn config(&self) -> &RunConfig {
        &self.config
    }

    pub fn artifacts(&self) -> &ArtifactPaths {
        &self.artifacts
    }

    pub fn load_profile(&self) -> LoadProfile {
        self.config.execution.load_profile()
    }

    /// Destination resolved during `prepare`.
    pub fn target(&self) -> Option<&Target> {
        self.target.as_ref()
    }

    /// Requests written to the schedule artifact.
    pub fn planned_items(&self) -> Option<u64> {
        self.planned_items
    }

    pub fn resource_files(&self) -> Vec<String> {
        resource_files(&self.config.execution.scenario)
    }

    pub fn progress(&self) -> Progress {
        let target = match (&self.target, &self.config.execution.scenario.default_address) {
            (Some(target), _) => target.to_string(),
            (None, Some(address)) => address.clone(),
            (None, None) => String::new(),
        };
        Progress {
            elapsed: self.started_at.map(|t| t.elapsed()).unwrap_or_default(),
            duration: self.load_profile().duration(),
            target,
        }
    }

    /// Test cases plus the destination they hit.
    fn load_test_cases(&self) -> Result<(Vec<TestCase>, Target)> {
        let scenario = &self.config.execution.scenario;
        match &scenario.script {
            Some(script) => {
                let address = scenario.default_address.as_deref().ok_or_else(|| {
                    PbenchError::InvalidConfig(
                        "a script scenario needs a default-address to target".to_string(),
                    )
                })?;
                let target = Target::from_address(address)?;
                let file = File::open(script)?;
                let cases = read_test_cases(BufReader::new(file))?;
                info!(script = %script.display(), cases = cases.len(), "Loaded test cases from script");
                Ok((cases, target))
            }
            None => {
                let compiled = compiler::compile(scenario)?;
                info!(requests = compiled.requests.len(), destination = %compiled.target, "Compiled requests");
                Ok((compiled.test_cases(), compiled.target))
            }
        }
    }

    fn write_schedule(&self, cases: &[TestCase]) -> Result<u64> {
        let profile = self.load_profile();
        let schedule = schedule::generate(&profile, cases)?;
        if !schedule.is_finite() {
            return Err(PbenchError::UnsupportedLoadProfile(
                "unbounded hold-for needs an iteration limit to build a schedule file"
                    .to_string(),
            ));
        }

        let mut out = BufWriter::new(File::create(&self.artifacts.schedule)?);
        let written = schedule.write_to(&mut out)?;
        out.flush()?;
        Ok(written)
    }

    /// Render the generator's configuration file.
    pub fn tool_config(&self, target: &Target) -> String {
        let execution = &self.config.execution;
        let scenario = &execution.scenario;
        let profile = self.load_profile();

        let modules_dir = self
            .config
            .settings
            .modules_path
            .as_ref()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| "/usr/lib/phantom".to_string());
        let transport = if target.scheme == "https" {
            "\t\tio_benchmark_method_stream_transport_ssl\n"
        } else {
            ""
        };
        let ssl_block = if target.scheme == "https" {
            "\t\ttransport_t ssl_transport = transport_ssl_t { timeout = 1s }\n\t\ttransport = ssl_transport\n"
        } else {
            ""
        };
        let duration_ms = profile
            .duration()
            .map(|d| d.as_millis().to_string())
            .unwrap_or_else(|| "0".to_string());
        let requests = self
            .planned_items
            .map(|n| n.to_string())
            .unwrap_or_else(|| "0".to_string());

        format!(
            "setup_t module_setup = setup_module_t {{\n\
             \tdir = \"{modules_dir}\"\n\
             \tlist = {{\n\
             \t\tio_benchmark\n\
             \t\tio_benchmark_method_stream\n\
             \t\tio_benchmark_method_stream_ipv4\n\
             \t\tio_benchmark_method_stream_source_log\n\
             \t\tio_benchmark_method_stream_proto_http\n\
             {transport}\
             \t}}\n\
             }}\n\
             \n\
             scheduler_t main_scheduler = scheduler_simple_t {{\n\
             \tthreads = 4\n\
             }}\n\
             \n\
             io_t benchmark_io = io_benchmark_t {{\n\
             \tmethod_t stream_method = method_stream_ipv4_t {{\n\
             \t\tsource_t source_log = source_log_t {{\n\
             \t\t\tfilename = \"{schedule}\"\n\
             \t\t}}\n\
             {ssl_block}\
             \t\tproto_t http_proto = proto_http_t {{ }}\n\
             \t\tproto = http_proto\n\
             \t\taddress = {host}\n\
             \t\tport = {port}\n\
             \t\ttimeout = {timeout}ms\n\
             \t\tlogger_t benchmark_logger = logger_default_t {{\n\
             \t\t\tfilename = \"{results}\"\n\
             \t\t\tlevel = {log_level}\n\
             \t\t\tscheduler = main_scheduler\n\
             \t\t}}\n\
             \t\tloggers = {{ benchmark_logger }}\n\
             \t}}\n\
             \tmethod = stream_method\n\
             \tinstances = {instances}\n\
             \tduration = {duration_ms}ms\n\
             \trequests = {requests}\n\
             \tscheduler = main_scheduler\n\
             }}\n",
            modules_dir = modules_dir,
            transport = transport,
            schedule = self.artifacts.schedule.display(),
            ssl_block = ssl_block,
            host = target.host,
            port = target.port,
            timeout = scenario.timeout.as_millis(),
            results = self.artifacts.results.display(),
            log_level = scenario.log_responses,
            instances = execution.concurrency,
            duration_ms = duration_ms,
            requests = requests,
        )
    }

    /// Process launch parameters; valid after `prepare`.
    pub fn launch_spec(&self) -> Result<LaunchSpec> {
        let binary = self.tool.clone().ok_or_else(|| {
            PbenchError::Process("executor was not prepared, no tool resolved".to_string())
        })?;
        let profile = self.load_profile();
        Ok(LaunchSpec {
            binary,
            modules_path: self.config.settings.modules_path.clone(),
            args: vec![
                "run".to_string(),
                self.artifacts.config.display().to_string(),
            ],
            env: Vec::new(),
            working_dir: self.artifacts.dir.clone(),
            stdout: self.artifacts.stdout.clone(),
            stderr: self.artifacts.stderr.clone(),
            schedule_file: self.artifacts.schedule.clone(),
            duration: profile.duration(),
            concurrency: profile.concurrency,
        })
    }

    fn drain_process_output(&mut self) -> Result<()> {
        if let Some(process) = self.process.as_mut() {
            for line in process.drain_output()? {
                debug!(target: "pbench::tool", "{}", line);
            }
        }
        Ok(())
    }
}

impl RunModule for PBenchExecutor {
    #[instrument(skip(self))]
    fn prepare(&mut self) -> Result<()> {
        let tool = resolve_tool(&self.config.settings.path)?;
        self.config.validate()?;

        fs::create_dir_all(&self.artifacts.dir)?;
        let (cases, target) = self.load_test_cases()?;
        let written = self.write_schedule(&cases)?;

        self.tool = Some(tool);
        self.planned_items = Some(written);
        fs::write(&self.artifacts.config, self.tool_config(&target))?;

        info!(
            destination = %target,
            requests = written,
            schedule = %self.artifacts.schedule.display(),
            "Schedule written"
        );
        self.target = Some(target);
        Ok(())
    }

    #[instrument(skip(self))]
    fn startup(&mut self) -> Result<()> {
        let spec = self.launch_spec()?;
        let process = self.launcher.launch(&spec).map_err(|e| {
            PbenchError::Process(format!("failed to launch {}: {}", spec.binary.display(), e))
        })?;
        self.process = Some(process);
        self.started_at = Some(Instant::now());
        Ok(())
    }

    fn check(&mut self) -> Result<bool> {
        self.drain_process_output()?;
        let process = self
            .process
            .as_mut()
            .ok_or_else(|| PbenchError::Process("load generator is not running".to_string()))?;

        match process.poll()? {
            ProcessStatus::Running => Ok(false),
            ProcessStatus::Exited(Some(0)) => {
                info!("Load generator finished");
                Ok(true)
            }
            ProcessStatus::Exited(code) => Err(PbenchError::Process(match code {
                Some(code) => format!("load generator exited with code {}", code),
                None => "load generator was killed by a signal".to_string(),
            })),
        }
    }

    #[instrument(skip(self))]
    fn shutdown(&mut self) -> Result<()> {
        let drained = self.drain_process_output();
        if let Some(process) = self.process.as_mut() {
            process.terminate()?;
        }
        if let Some(started) = self.started_at {
            info!(elapsed_secs = started.elapsed().as_secs_f64(), "Load generator stopped");
        }
        drained
    }

    #[instrument(skip(self))]
    fn post_process(&mut self) -> Result<()> {
        if self.started_at.is_none() {
            debug!("Run never started, no results to deliver");
            return Ok(());
        }
        if !self.artifacts.results.exists() {
            warn!(path = %self.artifacts.results.display(), "Load generator produced no results");
            return Ok(());
        }
        self.sink.results_ready(&self.artifacts.results)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resource_files_lists_script_basename() {
        let scenario = ScenarioConfig {
            script: Some(PathBuf::from("/opt/data/script.src")),
            ..ScenarioConfig::default()
        };
        assert_eq!(resource_files(&scenario), vec!["script.src".to_string()]);
        assert!(resource_files(&ScenarioConfig::default()).is_empty());
    }

    #[test]
    fn test_progress_fraction() {
        let progress = Progress {
            elapsed: Duration::from_secs(15),
            duration: Some(Duration::from_secs(30)),
            target: "http://blazedemo.com:80".to_string(),
        };
        assert_eq!(progress.fraction(), Some(0.5));

        let unbounded = Progress {
            duration: None,
            ..progress
        };
        assert_eq!(unbounded.fraction(), None);
    }

    #[test]
    fn test_artifact_paths() {
        let paths = ArtifactPaths::new("/tmp/run");
        assert_eq!(paths.schedule, PathBuf::from("/tmp/run/pbench.sched"));
        assert_eq!(paths.config, PathBuf::from("/tmp/run/pbench.conf"));
    }

    #[test]
    fn test_launch_spec_requires_prepare() {
        let config = RunConfig::from_yaml_str(
            "execution:\n  throughput: 5\n  hold-for: 10\n  scenario:\n    requests: [http://a/]\n",
        )
        .unwrap();
        let executor = PBenchExecutor::new(config);
        assert!(matches!(executor.launch_spec(), Err(PbenchError::Process(_))));
        assert_eq!(executor.progress().duration, Some(Duration::from_secs(10)));
    }
}
