//! Run lifecycle control.
//!
//! A run goes through `prepare → startup → check* → shutdown → post_process`.
//! Stages are skipped after a failure, but cleanup is not: `shutdown` follows
//! every attempted `startup` and `post_process` follows every attempted
//! `prepare`, exactly once. The first failure is the one reported.

use std::fmt;
use std::sync::{Arc, Condvar, Mutex};
use std::time::Duration;

use serde::Serialize;
use thiserror::Error;
use tracing::{debug, error, info, instrument, warn};

use crate::error::{PbenchError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RunState {
    New,
    Prepared,
    Started,
    Failed,
    Stopped,
    Done,
}

impl RunState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done | Self::Failed)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Stage {
    Prepare,
    Startup,
    Check,
    Shutdown,
    PostProcess,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Prepare => "prepare",
            Self::Startup => "startup",
            Self::Check => "check",
            Self::Shutdown => "shutdown",
            Self::PostProcess => "post-process",
        })
    }
}

/// A stage error together with the stage that raised it.
///
/// Cheap to clone so the controller can keep it after handing it out.
#[derive(Debug, Clone, Error)]
#[error("{stage} failed: {source}")]
pub struct RunFailure {
    pub stage: Stage,
    #[source]
    pub source: Arc<PbenchError>,
}

/// Something a [`RunController`] can drive.
pub trait RunModule {
    fn prepare(&mut self) -> Result<()>;

    fn startup(&mut self) -> Result<()>;

    /// Non-blocking poll; `Ok(true)` once the run has finished.
    fn check(&mut self) -> Result<bool>;

    fn shutdown(&mut self) -> Result<()>;

    fn post_process(&mut self) -> Result<()>;
}

/// Out-of-band request to stop a run early. Clones share the same flag.
#[derive(Debug, Clone, Default)]
pub struct StopSignal {
    inner: Arc<(Mutex<bool>, Condvar)>,
}

impl StopSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn raise(&self) {
        let (flag, cvar) = &*self.inner;
        let mut raised = flag.lock().unwrap_or_else(|e| e.into_inner());
        *raised = true;
        cvar.notify_all();
    }

    pub fn is_raised(&self) -> bool {
        let (flag, _) = &*self.inner;
        *flag.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Sleep for `timeout` or until raised. Returns whether it was raised.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let (flag, cvar) = &*self.inner;
        let guard = flag.lock().unwrap_or_else(|e| e.into_inner());
        let (raised, _) = cvar
            .wait_timeout_while(guard, timeout, |raised| !*raised)
            .unwrap_or_else(|e| e.into_inner());
        *raised
    }
}

/// Drives one [`RunModule`] through its stages.
pub struct RunController<M> {
    module: M,
    state: RunState,
    failure: Option<RunFailure>,
    prepare_attempted: bool,
    startup_attempted: bool,
    shutdown_attempted: bool,
    post_processed: bool,
}

impl<M: RunModule> RunController<M> {
    pub fn new(module: M) -> Self {
        Self {
            module,
            state: RunState::New,
            failure: None,
            prepare_attempted: false,
            startup_attempted: false,
            shutdown_attempted: false,
            post_processed: false,
        }
    }

    pub fn state(&self) -> RunState {
        self.state
    }

    pub fn module(&self) -> &M {
        &self.module
    }

    pub fn module_mut(&mut self) -> &mut M {
        &mut self.module
    }

    pub fn into_module(self) -> M {
        self.module
    }

    /// First recorded failure, if any.
    pub fn failure(&self) -> Option<&RunFailure> {
        self.failure.as_ref()
    }

    fn fail(&mut self, stage: Stage, source: PbenchError) {
        self.state = RunState::Failed;
        if self.failure.is_none() {
            error!(%stage, error = %source, "Stage failed");
            self.failure = Some(RunFailure {
                stage,
                source: Arc::new(source),
            });
        } else {
            warn!(%stage, error = %source, "Stage failed after an earlier failure");
        }
    }

    /// `New → Prepared`. Returns whether it succeeded.
    pub fn prepare(&mut self) -> bool {
        if self.state != RunState::New {
            warn!(state = ?self.state, "prepare called out of order, ignoring");
            return false;
        }
        self.prepare_attempted = true;
        info!("Preparing run");
        match self.module.prepare() {
            Ok(()) => {
                self.state = RunState::Prepared;
                true
            }
            Err(e) => {
                self.fail(Stage::Prepare, e);
                false
            }
        }
    }

    /// `Prepared → Started`. Returns whether it succeeded.
    pub fn startup(&mut self) -> bool {
        if self.state != RunState::Prepared {
            warn!(state = ?self.state, "startup called out of order, ignoring");
            return false;
        }
        self.startup_attempted = true;
        info!("Starting run");
        match self.module.startup() {
            Ok(()) => {
                self.state = RunState::Started;
                true
            }
            Err(e) => {
                self.fail(Stage::Startup, e);
                false
            }
        }
    }

    /// Poll the run once. Returns `true` when polling should stop, either
    /// because the run completed or because the check failed.
    pub fn check(&mut self) -> bool {
        if self.state != RunState::Started {
            warn!(state = ?self.state, "check called out of order, ignoring");
            return true;
        }
        match self.module.check() {
            Ok(finished) => finished,
            Err(e) => {
                self.fail(Stage::Check, e);
                true
            }
        }
    }

    /// Stop the run. Only acts once, and only after `startup` was attempted.
    pub fn shutdown(&mut self) {
        if !self.startup_attempted || self.shutdown_attempted {
            debug!("shutdown not applicable, skipping");
            return;
        }
        self.shutdown_attempted = true;
        info!("Shutting down run");
        match self.module.shutdown() {
            Ok(()) => {
                if self.state == RunState::Started {
                    self.state = RunState::Stopped;
                }
            }
            Err(e) => self.fail(Stage::Shutdown, e),
        }
    }

    /// Final stage. Only acts once, and only after `prepare` was attempted.
    pub fn post_process(&mut self) {
        if !self.prepare_attempted || self.post_processed {
            debug!("post-process not applicable, skipping");
            return;
        }
        self.post_processed = true;
        info!("Post-processing run");
        match self.module.post_process() {
            Ok(()) if self.failure.is_none() => self.state = RunState::Done,
            Ok(()) => self.state = RunState::Failed,
            Err(e) => self.fail(Stage::PostProcess, e),
        }
    }

    /// Run every stage, polling `check` every `cadence` until the run
    /// finishes or `stop` is raised.
    pub fn run(&mut self, stop: &StopSignal, cadence: Duration) -> std::result::Result<(), RunFailure> {
        self.run_with(stop, cadence, |_| {})
    }

    /// Like [`run`](Self::run), calling `on_check` with the module after
    /// every check that leaves the run going.
    #[instrument(skip_all)]
    pub fn run_with<F>(
        &mut self,
        stop: &StopSignal,
        cadence: Duration,
        mut on_check: F,
    ) -> std::result::Result<(), RunFailure>
    where
        F: FnMut(&M),
    {
        if self.prepare() && !stop.is_raised() && self.startup() {
            loop {
                if stop.is_raised() {
                    info!("Stop requested, skipping remaining checks");
                    break;
                }
                if self.check() {
                    break;
                }
                on_check(&self.module);
                stop.wait_timeout(cadence);
            }
        }

        self.shutdown();
        self.post_process();

        match &self.failure {
            Some(failure) => Err(failure.clone()),
            None => {
                info!(state = ?self.state, "Run finished");
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct Recorder {
        fail_at: Option<Stage>,
        prepares: u32,
        startups: u32,
        checks: u32,
        shutdowns: u32,
        post_processes: u32,
        checks_until_done: u32,
        stop_on_check: Option<StopSignal>,
    }

    impl Recorder {
        fn failing(stage: Stage) -> Self {
            Self {
                fail_at: Some(stage),
                checks_until_done: 2,
                ..Self::default()
            }
        }

        fn outcome(&self, stage: Stage) -> Result<()> {
            if self.fail_at == Some(stage) {
                Err(PbenchError::Process(format!("{} exploded", stage)))
            } else {
                Ok(())
            }
        }
    }

    impl RunModule for Recorder {
        fn prepare(&mut self) -> Result<()> {
            self.prepares += 1;
            self.outcome(Stage::Prepare)
        }

        fn startup(&mut self) -> Result<()> {
            self.startups += 1;
            self.outcome(Stage::Startup)
        }

        fn check(&mut self) -> Result<bool> {
            self.checks += 1;
            if let Some(stop) = &self.stop_on_check {
                if self.checks == 3 {
                    stop.raise();
                }
            }
            self.outcome(Stage::Check)?;
            Ok(self.checks >= self.checks_until_done)
        }

        fn shutdown(&mut self) -> Result<()> {
            self.shutdowns += 1;
            self.outcome(Stage::Shutdown)
        }

        fn post_process(&mut self) -> Result<()> {
            self.post_processes += 1;
            self.outcome(Stage::PostProcess)
        }
    }

    fn run(module: Recorder) -> (RunController<Recorder>, std::result::Result<(), RunFailure>) {
        let mut controller = RunController::new(module);
        let result = controller.run(&StopSignal::new(), Duration::from_millis(1));
        (controller, result)
    }

    #[test]
    fn test_normal_run() {
        let (controller, result) = run(Recorder {
            checks_until_done: 3,
            ..Recorder::default()
        });
        assert!(result.is_ok());
        assert_eq!(controller.state(), RunState::Done);
        let m = controller.module();
        assert_eq!((m.prepares, m.startups, m.checks, m.shutdowns, m.post_processes), (1, 1, 3, 1, 1));
    }

    #[test]
    fn test_prepare_error() {
        let (controller, result) = run(Recorder::failing(Stage::Prepare));
        let failure = result.unwrap_err();
        assert_eq!(failure.stage, Stage::Prepare);
        assert_eq!(controller.state(), RunState::Failed);
        let m = controller.module();
        assert_eq!((m.prepares, m.startups, m.checks, m.shutdowns, m.post_processes), (1, 0, 0, 0, 1));
    }

    #[test]
    fn test_failure_kept_after_run() {
        let (controller, result) = run(Recorder::failing(Stage::Startup));
        let returned = result.unwrap_err();
        let kept = controller.failure().unwrap();
        assert_eq!(kept.stage, Stage::Startup);
        assert_eq!(kept.to_string(), returned.to_string());
    }

    #[test]
    fn test_startup_error() {
        let (controller, result) = run(Recorder::failing(Stage::Startup));
        assert_eq!(result.unwrap_err().stage, Stage::Startup);
        assert_eq!(controller.state(), RunState::Failed);
        let m = controller.module();
        assert_eq!((m.prepares, m.startups, m.checks, m.shutdowns, m.post_processes), (1, 1, 0, 1, 1));
    }

    #[test]
    fn test_check_error() {
        let (controller, result) = run(Recorder::failing(Stage::Check));
        assert_eq!(result.unwrap_err().stage, Stage::Check);
        let m = controller.module();
        assert_eq!((m.prepares, m.startups, m.checks, m.shutdowns, m.post_processes), (1, 1, 1, 1, 1));
    }

    #[test]
    fn test_shutdown_error() {
        let (controller, result) = run(Recorder::failing(Stage::Shutdown));
        let failure = result.unwrap_err();
        assert_eq!(failure.stage, Stage::Shutdown);
        assert!(failure.to_string().contains("shutdown exploded"));
        assert_eq!(controller.state(), RunState::Failed);
        let m = controller.module();
        assert_eq!((m.prepares, m.startups, m.checks, m.shutdowns, m.post_processes), (1, 1, 2, 1, 1));
    }

    #[test]
    fn test_post_process_error() {
        let (controller, result) = run(Recorder::failing(Stage::PostProcess));
        assert_eq!(result.unwrap_err().stage, Stage::PostProcess);
        assert_eq!(controller.state(), RunState::Failed);
        assert_eq!(controller.module().post_processes, 1);
    }

    #[test]
    fn test_stop_signal_short_circuits_checks() {
        let stop = StopSignal::new();
        let module = Recorder {
            checks_until_done: u32::MAX,
            stop_on_check: Some(stop.clone()),
            ..Recorder::default()
        };
        let mut controller = RunController::new(module);
        let result = controller.run(&stop, Duration::from_secs(60));
        assert!(result.is_ok());
        let m = controller.module();
        assert_eq!(m.checks, 3);
        assert_eq!((m.shutdowns, m.post_processes), (1, 1));
        assert_eq!(controller.state(), RunState::Done);
    }

    #[test]
    fn test_run_with_reports_pending_checks() {
        let mut controller = RunController::new(Recorder {
            checks_until_done: 4,
            ..Recorder::default()
        });
        let mut seen = Vec::new();
        let result = controller.run_with(&StopSignal::new(), Duration::from_millis(1), |m| {
            seen.push(m.checks)
        });
        assert!(result.is_ok());
        assert_eq!(seen, vec![1, 2, 3]);
    }

    #[test]
    fn test_stop_before_startup_skips_shutdown() {
        let stop = StopSignal::new();
        stop.raise();
        let mut controller = RunController::new(Recorder::default());
        assert!(controller.run(&stop, Duration::from_millis(1)).is_ok());
        let m = controller.module();
        assert_eq!((m.prepares, m.startups, m.shutdowns, m.post_processes), (1, 0, 0, 1));
    }

    #[test]
    fn test_stages_out_of_order_are_ignored() {
        let mut controller = RunController::new(Recorder::default());
        assert!(!controller.startup());
        controller.shutdown();
        controller.post_process();
        let m = controller.module();
        assert_eq!((m.startups, m.shutdowns, m.post_processes), (0, 0, 0));
        assert_eq!(controller.state(), RunState::New);
    }

    #[test]
    fn test_wait_timeout_wakes_on_raise() {
        let stop = StopSignal::new();
        let remote = stop.clone();
        let handle = std::thread::spawn(move || remote.raise());
        assert!(stop.wait_timeout(Duration::from_secs(30)));
        handle.join().unwrap();
        assert!(stop.is_raised());
    }
}
