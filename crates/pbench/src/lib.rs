//! Load schedule generation and run control for the PBench load generator.
//!
//! This crate provides tools to:
//! - Compile scenario requests into the generator's native request payloads
//! - Turn a load profile into a rate-accurate, time-ordered firing schedule
//! - Drive a run through prepare, startup, checks, shutdown and post-processing
//!   with guaranteed cleanup around the external generator process

pub mod compiler;
pub mod config;
pub mod error;
pub mod executor;
pub mod launcher;
pub mod lifecycle;
pub mod profile;
pub mod report;
pub mod schedule;
pub mod testcase;

pub use compiler::{compile, CompiledRequest, CompiledScenario, Target};
pub use config::{RunConfig, ScenarioConfig};
pub use error::{PbenchError, Result};
pub use executor::{resource_files, PBenchExecutor, Progress, ResultSink};
pub use launcher::{LaunchSpec, ProcessLauncher, ProcessStatus, RunningProcess};
pub use lifecycle::{RunController, RunFailure, RunModule, RunState, Stage, StopSignal};
pub use profile::LoadProfile;
pub use report::{RunReport, RunSummary};
pub use schedule::{generate, Schedule, ScheduleItem};
pub use testcase::{read_test_cases, TestCase};
