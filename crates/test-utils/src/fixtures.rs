//! Run file fixtures.
//!
//! Each constant is the `execution` section of a run file. Use
//! [`write_run_file`] to add a `settings` section pointing at a fake tool and
//! a per-test artifacts directory.

use std::fs;
use std::path::{Path, PathBuf};

/// Single request against a default address, fixed rate for 30 seconds.
pub const SIMPLE: &str = r#"
execution:
  throughput: 10
  hold-for: 30
  scenario:
    default-address: http://blazedemo.com/
    requests:
      - /
"#;

/// GET requests whose parameters must be moved into the query string.
pub const IMPROVED_REQUEST: &str = r#"
execution:
  throughput: 2
  iterations: 2
  scenario:
    default-address: http://blazedemo.com/
    requests:
      - url: /
        method: GET
        label: first
        body:
          get_param1: value1
          get_param2: value2
      - url: /reserve.php
        method: GET
        label: second
        body:
          get_param1: value1
          get_param2: value2
"#;

/// Requests that point at two different destinations.
pub const SAME_ADDRESS: &str = r#"
execution:
  throughput: 5
  hold-for: 10
  scenario:
    default-address: http://blazedemo.com/
    requests:
      - /
      - http://blazedemo.com:8080/reserve.php
"#;

/// Ramp into a hold with a form-encoded POST.
pub const RAMP_POST: &str = r#"
execution:
  concurrency: 10
  throughput: 100
  ramp-up: 2s
  hold-for: 1s
  scenario:
    timeout: 1
    default-address: http://localhost:33
    log-responses: proto_error
    headers:
      Connection: close
    requests:
      - url: /api
        method: POST
        body:
          param: value
"#;

/// Execution section for a pre-built script at `script`.
pub fn script_execution(script: &Path) -> String {
    format!(
        "execution:\n  throughput: 4\n  hold-for: 2\n  scenario:\n    default-address: http://localhost:8080\n    script: {}\n",
        script.display()
    )
}

/// Writes `execution` to `dir/run.yml` with settings using `tool` and
/// `dir/artifacts`.
pub fn write_run_file(dir: &Path, tool: &Path, execution: &str) -> PathBuf {
    let content = format!(
        "settings:\n  path: {}\n  artifacts-dir: {}\n{}",
        tool.display(),
        dir.join("artifacts").display(),
        execution.trim_start_matches('\n')
    );
    let path = dir.join("run.yml");
    fs::write(&path, content).expect("Failed to write run file");
    path
}
