//! Filesystem helpers for tests that need a working directory or a
//! stand-in for the load generator binary.

use std::fs;
use std::path::{Path, PathBuf};

/// Creates a temporary directory for test output.
///
/// The directory is automatically cleaned up when the returned `TempDir` is dropped.
pub fn temp_test_dir() -> tempfile::TempDir {
    tempfile::tempdir().expect("Failed to create temporary test directory")
}

/// Creates an empty file named `phantom` in `dir` so tool lookup succeeds.
///
/// The file is never executed; tests pair it with a fake launcher.
pub fn fake_tool(dir: &Path) -> PathBuf {
    let path = dir.join("phantom");
    fs::write(&path, b"").expect("Failed to create fake tool");
    path
}

/// Writes `content` to `dir/name` and returns the path.
pub fn write_file(dir: &Path, name: &str, content: impl AsRef<[u8]>) -> PathBuf {
    let path = dir.join(name);
    fs::write(&path, content).expect("Failed to write test file");
    path
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_write_file() {
        let dir = temp_test_dir();
        let path = write_file(dir.path(), "script.src", "4 x\nabcd\n");
        assert_eq!(fs::read_to_string(path).unwrap(), "4 x\nabcd\n");
    }

    #[test]
    fn test_fake_tool_is_a_file() {
        let dir = temp_test_dir();
        let tool = fake_tool(dir.path());
        assert!(tool.is_file());
        assert_eq!(tool.file_name().unwrap(), "phantom");
    }
}
