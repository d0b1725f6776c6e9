// conductor-sandbox/src/test_detect.rs
// ============================================================================
// Module: Test Command Auto-Detection
// Description: Picks a default `run_tests` command for a worktree when the
//              run did not configure one explicitly (§4.7 "Auto-detection
//              of test command").
// Purpose: Let a run start testing immediately against common project
//          layouts without per-project configuration.
// Dependencies: none (std only)
// ============================================================================

use std::path::Path;

/// Detects a test command for `worktree_root` by checking, in priority
/// order, for the marker file of each supported ecosystem: `package.json`,
/// `Makefile`, a pytest config, `Cargo.toml`, then `go.mod`. Returns `None`
/// if none match, in which case the run must configure `run_tests`
/// explicitly or block.
#[must_use]
pub fn detect_test_command(worktree_root: &Path) -> Option<Vec<String>> {
    if worktree_root.join("package.json").is_file() {
        return Some(vec!["npm".to_string(), "test".to_string()]);
    }
    if worktree_root.join("Makefile").is_file() {
        return Some(vec!["make".to_string(), "test".to_string()]);
    }
    if has_pytest_config(worktree_root) {
        return Some(vec!["pytest".to_string()]);
    }
    if worktree_root.join("Cargo.toml").is_file() {
        return Some(vec!["cargo".to_string(), "test".to_string()]);
    }
    if worktree_root.join("go.mod").is_file() {
        return Some(vec!["go".to_string(), "test".to_string(), "./...".to_string()]);
    }
    None
}

fn has_pytest_config(worktree_root: &Path) -> bool {
    ["pytest.ini", "pyproject.toml", "setup.cfg"].iter().any(|name| worktree_root.join(name).is_file())
}

#[cfg(test)]
mod tests {
    use super::detect_test_command;
    use std::fs;

    #[test]
    fn detects_npm_before_anything_else() {
        let dir = tempfile::tempdir().expect("tempdir");
        fs::write(dir.path().join("package.json"), "{}").expect("write");
        fs::write(dir.path().join("Cargo.toml"), "[package]\nname=\"x\"").expect("write");
        assert_eq!(detect_test_command(dir.path()), Some(vec!["npm".to_string(), "test".to_string()]));
    }

    #[test]
    fn detects_cargo_when_only_cargo_toml_present() {
        let dir = tempfile::tempdir().expect("tempdir");
        fs::write(dir.path().join("Cargo.toml"), "[package]\nname=\"x\"").expect("write");
        assert_eq!(detect_test_command(dir.path()), Some(vec!["cargo".to_string(), "test".to_string()]));
    }

    #[test]
    fn detects_pytest_config_before_go_mod() {
        let dir = tempfile::tempdir().expect("tempdir");
        fs::write(dir.path().join("pyproject.toml"), "[tool.pytest]").expect("write");
        fs::write(dir.path().join("go.mod"), "module x").expect("write");
        assert_eq!(detect_test_command(dir.path()), Some(vec!["pytest".to_string()]));
    }

    #[test]
    fn returns_none_for_unrecognized_layout() {
        let dir = tempfile::tempdir().expect("tempdir");
        assert_eq!(detect_test_command(dir.path()), None);
    }
}
