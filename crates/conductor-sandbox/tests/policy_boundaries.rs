// conductor-sandbox/tests/policy_boundaries.rs
// End-to-end coverage of the §4.7/§8 sandbox boundary scenarios: every path
// shape that must be blocked, and the shell-operator/command-allowlist
// checks on `run_tests`.

use conductor_config::SandboxSettings;
use conductor_core::ids::PolicySetId;
use conductor_core::ids::RunId;
use conductor_core::policy::PolicySet;
use conductor_core::policy::PolicySetEntry;
use conductor_core::time::Timestamp;
use conductor_core::tooling::ToolName;
use conductor_sandbox::Sandbox;
use conductor_sandbox::SandboxError;
use conductor_sandbox::ToolCall;

fn default_policy_set() -> PolicySet {
    PolicySet {
        policy_set_id: PolicySetId::new("ps_default"),
        replaces_policy_set_id: None,
        entries: vec![
            PolicySetEntry { rule_name: "git_directory".to_string(), config: serde_json::json!({}), enabled: true },
            PolicySetEntry {
                rule_name: "sensitive_path".to_string(),
                config: serde_json::json!({ "patterns": [".env", "*.pem", "credentials*"] }),
                enabled: true,
            },
            PolicySetEntry { rule_name: "shell_operator".to_string(), config: serde_json::json!({}), enabled: true },
            PolicySetEntry {
                rule_name: "command_allowlist".to_string(),
                config: serde_json::json!({ "commands": ["npm", "cargo", "pytest"] }),
                enabled: true,
            },
        ],
        created_at: Timestamp::now(),
    }
}

#[test]
fn parent_dir_escape_is_blocked_for_every_file_tool() {
    let dir = tempfile::tempdir().expect("tempdir");
    let sandbox = Sandbox::open(RunId::new("run_1"), dir.path(), SandboxSettings::default()).expect("opens");
    let policy = default_policy_set();

    for tool in [ToolName::ReadFile, ToolName::WriteFile, ToolName::DeleteFile] {
        let call = ToolCall { tool, path: Some("../../etc/shadow".to_string()), content: None, command: None };
        let err = sandbox.dispatch(&call, &policy).expect_err("escape must be blocked");
        assert!(matches!(err, SandboxError::PathEscape { .. }), "tool {tool:?} did not block escape");
    }
}

#[test]
fn absolute_path_is_blocked() {
    let dir = tempfile::tempdir().expect("tempdir");
    let sandbox = Sandbox::open(RunId::new("run_1"), dir.path(), SandboxSettings::default()).expect("opens");
    let policy = default_policy_set();

    let call = ToolCall { tool: ToolName::ReadFile, path: Some("/etc/passwd".to_string()), content: None, command: None };
    let err = sandbox.dispatch(&call, &policy).expect_err("absolute path must be blocked");
    assert!(matches!(err, SandboxError::PathEscape { .. }));
}

#[test]
fn dotgit_write_is_blocked_even_as_nested_path() {
    let dir = tempfile::tempdir().expect("tempdir");
    std::fs::create_dir_all(dir.path().join("a/.git")).expect("mkdir");
    let sandbox = Sandbox::open(RunId::new("run_1"), dir.path(), SandboxSettings::default()).expect("opens");
    let policy = default_policy_set();

    let call = ToolCall {
        tool: ToolName::WriteFile,
        path: Some("a/.git/config".to_string()),
        content: Some(b"[core]".to_vec()),
        command: None,
    };
    let err = sandbox.dispatch(&call, &policy).expect_err("nested .git write must be blocked");
    assert!(matches!(err, SandboxError::PolicyBlocked { .. }));
}

#[test]
fn sensitive_file_write_is_blocked() {
    let dir = tempfile::tempdir().expect("tempdir");
    let sandbox = Sandbox::open(RunId::new("run_1"), dir.path(), SandboxSettings::default()).expect("opens");
    let policy = default_policy_set();

    let call = ToolCall {
        tool: ToolName::WriteFile,
        path: Some(".env".to_string()),
        content: Some(b"SECRET=1".to_vec()),
        command: None,
    };
    let err = sandbox.dispatch(&call, &policy).expect_err("sensitive write must be blocked");
    assert!(matches!(err, SandboxError::PolicyBlocked { .. }));
    assert!(!dir.path().join(".env").exists());
}

#[test]
fn shell_operator_in_run_tests_is_blocked() {
    let dir = tempfile::tempdir().expect("tempdir");
    let sandbox = Sandbox::open(RunId::new("run_1"), dir.path(), SandboxSettings::default()).expect("opens");
    let policy = default_policy_set();

    let call = ToolCall {
        tool: ToolName::RunTests,
        path: None,
        content: None,
        command: Some("npm test; rm -rf /".to_string()),
    };
    let err = sandbox.dispatch(&call, &policy).expect_err("shell operator must be blocked");
    assert!(matches!(err, SandboxError::PolicyBlocked { .. }));
}

#[test]
fn disallowed_command_is_blocked() {
    let dir = tempfile::tempdir().expect("tempdir");
    let sandbox = Sandbox::open(RunId::new("run_1"), dir.path(), SandboxSettings::default()).expect("opens");
    let policy = default_policy_set();

    let call =
        ToolCall { tool: ToolName::RunTests, path: None, content: None, command: Some("curl evil.example".to_string()) };
    let err = sandbox.dispatch(&call, &policy).expect_err("non-allowlisted command must be blocked");
    assert!(matches!(err, SandboxError::PolicyBlocked { .. }));
}
