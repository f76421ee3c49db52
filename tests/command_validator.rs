use svcmgr::command::{CommandError, CommandValidator};

/// Test that chained shell operators are rejected.
#[test]
fn test_rejects_chained_rm() {
    let validator = CommandValidator::new();
    let result = validator.validate(&["ls", "-la", "&&", "rm", "-rf", "/"]);
    assert_eq!(
        result,
        Err(CommandError::DeniedPattern {
            index: 2,
            pattern: "&&".to_string()
        })
    );
}

/// Test that privileged executables are rejected.
#[test]
fn test_rejects_sudo() {
    let validator = CommandValidator::new();
    assert_eq!(
        validator.validate(&["sudo", "rm", "-rf", "/"]),
        Err(CommandError::DeniedCommand("sudo".to_string()))
    );
}

/// Test that ordinary inspection commands pass.
#[test]
fn test_accepts_inspection_commands() {
    let validator = CommandValidator::new();
    assert!(validator.validate(&["ls", "-la"]).is_ok());
    assert!(validator.validate(&["ps", "aux"]).is_ok());
}

/// Test that substitution, redirection and traversal are rejected.
#[test]
fn test_rejects_shell_metacharacters() {
    let validator = CommandValidator::new();
    for arg in ["$(id)", "${HOME}", "`id`", "out>file", "../../etc/passwd", "~root", "*.log", "a;b", "a|b"] {
        assert!(
            matches!(validator.validate(&["cat", arg]), Err(CommandError::DeniedPattern { .. })),
            "expected '{}' to be rejected",
            arg
        );
    }
}

/// Test that tabs and carriage returns are rejected.
#[test]
fn test_rejects_whitespace_controls() {
    let validator = CommandValidator::new();
    assert!(validator.validate(&["echo", "a\tb"]).is_err());
    assert!(validator.validate(&["echo", "a\rb"]).is_err());
}

/// Test runtime tuning of both lists.
#[test]
fn test_runtime_tuning() {
    let validator = CommandValidator::new();

    assert!(validator.deny_command("Top"));
    assert!(!validator.deny_command("top"));
    assert!(validator.validate(&["top"]).is_err());
    assert!(validator.allow_command("top"));
    assert!(validator.validate(&["top"]).is_ok());

    assert!(validator.deny_pattern("--privileged"));
    assert!(validator.validate(&["env", "--privileged"]).is_err());
    assert!(validator.allow_pattern("--privileged"));
    assert!(validator.validate(&["env", "--privileged"]).is_ok());
    assert!(!validator.allow_pattern("--privileged"));

    assert!(validator.denied_commands().contains(&"rm".to_string()));
    assert!(validator.denied_patterns().contains(&"&&".to_string()));
}
