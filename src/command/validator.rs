//! Allow/deny gate applied to a command vector before it reaches a
//! container shell.
//!
//! Two tiers: an exact-match denylist of high-risk executables checked
//! against the first token, and a substring denylist of shell operators
//! checked against every argument. Both lists can be tuned at runtime.
//! This narrows the attack surface; it is not a sandbox.

use std::collections::HashSet;

use parking_lot::RwLock;
use thiserror::Error;

pub const DEFAULT_MAX_ARGS: usize = 64;
pub const DEFAULT_MAX_ARG_LEN: usize = 1024;

const DEFAULT_DENIED_COMMANDS: &[&str] = &[
    "rm", "rmdir", "shred", "dd", "mkfs", "fdisk", "parted", "wipefs",
    "sudo", "su", "doas", "chroot", "nsenter",
    "shutdown", "reboot", "halt", "poweroff", "init", "systemctl",
    "kill", "killall", "pkill",
    "chmod", "chown", "chgrp", "passwd", "useradd", "userdel", "usermod",
    "mount", "umount", "iptables", "crontab",
    "nc", "ncat", "netcat", "telnet", "curl", "wget", "ssh", "scp",
    "sh", "bash", "zsh", "dash", "ksh", "csh", "eval", "exec", "xargs",
    "python", "python3", "perl", "ruby", "php", "node",
];

/// Longer operators come first so the reported pattern is the most specific.
const DEFAULT_DENIED_PATTERNS: &[&str] = &[
    "&&", "||", ";", "|", "&", ">>", ">", "<", "`", "$(", "${", "../", "~", "*", "?",
];

/// Reasons a command vector is rejected.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CommandError {
    #[error("command is empty")]
    Empty,

    #[error("too many arguments: {count} (max {max})")]
    TooManyArguments { count: usize, max: usize },

    #[error("argument {index} is {len} bytes (max {max})")]
    ArgumentTooLong { index: usize, len: usize, max: usize },

    #[error("argument {index} contains a null byte")]
    NullByte { index: usize },

    #[error("argument {index} contains a control character")]
    ControlCharacter { index: usize },

    #[error("command '{0}' is not allowed")]
    DeniedCommand(String),

    #[error("argument {index} contains forbidden sequence '{pattern}'")]
    DeniedPattern { index: usize, pattern: String },
}

struct Rules {
    denied_commands: HashSet<String>,
    denied_patterns: Vec<String>,
    max_args: usize,
    max_arg_len: usize,
}

/// Thread-safe, runtime-tunable command gate.
pub struct CommandValidator {
    rules: RwLock<Rules>,
}

impl CommandValidator {
    /// Validator with the default deny lists and limits.
    pub fn new() -> Self {
        Self {
            rules: RwLock::new(Rules {
                denied_commands: DEFAULT_DENIED_COMMANDS.iter().map(|c| c.to_string()).collect(),
                denied_patterns: DEFAULT_DENIED_PATTERNS.iter().map(|p| p.to_string()).collect(),
                max_args: DEFAULT_MAX_ARGS,
                max_arg_len: DEFAULT_MAX_ARG_LEN,
            }),
        }
    }

    /// Check `command` against every rule.
    pub fn validate<S: AsRef<str>>(&self, command: &[S]) -> Result<(), CommandError> {
        let rules = self.rules.read();

        let first = command.first().ok_or(CommandError::Empty)?.as_ref();
        if first.trim().is_empty() {
            return Err(CommandError::Empty);
        }
        if command.len() > rules.max_args {
            return Err(CommandError::TooManyArguments {
                count: command.len(),
                max: rules.max_args,
            });
        }

        let lowered = first.trim().to_lowercase();
        let basename = lowered.rsplit('/').next().unwrap_or(&lowered);
        if rules.denied_commands.contains(&lowered) || rules.denied_commands.contains(basename) {
            tracing::warn!(command = %first, "Rejected denied command");
            return Err(CommandError::DeniedCommand(first.to_string()));
        }

        for (index, arg) in command.iter().enumerate() {
            let arg = arg.as_ref();
            if arg.len() > rules.max_arg_len {
                return Err(CommandError::ArgumentTooLong {
                    index,
                    len: arg.len(),
                    max: rules.max_arg_len,
                });
            }
            if arg.contains('\0') {
                return Err(CommandError::NullByte { index });
            }
            if arg.chars().any(char::is_control) {
                return Err(CommandError::ControlCharacter { index });
            }
            if let Some(pattern) = rules.denied_patterns.iter().find(|p| arg.contains(p.as_str())) {
                tracing::warn!(index, pattern = %pattern, "Rejected argument with shell operator");
                return Err(CommandError::DeniedPattern {
                    index,
                    pattern: pattern.clone(),
                });
            }
        }

        Ok(())
    }

    /// Add an executable to the denylist. Returns false if already present.
    pub fn deny_command(&self, name: &str) -> bool {
        self.rules.write().denied_commands.insert(name.trim().to_lowercase())
    }

    /// Remove an executable from the denylist. Returns false if absent.
    pub fn allow_command(&self, name: &str) -> bool {
        self.rules.write().denied_commands.remove(&name.trim().to_lowercase())
    }

    /// Add a forbidden substring. Returns false if already present or empty.
    pub fn deny_pattern(&self, pattern: &str) -> bool {
        if pattern.is_empty() {
            return false;
        }
        let mut rules = self.rules.write();
        if rules.denied_patterns.iter().any(|p| p == pattern) {
            return false;
        }
        rules.denied_patterns.push(pattern.to_string());
        true
    }

    /// Remove a forbidden substring. Returns false if absent.
    pub fn allow_pattern(&self, pattern: &str) -> bool {
        let mut rules = self.rules.write();
        let before = rules.denied_patterns.len();
        rules.denied_patterns.retain(|p| p != pattern);
        rules.denied_patterns.len() != before
    }

    pub fn set_limits(&self, max_args: usize, max_arg_len: usize) {
        let mut rules = self.rules.write();
        rules.max_args = max_args;
        rules.max_arg_len = max_arg_len;
    }

    /// Sorted snapshot of the executable denylist.
    pub fn denied_commands(&self) -> Vec<String> {
        let mut commands: Vec<String> = self.rules.read().denied_commands.iter().cloned().collect();
        commands.sort();
        commands
    }

    pub fn denied_patterns(&self) -> Vec<String> {
        self.rules.read().denied_patterns.clone()
    }
}

impl Default for CommandValidator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_accepts_plain_commands() {
        let validator = CommandValidator::new();
        assert!(validator.validate(&["ls", "-la"]).is_ok());
        assert!(validator.validate(&["ps", "aux"]).is_ok());
        assert!(validator.validate(&["cat", "/etc/hostname"]).is_ok());
    }

    #[test]
    fn test_rejects_denied_binary_by_basename() {
        let validator = CommandValidator::new();
        assert_eq!(
            validator.validate(&["/bin/RM", "-rf", "/"]),
            Err(CommandError::DeniedCommand("/bin/RM".to_string()))
        );
    }

    #[test]
    fn test_rejects_control_characters() {
        let validator = CommandValidator::new();
        assert_eq!(
            validator.validate(&["echo", "a\nb"]),
            Err(CommandError::ControlCharacter { index: 1 })
        );
        assert_eq!(
            validator.validate(&["echo", "a\0b"]),
            Err(CommandError::NullByte { index: 1 })
        );
    }

    #[test]
    fn test_reports_most_specific_pattern() {
        let validator = CommandValidator::new();
        assert_eq!(
            validator.validate(&["ls", "a||b"]),
            Err(CommandError::DeniedPattern {
                index: 1,
                pattern: "||".to_string()
            })
        );
    }

    #[test]
    fn test_empty_command() {
        let validator = CommandValidator::new();
        let empty: [&str; 0] = [];
        assert_eq!(validator.validate(&empty), Err(CommandError::Empty));
        assert_eq!(validator.validate(&["  "]), Err(CommandError::Empty));
    }

    #[test]
    fn test_limits() {
        let validator = CommandValidator::new();
        validator.set_limits(2, 4);
        assert!(matches!(
            validator.validate(&["ls", "-l", "-a"]),
            Err(CommandError::TooManyArguments { count: 3, max: 2 })
        ));
        assert!(matches!(
            validator.validate(&["ls", "-lahR"]),
            Err(CommandError::ArgumentTooLong { index: 1, len: 5, max: 4 })
        ));
    }
}
