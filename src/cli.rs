//! Command-line surface of the `svcmgr` binary.

use std::path::PathBuf;

use clap::{ArgAction, Parser, Subcommand};

use crate::instance::Instance;

/// Inspect and monitor the backends listed in the instance inventory.
#[derive(Parser, Debug)]
#[command(name = "svcmgr")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Path to configuration file (TOML)
    #[arg(short = 'c', long = "config", value_name = "FILE", env = "SVCMGR_CONFIG", global = true)]
    pub config: Option<PathBuf>,

    /// Increase log verbosity (-v debug, -vv trace)
    #[arg(short = 'v', long = "verbose", action = ArgAction::Count, global = true)]
    pub verbose: u8,
}

#[derive(Subcommand, Debug, PartialEq)]
pub enum Command {
    /// List configured instances
    List,

    /// Connect to an instance and run a health check
    Check {
        /// Instance id or name
        instance: String,
    },

    /// Collect metrics from an instance
    Metrics {
        /// Instance id or name
        instance: String,
    },

    /// Show version and topology of an instance
    Info {
        /// Instance id or name
        instance: String,
    },

    /// Validate an instance's configuration without connecting
    Validate {
        /// Instance id or name
        instance: String,
    },

    /// Run a command inside a container of a docker instance
    Exec {
        /// Instance id or name
        instance: String,
        /// Container id or name
        container: String,
        /// Command and arguments
        #[arg(last = true, required = true, num_args = 1..)]
        command: Vec<String>,
    },

    /// Run the periodic health and metrics sweep until interrupted
    Monitor,
}

impl Cli {
    /// Default `tracing` directive for the requested verbosity.
    pub fn log_directive(&self) -> &'static str {
        match self.verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
    }
}

/// Find an instance by exact id, then by name.
pub fn resolve_instance<'a>(instances: &'a [Instance], key: &str) -> Option<&'a Instance> {
    instances
        .iter()
        .find(|i| i.id == key)
        .or_else(|| instances.iter().find(|i| i.name == key))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::instance::ServiceType;

    #[test]
    fn test_parse_exec_trailing_command() {
        let cli = Cli::try_parse_from([
            "svcmgr", "exec", "docker-local", "web", "--", "ls", "-la",
        ])
        .unwrap();
        assert_eq!(
            cli.command,
            Command::Exec {
                instance: "docker-local".to_string(),
                container: "web".to_string(),
                command: vec!["ls".to_string(), "-la".to_string()],
            }
        );
    }

    #[test]
    fn test_global_config_flag() {
        let cli = Cli::try_parse_from(["svcmgr", "check", "cache", "--config", "/tmp/svc.toml", "-vv"]).unwrap();
        assert_eq!(cli.config, Some(PathBuf::from("/tmp/svc.toml")));
        assert_eq!(cli.log_directive(), "trace");
    }

    #[test]
    fn test_exec_requires_command() {
        assert!(Cli::try_parse_from(["svcmgr", "exec", "docker-local", "web"]).is_err());
    }

    #[test]
    fn test_resolve_instance_prefers_id() {
        let instances = vec![
            Instance::new("cache", ServiceType::Redis, "localhost", 6379).with_id("a"),
            Instance::new("a", ServiceType::Redis, "localhost", 6380).with_id("b"),
        ];
        assert_eq!(resolve_instance(&instances, "a").map(|i| i.port), Some(6379));
        assert_eq!(resolve_instance(&instances, "cache").map(|i| i.id.as_str()), Some("a"));
        assert!(resolve_instance(&instances, "missing").is_none());
    }
}
