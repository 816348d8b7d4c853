//! System configuration parsing.

use hookrun_core::ActionConfig;
use kdl::{KdlDocument, KdlNode};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::action::parse_action;
use crate::nodes::{get_f64, get_first_bool_arg, get_string, get_u64};
use crate::{ConfigError, ConfigResult};

/// Top-level configuration for a hookrun process.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HookrunConfig {
    pub database: DatabaseConfig,
    pub logs: LogsConfig,
    /// Run every action through `execute_dry_run` instead of `execute`.
    pub dry_run: bool,
    pub queue: QueueConfig,
    pub work_directory: WorkDirectoryConfig,
    pub actions: Vec<ActionConfig>,
}

impl Default for HookrunConfig {
    fn default() -> Self {
        Self {
            database: DatabaseConfig::default(),
            logs: LogsConfig::default(),
            dry_run: false,
            queue: QueueConfig::default(),
            work_directory: WorkDirectoryConfig::default(),
            actions: Vec::new(),
        }
    }
}

impl HookrunConfig {
    pub fn action(&self, name: &str) -> Option<&ActionConfig> {
        self.actions.iter().find(|a| a.name == name)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: "sqlite://data/hookrun.db".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogsConfig {
    /// Directory holding per-job execution logs.
    pub dir: PathBuf,
}

impl Default for LogsConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("./data/logs"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueConfig {
    /// Maximum number of simultaneously processing jobs.
    pub max_concurrent: usize,
    pub poll_interval: Duration,
    /// Finished jobs older than this are purged.
    pub retention_days: u32,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            max_concurrent: 3,
            poll_interval: Duration::from_secs(5),
            retention_days: 30,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkDirectoryConfig {
    pub base_path: PathBuf,
    pub max_size_gb: f64,
    /// Usage percentage of `max_size_gb` that triggers eviction.
    pub cleanup_threshold_percent: f64,
    pub monitor_interval: Duration,
}

impl Default for WorkDirectoryConfig {
    fn default() -> Self {
        Self {
            base_path: PathBuf::from("./data/work"),
            max_size_gb: 100.0,
            cleanup_threshold_percent: 90.0,
            monitor_interval: Duration::from_secs(3600),
        }
    }
}

/// Read and parse a configuration file.
pub fn load_config(path: impl AsRef<Path>) -> ConfigResult<HookrunConfig> {
    let content = std::fs::read_to_string(path)?;
    parse_config(&content)
}

/// Parse configuration from KDL text. Missing sections keep their defaults.
pub fn parse_config(kdl: &str) -> ConfigResult<HookrunConfig> {
    let doc: KdlDocument = kdl.parse()?;
    let mut config = HookrunConfig::default();
    let mut seen_actions = HashSet::new();

    for node in doc.nodes() {
        match node.name().value() {
            "database" => {
                if let Some(url) = get_string(node, "url")? {
                    config.database.url = url;
                }
            }
            "logs" => {
                if let Some(dir) = get_string(node, "dir")? {
                    config.logs.dir = PathBuf::from(dir);
                }
            }
            "dry-run" => {
                // A bare `dry-run` node enables it.
                config.dry_run = get_first_bool_arg(node)?.unwrap_or(true);
            }
            "queue" => parse_queue(node, &mut config.queue)?,
            "work-directory" => parse_work_directory(node, &mut config.work_directory)?,
            "action" => {
                let action = parse_action(node)?;
                if !seen_actions.insert(action.name.clone()) {
                    return Err(ConfigError::Duplicate(format!("action '{}'", action.name)));
                }
                config.actions.push(action);
            }
            _ => {} // Ignore unknown nodes
        }
    }

    Ok(config)
}

fn parse_queue(node: &KdlNode, queue: &mut QueueConfig) -> ConfigResult<()> {
    if let Some(max) = get_u64(node, "max-concurrent")? {
        if max == 0 {
            return Err(ConfigError::invalid("queue.max-concurrent", "must be at least 1"));
        }
        queue.max_concurrent = max as usize;
    }
    if let Some(secs) = get_u64(node, "poll-interval")? {
        if secs == 0 {
            return Err(ConfigError::invalid("queue.poll-interval", "must be at least 1 second"));
        }
        queue.poll_interval = Duration::from_secs(secs);
    }
    if let Some(days) = get_u64(node, "retention-days")? {
        queue.retention_days = u32::try_from(days)
            .map_err(|_| ConfigError::invalid("queue.retention-days", "out of range"))?;
    }
    Ok(())
}

fn parse_work_directory(node: &KdlNode, wd: &mut WorkDirectoryConfig) -> ConfigResult<()> {
    if let Some(base) = get_string(node, "base-path")? {
        wd.base_path = PathBuf::from(base);
    }
    if let Some(max) = get_f64(node, "max-size-gb")? {
        if !max.is_finite() || max <= 0.0 {
            return Err(ConfigError::invalid(
                "work-directory.max-size-gb",
                "must be a positive finite number",
            ));
        }
        wd.max_size_gb = max;
    }
    if let Some(pct) = get_f64(node, "cleanup-threshold-percent")? {
        if !pct.is_finite() || pct <= 0.0 || pct > 100.0 {
            return Err(ConfigError::invalid(
                "work-directory.cleanup-threshold-percent",
                "must be in (0, 100]",
            ));
        }
        wd.cleanup_threshold_percent = pct;
    }
    if let Some(secs) = get_u64(node, "monitor-interval")? {
        if secs == 0 {
            return Err(ConfigError::invalid(
                "work-directory.monitor-interval",
                "must be at least 1 second",
            ));
        }
        wd.monitor_interval = Duration::from_secs(secs);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use hookrun_core::ActionKind;

    #[test]
    fn test_defaults_when_empty() {
        let config = parse_config("").unwrap();
        assert_eq!(config.queue.max_concurrent, 3);
        assert_eq!(config.queue.retention_days, 30);
        assert_eq!(config.work_directory.base_path, PathBuf::from("./data/work"));
        assert_eq!(config.work_directory.max_size_gb, 100.0);
        assert_eq!(config.work_directory.cleanup_threshold_percent, 90.0);
        assert_eq!(
            config.work_directory.monitor_interval,
            Duration::from_secs(3600)
        );
        assert!(!config.dry_run);
        assert!(config.actions.is_empty());
    }

    #[test]
    fn test_parse_full_config() {
        let kdl = r#"
            database url="sqlite::memory:"
            logs dir="/var/log/hookrun"
            dry-run #true

            queue {
                max-concurrent 1
                poll-interval 2
                retention-days 7
            }

            work-directory {
                base-path "/srv/work"
                max-size-gb 10
                cleanup-threshold-percent 85.5
                monitor-interval 60
            }

            action "label-issue" type="shell" {
                command "echo labelled"
            }
        "#;

        let config = parse_config(kdl).unwrap();
        assert_eq!(config.database.url, "sqlite::memory:");
        assert_eq!(config.logs.dir, PathBuf::from("/var/log/hookrun"));
        assert!(config.dry_run);
        assert_eq!(config.queue.max_concurrent, 1);
        assert_eq!(config.queue.poll_interval, Duration::from_secs(2));
        assert_eq!(config.queue.retention_days, 7);
        assert_eq!(config.work_directory.base_path, PathBuf::from("/srv/work"));
        assert_eq!(config.work_directory.max_size_gb, 10.0);
        assert_eq!(config.work_directory.cleanup_threshold_percent, 85.5);
        assert_eq!(config.work_directory.monitor_interval, Duration::from_secs(60));
        assert_eq!(config.actions.len(), 1);
        assert_eq!(
            config.action("label-issue").unwrap().kind(),
            ActionKind::Shell
        );
    }

    #[test]
    fn test_properties_form() {
        let config = parse_config("queue max-concurrent=5 poll-interval=1").unwrap();
        assert_eq!(config.queue.max_concurrent, 5);
        assert_eq!(config.queue.poll_interval, Duration::from_secs(1));
    }

    #[test]
    fn test_zero_concurrency_rejected() {
        let result = parse_config("queue { max-concurrent 0 }");
        assert!(matches!(result, Err(ConfigError::InvalidValue { .. })));
    }

    #[test]
    fn test_threshold_out_of_range_rejected() {
        let result = parse_config("work-directory { cleanup-threshold-percent 120 }");
        assert!(matches!(result, Err(ConfigError::InvalidValue { .. })));
    }

    #[test]
    fn test_non_finite_sizes_rejected() {
        for kdl in [
            "work-directory { max-size-gb #nan }",
            "work-directory { max-size-gb #inf }",
            "work-directory { cleanup-threshold-percent #nan }",
            "work-directory { cleanup-threshold-percent #inf }",
            "work-directory { cleanup-threshold-percent #-inf }",
        ] {
            let result = parse_config(kdl);
            assert!(
                matches!(result, Err(ConfigError::InvalidValue { .. })),
                "{kdl} was accepted"
            );
        }
    }

    #[test]
    fn test_wrong_type_rejected() {
        let result = parse_config(r#"queue { max-concurrent "three" }"#);
        assert!(matches!(result, Err(ConfigError::InvalidValue { .. })));
    }

    #[test]
    fn test_duplicate_action_rejected() {
        let kdl = r#"
            action "a" type="shell" { command "true" }
            action "a" type="shell" { command "false" }
        "#;
        assert!(matches!(parse_config(kdl), Err(ConfigError::Duplicate(_))));
    }

    #[test]
    fn test_load_config_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("hookrun.kdl");
        std::fs::write(&path, "queue { max-concurrent 2 }").unwrap();

        let config = load_config(&path).unwrap();
        assert_eq!(config.queue.max_concurrent, 2);

        let missing = load_config(dir.path().join("missing.kdl"));
        assert!(matches!(missing, Err(ConfigError::Io(_))));
    }
}
