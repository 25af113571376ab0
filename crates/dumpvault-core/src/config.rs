//! # Engine configuration
//!
//! Configuration is a single TOML document whose sections all default, so an
//! empty file (or no file) yields a working local setup. After the file is
//! read, `DUMPVAULT_*` environment variables override individual values and
//! the result is validated before the engine starts.
//!
//! ## Environment Variables
//!
//! - `DUMPVAULT_MYSQL_HOST`, `DUMPVAULT_MYSQL_PORT`, `DUMPVAULT_MYSQL_USER`
//! - `DUMPVAULT_MYSQL_PASSWORD` - handed to child processes as `MYSQL_PWD`
//! - `DUMPVAULT_BACKUP_DIR` - root of the local backup tree
//! - `DUMPVAULT_SCRATCH_DIR` - directory for decompression scratch files
//! - `DUMPVAULT_STORE_PATH` - SQLite file holding jobs and schedules
//! - `DUMPVAULT_SCHEDULER_ENABLED`, `DUMPVAULT_SCHEDULER_REFRESH`
//! - `DUMPVAULT_CLEANUP_CRON`
//! - `DUMPVAULT_BACKUP_TIMEOUT`, `DUMPVAULT_INCREMENTAL_TIMEOUT`,
//!   `DUMPVAULT_RESTORE_TIMEOUT` - humantime durations, `off` disables
//! - `DUMPVAULT_TIMESTAMP_COLUMN` - change-tracking column for incrementals
//! - `DUMPVAULT_REMOTE_BASE`, `DUMPVAULT_REMOTE_DELETE_AFTER_UPLOAD`
//! - `DUMPVAULT_NOTIFY_COMMAND`
//! - `DUMPVAULT_LOG_LEVEL`, `DUMPVAULT_LOG_FORMAT`

use std::collections::BTreeMap;
use std::env;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::cron_expr::CronExpression;
use crate::error::ConfigError;
use crate::identifiers::{DatabaseName, IdValidator};
use crate::model::BackupKind;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub mysql: MysqlConfig,
    pub storage: StorageConfig,
    pub tools: ToolsConfig,
    pub retention: RetentionConfig,
    pub scheduler: SchedulerConfig,
    pub operations: OperationsConfig,
    pub incremental: IncrementalConfig,
    pub remote: RemoteConfig,
    pub notify: NotifyConfig,
    pub store: StoreConfig,
    pub logging: LoggingConfig,
}

/// Connection parameters passed to the dump and client programs.
#[derive(Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MysqlConfig {
    pub host: String,
    pub port: u16,
    pub user: String,
    #[serde(skip_serializing)]
    pub password: Option<String>,
}

impl Default for MysqlConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 3306,
            user: "root".to_string(),
            password: None,
        }
    }
}

impl fmt::Debug for MysqlConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MysqlConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("user", &self.user)
            .field("password", &self.password.as_ref().map(|_| "***"))
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub backup_dir: PathBuf,
    /// Where decompressed dumps and extracted fragments are staged; the
    /// system temp directory when unset.
    pub scratch_dir: Option<PathBuf>,
    /// Friendly folder names per database (`shop_production = "shop"`).
    pub database_folders: BTreeMap<String, String>,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backup_dir: PathBuf::from("./backups"),
            scratch_dir: None,
            database_folders: BTreeMap::new(),
        }
    }
}

impl StorageConfig {
    /// Folder name used for `database` inside each kind directory.
    pub fn folder_for<'a>(&'a self, database: &'a DatabaseName) -> &'a str {
        self.database_folders
            .get(database.as_str())
            .map(String::as_str)
            .unwrap_or(database.as_str())
    }

    pub fn scratch_dir(&self) -> PathBuf {
        self.scratch_dir.clone().unwrap_or_else(env::temp_dir)
    }
}

/// Names or paths of the external programs the engine drives.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolsConfig {
    pub mysqldump: String,
    pub mysql: String,
    pub gzip: String,
    pub rclone: String,
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            mysqldump: "mysqldump".to_string(),
            mysql: "mysql".to_string(),
            gzip: "gzip".to_string(),
            rclone: "rclone".to_string(),
        }
    }
}

/// Maximum age of completed backups per scheduled kind. `None` keeps that
/// kind forever.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetentionConfig {
    #[serde(with = "optional_duration")]
    pub daily: Option<Duration>,
    #[serde(with = "optional_duration")]
    pub weekly: Option<Duration>,
    #[serde(with = "optional_duration")]
    pub monthly: Option<Duration>,
}

const DAY: u64 = 24 * 60 * 60;

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            daily: Some(Duration::from_secs(7 * DAY)),
            weekly: Some(Duration::from_secs(30 * DAY)),
            monthly: Some(Duration::from_secs(365 * DAY)),
        }
    }
}

impl RetentionConfig {
    /// Retention window for `kind`; always `None` for kinds cleanup must not
    /// touch.
    pub fn window(&self, kind: BackupKind) -> Option<Duration> {
        match kind {
            BackupKind::FullDaily => self.daily,
            BackupKind::FullWeekly => self.weekly,
            BackupKind::FullMonthly => self.monthly,
            BackupKind::FullManual | BackupKind::Incremental => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    pub enabled: bool,
    /// How often schedule definitions are re-read from the store.
    #[serde(with = "duration")]
    pub refresh_interval: Duration,
    /// When the retention cleanup pass runs; empty disables it.
    pub cleanup_cron: String,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            refresh_interval: Duration::from_secs(60),
            cleanup_cron: "0 3 * * *".to_string(),
        }
    }
}

/// Per-operation-class limits and grace periods.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OperationsConfig {
    #[serde(with = "optional_duration")]
    pub backup_timeout: Option<Duration>,
    #[serde(with = "optional_duration")]
    pub incremental_timeout: Option<Duration>,
    #[serde(with = "optional_duration")]
    pub restore_timeout: Option<Duration>,
    /// Delay between SIGTERM and SIGKILL when tearing down a child.
    #[serde(with = "duration")]
    pub cancel_grace: Duration,
    /// How long a finished restore stays visible to status polls.
    #[serde(with = "duration")]
    pub status_linger: Duration,
}

impl Default for OperationsConfig {
    fn default() -> Self {
        Self {
            backup_timeout: None,
            incremental_timeout: None,
            restore_timeout: None,
            cancel_grace: Duration::from_secs(2),
            status_linger: Duration::from_secs(5),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IncrementalConfig {
    pub timestamp_column: String,
}

impl Default for IncrementalConfig {
    fn default() -> Self {
        Self {
            timestamp_column: "updated_at".to_string(),
        }
    }
}

/// Off-site copy of completed full backups through an rclone-compatible tool.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RemoteConfig {
    /// `remote:bucket/path`; remote sync is off when unset.
    pub base: Option<String>,
    pub delete_after_upload: bool,
    pub extra_args: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NotifyConfig {
    /// Program receiving each message on stdin. Messages go to the log when
    /// unset.
    pub command: Option<String>,
    pub args: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub path: PathBuf,
    pub pool_size: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("dumpvault.db"),
            pool_size: 4,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Error,
    Warn,
    #[default]
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    pub fn as_str(self) -> &'static str {
        match self {
            LogLevel::Error => "error",
            LogLevel::Warn => "warn",
            LogLevel::Info => "info",
            LogLevel::Debug => "debug",
            LogLevel::Trace => "trace",
        }
    }
}

impl FromStr for LogLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "error" => Ok(LogLevel::Error),
            "warn" | "warning" => Ok(LogLevel::Warn),
            "info" => Ok(LogLevel::Info),
            "debug" => Ok(LogLevel::Debug),
            "trace" => Ok(LogLevel::Trace),
            other => Err(format!("unknown log level '{other}'")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Json,
    Pretty,
}

impl FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "json" => Ok(LogFormat::Json),
            "pretty" | "text" => Ok(LogFormat::Pretty),
            other => Err(format!("unknown log format '{other}'")),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: LogLevel,
    pub format: LogFormat,
}

impl EngineConfig {
    /// Load configuration from a TOML file
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Read {
            path: path.display().to_string(),
            message: e.to_string(),
        })?;

        Self::load_from_toml(&content)
    }

    /// Load configuration from a TOML string
    pub fn load_from_toml(toml_content: &str) -> Result<Self, ConfigError> {
        toml::from_str(toml_content).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    /// File (or defaults), then environment overrides, then validation.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let config = match path {
            Some(path) => Self::load_from_file(path)?,
            None => Self::default(),
        };
        let config = config.with_env_overrides()?;
        config.validate()?;
        Ok(config)
    }

    /// Apply `DUMPVAULT_*` environment variables on top of this config.
    pub fn with_env_overrides(mut self) -> Result<Self, ConfigError> {
        if let Some(host) = get_env_string("DUMPVAULT_MYSQL_HOST") {
            self.mysql.host = host;
        }
        if let Some(port) = get_env_u16("DUMPVAULT_MYSQL_PORT")? {
            self.mysql.port = port;
        }
        if let Some(user) = get_env_string("DUMPVAULT_MYSQL_USER") {
            self.mysql.user = user;
        }
        if let Some(password) = get_env_string("DUMPVAULT_MYSQL_PASSWORD") {
            self.mysql.password = Some(password);
        }
        if let Some(dir) = get_env_string("DUMPVAULT_BACKUP_DIR") {
            self.storage.backup_dir = PathBuf::from(dir);
        }
        if let Some(dir) = get_env_string("DUMPVAULT_SCRATCH_DIR") {
            self.storage.scratch_dir = Some(PathBuf::from(dir));
        }
        if let Some(path) = get_env_string("DUMPVAULT_STORE_PATH") {
            self.store.path = PathBuf::from(path);
        }
        if let Some(enabled) = get_env_bool("DUMPVAULT_SCHEDULER_ENABLED")? {
            self.scheduler.enabled = enabled;
        }
        if let Some(refresh) = get_env_duration("DUMPVAULT_SCHEDULER_REFRESH")? {
            self.scheduler.refresh_interval = refresh;
        }
        if let Some(cron) = get_env_string("DUMPVAULT_CLEANUP_CRON") {
            self.scheduler.cleanup_cron = cron;
        }
        if let Some(limit) = get_env_optional_duration("DUMPVAULT_BACKUP_TIMEOUT")? {
            self.operations.backup_timeout = limit;
        }
        if let Some(limit) = get_env_optional_duration("DUMPVAULT_INCREMENTAL_TIMEOUT")? {
            self.operations.incremental_timeout = limit;
        }
        if let Some(limit) = get_env_optional_duration("DUMPVAULT_RESTORE_TIMEOUT")? {
            self.operations.restore_timeout = limit;
        }
        if let Some(column) = get_env_string("DUMPVAULT_TIMESTAMP_COLUMN") {
            self.incremental.timestamp_column = column;
        }
        if let Some(base) = get_env_string("DUMPVAULT_REMOTE_BASE") {
            self.remote.base = Some(base).filter(|b| !b.trim().is_empty());
        }
        if let Some(delete) = get_env_bool("DUMPVAULT_REMOTE_DELETE_AFTER_UPLOAD")? {
            self.remote.delete_after_upload = delete;
        }
        if let Some(command) = get_env_string("DUMPVAULT_NOTIFY_COMMAND") {
            self.notify.command = Some(command).filter(|c| !c.trim().is_empty());
        }
        if let Some(level) = get_env_parsed::<LogLevel>("DUMPVAULT_LOG_LEVEL")? {
            self.logging.level = level;
        }
        if let Some(format) = get_env_parsed::<LogFormat>("DUMPVAULT_LOG_FORMAT")? {
            self.logging.format = format;
        }
        Ok(self)
    }

    /// Validate configuration, failing fast on the first problem.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let fail = |msg: String| Err(ConfigError::ValidationFailed(msg));

        if self.mysql.host.trim().is_empty() {
            return fail("mysql.host cannot be empty".to_string());
        }
        if self.mysql.port == 0 {
            return fail("mysql.port must be greater than 0".to_string());
        }
        if self.mysql.user.trim().is_empty() {
            return fail("mysql.user cannot be empty".to_string());
        }
        if self.storage.backup_dir.as_os_str().is_empty() {
            return fail("storage.backup_dir cannot be empty".to_string());
        }
        for (database, folder) in &self.storage.database_folders {
            if let Err(e) = IdValidator::validate(folder) {
                return fail(format!(
                    "storage.database_folders.{database} = '{folder}': {e}"
                ));
            }
        }
        for (name, program) in [
            ("tools.mysqldump", &self.tools.mysqldump),
            ("tools.mysql", &self.tools.mysql),
            ("tools.gzip", &self.tools.gzip),
            ("tools.rclone", &self.tools.rclone),
        ] {
            if program.trim().is_empty() {
                return fail(format!("{name} cannot be empty"));
            }
        }
        for (name, window) in [
            ("retention.daily", self.retention.daily),
            ("retention.weekly", self.retention.weekly),
            ("retention.monthly", self.retention.monthly),
        ] {
            if window == Some(Duration::ZERO) {
                return fail(format!("{name} must be greater than 0"));
            }
        }
        if self.scheduler.refresh_interval < Duration::from_secs(1) {
            return fail("scheduler.refresh_interval must be at least 1s".to_string());
        }
        if !self.scheduler.cleanup_cron.trim().is_empty()
            && let Err(e) = CronExpression::parse(&self.scheduler.cleanup_cron)
        {
            return fail(format!("scheduler.cleanup_cron: {e}"));
        }
        for (name, limit) in [
            ("operations.backup_timeout", self.operations.backup_timeout),
            (
                "operations.incremental_timeout",
                self.operations.incremental_timeout,
            ),
            ("operations.restore_timeout", self.operations.restore_timeout),
        ] {
            if limit == Some(Duration::ZERO) {
                return fail(format!("{name} must be greater than 0"));
            }
        }
        if let Err(e) = IdValidator::validate(&self.incremental.timestamp_column) {
            return fail(format!("incremental.timestamp_column: {e}"));
        }
        if let Some(base) = &self.remote.base
            && base.trim().is_empty()
        {
            return fail("remote.base cannot be blank".to_string());
        }
        if self.store.pool_size == 0 {
            return fail("store.pool_size must be greater than 0".to_string());
        }
        Ok(())
    }
}

/// `"5m"`-style durations through humantime.
mod duration {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&humantime::format_duration(*value).to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let text = String::deserialize(deserializer)?;
        humantime::parse_duration(text.trim()).map_err(serde::de::Error::custom)
    }
}

/// Optional humantime duration; `"off"`, `"none"` or an empty string disable.
mod optional_duration {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(
        value: &Option<Duration>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        match value {
            Some(d) => serializer.serialize_str(&humantime::format_duration(*d).to_string()),
            None => serializer.serialize_str("off"),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<Duration>, D::Error> {
        let text = String::deserialize(deserializer)?;
        super::parse_optional_duration(&text).map_err(serde::de::Error::custom)
    }
}

fn parse_optional_duration(text: &str) -> Result<Option<Duration>, humantime::DurationError> {
    match text.trim().to_ascii_lowercase().as_str() {
        "" | "off" | "none" | "never" => Ok(None),
        other => humantime::parse_duration(other).map(Some),
    }
}

// Environment variable helper functions

fn get_env_string(key: &str) -> Option<String> {
    env::var(key).ok()
}

fn get_env_bool(key: &str) -> Result<Option<bool>, ConfigError> {
    match env::var(key) {
        Ok(val) => match val.to_lowercase().as_str() {
            "true" | "1" | "yes" | "on" => Ok(Some(true)),
            "false" | "0" | "no" | "off" => Ok(Some(false)),
            _ => Err(ConfigError::InvalidEnvVar {
                key: key.to_string(),
                message: format!(
                    "invalid boolean value '{val}', expected true/false/1/0/yes/no/on/off"
                ),
            }),
        },
        Err(_) => Ok(None),
    }
}

fn get_env_u16(key: &str) -> Result<Option<u16>, ConfigError> {
    match env::var(key) {
        Ok(val) => val
            .parse::<u16>()
            .map(Some)
            .map_err(|e| ConfigError::InvalidEnvVar {
                key: key.to_string(),
                message: format!("invalid u16 value '{val}': {e}"),
            }),
        Err(_) => Ok(None),
    }
}

fn get_env_duration(key: &str) -> Result<Option<Duration>, ConfigError> {
    match env::var(key) {
        Ok(val) => humantime::parse_duration(val.trim())
            .map(Some)
            .map_err(|e| ConfigError::InvalidEnvVar {
                key: key.to_string(),
                message: format!("invalid duration '{val}': {e}"),
            }),
        Err(_) => Ok(None),
    }
}

/// Outer `None`: variable unset. Inner `None`: explicitly disabled.
fn get_env_optional_duration(key: &str) -> Result<Option<Option<Duration>>, ConfigError> {
    match env::var(key) {
        Ok(val) => parse_optional_duration(&val)
            .map(Some)
            .map_err(|e| ConfigError::InvalidEnvVar {
                key: key.to_string(),
                message: format!("invalid duration '{val}': {e}"),
            }),
        Err(_) => Ok(None),
    }
}

fn get_env_parsed<T: FromStr<Err = String>>(key: &str) -> Result<Option<T>, ConfigError> {
    match env::var(key) {
        Ok(val) => val
            .parse::<T>()
            .map(Some)
            .map_err(|message| ConfigError::InvalidEnvVar {
                key: key.to_string(),
                message,
            }),
        Err(_) => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    fn set_env(key: &str, value: &str) {
        unsafe {
            env::set_var(key, value);
        }
    }

    fn clear_env(key: &str) {
        unsafe {
            env::remove_var(key);
        }
    }

    #[test]
    fn test_defaults_validate() {
        let config = EngineConfig::default();
        config.validate().unwrap();
        assert_eq!(config.mysql.port, 3306);
        assert_eq!(config.operations.cancel_grace, Duration::from_secs(2));
        assert_eq!(config.operations.status_linger, Duration::from_secs(5));
        assert_eq!(
            config.retention.window(BackupKind::FullDaily),
            Some(Duration::from_secs(7 * DAY))
        );
        assert_eq!(config.retention.window(BackupKind::FullManual), None);
        assert_eq!(config.retention.window(BackupKind::Incremental), None);
    }

    #[test]
    fn test_empty_toml_is_default() {
        let config = EngineConfig::load_from_toml("").unwrap();
        assert_eq!(config, EngineConfig::default());
    }

    #[test]
    fn test_toml_sections() {
        let config = EngineConfig::load_from_toml(
            r#"
            [mysql]
            host = "db.internal"
            user = "backup"

            [storage]
            backup_dir = "/var/backups/mysql"

            [storage.database_folders]
            shop_production = "shop"

            [retention]
            daily = "3days"
            monthly = "off"

            [operations]
            backup_timeout = "2h"
            cancel_grace = "500ms"

            [remote]
            base = "s3remote:backups"
            delete_after_upload = true
            "#,
        )
        .unwrap();

        assert_eq!(config.mysql.host, "db.internal");
        assert_eq!(config.mysql.port, 3306);
        assert_eq!(config.storage.backup_dir, PathBuf::from("/var/backups/mysql"));
        let db = DatabaseName::new_unchecked("shop_production");
        assert_eq!(config.storage.folder_for(&db), "shop");
        let other = DatabaseName::new_unchecked("crm");
        assert_eq!(config.storage.folder_for(&other), "crm");
        assert_eq!(config.retention.daily, Some(Duration::from_secs(3 * DAY)));
        assert_eq!(config.retention.monthly, None);
        assert_eq!(
            config.operations.backup_timeout,
            Some(Duration::from_secs(7200))
        );
        assert_eq!(config.operations.cancel_grace, Duration::from_millis(500));
        assert!(config.remote.delete_after_upload);
        config.validate().unwrap();
    }

    #[test]
    fn test_password_not_serialized_or_debugged() {
        let mut config = EngineConfig::default();
        config.mysql.password = Some("hunter2".to_string());
        let text = toml::to_string(&config).unwrap();
        assert!(!text.contains("hunter2"));
        assert!(!format!("{:?}", config.mysql).contains("hunter2"));
    }

    #[test]
    fn test_validation_rejects_bad_cleanup_cron() {
        let mut config = EngineConfig::default();
        config.scheduler.cleanup_cron = "every day".to_string();
        assert!(matches!(
            config.validate(),
            Err(ConfigError::ValidationFailed(msg)) if msg.contains("cleanup_cron")
        ));
    }

    #[test]
    fn test_validation_rejects_bad_folder_alias() {
        let mut config = EngineConfig::default();
        config
            .storage
            .database_folders
            .insert("shop".to_string(), "../escape".to_string());
        assert!(config.validate().is_err());
    }

    #[test]
    #[serial]
    fn test_env_overrides() {
        set_env("DUMPVAULT_MYSQL_PORT", "3307");
        set_env("DUMPVAULT_RESTORE_TIMEOUT", "90m");
        set_env("DUMPVAULT_LOG_FORMAT", "pretty");
        set_env("DUMPVAULT_REMOTE_DELETE_AFTER_UPLOAD", "yes");

        let config = EngineConfig::default().with_env_overrides().unwrap();
        assert_eq!(config.mysql.port, 3307);
        assert_eq!(
            config.operations.restore_timeout,
            Some(Duration::from_secs(90 * 60))
        );
        assert_eq!(config.logging.format, LogFormat::Pretty);
        assert!(config.remote.delete_after_upload);

        clear_env("DUMPVAULT_MYSQL_PORT");
        clear_env("DUMPVAULT_RESTORE_TIMEOUT");
        clear_env("DUMPVAULT_LOG_FORMAT");
        clear_env("DUMPVAULT_REMOTE_DELETE_AFTER_UPLOAD");
    }

    #[test]
    #[serial]
    fn test_env_invalid_value_reports_key() {
        set_env("DUMPVAULT_MYSQL_PORT", "not-a-port");
        let err = EngineConfig::default().with_env_overrides().unwrap_err();
        clear_env("DUMPVAULT_MYSQL_PORT");
        assert!(matches!(
            err,
            ConfigError::InvalidEnvVar { ref key, .. } if key == "DUMPVAULT_MYSQL_PORT"
        ));
    }

    #[test]
    #[serial]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("dumpvault.toml");
        std::fs::write(&path, "[incremental]\ntimestamp_column = \"modified_at\"\n").unwrap();
        let config = EngineConfig::load(Some(&path)).unwrap();
        assert_eq!(config.incremental.timestamp_column, "modified_at");

        let missing = EngineConfig::load(Some(&dir.path().join("nope.toml")));
        assert!(matches!(missing, Err(ConfigError::Read { .. })));
    }
}
