//! Command lines for the external MySQL and compression tools.

use std::path::Path;

use dumpvault_core::config::{MysqlConfig, ToolsConfig};
use dumpvault_core::{DatabaseName, TableName};

use crate::process::CommandSpec;

/// Environment variable the MySQL tools read the password from.
pub const PASSWORD_ENV: &str = "MYSQL_PWD";

/// Flags for every dump: a consistent snapshot without locking, triggers
/// and events kept, stored routines skipped, complete inserts and
/// drop-before-create.
pub const DUMP_FLAGS: &[&str] = &[
    "--single-transaction",
    "--skip-routines",
    "--triggers",
    "--events",
    "--quick",
    "--lock-tables=false",
    "--no-tablespaces",
    "--complete-insert",
    "--add-drop-table",
    "--create-options",
];

#[derive(Debug, Clone)]
pub struct MysqlCommands {
    tools: ToolsConfig,
    mysql: MysqlConfig,
}

impl MysqlCommands {
    pub fn new(tools: ToolsConfig, mysql: MysqlConfig) -> Self {
        Self { tools, mysql }
    }

    /// Dump `database`, restricted to `tables` when non-empty. The output
    /// carries no `CREATE DATABASE` or `USE`, so it restores into whichever
    /// database the client names.
    pub fn dump(&self, database: &DatabaseName, tables: &[TableName]) -> CommandSpec {
        self.connect(CommandSpec::new(&self.tools.mysqldump))
            .args(DUMP_FLAGS.iter().copied())
            .arg(database.as_str())
            .args(tables.iter().map(TableName::as_str))
    }

    /// Client reading SQL from stdin into `database`.
    pub fn client(&self, database: &DatabaseName) -> CommandSpec {
        self.connect(CommandSpec::new(&self.tools.mysql))
            .arg(database.as_str())
            .piped_stdin()
    }

    /// Client running one query and printing tab separated rows without
    /// headers or escaping.
    pub fn query(&self, database: &DatabaseName, sql: &str) -> CommandSpec {
        self.connect(CommandSpec::new(&self.tools.mysql))
            .args(["--batch", "--raw", "--skip-column-names", "-e", sql])
            .arg(database.as_str())
    }

    /// Compress `path` in place into `<path>.gz`, overwriting.
    pub fn compress(&self, path: &Path) -> CommandSpec {
        CommandSpec::new(&self.tools.gzip)
            .arg("-f")
            .arg(path.to_string_lossy())
    }

    /// Decompress `path` to stdout, leaving it in place.
    pub fn decompress_file(&self, path: &Path) -> CommandSpec {
        CommandSpec::new(&self.tools.gzip)
            .arg("-dc")
            .arg(path.to_string_lossy())
    }

    /// Decompress stdin to stdout.
    pub fn decompress_stream(&self) -> CommandSpec {
        CommandSpec::new(&self.tools.gzip).arg("-dc").piped_stdin()
    }

    fn connect(&self, spec: CommandSpec) -> CommandSpec {
        let spec = spec.args([
            "-h".to_string(),
            self.mysql.host.clone(),
            "-P".to_string(),
            self.mysql.port.to_string(),
            "-u".to_string(),
            self.mysql.user.clone(),
        ]);
        match &self.mysql.password {
            Some(password) => spec.env(PASSWORD_ENV, password.clone()),
            None => spec,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn commands(password: Option<&str>) -> MysqlCommands {
        MysqlCommands::new(
            ToolsConfig::default(),
            MysqlConfig {
                host: "db.internal".to_string(),
                port: 3307,
                user: "backup".to_string(),
                password: password.map(str::to_string),
            },
        )
    }

    #[test]
    fn test_whole_database_dump() {
        let spec = commands(Some("s3cret")).dump(&DatabaseName::new_unchecked("shopdb"), &[]);
        assert_eq!(spec.program, "mysqldump");
        assert_eq!(&spec.args[..6], ["-h", "db.internal", "-P", "3307", "-u", "backup"]);
        assert!(spec.args.contains(&"--single-transaction".to_string()));
        assert!(
            !spec
                .args
                .iter()
                .any(|a| a == "--add-drop-database" || a == "--databases" || a == "-B")
        );
        assert_eq!(spec.args.last().map(String::as_str), Some("shopdb"));
        assert_eq!(spec.envs, vec![(PASSWORD_ENV.to_string(), "s3cret".to_string())]);
        assert!(!spec.args.iter().any(|a| a.contains("s3cret")));
    }

    #[test]
    fn test_table_subset_is_trailing() {
        let tables = vec![
            TableName::new_unchecked("orders"),
            TableName::new_unchecked("customers"),
        ];
        let spec = commands(None).dump(&DatabaseName::new_unchecked("shopdb"), &tables);
        let n = spec.args.len();
        assert_eq!(&spec.args[n - 3..], ["shopdb", "orders", "customers"]);
        assert!(spec.envs.is_empty());
    }

    #[test]
    fn test_compression_commands() {
        let c = commands(None);
        let spec = c.compress(Path::new("/b/x.sql"));
        assert_eq!(spec.args, ["-f", "/b/x.sql"]);
        assert!(!spec.stdin);
        assert!(c.decompress_stream().stdin);
        assert_eq!(c.decompress_file(Path::new("/b/x.sql.gz")).args, ["-dc", "/b/x.sql.gz"]);
    }
}
