use std::path::PathBuf;
use std::time::Duration;

use docsync_core::config::TunnelConfig;
use mysql_async::consts::ColumnType;
use mysql_async::prelude::Queryable;
use mysql_async::{Column, Conn, Opts, OptsBuilder, Row, Value as SqlValue};
use tracing::{debug, info};

use crate::error::{io_err, ExportError};
use crate::sql::ensure_read_only;
use crate::table::{cell_from, ColumnKind, Table};
use crate::tunnel::TunnelGuard;

const DEFAULT_READY_TIMEOUT: Duration = Duration::from_secs(10);

/// Character set id MySQL reports for binary data.
const BINARY_CHARSET: u16 = 63;

/// Runs read-only queries against a database reachable only through SSH.
///
/// Each [`query`](Self::query) opens its own tunnel and closes it before
/// returning, success or not.
#[derive(Debug, Clone)]
pub struct SqlExporter {
    config: TunnelConfig,
    ssh_program: PathBuf,
    ready_timeout: Duration,
}

impl SqlExporter {
    pub fn new(config: TunnelConfig) -> Self {
        Self {
            config,
            ssh_program: PathBuf::from("ssh"),
            ready_timeout: DEFAULT_READY_TIMEOUT,
        }
    }

    /// Use another `ssh` executable.
    pub fn with_ssh_program(mut self, ssh: impl Into<PathBuf>) -> Self {
        self.ssh_program = ssh.into();
        self
    }

    pub fn with_ready_timeout(mut self, timeout: Duration) -> Self {
        self.ready_timeout = timeout;
        self
    }

    /// Run `sql` and return its result set.
    pub async fn query(&self, sql: &str) -> Result<Table, ExportError> {
        ensure_read_only(sql)?;
        let tunnel = self.open_tunnel().await?;
        let result = self.run(tunnel.local_port(), sql).await;
        tunnel.close();

        let table = result?;
        info!(
            database = %self.config.db_name,
            columns = table.columns.len(),
            rows = table.rows.len(),
            "export query finished"
        );
        Ok(table)
    }

    async fn open_tunnel(&self) -> Result<TunnelGuard, ExportError> {
        let config = self.config.clone();
        let ssh = self.ssh_program.clone();
        let timeout = self.ready_timeout;
        tokio::task::spawn_blocking(move || TunnelGuard::open(&config, &ssh, timeout))
            .await
            .map_err(|e| io_err(&self.ssh_program, std::io::Error::other(e)))?
    }

    async fn run(&self, port: u16, sql: &str) -> Result<Table, ExportError> {
        debug!(port, database = %self.config.db_name, "connecting through tunnel");
        let mut conn = Conn::new(connect_opts(&self.config, port)).await?;
        let table = fetch_table(&mut conn, sql).await;
        if let Err(e) = conn.disconnect().await {
            debug!(error = %e, "database disconnect failed");
        }
        table
    }
}

/// Connection options for the local end of the tunnel.
pub fn connect_opts(config: &TunnelConfig, port: u16) -> Opts {
    OptsBuilder::default()
        .ip_or_hostname("127.0.0.1")
        .tcp_port(port)
        .prefer_socket(false)
        .user(Some(config.db_user.clone()))
        .pass(Some(config.db_pass.clone()))
        .db_name(Some(config.db_name.clone()))
        .into()
}

async fn fetch_table(conn: &mut Conn, sql: &str) -> Result<Table, ExportError> {
    let mut result = conn.exec_iter(sql, ()).await?;
    let columns: Vec<(String, ColumnKind)> = result
        .columns_ref()
        .iter()
        .map(|column| (column.name_str().into_owned(), column_kind(column)))
        .collect();
    let rows: Vec<Row> = result.collect().await?;

    let mut cells = Vec::with_capacity(rows.len());
    for mut row in rows {
        let converted = columns
            .iter()
            .enumerate()
            .map(|(i, (name, kind))| {
                let value = row.take::<SqlValue, usize>(i).unwrap_or(SqlValue::NULL);
                cell_from(value, *kind, name)
            })
            .collect::<Result<Vec<_>, _>>()?;
        cells.push(converted);
    }
    Ok(Table {
        columns: columns.into_iter().map(|(name, _)| name).collect(),
        rows: cells,
    })
}

fn column_kind(column: &Column) -> ColumnKind {
    match column.column_type() {
        ColumnType::MYSQL_TYPE_DATE | ColumnType::MYSQL_TYPE_NEWDATE => ColumnKind::Date,
        ColumnType::MYSQL_TYPE_STRING
        | ColumnType::MYSQL_TYPE_VAR_STRING
        | ColumnType::MYSQL_TYPE_VARCHAR
        | ColumnType::MYSQL_TYPE_TINY_BLOB
        | ColumnType::MYSQL_TYPE_MEDIUM_BLOB
        | ColumnType::MYSQL_TYPE_LONG_BLOB
        | ColumnType::MYSQL_TYPE_BLOB
        | ColumnType::MYSQL_TYPE_BIT
        | ColumnType::MYSQL_TYPE_GEOMETRY
            if column.character_set() == BINARY_CHARSET =>
        {
            ColumnKind::Binary
        }
        _ => ColumnKind::Text,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> TunnelConfig {
        TunnelConfig {
            ssh_host: "bastion".into(),
            ssh_port: 22,
            ssh_user: "deploy".into(),
            ssh_pkey: PathBuf::from("/keys/id"),
            db_host: "db".into(),
            db_port: 3306,
            db_user: "reader".into(),
            db_pass: "secret".into(),
            db_name: "clinic".into(),
            local_port: None,
        }
    }

    #[test]
    fn connects_to_the_local_forward() {
        let opts = connect_opts(&config(), 41000);
        assert_eq!(opts.ip_or_hostname(), "127.0.0.1");
        assert_eq!(opts.tcp_port(), 41000);
        assert_eq!(opts.user(), Some("reader"));
        assert_eq!(opts.pass(), Some("secret"));
        assert_eq!(opts.db_name(), Some("clinic"));
    }

    #[tokio::test]
    async fn writes_are_refused_before_any_process_starts() {
        let exporter = SqlExporter::new(config()).with_ssh_program("/nonexistent/ssh");
        let err = exporter.query("DROP TABLE visits").await.unwrap_err();
        assert!(matches!(err, ExportError::NotReadOnly(_)));
    }

    #[tokio::test]
    async fn tunnel_failures_surface_before_connecting() {
        let exporter = SqlExporter::new(config()).with_ssh_program("/nonexistent/ssh");
        let err = exporter.query("SELECT 1").await.unwrap_err();
        assert!(matches!(err, ExportError::Spawn { .. }), "got: {err}");
    }
}
