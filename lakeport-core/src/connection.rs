//! Connection resolution for sources and the warehouse destination.
//!
//! Turns a request's source descriptor into an authenticated, ready-to-open
//! connection: a bearer token for the lakehouse, or a credentialed connection
//! specification for SQL engines. Nothing here is pooled across runs.

use std::fmt;

use tracing::{debug, info};

use crate::error::{ConfigError, LakeportError, SourceError};
use crate::oauth::{self, AccessToken};
use crate::request::{LakehouseSource, SourceDescriptor, SqlSource};
use crate::secrets::SecretStore;

/// SQL engine kind after alias normalization.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SqlDialect {
    Postgres,
    MySql,
    Mssql,
}

impl SqlDialect {
    /// Resolve a dialect name, accepting the known aliases.
    pub fn canonical(name: &str) -> Result<Self, ConfigError> {
        match name.trim().to_lowercase().as_str() {
            "postgresql" | "postgres" => Ok(SqlDialect::Postgres),
            "mysql" | "mariadb" => Ok(SqlDialect::MySql),
            "mssql" | "sqlserver" => Ok(SqlDialect::Mssql),
            other => Err(ConfigError::Unsupported {
                kind: "SQL dialect".into(),
                value: other.to_string(),
            }),
        }
    }

    /// Canonical driver key.
    pub fn key(&self) -> &'static str {
        match self {
            SqlDialect::Postgres => "postgresql",
            SqlDialect::MySql => "mysql",
            SqlDialect::Mssql => "mssql",
        }
    }

    /// Client library used for the dialect.
    pub fn driver(&self) -> &'static str {
        match self {
            SqlDialect::Postgres => "sqlx-postgres",
            SqlDialect::MySql => "sqlx-mysql",
            SqlDialect::Mssql => "tiberius",
        }
    }

    fn scheme(&self) -> &'static str {
        match self {
            SqlDialect::Postgres => "postgres",
            SqlDialect::MySql => "mysql",
            SqlDialect::Mssql => "mssql",
        }
    }

    pub fn default_port(&self) -> u16 {
        match self {
            SqlDialect::Postgres => 5432,
            SqlDialect::MySql => 3306,
            SqlDialect::Mssql => 1433,
        }
    }
}

impl fmt::Display for SqlDialect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}

/// Credentialed connection target. The password never appears in `Debug` or
/// `Display` output.
#[derive(Clone)]
pub struct ConnectionSpec {
    pub dialect: SqlDialect,
    pub host: String,
    pub port: u16,
    pub database: String,
    pub username: String,
    password: String,
}

impl ConnectionSpec {
    pub fn new(
        dialect: SqlDialect,
        host: impl Into<String>,
        port: u16,
        database: impl Into<String>,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        Self {
            dialect,
            host: host.into(),
            port,
            database: database.into(),
            username: username.into(),
            password: password.into(),
        }
    }

    pub fn password(&self) -> &str {
        &self.password
    }

    /// Connection URL including the password, for driver use only.
    pub fn url(&self) -> String {
        self.render(&urlencoding::encode(&self.password))
    }

    /// Connection URL with the password masked.
    pub fn redacted_url(&self) -> String {
        self.render("***")
    }

    fn render(&self, password: &str) -> String {
        format!(
            "{}://{}:{}@{}:{}/{}",
            self.dialect.scheme(),
            urlencoding::encode(&self.username),
            password,
            self.host,
            self.port,
            urlencoding::encode(&self.database),
        )
    }
}

impl fmt::Debug for ConnectionSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionSpec")
            .field("driver", &self.dialect.driver())
            .field("url", &self.redacted_url())
            .finish()
    }
}

impl fmt::Display for ConnectionSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.redacted_url())
    }
}

/// Authenticated lakehouse workspace handle.
#[derive(Debug, Clone)]
pub struct LakehouseConnection {
    pub host_url: String,
    pub warehouse_id: String,
    pub catalog: String,
    pub token: AccessToken,
}

/// A source ready to be opened by a reader.
#[derive(Debug, Clone)]
pub enum ResolvedSource {
    Lakehouse(LakehouseConnection),
    Sql(ConnectionSpec),
}

/// Warehouse id is the last path segment of the SQL warehouse HTTP path.
pub fn warehouse_id(http_path: &str) -> Result<String, ConfigError> {
    http_path
        .trim_end_matches('/')
        .rsplit('/')
        .next()
        .filter(|id| !id.is_empty())
        .map(str::to_string)
        .ok_or_else(|| ConfigError::Invalid {
            field: "source.http_path".into(),
            message: format!("cannot derive a warehouse id from '{http_path}'"),
        })
}

/// Resolve credentials and build the connection for a source.
pub async fn resolve_source(
    source: &SourceDescriptor,
    secrets: &dyn SecretStore,
    client: &reqwest::Client,
) -> Result<ResolvedSource, LakeportError> {
    match source {
        SourceDescriptor::Lakehouse(lakehouse) => {
            resolve_lakehouse(lakehouse, secrets, client).await.map(ResolvedSource::Lakehouse)
        }
        SourceDescriptor::Postgres(sql) => resolve_sql(SqlDialect::Postgres, sql, secrets),
        SourceDescriptor::MySql(sql) => resolve_sql(SqlDialect::MySql, sql, secrets),
        SourceDescriptor::Mssql(sql) => resolve_sql(SqlDialect::Mssql, sql, secrets),
    }
}

async fn resolve_lakehouse(
    source: &LakehouseSource,
    secrets: &dyn SecretStore,
    client: &reqwest::Client,
) -> Result<LakehouseConnection, LakeportError> {
    let client_id = secrets.get_secret(&source.credentials.spn_clientid)?;
    let client_secret = secrets.get_secret(&source.credentials.spn_secret)?;
    let host_url = source.host_url.trim_end_matches('/').to_string();

    let token = oauth::client_credentials_token(client, &host_url, &client_id, &client_secret)
        .await?;
    let warehouse_id = warehouse_id(&source.http_path)?;

    info!(host = %host_url, catalog = %source.catalog, "Lakehouse token acquired");
    Ok(LakehouseConnection {
        host_url,
        warehouse_id,
        catalog: source.catalog.clone(),
        token,
    })
}

fn resolve_sql(
    dialect: SqlDialect,
    source: &SqlSource,
    secrets: &dyn SecretStore,
) -> Result<ResolvedSource, LakeportError> {
    let username = secrets.get_secret(&source.credentials.username_key)?;
    let password = secrets.get_secret(&source.credentials.password_key)?;
    if username.is_empty() {
        return Err(SourceError::Auth {
            host: source.host_url.clone(),
            message: "resolved username is empty".into(),
        }
        .into());
    }
    let port = if source.port == 0 {
        dialect.default_port()
    } else {
        source.port
    };
    let spec = ConnectionSpec::new(
        dialect,
        source.host_url.clone(),
        port,
        source.database.clone(),
        username,
        password,
    );
    debug!(driver = dialect.driver(), url = %spec, "Resolved SQL source");
    Ok(ResolvedSource::Sql(spec))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::request::SqlCredentials;
    use crate::secrets::InMemorySecretStore;

    #[test]
    fn test_dialect_aliases() {
        assert_eq!(SqlDialect::canonical("sqlserver").unwrap(), SqlDialect::Mssql);
        assert_eq!(SqlDialect::canonical("MSSQL").unwrap(), SqlDialect::Mssql);
        assert_eq!(SqlDialect::canonical("postgres").unwrap(), SqlDialect::Postgres);
        assert_eq!(SqlDialect::canonical("mariadb").unwrap().key(), "mysql");
        assert!(SqlDialect::canonical("oracle").is_err());
        assert_eq!(SqlDialect::Mssql.driver(), "tiberius");
    }

    #[test]
    fn test_connection_spec_redacts_password() {
        let spec = ConnectionSpec::new(SqlDialect::Postgres, "db", 5432, "tre", "alice", "p@ss word");
        assert_eq!(spec.redacted_url(), "postgres://alice:***@db:5432/tre");
        assert_eq!(spec.url(), "postgres://alice:p%40ss%20word@db:5432/tre");
        assert!(!format!("{spec:?}").contains("p@ss"));
        assert!(!spec.to_string().contains("p@ss"));
    }

    #[test]
    fn test_warehouse_id_from_http_path() {
        assert_eq!(warehouse_id("/sql/1.0/warehouses/abc123").unwrap(), "abc123");
        assert_eq!(warehouse_id("/sql/1.0/warehouses/abc123/").unwrap(), "abc123");
        assert!(warehouse_id("").is_err());
    }

    #[tokio::test]
    async fn test_resolve_sql_source_from_secrets() {
        let secrets = InMemorySecretStore::new()
            .with("sql-user", "reader")
            .with("sql-pass", "hunter2");
        let source = SourceDescriptor::Mssql(SqlSource {
            host_url: "mssql.internal".into(),
            database: "clinical".into(),
            port: 0,
            credentials: SqlCredentials {
                provider: None,
                username_key: "sql-user".into(),
                password_key: "sql-pass".into(),
            },
            table: None,
        });
        let client = reqwest::Client::new();
        let resolved = resolve_source(&source, &secrets, &client).await.unwrap();
        match resolved {
            ResolvedSource::Sql(spec) => {
                assert_eq!(spec.dialect, SqlDialect::Mssql);
                assert_eq!(spec.port, 1433);
                assert_eq!(spec.username, "reader");
                assert_eq!(spec.password(), "hunter2");
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_resolve_missing_secret_is_configuration_error() {
        let secrets = InMemorySecretStore::new();
        let source = SourceDescriptor::Postgres(SqlSource {
            host_url: "pg".into(),
            database: "db".into(),
            port: 5432,
            credentials: SqlCredentials {
                provider: None,
                username_key: "u".into(),
                password_key: "p".into(),
            },
            table: None,
        });
        let client = reqwest::Client::new();
        let err = resolve_source(&source, &secrets, &client).await.unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::Configuration);
    }
}
