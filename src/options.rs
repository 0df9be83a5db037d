use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use crate::error::Error;

/// Options for controlling the level of protection provided for PostgreSQL
/// SSL connections, set with [`ssl_mode`][PgConnectOptions::ssl_mode].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PgSslMode {
    /// Only try a non-SSL connection.
    Disable,

    /// First try a non-SSL connection; if that fails, try an SSL connection.
    Allow,

    /// First try an SSL connection; if the server refuses, continue in
    /// plaintext.
    Prefer,

    /// Only try an SSL connection; the certificate is not verified.
    Require,

    /// Only try an SSL connection, and verify that the server certificate
    /// is issued by a trusted certificate authority.
    VerifyCa,

    /// Only try an SSL connection; verify the issuing CA and that the
    /// server host name matches the certificate.
    VerifyFull,
}

impl Default for PgSslMode {
    fn default() -> Self {
        PgSslMode::Prefer
    }
}

impl FromStr for PgSslMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Error> {
        Ok(match s {
            "disable" => PgSslMode::Disable,
            "allow" => PgSslMode::Allow,
            "prefer" => PgSslMode::Prefer,
            "require" => PgSslMode::Require,
            "verify-ca" => PgSslMode::VerifyCa,
            "verify-full" => PgSslMode::VerifyFull,

            _ => {
                return Err(err_protocol!("unknown ssl mode value: {:?}", s));
            }
        })
    }
}

/// Which servers, among the configured fallbacks, a connection may land on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TargetSessionAttrs {
    /// Any successfully authenticated server is acceptable.
    Any,

    /// The server must not be in hot-standby (read-only) mode.
    ReadWrite,
}

impl Default for TargetSessionAttrs {
    fn default() -> Self {
        TargetSessionAttrs::Any
    }
}

impl FromStr for TargetSessionAttrs {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Error> {
        Ok(match s {
            "any" => TargetSessionAttrs::Any,
            "read-write" => TargetSessionAttrs::ReadWrite,

            _ => {
                return Err(err_protocol!(
                    "unknown target_session_attrs value: {:?}",
                    s
                ));
            }
        })
    }
}

/// How a query and its arguments travel to the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PgExecMode {
    /// Prepare the statement into the server-side LRU cache, then execute
    /// by name. The default.
    CacheStatement,

    /// Cache only the statement *description* (parameter and result types);
    /// parse the unnamed statement on every execution.
    CacheDescribe,

    /// Parse, describe, and execute the unnamed statement on every call.
    /// For use behind transaction-mode poolers, where named statements and
    /// cached descriptions are unreliable.
    DescribeExec,

    /// Extended protocol with no describe round-trip: parameter types are
    /// inferred by the server and all arguments are sent in text format.
    Exec,

    /// Interpolate sanitised arguments into the SQL and send a single
    /// simple-protocol `Query`.
    SimpleProtocol,
}

impl Default for PgExecMode {
    fn default() -> Self {
        PgExecMode::CacheStatement
    }
}

/// Options and flags which can be used to configure a PostgreSQL connection,
/// built by hand: connection-string parsing belongs to a higher layer.
///
/// ```rust,no_run
/// # use pgcore::{PgConnectOptions, PgConnection, PgSslMode};
/// # async fn example() -> Result<(), pgcore::Error> {
/// let mut conn = PgConnection::connect(
///     &PgConnectOptions::new()
///         .host("replica-1", 5432)
///         .host("replica-2", 5433)
///         .username("app")
///         .password("secret")
///         .database("inventory")
///         .ssl_mode(PgSslMode::Require),
/// )
/// .await?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct PgConnectOptions {
    pub(crate) hosts: Vec<(String, u16)>,
    pub(crate) socket: Option<PathBuf>,
    pub(crate) username: String,
    pub(crate) password: Option<String>,
    pub(crate) database: Option<String>,
    pub(crate) ssl_mode: PgSslMode,
    pub(crate) ssl_root_cert: Option<PathBuf>,
    pub(crate) application_name: Option<String>,
    pub(crate) runtime_params: Vec<(String, String)>,
    pub(crate) statement_cache_capacity: usize,
    pub(crate) describe_cache_capacity: usize,
    pub(crate) default_exec_mode: PgExecMode,
    pub(crate) target_session_attrs: TargetSessionAttrs,
    pub(crate) command_timeout: Option<Duration>,
}

impl Default for PgConnectOptions {
    fn default() -> Self {
        Self::new()
    }
}

impl PgConnectOptions {
    pub fn new() -> Self {
        PgConnectOptions {
            hosts: vec![],
            socket: None,
            username: whoami::username(),
            password: None,
            database: None,
            ssl_mode: PgSslMode::default(),
            ssl_root_cert: None,
            application_name: None,
            runtime_params: vec![],
            statement_cache_capacity: 512,
            describe_cache_capacity: 512,
            default_exec_mode: PgExecMode::default(),
            target_session_attrs: TargetSessionAttrs::default(),
            command_timeout: None,
        }
    }

    /// Add a host to try, in declared order, when establishing the
    /// connection. Without any, `localhost:5432` is assumed.
    pub fn host(mut self, host: impl Into<String>, port: u16) -> Self {
        self.hosts.push((host.into(), port));
        self
    }

    /// Connect through a Unix domain socket instead of TCP. Takes the
    /// *directory* conventionally, but any path is passed through verbatim.
    pub fn socket(mut self, path: impl AsRef<Path>) -> Self {
        self.socket = Some(path.as_ref().to_path_buf());
        self
    }

    pub fn username(mut self, username: impl Into<String>) -> Self {
        self.username = username.into();
        self
    }

    pub fn password(mut self, password: impl Into<String>) -> Self {
        self.password = Some(password.into());
        self
    }

    pub fn database(mut self, database: impl Into<String>) -> Self {
        self.database = Some(database.into());
        self
    }

    pub fn ssl_mode(mut self, mode: PgSslMode) -> Self {
        self.ssl_mode = mode;
        self
    }

    /// Sets the file of the PEM-encoded root certificate for `verify-ca`
    /// and `verify-full`.
    pub fn ssl_root_cert(mut self, cert: impl AsRef<Path>) -> Self {
        self.ssl_root_cert = Some(cert.as_ref().to_path_buf());
        self
    }

    pub fn application_name(mut self, application_name: impl Into<String>) -> Self {
        self.application_name = Some(application_name.into());
        self
    }

    /// Forward an arbitrary runtime parameter in the startup packet
    /// (e.g. `search_path`, `options`).
    pub fn runtime_param(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.runtime_params.push((name.into(), value.into()));
        self
    }

    /// Capacity of the prepared-statement LRU cache. Zero disables server-
    /// side statement caching. Defaults to `512`.
    pub fn statement_cache_capacity(mut self, capacity: usize) -> Self {
        self.statement_cache_capacity = capacity;
        self
    }

    /// Capacity of the statement-description LRU cache used by
    /// [`PgExecMode::CacheDescribe`]. Defaults to `512`.
    pub fn describe_cache_capacity(mut self, capacity: usize) -> Self {
        self.describe_cache_capacity = capacity;
        self
    }

    pub fn default_exec_mode(mut self, mode: PgExecMode) -> Self {
        self.default_exec_mode = mode;
        self
    }

    pub fn target_session_attrs(mut self, attrs: TargetSessionAttrs) -> Self {
        self.target_session_attrs = attrs;
        self
    }

    /// Deadline applied to every command once it is on the wire. A command
    /// exceeding it fails with [`Error::Timeout`] and poisons the connection
    /// until [`recover_from_timeout`][crate::PgConnection::recover_from_timeout]
    /// succeeds.
    pub fn command_timeout(mut self, timeout: Duration) -> Self {
        self.command_timeout = Some(timeout);
        self
    }

    pub(crate) fn hosts_or_default(&self) -> Vec<(String, u16)> {
        if self.hosts.is_empty() {
            vec![("localhost".to_owned(), 5432)]
        } else {
            self.hosts.clone()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let options = PgConnectOptions::new();

        assert_eq!(options.statement_cache_capacity, 512);
        assert_eq!(options.describe_cache_capacity, 512);
        assert_eq!(options.default_exec_mode, PgExecMode::CacheStatement);
        assert_eq!(options.ssl_mode, PgSslMode::Prefer);
        assert_eq!(options.hosts_or_default(), [("localhost".to_owned(), 5432)]);
    }

    #[test]
    fn test_ssl_mode_from_str() {
        assert_eq!("verify-ca".parse::<PgSslMode>().unwrap(), PgSslMode::VerifyCa);
        assert!("sslmode-of-the-future".parse::<PgSslMode>().is_err());
    }
}
