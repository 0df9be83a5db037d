//! pgcore — the core of an asynchronous, pure-Rust PostgreSQL client.
//!
//! This crate speaks the v3 frontend/backend protocol directly over TCP, a
//! Unix domain socket, or TLS, and layers a query engine on top: prepared
//! statements with LRU caching, five execution modes, pipelined batches,
//! binary COPY, LISTEN/NOTIFY, transactions, and out-of-band cancellation.
//!
//! A connection is strictly serial; run several connections (usually under
//! an external pool) for concurrency. The mapping between PostgreSQL types
//! and host values is behind the [TypeMap] trait, with [PgTypeMap] covering
//! the builtin scalars.
//!
//! ```rust,no_run
//! use pgcore::{PgConnectOptions, PgConnection};
//!
//! # async fn example() -> Result<(), pgcore::Error> {
//! let mut conn = PgConnection::connect(
//!     &PgConnectOptions::new()
//!         .host("localhost", 5432)
//!         .username("postgres")
//!         .database("postgres"),
//! )
//! .await?;
//!
//! let row = conn.query_row("select $1::int + 1", &[41i32.into()]).await?;
//! assert_eq!(row.try_get(0)?, pgcore::PgArgument::Int4(42));
//!
//! conn.close().await?;
//! # Ok(())
//! # }
//! ```

#[macro_use]
mod error;

mod batch;
mod connection;
mod copy;
pub mod io;
pub mod message;
mod net;
mod options;
mod reader;
mod row;
mod sanitize;
mod statement;
mod statement_cache;
mod transaction;
mod type_map;
mod types;

pub use batch::{PgBatch, PgBatchResults};
pub use connection::PgConnection;
pub use copy::{PgCopyIn, PgCopyOut};
pub use error::{Error, PgDatabaseError, PgSeverity, Result};
pub use message::{CommandComplete, Notice, Notification, TransactionStatus};
pub use options::{PgConnectOptions, PgExecMode, PgSslMode, TargetSessionAttrs};
pub use reader::PgRows;
pub use row::PgRow;
pub use statement::{PgColumn, PgStatement};
pub use transaction::{IsolationLevel, PgTransaction, PgTransactionOptions};
pub use type_map::{BoxDynError, IsNull, PgArgument, PgTypeMap, TypeMap};
pub use types::{Oid, PgFormat};
