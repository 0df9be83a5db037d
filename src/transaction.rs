use std::fmt::Write;
use std::ops::{Deref, DerefMut};

use crate::connection::PgConnection;
use crate::error::Error;
use crate::message::Query;

/// Transaction characteristics for [`begin_with`][PgConnection::begin_with].
#[derive(Debug, Clone, Copy, Default)]
pub struct PgTransactionOptions {
    isolation: Option<IsolationLevel>,
    read_only: Option<bool>,
    deferrable: Option<bool>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IsolationLevel {
    ReadUncommitted,
    ReadCommitted,
    RepeatableRead,
    Serializable,
}

impl IsolationLevel {
    fn as_sql(self) -> &'static str {
        match self {
            IsolationLevel::ReadUncommitted => "READ UNCOMMITTED",
            IsolationLevel::ReadCommitted => "READ COMMITTED",
            IsolationLevel::RepeatableRead => "REPEATABLE READ",
            IsolationLevel::Serializable => "SERIALIZABLE",
        }
    }
}

impl PgTransactionOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn isolation(mut self, level: IsolationLevel) -> Self {
        self.isolation = Some(level);
        self
    }

    pub fn read_only(mut self, read_only: bool) -> Self {
        self.read_only = Some(read_only);
        self
    }

    pub fn deferrable(mut self, deferrable: bool) -> Self {
        self.deferrable = Some(deferrable);
        self
    }
}

// savepoint names carry the depth so that nested handles stay disjoint
fn begin_sql(depth: usize, options: &PgTransactionOptions) -> String {
    if depth > 0 {
        return format!("SAVEPOINT _pgcore_savepoint_{}", depth);
    }

    let mut sql = String::from("BEGIN");

    if let Some(isolation) = options.isolation {
        // unwrap: fmt::Write to a String is infallible
        write!(sql, " ISOLATION LEVEL {}", isolation.as_sql()).unwrap();
    }

    if let Some(read_only) = options.read_only {
        sql.push_str(if read_only { " READ ONLY" } else { " READ WRITE" });
    }

    if let Some(deferrable) = options.deferrable {
        sql.push_str(if deferrable {
            " DEFERRABLE"
        } else {
            " NOT DEFERRABLE"
        });
    }

    sql
}

fn commit_sql(depth: usize) -> String {
    if depth == 0 {
        "COMMIT".to_owned()
    } else {
        format!("RELEASE SAVEPOINT _pgcore_savepoint_{}", depth)
    }
}

fn rollback_sql(depth: usize) -> String {
    if depth == 0 {
        "ROLLBACK".to_owned()
    } else {
        format!("ROLLBACK TO SAVEPOINT _pgcore_savepoint_{}", depth)
    }
}

impl PgConnection {
    /// Begin a transaction (or, when already inside one, a savepoint).
    pub async fn begin(&mut self) -> Result<PgTransaction<'_>, Error> {
        self.begin_with(PgTransactionOptions::default()).await
    }

    /// Begin a transaction with explicit characteristics. The options are
    /// ignored for savepoints, which have none.
    pub async fn begin_with(
        &mut self,
        options: PgTransactionOptions,
    ) -> Result<PgTransaction<'_>, Error> {
        let depth = self.transaction_depth;

        self.exec_simple(&begin_sql(depth, &options)).await?;
        self.transaction_depth = depth + 1;

        Ok(PgTransaction {
            conn: self,
            depth,
            open: true,
        })
    }
}

/// An in-progress transaction (or savepoint) handle.
///
/// The handle dereferences to the connection, so queries run on it
/// directly. [`commit`][Self::commit] and [`rollback`][Self::rollback]
/// consume the handle; a handle dropped while open queues a rollback that
/// the next operation on the connection delivers.
#[must_use = "a dropped transaction rolls back"]
pub struct PgTransaction<'c> {
    conn: &'c mut PgConnection,

    // the depth *before* this transaction began
    depth: usize,

    open: bool,
}

impl PgTransaction<'_> {
    /// Begin a nested transaction via `SAVEPOINT`.
    pub async fn savepoint(&mut self) -> Result<PgTransaction<'_>, Error> {
        self.conn.begin().await
    }

    /// Make every change of this transaction durable.
    pub async fn commit(mut self) -> Result<(), Error> {
        self.open = false;
        self.conn.transaction_depth = self.depth;
        self.conn.exec_simple(&commit_sql(self.depth)).await?;

        Ok(())
    }

    /// Discard every change made inside this transaction.
    pub async fn rollback(mut self) -> Result<(), Error> {
        self.open = false;
        self.conn.transaction_depth = self.depth;
        self.conn.exec_simple(&rollback_sql(self.depth)).await?;

        Ok(())
    }
}

impl Drop for PgTransaction<'_> {
    fn drop(&mut self) {
        if self.open {
            // queue the rollback; the next operation on the connection
            // flushes it and consumes the reply
            self.conn.transaction_depth = self.depth;
            self.conn.stream.write(Query(&rollback_sql(self.depth)));
            self.conn.pending_ready_for_query_count += 1;
        }
    }
}

impl Deref for PgTransaction<'_> {
    type Target = PgConnection;

    fn deref(&self) -> &Self::Target {
        self.conn
    }
}

impl DerefMut for PgTransaction<'_> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.conn
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_begin_sql() {
        assert_eq!(begin_sql(0, &PgTransactionOptions::default()), "BEGIN");

        assert_eq!(
            begin_sql(
                0,
                &PgTransactionOptions::new()
                    .isolation(IsolationLevel::Serializable)
                    .read_only(true)
                    .deferrable(true),
            ),
            "BEGIN ISOLATION LEVEL SERIALIZABLE READ ONLY DEFERRABLE"
        );

        assert_eq!(
            begin_sql(2, &PgTransactionOptions::default()),
            "SAVEPOINT _pgcore_savepoint_2"
        );
    }

    #[test]
    fn test_commit_and_rollback_sql() {
        assert_eq!(commit_sql(0), "COMMIT");
        assert_eq!(commit_sql(1), "RELEASE SAVEPOINT _pgcore_savepoint_1");
        assert_eq!(rollback_sql(0), "ROLLBACK");
        assert_eq!(rollback_sql(3), "ROLLBACK TO SAVEPOINT _pgcore_savepoint_3");
    }
}
