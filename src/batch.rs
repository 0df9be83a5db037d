use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use crate::connection::{ConnectionStatus, PgConnection};
use crate::error::Error;
use crate::message::{Bind, CommandComplete, Describe, Execute, Parse, Query, Sync};
use crate::options::PgExecMode;
use crate::reader::ResultCursor;
use crate::row::PgRow;
use crate::sanitize;
use crate::statement::{PgColumn, PgStatement};
use crate::type_map::PgArgument;

/// A set of queries accumulated for one pipelined round trip.
#[derive(Debug, Default)]
pub struct PgBatch {
    pub(crate) items: Vec<(String, Vec<PgArgument>)>,
}

impl PgBatch {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a query; results come back in queue order.
    pub fn queue(&mut self, sql: impl Into<String>, args: Vec<PgArgument>) {
        self.items.push((sql.into(), args));
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

impl PgConnection {
    /// Send every queued query in one client→server round trip and return
    /// the handle that surfaces the per-query results, in order.
    ///
    /// Statements not yet prepared are prepared first (through the
    /// statement cache when the mode uses it); the execution phase is a
    /// single buffered write closed by one `Sync`. The flush drains
    /// concurrently, so a batch larger than the socket buffers cannot
    /// deadlock against the server's replies.
    pub async fn send_batch<'c>(&'c mut self, batch: &PgBatch) -> Result<PgBatchResults<'c>, Error> {
        self.ensure_idle()?;
        self.wait_until_ready().await?;

        let mode = self.resolve_exec_mode(self.default_exec_mode);

        if mode == PgExecMode::SimpleProtocol {
            return self.send_batch_simple(batch).await;
        }

        // phase one: make sure every distinct statement is described, so
        // that arguments can be encoded before anything is executed
        let mut one_shot: HashMap<&str, Arc<PgStatement>> = HashMap::new();

        for (sql, _) in &batch.items {
            match mode {
                PgExecMode::CacheStatement => {
                    self.get_or_prepare(sql).await?;
                }

                PgExecMode::CacheDescribe => {
                    self.get_or_describe(sql).await?;
                }

                PgExecMode::DescribeExec => {
                    if !one_shot.contains_key(sql.as_str()) {
                        let statement = self.describe_statement("", sql).await?;
                        one_shot.insert(sql, statement);
                    }
                }

                // the server infers everything; nothing to describe
                PgExecMode::Exec => {}

                PgExecMode::SimpleProtocol => unreachable!(),
            }
        }

        // phase two: emit the whole pipeline, then a single Sync
        let mut cursors = VecDeque::with_capacity(batch.items.len());

        for (sql, args) in &batch.items {
            let statement = match mode {
                PgExecMode::CacheStatement => self.get_or_prepare(sql).await?,
                PgExecMode::CacheDescribe => self.get_or_describe(sql).await?,
                PgExecMode::DescribeExec => Arc::clone(&one_shot[sql.as_str()]),
                PgExecMode::Exec => Arc::new(PgStatement::unnamed(sql)),
                PgExecMode::SimpleProtocol => unreachable!(),
            };

            let (formats, num_params, params) = if mode == PgExecMode::Exec {
                self.encode_params_text(args)?
            } else {
                self.encode_params(&statement, args)?
            };

            let result_formats: Vec<_> = statement
                .columns
                .iter()
                .map(|c| self.type_map.preferred_format(c.type_id))
                .collect();

            if mode != PgExecMode::CacheStatement {
                self.stream.write(Parse {
                    statement: "",
                    query: sql,
                    param_types: &[],
                });
            }

            self.stream.write(Bind {
                portal: "",
                statement: &statement.name,
                formats: &formats,
                num_params,
                params: &params,
                result_formats: &result_formats,
            });
            self.stream.write(Describe::Portal(""));
            self.stream.write(Execute {
                portal: "",
                limit: 0,
            });

            cursors.push_back(ResultCursor::new(statement));
        }

        self.stream.write(Sync);

        self.pending_ready_for_query_count += 1;
        self.status = ConnectionStatus::Busy;
        self.flush_stream_with_drain().await?;

        Ok(PgBatchResults {
            conn: self,
            cursors,
        })
    }

    // the simple-protocol rendition: one concatenated Query message, one
    // result per statement
    async fn send_batch_simple<'c>(
        &'c mut self,
        batch: &PgBatch,
    ) -> Result<PgBatchResults<'c>, Error> {
        self.check_simple_protocol()?;

        let mut sql = String::new();
        let mut cursors = VecDeque::with_capacity(batch.items.len());

        for (item_sql, args) in &batch.items {
            if !sql.is_empty() {
                sql.push_str("; ");
            }

            sql.push_str(&sanitize::interpolate(item_sql, args)?);
            cursors.push_back(ResultCursor::new(PgStatement::empty()));
        }

        self.stream.write(Query(&sql));

        self.pending_ready_for_query_count += 1;
        self.status = ConnectionStatus::Busy;
        self.flush_stream_with_drain().await?;

        Ok(PgBatchResults {
            conn: self,
            cursors,
        })
    }
}

/// The results of a [PgBatch], delivered strictly in queue order.
///
/// Each queued query must be consumed with one of [`exec`][Self::exec],
/// [`query_row`][Self::query_row], or [`fetch_all`][Self::fetch_all];
/// [`close`][Self::close] drains whatever was not consumed and releases
/// the connection. Dropping instead leaves the connection busy until
/// [`recover_from_timeout`][crate::PgConnection::recover_from_timeout].
#[must_use = "the connection stays busy until `close` is called"]
pub struct PgBatchResults<'c> {
    conn: &'c mut PgConnection,
    cursors: VecDeque<ResultCursor>,
}

impl PgBatchResults<'_> {
    fn next_cursor(&mut self) -> Result<ResultCursor, Error> {
        self.cursors
            .pop_front()
            .ok_or_else(|| err_protocol!("no more results in this batch"))
    }

    /// The number of queued queries not yet consumed.
    pub fn remaining(&self) -> usize {
        self.cursors.len()
    }

    /// Consume the next result, discarding rows, and return its tag.
    pub async fn exec(&mut self) -> Result<CommandComplete, Error> {
        let mut cursor = self.next_cursor()?;

        cursor.finish(self.conn, false).await
    }

    /// Consume the next result, expecting at least one row.
    pub async fn query_row(&mut self) -> Result<PgRow, Error> {
        let mut cursor = self.next_cursor()?;

        let row = cursor.next_row(self.conn).await?;
        cursor.finish(self.conn, false).await?;

        row.ok_or(Error::RowNotFound)
    }

    /// Consume the next result, collecting every row.
    pub async fn fetch_all(&mut self) -> Result<Vec<PgRow>, Error> {
        let mut cursor = self.next_cursor()?;
        let mut rows = Vec::new();

        while let Some(row) = cursor.next_row(self.conn).await? {
            rows.push(row);
        }

        cursor.finish(self.conn, false).await?;

        Ok(rows)
    }

    /// Columns of the upcoming result, as far as they are known before
    /// execution (cached modes only).
    pub fn columns(&self) -> Option<&[PgColumn]> {
        self.cursors.front().map(|c| c.statement.columns.as_slice())
    }

    /// Drain all unconsumed results and release the connection. The first
    /// stored server error, if any result carried one, is surfaced here.
    pub async fn close(mut self) -> Result<(), Error> {
        let mut first_error = None;

        while let Some(mut cursor) = self.cursors.pop_front() {
            match cursor.finish(self.conn, false).await {
                Ok(_) => {}

                Err(error) => {
                    if error.is_fatal() {
                        return Err(error);
                    }

                    first_error.get_or_insert(error);
                }
            }
        }

        self.conn.wait_until_ready().await?;

        match first_error {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }
}
