use std::sync::Arc;

use crate::connection::PgConnection;
use crate::error::Error;
use crate::message::{CommandComplete, DataRow, MessageFormat, RowDescription};
use crate::row::PgRow;
use crate::statement::{PgColumn, PgStatement};

/// The consumption state of one command's reply stream, independent of who
/// owns the connection. [`PgRows`] wraps one of these; batches keep one per
/// queued query.
pub(crate) struct ResultCursor {
    pub(crate) statement: Arc<PgStatement>,

    pub(crate) command_tag: Option<CommandComplete>,

    // a non-fatal server error is held here until `finish`, after the
    // stream has been drained past it
    pub(crate) error: Option<Error>,

    pub(crate) concluded: bool,
}

impl ResultCursor {
    pub(crate) fn new(statement: Arc<PgStatement>) -> Self {
        ResultCursor {
            statement,
            command_tag: None,
            error: None,
            concluded: false,
        }
    }

    /// Consume messages until the next row of this result, its conclusion,
    /// or a fatal error.
    pub(crate) async fn next_row(
        &mut self,
        conn: &mut PgConnection,
    ) -> Result<Option<PgRow>, Error> {
        if self.concluded {
            return Ok(None);
        }

        loop {
            let message = match conn.stream.recv().await {
                Ok(message) => message,

                Err(error @ Error::Database(_)) => {
                    conn.mark_fatal(&error);

                    if conn.is_closed() {
                        self.concluded = true;
                        return Err(error);
                    }

                    // served after the stream is drained, from `finish`
                    self.error.get_or_insert(error);
                    self.concluded = true;

                    return Ok(None);
                }

                Err(error) => {
                    conn.mark_fatal(&error);
                    self.concluded = true;
                    return Err(error);
                }
            };

            match message.format {
                // acknowledgements for the commands that set this result up
                MessageFormat::ParseComplete
                | MessageFormat::BindComplete
                | MessageFormat::CloseComplete => {}

                MessageFormat::NoData => {
                    // this command returns no rows
                }

                MessageFormat::RowDescription => {
                    // a *fresh* description of the rows about to follow;
                    // overrides whatever the statement cache believed
                    let description: RowDescription = message.decode()?;

                    self.statement = Arc::new(PgStatement {
                        columns: description.fields,
                        ..(*self.statement).clone()
                    });
                }

                MessageFormat::DataRow => {
                    let data: DataRow = message.decode()?;

                    if data.len() != self.statement.columns.len() {
                        let error = err_protocol!(
                            "received DataRow with {} values, but the row description has {} \
                             columns",
                            data.len(),
                            self.statement.columns.len()
                        );

                        conn.mark_fatal(&error);
                        self.concluded = true;

                        return Err(error);
                    }

                    return Ok(Some(PgRow {
                        data,
                        statement: Arc::clone(&self.statement),
                        type_map: Arc::clone(&conn.type_map),
                    }));
                }

                MessageFormat::CommandComplete => {
                    self.command_tag = Some(message.decode()?);
                    self.concluded = true;

                    return Ok(None);
                }

                MessageFormat::EmptyQueryResponse | MessageFormat::PortalSuspended => {
                    self.concluded = true;

                    return Ok(None);
                }

                MessageFormat::ReadyForQuery => {
                    // a result that ended without a terminator; tolerated so
                    // that an abandoned stream can still resynchronise
                    conn.handle_ready_for_query(message)?;
                    self.concluded = true;

                    return Ok(None);
                }

                format => {
                    let error = err_protocol!("unexpected message in result stream: {:?}", format);

                    conn.mark_fatal(&error);
                    self.concluded = true;

                    return Err(error);
                }
            }
        }
    }

    /// Drain the remainder of this result and surface its outcome.
    pub(crate) async fn finish(
        &mut self,
        conn: &mut PgConnection,
        release: bool,
    ) -> Result<CommandComplete, Error> {
        while self.next_row(conn).await?.is_some() {}

        if release {
            conn.wait_until_ready().await?;
        }

        if let Some(error) = self.error.take() {
            return Err(error);
        }

        Ok(self
            .command_tag
            .clone()
            .unwrap_or_else(|| CommandComplete::new("")))
    }
}

/// The streaming result of one query: rows are decoded on demand as they
/// are received.
///
/// The connection is unusable for anything else until the reader is
/// [`close`][PgRows::close]d. A reader that is *dropped* instead leaves the
/// connection busy: further operations fail with
/// [`Error::ConnectionBusy`][crate::Error::ConnectionBusy] until
/// [`recover_from_timeout`][crate::PgConnection::recover_from_timeout]
/// drains the abandoned stream.
#[must_use = "the connection stays busy until `close` is called"]
pub struct PgRows<'c> {
    pub(crate) conn: &'c mut PgConnection,
    pub(crate) cursor: ResultCursor,

    // whether closing this reader consumes the trailing ReadyForQuery and
    // returns the connection to idle
    pub(crate) release: bool,
}

impl PgRows<'_> {
    /// Fetch the next row, or `None` once the result is complete.
    pub async fn next(&mut self) -> Result<Option<PgRow>, Error> {
        self.cursor.next_row(self.conn).await
    }

    /// The description of the result columns. Not meaningful until the
    /// server's row description has arrived, i.e. before the first call to
    /// [`next`][Self::next].
    pub fn columns(&self) -> &[PgColumn] {
        &self.cursor.statement.columns
    }

    /// The command tag, available once the result has concluded.
    pub fn command_tag(&self) -> Option<&CommandComplete> {
        self.cursor.command_tag.as_ref()
    }

    /// Drain any remaining rows, release the connection, and report the
    /// command's outcome: its tag, or the error the server sent mid-stream.
    pub async fn close(mut self) -> Result<CommandComplete, Error> {
        let release = self.release;

        self.cursor.finish(self.conn, release).await
    }
}
