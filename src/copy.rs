use bytes::{BufMut, Bytes};

use crate::connection::{ConnectionStatus, PgConnection};
use crate::error::Error;
use crate::message::{
    CommandComplete, CopyData, CopyDone, CopyFail, CopyResponse, MessageFormat, Query,
};
use crate::sanitize::quote_identifier;
use crate::type_map::{BoxDynError, IsNull, PgArgument};
use crate::types::PgFormat;

// the binary COPY signature: "PGCOPY\n\xff\r\n\0"
const COPY_SIGNATURE: &[u8] = b"PGCOPY\n\xff\r\n\0";

// buffered copy data is sent whenever it grows past this
const COPY_FLUSH_THRESHOLD: usize = 60 * 1024;

impl PgConnection {
    /// Issue a caller-written `COPY ... FROM STDIN ...` statement and
    /// transition the connection to streaming data to the server.
    ///
    /// [`PgCopyIn::finish`] or [`PgCopyIn::abort`] must be called. A handle
    /// that is dropped instead queues a `CopyFail` and leaves the connection
    /// busy; further operations fail with
    /// [`Error::ConnectionBusy`][crate::Error::ConnectionBusy] until
    /// [`recover_from_timeout`][crate::PgConnection::recover_from_timeout]
    /// delivers the failure and drains the server's reply.
    pub async fn copy_in_raw(&mut self, statement: &str) -> Result<PgCopyIn<'_>, Error> {
        self.ensure_idle()?;
        self.wait_until_ready().await?;

        self.stream.write(Query(statement));
        self.pending_ready_for_query_count += 1;
        self.status = ConnectionStatus::Busy;
        self.flush_stream().await?;

        let response = match self
            .stream
            .recv_expect::<CopyResponse>(MessageFormat::CopyInResponse)
            .await
        {
            Ok(response) => response,

            Err(error) => {
                self.mark_fatal(&error);
                if !self.is_closed() {
                    self.wait_until_ready().await?;
                }
                return Err(error);
            }
        };

        Ok(PgCopyIn {
            conn: Some(self),
            response,
        })
    }

    /// Issue a caller-written `COPY ... TO STDOUT ...` statement and stream
    /// the raw data chunks the server produces.
    pub async fn copy_out_raw(&mut self, statement: &str) -> Result<PgCopyOut<'_>, Error> {
        self.ensure_idle()?;
        self.wait_until_ready().await?;

        self.stream.write(Query(statement));
        self.pending_ready_for_query_count += 1;
        self.status = ConnectionStatus::Busy;
        self.flush_stream().await?;

        let response = match self
            .stream
            .recv_expect::<CopyResponse>(MessageFormat::CopyOutResponse)
            .await
        {
            Ok(response) => response,

            Err(error) => {
                self.mark_fatal(&error);
                if !self.is_closed() {
                    self.wait_until_ready().await?;
                }
                return Err(error);
            }
        };

        Ok(PgCopyOut {
            conn: self,
            response,
            command_tag: None,
            done: false,
        })
    }

    /// Bulk-load rows into `table` through the binary COPY sub-protocol.
    ///
    /// The per-column types are learned by describing
    /// `select <columns> from <table>` first, and every value is encoded in
    /// binary format through the connection's type map. Returns the number
    /// of rows the server reports as copied.
    pub async fn copy_from<I>(
        &mut self,
        table: &str,
        columns: &[&str],
        source: I,
    ) -> Result<u64, Error>
    where
        I: IntoIterator<Item = Result<Vec<PgArgument>, BoxDynError>>,
    {
        self.ensure_idle()?;
        self.wait_until_ready().await?;

        let column_list = columns
            .iter()
            .map(|c| quote_identifier(c))
            .collect::<Vec<_>>()
            .join(", ");

        // learn the column OIDs up front; the CopyInResponse itself only
        // reports format codes
        let probe_sql = format!(
            "select {} from {}",
            column_list,
            quote_identifier(table)
        );
        let description = self.describe_statement("", &probe_sql).await?;

        let column_types: Vec<_> = description.columns.iter().map(|c| c.type_id).collect();
        let type_map = std::sync::Arc::clone(&self.type_map);

        let mut copy = self
            .copy_in_raw(&format!(
                "copy {} ( {} ) from stdin binary;",
                quote_identifier(table),
                column_list
            ))
            .await?;

        let mut buf = Vec::with_capacity(COPY_FLUSH_THRESHOLD + 1024);

        // header: signature, flags, header-extension length
        buf.extend_from_slice(COPY_SIGNATURE);
        buf.put_i32(0);
        buf.put_i32(0);

        let mut rows: u64 = 0;

        for row in source {
            let row = match row {
                Ok(row) => row,

                Err(error) => {
                    copy.abort("error reading from the row source").await?;
                    return Err(Error::Encode {
                        index: rows as usize,
                        source: error,
                    });
                }
            };

            if row.len() != column_types.len() {
                copy.abort("row does not match the copied column list").await?;
                return Err(Error::ArgumentCount {
                    expected: column_types.len(),
                    given: row.len(),
                });
            }

            buf.put_i16(row.len() as i16);

            for (index, (value, &oid)) in row.iter().zip(&column_types).enumerate() {
                let encoded = encode_copy_value(&mut buf, |field| {
                    type_map.encode(oid, PgFormat::Binary, value, field)
                });

                if let Err(source) = encoded {
                    copy.abort("error encoding a value for copy").await?;
                    return Err(Error::Encode { index, source });
                }
            }

            rows += 1;

            if buf.len() > COPY_FLUSH_THRESHOLD {
                copy.send(&buf).await?;
                buf.clear();
            }
        }

        // trailer
        buf.put_i16(-1);
        copy.send(&buf).await?;

        let tag = copy.finish().await?;

        Ok(tag.rows_affected())
    }
}

fn encode_copy_value<F>(buf: &mut Vec<u8>, f: F) -> Result<(), BoxDynError>
where
    F: FnOnce(&mut Vec<u8>) -> Result<IsNull, BoxDynError>,
{
    let offset = buf.len();
    buf.extend_from_slice(&[0; 4]);

    let is_null = f(buf)?;

    let length = if let IsNull::Yes = is_null {
        -1
    } else {
        (buf.len() - offset - 4) as i32
    };

    buf[offset..offset + 4].copy_from_slice(&length.to_be_bytes());

    Ok(())
}

/// A connection in streaming `COPY FROM STDIN` mode.
#[must_use = "either `finish` or `abort` must be called"]
pub struct PgCopyIn<'c> {
    conn: Option<&'c mut PgConnection>,
    response: CopyResponse,
}

impl PgCopyIn<'_> {
    fn conn(&mut self) -> &mut PgConnection {
        self.conn.as_deref_mut().expect("PgCopyIn: conn taken")
    }

    /// `true` when the server expects text or CSV data.
    pub fn is_textual(&self) -> bool {
        self.response.format == 0
    }

    /// The number of columns the server expects per row.
    pub fn num_columns(&self) -> usize {
        self.response.num_columns()
    }

    /// Send one chunk of COPY data; chunks need not align with rows.
    pub async fn send(&mut self, data: &[u8]) -> Result<(), Error> {
        let conn = self.conn();

        conn.stream.write(CopyData(data));

        if conn.stream.wbuf_len() > COPY_FLUSH_THRESHOLD {
            conn.flush_stream().await?;
        }

        Ok(())
    }

    /// Signal the end of the data stream and collect the server's verdict.
    pub async fn finish(mut self) -> Result<CommandComplete, Error> {
        let conn = self.conn.take().expect("PgCopyIn: conn taken");

        conn.stream.write(CopyDone);
        conn.flush_stream().await?;

        let tag = match conn
            .stream
            .recv_expect::<CommandComplete>(MessageFormat::CommandComplete)
            .await
        {
            Ok(tag) => tag,

            Err(error) => {
                conn.mark_fatal(&error);
                if !conn.is_closed() {
                    conn.wait_until_ready().await?;
                }
                return Err(error);
            }
        };

        conn.wait_until_ready().await?;

        Ok(tag)
    }

    /// Abort the COPY; the given message lands in the server log. The
    /// server is expected to answer with an error, which is swallowed.
    pub async fn abort(mut self, message: &str) -> Result<(), Error> {
        let conn = self.conn.take().expect("PgCopyIn: conn taken");

        conn.stream.write(CopyFail::new(message));
        conn.flush_stream().await?;

        match conn.stream.recv().await {
            Ok(message) => {
                let error = err_protocol!(
                    "expected ErrorResponse after CopyFail, got: {:?}",
                    message.format
                );
                conn.mark_fatal(&error);
                Err(error)
            }

            // 57014 is "query canceled", the expected acknowledgement
            Err(Error::Database(e)) if e.code() == "57014" => {
                conn.wait_until_ready().await?;
                Ok(())
            }

            Err(error) => {
                conn.mark_fatal(&error);
                if let Error::Database(_) = &error {
                    conn.wait_until_ready().await?;
                    // an unrelated server error still ended the copy
                    return Err(error);
                }
                Err(error)
            }
        }
    }
}

impl Drop for PgCopyIn<'_> {
    fn drop(&mut self) {
        if let Some(conn) = self.conn.take() {
            // queue the abort; the next operation flushes it and drains the
            // server's error reply
            conn.stream.write(CopyFail::new(
                "PgCopyIn dropped without calling finish() or abort()",
            ));
        }
    }
}

/// A connection in streaming `COPY TO STDOUT` mode.
pub struct PgCopyOut<'c> {
    conn: &'c mut PgConnection,
    response: CopyResponse,
    command_tag: Option<CommandComplete>,
    done: bool,
}

impl PgCopyOut<'_> {
    /// `true` when the data arrives in text or CSV format.
    pub fn is_textual(&self) -> bool {
        self.response.format == 0
    }

    pub fn num_columns(&self) -> usize {
        self.response.num_columns()
    }

    /// The next chunk of COPY data, or `None` once the stream is complete
    /// and the connection released.
    pub async fn next(&mut self) -> Result<Option<Bytes>, Error> {
        if self.done {
            return Ok(None);
        }

        loop {
            let message = match self.conn.stream.recv().await {
                Ok(message) => message,

                Err(error) => {
                    self.conn.mark_fatal(&error);

                    if !self.conn.is_closed() {
                        self.conn.wait_until_ready().await?;
                    }

                    self.done = true;
                    return Err(error);
                }
            };

            match message.format {
                MessageFormat::CopyData => {
                    return Ok(Some(message.decode::<CopyData<Bytes>>()?.0));
                }

                MessageFormat::CopyDone => {
                    self.command_tag = Some(
                        self.conn
                            .stream
                            .recv_expect(MessageFormat::CommandComplete)
                            .await?,
                    );

                    self.conn.wait_until_ready().await?;
                    self.done = true;

                    return Ok(None);
                }

                format => {
                    let error =
                        err_protocol!("unexpected message during copy out: {:?}", format);
                    self.conn.mark_fatal(&error);
                    return Err(error);
                }
            }
        }
    }

    /// The command tag, available after the stream has been fully read.
    pub fn command_tag(&self) -> Option<&CommandComplete> {
        self.command_tag.as_ref()
    }
}
