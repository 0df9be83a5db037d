use std::sync::Arc;

use bytes::BufMut;
use smallvec::SmallVec;

use crate::connection::{ConnectionStatus, PgConnection};
use crate::error::Error;
use crate::message::{
    Bind, Close, CommandComplete, Describe, Execute, MessageFormat, ParameterDescription, Parse,
    Query, RowDescription, Sync,
};
use crate::options::PgExecMode;
use crate::reader::{PgRows, ResultCursor};
use crate::row::PgRow;
use crate::sanitize;
use crate::statement::PgStatement;
use crate::type_map::{IsNull, PgArgument};
use crate::types::PgFormat;

// per-parameter format codes, the encoded parameter buffer, and the
// parameter count
type EncodedParams = (SmallVec<[PgFormat; 6]>, i16, Vec<u8>);

impl PgConnection {
    /// Execute a query, discarding any rows, and return its command tag.
    pub async fn exec(&mut self, sql: &str, args: &[PgArgument]) -> Result<CommandComplete, Error> {
        self.query(sql, args).await?.close().await
    }

    /// Execute a query and stream its rows.
    pub async fn query<'c>(
        &'c mut self,
        sql: &str,
        args: &[PgArgument],
    ) -> Result<PgRows<'c>, Error> {
        self.query_with(sql, args, self.default_exec_mode).await
    }

    /// Execute a query expecting exactly at least one row; the first row is
    /// returned and the rest are discarded.
    pub async fn query_row(&mut self, sql: &str, args: &[PgArgument]) -> Result<PgRow, Error> {
        let mut rows = self.query(sql, args).await?;

        match rows.next().await {
            Ok(Some(row)) => {
                rows.close().await?;
                Ok(row)
            }

            Ok(None) => {
                rows.close().await?;
                Err(Error::RowNotFound)
            }

            Err(error) => Err(error),
        }
    }

    /// Execute a query under an explicit [execution mode][PgExecMode],
    /// overriding the connection default.
    pub async fn query_with<'c>(
        &'c mut self,
        sql: &str,
        args: &[PgArgument],
        mode: PgExecMode,
    ) -> Result<PgRows<'c>, Error> {
        self.ensure_idle()?;
        self.wait_until_ready().await?;

        // a disabled cache degrades the cached modes to their uncached
        // equivalent rather than leaking statements server-side
        let mode = self.resolve_exec_mode(mode);

        let statement = match mode {
            PgExecMode::SimpleProtocol => {
                return self.query_simple(sql, args).await;
            }

            PgExecMode::CacheStatement => self.get_or_prepare(sql).await?,
            PgExecMode::CacheDescribe => self.get_or_describe(sql).await?,
            PgExecMode::DescribeExec => self.describe_statement("", sql).await?,

            PgExecMode::Exec => Arc::new(PgStatement::unnamed(sql)),
        };

        // modes that parse the unnamed statement do so in the same
        // round-trip as the execution; `CacheStatement` reuses the
        // server-side named statement instead
        let parse = match mode {
            PgExecMode::CacheStatement => None,
            _ => Some(Parse {
                statement: "",
                query: sql,
                param_types: &[],
            }),
        };

        let (formats, num_params, params) = if mode == PgExecMode::Exec {
            // with no description to consult, every argument travels as text
            // and the server infers the parameter types
            self.encode_params_text(args)?
        } else {
            self.encode_params(&statement, args)?
        };

        let result_formats: SmallVec<[PgFormat; 6]> = statement
            .columns
            .iter()
            .map(|c| self.type_map.preferred_format(c.type_id))
            .collect();

        if let Some(parse) = parse {
            self.stream.write(parse);
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
        self.stream.write(Sync);

        self.pending_ready_for_query_count += 1;
        self.status = ConnectionStatus::Busy;
        self.flush_stream().await?;

        Ok(PgRows {
            cursor: ResultCursor::new(statement),
            conn: self,
            release: true,
        })
    }

    async fn query_simple<'c>(
        &'c mut self,
        sql: &str,
        args: &[PgArgument],
    ) -> Result<PgRows<'c>, Error> {
        self.check_simple_protocol()?;

        let sql = sanitize::interpolate(sql, args)?;

        self.stream.write(Query(&sql));
        self.pending_ready_for_query_count += 1;
        self.status = ConnectionStatus::Busy;
        self.flush_stream().await?;

        Ok(PgRows {
            cursor: ResultCursor::new(PgStatement::empty()),
            conn: self,
            release: true,
        })
    }

    /// Run a complete SQL string through the simple protocol, with no
    /// argument interpolation, discarding any rows.
    pub(crate) async fn exec_simple(&mut self, sql: &str) -> Result<CommandComplete, Error> {
        self.ensure_idle()?;
        self.wait_until_ready().await?;

        self.stream.write(Query(sql));
        self.pending_ready_for_query_count += 1;
        self.status = ConnectionStatus::Busy;
        self.flush_stream().await?;

        let mut cursor = ResultCursor::new(PgStatement::empty());

        cursor.finish(self, true).await
    }

    /// Subscribe this session to a notification channel.
    pub async fn listen(&mut self, channel: &str) -> Result<(), Error> {
        self.exec_simple(&format!("LISTEN {}", crate::sanitize::quote_identifier(channel)))
            .await?;

        Ok(())
    }

    /// Unsubscribe this session from a notification channel.
    pub async fn unlisten(&mut self, channel: &str) -> Result<(), Error> {
        self.exec_simple(&format!(
            "UNLISTEN {}",
            crate::sanitize::quote_identifier(channel)
        ))
        .await?;

        Ok(())
    }

    /// Simple-protocol interpolation is only sound under the settings the
    /// sanitiser was written for.
    pub(crate) fn check_simple_protocol(&self) -> Result<(), Error> {
        if self.stream.parameter_status("standard_conforming_strings") != Some("on") {
            return Err(Error::UnsupportedExecMode(
                "the simple protocol requires standard_conforming_strings=on".into(),
            ));
        }

        if self.stream.parameter_status("client_encoding") != Some("UTF8") {
            return Err(Error::UnsupportedExecMode(
                "the simple protocol requires client_encoding=UTF8".into(),
            ));
        }

        Ok(())
    }

    pub(crate) fn resolve_exec_mode(&self, mode: PgExecMode) -> PgExecMode {
        match mode {
            PgExecMode::CacheStatement if !self.cache_statement.is_enabled() => {
                PgExecMode::DescribeExec
            }
            PgExecMode::CacheDescribe if !self.cache_describe.is_enabled() => {
                PgExecMode::DescribeExec
            }
            mode => mode,
        }
    }

    /// Prepare a statement under a caller-chosen name. Named statements
    /// live outside the LRU cache and survive until
    /// [`deallocate`][Self::deallocate]d.
    pub async fn prepare(&mut self, name: &str, sql: &str) -> Result<Arc<PgStatement>, Error> {
        self.ensure_idle()?;
        self.wait_until_ready().await?;

        if name.is_empty() {
            return Err(Error::UnsupportedExecMode(
                "prepared statements need a non-empty name; the unnamed slot is managed \
                 internally"
                    .into(),
            ));
        }

        let statement = self.describe_statement(name, sql).await?;

        self.prepared.insert(name.to_owned(), Arc::clone(&statement));

        Ok(statement)
    }

    /// Release a statement previously created by [`prepare`][Self::prepare].
    pub async fn deallocate(&mut self, name: &str) -> Result<(), Error> {
        self.ensure_idle()?;
        self.wait_until_ready().await?;

        self.prepared.remove(name);
        self.close_statement(name).await
    }

    /// Execute a statement previously prepared on this connection.
    pub async fn query_statement<'c>(
        &'c mut self,
        statement: &Arc<PgStatement>,
        args: &[PgArgument],
    ) -> Result<PgRows<'c>, Error> {
        self.ensure_idle()?;
        self.wait_until_ready().await?;

        let (formats, num_params, params) = self.encode_params(statement, args)?;

        let result_formats: SmallVec<[PgFormat; 6]> = statement
            .columns
            .iter()
            .map(|c| self.type_map.preferred_format(c.type_id))
            .collect();

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
        self.stream.write(Sync);

        self.pending_ready_for_query_count += 1;
        self.status = ConnectionStatus::Busy;
        self.flush_stream().await?;

        Ok(PgRows {
            cursor: ResultCursor::new(Arc::clone(statement)),
            conn: self,
            release: true,
        })
    }

    /// Evict and deallocate everything in both statement caches.
    pub async fn clear_cached_statements(&mut self) -> Result<(), Error> {
        self.ensure_idle()?;
        self.wait_until_ready().await?;

        let evicted = self.cache_statement.drain();
        self.cache_describe.drain();

        for statement in evicted {
            self.close_statement(&statement.name).await?;
        }

        Ok(())
    }

    // -- statement preparation ------------------------------------------

    pub(crate) async fn get_or_prepare(&mut self, sql: &str) -> Result<Arc<PgStatement>, Error> {
        if let Some(statement) = self.cache_statement.get(sql) {
            return Ok(statement);
        }

        let name = self.next_statement_name();
        let statement = self.describe_statement(&name, sql).await?;

        if let Some(evicted) = self.cache_statement.insert(sql, Arc::clone(&statement)) {
            self.close_statement(&evicted.name).await?;
        }

        Ok(statement)
    }

    pub(crate) async fn get_or_describe(&mut self, sql: &str) -> Result<Arc<PgStatement>, Error> {
        if let Some(statement) = self.cache_describe.get(sql) {
            return Ok(statement);
        }

        let statement = self.describe_statement("", sql).await?;

        // descriptions of the unnamed statement hold no server-side
        // resources; eviction is free
        self.cache_describe.insert(sql, Arc::clone(&statement));

        Ok(statement)
    }

    /// One Parse/Describe/Sync round trip: learn the parameter types and
    /// result columns of `sql`, optionally preparing it under `name`.
    pub(crate) async fn describe_statement(
        &mut self,
        name: &str,
        sql: &str,
    ) -> Result<Arc<PgStatement>, Error> {
        self.stream.write(Parse {
            statement: name,
            query: sql,
            param_types: &[],
        });
        self.stream.write(Describe::Statement(name));
        self.stream.write(Sync);

        self.pending_ready_for_query_count += 1;
        self.flush_stream().await?;

        let result = self.read_statement_description(name, sql).await;

        match result {
            Ok(statement) => {
                // consume the ReadyForQuery that closes this round trip
                self.wait_until_ready().await?;
                Ok(statement)
            }

            Err(error) => {
                self.mark_fatal(&error);

                if !self.is_closed() {
                    // e.g. a syntax error; resynchronise so the connection
                    // stays usable
                    self.wait_until_ready().await?;
                }

                Err(error)
            }
        }
    }

    async fn read_statement_description(
        &mut self,
        name: &str,
        sql: &str,
    ) -> Result<Arc<PgStatement>, Error> {
        // the SQL query string is now successfully parsed and has semantic validity
        let _: () = self
            .stream
            .recv_expect(MessageFormat::ParseComplete)
            .await?;

        let params: ParameterDescription = self
            .stream
            .recv_expect(MessageFormat::ParameterDescription)
            .await?;

        let columns = match self.stream.recv().await? {
            // describes the rows that will be returned when the statement
            // is eventually executed
            message if message.format == MessageFormat::RowDescription => {
                message.decode::<RowDescription>()?.fields
            }

            // no data would be returned if this statement was executed
            message if message.format == MessageFormat::NoData => Vec::new(),

            message => {
                return Err(err_protocol!(
                    "expecting RowDescription or NoData but received {:?}",
                    message.format
                ));
            }
        };

        Ok(Arc::new(PgStatement {
            name: name.to_owned(),
            sql: sql.to_owned(),
            param_types: params.types.to_vec(),
            columns,
        }))
    }

    /// Deallocate a named server-side statement.
    pub(crate) async fn close_statement(&mut self, name: &str) -> Result<(), Error> {
        if name.is_empty() {
            return Ok(());
        }

        self.stream.write(Close::Statement(name));
        self.stream.write(Sync);

        self.pending_ready_for_query_count += 1;
        self.flush_stream().await?;

        // CloseComplete, then ReadyForQuery
        self.wait_until_ready().await
    }

    // -- argument encoding ----------------------------------------------

    /// Encode `args` against a described statement: each parameter in the
    /// format the type map prefers for its OID.
    pub(crate) fn encode_params(
        &self,
        statement: &PgStatement,
        args: &[PgArgument],
    ) -> Result<EncodedParams, Error> {
        if args.len() != statement.param_types.len() {
            return Err(Error::ArgumentCount {
                expected: statement.param_types.len(),
                given: args.len(),
            });
        }

        let mut formats = SmallVec::with_capacity(args.len());
        let mut buf = Vec::new();

        for (index, (arg, &oid)) in args.iter().zip(&statement.param_types).enumerate() {
            let format = self.type_map.preferred_format(oid);
            formats.push(format);

            encode_one(&mut buf, |buf| {
                self.type_map
                    .encode(oid, format, arg, buf)
                    .map_err(|source| Error::Encode { index, source })
            })?;
        }

        Ok((formats, args.len() as i16, buf))
    }

    /// Encode `args` with no statement description: all text, letting the
    /// server infer every parameter type.
    pub(crate) fn encode_params_text(&self, args: &[PgArgument]) -> Result<EncodedParams, Error> {
        let mut buf = Vec::new();

        for (index, arg) in args.iter().enumerate() {
            match arg.to_text() {
                Some(text) => {
                    buf.put_i32(text.len() as i32);
                    buf.extend_from_slice(text.as_bytes());
                }

                None if arg.is_null() => buf.put_i32(-1),

                None => return Err(Error::UnknownArgumentType { index }),
            }
        }

        // a single `Text` format code applies to all parameters
        Ok((
            SmallVec::from_slice(&[PgFormat::Text]),
            args.len() as i16,
            buf,
        ))
    }
}

// write one `i32` length-prefixed parameter value via `f`; `IsNull::Yes`
// collapses to a length of -1
fn encode_one<F>(buf: &mut Vec<u8>, f: F) -> Result<(), Error>
where
    F: FnOnce(&mut Vec<u8>) -> Result<IsNull, Error>,
{
    let offset = buf.len();
    buf.extend_from_slice(&[0; 4]);

    let is_null = f(buf)?;

    let length = if let IsNull::Yes = is_null {
        debug_assert!(buf.len() == offset + 4, "NULL parameter wrote data");
        -1
    } else {
        (buf.len() - offset - 4) as i32
    };

    buf[offset..offset + 4].copy_from_slice(&length.to_be_bytes());

    Ok(())
}
