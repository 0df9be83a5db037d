use std::collections::HashMap;
use std::fmt::{self, Debug, Formatter};
use std::path::PathBuf;
use std::sync::Arc;

use crate::error::Error;
use crate::message::{
    CancelRequest, Message, MessageFormat, Notice, Notification, Query, ReadyForQuery, Terminate,
    TransactionStatus,
};
use crate::net::Socket;
use crate::options::{PgConnectOptions, PgExecMode};
use crate::statement::PgStatement;
use crate::statement_cache::StatementCache;
use crate::type_map::{PgTypeMap, TypeMap};

pub(crate) mod executor;
mod establish;
mod sasl;
pub(crate) mod stream;
mod tls;

pub(crate) use stream::PgStream;

/// Where the server lives; remembered for out-of-band cancel requests.
#[derive(Debug, Clone)]
pub(crate) enum ServerAddr {
    Tcp(String, u16),
    Unix(PathBuf),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ConnectionStatus {
    /// At the server's ReadyForQuery; a new operation may begin.
    Idle,

    /// A command is in flight or a result stream is open.
    Busy,

    /// Closed by [`close`][PgConnection::close] or a fatal error; permanent.
    Closed,
}

/// A single connection to a PostgreSQL server.
///
/// A connection is a strictly serial resource: one operation at a time, one
/// open result stream at a time. Concurrency is obtained by running several
/// connections, usually under an external pool.
pub struct PgConnection {
    pub(crate) stream: PgStream,

    // process id and secret key of this backend, for cancel requests
    process_id: u32,
    secret_key: u32,

    pub(crate) addr: ServerAddr,

    pub(crate) status: ConnectionStatus,
    pub(crate) transaction_status: TransactionStatus,
    pub(crate) transaction_depth: usize,

    // number of ReadyForQuery messages that are currently expected
    pub(crate) pending_ready_for_query_count: usize,

    // sequence for generated prepared-statement names
    next_statement_id: u64,

    pub(crate) cache_statement: StatementCache,
    pub(crate) cache_describe: StatementCache,

    // caller-named statements from `prepare`; never evicted
    pub(crate) prepared: HashMap<String, Arc<PgStatement>>,

    pub(crate) type_map: Arc<dyn TypeMap>,
    pub(crate) default_exec_mode: PgExecMode,
}

impl PgConnection {
    /// Open and authenticate a connection, trying the configured hosts in
    /// declared order.
    pub async fn connect(options: &PgConnectOptions) -> Result<Self, Error> {
        Self::connect_with_type_map(options, Arc::new(PgTypeMap)).await
    }

    /// Like [`connect`][Self::connect] with a caller-supplied [TypeMap];
    /// the map is read-only from here on and may be shared.
    pub async fn connect_with_type_map(
        options: &PgConnectOptions,
        type_map: Arc<dyn TypeMap>,
    ) -> Result<Self, Error> {
        Self::establish(options, type_map).await
    }

    /// The process ID of the server backend, as reported at startup.
    pub fn process_id(&self) -> u32 {
        self.process_id
    }

    pub fn is_closed(&self) -> bool {
        self.status == ConnectionStatus::Closed
    }

    /// The server's transaction status as of the last `ReadyForQuery`:
    /// idle, in a transaction, or in a failed transaction.
    pub fn transaction_status(&self) -> TransactionStatus {
        self.transaction_status
    }

    /// The last reported value of a server runtime parameter, e.g.
    /// `server_version` or `client_encoding`.
    pub fn parameter_status(&self, name: &str) -> Option<&str> {
        self.stream.parameter_status(name)
    }

    /// The server version string, if the server reported one.
    pub fn server_version(&self) -> Option<&str> {
        self.parameter_status("server_version")
    }

    /// The number of statements currently held by the prepared-statement
    /// cache.
    pub fn cached_statements_len(&self) -> usize {
        self.cache_statement.len()
    }

    /// Install a callback for `NoticeResponse` messages. Without one,
    /// notices are forwarded to the `log` facade.
    pub fn on_notice(&mut self, handler: impl FnMut(&Notice) + Send + 'static) {
        self.stream.notice_handler = Some(Box::new(handler));
    }

    /// Install a callback for asynchronous notifications. Without one,
    /// notifications queue up for [`wait_for_notification`][Self::wait_for_notification].
    pub fn on_notification(&mut self, handler: impl FnMut(&Notification) + Send + 'static) {
        self.stream.notification_handler = Some(Box::new(handler));
    }

    pub(crate) fn ensure_open(&self) -> Result<(), Error> {
        match self.status {
            ConnectionStatus::Closed => Err(Error::ConnectionClosed),
            _ => Ok(()),
        }
    }

    // the lock discipline: every operation takes the connection from Idle
    // to Busy and back on close. Exclusive access is already guaranteed by
    // the `&mut` in every reader, so Busy is only observable after a result
    // stream was *dropped* instead of closed; those must resynchronise with
    // `recover_from_timeout` before the connection works again.
    pub(crate) fn ensure_idle(&self) -> Result<(), Error> {
        match self.status {
            ConnectionStatus::Closed => Err(Error::ConnectionClosed),
            ConnectionStatus::Busy => Err(Error::ConnectionBusy),
            ConnectionStatus::Idle => Ok(()),
        }
    }

    // will return when the connection is ready for another query; any
    // replies still owed to previous (abandoned) operations are drained
    pub(crate) async fn wait_until_ready(&mut self) -> Result<(), Error> {
        // rollbacks and copy-failures queued by `Drop` impls may still be
        // sitting in the write buffer
        if self.stream.wbuf_len() > 0 {
            self.flush_stream().await?;
        }

        while self.pending_ready_for_query_count > 0 {
            loop {
                let message = match self.stream.recv().await {
                    Ok(message) => message,

                    // a late server error from an abandoned command does not
                    // concern the *next* command; the following ReadyForQuery
                    // still arrives
                    Err(Error::Database(error)) => {
                        log::debug!("discarded error from abandoned command: {}", error);
                        continue;
                    }

                    Err(error) => {
                        self.mark_fatal(&error);
                        return Err(error);
                    }
                };

                if let MessageFormat::ReadyForQuery = message.format {
                    self.handle_ready_for_query(message)?;
                    break;
                }
            }
        }

        self.status = ConnectionStatus::Idle;

        Ok(())
    }

    pub(crate) fn handle_ready_for_query(&mut self, message: Message) -> Result<(), Error> {
        self.pending_ready_for_query_count =
            self.pending_ready_for_query_count.saturating_sub(1);
        self.transaction_status = message.decode::<ReadyForQuery>()?.transaction_status;

        Ok(())
    }

    pub(crate) fn mark_fatal(&mut self, error: &Error) {
        if error.is_fatal() {
            self.status = ConnectionStatus::Closed;
        }
    }

    // flush the write buffer; a failed write invalidates the connection
    // rather than leaving it looking merely busy
    pub(crate) async fn flush_stream(&mut self) -> Result<(), Error> {
        let result = self.stream.flush().await;

        if let Err(error) = &result {
            self.mark_fatal(error);
        }

        result
    }

    pub(crate) async fn flush_stream_with_drain(&mut self) -> Result<(), Error> {
        let result = self.stream.flush_with_drain().await;

        if let Err(error) = &result {
            self.mark_fatal(error);
        }

        result
    }

    /// Verify the server still responds, with a minimal round trip.
    pub async fn ping(&mut self) -> Result<(), Error> {
        self.ensure_idle()?;
        self.wait_until_ready().await?;

        self.stream.write(Query("/* ping */ SELECT 1"));
        self.pending_ready_for_query_count += 1;
        self.flush_stream().await?;

        self.wait_until_ready().await
    }

    /// Block until an asynchronous notification (`NOTIFY`) arrives on this
    /// connection, delivering any already-queued notification first.
    pub async fn wait_for_notification(&mut self) -> Result<Notification, Error> {
        self.ensure_idle()?;

        // deliver anything a `Drop` impl queued before blocking on reads
        if self.stream.wbuf_len() > 0 {
            self.flush_stream().await?;
        }

        loop {
            if let Some(notification) = self.stream.notifications.pop_front() {
                return Ok(notification);
            }

            let message = match self.stream.recv_unchecked().await {
                Ok(message) => message,
                Err(error) => {
                    self.mark_fatal(&error);
                    return Err(error);
                }
            };

            match message.format {
                MessageFormat::NotificationResponse => {
                    return message.decode();
                }

                MessageFormat::ParameterStatus => {
                    let status: crate::message::ParameterStatus = message.decode()?;
                    self.stream.parameter_statuses.insert(status.name, status.value);
                }

                MessageFormat::NoticeResponse => {
                    let notice: Notice = message.decode()?;

                    if let Some(handler) = &mut self.stream.notice_handler {
                        handler(&notice);
                    }
                }

                MessageFormat::ReadyForQuery => {
                    // a reply still owed to an abandoned operation
                    self.handle_ready_for_query(message)?;
                }

                // stray replies from abandoned operations; skip them
                _ => {}
            }
        }
    }

    /// Pop a queued notification without blocking.
    pub fn next_notification(&mut self) -> Option<Notification> {
        self.stream.notifications.pop_front()
    }

    /// Ask the server, over a second short-lived connection, to abandon the
    /// command currently running on this one. Delivery is best effort; the
    /// current operation must still be driven to completion.
    pub async fn cancel_request(&self) -> Result<(), Error> {
        let mut socket = match &self.addr {
            ServerAddr::Tcp(host, port) => Socket::connect_tcp(host, *port).await?,
            ServerAddr::Unix(path) => Socket::connect_uds(path).await?,
        };

        let mut buf = Vec::with_capacity(16);

        crate::io::Encode::encode(
            &CancelRequest {
                process_id: self.process_id,
                secret_key: self.secret_key,
            },
            &mut buf,
        );

        use tokio::io::{AsyncReadExt, AsyncWriteExt};

        socket.write_all(&buf).await?;
        socket.flush().await?;

        // the server replies with nothing and closes the socket
        let mut sink = Vec::new();
        let _ = socket.read_to_end(&mut sink).await;

        Ok(())
    }

    /// Re-synchronise a connection left busy by an [`Error::Timeout`] or by
    /// a result stream that was dropped instead of closed: drain, with no
    /// deadline, until the server's next `ReadyForQuery`. On success the
    /// connection is idle again; on any failure it is closed.
    ///
    /// An interrupted command may or may not have been executed; that
    /// cannot be known from the client side.
    pub async fn recover_from_timeout(&mut self) -> Result<(), Error> {
        self.ensure_open()?;

        let saved = self.stream.read_timeout.take();
        let result = self.wait_until_ready().await;
        self.stream.read_timeout = saved;

        match result {
            Ok(()) => Ok(()),

            Err(error) => {
                self.status = ConnectionStatus::Closed;
                let _ = self.stream.shutdown().await;
                Err(error)
            }
        }
    }

    /// Gracefully terminate the session: `Terminate` is sent and the socket
    /// is closed.
    pub async fn close(mut self) -> Result<(), Error> {
        if self.status == ConnectionStatus::Closed {
            return Ok(());
        }

        self.status = ConnectionStatus::Closed;

        self.stream.write(Terminate);
        self.stream.flush().await?;
        self.stream.shutdown().await?;

        Ok(())
    }

    // generate the next cache-managed prepared statement name
    pub(crate) fn next_statement_name(&mut self) -> String {
        self.next_statement_id += 1;
        format!("stmtcache_{}", self.next_statement_id)
    }

    pub(crate) fn new(
        stream: PgStream,
        addr: ServerAddr,
        process_id: u32,
        secret_key: u32,
        transaction_status: TransactionStatus,
        options: &PgConnectOptions,
        type_map: Arc<dyn TypeMap>,
    ) -> Self {
        PgConnection {
            stream,
            process_id,
            secret_key,
            addr,
            status: ConnectionStatus::Idle,
            transaction_status,
            transaction_depth: 0,
            pending_ready_for_query_count: 0,
            next_statement_id: 0,
            cache_statement: StatementCache::new(options.statement_cache_capacity),
            cache_describe: StatementCache::new(options.describe_cache_capacity),
            prepared: HashMap::new(),
            type_map,
            default_exec_mode: options.default_exec_mode,
        }
    }
}

impl Debug for PgConnection {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("PgConnection")
            .field("process_id", &self.process_id)
            .field("status", &self.status)
            .finish()
    }
}
