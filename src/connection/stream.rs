use std::collections::{BTreeMap, VecDeque};
use std::time::Duration;

use bytes::{Buf, Bytes};
use log::Level;

use crate::error::{Error, PgDatabaseError, PgSeverity};
use crate::io::{BufStream, Encode};
use crate::message::{Message, MessageFormat, Notice, Notification, ParameterStatus};
use crate::net::{MaybeTlsStream, Socket};

pub(crate) type NoticeHandler = Box<dyn FnMut(&Notice) + Send>;
pub(crate) type NotificationHandler = Box<dyn FnMut(&Notification) + Send>;

// the stream is a separate type from the connection to uphold the invariant
// where an instantiated [PgConnection] is a *valid* connection to postgres

// when a new connection is asked for, we work directly on the [PgStream]
// type until the startup phase is complete

pub struct PgStream {
    inner: BufStream<MaybeTlsStream<Socket>>,

    // notifications received while reading other replies; drained by
    // `PgConnection::wait_for_notification` in arrival order
    pub(crate) notifications: VecDeque<Notification>,
    pub(crate) notification_handler: Option<NotificationHandler>,

    pub(crate) notice_handler: Option<NoticeHandler>,

    pub(crate) parameter_statuses: BTreeMap<String, String>,

    // a receive exceeding this deadline poisons the connection until
    // recovered; `None` waits forever
    pub(crate) read_timeout: Option<Duration>,
}

impl PgStream {
    pub(crate) fn new(stream: MaybeTlsStream<Socket>, read_timeout: Option<Duration>) -> Self {
        Self {
            inner: BufStream::new(stream),
            notifications: VecDeque::new(),
            notification_handler: None,
            notice_handler: None,
            parameter_statuses: BTreeMap::new(),
            read_timeout,
        }
    }

    #[inline]
    pub(crate) fn write<T: Encode>(&mut self, message: T) {
        self.inner.write(message);
    }

    pub(crate) async fn flush(&mut self) -> Result<(), Error> {
        self.inner.flush().await
    }

    pub(crate) fn wbuf_len(&self) -> usize {
        self.inner.wbuf_len()
    }

    pub(crate) async fn flush_with_drain(&mut self) -> Result<(), Error> {
        self.inner.flush_with_drain().await
    }

    pub(crate) async fn send<T: Encode>(&mut self, message: T) -> Result<(), Error> {
        self.write(message);
        self.flush().await
    }

    pub(crate) async fn shutdown(&mut self) -> std::io::Result<()> {
        self.inner.shutdown().await
    }

    async fn read_exact(&mut self, cnt: usize) -> Result<Bytes, Error> {
        match self.read_timeout {
            Some(timeout) => tokio::time::timeout(timeout, self.inner.read_exact(cnt))
                .await
                .map_err(|_| Error::Timeout)?,

            None => self.inner.read_exact(cnt).await,
        }
    }

    /// Read the next framed message, without dispatching asynchronous
    /// messages. All packets in postgres start with a 5-byte header: the
    /// message tag and the length of the message (inclusive of the length
    /// field itself).
    pub(crate) async fn recv_unchecked(&mut self) -> Result<Message, Error> {
        let mut header = self.read_exact(5).await?;

        let format = MessageFormat::try_from_u8(header.get_u8())?;
        let size = header.get_i32();

        if size < 4 {
            return Err(err_protocol!("invalid message length: {}", size));
        }

        let contents = self.read_exact(size as usize - 4).await?;

        Ok(Message { format, contents })
    }

    /// Get the next message from the server, dispatching the asynchronous
    /// side-channel messages (notifications, notices, parameter changes)
    /// that may arrive at any point.
    ///
    /// An `ErrorResponse` is returned as [`Error::Database`]; the stream
    /// remains positioned after it, so the caller may keep receiving.
    pub(crate) async fn recv(&mut self) -> Result<Message, Error> {
        loop {
            let message = self.recv_unchecked().await?;

            match message.format {
                MessageFormat::ErrorResponse => {
                    // an error returned from the database server
                    return Err(PgDatabaseError(message.decode()?).into());
                }

                MessageFormat::NotificationResponse => {
                    let notification: Notification = message.decode()?;

                    if let Some(handler) = &mut self.notification_handler {
                        handler(&notification);
                    } else {
                        self.notifications.push_back(notification);
                    }

                    continue;
                }

                MessageFormat::ParameterStatus => {
                    // informs the frontend about the current (initial)
                    // setting of backend parameters

                    let ParameterStatus { name, value } = message.decode()?;

                    self.parameter_statuses.insert(name, value);

                    continue;
                }

                MessageFormat::NoticeResponse => {
                    let notice: Notice = message.decode()?;

                    if let Some(handler) = &mut self.notice_handler {
                        handler(&notice);
                    } else {
                        let lvl = match notice.severity() {
                            PgSeverity::Fatal | PgSeverity::Panic | PgSeverity::Error => {
                                Level::Error
                            }
                            PgSeverity::Warning => Level::Warn,
                            PgSeverity::Notice => Level::Info,
                            PgSeverity::Debug => Level::Debug,
                            PgSeverity::Info | PgSeverity::Log => Level::Trace,
                        };

                        log::log!(target: "pgcore::notice", lvl, "{}", notice.message());
                    }

                    continue;
                }

                _ => {}
            }

            return Ok(message);
        }
    }

    /// Expect a specific message kind next and decode it.
    pub(crate) async fn recv_expect<T: crate::io::Decode>(
        &mut self,
        format: MessageFormat,
    ) -> Result<T, Error> {
        let message = self.recv().await?;

        if message.format != format {
            return Err(err_protocol!(
                "expecting {:?} but received {:?}",
                format,
                message.format
            ));
        }

        message.decode()
    }

    pub(crate) fn parameter_status(&self, name: &str) -> Option<&str> {
        self.parameter_statuses.get(name).map(|s| s.as_str())
    }
}
