#![allow(dead_code)] // each test binary uses a different slice of this module

//! A scripted PostgreSQL backend for hermetic integration tests.
//!
//! Each test spawns a loopback listener whose accept task plays the server
//! side of the conversation, frame by frame, using the crate's own codec.
//! Nothing here talks to a real database.

use bytes::Bytes;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

use pgcore::io::Encode;
use pgcore::message::{
    Authentication, BackendKeyData, CommandComplete, DataRow, ParameterDescription,
    ParameterStatus, ReadyForQuery, RowDescription, Startup, TransactionStatus,
};
use pgcore::{Oid, PgColumn, PgConnectOptions, PgConnection, PgFormat};

pub const SSL_REQUEST_CODE: i32 = (1234 << 16) | 5679;

pub struct TestServer {
    listener: TcpListener,
    pub port: u16,
}

impl TestServer {
    pub async fn bind() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        TestServer { listener, port }
    }

    pub async fn accept(&self) -> Backend {
        let (stream, _) = self.listener.accept().await.unwrap();

        Backend {
            stream,
            wbuf: Vec::new(),
        }
    }
}

/// Default client options pointed at the test server.
pub fn options(port: u16) -> PgConnectOptions {
    PgConnectOptions::new()
        .host("127.0.0.1", port)
        .username("tester")
        .database("testdb")
}

pub async fn connect(port: u16) -> PgConnection {
    PgConnection::connect(&options(port)).await.unwrap()
}

/// One accepted connection, driven from the server side of the protocol.
pub struct Backend {
    pub stream: TcpStream,
    wbuf: Vec<u8>,
}

impl Backend {
    /// Read one framed frontend message: its tag and body.
    pub async fn read_frame(&mut self) -> (u8, Bytes) {
        let mut header = [0u8; 5];
        self.stream.read_exact(&mut header).await.unwrap();

        let tag = header[0];
        let len = i32::from_be_bytes(header[1..5].try_into().unwrap()) as usize - 4;

        let mut body = vec![0u8; len];
        self.stream.read_exact(&mut body).await.unwrap();

        (tag, Bytes::from(body))
    }

    /// Read one frame, asserting its tag.
    pub async fn expect(&mut self, tag: u8) -> Bytes {
        let (got, body) = self.read_frame().await;

        assert_eq!(
            char::from(got),
            char::from(tag),
            "unexpected frontend message"
        );

        body
    }

    pub fn send<T: Encode>(&mut self, message: T) {
        message.encode(&mut self.wbuf);
    }

    /// Queue a body-less backend message, e.g. ParseComplete (`1`),
    /// BindComplete (`2`), or NoData (`n`).
    pub fn send_tag_only(&mut self, tag: u8) {
        self.wbuf.push(tag);
        self.wbuf.extend_from_slice(&4i32.to_be_bytes());
    }

    pub fn send_ready(&mut self, status: TransactionStatus) {
        self.send(ReadyForQuery {
            transaction_status: status,
        });
    }

    /// Queue an `ErrorResponse` with the given SQLSTATE and message.
    pub fn send_error(&mut self, code: &str, message: &str) {
        pgcore::message::Notice::from_parts("ERROR", code, message)
            .encode_tagged(b'E', &mut self.wbuf);
    }

    pub async fn flush(&mut self) {
        self.stream.write_all(&self.wbuf).await.unwrap();
        self.stream.flush().await.unwrap();
        self.wbuf.clear();
    }

    /// Play the server's half of the startup sequence (trust auth) and
    /// return the client's startup parameters. An `SSLRequest`, if the
    /// client leads with one, is answered with `N`.
    pub async fn handshake(&mut self) -> Startup {
        let body = self.read_startup_frame().await;

        let body = if body.len() == 4
            && i32::from_be_bytes(body[..4].try_into().unwrap()) == SSL_REQUEST_CODE
        {
            self.stream.write_all(b"N").await.unwrap();

            self.read_startup_frame().await
        } else {
            body
        };

        let startup = <Startup as pgcore::io::Decode>::decode(body).unwrap();

        self.send(Authentication::Ok);
        self.send(ParameterStatus {
            name: "standard_conforming_strings".into(),
            value: "on".into(),
        });
        self.send(ParameterStatus {
            name: "client_encoding".into(),
            value: "UTF8".into(),
        });
        self.send(ParameterStatus {
            name: "server_version".into(),
            value: "14.5".into(),
        });
        self.send(BackendKeyData {
            process_id: 4242,
            secret_key: 9999,
        });
        self.send_ready(TransactionStatus::Idle);
        self.flush().await;

        startup
    }

    async fn read_startup_frame(&mut self) -> Bytes {
        let mut len = [0u8; 4];
        self.stream.read_exact(&mut len).await.unwrap();

        let len = i32::from_be_bytes(len) as usize - 4;
        let mut body = vec![0u8; len];
        self.stream.read_exact(&mut body).await.unwrap();

        Bytes::from(body)
    }

    /// Serve one Parse/Describe/Sync round trip.
    pub async fn handle_prepare(&mut self, param_types: Vec<Oid>, columns: Option<Vec<PgColumn>>) {
        self.expect(b'P').await;
        self.expect(b'D').await;
        self.expect(b'S').await;

        self.send_tag_only(b'1'); // ParseComplete
        self.send(ParameterDescription::new(param_types));

        match columns {
            Some(fields) => self.send(RowDescription { fields }),
            None => self.send_tag_only(b'n'), // NoData
        }

        self.send_ready(TransactionStatus::Idle);
        self.flush().await;
    }

    /// Serve one Bind/Describe/Execute/Sync exchange, returning the Bind
    /// body for inspection. `None` row values encode SQL NULL.
    pub async fn handle_execute(
        &mut self,
        columns: Vec<PgColumn>,
        rows: Vec<Vec<Option<Vec<u8>>>>,
        tag: &str,
    ) -> Bytes {
        let bind = self.expect(b'B').await;
        self.expect(b'D').await;
        self.expect(b'E').await;
        self.expect(b'S').await;

        self.send_execute_results(columns, rows, tag);
        self.send_ready(TransactionStatus::Idle);
        self.flush().await;

        bind
    }

    /// Queue BindComplete, RowDescription, the rows, and CommandComplete,
    /// without a trailing ReadyForQuery (batches send that once).
    pub fn send_execute_results(
        &mut self,
        columns: Vec<PgColumn>,
        rows: Vec<Vec<Option<Vec<u8>>>>,
        tag: &str,
    ) {
        self.send_tag_only(b'2'); // BindComplete

        if !columns.is_empty() {
            self.send(RowDescription { fields: columns });
        } else {
            self.send_tag_only(b'n');
        }

        for row in rows {
            self.send(DataRow::new(
                row.into_iter().map(|v| v.map(Bytes::from)).collect(),
            ));
        }

        self.send(CommandComplete::new(tag));
    }

    /// Serve a simple-protocol query with one result set.
    pub async fn handle_query(
        &mut self,
        columns: Vec<PgColumn>,
        rows: Vec<Vec<Option<Vec<u8>>>>,
        tag: &str,
    ) -> String {
        let body = self.expect(b'Q').await;
        let sql = read_cstr(&body);

        if !columns.is_empty() {
            self.send(RowDescription { fields: columns });
        }

        for row in rows {
            self.send(DataRow::new(
                row.into_iter().map(|v| v.map(Bytes::from)).collect(),
            ));
        }

        self.send(CommandComplete::new(tag));
        self.send_ready(TransactionStatus::Idle);
        self.flush().await;

        sql
    }
}

/// The statement name out of a Bind message body.
pub fn bind_statement_name(bind: &[u8]) -> String {
    let portal_end = bind.iter().position(|&b| b == 0).unwrap();
    let rest = &bind[portal_end + 1..];
    let statement_end = rest.iter().position(|&b| b == 0).unwrap();

    String::from_utf8(rest[..statement_end].to_vec()).unwrap()
}

pub fn read_cstr(body: &[u8]) -> String {
    let end = body.iter().position(|&b| b == 0).unwrap();

    String::from_utf8(body[..end].to_vec()).unwrap()
}

/// A result column in binary format.
pub fn col(name: &str, type_id: Oid) -> PgColumn {
    PgColumn {
        name: name.into(),
        relation_id: 0,
        relation_attribute_no: 0,
        type_id,
        type_size: -1,
        type_modifier: -1,
        format: PgFormat::Binary,
    }
}

/// A result column in text format.
pub fn text_col(name: &str, type_id: Oid) -> PgColumn {
    PgColumn {
        format: PgFormat::Text,
        ..col(name, type_id)
    }
}
