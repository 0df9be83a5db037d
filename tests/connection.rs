//! End-to-end behavior against a scripted in-process backend.

mod support;

use std::time::Duration;

use pgcore::message::TransactionStatus;
use pgcore::{Error, Oid, PgArgument, PgBatch, PgConnection, PgExecMode};

use support::{bind_statement_name, col, connect, options, text_col, TestServer};

fn int4(v: i32) -> Option<Vec<u8>> {
    Some(v.to_be_bytes().to_vec())
}

#[tokio::test]
async fn test_connect_and_exec() {
    let server = TestServer::bind().await;
    let port = server.port;

    let task = tokio::spawn(async move {
        let mut backend = server.accept().await;

        let startup = backend.handshake().await;
        assert_eq!(startup.username.as_deref(), Some("tester"));
        assert_eq!(startup.database.as_deref(), Some("testdb"));

        backend
            .handle_prepare(vec![], Some(vec![col("?column?", Oid::INT4)]))
            .await;

        let bind = backend
            .handle_execute(
                vec![col("?column?", Oid::INT4)],
                vec![vec![int4(1)]],
                "SELECT 1",
            )
            .await;

        // the first cache-managed statement gets the first generated name
        assert_eq!(bind_statement_name(&bind), "stmtcache_1");
    });

    let mut conn = connect(port).await;

    assert_eq!(conn.process_id(), 4242);
    assert_eq!(conn.server_version(), Some("14.5"));

    let tag = conn.exec("select 1", &[]).await.unwrap();

    assert_eq!(tag.tag(), "SELECT 1");
    assert_eq!(tag.rows_affected(), 1);
    assert_eq!(conn.transaction_status(), TransactionStatus::Idle);
    assert_eq!(conn.cached_statements_len(), 1);

    task.await.unwrap();
}

#[tokio::test]
async fn test_query_row_binds_cached_statement() {
    let server = TestServer::bind().await;
    let port = server.port;

    let task = tokio::spawn(async move {
        let mut backend = server.accept().await;
        backend.handshake().await;

        let columns = vec![col("a", Oid::INT4), col("b", Oid::TEXT)];

        backend
            .handle_prepare(vec![Oid::INT4, Oid::TEXT], Some(columns.clone()))
            .await;

        backend
            .handle_execute(
                columns,
                vec![vec![int4(42), Some(b"hello".to_vec())]],
                "SELECT 1",
            )
            .await;
    });

    let mut conn = connect(port).await;

    let row = conn
        .query_row(
            "select $1::int, $2::text",
            &[42i32.into(), "hello".into()],
        )
        .await
        .unwrap();

    assert_eq!(row.len(), 2);
    assert_eq!(row.try_get(0).unwrap(), PgArgument::Int4(42));
    assert_eq!(row.try_get(1).unwrap(), PgArgument::Text("hello".into()));
    assert_eq!(row.try_get_by_name("b").unwrap(), "hello".into());
    assert_eq!(conn.cached_statements_len(), 1);

    task.await.unwrap();
}

#[tokio::test]
async fn test_statement_cache_hit_skips_prepare() {
    let server = TestServer::bind().await;
    let port = server.port;

    let task = tokio::spawn(async move {
        let mut backend = server.accept().await;
        backend.handshake().await;

        let columns = vec![col("x", Oid::INT4)];

        // one prepare, two executions
        backend
            .handle_prepare(vec![], Some(columns.clone()))
            .await;

        for v in [7, 8] {
            backend
                .handle_execute(columns.clone(), vec![vec![int4(v)]], "SELECT 1")
                .await;
        }
    });

    let mut conn = connect(port).await;

    for expected in [7, 8] {
        let row = conn.query_row("select x from t", &[]).await.unwrap();
        assert_eq!(row.try_get(0).unwrap(), PgArgument::Int4(expected));
    }

    assert_eq!(conn.cached_statements_len(), 1);

    task.await.unwrap();
}

#[tokio::test]
async fn test_batch_pipeline() {
    let server = TestServer::bind().await;
    let port = server.port;

    let task = tokio::spawn(async move {
        let mut backend = server.accept().await;
        backend.handshake().await;

        let columns = vec![col("?column?", Oid::INT4)];

        // phase one: each distinct statement is prepared up front
        backend
            .handle_prepare(vec![], Some(columns.clone()))
            .await;
        backend
            .handle_prepare(vec![], Some(columns.clone()))
            .await;
        backend
            .handle_prepare(vec![Oid::INT4], Some(columns.clone()))
            .await;

        // phase two: one pipelined frame, one Sync
        for _ in 0..3 {
            backend.expect(b'B').await;
            backend.expect(b'D').await;
            backend.expect(b'E').await;
        }
        backend.expect(b'S').await;

        for v in [1, 2, 3] {
            backend.send_execute_results(columns.clone(), vec![vec![int4(v)]], "SELECT 1");
        }
        backend.send_ready(TransactionStatus::Idle);
        backend.flush().await;
    });

    let mut conn = connect(port).await;

    let mut batch = PgBatch::new();
    batch.queue("select 1", vec![]);
    batch.queue("select 2", vec![]);
    batch.queue("select $1::int", vec![3i32.into()]);

    let mut results = conn.send_batch(&batch).await.unwrap();

    assert_eq!(results.remaining(), 3);

    for expected in [1, 2, 3] {
        let row = results.query_row().await.unwrap();
        assert_eq!(row.try_get(0).unwrap(), PgArgument::Int4(expected));
    }

    results.close().await.unwrap();

    task.await.unwrap();
}

#[tokio::test]
async fn test_simple_protocol_interpolates_arguments() {
    let server = TestServer::bind().await;
    let port = server.port;

    let task = tokio::spawn(async move {
        let mut backend = server.accept().await;
        backend.handshake().await;

        let sql = backend
            .handle_query(
                vec![text_col("?column?", Oid::TEXT)],
                vec![vec![Some(b"it's".to_vec())]],
                "SELECT 1",
            )
            .await;

        // interpolation happened client-side, with quote escaping
        assert_eq!(sql, "select 'it''s', 2::int");
    });

    let mut conn = PgConnection::connect(
        &options(port).default_exec_mode(PgExecMode::SimpleProtocol),
    )
    .await
    .unwrap();

    let row = conn
        .query_row("select $1, $2::int", &["it's".into(), 2i32.into()])
        .await
        .unwrap();

    assert_eq!(row.try_get(0).unwrap(), PgArgument::Text("it's".into()));

    task.await.unwrap();
}

#[tokio::test]
async fn test_simple_protocol_batch_is_one_query() {
    let server = TestServer::bind().await;
    let port = server.port;

    let task = tokio::spawn(async move {
        let mut backend = server.accept().await;
        backend.handshake().await;

        let body = backend.expect(b'Q').await;
        assert_eq!(support::read_cstr(&body), "select 1; select 2::int");

        for v in [1, 2] {
            backend.send(pgcore::message::RowDescription {
                fields: vec![text_col("?column?", Oid::INT4)],
            });
            backend.send(pgcore::message::DataRow::new(vec![Some(
                format!("{}", v).into_bytes().into(),
            )]));
            backend.send(pgcore::message::CommandComplete::new("SELECT 1"));
        }

        backend.send_ready(TransactionStatus::Idle);
        backend.flush().await;
    });

    let mut conn = PgConnection::connect(
        &options(port).default_exec_mode(PgExecMode::SimpleProtocol),
    )
    .await
    .unwrap();

    let mut batch = PgBatch::new();
    batch.queue("select 1", vec![]);
    batch.queue("select $1::int", vec![2i32.into()]);

    let mut results = conn.send_batch(&batch).await.unwrap();

    assert_eq!(
        results.query_row().await.unwrap().try_get(0).unwrap(),
        PgArgument::Int4(1)
    );
    assert_eq!(
        results.query_row().await.unwrap().try_get(0).unwrap(),
        PgArgument::Int4(2)
    );

    results.close().await.unwrap();

    task.await.unwrap();
}

#[tokio::test]
async fn test_server_error_is_surfaced_and_survivable() {
    let server = TestServer::bind().await;
    let port = server.port;

    let task = tokio::spawn(async move {
        let mut backend = server.accept().await;
        backend.handshake().await;

        // reject the statement at parse time
        backend.expect(b'P').await;
        backend.expect(b'D').await;
        backend.expect(b'S').await;

        backend.send_error("42703", "column \"nope\" does not exist");
        backend.send_ready(TransactionStatus::Idle);
        backend.flush().await;

        // the connection stays usable
        let columns = vec![col("?column?", Oid::INT4)];
        backend
            .handle_prepare(vec![], Some(columns.clone()))
            .await;
        backend
            .handle_execute(columns, vec![vec![int4(1)]], "SELECT 1")
            .await;
    });

    let mut conn = connect(port).await;

    let error = conn.exec("select nope", &[]).await.unwrap_err();

    match &error {
        Error::Database(e) => {
            assert_eq!(e.code(), "42703");
            assert!(e.message().contains("nope"));
        }
        other => panic!("expected a database error, got {:?}", other),
    }

    assert!(!conn.is_closed());

    let tag = conn.exec("select 1", &[]).await.unwrap();
    assert_eq!(tag.rows_affected(), 1);

    task.await.unwrap();
}

#[tokio::test]
async fn test_command_timeout_and_recovery() {
    let server = TestServer::bind().await;
    let port = server.port;

    let task = tokio::spawn(async move {
        let mut backend = server.accept().await;
        backend.handshake().await;

        let columns = vec![text_col("pg_sleep", Oid::TEXT)];

        backend
            .handle_prepare(vec![], Some(columns.clone()))
            .await;

        // swallow the execution frame, stall past the client deadline,
        // then answer late
        backend.expect(b'B').await;
        backend.expect(b'D').await;
        backend.expect(b'E').await;
        backend.expect(b'S').await;

        tokio::time::sleep(Duration::from_millis(400)).await;

        backend.send_execute_results(columns, vec![vec![Some(b"".to_vec())]], "SELECT 1");
        backend.send_ready(TransactionStatus::Idle);
        backend.flush().await;

        // after recovery the connection works again
        let columns = vec![col("?column?", Oid::INT4)];
        backend
            .handle_prepare(vec![], Some(columns.clone()))
            .await;
        backend
            .handle_execute(columns, vec![vec![int4(1)]], "SELECT 1")
            .await;
    });

    let mut conn = PgConnection::connect(
        &options(port).command_timeout(Duration::from_millis(100)),
    )
    .await
    .unwrap();

    let error = conn.exec("select pg_sleep(5)", &[]).await.unwrap_err();
    assert!(matches!(error, Error::Timeout), "got {:?}", error);
    assert!(!conn.is_closed());

    conn.recover_from_timeout().await.unwrap();

    let tag = conn.exec("select 1", &[]).await.unwrap();
    assert_eq!(tag.rows_affected(), 1);

    task.await.unwrap();
}

#[tokio::test]
async fn test_dropped_reader_leaves_connection_busy() {
    let server = TestServer::bind().await;
    let port = server.port;

    let task = tokio::spawn(async move {
        let mut backend = server.accept().await;
        backend.handshake().await;

        let columns = vec![col("?column?", Oid::INT4)];

        backend
            .handle_prepare(vec![], Some(columns.clone()))
            .await;
        backend
            .handle_execute(columns.clone(), vec![vec![int4(1)]], "SELECT 1")
            .await;

        // after resynchronisation the connection works again
        backend
            .handle_execute(columns, vec![vec![int4(2)]], "SELECT 1")
            .await;
    });

    let mut conn = connect(port).await;

    // abandon the result stream instead of closing it
    let rows = conn.query("select 1", &[]).await.unwrap();
    drop(rows);

    // the lock is still held by the abandoned stream; nothing was sent to
    // the server for this attempt
    let error = conn.exec("select 1", &[]).await.unwrap_err();
    assert!(matches!(error, Error::ConnectionBusy), "got {:?}", error);

    conn.recover_from_timeout().await.unwrap();

    let row = conn.query_row("select 1", &[]).await.unwrap();
    assert_eq!(row.try_get(0).unwrap(), PgArgument::Int4(2));

    task.await.unwrap();
}

#[tokio::test]
async fn test_listen_notify() {
    let server = TestServer::bind().await;
    let port = server.port;

    let task = tokio::spawn(async move {
        let mut backend = server.accept().await;
        backend.handshake().await;

        let sql = backend.handle_query(vec![], vec![], "LISTEN").await;
        assert_eq!(sql, "LISTEN \"stress\"");

        // a notification arrives out of band
        backend.send(pgcore::message::Notification {
            process_id: 77,
            channel: "stress".into(),
            payload: "hi".into(),
        });
        backend.flush().await;
    });

    let mut conn = connect(port).await;

    conn.listen("stress").await.unwrap();

    let notification = conn.wait_for_notification().await.unwrap();

    assert_eq!(notification.channel, "stress");
    assert_eq!(notification.payload, "hi");
    assert_eq!(notification.process_id, 77);

    task.await.unwrap();
}

#[tokio::test]
async fn test_transaction_commit_and_drop_rollback() {
    let server = TestServer::bind().await;
    let port = server.port;

    let task = tokio::spawn(async move {
        let mut backend = server.accept().await;
        backend.handshake().await;

        let sql = backend.handle_query(vec![], vec![], "BEGIN").await;
        assert_eq!(sql, "BEGIN");

        let sql = backend.handle_query(vec![], vec![], "COMMIT").await;
        assert_eq!(sql, "COMMIT");

        // second transaction is abandoned: the queued rollback arrives
        // before the next command
        let sql = backend.handle_query(vec![], vec![], "BEGIN").await;
        assert_eq!(sql, "BEGIN");

        let sql = backend.handle_query(vec![], vec![], "ROLLBACK").await;
        assert_eq!(sql, "ROLLBACK");

        backend.handle_query(vec![], vec![], "SELECT 1").await;
    });

    let mut conn = connect(port).await;

    let tx = conn.begin().await.unwrap();
    tx.commit().await.unwrap();

    {
        let _tx = conn.begin().await.unwrap();
        // dropped without commit
    }

    conn.ping().await.unwrap();

    task.await.unwrap();
}

#[tokio::test]
async fn test_savepoints_nest_by_depth() {
    let server = TestServer::bind().await;
    let port = server.port;

    let task = tokio::spawn(async move {
        let mut backend = server.accept().await;
        backend.handshake().await;

        for expected in [
            "BEGIN",
            "SAVEPOINT _pgcore_savepoint_1",
            "RELEASE SAVEPOINT _pgcore_savepoint_1",
            "COMMIT",
        ] {
            let sql = backend.handle_query(vec![], vec![], "OK").await;
            assert_eq!(sql, expected);
        }
    });

    let mut conn = connect(port).await;

    let mut tx = conn.begin().await.unwrap();
    let inner = tx.savepoint().await.unwrap();
    inner.commit().await.unwrap();
    tx.commit().await.unwrap();

    task.await.unwrap();
}

#[tokio::test]
async fn test_cancel_request_uses_backend_key() {
    let server = TestServer::bind().await;
    let port = server.port;

    let task = tokio::spawn(async move {
        let mut backend = server.accept().await;
        backend.handshake().await;

        // the cancel arrives on a second, bare connection
        let mut cancel = server.accept().await;

        use tokio::io::AsyncReadExt;

        let mut frame = [0u8; 16];
        cancel.stream.read_exact(&mut frame).await.unwrap();

        assert_eq!(&frame[..4], &16i32.to_be_bytes());
        assert_eq!(&frame[4..8], &((1234 << 16) | 5678i32).to_be_bytes());
        assert_eq!(&frame[8..12], &4242u32.to_be_bytes());
        assert_eq!(&frame[12..16], &9999u32.to_be_bytes());
    });

    let conn = connect(port).await;

    conn.cancel_request().await.unwrap();

    task.await.unwrap();

    // the scripted backend is gone; a failed Terminate write is acceptable
    let _ = conn.close().await;
}

#[tokio::test]
async fn test_describe_exec_mode_reparses_every_time() {
    let server = TestServer::bind().await;
    let port = server.port;

    let task = tokio::spawn(async move {
        let mut backend = server.accept().await;
        backend.handshake().await;

        let columns = vec![col("x", Oid::INT4)];

        for v in [5, 6] {
            // a describe round trip precedes every execution
            backend
                .handle_prepare(vec![], Some(columns.clone()))
                .await;

            // the execution re-parses the unnamed statement
            backend.expect(b'P').await;
            let bind = backend.expect(b'B').await;
            assert_eq!(bind_statement_name(&bind), "");
            backend.expect(b'D').await;
            backend.expect(b'E').await;
            backend.expect(b'S').await;

            backend.send_tag_only(b'1');
            backend.send_execute_results(columns.clone(), vec![vec![int4(v)]], "SELECT 1");
            backend.send_ready(TransactionStatus::Idle);
            backend.flush().await;
        }
    });

    let mut conn = PgConnection::connect(
        &options(port).default_exec_mode(PgExecMode::DescribeExec),
    )
    .await
    .unwrap();

    for expected in [5, 6] {
        let row = conn.query_row("select x from t", &[]).await.unwrap();
        assert_eq!(row.try_get(0).unwrap(), PgArgument::Int4(expected));
    }

    // nothing was cached
    assert_eq!(conn.cached_statements_len(), 0);

    task.await.unwrap();
}

#[tokio::test]
async fn test_argument_count_mismatch_fails_before_sending() {
    let server = TestServer::bind().await;
    let port = server.port;

    let task = tokio::spawn(async move {
        let mut backend = server.accept().await;
        backend.handshake().await;

        backend
            .handle_prepare(vec![Oid::INT4], Some(vec![col("x", Oid::INT4)]))
            .await;
    });

    let mut conn = connect(port).await;

    let error = conn.exec("select $1::int", &[]).await.unwrap_err();

    assert!(matches!(
        error,
        Error::ArgumentCount {
            expected: 1,
            given: 0
        }
    ));

    task.await.unwrap();
}
