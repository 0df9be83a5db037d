use tokio::io::{AsyncReadExt, AsyncWriteExt};

use crate::error::Error;
use crate::io::Encode;
use crate::message::SslRequest;
use crate::net::{configure_tls_connector, MaybeTlsStream, Socket};
use crate::options::{PgConnectOptions, PgSslMode};

/// Negotiate TLS on a freshly dialed socket, before the startup packet.
pub(super) async fn maybe_upgrade(
    mut socket: Socket,
    options: &PgConnectOptions,
    host: &str,
) -> Result<MaybeTlsStream<Socket>, Error> {
    // https://www.postgresql.org/docs/current/protocol-flow.html#id-1.10.5.7.11
    match options.ssl_mode {
        PgSslMode::Disable => return Ok(MaybeTlsStream::Raw(socket)),

        PgSslMode::Allow | PgSslMode::Prefer => {
            if !request_tls(&mut socket).await? {
                // the server is unwilling; fall back to plaintext
                return Ok(MaybeTlsStream::Raw(socket));
            }
        }

        PgSslMode::Require | PgSslMode::VerifyCa | PgSslMode::VerifyFull => {
            if !request_tls(&mut socket).await? {
                return Err(Error::Tls("server does not support TLS".into()));
            }
        }
    }

    let verify_ca = matches!(
        options.ssl_mode,
        PgSslMode::VerifyCa | PgSslMode::VerifyFull
    );
    let verify_hostname = matches!(options.ssl_mode, PgSslMode::VerifyFull);

    let connector = configure_tls_connector(
        verify_ca,
        verify_hostname,
        options.ssl_root_cert.as_deref(),
    )
    .await?;

    MaybeTlsStream::Raw(socket).upgrade(host, connector).await
}

// To initiate an SSL-encrypted connection, the frontend initially sends an
// SSLRequest message rather than a StartupMessage. The server then responds
// with a single byte: S to proceed with the handshake, N to refuse.
async fn request_tls(socket: &mut Socket) -> Result<bool, Error> {
    let mut buf = Vec::with_capacity(8);
    SslRequest.encode(&mut buf);

    socket.write_all(&buf).await?;
    socket.flush().await?;

    let mut response = [0u8; 1];
    socket.read_exact(&mut response).await?;

    match response[0] {
        b'S' => Ok(true),
        b'N' => Ok(false),

        other => Err(err_protocol!(
            "unexpected response from SSLRequest: 0x{:02x}",
            other
        )),
    }
}
