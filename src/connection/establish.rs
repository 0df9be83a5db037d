use std::sync::Arc;

use crate::connection::stream::PgStream;
use crate::connection::{sasl, tls, PgConnection, ServerAddr};
use crate::error::Error;
use crate::message::{
    Authentication, BackendKeyData, MessageFormat, Password, Query, Startup,
};
use crate::net::{MaybeTlsStream, Socket};
use crate::options::{PgConnectOptions, TargetSessionAttrs};
use crate::type_map::TypeMap;

// https://www.postgresql.org/docs/current/protocol-flow.html#id-1.10.5.7.3

impl PgConnection {
    pub(crate) async fn establish(
        options: &PgConnectOptions,
        type_map: Arc<dyn TypeMap>,
    ) -> Result<Self, Error> {
        let targets: Vec<ServerAddr> = match &options.socket {
            Some(path) => vec![ServerAddr::Unix(path.clone())],
            None => options
                .hosts_or_default()
                .into_iter()
                .map(|(host, port)| ServerAddr::Tcp(host, port))
                .collect(),
        };

        let mut error = None;

        for addr in targets {
            match Self::connect_once(options, type_map.clone(), addr).await {
                Ok(conn) => return Ok(conn),

                // a server that *rejected* us (bad password, no such
                // database) terminates the fallback chain; only network-level
                // failures move on to the next host
                Err(e @ Error::Database(_)) => return Err(e),

                Err(e) => error = Some(e),
            }
        }

        // unwrap: targets is never empty
        Err(error.unwrap())
    }

    async fn connect_once(
        options: &PgConnectOptions,
        type_map: Arc<dyn TypeMap>,
        addr: ServerAddr,
    ) -> Result<Self, Error> {
        let stream = match &addr {
            ServerAddr::Tcp(host, port) => {
                let socket = Socket::connect_tcp(host, *port).await?;

                // Upgrade to TLS if we were asked to and the server supports it
                tls::maybe_upgrade(socket, options, host).await?
            }

            ServerAddr::Unix(path) => {
                // TLS over a domain socket is pointless; skip the request
                MaybeTlsStream::Raw(Socket::connect_uds(path).await?)
            }
        };

        let mut stream = PgStream::new(stream, options.command_timeout);

        // To begin a session, a frontend opens a connection to the server
        // and sends a startup message.

        let mut params = vec![
            // Sets the client-side encoding (character set); the sanitiser
            // and the simple protocol depend on UTF8
            ("client_encoding".to_owned(), "UTF8".to_owned()),
            // Sets the display format for date and time values
            ("DateStyle".to_owned(), "ISO, MDY".to_owned()),
            ("TimeZone".to_owned(), "UTC".to_owned()),
        ];

        if let Some(application_name) = &options.application_name {
            params.push(("application_name".to_owned(), application_name.clone()));
        }

        params.extend(options.runtime_params.iter().cloned());

        stream
            .send(Startup {
                username: Some(options.username.clone()),
                database: options.database.clone(),
                params,
            })
            .await?;

        // The server uses this information and the contents of its
        // configuration files (such as pg_hba.conf) to determine whether the
        // connection is provisionally acceptable, and what additional
        // authentication is required (if any).

        let mut process_id = 0;
        let mut secret_key = 0;
        let transaction_status;

        loop {
            let message = stream.recv().await?;

            match message.format {
                MessageFormat::Authentication => match message.decode()? {
                    Authentication::Ok => {
                        // no more information is required to continue
                    }

                    Authentication::CleartextPassword => {
                        stream
                            .send(Password::Cleartext(
                                options.password.as_deref().unwrap_or_default(),
                            ))
                            .await?;
                    }

                    Authentication::Md5Password(body) => {
                        // the password (with user name) is hashed via MD5,
                        // then hashed again using the 4-byte random salt
                        stream
                            .send(Password::Md5 {
                                password: options.password.as_deref().unwrap_or_default(),
                                username: &options.username,
                                salt: body.salt,
                            })
                            .await?;
                    }

                    Authentication::Sasl(body) => {
                        sasl::authenticate(&mut stream, options, body).await?;
                    }

                    method => {
                        return Err(err_protocol!(
                            "unsupported authentication method: {:?}",
                            method
                        ));
                    }
                },

                MessageFormat::BackendKeyData => {
                    // provides secret-key data that the frontend must save
                    // to be able to issue cancel requests later
                    let data: BackendKeyData = message.decode()?;

                    process_id = data.process_id;
                    secret_key = data.secret_key;
                }

                MessageFormat::ReadyForQuery => {
                    // start-up is completed; the frontend can now issue commands
                    transaction_status = message
                        .decode::<crate::message::ReadyForQuery>()?
                        .transaction_status;

                    break;
                }

                _ => {
                    return Err(err_protocol!(
                        "establish: unexpected message: {:?}",
                        message.format
                    ));
                }
            }
        }

        if options.target_session_attrs == TargetSessionAttrs::ReadWrite {
            // `in_hot_standby` is reported by servers >= 14; the probe query
            // below covers the older ones
            if stream.parameter_status("in_hot_standby") == Some("on")
                || is_read_only(&mut stream).await?
            {
                return Err(Error::ReadOnly);
            }
        }

        Ok(PgConnection::new(
            stream,
            addr,
            process_id,
            secret_key,
            transaction_status,
            options,
            type_map,
        ))
    }
}

// `show transaction_read_only` reports `on` on a hot-standby replica and
// inside any read-only session
async fn is_read_only(stream: &mut PgStream) -> Result<bool, Error> {
    let mut read_only = false;

    stream.send(Query("show transaction_read_only")).await?;

    loop {
        let message = stream.recv().await?;

        match message.format {
            MessageFormat::DataRow => {
                let row: crate::message::DataRow = message.decode()?;

                if row.get(0) == Some(b"on") {
                    read_only = true;
                }
            }

            MessageFormat::ReadyForQuery => break,

            _ => {}
        }
    }

    Ok(read_only)
}
