use bytes::{Buf, BufMut, Bytes};

use crate::error::Error;
use crate::io::{BufExt, BufMutExt, Decode, Encode};

/// The protocol version this crate speaks: 3.0.
pub const PROTOCOL_VERSION: i32 = 3 << 16;

// an announced startup length (minus the length field itself) outside this
// range cannot be a well-formed startup packet
const MIN_STARTUP_BODY: i32 = 4;
const MAX_STARTUP_BODY: i32 = 10000;

/// The first message of a session: the protocol version followed by
/// `name\0value\0` parameter pairs and a terminating NUL.
///
/// `user` is required; `database` defaults server-side to the user name.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Startup {
    pub username: Option<String>,
    pub database: Option<String>,

    /// Additional runtime parameters to forward, e.g. `application_name`,
    /// `search_path`, `options`.
    pub params: Vec<(String, String)>,
}

impl Startup {
    /// Validate the announced length of a startup frame before reading its
    /// body; `len` excludes the length field itself.
    pub fn check_frame_len(len: i32) -> Result<(), Error> {
        if !(MIN_STARTUP_BODY..=MAX_STARTUP_BODY).contains(&len) {
            return Err(err_protocol!("invalid startup packet length: {}", len));
        }

        Ok(())
    }
}

impl Encode for Startup {
    fn encode(&self, buf: &mut Vec<u8>) {
        buf.put_length_prefixed(|buf| {
            buf.put_i32(PROTOCOL_VERSION);

            if let Some(username) = &self.username {
                encode_startup_param(buf, "user", username);
            }

            if let Some(database) = &self.database {
                encode_startup_param(buf, "database", database);
            }

            for (name, value) in &self.params {
                encode_startup_param(buf, name, value);
            }

            buf.push(0);
        });
    }
}

impl Decode for Startup {
    fn decode(mut buf: Bytes) -> Result<Self, Error> {
        if buf.remaining() < 4 {
            return Err(err_protocol!("startup packet too short"));
        }

        let version = buf.get_i32();
        if version != PROTOCOL_VERSION {
            return Err(err_protocol!(
                "unsupported protocol version: {}.{}",
                version >> 16,
                version & 0xffff
            ));
        }

        let mut username = None;
        let mut database = None;
        let mut params = Vec::new();

        loop {
            if buf.first() == Some(&0) || buf.is_empty() {
                break;
            }

            let name = buf.get_str_nul()?;
            let value = buf.get_str_nul()?;

            match name.as_str() {
                "user" => username = Some(value),
                "database" => database = Some(value),
                _ => params.push((name, value)),
            }
        }

        Ok(Self {
            username,
            database,
            params,
        })
    }
}

fn encode_startup_param(buf: &mut Vec<u8>, name: &str, value: &str) {
    buf.put_str_nul(name);
    buf.put_str_nul(value);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_startup() {
        const EXPECTED: &[u8] = b"\0\0\0\x29\x00\x03\x00\x00user\0postgres\0database\0postgres\0\0";

        let mut buf = Vec::new();
        Startup {
            username: Some("postgres".into()),
            database: Some("postgres".into()),
            params: vec![],
        }
        .encode(&mut buf);

        assert_eq!(buf, EXPECTED);
    }

    #[test]
    fn test_round_trip() {
        let m = Startup {
            username: Some("root".into()),
            database: None,
            params: vec![("application_name".into(), "pgcore-tests".into())],
        };

        let mut buf = Vec::new();
        m.encode(&mut buf);

        // the length prefix is stripped by framing
        assert_eq!(Startup::decode(Bytes::copy_from_slice(&buf[4..])).unwrap(), m);
    }

    #[test]
    fn test_frame_len_bounds() {
        assert!(Startup::check_frame_len(3).is_err());
        assert!(Startup::check_frame_len(4).is_ok());
        assert!(Startup::check_frame_len(10000).is_ok());
        assert!(Startup::check_frame_len(10001).is_err());
    }
}
