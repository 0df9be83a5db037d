use std::str::from_utf8;

use bytes::{Buf, BufMut, Bytes};
use memchr::memchr;

use crate::error::Error;
use crate::io::{Decode, Encode};

// On startup, the server sends an appropriate authentication request message,
// to which the frontend must reply with an appropriate authentication
// response message (such as a password).

// <https://www.postgresql.org/docs/current/protocol-flow.html#id-1.10.5.7.3>

#[derive(Debug, PartialEq)]
pub enum Authentication {
    /// The authentication exchange is successfully completed.
    Ok,

    /// Kerberos V5 authentication is required.
    KerberosV5,

    /// The frontend must now send a [Password] message containing the
    /// password in clear-text form.
    CleartextPassword,

    /// The frontend must now send a [Password] message containing the
    /// password (with user name) encrypted via MD5, then encrypted
    /// again using the 4-byte random salt.
    Md5Password(AuthenticationMd5Password),

    /// An SCM credentials message is required.
    ScmCredential,

    /// GSSAPI authentication is required.
    Gss,

    /// This message contains GSSAPI or SSPI data.
    GssContinue(Bytes),

    /// SSPI authentication is required.
    Sspi,

    /// The frontend must now initiate a SASL negotiation, using one of the
    /// SASL mechanisms listed in the message.
    Sasl(AuthenticationSasl),

    /// This message contains challenge data from the previous step of the
    /// SASL negotiation; the frontend must respond with a [SaslResponse].
    SaslContinue(Bytes),

    /// SASL authentication has completed with additional mechanism-specific
    /// data for the client.
    SaslFinal(Bytes),
}

impl Decode for Authentication {
    fn decode(mut buf: Bytes) -> Result<Self, Error> {
        if buf.remaining() < 4 {
            return Err(err_protocol!("authentication message too short"));
        }

        Ok(match buf.get_u32() {
            0 => Authentication::Ok,
            2 => Authentication::KerberosV5,
            3 => Authentication::CleartextPassword,

            5 => {
                if buf.remaining() < 4 {
                    return Err(err_protocol!("MD5 authentication message missing salt"));
                }

                let mut salt = [0; 4];
                buf.copy_to_slice(&mut salt);

                Authentication::Md5Password(AuthenticationMd5Password { salt })
            }

            6 => Authentication::ScmCredential,
            7 => Authentication::Gss,
            8 => Authentication::GssContinue(buf),
            9 => Authentication::Sspi,
            10 => Authentication::Sasl(AuthenticationSasl(buf)),
            11 => Authentication::SaslContinue(buf),
            12 => Authentication::SaslFinal(buf),

            ty => {
                return Err(err_protocol!("unknown authentication method: {}", ty));
            }
        })
    }
}

impl Encode for Authentication {
    fn encode(&self, buf: &mut Vec<u8>) {
        buf.push(b'R');

        let start = buf.len();
        buf.extend_from_slice(&[0; 4]);

        match self {
            Authentication::Ok => buf.put_u32(0),
            Authentication::KerberosV5 => buf.put_u32(2),
            Authentication::CleartextPassword => buf.put_u32(3),

            Authentication::Md5Password(body) => {
                buf.put_u32(5);
                buf.extend_from_slice(&body.salt);
            }

            Authentication::ScmCredential => buf.put_u32(6),
            Authentication::Gss => buf.put_u32(7),

            Authentication::GssContinue(data) => {
                buf.put_u32(8);
                buf.extend_from_slice(data);
            }

            Authentication::Sspi => buf.put_u32(9),

            Authentication::Sasl(body) => {
                buf.put_u32(10);
                buf.extend_from_slice(&body.0);
            }

            Authentication::SaslContinue(data) => {
                buf.put_u32(11);
                buf.extend_from_slice(data);
            }

            Authentication::SaslFinal(data) => {
                buf.put_u32(12);
                buf.extend_from_slice(data);
            }
        }

        let size = (buf.len() - start) as i32;
        buf[start..(start + 4)].copy_from_slice(&size.to_be_bytes());
    }
}

/// Body of [Authentication::Md5Password].
#[derive(Debug, PartialEq)]
pub struct AuthenticationMd5Password {
    pub salt: [u8; 4],
}

/// Body of [Authentication::Sasl]: the mechanisms the server offers,
/// as a NUL-separated list terminated by an empty name.
#[derive(Debug, PartialEq)]
pub struct AuthenticationSasl(Bytes);

impl AuthenticationSasl {
    #[inline]
    pub fn mechanisms(&self) -> SaslMechanisms<'_> {
        SaslMechanisms(&self.0)
    }

    pub fn from_mechanisms(mechanisms: &[&str]) -> Self {
        let mut buf = Vec::new();
        for mechanism in mechanisms {
            buf.extend_from_slice(mechanism.as_bytes());
            buf.push(0);
        }
        buf.push(0);

        AuthenticationSasl(buf.into())
    }
}

/// An iterator over the SASL mechanisms offered by the server.
pub struct SaslMechanisms<'a>(&'a [u8]);

impl<'a> Iterator for SaslMechanisms<'a> {
    type Item = &'a str;

    fn next(&mut self) -> Option<Self::Item> {
        let mechanism = memchr(b'\0', self.0).and_then(|nul| from_utf8(&self.0[..nul]).ok())?;

        if mechanism.is_empty() {
            return None;
        }

        self.0 = &self.0[(mechanism.len() + 1)..];

        Some(mechanism)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_auth_ok() {
        const DATA: &[u8] = b"\x00\x00\x00\x00";

        let m = Authentication::decode(DATA.into()).unwrap();

        assert_eq!(m, Authentication::Ok);
    }

    #[test]
    fn test_decode_auth_md5_password() {
        const DATA: &[u8] = b"\x00\x00\x00\x05\x0a\x0b\x0c\x0d";

        let m = Authentication::decode(DATA.into()).unwrap();

        assert_eq!(
            m,
            Authentication::Md5Password(AuthenticationMd5Password {
                salt: [10, 11, 12, 13]
            })
        );
    }

    #[test]
    fn test_decode_auth_sasl_mechanisms() {
        const DATA: &[u8] = b"\x00\x00\x00\x0aSCRAM-SHA-256\0SCRAM-SHA-256-PLUS\0\0";

        let m = Authentication::decode(DATA.into()).unwrap();

        let mechanisms: Vec<&str> = match &m {
            Authentication::Sasl(body) => body.mechanisms().collect(),
            other => panic!("expected Sasl, got {:?}", other),
        };

        assert_eq!(mechanisms, ["SCRAM-SHA-256", "SCRAM-SHA-256-PLUS"]);
    }

    #[test]
    fn test_round_trip() {
        let messages = [
            Authentication::Ok,
            Authentication::CleartextPassword,
            Authentication::Md5Password(AuthenticationMd5Password { salt: [1, 2, 3, 4] }),
            Authentication::SaslContinue(Bytes::from_static(b"r=abc,s=xyz,i=4096")),
            Authentication::Sasl(AuthenticationSasl::from_mechanisms(&["SCRAM-SHA-256"])),
        ];

        for m in messages {
            let mut buf = Vec::new();
            m.encode(&mut buf);

            assert_eq!(buf[0], b'R');

            let body = Bytes::copy_from_slice(&buf[5..]);
            assert_eq!(Authentication::decode(body).unwrap(), m);
        }
    }
}
