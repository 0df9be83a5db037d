use bytes::{Buf, BufMut, Bytes};

use crate::error::Error;
use crate::io::{Decode, Encode};

/// The SSL request code: `1234 5679` in the most- and least-significant
/// 16 bits. Chosen to not collide with any protocol version number.
pub const SSL_REQUEST_CODE: i32 = (1234 << 16) | 5679;

/// Sent first on a connection that wants TLS. The server answers with a
/// single byte: `S` to proceed with the TLS handshake, `N` to refuse.
#[derive(Debug, PartialEq)]
pub struct SslRequest;

impl Encode for SslRequest {
    fn encode(&self, buf: &mut Vec<u8>) {
        buf.put_i32(8);
        buf.put_i32(SSL_REQUEST_CODE);
    }
}

impl Decode for SslRequest {
    fn decode(mut buf: Bytes) -> Result<Self, Error> {
        if buf.remaining() < 4 {
            return Err(err_protocol!("ssl request too short"));
        }

        let code = buf.get_i32();
        if code != SSL_REQUEST_CODE {
            return Err(err_protocol!("invalid ssl request code: {}", code));
        }

        Ok(SslRequest)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_trip() {
        let mut buf = Vec::new();
        SslRequest.encode(&mut buf);

        assert_eq!(buf, b"\0\0\0\x08\x04\xd2\x16\x2f");

        assert_eq!(
            SslRequest::decode(Bytes::copy_from_slice(&buf[4..])).unwrap(),
            SslRequest
        );
    }
}
