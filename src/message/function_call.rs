use bytes::{Buf, BufMut, Bytes};

use crate::error::Error;
use crate::io::{BufMutExt, Decode, Encode};
use crate::types::{Oid, PgFormat};

/// Direct invocation of a server-side function by OID.
///
/// The extended query protocol is the preferred way to call functions; this
/// message exists for completeness and legacy clients.
#[derive(Debug)]
pub struct FunctionCall<'a> {
    /// The OID of the function to call.
    pub function: Oid,

    /// Argument format codes (same shorthand conventions as `Bind`).
    pub arg_formats: &'a [PgFormat],

    /// The arguments, `None` encoding SQL NULL.
    pub args: &'a [Option<&'a [u8]>],

    /// The desired format of the result.
    pub result_format: PgFormat,
}

impl Encode for FunctionCall<'_> {
    fn encode(&self, buf: &mut Vec<u8>) {
        buf.push(b'F');

        buf.put_length_prefixed(|buf| {
            buf.put_u32(self.function.0);

            buf.put_i16(self.arg_formats.len() as i16);
            for &format in self.arg_formats {
                buf.put_i16(format as i16);
            }

            buf.put_i16(self.args.len() as i16);
            for arg in self.args {
                match arg {
                    Some(data) => {
                        buf.put_i32(data.len() as i32);
                        buf.extend_from_slice(data);
                    }

                    None => buf.put_i32(-1),
                }
            }

            buf.put_i16(self.result_format as i16);
        });
    }
}

/// The result of a [FunctionCall]; `None` when the function returned NULL.
#[derive(Debug, PartialEq)]
pub struct FunctionCallResponse {
    pub value: Option<Bytes>,
}

impl Decode for FunctionCallResponse {
    fn decode(mut buf: Bytes) -> Result<Self, Error> {
        if buf.remaining() < 4 {
            return Err(err_protocol!("FunctionCallResponse too short"));
        }

        let length = buf.get_i32();

        let value = if length < 0 {
            None
        } else {
            let length = length as usize;

            if buf.remaining() < length {
                return Err(err_protocol!("FunctionCallResponse value truncated"));
            }

            Some(buf.split_to(length))
        };

        Ok(FunctionCallResponse { value })
    }
}

impl Encode for FunctionCallResponse {
    fn encode(&self, buf: &mut Vec<u8>) {
        buf.push(b'V');
        buf.put_length_prefixed(|buf| match &self.value {
            Some(value) => {
                buf.put_i32(value.len() as i32);
                buf.extend_from_slice(value);
            }

            None => buf.put_i32(-1),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_function_call() {
        const EXPECTED: &[u8] =
            b"F\0\0\0\x16\0\0\x01\xa9\0\x01\0\x01\0\x01\0\0\0\x02\0\x2a\0\x01";

        let mut buf = Vec::new();
        FunctionCall {
            function: Oid(425),
            arg_formats: &[PgFormat::Binary],
            args: &[Some(&[0, 42])],
            result_format: PgFormat::Binary,
        }
        .encode(&mut buf);

        assert_eq!(buf, EXPECTED);
    }

    #[test]
    fn test_function_call_response_round_trip() {
        for m in [
            FunctionCallResponse { value: None },
            FunctionCallResponse {
                value: Some(Bytes::from_static(b"\x00\x01")),
            },
        ] {
            let mut buf = Vec::new();
            m.encode(&mut buf);

            assert_eq!(buf[0], b'V');
            assert_eq!(
                FunctionCallResponse::decode(Bytes::copy_from_slice(&buf[5..])).unwrap(),
                m
            );
        }
    }
}
