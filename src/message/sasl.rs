use bytes::BufMut;

use crate::io::{BufMutExt, Encode};

/// The first client message of a SASL exchange: the selected mechanism and
/// the mechanism-specific initial response.
#[derive(Debug)]
pub struct SaslInitialResponse<'a> {
    pub mechanism: &'a str,
    pub response: &'a str,
}

impl Encode for SaslInitialResponse<'_> {
    fn encode(&self, buf: &mut Vec<u8>) {
        buf.push(b'p');

        buf.put_length_prefixed(|buf| {
            buf.put_str_nul(self.mechanism);
            buf.put_i32(self.response.len() as i32);
            buf.extend_from_slice(self.response.as_bytes());
        });
    }
}

/// A subsequent client message of a SASL exchange; the body is raw
/// mechanism-specific data.
#[derive(Debug)]
pub struct SaslResponse<'a>(pub &'a str);

impl Encode for SaslResponse<'_> {
    fn encode(&self, buf: &mut Vec<u8>) {
        buf.push(b'p');

        buf.put_length_prefixed(|buf| {
            buf.extend_from_slice(self.0.as_bytes());
        });
    }
}
