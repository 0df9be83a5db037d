use bytes::Bytes;

use crate::error::Error;
use crate::io::{BufExt, BufMutExt, Decode, Encode};

/// Reports the current value of a server run-time parameter, sent at startup
/// and whenever a reportable parameter changes.
#[derive(Debug, Clone, PartialEq)]
pub struct ParameterStatus {
    pub name: String,
    pub value: String,
}

impl Decode for ParameterStatus {
    fn decode(mut buf: Bytes) -> Result<Self, Error> {
        let name = buf.get_str_nul()?;
        let value = buf.get_str_nul()?;

        Ok(Self { name, value })
    }
}

impl Encode for ParameterStatus {
    fn encode(&self, buf: &mut Vec<u8>) {
        buf.push(b'S');
        buf.put_length_prefixed(|buf| {
            buf.put_str_nul(&self.name);
            buf.put_str_nul(&self.value);
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_parameter_status() {
        const DATA: &[u8] = b"client_encoding\x00UTF8\x00";

        let m = ParameterStatus::decode(DATA.into()).unwrap();

        assert_eq!(&m.name, "client_encoding");
        assert_eq!(&m.value, "UTF8");
    }

    #[test]
    fn test_decode_empty_parameter_status() {
        const DATA: &[u8] = b"\x00\x00";

        let m = ParameterStatus::decode(DATA.into()).unwrap();

        assert!(m.name.is_empty());
        assert!(m.value.is_empty());
    }

    #[test]
    fn test_round_trip() {
        let m = ParameterStatus {
            name: "server_version".into(),
            value: "14.2".into(),
        };

        let mut buf = Vec::new();
        m.encode(&mut buf);

        assert_eq!(buf[0], b'S');
        assert_eq!(
            ParameterStatus::decode(Bytes::copy_from_slice(&buf[5..])).unwrap(),
            m
        );
    }
}
