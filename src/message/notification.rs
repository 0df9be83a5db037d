use bytes::{Buf, BufMut, Bytes};

use crate::error::Error;
use crate::io::{BufExt, BufMutExt, Decode, Encode};

/// An asynchronous `NOTIFY` delivery from the server.
#[derive(Debug, Clone, PartialEq)]
pub struct Notification {
    /// The process ID of the notifying backend.
    pub process_id: u32,

    /// The name of the channel the notification was raised on.
    pub channel: String,

    /// The payload string passed to `NOTIFY`, possibly empty.
    pub payload: String,
}

impl Decode for Notification {
    fn decode(mut buf: Bytes) -> Result<Self, Error> {
        if buf.remaining() < 4 {
            return Err(err_protocol!("NotificationResponse too short"));
        }

        let process_id = buf.get_u32();
        let channel = buf.get_str_nul()?;
        let payload = buf.get_str_nul()?;

        Ok(Self {
            process_id,
            channel,
            payload,
        })
    }
}

impl Encode for Notification {
    fn encode(&self, buf: &mut Vec<u8>) {
        buf.push(b'A');
        buf.put_length_prefixed(|buf| {
            buf.put_u32(self.process_id);
            buf.put_str_nul(&self.channel);
            buf.put_str_nul(&self.payload);
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_notification() {
        const DATA: &[u8] = b"\x34\x20\x10\x02TEST-CHANNEL\0THIS IS A TEST\0";

        let m = Notification::decode(DATA.into()).unwrap();

        assert_eq!(m.process_id, 0x34201002);
        assert_eq!(m.channel, "TEST-CHANNEL");
        assert_eq!(m.payload, "THIS IS A TEST");
    }

    #[test]
    fn test_round_trip() {
        let m = Notification {
            process_id: 551,
            channel: "stress".into(),
            payload: "hi".into(),
        };

        let mut buf = Vec::new();
        m.encode(&mut buf);

        assert_eq!(buf[0], b'A');
        assert_eq!(
            Notification::decode(Bytes::copy_from_slice(&buf[5..])).unwrap(),
            m
        );
    }
}
