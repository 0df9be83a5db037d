use bytes::{Buf, Bytes};
use memchr::memrchr;

use crate::error::Error;
use crate::io::{BufMutExt, Decode, Encode};

/// A SQL command completed normally. Carries the command tag, e.g.
/// `SELECT 3` or `INSERT 0 5`.
#[derive(Debug, Clone, PartialEq)]
pub struct CommandComplete {
    // the tag without its trailing NUL
    tag: Bytes,
}

impl CommandComplete {
    pub fn new(tag: &str) -> Self {
        CommandComplete {
            tag: Bytes::copy_from_slice(tag.as_bytes()),
        }
    }

    /// The raw command tag as reported by the server.
    pub fn tag(&self) -> &str {
        std::str::from_utf8(&self.tag).unwrap_or_default()
    }

    /// The number of rows affected, derived from the final space-separated
    /// token of the tag; zero for commands that do not report a count.
    pub fn rows_affected(&self) -> u64 {
        let tail = match memrchr(b' ', &self.tag) {
            Some(i) => &self.tag[(i + 1)..],
            None => return 0,
        };

        atoi::atoi(tail).unwrap_or(0)
    }
}

impl Decode for CommandComplete {
    fn decode(mut buf: Bytes) -> Result<Self, Error> {
        // strip the trailing NUL if present
        if buf.last() == Some(&0) {
            buf.truncate(buf.remaining() - 1);
        }

        Ok(CommandComplete { tag: buf })
    }
}

impl Encode for CommandComplete {
    fn encode(&self, buf: &mut Vec<u8>) {
        buf.push(b'C');
        buf.put_length_prefixed(|buf| {
            buf.extend_from_slice(&self.tag);
            buf.push(0);
        });
    }
}
