use crate::io::{BufMutExt, Encode};

const CLOSE_PORTAL: u8 = b'P';
const CLOSE_STATEMENT: u8 = b'S';

/// Ask the server to release a prepared statement or portal.
#[derive(Debug)]
pub enum Close<'a> {
    Statement(&'a str),
    Portal(&'a str),
}

impl Encode for Close<'_> {
    fn encode(&self, buf: &mut Vec<u8>) {
        buf.push(b'C');

        buf.put_length_prefixed(|buf| match self {
            Close::Statement(name) => {
                buf.push(CLOSE_STATEMENT);
                buf.put_str_nul(name);
            }

            Close::Portal(name) => {
                buf.push(CLOSE_PORTAL);
                buf.put_str_nul(name);
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_close_statement() {
        const EXPECTED: &[u8] = b"C\0\0\0\x11Sstmtcache_1\0";

        let mut buf = Vec::new();
        Close::Statement("stmtcache_1").encode(&mut buf);

        assert_eq!(buf, EXPECTED);
    }

    #[test]
    fn test_encode_close_unnamed_portal() {
        const EXPECTED: &[u8] = b"C\0\0\0\x06P\0";

        let mut buf = Vec::new();
        Close::Portal("").encode(&mut buf);

        assert_eq!(buf, EXPECTED);
    }
}
