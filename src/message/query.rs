use crate::io::{BufMutExt, Encode};

/// A simple-protocol query: plain SQL text, possibly several statements
/// separated by semicolons, executed in one implicit transaction.
#[derive(Debug)]
pub struct Query<'a>(pub &'a str);

impl Encode for Query<'_> {
    fn encode(&self, buf: &mut Vec<u8>) {
        buf.push(b'Q');
        buf.put_length_prefixed(|buf| {
            buf.put_str_nul(self.0);
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_query() {
        const EXPECTED: &[u8] = b"Q\0\0\0\x0dSELECT 1\0";

        let mut buf = Vec::new();
        Query("SELECT 1").encode(&mut buf);

        assert_eq!(buf, EXPECTED);
    }
}
