pub trait BufMutExt {
    fn put_str_nul(&mut self, s: &str);

    // write a length-prefixed frame: reserves space for a big-endian `i32`,
    // runs `f` to produce the body, then patches the prefix with the final
    // length (the prefix counts itself, per the wire format)
    fn put_length_prefixed<F>(&mut self, f: F)
    where
        F: FnOnce(&mut Vec<u8>);
}

impl BufMutExt for Vec<u8> {
    fn put_str_nul(&mut self, s: &str) {
        self.extend_from_slice(s.as_bytes());
        self.push(0);
    }

    fn put_length_prefixed<F>(&mut self, f: F)
    where
        F: FnOnce(&mut Vec<u8>),
    {
        let offset = self.len();
        self.extend_from_slice(&[0; 4]);

        f(self);

        let size = (self.len() - offset) as i32;
        self[offset..(offset + 4)].copy_from_slice(&size.to_be_bytes());
    }
}

#[cfg(test)]
mod tests {
    use super::BufMutExt;

    #[test]
    fn test_put_str_nul() {
        let mut buf = Vec::new();
        buf.put_str_nul("db");

        assert_eq!(buf, b"db\0");
    }

    #[test]
    fn test_put_length_prefixed() {
        let mut buf = vec![b'Q'];
        buf.put_length_prefixed(|buf| {
            buf.put_str_nul("SELECT 1");
        });

        assert_eq!(buf, b"Q\0\0\0\rSELECT 1\0");
    }
}
