use bytes::{Buf, Bytes};
use memchr::memchr;

use crate::error::Error;

pub trait BufExt: Buf {
    // consume `len` bytes, zero-copy
    fn get_bytes(&mut self, len: usize) -> Bytes;

    // consume bytes up to (but not including) the next NUL; the NUL itself
    // is consumed as well
    fn get_bytes_nul(&mut self) -> Result<Bytes, Error>;

    fn get_str(&mut self, len: usize) -> Result<String, Error>;

    fn get_str_nul(&mut self) -> Result<String, Error>;
}

impl BufExt for Bytes {
    fn get_bytes(&mut self, len: usize) -> Bytes {
        self.split_to(len)
    }

    fn get_bytes_nul(&mut self) -> Result<Bytes, Error> {
        let nul =
            memchr(b'\0', self).ok_or_else(|| err_protocol!("expected NUL in byte sequence"))?;

        let v = self.split_to(nul);

        self.advance(1);

        Ok(v)
    }

    fn get_str(&mut self, len: usize) -> Result<String, Error> {
        let v = std::str::from_utf8(&self[..len])
            .map_err(|err| err_protocol!("{}", err))?
            .to_owned();

        self.advance(len);

        Ok(v)
    }

    fn get_str_nul(&mut self) -> Result<String, Error> {
        let nul =
            memchr(b'\0', self).ok_or_else(|| err_protocol!("expected NUL in string"))?;

        let v = std::str::from_utf8(&self[..nul])
            .map_err(|err| err_protocol!("{}", err))?
            .to_owned();

        self.advance(nul + 1);

        Ok(v)
    }
}

#[cfg(test)]
mod tests {
    use super::BufExt;
    use bytes::Bytes;

    #[test]
    fn test_get_str_nul() {
        let mut buf = Bytes::from_static(b"hello\0world\0");

        assert_eq!(buf.get_str_nul().unwrap(), "hello");
        assert_eq!(buf.get_str_nul().unwrap(), "world");
        assert!(buf.get_str_nul().is_err());
    }

    #[test]
    fn test_get_bytes_nul() {
        let mut buf = Bytes::from_static(b"\x01\x02\0rest");

        assert_eq!(&buf.get_bytes_nul().unwrap()[..], &[1, 2]);
        assert_eq!(&buf[..], b"rest");
    }
}
