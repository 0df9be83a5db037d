use bytes::{Buf, BufMut, Bytes};

use crate::error::Error;
use crate::io::{BufMutExt, Decode, Encode};

/// One row of a result set.
///
/// A SQL NULL is carried as a length of `-1` on the wire and is distinct
/// from a zero-length value.
#[derive(Debug, Clone, PartialEq)]
pub struct DataRow {
    values: Vec<Option<Bytes>>,
}

impl DataRow {
    pub fn new(values: Vec<Option<Bytes>>) -> Self {
        DataRow { values }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    #[inline]
    pub fn get(&self, index: usize) -> Option<&[u8]> {
        self.values[index].as_deref()
    }

    #[inline]
    pub fn values(&self) -> &[Option<Bytes>] {
        &self.values
    }
}

impl Decode for DataRow {
    fn decode(mut buf: Bytes) -> Result<Self, Error> {
        if buf.remaining() < 2 {
            return Err(err_protocol!("DataRow message too short"));
        }

        let cnt = buf.get_u16() as usize;
        let mut values = Vec::with_capacity(cnt);

        for _ in 0..cnt {
            if buf.remaining() < 4 {
                return Err(err_protocol!("DataRow message truncated"));
            }

            let length = buf.get_i32();

            if length < 0 {
                values.push(None);
            } else {
                let length = length as usize;

                if buf.remaining() < length {
                    return Err(err_protocol!("DataRow value truncated"));
                }

                values.push(Some(buf.split_to(length)));
            }
        }

        Ok(DataRow { values })
    }
}

impl Encode for DataRow {
    fn encode(&self, buf: &mut Vec<u8>) {
        buf.push(b'D');
        buf.put_length_prefixed(|buf| {
            buf.put_i16(self.values.len() as i16);

            for value in &self.values {
                match value {
                    Some(value) => {
                        buf.put_i32(value.len() as i32);
                        buf.extend_from_slice(value);
                    }

                    None => buf.put_i32(-1),
                }
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_data_row() {
        const DATA: &[u8] = b"\x00\x08\xff\xff\xff\xff\x00\x00\x00\x04\x00\x00\x00\x01\xff\xff\xff\xff\x00\x00\x00\x04\x00\x00\x00\x02\xff\xff\xff\xff\x00\x00\x00\x04\x00\x00\x00\x03\xff\xff\xff\xff";

        let row = DataRow::decode(DATA.into()).unwrap();

        assert_eq!(row.len(), 8);

        assert!(row.get(0).is_none());
        assert_eq!(row.get(1).unwrap(), &[0, 0, 0, 1]);
        assert!(row.get(2).is_none());
        assert_eq!(row.get(3).unwrap(), &[0, 0, 0, 2]);
        assert!(row.get(4).is_none());
        assert_eq!(row.get(5).unwrap(), &[0, 0, 0, 3]);
        assert!(row.get(6).is_none());
        assert!(row.get(7).is_none());
    }

    #[test]
    fn test_null_is_not_empty() {
        const DATA: &[u8] = b"\x00\x02\xff\xff\xff\xff\x00\x00\x00\x00";

        let row = DataRow::decode(DATA.into()).unwrap();

        assert!(row.get(0).is_none());
        assert_eq!(row.get(1), Some(&[][..]));
    }

    #[test]
    fn test_round_trip() {
        let row = DataRow::new(vec![
            Some(Bytes::from_static(b"\x00\x00\x00\x2a")),
            None,
            Some(Bytes::from_static(b"")),
        ]);

        let mut buf = Vec::new();
        row.encode(&mut buf);

        assert_eq!(buf[0], b'D');
        assert_eq!(
            DataRow::decode(Bytes::copy_from_slice(&buf[5..])).unwrap(),
            row
        );
    }
}
