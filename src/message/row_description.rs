use bytes::{Buf, BufMut, Bytes};

use crate::error::Error;
use crate::io::{BufExt, BufMutExt, Decode, Encode};
use crate::statement::PgColumn;
use crate::types::{Oid, PgFormat};

/// Describes the fields of the rows about to be returned, one entry per
/// column in left-to-right order.
#[derive(Debug, Clone, PartialEq)]
pub struct RowDescription {
    pub fields: Vec<PgColumn>,
}

impl Decode for RowDescription {
    fn decode(mut buf: Bytes) -> Result<Self, Error> {
        if buf.remaining() < 2 {
            return Err(err_protocol!("RowDescription too short"));
        }

        let cnt = buf.get_u16();
        let mut fields = Vec::with_capacity(cnt as usize);

        for _ in 0..cnt {
            let name = buf.get_str_nul()?;

            if buf.remaining() < 18 {
                return Err(err_protocol!("RowDescription field truncated"));
            }

            let relation_id = buf.get_u32();
            let relation_attribute_no = buf.get_i16();
            let type_id = Oid(buf.get_u32());
            let type_size = buf.get_i16();
            let type_modifier = buf.get_i32();

            let format = buf.get_i16();
            let format = PgFormat::try_from_i16(format)
                .ok_or_else(|| err_protocol!("unknown field format code: {}", format))?;

            fields.push(PgColumn {
                name,
                relation_id,
                relation_attribute_no,
                type_id,
                type_size,
                type_modifier,
                format,
            });
        }

        Ok(Self { fields })
    }
}

impl Encode for RowDescription {
    fn encode(&self, buf: &mut Vec<u8>) {
        buf.push(b'T');
        buf.put_length_prefixed(|buf| {
            buf.put_u16(self.fields.len() as u16);

            for field in &self.fields {
                buf.put_str_nul(&field.name);
                buf.put_u32(field.relation_id);
                buf.put_i16(field.relation_attribute_no);
                buf.put_u32(field.type_id.0);
                buf.put_i16(field.type_size);
                buf.put_i32(field.type_modifier);
                buf.put_i16(field.format as i16);
            }
        });
    }
}
