use std::fmt::{self, Display, Formatter};

/// A PostgreSQL object identifier; used on the wire as a type tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct Oid(pub u32);

impl Oid {
    pub(crate) fn incr_one(&mut self) {
        self.0 = self.0.wrapping_add(1);
    }
}

impl Display for Oid {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        Display::fmt(&self.0, f)
    }
}

// Type OIDs for the builtin scalar types the core itself needs to know about.
// Everything else is the business of the [TypeMap][crate::TypeMap].
impl Oid {
    pub const UNSPECIFIED: Oid = Oid(0);
    pub const BOOL: Oid = Oid(oid::BOOL);
    pub const BYTEA: Oid = Oid(oid::BYTEA);
    pub const INT8: Oid = Oid(oid::INT8);
    pub const INT2: Oid = Oid(oid::INT2);
    pub const INT4: Oid = Oid(oid::INT4);
    pub const TEXT: Oid = Oid(oid::TEXT);
    pub const FLOAT4: Oid = Oid(oid::FLOAT4);
    pub const FLOAT8: Oid = Oid(oid::FLOAT8);
    pub const VARCHAR: Oid = Oid(oid::VARCHAR);
}

// associated constants cannot appear in match patterns; the raw values can
pub(crate) mod oid {
    pub const BOOL: u32 = 16;
    pub const BYTEA: u32 = 17;
    pub const INT8: u32 = 20;
    pub const INT2: u32 = 21;
    pub const INT4: u32 = 23;
    pub const TEXT: u32 = 25;
    pub const FLOAT4: u32 = 700;
    pub const FLOAT8: u32 = 701;
    pub const VARCHAR: u32 = 1043;
}

/// The data format of a parameter or result column: `0` is the text format,
/// `1` the binary format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i16)]
pub enum PgFormat {
    Text = 0,
    Binary = 1,
}

impl PgFormat {
    pub(crate) fn try_from_i16(value: i16) -> Option<PgFormat> {
        match value {
            0 => Some(PgFormat::Text),
            1 => Some(PgFormat::Binary),
            _ => None,
        }
    }
}

impl Default for PgFormat {
    fn default() -> Self {
        PgFormat::Text
    }
}
