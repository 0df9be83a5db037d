use crate::types::{oid as oids, Oid, PgFormat};

/// Errors produced by a [TypeMap]; surfaced as
/// [`Error::Encode`][crate::Error::Encode] / [`Error::Decode`][crate::Error::Decode].
pub type BoxDynError = Box<dyn std::error::Error + Send + Sync>;

/// Whether an encoded value was SQL NULL.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IsNull {
    Yes,
    No,
}

/// A host-side value to be bound to a query parameter or decoded from a
/// result column.
///
/// This enum is the neutral interchange format between the query engine and
/// a [TypeMap]; richer host types belong to a type map implementation built
/// above this crate.
#[derive(Debug, Clone, PartialEq)]
pub enum PgArgument {
    Null,
    Bool(bool),
    Int2(i16),
    Int4(i32),
    Int8(i64),
    Float4(f32),
    Float8(f64),
    Text(String),
    Bytea(Vec<u8>),
}

impl PgArgument {
    pub fn is_null(&self) -> bool {
        matches!(self, PgArgument::Null)
    }

    /// The textual form used by the `Exec` mode (all-text parameters) and
    /// by text-format encoding.
    pub(crate) fn to_text(&self) -> Option<String> {
        Some(match self {
            PgArgument::Null => return None,
            PgArgument::Bool(true) => "t".to_owned(),
            PgArgument::Bool(false) => "f".to_owned(),
            PgArgument::Int2(v) => itoa::Buffer::new().format(*v).to_owned(),
            PgArgument::Int4(v) => itoa::Buffer::new().format(*v).to_owned(),
            PgArgument::Int8(v) => itoa::Buffer::new().format(*v).to_owned(),
            PgArgument::Float4(v) => float_to_text(f64::from(*v)),
            PgArgument::Float8(v) => float_to_text(*v),
            PgArgument::Text(v) => v.clone(),

            PgArgument::Bytea(v) => {
                let mut s = String::with_capacity(2 + v.len() * 2);
                s.push_str("\\x");
                s.push_str(&hex::encode(v));
                s
            }
        })
    }
}

pub(crate) fn float_to_text(v: f64) -> String {
    if v.is_nan() {
        "NaN".to_owned()
    } else if v == f64::INFINITY {
        "Infinity".to_owned()
    } else if v == f64::NEG_INFINITY {
        "-Infinity".to_owned()
    } else {
        let mut s = v.to_string();
        // `Display` for floats omits the exponent postgres accepts; it also
        // renders integral floats without a fractional part, which postgres
        // parses fine
        if !s.contains('.') && !s.contains('e') && v.is_finite() {
            s.push_str(".0");
        }
        s
    }
}

impl From<bool> for PgArgument {
    fn from(v: bool) -> Self {
        PgArgument::Bool(v)
    }
}

impl From<i16> for PgArgument {
    fn from(v: i16) -> Self {
        PgArgument::Int2(v)
    }
}

impl From<i32> for PgArgument {
    fn from(v: i32) -> Self {
        PgArgument::Int4(v)
    }
}

impl From<i64> for PgArgument {
    fn from(v: i64) -> Self {
        PgArgument::Int8(v)
    }
}

impl From<f32> for PgArgument {
    fn from(v: f32) -> Self {
        PgArgument::Float4(v)
    }
}

impl From<f64> for PgArgument {
    fn from(v: f64) -> Self {
        PgArgument::Float8(v)
    }
}

impl From<&str> for PgArgument {
    fn from(v: &str) -> Self {
        PgArgument::Text(v.to_owned())
    }
}

impl From<String> for PgArgument {
    fn from(v: String) -> Self {
        PgArgument::Text(v)
    }
}

impl From<Vec<u8>> for PgArgument {
    fn from(v: Vec<u8>) -> Self {
        PgArgument::Bytea(v)
    }
}

impl<T: Into<PgArgument>> From<Option<T>> for PgArgument {
    fn from(v: Option<T>) -> Self {
        v.map(Into::into).unwrap_or(PgArgument::Null)
    }
}

/// The registry mapping between PostgreSQL type OIDs and host values.
///
/// The query engine is written entirely against this boundary; a richer
/// implementation (arrays, composites, user-defined types) can be supplied
/// per connection. Implementations are read-only once connected and may be
/// shared between connections.
pub trait TypeMap: Send + Sync {
    /// Encode `value` as a parameter of type `oid` in `format`, appending
    /// the wire bytes to `buf`. Returning [`IsNull::Yes`] means nothing was
    /// appended and the parameter is SQL NULL.
    fn encode(
        &self,
        oid: Oid,
        format: PgFormat,
        value: &PgArgument,
        buf: &mut Vec<u8>,
    ) -> Result<IsNull, BoxDynError>;

    /// Decode the wire bytes of a result column of type `oid` in `format`;
    /// `None` is SQL NULL.
    fn decode(
        &self,
        oid: Oid,
        format: PgFormat,
        value: Option<&[u8]>,
    ) -> Result<PgArgument, BoxDynError>;

    /// The format this map prefers to receive values of type `oid` in.
    fn preferred_format(&self, oid: Oid) -> PgFormat;

    /// The parameter OID to declare for a host value when the statement has
    /// not been described; `None` lets the server infer it.
    fn oid_of(&self, value: &PgArgument) -> Option<Oid>;
}

/// The builtin [TypeMap]: the scalar types the protocol layer itself needs.
#[derive(Debug, Default)]
pub struct PgTypeMap;

impl TypeMap for PgTypeMap {
    fn encode(
        &self,
        oid: Oid,
        format: PgFormat,
        value: &PgArgument,
        buf: &mut Vec<u8>,
    ) -> Result<IsNull, BoxDynError> {
        if value.is_null() {
            return Ok(IsNull::Yes);
        }

        if format == PgFormat::Text {
            // unwrap: only `Null` has no text form, handled above
            buf.extend_from_slice(value.to_text().unwrap().as_bytes());
            return Ok(IsNull::No);
        }

        match (oid.0, value) {
            (oids::BOOL, PgArgument::Bool(v)) => buf.push(*v as u8),

            (oids::INT2, PgArgument::Int2(v)) => buf.extend_from_slice(&v.to_be_bytes()),
            (oids::INT4, PgArgument::Int4(v)) => buf.extend_from_slice(&v.to_be_bytes()),
            (oids::INT8, PgArgument::Int8(v)) => buf.extend_from_slice(&v.to_be_bytes()),

            // widening an argument to the declared parameter type is safe
            (oids::INT4, PgArgument::Int2(v)) => {
                buf.extend_from_slice(&i32::from(*v).to_be_bytes())
            }
            (oids::INT8, PgArgument::Int2(v)) => {
                buf.extend_from_slice(&i64::from(*v).to_be_bytes())
            }
            (oids::INT8, PgArgument::Int4(v)) => {
                buf.extend_from_slice(&i64::from(*v).to_be_bytes())
            }

            (oids::FLOAT4, PgArgument::Float4(v)) => {
                buf.extend_from_slice(&v.to_bits().to_be_bytes())
            }
            (oids::FLOAT8, PgArgument::Float8(v)) => {
                buf.extend_from_slice(&v.to_bits().to_be_bytes())
            }
            (oids::FLOAT8, PgArgument::Float4(v)) => {
                buf.extend_from_slice(&f64::from(*v).to_bits().to_be_bytes())
            }

            (oids::TEXT | oids::VARCHAR, PgArgument::Text(v)) => {
                buf.extend_from_slice(v.as_bytes())
            }

            (oids::BYTEA, PgArgument::Bytea(v)) => buf.extend_from_slice(v),

            (oid, value) => {
                return Err(format!(
                    "cannot encode {:?} as binary for type with OID {}",
                    value, oid
                )
                .into());
            }
        }

        Ok(IsNull::No)
    }

    fn decode(
        &self,
        oid: Oid,
        format: PgFormat,
        value: Option<&[u8]>,
    ) -> Result<PgArgument, BoxDynError> {
        let value = match value {
            Some(value) => value,
            None => return Ok(PgArgument::Null),
        };

        if format == PgFormat::Text {
            let text = std::str::from_utf8(value)?;

            return Ok(match oid.0 {
                oids::BOOL => PgArgument::Bool(text == "t"),
                oids::INT2 => PgArgument::Int2(text.parse()?),
                oids::INT4 => PgArgument::Int4(text.parse()?),
                oids::INT8 => PgArgument::Int8(text.parse()?),
                oids::FLOAT4 => PgArgument::Float4(text.parse()?),
                oids::FLOAT8 => PgArgument::Float8(text.parse()?),
                _ => PgArgument::Text(text.to_owned()),
            });
        }

        Ok(match oid.0 {
            oids::BOOL => PgArgument::Bool(value == [1]),

            oids::INT2 => PgArgument::Int2(i16::from_be_bytes(value.try_into()?)),
            oids::INT4 => PgArgument::Int4(i32::from_be_bytes(value.try_into()?)),
            oids::INT8 => PgArgument::Int8(i64::from_be_bytes(value.try_into()?)),

            oids::FLOAT4 => {
                PgArgument::Float4(f32::from_bits(u32::from_be_bytes(value.try_into()?)))
            }
            oids::FLOAT8 => {
                PgArgument::Float8(f64::from_bits(u64::from_be_bytes(value.try_into()?)))
            }

            oids::TEXT | oids::VARCHAR => {
                PgArgument::Text(std::str::from_utf8(value)?.to_owned())
            }

            _ => PgArgument::Bytea(value.to_vec()),
        })
    }

    fn preferred_format(&self, oid: Oid) -> PgFormat {
        match oid.0 {
            oids::BOOL
            | oids::INT2
            | oids::INT4
            | oids::INT8
            | oids::FLOAT4
            | oids::FLOAT8
            | oids::BYTEA
            | oids::TEXT
            | oids::VARCHAR => PgFormat::Binary,

            // types this map does not understand stay textual
            _ => PgFormat::Text,
        }
    }

    fn oid_of(&self, value: &PgArgument) -> Option<Oid> {
        Some(match value {
            PgArgument::Null => return None,
            PgArgument::Bool(_) => Oid::BOOL,
            PgArgument::Int2(_) => Oid::INT2,
            PgArgument::Int4(_) => Oid::INT4,
            PgArgument::Int8(_) => Oid::INT8,
            PgArgument::Float4(_) => Oid::FLOAT4,
            PgArgument::Float8(_) => Oid::FLOAT8,
            PgArgument::Text(_) => Oid::TEXT,
            PgArgument::Bytea(_) => Oid::BYTEA,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_binary_int4_round_trip() {
        let map = PgTypeMap;

        let mut buf = Vec::new();
        let is_null = map
            .encode(Oid::INT4, PgFormat::Binary, &PgArgument::Int4(42), &mut buf)
            .unwrap();

        assert_eq!(is_null, IsNull::No);
        assert_eq!(buf, [0, 0, 0, 42]);

        let decoded = map.decode(Oid::INT4, PgFormat::Binary, Some(&buf)).unwrap();
        assert_eq!(decoded, PgArgument::Int4(42));
    }

    #[test]
    fn test_null_encodes_to_nothing() {
        let map = PgTypeMap;

        let mut buf = Vec::new();
        let is_null = map
            .encode(Oid::TEXT, PgFormat::Binary, &PgArgument::Null, &mut buf)
            .unwrap();

        assert_eq!(is_null, IsNull::Yes);
        assert!(buf.is_empty());
    }

    #[test]
    fn test_text_formats() {
        assert_eq!(PgArgument::Bool(true).to_text().unwrap(), "t");
        assert_eq!(PgArgument::Int8(-7).to_text().unwrap(), "-7");
        assert_eq!(PgArgument::Float8(1.5).to_text().unwrap(), "1.5");
        assert_eq!(PgArgument::Float8(3.0).to_text().unwrap(), "3.0");
        assert_eq!(PgArgument::Float8(f64::NAN).to_text().unwrap(), "NaN");
        assert_eq!(
            PgArgument::Bytea(vec![0xde, 0xad]).to_text().unwrap(),
            "\\xdead"
        );
        assert!(PgArgument::Null.to_text().is_none());
    }

    #[test]
    fn test_decode_null() {
        let map = PgTypeMap;

        let decoded = map.decode(Oid::TEXT, PgFormat::Binary, None).unwrap();
        assert_eq!(decoded, PgArgument::Null);
    }
}
