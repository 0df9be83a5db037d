use std::str::from_utf8;

use bytes::Bytes;
use memchr::memchr;

use crate::error::{Error, PgSeverity};
use crate::io::{BufMutExt, Decode, Encode};

/// The decoded field set of an `ErrorResponse` or `NoticeResponse`.
///
/// Fields are kept in their wire representation and located lazily; the
/// severity, code, and message (the three always-present fields) are cached
/// at decode time. Unknown field codes are preserved and ignored.
#[derive(Debug, Clone)]
pub struct Notice {
    storage: Bytes,
    severity: PgSeverity,
    message: (u16, u16),
    code: (u16, u16),
}

impl Notice {
    #[inline]
    pub fn severity(&self) -> PgSeverity {
        self.severity
    }

    /// The SQLSTATE code.
    #[inline]
    pub fn code(&self) -> &str {
        self.get_cached_str(self.code)
    }

    /// The primary human-readable message.
    #[inline]
    pub fn message(&self) -> &str {
        self.get_cached_str(self.message)
    }

    pub fn detail(&self) -> Option<&str> {
        self.get(b'D')
    }

    pub fn hint(&self) -> Option<&str> {
        self.get(b'H')
    }

    pub fn position(&self) -> Option<u32> {
        self.get(b'P').and_then(|pos| pos.parse().ok())
    }

    // Field descriptions available in
    //  https://www.postgresql.org/docs/current/protocol-error-fields.html

    #[inline]
    pub fn get(&self, ty: u8) -> Option<&str> {
        self.get_raw(ty).and_then(|v| from_utf8(v).ok())
    }

    pub fn get_raw(&self, ty: u8) -> Option<&[u8]> {
        self.fields()
            .filter(|(field, _)| *field == ty)
            .map(|(_, (start, end))| &self.storage[start as usize..end as usize])
            .next()
    }

    #[inline]
    fn fields(&self) -> Fields<'_> {
        Fields {
            storage: &self.storage,
            offset: 0,
        }
    }

    #[inline]
    fn get_cached_str(&self, cache: (u16, u16)) -> &str {
        // unwrap: validated at decode
        from_utf8(&self.storage[cache.0 as usize..cache.1 as usize]).unwrap()
    }

    /// Assemble a response from its principal fields; the counterpart of
    /// [`decode`][Decode::decode], used to emulate a backend.
    pub fn from_parts(severity: &str, code: &str, message: &str) -> Notice {
        let mut storage = Vec::new();

        for (field, value) in [(b'S', severity), (b'V', severity), (b'C', code), (b'M', message)] {
            storage.push(field);
            storage.extend_from_slice(value.as_bytes());
            storage.push(0);
        }

        storage.push(0);

        Notice::decode(Bytes::from(storage)).expect("well-formed by construction")
    }

    // serialize under the given tag ('E' for an error, 'N' for a notice)
    pub fn encode_tagged(&self, tag: u8, buf: &mut Vec<u8>) {
        buf.push(tag);
        buf.put_length_prefixed(|buf| {
            buf.extend_from_slice(&self.storage);
        });
    }
}

impl PartialEq for Notice {
    fn eq(&self, other: &Self) -> bool {
        self.storage == other.storage
    }
}

impl Decode for Notice {
    fn decode(buf: Bytes) -> Result<Self, Error> {
        // in case the response is malformed and does not contain the fields
        // we cache, degrade gracefully rather than reject the response
        let mut severity_v: Option<PgSeverity> = None;
        let mut severity_s: Option<PgSeverity> = None;
        let mut message = (0, 0);
        let mut code = (0, 0);

        let fields = Fields {
            storage: &buf,
            offset: 0,
        };

        for (field, v) in fields {
            if message.0 != 0 && code.0 != 0 && severity_v.is_some() {
                break;
            }

            let value = &buf[v.0 as usize..v.1 as usize];

            match field {
                b'S' | b'V' => {
                    let severity = match from_utf8(value).map_err(Error::protocol)? {
                        "PANIC" => PgSeverity::Panic,
                        "FATAL" => PgSeverity::Fatal,
                        "ERROR" => PgSeverity::Error,
                        "WARNING" => PgSeverity::Warning,
                        "NOTICE" => PgSeverity::Notice,
                        "DEBUG" => PgSeverity::Debug,
                        "INFO" => PgSeverity::Info,
                        "LOG" => PgSeverity::Log,

                        severity => {
                            return Err(err_protocol!("unknown severity: {:?}", severity));
                        }
                    };

                    // the localizable `S` field is only a fallback for
                    // servers predating the non-localized `V`
                    if field == b'V' {
                        severity_v = Some(severity);
                    } else {
                        severity_s = Some(severity);
                    }
                }

                b'M' => {
                    from_utf8(value).map_err(Error::protocol)?;
                    message = v;
                }

                b'C' => {
                    from_utf8(value).map_err(Error::protocol)?;
                    code = v;
                }

                // unknown fields are deliberately ignored
                _ => {}
            }
        }

        Ok(Self {
            severity: severity_v
                .or(severity_s)
                .ok_or_else(|| err_protocol!("error response missing severity"))?,
            message,
            code,
            storage: buf,
        })
    }
}

/// An iterator over each field in an Error or Notice response.
struct Fields<'a> {
    storage: &'a [u8],
    offset: u16,
}

impl<'a> Iterator for Fields<'a> {
    type Item = (u8, (u16, u16));

    fn next(&mut self) -> Option<Self::Item> {
        // The fields in the response body are sequentially stored as
        // [tag][string], ending in a final NUL
        let ty = *self.storage.get(self.offset as usize)?;

        if ty == 0 {
            return None;
        }

        let nul = memchr(b'\0', self.storage.get((self.offset + 1) as usize..)?)? as u16;
        let offset = self.offset;

        self.offset += nul + 2;

        Some((ty, (offset + 1, offset + nul + 1)))
    }
}
