/// A type that can be encoded into the wire format.
///
/// Frontend messages append a fully framed message (tag byte and length
/// prefix included); backend messages implement this as well so the codec is
/// symmetric and a backend can be emulated in tests.
pub trait Encode {
    fn encode(&self, buf: &mut Vec<u8>);
}

impl<T: Encode + ?Sized> Encode for &'_ T {
    #[inline]
    fn encode(&self, buf: &mut Vec<u8>) {
        (**self).encode(buf);
    }
}
