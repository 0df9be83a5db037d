mod buf;
mod buf_mut;
mod buf_stream;
mod decode;
mod encode;

pub use buf::BufExt;
pub use buf_mut::BufMutExt;
pub use buf_stream::BufStream;
pub use decode::Decode;
pub use encode::Encode;
