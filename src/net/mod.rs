mod socket;
mod tls;

pub use socket::Socket;
pub use tls::{configure_tls_connector, MaybeTlsStream};
