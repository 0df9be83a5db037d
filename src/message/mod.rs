//! The PostgreSQL v3 wire protocol: one type per message, each encoding to
//! and/or decoding from its framed byte representation.
//!
//! Almost every message is framed as a one-byte ASCII tag, a big-endian
//! `i32` length covering the body plus the length field itself, and the
//! body. `Startup`, `SslRequest`, and `CancelRequest` predate the tag byte
//! and are framed with the length alone.

use bytes::Bytes;

use crate::error::Error;
use crate::io::Decode;

mod authentication;
mod backend_key_data;
mod bind;
mod cancel_request;
mod close;
mod command_complete;
mod copy;
mod data_row;
mod describe;
mod execute;
mod flush;
mod function_call;
mod notification;
mod parameter_description;
mod parameter_status;
mod parse;
mod password;
mod query;
mod ready_for_query;
mod response;
mod row_description;
mod sasl;
mod ssl_request;
mod startup;
mod sync;
mod terminate;

pub use authentication::{Authentication, AuthenticationMd5Password, AuthenticationSasl};
pub use backend_key_data::BackendKeyData;
pub use bind::Bind;
pub use cancel_request::CancelRequest;
pub use close::Close;
pub use command_complete::CommandComplete;
pub use copy::{CopyData, CopyDone, CopyFail, CopyResponse};
pub use data_row::DataRow;
pub use describe::Describe;
pub use execute::Execute;
pub use flush::Flush;
pub use function_call::{FunctionCall, FunctionCallResponse};
pub use notification::Notification;
pub use parameter_description::ParameterDescription;
pub use parameter_status::ParameterStatus;
pub use parse::Parse;
pub use password::Password;
pub use query::Query;
pub use ready_for_query::{ReadyForQuery, TransactionStatus};
pub use response::Notice;
pub use row_description::RowDescription;
pub use sasl::{SaslInitialResponse, SaslResponse};
pub use ssl_request::SslRequest;
pub use startup::Startup;
pub use sync::Sync;
pub use terminate::Terminate;

/// The kind of an incoming backend message, identified by its tag byte.
#[derive(Debug, PartialOrd, PartialEq, Eq, Clone, Copy)]
pub enum MessageFormat {
    Authentication,
    BackendKeyData,
    BindComplete,
    CloseComplete,
    CommandComplete,
    CopyBothResponse,
    CopyData,
    CopyDone,
    CopyInResponse,
    CopyOutResponse,
    DataRow,
    EmptyQueryResponse,
    ErrorResponse,
    FunctionCallResponse,
    NoData,
    NoticeResponse,
    NotificationResponse,
    ParameterDescription,
    ParameterStatus,
    ParseComplete,
    PortalSuspended,
    ReadyForQuery,
    RowDescription,
}

impl MessageFormat {
    pub fn try_from_u8(v: u8) -> Result<Self, Error> {
        Ok(match v {
            b'1' => MessageFormat::ParseComplete,
            b'2' => MessageFormat::BindComplete,
            b'3' => MessageFormat::CloseComplete,
            b'A' => MessageFormat::NotificationResponse,
            b'C' => MessageFormat::CommandComplete,
            b'D' => MessageFormat::DataRow,
            b'E' => MessageFormat::ErrorResponse,
            b'G' => MessageFormat::CopyInResponse,
            b'H' => MessageFormat::CopyOutResponse,
            b'I' => MessageFormat::EmptyQueryResponse,
            b'K' => MessageFormat::BackendKeyData,
            b'N' => MessageFormat::NoticeResponse,
            b'R' => MessageFormat::Authentication,
            b'S' => MessageFormat::ParameterStatus,
            b'T' => MessageFormat::RowDescription,
            b'V' => MessageFormat::FunctionCallResponse,
            b'W' => MessageFormat::CopyBothResponse,
            b'Z' => MessageFormat::ReadyForQuery,
            b'c' => MessageFormat::CopyDone,
            b'd' => MessageFormat::CopyData,
            b'n' => MessageFormat::NoData,
            b's' => MessageFormat::PortalSuspended,
            b't' => MessageFormat::ParameterDescription,

            _ => {
                return Err(err_protocol!(
                    "unknown message tag: {:?}",
                    char::from(v)
                ))
            }
        })
    }
}

/// One framed message received from the server: its kind and its body.
#[derive(Debug)]
pub struct Message {
    pub format: MessageFormat,
    pub contents: Bytes,
}

impl Message {
    #[inline]
    pub fn decode<T: Decode>(self) -> Result<T, Error> {
        T::decode(self.contents)
    }
}

// several backend messages carry no body at all; expecting one decodes to ()
impl Decode for () {
    #[inline]
    fn decode(_: Bytes) -> Result<Self, Error> {
        Ok(())
    }
}
