use bytes::{BufMut, Bytes};

use crate::error::Error;
use crate::io::{Decode, Encode};

/// The server's transaction status, carried in every [ReadyForQuery].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum TransactionStatus {
    /// Not in a transaction block.
    Idle = b'I',

    /// In a transaction block.
    Transaction = b'T',

    /// In a _failed_ transaction block. Queries will be rejected until the
    /// block is ended with `ROLLBACK`.
    Error = b'E',
}

/// Marks the end of one command cycle; the server is ready for a new query.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ReadyForQuery {
    pub transaction_status: TransactionStatus,
}

impl Decode for ReadyForQuery {
    fn decode(buf: Bytes) -> Result<Self, Error> {
        let status = match buf.first() {
            Some(b'I') => TransactionStatus::Idle,
            Some(b'T') => TransactionStatus::Transaction,
            Some(b'E') => TransactionStatus::Error,

            other => {
                return Err(err_protocol!(
                    "unknown transaction status: {:?}",
                    other.map(|&b| char::from(b))
                ));
            }
        };

        Ok(ReadyForQuery {
            transaction_status: status,
        })
    }
}

impl Encode for ReadyForQuery {
    fn encode(&self, buf: &mut Vec<u8>) {
        buf.push(b'Z');
        buf.put_i32(5);
        buf.push(self.transaction_status as u8);
    }
}
