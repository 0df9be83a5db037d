use std::sync::Arc;

use crate::types::{Oid, PgFormat};

/// A single field (column) of a result set, as described by the server.
#[derive(Debug, Clone, PartialEq)]
pub struct PgColumn {
    /// The field name.
    pub name: String,

    /// If the field can be identified as a column of a specific table, the
    /// OID of the table; otherwise zero.
    pub relation_id: u32,

    /// If the field can be identified as a column of a specific table, the
    /// attribute number of the column; otherwise zero.
    pub relation_attribute_no: i16,

    /// The OID of the field's data type.
    pub type_id: Oid,

    /// The data type size (negative if variable-width).
    pub type_size: i16,

    /// The type modifier.
    pub type_modifier: i32,

    /// The format being used for the field.
    pub format: PgFormat,
}

/// A described prepared statement: its parameter types and result columns.
///
/// The empty name denotes the unnamed statement slot, which the server
/// overwrites on every `Parse`.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct PgStatement {
    /// Server-side statement name; empty for the unnamed statement.
    pub name: String,

    /// The SQL text this statement was prepared from, verbatim.
    pub sql: String,

    /// OIDs of the statement's parameters, in order.
    pub param_types: Vec<Oid>,

    /// Result columns; empty if the statement returns no data.
    pub columns: Vec<PgColumn>,
}

impl PgStatement {
    pub(crate) fn unnamed(sql: &str) -> Self {
        PgStatement {
            name: String::new(),
            sql: sql.to_owned(),
            param_types: Vec::new(),
            columns: Vec::new(),
        }
    }

    pub(crate) fn empty() -> Arc<Self> {
        Arc::new(Self::default())
    }
}
