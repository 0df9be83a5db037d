use std::sync::Arc;

use bytes::Bytes;

use crate::error::Error;
use crate::message::DataRow;
use crate::statement::{PgColumn, PgStatement};
use crate::type_map::{PgArgument, TypeMap};

/// A single row of a query result.
///
/// Raw column bytes are available through [`value`][PgRow::value]; typed
/// access goes through the connection's [TypeMap].
pub struct PgRow {
    pub(crate) data: DataRow,
    pub(crate) statement: Arc<PgStatement>,
    pub(crate) type_map: Arc<dyn TypeMap>,
}

impl PgRow {
    /// The number of columns in the row.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// The descriptions of the row's columns, as reported by the server.
    pub fn columns(&self) -> &[PgColumn] {
        &self.statement.columns
    }

    /// The raw wire bytes of a column; `None` is SQL NULL.
    ///
    /// # Panics
    /// If `index` is out of bounds.
    pub fn value(&self, index: usize) -> Option<&[u8]> {
        self.data.get(index)
    }

    /// The raw values of all columns, in order.
    pub fn values(&self) -> &[Option<Bytes>] {
        self.data.values()
    }

    /// Position of the column with the given name, if any.
    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.statement.columns.iter().position(|c| c.name == name)
    }

    /// Decode a column through the connection's type map.
    pub fn try_get(&self, index: usize) -> Result<PgArgument, Error> {
        let column = self
            .statement
            .columns
            .get(index)
            .ok_or(Error::ColumnIndexOutOfBounds {
                index,
                len: self.statement.columns.len(),
            })?;

        self.type_map
            .decode(column.type_id, column.format, self.data.get(index))
            .map_err(|source| Error::Decode { index, source })
    }

    /// Decode a column by name.
    pub fn try_get_by_name(&self, name: &str) -> Result<PgArgument, Error> {
        let index = self
            .column_index(name)
            .ok_or_else(|| Error::ColumnNotFound(name.to_owned()))?;

        self.try_get(index)
    }
}

impl std::fmt::Debug for PgRow {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PgRow")
            .field("columns", &self.statement.columns.len())
            .finish()
    }
}
