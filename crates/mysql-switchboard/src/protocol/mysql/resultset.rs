//! Text-protocol result sets built by the proxy itself.

use super::packets::{ColumnDefinition, SERVER_STATUS_AUTOCOMMIT};
use super::parser::{
    build_column_definition, build_eof_packet, build_text_row, write_length_encoded_int,
};

/// A result set in the text protocol: column metadata plus string rows.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResultSet {
    pub columns: Vec<ColumnDefinition>,
    pub rows: Vec<Vec<Option<String>>>,
}

impl ResultSet {
    pub fn new(columns: Vec<ColumnDefinition>) -> Self {
        Self {
            columns,
            rows: Vec::new(),
        }
    }

    /// Append a row. Rows must have one value per column.
    pub fn push_row(&mut self, row: Vec<Option<String>>) {
        debug_assert_eq!(row.len(), self.columns.len());
        self.rows.push(row);
    }

    /// Encode as the packet sequence of a COM_QUERY response:
    /// column count, column definitions, EOF, rows, EOF.
    pub fn to_packets(&self) -> Vec<Vec<u8>> {
        let mut packets = Vec::with_capacity(self.columns.len() + self.rows.len() + 3);

        let mut count = Vec::with_capacity(9);
        write_length_encoded_int(&mut count, self.columns.len() as u64);
        packets.push(count);

        packets.extend(self.columns.iter().map(build_column_definition));
        packets.push(build_eof_packet(0, SERVER_STATUS_AUTOCOMMIT));

        packets.extend(self.rows.iter().map(|row| build_text_row(row)));
        packets.push(build_eof_packet(0, SERVER_STATUS_AUTOCOMMIT));

        packets
    }
}
