//! CSV encoding and decoding for [`Table`].

use csv::{ReaderBuilder, Terminator, WriterBuilder};

use crate::error::TableError;
use crate::table::Table;

/// Encode a table as CSV text with a header row and `\n` line endings.
///
/// # Errors
///
/// Returns [`TableError::Csv`] if the CSV writer fails.
pub fn encode_csv(table: &Table) -> Result<String, TableError> {
    let mut writer = WriterBuilder::new()
        .terminator(Terminator::Any(b'\n'))
        .from_writer(Vec::new());
    writer.write_record(table.columns())?;
    for row in table.rows() {
        writer.write_record(row)?;
    }
    let bytes = writer.into_inner().map_err(|err| TableError::Csv {
        message: err.to_string(),
    })?;
    String::from_utf8(bytes).map_err(|err| TableError::Csv {
        message: err.to_string(),
    })
}

/// Decode CSV text whose first record is the header.
///
/// # Errors
///
/// Returns [`TableError::Csv`] for malformed CSV and
/// [`TableError::RowWidth`] for rows that do not match the header.
pub fn decode_csv(text: &str) -> Result<Table, TableError> {
    let mut reader = ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .from_reader(text.as_bytes());
    let mut table = Table::new(reader.headers()?.iter());
    for record in reader.records() {
        table.push_row(record?.iter())?;
    }
    Ok(table)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    fn quotes_cells_containing_separators() {
        let mut table = Table::new(["city", "observations"]);
        table
            .push_row(["Sant Feliu, Llobregat", "7"])
            .expect("push");
        let text = encode_csv(&table).expect("encode");
        assert_eq!(text, "city,observations\n\"Sant Feliu, Llobregat\",7\n");
    }

    #[rstest]
    fn empty_table_keeps_header() {
        let table = Table::new(["PARTICIPANT", "OBSERVATIONS"]);
        let text = encode_csv(&table).expect("encode");
        assert_eq!(text, "PARTICIPANT,OBSERVATIONS\n");
        let decoded = decode_csv(&text).expect("decode");
        assert_eq!(decoded.columns(), ["PARTICIPANT", "OBSERVATIONS"]);
        assert!(decoded.is_empty());
    }

    #[rstest]
    fn decoding_ragged_rows_fails() {
        let err = decode_csv("a,b\n1\n").expect_err("ragged row");
        assert!(matches!(err, TableError::RowWidth { row: 0, .. }));
    }

    #[rstest]
    fn non_ascii_cells_survive_encoding() {
        let mut table = Table::new(["city"]);
        table.push_row(["l'Hospitalet de Llobregat"]).expect("push");
        table.push_row(["Cervelló"]).expect("push");
        let decoded = decode_csv(&encode_csv(&table).expect("encode")).expect("decode");
        assert_eq!(decoded, table);
    }
}
