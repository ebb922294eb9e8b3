//! In-memory rectangular table.

use crate::error::TableError;

/// A header row plus data rows of matching width.
///
/// Cells are kept as strings; callers own typing. An empty table still carries
/// its header so downstream consumers always see every expected column.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Table {
    columns: Vec<String>,
    rows: Vec<Vec<String>>,
}

impl Table {
    /// Create an empty table with the given header.
    ///
    /// ```
    /// use table_store::Table;
    ///
    /// let table = Table::new(["metric", "value"]);
    /// assert!(table.is_empty());
    /// assert_eq!(table.columns(), ["metric", "value"]);
    /// ```
    pub fn new<I, S>(columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            columns: columns.into_iter().map(Into::into).collect(),
            rows: Vec::new(),
        }
    }

    /// Append one row.
    ///
    /// # Errors
    ///
    /// Returns [`TableError::RowWidth`] when the row does not have exactly one
    /// cell per column.
    pub fn push_row<I, S>(&mut self, row: I) -> Result<(), TableError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let cells = row.into_iter().map(Into::into).collect::<Vec<String>>();
        if cells.len() != self.columns.len() {
            return Err(TableError::RowWidth {
                row: self.rows.len(),
                expected: self.columns.len(),
                actual: cells.len(),
            });
        }
        self.rows.push(cells);
        Ok(())
    }

    /// Header labels in output order.
    #[must_use]
    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    /// Data rows in output order.
    #[must_use]
    pub fn rows(&self) -> &[Vec<String>] {
        &self.rows
    }

    /// Number of data rows.
    #[must_use]
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// Whether the table has no data rows.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Position of `name` in the header, if present.
    #[must_use]
    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|column| column == name)
    }

    /// Iterate over the values of one column, or nothing when it is absent.
    ///
    /// ```
    /// use table_store::Table;
    ///
    /// let mut table = Table::new(["id", "user_login"]);
    /// table.push_row(["2", "ana"]).expect("push");
    /// table.push_row(["1", "pau"]).expect("push");
    /// let logins = table.column_values("user_login").collect::<Vec<_>>();
    /// assert_eq!(logins, ["ana", "pau"]);
    /// ```
    pub fn column_values<'a>(&'a self, name: &str) -> impl Iterator<Item = &'a str> + 'a {
        let index = self.column_index(name);
        self.rows.iter().filter_map(move |row| {
            index
                .and_then(|position| row.get(position))
                .map(String::as_str)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_rows_with_wrong_width() {
        let mut table = Table::new(["a", "b"]);
        let err = table.push_row(["only-one"]).expect_err("width mismatch");
        assert_eq!(
            err,
            TableError::RowWidth {
                row: 0,
                expected: 2,
                actual: 1,
            }
        );
        assert!(table.is_empty());
    }

    #[test]
    fn missing_column_yields_no_values() {
        let mut table = Table::new(["a"]);
        table.push_row(["1"]).expect("push");
        assert_eq!(table.column_values("b").count(), 0);
    }
}
