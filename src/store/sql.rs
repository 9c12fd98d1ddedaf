//! SQL rendering for the two statement shapes the engine needs
//!
//! ```sql
//! SELECT key_col, nk_cols... FROM table WHERE (nk_cols...) IN (tuple_list)
//! INSERT INTO table (cols...) VALUES (tuple_list) RETURNING key_col, cols...
//! ```
//!
//! Identifiers are validated, never quoted; values are always bound as
//! parameters.

use once_cell::sync::Lazy;
use regex::Regex;

use super::{StoreError, StoreResult};
use crate::models::{KeyTuple, Value};

static IDENTIFIER: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*(\.[A-Za-z_][A-Za-z0-9_]*)?$").expect("Invalid regex")
});

/// Fail unless `name` is a plain, optionally schema-qualified identifier
pub fn validate_identifier(name: &str) -> StoreResult<()> {
    if IDENTIFIER.is_match(name) {
        Ok(())
    } else {
        Err(StoreError::InvalidIdentifier(name.to_string()))
    }
}

/// Parameter placeholder style
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Placeholder {
    /// `$1, $2, ...` (PostgreSQL)
    Dollar,
    /// `?` (DuckDB, SQLite)
    Question,
}

/// Rendered SQL with its bound parameters
#[derive(Debug, Clone, PartialEq)]
pub struct Statement {
    pub sql: String,
    pub params: Vec<Value>,
}

impl Statement {
    fn new() -> Self {
        Self {
            sql: String::new(),
            params: Vec::new(),
        }
    }
}

/// Renders lookup and insert statements for one backend
#[derive(Debug, Clone, Copy)]
pub struct SqlBuilder {
    placeholder: Placeholder,
    row_value_in: bool,
}

impl SqlBuilder {
    /// PostgreSQL: `$n` placeholders and row-value IN lists
    pub fn postgres() -> Self {
        Self {
            placeholder: Placeholder::Dollar,
            row_value_in: true,
        }
    }

    /// DuckDB: `?` placeholders; multi-column tuples render as a disjunction
    pub fn duckdb() -> Self {
        Self {
            placeholder: Placeholder::Question,
            row_value_in: false,
        }
    }

    fn bind(&self, stmt: &mut Statement, value: &Value) -> String {
        stmt.params.push(value.clone());
        match self.placeholder {
            Placeholder::Dollar => format!("${}", stmt.params.len()),
            Placeholder::Question => "?".to_string(),
        }
    }

    /// Render the lookup query; `None` when there is nothing to look up
    ///
    /// Tuples without nulls go into a single IN list. A tuple with a null
    /// component is matched with `IS NULL` for that component, so lookups
    /// are null-safe.
    pub fn lookup(
        &self,
        table: &str,
        key_column: &str,
        columns: &[String],
        tuples: &[KeyTuple],
    ) -> StoreResult<Option<Statement>> {
        if tuples.is_empty() {
            return Ok(None);
        }
        validate_identifier(table)?;
        validate_identifier(key_column)?;
        if columns.is_empty() {
            return Err(StoreError::InvalidInput(format!(
                "lookup on '{}' without natural-key columns",
                table
            )));
        }
        for col in columns {
            validate_identifier(col)?;
        }
        if let Some(bad) = tuples.iter().find(|t| t.len() != columns.len()) {
            return Err(StoreError::InvalidInput(format!(
                "tuple {} has {} values for {} columns",
                bad,
                bad.len(),
                columns.len()
            )));
        }

        let mut stmt = Statement::new();
        let column_list = columns.join(", ");
        let (complete, with_nulls): (Vec<&KeyTuple>, Vec<&KeyTuple>) =
            tuples.iter().partition(|t| !t.has_null());

        let mut conditions: Vec<String> = Vec::new();

        if !complete.is_empty() {
            if columns.len() == 1 {
                let items: Vec<String> = complete
                    .iter()
                    .map(|t| self.bind(&mut stmt, &t.values()[0]))
                    .collect();
                conditions.push(format!("{} IN ({})", columns[0], items.join(", ")));
            } else if self.row_value_in {
                let items: Vec<String> = complete
                    .iter()
                    .map(|t| {
                        let parts: Vec<String> =
                            t.values().iter().map(|v| self.bind(&mut stmt, v)).collect();
                        format!("({})", parts.join(", "))
                    })
                    .collect();
                conditions.push(format!("({}) IN ({})", column_list, items.join(", ")));
            } else {
                for tuple in &complete {
                    conditions.push(self.conjunction(&mut stmt, columns, tuple));
                }
            }
        }

        for tuple in &with_nulls {
            conditions.push(self.conjunction(&mut stmt, columns, tuple));
        }

        stmt.sql = format!(
            "SELECT {}, {} FROM {} WHERE {}",
            key_column,
            column_list,
            table,
            conditions.join(" OR ")
        );
        Ok(Some(stmt))
    }

    fn conjunction(&self, stmt: &mut Statement, columns: &[String], tuple: &KeyTuple) -> String {
        let parts: Vec<String> = columns
            .iter()
            .zip(tuple.values())
            .map(|(col, value)| {
                if value.is_null() {
                    format!("{} IS NULL", col)
                } else {
                    format!("{} = {}", col, self.bind(stmt, value))
                }
            })
            .collect();
        format!("({})", parts.join(" AND "))
    }

    /// Render a multi-row insert; `None` when there are no rows
    pub fn insert(
        &self,
        table: &str,
        columns: &[String],
        rows: &[Vec<Value>],
        returning: Option<&str>,
    ) -> StoreResult<Option<Statement>> {
        if rows.is_empty() {
            return Ok(None);
        }
        validate_identifier(table)?;
        if columns.is_empty() {
            return Err(StoreError::InvalidInput(format!(
                "insert into '{}' without columns",
                table
            )));
        }
        for col in columns {
            validate_identifier(col)?;
        }
        if let Some(key) = returning {
            validate_identifier(key)?;
        }
        if let Some(bad) = rows.iter().position(|r| r.len() != columns.len()) {
            return Err(StoreError::InvalidInput(format!(
                "row {} has {} values for {} columns",
                bad,
                rows[bad].len(),
                columns.len()
            )));
        }

        let mut stmt = Statement::new();
        let column_list = columns.join(", ");
        let values: Vec<String> = rows
            .iter()
            .map(|row| {
                let parts: Vec<String> = row.iter().map(|v| self.bind(&mut stmt, v)).collect();
                format!("({})", parts.join(", "))
            })
            .collect();

        stmt.sql = format!(
            "INSERT INTO {} ({}) VALUES {}",
            table,
            column_list,
            values.join(", ")
        );
        if let Some(key) = returning {
            stmt.sql
                .push_str(&format!(" RETURNING {}, {}", key, column_list));
        }
        Ok(Some(stmt))
    }
}
