//! Definitions for the local snapshot cache: loaders and schema objects.

use std::cmp::Ordering;

use crate::connection::ConnectionSettings;

/// Suffix given to the staging table paired with each live table.
pub const STAGING_SUFFIX: &str = "_temp";

/// A remote query that fills one local table.
#[derive(Debug, Clone, PartialEq)]
pub struct LoaderDef {
    pub id: String,
    pub query: String,
    pub local_table: String,
    /// Cap on rows fetched from the remote side.
    pub max_rows: Option<u64>,
    /// Overrides the filter-wide remote connection.
    pub connection: Option<ConnectionSettings>,
}

impl LoaderDef {
    pub fn new(
        id: impl Into<String>,
        query: impl Into<String>,
        local_table: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            query: query.into(),
            local_table: local_table.into(),
            max_rows: None,
            connection: None,
        }
    }

    pub fn max_rows(mut self, max_rows: u64) -> Self {
        self.max_rows = Some(max_rows);
        self
    }

    pub fn staging_table(&self) -> String {
        format!("{}{}", self.local_table, STAGING_SUFFIX)
    }
}

/// A column of a local table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Column {
    pub name: String,
    pub data_type: String,
}

impl Column {
    pub fn new(name: impl Into<String>, data_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            data_type: data_type.into(),
        }
    }
}

/// A local table (and optional index) created before the first load.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DbObject {
    pub name: String,
    pub columns: Vec<Column>,
    pub index_columns: Vec<String>,
    /// Keep an existing table instead of dropping and recreating it.
    pub preserve_existing: bool,
}

impl DbObject {
    pub fn new(name: impl Into<String>, columns: Vec<Column>) -> Self {
        Self {
            name: name.into(),
            columns,
            index_columns: Vec::new(),
            preserve_existing: false,
        }
    }

    pub fn index_columns(mut self, columns: Vec<String>) -> Self {
        self.index_columns = columns;
        self
    }

    pub fn preserve_existing(mut self, preserve: bool) -> Self {
        self.preserve_existing = preserve;
        self
    }

    /// The staging table paired with this object, always recreated.
    pub fn staging_variant(&self) -> DbObject {
        DbObject {
            name: format!("{}{}", self.name, STAGING_SUFFIX),
            columns: self.columns.clone(),
            index_columns: self.index_columns.clone(),
            preserve_existing: false,
        }
    }

    pub fn index_name(&self) -> String {
        format!("{}_{}_idx", self.name, self.index_columns.join("_"))
    }

    pub fn create_table_sql(&self) -> String {
        let columns = self
            .columns
            .iter()
            .map(|c| format!("{} {}", quote_ident(&c.name), c.data_type))
            .collect::<Vec<_>>()
            .join(", ");
        let existence = if self.preserve_existing {
            "IF NOT EXISTS "
        } else {
            ""
        };
        format!(
            "CREATE TABLE {}{} ({})",
            existence,
            quote_ident(&self.name),
            columns
        )
    }

    pub fn create_index_sql(&self) -> Option<String> {
        if self.index_columns.is_empty() {
            return None;
        }
        let columns = self
            .index_columns
            .iter()
            .map(|c| quote_ident(c))
            .collect::<Vec<_>>()
            .join(", ");
        Some(format!(
            "CREATE INDEX IF NOT EXISTS {} ON {} ({})",
            quote_ident(&self.index_name()),
            quote_ident(&self.name),
            columns
        ))
    }
}

impl PartialOrd for DbObject {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for DbObject {
    fn cmp(&self, other: &Self) -> Ordering {
        self.name
            .cmp(&other.name)
            .then_with(|| self.preserve_existing.cmp(&other.preserve_existing))
            .then_with(|| self.columns.len().cmp(&other.columns.len()))
            .then_with(|| self.index_columns.cmp(&other.index_columns))
            .then_with(|| {
                let a = self.columns.iter().map(|c| (&c.name, &c.data_type));
                let b = other.columns.iter().map(|c| (&c.name, &c.data_type));
                a.cmp(b)
            })
    }
}

/// Double-quote an identifier for the local database.
pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}
