//! Schema descriptors for tenant-scoped tables.
//!
//! A [`Schema`] replaces a hand-written per-table data-access class: it
//! lists the key and value fields with their bounds, and declares whether
//! the table tracks history timestamps, an auto-assigned row sequence, and
//! which ordering key keyset pagination walks.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;

use crate::{ConfigError, FieldKind};

/// Column holding the auto-assigned row sequence number.
pub const ROW_ID_COLUMN: &str = "row_id";
/// Column holding the first-insert timestamp.
pub const CREATED_COLUMN: &str = "created";
/// Column holding the last-write timestamp.
pub const MODIFIED_COLUMN: &str = "modified";
/// Default column name for the tenant key.
pub const DEFAULT_TENANT_COLUMN: &str = "tenant_id";
/// Suffix appended to the table name to name its pagination index.
pub const PAGE_INDEX_SUFFIX: &str = "_page_idx";
/// Longest identifier PostgreSQL keeps without truncating.
const MAX_IDENTIFIER_LEN: usize = 63;

/// Declaration of a single key or value field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldDef {
    pub name: String,
    pub kind: FieldKind,
    pub nullable: bool,
    pub min_len: usize,
    pub max_len: Option<usize>,
}

impl FieldDef {
    pub fn new(name: impl Into<String>, kind: FieldKind) -> Self {
        Self {
            name: name.into(),
            kind,
            nullable: false,
            min_len: 0,
            max_len: None,
        }
    }

    pub fn text(name: impl Into<String>) -> Self {
        Self::new(name, FieldKind::Text)
    }

    pub fn bytes(name: impl Into<String>) -> Self {
        Self::new(name, FieldKind::Bytes)
    }

    pub fn int(name: impl Into<String>) -> Self {
        Self::new(name, FieldKind::Int)
    }

    pub fn boolean(name: impl Into<String>) -> Self {
        Self::new(name, FieldKind::Bool)
    }

    pub fn uuid(name: impl Into<String>) -> Self {
        Self::new(name, FieldKind::Uuid)
    }

    pub fn timestamp(name: impl Into<String>) -> Self {
        Self::new(name, FieldKind::Timestamp)
    }

    pub fn nullable(mut self) -> Self {
        self.nullable = true;
        self
    }

    pub fn min_len(mut self, min: usize) -> Self {
        self.min_len = min;
        self
    }

    pub fn max_len(mut self, max: usize) -> Self {
        self.max_len = Some(max);
        self
    }

    /// Set both length bounds, inclusive.
    pub fn len(self, min: usize, max: usize) -> Self {
        self.min_len(min).max_len(max)
    }
}

/// Ordering key used by keyset pagination.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PageOrder {
    /// Ascending by auto-assigned row sequence.
    RowIdAsc,
    /// Most recently created first, ties broken by row sequence.
    CreatedDesc,
    /// Most recently modified first, ties broken by row sequence.
    ModifiedDesc,
}

impl PageOrder {
    pub fn is_descending(&self) -> bool {
        !matches!(self, PageOrder::RowIdAsc)
    }

    /// Column holding the primary ordering key.
    pub fn column(&self) -> &'static str {
        match self {
            PageOrder::RowIdAsc => ROW_ID_COLUMN,
            PageOrder::CreatedDesc => CREATED_COLUMN,
            PageOrder::ModifiedDesc => MODIFIED_COLUMN,
        }
    }
}

/// Role of a named field inside a schema.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldRole {
    Key(usize),
    Value(usize),
}

/// Descriptor of one tenant-scoped table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Schema {
    table: String,
    tenant_column: String,
    keys: Vec<FieldDef>,
    values: Vec<FieldDef>,
    history: bool,
    row_id: bool,
    order: Option<PageOrder>,
}

impl Schema {
    pub fn builder(table: impl Into<String>) -> SchemaBuilder {
        SchemaBuilder::new(table)
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    pub fn tenant_column(&self) -> &str {
        &self.tenant_column
    }

    pub fn keys(&self) -> &[FieldDef] {
        &self.keys
    }

    pub fn values(&self) -> &[FieldDef] {
        &self.values
    }

    /// Whether the table carries `created`/`modified` columns.
    pub fn has_history(&self) -> bool {
        self.history
    }

    /// Whether the table carries an auto-assigned `row_id`.
    pub fn has_row_id(&self) -> bool {
        self.row_id
    }

    /// Ordering key for pagination, if the table is pageable.
    pub fn order(&self) -> Option<PageOrder> {
        self.order
    }

    /// Name of the index backing pagination.
    pub fn page_index_name(&self) -> String {
        format!("{}{}", self.table, PAGE_INDEX_SUFFIX)
    }

    /// Look up a key or value field by name.
    pub fn field(&self, name: &str) -> Option<(FieldRole, &FieldDef)> {
        if let Some(i) = self.keys.iter().position(|f| f.name == name) {
            return Some((FieldRole::Key(i), &self.keys[i]));
        }
        self.values
            .iter()
            .position(|f| f.name == name)
            .map(|i| (FieldRole::Value(i), &self.values[i]))
    }

    /// Tenant column followed by key columns: the composite primary key.
    pub fn primary_key_columns(&self) -> Vec<&str> {
        std::iter::once(self.tenant_column.as_str())
            .chain(self.keys.iter().map(|f| f.name.as_str()))
            .collect()
    }

    /// All columns in row order: `[row_id] tenant keys.. values.. [created modified]`.
    pub fn columns(&self) -> Vec<&str> {
        let mut cols = Vec::with_capacity(self.keys.len() + self.values.len() + 4);
        if self.row_id {
            cols.push(ROW_ID_COLUMN);
        }
        cols.extend(self.primary_key_columns());
        cols.extend(self.values.iter().map(|f| f.name.as_str()));
        if self.history {
            cols.push(CREATED_COLUMN);
            cols.push(MODIFIED_COLUMN);
        }
        cols
    }

    /// Metadata columns returned by write statements, in row order.
    pub fn meta_columns(&self) -> Vec<&'static str> {
        let mut cols = Vec::with_capacity(3);
        if self.row_id {
            cols.push(ROW_ID_COLUMN);
        }
        if self.history {
            cols.push(CREATED_COLUMN);
            cols.push(MODIFIED_COLUMN);
        }
        cols
    }
}

/// Builder for [`Schema`].
#[derive(Debug, Clone)]
pub struct SchemaBuilder {
    table: String,
    tenant_column: String,
    keys: Vec<FieldDef>,
    values: Vec<FieldDef>,
    history: bool,
    row_id: bool,
    order: Option<PageOrder>,
}

impl SchemaBuilder {
    pub fn new(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            tenant_column: DEFAULT_TENANT_COLUMN.to_string(),
            keys: Vec::new(),
            values: Vec::new(),
            history: false,
            row_id: false,
            order: None,
        }
    }

    pub fn tenant_column(mut self, name: impl Into<String>) -> Self {
        self.tenant_column = name.into();
        self
    }

    pub fn key(mut self, field: FieldDef) -> Self {
        self.keys.push(field);
        self
    }

    pub fn value(mut self, field: FieldDef) -> Self {
        self.values.push(field);
        self
    }

    /// Track `created` and `modified` timestamps.
    pub fn history(mut self) -> Self {
        self.history = true;
        self
    }

    /// Assign a row sequence number on first insert.
    pub fn row_id(mut self) -> Self {
        self.row_id = true;
        self
    }

    pub fn order(mut self, order: PageOrder) -> Self {
        self.order = Some(order);
        self
    }

    pub fn build(self) -> Result<Schema, ConfigError> {
        check_identifier(&self.table)?;
        check_identifier(&self.tenant_column)?;

        let mut seen = HashSet::new();
        seen.insert(self.tenant_column.as_str());
        for reserved in [ROW_ID_COLUMN, CREATED_COLUMN, MODIFIED_COLUMN] {
            if self.tenant_column == reserved {
                return Err(reserved_column(reserved));
            }
        }

        for field in self.keys.iter().chain(self.values.iter()) {
            check_identifier(&field.name)?;
            if [ROW_ID_COLUMN, CREATED_COLUMN, MODIFIED_COLUMN].contains(&field.name.as_str()) {
                return Err(reserved_column(&field.name));
            }
            if !seen.insert(field.name.as_str()) {
                return Err(ConfigError::InvalidIdentifier {
                    name: field.name.clone(),
                    reason: "duplicate column name".to_string(),
                });
            }
            if let Some(max) = field.max_len {
                if max < field.min_len {
                    return Err(ConfigError::InvalidValue {
                        field: field.name.clone(),
                        value: format!("[{}, {}]", field.min_len, max),
                        reason: "max_len must not be below min_len".to_string(),
                    });
                }
            }
        }

        for key in &self.keys {
            if key.nullable {
                return Err(ConfigError::InvalidValue {
                    field: key.name.clone(),
                    value: "nullable".to_string(),
                    reason: "key fields cannot be nullable".to_string(),
                });
            }
        }

        let order = match self.order {
            Some(order) => Some(order),
            None if self.row_id => Some(PageOrder::RowIdAsc),
            None => None,
        };

        if let Some(order) = order {
            if !self.row_id {
                return Err(ConfigError::InvalidValue {
                    field: "order".to_string(),
                    value: format!("{:?}", order),
                    reason: "pageable tables require a row id".to_string(),
                });
            }
            if self.table.len() + PAGE_INDEX_SUFFIX.len() > MAX_IDENTIFIER_LEN {
                return Err(ConfigError::InvalidIdentifier {
                    name: self.table.clone(),
                    reason: format!(
                        "pageable table names must be at most {} bytes",
                        MAX_IDENTIFIER_LEN - PAGE_INDEX_SUFFIX.len()
                    ),
                });
            }
            if order.is_descending() && !self.history {
                return Err(ConfigError::InvalidValue {
                    field: "order".to_string(),
                    value: format!("{:?}", order),
                    reason: "timestamp ordering requires history columns".to_string(),
                });
            }
        }

        Ok(Schema {
            table: self.table,
            tenant_column: self.tenant_column,
            keys: self.keys,
            values: self.values,
            history: self.history,
            row_id: self.row_id,
            order,
        })
    }
}

fn reserved_column(name: &str) -> ConfigError {
    ConfigError::InvalidIdentifier {
        name: name.to_string(),
        reason: "reserved column name".to_string(),
    }
}

/// Identifiers are spliced into SQL text, so only plain ASCII names pass.
pub fn check_identifier(name: &str) -> Result<(), ConfigError> {
    let mut chars = name.chars();
    let valid = match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {
            chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
        }
        _ => false,
    };
    if valid && name.len() <= MAX_IDENTIFIER_LEN {
        Ok(())
    } else {
        Err(ConfigError::InvalidIdentifier {
            name: name.to_string(),
            reason: "must match [A-Za-z_][A-Za-z0-9_]* and be at most 63 bytes".to_string(),
        })
    }
}
