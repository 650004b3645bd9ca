//! Keyset pagination.
//!
//! Pages are addressed by the ordering key of the last item already seen,
//! never by offset. The predicate is strict (`>` ascending, `<`
//! descending), so replaying a cursor never repeats an item and rows
//! written after pagination began are found as long as they sort after
//! the cursor.
//!
//! Timestamp orders compare `(timestamp, row_id)` as a row value, which
//! keeps the order total when several rows share a timestamp.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use serde::{Deserialize, Serialize};
use tenantry_core::{
    FieldError, FieldErrorReason, PageOrder, Record, Schema, StoreError, StoreResult, TenantKey,
    Timestamp, CREATED_COLUMN, MODIFIED_COLUMN, ROW_ID_COLUMN,
};

use crate::command::{Command, PageFilter, PageQuery};
use crate::scope::ConnectionScope;
use crate::store::RecordStore;

const TAG_ROW_ID: u8 = 0;
const TAG_TIMESTAMP: u8 = 1;

/// Position after the last item of a page.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Cursor {
    /// Ascending row sequence: next page holds `row_id > n`.
    RowId(i64),
    /// Descending timestamp: next page holds `(ts, row_id) < (at, row_id)`.
    Timestamp { at: Timestamp, row_id: i64 },
}

impl Cursor {
    /// Opaque, URL-safe form handed to callers.
    pub fn encode(&self) -> String {
        let mut bytes = Vec::with_capacity(17);
        match self {
            Cursor::RowId(row_id) => {
                bytes.push(TAG_ROW_ID);
                bytes.extend_from_slice(&row_id.to_be_bytes());
            }
            Cursor::Timestamp { at, row_id } => {
                bytes.push(TAG_TIMESTAMP);
                bytes.extend_from_slice(&at.to_be_bytes());
                bytes.extend_from_slice(&row_id.to_be_bytes());
            }
        }
        URL_SAFE_NO_PAD.encode(bytes)
    }

    /// Parse a cursor produced by [`Cursor::encode`].
    pub fn decode(encoded: &str) -> StoreResult<Self> {
        let malformed = || StoreError::contract(format!("malformed page cursor '{}'", encoded));
        let bytes = URL_SAFE_NO_PAD.decode(encoded).map_err(|_| malformed())?;

        let read = |at: usize| -> Option<i64> {
            let chunk: [u8; 8] = bytes.get(at..at + 8)?.try_into().ok()?;
            Some(i64::from_be_bytes(chunk))
        };

        match (bytes.first(), bytes.len()) {
            (Some(&TAG_ROW_ID), 9) => read(1).map(Cursor::RowId).ok_or_else(malformed),
            (Some(&TAG_TIMESTAMP), 17) => match (read(1), read(9)) {
                (Some(at), Some(row_id)) => Ok(Cursor::Timestamp { at, row_id }),
                _ => Err(malformed()),
            },
            _ => Err(malformed()),
        }
    }

    /// Cursor pointing just past `record` in `order`.
    pub fn after(order: PageOrder, table: &str, record: &Record) -> StoreResult<Self> {
        let row_id = required(table, ROW_ID_COLUMN, record.row_id())?;
        match order {
            PageOrder::RowIdAsc => Ok(Cursor::RowId(row_id)),
            PageOrder::CreatedDesc => Ok(Cursor::Timestamp {
                at: required(table, CREATED_COLUMN, record.created())?,
                row_id,
            }),
            PageOrder::ModifiedDesc => Ok(Cursor::Timestamp {
                at: required(table, MODIFIED_COLUMN, record.modified())?,
                row_id,
            }),
        }
    }

    /// Whether this cursor can bound a page in `order`.
    pub fn fits(&self, order: PageOrder) -> bool {
        matches!(
            (self, order.is_descending()),
            (Cursor::RowId(_), false) | (Cursor::Timestamp { .. }, true)
        )
    }

    /// Whether `record` lies strictly beyond this cursor in `order`.
    pub fn admits(&self, order: PageOrder, record: &Record) -> bool {
        let row_id = record.row_id().unwrap_or(i64::MIN);
        match (self, order) {
            (Cursor::RowId(after), PageOrder::RowIdAsc) => row_id > *after,
            (Cursor::Timestamp { at, row_id: after }, PageOrder::CreatedDesc) => {
                (record.created().unwrap_or(i64::MIN), row_id) < (*at, *after)
            }
            (Cursor::Timestamp { at, row_id: after }, PageOrder::ModifiedDesc) => {
                (record.modified().unwrap_or(i64::MIN), row_id) < (*at, *after)
            }
            _ => false,
        }
    }
}

fn required(table: &str, column: &str, value: Option<i64>) -> StoreResult<i64> {
    value.ok_or_else(|| StoreError::CorruptRecord {
        table: table.to_string(),
        source: FieldError::new(column, FieldErrorReason::NullNotAllowed),
    })
}

/// One slice of an ordered sequence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Page<T> {
    pub items: Vec<T>,
    /// `None` signals the end of the sequence.
    pub next_cursor: Option<Cursor>,
}

impl<T> Page<T> {
    pub fn is_last(&self) -> bool {
        self.next_cursor.is_none()
    }

    pub fn map<U>(self, f: impl FnMut(T) -> U) -> Page<U> {
        Page {
            items: self.items.into_iter().map(f).collect(),
            next_cursor: self.next_cursor,
        }
    }

    pub fn try_map<U, E>(self, f: impl FnMut(T) -> Result<U, E>) -> Result<Page<U>, E> {
        Ok(Page {
            items: self.items.into_iter().map(f).collect::<Result<_, _>>()?,
            next_cursor: self.next_cursor,
        })
    }
}

/// Validate a requested page size and compute the look-ahead fetch size.
///
/// `i32::MAX` is clamped down by one so `limit + 1` cannot overflow.
pub fn plan_fetch(limit: i32) -> StoreResult<(usize, i64)> {
    if limit < 1 {
        return Err(StoreError::contract(format!(
            "page limit must be at least 1, got {}",
            limit
        )));
    }
    let limit = if limit == i32::MAX { limit - 1 } else { limit };
    Ok((limit as usize, i64::from(limit) + 1))
}

/// Cut the look-ahead row off a fetched window and derive the next cursor.
pub fn split_window(
    order: PageOrder,
    table: &str,
    limit: usize,
    mut rows: Vec<Record>,
) -> StoreResult<Page<Record>> {
    if rows.len() <= limit {
        return Ok(Page {
            items: rows,
            next_cursor: None,
        });
    }
    rows.truncate(limit);
    let next_cursor = match rows.last() {
        Some(last) => Some(Cursor::after(order, table, last)?),
        None => None,
    };
    Ok(Page {
        items: rows,
        next_cursor,
    })
}

impl<S: ConnectionScope> RecordStore<S> {
    /// Fetch the next page of a tenant's records in the table's declared order.
    ///
    /// A `None` cursor starts from the beginning (smallest row id, or most
    /// recent timestamp). Pages bypass the point cache entirely.
    pub async fn page(
        &self,
        limit: i32,
        tenant: TenantKey,
        filter: &PageFilter,
        cursor: Option<Cursor>,
    ) -> StoreResult<Page<Record>> {
        let schema = self.schema();
        let order = page_order(schema)?;
        let (limit, fetch) = plan_fetch(limit)?;
        tenantry_core::validate_tenant(schema, &tenant)?;
        filter.check(schema)?;
        if let Some(cursor) = &cursor {
            if !cursor.fits(order) {
                return Err(StoreError::contract(format!(
                    "cursor {:?} does not fit {:?} order of {}",
                    cursor,
                    order,
                    schema.table()
                )));
            }
        }

        let query = PageQuery {
            tenant,
            filter,
            order,
            after: cursor,
            fetch,
        };
        let outcome = self.run(&Command::Page(query)).await?;

        let rows = outcome
            .records
            .into_iter()
            .map(|row| self.check_row(row))
            .collect::<StoreResult<Vec<_>>>()?;
        tracing::debug!(
            table = schema.table(),
            tenant = %tenant,
            rows = rows.len(),
            "page fetched"
        );
        split_window(order, schema.table(), limit, rows)
    }
}

fn page_order(schema: &Schema) -> StoreResult<PageOrder> {
    schema.order().ok_or_else(|| {
        StoreError::contract(format!(
            "table {} declares no ordering key and cannot be paged",
            schema.table()
        ))
    })
}
