//! SQL rendering of [`Command`]s.
//!
//! Identifiers come from a validated [`Schema`] and are spliced in quoted;
//! every value travels as a positional parameter. Dialects differ only in
//! the clock expression, the two-argument maximum, placeholders and DDL
//! column types.

use tenantry_core::{
    FieldDef, FieldKind, PageOrder, Record, Schema, TenantKey, Value, CREATED_COLUMN,
    MODIFIED_COLUMN, ROW_ID_COLUMN,
};

use crate::command::{Command, FilterOp, OnConflict, PageQuery};
use crate::pagination::Cursor;
use crate::scope::Dialect;

/// A statement ready to send, with its parameters in placeholder order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rendered {
    pub sql: String,
    pub params: Vec<Value>,
}

/// Render one command for `dialect`.
///
/// `CreateTable` renders as several statements separated by `;\n`; every
/// other command is a single statement.
pub fn render(schema: &Schema, command: &Command<'_>, dialect: Dialect) -> Rendered {
    let mut w = Writer::new(dialect);
    match command {
        Command::CreateTable => create_table(&mut w, schema),
        Command::Insert { record, conflict } => insert(&mut w, schema, record, *conflict),
        Command::Update { record } => update(&mut w, schema, record),
        Command::Delete {
            tenant,
            keys,
            returning,
        } => {
            w.push(&format!("DELETE FROM {}", quote(schema.table())));
            where_key(&mut w, schema, *tenant, keys);
            if *returning {
                returning_all(&mut w, schema);
            }
        }
        Command::Select { tenant, keys } => {
            select_from(&mut w, schema);
            where_key(&mut w, schema, *tenant, keys);
        }
        Command::Page(query) => page(&mut w, schema, query),
        Command::CountDirty => w.push(&format!("SELECT COUNT(*) FROM {}", quote(schema.table()))),
        Command::PurgeTenant { tenant } => {
            w.push(&format!(
                "DELETE FROM {} WHERE {} = ",
                quote(schema.table()),
                quote(schema.tenant_column())
            ));
            w.param(tenant_value(*tenant));
        }
    }
    w.finish()
}

/// Parameter value of a tenant key.
pub fn tenant_value(tenant: TenantKey) -> Value {
    Value::Uuid(tenant.as_uuid())
}

pub fn quote(identifier: &str) -> String {
    format!("\"{}\"", identifier)
}

struct Writer {
    dialect: Dialect,
    sql: String,
    params: Vec<Value>,
}

impl Writer {
    fn new(dialect: Dialect) -> Self {
        Self {
            dialect,
            sql: String::with_capacity(256),
            params: Vec::new(),
        }
    }

    fn push(&mut self, fragment: &str) {
        self.sql.push_str(fragment);
    }

    fn param(&mut self, value: Value) {
        self.params.push(value);
        let placeholder = self.dialect.placeholder(self.params.len());
        self.sql.push_str(&placeholder);
    }

    fn finish(self) -> Rendered {
        Rendered {
            sql: self.sql,
            params: self.params,
        }
    }
}

fn column_list(columns: &[&str]) -> String {
    columns.iter().map(|c| quote(c)).collect::<Vec<_>>().join(", ")
}

fn select_from(w: &mut Writer, schema: &Schema) {
    w.push(&format!(
        "SELECT {} FROM {}",
        column_list(&schema.columns()),
        quote(schema.table())
    ));
}

fn returning_all(w: &mut Writer, schema: &Schema) {
    w.push(&format!(" RETURNING {}", column_list(&schema.columns())));
}

fn where_key(w: &mut Writer, schema: &Schema, tenant: TenantKey, keys: &[Value]) {
    w.push(&format!(" WHERE {} = ", quote(schema.tenant_column())));
    w.param(tenant_value(tenant));
    for (def, value) in schema.keys().iter().zip(keys) {
        w.push(&format!(" AND {} = ", quote(&def.name)));
        w.param(value.clone());
    }
}

fn insert(w: &mut Writer, schema: &Schema, record: &Record, conflict: OnConflict) {
    let dialect = w.dialect;
    let table = quote(schema.table());
    let mut columns = schema.primary_key_columns();
    columns.extend(schema.values().iter().map(|f| f.name.as_str()));

    if schema.has_history() {
        // One clock reading for both columns keeps created == modified.
        w.push(&format!(
            "WITH clock AS (SELECT {} AS ts) ",
            dialect.now_millis()
        ));
        columns.push(CREATED_COLUMN);
        columns.push(MODIFIED_COLUMN);
    }

    w.push(&format!(
        "INSERT INTO {} ({}) VALUES (",
        table,
        column_list(&columns)
    ));
    w.param(tenant_value(record.tenant));
    for value in record.keys.iter().chain(&record.values) {
        w.push(", ");
        w.param(value.clone());
    }
    if schema.has_history() {
        w.push(", (SELECT ts FROM clock), (SELECT ts FROM clock)");
    }
    w.push(")");

    let pk = column_list(&schema.primary_key_columns());
    match conflict {
        OnConflict::Fail => {}
        OnConflict::Ignore => w.push(&format!(" ON CONFLICT ({}) DO NOTHING", pk)),
        OnConflict::UpdateValues => {
            let mut sets: Vec<String> = schema
                .values()
                .iter()
                .map(|f| format!("{0} = excluded.{0}", quote(&f.name)))
                .collect();
            if schema.has_history() {
                let modified = quote(MODIFIED_COLUMN);
                let previous = format!("{}.{} + 1", table, modified);
                let now = format!("excluded.{}", modified);
                sets.push(format!(
                    "{} = {}",
                    modified,
                    dialect.greatest(&previous, &now)
                ));
            }
            if sets.is_empty() {
                // DO NOTHING would suppress RETURNING for an existing row.
                sets.push(format!("{0} = excluded.{0}", quote(schema.tenant_column())));
            }
            w.push(&format!(
                " ON CONFLICT ({}) DO UPDATE SET {}",
                pk,
                sets.join(", ")
            ));
        }
    }
    returning_all(w, schema);
}

fn update(w: &mut Writer, schema: &Schema, record: &Record) {
    let dialect = w.dialect;
    w.push(&format!("UPDATE {} SET ", quote(schema.table())));

    let mut first = true;
    for (def, value) in schema.values().iter().zip(&record.values) {
        if !first {
            w.push(", ");
        }
        first = false;
        w.push(&format!("{} = ", quote(&def.name)));
        w.param(value.clone());
    }
    if schema.has_history() {
        if !first {
            w.push(", ");
        }
        first = false;
        let modified = quote(MODIFIED_COLUMN);
        let previous = format!("{} + 1", modified);
        w.push(&format!(
            "{} = {}",
            modified,
            dialect.greatest(&previous, dialect.now_millis())
        ));
    }
    if first {
        let tenant = quote(schema.tenant_column());
        w.push(&format!("{0} = {0}", tenant));
    }

    where_key(w, schema, record.tenant, &record.keys);
    returning_all(w, schema);
}

fn page(w: &mut Writer, schema: &Schema, query: &PageQuery<'_>) {
    select_from(w, schema);
    w.push(&format!(" WHERE {} = ", quote(schema.tenant_column())));
    w.param(tenant_value(query.tenant));

    for condition in &query.filter.conditions {
        let column = quote(&condition.field);
        match (&condition.value, condition.op) {
            (Value::Null, FilterOp::Eq) => w.push(&format!(" AND {} IS NULL", column)),
            (Value::Null, _) => w.push(&format!(" AND {} IS NOT NULL", column)),
            (value, op) => {
                w.push(&format!(" AND {} {} ", column, op.sql()));
                w.param(value.clone());
            }
        }
    }

    let row_id = quote(ROW_ID_COLUMN);
    let order_column = quote(query.order.column());
    match query.after {
        Some(Cursor::RowId(after)) => {
            w.push(&format!(" AND {} > ", row_id));
            w.param(Value::Int(after));
        }
        Some(Cursor::Timestamp { at, row_id: after }) => {
            w.push(&format!(" AND ({}, {}) < (", order_column, row_id));
            w.param(Value::Int(at));
            w.push(", ");
            w.param(Value::Int(after));
            w.push(")");
        }
        None => {}
    }

    match query.order {
        PageOrder::RowIdAsc => w.push(&format!(" ORDER BY {} ASC", row_id)),
        PageOrder::CreatedDesc | PageOrder::ModifiedDesc => w.push(&format!(
            " ORDER BY {} DESC, {} DESC",
            order_column, row_id
        )),
    }
    w.push(" LIMIT ");
    w.param(Value::Int(query.fetch));
}

fn create_table(w: &mut Writer, schema: &Schema) {
    let dialect = w.dialect;
    let mut lines = Vec::new();

    if schema.has_row_id() {
        lines.push(match dialect {
            Dialect::Postgres => format!(
                "{} BIGINT GENERATED ALWAYS AS IDENTITY",
                quote(ROW_ID_COLUMN)
            ),
            Dialect::Sqlite => format!("{} INTEGER PRIMARY KEY AUTOINCREMENT", quote(ROW_ID_COLUMN)),
        });
    }
    lines.push(format!(
        "{} {} NOT NULL",
        quote(schema.tenant_column()),
        column_type(dialect, FieldKind::Uuid)
    ));
    for def in schema.keys().iter().chain(schema.values()) {
        lines.push(column_def(dialect, def));
    }
    if schema.has_history() {
        for column in [CREATED_COLUMN, MODIFIED_COLUMN] {
            lines.push(format!(
                "{} {} NOT NULL",
                quote(column),
                column_type(dialect, FieldKind::Timestamp)
            ));
        }
    }

    let pk = column_list(&schema.primary_key_columns());
    match (dialect, schema.has_row_id()) {
        (Dialect::Sqlite, true) => lines.push(format!("UNIQUE ({})", pk)),
        _ => lines.push(format!("PRIMARY KEY ({})", pk)),
    }

    let table = quote(schema.table());
    w.push(&format!(
        "CREATE TABLE IF NOT EXISTS {} (\n    {}\n)",
        table,
        lines.join(",\n    ")
    ));

    if let Some(order) = schema.order() {
        let index = quote(&schema.page_index_name());
        let tenant = quote(schema.tenant_column());
        let columns = match order {
            PageOrder::RowIdAsc => format!("{}, {}", tenant, quote(ROW_ID_COLUMN)),
            PageOrder::CreatedDesc | PageOrder::ModifiedDesc => format!(
                "{}, {} DESC, {} DESC",
                tenant,
                quote(order.column()),
                quote(ROW_ID_COLUMN)
            ),
        };
        w.push(&format!(
            ";\nCREATE INDEX IF NOT EXISTS {} ON {} ({})",
            index, table, columns
        ));
    }
}

fn column_def(dialect: Dialect, def: &FieldDef) -> String {
    let column = quote(&def.name);
    let mut line = format!("{} {}", column, column_type(dialect, def.kind));
    if !def.nullable {
        line.push_str(" NOT NULL");
    }
    if def.kind.is_sized() {
        let length = dialect.byte_length(&column);
        let mut checks = Vec::new();
        if def.min_len > 0 {
            checks.push(format!("{} >= {}", length, def.min_len));
        }
        if let Some(max) = def.max_len {
            checks.push(format!("{} <= {}", length, max));
        }
        if !checks.is_empty() {
            line.push_str(&format!(" CHECK ({})", checks.join(" AND ")));
        }
    }
    line
}

fn column_type(dialect: Dialect, kind: FieldKind) -> &'static str {
    match (dialect, kind) {
        (Dialect::Postgres, FieldKind::Bool) => "BOOLEAN",
        (Dialect::Postgres, FieldKind::Int | FieldKind::Timestamp) => "BIGINT",
        (Dialect::Postgres, FieldKind::Text) => "TEXT",
        (Dialect::Postgres, FieldKind::Bytes) => "BYTEA",
        (Dialect::Postgres, FieldKind::Uuid) => "UUID",
        (Dialect::Sqlite, FieldKind::Bool | FieldKind::Int | FieldKind::Timestamp) => "INTEGER",
        (Dialect::Sqlite, FieldKind::Text) => "TEXT",
        (Dialect::Sqlite, FieldKind::Bytes | FieldKind::Uuid) => "BLOB",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::{FieldFilter, PageFilter};

    fn inbox() -> Schema {
        Schema::builder("inbox")
            .key(FieldDef::bytes("message_id").len(16, 16))
            .value(FieldDef::text("body").max_len(256))
            .history()
            .row_id()
            .order(PageOrder::CreatedDesc)
            .build()
            .expect("valid schema")
    }

    fn nonce() -> Schema {
        Schema::builder("nonce")
            .key(FieldDef::text("token").len(1, 64))
            .build()
            .expect("valid schema")
    }

    fn message(tenant: TenantKey) -> Record {
        Record::new(
            tenant,
            vec![Value::Bytes(vec![1; 16])],
            vec![Value::from("hi")],
        )
    }

    #[test]
    fn test_insert_reads_clock_once() {
        let tenant = TenantKey::generate();
        let record = message(tenant);
        let cmd = Command::Insert {
            record: &record,
            conflict: OnConflict::Fail,
        };
        let r = render(&inbox(), &cmd, Dialect::Postgres);
        assert!(r.sql.starts_with("WITH clock AS (SELECT (EXTRACT(EPOCH FROM clock_timestamp())"));
        assert!(r.sql.contains(
            "INSERT INTO \"inbox\" (\"tenant_id\", \"message_id\", \"body\", \"created\", \"modified\") \
             VALUES ($1, $2, $3, (SELECT ts FROM clock), (SELECT ts FROM clock))"
        ));
        assert!(!r.sql.contains("ON CONFLICT"));
        assert!(r.sql.ends_with(
            "RETURNING \"row_id\", \"tenant_id\", \"message_id\", \"body\", \"created\", \"modified\""
        ));
        assert_eq!(r.params.len(), 3);
        assert_eq!(r.params[0], tenant_value(tenant));
    }

    #[test]
    fn test_upsert_is_monotonic_per_dialect() {
        let record = message(TenantKey::generate());
        let cmd = Command::Insert {
            record: &record,
            conflict: OnConflict::UpdateValues,
        };

        let pg = render(&inbox(), &cmd, Dialect::Postgres);
        assert!(pg.sql.contains(
            "ON CONFLICT (\"tenant_id\", \"message_id\") DO UPDATE SET \"body\" = excluded.\"body\", \
             \"modified\" = GREATEST(\"inbox\".\"modified\" + 1, excluded.\"modified\")"
        ));

        let lite = render(&inbox(), &cmd, Dialect::Sqlite);
        assert!(lite
            .sql
            .contains("\"modified\" = MAX(\"inbox\".\"modified\" + 1, excluded.\"modified\")"));
        assert!(lite.sql.contains("VALUES (?1, ?2, ?3,"));
    }

    #[test]
    fn test_upsert_without_values_still_returns_row() {
        let record = Record::new(TenantKey::generate(), vec![Value::from("t")], vec![]);
        let cmd = Command::Insert {
            record: &record,
            conflict: OnConflict::UpdateValues,
        };
        let r = render(&nonce(), &cmd, Dialect::Postgres);
        assert!(r
            .sql
            .contains("DO UPDATE SET \"tenant_id\" = excluded.\"tenant_id\" RETURNING"));
        assert!(!r.sql.contains("WITH clock"));
    }

    #[test]
    fn test_try_insert_does_nothing_on_conflict() {
        let record = Record::new(TenantKey::generate(), vec![Value::from("t")], vec![]);
        let cmd = Command::Insert {
            record: &record,
            conflict: OnConflict::Ignore,
        };
        let r = render(&nonce(), &cmd, Dialect::Sqlite);
        assert_eq!(
            r.sql,
            "INSERT INTO \"nonce\" (\"tenant_id\", \"token\") VALUES (?1, ?2) \
             ON CONFLICT (\"tenant_id\", \"token\") DO NOTHING RETURNING \"tenant_id\", \"token\""
        );
    }

    #[test]
    fn test_update_advances_modified() {
        let record = message(TenantKey::generate());
        let r = render(&inbox(), &Command::Update { record: &record }, Dialect::Postgres);
        assert!(r.sql.starts_with("UPDATE \"inbox\" SET \"body\" = $1, \"modified\" = GREATEST(\"modified\" + 1, "));
        assert!(r.sql.contains("WHERE \"tenant_id\" = $2 AND \"message_id\" = $3 RETURNING"));
        assert_eq!(r.params[0], Value::from("hi"));
    }

    #[test]
    fn test_pop_returns_deleted_row() {
        let tenant = TenantKey::generate();
        let keys = [Value::from("t")];
        let pop = Command::Delete {
            tenant,
            keys: &keys,
            returning: true,
        };
        let r = render(&nonce(), &pop, Dialect::Postgres);
        assert_eq!(
            r.sql,
            "DELETE FROM \"nonce\" WHERE \"tenant_id\" = $1 AND \"token\" = $2 \
             RETURNING \"tenant_id\", \"token\""
        );
    }

    #[test]
    fn test_page_predicates_are_strict() {
        let filter = PageFilter::all();
        let query = PageQuery {
            tenant: TenantKey::generate(),
            filter: &filter,
            order: PageOrder::CreatedDesc,
            after: Some(Cursor::Timestamp { at: 50, row_id: 7 }),
            fetch: 11,
        };
        let r = render(&inbox(), &Command::Page(query), Dialect::Postgres);
        assert!(r.sql.contains("AND (\"created\", \"row_id\") < ($2, $3)"));
        assert!(r.sql.ends_with("ORDER BY \"created\" DESC, \"row_id\" DESC LIMIT $4"));
        assert_eq!(r.params[3], Value::Int(11));
        assert!(!r.sql.contains("<="));
        assert!(!r.sql.contains("OFFSET"));
    }

    #[test]
    fn test_page_row_id_and_filters() {
        let schema = Schema::builder("seq")
            .key(FieldDef::int("n"))
            .value(FieldDef::text("tag").nullable())
            .row_id()
            .build()
            .expect("valid schema");
        let filter = PageFilter::all()
            .eq("tag", Value::Null)
            .and(FieldFilter::new("n", FilterOp::Gte, 3i64));
        let query = PageQuery {
            tenant: TenantKey::generate(),
            filter: &filter,
            order: PageOrder::RowIdAsc,
            after: Some(Cursor::RowId(9)),
            fetch: 3,
        };
        let r = render(&schema, &Command::Page(query), Dialect::Sqlite);
        assert!(r.sql.contains(
            "WHERE \"tenant_id\" = ?1 AND \"tag\" IS NULL AND \"n\" >= ?2 AND \"row_id\" > ?3 \
             ORDER BY \"row_id\" ASC LIMIT ?4"
        ));
    }

    #[test]
    fn test_create_table_postgres() {
        let r = render(&inbox(), &Command::CreateTable, Dialect::Postgres);
        assert!(r.sql.contains("\"row_id\" BIGINT GENERATED ALWAYS AS IDENTITY"));
        assert!(r.sql.contains(
            "\"message_id\" BYTEA NOT NULL CHECK (octet_length(\"message_id\") >= 16 AND octet_length(\"message_id\") <= 16)"
        ));
        assert!(r.sql.contains("PRIMARY KEY (\"tenant_id\", \"message_id\")"));
        assert!(r.sql.contains(
            "CREATE INDEX IF NOT EXISTS \"inbox_page_idx\" ON \"inbox\" (\"tenant_id\", \"created\" DESC, \"row_id\" DESC)"
        ));
        assert!(r.params.is_empty());
    }

    #[test]
    fn test_create_table_sqlite() {
        let r = render(&inbox(), &Command::CreateTable, Dialect::Sqlite);
        assert!(r.sql.contains("\"row_id\" INTEGER PRIMARY KEY AUTOINCREMENT"));
        assert!(r.sql.contains("UNIQUE (\"tenant_id\", \"message_id\")"));
        assert!(r.sql.contains("\"tenant_id\" BLOB NOT NULL"));

        let r = render(&nonce(), &Command::CreateTable, Dialect::Sqlite);
        assert!(r.sql.contains("PRIMARY KEY (\"tenant_id\", \"token\")"));
        assert!(!r.sql.contains("CREATE INDEX"));
    }

    #[test]
    fn test_count_and_purge() {
        let r = render(&nonce(), &Command::CountDirty, Dialect::Postgres);
        assert_eq!(r.sql, "SELECT COUNT(*) FROM \"nonce\"");

        let tenant = TenantKey::generate();
        let r = render(&nonce(), &Command::PurgeTenant { tenant }, Dialect::Postgres);
        assert_eq!(r.sql, "DELETE FROM \"nonce\" WHERE \"tenant_id\" = $1");
        assert_eq!(r.params, vec![tenant_value(tenant)]);
    }
}
