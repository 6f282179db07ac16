//! PostgreSQL backend for [`QueryInterface`] over a single `may_postgres::Client`.
//!
//! DDL and bookkeeping statements are rendered with sea-query's
//! `PostgresQueryBuilder`; catalog inspection goes through
//! `information_schema`. Every statement is echoed to the [`Reporter`] as a
//! trace line before it runs.

use crate::connection::{self, ConnectionError};
use crate::error::{is_unique_violation, DbError};
use crate::interface::{
    ColumnInfo, ColumnType, Dialect, QualifiedName, QueryInterface, Row, TableDescription,
    TableSpec,
};
use crate::reporter::Reporter;
use may_postgres::types::ToSql;
use may_postgres::Client;
use sea_query::{ColumnDef, Expr, PostgresQueryBuilder, Query, Table};

#[cfg(feature = "tracing")]
use crate::tracing_helpers;

const DEFAULT_SCHEMA: &str = "public";

/// [`QueryInterface`] implementation for PostgreSQL
pub struct PostgresInterface {
    client: Client,
    reporter: Reporter,
}

impl PostgresInterface {
    /// Wrap an established client
    pub fn new(client: Client, reporter: Reporter) -> Self {
        Self { client, reporter }
    }

    /// Connect to `url` and wrap the resulting client
    pub fn connect(url: &str, reporter: Reporter) -> Result<Self, ConnectionError> {
        let client = connection::connect(url)?;
        Ok(Self::new(client, reporter))
    }

    /// Get a reference to the underlying client
    pub fn client(&self) -> &Client {
        &self.client
    }

    fn run(&self, sql: &str, params: &[&dyn ToSql]) -> Result<u64, DbError> {
        #[cfg(feature = "tracing")]
        let _span = tracing_helpers::execute_query_span(sql).entered();

        self.reporter.statement(sql);
        Ok(self.client.execute(sql, params)?)
    }

    fn query(&self, sql: &str, params: &[&dyn ToSql]) -> Result<Vec<may_postgres::Row>, DbError> {
        #[cfg(feature = "tracing")]
        let _span = tracing_helpers::execute_query_span(sql).entered();

        self.reporter.statement(sql);
        Ok(self.client.query(sql, params)?)
    }

    /// Columns of the primary key of `table`, in key order
    fn primary_key_columns(&self, table: &QualifiedName) -> Result<Vec<String>, DbError> {
        let schema = schema_of(table).to_string();
        let rows = self.query(
            "SELECT k.column_name::text FROM information_schema.table_constraints c \
             JOIN information_schema.key_column_usage k \
               ON k.constraint_schema = c.constraint_schema \
              AND k.constraint_name = c.constraint_name \
             WHERE c.constraint_type = 'PRIMARY KEY' \
               AND c.table_schema::text = $1 AND c.table_name::text = $2 \
             ORDER BY k.ordinal_position",
            &[&schema, &table.name],
        )?;
        Ok(rows.iter().map(|row| row.get::<_, String>(0)).collect())
    }
}

impl QueryInterface for PostgresInterface {
    fn dialect(&self) -> Dialect {
        Dialect::Postgres
    }

    fn authenticate(&self) -> Result<(), DbError> {
        self.reporter.statement("SELECT 1");
        connection::check_connection_health(&self.client)
            .map_err(|e| DbError::Other(format!("authentication check failed: {e}")))
    }

    fn execute(&self, sql: &str) -> Result<u64, DbError> {
        self.run(sql, &[])
    }

    fn list_tables(&self, namespace: Option<&str>) -> Result<Vec<String>, DbError> {
        let schema = namespace.unwrap_or(DEFAULT_SCHEMA).to_string();
        let rows = self.query(
            "SELECT table_name::text FROM information_schema.tables \
             WHERE table_schema::text = $1 AND table_type = 'BASE TABLE' \
             ORDER BY table_name",
            &[&schema],
        )?;
        Ok(rows.iter().map(|row| row.get::<_, String>(0)).collect())
    }

    fn describe_table(&self, table: &QualifiedName) -> Result<TableDescription, DbError> {
        let schema = schema_of(table).to_string();
        let rows = self.query(
            "SELECT column_name::text, data_type::text, is_nullable::text \
             FROM information_schema.columns \
             WHERE table_schema::text = $1 AND table_name::text = $2 \
             ORDER BY ordinal_position",
            &[&schema, &table.name],
        )?;

        if rows.is_empty() {
            return Err(DbError::MissingTable(table.to_string()));
        }

        let columns = rows
            .iter()
            .map(|row| {
                let nullable: String = row.get(2);
                ColumnInfo {
                    name: row.get(0),
                    data_type: row.get(1),
                    nullable: nullable == "YES",
                }
            })
            .collect();
        Ok(TableDescription { columns })
    }

    fn rename_table(&self, from: &QualifiedName, to: &str) -> Result<(), DbError> {
        let sql = format!(
            "ALTER TABLE {} RENAME TO {}",
            qualified_sql(from),
            quote_ident(to)
        );
        self.run(&sql, &[])?;

        // The implicit primary key index keeps its name across a table rename
        // and would collide with the key of a new table under the old name.
        let index = format!(
            "ALTER INDEX IF EXISTS {}.{} RENAME TO {}",
            quote_ident(schema_of(from)),
            quote_ident(&format!("{}_pkey", from.name)),
            quote_ident(&format!("{to}_pkey"))
        );
        self.run(&index, &[]).map(|_| ())
    }

    fn list_namespaces(&self) -> Result<Vec<String>, DbError> {
        let rows = self.query(
            "SELECT schema_name::text FROM information_schema.schemata ORDER BY schema_name",
            &[],
        )?;
        Ok(rows.iter().map(|row| row.get::<_, String>(0)).collect())
    }

    fn create_namespace(&self, name: &str) -> Result<(), DbError> {
        let sql = format!("CREATE SCHEMA IF NOT EXISTS {}", quote_ident(name));
        self.run(&sql, &[]).map(|_| ())
    }

    fn create_table(&self, spec: &TableSpec) -> Result<(), DbError> {
        let mut stmt = Table::create();
        stmt.table(sea_table(&spec.table)).if_not_exists();

        for column in &spec.columns {
            let mut def = ColumnDef::new(column.name.clone());
            match column.column_type {
                ColumnType::String => {
                    def.string();
                }
                ColumnType::TimestampTz => {
                    def.timestamp_with_time_zone();
                }
            }
            if !column.nullable {
                def.not_null();
            }
            if column.primary_key {
                def.primary_key();
            }
            stmt.col(&mut def);
        }

        let sql = stmt.to_string(PostgresQueryBuilder);
        self.run(&sql, &[]).map(|_| ())
    }

    fn select_all(&self, table: &QualifiedName) -> Result<Vec<Row>, DbError> {
        // row_to_json keeps rows backend-neutral regardless of column types
        let sql = format!("SELECT row_to_json(t)::text FROM {} AS t", qualified_sql(table));
        let rows = self.query(&sql, &[])?;

        rows.iter()
            .map(|row| {
                let json: String = row.get(0);
                serde_json::from_str::<Row>(&json)
                    .map_err(|e| DbError::Parse(format!("invalid row from {table}: {e}")))
            })
            .collect()
    }

    fn bulk_insert(&self, table: &QualifiedName, rows: &[Row]) -> Result<u64, DbError> {
        let Some(first) = rows.first() else {
            return Ok(0);
        };
        let columns: Vec<String> = first.keys().cloned().collect();

        let mut stmt = Query::insert();
        stmt.into_table(sea_table(table)).columns(columns.clone());
        for row in rows {
            let values: Vec<sea_query::Value> = columns
                .iter()
                .map(|c| json_to_value(row.get(c).unwrap_or(&serde_json::Value::Null)))
                .collect();
            stmt.values(values.into_iter().map(Into::into))
                .map_err(|e| DbError::Query(format!("cannot build insert into {table}: {e}")))?;
        }

        let sql = stmt.to_string(PostgresQueryBuilder);
        match self.run(&sql, &[]) {
            Err(DbError::Postgres(e)) if is_unique_violation(&e) => {
                let key_columns = match self.primary_key_columns(table) {
                    Ok(key) if !key.is_empty() => key,
                    Ok(_) => columns,
                    Err(lookup) => {
                        log::debug!("primary key lookup for {table} failed: {lookup}");
                        columns
                    }
                };
                Err(DbError::DuplicateKey {
                    table: table.to_string(),
                    key: key_summary(&key_columns, rows),
                })
            }
            other => other,
        }
    }

    fn bulk_delete(&self, table: &QualifiedName, column: &str, value: &str) -> Result<u64, DbError> {
        let sql = Query::delete()
            .from_table(sea_table(table))
            .and_where(Expr::col(column.to_string()).eq(value.to_string()))
            .to_string(PostgresQueryBuilder);
        self.run(&sql, &[])
    }

    fn transaction(&self, body: &mut dyn FnMut() -> Result<(), DbError>) -> Result<(), DbError> {
        self.run("BEGIN", &[])?;
        match body() {
            Ok(()) => self.run("COMMIT", &[]).map(|_| ()),
            Err(e) => {
                if let Err(rollback) = self.run("ROLLBACK", &[]) {
                    log::error!("rollback failed after '{e}': {rollback}");
                }
                Err(e)
            }
        }
    }
}

fn schema_of(table: &QualifiedName) -> &str {
    table.namespace.as_deref().unwrap_or(DEFAULT_SCHEMA)
}

fn sea_table(table: &QualifiedName) -> (String, String) {
    (schema_of(table).to_string(), table.name.clone())
}

/// Double-quote an identifier for PostgreSQL
pub(crate) fn quote_ident(ident: &str) -> String {
    format!("\"{}\"", ident.replace('"', "\"\""))
}

fn qualified_sql(table: &QualifiedName) -> String {
    format!("{}.{}", quote_ident(schema_of(table)), quote_ident(&table.name))
}

fn json_to_value(value: &serde_json::Value) -> sea_query::Value {
    match value {
        serde_json::Value::Null => Option::<String>::None.into(),
        serde_json::Value::Bool(b) => (*b).into(),
        serde_json::Value::Number(n) => match n.as_i64() {
            Some(i) => i.into(),
            None => n.as_f64().unwrap_or_default().into(),
        },
        serde_json::Value::String(s) => s.clone().into(),
        other => other.to_string().into(),
    }
}

/// Key values of `rows`, one entry per row, composite keys joined with `/`
fn key_summary(key_columns: &[String], rows: &[Row]) -> String {
    rows.iter()
        .map(|row| {
            key_columns
                .iter()
                .filter_map(|column| row.get(column))
                .map(|v| v.as_str().map(str::to_owned).unwrap_or_else(|| v.to_string()))
                .collect::<Vec<_>>()
                .join("/")
        })
        .collect::<Vec<_>>()
        .join(", ")
}
