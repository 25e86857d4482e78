//! Read-only SQL over the demo product database.
//!
//! Queries are parsed before they reach SQLite. Only a single query statement built from
//! SELECTs passes; the connection itself is also opened read-only.

use std::path::{Path, PathBuf};

use itertools::Itertools;
use log::{debug, info};
use rusqlite::{Connection, OpenFlags, params, types::Value};
use sqlparser::{
    ast::{Query, SetExpr, Statement},
    dialect::SQLiteDialect,
    parser::Parser,
};

use super::TextTool;
use crate::error::{ChainError, ChainResult};

pub const SELECT_ONLY: &str = "安全限制：只允許 SELECT 查詢";

fn rejected() -> ChainError {
    ChainError::Security(SELECT_ONLY.into())
}

fn read_only_query(query: &Query) -> bool {
    let ctes_ok = query
        .with
        .as_ref()
        .is_none_or(|with| with.cte_tables.iter().all(|cte| read_only_query(&cte.query)));
    ctes_ok && read_only_body(&query.body)
}

fn read_only_body(body: &SetExpr) -> bool {
    match body {
        SetExpr::Select(select) => select.into.is_none(),
        SetExpr::Values(_) => true,
        SetExpr::Query(query) => read_only_query(query),
        SetExpr::SetOperation { left, right, .. } => read_only_body(left) && read_only_body(right),
        _ => false,
    }
}

/// Accepts exactly one statement that can only read.
///
/// Whitespace and comments before the statement are fine. Anything that fails to parse,
/// more than one statement, or any statement that is not a query is a security error.
pub fn validate_select(sql: &str) -> ChainResult<()> {
    let statements = Parser::parse_sql(&SQLiteDialect {}, sql).map_err(|err| {
        debug!("Rejecting unparseable SQL: {err}");
        rejected()
    })?;

    match statements.as_slice() {
        [Statement::Query(query)] if read_only_query(query) => Ok(()),
        _ => Err(rejected()),
    }
}

const PRODUCTS: [(i64, &str, f64, i64, &str); 5] = [
    (1, "智慧型手機", 15000.0, 50, "電子產品"),
    (2, "筆記型電腦", 35000.0, 30, "電子產品"),
    (3, "無線耳機", 3000.0, 100, "配件"),
    (4, "平板電腦", 18000.0, 45, "電子產品"),
    (5, "智慧手錶", 8000.0, 80, "穿戴裝置"),
];

fn db_err(err: rusqlite::Error) -> ChainError {
    ChainError::Parse(format!("資料庫錯誤：{err}"))
}

fn render(value: Value) -> String {
    match value {
        Value::Null => "None".to_string(),
        Value::Integer(i) => i.to_string(),
        Value::Real(f) => format!("{f:?}"),
        Value::Text(s) => s,
        Value::Blob(b) => format!("<{} bytes>", b.len()),
    }
}

/// SQLite file holding the `products` demo table.
#[derive(Clone, Debug)]
pub struct DemoDatabase {
    path: PathBuf,
}

impl DemoDatabase {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Recreates the five product rows, leaving other tables alone.
    pub fn seed(&self) -> ChainResult<()> {
        let mut conn = Connection::open(&self.path).map_err(db_err)?;
        let tx = conn.transaction().map_err(db_err)?;
        tx.execute(
            "CREATE TABLE IF NOT EXISTS products (
                id INTEGER PRIMARY KEY,
                name TEXT NOT NULL,
                price REAL NOT NULL,
                stock INTEGER NOT NULL,
                category TEXT NOT NULL
            )",
            [],
        )
        .map_err(db_err)?;
        tx.execute("DELETE FROM products", []).map_err(db_err)?;
        for (id, name, price, stock, category) in PRODUCTS {
            tx.execute(
                "INSERT INTO products VALUES (?1, ?2, ?3, ?4, ?5)",
                params![id, name, price, stock, category],
            )
            .map_err(db_err)?;
        }
        tx.commit().map_err(db_err)?;
        info!("Seeded {} with {} products", self.path.display(), PRODUCTS.len());
        Ok(())
    }

    /// Runs a validated SELECT and lays the rows out as a pipe separated table.
    pub fn query(&self, sql: &str) -> ChainResult<String> {
        validate_select(sql)?;

        let conn = Connection::open_with_flags(
            &self.path,
            OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )
        .map_err(db_err)?;

        let mut stmt = conn.prepare(sql).map_err(db_err)?;
        if !stmt.readonly() {
            return Err(rejected());
        }

        let columns = stmt
            .column_names()
            .into_iter()
            .map(str::to_string)
            .collect_vec();

        let mut lines = vec![];
        let mut rows = stmt.query([]).map_err(db_err)?;
        while let Some(row) = rows.next().map_err(db_err)? {
            let cells = (0..columns.len())
                .map(|i| row.get::<_, Value>(i).map(render))
                .collect::<Result<Vec<_>, _>>()
                .map_err(db_err)?;
            lines.push(cells.join(" | "));
        }

        if lines.is_empty() {
            return Ok("查詢結果：無資料".to_string());
        }

        Ok(format!(
            "查詢結果：\n{}\n{}\n{}\n",
            columns.join(" | "),
            "-".repeat(50),
            lines.join("\n")
        ))
    }
}

pub struct QueryDatabase(pub DemoDatabase);

impl TextTool for QueryDatabase {
    const NAME: &'static str = "query_database";
    const DESCRIPTION: &'static str =
        "查詢資料庫（僅支援 SELECT）。輸入應該是 SQL 查詢語句，例如：SELECT * FROM products";

    fn invoke(&self, input: &str) -> ChainResult<String> {
        self.0.query(input.trim())
    }
}
