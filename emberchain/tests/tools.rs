use googletest::prelude::*;

use emberchain::{
    ChainError,
    tools::{DemoDatabase, Sandbox, shop_tools, utility_tools, validate_select},
};

fn seeded() -> anyhow::Result<(tempfile::TempDir, DemoDatabase)> {
    let dir = tempfile::tempdir()?;
    let database = DemoDatabase::new(dir.path().join("demo.db"));
    database.seed()?;
    Ok((dir, database))
}

#[test]
fn it_accepts_leading_whitespace_and_comments() {
    for sql in [
        "   SELECT name FROM products",
        "\n\tselect * from products",
        "-- cheapest first\nSELECT name FROM products ORDER BY price",
        "/* report */ SELECT count(*) FROM products",
    ] {
        assert_that!(validate_select(sql).is_ok(), eq(true));
    }
}

#[test]
fn it_rejects_anything_but_one_select() {
    for sql in [
        "DELETE FROM products",
        "UPDATE products SET price = 0",
        "DROP TABLE products",
        "SELECT 1; DROP TABLE products",
        "INSERT INTO products SELECT * FROM products",
        "PRAGMA table_info(products)",
        "SELEC name FROM products",
        "",
    ] {
        assert_that!(
            validate_select(sql),
            err(matches_pattern!(ChainError::Security(eq("安全限制：只允許 SELECT 查詢"))))
        );
    }
}

#[test]
fn it_queries_the_seeded_products() -> anyhow::Result<()> {
    let (_dir, database) = seeded()?;

    let table = database.query("SELECT name, price FROM products WHERE category = '配件'")?;
    assert_that!(
        table,
        eq(format!("查詢結果：\nname | price\n{}\n無線耳機 | 3000.0\n", "-".repeat(50)))
    );

    let empty = database.query("SELECT name FROM products WHERE price > 1000000")?;
    assert_that!(empty, eq("查詢結果：無資料"));
    Ok(())
}

#[test]
fn it_leaves_the_table_alone_after_a_rejected_write() -> anyhow::Result<()> {
    let (_dir, database) = seeded()?;

    assert_that!(database.query("DELETE FROM products"), err(anything()));

    let count = database.query("SELECT count(*) AS n FROM products")?;
    assert_that!(count, contains_substring("\n5\n"));
    Ok(())
}

#[test]
fn it_reports_sqlite_errors_as_parse_failures() -> anyhow::Result<()> {
    let (_dir, database) = seeded()?;

    let result = database.query("SELECT name FROM customers");
    assert_that!(
        result,
        err(matches_pattern!(ChainError::Parse(starts_with("資料庫錯誤："))))
    );
    Ok(())
}

#[test]
fn it_reseeds_idempotently() -> anyhow::Result<()> {
    let (_dir, database) = seeded()?;
    database.seed()?;

    let count = database.query("SELECT count(*) FROM products")?;
    assert_that!(count, contains_substring("\n5\n"));
    Ok(())
}

#[test]
fn it_dispatches_utility_tools_by_name() -> anyhow::Result<()> {
    let (dir, database) = seeded()?;
    let registry = utility_tools(Sandbox::new(dir.path()), database);

    assert_that!(registry.len(), eq(8));
    assert_that!(registry.call("calculator", "(2 + 3) * 4")?, eq("計算結果：(2 + 3) * 4 = 20"));
    assert_that!(
        registry.call("query_database", "SELECT name FROM products WHERE id = 2")?,
        contains_substring("筆記型電腦")
    );
    assert_that!(
        registry.call("read_file", "../demo.db"),
        err(matches_pattern!(ChainError::Security(anything())))
    );
    assert_that!(
        registry.call("translate_text", "hello"),
        err(matches_pattern!(ChainError::Parse(anything())))
    );
    Ok(())
}

#[test]
fn it_describes_every_shop_tool() {
    let description = shop_tools().describe();
    assert_that!(description.lines().count(), eq(4));
    assert_that!(description, starts_with("- check_inventory: "));
    assert_that!(description, contains_substring("- query_order: "));
}
