//! Row-cap enforcement: exactly the cap succeeds, one past it fails with
//! no rows returned.

mod common;

use anyhow::Result;
use reqwest::StatusCode;
use serde_json::json;

#[tokio::test]
async fn row_cap_boundary() -> Result<()> {
    if !common::database_available() {
        eprintln!("skipping: DATABASE_URL not set");
        return Ok(());
    }
    let server = common::ensure_server().await?;
    let admin = common::ADMIN_TOKEN;

    // Tenant capped at 2 rows per query
    let body = common::query_ok(
        &server.base_url,
        admin,
        "SELECT * FROM create_tenant_database('capped', 2)",
        json!([]),
    )
    .await?;
    let tenant_id = body["rows"][0]["id"].as_str().unwrap().to_string();

    let body = common::query_ok(
        &server.base_url,
        admin,
        "SELECT * FROM create_tenant_token($1::uuid, 'full', ARRAY['SELECT','INSERT','CREATE'])",
        json!([tenant_id]),
    )
    .await?;
    let token = body["rows"][0]["token"].as_str().unwrap().to_string();

    common::query_ok(&server.base_url, &token, "CREATE TABLE t (x int)", json!([])).await?;
    let body = common::query_ok(
        &server.base_url,
        &token,
        "INSERT INTO t VALUES (1), (2), (3), (4), (5)",
        json!([]),
    )
    .await?;
    assert_eq!(body["row_count"], 0);

    // Five rows against a cap of two
    let (status, code, body) =
        common::query_err(&server.base_url, &token, "SELECT * FROM t", json!([])).await?;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(code, "ROW_LIMIT_EXCEEDED");
    assert!(body.get("rows").is_none());

    // Exactly the cap is fine
    let body = common::query_ok(
        &server.base_url,
        &token,
        "SELECT * FROM t ORDER BY x LIMIT 2",
        json!([]),
    )
    .await?;
    assert_eq!(body["row_count"], 2);
    assert_eq!(body["rows"], json!([{ "x": 1 }, { "x": 2 }]));

    common::query_ok(
        &server.base_url,
        admin,
        "SELECT delete_tenant_database($1::uuid)",
        json!([tenant_id]),
    )
    .await?;
    Ok(())
}
