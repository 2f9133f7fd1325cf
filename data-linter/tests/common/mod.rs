//! Shared fixtures: in-memory buckets, the `table1` metadata and landed files.
#![allow(dead_code)]

use std::sync::Arc;

use bytes::Bytes;
use data_linter::prelude::*;
use object_store::memory::InMemory;

pub const TIMESTAMP: i64 = 1_234_567;

pub const TABLE1_META: &str = r#"{
    "name": "table1",
    "file_format": "csv",
    "columns": [
        {"name": "id", "type": "int64", "nullable": false, "unique": true},
        {"name": "name", "type": "string", "maxLength": 20},
        {"name": "age", "type": "int64", "minimum": 0}
    ]
}"#;

pub const TABLE1_A: &str = "id,name,age\n1,ann,31\n2,bob,45\n";
pub const TABLE1_B: &str = "id,name,age\n3,cat,-5\n4,dan,27\n";

pub const BUCKETS: [&str; 5] = ["s3://land", "s3://pass", "s3://fail", "s3://log", "s3://meta"];

/// Context over fresh in-memory buckets with the `table1` metadata uploaded.
pub async fn context() -> RunContext {
    let storage = ObjectStorage::new();
    for bucket in BUCKETS {
        storage.register(bucket, Arc::new(InMemory::new()));
    }
    let ctx = RunContext::new(Arc::new(storage)).with_timestamp(TIMESTAMP);
    put(&ctx, "s3://meta/table1.json", TABLE1_META).await;
    ctx
}

pub async fn put(ctx: &RunContext, path: &str, text: &str) {
    ctx.storage()
        .write(path, Bytes::from(text.to_string()))
        .await
        .unwrap();
}

pub async fn exists(ctx: &RunContext, path: &str) -> bool {
    ctx.storage().exists(path).await.unwrap()
}

/// Lands `table1_a.csv` (valid) and `table1_b.csv` (age -5).
pub async fn land_table1(ctx: &RunContext) {
    put(ctx, "s3://land/table1_a.csv", TABLE1_A).await;
    put(ctx, "s3://land/table1_b.csv", TABLE1_B).await;
}

pub fn config(all_must_pass: bool) -> LinterConfig {
    let mut config = LinterConfig::from_yaml(
        r#"
land-base-path: s3://land/
pass-base-path: s3://pass/
fail-base-path: s3://fail/
log-base-path: s3://log/
tables:
  table1:
    required: true
    pattern: 'table1.*\.csv'
    metadata: s3://meta/table1.json
"#,
    )
    .unwrap();
    config.all_must_pass = all_must_pass;
    config
}
