//! End-to-end inline runs over in-memory object stores and the local filesystem.

mod common;

use common::*;
use data_linter::aggregator::table_log_path;
use data_linter::prelude::*;
use data_linter::staging::Staging;
use data_linter::storage::read_json;
use data_linter::validators::MIN_MAX_TEST;
use serde_json::json;

#[tokio::test]
async fn test_independent_routing_of_table1_files() {
    let ctx = context().await;
    land_table1(&ctx).await;
    let config = config(false);

    let report = run_validation(&ctx, &config).await.unwrap();
    assert_eq!(report.outcome, RunOutcome::SomeFailedButIndependent);
    assert_eq!((report.failed, report.total), (1, 2));

    assert!(exists(&ctx, "s3://pass/table1/table1_a-0-1234567.csv").await);
    assert!(exists(&ctx, "s3://fail/table1/table1_b-1-1234567.csv").await);
    assert!(!exists(&ctx, "s3://pass/table1/table1_b-1-1234567.csv").await);
    // nothing is removed from land unless configured
    assert!(exists(&ctx, "s3://land/table1_a.csv").await);

    let log: StatusRecord = read_json(
        ctx.storage(),
        &table_log_path("s3://log/", "table1", 1, TIMESTAMP),
    )
    .await
    .unwrap();
    assert!(!log.valid);
    assert_eq!(log.original_path, "s3://land/table1_b.csv");
    assert_eq!(
        log.archived_path.as_deref(),
        Some("s3://fail/table1/table1_b-1-1234567.csv")
    );
    let age = log.response.column_test("age", MIN_MAX_TEST).unwrap();
    assert!(!age.valid);
    assert_eq!(age.unexpected_list, vec![json!(-5)]);

    let staged = Staging::new(ctx.storage(), "s3://log/")
        .statuses()
        .load_all()
        .await
        .unwrap();
    assert!(staged.is_empty());
}

#[tokio::test]
async fn test_all_must_pass_routes_everything_to_fail() {
    let ctx = context().await;
    land_table1(&ctx).await;
    let config = config(true);

    let err = run_validation(&ctx, &config).await.unwrap_err();
    assert!(matches!(err, LinterError::LinterFailed { failed: 1, total: 2 }));

    assert!(exists(&ctx, "s3://fail/table1/table1_a-0-1234567.csv").await);
    assert!(exists(&ctx, "s3://fail/table1/table1_b-1-1234567.csv").await);
    assert!(ctx.storage().list("s3://pass/").await.unwrap().is_empty());

    // aggregation completed, so logs exist and staging is clean
    assert!(exists(&ctx, &table_log_path("s3://log", "table1", 0, TIMESTAMP)).await);
    assert!(Staging::new(ctx.storage(), "s3://log/")
        .statuses()
        .load_all()
        .await
        .unwrap()
        .is_empty());
    assert!(exists(&ctx, "s3://log/data-linter-main-logs/data-linter-1234567.log").await);
}

#[tokio::test]
async fn test_all_passing_files_are_removed_when_configured() {
    let ctx = context().await;
    put(&ctx, "s3://land/table1_a.csv", TABLE1_A).await;
    put(&ctx, "s3://land/table1_c.csv", "id,name,age\n9,eve,60\n").await;
    let mut config = config(true);
    config.remove_tables_on_pass = true;
    config.compress_data = true;
    config.timestamp_partition_name = Some("mojap_file_land_timestamp".to_string());

    let report = run_validation(&ctx, &config).await.unwrap();
    assert_eq!(report.outcome, RunOutcome::AllPassed);
    assert!(ctx.storage().list("s3://land/").await.unwrap().is_empty());
    assert!(
        exists(
            &ctx,
            "s3://pass/table1/mojap_file_land_timestamp=1234567/table1_c-1-1234567.csv.gz"
        )
        .await
    );
}

#[tokio::test]
async fn test_failing_files_stay_in_land() {
    let ctx = context().await;
    land_table1(&ctx).await;
    let mut config = config(false);
    config.remove_tables_on_pass = true;

    run_validation(&ctx, &config).await.unwrap();
    assert!(!exists(&ctx, "s3://land/table1_a.csv").await);
    assert!(exists(&ctx, "s3://land/table1_b.csv").await);
}

#[tokio::test]
async fn test_failing_file_without_fail_destination_is_unarchived() {
    let ctx = context().await;
    land_table1(&ctx).await;
    let mut config = config(false);
    config.fail_base_path = None;

    let report = run_validation(&ctx, &config).await.unwrap();
    let failing = report.records.iter().find(|r| !r.valid).unwrap();
    assert_eq!(failing.archived_path, None);
    assert!(ctx.storage().list("s3://fail/").await.unwrap().is_empty());
}

#[tokio::test]
async fn test_unknown_file_aborts_before_validation() {
    let ctx = context().await;
    land_table1(&ctx).await;
    put(&ctx, "s3://land/other.csv", "x\n1\n").await;
    let mut config = config(false);
    config.fail_unknown_files = Some(Default::default());

    let err = run_validation(&ctx, &config).await.unwrap_err();
    assert!(matches!(err, LinterError::UnexpectedFile { .. }));
    assert!(ctx.storage().list("s3://pass/").await.unwrap().is_empty());
}

#[tokio::test]
async fn test_empty_file_beside_valid_one_is_not_validated() {
    let ctx = context().await;
    put(&ctx, "s3://land/table1_a.csv", TABLE1_A).await;
    put(&ctx, "s3://land/table1_empty.csv", "").await;

    let report = run_validation(&ctx, &config(true)).await.unwrap();
    assert_eq!(report.outcome, RunOutcome::AllPassed);
    assert_eq!((report.failed, report.total), (0, 1));
    assert_eq!(report.records[0].original_path, "s3://land/table1_a.csv");

    assert!(exists(&ctx, "s3://pass/table1/table1_a-0-1234567.csv").await);
    assert!(exists(&ctx, "s3://land/table1_empty.csv").await);
    assert!(ctx.storage().list("s3://fail/").await.unwrap().is_empty());
}

#[tokio::test]
async fn test_directory_marker_is_not_an_unknown_file() {
    let ctx = context().await;
    land_table1(&ctx).await;
    put(&ctx, "s3://land/incoming/", "").await;
    let mut config = config(false);
    config.fail_unknown_files = Some(Default::default());

    let report = run_validation(&ctx, &config).await.unwrap();
    assert_eq!(report.total, 2);
}

#[tokio::test]
async fn test_required_table_with_only_an_empty_file_is_missing() {
    let ctx = context().await;
    put(&ctx, "s3://land/table1_empty.csv", "").await;

    let err = run_validation(&ctx, &config(false)).await.unwrap_err();
    assert!(matches!(err, LinterError::MissingRequiredFile { table } if table == "table1"));
    assert!(ctx.storage().list("s3://pass/").await.unwrap().is_empty());
}

#[tokio::test]
async fn test_summary_over_table_logs() {
    let ctx = context().await;
    land_table1(&ctx).await;
    run_validation(&ctx, &config(false)).await.unwrap();

    let summary = summarize(ctx.storage(), "s3://log/", None).await.unwrap();
    assert!(!summary.valid);
    assert_eq!(summary.total, 2);
    assert_eq!(summary.failure_percentage, 50.0);
    assert_eq!(summary.failed_files[0].original_path, "s3://land/table1_b.csv");

    let only_table1 = summarize(ctx.storage(), "s3://log/", Some("table1")).await.unwrap();
    assert_eq!(only_table1, summary);

    let errors = errors_for_file(ctx.storage(), "s3://log/", "s3://land/table1_b.csv")
        .await
        .unwrap();
    assert_eq!(errors.runs.len(), 1);
    assert_eq!(errors.runs[0].timestamp, Some(TIMESTAMP));
    let failure = &errors.runs[0].failures[0];
    assert_eq!(
        (failure.column.as_deref(), failure.test.as_str()),
        (Some("age"), MIN_MAX_TEST)
    );
}

#[tokio::test]
async fn test_config_loaded_through_storage_with_yml_fallback() {
    let ctx = context().await;
    put(&ctx, "s3://meta/config.yml", &config(false).to_yaml().unwrap()).await;
    let loaded = load_and_validate_config(ctx.storage(), "s3://meta/config.yaml")
        .await
        .unwrap();
    assert_eq!(loaded, config(false));
}

#[tokio::test]
async fn test_inline_run_on_local_filesystem() {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path().to_str().unwrap().to_string();
    std::fs::create_dir_all(dir.path().join("land")).unwrap();
    std::fs::create_dir_all(dir.path().join("meta")).unwrap();
    std::fs::write(dir.path().join("land/table1_a.csv"), TABLE1_A).unwrap();
    std::fs::write(dir.path().join("land/table1_b.csv"), TABLE1_B).unwrap();
    std::fs::write(dir.path().join("meta/table1.json"), TABLE1_META).unwrap();

    let mut config = config(false);
    config.land_base_path = format!("{root}/land");
    config.pass_base_path = format!("{root}/pass");
    config.fail_base_path = Some(format!("{root}/fail"));
    config.log_base_path = format!("{root}/log");
    config.tables.get_mut("table1").unwrap().metadata = Some(format!("{root}/meta/table1.json"));

    let ctx = RunContext::from_env().with_timestamp(TIMESTAMP);
    let report = run_validation(&ctx, &config).await.unwrap();
    assert_eq!(report.outcome, RunOutcome::SomeFailedButIndependent);
    assert!(dir.path().join("pass/table1/table1_a-0-1234567.csv").exists());
    assert!(dir.path().join("fail/table1/table1_b-1-1234567.csv").exists());

    let err = para_run_init(&ctx, &config, 2).await.unwrap_err();
    assert!(matches!(err, LinterError::UnsupportedLocalParallelism { .. }));
}
