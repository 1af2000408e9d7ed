use sfdrift::{
    CommandExecutor, FailurePolicy, MockWarehouse, OutcomeStatus, Phase, ScriptRunner,
    SessionContext, SqlScript, StatementSplitter,
};
use std::fs;
use std::sync::Arc;

const SETUP_AND_PROCEDURE: &str = "
-- Build the data mart
USE ROLE ACCOUNTADMIN;
USE WAREHOUSE COMPUTE_WH;

USE SCHEMA DATA_MART;
CREATE OR REPLACE PROCEDURE sp_refresh_dashboard()
RETURNS STRING
LANGUAGE SQL
AS
$$
DECLARE
    row_count INTEGER;
BEGIN
    SELECT COUNT(*) INTO :row_count FROM public_health_dashboard;
    IF (row_count = 0) THEN
        RETURN 'empty';
    END IF;
    RETURN 'refreshed';
END;
$$;
";

fn runner(warehouse: &Arc<MockWarehouse>) -> ScriptRunner {
    ScriptRunner::new(
        CommandExecutor::new(warehouse.clone()),
        SessionContext::new("ACCOUNTADMIN", "COMPUTE_WH", "PUBLIC_HEALTH_MODERNIZATION_DEMO"),
    )
}

#[test]
fn test_setup_statements_plus_one_procedure_body() {
    let statements = StatementSplitter::split(&SqlScript::new("refresh.sql", SETUP_AND_PROCEDURE));

    assert_eq!(statements.len(), 4);
    let body = &statements[3];
    assert!(body.is_procedure_body());
    assert!(body.sql.contains("IF (row_count = 0) THEN"));
    assert!(body.sql.contains("RETURN 'empty';\n    END IF;"));
    assert!(body.sql.trim_end().ends_with("$$;"));
}

#[tokio::test]
async fn test_directory_deploys_in_file_order() {
    let dir = tempfile::tempdir().unwrap();
    fs::write(
        dir.path().join("01_schemas.sql"),
        "CREATE SCHEMA IF NOT EXISTS LOGGING;\nUSE SCHEMA LOGGING;\n\
         CREATE TABLE IF NOT EXISTS pipeline_execution_log (id NUMBER, status STRING);",
    )
    .unwrap();
    fs::write(dir.path().join("02_refresh.sql"), SETUP_AND_PROCEDURE).unwrap();

    let warehouse = Arc::new(MockWarehouse::public_health());
    let report = runner(&warehouse)
        .deploy_paths(&[dir.path().to_path_buf()])
        .await
        .unwrap();

    assert!(!report.has_failures());
    assert_eq!(report.tally(Phase::Script).attempted, 7);
    assert!(warehouse.has_table("LOGGING", "pipeline_execution_log"));
    assert!(warehouse.has_procedure("DATA_MART", "sp_refresh_dashboard"));

    let descriptions: Vec<&str> = report
        .outcomes()
        .iter()
        .map(|o| o.description.as_str())
        .collect();
    assert!(descriptions[0].contains("01_schemas.sql"));
    assert!(descriptions[6].contains("02_refresh.sql procedure 4/4"));
}

#[tokio::test]
async fn test_failed_statement_does_not_stop_later_scripts() {
    let dir = tempfile::tempdir().unwrap();
    let broken = dir.path().join("01_broken.sql");
    let good = dir.path().join("02_good.sql");
    fs::write(&broken, "USE SCHEMA NOWHERE;\nCREATE TABLE t (id NUMBER);").unwrap();
    fs::write(&good, "USE SCHEMA LOGGING;\nCREATE TABLE audit_log (id NUMBER);").unwrap();

    let warehouse = Arc::new(MockWarehouse::public_health());
    let report = runner(&warehouse)
        .with_failure_policy(FailurePolicy::StopScript)
        .deploy_paths(&[broken, good])
        .await
        .unwrap();

    let statuses: Vec<OutcomeStatus> = report.outcomes().iter().map(|o| o.status).collect();
    assert_eq!(
        statuses,
        vec![
            OutcomeStatus::Failed,
            OutcomeStatus::Skipped,
            OutcomeStatus::Applied,
            OutcomeStatus::Applied
        ]
    );
    assert!(warehouse.has_table("LOGGING", "audit_log"));
}
