use crate::policy::{ColumnBinding, PolicyDefinition, PolicyRef};

pub(crate) const DEFAULT_POLICY_REFERENCES_VIEW: &str =
    "SNOWFLAKE.ACCOUNT_USAGE.POLICY_REFERENCES";

const REFERENCE_COLUMNS: &str =
    "policy_schema, policy_name, ref_schema_name, ref_entity_name, ref_column_name";

pub(crate) fn escape_sql_string(s: &str) -> String {
    s.replace('\'', "''")
}

pub(crate) fn show_tables_like(table: &str) -> String {
    format!("SHOW TABLES LIKE '{}'", escape_sql_string(table))
}

pub(crate) fn show_masking_policies_like(name: &str) -> String {
    format!("SHOW MASKING POLICIES LIKE '{}'", escape_sql_string(name))
}

pub(crate) fn show_masking_policies_in(schema: &str) -> String {
    format!("SHOW MASKING POLICIES IN SCHEMA {schema}")
}

pub(crate) fn create_masking_policy(policy: &PolicyDefinition) -> String {
    let sql_type = policy.target_type.sql_type();
    format!(
        "CREATE MASKING POLICY {name} AS (val {sql_type}) RETURNS {sql_type} ->\n{body}",
        name = policy.name,
        sql_type = sql_type,
        body = policy.body.trim(),
    )
}

pub(crate) fn drop_masking_policy(policy: &PolicyRef) -> String {
    format!("DROP MASKING POLICY {}", policy.name)
}

/// Policy name as seen from the binding's schema.
fn policy_name_for(binding: &ColumnBinding) -> String {
    let policy = binding.policy_ref();
    if crate::policy::ident_eq(&policy.schema, &binding.schema) {
        policy.name
    } else {
        policy.qualified()
    }
}

pub(crate) fn set_masking_policy(binding: &ColumnBinding) -> String {
    format!(
        "ALTER TABLE {} MODIFY COLUMN {} SET MASKING POLICY {}",
        binding.table,
        binding.column,
        policy_name_for(binding)
    )
}

pub(crate) fn unset_masking_policy(binding: &ColumnBinding) -> String {
    format!(
        "ALTER TABLE {} MODIFY COLUMN {} UNSET MASKING POLICY",
        binding.table, binding.column
    )
}

pub(crate) fn masking_policy_references(view: &str, database: &str) -> String {
    format!(
        "SELECT {REFERENCE_COLUMNS} FROM {view} \
         WHERE policy_kind = 'MASKING_POLICY' AND ref_database_name = '{database}'",
        view = view,
        database = escape_sql_string(&database.to_ascii_uppercase()),
    )
}

/// Real-time references of one policy. Fails when the policy does not exist.
pub(crate) fn policy_references_for(database: &str, policy: &PolicyRef) -> String {
    let database = database.to_ascii_uppercase();
    format!(
        "SELECT {REFERENCE_COLUMNS} \
         FROM TABLE({database}.INFORMATION_SCHEMA.POLICY_REFERENCES(POLICY_NAME => '{target}')) \
         WHERE ref_database_name = '{literal}'",
        target = escape_sql_string(&format!("{}.{}", database, policy.qualified())),
        literal = escape_sql_string(&database),
    )
}
