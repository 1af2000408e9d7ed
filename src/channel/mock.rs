use super::{ChannelError, ChannelResult, ColumnInfo, CommandChannel, QueryResult, SessionContext};
use async_trait::async_trait;
use chrono::Utc;
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard};
use tracing::debug;

const IDENT: &str = r#"[A-Za-z_"][\w$."]*"#;

fn pattern(template: &str) -> Regex {
    Regex::new(&template.replace("IDENT", IDENT)).expect("mock statement regex is valid")
}

static USE_RE: Lazy<Regex> =
    Lazy::new(|| pattern(r"(?is)^USE\s+(ROLE|WAREHOUSE|DATABASE|SCHEMA)\s+(IDENT)$"));
static SHOW_TABLES_RE: Lazy<Regex> = Lazy::new(|| {
    pattern(r"(?is)^SHOW\s+TABLES(?:\s+LIKE\s+'([^']*)')?(?:\s+IN\s+(?:SCHEMA\s+)?(IDENT))?$")
});
static SHOW_POLICIES_RE: Lazy<Regex> = Lazy::new(|| {
    pattern(
        r"(?is)^SHOW\s+MASKING\s+POLICIES(?:\s+LIKE\s+'([^']*)')?(?:\s+IN\s+(?:SCHEMA\s+)?(IDENT))?$",
    )
});
static CREATE_POLICY_RE: Lazy<Regex> = Lazy::new(|| {
    pattern(
        r"(?is)^CREATE\s+(OR\s+REPLACE\s+)?MASKING\s+POLICY\s+(IF\s+NOT\s+EXISTS\s+)?(IDENT)\s+AS\s*\(\s*\w+\s+(\w+)[^)]*\)\s*RETURNS\s+(\w+)\s*->\s*(.+)$",
    )
});
static DROP_POLICY_RE: Lazy<Regex> =
    Lazy::new(|| pattern(r"(?is)^DROP\s+MASKING\s+POLICY\s+(IF\s+EXISTS\s+)?(IDENT)$"));
static ALTER_COLUMN_RE: Lazy<Regex> = Lazy::new(|| {
    pattern(
        r"(?is)^ALTER\s+TABLE\s+(IF\s+EXISTS\s+)?(IDENT)\s+(?:MODIFY|ALTER)\s+(?:COLUMN\s+)?(IDENT)\s+(?:SET\s+MASKING\s+POLICY\s+(IDENT)(\s+FORCE)?|(UNSET)\s+MASKING\s+POLICY)$",
    )
});
static POLICY_REFERENCES_RE: Lazy<Regex> =
    Lazy::new(|| pattern(r#"(?is)^SELECT\s.+\bFROM\s+([\w$."]*POLICY_REFERENCES)\b(.*)$"#));
static POLICY_REFERENCES_FN_RE: Lazy<Regex> = Lazy::new(|| {
    pattern(
        r#"(?is)^SELECT\s.+\bFROM\s+TABLE\s*\(\s*([\w$"]+)\.INFORMATION_SCHEMA\.POLICY_REFERENCES\s*\(\s*POLICY_NAME\s*=>\s*'([^']*)'\s*\)\s*\)(.*)$"#,
    )
});
static REF_DATABASE_RE: Lazy<Regex> =
    Lazy::new(|| pattern(r"(?i)REF_DATABASE_NAME\s*=\s*'([^']*)'"));
static POLICY_KIND_RE: Lazy<Regex> = Lazy::new(|| pattern(r"(?i)POLICY_KIND\s*=\s*'([^']*)'"));
static CREATE_SCHEMA_RE: Lazy<Regex> = Lazy::new(|| {
    pattern(r"(?is)^CREATE\s+(OR\s+REPLACE\s+)?SCHEMA\s+(IF\s+NOT\s+EXISTS\s+)?(IDENT)")
});
static CREATE_TABLE_RE: Lazy<Regex> = Lazy::new(|| {
    pattern(
        r"(?is)^CREATE\s+(OR\s+REPLACE\s+)?(?:(?:TRANSIENT|TEMPORARY)\s+)?TABLE\s+(IF\s+NOT\s+EXISTS\s+)?(IDENT)\s*\(",
    )
});
static DROP_TABLE_RE: Lazy<Regex> =
    Lazy::new(|| pattern(r"(?is)^DROP\s+TABLE\s+(IF\s+EXISTS\s+)?(IDENT)$"));
static CREATE_PROCEDURE_RE: Lazy<Regex> = Lazy::new(|| {
    pattern(r"(?is)^CREATE\s+(OR\s+REPLACE\s+)?(?:SECURE\s+)?PROCEDURE\s+(IDENT)\s*\(")
});

type ObjectKey = (String, String);

#[derive(Debug, Clone)]
struct MockColumn {
    data_type: String,
    policy: Option<ObjectKey>,
}

#[derive(Debug, Clone)]
struct MockTable {
    created_on: String,
    columns: BTreeMap<String, MockColumn>,
}

#[derive(Debug, Clone)]
struct MockPolicy {
    created_on: String,
    target_type: String,
    body: String,
}

#[derive(Debug, Default)]
struct Catalog {
    schemas: BTreeSet<String>,
    tables: BTreeMap<ObjectKey, MockTable>,
    policies: BTreeMap<ObjectKey, MockPolicy>,
    procedures: BTreeSet<ObjectKey>,
}

impl Catalog {
    fn is_bound(&self, policy: &ObjectKey) -> bool {
        self.tables
            .values()
            .flat_map(|t| t.columns.values())
            .any(|c| c.policy.as_ref() == Some(policy))
    }
}

/// Policies and bindings currently held by a [`MockWarehouse`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CatalogSnapshot {
    /// `(schema, name) -> (target type, body)`
    pub policies: BTreeMap<(String, String), (String, String)>,
    /// `(schema, table, column, policy schema, policy name)`
    pub bindings: BTreeSet<(String, String, String, String, String)>,
}

/// In-memory warehouse that understands the statements this crate issues.
///
/// Identifiers fold to upper case. Anything it does not recognize succeeds
/// with no rows.
pub struct MockWarehouse {
    database: String,
    catalog: Mutex<Catalog>,
    failures: Mutex<Vec<String>>,
    disconnected: AtomicBool,
    log: Mutex<Vec<(SessionContext, String)>>,
}

fn normalize(ident: &str) -> String {
    ident.trim().trim_matches('"').to_ascii_uppercase()
}

fn now() -> String {
    Utc::now().format("%Y-%m-%d %H:%M:%S%.3f %z").to_string()
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn text_columns(names: &[&str]) -> Vec<ColumnInfo> {
    names
        .iter()
        .map(|n| ColumnInfo {
            name: n.to_string(),
            column_type: "TEXT".to_string(),
        })
        .collect()
}

fn type_family(data_type: &str) -> String {
    let base = data_type
        .split('(')
        .next()
        .unwrap_or(data_type)
        .trim()
        .to_ascii_uppercase();
    match base.as_str() {
        "STRING" | "VARCHAR" | "TEXT" | "CHAR" | "CHARACTER" => "TEXT".to_string(),
        "FLOAT" | "FLOAT4" | "FLOAT8" | "DOUBLE" | "REAL" => "REAL".to_string(),
        "INT" | "INTEGER" | "BIGINT" | "SMALLINT" | "NUMBER" | "NUMERIC" | "DECIMAL" => {
            "FIXED".to_string()
        }
        _ => base,
    }
}

fn like_matches(pattern: &str, value: &str) -> bool {
    let mut re = String::from("(?i)^");
    for ch in pattern.chars() {
        match ch {
            '%' => re.push_str(".*"),
            '_' => re.push('.'),
            other => re.push_str(&regex::escape(&other.to_string())),
        }
    }
    re.push('$');
    Regex::new(&re).map(|r| r.is_match(value)).unwrap_or(false)
}

fn not_found(kind: &str, name: &str) -> ChannelError {
    ChannelError::Statement(format!(
        "SQL compilation error: {kind} '{name}' does not exist or not authorized."
    ))
}

/// Top-level comma split of a column list, ignoring commas inside parens.
fn split_columns(defs: &str) -> Vec<String> {
    let mut parts = Vec::new();
    let mut depth = 0i32;
    let mut current = String::new();
    for ch in defs.chars() {
        match ch {
            '(' => {
                depth += 1;
                current.push(ch);
            }
            ')' => {
                depth -= 1;
                current.push(ch);
            }
            ',' if depth == 0 => parts.push(std::mem::take(&mut current)),
            _ => current.push(ch),
        }
    }
    parts.push(current);
    parts
        .into_iter()
        .map(|p| p.trim().to_string())
        .filter(|p| !p.is_empty())
        .collect()
}

impl MockWarehouse {
    pub fn new(database: impl AsRef<str>) -> Self {
        Self {
            database: normalize(database.as_ref()),
            catalog: Mutex::new(Catalog::default()),
            failures: Mutex::new(Vec::new()),
            disconnected: AtomicBool::new(false),
            log: Mutex::new(Vec::new()),
        }
    }

    /// Schemas and target tables of the public-health pipeline, no policies.
    pub fn public_health() -> Self {
        Self::new("PUBLIC_HEALTH_MODERNIZATION_DEMO")
            .with_schema("LANDING_RAW")
            .with_schema("LOGGING")
            .with_table(
                "CURATED",
                "curated_environmental_data",
                &[
                    ("facility_id", "STRING"),
                    ("facility_address", "STRING"),
                    ("pollutant_level", "FLOAT"),
                ],
            )
            .with_table(
                "CURATED",
                "curated_health_indicators",
                &[
                    ("location_id", "STRING"),
                    ("latitude", "FLOAT"),
                    ("longitude", "FLOAT"),
                ],
            )
            .with_table(
                "DATA_MART",
                "public_health_dashboard",
                &[("county", "STRING"), ("total_population", "INTEGER")],
            )
    }

    pub fn with_schema(self, schema: &str) -> Self {
        lock(&self.catalog).schemas.insert(normalize(schema));
        self
    }

    pub fn with_table(self, schema: &str, table: &str, columns: &[(&str, &str)]) -> Self {
        {
            let mut catalog = lock(&self.catalog);
            catalog.schemas.insert(normalize(schema));
            catalog.tables.insert(
                (normalize(schema), normalize(table)),
                MockTable {
                    created_on: now(),
                    columns: columns
                        .iter()
                        .map(|(name, data_type)| {
                            (
                                normalize(name),
                                MockColumn {
                                    data_type: data_type.to_string(),
                                    policy: None,
                                },
                            )
                        })
                        .collect(),
                },
            );
        }
        self
    }

    pub fn with_policy(self, schema: &str, name: &str, target_type: &str, body: &str) -> Self {
        {
            let mut catalog = lock(&self.catalog);
            catalog.schemas.insert(normalize(schema));
            catalog.policies.insert(
                (normalize(schema), normalize(name)),
                MockPolicy {
                    created_on: now(),
                    target_type: target_type.to_ascii_uppercase(),
                    body: body.trim().to_string(),
                },
            );
        }
        self
    }

    /// Binds an existing policy to an existing column; unknown objects are ignored.
    pub fn with_binding(self, schema: &str, table: &str, column: &str, policy: &str) -> Self {
        {
            let mut catalog = lock(&self.catalog);
            let policy_key = match policy.split_once('.') {
                Some((s, p)) => (normalize(s), normalize(p)),
                None => (normalize(schema), normalize(policy)),
            };
            if catalog.policies.contains_key(&policy_key) {
                if let Some(col) = catalog
                    .tables
                    .get_mut(&(normalize(schema), normalize(table)))
                    .and_then(|t| t.columns.get_mut(&normalize(column)))
                {
                    col.policy = Some(policy_key);
                }
            }
        }
        self
    }

    pub fn drop_table(&self, schema: &str, table: &str) {
        lock(&self.catalog)
            .tables
            .remove(&(normalize(schema), normalize(table)));
    }

    /// Statements containing `fragment` (case-insensitive) fail from now on.
    pub fn fail_statements_matching(&self, fragment: &str) {
        lock(&self.failures).push(fragment.to_ascii_uppercase());
    }

    pub fn disconnect(&self) {
        self.disconnected.store(true, Ordering::SeqCst);
    }

    /// Every statement received, with the context it was sent under.
    pub fn executed(&self) -> Vec<(SessionContext, String)> {
        lock(&self.log).clone()
    }

    pub fn executed_sql(&self) -> Vec<String> {
        lock(&self.log).iter().map(|(_, sql)| sql.clone()).collect()
    }

    pub fn has_procedure(&self, schema: &str, name: &str) -> bool {
        lock(&self.catalog)
            .procedures
            .contains(&(normalize(schema), normalize(name)))
    }

    pub fn has_table(&self, schema: &str, table: &str) -> bool {
        lock(&self.catalog)
            .tables
            .contains_key(&(normalize(schema), normalize(table)))
    }

    pub fn snapshot(&self) -> CatalogSnapshot {
        let catalog = lock(&self.catalog);
        let policies = catalog
            .policies
            .iter()
            .map(|(k, p)| (k.clone(), (p.target_type.clone(), p.body.clone())))
            .collect();
        let bindings = catalog
            .tables
            .iter()
            .flat_map(|((schema, table), t)| {
                t.columns.iter().filter_map(move |(column, c)| {
                    c.policy.as_ref().map(|(ps, pn)| {
                        (
                            schema.clone(),
                            table.clone(),
                            column.clone(),
                            ps.clone(),
                            pn.clone(),
                        )
                    })
                })
            })
            .collect();
        CatalogSnapshot { policies, bindings }
    }

    fn check_database(&self, context: &SessionContext) -> ChannelResult<()> {
        match &context.database {
            Some(db) if normalize(db) != self.database => Err(not_found("Database", db)),
            _ => Ok(()),
        }
    }

    fn current_schema(&self, context: &SessionContext) -> Option<String> {
        context.schema.as_deref().map(|s| {
            let parts: Vec<&str> = s.split('.').collect();
            normalize(parts[parts.len() - 1])
        })
    }

    fn resolve(&self, ident: &str, context: &SessionContext) -> ChannelResult<ObjectKey> {
        let parts: Vec<String> = ident.split('.').map(normalize).collect();
        match parts.as_slice() {
            [name] => {
                self.check_database(context)?;
                let schema = self.current_schema(context).ok_or_else(|| {
                    ChannelError::Statement(
                        "Cannot perform operation. This session does not have a current schema. \
                         Call 'USE SCHEMA', or use a qualified name."
                            .to_string(),
                    )
                })?;
                Ok((schema, name.clone()))
            }
            [schema, name] => {
                self.check_database(context)?;
                Ok((schema.clone(), name.clone()))
            }
            [db, schema, name] => {
                if *db != self.database {
                    return Err(not_found("Database", db));
                }
                Ok((schema.clone(), name.clone()))
            }
            _ => Err(ChannelError::Statement(format!(
                "SQL compilation error: invalid identifier '{ident}'"
            ))),
        }
    }

    fn listing_schema(
        &self,
        in_clause: Option<&str>,
        context: &SessionContext,
    ) -> ChannelResult<Option<String>> {
        let schema = match in_clause {
            Some(ident) => {
                let parts: Vec<String> = ident.split('.').map(normalize).collect();
                if parts.len() == 2 && parts[0] != self.database {
                    return Err(not_found("Database", &parts[0]));
                }
                parts.last().cloned()
            }
            None => {
                self.check_database(context)?;
                self.current_schema(context)
            }
        };
        if let Some(s) = &schema {
            if !lock(&self.catalog).schemas.contains(s) {
                return Err(not_found("Schema", s));
            }
        }
        Ok(schema)
    }

    fn interpret(&self, context: &SessionContext, sql: &str) -> ChannelResult<QueryResult> {
        if let Some(caps) = USE_RE.captures(sql) {
            return self.use_object(&caps[1], &caps[2]);
        }
        if let Some(caps) = SHOW_TABLES_RE.captures(sql) {
            let schema = self.listing_schema(caps.get(2).map(|m| m.as_str()), context)?;
            return Ok(self.show_tables(caps.get(1).map(|m| m.as_str()), schema));
        }
        if let Some(caps) = SHOW_POLICIES_RE.captures(sql) {
            let schema = self.listing_schema(caps.get(2).map(|m| m.as_str()), context)?;
            return Ok(self.show_policies(caps.get(1).map(|m| m.as_str()), schema));
        }
        if let Some(caps) = CREATE_POLICY_RE.captures(sql) {
            let key = self.resolve(&caps[3], context)?;
            return self.create_policy(
                key,
                caps.get(1).is_some(),
                caps.get(2).is_some(),
                &caps[4],
                &caps[5],
                &caps[6],
            );
        }
        if let Some(caps) = DROP_POLICY_RE.captures(sql) {
            let key = self.resolve(&caps[2], context)?;
            return self.drop_policy(key, caps.get(1).is_some());
        }
        if let Some(caps) = ALTER_COLUMN_RE.captures(sql) {
            let table = self.resolve(&caps[2], context)?;
            let column = normalize(&caps[3]);
            let policy = match caps.get(4) {
                Some(p) => Some(self.resolve(p.as_str(), context)?),
                None => None,
            };
            return self.alter_column(
                table,
                column,
                policy,
                caps.get(1).is_some(),
                caps.get(5).is_some(),
            );
        }
        if let Some(caps) = POLICY_REFERENCES_FN_RE.captures(sql) {
            return self.references_of(&caps[1], &caps[2], &caps[3]);
        }
        if let Some(caps) = POLICY_REFERENCES_RE.captures(sql) {
            return Ok(self.policy_references(caps.get(2).map_or("", |m| m.as_str())));
        }
        if let Some(caps) = CREATE_SCHEMA_RE.captures(sql) {
            self.check_database(context)?;
            let ident = caps[3].to_string();
            let name = normalize(ident.rsplit('.').next().unwrap_or(&ident));
            return self.create_schema(name, caps.get(1).is_some(), caps.get(2).is_some());
        }
        if let Some(caps) = CREATE_TABLE_RE.captures(sql) {
            let key = self.resolve(&caps[3], context)?;
            let open = caps.get(0).map_or(0, |m| m.end());
            return self.create_table(
                key,
                &sql[open..],
                caps.get(1).is_some(),
                caps.get(2).is_some(),
            );
        }
        if let Some(caps) = DROP_TABLE_RE.captures(sql) {
            let key = self.resolve(&caps[2], context)?;
            let mut catalog = lock(&self.catalog);
            if catalog.tables.remove(&key).is_none() && caps.get(1).is_none() {
                return Err(not_found("Table", &key.1));
            }
            return Ok(QueryResult::empty());
        }
        if let Some(caps) = CREATE_PROCEDURE_RE.captures(sql) {
            let key = self.resolve(&caps[2], context)?;
            let mut catalog = lock(&self.catalog);
            if catalog.procedures.contains(&key) && caps.get(1).is_none() {
                return Err(ChannelError::Statement(format!(
                    "SQL compilation error: Object '{}' already exists.",
                    key.1
                )));
            }
            catalog.procedures.insert(key);
            return Ok(QueryResult::empty());
        }
        Ok(QueryResult::empty())
    }

    fn use_object(&self, kind: &str, ident: &str) -> ChannelResult<QueryResult> {
        let parts: Vec<String> = ident.split('.').map(normalize).collect();
        match kind.to_ascii_uppercase().as_str() {
            "DATABASE" if parts[0] != self.database => Err(not_found("Database", ident)),
            "SCHEMA" => {
                let schema = parts.last().cloned().unwrap_or_default();
                if parts.len() == 2 && parts[0] != self.database {
                    return Err(not_found("Database", &parts[0]));
                }
                if lock(&self.catalog).schemas.contains(&schema) {
                    Ok(QueryResult::empty())
                } else {
                    Err(not_found("Schema", ident))
                }
            }
            _ => Ok(QueryResult::empty()),
        }
    }

    fn show_tables(&self, like: Option<&str>, schema: Option<String>) -> QueryResult {
        let catalog = lock(&self.catalog);
        let rows = catalog
            .tables
            .iter()
            .filter(|((s, _), _)| schema.as_ref().map_or(true, |want| s == want))
            .filter(|((_, t), _)| like.map_or(true, |p| like_matches(p, t)))
            .map(|((s, t), table)| {
                vec![
                    table.created_on.clone(),
                    t.clone(),
                    self.database.clone(),
                    s.clone(),
                    "TABLE".to_string(),
                ]
            })
            .collect();
        QueryResult {
            columns: text_columns(&["created_on", "name", "database_name", "schema_name", "kind"]),
            rows,
        }
    }

    fn show_policies(&self, like: Option<&str>, schema: Option<String>) -> QueryResult {
        let catalog = lock(&self.catalog);
        let rows = catalog
            .policies
            .iter()
            .filter(|((s, _), _)| schema.as_ref().map_or(true, |want| s == want))
            .filter(|((_, n), _)| like.map_or(true, |p| like_matches(p, n)))
            .map(|((s, n), policy)| {
                vec![
                    policy.created_on.clone(),
                    n.clone(),
                    self.database.clone(),
                    s.clone(),
                    "MASKING_POLICY".to_string(),
                ]
            })
            .collect();
        QueryResult {
            columns: text_columns(&["created_on", "name", "database_name", "schema_name", "kind"]),
            rows,
        }
    }

    fn create_policy(
        &self,
        key: ObjectKey,
        or_replace: bool,
        if_not_exists: bool,
        arg_type: &str,
        return_type: &str,
        body: &str,
    ) -> ChannelResult<QueryResult> {
        if type_family(arg_type) != type_family(return_type) {
            return Err(ChannelError::Statement(format!(
                "SQL compilation error: Masking policy '{}' signature and return type must match.",
                key.1
            )));
        }
        let mut catalog = lock(&self.catalog);
        if !catalog.schemas.contains(&key.0) {
            return Err(not_found("Schema", &key.0));
        }
        if catalog.policies.contains_key(&key) {
            if if_not_exists {
                return Ok(QueryResult::empty());
            }
            if !or_replace {
                return Err(ChannelError::Statement(format!(
                    "SQL compilation error: Object '{}' already exists.",
                    key.1
                )));
            }
            if catalog.is_bound(&key) {
                return Err(ChannelError::Statement(format!(
                    "Policy {} cannot be dropped/replaced as it is associated with one or more entities.",
                    key.1
                )));
            }
        }
        catalog.policies.insert(
            key,
            MockPolicy {
                created_on: now(),
                target_type: arg_type.to_ascii_uppercase(),
                body: body.trim().trim_end_matches(';').trim().to_string(),
            },
        );
        Ok(QueryResult::empty())
    }

    fn drop_policy(&self, key: ObjectKey, if_exists: bool) -> ChannelResult<QueryResult> {
        let mut catalog = lock(&self.catalog);
        if !catalog.policies.contains_key(&key) {
            return if if_exists {
                Ok(QueryResult::empty())
            } else {
                Err(not_found("Masking policy", &key.1))
            };
        }
        if catalog.is_bound(&key) {
            return Err(ChannelError::Statement(format!(
                "Policy {} cannot be dropped/replaced as it is associated with one or more entities.",
                key.1
            )));
        }
        catalog.policies.remove(&key);
        Ok(QueryResult::empty())
    }

    fn alter_column(
        &self,
        table_key: ObjectKey,
        column: String,
        policy: Option<ObjectKey>,
        if_exists: bool,
        force: bool,
    ) -> ChannelResult<QueryResult> {
        let mut catalog = lock(&self.catalog);
        let policy_type = match &policy {
            Some(key) => match catalog.policies.get(key) {
                Some(p) => Some(p.target_type.clone()),
                None => return Err(not_found("Masking policy", &key.1)),
            },
            None => None,
        };
        let Some(table) = catalog.tables.get_mut(&table_key) else {
            return if if_exists {
                Ok(QueryResult::empty())
            } else {
                Err(not_found("Table", &table_key.1))
            };
        };
        let col = table.columns.get_mut(&column).ok_or_else(|| {
            ChannelError::Statement(format!("SQL compilation error: invalid identifier '{column}'"))
        })?;

        match (policy, policy_type) {
            (Some(key), Some(target_type)) => {
                if type_family(&target_type) != type_family(&col.data_type) {
                    return Err(ChannelError::Statement(format!(
                        "SQL compilation error: Unsupported data type '{}' for masking policy '{}'",
                        col.data_type, key.1
                    )));
                }
                if col.policy.is_some() && !force {
                    return Err(ChannelError::Statement(format!(
                        "Specified column {column} is already attached to another masking policy."
                    )));
                }
                col.policy = Some(key);
            }
            _ => col.policy = None,
        }
        Ok(QueryResult::empty())
    }

    fn reference_rows(&self, filter: &str, policy: Option<&ObjectKey>) -> QueryResult {
        let columns = text_columns(&[
            "POLICY_DB",
            "POLICY_SCHEMA",
            "POLICY_NAME",
            "POLICY_KIND",
            "REF_DATABASE_NAME",
            "REF_SCHEMA_NAME",
            "REF_ENTITY_NAME",
            "REF_COLUMN_NAME",
        ]);

        let database_matches = REF_DATABASE_RE
            .captures(filter)
            .map_or(true, |c| normalize(&c[1]) == self.database);
        let kind_matches = POLICY_KIND_RE
            .captures(filter)
            .map_or(true, |c| normalize(&c[1]) == "MASKING_POLICY");
        if !database_matches || !kind_matches {
            return QueryResult {
                columns,
                rows: Vec::new(),
            };
        }

        let rows = self
            .snapshot()
            .bindings
            .into_iter()
            .filter(|(_, _, _, ps, pn)| policy.map_or(true, |(s, n)| s == ps && n == pn))
            .map(|(schema, table, column, policy_schema, policy)| {
                vec![
                    self.database.clone(),
                    policy_schema,
                    policy,
                    "MASKING_POLICY".to_string(),
                    self.database.clone(),
                    schema,
                    table,
                    column,
                ]
            })
            .collect();
        QueryResult { columns, rows }
    }

    fn policy_references(&self, filter: &str) -> QueryResult {
        self.reference_rows(filter, None)
    }

    /// `<db>.INFORMATION_SCHEMA.POLICY_REFERENCES(POLICY_NAME => '<db>.<schema>.<name>')`
    fn references_of(
        &self,
        database: &str,
        policy_name: &str,
        filter: &str,
    ) -> ChannelResult<QueryResult> {
        if normalize(database) != self.database {
            return Err(not_found("Database", database));
        }
        let parts: Vec<String> = policy_name.split('.').map(normalize).collect();
        let key = match parts.as_slice() {
            [db, schema, name] if *db == self.database => (schema.clone(), name.clone()),
            _ => return Err(not_found("Masking policy", policy_name)),
        };
        if !lock(&self.catalog).policies.contains_key(&key) {
            return Err(not_found("Masking policy", policy_name));
        }
        Ok(self.reference_rows(filter, Some(&key)))
    }

    fn create_schema(
        &self,
        name: String,
        or_replace: bool,
        if_not_exists: bool,
    ) -> ChannelResult<QueryResult> {
        let mut catalog = lock(&self.catalog);
        if catalog.schemas.contains(&name) && !or_replace && !if_not_exists {
            return Err(ChannelError::Statement(format!(
                "SQL compilation error: Object '{name}' already exists."
            )));
        }
        catalog.schemas.insert(name);
        Ok(QueryResult::empty())
    }

    fn create_table(
        &self,
        key: ObjectKey,
        after_paren: &str,
        or_replace: bool,
        if_not_exists: bool,
    ) -> ChannelResult<QueryResult> {
        let mut depth = 1i32;
        let mut end = after_paren.len();
        for (idx, ch) in after_paren.char_indices() {
            match ch {
                '(' => depth += 1,
                ')' => {
                    depth -= 1;
                    if depth == 0 {
                        end = idx;
                        break;
                    }
                }
                _ => {}
            }
        }
        let columns = split_columns(&after_paren[..end])
            .into_iter()
            .filter_map(|def| {
                let mut tokens = def.split_whitespace();
                let name = tokens.next()?;
                let data_type = tokens.next()?;
                let upper = name.to_ascii_uppercase();
                if matches!(
                    upper.as_str(),
                    "CONSTRAINT" | "PRIMARY" | "FOREIGN" | "UNIQUE"
                ) {
                    return None;
                }
                Some((
                    normalize(name),
                    MockColumn {
                        data_type: data_type.to_string(),
                        policy: None,
                    },
                ))
            })
            .collect();

        let mut catalog = lock(&self.catalog);
        if !catalog.schemas.contains(&key.0) {
            return Err(not_found("Schema", &key.0));
        }
        if catalog.tables.contains_key(&key) {
            if if_not_exists {
                return Ok(QueryResult::empty());
            }
            if !or_replace {
                return Err(ChannelError::Statement(format!(
                    "SQL compilation error: Object '{}' already exists.",
                    key.1
                )));
            }
        }
        catalog.tables.insert(
            key,
            MockTable {
                created_on: now(),
                columns,
            },
        );
        Ok(QueryResult::empty())
    }
}

#[async_trait]
impl CommandChannel for MockWarehouse {
    async fn execute(&self, context: &SessionContext, sql: &str) -> ChannelResult<QueryResult> {
        lock(&self.log).push((context.clone(), sql.to_string()));

        if self.disconnected.load(Ordering::SeqCst) {
            return Err(ChannelError::Connection(
                "mock warehouse is unreachable".to_string(),
            ));
        }

        let upper = sql.to_ascii_uppercase();
        if lock(&self.failures).iter().any(|f| upper.contains(f)) {
            return Err(ChannelError::Statement(
                "SQL execution error: injected failure".to_string(),
            ));
        }

        let statement = sql.trim().trim_end_matches(';').trim();
        debug!(context = %context, sql = %statement, "mock warehouse statement");
        self.interpret(context, statement)
    }
}
