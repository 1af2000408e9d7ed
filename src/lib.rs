pub mod channel;
pub mod config;
pub mod error;
pub mod executor;
pub mod policy;
pub mod reconcile;
pub mod report;
pub mod script;

pub use channel::{
    CatalogSnapshot, ChannelError, ChannelResult, ColumnInfo, CommandChannel, MockWarehouse,
    QueryResult, SessionContext, SqlApiChannel, TokenType,
};
pub use config::{BindingSourceKind, ConnectionConfig, MaskingConfig};
pub use error::{Result, SfDriftError};
pub use executor::{
    CommandExecutor, FailurePolicy, Outcome, OutcomeStatus, Phase, ScriptRunner,
    ERROR_EXCERPT_CHARS,
};
pub use policy::{
    known_policy_applications, public_health_policies, BindingSource, ColumnBinding, DesiredState,
    PolicyDefinition, PolicyRef, TargetType, DEFAULT_DATABASE,
};
pub use reconcile::{
    CatalogProbe, MaskingDeployment, ObjectReconciler, ReconcileOptions, ReferenceSource,
    SchemaPolicyCount, UnsetScope, VerificationSummary, Verifier, VerifyMode,
};
pub use report::{DeploymentReport, PhaseTally};
pub use script::{ScriptLoader, SqlScript, Statement, StatementKind, StatementSplitter};
