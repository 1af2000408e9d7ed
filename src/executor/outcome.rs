use serde::Serialize;
use std::fmt;

/// Characters of a channel error kept in an outcome.
pub const ERROR_EXCERPT_CHARS: usize = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Unset,
    Drop,
    Create,
    Apply,
    Verify,
    Script,
}

impl Phase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::Unset => "unset",
            Phase::Drop => "drop",
            Phase::Create => "create",
            Phase::Apply => "apply",
            Phase::Verify => "verify",
            Phase::Script => "script",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OutcomeStatus {
    /// A statement ran and changed (or confirmed) warehouse state.
    Applied,
    /// Nothing to do: the object was already gone.
    NoOp,
    /// The object already existed in the desired form.
    AlreadySatisfied,
    /// The target does not exist (yet); not a failure.
    Skipped,
    Failed,
}

impl OutcomeStatus {
    pub fn is_failure(&self) -> bool {
        matches!(self, OutcomeStatus::Failed)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Outcome {
    pub phase: Phase,
    pub description: String,
    pub status: OutcomeStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_excerpt: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

impl Outcome {
    fn with_status(phase: Phase, description: impl Into<String>, status: OutcomeStatus) -> Self {
        Self {
            phase,
            description: description.into(),
            status,
            error_excerpt: None,
            note: None,
        }
    }

    pub fn applied(phase: Phase, description: impl Into<String>) -> Self {
        Self::with_status(phase, description, OutcomeStatus::Applied)
    }

    pub fn no_op(phase: Phase, description: impl Into<String>, note: impl Into<String>) -> Self {
        Self::with_status(phase, description, OutcomeStatus::NoOp).with_note(note)
    }

    pub fn already_satisfied(
        phase: Phase,
        description: impl Into<String>,
        note: impl Into<String>,
    ) -> Self {
        Self::with_status(phase, description, OutcomeStatus::AlreadySatisfied).with_note(note)
    }

    pub fn skipped(phase: Phase, description: impl Into<String>, note: impl Into<String>) -> Self {
        Self::with_status(phase, description, OutcomeStatus::Skipped).with_note(note)
    }

    pub fn failed(phase: Phase, description: impl Into<String>, error: &str) -> Self {
        Self {
            error_excerpt: Some(excerpt(error)),
            ..Self::with_status(phase, description, OutcomeStatus::Failed)
        }
    }

    pub fn with_note(mut self, note: impl Into<String>) -> Self {
        self.note = Some(note.into());
        self
    }

    pub fn succeeded(&self) -> bool {
        !self.status.is_failure()
    }
}

pub fn excerpt(error: &str) -> String {
    error.chars().take(ERROR_EXCERPT_CHARS).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_failed_outcome_keeps_excerpt_only() {
        let long_error = "é".repeat(250);
        let outcome = Outcome::failed(Phase::Drop, "Drop address_mask", &long_error);

        assert!(!outcome.succeeded());
        assert_eq!(
            outcome.error_excerpt.as_ref().map(|e| e.chars().count()),
            Some(ERROR_EXCERPT_CHARS)
        );
    }

    #[test]
    fn test_skip_is_not_failure() {
        let outcome = Outcome::skipped(Phase::Apply, "Apply population_mask", "table missing");
        assert!(outcome.succeeded());
        assert_eq!(outcome.note.as_deref(), Some("table missing"));
    }

    #[test]
    fn test_status_serializes_snake_case() {
        let outcome = Outcome::already_satisfied(Phase::Create, "Create x", "exists");
        let json = serde_json::to_value(&outcome).unwrap();
        assert_eq!(json["status"], "already_satisfied");
        assert_eq!(json["phase"], "create");
        assert!(json.get("error_excerpt").is_none());
    }
}
