use crate::error::Result;
use crate::executor::{Outcome, OutcomeStatus, Phase};
use crate::reconcile::VerificationSummary;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PhaseTally {
    pub attempted: usize,
    pub succeeded: usize,
}

impl PhaseTally {
    pub fn failed(&self) -> usize {
        self.attempted - self.succeeded
    }
}

/// Ordered outcomes of one run plus the verification summary, if any.
#[derive(Debug, Clone)]
pub struct DeploymentReport {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    outcomes: Vec<Outcome>,
    pub verification: Option<VerificationSummary>,
}

#[derive(Serialize)]
struct ReportView<'a> {
    run_id: &'a Uuid,
    started_at: &'a DateTime<Utc>,
    finished_at: &'a Option<DateTime<Utc>>,
    tallies: BTreeMap<Phase, PhaseTally>,
    outcomes: &'a [Outcome],
    verification: &'a Option<VerificationSummary>,
}

impl DeploymentReport {
    pub fn new() -> Self {
        Self {
            run_id: Uuid::new_v4(),
            started_at: Utc::now(),
            finished_at: None,
            outcomes: Vec::new(),
            verification: None,
        }
    }

    pub fn push(&mut self, outcome: Outcome) {
        self.outcomes.push(outcome);
    }

    pub fn extend(&mut self, outcomes: impl IntoIterator<Item = Outcome>) {
        self.outcomes.extend(outcomes);
    }

    pub fn finish(&mut self) {
        self.finished_at = Some(Utc::now());
    }

    pub fn outcomes(&self) -> &[Outcome] {
        &self.outcomes
    }

    pub fn phase_outcomes(&self, phase: Phase) -> impl Iterator<Item = &Outcome> {
        self.outcomes.iter().filter(move |o| o.phase == phase)
    }

    pub fn tally(&self, phase: Phase) -> PhaseTally {
        self.phase_outcomes(phase)
            .fold(PhaseTally::default(), |mut tally, outcome| {
                tally.attempted += 1;
                if outcome.succeeded() {
                    tally.succeeded += 1;
                }
                tally
            })
    }

    /// Tallies of every phase that recorded at least one outcome, in phase order.
    pub fn tallies(&self) -> BTreeMap<Phase, PhaseTally> {
        let mut tallies: BTreeMap<Phase, PhaseTally> = BTreeMap::new();
        for outcome in &self.outcomes {
            let tally = tallies.entry(outcome.phase).or_default();
            tally.attempted += 1;
            if outcome.succeeded() {
                tally.succeeded += 1;
            }
        }
        tallies
    }

    pub fn failures(&self) -> impl Iterator<Item = &Outcome> {
        self.outcomes.iter().filter(|o| !o.succeeded())
    }

    pub fn has_failures(&self) -> bool {
        self.failures().next().is_some()
    }

    /// Phase and status of every outcome, for comparing runs.
    pub fn shape(&self) -> Vec<(Phase, OutcomeStatus)> {
        self.outcomes.iter().map(|o| (o.phase, o.status)).collect()
    }

    pub fn to_json(&self) -> Result<String> {
        let view = ReportView {
            run_id: &self.run_id,
            started_at: &self.started_at,
            finished_at: &self.finished_at,
            tallies: self.tallies(),
            outcomes: &self.outcomes,
            verification: &self.verification,
        };
        Ok(serde_json::to_string_pretty(&view)?)
    }
}

impl Default for DeploymentReport {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> DeploymentReport {
        let mut report = DeploymentReport::new();
        report.push(Outcome::applied(Phase::Unset, "Unset a"));
        report.push(Outcome::skipped(Phase::Unset, "Unset b", "table missing"));
        report.push(Outcome::failed(Phase::Drop, "Drop p", "boom"));
        report.push(Outcome::applied(Phase::Create, "Create p"));
        report
    }

    #[test]
    fn test_tallies_per_phase() {
        let report = sample();

        assert_eq!(
            report.tally(Phase::Unset),
            PhaseTally {
                attempted: 2,
                succeeded: 2
            }
        );
        assert_eq!(report.tally(Phase::Drop).failed(), 1);
        assert_eq!(report.tally(Phase::Apply), PhaseTally::default());

        let phases: Vec<Phase> = report.tallies().into_keys().collect();
        assert_eq!(phases, vec![Phase::Unset, Phase::Drop, Phase::Create]);
        assert!(report.has_failures());
    }

    #[test]
    fn test_json_includes_tallies() {
        let mut report = sample();
        report.finish();
        let json: serde_json::Value = serde_json::from_str(&report.to_json().unwrap()).unwrap();

        assert_eq!(json["tallies"]["unset"]["attempted"], 2);
        assert_eq!(json["outcomes"].as_array().unwrap().len(), 4);
        assert_eq!(json["outcomes"][2]["error_excerpt"], "boom");
        assert!(json["finished_at"].is_string());
    }
}
