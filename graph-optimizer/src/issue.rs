use std::{collections::BTreeMap, path::Path};

use common::error::AppError;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// The four closed quality-issue types.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum IssueType {
    EntityQualityIssue,
    RedundancyEntity,
    RelationshipQualityIssue,
    RedundancyRelationship,
}

impl IssueType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::EntityQualityIssue => "entity_quality_issue",
            Self::RedundancyEntity => "redundancy_entity",
            Self::RelationshipQualityIssue => "relationship_quality_issue",
            Self::RedundancyRelationship => "redundancy_relationship",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "entity_quality_issue" => Some(Self::EntityQualityIssue),
            "redundancy_entity" => Some(Self::RedundancyEntity),
            "relationship_quality_issue" => Some(Self::RelationshipQualityIssue),
            "redundancy_relationship" => Some(Self::RedundancyRelationship),
            _ => None,
        }
    }

    pub fn targets_entities(self) -> bool {
        matches!(self, Self::EntityQualityIssue | Self::RedundancyEntity)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CriticEvaluation {
    pub is_valid: bool,
    pub critique: String,
}

/// Score added per agreeing critic.
pub const CRITIC_VOTE_WEIGHT: f64 = 0.9;

/// A detected quality defect, its provenance snapshot, and its evaluation
/// history. Identity is `(issue_type, sorted affected ids)`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Issue {
    pub issue_type: IssueType,
    pub affected_ids: Vec<String>,
    pub reasoning: String,
    #[serde(default)]
    pub source_graph: Value,
    #[serde(default)]
    pub critic_evaluations: BTreeMap<String, CriticEvaluation>,
    #[serde(default)]
    pub validation_score: f64,
    #[serde(default)]
    pub is_resolved: bool,
}

pub type IssueKey = (IssueType, Vec<String>);

impl Issue {
    pub fn new(
        issue_type: IssueType,
        mut affected_ids: Vec<String>,
        reasoning: String,
        source_graph: Value,
    ) -> Self {
        affected_ids.sort();
        affected_ids.dedup();
        Self {
            issue_type,
            affected_ids,
            reasoning,
            source_graph,
            critic_evaluations: BTreeMap::new(),
            validation_score: 0.0,
            is_resolved: false,
        }
    }

    pub fn key(&self) -> IssueKey {
        let mut ids = self.affected_ids.clone();
        ids.sort();
        (self.issue_type, ids)
    }

    pub fn is_confident(&self, threshold: f64) -> bool {
        self.validation_score >= threshold
    }
}

/// The optimizer's durable state: a JSON array of issues on disk, rewritten
/// at every checkpoint. Owned exclusively by one optimizer process.
#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct IssueState {
    pub issues: Vec<Issue>,
}

impl IssueState {
    /// A missing file is an empty state, not an error.
    pub fn load(path: &Path) -> Result<Self, AppError> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let raw = std::fs::read_to_string(path)?;
        serde_json::from_str(&raw)
            .map_err(|e| AppError::Optimizer(format!("corrupt state file {}: {e}", path.display())))
    }

    pub fn save(&self, path: &Path) -> Result<(), AppError> {
        let raw = serde_json::to_string_pretty(self)
            .map_err(|e| AppError::Optimizer(format!("state serialization failed: {e}")))?;
        std::fs::write(path, raw)?;
        Ok(())
    }

    /// Insert unless an issue with the same key exists. Returns whether the
    /// issue was added.
    pub fn insert_new(&mut self, issue: Issue) -> bool {
        let key = issue.key();
        if self.issues.iter().any(|existing| existing.key() == key) {
            return false;
        }
        self.issues.push(issue);
        true
    }

    pub fn all_have_an_evaluation(&self) -> bool {
        self.issues
            .iter()
            .all(|issue| !issue.critic_evaluations.is_empty())
    }

    pub fn has_unresolved_confident(&self, threshold: f64) -> bool {
        self.issues
            .iter()
            .any(|issue| !issue.is_resolved && issue.is_confident(threshold))
    }

    /// Indices of issues ready for the processing stage.
    pub fn processable(&self, threshold: f64) -> Vec<usize> {
        self.issues
            .iter()
            .enumerate()
            .filter(|(_, issue)| !issue.is_resolved && issue.is_confident(threshold))
            .map(|(index, _)| index)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn issue(issue_type: IssueType, ids: &[&str]) -> Issue {
        Issue::new(
            issue_type,
            ids.iter().map(|id| (*id).to_string()).collect(),
            "looks redundant".into(),
            json!({}),
        )
    }

    #[test]
    fn keys_are_order_insensitive() {
        let a = issue(IssueType::RedundancyEntity, &["e2", "e1"]);
        let b = issue(IssueType::RedundancyEntity, &["e1", "e2"]);
        let c = issue(IssueType::RedundancyRelationship, &["e1", "e2"]);
        assert_eq!(a.key(), b.key());
        assert_ne!(a.key(), c.key());
    }

    #[test]
    fn insert_new_rejects_key_collisions() {
        let mut state = IssueState::default();
        assert!(state.insert_new(issue(IssueType::RedundancyEntity, &["e1", "e2"])));
        assert!(!state.insert_new(issue(IssueType::RedundancyEntity, &["e2", "e1"])));
        assert!(state.insert_new(issue(IssueType::EntityQualityIssue, &["e1"])));
        assert_eq!(state.issues.len(), 2);
    }

    #[test]
    fn state_round_trips_through_the_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("state.json");

        let mut state = IssueState::default();
        let mut one = issue(IssueType::RelationshipQualityIssue, &["r1"]);
        one.validation_score = 1.8;
        one.critic_evaluations.insert(
            "critic-1".into(),
            CriticEvaluation {
                is_valid: true,
                critique: "confirmed".into(),
            },
        );
        state.insert_new(one);
        state.save(&path).expect("save");

        let loaded = IssueState::load(&path).expect("load");
        assert_eq!(loaded.issues.len(), 1);
        assert_eq!(loaded.issues[0].issue_type, IssueType::RelationshipQualityIssue);
        assert!((loaded.issues[0].validation_score - 1.8).abs() < f64::EPSILON);
        assert!(loaded.issues[0].critic_evaluations.contains_key("critic-1"));

        let missing = IssueState::load(&dir.path().join("absent.json")).expect("load missing");
        assert!(missing.issues.is_empty());
    }

    #[test]
    fn detection_gate_helpers() {
        let mut state = IssueState::default();
        assert!(state.all_have_an_evaluation());
        assert!(!state.has_unresolved_confident(0.9));

        let mut pending = issue(IssueType::EntityQualityIssue, &["e1"]);
        pending.validation_score = 0.9;
        state.insert_new(pending);
        assert!(!state.all_have_an_evaluation());
        assert!(state.has_unresolved_confident(0.9));
        assert_eq!(state.processable(0.9), vec![0]);

        state.issues[0].is_resolved = true;
        assert!(!state.has_unresolved_confident(0.9));
        assert!(state.processable(0.9).is_empty());
    }
}
