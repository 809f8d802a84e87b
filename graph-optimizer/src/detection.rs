use common::{
    error::AppError,
    utils::{
        json::{parse_llm_json, JsonShape},
        llm::LanguageModel,
    },
};
use serde_json::Value;
use tracing::{info, instrument, warn};

use crate::{
    critic::{
        ENTITY_QUALITY_GUIDELINE, REDUNDANCY_ENTITY_GUIDELINE, REDUNDANCY_RELATIONSHIP_GUIDELINE,
        RELATIONSHIP_QUALITY_GUIDELINE,
    },
    issue::{Issue, IssueState, IssueType},
    retrieval::GraphSnapshot,
};

const DETECTION_MAX_TOKENS: u32 = 8_192;

/// Detection only runs when the previous round has settled: every stored
/// issue has at least one critic evaluation and nothing confident is still
/// waiting to be processed.
pub fn detection_allowed(state: &IssueState, confidence_threshold: f64) -> bool {
    state.all_have_an_evaluation() && !state.has_unresolved_confident(confidence_threshold)
}

fn detection_prompt(snapshot_json: &Value) -> String {
    format!(
        r#"You are a knowledge graph quality expert. Identify quality issues in the following graph.

## Issue Types

{REDUNDANCY_ENTITY_GUIDELINE}

{REDUNDANCY_RELATIONSHIP_GUIDELINE}

{ENTITY_QUALITY_GUIDELINE}

{RELATIONSHIP_QUALITY_GUIDELINE}

## Graph Data:
{snapshot_json}

Report every issue you can support with evidence from the graph data, and nothing speculative. Use element ids from the graph data in `affected_ids`. Response format (surrounded by ```json and ```):

```json
[
  {{
    "issue_type": "entity_quality_issue|redundancy_entity|relationship_quality_issue|redundancy_relationship",
    "affected_ids": ["..."],
    "reasoning": "why these elements have this problem"
  }}
]
```"#
    )
}

/// One LLM call over the serialized subgraph; malformed elements are dropped
/// with a warning rather than failing the pass.
#[instrument(skip_all, fields(entities = snapshot.entities.len(), relationships = snapshot.relationships.len()))]
pub async fn detect_issues(
    llm: &dyn LanguageModel,
    snapshot: &GraphSnapshot,
) -> Result<Vec<Issue>, AppError> {
    let snapshot_json = snapshot.to_json();
    let prompt = detection_prompt(&snapshot_json);
    let response = llm.generate(&prompt, DETECTION_MAX_TOKENS).await?;
    let value = parse_llm_json(llm, &response, JsonShape::Array).await?;

    let Some(items) = value.as_array() else {
        return Ok(Vec::new());
    };

    let mut issues = Vec::new();
    for item in items {
        let Some(issue_type) = item
            .get("issue_type")
            .and_then(Value::as_str)
            .and_then(IssueType::parse)
        else {
            warn!(element = %item, "detection element with unknown issue type dropped");
            continue;
        };

        let affected_ids: Vec<String> = item
            .get("affected_ids")
            .and_then(Value::as_array)
            .map(|ids| {
                ids.iter()
                    .filter_map(|id| id.as_str().map(str::to_owned))
                    .collect()
            })
            .unwrap_or_default();
        if affected_ids.is_empty() {
            warn!("detection element without affected ids dropped");
            continue;
        }

        let reasoning = item
            .get("reasoning")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();

        issues.push(Issue::new(
            issue_type,
            affected_ids,
            reasoning,
            snapshot_json.clone(),
        ));
    }

    info!(detected = issues.len(), "issue detection finished");
    Ok(issues)
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::utils::llm::ScriptedModel;

    #[tokio::test]
    async fn detection_projects_known_types_and_drops_the_rest() {
        let llm = ScriptedModel::new().fallback(
            r#"```json
[
  {"issue_type": "redundancy_entity", "affected_ids": ["e1", "e2"], "reasoning": "same company"},
  {"issue_type": "alien_issue", "affected_ids": ["e3"], "reasoning": "??"},
  {"issue_type": "entity_quality_issue", "affected_ids": [], "reasoning": "no ids"}
]
```"#,
        );

        let issues = detect_issues(&llm, &GraphSnapshot::default())
            .await
            .expect("detection");
        assert_eq!(issues.len(), 1);
        assert_eq!(issues[0].issue_type, IssueType::RedundancyEntity);
        assert_eq!(issues[0].affected_ids, vec!["e1", "e2"]);
    }
}
