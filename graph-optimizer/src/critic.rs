use std::{path::Path, sync::Arc};

use common::{
    error::AppError,
    utils::{
        json::{parse_llm_json, JsonShape},
        llm::LanguageModel,
    },
};
use tracing::{info, instrument, warn};

use crate::issue::{CriticEvaluation, Issue, IssueState, IssueType, CRITIC_VOTE_WEIGHT};

const CRITIC_MAX_TOKENS: u32 = 4_096;

pub(crate) const REDUNDANCY_ENTITY_GUIDELINE: &str = "\
**Redundant Entities** (redundancy_entity):
- Definition: Two or more distinct entity entries represent the exact same real-world entity or concept (identical in type and instance).
- Identification: Look for highly similar names, aliases, and descriptions that clearly refer to the same thing without meaningful distinction.
- Exclusion: Do not flag entities as redundant if they represent different levels in a clear hierarchy (e.g., \"Artificial Intelligence\" vs. \"Machine Learning\") or distinct concepts that happen to be related (e.g., \"Company A\" vs. \"CEO of Company A\").";

pub(crate) const REDUNDANCY_RELATIONSHIP_GUIDELINE: &str = "\
**Redundant Relationships** (redundancy_relationship):
- Definition: Two or more distinct relationship entries connect the same pair of source and target entities (or entities identified as redundant duplicates) with the same semantic meaning.
- Identification: Look for identical or near-identical source/target entity pairs and relationship descriptions that convey the exact same connection. Minor variations in phrasing that don't change the core meaning should still be considered redundant.
- Example: Redundant: User → Purchased → Product and Customer → Ordered → Product. Non-redundant: User → Purchased in 2023 → Product and Customer → Purchased 2024 → Product.";

pub(crate) const ENTITY_QUALITY_GUIDELINE: &str = "\
**Entity Quality Issues** (entity_quality_issue):
- Definition: Fundamental flaws within a single entity's definition, description, or attributes that significantly hinder its clarity, accuracy, or usability. This is about core problems, not merely lacking detail.
- Subtypes: Inconsistent Claims (mutually contradictory attributes); Meaningless or Fundamentally Vague Description (e.g., \"An item\", \"Data entry\", \"Used for system processes\" without specifics); Ambiguous Definition (could plausibly refer to multiple distinct real-world concepts).";

pub(crate) const RELATIONSHIP_QUALITY_GUIDELINE: &str = "\
**Relationship Quality Issues** (relationship_quality_issue):
- Definition: Fundamental flaws within a single relationship's definition or description that obscure its purpose, meaning, or the nature of the connection between the source and target entities.
- Subtypes: Contradictory Definitions; Fundamentally Unclear or Ambiguous Meaning (e.g., `System A -- affects --> System B` without any context of how).
- Exclusion (important): do NOT flag a relationship solely because its description could be more detailed; the existing definition must be fundamentally flawed.";

pub(crate) fn guideline_for(issue_type: IssueType) -> &'static str {
    match issue_type {
        IssueType::RedundancyEntity => REDUNDANCY_ENTITY_GUIDELINE,
        IssueType::RedundancyRelationship => REDUNDANCY_RELATIONSHIP_GUIDELINE,
        IssueType::EntityQualityIssue => ENTITY_QUALITY_GUIDELINE,
        IssueType::RelationshipQualityIssue => RELATIONSHIP_QUALITY_GUIDELINE,
    }
}

fn critic_prompt(issue: &Issue) -> String {
    let critic_object = if issue.issue_type.targets_entities() {
        format!("affected entities: {:?}", issue.affected_ids)
    } else {
        format!("affected relationships: {:?}", issue.affected_ids)
    };

    format!(
        r#"You are a knowledge graph quality expert. Your task is to determine if a reported issue actually exists in the given graph.

## Issue Identification Guidelines

{guideline}

# Your Task

## Graph Data:
{graph}

## Reported Issue:
- **Type**: {issue_type}
- **{critic_object}**
- **Reasoning**: {reasoning}

## Evaluation Rules:

- **is_valid: true** = the specified elements DO have the {issue_type} problem
- **is_valid: false** = the specified elements do NOT have the {issue_type} problem

The reasoning provided may explain why something is NOT a problem. If the reasoning correctly explains that no problem exists, then is_valid should be false.

Base your judgment solely on the graph data and the issue type definition above. Response format (surrounded by ```json and ```):
```json
{{
"is_valid": true,
"critique": "Your analysis explaining whether the claimed problem actually exists in the graph, with specific references to graph elements."
}}
```"#,
        guideline = guideline_for(issue.issue_type),
        graph = issue.source_graph,
        issue_type = issue.issue_type.as_str(),
        reasoning = issue.reasoning,
    )
}

/// Run every configured critic over every issue that critic has not yet
/// produced a parsable evaluation for. Valid votes add to the validation
/// score. The pass repeats (up to `max_retries`) until coverage is complete;
/// state is checkpointed after each critic's sweep.
#[instrument(skip_all, fields(critics = critics.len(), issues = state.issues.len()))]
pub async fn evaluate_issues(
    critics: &[(String, Arc<dyn LanguageModel>)],
    state: &mut IssueState,
    max_retries: u32,
    state_path: &Path,
) -> Result<(), AppError> {
    for pass in 0..max_retries.max(1) {
        let mut incomplete = false;

        for (critic_name, critic) in critics {
            let mut evaluated = 0_usize;

            for issue in &mut state.issues {
                if issue.critic_evaluations.contains_key(critic_name) {
                    continue;
                }

                let prompt = critic_prompt(issue);
                let response = match critic.generate(&prompt, CRITIC_MAX_TOKENS).await {
                    Ok(response) => response,
                    Err(err) => {
                        warn!(critic = %critic_name, error = %err, "critic call failed");
                        incomplete = true;
                        continue;
                    }
                };

                let evaluation = match parse_llm_json(critic.as_ref(), &response, JsonShape::Object)
                    .await
                {
                    Ok(value) => CriticEvaluation {
                        is_valid: value
                            .get("is_valid")
                            .and_then(serde_json::Value::as_bool)
                            .unwrap_or(false),
                        critique: value
                            .get("critique")
                            .and_then(serde_json::Value::as_str)
                            .unwrap_or_default()
                            .to_string(),
                    },
                    Err(err) => {
                        warn!(critic = %critic_name, error = %err, "unparsable critique");
                        incomplete = true;
                        continue;
                    }
                };

                if evaluation.is_valid {
                    issue.validation_score += CRITIC_VOTE_WEIGHT;
                }
                issue
                    .critic_evaluations
                    .insert(critic_name.clone(), evaluation);
                evaluated += 1;
            }

            if evaluated > 0 {
                state.save(state_path)?;
                info!(critic = %critic_name, evaluated, "critic sweep checkpointed");
            }
        }

        if !incomplete {
            return Ok(());
        }
        warn!(pass, "critic coverage incomplete, retrying");
    }

    Err(AppError::Optimizer(
        "critic evaluation did not reach full coverage".into(),
    ))
}
