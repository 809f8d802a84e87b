mod entity_merge;
mod entity_quality;
mod relationship_merge;
mod relationship_quality;

use std::collections::HashMap;

use common::{
    error::AppError,
    storage::{
        db::SurrealDbClient,
        types::{graph_entity::GraphEntity, graph_relationship::GraphRelationship},
    },
    utils::{embedding::EmbeddingProvider, llm::LanguageModel},
};
use serde_json::{Map, Value};

use crate::{issue::Issue, retrieval::SourceText};

/// Roughly 30k tokens of relationship context and 70k of source context, in
/// the 4-chars-per-token budget used throughout.
pub(crate) const RELATIONSHIP_CONTEXT_CHAR_BUDGET: usize = 120_000;
pub(crate) const SOURCE_CONTEXT_CHAR_BUDGET: usize = 280_000;

pub(crate) const RESOLVER_MAX_TOKENS: u32 = 8_192;

/// What a resolver did with an issue. `Skipped` covers rows already consumed
/// by an earlier merge and guard violations; both count as settled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    Applied,
    Skipped,
}

/// Dispatch an issue to its typed resolver.
pub async fn process_issue(
    store: &SurrealDbClient,
    llm: &dyn LanguageModel,
    embedder: &EmbeddingProvider,
    issue: &Issue,
) -> Result<Resolution, AppError> {
    use crate::issue::IssueType;

    match issue.issue_type {
        IssueType::EntityQualityIssue => entity_quality::process(store, llm, embedder, issue).await,
        IssueType::RedundancyEntity => entity_merge::process(store, llm, embedder, issue).await,
        IssueType::RelationshipQualityIssue => {
            relationship_quality::process(store, llm, embedder, issue).await
        }
        IssueType::RedundancyRelationship => {
            relationship_merge::process(store, llm, embedder, issue).await
        }
    }
}

pub(crate) fn entity_name_map(entities: &[GraphEntity]) -> HashMap<String, String> {
    entities
        .iter()
        .map(|entity| (entity.id.clone(), entity.name.clone()))
        .collect()
}

/// `src -> tgt: desc` lines, cut off at the relationship budget.
pub(crate) fn format_relationship_lines(
    relationships: &[GraphRelationship],
    names: &HashMap<String, String>,
) -> Vec<String> {
    let mut consumed = 0_usize;
    let mut lines = Vec::new();

    for relationship in relationships {
        let source = names
            .get(&relationship.source_entity_id)
            .cloned()
            .unwrap_or_else(|| relationship.source_entity_id.clone());
        let target = names
            .get(&relationship.target_entity_id)
            .cloned()
            .unwrap_or_else(|| relationship.target_entity_id.clone());
        let line = format!("{source} -> {target}: {}", relationship.relationship_desc);

        consumed += line.chars().count();
        if consumed > RELATIONSHIP_CONTEXT_CHAR_BUDGET {
            break;
        }
        lines.push(line);
    }

    lines
}

/// Source texts until the overall budget is exhausted; `consumed` carries
/// what the relationship context already spent.
pub(crate) fn select_source_texts(sources: &[SourceText], mut consumed: usize) -> Vec<&SourceText> {
    let mut selected = Vec::new();
    for source in sources {
        consumed += source.content.chars().count();
        if consumed > SOURCE_CONTEXT_CHAR_BUDGET {
            break;
        }
        selected.push(source);
    }
    selected
}

pub(crate) fn render_sources(sources: &[&SourceText]) -> String {
    sources
        .iter()
        .map(|source| format!("### {}\n{}", source.name, source.content))
        .collect::<Vec<_>>()
        .join("\n\n")
}

/// The refinement payload key is `attributes`; the original models sometimes
/// answer with `meta`. Accept both.
pub(crate) fn extract_attributes(value: &Value) -> Map<String, Value> {
    value
        .get("attributes")
        .or_else(|| value.get("meta"))
        .and_then(Value::as_object)
        .cloned()
        .unwrap_or_default()
}

/// Merge refined attributes over the stored bag while keeping the stored
/// `topic_name` and `category` untouched.
pub(crate) fn merge_attributes_preserving_identity(
    existing: &Value,
    refined: &Map<String, Value>,
) -> Value {
    let mut merged = existing.as_object().cloned().unwrap_or_default();
    let topic = merged.get("topic_name").cloned();
    let category = merged.get("category").cloned();

    for (key, value) in refined {
        merged.insert(key.clone(), value.clone());
    }
    if let Some(topic) = topic {
        merged.insert("topic_name".into(), topic);
    }
    if let Some(category) = category {
        merged.insert("category".into(), category);
    }

    Value::Object(merged)
}
