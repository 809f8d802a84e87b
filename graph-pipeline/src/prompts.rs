//! Prompt templates for the extraction pipeline. Every template asks for JSON
//! surrounded by a ```json fence, which is what the parsing layer expects.

use common::storage::types::{analysis_blueprint::AnalysisBlueprint, source_data::SourceDocument};
use serde_json::Value;

/// Quality bar embedded into every triplet-extraction prompt.
pub const QUALITY_STANDARDS: &str = "\
A high-quality knowledge graph is:
- Non-redundant: one entity per real-world concept, one relationship per distinct connection.
- Coherent: entities and relationships form a logical, consistent structure for the domain.
- Precise: names and descriptions are unambiguous; vague placeholders are worthless.
- Factually accurate: every statement is supported by the document text.
- Temporally grounded: each fact carries when it occurred or was true.";

pub fn document_content(document: &SourceDocument) -> String {
    format!(
        "Document: {}\n\n{}\n\nDocument attributes: {}",
        document.name, document.content, document.attributes
    )
}

pub fn cognitive_map_prompt(topic_name: &str, document: &SourceDocument) -> String {
    format!(
        r#"You are building a cognitive map of one document for the topic "{topic_name}".

Read the document and produce a compact JSON object capturing what this document contributes to the topic:

```json
{{
  "summary": "3-5 sentence summary focused on {topic_name}",
  "key_entities": [{{"name": "...", "role": "why it matters here"}}],
  "theme_keywords": ["..."],
  "important_timeline": [{{"time": "ISO-8601 or period", "event": "..."}}]
}}
```

<document>
{content}
</document>

Return only the JSON object surrounded by ```json and ```."#,
        content = document_content(document),
    )
}

pub fn blueprint_prompt(topic_name: &str, cognitive_maps: &Value) -> String {
    let map_count = cognitive_maps.as_array().map_or(0, Vec::len);
    format!(
        r#"You are a master strategist analyzing cognitive maps from {map_count} documents for "{topic_name}".

Your task is to generate a GLOBAL BLUEPRINT that provides cross-document coordination and insights no single document can provide.

<cognitive_maps_collection>
{maps}
</cognitive_maps_collection>

Generate a comprehensive global blueprint in JSON format (surround by ```json and ```):

```json
{{
  "canonical_entities": {{
    "normalized_name": {{
      "aliases": ["variation1", "variation2"],
      "entity_type": "Person|Organization|System|Concept|Event",
      "primary_source": "most_authoritative_document_name",
      "description": "unified description combining insights from all documents"
    }}
  }},
  "key_patterns": {{
    "relationship_patterns": ["rich natural-language descriptions of cross-document relationship patterns"],
    "temporal_patterns": ["natural-language descriptions of time-based patterns"],
    "narrative_themes": ["cross-document narrative themes"]
  }},
  "global_timeline": [
    {{"period": "2024-Q1", "key_events": ["..."], "cross_document_connections": ["..."]}}
  ],
  "processing_instructions": {{
    "conflict_handling": "how to resolve contradictions between documents",
    "quality_focus": "what to prioritize for high-quality extraction",
    "extraction_emphasis": "areas deserving special attention"
  }}
}}
```

Requirements:
1. Identify entities mentioned across documents under different names and normalize them, tracking all variations as aliases.
2. Describe relationship patterns as meaningful natural language, not atomic A-relation-B pairs.
3. Integrate timeline events from all documents into one chronological framework.
4. Focus on insights that are impossible to derive from any single document alone.

Generate the global blueprint for "{topic_name}"."#,
        maps = cognitive_maps,
    )
}

pub fn triplet_extraction_prompt(
    topic_name: &str,
    blueprint: &AnalysisBlueprint,
    cognitive_map: Option<&Value>,
    document: &SourceDocument,
) -> String {
    let cognitive_context = cognitive_map.map_or_else(String::new, |map| {
        format!("**Document Cognitive Map:**\n{map}\n")
    });

    format!(
        r#"You are an expert knowledge extractor working on {topic_name} documents.

**Global Blueprint (Cross-Document Context):**
{items}

**Processing Instructions:**
{instructions}

{cognitive_context}
**Quality Standards:**
{QUALITY_STANDARDS}

Extraction guidelines:
1. Use canonical entity names from the global blueprint when available.
2. Align extracted facts with global patterns and the timeline.
3. Focus on relationships that reveal WHY, HOW and WHEN, not bare co-occurrence.
4. For every triplet you MUST identify when the fact occurred or was true: explicit dates where stated, otherwise contextual inference (document date, sequence markers, project phases). Express points as `fact_time` and spans as `fact_time_range` with ISO-8601-style values.

<document_content>
{content}
</document_content>

Return a JSON array of enhanced narrative triplets (surround by ```json and ```):

```json
[
  {{
    "subject": {{"name": "...", "description": "detailed contextual description", "attributes": {{"entity_type": "..."}}}},
    "predicate": "rich narrative relationship with WHO, WHAT, WHEN, WHERE, WHY context",
    "object": {{"name": "...", "description": "detailed contextual description", "attributes": {{"entity_type": "..."}}}},
    "relationship_attributes": {{
      "fact_time": "when this fact occurred or was true",
      "temporal_context": "original time expression from the text, if any",
      "sentiment": "positive|negative|neutral",
      "confidence": "high|medium|low"
    }}
  }}
]
```

Only extract triplets that contain valuable knowledge. Now generate the narrative triplets for {topic_name} in valid JSON format."#,
        items = blueprint.processing_items,
        instructions = blueprint.processing_instructions,
        content = document_content(document),
    )
}

pub fn reasoning_enhancement_prompt(
    topic_name: &str,
    subgraph_context: &str,
    document: &SourceDocument,
) -> String {
    format!(
        r#"You are reasoning over an existing knowledge subgraph for "{topic_name}" to surface what is implied but not yet recorded.

**Existing subgraph extracted from this document:**
{subgraph_context}

<document_content>
{content}
</document_content>

Propose enhanced_relationships: inferred connections between entities, and description upgrades where the current description is weaker than what the document supports. Set `requires_description_update` to true on a subject or object ONLY when its stored description should be replaced by the one you provide.

Return a JSON object (surround by ```json and ```):

```json
{{
  "enhanced_relationships": [
    {{
      "subject": {{"name": "...", "description": "...", "requires_description_update": false, "attributes": {{}}}},
      "predicate": "inferred or deepened relationship with justification woven in",
      "object": {{"name": "...", "description": "...", "requires_description_update": false, "attributes": {{}}}},
      "relationship_attributes": {{
        "fact_time": "...",
        "sentiment": "positive|negative|neutral",
        "confidence": "high|medium|low",
        "justification": "evidence from the document or subgraph"
      }}
    }}
  ]
}}
```

Every proposal must be supported by the document or the subgraph; do not invent facts."#,
        content = document_content(document),
    )
}

pub fn situate_context_prompt(document_content: &str, block_content: &str) -> String {
    format!(
        r#"<document>
{document_content}
</document>

Here is the chunk we want to situate within the whole document:

<chunk>
{block_content}
</chunk>

Please give a short succinct context to situate this chunk within the overall document for the purposes of improving search retrieval of the chunk. Answer only with the succinct context and nothing else."#
    )
}
