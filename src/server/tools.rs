//! The fixed tool catalogue: one definition per tool, each carrying the
//! JSON input/output schemas enforced by the dispatcher.

use serde::Serialize;
use serde_json::{json, Value};

/// A tool definition exposed via `tools/list`.
#[derive(Debug, Clone, Serialize)]
pub struct ToolDef {
    pub name: String,
    pub description: String,
    #[serde(rename = "inputSchema")]
    pub input_schema: Value,
    #[serde(skip_serializing)]
    pub output_schema: Value,
}

impl ToolDef {
    fn new(name: &str, description: &str, input_schema: Value, output_schema: Value) -> Self {
        Self {
            name: format!("membria.{}", name),
            description: description.to_string(),
            input_schema,
            output_schema,
        }
    }
}

fn out(required: &[&str]) -> Value {
    json!({"type": "object", "required": required})
}

/// The complete catalogue. Memory tools are appended only when the feature
/// flag is set in the configuration.
pub fn tool_definitions(memory_tools_enabled: bool) -> Vec<ToolDef> {
    let mut tools = vec![
        ToolDef::new(
            "capture_decision",
            "Record a decision with alternatives and confidence to the reasoning graph",
            json!({
                "type": "object",
                "additionalProperties": false,
                "required": ["statement", "alternatives"],
                "properties": {
                    "statement": {"type": "string", "minLength": 1, "maxLength": 400},
                    "alternatives": {"type": "array", "minItems": 1, "items": {"type": "string", "maxLength": 200}},
                    "confidence": {"type": "number", "minimum": 0, "maximum": 1},
                    "context": {
                        "type": "object",
                        "additionalProperties": false,
                        "properties": {"module": {"type": "string", "maxLength": 80}}
                    }
                }
            }),
            out(&["decision_id", "statement", "confidence", "module", "status"]),
        ),
        ToolDef::new(
            "record_outcome",
            "Finalize the outcome of a decision and update team calibration",
            json!({
                "type": "object",
                "additionalProperties": false,
                "required": ["decision_id", "final_status"],
                "properties": {
                    "decision_id": {"type": "string", "minLength": 1},
                    "final_status": {"type": "string", "enum": ["success", "failure", "partial"]},
                    "final_score": {"type": "number", "minimum": 0, "maximum": 1},
                    "decision_domain": {"type": "string", "maxLength": 80}
                }
            }),
            out(&["outcome_id", "decision_id", "final_status", "final_score", "calibration_impact"]),
        ),
        ToolDef::new(
            "get_calibration",
            "Get confidence-calibration guidance for a domain",
            json!({
                "type": "object",
                "additionalProperties": false,
                "properties": {
                    "domain": {"type": "string", "maxLength": 80},
                    "confidence": {"type": "number", "minimum": 0, "maximum": 1}
                }
            }),
            out(&["domain", "mean_success_rate", "confidence_gap", "recommendation"]),
        ),
        ToolDef::new(
            "get_decision_context",
            "Assemble compact graph context for a decision about to be made",
            json!({
                "type": "object",
                "additionalProperties": false,
                "required": ["statement"],
                "properties": {
                    "statement": {"type": "string", "minLength": 1, "maxLength": 400},
                    "module": {"type": "string", "maxLength": 80},
                    "confidence": {"type": "number", "minimum": 0, "maximum": 1},
                    "max_tokens": {"type": "integer", "minimum": 256, "maximum": 8000},
                    "session_id": {"type": "string", "maxLength": 120},
                    "role": {"type": "string", "maxLength": 80}
                }
            }),
            out(&["compact_context", "total_tokens", "truncated", "sections_included"]),
        ),
        ToolDef::new(
            "get_plan_context",
            "Build pre-plan context for a domain: failures, patterns, calibration",
            json!({
                "type": "object",
                "additionalProperties": false,
                "required": ["domain"],
                "properties": {
                    "domain": {"type": "string", "minLength": 1, "maxLength": 80},
                    "scope": {"type": "string", "maxLength": 400},
                    "max_tokens": {"type": "integer", "minimum": 256, "maximum": 8000}
                }
            }),
            out(&["domain", "compact_context", "total_tokens"]),
        ),
        ToolDef::new(
            "validate_plan",
            "Scan plan steps against negative knowledge, antipatterns, and calibration",
            json!({
                "type": "object",
                "additionalProperties": false,
                "required": ["steps"],
                "properties": {
                    "steps": {"type": "array", "minItems": 1, "maxItems": 100, "items": {"type": "string", "maxLength": 400}},
                    "domain": {"type": "string", "maxLength": 80}
                }
            }),
            out(&["total_steps", "warnings_count", "high_severity", "medium_severity", "low_severity", "warnings", "can_proceed", "timestamp"]),
        ),
        ToolDef::new(
            "record_plan",
            "Capture an accepted plan as an engram plus per-step decisions",
            json!({
                "type": "object",
                "additionalProperties": false,
                "required": ["plan_steps", "domain"],
                "properties": {
                    "plan_steps": {"type": "array", "minItems": 1, "maxItems": 100, "items": {"type": "string", "maxLength": 400}},
                    "domain": {"type": "string", "minLength": 1, "maxLength": 80},
                    "plan_confidence": {"type": "number", "minimum": 0, "maximum": 1},
                    "duration_estimate": {"type": "string", "maxLength": 80},
                    "warnings_shown": {"type": "integer", "minimum": 0},
                    "warnings_heeded": {"type": "integer", "minimum": 0}
                }
            }),
            out(&["engram_id", "domain", "plan_steps", "decisions_recorded", "status"]),
        ),
        ToolDef::new(
            "session_context_store",
            "Store short-lived working memory for a session",
            json!({
                "type": "object",
                "additionalProperties": false,
                "required": ["session_id", "task"],
                "properties": {
                    "session_id": {"type": "string", "minLength": 1, "maxLength": 120},
                    "task": {"type": "string", "minLength": 1, "maxLength": 400},
                    "focus": {"type": "string", "maxLength": 400},
                    "current_plan": {"type": "string", "maxLength": 2000},
                    "constraints": {"type": "array", "items": {"type": "string", "maxLength": 200}},
                    "doc_shot_id": {"type": "string", "maxLength": 80},
                    "ttl_days": {"type": "integer", "minimum": 1, "maximum": 3650}
                }
            }),
            out(&["status", "session_id", "expires_at"]),
        ),
        ToolDef::new(
            "session_context_retrieve",
            "Retrieve the stored context for a session",
            json!({
                "type": "object",
                "additionalProperties": false,
                "required": ["session_id"],
                "properties": {"session_id": {"type": "string", "minLength": 1, "maxLength": 120}}
            }),
            out(&["status"]),
        ),
        ToolDef::new(
            "session_context_delete",
            "Deactivate the stored context for a session",
            json!({
                "type": "object",
                "additionalProperties": false,
                "required": ["session_id"],
                "properties": {"session_id": {"type": "string", "minLength": 1, "maxLength": 120}}
            }),
            out(&["status", "session_id"]),
        ),
        ToolDef::new(
            "docs_add",
            "Store a text document in the graph",
            json!({
                "type": "object",
                "additionalProperties": false,
                "required": ["file_path", "content"],
                "properties": {
                    "file_path": {"type": "string", "minLength": 1, "maxLength": 240},
                    "content": {"type": "string", "minLength": 1},
                    "doc_type": {"type": "string", "maxLength": 40}
                }
            }),
            out(&["status", "doc_id"]),
        ),
        ToolDef::new(
            "docs_get",
            "Fetch one stored document by id",
            json!({
                "type": "object",
                "additionalProperties": false,
                "required": ["doc_id"],
                "properties": {"doc_id": {"type": "string", "minLength": 1, "maxLength": 80}}
            }),
            out(&["status"]),
        ),
        ToolDef::new(
            "docs_list",
            "List stored documents",
            json!({
                "type": "object",
                "additionalProperties": false,
                "properties": {
                    "doc_types": {"type": "array", "items": {"type": "string", "maxLength": 40}},
                    "limit": {"type": "integer", "minimum": 1, "maximum": 200}
                }
            }),
            out(&["documents"]),
        ),
        ToolDef::new(
            "fetch_docs",
            "Fetch documents and compute a content-addressed DocShot id",
            json!({
                "type": "object",
                "additionalProperties": false,
                "properties": {
                    "doc_types": {"type": "array", "items": {"type": "string", "maxLength": 40}},
                    "limit": {"type": "integer", "minimum": 1, "maximum": 200}
                }
            }),
            out(&["doc_shot_id", "documents"]),
        ),
        ToolDef::new(
            "docshot_link",
            "Link a decision to a snapshot of documents",
            json!({
                "type": "object",
                "additionalProperties": false,
                "required": ["decision_id", "doc_ids"],
                "properties": {
                    "decision_id": {"type": "string", "minLength": 1, "maxLength": 80},
                    "doc_ids": {"type": "array", "minItems": 1, "maxItems": 100, "items": {"type": "string", "maxLength": 80}}
                }
            }),
            out(&["status", "doc_shot_id", "doc_count"]),
        ),
        ToolDef::new(
            "md_xtract",
            "Extract section headings and code fences from markdown",
            json!({
                "type": "object",
                "additionalProperties": false,
                "required": ["content"],
                "properties": {
                    "content": {"type": "string", "minLength": 1},
                    "max_sections": {"type": "integer", "minimum": 1, "maximum": 200}
                }
            }),
            out(&["sections", "code_blocks"]),
        ),
        ToolDef::new(
            "squad_create",
            "Create a squad with a composition strategy",
            json!({
                "type": "object",
                "additionalProperties": false,
                "required": ["name", "project_id", "strategy"],
                "properties": {
                    "name": {"type": "string", "minLength": 1, "maxLength": 80},
                    "project_id": {"type": "string", "minLength": 1, "maxLength": 80},
                    "strategy": {"type": "string", "enum": ["lead_review", "parallel_arbiter", "red_team", "single"]}
                }
            }),
            out(&["status", "squad_id"]),
        ),
        ToolDef::new(
            "assignment_add",
            "Bind a role and profile into a squad",
            json!({
                "type": "object",
                "additionalProperties": false,
                "required": ["squad_id", "role", "profile"],
                "properties": {
                    "squad_id": {"type": "string", "minLength": 1, "maxLength": 80},
                    "role": {"type": "string", "minLength": 1, "maxLength": 80},
                    "profile": {"type": "string", "minLength": 1, "maxLength": 80},
                    "position": {"type": "integer", "minimum": 0, "maximum": 100}
                }
            }),
            out(&["status", "assignment_id"]),
        ),
        ToolDef::new(
            "squad_list",
            "List squads",
            json!({
                "type": "object",
                "additionalProperties": false,
                "properties": {
                    "project_id": {"type": "string", "maxLength": 80},
                    "limit": {"type": "integer", "minimum": 1, "maximum": 200}
                }
            }),
            out(&["squads"]),
        ),
        ToolDef::new(
            "squad_assignments",
            "List the ordered assignments of a squad",
            json!({
                "type": "object",
                "additionalProperties": false,
                "required": ["squad_id"],
                "properties": {"squad_id": {"type": "string", "minLength": 1, "maxLength": 80}}
            }),
            out(&["assignments"]),
        ),
        ToolDef::new(
            "role_upsert",
            "Create or update an agent role",
            json!({
                "type": "object",
                "additionalProperties": false,
                "required": ["name"],
                "properties": {
                    "name": {"type": "string", "minLength": 1, "maxLength": 80},
                    "description": {"type": "string", "maxLength": 400},
                    "prompt_path": {"type": "string", "maxLength": 240}
                }
            }),
            out(&["status", "role_id"]),
        ),
        ToolDef::new(
            "role_get",
            "Fetch a role and its linked artifacts",
            json!({
                "type": "object",
                "additionalProperties": false,
                "required": ["name"],
                "properties": {"name": {"type": "string", "minLength": 1, "maxLength": 80}}
            }),
            out(&["status"]),
        ),
        ToolDef::new(
            "role_link",
            "Link a DocShot, Skill, or NK entry to a role",
            json!({
                "type": "object",
                "additionalProperties": false,
                "required": ["name", "kind", "target_id"],
                "properties": {
                    "name": {"type": "string", "minLength": 1, "maxLength": 80},
                    "kind": {"type": "string", "enum": ["doc_shot", "skill", "negative_knowledge"]},
                    "target_id": {"type": "string", "minLength": 1, "maxLength": 80}
                }
            }),
            out(&["status"]),
        ),
        ToolDef::new(
            "role_unlink",
            "Remove a role link",
            json!({
                "type": "object",
                "additionalProperties": false,
                "required": ["name", "kind", "target_id"],
                "properties": {
                    "name": {"type": "string", "minLength": 1, "maxLength": 80},
                    "kind": {"type": "string", "enum": ["doc_shot", "skill", "negative_knowledge"]},
                    "target_id": {"type": "string", "minLength": 1, "maxLength": 80}
                }
            }),
            out(&["status"]),
        ),
        ToolDef::new(
            "outcome_get",
            "Fetch one outcome by id",
            json!({
                "type": "object",
                "additionalProperties": false,
                "required": ["outcome_id"],
                "properties": {"outcome_id": {"type": "string", "minLength": 1, "maxLength": 120}}
            }),
            out(&["status"]),
        ),
        ToolDef::new(
            "outcome_list",
            "List outcomes, optionally filtered by status",
            json!({
                "type": "object",
                "additionalProperties": false,
                "properties": {
                    "status": {"type": "string", "enum": ["pending", "submitted", "merged", "completed"]},
                    "limit": {"type": "integer", "minimum": 1, "maximum": 200}
                }
            }),
            out(&["outcomes"]),
        ),
        ToolDef::new(
            "skills_list",
            "List generated skills, optionally for one domain",
            json!({
                "type": "object",
                "additionalProperties": false,
                "properties": {
                    "domain": {"type": "string", "maxLength": 80},
                    "limit": {"type": "integer", "minimum": 1, "maximum": 200}
                }
            }),
            out(&["skills"]),
        ),
        ToolDef::new(
            "skills_get",
            "Fetch one skill by id",
            json!({
                "type": "object",
                "additionalProperties": false,
                "required": ["skill_id"],
                "properties": {"skill_id": {"type": "string", "minLength": 1, "maxLength": 120}}
            }),
            out(&["status"]),
        ),
        ToolDef::new(
            "antipatterns_list",
            "List antipatterns ordered by removal rate",
            json!({
                "type": "object",
                "additionalProperties": false,
                "properties": {
                    "category": {"type": "string", "maxLength": 80},
                    "limit": {"type": "integer", "minimum": 1, "maximum": 200}
                }
            }),
            out(&["antipatterns"]),
        ),
        ToolDef::new(
            "antipatterns_get",
            "Fetch one antipattern by id",
            json!({
                "type": "object",
                "additionalProperties": false,
                "required": ["pattern_id"],
                "properties": {"pattern_id": {"type": "string", "minLength": 1, "maxLength": 80}}
            }),
            out(&["status"]),
        ),
        ToolDef::new(
            "health",
            "Graph and storage health snapshot",
            json!({"type": "object", "additionalProperties": false, "properties": {}}),
            out(&["status", "graph"]),
        ),
        ToolDef::new(
            "migrations_status",
            "Applied schema migrations",
            json!({"type": "object", "additionalProperties": false, "properties": {}}),
            out(&["current_version", "applied"]),
        ),
        ToolDef::new(
            "logs_tail",
            "Tail the daemon log file",
            json!({
                "type": "object",
                "additionalProperties": false,
                "properties": {"lines": {"type": "integer", "minimum": 1, "maximum": 200}}
            }),
            out(&["lines"]),
        ),
    ];

    if memory_tools_enabled {
        tools.push(ToolDef::new(
            "memory_store",
            "Store a decision or negative-knowledge memory item",
            json!({
                "type": "object",
                "additionalProperties": false,
                "required": ["memory_type", "payload"],
                "properties": {
                    "memory_type": {"type": "string", "enum": ["decision", "negative_knowledge"]},
                    "payload": {"type": "object"},
                    "ttl_days": {"type": "integer", "minimum": 1, "maximum": 3650}
                }
            }),
            out(&["status", "item_id"]),
        ));
        tools.push(ToolDef::new(
            "memory_retrieve",
            "Retrieve memory items for a domain",
            json!({
                "type": "object",
                "additionalProperties": false,
                "required": ["memory_type"],
                "properties": {
                    "memory_type": {"type": "string", "enum": ["decision", "negative_knowledge"]},
                    "domain": {"type": "string", "maxLength": 80},
                    "limit": {"type": "integer", "minimum": 1, "maximum": 200}
                }
            }),
            out(&["status", "items"]),
        ));
        tools.push(ToolDef::new(
            "memory_delete",
            "Deactivate a memory item",
            json!({
                "type": "object",
                "additionalProperties": false,
                "required": ["memory_type", "item_id"],
                "properties": {
                    "memory_type": {"type": "string", "enum": ["decision", "negative_knowledge"]},
                    "item_id": {"type": "string", "minLength": 1, "maxLength": 80},
                    "reason": {"type": "string", "maxLength": 200}
                }
            }),
            out(&["status", "item_id"]),
        ));
        tools.push(ToolDef::new(
            "memory_list",
            "List memory items for a domain",
            json!({
                "type": "object",
                "additionalProperties": false,
                "required": ["memory_type"],
                "properties": {
                    "memory_type": {"type": "string", "enum": ["decision", "negative_knowledge"]},
                    "domain": {"type": "string", "maxLength": 80},
                    "limit": {"type": "integer", "minimum": 1, "maximum": 200}
                }
            }),
            out(&["status", "items"]),
        ));
    }

    tools
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_catalogue_names_are_prefixed_and_unique() {
        let tools = tool_definitions(true);
        let mut names: Vec<&str> = tools.iter().map(|t| t.name.as_str()).collect();
        assert!(names.iter().all(|n| n.starts_with("membria.")));
        let before = names.len();
        names.sort();
        names.dedup();
        assert_eq!(names.len(), before);
    }

    #[test]
    fn test_memory_tools_feature_flagged() {
        let without = tool_definitions(false);
        assert!(!without.iter().any(|t| t.name.contains("memory_")));
        let with = tool_definitions(true);
        assert_eq!(
            with.iter().filter(|t| t.name.contains("memory_")).count(),
            4
        );
    }

    #[test]
    fn test_every_tool_has_object_schemas() {
        for tool in tool_definitions(true) {
            assert_eq!(tool.input_schema["type"], "object", "{}", tool.name);
            assert_eq!(
                tool.input_schema["additionalProperties"], false,
                "{}",
                tool.name
            );
            assert_eq!(tool.output_schema["type"], "object", "{}", tool.name);
        }
    }
}
