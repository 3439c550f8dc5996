//! Validation of planning and agent responses.
//!
//! LLM text is untrusted: it may be wrapped in a markdown fence, omit fields,
//! or carry the wrong types. Required fields are never defaulted; optional
//! ones are coerced to their documented fallback.

use std::collections::BTreeMap;

use serde_json::{Map, Value};
use thiserror::Error;

use crate::core::types::{
    AgentAction, AgentOutput, AgentReportStatus, CeoLlmOutput, LeverageItem, ProposedBroadcast,
    RepoAction,
};
use crate::tree::RiskLevel;

/// Broadcast TTL used when `expiresMins` is not a number.
pub const DEFAULT_EXPIRES_MINS: f64 = 60.0;

#[derive(Debug, Error)]
pub enum ContractError {
    #[error("response is not valid JSON: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("missing field `{field}`{}", at_index(.index))]
    MissingField { field: String, index: Option<usize> },

    #[error("field `{field}`{} must be {expected}", at_index(.index))]
    InvalidType {
        field: String,
        index: Option<usize>,
        expected: &'static str,
    },
}

impl ContractError {
    /// True for malformed JSON, false for a well-formed response that breaks the contract.
    pub fn is_parse(&self) -> bool {
        matches!(self, ContractError::Parse(_))
    }

    fn missing(field: &str, index: Option<usize>) -> Self {
        ContractError::MissingField {
            field: field.to_string(),
            index,
        }
    }

    fn invalid(field: &str, index: Option<usize>, expected: &'static str) -> Self {
        ContractError::InvalidType {
            field: field.to_string(),
            index,
            expected,
        }
    }
}

fn at_index(index: &Option<usize>) -> String {
    index.map(|i| format!(" at index {i}")).unwrap_or_default()
}

/// Return the body of the first fenced code block, or the trimmed text when
/// there is none. An unterminated fence runs to the end of the text.
pub fn strip_code_fence(raw: &str) -> &str {
    let Some(open) = raw.find("```") else {
        return raw.trim();
    };
    let after_fence = &raw[open + 3..];
    // Skip the info string (`json`, `JSON`, ...). A one-line fence puts the
    // body right after it, so stop at whitespace or the opening bracket.
    let info_len = after_fence
        .find(|c: char| c.is_whitespace() || c == '{' || c == '[')
        .unwrap_or(after_fence.len());
    let body = &after_fence[info_len..];
    match body.find("```") {
        Some(close) => body[..close].trim(),
        None => body.trim(),
    }
}

fn parse_object(raw: &str) -> Result<Map<String, Value>, ContractError> {
    match serde_json::from_str(strip_code_fence(raw))? {
        Value::Object(map) => Ok(map),
        _ => Err(ContractError::invalid("(root)", None, "a JSON object")),
    }
}

fn required_str<'a>(
    obj: &'a Map<String, Value>,
    field: &str,
    key: &str,
    index: Option<usize>,
) -> Result<&'a str, ContractError> {
    match obj.get(key) {
        None | Some(Value::Null) => Err(ContractError::missing(field, index)),
        Some(Value::String(s)) => Ok(s),
        Some(_) => Err(ContractError::invalid(field, index, "a string")),
    }
}

/// Like [`required_str`], but a blank string counts as missing.
fn required_non_empty<'a>(
    obj: &'a Map<String, Value>,
    field: &str,
    key: &str,
    index: Option<usize>,
) -> Result<&'a str, ContractError> {
    let value = required_str(obj, field, key, index)?;
    if value.trim().is_empty() {
        return Err(ContractError::missing(field, index));
    }
    Ok(value)
}

fn required_array<'a>(
    obj: &'a Map<String, Value>,
    field: &str,
) -> Result<&'a [Value], ContractError> {
    match obj.get(field) {
        None | Some(Value::Null) => Err(ContractError::missing(field, None)),
        Some(Value::Array(items)) => Ok(items),
        Some(_) => Err(ContractError::invalid(field, None, "an array")),
    }
}

fn item_object<'a>(
    value: &'a Value,
    field: &str,
    index: usize,
) -> Result<&'a Map<String, Value>, ContractError> {
    value
        .as_object()
        .ok_or_else(|| ContractError::invalid(field, Some(index), "an object"))
}

fn optional_string(obj: &Map<String, Value>, key: &str) -> String {
    obj.get(key)
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string()
}

/// Non-arrays become empty; non-string elements are skipped.
fn string_array(value: Option<&Value>) -> Vec<String> {
    value
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

/// Parse and validate the planning response.
pub fn parse_ceo_output(raw: &str) -> Result<CeoLlmOutput, ContractError> {
    let obj = parse_object(raw)?;
    let cycle_summary = required_str(&obj, "cycleSummary", "cycleSummary", None)?.to_string();

    let top_leverage = required_array(&obj, "topLeverage")?
        .iter()
        .enumerate()
        .map(|(i, value)| -> Result<LeverageItem, ContractError> {
            let item = item_object(value, "topLeverage", i)?;
            Ok(LeverageItem {
                title: required_non_empty(item, "topLeverage.title", "title", Some(i))?
                    .trim()
                    .to_string(),
                assignee: required_non_empty(item, "topLeverage.assignee", "assignee", Some(i))?
                    .trim()
                    .to_string(),
                why: optional_string(item, "why"),
                risk: RiskLevel::coerce(item.get("risk").and_then(Value::as_str).unwrap_or("")),
                evidence_ids: string_array(item.get("evidenceIds")),
                acceptance: string_array(item.get("acceptance")),
            })
        })
        .collect::<Result<Vec<_>, ContractError>>()?;

    let broadcasts = required_array(&obj, "broadcasts")?
        .iter()
        .enumerate()
        .map(|(i, value)| -> Result<ProposedBroadcast, ContractError> {
            let item = item_object(value, "broadcasts", i)?;
            Ok(ProposedBroadcast {
                to: required_non_empty(item, "broadcasts.to", "to", Some(i))?
                    .trim()
                    .to_string(),
                // A blank message is left for the broadcast norms to drop.
                message: required_str(item, "broadcasts.message", "message", Some(i))?
                    .to_string(),
                expires_mins: item
                    .get("expiresMins")
                    .and_then(Value::as_f64)
                    .unwrap_or(DEFAULT_EXPIRES_MINS),
            })
        })
        .collect::<Result<Vec<_>, ContractError>>()?;

    Ok(CeoLlmOutput {
        cycle_summary,
        top_leverage,
        broadcasts,
        needs_external_data: obj
            .get("needsExternalData")
            .and_then(Value::as_bool)
            .unwrap_or(false),
    })
}

/// Parse and validate one agent turn.
pub fn parse_agent_output(raw: &str) -> Result<AgentOutput, ContractError> {
    let obj = parse_object(raw)?;

    let actions = required_array(&obj, "actions")?
        .iter()
        .enumerate()
        .map(|(i, value)| -> Result<AgentAction, ContractError> {
            let item = item_object(value, "actions", i)?;
            Ok(AgentAction {
                kind: required_non_empty(item, "actions.type", "type", Some(i))?
                    .trim()
                    .to_string(),
                title: required_non_empty(item, "actions.title", "title", Some(i))?.to_string(),
                detail: optional_string(item, "detail"),
                files: item
                    .get("files")
                    .filter(|files| files.is_array())
                    .map(|files| string_array(Some(files))),
                code_diff: item
                    .get("codeDiff")
                    .and_then(Value::as_str)
                    .map(str::to_string),
            })
        })
        .collect::<Result<Vec<_>, ContractError>>()?;

    let status = AgentReportStatus::coerce(required_str(&obj, "status", "status", None)?);
    let output = required_str(&obj, "output", "output", None)?.to_string();

    Ok(AgentOutput {
        actions,
        status,
        output,
        improvements: string_array(obj.get("improvements")),
        repo_actions: parse_repo_actions(&obj)?,
    })
}

fn parse_repo_actions(obj: &Map<String, Value>) -> Result<Vec<RepoAction>, ContractError> {
    let (field, value) = match (obj.get("repoActions"), obj.get("githubActions")) {
        (Some(value), _) if !value.is_null() => ("repoActions", value),
        (_, Some(value)) if !value.is_null() => ("githubActions", value),
        _ => return Ok(Vec::new()),
    };
    let items = value
        .as_array()
        .ok_or_else(|| ContractError::invalid(field, None, "an array"))?;
    let type_field = format!("{field}.type");

    items
        .iter()
        .enumerate()
        .map(|(i, value)| -> Result<RepoAction, ContractError> {
            let item = item_object(value, field, i)?;
            let kind = required_non_empty(item, &type_field, "type", Some(i))?;
            let params = item
                .get("params")
                .and_then(Value::as_object)
                .map(|params| {
                    params
                        .iter()
                        .filter_map(|(key, value)| {
                            let text = match value {
                                Value::String(s) => s.clone(),
                                Value::Number(_) | Value::Bool(_) => value.to_string(),
                                _ => return None,
                            };
                            Some((key.clone(), text))
                        })
                        .collect::<BTreeMap<_, _>>()
                })
                .unwrap_or_default();
            Ok(RepoAction {
                kind: kind.trim().to_string(),
                params,
            })
        })
        .collect()
}
