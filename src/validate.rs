//! Schema enforcement and script sanitization for recovered menu items.
//!
//! The JSON coming out of the normalizer is still model output, so nothing in
//! it is trusted: the top-level shape is checked, each candidate is cleaned
//! field by field, and anything unusable is dropped.

use serde::Serialize;
use serde_json::{Map, Value};
use tracing::debug;

use crate::error::AppError;
use crate::script::ScriptRanges;

/// Top-level keys accepted as the item array, in lookup order.
const ITEM_ARRAY_KEYS: &[&str] = &["items", "menuItems"];

/// One bilingual menu entry.
///
/// Only [`validate`] constructs these; fields are read-only afterwards.
#[derive(Debug, Clone, Eq, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MenuItem {
    name: String,
    #[serde(rename = "nameZh")]
    translated_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    price: Option<String>,
    #[serde(rename = "descriptionEn", skip_serializing_if = "Option::is_none")]
    description_source: Option<String>,
    #[serde(rename = "descriptionZh", skip_serializing_if = "Option::is_none")]
    description_translated: Option<String>,
}

impl MenuItem {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn translated_name(&self) -> &str {
        &self.translated_name
    }

    pub fn price(&self) -> Option<&str> {
        self.price.as_deref()
    }
}

/// Parses candidate JSON text and returns every usable menu item.
///
/// Errors are staged: [`AppError::MalformedJson`] when the text does not
/// parse, [`AppError::Schema`] when the item array is missing, and
/// [`AppError::EmptyResult`] when no candidate survives sanitization.
pub fn validate(json_text: &str, script: &ScriptRanges) -> Result<Vec<MenuItem>, AppError> {
    let root: Value = serde_json::from_str(json_text)
        .map_err(|err| AppError::malformed_json(format!("completion JSON does not parse: {err}")))?;

    let candidates = item_array(&root)?;
    let total = candidates.len();
    let items = candidates
        .iter()
        .filter_map(Value::as_object)
        .filter_map(|candidate| sanitize_candidate(candidate, script))
        .collect::<Vec<_>>();

    debug!(
        candidates = total,
        accepted = items.len(),
        "validated menu item candidates"
    );

    if items.is_empty() {
        return Err(AppError::EmptyResult);
    }
    Ok(items)
}

fn item_array(root: &Value) -> Result<&Vec<Value>, AppError> {
    let object = root
        .as_object()
        .ok_or_else(|| AppError::schema("completion JSON is not an object"))?;
    let value = ITEM_ARRAY_KEYS
        .iter()
        .find_map(|key| object.get(*key))
        .ok_or_else(|| AppError::schema("completion JSON has no \"items\" field"))?;
    value
        .as_array()
        .ok_or_else(|| AppError::schema("completion \"items\" field is not an array"))
}

fn sanitize_candidate(candidate: &Map<String, Value>, script: &ScriptRanges) -> Option<MenuItem> {
    let name = text_field(candidate, "name")?;
    let translated_name = candidate
        .get("nameZh")
        .and_then(Value::as_str)
        .map(|raw| script.sanitize_translated(raw))
        .filter(|value| !value.is_empty())?;

    Some(MenuItem {
        name,
        translated_name,
        price: text_field(candidate, "price"),
        description_source: text_field(candidate, "descriptionEn"),
        description_translated: candidate
            .get("descriptionZh")
            .and_then(Value::as_str)
            .map(|raw| script.sanitize_translated(raw))
            .filter(|value| !value.is_empty()),
    })
}

/// Returns a trimmed, non-empty string field; other JSON types count as absent.
fn text_field(candidate: &Map<String, Value>, key: &str) -> Option<String> {
    candidate
        .get(key)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(ToOwned::to_owned)
}
