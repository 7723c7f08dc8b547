// SPDX-License-Identifier: MIT

//! Parameter resolution
//!
//! Inputs are produced from an edge's ordered `data_mapper` rules against the
//! run's value store. Outputs go the other way: a raw executor result is
//! remapped onto the service's declared output keys, then optionally
//! overridden by `result_info` rules.

use serde_json::{Map, Value};
use std::collections::BTreeMap;

use super::address::{IoType, ValueId};
use super::coercion::{coerce, ParamType};
use crate::runtime::{is_template, ParamResolutionError, Result, TemplateRenderer};
use crate::workflow::state::ValueStore;
use crate::workflow::types::{CallMethod, OutputParam, ParamMapping, ReferType, ResultMapping};

/// Resolve the input map for `target_service_key` from its mapping rules.
///
/// Later rules overwrite earlier ones for the same target key. Fails with
/// `NotPreparedPrevJob` as soon as a referenced value is absent.
pub fn resolve(
    target_service_key: &str,
    mappings: &[ParamMapping],
    store: &dyn ValueStore,
) -> std::result::Result<Map<String, Value>, ParamResolutionError> {
    let mut params = Map::new();
    for mapping in mappings {
        let value = resolve_mapping(mapping, store)?;
        params.insert(mapping.target_key.clone(), value);
    }
    log::debug!(
        "Resolved {} params for {}",
        params.len(),
        target_service_key
    );
    Ok(params)
}

/// Resolve a single mapping rule
pub fn resolve_mapping(
    mapping: &ParamMapping,
    store: &dyn ValueStore,
) -> std::result::Result<Value, ParamResolutionError> {
    let raw = match source_id(mapping)? {
        None => mapping.source.clone(),
        Some(id) => store
            .get(&id)
            .ok_or_else(|| ParamResolutionError::NotPreparedPrevJob {
                address: id.to_string(),
            })?,
    };

    coerce(&raw, &mapping.source_type, &mapping.target_type).map_err(|message| {
        ParamResolutionError::Coercion {
            key: mapping.target_key.clone(),
            target_type: mapping.target_type.to_string(),
            message,
        }
    })
}

/// Store address a mapping reads from, or `None` for literals
pub fn source_id(mapping: &ParamMapping) -> std::result::Result<Option<ValueId>, ParamResolutionError> {
    if mapping.call_method == CallMethod::Value {
        return Ok(None);
    }
    let address = mapping
        .source
        .as_str()
        .ok_or_else(|| ParamResolutionError::BadAddress(mapping.source.to_string()))?;
    let id = match mapping.refer_type {
        ReferType::Indirect => ValueId::from_output_source(address)?,
        ReferType::Direct => ValueId::parse(address)?,
    };
    Ok(Some(id))
}

/// Resolve env (`E.`) or asset (`A.`) values for a service.
///
/// An entry whose value is an `E.`/`A.` address is read from the store;
/// any resulting string that still holds template syntax is rendered with
/// `variables`.
pub fn resolve_ambient(
    io_type: IoType,
    entries: &BTreeMap<String, Value>,
    store: &dyn ValueStore,
    renderer: &dyn TemplateRenderer,
    variables: &Map<String, Value>,
) -> Result<Map<String, Value>> {
    let mut resolved = Map::new();
    for (name, value) in entries {
        let value = match value.as_str().and_then(|s| ValueId::parse(s).ok()) {
            Some(id) if matches!(id.io_type, IoType::Env | IoType::Asset) => {
                log::debug!("{} '{}' read from {}", io_type.prefix(), name, id);
                store
                    .get(&id)
                    .ok_or_else(|| ParamResolutionError::NotPreparedPrevJob {
                        address: id.to_string(),
                    })?
            }
            _ => value.clone(),
        };

        let value = match value {
            Value::String(s) if is_template(&s) => Value::String(renderer.render(&s, variables)?),
            other => other,
        };
        resolved.insert(name.clone(), value);
    }
    Ok(resolved)
}

/// Remap a raw result onto the declared output keys.
///
/// - object results are picked by key
/// - list results are assigned by declared order (extra items dropped)
///
/// A declared key the result doesn't provide is stored as `null` either way.
/// - scalar results are replicated across every declared key
///
/// Without a declared schema an object is kept whole and anything else is
/// stored under `result`.
pub fn remap_outputs(raw: &Value, outputs: &[OutputParam]) -> Map<String, Value> {
    if outputs.is_empty() {
        return match raw {
            Value::Object(map) => map.clone(),
            other => {
                let mut map = Map::new();
                map.insert("result".to_string(), other.clone());
                map
            }
        };
    }

    let mut mapped = Map::new();
    match raw {
        Value::Object(map) => {
            for out in outputs {
                let value = map.get(&out.key).cloned().unwrap_or(Value::Null);
                mapped.insert(out.key.clone(), typed(value, &out.param_type));
            }
        }
        Value::Array(items) => {
            for (i, out) in outputs.iter().enumerate() {
                let value = items.get(i).cloned().unwrap_or(Value::Null);
                mapped.insert(out.key.clone(), typed(value, &out.param_type));
            }
        }
        scalar => {
            for out in outputs {
                mapped.insert(out.key.clone(), typed(scalar.clone(), &out.param_type));
            }
        }
    }
    mapped
}

// Outputs keep their raw value when the declared type doesn't fit
fn typed(value: Value, param_type: &ParamType) -> Value {
    if value.is_null() {
        return value;
    }
    coerce(&value, &ParamType::Any, param_type).unwrap_or(value)
}

/// Apply `result_info` overrides on top of remapped outputs
pub fn apply_result_mappings(
    outputs: &mut Map<String, Value>,
    rules: &[ResultMapping],
    raw: &Value,
    store: &dyn ValueStore,
) {
    for rule in rules {
        let value = match rule.call_method {
            CallMethod::Value => Some(rule.source.clone()),
            CallMethod::Refer => rule
                .source
                .as_str()
                .and_then(|address| find_io_value(address, raw, store)),
        };
        match value {
            Some(v) => {
                outputs.insert(rule.key.clone(), v);
            }
            None => log::warn!(
                "result_info source {} for '{}' not found",
                rule.source,
                rule.key
            ),
        }
    }
}

/// Look up a value either by store address (`O.node.svc.key`) or as a
/// dot-notation path into the raw result.
pub fn find_io_value(address: &str, raw: &Value, store: &dyn ValueStore) -> Option<Value> {
    match ValueId::parse(address) {
        Ok(id) => store.get(&id),
        Err(_) => extract_json_path(raw, address),
    }
}

/// Extract a value from JSON using a simple dot-notation path
pub fn extract_json_path(json: &Value, path: &str) -> Option<Value> {
    let mut current = json;
    for part in path.split('.') {
        current = match current {
            Value::Array(items) => items.get(part.parse::<usize>().ok()?)?,
            other => other.get(part)?,
        };
    }
    Some(current.clone())
}
