//! Renders a [`PredictionRequest`] as the predictor's YAML input file.
//!
//! Optional fields that are not specified are omitted, never written as null:
//! the predictor treats the presence of a key (for example `msa`) as a request
//! for that feature.
//!
//! Lists whose first item is itself a list of two or more items (residue
//! contact tuples) are written inline as `[[A, 12], [B, 4]]`. All other lists
//! are written one item per line. Output is deterministic: items keep the
//! order in which they were supplied.

use std::fmt::Write as _;
use std::path::Path;

use serde_yml::{Mapping, Value};

use crate::request::{Constraint, Entity, PredictionRequest, Property, Template};

/// Name of the input file inside each job directory.
pub const INPUT_FILE: &str = "boltz_input.yaml";

const INDENT: usize = 2;

#[derive(Debug, thiserror::Error)]
pub enum SerializeError {
    #[error("failed to encode YAML value: {0}")]
    Encode(#[from] serde_yml::Error),
    #[error("failed to write {INPUT_FILE}: {0}")]
    Io(#[from] std::io::Error),
}

/// Build the input document, preserving the order of every list.
pub fn build_document(request: &PredictionRequest) -> Result<Value, SerializeError> {
    let mut doc = Mapping::new();
    insert(&mut doc, "version", serde_yml::to_value(request.version)?);

    let sequences = request
        .sequences
        .iter()
        .map(entity_block)
        .collect::<Result<Vec<_>, _>>()?;
    insert(&mut doc, "sequences", Value::Sequence(sequences));

    if let Some(constraints) = request.constraints.as_deref().filter(|c| !c.is_empty()) {
        let mut items = Vec::with_capacity(constraints.len());
        for spec in constraints {
            if let Some(constraint) = spec.resolve() {
                items.push(constraint_block(constraint)?);
            }
        }
        insert(&mut doc, "constraints", Value::Sequence(items));
    }

    if let Some(templates) = request.templates.as_deref().filter(|t| !t.is_empty()) {
        let items = templates
            .iter()
            .map(template_block)
            .collect::<Result<Vec<_>, _>>()?;
        insert(&mut doc, "templates", Value::Sequence(items));
    }

    if let Some(properties) = request.properties.as_deref().filter(|p| !p.is_empty()) {
        let items = properties.iter().filter_map(property_block).collect();
        insert(&mut doc, "properties", Value::Sequence(items));
    }

    Ok(Value::Mapping(doc))
}

/// Serialize the request and write it to `<job_dir>/boltz_input.yaml`.
///
/// Returns the rendered text.
pub fn write_input(job_dir: &Path, request: &PredictionRequest) -> Result<String, SerializeError> {
    let yaml = render(&build_document(request)?)?;
    std::fs::write(job_dir.join(INPUT_FILE), &yaml)?;
    Ok(yaml)
}

fn insert(map: &mut Mapping, key: &str, value: Value) {
    map.insert(Value::String(key.to_string()), value);
}

fn insert_str(map: &mut Mapping, key: &str, value: Option<&str>) {
    if let Some(value) = value.filter(|v| !v.is_empty()) {
        insert(map, key, Value::String(value.to_string()));
    }
}

fn single_key(key: &str, body: Mapping) -> Value {
    let mut map = Mapping::new();
    insert(&mut map, key, Value::Mapping(body));
    Value::Mapping(map)
}

fn entity_block(entity: &Entity) -> Result<Value, SerializeError> {
    let mut body = Mapping::new();
    insert(&mut body, "id", serde_yml::to_value(&entity.id)?);
    insert_str(&mut body, "sequence", entity.sequence.as_deref());
    insert_str(&mut body, "smiles", entity.smiles.as_deref());
    insert_str(&mut body, "ccd", entity.ccd.as_deref());
    insert_str(&mut body, "msa", entity.msa.as_deref());
    if let Some(mods) = entity.modifications.as_deref().filter(|m| !m.is_empty()) {
        insert(&mut body, "modifications", serde_yml::to_value(mods)?);
    }
    if entity.is_cyclic() {
        insert(&mut body, "cyclic", Value::Bool(true));
    }
    Ok(single_key(entity.entity_type.as_str(), body))
}

fn constraint_block(constraint: Constraint<'_>) -> Result<Value, SerializeError> {
    let mut body = Mapping::new();
    let kind = match constraint {
        Constraint::Bond(bond) => {
            insert(&mut body, "atom1", serde_yml::to_value(&bond.atom1)?);
            insert(&mut body, "atom2", serde_yml::to_value(&bond.atom2)?);
            "bond"
        }
        Constraint::Pocket(pocket) => {
            insert(&mut body, "binder", Value::String(pocket.binder.clone()));
            insert(&mut body, "contacts", serde_yml::to_value(&pocket.contacts)?);
            if let Some(max_distance) = pocket.max_distance {
                insert(&mut body, "max_distance", serde_yml::to_value(max_distance)?);
            }
            "pocket"
        }
        Constraint::Contact(contact) => {
            insert(&mut body, "token1", serde_yml::to_value(&contact.token1)?);
            insert(&mut body, "token2", serde_yml::to_value(&contact.token2)?);
            if let Some(max_distance) = contact.max_distance {
                insert(&mut body, "max_distance", serde_yml::to_value(max_distance)?);
            }
            "contact"
        }
    };
    Ok(single_key(kind, body))
}

fn template_block(template: &Template) -> Result<Value, SerializeError> {
    let mut body = Mapping::new();
    insert(&mut body, "cif", Value::String(template.cif.clone()));
    if let Some(chain_id) = template.chain_id.as_ref().filter(|c| !c.is_empty()) {
        insert(&mut body, "chain_id", serde_yml::to_value(chain_id)?);
    }
    if let Some(template_id) = template.template_id.as_deref().filter(|t| !t.is_empty()) {
        insert(&mut body, "template_id", serde_yml::to_value(template_id)?);
    }
    Ok(Value::Mapping(body))
}

fn property_block(property: &Property) -> Option<Value> {
    let affinity = property.affinity.as_ref()?;
    let mut body = Mapping::new();
    insert(&mut body, "binder", Value::String(affinity.binder.clone()));
    Some(single_key("affinity", body))
}

/// Render a document in block style, switching to flow style for tuple lists.
pub fn render(doc: &Value) -> Result<String, SerializeError> {
    let mut out = String::new();
    match doc {
        Value::Mapping(map) => write_mapping(map, 0, &mut out)?,
        Value::Sequence(seq) => write_sequence(seq, 0, &mut out)?,
        other => {
            out.push_str(&scalar(other)?);
            out.push('\n');
        }
    }
    Ok(out)
}

/// A list of coordinate or contact tuples.
fn is_tuple_list(seq: &[Value]) -> bool {
    matches!(seq.first(), Some(Value::Sequence(first)) if first.len() >= 2)
}

fn write_mapping(map: &Mapping, indent: usize, out: &mut String) -> Result<(), SerializeError> {
    for (key, value) in map {
        let _ = write!(out, "{:indent$}{}:", "", scalar(key)?);
        match value {
            Value::Mapping(inner) if !inner.is_empty() => {
                out.push('\n');
                write_mapping(inner, indent + INDENT, out)?;
            }
            Value::Sequence(seq) if !seq.is_empty() && !is_tuple_list(seq) => {
                out.push('\n');
                // Block sequences sit at their key's indentation.
                write_sequence(seq, indent, out)?;
            }
            other => {
                out.push(' ');
                out.push_str(&inline(other)?);
                out.push('\n');
            }
        }
    }
    Ok(())
}

fn write_sequence(seq: &[Value], indent: usize, out: &mut String) -> Result<(), SerializeError> {
    for item in seq {
        let _ = write!(out, "{:indent$}- ", "");
        let mut nested = String::new();
        match item {
            Value::Mapping(inner) if !inner.is_empty() => {
                write_mapping(inner, indent + INDENT, &mut nested)?;
            }
            Value::Sequence(inner) if !inner.is_empty() && !is_tuple_list(inner) => {
                write_sequence(inner, indent + INDENT, &mut nested)?;
            }
            other => {
                out.push_str(&inline(other)?);
                out.push('\n');
                continue;
            }
        }
        // The first nested line continues after the dash.
        out.push_str(&nested[indent + INDENT..]);
    }
    Ok(())
}

/// Flow-style rendering for scalars, empty collections and tuple lists.
fn inline(value: &Value) -> Result<String, SerializeError> {
    match value {
        Value::Sequence(seq) => {
            let items = seq.iter().map(inline).collect::<Result<Vec<_>, _>>()?;
            Ok(format!("[{}]", items.join(", ")))
        }
        Value::Mapping(map) => {
            let mut items = Vec::with_capacity(map.len());
            for (key, value) in map {
                items.push(format!("{}: {}", scalar(key)?, inline(value)?));
            }
            Ok(format!("{{{}}}", items.join(", ")))
        }
        Value::String(s) if needs_flow_quoting(s) => Ok(quoted(s)),
        other => scalar(other),
    }
}

/// Characters that are legal in a plain block scalar but end one in flow
/// context.
fn needs_flow_quoting(s: &str) -> bool {
    s.contains([',', '[', ']', '{', '}']) || s.contains(": ") || s.contains(" #")
}

/// Double-quoted form. JSON string syntax is valid YAML.
fn quoted(s: &str) -> String {
    serde_json::to_string(s).unwrap_or_else(|_| format!("\"{}\"", s.escape_default()))
}

fn scalar(value: &Value) -> Result<String, SerializeError> {
    if let Value::String(s) = value
        && s.chars().any(char::is_control)
    {
        // Keep multi-line strings on one line.
        return Ok(quoted(s));
    }
    let text = serde_yml::to_string(value)?;
    Ok(text.trim_end_matches('\n').to_string())
}
