//! Helpers for extracting values from KDL nodes.
//!
//! Settings may be written either as properties (`queue max-concurrent=3`)
//! or as child nodes (`queue { max-concurrent 3 }`). Properties win.

use kdl::{KdlNode, KdlValue};

use crate::{ConfigError, ConfigResult};

pub(crate) fn get_first_string_arg(node: &KdlNode) -> Option<String> {
    first_arg(node)
        .and_then(|v| v.as_string())
        .map(|s| s.to_string())
}

pub(crate) fn get_first_bool_arg(node: &KdlNode) -> ConfigResult<Option<bool>> {
    match first_arg(node) {
        None => Ok(None),
        Some(value) => value.as_bool().map(Some).ok_or_else(|| {
            ConfigError::invalid(
                node.name().value(),
                format!("expected a boolean, got {}", value),
            )
        }),
    }
}

fn first_arg(node: &KdlNode) -> Option<&KdlValue> {
    node.entries()
        .iter()
        .find(|e| e.name().is_none())
        .map(|e| e.value())
}

/// Look up a setting as a property of `node` or as the first argument of a
/// child node with that name.
pub(crate) fn get_setting<'a>(node: &'a KdlNode, name: &str) -> Option<&'a KdlValue> {
    if let Some(value) = node.get(name) {
        return Some(value);
    }
    node.children()?
        .nodes()
        .iter()
        .find(|child| child.name().value() == name)
        .and_then(first_arg)
}

pub(crate) fn get_string(node: &KdlNode, name: &str) -> ConfigResult<Option<String>> {
    match get_setting(node, name) {
        None => Ok(None),
        Some(value) => value
            .as_string()
            .map(|s| Some(s.to_string()))
            .ok_or_else(|| ConfigError::invalid(name, format!("expected a string, got {}", value))),
    }
}

pub(crate) fn get_u64(node: &KdlNode, name: &str) -> ConfigResult<Option<u64>> {
    match get_setting(node, name) {
        None => Ok(None),
        Some(value) => value
            .as_integer()
            .and_then(|i| u64::try_from(i).ok())
            .map(Some)
            .ok_or_else(|| {
                ConfigError::invalid(
                    name,
                    format!("expected a non-negative integer, got {}", value),
                )
            }),
    }
}

pub(crate) fn get_f64(node: &KdlNode, name: &str) -> ConfigResult<Option<f64>> {
    match get_setting(node, name) {
        None => Ok(None),
        Some(value) => value
            .as_float()
            .or_else(|| value.as_integer().map(|i| i as f64))
            .map(Some)
            .ok_or_else(|| ConfigError::invalid(name, format!("expected a number, got {}", value))),
    }
}
