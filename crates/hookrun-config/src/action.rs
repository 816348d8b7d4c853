//! Action definition parsing.

use hookrun_core::action::ActionSpec;
use hookrun_core::ActionConfig;
use kdl::KdlNode;
use std::collections::HashMap;
use std::path::PathBuf;

use crate::nodes::{get_first_string_arg, get_string};
use crate::{ConfigError, ConfigResult};

/// Parse an `action "<name>" type="<kind>" { ... }` node.
pub fn parse_action(node: &KdlNode) -> ConfigResult<ActionConfig> {
    let name = get_first_string_arg(node)
        .ok_or_else(|| ConfigError::MissingField("action name".to_string()))?;
    let kind = get_string(node, "type")?
        .ok_or_else(|| ConfigError::MissingField(format!("type for action '{}'", name)))?;

    let spec = match kind.as_str() {
        "shell" => ActionSpec::Shell {
            command: require(node, &name, "command")?,
        },
        "script" => ActionSpec::Script {
            path: PathBuf::from(require(node, &name, "script")?),
            interpreter: get_string(node, "interpreter")?,
        },
        "agent" => ActionSpec::Agent {
            prompt: require(node, &name, "prompt")?,
        },
        other => {
            return Err(ConfigError::InvalidValue {
                field: format!("type for action '{}'", name),
                message: format!("unknown action type: {}", other),
            });
        }
    };

    let mut env = HashMap::new();
    if let Some(children) = node.children() {
        for child in children.nodes() {
            if child.name().value() != "env" {
                continue;
            }
            if let Some(vars) = child.children() {
                for var in vars.nodes() {
                    let key = var.name().value().to_string();
                    if let Some(val) = get_first_string_arg(var) {
                        env.insert(key, val);
                    }
                }
            }
        }
    }

    Ok(ActionConfig { name, spec, env })
}

fn require(node: &KdlNode, action: &str, field: &str) -> ConfigResult<String> {
    get_string(node, field)?
        .ok_or_else(|| ConfigError::MissingField(format!("{} for action '{}'", field, action)))
}
