//! Portable rule documents, one JSON file per package.

use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::model::{ComponentDescriptor, ComponentName, ComponentType, EnabledState};
use crate::utils::{path_has_ext, path_stem_str};

pub const RULE_EXTENSION: &str = "json";

#[derive(Error, Debug)]
pub enum RuleParseError {
    #[error("invalid rule json: {0}")]
    Json(#[from] serde_json::Error),

    #[error("rule has an empty packageName")]
    MissingPackageName,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ComponentRule {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: ComponentType,
    pub enabled_state: EnabledState,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BlockerRuleDocument {
    pub package_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version_code: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version_name: Option<String>,
    #[serde(default)]
    pub component_list: Vec<ComponentRule>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub apply_recommended: Option<bool>,
}

impl BlockerRuleDocument {
    pub fn with_version(mut self, code: Option<i64>, name: Option<String>) -> Self {
        self.version_code = code;
        self.version_name = name;
        self
    }

    /// Components the document wants in `state`
    pub fn components_in(&self, state: EnabledState) -> Vec<ComponentName> {
        self.component_list
            .iter()
            .filter(|it| it.enabled_state == state)
            .map(|it| ComponentName::new(self.package_name.as_str(), &it.name, it.kind))
            .collect()
    }
}

/// Which components an encoded document keeps
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EncodeMode {
    /// Only components whose state differs from the platform default
    #[default]
    Changed,
    /// Every component
    FullSnapshot,
}

pub struct RuleCodec;

impl RuleCodec {
    pub fn encode(
        package: &str,
        components: &[ComponentDescriptor],
        mode: EncodeMode,
    ) -> BlockerRuleDocument {
        let component_list = components
            .iter()
            .filter(|it| mode == EncodeMode::FullSnapshot || it.enabled_state != EnabledState::Default)
            .map(|it| ComponentRule {
                name: it.name.clone(),
                kind: it.kind,
                enabled_state: it.enabled_state,
            })
            .collect();
        BlockerRuleDocument {
            package_name: package.into(),
            version_code: None,
            version_name: None,
            component_list,
            apply_recommended: None,
        }
    }

    /// Parse a document, ignoring fields it doesn't know
    pub fn decode(raw: &[u8]) -> Result<BlockerRuleDocument, RuleParseError> {
        let doc: BlockerRuleDocument = serde_json::from_slice(raw)?;
        if doc.package_name.trim().is_empty() {
            return Err(RuleParseError::MissingPackageName);
        }
        Ok(doc)
    }

    pub fn to_bytes(doc: &BlockerRuleDocument) -> Result<Vec<u8>, RuleParseError> {
        let mut out = serde_json::to_vec_pretty(doc)?;
        out.push(b'\n');
        Ok(out)
    }

    pub fn file_name(package: &str) -> String {
        format!("{package}.{RULE_EXTENSION}")
    }

    /// Whether the path looks like a rule document
    pub fn is_rule_file(path: &Path) -> bool {
        path_has_ext(path, RULE_EXTENSION) && path_stem_str(path).map_or(false, |it| !it.is_empty())
    }
}
