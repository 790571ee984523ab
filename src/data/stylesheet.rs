//! Tag based style resolution
//!
//! A stylesheet turns the tags of a feature into the style properties the
//! adapter acts on. Well-known properties are listed in [`props`].

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::prelude::HashMap;
use crate::Result;

/// Style property names understood by the adapter.
pub mod props {
    /// Mesh builder to run (`building`, ...). Elements without one are
    /// emitted as plain elements.
    pub const BUILDER: &str = "builder";
    /// Extrusion height in metres.
    pub const HEIGHT: &str = "height";
    /// Hex colour `#rrggbb`.
    pub const COLOR: &str = "color";
}

/// Opaque `(tags) -> styles` lookup.
pub trait Stylesheet: Send + Sync {
    fn resolve(&self, tags: &HashMap<String, String>) -> HashMap<String, String>;

    /// Whether any rule applies to `tags`.
    fn is_styled(&self, tags: &HashMap<String, String>) -> bool {
        !self.resolve(tags).is_empty()
    }
}

/// One rule: matches features carrying `key` (with `value`, if given).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StyleRule {
    pub key: String,
    #[serde(default)]
    pub value: Option<String>,
    pub styles: HashMap<String, String>,
}

impl StyleRule {
    fn matches(&self, tags: &HashMap<String, String>) -> bool {
        match (tags.get(&self.key), &self.value) {
            (Some(actual), Some(expected)) => actual == expected,
            (Some(_), None) => true,
            (None, _) => false,
        }
    }
}

/// Ordered list of rules; later matches override earlier properties.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RuleStylesheet {
    rules: Vec<StyleRule>,
}

impl RuleStylesheet {
    pub fn new(rules: Vec<StyleRule>) -> Self {
        Self { rules }
    }

    /// Parses `[{ "key": .., "value": .., "styles": { .. } }, ..]`.
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_json(&contents)
    }

    pub fn rules(&self) -> &[StyleRule] {
        &self.rules
    }
}

impl Stylesheet for RuleStylesheet {
    fn resolve(&self, tags: &HashMap<String, String>) -> HashMap<String, String> {
        let mut styles = HashMap::default();
        for rule in self.rules.iter().filter(|rule| rule.matches(tags)) {
            styles.extend(rule.styles.iter().map(|(k, v)| (k.clone(), v.clone())));
        }
        styles
    }
}
