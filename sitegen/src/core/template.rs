//! Built-in starter templates keyed by project stack.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::tree::FileTree;

const NEXTJS_ARTIFACT: &str = include_str!("templates/nextjs.xml");
const REACT_ARTIFACT: &str = include_str!("templates/react.xml");
const NODE_ARTIFACT: &str = include_str!("templates/node.xml");

/// Project stack selected by the classification call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Stack {
    #[default]
    NextJs,
    React,
    Node,
}

impl Stack {
    pub fn as_str(self) -> &'static str {
        match self {
            Stack::NextJs => "nextjs",
            Stack::React => "react",
            Stack::Node => "node",
        }
    }

    /// Starter project as directive markup.
    pub fn artifact(self) -> &'static str {
        match self {
            Stack::NextJs => NEXTJS_ARTIFACT,
            Stack::React => REACT_ARTIFACT,
            Stack::Node => NODE_ARTIFACT,
        }
    }
}

impl fmt::Display for Stack {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Stack {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "nextjs" | "next.js" | "next" => Ok(Stack::NextJs),
            "react" | "vite" | "react-vite" => Ok(Stack::React),
            "node" | "nodejs" | "node.js" | "express" => Ok(Stack::Node),
            other => Err(format!("unknown stack '{other}'")),
        }
    }
}

#[derive(Deserialize)]
struct StackAnswer {
    stack: String,
}

/// Read the classification answer.
///
/// Accepts a bare identifier (optionally quoted or wrapped in backticks) or a
/// JSON object `{"stack": "..."}`. Anything else is `None`.
pub fn parse_stack(response: &str) -> Option<Stack> {
    let trimmed = response.trim();
    if trimmed.starts_with('{') {
        let answer: StackAnswer = serde_json::from_str(trimmed).ok()?;
        return answer.stack.parse().ok();
    }
    let bare =
        trimmed.trim_matches(|c: char| c == '"' || c == '\'' || c == '`' || c.is_whitespace());
    if bare.is_empty() {
        return None;
    }
    bare.parse().ok()
}

/// Stack of an existing project, read from the dependencies in `/package.json`.
pub fn detect_stack(tree: &FileTree) -> Option<Stack> {
    let manifest = tree.find("/package.json")?.content.as_deref()?;
    let manifest: Value = serde_json::from_str(manifest).ok()?;
    let depends_on = |name: &str| {
        ["dependencies", "devDependencies"]
            .iter()
            .any(|section| manifest.get(section).and_then(|deps| deps.get(name)).is_some())
    };
    if depends_on("next") {
        Some(Stack::NextJs)
    } else if depends_on("react") {
        Some(Stack::React)
    } else if depends_on("express") {
        Some(Stack::Node)
    } else {
        None
    }
}
