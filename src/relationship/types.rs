//! Relationship value types

use crate::error::{validation_error, AppError, AppResult};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Closed set of edge types between stickies
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RelationType {
    Includes,
    Causes,
    Uses,
    Represents,
    ContrastsWith,
}

impl RelationType {
    /// Canonical upper-case name, also the graph edge label and mirror value
    pub fn as_str(&self) -> &'static str {
        match self {
            RelationType::Includes => "INCLUDES",
            RelationType::Causes => "CAUSES",
            RelationType::Uses => "USES",
            RelationType::Represents => "REPRESENTS",
            RelationType::ContrastsWith => "CONTRASTS_WITH",
        }
    }
}

impl FromStr for RelationType {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "includes" => Ok(RelationType::Includes),
            "causes" => Ok(RelationType::Causes),
            "uses" => Ok(RelationType::Uses),
            "represents" => Ok(RelationType::Represents),
            "contrasts_with" | "contrasts-with" | "contrastswith" => Ok(RelationType::ContrastsWith),
            _ => Err(AppError::InvalidRelationType(s.to_string())),
        }
    }
}

impl fmt::Display for RelationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which store answered a request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreKind {
    Graph,
    Mirror,
}

/// The identity of an edge: (from, to, type)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EdgeKey {
    pub from: Uuid,
    pub to: Uuid,
    pub rel_type: RelationType,
}

impl EdgeKey {
    /// Validate raw command input. The type is checked first so a bad
    /// type is always reported as such.
    pub fn parse(from: &str, to: &str, rel_type: &str) -> AppResult<Self> {
        let rel_type = rel_type.parse()?;
        Ok(Self {
            from: parse_stickie_id("from", from)?,
            to: parse_stickie_id("to", to)?,
            rel_type,
        })
    }
}

fn parse_stickie_id(field: &str, value: &str) -> AppResult<Uuid> {
    let value = value.trim();
    if value.is_empty() {
        return Err(validation_error(format!("--{} is required", field)));
    }
    Uuid::parse_str(value)
        .map_err(|_| validation_error(format!("--{} must be a stickie UUID", field)))
}

/// A stored relationship
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Relationship {
    pub from: Uuid,
    pub to: Uuid,
    #[serde(rename = "type")]
    pub rel_type: RelationType,
    pub labels: Vec<String>,
}

impl Relationship {
    pub fn new(key: EdgeKey, labels: Vec<String>) -> Self {
        Self {
            from: key.from,
            to: key.to,
            rel_type: key.rel_type,
            labels,
        }
    }

    pub fn key(&self) -> EdgeKey {
        EdgeKey {
            from: self.from,
            to: self.to,
            rel_type: self.rel_type,
        }
    }
}

/// Edge direction relative to a stickie
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum Direction {
    #[default]
    Out,
    In,
    Both,
}

/// Trim every label, split comma-separated values, drop empties
pub fn normalize_labels<S: AsRef<str>>(raw: &[S]) -> Vec<String> {
    raw.iter()
        .flat_map(|item| item.as_ref().split(','))
        .map(str::trim)
        .filter(|label| !label.is_empty())
        .map(str::to_string)
        .collect()
}
