//! Target filter language.
//!
//! A filter is a `;`-separated conjunction of `field==value` or
//! `field!=value` terms. Values may contain `*` wildcards and are compared
//! case-insensitively. Supported fields:
//!
//! - `controllerid`, `name`, `updatestatus`
//! - `assignedds`, `installedds` (distribution set id)
//! - `attribute.<key>`, `metadata.<key>`
//!
//! A field without a value (no assigned set, missing attribute) never
//! matches `==` and always matches `!=`. The empty filter matches every
//! target.

use regex::Regex;

use fleetgrid_state::{Target, TargetUpdateStatus};

use crate::error::{EngineError, EngineResult};

#[derive(Debug, Clone, PartialEq, Eq)]
enum Field {
    ControllerId,
    Name,
    UpdateStatus,
    AssignedDs,
    InstalledDs,
    Attribute(String),
    Metadata(String),
}

impl Field {
    fn parse(name: &str) -> EngineResult<Self> {
        let lower = name.trim().to_ascii_lowercase();
        let field = match lower.as_str() {
            "controllerid" => Self::ControllerId,
            "name" => Self::Name,
            "updatestatus" => Self::UpdateStatus,
            "assignedds" => Self::AssignedDs,
            "installedds" => Self::InstalledDs,
            _ => {
                let trimmed = name.trim();
                if let Some(key) = strip_prefix_ci(trimmed, "attribute.") {
                    Self::Attribute(key.to_string())
                } else if let Some(key) = strip_prefix_ci(trimmed, "metadata.") {
                    Self::Metadata(key.to_string())
                } else {
                    return Err(EngineError::Validation(format!(
                        "unknown filter field '{trimmed}'"
                    )));
                }
            }
        };
        Ok(field)
    }

    fn value_of(&self, target: &Target) -> Option<String> {
        match self {
            Self::ControllerId => Some(target.controller_id.clone()),
            Self::Name => Some(target.name.clone()),
            Self::UpdateStatus => Some(status_name(target.update_status).to_string()),
            Self::AssignedDs => target.assigned_ds.map(|id| id.to_string()),
            Self::InstalledDs => target.installed_ds.map(|id| id.to_string()),
            Self::Attribute(key) => target.attributes.get(key).cloned(),
            Self::Metadata(key) => target.metadata.get(key).cloned(),
        }
    }
}

fn strip_prefix_ci<'a>(s: &'a str, prefix: &str) -> Option<&'a str> {
    let head = s.get(..prefix.len())?;
    let rest = s.get(prefix.len()..)?;
    (head.eq_ignore_ascii_case(prefix) && !rest.is_empty()).then_some(rest)
}

fn status_name(status: TargetUpdateStatus) -> &'static str {
    match status {
        TargetUpdateStatus::Unknown => "unknown",
        TargetUpdateStatus::Registered => "registered",
        TargetUpdateStatus::Pending => "pending",
        TargetUpdateStatus::InSync => "in_sync",
        TargetUpdateStatus::Error => "error",
    }
}

#[derive(Debug, Clone)]
struct Term {
    field: Field,
    negated: bool,
    pattern: Regex,
}

impl Term {
    fn matches(&self, target: &Target) -> bool {
        match self.field.value_of(target) {
            Some(value) => self.pattern.is_match(&value) != self.negated,
            None => self.negated,
        }
    }
}

/// Compile a `*` wildcard value into an anchored, case-insensitive regex.
fn compile_pattern(value: &str) -> EngineResult<Regex> {
    let body = value
        .split('*')
        .map(regex::escape)
        .collect::<Vec<_>>()
        .join(".*");
    Regex::new(&format!("(?i)^{body}$"))
        .map_err(|e| EngineError::Validation(format!("invalid filter value '{value}': {e}")))
}

/// A parsed target filter.
#[derive(Debug, Clone, Default)]
pub struct TargetFilter {
    source: String,
    terms: Vec<Term>,
}

impl TargetFilter {
    pub fn parse(expr: &str) -> EngineResult<Self> {
        let mut terms = Vec::new();
        for raw in expr.split(';').map(str::trim).filter(|t| !t.is_empty()) {
            let (field, negated, value) = if let Some((f, v)) = raw.split_once("!=") {
                (f, true, v)
            } else if let Some((f, v)) = raw.split_once("==") {
                (f, false, v)
            } else {
                return Err(EngineError::Validation(format!(
                    "filter term '{raw}' must be field==value or field!=value"
                )));
            };
            terms.push(Term {
                field: Field::parse(field)?,
                negated,
                pattern: compile_pattern(value.trim())?,
            });
        }
        Ok(Self {
            source: expr.trim().to_string(),
            terms,
        })
    }

    /// Conjunction of this filter and an optional sub-filter.
    pub fn and(mut self, other: &TargetFilter) -> Self {
        self.terms.extend(other.terms.iter().cloned());
        self.source = match (self.source.is_empty(), other.source.is_empty()) {
            (_, true) => self.source,
            (true, false) => other.source.clone(),
            (false, false) => format!("{};{}", self.source, other.source),
        };
        self
    }

    pub fn matches(&self, target: &Target) -> bool {
        self.terms.iter().all(|term| term.matches(target))
    }

    pub fn as_str(&self) -> &str {
        &self.source
    }
}
