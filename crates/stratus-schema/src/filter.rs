//! Identity lookups: raw id, exact name, or a predicate filter with an optional
//! earliest/latest tie-break.

use crate::types::ResourceId;
use crate::SchemaError;
use chrono::{DateTime, NaiveDate, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// How an operator identifies an existing remote object.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Lookup {
    /// Validated only for existence; no filtering.
    Id(ResourceId),
    Name(String),
    Filter(FilterSpec),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TieBreak {
    Earliest,
    Latest,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MetadataMatch {
    pub key: String,
    pub value: String,
}

/// A conjunction of predicates. Every declared predicate must hold.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FilterSpec {
    #[serde(default)]
    pub name_regex: Option<String>,
    /// Require the regex to match the whole name instead of any substring.
    #[serde(default)]
    pub full_match: bool,
    /// Creation-date condition such as `2024-01-01`, `>=2024-01-01` or
    /// `<2024-03-01T12:00:00Z`.
    #[serde(default)]
    pub date: Option<String>,
    #[serde(default)]
    pub metadata: Vec<MetadataMatch>,
    #[serde(default)]
    pub tie_break: Option<TieBreak>,
}

impl FilterSpec {
    pub fn compile(&self) -> Result<CompiledFilter, SchemaError> {
        if self.name_regex.is_none() && self.date.is_none() && self.metadata.is_empty() {
            return Err(SchemaError::Filter("filter declares no predicates".to_owned()));
        }
        let name = match &self.name_regex {
            Some(re) if self.full_match => Some(Regex::new(&format!("^(?:{re})$"))?),
            Some(re) => Some(Regex::new(re)?),
            None => None,
        };
        let date = self.date.as_deref().map(DateCondition::parse).transpose()?;
        Ok(CompiledFilter {
            name,
            date,
            metadata: self.metadata.clone(),
            tie_break: self.tie_break,
        })
    }
}

#[derive(Debug, Clone)]
pub struct CompiledFilter {
    name: Option<Regex>,
    date: Option<DateCondition>,
    metadata: Vec<MetadataMatch>,
    pub tie_break: Option<TieBreak>,
}

impl CompiledFilter {
    pub fn matches(
        &self,
        name: &str,
        created_at: Option<DateTime<Utc>>,
        metadata: &BTreeMap<String, String>,
    ) -> bool {
        if let Some(re) = &self.name {
            if !re.is_match(name) {
                return false;
            }
        }
        if let Some(cond) = &self.date {
            // Objects without a creation date cannot satisfy a date predicate.
            match created_at {
                Some(t) if cond.matches(t) => {}
                _ => return false,
            }
        }
        self.metadata
            .iter()
            .all(|m| metadata.get(&m.key).is_some_and(|v| *v == m.value))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DateOp {
    Lt,
    Le,
    Eq,
    Ge,
    Gt,
}

impl fmt::Display for DateOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            DateOp::Lt => "<",
            DateOp::Le => "<=",
            DateOp::Eq => "==",
            DateOp::Ge => ">=",
            DateOp::Gt => ">",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DateBound {
    Day(NaiveDate),
    Instant(DateTime<Utc>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DateCondition {
    pub op: DateOp,
    bound: DateBound,
}

impl DateCondition {
    /// Parse `[op] date`. The operator defaults to `==`; a bare calendar date
    /// compared with `==` matches the whole UTC day, while ordering operators
    /// compare against midnight UTC.
    pub fn parse(expr: &str) -> Result<Self, SchemaError> {
        let expr = expr.trim();
        let (op, rest) = [
            ("<=", DateOp::Le),
            (">=", DateOp::Ge),
            ("==", DateOp::Eq),
            ("<", DateOp::Lt),
            (">", DateOp::Gt),
        ]
        .into_iter()
        .find_map(|(prefix, op)| expr.strip_prefix(prefix).map(|rest| (op, rest)))
        .unwrap_or((DateOp::Eq, expr));
        let value = rest.trim();
        if value.is_empty() {
            return Err(SchemaError::Filter(format!("empty date in '{expr}'")));
        }
        let bound = if let Ok(day) = NaiveDate::parse_from_str(value, "%Y-%m-%d") {
            DateBound::Day(day)
        } else {
            let t = DateTime::parse_from_rfc3339(value).map_err(|e| {
                SchemaError::Filter(format!("invalid date '{value}': {e}"))
            })?;
            DateBound::Instant(t.with_timezone(&Utc))
        };
        Ok(Self { op, bound })
    }

    pub fn matches(&self, t: DateTime<Utc>) -> bool {
        match (self.op, self.bound) {
            (DateOp::Eq, DateBound::Day(day)) => t.date_naive() == day,
            (op, DateBound::Day(day)) => {
                compare(op, t, day.and_hms_opt(0, 0, 0).map_or(t, |d| d.and_utc()))
            }
            (op, DateBound::Instant(bound)) => compare(op, t, bound),
        }
    }
}

fn compare(op: DateOp, t: DateTime<Utc>, bound: DateTime<Utc>) -> bool {
    match op {
        DateOp::Lt => t < bound,
        DateOp::Le => t <= bound,
        DateOp::Eq => t == bound,
        DateOp::Ge => t >= bound,
        DateOp::Gt => t > bound,
    }
}
