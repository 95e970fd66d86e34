use crate::error::{SyncError, SyncResult};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// One validation rule applied to a field.
///
/// Declared as pipe-separated strings on entity models (`"required|max:255"`)
/// and parsed into this form; names that are not built in become `Custom`
/// and are looked up in the rule registry at validation time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "rule")]
pub enum Rule {
    Required,
    Nullable,
    Text,
    Integer,
    Numeric,
    Boolean,
    Array,
    Object,
    Min { limit: f64 },
    Max { limit: f64 },
    RequiredWithout { other: String },
    /// The value must match a stored row; `column` defaults to the field name
    Exists {
        entity_type: Option<String>,
        column: Option<String>,
    },
    /// No stored row may already hold the value
    Unique {
        entity_type: Option<String>,
        column: Option<String>,
    },
    Custom { name: String, params: Vec<String> },
}

impl Rule {
    pub fn custom(name: impl Into<String>, params: Vec<String>) -> Self {
        Rule::Custom {
            name: name.into(),
            params,
        }
    }

    pub fn exists(entity_type: impl Into<String>, column: impl Into<String>) -> Self {
        Rule::Exists {
            entity_type: Some(entity_type.into()),
            column: Some(column.into()),
        }
    }

    /// Parse a pipe-separated rule list such as `"required|max:255"`.
    pub fn parse_list(declared: &str) -> SyncResult<Vec<Rule>> {
        declared
            .split('|')
            .map(str::trim)
            .filter(|token| !token.is_empty())
            .map(Rule::parse)
            .collect()
    }

    /// Parse a single `name[:param,param]` token.
    pub fn parse(token: &str) -> SyncResult<Rule> {
        let (name, params) = match token.split_once(':') {
            Some((name, params)) => (
                name.trim(),
                params
                    .split(',')
                    .map(|p| p.trim().to_string())
                    .filter(|p| !p.is_empty())
                    .collect::<Vec<_>>(),
            ),
            None => (token.trim(), Vec::new()),
        };

        let limit = |params: &[String]| -> SyncResult<f64> {
            params
                .first()
                .and_then(|p| p.parse::<f64>().ok())
                .ok_or_else(|| {
                    SyncError::configuration(format!("Rule '{}' needs a numeric parameter", token))
                })
        };

        let rule = match name {
            "required" => Rule::Required,
            "nullable" => Rule::Nullable,
            "string" => Rule::Text,
            "integer" => Rule::Integer,
            "numeric" => Rule::Numeric,
            "boolean" => Rule::Boolean,
            "array" => Rule::Array,
            "object" => Rule::Object,
            "min" => Rule::Min {
                limit: limit(&params)?,
            },
            "max" => Rule::Max {
                limit: limit(&params)?,
            },
            "required_without" => Rule::RequiredWithout {
                other: params.into_iter().next().ok_or_else(|| {
                    SyncError::configuration(format!("Rule '{}' needs a field name", token))
                })?,
            },
            "exists" | "unique" => {
                let mut params = params.into_iter();
                let entity_type = params.next();
                let column = params.next();
                if name == "exists" {
                    Rule::Exists {
                        entity_type,
                        column,
                    }
                } else {
                    Rule::Unique {
                        entity_type,
                        column,
                    }
                }
            }
            "" => return Err(SyncError::configuration("Empty rule name")),
            other => Rule::Custom {
                name: other.to_string(),
                params,
            },
        };
        Ok(rule)
    }

    pub fn name(&self) -> &str {
        match self {
            Rule::Required => "required",
            Rule::Nullable => "nullable",
            Rule::Text => "string",
            Rule::Integer => "integer",
            Rule::Numeric => "numeric",
            Rule::Boolean => "boolean",
            Rule::Array => "array",
            Rule::Object => "object",
            Rule::Min { .. } => "min",
            Rule::Max { .. } => "max",
            Rule::RequiredWithout { .. } => "required_without",
            Rule::Exists { .. } => "exists",
            Rule::Unique { .. } => "unique",
            Rule::Custom { name, .. } => name,
        }
    }
}

impl fmt::Display for Rule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let params: Vec<String> = match self {
            Rule::Min { limit } | Rule::Max { limit } => vec![limit.to_string()],
            Rule::RequiredWithout { other } => vec![other.clone()],
            Rule::Exists {
                entity_type,
                column,
            }
            | Rule::Unique {
                entity_type,
                column,
            } => entity_type.iter().chain(column.iter()).cloned().collect(),
            Rule::Custom { params, .. } => params.clone(),
            _ => Vec::new(),
        };
        if params.is_empty() {
            write!(f, "{}", self.name())
        } else {
            write!(f, "{}:{}", self.name(), params.join(","))
        }
    }
}

/// Flattened rules keyed by dotted field pattern (`comments.*.comment`),
/// plus custom messages keyed by `pattern.rule` or bare `rule`.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RuleSet {
    rules: BTreeMap<String, Vec<Rule>>,
    messages: BTreeMap<String, String>,
}

impl RuleSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, pattern: impl Into<String>, rule: Rule) {
        self.rules.entry(pattern.into()).or_default().push(rule);
    }

    pub fn extend(&mut self, pattern: impl Into<String>, rules: impl IntoIterator<Item = Rule>) {
        self.rules.entry(pattern.into()).or_default().extend(rules);
    }

    pub fn get(&self, pattern: &str) -> Option<&[Rule]> {
        self.rules.get(pattern).map(Vec::as_slice)
    }

    /// Rule names for a pattern in declaration order, e.g. `["required", "max:255"]`
    pub fn describe(&self, pattern: &str) -> Vec<String> {
        self.get(pattern)
            .map(|rules| rules.iter().map(Rule::to_string).collect())
            .unwrap_or_default()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Vec<Rule>)> {
        self.rules.iter()
    }

    pub fn patterns(&self) -> impl Iterator<Item = &String> {
        self.rules.keys()
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Merge a nested rule set under `prefix`. Only field-scoped messages
    /// (`field.rule`) of the nested set are carried over.
    pub fn merge_prefixed(&mut self, prefix: &str, nested: RuleSet) {
        for (pattern, rules) in nested.rules {
            self.extend(format!("{}.{}", prefix, pattern), rules);
        }
        for (key, message) in nested.messages {
            if key.contains('.') {
                self.messages.insert(format!("{}.{}", prefix, key), message);
            }
        }
    }

    pub fn set_message(&mut self, key: impl Into<String>, message: impl Into<String>) {
        self.messages.insert(key.into(), message.into());
    }

    /// Custom message for a rule failing on `pattern`, most specific first
    pub fn message(&self, pattern: &str, rule: &str) -> Option<&str> {
        self.messages
            .get(&format!("{}.{}", pattern, rule))
            .or_else(|| self.messages.get(rule))
            .map(String::as_str)
    }
}
