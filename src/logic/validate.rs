use async_trait::async_trait;
use log::debug;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

use crate::error::{SyncError, SyncResult, ValidationErrors};
use crate::model::{Catalog, Payload, Rule, RuleSet, SyncContext};
use crate::store::traits::EntityRepository;

const REQUIRED: &str = "The :attribute field is required.";
const CANNOT_BE_EMPTY: &str = "The :attribute field cannot be empty.";
const INVALID: &str = "The selected :attribute is invalid.";
const TAKEN: &str = "The :attribute has already been taken.";

/// Everything a rule sees about the attribute it is checking.
pub struct RuleContext<'a> {
    /// Concrete dotted path, e.g. `comments.0.comment`
    pub attribute: &'a str,
    pub value: Option<&'a Value>,
    pub params: &'a [String],
    /// Existence information of the node holding the attribute
    pub node: Option<&'a SyncContext>,
    pub catalog: &'a Catalog,
}

impl RuleContext<'_> {
    /// Last segment of the attribute path, the default column for store probes
    pub fn field(&self) -> &str {
        last_segment(self.attribute)
    }
}

/// A rule looked up by name in the [`RuleRegistry`].
#[async_trait]
pub trait CustomRule: Send + Sync {
    fn name(&self) -> &str;

    /// Key used for custom message lookup
    fn message_key(&self) -> &str {
        self.name()
    }

    /// Implicit rules also run when the attribute is absent
    fn implicit(&self) -> bool {
        false
    }

    /// Returns a message template when the check fails
    async fn check(
        &self,
        ctx: &RuleContext<'_>,
        repo: &mut dyn EntityRepository,
    ) -> SyncResult<Option<String>>;
}

/// `required` that only applies to nodes that are not yet stored.
///
/// Existing nodes may omit the field (partial update) but may not blank it.
pub struct ExistsRequired;

#[async_trait]
impl CustomRule for ExistsRequired {
    fn name(&self) -> &str {
        "required_exists"
    }

    fn message_key(&self) -> &str {
        "required"
    }

    fn implicit(&self) -> bool {
        true
    }

    async fn check(
        &self,
        ctx: &RuleContext<'_>,
        _repo: &mut dyn EntityRepository,
    ) -> SyncResult<Option<String>> {
        let exists = ctx.node.map_or(false, |node| node.exists);
        if !exists {
            return Ok(is_missing(ctx.value).then(|| REQUIRED.to_string()));
        }
        Ok(match ctx.value {
            None => None,
            Some(value) if is_blank(value) => Some(CANNOT_BE_EMPTY.to_string()),
            Some(_) => None,
        })
    }
}

/// `unique` that ignores the node's own row when the node is already stored.
///
/// Params: `entity_type[,column]`.
pub struct ExistsUnique;

#[async_trait]
impl CustomRule for ExistsUnique {
    fn name(&self) -> &str {
        "unique_exists"
    }

    fn message_key(&self) -> &str {
        "unique"
    }

    async fn check(
        &self,
        ctx: &RuleContext<'_>,
        repo: &mut dyn EntityRepository,
    ) -> SyncResult<Option<String>> {
        let Some(value) = ctx.value.filter(|v| !v.is_null()) else {
            return Ok(None);
        };
        let entity_type = ctx.params.first().ok_or_else(|| {
            SyncError::configuration(format!("Rule unique_exists on '{}' needs an entity type", ctx.attribute))
        })?;
        let model = ctx.catalog.get(entity_type)?;
        let column = ctx.params.get(1).map(String::as_str).unwrap_or(ctx.field());

        let ignore = ctx
            .node
            .filter(|node| node.exists && &node.entity_type == entity_type)
            .and_then(|node| node.pk);

        let taken = repo
            .value_exists(model.model(), column, value, ignore)
            .await?;
        Ok(taken.then(|| TAKEN.to_string()))
    }
}

/// Named custom rules available to the compiler and validator.
#[derive(Clone)]
pub struct RuleRegistry {
    rules: HashMap<String, Arc<dyn CustomRule>>,
}

impl Default for RuleRegistry {
    fn default() -> Self {
        let mut registry = Self::empty();
        registry.register(ExistsRequired);
        registry.register(ExistsUnique);
        registry
    }
}

impl RuleRegistry {
    /// A registry without the existence-conditional rules
    pub fn empty() -> Self {
        Self {
            rules: HashMap::new(),
        }
    }

    pub fn register<R: CustomRule + 'static>(&mut self, rule: R) -> &mut Self {
        self.rules.insert(rule.name().to_string(), Arc::new(rule));
        self
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn CustomRule>> {
        self.rules.get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.rules.contains_key(name)
    }
}

pub struct Validator<'a> {
    catalog: &'a Catalog,
    registry: &'a RuleRegistry,
}

impl<'a> Validator<'a> {
    pub fn new(catalog: &'a Catalog, registry: &'a RuleRegistry) -> Self {
        Self { catalog, registry }
    }

    /// Check the whole payload against a compiled rule set, collecting every
    /// failing attribute. Evaluation of one attribute stops at its first
    /// failing rule.
    pub async fn validate(
        &self,
        repo: &mut dyn EntityRepository,
        rules: &RuleSet,
        payload: &Payload,
        context: &SyncContext,
    ) -> SyncResult<ValidationErrors> {
        let data = Value::Object(payload.clone());
        let mut errors = ValidationErrors::new();

        for (pattern, pattern_rules) in rules.iter() {
            for attribute in expand(pattern, &data) {
                if !enclosing_present(&data, &attribute) {
                    continue;
                }
                if let Some(message) = self
                    .check_attribute(repo, rules, pattern, pattern_rules, &attribute, &data, context)
                    .await?
                {
                    errors.add(attribute, message);
                }
            }
        }

        debug!("Validation found {} failing attributes", errors.len());
        Ok(errors)
    }

    #[allow(clippy::too_many_arguments)]
    async fn check_attribute(
        &self,
        repo: &mut dyn EntityRepository,
        rules: &RuleSet,
        pattern: &str,
        pattern_rules: &[Rule],
        attribute: &str,
        data: &Value,
        context: &SyncContext,
    ) -> SyncResult<Option<String>> {
        let value = lookup(data, attribute);
        let nullable = pattern_rules.contains(&Rule::Nullable);
        let numeric = pattern_rules
            .iter()
            .any(|rule| matches!(rule, Rule::Numeric | Rule::Integer));
        let node = context.node_for_field(attribute);

        for rule in pattern_rules {
            if matches!(rule, Rule::Nullable) {
                continue;
            }

            let custom = match rule {
                Rule::Custom { name, .. } => Some(self.registry.get(name).ok_or_else(|| {
                    SyncError::configuration(format!("Unknown validation rule '{}'", name))
                })?),
                _ => None,
            };
            let implicit = match (rule, &custom) {
                (_, Some(custom)) => custom.implicit(),
                (Rule::Required | Rule::RequiredWithout { .. }, None) => true,
                _ => false,
            };
            if !implicit {
                match value {
                    None => continue,
                    Some(Value::Null) if nullable => continue,
                    Some(Value::String(s)) if nullable && s.trim().is_empty() => continue,
                    _ => {}
                }
            }

            let failure = match (rule, &custom) {
                (Rule::Custom { params, .. }, Some(custom)) => {
                    let ctx = RuleContext {
                        attribute,
                        value,
                        params,
                        node,
                        catalog: self.catalog,
                    };
                    custom
                        .check(&ctx, repo)
                        .await?
                        .map(|template| (custom.message_key().to_string(), template))
                }
                _ => self
                    .check_builtin(repo, rule, attribute, value, data, numeric)
                    .await?
                    .map(|template| (rule.name().to_string(), template)),
            };

            if let Some((key, template)) = failure {
                let template = rules.message(pattern, &key).unwrap_or(template.as_str());
                return Ok(Some(render(template, attribute, rule)));
            }
        }
        Ok(None)
    }

    async fn check_builtin(
        &self,
        repo: &mut dyn EntityRepository,
        rule: &Rule,
        attribute: &str,
        value: Option<&Value>,
        data: &Value,
        numeric: bool,
    ) -> SyncResult<Option<String>> {
        let failed = |ok: bool, template: &str| (!ok).then(|| template.to_string());

        Ok(match rule {
            Rule::Required => failed(!is_missing(value), REQUIRED),
            Rule::RequiredWithout { other } => {
                let sibling = lookup(data, &sibling_path(attribute, other));
                failed(
                    !is_missing(sibling) || !is_missing(value),
                    "The :attribute field is required when :values is not present.",
                )
            }
            Rule::Text => failed(
                matches!(value, Some(Value::String(_))),
                "The :attribute must be a string.",
            ),
            Rule::Integer => failed(
                value.map_or(false, |v| match v {
                    Value::Number(n) => n.is_i64() || n.is_u64(),
                    Value::String(s) => s.trim().parse::<i64>().is_ok(),
                    _ => false,
                }),
                "The :attribute must be an integer.",
            ),
            Rule::Numeric => failed(
                value.and_then(as_number).is_some(),
                "The :attribute must be a number.",
            ),
            Rule::Boolean => failed(
                value.map_or(false, |v| match v {
                    Value::Bool(_) => true,
                    Value::Number(n) => n.as_i64().map_or(false, |n| n == 0 || n == 1),
                    Value::String(s) => matches!(s.as_str(), "0" | "1" | "true" | "false"),
                    _ => false,
                }),
                "The :attribute field must be true or false.",
            ),
            Rule::Array => failed(
                matches!(value, Some(Value::Array(_))),
                "The :attribute must be an array.",
            ),
            Rule::Object => failed(
                matches!(value, Some(Value::Object(_))),
                "The :attribute must be an object.",
            ),
            Rule::Min { limit } => {
                let size = value.and_then(|v| size_of(v, numeric));
                failed(
                    size.map_or(false, |size| size >= *limit),
                    size_template("The :attribute must be at least :min", value, numeric),
                )
            }
            Rule::Max { limit } => {
                let size = value.and_then(|v| size_of(v, numeric));
                failed(
                    size.map_or(false, |size| size <= *limit),
                    size_template("The :attribute may not be greater than :max", value, numeric),
                )
            }
            Rule::Exists {
                entity_type,
                column,
            } => {
                let Some(value) = value.filter(|v| !v.is_array() && !v.is_object()) else {
                    return Ok(Some(INVALID.to_string()));
                };
                let model = self.model_for(entity_type, attribute)?;
                let column = column.as_deref().unwrap_or(last_segment(attribute));
                let found = repo.value_exists(model.model(), column, value, None).await?;
                failed(found, INVALID)
            }
            // Compiled rule sets carry `unique_exists` instead; this serves
            // rule sets built by hand
            Rule::Unique {
                entity_type,
                column,
            } => {
                let Some(value) = value else { return Ok(None) };
                let model = self.model_for(entity_type, attribute)?;
                let column = column.as_deref().unwrap_or(last_segment(attribute));
                let taken = repo.value_exists(model.model(), column, value, None).await?;
                failed(!taken, TAKEN)
            }
            Rule::Nullable | Rule::Custom { .. } => None,
        })
    }

    fn model_for(
        &self,
        entity_type: &Option<String>,
        attribute: &str,
    ) -> SyncResult<Arc<dyn crate::model::Syncable>> {
        let name = entity_type.as_deref().ok_or_else(|| {
            SyncError::configuration(format!(
                "Store rule on '{}' does not name an entity type",
                attribute
            ))
        })?;
        self.catalog.get(name)
    }
}

/// Expand a rule pattern against the payload. `*` matches every index of an
/// array and every key of an object; plain segments always expand, so absent
/// attributes still get checked by implicit rules.
fn expand(pattern: &str, data: &Value) -> Vec<String> {
    let mut current: Vec<(String, Option<&Value>)> = vec![(String::new(), Some(data))];
    for segment in pattern.split('.') {
        let mut next = Vec::new();
        for (prefix, value) in current {
            if segment == "*" {
                match value {
                    Some(Value::Array(items)) => {
                        for (index, item) in items.iter().enumerate() {
                            next.push((join(&prefix, &index.to_string()), Some(item)));
                        }
                    }
                    Some(Value::Object(map)) => {
                        for (key, item) in map {
                            next.push((join(&prefix, key), Some(item)));
                        }
                    }
                    _ => {}
                }
            } else {
                let child = value.and_then(|v| v.get(segment));
                next.push((join(&prefix, segment), child));
            }
        }
        current = next;
    }
    current.into_iter().map(|(path, _)| path).collect()
}

fn join(prefix: &str, segment: &str) -> String {
    crate::model::join_path(prefix, segment)
}

fn pointer(path: &str) -> String {
    path.split('.')
        .map(|segment| format!("/{}", segment.replace('~', "~0").replace('/', "~1")))
        .collect()
}

fn lookup<'v>(data: &'v Value, path: &str) -> Option<&'v Value> {
    data.pointer(&pointer(path))
}

/// Rules only apply when the object or list holding the attribute is present
fn enclosing_present(data: &Value, attribute: &str) -> bool {
    match attribute.rsplit_once('.') {
        None => true,
        Some((parent, _)) => matches!(
            lookup(data, parent),
            Some(Value::Object(_)) | Some(Value::Array(_))
        ),
    }
}

fn sibling_path(attribute: &str, other: &str) -> String {
    match attribute.rsplit_once('.') {
        Some((parent, _)) => format!("{}.{}", parent, other),
        None => other.to_string(),
    }
}

fn last_segment(attribute: &str) -> &str {
    attribute.rsplit('.').next().unwrap_or(attribute)
}

fn is_blank(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::Bool(b) => !b,
        Value::String(s) => s.trim().is_empty(),
        Value::Array(items) => items.is_empty(),
        Value::Object(_) | Value::Number(_) => false,
    }
}

fn is_missing(value: Option<&Value>) -> bool {
    match value {
        None | Some(Value::Null) => true,
        Some(Value::String(s)) => s.trim().is_empty(),
        Some(Value::Array(items)) => items.is_empty(),
        Some(_) => false,
    }
}

fn as_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }
}

fn size_of(value: &Value, numeric: bool) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) if numeric => s.trim().parse::<f64>().ok(),
        Value::String(s) => Some(s.chars().count() as f64),
        Value::Array(items) => Some(items.len() as f64),
        Value::Object(map) => Some(map.len() as f64),
        _ => None,
    }
}

fn size_template(base: &str, value: Option<&Value>, numeric: bool) -> &'static str {
    let min = base.contains(":min");
    match value {
        Some(Value::String(_)) if !numeric => {
            if min {
                "The :attribute must be at least :min characters."
            } else {
                "The :attribute may not be greater than :max characters."
            }
        }
        Some(Value::Array(_)) | Some(Value::Object(_)) => {
            if min {
                "The :attribute must have at least :min items."
            } else {
                "The :attribute may not have more than :max items."
            }
        }
        _ => {
            if min {
                "The :attribute must be at least :min."
            } else {
                "The :attribute may not be greater than :max."
            }
        }
    }
}

fn render(template: &str, attribute: &str, rule: &Rule) -> String {
    let mut message = template.replace(":attribute", attribute);
    match rule {
        Rule::Min { limit } => message = message.replace(":min", &limit.to_string()),
        Rule::Max { limit } => message = message.replace(":max", &limit.to_string()),
        Rule::RequiredWithout { other } => message = message.replace(":values", other),
        _ => {}
    }
    message
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::EntityModel;
    use crate::store::{MemoryStore, Store};
    use serde_json::json;

    fn catalog() -> Catalog {
        Catalog::new().with(EntityModel::new("post", "posts").fields(["title"]))
    }

    fn payload(value: Value) -> Payload {
        value.as_object().cloned().unwrap()
    }

    fn rules(entries: &[(&str, &str)]) -> RuleSet {
        let mut set = RuleSet::new();
        for (pattern, declared) in entries {
            set.extend(*pattern, Rule::parse_list(declared).unwrap());
        }
        set
    }

    async fn run(set: &RuleSet, data: Value, context: &SyncContext, store: &MemoryStore) -> ValidationErrors {
        let catalog = catalog();
        let registry = RuleRegistry::default();
        let mut tx = store.begin().await.unwrap();
        Validator::new(&catalog, &registry)
            .validate(&mut tx, set, &payload(data), context)
            .await
            .unwrap()
    }

    #[test]
    fn test_expand_wildcards() {
        let data = json!({"comments": [{"comment": "a"}, {"comment": "b"}], "title": "x"});
        assert_eq!(
            expand("comments.*.comment", &data),
            vec!["comments.0.comment", "comments.1.comment"]
        );
        assert_eq!(expand("title", &data), vec!["title"]);
        assert_eq!(expand("author.name", &data), vec!["author.name"]);
        assert!(expand("tags.*.name", &data).is_empty());
    }

    #[tokio::test]
    async fn test_collects_every_failure() {
        let store = MemoryStore::new();
        let set = rules(&[
            ("title", "required|string|max:5"),
            ("comments.*.comment", "required"),
        ]);
        let ctx = SyncContext::new("post", "id", None);
        let errors = run(
            &set,
            json!({"title": "Far too long", "comments": [{"comment": "ok"}, {"comment": null}]}),
            &ctx,
            &store,
        )
        .await;

        assert_eq!(errors.len(), 2);
        assert_eq!(
            errors.get("title").unwrap(),
            ["The title may not be greater than 5 characters."]
        );
        assert_eq!(
            errors.get("comments.1.comment").unwrap(),
            ["The comments.1.comment field is required."]
        );
    }

    #[tokio::test]
    async fn test_nullable_and_absent_values_skip_rules() {
        let store = MemoryStore::new();
        let set = rules(&[("notes", "nullable|string"), ("score", "integer")]);
        let ctx = SyncContext::new("post", "id", None);
        assert!(run(&set, json!({"notes": null}), &ctx, &store).await.is_empty());
        let errors = run(&set, json!({"score": "abc"}), &ctx, &store).await;
        assert!(errors.contains("score"));
    }

    #[tokio::test]
    async fn test_rules_under_absent_objects_are_skipped() {
        let store = MemoryStore::new();
        let set = rules(&[("author.name", "required")]);
        let ctx = SyncContext::new("post", "id", None);
        assert!(run(&set, json!({}), &ctx, &store).await.is_empty());
        assert!(run(&set, json!({"author": {}}), &ctx, &store)
            .await
            .contains("author.name"));
    }

    #[tokio::test]
    async fn test_required_exists_allows_partial_update() {
        let store = MemoryStore::new();
        let mut set = RuleSet::new();
        set.push("title", Rule::custom("required_exists", vec![]));

        let new = SyncContext::new("post", "id", None);
        assert!(run(&set, json!({}), &new, &store).await.contains("title"));

        let existing = SyncContext::new("post", "id", Some(1));
        assert!(run(&set, json!({}), &existing, &store).await.is_empty());
        let errors = run(&set, json!({"title": ""}), &existing, &store).await;
        assert_eq!(
            errors.get("title").unwrap(),
            ["The title field cannot be empty."]
        );
    }

    #[tokio::test]
    async fn test_unique_exists_ignores_own_row() {
        let store = MemoryStore::new();
        let id = store.seed("posts", json!({"title": "Taken"}));
        let mut set = RuleSet::new();
        set.push(
            "title",
            Rule::custom("unique_exists", vec!["post".to_string()]),
        );

        let new = SyncContext::new("post", "id", None);
        let errors = run(&set, json!({"title": "Taken"}), &new, &store).await;
        assert_eq!(
            errors.get("title").unwrap(),
            ["The title has already been taken."]
        );

        let itself = SyncContext::new("post", "id", Some(id));
        assert!(run(&set, json!({"title": "Taken"}), &itself, &store)
            .await
            .is_empty());
    }

    #[tokio::test]
    async fn test_exists_and_custom_messages() {
        let store = MemoryStore::new();
        store.seed("posts", json!({"title": "Real"}));
        let mut set = rules(&[("post.id", "exists:post,id"), ("body", "required_without:title")]);
        set.set_message("body.required_without", "Write something in :attribute.");
        let ctx = SyncContext::new("comment", "id", None);

        let errors = run(&set, json!({"post": {"id": 9}}), &ctx, &store).await;
        assert_eq!(
            errors.get("post.id").unwrap(),
            ["The selected post.id is invalid."]
        );
        assert_eq!(
            errors.get("body").unwrap(),
            ["Write something in body."]
        );
        assert!(run(&set, json!({"post": {"id": 1}, "title": "t"}), &ctx, &store)
            .await
            .is_empty());
    }

    #[tokio::test]
    async fn test_unknown_custom_rule_is_configuration_error() {
        let store = MemoryStore::new();
        let mut set = RuleSet::new();
        set.push("title", Rule::custom("slug_format", vec![]));
        let catalog = catalog();
        let registry = RuleRegistry::default();
        let mut tx = store.begin().await.unwrap();
        let result = Validator::new(&catalog, &registry)
            .validate(
                &mut tx,
                &set,
                &payload(json!({"title": "x"})),
                &SyncContext::new("post", "id", None),
            )
            .await;
        assert!(matches!(result, Err(SyncError::Configuration(_))));
    }

    #[tokio::test]
    async fn test_blank_nullable_keys_skip_exists() {
        let store = MemoryStore::new();
        let set = rules(&[("comments.*.id", "nullable|exists:post,id")]);
        let ctx = SyncContext::new("post", "id", None);
        let data = json!({"comments": [{"id": null}, {"id": ""}, {"id": 7}]});

        let errors = run(&set, data, &ctx, &store).await;
        assert_eq!(errors.len(), 1);
        assert_eq!(
            errors.get("comments.2.id").unwrap(),
            ["The selected comments.2.id is invalid."]
        );
    }

    #[tokio::test]
    async fn test_plain_unique_in_hand_built_rules() {
        let store = MemoryStore::new();
        let id = store.seed("posts", json!({"title": "Taken"}));
        let set = rules(&[("title", "unique:post")]);

        // Unlike unique_exists, the plain rule never excludes the node's own row
        let itself = SyncContext::new("post", "id", Some(id));
        let errors = run(&set, json!({"title": "Taken"}), &itself, &store).await;
        assert_eq!(
            errors.get("title").unwrap(),
            ["The title has already been taken."]
        );
        assert!(run(&set, json!({"title": "Free"}), &itself, &store)
            .await
            .is_empty());
    }
}
