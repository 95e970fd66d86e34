use crate::model::Id;
use std::collections::BTreeMap;

/// Per-node existence information, kept alongside (never inside) the payload.
#[derive(Debug, Clone, PartialEq)]
pub struct SyncContext {
    /// Whether the node is already stored
    pub exists: bool,
    pub pk: Option<Id>,
    pub pk_name: String,
    pub entity_type: String,
    children: BTreeMap<String, ContextNode>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ContextNode {
    Single(Box<SyncContext>),
    Many(Vec<SyncContext>),
}

impl SyncContext {
    pub fn new(entity_type: impl Into<String>, pk_name: impl Into<String>, pk: Option<Id>) -> Self {
        Self {
            exists: pk.is_some(),
            pk,
            pk_name: pk_name.into(),
            entity_type: entity_type.into(),
            children: BTreeMap::new(),
        }
    }

    pub fn insert_single(&mut self, relation: impl Into<String>, context: SyncContext) {
        self.children
            .insert(relation.into(), ContextNode::Single(Box::new(context)));
    }

    pub fn insert_many(&mut self, relation: impl Into<String>, contexts: Vec<SyncContext>) {
        self.children
            .insert(relation.into(), ContextNode::Many(contexts));
    }

    pub fn child(&self, relation: &str) -> Option<&ContextNode> {
        self.children.get(relation)
    }

    /// Context of the node holding the field at a concrete dotted path.
    ///
    /// `comments.1.comment` resolves to the context of the second comment;
    /// a root field such as `title` resolves to `self`.
    pub fn node_for_field(&self, path: &str) -> Option<&SyncContext> {
        let segments: Vec<&str> = path.split('.').collect();
        let (_, parents) = segments.split_last()?;

        let mut node = self;
        let mut iter = parents.iter();
        while let Some(segment) = iter.next() {
            node = match node.children.get(*segment)? {
                ContextNode::Single(child) => child.as_ref(),
                ContextNode::Many(children) => {
                    let index: usize = iter.next()?.parse().ok()?;
                    children.get(index)?
                }
            };
        }
        Some(node)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> SyncContext {
        let mut root = SyncContext::new("post", "id", Some(1));
        let mut first = SyncContext::new("comment", "id", Some(4));
        first.insert_single("author", SyncContext::new("author", "id", Some(2)));
        root.insert_many("comments", vec![first, SyncContext::new("comment", "id", None)]);
        root
    }

    #[test]
    fn test_root_field_resolves_to_root() {
        let ctx = sample();
        let node = ctx.node_for_field("title").unwrap();
        assert_eq!(node.entity_type, "post");
        assert!(node.exists);
    }

    #[test]
    fn test_nested_fields_resolve() {
        let ctx = sample();
        let second = ctx.node_for_field("comments.1.comment").unwrap();
        assert_eq!(second.entity_type, "comment");
        assert!(!second.exists);

        let author = ctx.node_for_field("comments.0.author.name").unwrap();
        assert_eq!(author.entity_type, "author");
        assert_eq!(author.pk, Some(2));
    }

    #[test]
    fn test_unknown_paths_resolve_to_none() {
        let ctx = sample();
        assert!(ctx.node_for_field("comments.5.comment").is_none());
        assert!(ctx.node_for_field("comments.x.comment").is_none());
        assert!(ctx.node_for_field("tags.0.name").is_none());
    }
}
