use std::collections::BTreeMap;

/// Which relations (and sub-relations) take part in one sync call.
///
/// Built from dotted paths: `["comments.author", "comments", "categories"]`
/// yields `comments -> { author }` and `categories` as a leaf. A node with no
/// children is a leaf.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RelationPathTree {
    children: BTreeMap<String, RelationPathTree>,
}

impl RelationPathTree {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a list of dotted relation paths, merging shared prefixes.
    pub fn parse<I, S>(paths: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut tree = Self::new();
        for path in paths {
            tree.insert(path.as_ref());
        }
        tree
    }

    /// Insert one dotted path. Empty segments are ignored.
    pub fn insert(&mut self, path: &str) {
        let mut node = self;
        for segment in path.split('.').map(str::trim).filter(|s| !s.is_empty()) {
            node = node.children.entry(segment.to_string()).or_default();
        }
    }

    pub fn is_leaf(&self) -> bool {
        self.children.is_empty()
    }

    pub fn contains(&self, relation: &str) -> bool {
        self.children.contains_key(relation)
    }

    pub fn get(&self, relation: &str) -> Option<&RelationPathTree> {
        self.children.get(relation)
    }

    /// Top-level relations with their subtrees
    pub fn relations(&self) -> impl Iterator<Item = (&str, &RelationPathTree)> {
        self.children.iter().map(|(name, tree)| (name.as_str(), tree))
    }

    /// Flatten back into dotted leaf paths
    pub fn to_paths(&self) -> Vec<String> {
        let mut paths = Vec::new();
        for (name, subtree) in &self.children {
            if subtree.is_leaf() {
                paths.push(name.clone());
            } else {
                paths.extend(
                    subtree
                        .to_paths()
                        .into_iter()
                        .map(|rest| format!("{}.{}", name, rest)),
                );
            }
        }
        paths
    }
}

impl<S: AsRef<str>> FromIterator<S> for RelationPathTree {
    fn from_iter<T: IntoIterator<Item = S>>(iter: T) -> Self {
        Self::parse(iter)
    }
}
