//! Reference tree: resolved TSLs connected by their pointer edges.
//!
//! Trees are built once from a root document's `referenced` list and never
//! mutated afterwards. A node without a document is an inert placeholder: it
//! has no children and contributes nothing to traversal, counting, or
//! flattening.

use std::sync::Arc;

use tsl_model::Tsl;

#[derive(Debug, Clone, Default)]
pub struct TreeNode {
    pub tsl: Option<Arc<Tsl>>,
    pub children: Vec<TreeNode>,
}

impl TreeNode {
    /// Build a node and its subtree from `tsl.referenced`.
    pub fn new(tsl: Arc<Tsl>) -> Self {
        let children = tsl.referenced.iter().cloned().map(TreeNode::new).collect();
        Self {
            tsl: Some(tsl),
            children,
        }
    }

    /// Longest path to a leaf; a leaf has depth 0.
    pub fn depth(&self) -> usize {
        if self.tsl.is_none() {
            return 0;
        }
        self.children
            .iter()
            .filter(|c| c.tsl.is_some())
            .map(|c| c.depth() + 1)
            .max()
            .unwrap_or(0)
    }

    fn visit<'a>(&'a self, depth: usize, limit: Option<usize>, f: &mut dyn FnMut(&'a Arc<Tsl>, usize)) {
        let Some(tsl) = &self.tsl else {
            return;
        };
        f(tsl, depth);
        if limit.is_some_and(|max| depth >= max) {
            return;
        }
        for child in &self.children {
            child.visit(depth + 1, limit, f);
        }
    }
}

/// A resolved reference tree rooted at one document.
#[derive(Debug, Clone, Default)]
pub struct TslTree {
    pub root: Option<TreeNode>,
}

impl TslTree {
    pub fn new(tsl: Option<Arc<Tsl>>) -> Self {
        Self {
            root: tsl.map(TreeNode::new),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.root_tsl().is_none()
    }

    pub fn root_tsl(&self) -> Option<&Arc<Tsl>> {
        self.root.as_ref()?.tsl.as_ref()
    }

    pub fn depth(&self) -> usize {
        self.root.as_ref().map(TreeNode::depth).unwrap_or(0)
    }

    /// Visit every document depth-first, pre-order, with its depth.
    pub fn walk<'a>(&'a self, mut f: impl FnMut(&'a Arc<Tsl>, usize)) {
        if let Some(root) = &self.root {
            root.visit(0, None, &mut f);
        }
    }

    /// Visit every document depth-first, pre-order.
    pub fn traverse<'a>(&'a self, mut f: impl FnMut(&'a Arc<Tsl>)) {
        self.walk(|tsl, _| f(tsl));
    }

    pub fn count(&self) -> usize {
        let mut n = 0;
        self.walk(|_, _| n += 1);
        n
    }

    /// All documents in traversal order.
    pub fn to_vec(&self) -> Vec<Arc<Tsl>> {
        self.flatten(None)
    }

    /// Documents up to `max_depth` levels below the root (`None` = all).
    pub fn flatten(&self, max_depth: Option<usize>) -> Vec<Arc<Tsl>> {
        let mut out = Vec::new();
        if let Some(root) = &self.root {
            root.visit(0, max_depth, &mut |tsl, _| out.push(Arc::clone(tsl)));
        }
        out
    }

    /// First document in traversal order loaded from `source`.
    pub fn find_by_source(&self, source: &str) -> Option<&Arc<Tsl>> {
        let mut found = None;
        self.traverse(|tsl| {
            if found.is_none() && tsl.source == source {
                found = Some(tsl);
            }
        });
        found
    }

    /// Whether this exact document (by identity) is in the tree.
    pub fn contains(&self, tsl: &Arc<Tsl>) -> bool {
        let mut found = false;
        self.traverse(|t| found |= Arc::ptr_eq(t, tsl));
        found
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn doc(source: &str) -> Tsl {
        Tsl {
            source: source.into(),
            ..Default::default()
        }
    }

    /// root -> (ref1 -> ref3), ref2
    fn sample() -> TslTree {
        let ref1 = doc("ref1.xml").with_referenced(vec![Arc::new(doc("ref3.xml"))]);
        let root = doc("root.xml").with_referenced(vec![Arc::new(ref1), Arc::new(doc("ref2.xml"))]);
        TslTree::new(Some(Arc::new(root)))
    }

    #[test]
    fn builds_children_from_references() {
        let tree = sample();
        let root = tree.root.as_ref().unwrap();
        assert_eq!(root.children.len(), 2);
        assert_eq!(tree.count(), 4);
        assert_eq!(tree.depth(), 2);
    }

    #[test]
    fn traversal_is_preorder() {
        let tree = sample();
        let sources: Vec<_> = tree.to_vec().iter().map(|t| t.source.clone()).collect();
        assert_eq!(sources, ["root.xml", "ref1.xml", "ref3.xml", "ref2.xml"]);

        let mut depths = Vec::new();
        tree.walk(|_, d| depths.push(d));
        assert_eq!(depths, [0, 1, 2, 1]);
    }

    #[test]
    fn flatten_respects_depth_limit() {
        let tree = sample();
        assert_eq!(tree.flatten(Some(0)).len(), 1);
        assert_eq!(tree.flatten(Some(1)).len(), 3);
        assert_eq!(tree.flatten(Some(5)).len(), 4);
    }

    #[test]
    fn find_and_contains() {
        let tree = sample();
        assert_eq!(tree.find_by_source("ref2.xml").unwrap().source, "ref2.xml");
        assert!(tree.find_by_source("missing.xml").is_none());

        let root = Arc::clone(tree.root_tsl().unwrap());
        assert!(tree.contains(&root));
        assert!(!tree.contains(&Arc::new(doc("root.xml"))));
    }

    #[test]
    fn empty_tree_is_inert() {
        let tree = TslTree::default();
        assert!(tree.is_empty());
        assert_eq!(tree.count(), 0);
        assert_eq!(tree.depth(), 0);
        assert!(tree.to_vec().is_empty());
        assert!(tree.find_by_source("root.xml").is_none());
    }

    #[test]
    fn placeholder_nodes_contribute_nothing() {
        let tree = TslTree {
            root: Some(TreeNode {
                tsl: Some(Arc::new(doc("root.xml"))),
                children: vec![TreeNode::default(), TreeNode::default()],
            }),
        };
        assert_eq!(tree.count(), 1);
        assert_eq!(tree.depth(), 0);

        let placeholder_root = TslTree {
            root: Some(TreeNode::default()),
        };
        assert_eq!(placeholder_root.count(), 0);
        assert!(placeholder_root.is_empty());
    }
}
