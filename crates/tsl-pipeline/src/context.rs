//! Per-run state threaded through pipeline steps.

use std::collections::HashMap;
use std::sync::Arc;

use tsl_model::{CertPool, Tsl};

use crate::fetch::{FetchOptions, TslFilters, PREFER_XML_KEY};
use crate::tree::TslTree;

/// State passed from step to step.
///
/// `trees` is authoritative. `tsls` is the flat legacy projection of the
/// same documents: every tree added through [`Context::add_tree`] also
/// pushes each of its documents, in traversal order, onto `tsls`. Entries of
/// `tsls` may be `None`; consumers skip them.
///
/// Documents are shared behind [`Arc`] and never mutated, so cloning a
/// `Context` yields fully independent stacks, scratch map, and pool.
#[derive(Debug, Clone, Default)]
pub struct Context {
    pub trees: Vec<TslTree>,
    pub tsls: Vec<Option<Arc<Tsl>>>,
    pub cert_pool: Option<CertPool>,
    pub fetch_options: Option<FetchOptions>,
    pub data: HashMap<String, serde_json::Value>,
}

impl Context {
    pub fn new() -> Self {
        Self::default()
    }

    /// Deep copy; mutations of either side never reach the other.
    pub fn clone_isolated(&self) -> Context {
        self.clone()
    }

    /// The fetch policy, created with defaults on first use.
    pub fn ensure_fetch_options(&mut self) -> &mut FetchOptions {
        self.fetch_options.get_or_insert_with(FetchOptions::default)
    }

    /// The certificate pool, created empty on first use.
    pub fn ensure_cert_pool(&mut self) -> &mut CertPool {
        self.cert_pool.get_or_insert_with(CertPool::new)
    }

    /// Current fetch policy, or the defaults without storing them.
    pub fn fetch_options(&self) -> FetchOptions {
        self.fetch_options.clone().unwrap_or_default()
    }

    /// Push a tree and project its documents onto the legacy stack.
    pub fn add_tree(&mut self, tree: TslTree) {
        tree.traverse(|tsl| self.tsls.push(Some(Arc::clone(tsl))));
        self.trees.push(tree);
    }

    /// Add a document and its resolved references. `None` is ignored.
    pub fn add_document(&mut self, tsl: Option<Arc<Tsl>>) -> &mut Self {
        if let Some(tsl) = tsl {
            self.add_tree(TslTree::new(Some(tsl)));
        }
        self
    }

    /// Swap every document for its replacement, paired by position with
    /// [`Context::documents`]. Trees keep their shape: each replacement takes
    /// over the references of the document it replaces. Documents that are
    /// only on the legacy stack become single-node trees.
    pub fn replace_documents(&mut self, replacements: Vec<Arc<Tsl>>) {
        let documents = self.documents();
        let by_identity: HashMap<*const Tsl, Arc<Tsl>> =
            documents.iter().map(Arc::as_ptr).zip(replacements).collect();

        let mut roots: Vec<Arc<Tsl>> = self
            .trees
            .iter()
            .filter_map(TslTree::root_tsl)
            .map(|root| rebuild(root, &by_identity))
            .collect();
        roots.extend(
            documents
                .iter()
                .filter(|tsl| !self.trees.iter().any(|tree| tree.contains(tsl)))
                .filter_map(|tsl| by_identity.get(&Arc::as_ptr(tsl)).cloned()),
        );

        self.trees.clear();
        self.tsls.clear();
        for root in roots {
            self.add_document(Some(root));
        }
    }

    /// Non-empty entries of the legacy stack.
    pub fn documents(&self) -> Vec<Arc<Tsl>> {
        self.tsls.iter().flatten().cloned().collect()
    }

    /// Whether any tree or legacy entry holds a document.
    pub fn has_documents(&self) -> bool {
        self.trees.iter().any(|t| !t.is_empty()) || self.tsls.iter().any(Option::is_some)
    }

    pub fn set(&mut self, key: impl Into<String>, value: serde_json::Value) {
        self.data.insert(key.into(), value);
    }

    pub fn get(&self, key: &str) -> Option<&serde_json::Value> {
        self.data.get(key)
    }

    /// `true` only for a stored JSON `true`.
    pub fn get_bool(&self, key: &str) -> bool {
        self.data
            .get(key)
            .and_then(serde_json::Value::as_bool)
            .unwrap_or(false)
    }

    pub fn filters(&self) -> TslFilters {
        TslFilters::from_data(&self.data)
    }

    pub fn prefer_xml(&self) -> bool {
        self.get_bool(PREFER_XML_KEY)
    }
}

/// Copy of `original` with replaced documents substituted throughout its
/// reference subtree.
fn rebuild(original: &Arc<Tsl>, replacements: &HashMap<*const Tsl, Arc<Tsl>>) -> Arc<Tsl> {
    let referenced = original
        .referenced
        .iter()
        .map(|child| rebuild(child, replacements))
        .collect();
    let base = replacements.get(&Arc::as_ptr(original)).unwrap_or(original);
    Arc::new(Tsl {
        referenced,
        ..Tsl::clone(base)
    })
}
