//! In-memory hierarchy built from flat catalog rows.
//!
//! Each tree node owns a name, the images filed directly under it and an
//! ordered set of child nodes. Children keep first-insertion order, so the
//! rendered page is stable as long as the catalog listing is.

use imgsrv_db::Image;
use std::collections::hash_map::Entry;
use std::collections::HashMap;

#[derive(Debug, Default)]
pub struct Tree {
    name: String,
    images: Vec<Image>,
    children: HashMap<String, Tree>,
    order: Vec<String>,
}

impl Tree {
    pub fn new() -> Self {
        Self::default()
    }

    /// Index a result set, preserving its order.
    pub fn build(images: impl IntoIterator<Item = Image>) -> Self {
        let mut tree = Self::new();
        for img in images {
            tree.put(img);
        }
        tree
    }

    fn named(name: &str) -> Self {
        Self {
            name: name.to_string(),
            ..Self::default()
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn images(&self) -> &[Image] {
        &self.images
    }

    pub fn has_children(&self) -> bool {
        !self.order.is_empty()
    }

    /// Child nodes in first-insertion order.
    pub fn children(&self) -> impl Iterator<Item = &Tree> {
        self.order.iter().filter_map(|name| self.children.get(name))
    }

    /// File an image under its classification path. Empty segments (an image
    /// without a category or group) are skipped, so the image attaches to the
    /// deepest non-empty level.
    pub fn put(&mut self, img: Image) {
        let levels = [
            img.driver.clone(),
            img.category.clone(),
            img.group.clone(),
        ];

        let mut node = self;
        for level in levels.iter().filter(|l| !l.is_empty()) {
            node = node.child(level);
        }
        node.images.push(img);
    }

    /// Pre-order traversal: the node itself, then children in insertion
    /// order. Deterministic for a fixed insertion order.
    pub fn walk<'a>(&'a self, visit: &mut impl FnMut(&'a Tree)) {
        visit(self);
        for child in self.children() {
            child.walk(visit);
        }
    }

    fn child(&mut self, name: &str) -> &mut Tree {
        match self.children.entry(name.to_string()) {
            Entry::Occupied(e) => e.into_mut(),
            Entry::Vacant(e) => {
                self.order.push(name.to_string());
                e.insert(Tree::named(name))
            }
        }
    }
}
