//! HTML querying for scripts.
//!
//! Thin facade over `scraper`. Handles are cheap to clone: a [`Document`]
//! shares its parsed tree behind an `Rc`, and a [`Selection`] stores node
//! ids into that tree rather than borrowed references, which keeps the
//! handles free of lifetimes so the engine bindings can own them.

use std::collections::HashSet;
use std::rc::Rc;

use ego_tree::NodeId;
use scraper::{ElementRef, Html, Selector};

use crate::errors::{Result, ScriptHostError};

/// A parsed HTML document.
#[derive(Debug, Clone)]
pub struct Document {
    tree: Rc<Html>,
}

/// An ordered set of element nodes from one document.
#[derive(Debug, Clone)]
pub struct Selection {
    tree: Rc<Html>,
    nodes: Vec<NodeId>,
}

fn parse_selector(css: &str) -> Result<Selector> {
    Selector::parse(css).map_err(|e| ScriptHostError::Selector(format!("{css}: {e}")))
}

impl Document {
    /// Parsing never fails; malformed markup is repaired the way browsers
    /// repair it.
    pub fn parse(html: &str) -> Self {
        Document {
            tree: Rc::new(Html::parse_document(html)),
        }
    }

    /// All elements matching `css`, in document order.
    pub fn select(&self, css: &str) -> Result<Selection> {
        let selector = parse_selector(css)?;
        let nodes = self.tree.select(&selector).map(|e| e.id()).collect();
        Ok(Selection {
            tree: Rc::clone(&self.tree),
            nodes,
        })
    }

    /// First element matching `css`; "no element found" if none does.
    pub fn select_one(&self, css: &str) -> Result<Selection> {
        let selection = self.select(css)?;
        selection.first_or_not_found()
    }

    pub fn text(&self) -> String {
        self.tree
            .root_element()
            .text()
            .collect::<Vec<_>>()
            .join("")
    }

    /// Full serialized markup of the document.
    pub fn html(&self) -> String {
        self.tree.html()
    }

    /// The root `<html>` element as a selection.
    pub fn root(&self) -> Selection {
        Selection {
            tree: Rc::clone(&self.tree),
            nodes: vec![self.tree.root_element().id()],
        }
    }
}

impl Selection {
    fn with_nodes(&self, nodes: Vec<NodeId>) -> Selection {
        Selection {
            tree: Rc::clone(&self.tree),
            nodes,
        }
    }

    fn element(&self, id: NodeId) -> Option<ElementRef<'_>> {
        self.tree.tree.get(id).and_then(ElementRef::wrap)
    }

    fn first_element(&self) -> Option<ElementRef<'_>> {
        self.nodes.first().and_then(|id| self.element(*id))
    }

    fn first_or_not_found(self) -> Result<Selection> {
        if self.nodes.is_empty() {
            return Err(ScriptHostError::ElementNotFound(
                "no element found".to_string(),
            ));
        }
        let first = self.nodes[0];
        Ok(self.with_nodes(vec![first]))
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Matching descendants of every node in the selection, de-duplicated,
    /// in discovery order.
    pub fn select(&self, css: &str) -> Result<Selection> {
        let selector = parse_selector(css)?;
        let mut seen = HashSet::new();
        let mut nodes = Vec::new();
        for id in &self.nodes {
            let Some(element) = self.element(*id) else { continue };
            for found in element.select(&selector) {
                if seen.insert(found.id()) {
                    nodes.push(found.id());
                }
            }
        }
        Ok(self.with_nodes(nodes))
    }

    pub fn select_one(&self, css: &str) -> Result<Selection> {
        let selection = self.select(css)?;
        selection.first_or_not_found()
    }

    /// Attribute of the first node.
    pub fn attr(&self, name: &str) -> Option<String> {
        self.first_element()
            .and_then(|e| e.value().attr(name))
            .map(str::to_string)
    }

    /// Concatenated text of the first node's subtree.
    pub fn text(&self) -> String {
        self.first_element()
            .map(|e| e.text().collect::<Vec<_>>().join(""))
            .unwrap_or_default()
    }

    /// Inner HTML of the first node.
    pub fn html(&self) -> String {
        self.first_element()
            .map(|e| e.inner_html())
            .unwrap_or_default()
    }

    pub fn first(&self) -> Selection {
        self.with_nodes(self.nodes.first().copied().into_iter().collect())
    }

    /// The i-th node as a single-element selection; negative indices count
    /// from the end. Out of range yields an empty selection.
    pub fn eq(&self, index: isize) -> Selection {
        let len = self.nodes.len() as isize;
        let idx = if index < 0 { len + index } else { index };
        if idx < 0 || idx >= len {
            return self.with_nodes(Vec::new());
        }
        self.with_nodes(vec![self.nodes[idx as usize]])
    }

    /// Parent element of each node, de-duplicated.
    pub fn parent(&self) -> Selection {
        let mut seen = HashSet::new();
        let mut nodes = Vec::new();
        for id in &self.nodes {
            let Some(element) = self.element(*id) else { continue };
            if let Some(parent) = element.parent().and_then(ElementRef::wrap) {
                if seen.insert(parent.id()) {
                    nodes.push(parent.id());
                }
            }
        }
        self.with_nodes(nodes)
    }

    /// Element children of every node, in order.
    pub fn children(&self) -> Selection {
        let mut nodes = Vec::new();
        for id in &self.nodes {
            let Some(element) = self.element(*id) else { continue };
            for child in element.children().filter_map(ElementRef::wrap) {
                nodes.push(child.id());
            }
        }
        self.with_nodes(nodes)
    }

    /// Next sibling element of each node.
    pub fn next(&self) -> Selection {
        self.siblings(|e| e.next_siblings().filter_map(ElementRef::wrap).next())
    }

    /// Previous sibling element of each node.
    pub fn prev(&self) -> Selection {
        self.siblings(|e| e.prev_siblings().filter_map(ElementRef::wrap).next())
    }

    fn siblings<F>(&self, pick: F) -> Selection
    where
        F: for<'a> Fn(ego_tree::NodeRef<'a, scraper::Node>) -> Option<ElementRef<'a>>,
    {
        let mut seen = HashSet::new();
        let mut nodes = Vec::new();
        for id in &self.nodes {
            let Some(node) = self.tree.tree.get(*id) else { continue };
            if let Some(sib) = pick(node) {
                if seen.insert(sib.id()) {
                    nodes.push(sib.id());
                }
            }
        }
        self.with_nodes(nodes)
    }

    /// Iterate the selection as single-node selections.
    pub fn iter(&self) -> impl Iterator<Item = Selection> + '_ {
        self.nodes.iter().map(|id| self.with_nodes(vec![*id]))
    }
}
