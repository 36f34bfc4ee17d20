//! Concrete syntax tree.
//!
//! The tree is an arena: every node lives in [`CstTree`] and is addressed by a
//! [`CstNodeId`]. A node's `children` vector is the only ownership path; the
//! parent index is a back-pointer that is rebuilt on hydration and never
//! serialized.
//!
//! Three node kinds exist:
//!
//! - **Root**: node 0, spans the whole source text.
//! - **Composite**: one rule invocation. Its span is derived from its first
//!   and last non-hidden descendant leaves and cached on first use.
//! - **Leaf**: one consumed token, possibly hidden (whitespace, comments).

pub mod builder;

use std::sync::OnceLock;

use serde::{Deserialize, Serialize};

use crate::ast::AstNodeId;
use crate::grammar::{ElementId, TokenType};
use crate::text::{LineIndex, Range, Span};

pub use builder::CstBuilder;

/// Index of a node in a [`CstTree`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CstNodeId(pub(crate) u32);

impl CstNodeId {
    /// Arena index.
    #[must_use]
    pub const fn index(self) -> usize {
        self.0 as usize
    }
}

/// A token leaf.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Leaf {
    /// Byte offset in the source
    pub offset: usize,
    /// Byte length
    pub length: usize,
    /// Whitespace or comment
    pub hidden: bool,
    /// Token type that matched
    pub token_type: TokenType,
}

/// Node payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum CstKind {
    /// The tree root
    Root {
        /// Child nodes in source order
        children: Vec<CstNodeId>,
    },
    /// One rule invocation
    Composite {
        /// Child nodes in source order
        children: Vec<CstNodeId>,
    },
    /// One token
    Leaf(Leaf),
}

/// A node in the arena.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CstNode {
    #[serde(skip)]
    parent: Option<CstNodeId>,
    kind: CstKind,
    feature: Option<ElementId>,
    ast_node: Option<AstNodeId>,
    #[serde(skip)]
    span: OnceLock<Option<Span>>,
}

impl CstNode {
    fn new(kind: CstKind, feature: Option<ElementId>) -> Self {
        Self {
            parent: None,
            kind,
            feature,
            ast_node: None,
            span: OnceLock::new(),
        }
    }

    /// Node payload.
    #[must_use]
    pub const fn kind(&self) -> &CstKind {
        &self.kind
    }
}

/// Concrete syntax tree of one source text.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CstTree {
    text: String,
    nodes: Vec<CstNode>,
    #[serde(skip)]
    lines: OnceLock<LineIndex>,
}

impl CstTree {
    const ROOT: CstNodeId = CstNodeId(0);

    /// A tree holding only an empty root over `text`.
    #[must_use]
    pub fn new(text: &str) -> Self {
        Self {
            text: text.to_string(),
            nodes: vec![CstNode::new(
                CstKind::Root {
                    children: Vec::new(),
                },
                None,
            )],
            lines: OnceLock::new(),
        }
    }

    /// The root node.
    #[must_use]
    pub const fn root(&self) -> CstNodeId {
        Self::ROOT
    }

    /// The full source text.
    #[must_use]
    pub fn text(&self) -> &str {
        &self.text
    }

    /// Number of arena slots, including nodes detached by pruning.
    #[must_use]
    pub fn arena_len(&self) -> usize {
        self.nodes.len()
    }

    /// A node by id.
    #[must_use]
    pub fn node(&self, id: CstNodeId) -> &CstNode {
        &self.nodes[id.index()]
    }

    /// Parent of `id`; `None` for the root and for detached nodes.
    #[must_use]
    pub fn parent(&self, id: CstNodeId) -> Option<CstNodeId> {
        self.node(id).parent
    }

    /// Children of `id`; empty for leaves.
    #[must_use]
    pub fn children(&self, id: CstNodeId) -> &[CstNodeId] {
        match &self.node(id).kind {
            CstKind::Root { children } | CstKind::Composite { children } => children,
            CstKind::Leaf(_) => &[],
        }
    }

    /// Leaf payload of `id`.
    #[must_use]
    pub fn leaf(&self, id: CstNodeId) -> Option<&Leaf> {
        match &self.node(id).kind {
            CstKind::Leaf(leaf) => Some(leaf),
            _ => None,
        }
    }

    /// Returns `true` for leaves.
    #[must_use]
    pub fn is_leaf(&self, id: CstNodeId) -> bool {
        self.leaf(id).is_some()
    }

    /// Returns `true` for hidden leaves.
    #[must_use]
    pub fn is_hidden(&self, id: CstNodeId) -> bool {
        self.leaf(id).is_some_and(|leaf| leaf.hidden)
    }

    /// Grammar element that produced `id`.
    #[must_use]
    pub fn feature(&self, id: CstNodeId) -> Option<ElementId> {
        self.node(id).feature
    }

    /// AST node associated with `id`.
    #[must_use]
    pub fn ast_node(&self, id: CstNodeId) -> Option<AstNodeId> {
        self.node(id).ast_node
    }

    /// Byte span of `id`. Composites span their non-hidden descendants and
    /// have no span when they contain only hidden leaves.
    #[must_use]
    pub fn span(&self, id: CstNodeId) -> Option<Span> {
        let node = self.node(id);
        *node.span.get_or_init(|| match &node.kind {
            CstKind::Leaf(leaf) => Some(Span {
                offset: leaf.offset,
                end: leaf.offset + leaf.length,
            }),
            CstKind::Root { .. } => Some(Span {
                offset: 0,
                end: self.text.len(),
            }),
            CstKind::Composite { children } => {
                let first = children.iter().find_map(|c| self.visible_span(*c))?;
                let last = children.iter().rev().find_map(|c| self.visible_span(*c))?;
                Some(Span {
                    offset: first.offset,
                    end: last.end,
                })
            }
        })
    }

    fn visible_span(&self, id: CstNodeId) -> Option<Span> {
        if self.is_hidden(id) {
            None
        } else {
            self.span(id)
        }
    }

    /// Start offset of `id` (0 when it has no span).
    #[must_use]
    pub fn offset(&self, id: CstNodeId) -> usize {
        self.span(id).map_or(0, |s| s.offset)
    }

    /// End offset of `id` (0 when it has no span).
    #[must_use]
    pub fn end(&self, id: CstNodeId) -> usize {
        self.span(id).map_or(0, |s| s.end)
    }

    /// Source text covered by `id`.
    #[must_use]
    pub fn text_of(&self, id: CstNodeId) -> &str {
        self.span(id)
            .and_then(|s| self.text.get(s.offset..s.end))
            .unwrap_or_default()
    }

    /// Line/character range of `id`.
    #[must_use]
    pub fn range(&self, id: CstNodeId) -> Option<Range> {
        let span = self.span(id)?;
        Some(self.lines().range(&self.text, span))
    }

    /// Line table of the source text.
    pub fn lines(&self) -> &LineIndex {
        self.lines.get_or_init(|| LineIndex::new(&self.text))
    }

    /// `id` and every node below it, depth first in source order.
    #[must_use]
    pub fn descendants(&self, id: CstNodeId) -> Descendants<'_> {
        Descendants {
            tree: self,
            stack: vec![id],
        }
    }

    /// Leaves below `id` in source order.
    pub fn leaves(&self, id: CstNodeId) -> impl Iterator<Item = CstNodeId> + '_ {
        self.descendants(id).filter(|n| self.is_leaf(*n))
    }

    // === Mutation (builder and hydration only) ===

    #[allow(clippy::cast_possible_truncation)]
    pub(crate) fn push(&mut self, kind: CstKind, feature: Option<ElementId>, parent: CstNodeId) -> CstNodeId {
        let id = CstNodeId(self.nodes.len() as u32);
        let mut node = CstNode::new(kind, feature);
        node.parent = Some(parent);
        self.nodes.push(node);
        id
    }

    pub(crate) fn children_mut(&mut self, id: CstNodeId) -> Option<&mut Vec<CstNodeId>> {
        match &mut self.nodes[id.index()].kind {
            CstKind::Root { children } | CstKind::Composite { children } => Some(children),
            CstKind::Leaf(_) => None,
        }
    }

    pub(crate) fn set_parent(&mut self, id: CstNodeId, parent: Option<CstNodeId>) {
        self.nodes[id.index()].parent = parent;
    }

    pub(crate) fn set_ast_node(&mut self, id: CstNodeId, ast_node: Option<AstNodeId>) {
        self.nodes[id.index()].ast_node = ast_node;
    }

    /// Drop the last arena slot if it is `id`.
    pub(crate) fn pop_if_last(&mut self, id: CstNodeId) -> bool {
        if id.index() + 1 == self.nodes.len() && id != Self::ROOT {
            self.nodes.pop();
            true
        } else {
            false
        }
    }

    /// Rebuild parent back-pointers from the children vectors.
    pub(crate) fn link_parents(&mut self) {
        for node in &mut self.nodes {
            node.parent = None;
        }
        for index in 0..self.nodes.len() {
            let children = match &self.nodes[index].kind {
                CstKind::Root { children } | CstKind::Composite { children } => children.clone(),
                CstKind::Leaf(_) => continue,
            };
            #[allow(clippy::cast_possible_truncation)]
            let parent = CstNodeId(index as u32);
            for child in children {
                self.nodes[child.index()].parent = Some(parent);
            }
        }
    }
}

/// Depth-first iterator over a subtree.
#[derive(Debug, Clone)]
pub struct Descendants<'t> {
    tree: &'t CstTree,
    stack: Vec<CstNodeId>,
}

impl Iterator for Descendants<'_> {
    type Item = CstNodeId;

    fn next(&mut self) -> Option<Self::Item> {
        let id = self.stack.pop()?;
        self.stack.extend(self.tree.children(id).iter().rev());
        Some(id)
    }
}
