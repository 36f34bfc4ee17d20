//! Incremental CST construction driven by the parser.
//!
//! The builder keeps a stack of open composites. The parser opens one per
//! rule call ([`CstBuilder::enter_composite`]), adds a leaf per consumed token
//! ([`CstBuilder::add_leaf`]) and closes it when the rule returns
//! ([`CstBuilder::construct`]). Whitespace and comments arrive separately
//! through [`CstBuilder::add_hidden_nodes`] and are placed so that they never
//! end up as the first child of a composite whose real content follows them.

use tracing::trace;

use crate::ast::{Ast, AstNodeId};
use crate::cst::{CstKind, CstNodeId, CstTree, Leaf};
use crate::grammar::ElementId;
use crate::lexer::Token;

/// Builds a [`CstTree`] while tokens are consumed.
#[derive(Debug, Clone)]
pub struct CstBuilder {
    tree: CstTree,
    stack: Vec<CstNodeId>,
}

impl Default for CstBuilder {
    fn default() -> Self {
        let tree = CstTree::new("");
        let root = tree.root();
        Self {
            tree,
            stack: vec![root],
        }
    }
}

impl CstBuilder {
    /// Start a new tree over `text`, discarding any previous state.
    pub fn build_root(&mut self, text: &str) -> CstNodeId {
        self.tree = CstTree::new(text);
        let root = self.tree.root();
        self.stack = vec![root];
        root
    }

    /// The composite new nodes are added to.
    #[must_use]
    pub fn current(&self) -> CstNodeId {
        self.stack.last().copied().unwrap_or_else(|| self.tree.root())
    }

    /// The tree built so far.
    #[must_use]
    pub const fn tree(&self) -> &CstTree {
        &self.tree
    }

    /// Open a composite for a rule called at `feature`.
    pub fn enter_composite(&mut self, feature: ElementId) -> CstNodeId {
        let parent = self.current();
        let id = self.tree.push(
            CstKind::Composite {
                children: Vec::new(),
            },
            Some(feature),
            parent,
        );
        self.attach(parent, id);
        self.stack.push(id);
        id
    }

    /// Append a leaf for a consumed token. Tokens inserted by error recovery
    /// have no source text and produce no leaf.
    pub fn add_leaf(&mut self, token: &Token, feature: Option<ElementId>) -> Option<CstNodeId> {
        let offset = token.offset?;
        let parent = self.current();
        let id = self.tree.push(
            CstKind::Leaf(Leaf {
                offset,
                length: token.image.len(),
                hidden: token.hidden,
                token_type: token.token_type,
            }),
            feature,
            parent,
        );
        self.attach(parent, id);
        Some(id)
    }

    /// Insert hidden leaves ahead of the next real token.
    ///
    /// If the current composite already has content they are appended to it.
    /// Otherwise they go in front of the open chain: into the nearest ancestor
    /// where the chain is not the first child, or at the very start of the
    /// root.
    pub fn add_hidden_nodes(&mut self, tokens: &[Token]) {
        let mut current = self.current();
        let leaves: Vec<CstNodeId> = tokens
            .iter()
            .filter_map(|token| {
                let offset = token.offset?;
                Some(self.tree.push(
                    CstKind::Leaf(Leaf {
                        offset,
                        length: token.image.len(),
                        hidden: true,
                        token_type: token.token_type,
                    }),
                    None,
                    current,
                ))
            })
            .collect();
        if leaves.is_empty() {
            return;
        }

        if !self.tree.children(current).is_empty() {
            for leaf in leaves {
                self.attach(current, leaf);
            }
            return;
        }

        let mut target = (self.tree.root(), 0);
        while let Some(parent) = self.tree.parent(current) {
            let index = self
                .tree
                .children(parent)
                .iter()
                .position(|c| *c == current)
                .unwrap_or(0);
            if index > 0 {
                target = (parent, index);
                break;
            }
            current = parent;
        }

        let (parent, index) = target;
        for leaf in &leaves {
            self.tree.set_parent(*leaf, Some(parent));
        }
        if let Some(children) = self.tree.children_mut(parent) {
            children.splice(index..index, leaves);
        }
    }

    /// Close the current composite.
    ///
    /// The popped node is associated with `ast_node`: both ways when the node
    /// has a type tag, only AST → CST for untyped placeholders. A composite
    /// without children is removed from the tree and the AST node loses its
    /// CST link. Returns the composite when it was kept.
    pub fn construct(&mut self, ast: &mut Ast, ast_node: Option<AstNodeId>) -> Option<CstNodeId> {
        let id = self.stack.pop()?;
        let kept = if self.tree.children(id).is_empty() && id != self.tree.root() {
            self.remove(id);
            None
        } else {
            Some(id)
        };

        if let Some(node) = ast_node {
            ast.set_cst(node, kept);
            if let Some(cst) = kept
                && ast.node(node).type_name().is_some()
            {
                self.tree.set_ast_node(cst, Some(node));
            }
        }
        kept
    }

    /// Drop the association between `ast_node` and its CST node.
    pub fn detach_ast(&mut self, ast: &mut Ast, ast_node: AstNodeId) {
        if let Some(cst) = ast.node(ast_node).cst() {
            if self.tree.ast_node(cst) == Some(ast_node) {
                self.tree.set_ast_node(cst, None);
            }
            ast.set_cst(ast_node, None);
        }
    }

    /// Finish building and hand out the tree.
    #[must_use]
    pub fn finish(self) -> CstTree {
        self.tree
    }

    fn attach(&mut self, parent: CstNodeId, child: CstNodeId) {
        if let Some(children) = self.tree.children_mut(parent) {
            children.push(child);
        }
    }

    fn remove(&mut self, id: CstNodeId) {
        if let Some(parent) = self.tree.parent(id)
            && let Some(children) = self.tree.children_mut(parent)
        {
            children.retain(|c| *c != id);
        }
        self.tree.set_parent(id, None);
        if !self.tree.pop_if_last(id) {
            trace!(node = id.index(), "Detached empty composite");
        }
    }
}
