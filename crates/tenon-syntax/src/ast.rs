//! Abstract syntax tree.
//!
//! Like the CST, the AST is an arena ([`Ast`]) of records addressed by
//! [`AstNodeId`]. A node has an optional type tag, an ordered property map
//! and two back-pointers that are never serialized: its container (parent
//! node, property and list index) and its CST node.
//!
//! # Node paths
//!
//! Nodes are located from the root by a textual path: `""` is the root,
//! `/elements@0/features@1` walks list members, and `/superType` follows a
//! single-valued containment. Paths are what the index stores, so they must
//! survive a reparse of an unchanged document.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::cst::CstNodeId;
use crate::grammar::{AssignOp, MandatoryDefault};

/// Index of a node in an [`Ast`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct AstNodeId(pub(crate) u32);

impl AstNodeId {
    /// Arena index.
    #[must_use]
    pub const fn index(self) -> usize {
        self.0 as usize
    }
}

/// Where a node is contained.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Container {
    /// Containing node
    pub node: AstNodeId,
    /// Property holding this node
    pub property: String,
    /// Position in a list property
    pub index: Option<usize>,
}

/// What a cross-reference points at once linked.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ReferenceTarget {
    /// Document holding the target
    pub uri: String,
    /// Node path of the target within that document
    pub path: String,
    /// Target name
    pub name: String,
    /// Target type tag
    pub type_name: String,
}

/// Linking state of a cross-reference.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum Resolution {
    /// Not linked yet
    #[default]
    Unresolved,
    /// Resolved to a target
    Resolved(ReferenceTarget),
    /// Linking failed
    Error(String),
}

/// A cross-reference property value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reference {
    /// Referenced name as written
    pub text: String,
    /// CST node spelling the reference
    pub cst: Option<CstNodeId>,
    /// Expected target type
    pub target_type: String,
    /// Linking state
    pub resolution: Resolution,
}

impl Reference {
    /// An unresolved reference.
    #[must_use]
    pub fn new(text: impl Into<String>, cst: Option<CstNodeId>, target_type: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            cst,
            target_type: target_type.into(),
            resolution: Resolution::Unresolved,
        }
    }

    /// The resolved target.
    #[must_use]
    pub const fn target(&self) -> Option<&ReferenceTarget> {
        match &self.resolution {
            Resolution::Resolved(target) => Some(target),
            _ => None,
        }
    }

    /// The linking error.
    #[must_use]
    pub fn error(&self) -> Option<&str> {
        match &self.resolution {
            Resolution::Error(message) => Some(message),
            _ => None,
        }
    }
}

/// A property value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    /// Text
    String(String),
    /// Number
    Number(f64),
    /// Boolean
    Bool(bool),
    /// Contained child node
    Node(AstNodeId),
    /// Cross-reference
    Reference(Reference),
    /// List of values
    List(Vec<Value>),
}

impl Value {
    /// String content.
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }

    /// Boolean content.
    #[must_use]
    pub const fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// Number content.
    #[must_use]
    pub const fn as_number(&self) -> Option<f64> {
        match self {
            Self::Number(n) => Some(*n),
            _ => None,
        }
    }

    /// Contained node.
    #[must_use]
    pub const fn as_node(&self) -> Option<AstNodeId> {
        match self {
            Self::Node(id) => Some(*id),
            _ => None,
        }
    }

    /// Cross-reference.
    #[must_use]
    pub const fn as_reference(&self) -> Option<&Reference> {
        match self {
            Self::Reference(r) => Some(r),
            _ => None,
        }
    }

    /// List items.
    #[must_use]
    pub fn as_list(&self) -> Option<&[Value]> {
        match self {
            Self::List(items) => Some(items),
            _ => None,
        }
    }

    /// Text form used when a value is spliced into a data type string.
    #[must_use]
    pub fn to_text(&self) -> String {
        match self {
            Self::String(s) => s.clone(),
            Self::Number(n) => n.to_string(),
            Self::Bool(b) => b.to_string(),
            Self::Reference(r) => r.text.clone(),
            Self::Node(_) | Self::List(_) => String::new(),
        }
    }
}

/// Locates one cross-reference inside an AST.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ReferenceLocator {
    /// Node holding the reference
    pub node: AstNodeId,
    /// Property holding the reference
    pub property: String,
    /// Position in a list property
    pub index: Option<usize>,
}

/// One AST record.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AstNode {
    type_name: Option<String>,
    properties: IndexMap<String, Value>,
    #[serde(skip)]
    container: Option<Container>,
    cst: Option<CstNodeId>,
}

impl AstNode {
    /// Type tag; `None` for fragment placeholders.
    #[must_use]
    pub fn type_name(&self) -> Option<&str> {
        self.type_name.as_deref()
    }

    /// Properties in assignment order.
    #[must_use]
    pub const fn properties(&self) -> &IndexMap<String, Value> {
        &self.properties
    }

    /// One property.
    #[must_use]
    pub fn get(&self, property: &str) -> Option<&Value> {
        self.properties.get(property)
    }

    /// The `name` property, if it is a string.
    #[must_use]
    pub fn name(&self) -> Option<&str> {
        self.get("name").and_then(Value::as_str)
    }

    /// Container back-pointer.
    #[must_use]
    pub const fn container(&self) -> Option<&Container> {
        self.container.as_ref()
    }

    /// Associated CST node.
    #[must_use]
    pub const fn cst(&self) -> Option<CstNodeId> {
        self.cst
    }
}

/// Arena of AST nodes for one document.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Ast {
    nodes: Vec<AstNode>,
    root: Option<AstNodeId>,
}

impl Ast {
    /// Allocate a node.
    #[allow(clippy::cast_possible_truncation)]
    pub fn alloc(&mut self, type_name: Option<&str>) -> AstNodeId {
        let id = AstNodeId(self.nodes.len() as u32);
        self.nodes.push(AstNode {
            type_name: type_name.map(str::to_string),
            ..AstNode::default()
        });
        id
    }

    /// The root node.
    #[must_use]
    pub const fn root(&self) -> Option<AstNodeId> {
        self.root
    }

    /// Replace the root node.
    pub fn set_root(&mut self, root: Option<AstNodeId>) {
        self.root = root;
    }

    /// A node by id.
    #[must_use]
    pub fn node(&self, id: AstNodeId) -> &AstNode {
        &self.nodes[id.index()]
    }

    /// Set a property, replacing any previous value.
    pub fn set(&mut self, id: AstNodeId, property: &str, value: Value) {
        self.nodes[id.index()]
            .properties
            .insert(property.to_string(), value);
    }

    /// Apply a grammar assignment: `=` overwrites, `?=` sets `true`, `+=`
    /// appends (creating the list on first use).
    pub fn assign(&mut self, id: AstNodeId, operator: AssignOp, property: &str, value: Value) {
        let properties = &mut self.nodes[id.index()].properties;
        match operator {
            AssignOp::Assign => {
                properties.insert(property.to_string(), value);
            }
            AssignOp::Flag => {
                properties.insert(property.to_string(), Value::Bool(true));
            }
            AssignOp::Append => match properties.get_mut(property) {
                Some(Value::List(items)) => items.push(value),
                _ => {
                    properties.insert(property.to_string(), Value::List(vec![value]));
                }
            },
        }
    }

    /// Make `target` inherit the properties of `source` that it does not set
    /// itself. Lists present on both are concatenated with `source` items
    /// first; any other value already on `target` is kept. An untyped
    /// `target` also inherits the type tag.
    pub fn inherit_properties(&mut self, target: AstNodeId, source: AstNodeId) {
        if target == source {
            return;
        }
        let source_node = self.nodes[source.index()].clone();
        let target_node = &mut self.nodes[target.index()];
        for (property, inherited) in source_node.properties {
            match target_node.properties.get_mut(&property) {
                None => {
                    target_node.properties.insert(property, inherited);
                }
                Some(Value::List(own)) => {
                    if let Value::List(mut previous) = inherited {
                        previous.append(own);
                        *own = previous;
                    }
                }
                Some(_) => {}
            }
        }
        if target_node.type_name.is_none() {
            target_node.type_name = source_node.type_name;
        }
    }

    /// Fill mandatory properties that were never assigned.
    pub fn apply_defaults<'a>(
        &mut self,
        id: AstNodeId,
        defaults: impl IntoIterator<Item = (&'a str, MandatoryDefault)>,
    ) {
        let properties = &mut self.nodes[id.index()].properties;
        for (property, default) in defaults {
            if !properties.contains_key(property) {
                let value = match default {
                    MandatoryDefault::EmptyList => Value::List(Vec::new()),
                    MandatoryDefault::False => Value::Bool(false),
                };
                properties.insert(property.to_string(), value);
            }
        }
    }

    /// Point the container back-pointer of every node directly contained in
    /// `id` at `id`.
    pub fn link_containers(&mut self, id: AstNodeId) {
        let links: Vec<(AstNodeId, Container)> = self.nodes[id.index()]
            .properties
            .iter()
            .flat_map(|(property, value)| contained(id, property, value))
            .collect();
        for (child, container) in links {
            self.nodes[child.index()].container = Some(container);
        }
    }

    /// Rebuild every container back-pointer reachable from the root.
    pub fn link_all_containers(&mut self) {
        for node in &mut self.nodes {
            node.container = None;
        }
        let Some(root) = self.root else {
            return;
        };
        for id in self.descendants(root).collect::<Vec<_>>() {
            self.link_containers(id);
        }
    }

    pub(crate) fn set_cst(&mut self, id: AstNodeId, cst: Option<CstNodeId>) {
        self.nodes[id.index()].cst = cst;
    }

    /// Nodes directly contained in `id`, in property then list order.
    #[must_use]
    pub fn children(&self, id: AstNodeId) -> Vec<AstNodeId> {
        self.node(id)
            .properties
            .iter()
            .flat_map(|(property, value)| contained(id, property, value))
            .map(|(child, _)| child)
            .collect()
    }

    /// `id` and every node it transitively contains, pre-order.
    #[must_use]
    pub fn descendants(&self, id: AstNodeId) -> AstDescendants<'_> {
        AstDescendants {
            ast: self,
            stack: vec![id],
        }
    }

    /// Every node reachable from the root.
    pub fn all_nodes(&self) -> impl Iterator<Item = AstNodeId> + '_ {
        self.root.into_iter().flat_map(|root| self.descendants(root))
    }

    /// Path of `id` from the root (`""` for the root itself).
    #[must_use]
    pub fn path_of(&self, id: AstNodeId) -> String {
        let mut segments = Vec::new();
        let mut current = id;
        while let Some(container) = &self.node(current).container {
            segments.push(match container.index {
                Some(index) => format!("/{}@{index}", container.property),
                None => format!("/{}", container.property),
            });
            current = container.node;
        }
        segments.reverse();
        segments.concat()
    }

    /// Resolve a path produced by [`Ast::path_of`].
    #[must_use]
    pub fn resolve_path(&self, path: &str) -> Option<AstNodeId> {
        let mut current = self.root?;
        for segment in path.split('/').skip(1) {
            let (property, index) = match segment.split_once('@') {
                Some((property, index)) => (property, Some(index.parse::<usize>().ok()?)),
                None => (segment, None),
            };
            let value = self.node(current).get(property)?;
            current = match (value, index) {
                (Value::Node(child), None) => *child,
                (Value::List(items), Some(index)) => items.get(index)?.as_node()?,
                _ => return None,
            };
        }
        Some(current)
    }

    /// Cross-references held directly by `id`.
    #[must_use]
    pub fn references_of(&self, id: AstNodeId) -> Vec<ReferenceLocator> {
        let mut locators = Vec::new();
        for (property, value) in &self.node(id).properties {
            match value {
                Value::Reference(_) => locators.push(ReferenceLocator {
                    node: id,
                    property: property.clone(),
                    index: None,
                }),
                Value::List(items) => locators.extend(
                    items
                        .iter()
                        .enumerate()
                        .filter(|(_, item)| matches!(item, Value::Reference(_)))
                        .map(|(index, _)| ReferenceLocator {
                            node: id,
                            property: property.clone(),
                            index: Some(index),
                        }),
                ),
                _ => {}
            }
        }
        locators
    }

    /// Cross-references of every node reachable from the root.
    #[must_use]
    pub fn all_references(&self) -> Vec<ReferenceLocator> {
        self.all_nodes().flat_map(|id| self.references_of(id)).collect()
    }

    /// The reference at `locator`.
    #[must_use]
    pub fn reference(&self, locator: &ReferenceLocator) -> Option<&Reference> {
        let value = self.node(locator.node).get(&locator.property)?;
        match (value, locator.index) {
            (Value::Reference(r), None) => Some(r),
            (Value::List(items), Some(index)) => items.get(index)?.as_reference(),
            _ => None,
        }
    }

    /// Mutable access to the reference at `locator`.
    pub fn reference_mut(&mut self, locator: &ReferenceLocator) -> Option<&mut Reference> {
        let value = self.nodes[locator.node.index()]
            .properties
            .get_mut(&locator.property)?;
        match (value, locator.index) {
            (Value::Reference(r), None) => Some(r),
            (Value::List(items), Some(index)) => match items.get_mut(index)? {
                Value::Reference(r) => Some(r),
                _ => None,
            },
            _ => None,
        }
    }
}

fn contained<'v>(
    id: AstNodeId,
    property: &'v str,
    value: &'v Value,
) -> Box<dyn Iterator<Item = (AstNodeId, Container)> + 'v> {
    match value {
        Value::Node(child) => Box::new(std::iter::once((
            *child,
            Container {
                node: id,
                property: property.to_string(),
                index: None,
            },
        ))),
        Value::List(items) => Box::new(items.iter().enumerate().filter_map(move |(index, item)| {
            item.as_node().map(|child| {
                (
                    child,
                    Container {
                        node: id,
                        property: property.to_string(),
                        index: Some(index),
                    },
                )
            })
        })),
        _ => Box::new(std::iter::empty()),
    }
}

/// Pre-order iterator over a subtree.
#[derive(Debug, Clone)]
pub struct AstDescendants<'a> {
    ast: &'a Ast,
    stack: Vec<AstNodeId>,
}

impl Iterator for AstDescendants<'_> {
    type Item = AstNodeId;

    fn next(&mut self) -> Option<Self::Item> {
        let id = self.stack.pop()?;
        let mut children = self.ast.children(id);
        children.reverse();
        self.stack.extend(children);
        Some(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn string(s: &str) -> Value {
        Value::String(s.to_string())
    }

    #[test]
    fn assign_operators() {
        let mut ast = Ast::default();
        let node = ast.alloc(Some("Feature"));

        ast.assign(node, AssignOp::Assign, "name", string("a"));
        ast.assign(node, AssignOp::Assign, "name", string("b"));
        ast.assign(node, AssignOp::Flag, "many", string("many"));
        ast.assign(node, AssignOp::Append, "tags", string("x"));
        ast.assign(node, AssignOp::Append, "tags", string("y"));

        let n = ast.node(node);
        assert_eq!(n.name(), Some("b"));
        assert_eq!(n.get("many"), Some(&Value::Bool(true)));
        assert_eq!(n.get("tags"), Some(&Value::List(vec![string("x"), string("y")])));
    }

    #[test]
    fn inherit_keeps_own_values_and_concatenates_lists() {
        let mut ast = Ast::default();
        let previous = ast.alloc(Some("Entity"));
        ast.set(previous, "name", string("old"));
        ast.set(previous, "doc", string("inherited"));
        ast.set(previous, "items", Value::List(vec![string("p1"), string("p2")]));
        let result = ast.alloc(None);
        ast.set(result, "name", string("new"));
        ast.set(result, "items", Value::List(vec![string("r1")]));

        ast.inherit_properties(result, previous);

        let n = ast.node(result);
        assert_eq!(n.name(), Some("new"));
        assert_eq!(n.get("doc"), Some(&string("inherited")));
        assert_eq!(
            n.get("items"),
            Some(&Value::List(vec![string("p1"), string("p2"), string("r1")]))
        );
        assert_eq!(n.type_name(), Some("Entity"));
    }

    #[test]
    fn defaults_fill_only_missing_properties() {
        let mut ast = Ast::default();
        let node = ast.alloc(Some("Entity"));
        ast.set(node, "abstract", Value::Bool(true));

        ast.apply_defaults(
            node,
            [
                ("features", MandatoryDefault::EmptyList),
                ("abstract", MandatoryDefault::False),
            ],
        );

        assert_eq!(ast.node(node).get("features"), Some(&Value::List(Vec::new())));
        assert_eq!(ast.node(node).get("abstract"), Some(&Value::Bool(true)));
    }

    fn nested() -> (Ast, AstNodeId, AstNodeId, AstNodeId) {
        let mut ast = Ast::default();
        let root = ast.alloc(Some("Model"));
        let entity = ast.alloc(Some("Entity"));
        let feature = ast.alloc(Some("Feature"));
        ast.assign(entity, AssignOp::Append, "features", Value::Node(feature));
        let data_type = ast.alloc(Some("DataType"));
        ast.assign(root, AssignOp::Append, "elements", Value::Node(data_type));
        ast.assign(root, AssignOp::Append, "elements", Value::Node(entity));
        ast.set_root(Some(root));
        ast.link_all_containers();
        (ast, root, entity, feature)
    }

    #[test]
    fn paths_round_trip() {
        let (ast, root, entity, feature) = nested();

        assert_eq!(ast.path_of(root), "");
        assert_eq!(ast.path_of(entity), "/elements@1");
        assert_eq!(ast.path_of(feature), "/elements@1/features@0");
        assert_eq!(ast.resolve_path("/elements@1/features@0"), Some(feature));
        assert_eq!(ast.resolve_path(""), Some(root));
        assert_eq!(ast.resolve_path("/elements@7"), None);
        assert_eq!(ast.resolve_path("/elements"), None);
    }

    #[test]
    fn descendants_are_pre_order() {
        let (ast, root, entity, feature) = nested();

        let order: Vec<_> = ast.descendants(root).collect();

        assert_eq!(order.len(), 4);
        assert_eq!(order[0], root);
        assert_eq!(order[2], entity);
        assert_eq!(order[3], feature);
    }

    #[test]
    fn references_are_located_and_mutable() {
        let mut ast = Ast::default();
        let node = ast.alloc(Some("Feature"));
        ast.set(node, "type", Value::Reference(Reference::new("String", None, "Type")));
        ast.assign(node, AssignOp::Append, "others", Value::Reference(Reference::new("A", None, "Type")));
        ast.set_root(Some(node));

        let locators = ast.all_references();
        assert_eq!(locators.len(), 2);
        assert_eq!(locators[1].index, Some(0));

        ast.reference_mut(&locators[0]).unwrap().resolution = Resolution::Error("missing".into());

        assert_eq!(ast.reference(&locators[0]).unwrap().error(), Some("missing"));
        assert_eq!(ast.reference(&locators[1]).unwrap().text, "A");
    }
}
