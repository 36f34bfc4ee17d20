//! Grammar model: parser rules, terminal rules and keywords.
//!
//! A language is described once with [`GrammarBuilder`] and the DSL helpers in
//! this module, then compiled into an immutable [`Grammar`]. Compilation
//! resolves every rule and terminal name and flattens the element tree into an
//! arena so that each element can answer two questions in O(1) while parsing:
//! which rule it belongs to, and which assignment (if any) encloses it.
//!
//! # Example
//!
//! ```
//! use tenon_syntax::grammar::{GrammarBuilder, assign, keyword, terminal, group};
//!
//! let mut builder = GrammarBuilder::new("greetings");
//! builder
//!     .node_rule("Greeting", group([keyword("hello"), assign("name", terminal("ID"))]))
//!     .terminal("ID", r"[a-z]+")
//!     .hidden_terminal("WS", r"\s+");
//! let grammar = builder.build().unwrap();
//!
//! assert_eq!(grammar.entry_rule().name(), "Greeting");
//! ```

use std::collections::{HashMap, HashSet};

use indexmap::IndexMap;
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{GrammarError, Result};

/// Index of a compiled grammar element.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ElementId(pub(crate) u32);

/// Index of a parser rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RuleId(pub(crate) u32);

/// Index of a terminal rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TerminalId(pub(crate) u32);

/// Index of a keyword.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct KeywordId(pub(crate) u32);

/// Token vocabulary entry: either a keyword or a terminal rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TokenType {
    /// A literal keyword
    Keyword(KeywordId),
    /// A token matched by a terminal rule
    Terminal(TerminalId),
}

/// Assignment operator of a grammar assignment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AssignOp {
    /// `=`: overwrite the property
    Assign,
    /// `+=`: append to a list property
    Append,
    /// `?=`: set a boolean property to `true`
    Flag,
}

/// Repetition cardinality.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Cardinality {
    /// `?`
    Optional,
    /// `*`
    ZeroOrMore,
    /// `+`
    OneOrMore,
}

/// An uncompiled grammar element, built with the DSL helpers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Element {
    /// A literal keyword
    Keyword(String),
    /// A call of a terminal rule by name
    Terminal(String),
    /// A call of a parser rule by name
    RuleCall(String),
    /// Assignment of the inner element's value to a feature
    Assignment {
        /// Feature (property) name
        feature: String,
        /// Assignment operator
        operator: AssignOp,
        /// Assigned element
        value: Box<Element>,
    },
    /// Cross-reference to a node of `type_name`, written as `token`
    CrossReference {
        /// Target type
        type_name: String,
        /// Element that spells the reference text
        token: Box<Element>,
    },
    /// Sequence
    Group(Vec<Element>),
    /// Ordered choice
    Alternatives(Vec<Element>),
    /// Optional or repeated element
    Repetition {
        /// Repeated element
        element: Box<Element>,
        /// How often it may occur
        cardinality: Cardinality,
    },
}

// === DSL helpers ===

/// A literal keyword.
#[must_use]
pub fn keyword(text: &str) -> Element {
    Element::Keyword(text.to_string())
}

/// A call of the terminal rule `name`.
#[must_use]
pub fn terminal(name: &str) -> Element {
    Element::Terminal(name.to_string())
}

/// A call of the parser rule `name`.
#[must_use]
pub fn call(name: &str) -> Element {
    Element::RuleCall(name.to_string())
}

/// `feature=value`
#[must_use]
pub fn assign(feature: &str, value: Element) -> Element {
    assignment(feature, AssignOp::Assign, value)
}

/// `feature+=value`
#[must_use]
pub fn append(feature: &str, value: Element) -> Element {
    assignment(feature, AssignOp::Append, value)
}

/// `feature?=value`
#[must_use]
pub fn flag(feature: &str, value: Element) -> Element {
    assignment(feature, AssignOp::Flag, value)
}

fn assignment(feature: &str, operator: AssignOp, value: Element) -> Element {
    Element::Assignment {
        feature: feature.to_string(),
        operator,
        value: Box::new(value),
    }
}

/// `[TypeName:token]`
#[must_use]
pub fn cross_ref(type_name: &str, token: Element) -> Element {
    Element::CrossReference {
        type_name: type_name.to_string(),
        token: Box::new(token),
    }
}

/// A sequence of elements.
#[must_use]
pub fn group(elements: impl IntoIterator<Item = Element>) -> Element {
    Element::Group(elements.into_iter().collect())
}

/// An ordered choice; the first viable alternative wins.
#[must_use]
pub fn alt(elements: impl IntoIterator<Item = Element>) -> Element {
    Element::Alternatives(elements.into_iter().collect())
}

/// `element?`
#[must_use]
pub fn optional(element: Element) -> Element {
    repetition(element, Cardinality::Optional)
}

/// `element*`
#[must_use]
pub fn many(element: Element) -> Element {
    repetition(element, Cardinality::ZeroOrMore)
}

/// `element+`
#[must_use]
pub fn at_least_one(element: Element) -> Element {
    repetition(element, Cardinality::OneOrMore)
}

fn repetition(element: Element, cardinality: Cardinality) -> Element {
    Element::Repetition {
        element: Box::new(element),
        cardinality,
    }
}

// === Compiled grammar ===

/// What a parser rule produces.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RuleKind {
    /// Produces an AST node with the given type tag
    Node {
        /// Type tag of produced nodes
        type_name: String,
    },
    /// Produces a string value
    DataType,
    /// Enriches the caller's node; produces an untyped placeholder
    Fragment,
}

/// A compiled parser rule.
#[derive(Debug, Clone)]
pub struct ParserRule {
    name: String,
    kind: RuleKind,
    body: ElementId,
}

impl ParserRule {
    /// Rule name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// What the rule produces.
    #[must_use]
    pub const fn kind(&self) -> &RuleKind {
        &self.kind
    }

    /// Root element of the rule body.
    #[must_use]
    pub const fn body(&self) -> ElementId {
        self.body
    }

    /// Type tag of the produced node, for node rules.
    #[must_use]
    pub fn type_name(&self) -> Option<&str> {
        match &self.kind {
            RuleKind::Node { type_name } => Some(type_name),
            RuleKind::DataType | RuleKind::Fragment => None,
        }
    }
}

/// A compiled terminal rule.
#[derive(Debug, Clone)]
pub struct TerminalRule {
    name: String,
    pattern: String,
    hidden: bool,
}

impl TerminalRule {
    /// Terminal name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Regular expression source.
    #[must_use]
    pub fn pattern(&self) -> &str {
        &self.pattern
    }

    /// Whether matched tokens are hidden (whitespace, comments).
    #[must_use]
    pub const fn is_hidden(&self) -> bool {
        self.hidden
    }
}

/// A compiled element.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ElementKind {
    /// Keyword token
    Keyword(KeywordId),
    /// Terminal token
    Terminal(TerminalId),
    /// Parser rule call
    RuleCall(RuleId),
    /// Assignment wrapper
    Assignment {
        /// Feature name
        feature: String,
        /// Operator
        operator: AssignOp,
        /// Assigned element
        value: ElementId,
    },
    /// Cross-reference wrapper
    CrossReference {
        /// Target type
        type_name: String,
        /// Element spelling the reference
        token: ElementId,
    },
    /// Sequence
    Group(Vec<ElementId>),
    /// Ordered choice
    Alternatives(Vec<ElementId>),
    /// Optional / repeated element
    Repetition {
        /// Repeated element
        element: ElementId,
        /// Cardinality
        cardinality: Cardinality,
    },
}

#[derive(Debug, Clone)]
struct CompiledElement {
    kind: ElementKind,
    rule: RuleId,
    assignment: Option<ElementId>,
    cross_ref: Option<ElementId>,
}

/// The assignment enclosing a grammar element.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AssignmentInfo<'g> {
    /// Feature name
    pub feature: &'g str,
    /// Operator
    pub operator: AssignOp,
    /// Target type when the element spells a cross-reference
    pub cross_ref_type: Option<&'g str>,
}

/// Default value of a mandatory property that no token assigned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MandatoryDefault {
    /// `+=` features default to an empty list
    EmptyList,
    /// `?=` features default to `false`
    False,
}

/// An immutable, compiled grammar.
#[derive(Debug, Clone)]
pub struct Grammar {
    name: String,
    rules: Vec<ParserRule>,
    rule_index: HashMap<String, RuleId>,
    elements: Vec<CompiledElement>,
    terminals: Vec<TerminalRule>,
    keywords: Vec<String>,
    entry: RuleId,
    supertypes: HashMap<String, HashSet<String>>,
    mandatory: HashMap<String, IndexMap<String, MandatoryDefault>>,
}

impl Grammar {
    /// Grammar name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The rule parsing starts from.
    #[must_use]
    pub fn entry_rule(&self) -> &ParserRule {
        self.rule(self.entry)
    }

    /// Id of the entry rule.
    #[must_use]
    pub const fn entry_rule_id(&self) -> RuleId {
        self.entry
    }

    /// A rule by id.
    #[must_use]
    pub fn rule(&self, id: RuleId) -> &ParserRule {
        &self.rules[id.0 as usize]
    }

    /// A rule by name.
    #[must_use]
    pub fn rule_by_name(&self, name: &str) -> Option<&ParserRule> {
        self.rule_index.get(name).map(|id| self.rule(*id))
    }

    /// All parser rules in declaration order.
    pub fn rules(&self) -> impl Iterator<Item = &ParserRule> {
        self.rules.iter()
    }

    /// A compiled element.
    #[must_use]
    pub fn element(&self, id: ElementId) -> &ElementKind {
        &self.elements[id.0 as usize].kind
    }

    /// The rule an element belongs to.
    #[must_use]
    pub fn rule_of(&self, id: ElementId) -> RuleId {
        self.elements[id.0 as usize].rule
    }

    /// The assignment enclosing `id`, if any.
    #[must_use]
    pub fn assignment_of(&self, id: ElementId) -> Option<AssignmentInfo<'_>> {
        let compiled = &self.elements[id.0 as usize];
        let assignment = compiled.assignment?;
        let ElementKind::Assignment {
            feature, operator, ..
        } = self.element(assignment)
        else {
            return None;
        };
        let cross_ref_type = compiled.cross_ref.and_then(|cr| match self.element(cr) {
            ElementKind::CrossReference { type_name, .. } => Some(type_name.as_str()),
            _ => None,
        });
        Some(AssignmentInfo {
            feature,
            operator: *operator,
            cross_ref_type,
        })
    }

    /// All terminal rules in declaration order.
    #[must_use]
    pub fn terminals(&self) -> &[TerminalRule] {
        &self.terminals
    }

    /// A terminal by id.
    #[must_use]
    pub fn terminal(&self, id: TerminalId) -> &TerminalRule {
        &self.terminals[id.0 as usize]
    }

    /// All keywords.
    #[must_use]
    pub fn keywords(&self) -> &[String] {
        &self.keywords
    }

    /// A keyword by id.
    #[must_use]
    pub fn keyword(&self, id: KeywordId) -> &str {
        &self.keywords[id.0 as usize]
    }

    /// Display name of a token type: `'{'` for keywords, the rule name for
    /// terminals.
    #[must_use]
    pub fn token_type_name(&self, token_type: TokenType) -> String {
        match token_type {
            TokenType::Keyword(k) => format!("'{}'", self.keyword(k)),
            TokenType::Terminal(t) => self.terminal(t).name.clone(),
        }
    }

    /// Returns `true` when `sub` equals `sup` or is (transitively) one of its
    /// subtypes.
    #[must_use]
    pub fn is_subtype(&self, sub: &str, sup: &str) -> bool {
        if sub == sup {
            return true;
        }
        let mut visited = HashSet::new();
        let mut pending = vec![sub];
        while let Some(current) = pending.pop() {
            if !visited.insert(current) {
                continue;
            }
            if let Some(parents) = self.supertypes.get(current) {
                if parents.contains(sup) {
                    return true;
                }
                pending.extend(parents.iter().map(String::as_str));
            }
        }
        false
    }

    /// Every type tag produced by a node rule.
    pub fn type_names(&self) -> impl Iterator<Item = &str> {
        self.rules.iter().filter_map(ParserRule::type_name)
    }

    /// Mandatory property defaults of `type_name`, in declaration order.
    pub fn mandatory_defaults(
        &self,
        type_name: &str,
    ) -> impl Iterator<Item = (&str, MandatoryDefault)> {
        self.mandatory
            .get(type_name)
            .into_iter()
            .flat_map(|defaults| defaults.iter().map(|(f, d)| (f.as_str(), *d)))
    }

    /// Target type of the cross-reference assigned to `feature` on nodes of
    /// `type_name`.
    #[must_use]
    pub fn reference_type(&self, type_name: &str, feature: &str) -> Option<&str> {
        self.elements.iter().find_map(|element| {
            let ElementKind::CrossReference {
                type_name: target, ..
            } = &element.kind
            else {
                return None;
            };
            let ElementKind::Assignment {
                feature: assigned, ..
            } = self.element(element.assignment?)
            else {
                return None;
            };
            (assigned == feature && self.rule(element.rule).type_name() == Some(type_name))
                .then_some(target.as_str())
        })
    }
}

// === Builder ===

#[derive(Debug, Clone)]
struct RuleDecl {
    name: String,
    kind: RuleKind,
    body: Element,
}

#[derive(Debug, Clone)]
struct TerminalDecl {
    name: String,
    pattern: String,
    hidden: bool,
}

/// Assembles and validates a [`Grammar`].
#[derive(Debug, Clone, Default)]
pub struct GrammarBuilder {
    name: String,
    rules: Vec<RuleDecl>,
    terminals: Vec<TerminalDecl>,
    entry: Option<String>,
}

impl GrammarBuilder {
    /// Start a grammar called `name`.
    #[must_use]
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            ..Self::default()
        }
    }

    /// Parse documents starting from `rule` instead of the first node rule.
    pub fn entry(&mut self, rule: &str) -> &mut Self {
        self.entry = Some(rule.to_string());
        self
    }

    /// Declare a node rule whose type tag equals its name.
    pub fn node_rule(&mut self, name: &str, body: Element) -> &mut Self {
        self.node_rule_returning(name, name, body)
    }

    /// Declare a node rule producing nodes tagged `type_name`.
    pub fn node_rule_returning(&mut self, name: &str, type_name: &str, body: Element) -> &mut Self {
        self.rules.push(RuleDecl {
            name: name.to_string(),
            kind: RuleKind::Node {
                type_name: type_name.to_string(),
            },
            body,
        });
        self
    }

    /// Declare a data type rule (`returns string`).
    pub fn data_type_rule(&mut self, name: &str, body: Element) -> &mut Self {
        self.rules.push(RuleDecl {
            name: name.to_string(),
            kind: RuleKind::DataType,
            body,
        });
        self
    }

    /// Declare a fragment rule.
    pub fn fragment_rule(&mut self, name: &str, body: Element) -> &mut Self {
        self.rules.push(RuleDecl {
            name: name.to_string(),
            kind: RuleKind::Fragment,
            body,
        });
        self
    }

    /// Declare a terminal rule.
    pub fn terminal(&mut self, name: &str, pattern: &str) -> &mut Self {
        self.push_terminal(name, pattern, false)
    }

    /// Declare a hidden terminal rule (whitespace, comments).
    pub fn hidden_terminal(&mut self, name: &str, pattern: &str) -> &mut Self {
        self.push_terminal(name, pattern, true)
    }

    fn push_terminal(&mut self, name: &str, pattern: &str, hidden: bool) -> &mut Self {
        self.terminals.push(TerminalDecl {
            name: name.to_string(),
            pattern: pattern.to_string(),
            hidden,
        });
        self
    }

    /// Validate and compile the grammar.
    ///
    /// # Errors
    ///
    /// Returns an error if a rule or terminal name is unknown or declared
    /// twice, a terminal pattern does not compile, an assignment is nested in
    /// another assignment, or no entry rule exists.
    pub fn build(&self) -> Result<Grammar> {
        let mut names = HashSet::new();
        for name in self
            .rules
            .iter()
            .map(|r| &r.name)
            .chain(self.terminals.iter().map(|t| &t.name))
        {
            if !names.insert(name.as_str()) {
                return Err(GrammarError::DuplicateRule(name.clone()));
            }
        }

        let terminals = self
            .terminals
            .iter()
            .map(|decl| {
                Regex::new(&decl.pattern).map_err(|source| GrammarError::InvalidPattern {
                    name: decl.name.clone(),
                    source,
                })?;
                Ok(TerminalRule {
                    name: decl.name.clone(),
                    pattern: decl.pattern.clone(),
                    hidden: decl.hidden,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        #[allow(clippy::cast_possible_truncation)] // Grammars have far fewer than u32::MAX rules
        let rule_index: HashMap<String, RuleId> = self
            .rules
            .iter()
            .enumerate()
            .map(|(i, r)| (r.name.clone(), RuleId(i as u32)))
            .collect();

        let entry = match &self.entry {
            Some(name) => *rule_index
                .get(name)
                .ok_or_else(|| GrammarError::UnknownRule(name.clone()))?,
            None => self
                .rules
                .iter()
                .position(|r| matches!(r.kind, RuleKind::Node { .. }))
                .map(|i| rule_index[&self.rules[i].name])
                .ok_or_else(|| GrammarError::MissingEntryRule(self.name.clone()))?,
        };

        let mut compiler = Compiler {
            rule_index: &rule_index,
            terminal_index: terminals
                .iter()
                .enumerate()
                .map(|(i, t)| (t.name.as_str(), i))
                .collect(),
            elements: Vec::new(),
            keywords: IndexMap::new(),
        };

        let mut rules = Vec::with_capacity(self.rules.len());
        for (i, decl) in self.rules.iter().enumerate() {
            #[allow(clippy::cast_possible_truncation)]
            let rule = RuleId(i as u32);
            let body = compiler.compile(&decl.body, rule, None, None)?;
            rules.push(ParserRule {
                name: decl.name.clone(),
                kind: decl.kind.clone(),
                body,
            });
        }

        let Compiler {
            elements, keywords, ..
        } = compiler;

        let mut grammar = Grammar {
            name: self.name.clone(),
            rules,
            rule_index,
            elements,
            terminals,
            keywords: keywords.into_keys().collect(),
            entry,
            supertypes: HashMap::new(),
            mandatory: HashMap::new(),
        };
        grammar.supertypes = collect_supertypes(&grammar);
        grammar.mandatory = collect_mandatory(&grammar);

        debug!(
            grammar = %grammar.name,
            rules = grammar.rules.len(),
            terminals = grammar.terminals.len(),
            keywords = grammar.keywords.len(),
            "Compiled grammar"
        );
        Ok(grammar)
    }
}

struct Compiler<'a> {
    rule_index: &'a HashMap<String, RuleId>,
    terminal_index: HashMap<&'a str, usize>,
    elements: Vec<CompiledElement>,
    keywords: IndexMap<String, ()>,
}

impl Compiler<'_> {
    #[allow(clippy::cast_possible_truncation)]
    fn push(
        &mut self,
        kind: ElementKind,
        rule: RuleId,
        assignment: Option<ElementId>,
        cross_ref: Option<ElementId>,
    ) -> ElementId {
        let id = ElementId(self.elements.len() as u32);
        self.elements.push(CompiledElement {
            kind,
            rule,
            assignment,
            cross_ref,
        });
        id
    }

    /// Reserve a slot so wrappers get their id before their children.
    fn reserve(&mut self, rule: RuleId, assignment: Option<ElementId>, cross_ref: Option<ElementId>) -> ElementId {
        self.push(ElementKind::Group(Vec::new()), rule, assignment, cross_ref)
    }

    fn compile(
        &mut self,
        element: &Element,
        rule: RuleId,
        assignment: Option<ElementId>,
        cross_ref: Option<ElementId>,
    ) -> Result<ElementId> {
        let kind = match element {
            Element::Keyword(text) => {
                if text.trim().is_empty() {
                    return Err(GrammarError::InvalidKeyword(text.clone()));
                }
                let (index, _) = self.keywords.insert_full(text.clone(), ());
                #[allow(clippy::cast_possible_truncation)]
                ElementKind::Keyword(KeywordId(index as u32))
            }
            Element::Terminal(name) => {
                let index = self
                    .terminal_index
                    .get(name.as_str())
                    .ok_or_else(|| GrammarError::UnknownTerminal(name.clone()))?;
                #[allow(clippy::cast_possible_truncation)]
                ElementKind::Terminal(TerminalId(*index as u32))
            }
            Element::RuleCall(name) => ElementKind::RuleCall(
                *self
                    .rule_index
                    .get(name)
                    .ok_or_else(|| GrammarError::UnknownRule(name.clone()))?,
            ),
            Element::Assignment {
                feature,
                operator,
                value,
            } => {
                if let Some(outer) = assignment {
                    let outer = match &self.elements[outer.0 as usize].kind {
                        ElementKind::Assignment { feature, .. } => feature.clone(),
                        _ => String::new(),
                    };
                    return Err(GrammarError::NestedAssignment {
                        outer,
                        inner: feature.clone(),
                    });
                }
                let id = self.reserve(rule, None, None);
                let value = self.compile(value, rule, Some(id), None)?;
                self.elements[id.0 as usize].kind = ElementKind::Assignment {
                    feature: feature.clone(),
                    operator: *operator,
                    value,
                };
                return Ok(id);
            }
            Element::CrossReference { type_name, token } => {
                let id = self.reserve(rule, assignment, cross_ref);
                let token = self.compile(token, rule, assignment, Some(id))?;
                self.elements[id.0 as usize].kind = ElementKind::CrossReference {
                    type_name: type_name.clone(),
                    token,
                };
                return Ok(id);
            }
            Element::Group(children) => ElementKind::Group(
                children
                    .iter()
                    .map(|c| self.compile(c, rule, assignment, cross_ref))
                    .collect::<Result<_>>()?,
            ),
            Element::Alternatives(children) => ElementKind::Alternatives(
                children
                    .iter()
                    .map(|c| self.compile(c, rule, assignment, cross_ref))
                    .collect::<Result<_>>()?,
            ),
            Element::Repetition {
                element,
                cardinality,
            } => ElementKind::Repetition {
                element: self.compile(element, rule, assignment, cross_ref)?,
                cardinality: *cardinality,
            },
        };
        Ok(self.push(kind, rule, assignment, cross_ref))
    }
}

/// Derive direct supertypes from rules whose body is an unassigned rule call
/// or an alternative of unassigned rule calls.
fn collect_supertypes(grammar: &Grammar) -> HashMap<String, HashSet<String>> {
    let mut supertypes: HashMap<String, HashSet<String>> = HashMap::new();
    for rule in &grammar.rules {
        let Some(sup) = rule.type_name() else {
            continue;
        };
        let mut calls = Vec::new();
        unassigned_calls(grammar, rule.body, &mut calls);
        for called in calls {
            if let Some(sub) = grammar.rule(called).type_name()
                && sub != sup
            {
                supertypes
                    .entry(sub.to_string())
                    .or_default()
                    .insert(sup.to_string());
            }
        }
    }
    supertypes
}

fn unassigned_calls(grammar: &Grammar, id: ElementId, calls: &mut Vec<RuleId>) {
    match grammar.element(id) {
        ElementKind::RuleCall(rule) if grammar.assignment_of(id).is_none() => calls.push(*rule),
        ElementKind::Alternatives(children) => {
            for child in children {
                unassigned_calls(grammar, *child, calls);
            }
        }
        // `'(' Expr ')'` passes its single node through
        ElementKind::Group(children) => {
            let nodes: Vec<_> = children
                .iter()
                .filter(|c| matches!(grammar.element(**c), ElementKind::RuleCall(r) if grammar.rule(*r).type_name().is_some()))
                .collect();
            if let [only] = nodes.as_slice() {
                unassigned_calls(grammar, **only, calls);
            }
        }
        _ => {}
    }
}

/// Collect `+=` and `?=` features per produced type, following fragment calls.
fn collect_mandatory(grammar: &Grammar) -> HashMap<String, IndexMap<String, MandatoryDefault>> {
    let mut mandatory: HashMap<String, IndexMap<String, MandatoryDefault>> = HashMap::new();
    for rule in &grammar.rules {
        let Some(type_name) = rule.type_name() else {
            continue;
        };
        let defaults = mandatory.entry(type_name.to_string()).or_default();
        let mut visited = HashSet::new();
        collect_features(grammar, rule.body, defaults, &mut visited);
    }
    mandatory
}

fn collect_features(
    grammar: &Grammar,
    id: ElementId,
    defaults: &mut IndexMap<String, MandatoryDefault>,
    visited: &mut HashSet<RuleId>,
) {
    match grammar.element(id) {
        ElementKind::Assignment {
            feature, operator, ..
        } => {
            let default = match operator {
                AssignOp::Append => MandatoryDefault::EmptyList,
                AssignOp::Flag => MandatoryDefault::False,
                AssignOp::Assign => return,
            };
            defaults.entry(feature.clone()).or_insert(default);
        }
        ElementKind::RuleCall(rule) => {
            let rule_def = grammar.rule(*rule);
            if matches!(rule_def.kind, RuleKind::Fragment) && visited.insert(*rule) {
                collect_features(grammar, rule_def.body, defaults, visited);
            }
        }
        ElementKind::Group(children) | ElementKind::Alternatives(children) => {
            for child in children {
                collect_features(grammar, *child, defaults, visited);
            }
        }
        ElementKind::Repetition { element, .. } => {
            collect_features(grammar, *element, defaults, visited);
        }
        ElementKind::CrossReference { .. } | ElementKind::Keyword(_) | ElementKind::Terminal(_) => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> GrammarBuilder {
        let mut builder = GrammarBuilder::new("sample");
        builder
            .node_rule("Model", many(append("items", call("Item"))))
            .node_rule("Item", alt([call("Thing"), call("Other")]))
            .node_rule(
                "Thing",
                group([
                    flag("abstract", optional(keyword("abstract"))),
                    keyword("thing"),
                    assign("name", terminal("ID")),
                    optional(group([
                        keyword("->"),
                        assign("target", cross_ref("Item", terminal("ID"))),
                    ])),
                ]),
            )
            .node_rule("Other", group([keyword("other"), assign("name", terminal("ID"))]))
            .terminal("ID", r"[a-z]+")
            .hidden_terminal("WS", r"\s+");
        builder
    }

    #[test]
    fn first_node_rule_is_entry() {
        let grammar = sample().build().unwrap();
        assert_eq!(grammar.entry_rule().name(), "Model");
    }

    #[test]
    fn unknown_rule_is_rejected() {
        let mut builder = sample();
        builder.node_rule("Broken", call("Missing"));

        let result = builder.build();

        assert!(matches!(result, Err(GrammarError::UnknownRule(name)) if name == "Missing"));
    }

    #[test]
    fn unknown_terminal_is_rejected() {
        let mut builder = sample();
        builder.node_rule("Broken", terminal("NUMBER"));

        assert!(matches!(builder.build(), Err(GrammarError::UnknownTerminal(_))));
    }

    #[test]
    fn duplicate_names_are_rejected() {
        let mut builder = sample();
        builder.terminal("Thing", "x");

        assert!(matches!(builder.build(), Err(GrammarError::DuplicateRule(name)) if name == "Thing"));
    }

    #[test]
    fn invalid_pattern_is_rejected() {
        let mut builder = sample();
        builder.terminal("BAD", "(");

        assert!(matches!(builder.build(), Err(GrammarError::InvalidPattern { .. })));
    }

    #[test]
    fn nested_assignment_is_rejected() {
        let mut builder = GrammarBuilder::new("nested");
        builder
            .node_rule("A", assign("outer", assign("inner", terminal("ID"))))
            .terminal("ID", "[a-z]+");

        assert!(matches!(builder.build(), Err(GrammarError::NestedAssignment { .. })));
    }

    #[test]
    fn grammar_without_node_rule_has_no_entry() {
        let mut builder = GrammarBuilder::new("empty");
        builder.data_type_rule("Name", terminal("ID")).terminal("ID", "[a-z]+");

        assert!(matches!(builder.build(), Err(GrammarError::MissingEntryRule(_))));
    }

    #[test]
    fn alternatives_of_calls_define_subtypes() {
        let grammar = sample().build().unwrap();

        assert!(grammar.is_subtype("Thing", "Item"));
        assert!(grammar.is_subtype("Other", "Item"));
        assert!(grammar.is_subtype("Item", "Item"));
        assert!(!grammar.is_subtype("Item", "Thing"));
        assert!(!grammar.is_subtype("Model", "Item"));
    }

    #[test]
    fn mandatory_defaults_follow_operators() {
        let grammar = sample().build().unwrap();

        let model: Vec<_> = grammar.mandatory_defaults("Model").collect();
        let thing: Vec<_> = grammar.mandatory_defaults("Thing").collect();

        assert_eq!(model, vec![("items", MandatoryDefault::EmptyList)]);
        assert_eq!(thing, vec![("abstract", MandatoryDefault::False)]);
    }

    #[test]
    fn assignments_are_visible_from_their_tokens() {
        let grammar = sample().build().unwrap();
        let thing = grammar.rule_by_name("Thing").unwrap();
        let ElementKind::Group(children) = grammar.element(thing.body()) else {
            panic!("Thing body should be a group");
        };
        let ElementKind::Assignment { value, .. } = grammar.element(children[2]) else {
            panic!("third element should assign name");
        };

        let info = grammar.assignment_of(*value).unwrap();

        assert_eq!(info.feature, "name");
        assert_eq!(info.operator, AssignOp::Assign);
        assert_eq!(info.cross_ref_type, None);
    }

    #[test]
    fn cross_reference_target_type_is_reflected() {
        let grammar = sample().build().unwrap();

        assert_eq!(grammar.reference_type("Thing", "target"), Some("Item"));
        assert_eq!(grammar.reference_type("Thing", "name"), None);
    }

    #[test]
    fn keywords_are_deduplicated() {
        let mut builder = sample();
        builder.node_rule("Again", group([keyword("thing"), assign("name", terminal("ID"))]));
        let grammar = builder.build().unwrap();

        assert_eq!(grammar.keywords().iter().filter(|k| *k == "thing").count(), 1);
    }
}
