//! Grammar-interpreting parser producing an AST and its CST.
//!
//! Every parser rule of the [`Grammar`] is run as a rule procedure:
//!
//! 1. Node rules allocate a typed AST node, fragment rules an untyped
//!    placeholder, data type rules a string accumulator.
//! 2. The rule body is interpreted element by element. Choices between
//!    alternatives and whether to enter an optional or repeated element are
//!    decided by speculative recognition, which only reads the token stream
//!    and never touches the CST or AST under construction.
//! 3. Consumed tokens inside an assignment are converted and assigned to the
//!    current node. Cross-reference assignments store an unresolved
//!    [`Reference`].
//! 4. An unassigned call of another node rule hands its result over as the
//!    new current node, which inherits the properties of the node it replaces.
//! 5. When the rule returns, containment back-pointers and mandatory defaults
//!    are filled in and the CST composite is closed.
//!
//! # Error recovery
//!
//! Parsing never fails. Errors are collected and parsing continues using
//! single-token deletion (an unexpected token directly before the expected
//! one is skipped), single-token insertion (a missing token is assumed when
//! the rest of the sequence can continue), partial results kept inside
//! optional and repeated elements, and skip-and-resume at the entry rule.
//! Tokens inserted by recovery never produce CST leaves or property values.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::ast::{Ast, AstNodeId, Reference, Value};
use crate::convert::{ConvertContext, DefaultValueConverter, ValueConverter};
use crate::cst::{CstBuilder, CstNodeId, CstTree};
use crate::error::{Result, SyntaxError};
use crate::grammar::{AssignmentInfo, Cardinality, ElementId, ElementKind, Grammar, RuleId, RuleKind, TokenType};
use crate::lexer::{Lexer, LexingReport, Token};
use crate::text::LineIndex;

/// Rule calls nested deeper than this are reported instead of followed.
const MAX_RULE_DEPTH: usize = 512;

/// Everything produced by parsing one text.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParseResult {
    /// The abstract syntax tree
    pub ast: Ast,
    /// The concrete syntax tree
    pub cst: CstTree,
    /// Unrecognized input
    pub lexer_errors: Vec<SyntaxError>,
    /// Grammar violations
    pub parser_errors: Vec<SyntaxError>,
    /// Token statistics
    pub lexer_report: Option<LexingReport>,
}

impl ParseResult {
    /// An empty result over `text`, with no AST root.
    #[must_use]
    pub fn empty(text: &str) -> Self {
        Self {
            ast: Ast::default(),
            cst: CstTree::new(text),
            lexer_errors: Vec::new(),
            parser_errors: Vec::new(),
            lexer_report: None,
        }
    }

    /// The root AST node.
    #[must_use]
    pub const fn root(&self) -> Option<AstNodeId> {
        self.ast.root()
    }

    /// Returns `true` if lexing or parsing reported errors.
    #[must_use]
    pub fn has_errors(&self) -> bool {
        !self.lexer_errors.is_empty() || !self.parser_errors.is_empty()
    }
}

/// The abort flag was raised while parsing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("parse aborted")]
pub struct ParseAborted;

/// Parser for one grammar.
#[derive(Clone)]
pub struct AstParser {
    grammar: Arc<Grammar>,
    lexer: Lexer,
    converter: Arc<dyn ValueConverter>,
}

impl std::fmt::Debug for AstParser {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AstParser")
            .field("grammar", &self.grammar.name())
            .finish_non_exhaustive()
    }
}

impl AstParser {
    /// Create a parser using [`DefaultValueConverter`].
    ///
    /// # Errors
    ///
    /// Returns an error if the grammar's terminals do not compile.
    pub fn new(grammar: Arc<Grammar>) -> Result<Self> {
        Self::with_converter(grammar, Arc::new(DefaultValueConverter))
    }

    /// Create a parser with a custom value converter.
    ///
    /// # Errors
    ///
    /// Returns an error if the grammar's terminals do not compile.
    pub fn with_converter(grammar: Arc<Grammar>, converter: Arc<dyn ValueConverter>) -> Result<Self> {
        let lexer = Lexer::new(&grammar)?;
        Ok(Self {
            grammar,
            lexer,
            converter,
        })
    }

    /// The grammar this parser interprets.
    #[must_use]
    pub const fn grammar(&self) -> &Arc<Grammar> {
        &self.grammar
    }

    /// Parse `text`.
    #[must_use]
    pub fn parse(&self, text: &str) -> ParseResult {
        self.run(text, None)
            .unwrap_or_else(|ParseAborted| ParseResult::empty(text))
    }

    /// Parse `text`, giving up as soon as `abort` is raised. The flag is
    /// checked before every token and rule call.
    ///
    /// # Errors
    ///
    /// Returns [`ParseAborted`] if the flag was raised.
    pub fn parse_interruptible(&self, text: &str, abort: &AtomicBool) -> std::result::Result<ParseResult, ParseAborted> {
        self.run(text, Some(abort))
    }

    fn run(&self, text: &str, abort: Option<&AtomicBool>) -> std::result::Result<ParseResult, ParseAborted> {
        let lexed = self.lexer.tokenize(text);
        let run = ParseRun {
            grammar: &self.grammar,
            converter: self.converter.as_ref(),
            abort,
            text,
            lines: LineIndex::new(text),
            tokens: lexed.tokens,
            pos: 0,
            pending_hidden: Vec::new(),
            cst: CstBuilder::default(),
            ast: Ast::default(),
            frames: Vec::new(),
            errors: Vec::new(),
            last_error_at: None,
            memo: HashMap::new(),
            depth: 0,
        };
        let (ast, cst, parser_errors) = run.parse_entry(lexed.trailing_hidden)?;
        debug!(
            grammar = %self.grammar.name(),
            tokens = lexed.report.token_count,
            lexer_errors = lexed.errors.len(),
            parser_errors = parser_errors.len(),
            "Parsed text"
        );
        Ok(ParseResult {
            ast,
            cst,
            lexer_errors: lexed.errors,
            parser_errors,
            lexer_report: Some(lexed.report),
        })
    }
}

enum Frame {
    Node(AstNodeId),
    Text(String),
}

enum RuleValue {
    Node(AstNodeId),
    Data(Value),
}

enum Interrupt {
    Mismatch,
    Aborted,
}

type Step = std::result::Result<(), Interrupt>;

/// `Ok(end)` when an element matches up to `end`, `Err(furthest)` otherwise.
type Recognized = std::result::Result<usize, usize>;

struct ParseRun<'p> {
    grammar: &'p Grammar,
    converter: &'p dyn ValueConverter,
    abort: Option<&'p AtomicBool>,
    text: &'p str,
    lines: LineIndex,
    tokens: Vec<Token>,
    pos: usize,
    pending_hidden: Vec<Token>,
    cst: CstBuilder,
    ast: Ast,
    frames: Vec<Frame>,
    errors: Vec<SyntaxError>,
    last_error_at: Option<usize>,
    memo: HashMap<(RuleId, usize), Recognized>,
    depth: usize,
}

impl ParseRun<'_> {
    fn parse_entry(
        mut self,
        trailing_hidden: Vec<Token>,
    ) -> std::result::Result<(Ast, CstTree, Vec<SyntaxError>), ParseAborted> {
        let grammar = self.grammar;
        let entry_id = grammar.entry_rule_id();
        let entry = grammar.rule(entry_id);
        self.cst.build_root(self.text);
        self.push_frame(entry_id);

        loop {
            if let Err(Interrupt::Aborted) = self.element(entry.body()) {
                return Err(ParseAborted);
            }
            let Some(token) = self.tokens.get(self.pos) else {
                break;
            };
            let message = format!("Unexpected token '{}'.", token.image);
            self.report(message);
            self.skip_token();
        }

        let mut hidden = std::mem::take(&mut self.pending_hidden);
        hidden.extend(trailing_hidden);
        self.cst.add_hidden_nodes(&hidden);

        let (value, _) = self.finish_rule(entry_id);
        if let RuleValue::Node(root) = value {
            self.ast.set_root(Some(root));
        }
        Ok((self.ast, self.cst.finish(), self.errors))
    }

    fn check_abort(&self) -> Step {
        if self.abort.is_some_and(|flag| flag.load(Ordering::Relaxed)) {
            Err(Interrupt::Aborted)
        } else {
            Ok(())
        }
    }

    // === Rule invocation ===

    fn push_frame(&mut self, rule: RuleId) {
        let frame = match self.grammar.rule(rule).kind() {
            RuleKind::Node { type_name } => Frame::Node(self.ast.alloc(Some(type_name))),
            RuleKind::Fragment => Frame::Node(self.ast.alloc(None)),
            RuleKind::DataType => Frame::Text(String::new()),
        };
        self.frames.push(frame);
    }

    fn subrule(&mut self, rule: RuleId, call_site: ElementId) -> Step {
        self.check_abort()?;
        if self.depth >= MAX_RULE_DEPTH {
            self.report("Maximum rule nesting depth exceeded.".to_string());
            return Err(Interrupt::Mismatch);
        }

        let start = self.pos;
        self.depth += 1;
        self.cst.enter_composite(call_site);
        self.push_frame(rule);
        let outcome = self.element(self.grammar.rule(rule).body());
        self.depth -= 1;
        if let Err(Interrupt::Aborted) = outcome {
            return Err(Interrupt::Aborted);
        }

        let (value, cst) = self.finish_rule(rule);
        if outcome.is_ok() || self.pos > start {
            self.apply_subrule_result(value, cst, call_site);
        }
        outcome
    }

    /// Pop the rule's frame, complete its node and close its composite.
    fn finish_rule(&mut self, rule: RuleId) -> (RuleValue, Option<CstNodeId>) {
        let grammar = self.grammar;
        match self.frames.pop() {
            Some(Frame::Node(node)) => {
                self.ast.link_containers(node);
                if let Some(type_name) = self.ast.node(node).type_name().map(str::to_string) {
                    self.ast.apply_defaults(node, grammar.mandatory_defaults(&type_name));
                }
                let cst = self.cst.construct(&mut self.ast, Some(node));
                (RuleValue::Node(node), cst)
            }
            Some(Frame::Text(text)) => {
                let cst = self.cst.construct(&mut self.ast, None);
                let context = ConvertContext {
                    grammar,
                    rule_name: grammar.rule(rule).name(),
                    token_type: None,
                    cst,
                };
                (RuleValue::Data(self.converter.convert(&text, &context)), cst)
            }
            None => (RuleValue::Data(Value::String(String::new())), None),
        }
    }

    fn apply_subrule_result(&mut self, value: RuleValue, cst: Option<CstNodeId>, call_site: ElementId) {
        let grammar = self.grammar;
        if let Some(assignment) = grammar.assignment_of(call_site) {
            let value = match value {
                RuleValue::Node(node) => Value::Node(node),
                RuleValue::Data(value) => value,
            };
            self.assign(assignment, value, cst);
            return;
        }

        match (self.frames.last_mut(), value) {
            (Some(Frame::Text(text)), RuleValue::Data(value)) => text.push_str(&value.to_text()),
            (Some(Frame::Node(current)), RuleValue::Node(result)) => {
                self.ast.inherit_properties(result, *current);
                self.cst.detach_ast(&mut self.ast, result);
                *current = result;
            }
            _ => {}
        }
    }

    fn assign(&mut self, assignment: AssignmentInfo<'_>, value: Value, cst: Option<CstNodeId>) {
        let Some(Frame::Node(node)) = self.frames.last() else {
            return;
        };
        let value = match assignment.cross_ref_type {
            Some(target_type) => Value::Reference(Reference::new(value.to_text(), cst, target_type)),
            None => value,
        };
        self.ast.assign(*node, assignment.operator, assignment.feature, value);
    }

    // === Elements ===

    fn element(&mut self, id: ElementId) -> Step {
        let grammar = self.grammar;
        match grammar.element(id) {
            ElementKind::Keyword(k) => self.consume(TokenType::Keyword(*k), id),
            ElementKind::Terminal(t) => self.consume(TokenType::Terminal(*t), id),
            ElementKind::RuleCall(rule) => self.subrule(*rule, id),
            ElementKind::Assignment { value, .. } => self.element(*value),
            ElementKind::CrossReference { token, .. } => self.element(*token),
            ElementKind::Group(children) => self.group(children),
            ElementKind::Alternatives(alternatives) => self.alternatives(alternatives),
            ElementKind::Repetition {
                element,
                cardinality,
            } => self.repetition(*element, *cardinality),
        }
    }

    fn group(&mut self, children: &[ElementId]) -> Step {
        for (i, child) in children.iter().enumerate() {
            match self.element(*child) {
                Ok(()) => {}
                Err(Interrupt::Mismatch) => {
                    let Some(token_type) = self.insertable(*child, children.get(i + 1).copied()) else {
                        return Err(Interrupt::Mismatch);
                    };
                    self.accept(Token::virtual_token(token_type), *child);
                }
                Err(Interrupt::Aborted) => return Err(Interrupt::Aborted),
            }
        }
        Ok(())
    }

    /// Token type to insert in place of `missing` when the sequence can go on
    /// without it: the next element matches here, or nothing follows and the
    /// input is exhausted.
    fn insertable(&mut self, missing: ElementId, next: Option<ElementId>) -> Option<TokenType> {
        let grammar = self.grammar;
        let mut element = missing;
        let token_type = loop {
            match grammar.element(element) {
                ElementKind::Keyword(k) => break TokenType::Keyword(*k),
                ElementKind::Terminal(t) => break TokenType::Terminal(*t),
                ElementKind::Assignment { value, .. } => element = *value,
                ElementKind::CrossReference { token, .. } => element = *token,
                _ => return None,
            }
        };
        let viable = match next {
            Some(next) => self.predicts(next),
            None => self.pos >= self.tokens.len(),
        };
        viable.then_some(token_type)
    }

    fn alternatives(&mut self, alternatives: &[ElementId]) -> Step {
        let pos = self.pos;
        let mut partial: Option<(usize, ElementId)> = None;
        let mut empty = None;
        for alternative in alternatives {
            match self.recognize(*alternative, pos) {
                Ok(end) if end > pos => return self.element(*alternative),
                Ok(_) => {
                    empty.get_or_insert(*alternative);
                }
                Err(furthest) if furthest > pos && partial.is_none_or(|(best, _)| furthest > best) => {
                    partial = Some((furthest, *alternative));
                }
                Err(_) => {}
            }
        }
        if let Some(choice) = partial.map(|(_, alternative)| alternative).or(empty) {
            return self.element(choice);
        }

        let mut expected = Vec::new();
        for alternative in alternatives {
            self.first_tokens(*alternative, &mut expected, &mut HashSet::new());
        }
        let expected: Vec<String> = expected
            .into_iter()
            .map(|t| self.grammar.token_type_name(t))
            .collect();
        let message = format!(
            "Expecting one of {} but found {}.",
            expected.join(", "),
            self.found()
        );
        self.report(message);
        Err(Interrupt::Mismatch)
    }

    fn repetition(&mut self, element: ElementId, cardinality: Cardinality) -> Step {
        match cardinality {
            Cardinality::Optional => {
                if self.predicts(element) {
                    self.iteration(element)?;
                }
                Ok(())
            }
            Cardinality::ZeroOrMore => self.iterate(element),
            Cardinality::OneOrMore => {
                self.element(element)?;
                self.iterate(element)
            }
        }
    }

    fn iterate(&mut self, element: ElementId) -> Step {
        while self.predicts(element) {
            let before = self.pos;
            self.iteration(element)?;
            if self.pos == before {
                break;
            }
        }
        Ok(())
    }

    /// One pass over a repeated element. A pass that consumed input keeps its
    /// partial result even if it failed.
    fn iteration(&mut self, element: ElementId) -> Step {
        let before = self.pos;
        match self.element(element) {
            Err(Interrupt::Mismatch) if self.pos > before => Ok(()),
            other => other,
        }
    }

    // === Tokens ===

    fn matches(&self, index: usize, expected: TokenType) -> bool {
        self.tokens
            .get(index)
            .is_some_and(|token| token.token_type == expected)
    }

    fn consume(&mut self, expected: TokenType, element: ElementId) -> Step {
        self.check_abort()?;
        if self.matches(self.pos, expected) {
            self.take_token(element);
            return Ok(());
        }
        if self.matches(self.pos + 1, expected) {
            let message = format!("Unexpected token {}.", self.found());
            self.report(message);
            self.skip_token();
            self.take_token(element);
            return Ok(());
        }
        let message = format!(
            "Expecting {} but found {}.",
            self.grammar.token_type_name(expected),
            self.found()
        );
        self.report(message);
        Err(Interrupt::Mismatch)
    }

    fn take_token(&mut self, element: ElementId) {
        let token = self.tokens[self.pos].clone();
        self.pos += 1;
        self.accept(token, element);
    }

    fn skip_token(&mut self) {
        if let Some(token) = self.tokens.get_mut(self.pos) {
            self.pending_hidden.append(&mut token.leading_hidden);
        }
        self.pos += 1;
    }

    /// Add a consumed token to the CST and assign its value.
    fn accept(&mut self, mut token: Token, element: ElementId) {
        if token.is_virtual() {
            return;
        }
        let mut hidden = std::mem::take(&mut self.pending_hidden);
        hidden.append(&mut token.leading_hidden);
        self.cst.add_hidden_nodes(&hidden);

        let grammar = self.grammar;
        let assignment = grammar.assignment_of(element);
        let (rule_name, is_keyword) = match token.token_type {
            TokenType::Keyword(_) => ("", true),
            TokenType::Terminal(t) => (grammar.terminal(t).name(), false),
        };
        let feature = (assignment.is_some() || !is_keyword).then_some(element);
        let leaf = self.cst.add_leaf(&token, feature);

        let value = if is_keyword {
            Value::String(token.image)
        } else {
            let context = ConvertContext {
                grammar,
                rule_name,
                token_type: Some(token.token_type),
                cst: leaf,
            };
            self.converter.convert(&token.image, &context)
        };

        if let Some(assignment) = assignment {
            self.assign(assignment, value, leaf);
        } else if let Some(Frame::Text(text)) = self.frames.last_mut() {
            text.push_str(&value.to_text());
        }
    }

    fn found(&self) -> String {
        self.tokens
            .get(self.pos)
            .map_or_else(|| "end of input".to_string(), |t| format!("'{}'", t.image))
    }

    /// Record an error at the current token, at most one per token.
    fn report(&mut self, message: String) {
        if self.last_error_at == Some(self.pos) {
            return;
        }
        self.last_error_at = Some(self.pos);
        let (offset, length) = self
            .tokens
            .get(self.pos)
            .map_or((self.text.len(), 0), |t| (t.offset.unwrap_or(0), t.image.len()));
        self.errors.push(SyntaxError {
            message,
            offset,
            length,
            position: self.lines.position(self.text, offset),
        });
    }

    // === Speculation ===

    /// Whether entering `element` here would consume input.
    fn predicts(&mut self, element: ElementId) -> bool {
        let pos = self.pos;
        match self.recognize(element, pos) {
            Ok(end) => end > pos,
            Err(furthest) => furthest > pos,
        }
    }

    fn recognize(&mut self, id: ElementId, pos: usize) -> Recognized {
        let grammar = self.grammar;
        match grammar.element(id) {
            ElementKind::Keyword(k) => self.recognize_token(TokenType::Keyword(*k), pos),
            ElementKind::Terminal(t) => self.recognize_token(TokenType::Terminal(*t), pos),
            ElementKind::RuleCall(rule) => {
                if let Some(known) = self.memo.get(&(*rule, pos)) {
                    return *known;
                }
                // Left recursion fails instead of looping
                self.memo.insert((*rule, pos), Err(pos));
                let result = self.recognize(grammar.rule(*rule).body(), pos);
                self.memo.insert((*rule, pos), result);
                result
            }
            ElementKind::Assignment { value, .. } => self.recognize(*value, pos),
            ElementKind::CrossReference { token, .. } => self.recognize(*token, pos),
            ElementKind::Group(children) => {
                let mut end = pos;
                for child in children {
                    end = self.recognize(*child, end)?;
                }
                Ok(end)
            }
            ElementKind::Alternatives(alternatives) => {
                let mut furthest = pos;
                let mut empty = false;
                for alternative in alternatives {
                    match self.recognize(*alternative, pos) {
                        Ok(end) if end > pos => return Ok(end),
                        Ok(_) => empty = true,
                        Err(f) => furthest = furthest.max(f),
                    }
                }
                if empty { Ok(pos) } else { Err(furthest) }
            }
            ElementKind::Repetition {
                element,
                cardinality,
            } => {
                let mut end = pos;
                if *cardinality == Cardinality::OneOrMore {
                    end = self.recognize(*element, end)?;
                }
                loop {
                    match self.recognize(*element, end) {
                        Ok(next) if next > end => end = next,
                        Err(f) if f > end => return Err(f),
                        Ok(_) | Err(_) => break,
                    }
                    if *cardinality == Cardinality::Optional {
                        break;
                    }
                }
                Ok(end)
            }
        }
    }

    fn recognize_token(&self, expected: TokenType, pos: usize) -> Recognized {
        if self.matches(pos, expected) {
            Ok(pos + 1)
        } else {
            Err(pos)
        }
    }

    /// Token types that can start `id`, for error messages.
    fn first_tokens(&self, id: ElementId, out: &mut Vec<TokenType>, visited: &mut HashSet<RuleId>) {
        let grammar = self.grammar;
        match grammar.element(id) {
            ElementKind::Keyword(k) => push_unique(out, TokenType::Keyword(*k)),
            ElementKind::Terminal(t) => push_unique(out, TokenType::Terminal(*t)),
            ElementKind::RuleCall(rule) => {
                if visited.insert(*rule) {
                    self.first_tokens(grammar.rule(*rule).body(), out, visited);
                }
            }
            ElementKind::Assignment { value, .. } => self.first_tokens(*value, out, visited),
            ElementKind::CrossReference { token, .. } => self.first_tokens(*token, out, visited),
            ElementKind::Group(children) => {
                for child in children {
                    self.first_tokens(*child, out, visited);
                    let skippable = matches!(
                        grammar.element(*child),
                        ElementKind::Repetition {
                            cardinality: Cardinality::Optional | Cardinality::ZeroOrMore,
                            ..
                        }
                    );
                    if !skippable {
                        break;
                    }
                }
            }
            ElementKind::Alternatives(alternatives) => {
                for alternative in alternatives {
                    self.first_tokens(*alternative, out, visited);
                }
            }
            ElementKind::Repetition { element, .. } => self.first_tokens(*element, out, visited),
        }
    }
}

fn push_unique(out: &mut Vec<TokenType>, token_type: TokenType) {
    if !out.contains(&token_type) {
        out.push(token_type);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grammar::{
        GrammarBuilder, alt, append, assign, call, cross_ref, flag, group, keyword, many, optional, terminal,
    };

    fn parser(configure: impl FnOnce(&mut GrammarBuilder)) -> AstParser {
        let mut builder = GrammarBuilder::new("test");
        configure(&mut builder);
        builder
            .terminal("ID", r"[_a-zA-Z][\w_]*")
            .terminal("INT", r"[0-9]+")
            .hidden_terminal("WS", r"\s+")
            .hidden_terminal("ML_COMMENT", r"/\*[\s\S]*?\*/");
        AstParser::new(Arc::new(builder.build().unwrap())).unwrap()
    }

    fn list_len(result: &ParseResult, node: AstNodeId, property: &str) -> usize {
        result
            .ast
            .node(node)
            .get(property)
            .and_then(Value::as_list)
            .map_or(0, <[Value]>::len)
    }

    #[test]
    fn assigns_terminals_and_keywords() {
        let parser = parser(|g| {
            g.node_rule(
                "Feature",
                group([
                    flag("many", optional(keyword("many"))),
                    assign("name", terminal("ID")),
                    keyword(":"),
                    assign("size", terminal("INT")),
                ]),
            );
        });

        let result = parser.parse("many items : 3");

        assert!(!result.has_errors(), "{:?}", result.parser_errors);
        let root = result.root().unwrap();
        let node = result.ast.node(root);
        assert_eq!(node.type_name(), Some("Feature"));
        assert_eq!(node.name(), Some("items"));
        assert_eq!(node.get("many"), Some(&Value::Bool(true)));
        assert_eq!(node.get("size"), Some(&Value::Number(3.0)));
    }

    #[test]
    fn absent_flag_gets_false_default() {
        let parser = parser(|g| {
            g.node_rule(
                "Feature",
                group([flag("many", optional(keyword("many"))), assign("name", terminal("ID"))]),
            );
        });

        let result = parser.parse("items");

        let root = result.root().unwrap();
        assert_eq!(result.ast.node(root).get("many"), Some(&Value::Bool(false)));
    }

    #[test]
    fn cross_references_are_unresolved_with_leaf() {
        let parser = parser(|g| {
            g.node_rule(
                "Use",
                group([keyword("use"), assign("target", cross_ref("Thing", terminal("ID")))]),
            );
        });

        let result = parser.parse("use foo");

        let root = result.root().unwrap();
        let reference = result.ast.node(root).get("target").and_then(Value::as_reference).unwrap();
        assert_eq!(reference.text, "foo");
        assert_eq!(reference.target_type, "Thing");
        assert_eq!(reference.target(), None);
        let leaf = reference.cst.unwrap();
        assert_eq!(result.cst.text_of(leaf), "foo");
    }

    #[test]
    fn data_type_rules_concatenate_text() {
        let parser = parser(|g| {
            g.node_rule("Import", group([keyword("import"), assign("path", call("QualifiedName"))]))
                .data_type_rule(
                    "QualifiedName",
                    group([terminal("ID"), many(group([keyword("."), terminal("ID")]))]),
                );
        });

        let result = parser.parse("import a . b.c");

        let root = result.root().unwrap();
        assert_eq!(result.ast.node(root).get("path"), Some(&Value::String("a.b.c".into())));
    }

    #[test]
    fn unassigned_call_passes_node_through() {
        let parser = parser(|g| {
            g.node_rule("Model", many(append("items", call("Item"))))
                .node_rule("Item", alt([call("A"), call("B")]))
                .node_rule("A", group([keyword("a"), assign("name", terminal("ID"))]))
                .node_rule("B", group([keyword("b"), assign("name", terminal("ID"))]));
        });

        let result = parser.parse("a x b y");

        let root = result.root().unwrap();
        let items = result.ast.children(root);
        let types: Vec<_> = items.iter().map(|i| result.ast.node(*i).type_name()).collect();
        assert_eq!(types, vec![Some("A"), Some("B")]);
        assert_eq!(result.ast.path_of(items[1]), "/items@1");
        // The node kept by the CST is the A node, not the discarded Item placeholder
        let cst = result.ast.node(items[0]).cst().unwrap();
        assert_eq!(result.cst.ast_node(cst), Some(items[0]));
        assert_eq!(result.cst.text_of(cst), "a x");
    }

    #[test]
    fn fragment_properties_merge_into_caller() {
        let parser = parser(|g| {
            g.node_rule(
                "Entity",
                group([
                    keyword("entity"),
                    append("tags", terminal("ID")),
                    call("Named"),
                ]),
            )
            .fragment_rule(
                "Named",
                group([keyword("named"), assign("name", terminal("ID")), append("tags", terminal("ID"))]),
            );
        });

        let result = parser.parse("entity first named n second");

        assert!(!result.has_errors(), "{:?}", result.parser_errors);
        let root = result.root().unwrap();
        let node = result.ast.node(root);
        assert_eq!(node.type_name(), Some("Entity"));
        assert_eq!(node.name(), Some("n"));
        assert_eq!(
            node.get("tags"),
            Some(&Value::List(vec![Value::String("first".into()), Value::String("second".into())]))
        );
        assert_eq!(result.cst.ast_node(result.cst.root()), Some(root));
    }

    #[test]
    fn single_token_deletion_recovers() {
        let parser = parser(|g| {
            g.node_rule("Decl", group([keyword("decl"), assign("name", terminal("ID")), keyword(";")]));
        });

        let result = parser.parse("decl 42 x ;");

        assert_eq!(result.parser_errors.len(), 1);
        assert!(result.parser_errors[0].message.contains("'42'"));
        let root = result.root().unwrap();
        assert_eq!(result.ast.node(root).name(), Some("x"));
    }

    #[test]
    fn single_token_insertion_recovers_without_leaf() {
        let parser = parser(|g| {
            g.node_rule(
                "Block",
                group([keyword("block"), assign("name", terminal("ID")), keyword("{"), keyword("}")]),
            );
        });

        let result = parser.parse("block x }");

        assert_eq!(result.parser_errors.len(), 1);
        assert!(result.parser_errors[0].message.contains("'{'"));
        let root = result.cst.root();
        let leaves: Vec<_> = result
            .cst
            .leaves(root)
            .filter(|l| !result.cst.is_hidden(*l))
            .map(|l| result.cst.text_of(l))
            .collect();
        assert_eq!(leaves, vec!["block", "x", "}"]);
    }

    #[test]
    fn repeated_elements_keep_partial_results() {
        let parser = parser(|g| {
            g.node_rule("Model", many(append("entries", call("Entry"))))
                .node_rule(
                    "Entry",
                    group([keyword("entry"), assign("name", terminal("ID")), keyword("="), assign("value", terminal("INT"))]),
                );
        });

        let result = parser.parse("entry a = 1 entry b = entry c = 3");

        assert_eq!(result.parser_errors.len(), 1);
        let root = result.root().unwrap();
        assert_eq!(list_len(&result, root, "entries"), 3);
        let second = result.ast.children(root)[1];
        assert_eq!(result.ast.node(second).name(), Some("b"));
        assert_eq!(result.ast.node(second).get("value"), None);
    }

    #[test]
    fn entry_rule_skips_and_resumes() {
        let parser = parser(|g| {
            g.node_rule("Model", many(append("entries", call("Entry"))))
                .node_rule("Entry", group([keyword("entry"), assign("name", terminal("ID"))]));
        });

        let result = parser.parse("entry a 1 2 entry b");

        let root = result.root().unwrap();
        assert_eq!(list_len(&result, root, "entries"), 2);
        assert_eq!(result.parser_errors.len(), 2);
    }

    #[test]
    fn missing_trailing_token_at_end_of_input_is_inserted() {
        let parser = parser(|g| {
            g.node_rule("Decl", group([keyword("decl"), assign("name", terminal("ID")), keyword(";")]));
        });

        let result = parser.parse("decl x");

        assert_eq!(result.parser_errors.len(), 1);
        assert!(result.parser_errors[0].message.contains("end of input"));
        assert_eq!(result.ast.node(result.root().unwrap()).name(), Some("x"));
    }

    #[test]
    fn no_viable_alternative_lists_expectations() {
        let parser = parser(|g| {
            g.node_rule("Model", alt([call("A"), call("B")]))
                .node_rule("A", group([keyword("a"), assign("name", terminal("ID"))]))
                .node_rule("B", group([keyword("b"), assign("name", terminal("ID"))]));
        });

        let result = parser.parse("c");

        assert!(!result.parser_errors.is_empty());
        let message = &result.parser_errors[0].message;
        assert!(message.contains("'a'") && message.contains("'b'"), "{message}");
    }

    #[test]
    fn raised_abort_flag_interrupts() {
        let parser = parser(|g| {
            g.node_rule("Decl", group([keyword("decl"), assign("name", terminal("ID"))]));
        });
        let abort = AtomicBool::new(true);

        let result = parser.parse_interruptible("decl x", &abort);

        assert_eq!(result.unwrap_err(), ParseAborted);
    }

    #[test]
    fn lexer_errors_are_returned() {
        let parser = parser(|g| {
            g.node_rule("Decl", group([keyword("decl"), assign("name", terminal("ID"))]));
        });

        let result = parser.parse("decl # x");

        assert_eq!(result.lexer_errors.len(), 1);
        assert_eq!(result.lexer_report.unwrap().error_count, 1);
    }
}
