//! Tokenizer driven by a compiled grammar's keywords and terminal rules.
//!
//! Matching is longest-match over every keyword and terminal pattern; when a
//! keyword and a terminal match the same length, the keyword wins. Hidden
//! tokens (whitespace, comments) are not part of the token stream the parser
//! sees. They ride along as the leading hidden tokens of the next visible
//! token, and whatever follows the last visible token is returned as
//! [`LexerResult::trailing_hidden`].

use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::trace;

use crate::error::{GrammarError, Result, SyntaxError};
use crate::grammar::{Grammar, KeywordId, TerminalId, TokenType};
use crate::text::LineIndex;

/// A lexed token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Token {
    /// Keyword or terminal that matched
    pub token_type: TokenType,
    /// Matched text
    pub image: String,
    /// Byte offset in the source. `None` for tokens inserted by error
    /// recovery, which have no source text.
    pub offset: Option<usize>,
    /// Whether this token is hidden
    pub hidden: bool,
    /// Hidden tokens directly preceding this token
    pub leading_hidden: Vec<Token>,
}

impl Token {
    /// A token inserted by error recovery.
    #[must_use]
    pub fn virtual_token(token_type: TokenType) -> Self {
        Self {
            token_type,
            image: String::new(),
            offset: None,
            hidden: false,
            leading_hidden: Vec::new(),
        }
    }

    /// Exclusive end offset, for tokens with a source position.
    #[must_use]
    pub fn end(&self) -> Option<usize> {
        self.offset.map(|offset| offset + self.image.len())
    }

    /// Returns `true` for tokens inserted by error recovery.
    #[must_use]
    pub const fn is_virtual(&self) -> bool {
        self.offset.is_none()
    }
}

/// Summary of one tokenization run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LexingReport {
    /// Visible tokens produced
    pub token_count: usize,
    /// Hidden tokens produced
    pub hidden_count: usize,
    /// Lexer errors reported
    pub error_count: usize,
}

/// Output of [`Lexer::tokenize`].
#[derive(Debug, Clone, Default)]
pub struct LexerResult {
    /// Visible tokens in source order
    pub tokens: Vec<Token>,
    /// Hidden tokens after the last visible token
    pub trailing_hidden: Vec<Token>,
    /// Unrecognized input
    pub errors: Vec<SyntaxError>,
    /// Counts for diagnostics
    pub report: LexingReport,
}

/// Tokenizer for one grammar.
#[derive(Debug, Clone)]
pub struct Lexer {
    keywords: Vec<(KeywordId, String)>,
    terminals: Vec<(TerminalId, Regex, bool)>,
}

impl Lexer {
    /// Compile the token vocabulary of `grammar`.
    ///
    /// # Errors
    ///
    /// Returns [`GrammarError::InvalidPattern`] if a terminal pattern does not
    /// compile once anchored.
    #[allow(clippy::cast_possible_truncation)]
    pub fn new(grammar: &Grammar) -> Result<Self> {
        let keywords = grammar
            .keywords()
            .iter()
            .enumerate()
            .map(|(i, k)| (KeywordId(i as u32), k.clone()))
            .collect();
        let terminals = grammar
            .terminals()
            .iter()
            .enumerate()
            .map(|(i, t)| {
                let regex = Regex::new(&format!(r"\A(?:{})", t.pattern())).map_err(|source| {
                    GrammarError::InvalidPattern {
                        name: t.name().to_string(),
                        source,
                    }
                })?;
                Ok((TerminalId(i as u32), regex, t.is_hidden()))
            })
            .collect::<Result<_>>()?;
        Ok(Self {
            keywords,
            terminals,
        })
    }

    /// Split `text` into tokens.
    #[must_use]
    pub fn tokenize(&self, text: &str) -> LexerResult {
        let lines = LineIndex::new(text);
        let mut result = LexerResult::default();
        let mut pending_hidden = Vec::new();
        let mut pos = 0;

        while pos < text.len() {
            let rest = &text[pos..];
            let Some((token_type, length, hidden)) = self.longest_match(rest) else {
                let skipped = rest.chars().next().map_or(1, char::len_utf8);
                match result.errors.last_mut() {
                    Some(last) if last.offset + last.length == pos => {
                        last.length += skipped;
                        last.message = unexpected_message(&text[last.offset..pos + skipped]);
                    }
                    _ => result.errors.push(SyntaxError {
                        message: unexpected_message(&rest[..skipped]),
                        offset: pos,
                        length: skipped,
                        position: lines.position(text, pos),
                    }),
                }
                pos += skipped;
                continue;
            };

            let token = Token {
                token_type,
                image: rest[..length].to_string(),
                offset: Some(pos),
                hidden,
                leading_hidden: Vec::new(),
            };
            if hidden {
                result.report.hidden_count += 1;
                pending_hidden.push(token);
            } else {
                result.tokens.push(Token {
                    leading_hidden: std::mem::take(&mut pending_hidden),
                    ..token
                });
            }
            pos += length;
        }

        result.trailing_hidden = pending_hidden;
        result.report.token_count = result.tokens.len();
        result.report.error_count = result.errors.len();
        trace!(
            tokens = result.report.token_count,
            hidden = result.report.hidden_count,
            errors = result.report.error_count,
            "Tokenized input"
        );
        result
    }

    fn longest_match(&self, rest: &str) -> Option<(TokenType, usize, bool)> {
        let mut best: Option<(TokenType, usize, bool)> = None;
        for (id, keyword) in &self.keywords {
            if rest.starts_with(keyword.as_str()) && best.is_none_or(|(_, len, _)| keyword.len() > len) {
                best = Some((TokenType::Keyword(*id), keyword.len(), false));
            }
        }
        for (id, regex, hidden) in &self.terminals {
            let Some(found) = regex.find(rest) else {
                continue;
            };
            let length = found.end();
            // Strictly longer only: keywords and earlier terminals win ties
            if length > 0 && best.is_none_or(|(_, len, _)| length > len) {
                best = Some((TokenType::Terminal(*id), length, *hidden));
            }
        }
        best
    }
}

fn unexpected_message(text: &str) -> String {
    format!("unexpected character(s) '{text}'")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grammar::{GrammarBuilder, assign, group, keyword, terminal};

    fn lexer() -> (Grammar, Lexer) {
        let mut builder = GrammarBuilder::new("lex");
        builder
            .node_rule(
                "Decl",
                group([keyword("entity"), assign("name", terminal("ID")), keyword("{")]),
            )
            .terminal("ID", r"[_a-zA-Z][\w_]*")
            .hidden_terminal("WS", r"\s+")
            .hidden_terminal("ML_COMMENT", r"/\*[\s\S]*?\*/");
        let grammar = builder.build().unwrap();
        let lexer = Lexer::new(&grammar).unwrap();
        (grammar, lexer)
    }

    fn names(grammar: &Grammar, result: &LexerResult) -> Vec<String> {
        result
            .tokens
            .iter()
            .map(|t| grammar.token_type_name(t.token_type))
            .collect()
    }

    #[test]
    fn keyword_wins_tie_with_terminal() {
        let (grammar, lexer) = lexer();

        let result = lexer.tokenize("entity");

        assert_eq!(names(&grammar, &result), vec!["'entity'"]);
    }

    #[test]
    fn longer_terminal_beats_keyword_prefix() {
        let (grammar, lexer) = lexer();

        let result = lexer.tokenize("entityName");

        assert_eq!(names(&grammar, &result), vec!["ID"]);
        assert_eq!(result.tokens[0].image, "entityName");
    }

    #[test]
    fn hidden_tokens_lead_the_next_visible_token() {
        let (_, lexer) = lexer();

        let result = lexer.tokenize("/* c */ foo ");

        assert_eq!(result.tokens.len(), 1);
        let foo = &result.tokens[0];
        assert_eq!(foo.offset, Some(8));
        let leading: Vec<_> = foo.leading_hidden.iter().map(|t| t.image.as_str()).collect();
        assert_eq!(leading, vec!["/* c */", " "]);
        assert_eq!(result.trailing_hidden.len(), 1);
        assert_eq!(result.report.hidden_count, 3);
    }

    #[test]
    fn unrecognized_characters_are_reported_and_skipped() {
        let (_, lexer) = lexer();

        let result = lexer.tokenize("a ## b\n$");

        assert_eq!(result.tokens.len(), 2);
        assert_eq!(result.errors.len(), 2);
        assert_eq!(result.errors[0].offset, 2);
        assert_eq!(result.errors[0].length, 2);
        assert_eq!(result.errors[1].position.line, 1);
        assert_eq!(result.report.error_count, 2);
    }

    #[test]
    fn virtual_tokens_have_no_offset() {
        let (grammar, _) = lexer();
        let token = Token::virtual_token(TokenType::Keyword(KeywordId(0)));

        assert!(token.is_virtual());
        assert_eq!(token.end(), None);
        assert_eq!(grammar.token_type_name(token.token_type), "'entity'");
    }
}
