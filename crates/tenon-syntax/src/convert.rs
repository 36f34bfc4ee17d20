//! Token text → property value conversion.

use crate::ast::Value;
use crate::cst::CstNodeId;
use crate::grammar::{Grammar, TokenType};

/// What is being converted.
#[derive(Debug, Clone, Copy)]
pub struct ConvertContext<'a> {
    /// Grammar the text was parsed with
    pub grammar: &'a Grammar,
    /// Terminal or data type rule that produced the text
    pub rule_name: &'a str,
    /// Token type, for single tokens
    pub token_type: Option<TokenType>,
    /// CST node holding the text
    pub cst: Option<CstNodeId>,
}

/// Converts raw token or data type text into a property value.
pub trait ValueConverter: Send + Sync {
    /// Convert `input`.
    fn convert(&self, input: &str, context: &ConvertContext<'_>) -> Value;
}

/// Conversions keyed by the conventional terminal names:
///
/// | Rule | Result |
/// |------|--------|
/// | `ID` | string without a leading `^` escape |
/// | `STRING` | unquoted string with `\n`, `\t`, `\r`, `\\` and quote escapes resolved |
/// | `INT`, `NUMBER` | number (string if it does not parse) |
/// | `BOOLEAN` | bool |
///
/// Anything else, including data type rules, stays a string.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultValueConverter;

impl ValueConverter for DefaultValueConverter {
    fn convert(&self, input: &str, context: &ConvertContext<'_>) -> Value {
        match context.rule_name {
            "ID" => Value::String(input.strip_prefix('^').unwrap_or(input).to_string()),
            "STRING" => Value::String(unquote(input)),
            "INT" | "NUMBER" => input
                .parse::<f64>()
                .map_or_else(|_| Value::String(input.to_string()), Value::Number),
            "BOOLEAN" => Value::Bool(input.eq_ignore_ascii_case("true")),
            _ => Value::String(input.to_string()),
        }
    }
}

fn unquote(input: &str) -> String {
    let mut chars = input.chars();
    let quote = chars.next();
    let inner = match quote {
        Some(q @ ('"' | '\'')) if input.len() >= 2 && input.ends_with(q) => &input[1..input.len() - 1],
        _ => input,
    };

    let mut result = String::with_capacity(inner.len());
    let mut escaped = inner.chars();
    while let Some(c) = escaped.next() {
        if c != '\\' {
            result.push(c);
            continue;
        }
        match escaped.next() {
            Some('n') => result.push('\n'),
            Some('t') => result.push('\t'),
            Some('r') => result.push('\r'),
            Some(other) => result.push(other),
            None => result.push('\\'),
        }
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grammar::{GrammarBuilder, terminal};
    use rstest::rstest;

    #[rstest]
    #[case("ID", "^entity", Value::String("entity".into()))]
    #[case("ID", "name", Value::String("name".into()))]
    #[case("STRING", r#""a\"b\n""#, Value::String("a\"b\n".into()))]
    #[case("STRING", "'single'", Value::String("single".into()))]
    #[case("INT", "42", Value::Number(42.0))]
    #[case("NUMBER", "x", Value::String("x".into()))]
    #[case("BOOLEAN", "true", Value::Bool(true))]
    #[case("QualifiedName", "a.b", Value::String("a.b".into()))]
    fn converts_by_rule_name(#[case] rule: &str, #[case] input: &str, #[case] expected: Value) {
        let mut builder = GrammarBuilder::new("convert");
        builder.node_rule("A", terminal("ID")).terminal("ID", "[a-z]+");
        let grammar = builder.build().unwrap();
        let context = ConvertContext {
            grammar: &grammar,
            rule_name: rule,
            token_type: None,
            cst: None,
        };

        assert_eq!(DefaultValueConverter.convert(input, &context), expected);
    }
}
