//! Wire form of parse results.
//!
//! Parse results cross thread boundaries as JSON. Back-pointers (CST parents,
//! AST containers) and cached spans are not serialized; [`from_wire`] rebuilds
//! them so a hydrated result is indistinguishable from a freshly parsed one.

use crate::parser::ParseResult;

/// Serialize a parse result.
///
/// # Errors
///
/// Returns an error if serialization fails.
pub fn to_wire(result: &ParseResult) -> serde_json::Result<String> {
    serde_json::to_string(result)
}

/// Deserialize and hydrate a parse result.
///
/// # Errors
///
/// Returns an error if `wire` is not a serialized parse result.
pub fn from_wire(wire: &str) -> serde_json::Result<ParseResult> {
    let mut result: ParseResult = serde_json::from_str(wire)?;
    hydrate(&mut result);
    Ok(result)
}

/// Rebuild back-pointers stripped by serialization.
pub fn hydrate(result: &mut ParseResult) {
    result.cst.link_parents();
    result.ast.link_all_containers();
}
