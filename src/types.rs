/// Stable external identifier of a customer; key for all per-customer state.
pub type CustomerIdent = String;

/// Identifier of one document version as reported by the document API.
/// Two documents are the same iff their idents are equal.
pub type DocumentIdent = String;
