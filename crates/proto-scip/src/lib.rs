//! Message bindings for the SCIP index wire format.
//!
//! These mirror the subset of `scip.proto` that the index server consumes:
//! documents, occurrences with role bitflags, and symbol information.
//! Unknown fields and kinds are skipped during decoding, so artifacts from
//! newer indexers remain readable.

use prost::Message;

/// A complete SCIP index: metadata plus one entry per indexed document.
#[derive(Clone, PartialEq, Message)]
pub struct Index {
    #[prost(message, optional, tag = "1")]
    pub metadata: ::core::option::Option<Metadata>,
    #[prost(message, repeated, tag = "2")]
    pub documents: ::prost::alloc::vec::Vec<Document>,
    #[prost(message, repeated, tag = "3")]
    pub external_symbols: ::prost::alloc::vec::Vec<SymbolInformation>,
}

#[derive(Clone, PartialEq, Message)]
pub struct Metadata {
    #[prost(int32, tag = "1")]
    pub version: i32,
    #[prost(message, optional, tag = "2")]
    pub tool_info: ::core::option::Option<ToolInfo>,
    #[prost(string, tag = "3")]
    pub project_root: ::prost::alloc::string::String,
    #[prost(int32, tag = "4")]
    pub text_document_encoding: i32,
}

#[derive(Clone, PartialEq, Message)]
pub struct ToolInfo {
    #[prost(string, tag = "1")]
    pub name: ::prost::alloc::string::String,
    #[prost(string, tag = "2")]
    pub version: ::prost::alloc::string::String,
    #[prost(string, repeated, tag = "3")]
    pub arguments: ::prost::alloc::vec::Vec<::prost::alloc::string::String>,
}

/// One indexed source file and every symbol occurrence within it.
#[derive(Clone, PartialEq, Message)]
pub struct Document {
    #[prost(string, tag = "1")]
    pub relative_path: ::prost::alloc::string::String,
    #[prost(message, repeated, tag = "2")]
    pub occurrences: ::prost::alloc::vec::Vec<Occurrence>,
    #[prost(message, repeated, tag = "3")]
    pub symbols: ::prost::alloc::vec::Vec<SymbolInformation>,
    #[prost(string, tag = "4")]
    pub language: ::prost::alloc::string::String,
}

/// A single textual location at which a symbol is defined or referenced.
///
/// `range` is 0-indexed and half-open, in either the four-element
/// `[start_line, start_col, end_line, end_col]` form or the condensed
/// three-element `[line, start_col, end_col]` form for single-line ranges.
#[derive(Clone, PartialEq, Message)]
pub struct Occurrence {
    #[prost(int32, repeated, tag = "1")]
    pub range: ::prost::alloc::vec::Vec<i32>,
    #[prost(string, tag = "2")]
    pub symbol: ::prost::alloc::string::String,
    #[prost(int32, tag = "3")]
    pub symbol_roles: i32,
    #[prost(string, repeated, tag = "4")]
    pub override_documentation: ::prost::alloc::vec::Vec<::prost::alloc::string::String>,
}

#[derive(Clone, PartialEq, Message)]
pub struct SymbolInformation {
    #[prost(string, tag = "1")]
    pub symbol: ::prost::alloc::string::String,
    #[prost(string, repeated, tag = "3")]
    pub documentation: ::prost::alloc::vec::Vec<::prost::alloc::string::String>,
    #[prost(enumeration = "Kind", tag = "5")]
    pub kind: i32,
    #[prost(string, tag = "6")]
    pub display_name: ::prost::alloc::string::String,
    #[prost(string, tag = "8")]
    pub enclosing_symbol: ::prost::alloc::string::String,
}

/// Role bitflags carried on `Occurrence::symbol_roles`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, ::prost::Enumeration)]
#[repr(i32)]
pub enum SymbolRole {
    UnspecifiedSymbolRole = 0,
    Definition = 1,
    Import = 2,
    WriteAccess = 4,
    ReadAccess = 8,
    Generated = 16,
    Test = 32,
    ForwardDefinition = 64,
}

/// The subset of symbol kinds relevant to call-graph extraction, with the
/// wire values assigned by the indexers this server ingests from.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, ::prost::Enumeration)]
#[repr(i32)]
pub enum Kind {
    UnspecifiedKind = 0,
    Method = 6,
    Constructor = 9,
    Function = 12,
}

impl Kind {
    /// Stable lowercase name used in symbol fingerprints.
    pub fn as_fingerprint_name(&self) -> Option<&'static str> {
        match self {
            Kind::UnspecifiedKind => None,
            Kind::Method => Some("method"),
            Kind::Constructor => Some("constructor"),
            Kind::Function => Some("function"),
        }
    }

    pub fn is_callable(&self) -> bool {
        matches!(self, Kind::Method | Kind::Constructor | Kind::Function)
    }
}

impl Occurrence {
    pub fn has_role(&self, role: SymbolRole) -> bool {
        self.symbol_roles & role as i32 != 0
    }

    /// Decoded `(start_line, start_col, end_line, end_col)`, still 0-indexed.
    /// Returns None for ranges that are neither the three- nor the
    /// four-element encoding.
    pub fn decoded_range(&self) -> Option<(i32, i32, i32, i32)> {
        match self.range.as_slice() {
            [line, start_col, end_col] => Some((*line, *start_col, *line, *end_col)),
            [start_line, start_col, end_line, end_col] => {
                Some((*start_line, *start_col, *end_line, *end_col))
            }
            _ => None,
        }
    }
}

impl Index {
    pub fn decode_bytes(buf: &[u8]) -> Result<Self, prost::DecodeError> {
        Self::decode(buf)
    }

    pub fn encode_bytes(&self) -> Vec<u8> {
        self.encode_to_vec()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fixture() -> Index {
        Index {
            metadata: Some(Metadata {
                version: 1,
                tool_info: Some(ToolInfo {
                    name: "scip-test".to_string(),
                    version: "0.1.0".to_string(),
                    arguments: vec![],
                }),
                project_root: "file:///work/acme".to_string(),
                text_document_encoding: 0,
            }),
            documents: vec![Document {
                relative_path: "src/lib.rs".to_string(),
                language: "rust".to_string(),
                occurrences: vec![
                    Occurrence {
                        range: vec![3, 7, 12],
                        symbol: "scip-test . . . lib/frobnicate().".to_string(),
                        symbol_roles: SymbolRole::Definition as i32,
                        override_documentation: vec![],
                    },
                    Occurrence {
                        range: vec![9, 4, 9, 14],
                        symbol: "scip-test . . . lib/frobnicate().".to_string(),
                        symbol_roles: 0,
                        override_documentation: vec![],
                    },
                ],
                symbols: vec![SymbolInformation {
                    symbol: "scip-test . . . lib/frobnicate().".to_string(),
                    documentation: vec!["Frobnicates the widget.".to_string()],
                    kind: Kind::Function as i32,
                    display_name: "frobnicate".to_string(),
                    enclosing_symbol: String::new(),
                }],
            }],
            external_symbols: vec![],
        }
    }

    #[test]
    fn round_trips_through_wire_encoding() {
        let index = fixture();
        let decoded = Index::decode_bytes(&index.encode_bytes()).unwrap();
        assert_eq!(index, decoded);
    }

    #[test]
    fn decodes_condensed_and_full_ranges() {
        let index = fixture();
        let doc = &index.documents[0];

        assert_eq!(doc.occurrences[0].decoded_range(), Some((3, 7, 3, 12)));
        assert_eq!(doc.occurrences[1].decoded_range(), Some((9, 4, 9, 14)));
        assert_eq!(
            Occurrence {
                range: vec![1, 2],
                ..Default::default()
            }
            .decoded_range(),
            None,
        );
    }

    #[test]
    fn role_bitflags() {
        let occ = &fixture().documents[0].occurrences[0];
        assert!(occ.has_role(SymbolRole::Definition));
        assert!(!occ.has_role(SymbolRole::Import));
    }

    #[test]
    fn unknown_kind_values_survive_decoding() {
        let mut index = fixture();
        index.documents[0].symbols[0].kind = 57; // not in our subset
        let decoded = Index::decode_bytes(&index.encode_bytes()).unwrap();

        assert_eq!(decoded.documents[0].symbols[0].kind, 57);
        assert_eq!(
            decoded.documents[0].symbols[0].kind(),
            Kind::UnspecifiedKind,
        );
    }
}
