//! Row-level records exchanged between a backend and the package layer.

use serde::{Deserialize, Serialize};

/// Discriminant of the nine element kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ElementType {
    Media,
    Annotation,
    Relation,
    View,
    Resource,
    Tag,
    List,
    Query,
    Import,
}

impl ElementType {
    pub const ALL: [ElementType; 9] = [
        ElementType::Media,
        ElementType::Annotation,
        ElementType::Relation,
        ElementType::View,
        ElementType::Resource,
        ElementType::Tag,
        ElementType::List,
        ElementType::Query,
        ElementType::Import,
    ];

    /// One-letter code stored in the `Elements.typ` column
    pub fn code(self) -> &'static str {
        match self {
            ElementType::Media => "m",
            ElementType::Annotation => "a",
            ElementType::Relation => "r",
            ElementType::View => "v",
            ElementType::Resource => "R",
            ElementType::Tag => "t",
            ElementType::List => "l",
            ElementType::Query => "q",
            ElementType::Import => "i",
        }
    }

    pub fn from_code(code: &str) -> Option<Self> {
        ElementType::ALL.into_iter().find(|t| t.code() == code)
    }

    pub fn name(self) -> &'static str {
        match self {
            ElementType::Media => "media",
            ElementType::Annotation => "annotation",
            ElementType::Relation => "relation",
            ElementType::View => "view",
            ElementType::Resource => "resource",
            ElementType::Tag => "tag",
            ElementType::List => "list",
            ElementType::Query => "query",
            ElementType::Import => "import",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        ElementType::ALL.into_iter().find(|t| t.name() == name)
    }

    /// Kinds carrying a content (mimetype, model, url, data)
    pub fn has_content(self) -> bool {
        matches!(
            self,
            ElementType::Annotation
                | ElementType::Relation
                | ElementType::View
                | ElementType::Resource
                | ElementType::Query
        )
    }
}

impl std::fmt::Display for ElementType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Full attribute record of one element, as stored
#[derive(Debug, Clone, PartialEq)]
pub struct ElementRecord {
    /// Backend package id of the owner
    pub package: String,
    pub id: String,
    pub data: RecordData,
}

/// Type-specific part of an [`ElementRecord`]
#[derive(Debug, Clone, PartialEq)]
pub enum RecordData {
    Media { url: String, frame_of_reference: String },
    /// `media` is an id-ref relative to the owner package
    Annotation { media: String, begin: i64, end: i64 },
    Relation,
    View,
    Resource,
    Tag,
    List,
    Query,
    Import { url: String, uri: String },
}

impl RecordData {
    pub fn element_type(&self) -> ElementType {
        match self {
            RecordData::Media { .. } => ElementType::Media,
            RecordData::Annotation { .. } => ElementType::Annotation,
            RecordData::Relation => ElementType::Relation,
            RecordData::View => ElementType::View,
            RecordData::Resource => ElementType::Resource,
            RecordData::Tag => ElementType::Tag,
            RecordData::List => ElementType::List,
            RecordData::Query => ElementType::Query,
            RecordData::Import { .. } => ElementType::Import,
        }
    }

    /// Record data of an attribute-less kind
    pub(crate) fn plain(kind: ElementType) -> Option<Self> {
        match kind {
            ElementType::Relation => Some(RecordData::Relation),
            ElementType::View => Some(RecordData::View),
            ElementType::Resource => Some(RecordData::Resource),
            ElementType::Tag => Some(RecordData::Tag),
            ElementType::List => Some(RecordData::List),
            ElementType::Query => Some(RecordData::Query),
            _ => None,
        }
    }
}

impl ElementRecord {
    pub fn element_type(&self) -> ElementType {
        self.data.element_type()
    }
}

/// Stored content description; `model` is an id-ref or empty
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ContentRecord {
    pub mimetype: String,
    pub model: String,
    pub url: String,
}

impl ContentRecord {
    pub fn new(mimetype: impl Into<String>) -> Self {
        Self {
            mimetype: mimetype.into(),
            ..Self::default()
        }
    }
}

/// A metadata value: plain text, or an id-ref to an element
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum MetaValue {
    Plain(String),
    Ref(String),
}

impl MetaValue {
    pub fn as_str(&self) -> &str {
        match self {
            MetaValue::Plain(s) | MetaValue::Ref(s) => s,
        }
    }

    pub fn is_ref(&self) -> bool {
        matches!(self, MetaValue::Ref(_))
    }
}

/// The role a referencing row plays with respect to its target
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub enum ReferenceRole {
    /// The annotation's media
    Media,
    /// The element's content model
    ContentModel,
    /// Member at this index of the relation
    Member(usize),
    /// Item at this index of the list
    Item(usize),
    /// The target is used as a tag of the element with this id-ref
    Tag(String),
    /// The target is tagged with the tag with this id-ref
    Tagged(String),
    /// Value of this metadata key
    Meta(String),
}

/// One row pointing at a given element or import
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct Reference {
    /// Package id of the referencing row
    pub package: String,
    /// Referencing element, or empty for package-level rows (tags, metadata)
    pub element: String,
    pub role: ReferenceRole,
    /// The id-ref stored in the row
    pub target: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codes_round_trip() {
        for t in ElementType::ALL {
            assert_eq!(ElementType::from_code(t.code()), Some(t));
            assert_eq!(ElementType::from_name(t.name()), Some(t));
        }
        assert_eq!(ElementType::from_code("x"), None);
    }

    #[test]
    fn test_content_kinds() {
        assert!(ElementType::Relation.has_content());
        assert!(ElementType::Query.has_content());
        assert!(!ElementType::Media.has_content());
        assert!(!ElementType::List.has_content());
    }

    #[test]
    fn test_plain_record_data() {
        assert_eq!(RecordData::plain(ElementType::Tag), Some(RecordData::Tag));
        assert_eq!(RecordData::plain(ElementType::Media), None);
    }
}
