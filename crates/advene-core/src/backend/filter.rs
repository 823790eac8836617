//! Iteration filters. Every field left empty or `None` is unconstrained.
//!
//! References to elements (media, members, items, metadata values) are
//! given as uri-refs so that one filter works across every package a
//! backend serves.

/// Constraint on one metadata key
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MetaMatch {
    Absent,
    Plain(String),
    /// Reference value pointing at this uri-ref
    Ref(String),
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MetaFilter(pub Vec<(String, MetaMatch)>);

impl MetaFilter {
    pub fn absent(key: impl Into<String>) -> Self {
        Self(vec![(key.into(), MetaMatch::Absent)])
    }

    pub fn plain(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self(vec![(key.into(), MetaMatch::Plain(value.into()))])
    }

    pub fn reference(key: impl Into<String>, uriref: impl Into<String>) -> Self {
        Self(vec![(key.into(), MetaMatch::Ref(uriref.into()))])
    }

    pub fn and(mut self, key: impl Into<String>, m: MetaMatch) -> Self {
        self.0.push((key.into(), m));
        self
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Filter for views, resources and queries
#[derive(Debug, Clone, Default)]
pub struct IdFilter {
    pub ids: Vec<String>,
}

impl IdFilter {
    pub fn ids<I: IntoIterator<Item = S>, S: Into<String>>(ids: I) -> Self {
        Self {
            ids: ids.into_iter().map(Into::into).collect(),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct MediaFilter {
    pub ids: Vec<String>,
    pub url: Option<String>,
    pub frame_of_reference: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct AnnotationFilter {
    pub ids: Vec<String>,
    /// uri-refs of acceptable medias
    pub media: Vec<String>,
    pub begin: Option<i64>,
    pub begin_min: Option<i64>,
    pub begin_max: Option<i64>,
    pub end: Option<i64>,
    pub end_min: Option<i64>,
    pub end_max: Option<i64>,
}

impl AnnotationFilter {
    /// Annotations spanning time `t` (bounds included)
    pub fn at(t: i64) -> Self {
        Self {
            begin_max: Some(t),
            end_min: Some(t),
            ..Self::default()
        }
    }

    pub fn on_media(uriref: impl Into<String>) -> Self {
        Self {
            media: vec![uriref.into()],
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct RelationFilter {
    pub ids: Vec<String>,
    /// uri-ref of a required member
    pub member: Option<String>,
    /// Position of `member`; ignored without it
    pub position: Option<usize>,
}

#[derive(Debug, Clone, Default)]
pub struct ListFilter {
    pub ids: Vec<String>,
    /// uri-ref of a required item
    pub item: Option<String>,
    /// Position of `item`; ignored without it
    pub position: Option<usize>,
    pub meta: MetaFilter,
}

#[derive(Debug, Clone, Default)]
pub struct TagFilter {
    pub ids: Vec<String>,
    pub meta: MetaFilter,
}

#[derive(Debug, Clone, Default)]
pub struct ImportFilter {
    pub ids: Vec<String>,
    pub url: Option<String>,
    pub uri: Option<String>,
}
