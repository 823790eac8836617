//! Persistence backends
//!
//! A backend stores the elements, contents, ordered collections, tag
//! associations and metadata of one or more packages sharing a physical
//! store. Packages never talk to storage any other way, so any engine
//! implementing [`Backend`] and [`BackendFactory`] can be plugged into a
//! [`Registry`](crate::Registry).
//!
//! ## Architecture
//!
//! ```text
//! Registry ──claims──▶ BackendFactory ──create/bind──▶ Rc<dyn Backend>
//!                                                         │
//!                                   Package ──────────────┘ (shared)
//! ```
//!
//! - Package ids scope every call; multi-package calls take `&[String]`.
//! - Stored references are id-refs relative to the row's package, split
//!   into an import prefix and a local id so renames stay cheap.
//! - Filters that name elements take uri-refs, matched against each
//!   package's uri and url at query time.
//! - Iterators are lazy and one-pass; a write on the same store never
//!   invalidates them (see [`flush`]).

pub mod error;
pub mod filter;
pub mod flush;
pub mod record;
pub mod sqlite;

use std::rc::Rc;

pub use error::{StorageError, StorageResult};
pub use filter::{
    AnnotationFilter, IdFilter, ImportFilter, ListFilter, MediaFilter, MetaFilter, MetaMatch,
    RelationFilter, TagFilter,
};
pub use record::{
    ContentRecord, ElementRecord, ElementType, MetaValue, RecordData, Reference, ReferenceRole,
};

use crate::error::{Error, Result};

/// Lazy, finite, one-pass sequence of backend rows
pub type Rows<T> = Box<dyn Iterator<Item = Result<T>>>;

/// Answer of a backend or parser asked whether it handles a resource
#[derive(Debug)]
pub enum Claim {
    /// Applicable, with a confidence score (higher wins)
    Accept(u32),
    Reject(ClaimFailure),
}

/// Why a candidate did not claim a resource
///
/// Without a reason the candidate is simply inapplicable; with one it
/// recognized the resource but would fail on it, which is what callers
/// want to report when nothing else claims it.
#[derive(Debug, Default)]
pub struct ClaimFailure {
    pub reason: Option<Error>,
}

impl Claim {
    pub fn inapplicable() -> Self {
        Claim::Reject(ClaimFailure::default())
    }

    pub fn failing(reason: Error) -> Self {
        Claim::Reject(ClaimFailure {
            reason: Some(reason),
        })
    }

    pub fn score(&self) -> Option<u32> {
        match self {
            Claim::Accept(score) => Some(*score),
            Claim::Reject(_) => None,
        }
    }
}

/// Pick the best candidate; ties go to the earliest one
///
/// On failure, returns the first informative rejection reason, if any.
pub(crate) fn rank_claims<T>(
    candidates: impl IntoIterator<Item = (T, Claim)>,
) -> std::result::Result<T, Option<Error>> {
    let mut best: Option<(u32, T)> = None;
    let mut reason = None;
    for (candidate, claim) in candidates {
        match claim {
            Claim::Accept(score) => {
                if best.as_ref().map_or(true, |(s, _)| score > *s) {
                    best = Some((score, candidate));
                }
            }
            Claim::Reject(failure) => {
                if reason.is_none() {
                    reason = failure.reason;
                }
            }
        }
    }
    best.map(|(_, c)| c).ok_or(reason)
}

/// Discovery and instantiation of a kind of backend
pub trait BackendFactory {
    fn name(&self) -> &'static str;

    /// Can a new package be created at `url`?
    fn claims_for_create(&self, url: &str) -> Claim;

    /// Can an existing package at `url` be bound?
    fn claims_for_bind(&self, url: &str) -> Claim;

    /// Create and bind a new package; returns the backend and package id
    fn create(&self, url: &str) -> Result<(Rc<dyn Backend>, String)>;

    /// Bind an existing package; returns the backend and package id
    fn bind(&self, url: &str) -> Result<(Rc<dyn Backend>, String)>;
}

/// Uniform storage contract for packages
///
/// `pid` is a package id inside this backend. Id-refs passed in or out
/// are relative to the package of the row they belong to.
pub trait Backend {
    /// Url the package `pid` can be bound from again
    fn bound_url(&self, pid: &str) -> String;

    /// Backed by memory or temporary storage
    fn is_transient(&self) -> bool;

    /// Unbind `pid`; releases the connection once nothing is bound
    fn close(&self, pid: &str) -> Result<()>;

    /// Remove every row of `pid` and unbind it
    fn delete(&self, pid: &str) -> Result<()>;

    fn get_uri(&self, pid: &str) -> Result<String>;
    fn update_uri(&self, pid: &str, uri: &str) -> Result<()>;
    fn get_url(&self, pid: &str) -> Result<String>;
    fn update_url(&self, pid: &str, url: &str) -> Result<()>;

    // ==================== Creation ====================

    fn create_media(&self, pid: &str, id: &str, url: &str, frame_of_reference: &str)
        -> Result<()>;
    fn create_annotation(
        &self,
        pid: &str,
        id: &str,
        media: &str,
        begin: i64,
        end: i64,
        content: &ContentRecord,
    ) -> Result<()>;
    fn create_relation(&self, pid: &str, id: &str, content: &ContentRecord) -> Result<()>;
    fn create_view(&self, pid: &str, id: &str, content: &ContentRecord) -> Result<()>;
    fn create_resource(&self, pid: &str, id: &str, content: &ContentRecord) -> Result<()>;
    fn create_query(&self, pid: &str, id: &str, content: &ContentRecord) -> Result<()>;
    fn create_tag(&self, pid: &str, id: &str) -> Result<()>;
    fn create_list(&self, pid: &str, id: &str) -> Result<()>;
    fn create_import(&self, pid: &str, id: &str, url: &str, uri: &str) -> Result<()>;

    // ==================== Lookup ====================

    fn has_element(&self, pid: &str, id: &str, kind: Option<ElementType>) -> Result<bool>;
    fn get_element(&self, pid: &str, id: &str) -> Result<Option<ElementRecord>>;

    // ==================== Iteration ====================

    fn iter_medias(&self, pids: &[String], filter: &MediaFilter) -> Result<Rows<ElementRecord>>;
    /// Ordered by (begin, end, media)
    fn iter_annotations(
        &self,
        pids: &[String],
        filter: &AnnotationFilter,
    ) -> Result<Rows<ElementRecord>>;
    fn iter_relations(&self, pids: &[String], filter: &RelationFilter)
        -> Result<Rows<ElementRecord>>;
    fn iter_views(&self, pids: &[String], filter: &IdFilter) -> Result<Rows<ElementRecord>>;
    fn iter_resources(&self, pids: &[String], filter: &IdFilter) -> Result<Rows<ElementRecord>>;
    fn iter_queries(&self, pids: &[String], filter: &IdFilter) -> Result<Rows<ElementRecord>>;
    fn iter_tags(&self, pids: &[String], filter: &TagFilter) -> Result<Rows<ElementRecord>>;
    fn iter_lists(&self, pids: &[String], filter: &ListFilter) -> Result<Rows<ElementRecord>>;
    fn iter_imports(&self, pids: &[String], filter: &ImportFilter) -> Result<Rows<ElementRecord>>;

    fn count_medias(&self, pids: &[String], filter: &MediaFilter) -> Result<usize>;
    fn count_annotations(&self, pids: &[String], filter: &AnnotationFilter) -> Result<usize>;
    fn count_relations(&self, pids: &[String], filter: &RelationFilter) -> Result<usize>;
    fn count_views(&self, pids: &[String], filter: &IdFilter) -> Result<usize>;
    fn count_resources(&self, pids: &[String], filter: &IdFilter) -> Result<usize>;
    fn count_queries(&self, pids: &[String], filter: &IdFilter) -> Result<usize>;
    fn count_tags(&self, pids: &[String], filter: &TagFilter) -> Result<usize>;
    fn count_lists(&self, pids: &[String], filter: &ListFilter) -> Result<usize>;
    fn count_imports(&self, pids: &[String], filter: &ImportFilter) -> Result<usize>;

    // ==================== Updates ====================

    fn update_media(&self, pid: &str, id: &str, url: &str, frame_of_reference: &str)
        -> Result<()>;
    fn update_annotation(&self, pid: &str, id: &str, media: &str, begin: i64, end: i64)
        -> Result<()>;
    fn update_import(&self, pid: &str, id: &str, url: &str, uri: &str) -> Result<()>;

    /// Rename an element; for imports, also rewrites every prefix using it
    fn rename_element(&self, pid: &str, old_id: &str, kind: ElementType, new_id: &str)
        -> Result<()>;

    /// Point every row of `pids` referencing `old_uriref` at `new_id`
    fn rename_references(&self, pids: &[String], old_uriref: &str, new_id: &str) -> Result<()>;

    /// Remove an element and its own rows; references to it are kept
    fn delete_element(&self, pid: &str, id: &str, kind: ElementType) -> Result<()>;

    // ==================== References ====================

    fn iter_references(&self, pids: &[String], uriref: &str) -> Result<Rows<Reference>>;
    fn iter_references_with_import(&self, pid: &str, import_id: &str)
        -> Result<Rows<Reference>>;

    // ==================== Content ====================

    fn get_content_info(&self, pid: &str, id: &str) -> Result<Option<ContentRecord>>;
    /// A non-empty url clears the stored data
    fn update_content_info(&self, pid: &str, id: &str, content: &ContentRecord) -> Result<()>;
    fn get_content_data(&self, pid: &str, id: &str) -> Result<Vec<u8>>;
    /// Non-empty data clears the url
    fn update_content_data(&self, pid: &str, id: &str, data: &[u8]) -> Result<()>;
    /// (package id, element id) of every content whose model is `model_uriref`
    fn iter_contents_with_model(
        &self,
        pids: &[String],
        model_uriref: &str,
    ) -> Result<Rows<(String, String)>>;

    // ==================== Metadata ====================

    /// Metadata of element `id` (`""` for the package itself), by key
    fn iter_meta(&self, pid: &str, id: &str) -> Result<Rows<(String, MetaValue)>>;
    fn get_meta(&self, pid: &str, id: &str, key: &str) -> Result<Option<MetaValue>>;
    /// `None` deletes the key
    fn set_meta(&self, pid: &str, id: &str, key: &str, value: Option<&MetaValue>) -> Result<()>;

    // ==================== Relation members ====================

    /// `pos = None` appends
    fn insert_member(&self, pid: &str, id: &str, member: &str, pos: Option<usize>) -> Result<()>;
    fn update_member(&self, pid: &str, id: &str, pos: usize, member: &str) -> Result<()>;
    fn remove_member(&self, pid: &str, id: &str, pos: usize) -> Result<()>;
    fn get_member(&self, pid: &str, id: &str, pos: usize) -> Result<Option<String>>;
    fn count_members(&self, pid: &str, id: &str) -> Result<usize>;
    fn iter_members(&self, pid: &str, id: &str) -> Result<Rows<String>>;

    // ==================== List items ====================

    /// `pos = None` appends
    fn insert_item(&self, pid: &str, id: &str, item: &str, pos: Option<usize>) -> Result<()>;
    fn update_item(&self, pid: &str, id: &str, pos: usize, item: &str) -> Result<()>;
    fn remove_item(&self, pid: &str, id: &str, pos: usize) -> Result<()>;
    fn get_item(&self, pid: &str, id: &str, pos: usize) -> Result<Option<String>>;
    fn count_items(&self, pid: &str, id: &str) -> Result<usize>;
    fn iter_items(&self, pid: &str, id: &str) -> Result<Rows<String>>;

    // ==================== Tags ====================

    fn associate_tag(&self, pid: &str, element: &str, tag: &str) -> Result<()>;
    fn dissociate_tag(&self, pid: &str, element: &str, tag: &str) -> Result<()>;
    /// (package id, tag id-ref) of every association of the element
    fn iter_tags_with_element(
        &self,
        pids: &[String],
        element_uriref: &str,
    ) -> Result<Rows<(String, String)>>;
    /// (package id, element id-ref) of every association with the tag
    fn iter_elements_with_tag(
        &self,
        pids: &[String],
        tag_uriref: &str,
    ) -> Result<Rows<(String, String)>>;
    /// Package ids asserting the association
    fn iter_taggers(
        &self,
        pids: &[String],
        element_uriref: &str,
        tag_uriref: &str,
    ) -> Result<Rows<String>>;
    /// (element id-ref, tag id-ref) of associations on imported elements
    fn iter_external_tagging(&self, pid: &str) -> Result<Rows<(String, String)>>;
}

/// Address of a backend instance, used to group packages per backend
pub(crate) fn backend_key(backend: &Rc<dyn Backend>) -> usize {
    Rc::as_ptr(backend) as *const () as usize
}
