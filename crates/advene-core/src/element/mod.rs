//! Element handles
//!
//! An [`Element`] is a reference-counted handle on one row of a package.
//! The package caches every handle it gives out, so while any handle is
//! alive looking the element up again returns the very same object.
//!
//! ## Lifetime
//!
//! - Volatile: the cache keeps a weak pointer only. Once the last handle
//!   is dropped, the next lookup rebuilds the element from its backend row.
//! - Heavy: an element with user attributes or observers is kept alive by
//!   the cache until both are cleared again.
//!
//! Typed handles ([`Media`], [`Annotation`], ...) deref to [`Element`] and
//! are obtained with `TryFrom<Element>`.

pub mod meta;
pub mod sequence;

use std::cell::{Cell, RefCell};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::rc::{Rc, Weak};

use tracing::warn;

use crate::backend::{ContentRecord, ElementRecord, ElementType, RecordData, Reference};
use crate::error::{Error, Result};
use crate::events::{Change, EventHub, ObserverId, Phase};
use crate::idref::{make_uri_ref, validate_id};
use crate::package::{Package, PackageInner};

pub use meta::WithMeta;

/// Default frame of reference of a media: milliseconds from 0
pub const DEFAULT_FRAME_OF_REFERENCE: &str = "http://advene.org/ns/frame_of_reference/ms;o=0";

/// Behaviour selected on a tag or list by its system type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Facet {
    /// No specialized behaviour
    Plain,
    UserTag,
    AnnotationType,
    RelationType,
    UserList,
    Schema,
}

/// Attributes of the element kinds that have some
#[derive(Debug, Clone)]
pub(crate) enum State {
    Media { url: String, frame_of_reference: String },
    Annotation { media: String, begin: i64, end: i64 },
    Import { url: String, uri: String },
    Plain,
}

impl From<RecordData> for State {
    fn from(data: RecordData) -> Self {
        match data {
            RecordData::Media {
                url,
                frame_of_reference,
            } => State::Media {
                url,
                frame_of_reference,
            },
            RecordData::Annotation { media, begin, end } => State::Annotation { media, begin, end },
            RecordData::Import { url, uri } => State::Import { url, uri },
            _ => State::Plain,
        }
    }
}

/// Id-refs of a relation or list, and the elements already resolved
#[derive(Default)]
pub(crate) struct ItemCache {
    pub ids: Vec<String>,
    pub resolved: Vec<Weak<ElementInner>>,
}

pub(crate) struct ElementInner {
    pub owner: Weak<PackageInner>,
    pub id: RefCell<String>,
    pub kind: ElementType,
    pub state: RefCell<State>,
    /// Loaded on first access
    pub content: RefCell<Option<ContentRecord>>,
    pub stream_open: Cell<bool>,
    pub items: RefCell<Option<ItemCache>>,
    pub facet: Cell<Facet>,
    pub attrs: RefCell<BTreeMap<String, serde_json::Value>>,
    pub events: EventHub,
    pub deleted: Cell<bool>,
}

/// Handle on an element of any kind
#[derive(Clone)]
pub struct Element(pub(crate) Rc<ElementInner>);

impl PartialEq for Element {
    fn eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }
}

impl Eq for Element {}

impl fmt::Debug for Element {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({})", self.0.kind.name(), self.0.id.borrow())
    }
}

impl AsRef<Element> for Element {
    fn as_ref(&self) -> &Element {
        self
    }
}

impl Element {
    pub(crate) fn from_record(owner: &Rc<PackageInner>, record: ElementRecord) -> Element {
        let kind = record.element_type();
        Element(Rc::new(ElementInner {
            owner: Rc::downgrade(owner),
            id: RefCell::new(record.id),
            kind,
            state: RefCell::new(State::from(record.data)),
            content: RefCell::new(None),
            stream_open: Cell::new(false),
            items: RefCell::new(None),
            facet: Cell::new(Facet::Plain),
            attrs: RefCell::new(BTreeMap::new()),
            events: EventHub::default(),
            deleted: Cell::new(false),
        }))
    }

    pub(crate) fn downgrade(&self) -> Weak<ElementInner> {
        Rc::downgrade(&self.0)
    }

    pub fn id(&self) -> String {
        self.0.id.borrow().clone()
    }

    pub fn element_type(&self) -> ElementType {
        self.0.kind
    }

    pub fn facet(&self) -> Facet {
        self.0.facet.get()
    }

    pub(crate) fn set_facet(&self, facet: Facet) {
        self.0.facet.set(facet);
    }

    pub fn is_deleted(&self) -> bool {
        self.0.deleted.get()
    }

    /// Owning package, if it is still alive
    pub fn package(&self) -> Option<Package> {
        self.0.owner.upgrade().map(Package)
    }

    /// Owning package, failing if it is closed or the element deleted
    pub(crate) fn live_package(&self) -> Result<Package> {
        if self.is_deleted() {
            return Err(Error::model(format!("{:?} has been deleted", self)));
        }
        let package = self
            .package()
            .ok_or_else(|| Error::model(format!("owner of {:?} is gone", self)))?;
        package.check_open()?;
        Ok(package)
    }

    /// `<package uri or url>#<id>`
    pub fn uri_ref(&self) -> Result<String> {
        let package = self.live_package()?;
        Ok(make_uri_ref(&package.uri_or_url(), &self.id()))
    }

    // ==================== Notification ====================

    /// Observe changes of this element; makes the element heavy
    pub fn connect(&self, callback: impl Fn(Phase, &Change) + 'static) -> ObserverId {
        let id = self.0.events.connect(callback);
        self.update_weight();
        id
    }

    pub fn disconnect(&self, id: ObserverId) -> bool {
        let found = self.0.events.disconnect(id);
        self.update_weight();
        found
    }

    pub(crate) fn notify(&self, phase: Phase, change: &Change) {
        let Some(package) = self.package() else {
            return;
        };
        if package.is_muted() {
            return;
        }
        self.0.events.emit(phase, change);
        if phase == Phase::Post {
            package.events().emit(
                Phase::Post,
                &Change::Element {
                    id: self.id(),
                    change: Box::new(change.clone()),
                },
            );
            if *change != Change::Deleted {
                if let Err(e) = package.factory().on_modified(self, change) {
                    warn!("modification hook failed on {:?}: {}", self, e);
                }
            }
        }
    }

    /// Run a mutation between its pre and post notifications
    pub(crate) fn mutate<T>(&self, change: Change, f: impl FnOnce(&Package) -> Result<T>) -> Result<T> {
        let package = self.live_package()?;
        self.notify(Phase::Pre, &change);
        let value = f(&package)?;
        self.notify(Phase::Post, &change);
        Ok(value)
    }

    // ==================== User attributes ====================

    /// Attach a user attribute; makes the element heavy
    pub fn set_attr(&self, key: impl Into<String>, value: serde_json::Value) {
        self.0.attrs.borrow_mut().insert(key.into(), value);
        self.update_weight();
    }

    pub fn attr(&self, key: &str) -> Option<serde_json::Value> {
        self.0.attrs.borrow().get(key).cloned()
    }

    pub fn remove_attr(&self, key: &str) -> Option<serde_json::Value> {
        let value = self.0.attrs.borrow_mut().remove(key);
        self.update_weight();
        value
    }

    fn update_weight(&self) {
        let heavy = !self.0.attrs.borrow().is_empty() || !self.0.events.is_empty();
        if let Some(package) = self.package() {
            package.set_heavy(self, heavy);
        }
    }

    // ==================== Structure ====================

    /// Change the id and update every reference to it among the packages
    /// importing the owner, directly or not
    pub fn rename(&self, new_id: &str) -> Result<()> {
        validate_id(new_id)?;
        let old = self.id();
        if old == new_id {
            return Ok(());
        }
        let kind = self.0.kind;
        self.mutate(Change::Renamed { old: old.clone() }, |package| {
            package
                .backend()
                .rename_element(package.pid(), &old, kind, new_id)?;
            *self.0.id.borrow_mut() = new_id.to_string();
            package.rekey(&old, new_id);
            if kind == ElementType::Import {
                package.rename_import(&old, new_id);
            }
            package.rename_references_to(&old, new_id)
        })
    }

    /// Remove the element from its package
    ///
    /// References to it are left in place; remove or retarget them first.
    pub fn delete(&self) -> Result<()> {
        let package = self.live_package()?;
        self.notify(Phase::Pre, &Change::Deleted);
        if self.0.kind.has_content() {
            crate::content::discard_packaged(self, &package)?;
        }
        let id = self.id();
        package
            .backend()
            .delete_element(package.pid(), &id, self.0.kind)?;
        if self.0.kind == ElementType::Import {
            package.drop_import(&id);
        }
        self.notify(Phase::Post, &Change::Deleted);
        self.0.deleted.set(true);
        package.forget(&id);
        Ok(())
    }

    /// Every row referencing this element, in its owner and in the open
    /// packages importing the owner, directly or not
    pub fn iter_references(&self) -> Result<Vec<Reference>> {
        let package = self.live_package()?;
        let id = self.id();
        let mut found = BTreeSet::new();
        for (backend, pids) in package.referrer_groups() {
            for base in package.bases() {
                for reference in backend.iter_references(&pids, &make_uri_ref(&base, &id))? {
                    found.insert(reference?);
                }
            }
        }
        Ok(found.into_iter().collect())
    }

    /// Tags associated with this element by any reachable package
    pub fn tags(&self) -> Result<Vec<Tag>> {
        let package = self.live_package()?;
        package.tags_of(self)
    }

    /// Reload the stored attributes, dropping cached content and items
    pub(crate) fn reload(&self) -> Result<()> {
        let package = self.live_package()?;
        if let Some(record) = package.backend().get_element(package.pid(), &self.id())? {
            *self.0.state.borrow_mut() = State::from(record.data);
        }
        self.0.content.replace(None);
        self.0.items.replace(None);
        Ok(())
    }

    pub(crate) fn state(&self) -> std::cell::Ref<'_, State> {
        self.0.state.borrow()
    }
}

macro_rules! element_handle {
    ($(#[$doc:meta])* $name:ident, $kind:ident) => {
        $(#[$doc])*
        #[derive(Clone, PartialEq, Eq)]
        pub struct $name(Element);

        impl std::ops::Deref for $name {
            type Target = Element;

            fn deref(&self) -> &Element {
                &self.0
            }
        }

        impl AsRef<Element> for $name {
            fn as_ref(&self) -> &Element {
                &self.0
            }
        }

        impl From<$name> for Element {
            fn from(handle: $name) -> Element {
                handle.0
            }
        }

        impl TryFrom<Element> for $name {
            type Error = Error;

            fn try_from(element: Element) -> Result<Self> {
                if element.element_type() == ElementType::$kind {
                    Ok($name(element))
                } else {
                    Err(Error::model(format!(
                        "{:?} is not a {}",
                        element,
                        ElementType::$kind
                    )))
                }
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                self.0.fmt(f)
            }
        }
    };
}

element_handle!(
    /// A video or audio resource annotations point into
    Media,
    Media
);
element_handle!(
    /// A time fragment of a media, with content
    Annotation,
    Annotation
);
element_handle!(
    /// An ordered tuple of annotations, with content
    Relation,
    Relation
);
element_handle!(View, View);
element_handle!(Resource, Resource);
element_handle!(Query, Query);
element_handle!(Tag, Tag);
element_handle!(
    /// An ordered sequence of arbitrary elements
    List,
    List
);
element_handle!(
    /// A named import of another package
    Import,
    Import
);

// ==================== Media ====================

impl Media {
    pub fn url(&self) -> String {
        match &*self.state() {
            State::Media { url, .. } => url.clone(),
            _ => String::new(),
        }
    }

    pub fn frame_of_reference(&self) -> String {
        match &*self.state() {
            State::Media {
                frame_of_reference, ..
            } => frame_of_reference.clone(),
            _ => String::new(),
        }
    }

    /// Time unit named by the frame of reference (`ms` by default)
    pub fn unit(&self) -> String {
        let foref = self.frame_of_reference();
        let path = foref.split(';').next().unwrap_or("");
        path.rsplit('/').next().unwrap_or("").to_string()
    }

    /// Value of the `o=` parameter of the frame of reference
    pub fn origin(&self) -> i64 {
        self.frame_of_reference()
            .split(';')
            .skip(1)
            .find_map(|param| param.trim().strip_prefix("o="))
            .and_then(|o| o.parse().ok())
            .unwrap_or(0)
    }

    pub fn set_url(&self, url: &str) -> Result<()> {
        let foref = self.frame_of_reference();
        self.update(url, &foref, "url")
    }

    pub fn set_frame_of_reference(&self, frame_of_reference: &str) -> Result<()> {
        let url = self.url();
        self.update(&url, frame_of_reference, "frame_of_reference")
    }

    fn update(&self, url: &str, foref: &str, attribute: &str) -> Result<()> {
        self.mutate(Change::Attribute(attribute.to_string()), |package| {
            package
                .backend()
                .update_media(package.pid(), &self.id(), url, foref)?;
            *self.0 .0.state.borrow_mut() = State::Media {
                url: url.to_string(),
                frame_of_reference: foref.to_string(),
            };
            Ok(())
        })
    }
}

// ==================== Annotation ====================

impl Annotation {
    /// Id-ref of the media, relative to the owner
    pub fn media_id(&self) -> String {
        self.fragment().0
    }

    pub fn media(&self) -> Result<Media> {
        let package = self.live_package()?;
        Media::try_from(package.get_element(&self.media_id())?)
    }

    pub fn begin(&self) -> i64 {
        self.fragment().1
    }

    pub fn end(&self) -> i64 {
        self.fragment().2
    }

    pub fn duration(&self) -> i64 {
        let (_, begin, end) = self.fragment();
        end - begin
    }

    fn fragment(&self) -> (String, i64, i64) {
        match &*self.state() {
            State::Annotation { media, begin, end } => (media.clone(), *begin, *end),
            _ => (String::new(), 0, 0),
        }
    }

    pub fn set_media(&self, media: &Media) -> Result<()> {
        let package = self.live_package()?;
        let media_ref = package.reference_to(media)?;
        let (_, begin, end) = self.fragment();
        self.update(media_ref, begin, end, "media")
    }

    pub fn set_begin(&self, begin: i64) -> Result<()> {
        let (media, _, end) = self.fragment();
        self.update(media, begin, end, "begin")
    }

    pub fn set_end(&self, end: i64) -> Result<()> {
        let (media, begin, _) = self.fragment();
        self.update(media, begin, end, "end")
    }

    fn update(&self, media: String, begin: i64, end: i64, attribute: &str) -> Result<()> {
        self.mutate(Change::Attribute(attribute.to_string()), |package| {
            package
                .backend()
                .update_annotation(package.pid(), &self.id(), &media, begin, end)?;
            *self.0 .0.state.borrow_mut() = State::Annotation { media, begin, end };
            Ok(())
        })
    }
}

// ==================== Import ====================

impl Import {
    pub fn url(&self) -> String {
        match &*self.state() {
            State::Import { url, .. } => url.clone(),
            _ => String::new(),
        }
    }

    pub fn uri(&self) -> String {
        match &*self.state() {
            State::Import { uri, .. } => uri.clone(),
            _ => String::new(),
        }
    }

    /// The imported package, unless it could not be loaded
    pub fn imported_package(&self) -> Option<Package> {
        self.package()?.imported(&self.id())
    }
}

impl Element {
    /// Record a new url/uri pair on an import handle
    pub(crate) fn set_import_record(&self, url: &str, uri: &str) {
        if self.0.kind == ElementType::Import {
            *self.0.state.borrow_mut() = State::Import {
                url: url.to_string(),
                uri: uri.to_string(),
            };
        }
    }
}
