//! Cinelab application model
//!
//! A vocabulary layered on plain elements through metadata:
//!
//! - tags and lists get a [`Facet`] from their system type, written once
//!   at creation (annotation types, relation types, schemas) or absent
//!   (user tags, user lists);
//! - annotations and relations point at their type with [`CAM_TYPE`];
//! - [`CamFactory`] stamps creator, creation date, contributor and
//!   modification date on elements and their package.

use chrono::Local;
use tracing::trace;

use crate::backend::{ListFilter, MetaFilter, MetaValue, TagFilter};
use crate::config::Config;
use crate::element::{Annotation, Element, Facet, List, Media, Relation, Tag, WithMeta};
use crate::error::{Error, Result};
use crate::events::Change;
use crate::group::{Elements, Group};
use crate::package::{ElementFactory, Package};

pub const CAM_NS_PREFIX: &str = "http://advene.org/ns/cinelab/0.1#";

/// Selects the facet of a tag or list; never set after creation
pub const CAM_SYSTEM_TYPE: &str = "http://advene.org/ns/cinelab/0.1#system-type";

/// Type of an annotation or relation, a reference to a tag
pub const CAM_TYPE: &str = "http://advene.org/ns/cinelab/0.1#type";

pub const DC_NS_PREFIX: &str = "http://purl.org/dc/elements/1.1/";
pub const DC_CREATOR: &str = "http://purl.org/dc/elements/1.1/creator";
pub const DC_CREATED: &str = "http://purl.org/dc/elements/1.1/created";
pub const DC_CONTRIBUTOR: &str = "http://purl.org/dc/elements/1.1/contributor";
pub const DC_MODIFIED: &str = "http://purl.org/dc/elements/1.1/modified";

const ANNOTATION_TYPE: &str = "annotation-type";
const RELATION_TYPE: &str = "relation-type";
const SCHEMA: &str = "schema";

fn tag_facet(system_type: Option<&str>) -> Facet {
    match system_type {
        None => Facet::UserTag,
        Some(ANNOTATION_TYPE) => Facet::AnnotationType,
        Some(RELATION_TYPE) => Facet::RelationType,
        Some(_) => Facet::Plain,
    }
}

fn list_facet(system_type: Option<&str>) -> Facet {
    match system_type {
        None => Facet::UserList,
        Some(SCHEMA) => Facet::Schema,
        Some(_) => Facet::Plain,
    }
}

fn now() -> String {
    Local::now().to_rfc3339()
}

// ==================== Factory ====================

/// Element factory selecting facets and keeping bookkeeping metadata
#[derive(Debug, Clone)]
pub struct CamFactory {
    user: String,
}

impl CamFactory {
    pub fn new(user: impl Into<String>) -> Self {
        Self { user: user.into() }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(config.user.clone())
    }

    fn touch(&self, target: &impl WithMeta, date: &str) -> Result<()> {
        target.set_meta(DC_CONTRIBUTOR, &self.user)?;
        target.set_meta(DC_MODIFIED, date)
    }
}

impl ElementFactory for CamFactory {
    fn init_tag(&self, tag: &Tag) -> Result<()> {
        let system_type = tag.meta_str(CAM_SYSTEM_TYPE)?;
        tag.set_facet(tag_facet(system_type.as_deref()));
        Ok(())
    }

    fn init_list(&self, list: &List) -> Result<()> {
        let system_type = list.meta_str(CAM_SYSTEM_TYPE)?;
        list.set_facet(list_facet(system_type.as_deref()));
        Ok(())
    }

    fn on_created(&self, element: &Element) -> Result<()> {
        let package = element.live_package()?;
        let _quiet = package.no_notify();
        let date = now();
        element.set_meta(DC_CREATOR, &self.user)?;
        element.set_meta(DC_CREATED, &date)?;
        self.touch(element, &date)?;
        self.touch(&package, &date)
    }

    fn on_modified(&self, element: &Element, change: &Change) -> Result<()> {
        if let Change::Meta(key) = change {
            if key.starts_with(DC_NS_PREFIX) {
                return Ok(());
            }
        }
        let package = element.live_package()?;
        let _quiet = package.no_notify();
        let date = now();
        trace!("bookkeeping on {:?} after {:?}", element, change);
        self.touch(element, &date)?;
        self.touch(&package, &date)
    }
}

// ==================== Creation ====================

impl Package {
    fn create_system_tag(&self, id: &str, system_type: &str) -> Result<Tag> {
        let value = MetaValue::Plain(system_type.to_string());
        let element = self.create_with(id, |backend, pid| {
            backend.create_tag(pid, id)?;
            backend.set_meta(pid, id, CAM_SYSTEM_TYPE, Some(&value))
        })?;
        Tag::try_from(element)
    }

    pub fn create_annotation_type(&self, id: &str) -> Result<Tag> {
        self.create_system_tag(id, ANNOTATION_TYPE)
    }

    pub fn create_relation_type(&self, id: &str) -> Result<Tag> {
        self.create_system_tag(id, RELATION_TYPE)
    }

    pub fn create_user_tag(&self, id: &str) -> Result<Tag> {
        self.create_tag(id)
    }

    /// New schema holding `items`, usually annotation and relation types
    pub fn create_schema(&self, id: &str, items: &[Element]) -> Result<List> {
        let refs = items
            .iter()
            .map(|item| self.reference_to(item))
            .collect::<Result<Vec<String>>>()?;
        let value = MetaValue::Plain(SCHEMA.to_string());
        let element = self.create_with(id, |backend, pid| {
            backend.create_list(pid, id)?;
            backend.set_meta(pid, id, CAM_SYSTEM_TYPE, Some(&value))?;
            for item in &refs {
                backend.insert_item(pid, id, item, None)?;
            }
            Ok(())
        })?;
        List::try_from(element)
    }

    pub fn create_user_list(&self, id: &str, items: &[Element]) -> Result<List> {
        self.create_list(id, items)
    }

    /// New annotation of type `annotation_type`
    pub fn create_typed_annotation(
        &self,
        id: &str,
        annotation_type: &Tag,
        media: &Media,
        begin: i64,
        end: i64,
        mimetype: &str,
    ) -> Result<Annotation> {
        check_system_type(annotation_type, ANNOTATION_TYPE)?;
        self.reference_to(annotation_type)?;
        let annotation = self.create_annotation(id, media, begin, end, mimetype)?;
        annotation.set_meta_element(CAM_TYPE, annotation_type)?;
        Ok(annotation)
    }

    /// New relation of type `relation_type`
    pub fn create_typed_relation(
        &self,
        id: &str,
        relation_type: &Tag,
        mimetype: &str,
        members: &[Annotation],
    ) -> Result<Relation> {
        check_system_type(relation_type, RELATION_TYPE)?;
        self.reference_to(relation_type)?;
        let relation = self.create_relation(id, mimetype, members)?;
        relation.set_meta_element(CAM_TYPE, relation_type)?;
        Ok(relation)
    }
}

fn check_system_type(tag: &Tag, expected: &str) -> Result<()> {
    match tag.meta_str(CAM_SYSTEM_TYPE)? {
        Some(found) if found == expected => Ok(()),
        found => Err(Error::model(format!(
            "{:?} is not an {} (system type {:?})",
            tag, expected, found
        ))),
    }
}

/// Type tag of an annotation or relation, if it has one
pub fn type_of(element: &Element) -> Result<Option<Tag>> {
    element
        .meta_element(CAM_TYPE)?
        .map(Tag::try_from)
        .transpose()
}

// ==================== Groups ====================

fn tags_with(system_type: MetaFilter) -> TagFilter {
    TagFilter {
        meta: system_type,
        ..TagFilter::default()
    }
}

fn lists_with(system_type: MetaFilter) -> ListFilter {
    ListFilter {
        meta: system_type,
        ..ListFilter::default()
    }
}

/// Cinelab views of any group
pub trait CamGroup: Group {
    fn annotation_types(&self) -> Result<Elements<Tag>> {
        self.iter_tags(&tags_with(MetaFilter::plain(CAM_SYSTEM_TYPE, ANNOTATION_TYPE)))
    }

    fn relation_types(&self) -> Result<Elements<Tag>> {
        self.iter_tags(&tags_with(MetaFilter::plain(CAM_SYSTEM_TYPE, RELATION_TYPE)))
    }

    fn user_tags(&self) -> Result<Elements<Tag>> {
        self.iter_tags(&tags_with(MetaFilter::absent(CAM_SYSTEM_TYPE)))
    }

    fn schemas(&self) -> Result<Elements<List>> {
        self.iter_lists(&lists_with(MetaFilter::plain(CAM_SYSTEM_TYPE, SCHEMA)))
    }

    fn user_lists(&self) -> Result<Elements<List>> {
        self.iter_lists(&lists_with(MetaFilter::absent(CAM_SYSTEM_TYPE)))
    }
}

impl<G: Group> CamGroup for G {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::element::DEFAULT_FRAME_OF_REFERENCE;
    use crate::registry::Registry;
    use std::rc::Rc;
    use tempfile::TempDir;

    fn cam_package(temp: &TempDir) -> Package {
        let config = Config::with_data_dir(temp.path());
        let factory = CamFactory::new("ann");
        let registry = Registry::builder(config).factory(Rc::new(factory)).build();
        Package::create_transient(&registry).unwrap()
    }

    fn ids<T: AsRef<Element>>(elements: Elements<T>) -> Vec<String> {
        elements.map(|e| e.unwrap().as_ref().id()).collect()
    }

    #[test]
    fn test_facets() {
        let temp = TempDir::new().unwrap();
        let p = cam_package(&temp);
        let at = p.create_annotation_type("at").unwrap();
        let rt = p.create_relation_type("rt").unwrap();
        let ut = p.create_user_tag("ut").unwrap();
        let schema = p.create_schema("s", &[at.clone().into(), rt.clone().into()]).unwrap();
        let ul = p.create_user_list("ul", &[]).unwrap();

        assert_eq!(at.facet(), Facet::AnnotationType);
        assert_eq!(rt.facet(), Facet::RelationType);
        assert_eq!(ut.facet(), Facet::UserTag);
        assert_eq!(schema.facet(), Facet::Schema);
        assert_eq!(ul.facet(), Facet::UserList);
        assert_eq!(schema.item_ids().unwrap(), vec!["at", "rt"]);

        // facets come back when a volatile handle is rebuilt
        drop(at);
        assert_eq!(p.get_element("at").unwrap().facet(), Facet::AnnotationType);
    }

    #[test]
    fn test_group_views() {
        let temp = TempDir::new().unwrap();
        let p = cam_package(&temp);
        p.create_annotation_type("at1").unwrap();
        p.create_annotation_type("at2").unwrap();
        p.create_relation_type("rt").unwrap();
        p.create_user_tag("ut").unwrap();
        p.create_schema("s", &[]).unwrap();
        p.create_user_list("ul", &[]).unwrap();

        assert_eq!(ids(p.own().annotation_types().unwrap()), vec!["at1", "at2"]);
        assert_eq!(ids(p.all().relation_types().unwrap()), vec!["rt"]);
        assert_eq!(ids(p.own().user_tags().unwrap()), vec!["ut"]);
        assert_eq!(ids(p.own().schemas().unwrap()), vec!["s"]);
        assert_eq!(ids(p.own().user_lists().unwrap()), vec!["ul"]);
    }

    #[test]
    fn test_typed_elements() {
        let temp = TempDir::new().unwrap();
        let p = cam_package(&temp);
        let m = p.create_media("m", "http://x/m.avi", DEFAULT_FRAME_OF_REFERENCE).unwrap();
        let at = p.create_annotation_type("at").unwrap();
        let rt = p.create_relation_type("rt").unwrap();

        let a = p
            .create_typed_annotation("a", &at, &m, 0, 10, "text/plain")
            .unwrap();
        assert_eq!(type_of(&a).unwrap(), Some(at.clone()));
        let r = p
            .create_typed_relation("r", &rt, "text/plain", &[a.clone()])
            .unwrap();
        assert_eq!(type_of(&r).unwrap(), Some(rt.clone()));

        assert!(p
            .create_typed_annotation("b", &rt, &m, 0, 10, "text/plain")
            .is_err());
        assert!(!p.has_element("b").unwrap());
    }

    #[test]
    fn test_bookkeeping() {
        let temp = TempDir::new().unwrap();
        let p = cam_package(&temp);
        let t = p.create_user_tag("t").unwrap();

        assert_eq!(t.meta_str(DC_CREATOR).unwrap().as_deref(), Some("ann"));
        assert_eq!(t.meta_str(DC_CONTRIBUTOR).unwrap().as_deref(), Some("ann"));
        let created = t.meta_str(DC_CREATED).unwrap().unwrap();
        assert!(chrono::DateTime::parse_from_rfc3339(&created).is_ok());
        assert_eq!(p.meta_str(DC_CONTRIBUTOR).unwrap().as_deref(), Some("ann"));

        t.set_meta(DC_MODIFIED, "yesterday").unwrap();
        assert_eq!(t.meta_str(DC_MODIFIED).unwrap().as_deref(), Some("yesterday"));

        t.set_meta("color", "red").unwrap();
        let modified = t.meta_str(DC_MODIFIED).unwrap().unwrap();
        assert!(chrono::DateTime::parse_from_rfc3339(&modified).is_ok());
    }

    #[test]
    fn test_bookkeeping_is_silent() {
        let temp = TempDir::new().unwrap();
        let p = cam_package(&temp);
        let seen = Rc::new(std::cell::RefCell::new(0));
        let s = Rc::clone(&seen);
        p.connect(move |_, _| *s.borrow_mut() += 1);

        p.create_user_tag("t").unwrap();
        // pre and post of the creation only
        assert_eq!(*seen.borrow(), 2);
    }
}
