//! Element creation and the element factory hook

use tracing::{debug, warn};

use super::Package;
use crate::backend::{Backend, ContentRecord, ElementType};
use crate::content::{validate_mimetype, EMPTY_MIMETYPE};
use crate::element::{
    Annotation, Element, Import, List, Media, Query, Relation, Resource, Tag, View,
};
use crate::error::{Error, Result};
use crate::events::{Change, Phase};
use crate::idref::validate_id;

/// Hooks run on every element handle a package builds
///
/// `init_*` runs when a handle is first built from its row, whether the
/// element was just created or is reloaded after becoming volatile.
/// Every method defaults to doing nothing.
pub trait ElementFactory {
    fn init_media(&self, _media: &Media) -> Result<()> {
        Ok(())
    }

    fn init_annotation(&self, _annotation: &Annotation) -> Result<()> {
        Ok(())
    }

    fn init_relation(&self, _relation: &Relation) -> Result<()> {
        Ok(())
    }

    fn init_view(&self, _view: &View) -> Result<()> {
        Ok(())
    }

    fn init_resource(&self, _resource: &Resource) -> Result<()> {
        Ok(())
    }

    fn init_query(&self, _query: &Query) -> Result<()> {
        Ok(())
    }

    fn init_tag(&self, _tag: &Tag) -> Result<()> {
        Ok(())
    }

    fn init_list(&self, _list: &List) -> Result<()> {
        Ok(())
    }

    fn init_import(&self, _import: &Import) -> Result<()> {
        Ok(())
    }

    /// Runs once, after the element is stored and announced
    fn on_created(&self, _element: &Element) -> Result<()> {
        Ok(())
    }

    /// Runs after every announced change of an element
    fn on_modified(&self, _element: &Element, _change: &Change) -> Result<()> {
        Ok(())
    }
}

/// Plain handles, no hooks
#[derive(Debug, Default)]
pub struct DefaultFactory;

impl ElementFactory for DefaultFactory {}

pub(crate) fn init_element(factory: &dyn ElementFactory, element: &Element) -> Result<()> {
    let element = element.clone();
    match element.element_type() {
        ElementType::Media => factory.init_media(&Media::try_from(element)?),
        ElementType::Annotation => factory.init_annotation(&Annotation::try_from(element)?),
        ElementType::Relation => factory.init_relation(&Relation::try_from(element)?),
        ElementType::View => factory.init_view(&View::try_from(element)?),
        ElementType::Resource => factory.init_resource(&Resource::try_from(element)?),
        ElementType::Query => factory.init_query(&Query::try_from(element)?),
        ElementType::Tag => factory.init_tag(&Tag::try_from(element)?),
        ElementType::List => factory.init_list(&List::try_from(element)?),
        ElementType::Import => factory.init_import(&Import::try_from(element)?),
    }
}

impl Package {
    /// Store a new element with `store` and build its handle
    pub(crate) fn create_with(
        &self,
        id: &str,
        store: impl FnOnce(&dyn Backend, &str) -> Result<()>,
    ) -> Result<Element> {
        self.check_open()?;
        validate_id(id)?;
        if self.has_element(id)? {
            return Err(Error::model(format!(
                "id {:?} already in use in {}",
                id,
                self.url()
            )));
        }

        let change = Change::Created(id.to_string());
        self.notify(Phase::Pre, &change);
        store(&*self.0.backend, &self.0.pid)?;
        let element = self.get_own(id)?;
        self.notify(Phase::Post, &change);
        debug!("created {:?} in {}", element, self.url());

        if !self.is_muted() {
            if let Err(e) = self.0.factory.on_created(&element) {
                warn!("creation hook failed on {:?}: {}", element, e);
            }
        }
        Ok(element)
    }

    pub fn create_media(&self, id: &str, url: &str, frame_of_reference: &str) -> Result<Media> {
        let element = self.create_with(id, |backend, pid| {
            backend.create_media(pid, id, url, frame_of_reference)
        })?;
        Media::try_from(element)
    }

    /// New annotation on `media`, which must be own or directly imported
    pub fn create_annotation(
        &self,
        id: &str,
        media: &Media,
        begin: i64,
        end: i64,
        mimetype: &str,
    ) -> Result<Annotation> {
        let content = self.non_empty_content(mimetype)?;
        if begin > end {
            return Err(Error::model(format!(
                "annotation {:?} ends ({}) before it begins ({})",
                id, end, begin
            )));
        }
        let media_ref = self.reference_to(media)?;
        let element = self.create_with(id, |backend, pid| {
            backend.create_annotation(pid, id, &media_ref, begin, end, &content)
        })?;
        Annotation::try_from(element)
    }

    /// New relation; its content may be empty
    pub fn create_relation(
        &self,
        id: &str,
        mimetype: &str,
        members: &[Annotation],
    ) -> Result<Relation> {
        validate_mimetype(mimetype)?;
        let refs = members
            .iter()
            .map(|m| self.reference_to(m))
            .collect::<Result<Vec<String>>>()?;
        let element = self.create_with(id, |backend, pid| {
            backend.create_relation(pid, id, &ContentRecord::new(mimetype))?;
            for member in &refs {
                backend.insert_member(pid, id, member, None)?;
            }
            Ok(())
        })?;
        Relation::try_from(element)
    }

    pub fn create_view(&self, id: &str, mimetype: &str) -> Result<View> {
        let content = self.non_empty_content(mimetype)?;
        let element = self.create_with(id, |backend, pid| backend.create_view(pid, id, &content))?;
        View::try_from(element)
    }

    pub fn create_resource(&self, id: &str, mimetype: &str) -> Result<Resource> {
        let content = self.non_empty_content(mimetype)?;
        let element =
            self.create_with(id, |backend, pid| backend.create_resource(pid, id, &content))?;
        Resource::try_from(element)
    }

    pub fn create_query(&self, id: &str, mimetype: &str) -> Result<Query> {
        let content = self.non_empty_content(mimetype)?;
        let element = self.create_with(id, |backend, pid| backend.create_query(pid, id, &content))?;
        Query::try_from(element)
    }

    fn non_empty_content(&self, mimetype: &str) -> Result<ContentRecord> {
        validate_mimetype(mimetype)?;
        if mimetype == EMPTY_MIMETYPE {
            return Err(Error::model("only relations can have empty content"));
        }
        Ok(ContentRecord::new(mimetype))
    }

    pub fn create_tag(&self, id: &str) -> Result<Tag> {
        let element = self.create_with(id, |backend, pid| backend.create_tag(pid, id))?;
        Tag::try_from(element)
    }

    /// New list holding `items`, which must be own or directly imported
    pub fn create_list(&self, id: &str, items: &[Element]) -> Result<List> {
        let refs = items
            .iter()
            .map(|item| self.reference_to(item))
            .collect::<Result<Vec<String>>>()?;
        let element = self.create_with(id, |backend, pid| {
            backend.create_list(pid, id)?;
            for item in &refs {
                backend.insert_item(pid, id, item, None)?;
            }
            Ok(())
        })?;
        List::try_from(element)
    }

    /// Import `package` under the name `id`
    pub fn create_import(&self, id: &str, package: &Package) -> Result<Import> {
        if package == self {
            return Err(Error::model(format!("{} can not import itself", self.url())));
        }
        package.check_open()?;
        let (url, uri) = (package.url(), package.uri());
        let element =
            self.create_with(id, |backend, pid| backend.create_import(pid, id, &url, &uri))?;
        self.attach_import(id, Some(package.clone()));
        self.refresh_routes();
        Import::try_from(element)
    }

    /// Record an import by url and uri, loading it like imports found on
    /// bind; for parsers, which only know where the package lives
    pub fn add_import(&self, id: &str, url: &str, uri: &str) -> Result<Import> {
        let element =
            self.create_with(id, |backend, pid| backend.create_import(pid, id, url, uri))?;
        let loaded = self
            .load_import(id, url, uri)
            .filter(|p| p != self);
        self.attach_import(id, loaded);
        self.refresh_routes();
        Import::try_from(element)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::element::meta::WithMeta;
    use crate::config::Config;
    use crate::content::WithContent;
    use crate::element::DEFAULT_FRAME_OF_REFERENCE;
    use crate::registry::Registry;
    use std::cell::RefCell;
    use std::rc::Rc;
    use tempfile::TempDir;

    #[derive(Default)]
    struct Recorder {
        seen: RefCell<Vec<String>>,
    }

    impl ElementFactory for Rc<Recorder> {
        fn init_tag(&self, tag: &Tag) -> Result<()> {
            self.seen.borrow_mut().push(format!("init {}", tag.id()));
            Ok(())
        }

        fn on_created(&self, element: &Element) -> Result<()> {
            self.seen.borrow_mut().push(format!("created {}", element.id()));
            Ok(())
        }

        fn on_modified(&self, element: &Element, change: &Change) -> Result<()> {
            self.seen
                .borrow_mut()
                .push(format!("modified {} {:?}", element.id(), change));
            Ok(())
        }
    }

    fn transient(temp: &TempDir) -> Package {
        Package::create_transient(&Registry::new(Config::with_data_dir(temp.path()))).unwrap()
    }

    #[test]
    fn test_duplicate_and_invalid_ids() {
        let temp = TempDir::new().unwrap();
        let p = transient(&temp);
        p.create_tag("t").unwrap();
        assert!(matches!(p.create_list("t", &[]), Err(Error::Model(_))));
        assert!(matches!(p.create_tag("a:b"), Err(Error::Model(_))));
        assert!(matches!(p.create_tag(""), Err(Error::Model(_))));
    }

    #[test]
    fn test_empty_content_only_on_relations() {
        let temp = TempDir::new().unwrap();
        let p = transient(&temp);
        let m = p.create_media("m", "http://x/m.avi", DEFAULT_FRAME_OF_REFERENCE).unwrap();
        assert!(p.create_annotation("a", &m, 0, 1, EMPTY_MIMETYPE).is_err());
        assert!(p.create_view("v", EMPTY_MIMETYPE).is_err());
        assert!(p.create_query("q", "not a mimetype").is_err());
        assert!(p.create_annotation("a", &m, 5, 1, "text/plain").is_err());

        let r = p.create_relation("r", EMPTY_MIMETYPE, &[]).unwrap();
        assert_eq!(r.content_mimetype().unwrap(), EMPTY_MIMETYPE);
    }

    #[test]
    fn test_factory_hooks() {
        let temp = TempDir::new().unwrap();
        let recorder = Rc::new(Recorder::default());
        let registry = Registry::builder(Config::with_data_dir(temp.path()))
            .factory(Rc::new(Rc::clone(&recorder)))
            .build();
        let p = Package::create_transient(&registry).unwrap();

        let t = p.create_tag("t").unwrap();
        t.set_meta("k", "v").unwrap();
        drop(t);
        p.get_element("t").unwrap();

        assert_eq!(
            *recorder.seen.borrow(),
            vec![
                "init t".to_string(),
                "created t".to_string(),
                format!("modified t {:?}", Change::Meta("k".to_string())),
                "init t".to_string(),
            ]
        );
    }

    #[test]
    fn test_import_itself_refused() {
        let temp = TempDir::new().unwrap();
        let p = transient(&temp);
        assert!(matches!(p.create_import("me", &p), Err(Error::Model(_))));
        assert!(!p.has_element("me").unwrap());
    }

    #[test]
    fn test_add_import_by_url() {
        let temp = TempDir::new().unwrap();
        let registry = Registry::new(Config::with_data_dir(temp.path()));
        let p = Package::create_transient(&registry).unwrap();
        let q = Package::create(
            &registry,
            &format!("sqlite:{}", temp.path().join("q.db").display()),
        )
        .unwrap();

        let found = p.add_import("q", &q.url(), "").unwrap();
        assert_eq!(found.imported_package(), Some(q.clone()));
        let lost = p.add_import("lost", "sqlite:/nowhere/lost.db", "").unwrap();
        assert_eq!(lost.imported_package(), None);
        assert_eq!(p.imports().len(), 2);
    }
}
