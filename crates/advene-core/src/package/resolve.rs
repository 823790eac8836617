//! id-ref resolution

use super::Package;
use crate::element::Element;
use crate::error::{Error, Result};
use crate::idref::{check_depth, is_uri_ref, join_id_ref, make_uri_ref, split_id_ref, split_uri_ref};

impl Package {
    /// Element designated by an id-ref or uri-ref, relative to this package
    ///
    /// An unknown import prefix gives [`Error::UnreachableImport`]; a
    /// uri-ref whose base is no reachable package gives
    /// [`Error::NoSuchElement`].
    pub fn get_element(&self, idref: &str) -> Result<Element> {
        self.check_open()?;
        if let Some((base, id)) = split_uri_ref(idref) {
            let owner = self
                .routes()?
                .iter()
                .flat_map(|route| route.packages())
                .find(|p| p.url() == base || (!p.uri().is_empty() && p.uri() == base))
                .ok_or_else(|| Error::NoSuchElement {
                    package: self.url(),
                    id: idref.to_string(),
                })?;
            return owner.get_own(id);
        }

        check_depth(idref)?;
        match split_id_ref(idref) {
            (None, id) => self.get_own(id),
            (Some(prefix), id) => match self.imported(prefix) {
                Some(imported) => imported.get_own(id),
                None => Err(Error::UnreachableImport {
                    package: self.url(),
                    import: prefix.to_string(),
                }),
            },
        }
    }

    /// Like [`Package::get_element`], with `None` for missing elements and
    /// unreachable imports
    pub fn try_get_element(&self, idref: &str) -> Result<Option<Element>> {
        match self.get_element(idref) {
            Ok(element) => Ok(Some(element)),
            Err(e) if e.is_not_found() => Ok(None),
            Err(e) => Err(e),
        }
    }

    pub(crate) fn get_own(&self, id: &str) -> Result<Element> {
        self.check_open()?;
        if let Some(element) = self.cached(id) {
            return Ok(element);
        }
        match self.0.backend.get_element(&self.0.pid, id)? {
            Some(record) => self.element_from_record(record),
            None => Err(Error::NoSuchElement {
                package: self.url(),
                id: id.to_string(),
            }),
        }
    }

    /// True if this package owns an element `id`
    pub fn has_element(&self, id: &str) -> Result<bool> {
        self.check_open()?;
        self.0.backend.has_element(&self.0.pid, id, None)
    }

    /// Reference from this package to element `id` of `owner`
    ///
    /// Direct imports use an id-ref; deeper packages use a uri-ref.
    pub fn make_id_for(&self, owner: &Package, id: &str) -> Result<String> {
        if owner == self {
            return Ok(id.to_string());
        }
        if let Some(name) = self.import_name_of(owner) {
            return Ok(join_id_ref(&name, id));
        }
        let reachable = self
            .routes()?
            .iter()
            .any(|route| route.packages().contains(owner));
        if reachable {
            return Ok(make_uri_ref(&owner.uri_or_url(), id));
        }
        Err(Error::model(format!(
            "{} is not reachable from {}",
            owner.url(),
            self.url()
        )))
    }

    /// id-ref under which this package stores a reference to `target`
    ///
    /// Only own elements and elements of direct imports can be referenced.
    pub(crate) fn reference_to(&self, target: &Element) -> Result<String> {
        let owner = target.live_package()?;
        if owner == *self {
            return Ok(target.id());
        }
        match self.import_name_of(&owner) {
            Some(name) => Ok(join_id_ref(&name, &target.id())),
            None => Err(Error::model(format!(
                "{:?} of {} is not directly imported by {}",
                target,
                owner.url(),
                self.url()
            ))),
        }
    }

    /// True if `target` belongs to this package or to a direct import
    pub fn can_reference(&self, target: &Element) -> bool {
        self.reference_to(target).is_ok()
    }

    /// True if `idref` is an id of this package or goes through one of its
    /// imports
    pub fn can_reference_idref(&self, idref: &str) -> Result<bool> {
        if is_uri_ref(idref) || check_depth(idref).is_err() {
            return Ok(false);
        }
        match split_id_ref(idref) {
            (None, id) => self.has_element(id),
            (Some(prefix), _) => Ok(self.0.imports.borrow().contains_key(prefix)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::element::{Media, DEFAULT_FRAME_OF_REFERENCE};
    use crate::registry::Registry;
    use std::rc::Rc;
    use tempfile::TempDir;

    fn chain(temp: &TempDir) -> (Rc<Registry>, Package, Package, Package) {
        let registry = Registry::new(Config::with_data_dir(temp.path()));
        let p = Package::create_transient(&registry).unwrap();
        let q = Package::create_transient(&registry).unwrap();
        let r = Package::create_transient(&registry).unwrap();
        q.create_import("r", &r).unwrap();
        p.create_import("q", &q).unwrap();
        (registry, p, q, r)
    }

    #[test]
    fn test_get_element_through_import() {
        let temp = TempDir::new().unwrap();
        let (_registry, p, q, _r) = chain(&temp);
        let m = q.create_media("m", "http://x/m.avi", DEFAULT_FRAME_OF_REFERENCE).unwrap();

        assert_eq!(p.get_element("q:m").unwrap(), *m);
        assert!(matches!(
            p.get_element("q:nope"),
            Err(Error::NoSuchElement { .. })
        ));
        assert!(matches!(
            p.get_element("z:m"),
            Err(Error::UnreachableImport { .. })
        ));
        assert!(matches!(p.get_element("q:r:m"), Err(Error::Model(_))));
        assert_eq!(p.try_get_element("z:m").unwrap(), None);
        assert_eq!(p.try_get_element("nope").unwrap(), None);
    }

    #[test]
    fn test_make_id_for_deep_package() {
        let temp = TempDir::new().unwrap();
        let (_registry, p, q, r) = chain(&temp);
        let m = r.create_media("m", "http://x/m.avi", DEFAULT_FRAME_OF_REFERENCE).unwrap();

        assert_eq!(p.make_id_for(&p, "x").unwrap(), "x");
        assert_eq!(p.make_id_for(&q, "x").unwrap(), "q:x");
        let deep = p.make_id_for(&r, "m").unwrap();
        assert_eq!(deep, format!("{}#m", r.url()));
        assert_eq!(Media::try_from(p.get_element(&deep).unwrap()).unwrap(), m);

        r.set_uri("http://example.com/r").unwrap();
        let deep = p.make_id_for(&r, "m").unwrap();
        assert_eq!(deep, "http://example.com/r#m");
        assert_eq!(p.get_element(&deep).unwrap(), *m);

        let stranger = Package::create_transient(p.registry()).unwrap();
        assert!(p.make_id_for(&stranger, "m").is_err());
        assert!(matches!(
            p.get_element(&format!("{}#m", stranger.url())),
            Err(Error::NoSuchElement { .. })
        ));
        assert_eq!(
            p.try_get_element("http://example.com/nowhere#m").unwrap(),
            None
        );
    }

    #[test]
    fn test_reference_only_direct_imports() {
        let temp = TempDir::new().unwrap();
        let (_registry, p, q, r) = chain(&temp);
        let mq = q.create_media("mq", "http://x/m.avi", DEFAULT_FRAME_OF_REFERENCE).unwrap();
        let mr = r.create_media("mr", "http://x/m.avi", DEFAULT_FRAME_OF_REFERENCE).unwrap();

        assert!(p.can_reference(&mq));
        assert!(!p.can_reference(&mr));
        assert!(matches!(
            p.create_annotation("a", &mr, 0, 1, "text/plain"),
            Err(Error::Model(_))
        ));
    }

    #[test]
    fn test_can_reference_idref() {
        let temp = TempDir::new().unwrap();
        let (_registry, p, _q, _r) = chain(&temp);
        p.create_tag("t").unwrap();

        assert!(p.can_reference_idref("t").unwrap());
        assert!(!p.can_reference_idref("nope").unwrap());
        assert!(p.can_reference_idref("q:anything").unwrap());
        assert!(!p.can_reference_idref("z:t").unwrap());
        assert!(!p.can_reference_idref("q:r:t").unwrap());
        assert!(!p.can_reference_idref("http://x/p#t").unwrap());
    }
}
