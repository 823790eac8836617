//! Tag associations
//!
//! An association is asserted by one package, between two elements it can
//! reference. Lookups go the other way: from a uri-ref, across every
//! package reachable from the viewpoint package.

use super::Package;
use crate::element::{Element, Tag};
use crate::error::Result;
use crate::events::{Change, Phase};
use crate::idref::make_uri_ref;

impl Package {
    /// Assert that `element` is tagged with `tag`; idempotent
    pub fn associate_tag(&self, element: &impl AsRef<Element>, tag: &Tag) -> Result<()> {
        self.check_open()?;
        let element_ref = self.reference_to(element.as_ref())?;
        let tag_ref = self.reference_to(tag)?;
        let change = Change::TagAdded {
            element: element_ref.clone(),
            tag: tag_ref.clone(),
        };
        self.notify(Phase::Pre, &change);
        self.0.backend.associate_tag(&self.0.pid, &element_ref, &tag_ref)?;
        self.notify(Phase::Post, &change);
        Ok(())
    }

    /// Withdraw an association asserted by this package; idempotent
    pub fn dissociate_tag(&self, element: &impl AsRef<Element>, tag: &Tag) -> Result<()> {
        self.check_open()?;
        let element_ref = self.reference_to(element.as_ref())?;
        let tag_ref = self.reference_to(tag)?;
        let change = Change::TagRemoved {
            element: element_ref.clone(),
            tag: tag_ref.clone(),
        };
        self.notify(Phase::Pre, &change);
        self.0.backend.dissociate_tag(&self.0.pid, &element_ref, &tag_ref)?;
        self.notify(Phase::Post, &change);
        Ok(())
    }

    /// Reachable packages asserting that `element` is tagged with `tag`
    pub fn iter_taggers(&self, element: &impl AsRef<Element>, tag: &Tag) -> Result<Vec<Package>> {
        let element_refs = uri_refs(element.as_ref())?;
        let tag_refs = uri_refs(tag)?;
        let mut found: Vec<Package> = Vec::new();
        for route in self.routes()? {
            let pids = route.pids();
            for element_ref in &element_refs {
                for tag_ref in &tag_refs {
                    for pid in route.backend.iter_taggers(&pids, element_ref, tag_ref)? {
                        if let Some(package) = route.package(&pid?) {
                            if !found.contains(&package) {
                                found.push(package);
                            }
                        }
                    }
                }
            }
        }
        Ok(found)
    }

    /// Tags of `element` asserted by any package reachable from this one
    ///
    /// Tags that can not be resolved are skipped.
    pub fn tags_of(&self, element: &impl AsRef<Element>) -> Result<Vec<Tag>> {
        let mut found: Vec<Tag> = Vec::new();
        for route in self.routes()? {
            let pids = route.pids();
            for element_ref in uri_refs(element.as_ref())? {
                for row in route.backend.iter_tags_with_element(&pids, &element_ref)? {
                    let (pid, tag_ref) = row?;
                    let Some(tagger) = route.package(&pid) else {
                        continue;
                    };
                    if let Some(tag) = tagger.try_get_element(&tag_ref)? {
                        let tag = Tag::try_from(tag)?;
                        if !found.contains(&tag) {
                            found.push(tag);
                        }
                    }
                }
            }
        }
        Ok(found)
    }

    /// Elements tagged with `tag` by any package reachable from this one
    pub fn elements_tagged(&self, tag: &Tag) -> Result<Vec<Element>> {
        let mut found: Vec<Element> = Vec::new();
        for route in self.routes()? {
            let pids = route.pids();
            for tag_ref in uri_refs(tag)? {
                for row in route.backend.iter_elements_with_tag(&pids, &tag_ref)? {
                    let (pid, element_ref) = row?;
                    let Some(tagger) = route.package(&pid) else {
                        continue;
                    };
                    if let Some(element) = tagger.try_get_element(&element_ref)? {
                        if !found.contains(&element) {
                            found.push(element);
                        }
                    }
                }
            }
        }
        Ok(found)
    }

    /// (element id-ref, tag id-ref) of associations this package asserts on
    /// imported elements
    pub fn iter_external_tagging(&self) -> Result<Vec<(String, String)>> {
        self.check_open()?;
        self.0
            .backend
            .iter_external_tagging(&self.0.pid)?
            .collect()
    }
}

/// Every uri-ref designating `element`, one per base of its owner
fn uri_refs(element: &Element) -> Result<Vec<String>> {
    let owner = element.live_package()?;
    let id = element.id();
    Ok(owner
        .bases()
        .iter()
        .map(|base| make_uri_ref(base, &id))
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::element::DEFAULT_FRAME_OF_REFERENCE;
    use crate::error::Error;
    use crate::registry::Registry;
    use std::cell::RefCell;
    use std::rc::Rc;
    use tempfile::TempDir;

    #[test]
    fn test_associate_and_dissociate() {
        let temp = TempDir::new().unwrap();
        let p = Package::create_transient(&Registry::new(Config::with_data_dir(temp.path())))
            .unwrap();
        let m = p.create_media("m", "http://x/m.avi", DEFAULT_FRAME_OF_REFERENCE).unwrap();
        let a = p.create_annotation("a", &m, 0, 1, "text/plain").unwrap();
        let t = p.create_tag("t").unwrap();

        p.associate_tag(&a, &t).unwrap();
        p.associate_tag(&a, &t).unwrap();
        assert_eq!(p.tags_of(&a).unwrap(), vec![t.clone()]);
        assert_eq!(p.elements_tagged(&t).unwrap(), vec![(*a).clone()]);
        assert_eq!(p.iter_taggers(&a, &t).unwrap(), vec![p.clone()]);

        p.dissociate_tag(&a, &t).unwrap();
        assert!(a.tags().unwrap().is_empty());
        assert!(p.iter_taggers(&a, &t).unwrap().is_empty());
    }

    #[test]
    fn test_tagging_imported_elements() {
        let temp = TempDir::new().unwrap();
        let registry = Registry::new(Config::with_data_dir(temp.path()));
        let p = Package::create_transient(&registry).unwrap();
        let q = Package::create_transient(&registry).unwrap();
        let m = q.create_media("m", "http://x/m.avi", DEFAULT_FRAME_OF_REFERENCE).unwrap();
        let t = q.create_tag("t").unwrap();
        let own = p.create_tag("own").unwrap();
        p.create_import("q", &q).unwrap();

        let seen = Rc::new(RefCell::new(Vec::new()));
        let s = Rc::clone(&seen);
        p.connect(move |phase, change| {
            if phase == Phase::Post {
                s.borrow_mut().push(change.clone());
            }
        });

        p.associate_tag(&m, &t).unwrap();
        p.associate_tag(&m, &own).unwrap();
        assert_eq!(
            seen.borrow()[0],
            Change::TagAdded {
                element: "q:m".to_string(),
                tag: "q:t".to_string()
            }
        );

        // the viewpoint matters: q does not see what p asserts
        assert_eq!(p.tags_of(&m).unwrap(), vec![own.clone(), t.clone()]);
        assert!(m.tags().unwrap().is_empty());
        assert_eq!(p.iter_taggers(&m, &t).unwrap(), vec![p.clone()]);

        let mut external = p.iter_external_tagging().unwrap();
        external.sort();
        assert_eq!(
            external,
            vec![
                ("q:m".to_string(), "own".to_string()),
                ("q:m".to_string(), "q:t".to_string()),
            ]
        );
    }

    #[test]
    fn test_tagging_requires_reference() {
        let temp = TempDir::new().unwrap();
        let registry = Registry::new(Config::with_data_dir(temp.path()));
        let p = Package::create_transient(&registry).unwrap();
        let q = Package::create_transient(&registry).unwrap();
        let t = p.create_tag("t").unwrap();
        let stranger = q.create_tag("s").unwrap();

        assert!(matches!(p.associate_tag(&stranger, &t), Err(Error::Model(_))));
        assert!(matches!(p.associate_tag(&t, &stranger), Err(Error::Model(_))));
    }
}
