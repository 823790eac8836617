//! Ordered members of relations and items of lists
//!
//! Id-refs are read once and cached on the handle; each entry is resolved
//! to an element on first access and the result cached weakly per index.

use crate::backend::ElementType;
use crate::element::{Annotation, Element, ItemCache, List, Relation};
use crate::error::{Error, Result};
use crate::events::Change;
use crate::package::Package;

fn is_members(element: &Element) -> bool {
    element.element_type() == ElementType::Relation
}

/// Cached id-refs, loaded from the backend if needed
fn ids(element: &Element) -> Result<Vec<String>> {
    if let Some(cache) = element.0.items.borrow().as_ref() {
        return Ok(cache.ids.clone());
    }
    let package = element.live_package()?;
    let (pid, id) = (package.pid(), element.id());
    let rows = if is_members(element) {
        package.backend().iter_members(pid, &id)?
    } else {
        package.backend().iter_items(pid, &id)?
    };
    let ids = rows.collect::<Result<Vec<String>>>()?;
    element.0.items.replace(Some(ItemCache {
        resolved: vec![Default::default(); ids.len()],
        ids: ids.clone(),
    }));
    Ok(ids)
}

fn get(element: &Element, index: usize) -> Result<Element> {
    let all = ids(element)?;
    let idref = all
        .get(index)
        .ok_or_else(|| Error::model(format!("index {} out of range in {:?}", index, element)))?;
    let cached = element
        .0
        .items
        .borrow()
        .as_ref()
        .and_then(|cache| cache.resolved.get(index).and_then(|w| w.upgrade()));
    if let Some(inner) = cached {
        return Ok(Element(inner));
    }
    let resolved = element.live_package()?.get_element(idref)?;
    if let Some(cache) = element.0.items.borrow_mut().as_mut() {
        if let Some(slot) = cache.resolved.get_mut(index) {
            *slot = resolved.downgrade();
        }
    }
    Ok(resolved)
}

fn edit(
    element: &Element,
    f: impl FnOnce(&Package, &str, &str) -> Result<()>,
) -> Result<()> {
    element.mutate(Change::Items, |package| {
        let result = f(package, package.pid(), &element.id());
        element.0.items.replace(None);
        result
    })
}

fn insert(element: &Element, index: Option<usize>, target: &Element) -> Result<()> {
    let idref = element.live_package()?.reference_to(target)?;
    edit(element, |package, pid, id| {
        if is_members(element) {
            package.backend().insert_member(pid, id, &idref, index)
        } else {
            package.backend().insert_item(pid, id, &idref, index)
        }
    })
}

fn set(element: &Element, index: usize, target: &Element) -> Result<()> {
    let idref = element.live_package()?.reference_to(target)?;
    edit(element, |package, pid, id| {
        if is_members(element) {
            package.backend().update_member(pid, id, index, &idref)
        } else {
            package.backend().update_item(pid, id, index, &idref)
        }
    })
}

fn remove(element: &Element, index: usize) -> Result<()> {
    edit(element, |package, pid, id| {
        if is_members(element) {
            package.backend().remove_member(pid, id, index)
        } else {
            package.backend().remove_item(pid, id, index)
        }
    })
}

fn all(element: &Element) -> Result<Vec<Element>> {
    (0..ids(element)?.len()).map(|i| get(element, i)).collect()
}

impl Relation {
    pub fn len(&self) -> Result<usize> {
        Ok(ids(self)?.len())
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    /// Id-refs of the members, relative to the owner
    pub fn member_ids(&self) -> Result<Vec<String>> {
        ids(self)
    }

    pub fn member(&self, index: usize) -> Result<Annotation> {
        Annotation::try_from(get(self, index)?)
    }

    pub fn members(&self) -> Result<Vec<Annotation>> {
        all(self)?.into_iter().map(Annotation::try_from).collect()
    }

    pub fn push_member(&self, member: &Annotation) -> Result<()> {
        insert(self, None, member)
    }

    pub fn insert_member(&self, index: usize, member: &Annotation) -> Result<()> {
        insert(self, Some(index), member)
    }

    pub fn set_member(&self, index: usize, member: &Annotation) -> Result<()> {
        set(self, index, member)
    }

    pub fn remove_member(&self, index: usize) -> Result<()> {
        remove(self, index)
    }
}

impl List {
    pub fn len(&self) -> Result<usize> {
        Ok(ids(self)?.len())
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    pub fn item_ids(&self) -> Result<Vec<String>> {
        ids(self)
    }

    pub fn item(&self, index: usize) -> Result<Element> {
        get(self, index)
    }

    pub fn items(&self) -> Result<Vec<Element>> {
        all(self)
    }

    pub fn push_item(&self, item: &Element) -> Result<()> {
        insert(self, None, item)
    }

    pub fn insert_item(&self, index: usize, item: &Element) -> Result<()> {
        insert(self, Some(index), item)
    }

    pub fn set_item(&self, index: usize, item: &Element) -> Result<()> {
        set(self, index, item)
    }

    pub fn remove_item(&self, index: usize) -> Result<()> {
        remove(self, index)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::element::DEFAULT_FRAME_OF_REFERENCE;
    use crate::registry::Registry;
    use tempfile::TempDir;

    fn setup() -> (TempDir, Package) {
        let temp = TempDir::new().unwrap();
        let registry = Registry::new(Config::with_data_dir(temp.path()));
        (temp, Package::create_transient(&registry).unwrap())
    }

    #[test]
    fn test_relation_members() {
        let (_temp, p) = setup();
        let m = p.create_media("m", "http://x/m.avi", DEFAULT_FRAME_OF_REFERENCE).unwrap();
        let a = p.create_annotation("a", &m, 0, 1, "text/plain").unwrap();
        let b = p.create_annotation("b", &m, 1, 2, "text/plain").unwrap();
        let c = p.create_annotation("c", &m, 2, 3, "text/plain").unwrap();
        let r = p.create_relation("r", "text/plain", &[a.clone(), b.clone()]).unwrap();

        assert_eq!(r.len().unwrap(), 2);
        assert_eq!(r.member(1).unwrap(), b);
        r.insert_member(1, &c).unwrap();
        assert_eq!(r.member_ids().unwrap(), vec!["a", "c", "b"]);
        r.set_member(0, &b).unwrap();
        r.remove_member(2).unwrap();
        assert_eq!(r.members().unwrap(), vec![b.clone(), c.clone()]);
        assert!(r.member(2).is_err());
    }

    #[test]
    fn test_list_items_of_any_kind() {
        let (_temp, p) = setup();
        let t = p.create_tag("t").unwrap();
        let v = p.create_view("v", "text/plain").unwrap();
        let l = p.create_list("l", &[]).unwrap();

        l.push_item(&t).unwrap();
        l.push_item(&v).unwrap();
        l.insert_item(0, &v).unwrap();
        assert_eq!(l.item_ids().unwrap(), vec!["v", "t", "v"]);
        drop(t);
        assert_eq!(l.item(1).unwrap().id(), "t");
        assert!(l.remove_item(3).is_err());
        assert_eq!(l.len().unwrap(), 3);
    }

    #[test]
    fn test_cannot_hold_unreachable_elements() {
        let (_temp, p) = setup();
        let temp2 = TempDir::new().unwrap();
        let other = Package::create_transient(&Registry::new(Config::with_data_dir(temp2.path())))
            .unwrap();
        let foreign = other.create_tag("x").unwrap();
        let l = p.create_list("l", &[]).unwrap();
        assert!(matches!(l.push_item(&foreign), Err(Error::Model(_))));
        assert!(l.is_empty().unwrap());
    }
}
