//! Import graph and backend routing

use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::rc::{Rc, Weak};

use tracing::{debug, warn};

use super::{Package, PackageInner};
use crate::backend::{backend_key, Backend, ElementRecord, ImportFilter, RecordData};
use crate::element::Element;
use crate::error::{Error, Result};
use crate::idref::make_uri_ref;
use crate::urls;

/// Packages reachable from some package that live in one backend
#[derive(Clone)]
pub struct Route {
    pub backend: Rc<dyn Backend>,
    packages: Vec<(String, Weak<PackageInner>)>,
}

impl Route {
    /// Route to `package` alone
    pub(crate) fn single(package: &Package) -> Route {
        Route {
            backend: Rc::clone(&package.0.backend),
            packages: vec![(package.pid().to_string(), Rc::downgrade(&package.0))],
        }
    }

    /// Backend package ids, in discovery order
    pub fn pids(&self) -> Vec<String> {
        self.packages.iter().map(|(pid, _)| pid.clone()).collect()
    }

    /// Packages still alive
    pub fn packages(&self) -> Vec<Package> {
        self.packages
            .iter()
            .filter_map(|(_, w)| w.upgrade())
            .map(Package)
            .collect()
    }

    pub fn package(&self, pid: &str) -> Option<Package> {
        self.packages
            .iter()
            .find(|(p, _)| p == pid)
            .and_then(|(_, w)| w.upgrade())
            .map(Package)
    }

    /// Element handle for a row returned by this route's backend
    pub(crate) fn element(&self, record: ElementRecord) -> Result<Element> {
        let package = self.package(&record.package).ok_or_else(|| {
            Error::model(format!("package {} is no longer loaded", record.package))
        })?;
        package.element_from_record(record)
    }

    fn add(table: &mut Vec<Route>, package: &Package) {
        let key = backend_key(&package.0.backend);
        let entry = (package.pid().to_string(), Rc::downgrade(&package.0));
        match table.iter_mut().find(|r| backend_key(&r.backend) == key) {
            Some(route) => route.packages.push(entry),
            None => table.push(Route {
                backend: Rc::clone(&package.0.backend),
                packages: vec![entry],
            }),
        }
    }
}

/// Reachable package ids per backend, compared to skip needless updates
fn signature(routes: &[Route]) -> BTreeMap<usize, BTreeSet<String>> {
    routes
        .iter()
        .map(|r| (backend_key(&r.backend), r.pids().into_iter().collect()))
        .collect()
}

fn key(package: &Package) -> *const PackageInner {
    Rc::as_ptr(&package.0)
}

impl Package {
    // ==================== Imports ====================

    /// Imports by name; `None` marks an import that could not be loaded
    pub fn imports(&self) -> Vec<(String, Option<Package>)> {
        self.0
            .imports
            .borrow()
            .iter()
            .map(|(name, p)| (name.clone(), p.clone()))
            .collect()
    }

    /// The package loaded for import `name`
    pub fn imported(&self, name: &str) -> Option<Package> {
        self.0.imports.borrow().get(name).cloned().flatten()
    }

    /// First import name under which `target` is imported
    pub(crate) fn import_name_of(&self, target: &Package) -> Option<String> {
        self.0
            .imports
            .borrow()
            .iter()
            .find(|(_, p)| p.as_ref() == Some(target))
            .map(|(name, _)| name.clone())
    }

    /// Open packages importing this one
    pub fn importers(&self) -> Vec<Package> {
        let mut found: Vec<Package> = Vec::new();
        for (importer, _) in self.importer_edges() {
            if !found.contains(&importer) {
                found.push(importer);
            }
        }
        found
    }

    /// (importer, import name) of every open importer
    pub(crate) fn importer_edges(&self) -> Vec<(Package, String)> {
        self.0
            .importers
            .borrow()
            .iter()
            .filter_map(|(w, name)| w.upgrade().map(|p| (Package(p), name.clone())))
            .filter(|(p, _)| !p.is_closed())
            .collect()
    }

    pub(crate) fn load_imports(&self) -> Result<()> {
        let records = self
            .0
            .backend
            .iter_imports(&[self.0.pid.clone()], &ImportFilter::default())?
            .collect::<Result<Vec<ElementRecord>>>()?;
        for record in records {
            if let RecordData::Import { url, uri } = &record.data {
                let imported = self.load_import(&record.id, url, uri);
                self.attach_import(&record.id, imported);
            }
        }
        self.refresh_routes();
        Ok(())
    }

    /// Find or open the package of an import record
    pub(crate) fn load_import(&self, name: &str, url: &str, uri: &str) -> Option<Package> {
        let registry = Rc::clone(&self.0.registry);
        let resolved = urls::resolve(&self.url(), url);
        let check = |found: Package| {
            if !uri.is_empty() && found.uri() != uri {
                warn!(
                    "import {} of {}: {} has uri {:?}, expected {:?}",
                    name,
                    self.url(),
                    found.url(),
                    found.uri(),
                    uri
                );
            }
            Some(found)
        };

        if let Some(found) = registry.find_loaded(&resolved, uri) {
            return check(found);
        }
        match Package::open(&registry, &resolved) {
            Ok(found) => return check(found),
            Err(e) => debug!("import {} of {}: {}", name, self.url(), e),
        }
        if !uri.is_empty() {
            match Package::open(&registry, uri) {
                Ok(found) => return Some(found),
                Err(e) => debug!("import {} of {}: {}", name, self.url(), e),
            }
        }
        warn!("import {} of {} is unreachable", name, self.url());
        None
    }

    /// Record an import edge; routes must be refreshed afterwards
    pub(crate) fn attach_import(&self, name: &str, imported: Option<Package>) {
        if let Some(child) = &imported {
            child
                .0
                .importers
                .borrow_mut()
                .push((Rc::downgrade(&self.0), name.to_string()));
        }
        self.0
            .imports
            .borrow_mut()
            .insert(name.to_string(), imported);
    }

    pub(crate) fn rename_import(&self, old: &str, new: &str) {
        let entry = self.0.imports.borrow_mut().remove(old);
        let Some(imported) = entry else {
            return;
        };
        if let Some(child) = &imported {
            for (w, name) in child.0.importers.borrow_mut().iter_mut() {
                if Weak::as_ptr(w) == key(self) && name == old {
                    *name = new.to_string();
                }
            }
        }
        self.0
            .imports
            .borrow_mut()
            .insert(new.to_string(), imported);
    }

    pub(crate) fn drop_import(&self, name: &str) {
        let removed = self.0.imports.borrow_mut().remove(name);
        if let Some(Some(child)) = removed {
            child
                .0
                .importers
                .borrow_mut()
                .retain(|(w, n)| !(Weak::as_ptr(w) == key(self) && n == name));
        }
        self.refresh_routes();
    }

    pub(crate) fn update_import_uri(&self, name: &str, uri: &str) -> Result<()> {
        let record = self.0.backend.get_element(&self.0.pid, name)?;
        if let Some(ElementRecord {
            data: RecordData::Import { url, .. },
            ..
        }) = record
        {
            self.0.backend.update_import(&self.0.pid, name, &url, uri)?;
            if let Some(import) = self.cached(name) {
                import.set_import_record(&url, uri);
            }
        }
        Ok(())
    }

    // ==================== Graph walks ====================

    /// This package and every open package reachable through imports
    pub(crate) fn reachable(&self) -> Vec<Package> {
        let mut found = vec![self.clone()];
        let mut seen: HashSet<_> = [key(self)].into_iter().collect();
        let mut stack = vec![self.clone()];
        while let Some(package) = stack.pop() {
            for (_, child) in package.imports() {
                if let Some(child) = child.filter(|c| !c.is_closed()) {
                    if seen.insert(key(&child)) {
                        found.push(child.clone());
                        stack.push(child);
                    }
                }
            }
        }
        found
    }

    /// This package and every open package importing it, directly or not
    pub(crate) fn importer_closure(&self) -> Vec<Package> {
        let mut found = vec![self.clone()];
        let mut seen: HashSet<_> = [key(self)].into_iter().collect();
        let mut stack = vec![self.clone()];
        while let Some(package) = stack.pop() {
            for importer in package.importers() {
                if seen.insert(key(&importer)) {
                    found.push(importer.clone());
                    stack.push(importer);
                }
            }
        }
        found
    }

    /// Packages sharing an import cycle with this one, itself included
    pub(crate) fn cycle(&self) -> Vec<Package> {
        let below = self.reachable();
        self.importer_closure()
            .into_iter()
            .filter(|p| below.contains(p))
            .collect()
    }

    // ==================== Routing ====================

    /// Backends and package ids reachable from this package
    pub fn routes(&self) -> Result<Vec<Route>> {
        self.check_open()?;
        if let Some(routes) = self.0.routes.borrow().as_ref() {
            return Ok(routes.clone());
        }
        let routes = self.compute_routes();
        self.0.routes.replace(Some(routes.clone()));
        Ok(routes)
    }

    /// Depth-first walk of the imports, reusing the tables of packages
    /// that can not reach this one
    fn compute_routes(&self) -> Vec<Route> {
        let stale: HashSet<_> = self.importer_closure().iter().map(key).collect();
        let mut table = Vec::new();
        let mut seen = HashSet::new();
        let mut stack = vec![self.clone()];

        while let Some(package) = stack.pop() {
            if !seen.insert(key(&package)) {
                continue;
            }
            Route::add(&mut table, &package);

            if !stale.contains(&key(&package)) {
                let known = package.0.routes.borrow().clone();
                if let Some(routes) = known {
                    for reached in routes.iter().flat_map(Route::packages) {
                        if seen.insert(key(&reached)) {
                            Route::add(&mut table, &reached);
                        }
                    }
                    continue;
                }
            }
            for (_, child) in package.imports() {
                if let Some(child) = child.filter(|c| !c.is_closed()) {
                    stack.push(child);
                }
            }
        }
        table
    }

    /// Recompute the routes, and the importers' ones if they changed
    pub(crate) fn refresh_routes(&self) {
        if self.is_closed() {
            return;
        }
        let routes = self.compute_routes();
        let old = self.0.routes.replace(Some(routes.clone()));
        let changed = old.map_or(true, |old| signature(&old) != signature(&routes));
        if changed {
            debug!("routes of {} changed", self.url());
            for importer in self.importers() {
                importer.refresh_routes();
            }
        }
    }

    /// Packages that may hold references to this one's elements (itself and
    /// its importers, directly or not), grouped per backend
    pub(crate) fn referrer_groups(&self) -> Vec<(Rc<dyn Backend>, Vec<String>)> {
        group_by_backend(&self.importer_closure())
    }

    /// Point references to own element `old` at `new`, in this package and
    /// every package importing it
    pub(crate) fn rename_references_to(&self, old: &str, new: &str) -> Result<()> {
        let packages = self.importer_closure();
        let groups = group_by_backend(&packages);
        for (backend, pids) in &groups {
            for base in self.bases() {
                backend.rename_references(pids, &make_uri_ref(&base, old), new)?;
            }
        }
        for package in &packages {
            for element in package.cached_elements() {
                element.reload()?;
            }
        }
        Ok(())
    }
}

fn group_by_backend(packages: &[Package]) -> Vec<(Rc<dyn Backend>, Vec<String>)> {
    let mut groups: Vec<(Rc<dyn Backend>, Vec<String>)> = Vec::new();
    for package in packages {
        let pid = package.pid().to_string();
        let backend = &package.0.backend;
        match groups
            .iter_mut()
            .find(|(b, _)| backend_key(b) == backend_key(backend))
        {
            Some((_, pids)) => pids.push(pid),
            None => groups.push((Rc::clone(backend), vec![pid])),
        }
    }
    groups
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::content::WithContent;
    use crate::element::{Annotation, DEFAULT_FRAME_OF_REFERENCE};
    use crate::registry::Registry;
    use tempfile::TempDir;

    fn pids(package: &Package) -> Vec<BTreeSet<String>> {
        package
            .routes()
            .unwrap()
            .iter()
            .map(|r| r.pids().into_iter().collect())
            .collect()
    }

    #[test]
    fn test_routes_follow_imports() {
        let temp = TempDir::new().unwrap();
        let registry = Registry::new(Config::with_data_dir(temp.path()));
        let a = Package::create_transient(&registry).unwrap();
        let b = Package::create_transient(&registry).unwrap();
        let c = Package::create_transient(&registry).unwrap();
        let file = Package::create(
            &registry,
            &format!("sqlite:{}", temp.path().join("f.db").display()),
        )
        .unwrap();

        assert_eq!(pids(&a), vec![[a.pid().to_string()].into_iter().collect()]);
        b.create_import("c", &c).unwrap();
        a.create_import("b", &b).unwrap();
        let expected: BTreeSet<String> = [a.pid(), b.pid(), c.pid()]
            .iter()
            .map(|s| s.to_string())
            .collect();
        assert_eq!(pids(&a), vec![expected]);

        // a change deep down reaches every importer
        c.create_import("f", &file).unwrap();
        let routes = a.routes().unwrap();
        assert_eq!(routes.len(), 2);
        assert_eq!(routes[1].pids(), vec![file.pid().to_string()]);
        assert_eq!(routes[1].packages(), vec![file.clone()]);

        c.get_element("f").unwrap().delete().unwrap();
        assert_eq!(a.routes().unwrap().len(), 1);
        assert!(c.imported("f").is_none());
        assert!(file.importers().is_empty());
    }

    #[test]
    fn test_routes_in_cycle() {
        let temp = TempDir::new().unwrap();
        let registry = Registry::new(Config::with_data_dir(temp.path()));
        let a = Package::create_transient(&registry).unwrap();
        let b = Package::create_transient(&registry).unwrap();
        let c = Package::create_transient(&registry).unwrap();
        a.create_import("b", &b).unwrap();
        b.create_import("a", &a).unwrap();
        b.create_import("c", &c).unwrap();
        assert_eq!(pids(&a)[0].len(), 3);

        b.get_element("c").unwrap().delete().unwrap();
        assert_eq!(pids(&a)[0].len(), 2);
        assert_eq!(pids(&b)[0].len(), 2);
        assert_eq!(a.cycle().len(), 2);
    }

    #[test]
    fn test_imports_reloaded_on_open() {
        let temp = TempDir::new().unwrap();
        let registry = Registry::new(Config::with_data_dir(temp.path()));
        let a_url = format!("sqlite:{}", temp.path().join("a.db").display());
        let b_url = format!("sqlite:{}", temp.path().join("b.db").display());

        let a = Package::create(&registry, &a_url).unwrap();
        let b = Package::create(&registry, &b_url).unwrap();
        let m = b.create_media("m", "http://x/m.avi", DEFAULT_FRAME_OF_REFERENCE).unwrap();
        a.create_import("b", &b).unwrap();
        a.create_annotation("a1", &m, 0, 10, "text/plain").unwrap();
        drop(m);
        a.close().unwrap();
        b.close().unwrap();

        let a = Package::open(&registry, &a_url).unwrap();
        let b = a.imported("b").unwrap();
        assert_eq!(b.url(), b_url);
        let a1 = Annotation::try_from(a.get_element("a1").unwrap()).unwrap();
        assert_eq!(a1.media_id(), "b:m");
        assert_eq!(Element::from(a1.media().unwrap()), b.get_element("m").unwrap());
    }

    #[test]
    fn test_unreachable_import_is_placeholder() {
        let temp = TempDir::new().unwrap();
        let registry = Registry::new(Config::with_data_dir(temp.path()));
        let a_url = format!("sqlite:{}", temp.path().join("a.db").display());
        let b_path = temp.path().join("b.db");

        let a = Package::create(&registry, &a_url).unwrap();
        let b = Package::create(&registry, &format!("sqlite:{}", b_path.display())).unwrap();
        a.create_import("b", &b).unwrap();
        a.close().unwrap();
        b.close().unwrap();
        std::fs::remove_file(&b_path).unwrap();

        let a = Package::open(&registry, &a_url).unwrap();
        assert_eq!(a.imports().len(), 1);
        assert!(a.imported("b").is_none());
        assert!(matches!(
            a.get_element("b:m"),
            Err(Error::UnreachableImport { .. })
        ));
        assert_eq!(a.try_get_element("b:m").unwrap(), None);
    }

    #[test]
    fn test_rename_reaches_importers() {
        let temp = TempDir::new().unwrap();
        let registry = Registry::new(Config::with_data_dir(temp.path()));
        let p = Package::create_transient(&registry).unwrap();
        let q = Package::create_transient(&registry).unwrap();
        let m = q.create_media("m", "http://x/m.avi", DEFAULT_FRAME_OF_REFERENCE).unwrap();
        let a = q.create_annotation("a", &m, 0, 1, "text/plain").unwrap();
        p.create_import("q", &q).unwrap();
        let r = p.create_relation("r", "text/plain", &[a.clone()]).unwrap();
        let b = p.create_annotation("b", &m, 2, 3, "text/plain").unwrap();

        a.rename("a2").unwrap();
        m.rename("m2").unwrap();

        assert_eq!(r.member_ids().unwrap(), vec!["q:a2"]);
        assert_eq!(r.member(0).unwrap(), a);
        assert_eq!(b.media_id(), "q:m2");

        // the old id-refs no longer resolve from the importer
        assert!(matches!(p.get_element("q:a"), Err(Error::NoSuchElement { .. })));
        assert!(p.try_get_element("q:m").unwrap().is_none());
        assert_eq!(p.get_element("q:a2").unwrap(), *a);
    }

    #[test]
    fn test_rename_resource_used_as_model_by_importer() {
        let temp = TempDir::new().unwrap();
        let registry = Registry::new(Config::with_data_dir(temp.path()));
        let p = Package::create_transient(&registry).unwrap();
        let q = Package::create_transient(&registry).unwrap();
        let schema = q.create_resource("schema", "application/json").unwrap();
        p.create_import("q", &q).unwrap();
        let v = p.create_view("v", "text/plain").unwrap();
        v.set_content_model(Some(&schema)).unwrap();

        schema.rename("schema2").unwrap();

        assert_eq!(v.content_model_id().unwrap(), "q:schema2");
        assert_eq!(v.content_model().unwrap(), Some(schema.clone()));
        assert!(p.get_element("q:schema").unwrap_err().is_not_found());
        assert_eq!(q.get_element("schema2").unwrap(), *schema);
    }

    #[test]
    fn test_rename_import_rewrites_prefixes() {
        let temp = TempDir::new().unwrap();
        let registry = Registry::new(Config::with_data_dir(temp.path()));
        let p = Package::create_transient(&registry).unwrap();
        let q = Package::create_transient(&registry).unwrap();
        let m = q.create_media("m", "http://x/m.avi", DEFAULT_FRAME_OF_REFERENCE).unwrap();
        let import = p.create_import("q", &q).unwrap();
        let a = p.create_annotation("a", &m, 0, 1, "text/plain").unwrap();

        import.rename("other").unwrap();

        assert_eq!(a.media_id(), "other:m");
        assert_eq!(p.imported("other"), Some(q.clone()));
        assert!(p.imported("q").is_none());
        assert_eq!(p.make_id_for(&q, "m").unwrap(), "other:m");
    }
}
