//! Packages
//!
//! A [`Package`] is a named set of elements stored in one backend, plus
//! named imports of other packages. It is identified by its absolute url
//! and, optionally, by a uri that survives moving the package around.
//!
//! ## Architecture
//!
//! ```text
//!            imports (strong)               importers (weak)
//! Package A ────────────────▶ Package B ─────────────────▶ A
//!     │                           │
//!     └── routes: backend ─▶ {A, B, ...}  (transitive, per backend)
//! ```
//!
//! - Elements are cached per id; see [`crate::element`] for the
//!   volatile/heavy distinction.
//! - The routing table lists, per backend, every package reachable through
//!   imports. Groups and uri-ref lookups fan out over it.
//! - Closing a package unbinds it from its backend (or deletes it, when
//!   transient). Dropping the last handle of an open package closes it.

mod create;
mod imports;
mod resolve;
mod tags;

use std::cell::{Cell, RefCell};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::rc::{Rc, Weak};

use tracing::{debug, info, warn};

use crate::backend::{Backend, ElementRecord, StorageError};
use crate::content::ContentPolicy;
use crate::element::{Element, ElementInner, WithMeta};
use crate::error::{Error, Result};
use crate::events::{Change, EventHub, Mute, NoNotify, ObserverId, Phase};
use crate::registry::Registry;
use crate::urls;

pub use create::{DefaultFactory, ElementFactory};
pub use imports::Route;

/// Package metadata holding namespace prefixes, one `prefix uri` per line
pub const NAMESPACES_META: &str = "http://advene.org/ns/parser-meta#namespaces";

/// Entry of the element cache
enum Slot {
    Volatile(Weak<ElementInner>),
    Heavy(Element),
}

impl Slot {
    fn get(&self) -> Option<Element> {
        match self {
            Slot::Volatile(weak) => weak.upgrade().map(Element),
            Slot::Heavy(element) => Some(element.clone()),
        }
    }
}

pub(crate) struct PackageInner {
    registry: Rc<Registry>,
    url: RefCell<String>,
    uri: RefCell<String>,
    backend: Rc<dyn Backend>,
    pid: String,
    transient: bool,
    factory: Rc<dyn ElementFactory>,
    elements: RefCell<HashMap<String, Slot>>,
    imports: RefCell<BTreeMap<String, Option<Package>>>,
    importers: RefCell<Vec<(Weak<PackageInner>, String)>>,
    routes: RefCell<Option<Vec<Route>>>,
    events: EventHub,
    mute: Mute,
    /// Packaged root created by this package, removed on close
    packaged_root: RefCell<Option<PathBuf>>,
    closed: Cell<bool>,
}

/// Handle on a package; clones share the same package
#[derive(Clone)]
pub struct Package(pub(crate) Rc<PackageInner>);

impl PartialEq for Package {
    fn eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }
}

impl Eq for Package {}

impl fmt::Debug for Package {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Package(<{}>)", self.0.url.borrow())
    }
}

impl Package {
    // ==================== Construction ====================

    /// Create a new package at `url`
    pub fn create(registry: &Rc<Registry>, url: &str) -> Result<Package> {
        let url = urls::absolutize(url)?;
        let (backend, pid) = registry.create_backend(&url)?;
        let package = Package::build(registry, &url, backend, pid)?;
        info!("created package {}", url);
        Ok(package)
    }

    /// Bind the package at `url`, or parse it if no backend claims it
    ///
    /// Imports are loaded recursively; unreachable ones are left as
    /// placeholders.
    pub fn open(registry: &Rc<Registry>, url: &str) -> Result<Package> {
        let url = urls::absolutize(url)?;
        let package = match registry.claim_bind(&url) {
            Ok(factory) => {
                let (backend, pid) = factory.bind(&url)?;
                Package::build(registry, &url, backend, pid)?
            }
            Err(reason) => return Package::parse(registry, &url, reason),
        };
        package.load_imports()?;
        info!("opened package {}", url);
        Ok(package)
    }

    /// New package in the shared in-memory store
    pub fn create_transient(registry: &Rc<Registry>) -> Result<Package> {
        let (backend, pid) = registry.transient_backend()?;
        let url = backend.bound_url(&pid);
        let package = Package::build(registry, &url, backend, pid)?;
        debug!("created transient package {}", url);
        Ok(package)
    }

    fn parse(registry: &Rc<Registry>, url: &str, bind_failure: Option<Error>) -> Result<Package> {
        let no_claim = |reason: Option<Error>| Error::NoClaim {
            url: url.to_string(),
            reason: reason.map(Box::new),
        };
        let data = match urls::read_bytes(url) {
            Ok(data) => data,
            Err(e) => return Err(no_claim(bind_failure.or(Some(e)))),
        };
        let parser = match registry.claim_parse(&data, url) {
            Ok(parser) => parser,
            Err(reason) => return Err(no_claim(bind_failure.or(reason))),
        };

        let (backend, pid) = registry.transient_backend()?;
        let package = Package::build(registry, url, backend, pid)?;
        {
            let _quiet = package.no_notify();
            parser.parse(&data, url, &package)?;
        }
        info!("opened package {} with parser {}", url, parser.name());
        Ok(package)
    }

    fn build(
        registry: &Rc<Registry>,
        url: &str,
        backend: Rc<dyn Backend>,
        pid: String,
    ) -> Result<Package> {
        backend.update_url(&pid, url)?;
        let uri = backend.get_uri(&pid)?;
        let transient = backend.is_transient();
        let package = Package(Rc::new(PackageInner {
            registry: Rc::clone(registry),
            url: RefCell::new(url.to_string()),
            uri: RefCell::new(uri),
            backend,
            pid,
            transient,
            factory: registry.factory(),
            elements: RefCell::new(HashMap::new()),
            imports: RefCell::new(BTreeMap::new()),
            importers: RefCell::new(Vec::new()),
            routes: RefCell::new(None),
            events: EventHub::default(),
            mute: Mute::default(),
            packaged_root: RefCell::new(None),
            closed: Cell::new(false),
        }));
        registry.register_loaded(&package);
        Ok(package)
    }

    // ==================== Identity ====================

    pub fn url(&self) -> String {
        self.0.url.borrow().clone()
    }

    /// The uri, or `""` if none was set
    pub fn uri(&self) -> String {
        self.0.uri.borrow().clone()
    }

    pub fn uri_or_url(&self) -> String {
        let uri = self.uri();
        if uri.is_empty() {
            self.url()
        } else {
            uri
        }
    }

    /// Every base uri-refs to this package may use
    pub(crate) fn bases(&self) -> Vec<String> {
        let (uri, url) = (self.uri(), self.url());
        if uri.is_empty() || uri == url {
            vec![url]
        } else {
            vec![uri, url]
        }
    }

    /// Set the uri, updating the import record of every importer
    pub fn set_uri(&self, uri: &str) -> Result<()> {
        self.check_open()?;
        let change = Change::Attribute("uri".to_string());
        self.notify(Phase::Pre, &change);
        self.0.backend.update_uri(&self.0.pid, uri)?;
        *self.0.uri.borrow_mut() = uri.to_string();
        for (importer, name) in self.importer_edges() {
            importer.update_import_uri(&name, uri)?;
        }
        self.notify(Phase::Post, &change);
        Ok(())
    }

    pub fn pid(&self) -> &str {
        &self.0.pid
    }

    pub fn backend(&self) -> &Rc<dyn Backend> {
        &self.0.backend
    }

    pub fn registry(&self) -> &Rc<Registry> {
        &self.0.registry
    }

    /// Stored in memory; packaged content is only allowed then
    pub fn is_transient(&self) -> bool {
        self.0.transient
    }

    pub fn is_closed(&self) -> bool {
        self.0.closed.get()
    }

    pub(crate) fn check_open(&self) -> Result<()> {
        if self.is_closed() {
            return Err(Error::model(format!("package {} is closed", self.url())));
        }
        Ok(())
    }

    pub(crate) fn factory(&self) -> Rc<dyn ElementFactory> {
        Rc::clone(&self.0.factory)
    }

    pub(crate) fn policy(&self) -> Rc<dyn ContentPolicy> {
        self.0.registry.policy()
    }

    pub(crate) fn adopt_packaged_root(&self, root: PathBuf) {
        self.0.packaged_root.replace(Some(root));
    }

    // ==================== Notification ====================

    /// Observe package-level changes, including forwarded element changes
    pub fn connect(&self, callback: impl Fn(Phase, &Change) + 'static) -> ObserverId {
        self.0.events.connect(callback)
    }

    pub fn disconnect(&self, id: ObserverId) -> bool {
        self.0.events.disconnect(id)
    }

    pub(crate) fn events(&self) -> &EventHub {
        &self.0.events
    }

    pub(crate) fn is_muted(&self) -> bool {
        self.0.mute.is_muted()
    }

    pub(crate) fn notify(&self, phase: Phase, change: &Change) {
        if !self.is_muted() {
            self.0.events.emit(phase, change);
        }
    }

    /// Suppress every event of this package and its elements while the
    /// guard lives
    pub fn no_notify(&self) -> NoNotify {
        self.0.mute.guard()
    }

    // ==================== Element cache ====================

    fn cached(&self, id: &str) -> Option<Element> {
        self.0.elements.borrow().get(id).and_then(Slot::get)
    }

    /// Every element currently alive in the cache
    pub(crate) fn cached_elements(&self) -> Vec<Element> {
        self.0
            .elements
            .borrow()
            .values()
            .filter_map(Slot::get)
            .collect()
    }

    /// Cached handle of the record's element, built if needed
    pub(crate) fn element_from_record(&self, record: ElementRecord) -> Result<Element> {
        if let Some(element) = self.cached(&record.id) {
            return Ok(element);
        }
        let element = Element::from_record(&self.0, record);
        self.0
            .elements
            .borrow_mut()
            .insert(element.id(), Slot::Volatile(element.downgrade()));
        create::init_element(&*self.0.factory, &element)?;
        Ok(element)
    }

    pub(crate) fn set_heavy(&self, element: &Element, heavy: bool) {
        let slot = if heavy {
            Slot::Heavy(element.clone())
        } else {
            Slot::Volatile(element.downgrade())
        };
        self.0.elements.borrow_mut().insert(element.id(), slot);
    }

    pub(crate) fn rekey(&self, old: &str, new: &str) {
        let mut elements = self.0.elements.borrow_mut();
        if let Some(slot) = elements.remove(old) {
            elements.insert(new.to_string(), slot);
        }
    }

    pub(crate) fn forget(&self, id: &str) {
        let slot = self.0.elements.borrow_mut().remove(id);
        drop(slot);
    }

    // ==================== Close ====================

    /// Close this package and every package of its import cycles
    ///
    /// Fails while a live package outside those cycles imports it.
    pub fn close(&self) -> Result<()> {
        if self.is_closed() {
            return Ok(());
        }
        let members = self.cycle();
        for member in &members {
            if let Some(importer) = member.importers().into_iter().find(|i| !members.contains(i)) {
                return Err(Error::model(format!(
                    "package {} is still imported by {}",
                    member.url(),
                    importer.url()
                )));
            }
        }
        for member in &members {
            member.0.shutdown()?;
        }
        Ok(())
    }

    // ==================== Save ====================

    /// Serialize with the serializer claiming `path`
    pub fn save_as(&self, path: impl AsRef<Path>) -> Result<()> {
        self.check_open()?;
        let path = path.as_ref();
        let serializer = self.0.registry.claim_serialize(path)?;
        let mut file =
            File::create(path).map_err(|e| StorageError::from_io(e, path.to_path_buf()))?;
        serializer.serialize(self, &mut file)?;
        file.flush()
            .map_err(|e| StorageError::from_io(e, path.to_path_buf()))?;
        info!("saved {} to {:?} ({})", self.url(), path, serializer.name());
        Ok(())
    }

    /// Serialize back to the package url, which must be a file
    pub fn save(&self) -> Result<()> {
        let url = self.url();
        let path = urls::to_file_path(&url)
            .ok_or_else(|| Error::model(format!("{} is not a file url", url)))?;
        self.save_as(path)
    }

    // ==================== Namespaces ====================

    /// Namespace prefixes used by serializers, by prefix
    pub fn namespaces(&self) -> Result<BTreeMap<String, String>> {
        let stored = self.meta_str(NAMESPACES_META)?.unwrap_or_default();
        Ok(stored
            .lines()
            .filter_map(|line| {
                let mut words = line.split_whitespace();
                match (words.next(), words.next()) {
                    (Some(prefix), Some(uri)) => Some((prefix.to_string(), uri.to_string())),
                    _ => None,
                }
            })
            .collect())
    }

    pub fn set_namespaces(&self, namespaces: &BTreeMap<String, String>) -> Result<()> {
        let lines: Vec<String> = namespaces
            .iter()
            .map(|(prefix, uri)| format!("{} {}", prefix, uri))
            .collect();
        self.set_meta(NAMESPACES_META, &lines.join("\n"))
    }
}

impl PackageInner {
    fn shutdown(&self) -> Result<()> {
        if self.closed.replace(true) {
            return Ok(());
        }
        if !self.mute.is_muted() {
            self.events.emit(Phase::Post, &Change::Closed);
        }

        let me = self as *const PackageInner;
        let imports = std::mem::take(&mut *self.imports.borrow_mut());
        for child in imports.into_values().flatten() {
            child
                .0
                .importers
                .borrow_mut()
                .retain(|(w, _)| Weak::as_ptr(w) != me);
        }
        self.routes.replace(None);
        let elements = std::mem::take(&mut *self.elements.borrow_mut());
        drop(elements);

        let result = if self.transient {
            self.backend.delete(&self.pid)
        } else {
            self.backend.close(&self.pid)
        };
        if let Some(root) = self.packaged_root.take() {
            if let Err(e) = std::fs::remove_dir_all(&root) {
                warn!("failed to remove packaged root {:?}: {}", root, e);
            }
        }
        self.registry.forget_loaded(me);
        info!("closed package {}", self.url.borrow());
        result
    }
}

impl Drop for PackageInner {
    fn drop(&mut self) {
        if let Err(e) = self.shutdown() {
            warn!("failed to close package {}: {}", self.url.borrow(), e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::Claim;
    use crate::config::Config;
    use crate::element::{Annotation, Import, DEFAULT_FRAME_OF_REFERENCE};
    use crate::format::{Parser, Serializer};
    use tempfile::TempDir;

    fn registry(temp: &TempDir) -> Rc<Registry> {
        Registry::new(Config::with_data_dir(temp.path()))
    }

    fn sqlite_url(temp: &TempDir, name: &str) -> String {
        format!("sqlite:{}", temp.path().join(name).display())
    }

    #[test]
    fn test_create_close_open() {
        let temp = TempDir::new().unwrap();
        let registry = registry(&temp);
        let url = sqlite_url(&temp, "p.db");

        let p = Package::create(&registry, &url).unwrap();
        assert!(!p.is_transient());
        p.set_uri("http://example.com/p").unwrap();
        let m = p.create_media("m", "http://x/m.avi", DEFAULT_FRAME_OF_REFERENCE).unwrap();
        p.create_annotation("a", &m, 5, 9, "text/plain").unwrap();
        drop(m);
        p.close().unwrap();
        assert!(p.is_closed());
        assert!(matches!(p.create_tag("t"), Err(Error::Model(_))));

        let p = Package::open(&registry, &url).unwrap();
        assert_eq!(p.uri(), "http://example.com/p");
        let a = Annotation::try_from(p.get_element("a").unwrap()).unwrap();
        assert_eq!((a.begin(), a.end()), (5, 9));
    }

    #[test]
    fn test_open_twice_is_in_use() {
        let temp = TempDir::new().unwrap();
        let registry = registry(&temp);
        let url = sqlite_url(&temp, "p.db");
        let _p = Package::create(&registry, &url).unwrap();

        match Package::open(&registry, &url) {
            Err(Error::NoClaim {
                reason: Some(reason),
                ..
            }) => assert!(matches!(*reason, Error::PackageInUse(_))),
            other => panic!("unexpected {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn test_create_existing_fails() {
        let temp = TempDir::new().unwrap();
        let registry = registry(&temp);
        let url = sqlite_url(&temp, "p.db");
        Package::create(&registry, &url).unwrap().close().unwrap();
        assert!(matches!(
            Package::create(&registry, &url),
            Err(Error::NoClaim { reason: Some(_), .. })
        ));
    }

    #[test]
    fn test_drop_closes_transient_package() {
        let temp = TempDir::new().unwrap();
        let registry = registry(&temp);
        let p = Package::create_transient(&registry).unwrap();
        let backend = Rc::clone(p.backend());
        let pid = p.pid().to_string();
        p.create_tag("t").unwrap();
        let kept = Package::create_transient(&registry).unwrap();

        drop(p);
        assert_eq!(registry.loaded(), vec![kept.clone()]);
        assert!(!backend.has_element(&pid, "t", None).unwrap());
    }

    #[test]
    fn test_close_refused_while_imported() {
        let temp = TempDir::new().unwrap();
        let registry = registry(&temp);
        let p = Package::create_transient(&registry).unwrap();
        let q = Package::create_transient(&registry).unwrap();
        p.create_import("q", &q).unwrap();

        assert!(matches!(q.close(), Err(Error::Model(_))));
        p.close().unwrap();
        q.close().unwrap();
    }

    #[test]
    fn test_close_import_cycle() {
        let temp = TempDir::new().unwrap();
        let registry = registry(&temp);
        let a = Package::create_transient(&registry).unwrap();
        let b = Package::create_transient(&registry).unwrap();
        a.create_import("b", &b).unwrap();
        b.create_import("a", &a).unwrap();

        a.close().unwrap();
        assert!(a.is_closed());
        assert!(b.is_closed());
        assert!(registry.loaded().is_empty());
    }

    #[test]
    fn test_events_and_no_notify() {
        let temp = TempDir::new().unwrap();
        let p = Package::create_transient(&registry(&temp)).unwrap();
        let seen = Rc::new(RefCell::new(Vec::new()));
        let s = Rc::clone(&seen);
        p.connect(move |phase, change| {
            if phase == Phase::Post {
                s.borrow_mut().push(change.clone());
            }
        });

        let t = p.create_tag("t").unwrap();
        t.set_meta("k", "v").unwrap();
        {
            let _quiet = p.no_notify();
            p.create_tag("hidden").unwrap();
        }

        assert_eq!(
            *seen.borrow(),
            vec![
                Change::Created("t".to_string()),
                Change::Element {
                    id: "t".to_string(),
                    change: Box::new(Change::Meta("k".to_string())),
                },
            ]
        );
    }

    #[test]
    fn test_namespaces() {
        let temp = TempDir::new().unwrap();
        let p = Package::create_transient(&registry(&temp)).unwrap();
        assert!(p.namespaces().unwrap().is_empty());

        let mut ns = BTreeMap::new();
        ns.insert("dc".to_string(), "http://purl.org/dc/elements/1.1/".to_string());
        ns.insert("ex".to_string(), "http://example.com/".to_string());
        p.set_namespaces(&ns).unwrap();
        assert_eq!(p.namespaces().unwrap(), ns);
        assert_eq!(
            p.meta_str(NAMESPACES_META).unwrap().as_deref(),
            Some("dc http://purl.org/dc/elements/1.1/\nex http://example.com/")
        );
    }

    struct TagLines;

    impl Parser for TagLines {
        fn name(&self) -> &'static str {
            "tag-lines"
        }

        fn claims_for_parse(&self, data: &[u8], _url: &str) -> Claim {
            if data.starts_with(b"tags\n") {
                Claim::Accept(10)
            } else {
                Claim::inapplicable()
            }
        }

        fn parse(&self, data: &[u8], _url: &str, package: &Package) -> Result<()> {
            let text = String::from_utf8_lossy(data);
            for id in text.lines().skip(1) {
                package.create_tag(id)?;
            }
            Ok(())
        }
    }

    impl Serializer for TagLines {
        fn name(&self) -> &'static str {
            "tag-lines"
        }

        fn claims_for_serialize(&self, path: &Path) -> Claim {
            match path.extension() {
                Some(ext) if ext == "tags" => Claim::Accept(10),
                _ => Claim::inapplicable(),
            }
        }

        fn serialize(&self, package: &Package, out: &mut dyn Write) -> Result<()> {
            use crate::group::Group;
            let mut text = String::from("tags\n");
            for tag in package.own().iter_tags(&Default::default())? {
                text.push_str(&tag?.id());
                text.push('\n');
            }
            out.write_all(text.as_bytes()).map_err(StorageError::Io)?;
            Ok(())
        }
    }

    #[test]
    fn test_save_and_parse_fallback() {
        let temp = TempDir::new().unwrap();
        let registry = Registry::builder(Config::with_data_dir(temp.path()))
            .parser(Rc::new(TagLines))
            .serializer(Rc::new(TagLines))
            .build();
        let p = Package::create_transient(&registry).unwrap();
        p.create_tag("t1").unwrap();
        p.create_tag("t2").unwrap();

        let path = temp.path().join("p.tags");
        p.save_as(&path).unwrap();
        assert!(matches!(
            p.save_as(temp.path().join("p.xml")),
            Err(Error::NoClaim { .. })
        ));

        let url = urls::absolutize(&path.to_string_lossy()).unwrap();
        let parsed = Package::open(&registry, &url).unwrap();
        assert!(parsed.is_transient());
        assert_eq!(parsed.url(), url);
        assert!(parsed.has_element("t2").unwrap());

        std::fs::write(temp.path().join("junk.tags"), "nothing").unwrap();
        assert!(matches!(
            Package::open(&registry, &temp.path().join("junk.tags").to_string_lossy()),
            Err(Error::NoClaim { .. })
        ));
    }

    #[test]
    fn test_uri_propagates_to_importers() {
        let temp = TempDir::new().unwrap();
        let registry = registry(&temp);
        let p = Package::create_transient(&registry).unwrap();
        let q = Package::create_transient(&registry).unwrap();
        let import = p.create_import("q", &q).unwrap();
        assert_eq!(import.uri(), "");

        q.set_uri("http://example.com/q").unwrap();
        assert_eq!(import.uri(), "http://example.com/q");
        drop(import);
        let import = Import::try_from(p.get_element("q").unwrap()).unwrap();
        assert_eq!(import.uri(), "http://example.com/q");
        assert_eq!(import.url(), q.url());
    }
}
