//! Plug-in registry
//!
//! A [`Registry`] is built once and shared as `Rc<Registry>` by every
//! package opened through it. It holds, in registration order:
//!
//! - backend factories, asked to claim urls on create and bind;
//! - parsers, asked to claim bytes when no backend binds a url;
//! - serializers, asked to claim paths on save;
//! - content handlers, asked to claim mimetypes.
//!
//! Claims are ranked by score; ties go to the earliest registration.
//! The registry also tracks every loaded package weakly, so that imports
//! reuse packages already in memory.

use std::cell::RefCell;
use std::collections::BTreeSet;
use std::path::Path;
use std::rc::{Rc, Weak};

use crate::backend::sqlite::SqliteFactory;
use crate::backend::{rank_claims, Backend, BackendFactory, Claim};
use crate::config::Config;
use crate::content::{
    AvPairsHandler, ContentHandler, ContentPolicy, DefaultContentPolicy, JsonHandler,
    ValuesHandler,
};
use crate::error::{Error, Result};
use crate::format::{Parser, Serializer};
use crate::package::{DefaultFactory, ElementFactory, Package, PackageInner};

/// Mimetypes treated as text besides `text/*` and `*+xml`
pub const TEXTUAL_MIMETYPES: [&str; 8] = [
    "application/json",
    "application/schema+json",
    "application/xml",
    "application/x-ldt-structured",
    "image/svg",
    "application/x-advene-builtin-view",
    "application/x-advene-type-constraint",
    "application/x-advene-structured",
];

pub struct Registry {
    config: Config,
    sqlite: Rc<SqliteFactory>,
    backends: Vec<Rc<dyn BackendFactory>>,
    parsers: Vec<Rc<dyn Parser>>,
    serializers: Vec<Rc<dyn Serializer>>,
    handlers: Vec<Rc<dyn ContentHandler>>,
    textual: BTreeSet<String>,
    policy: Rc<dyn ContentPolicy>,
    factory: Rc<dyn ElementFactory>,
    loaded: RefCell<Vec<Weak<PackageInner>>>,
}

/// Builder for [`Registry`]; the sqlite backend and the built-in content
/// handlers are always registered first
pub struct RegistryBuilder {
    config: Config,
    backends: Vec<Rc<dyn BackendFactory>>,
    parsers: Vec<Rc<dyn Parser>>,
    serializers: Vec<Rc<dyn Serializer>>,
    handlers: Vec<Rc<dyn ContentHandler>>,
    textual: BTreeSet<String>,
    policy: Rc<dyn ContentPolicy>,
    factory: Rc<dyn ElementFactory>,
}

impl RegistryBuilder {
    pub fn backend(mut self, factory: Rc<dyn BackendFactory>) -> Self {
        self.backends.push(factory);
        self
    }

    pub fn parser(mut self, parser: Rc<dyn Parser>) -> Self {
        self.parsers.push(parser);
        self
    }

    pub fn serializer(mut self, serializer: Rc<dyn Serializer>) -> Self {
        self.serializers.push(serializer);
        self
    }

    pub fn content_handler(mut self, handler: Rc<dyn ContentHandler>) -> Self {
        self.handlers.push(handler);
        self
    }

    pub fn textual_mimetype(mut self, mimetype: impl Into<String>) -> Self {
        self.textual.insert(mimetype.into());
        self
    }

    pub fn policy(mut self, policy: Rc<dyn ContentPolicy>) -> Self {
        self.policy = policy;
        self
    }

    /// Element factory of every package opened through the registry
    pub fn factory(mut self, factory: Rc<dyn ElementFactory>) -> Self {
        self.factory = factory;
        self
    }

    pub fn build(self) -> Rc<Registry> {
        let sqlite = Rc::new(SqliteFactory::new(&self.config));
        let mut backends = vec![sqlite.clone() as Rc<dyn BackendFactory>];
        backends.extend(self.backends);
        let mut handlers = vec![
            Rc::new(AvPairsHandler) as Rc<dyn ContentHandler>,
            Rc::new(JsonHandler),
            Rc::new(ValuesHandler),
        ];
        handlers.extend(self.handlers);
        Rc::new(Registry {
            config: self.config,
            sqlite,
            backends,
            parsers: self.parsers,
            serializers: self.serializers,
            handlers,
            textual: self.textual,
            policy: self.policy,
            factory: self.factory,
            loaded: RefCell::new(Vec::new()),
        })
    }
}

impl Registry {
    /// Registry with the built-in plug-ins only
    pub fn new(config: Config) -> Rc<Registry> {
        Self::builder(config).build()
    }

    pub fn builder(config: Config) -> RegistryBuilder {
        RegistryBuilder {
            config,
            backends: Vec::new(),
            parsers: Vec::new(),
            serializers: Vec::new(),
            handlers: Vec::new(),
            textual: TEXTUAL_MIMETYPES.iter().map(|m| m.to_string()).collect(),
            policy: Rc::new(DefaultContentPolicy),
            factory: Rc::new(DefaultFactory),
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn policy(&self) -> Rc<dyn ContentPolicy> {
        Rc::clone(&self.policy)
    }

    pub fn factory(&self) -> Rc<dyn ElementFactory> {
        Rc::clone(&self.factory)
    }

    pub fn is_textual(&self, mimetype: &str) -> bool {
        self.textual.contains(mimetype)
    }

    // ==================== Discovery ====================

    pub(crate) fn create_backend(&self, url: &str) -> Result<(Rc<dyn Backend>, String)> {
        let claims = self
            .backends
            .iter()
            .map(|f| (f, f.claims_for_create(url)));
        let factory = rank_claims(claims).map_err(|reason| no_claim(url, reason))?;
        factory.create(url)
    }

    /// Backend factory binding `url`, or the most informative rejection
    pub(crate) fn claim_bind(
        &self,
        url: &str,
    ) -> std::result::Result<Rc<dyn BackendFactory>, Option<Error>> {
        let claims = self.backends.iter().map(|f| (f, f.claims_for_bind(url)));
        rank_claims(claims).map(Rc::clone)
    }

    pub(crate) fn claim_parse(
        &self,
        data: &[u8],
        url: &str,
    ) -> std::result::Result<Rc<dyn Parser>, Option<Error>> {
        let claims = self
            .parsers
            .iter()
            .map(|p| (p, p.claims_for_parse(data, url)));
        rank_claims(claims).map(Rc::clone)
    }

    pub(crate) fn claim_serialize(&self, path: &Path) -> Result<Rc<dyn Serializer>> {
        let claims = self
            .serializers
            .iter()
            .map(|s| (s, s.claims_for_serialize(path)));
        rank_claims(claims)
            .map(Rc::clone)
            .map_err(|reason| no_claim(&path.to_string_lossy(), reason))
    }

    /// Best handler for `mimetype`, if any scores above zero
    pub fn content_handler(&self, mimetype: &str) -> Option<Rc<dyn ContentHandler>> {
        let claims = self.handlers.iter().map(|h| {
            let claim = match h.claims_for_handle(mimetype) {
                0 => Claim::inapplicable(),
                score => Claim::Accept(score),
            };
            (h, claim)
        });
        rank_claims(claims).ok().map(Rc::clone)
    }

    /// Fresh package in the shared in-memory store
    pub(crate) fn transient_backend(&self) -> Result<(Rc<dyn Backend>, String)> {
        self.sqlite.create_transient()
    }

    // ==================== Loaded packages ====================

    pub(crate) fn register_loaded(&self, package: &Package) {
        let mut loaded = self.loaded.borrow_mut();
        loaded.retain(|w| w.strong_count() > 0);
        loaded.push(Rc::downgrade(&package.0));
    }

    pub(crate) fn forget_loaded(&self, inner: *const PackageInner) {
        self.loaded
            .borrow_mut()
            .retain(|w| w.strong_count() > 0 && Weak::as_ptr(w) != inner);
    }

    /// Every open package loaded through this registry
    pub fn loaded(&self) -> Vec<Package> {
        self.loaded
            .borrow()
            .iter()
            .filter_map(Weak::upgrade)
            .map(Package)
            .filter(|p| !p.is_closed())
            .collect()
    }

    /// A loaded package with uri `uri` (if not empty) or url `url`
    pub fn find_loaded(&self, url: &str, uri: &str) -> Option<Package> {
        let loaded = self.loaded();
        if !uri.is_empty() {
            if let Some(p) = loaded.iter().find(|p| p.uri() == uri) {
                return Some(p.clone());
            }
        }
        loaded.into_iter().find(|p| p.url() == url)
    }
}

fn no_claim(url: &str, reason: Option<Error>) -> Error {
    Error::NoClaim {
        url: url.to_string(),
        reason: reason.map(Box::new),
    }
}
