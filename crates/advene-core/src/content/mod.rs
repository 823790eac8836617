//! Element content
//!
//! Annotations, relations, views, resources and queries carry a content:
//! a mimetype, an optional model (a resource) and data. The content url
//! selects where the data lives:
//!
//! | url            | storage                                     |
//! |----------------|---------------------------------------------|
//! | `""`           | in the backend row                          |
//! | `packaged:/..` | a file under the package's packaged root     |
//! | anything else  | an external resource, read-only             |
//!
//! Packaged files only exist for transient packages. After each content
//! change of a transient package, a [`ContentPolicy`] decides whether
//! internal data belongs in a packaged file or in the backend, and the data
//! is moved accordingly.
//!
//! Relations may also have empty content ([`EMPTY_MIMETYPE`]): no model,
//! no url, no data, and none of them can be set.

pub mod handlers;
pub mod stream;

use std::fs;
use std::path::PathBuf;

use tracing::debug;
use uuid::Uuid;

use crate::backend::{ContentRecord, ElementType, MetaValue, StorageError};
use crate::element::{Annotation, Element, Query, Relation, Resource, View};
use crate::error::{Error, Result};
use crate::events::Change;
use crate::package::Package;
use crate::urls;

pub use handlers::{AvPairsHandler, ContentHandler, JsonHandler, ParsedContent, ValuesHandler};
pub use stream::{ContentStream, OpenMode};

/// Mimetype of empty content, legal on relations only
pub const EMPTY_MIMETYPE: &str = "x-advene/none";

/// Url scheme of packaged content
pub const PACKAGED_SCHEME: &str = "packaged:";

/// Package metadata holding the packaged root directory
pub const PACKAGED_ROOT: &str = "http://advene.org/ns/parser-meta#package_root";

/// Decides where internal content of transient packages is kept
pub trait ContentPolicy {
    /// True to keep the element's data in a packaged file
    fn should_package_content(&self, element: &Element) -> bool;
}

/// Packages every content that is not textual
#[derive(Debug, Default)]
pub struct DefaultContentPolicy;

impl ContentPolicy for DefaultContentPolicy {
    fn should_package_content(&self, element: &Element) -> bool {
        !is_textual(element).unwrap_or(true)
    }
}

enum Storage {
    Backend,
    /// Path relative to the packaged root
    Packaged(String),
    External(String),
}

fn storage(url: &str) -> Storage {
    if url.is_empty() {
        Storage::Backend
    } else if let Some(path) = url.strip_prefix(PACKAGED_SCHEME) {
        Storage::Packaged(path.trim_start_matches('/').to_string())
    } else {
        Storage::External(url.to_string())
    }
}

fn packaged_url(element: &Element) -> String {
    format!("{}/data/{}", PACKAGED_SCHEME, element.id())
}

// ==================== Stored state ====================

/// Content description, cached on the element
pub(crate) fn info(element: &Element) -> Result<ContentRecord> {
    if !element.element_type().has_content() {
        return Err(Error::model(format!("{:?} has no content", element)));
    }
    if let Some(record) = element.0.content.borrow().as_ref() {
        return Ok(record.clone());
    }
    let package = element.live_package()?;
    let record = package
        .backend()
        .get_content_info(package.pid(), &element.id())?
        .ok_or_else(|| Error::NoSuchElement {
            package: package.url(),
            id: element.id(),
        })?;
    element.0.content.replace(Some(record.clone()));
    Ok(record)
}

fn store_info(element: &Element, package: &Package, record: ContentRecord) -> Result<()> {
    package
        .backend()
        .update_content_info(package.pid(), &element.id(), &record)?;
    element.0.content.replace(Some(record));
    Ok(())
}

fn reject_empty(element: &Element, record: &ContentRecord) -> Result<()> {
    if record.mimetype == EMPTY_MIMETYPE {
        return Err(Error::model(format!("content of {:?} is empty", element)));
    }
    Ok(())
}

fn reject_open(element: &Element) -> Result<()> {
    if element.0.stream_open.get() {
        return Err(Error::model(format!("content of {:?} is open", element)));
    }
    Ok(())
}

pub(crate) fn validate_mimetype(mimetype: &str) -> Result<()> {
    let valid = match mimetype.split_once('/') {
        Some((kind, sub)) => {
            !kind.is_empty()
                && !sub.is_empty()
                && !sub.contains('/')
                && !mimetype.chars().any(char::is_whitespace)
        }
        None => false,
    };
    if !valid {
        return Err(Error::model(format!("invalid mimetype {:?}", mimetype)));
    }
    Ok(())
}

// ==================== Packaged files ====================

/// Root of the package's packaged files, created on demand
pub(crate) fn packaged_root(package: &Package, create: bool) -> Result<Option<PathBuf>> {
    if let Some(MetaValue::Plain(root)) = package.backend().get_meta(package.pid(), "", PACKAGED_ROOT)? {
        return Ok(Some(PathBuf::from(root)));
    }
    if !create {
        return Ok(None);
    }
    let dir = package
        .registry()
        .config()
        .packaged_root_dir()
        .join(format!("advene2_pkg_{}", Uuid::new_v4().simple()));
    fs::create_dir_all(&dir).map_err(|e| StorageError::create_directory(e, dir.clone()))?;
    package.backend().set_meta(
        package.pid(),
        "",
        PACKAGED_ROOT,
        Some(&MetaValue::Plain(dir.to_string_lossy().into_owned())),
    )?;
    package.adopt_packaged_root(dir.clone());
    debug!("created packaged root {:?}", dir);
    Ok(Some(dir))
}

pub(crate) fn packaged_path(package: &Package, relative: &str) -> Result<PathBuf> {
    let root = packaged_root(package, true)?
        .ok_or_else(|| Error::model("package has no packaged root"))?;
    Ok(root.join(relative))
}

fn read_packaged(package: &Package, relative: &str) -> Result<Vec<u8>> {
    let path = packaged_path(package, relative)?;
    match fs::read(&path) {
        Ok(data) => Ok(data),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Vec::new()),
        Err(e) => Err(StorageError::from_read(e, path).into()),
    }
}

fn write_packaged(package: &Package, relative: &str, data: &[u8]) -> Result<()> {
    let path = packaged_path(package, relative)?;
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .map_err(|e| StorageError::create_directory(e, parent.to_path_buf()))?;
    }
    fs::write(&path, data).map_err(|e| StorageError::from_io(e, path).into())
}

fn remove_packaged(package: &Package, relative: &str) -> Result<()> {
    let path = packaged_path(package, relative)?;
    match fs::remove_file(&path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(StorageError::from_io(e, path).into()),
    }
}

/// Remove the packaged file of a content about to be deleted
pub(crate) fn discard_packaged(element: &Element, package: &Package) -> Result<()> {
    if let Storage::Packaged(relative) = storage(&info(element)?.url) {
        remove_packaged(package, &relative)?;
    }
    Ok(())
}

/// Move the data to the storage named by `url`, keeping it when both
/// sides are internal
fn relocate(element: &Element, package: &Package, current: &ContentRecord, url: &str) -> Result<()> {
    let (pid, id) = (package.pid(), element.id());
    let target = storage(url);
    let data = match (storage(&current.url), &target) {
        (_, Storage::External(_)) => None,
        (Storage::Backend, _) => Some(package.backend().get_content_data(pid, &id)?),
        (Storage::Packaged(relative), _) => Some(read_packaged(package, &relative)?),
        (Storage::External(_), _) => Some(Vec::new()),
    };
    if let Storage::Packaged(relative) = storage(&current.url) {
        remove_packaged(package, &relative)?;
    }
    store_info(
        element,
        package,
        ContentRecord {
            url: url.to_string(),
            ..current.clone()
        },
    )?;
    let data = data.unwrap_or_default();
    match target {
        Storage::Backend => package.backend().update_content_data(pid, &id, &data),
        Storage::Packaged(relative) => write_packaged(package, &relative, &data),
        Storage::External(_) => Ok(()),
    }
}

/// Place internal content of a transient package where the policy wants it
pub(crate) fn automanage(element: &Element) -> Result<()> {
    let package = element.live_package()?;
    if !package.is_transient() || element.0.stream_open.get() {
        return Ok(());
    }
    let current = info(element)?;
    if current.mimetype == EMPTY_MIMETYPE {
        return Ok(());
    }
    let packaged = package.policy().should_package_content(element);
    match storage(&current.url) {
        Storage::Backend if packaged => {
            debug!("moving content of {:?} to a packaged file", element);
            relocate(element, &package, &current, &packaged_url(element))
        }
        Storage::Packaged(_) if !packaged => {
            debug!("moving content of {:?} to the backend", element);
            relocate(element, &package, &current, "")
        }
        _ => Ok(()),
    }
}

// ==================== Operations ====================

pub fn mimetype(element: &Element) -> Result<String> {
    Ok(info(element)?.mimetype)
}

pub fn set_mimetype(element: &Element, mimetype: &str) -> Result<()> {
    validate_mimetype(mimetype)?;
    let current = info(element)?;
    reject_open(element)?;
    let change = Change::Attribute("content_mimetype".to_string());

    if mimetype == EMPTY_MIMETYPE {
        if element.element_type() != ElementType::Relation {
            return Err(Error::model(format!(
                "only relations can have empty content, not {:?}",
                element
            )));
        }
        return element.mutate(change, |package| {
            if let Storage::Packaged(relative) = storage(&current.url) {
                remove_packaged(package, &relative)?;
            }
            store_info(element, package, ContentRecord::new(EMPTY_MIMETYPE))?;
            package
                .backend()
                .update_content_data(package.pid(), &element.id(), &[])
        });
    }

    element.mutate(change, |package| {
        store_info(
            element,
            package,
            ContentRecord {
                mimetype: mimetype.to_string(),
                ..current.clone()
            },
        )
    })?;
    automanage(element)
}

/// Id-ref of the model, relative to the owner, or `""`
pub fn model_id(element: &Element) -> Result<String> {
    Ok(info(element)?.model)
}

pub fn model(element: &Element) -> Result<Option<Resource>> {
    let idref = model_id(element)?;
    if idref.is_empty() {
        return Ok(None);
    }
    let package = element.live_package()?;
    Resource::try_from(package.get_element(&idref)?).map(Some)
}

pub fn set_model(element: &Element, model: Option<&Resource>) -> Result<()> {
    let current = info(element)?;
    reject_empty(element, &current)?;
    let package = element.live_package()?;
    let idref = match model {
        Some(resource) => package.reference_to(resource)?,
        None => String::new(),
    };
    element.mutate(Change::Attribute("content_model".to_string()), |package| {
        store_info(
            element,
            package,
            ContentRecord {
                model: idref,
                ..current.clone()
            },
        )
    })
}

pub fn url(element: &Element) -> Result<String> {
    Ok(info(element)?.url)
}

pub fn set_url(element: &Element, url: &str) -> Result<()> {
    let current = info(element)?;
    reject_empty(element, &current)?;
    reject_open(element)?;
    if current.url == url {
        return Ok(());
    }
    let package = element.live_package()?;
    if url.starts_with(PACKAGED_SCHEME) && !package.is_transient() {
        return Err(Error::model(format!(
            "packaged content requires a transient package, {} is not",
            package.url()
        )));
    }
    element.mutate(Change::Attribute("content_url".to_string()), |package| {
        relocate(element, package, &current, url)
    })?;
    if url.is_empty() {
        automanage(element)?;
    }
    Ok(())
}

/// Raw data; external content is fetched
pub fn data(element: &Element) -> Result<Vec<u8>> {
    let current = info(element)?;
    let package = element.live_package()?;
    match storage(&current.url) {
        Storage::Backend => package
            .backend()
            .get_content_data(package.pid(), &element.id()),
        Storage::Packaged(relative) => read_packaged(&package, &relative),
        Storage::External(url) => urls::read_bytes(&urls::resolve(&package.url(), &url)),
    }
}

/// Store data internally; external content becomes internal
pub fn set_data(element: &Element, data: &[u8]) -> Result<()> {
    let current = info(element)?;
    reject_empty(element, &current)?;
    reject_open(element)?;
    element.mutate(Change::Attribute("content_data".to_string()), |package| {
        let (pid, id) = (package.pid(), element.id());
        match storage(&current.url) {
            Storage::Packaged(relative) => write_packaged(package, &relative, data),
            Storage::Backend => package.backend().update_content_data(pid, &id, data),
            Storage::External(_) => {
                store_info(
                    element,
                    package,
                    ContentRecord {
                        url: String::new(),
                        ..current.clone()
                    },
                )?;
                package.backend().update_content_data(pid, &id, data)
            }
        }
    })?;
    automanage(element)
}

pub fn text(element: &Element) -> Result<String> {
    String::from_utf8(data(element)?)
        .map_err(|e| Error::Content(format!("content of {:?} is not UTF-8: {}", element, e)))
}

pub fn is_textual(element: &Element) -> Result<bool> {
    let mimetype = mimetype(element)?;
    let package = element.live_package()?;
    Ok(mimetype.starts_with("text/")
        || mimetype.ends_with("+xml")
        || package.registry().is_textual(&mimetype))
}

fn handler(element: &Element) -> Result<std::rc::Rc<dyn ContentHandler>> {
    let mimetype = mimetype(element)?;
    element
        .live_package()?
        .registry()
        .content_handler(&mimetype)
        .ok_or_else(|| Error::Content(format!("no content handler for {}", mimetype)))
}

pub fn parsed(element: &Element) -> Result<ParsedContent> {
    handler(element)?.parse(&data(element)?)
}

pub fn set_parsed(element: &Element, value: &ParsedContent) -> Result<()> {
    let data = handler(element)?.unparse(value)?;
    set_data(element, &data)
}

/// Content capability of annotations, relations, views, resources and queries
pub trait WithContent: AsRef<Element> {
    fn content_mimetype(&self) -> Result<String> {
        mimetype(self.as_ref())
    }

    fn set_content_mimetype(&self, value: &str) -> Result<()> {
        set_mimetype(self.as_ref(), value)
    }

    fn content_model_id(&self) -> Result<String> {
        model_id(self.as_ref())
    }

    fn content_model(&self) -> Result<Option<Resource>> {
        model(self.as_ref())
    }

    fn set_content_model(&self, value: Option<&Resource>) -> Result<()> {
        set_model(self.as_ref(), value)
    }

    fn content_url(&self) -> Result<String> {
        url(self.as_ref())
    }

    fn set_content_url(&self, value: &str) -> Result<()> {
        set_url(self.as_ref(), value)
    }

    fn content_data(&self) -> Result<Vec<u8>> {
        data(self.as_ref())
    }

    fn set_content_data(&self, value: &[u8]) -> Result<()> {
        set_data(self.as_ref(), value)
    }

    fn content_text(&self) -> Result<String> {
        text(self.as_ref())
    }

    fn set_content_text(&self, value: &str) -> Result<()> {
        set_data(self.as_ref(), value.as_bytes())
    }

    fn content_is_textual(&self) -> Result<bool> {
        is_textual(self.as_ref())
    }

    fn content_parsed(&self) -> Result<ParsedContent> {
        parsed(self.as_ref())
    }

    fn set_content_parsed(&self, value: &ParsedContent) -> Result<()> {
        set_parsed(self.as_ref(), value)
    }

    fn open_content(&self, mode: OpenMode) -> Result<ContentStream> {
        stream::open(self.as_ref(), mode)
    }
}

impl WithContent for Annotation {}
impl WithContent for Relation {}
impl WithContent for View {}
impl WithContent for Resource {}
impl WithContent for Query {}
