//! SQLite reference backend
//!
//! Urls have the form `sqlite:<path>[;<package id>]`. The package id
//! defaults to `""`, so one file may hold a single anonymous package or
//! many named ones. `sqlite::memory:` (also written `sqlite:%3Amemory%3A`)
//! names one in-memory store shared by everything in the process.
//!
//! ## Architecture
//!
//! - [`SqliteFactory`] keeps a weak cache of open stores, so two packages
//!   of the same file share one [`SqliteBackend`] and one connection.
//! - Reads go through paged iterators; every write first flushes them.
//! - Multi-statement writes run in a single transaction.

mod paging;
mod query;
mod references;
pub mod schema;
mod sequence;

use std::cell::RefCell;
use std::collections::{BTreeSet, HashMap};
use std::path::{Path, PathBuf};
use std::rc::{Rc, Weak};

use rusqlite::types::Value;
use rusqlite::{params, params_from_iter, Connection, OptionalExtension, Row, TransactionBehavior};
use tracing::{debug, info};
use uuid::Uuid;

use crate::backend::{
    AnnotationFilter, Backend, BackendFactory, Claim, ContentRecord, ElementRecord, ElementType,
    IdFilter, ImportFilter, ListFilter, MediaFilter, MetaValue, RecordData, Reference,
    RelationFilter, Rows, StorageError, TagFilter,
};
use crate::config::Config;
use crate::error::{Error, Result};
use crate::idref::{split_id_ref, split_uri_ref};
use crate::urls::percent_decode;

use paging::{RowMapper, Shared};
use query::{join_id_ref_sql, matches_uri_ref, text, Query};
use references::{reference_row, references_sql, RefTarget};
use schema::{get_schema_version, init_schema, is_empty_database, needs_init, SCHEMA_VERSION};
use sequence::{Sequence, ITEMS, MEMBERS};

/// Url of the process-wide in-memory store
pub const IN_MEMORY_URL: &str = "sqlite::memory:";

const MEMORY_PATH: &str = ":memory:";

/// Score of a sqlite claim; parsers score lower
const CLAIM_SCORE: u32 = 100;

/// Split a sqlite url into store path and package id
pub fn parse_url(url: &str) -> Option<(String, String)> {
    let rest = url.strip_prefix("sqlite:")?;
    let (path, pid) = match rest.find(';') {
        Some(pos) => (&rest[..pos], &rest[pos + 1..]),
        None => (rest, ""),
    };
    let mut path = percent_decode(path);
    if path.starts_with("///") {
        path.drain(..2);
    }
    if path.is_empty() {
        return None;
    }
    Some((path, pid.to_string()))
}

/// Factory for [`SqliteBackend`] stores
pub struct SqliteFactory {
    stores: RefCell<HashMap<String, Weak<SqliteBackend>>>,
    batch_size: usize,
    debug_checks: bool,
}

impl SqliteFactory {
    pub fn new(config: &Config) -> Self {
        Self {
            stores: RefCell::new(HashMap::new()),
            batch_size: config.fetch_batch_size,
            debug_checks: config.debug_checks,
        }
    }

    /// Create a fresh package in the in-memory store
    pub fn create_transient(&self) -> Result<(Rc<dyn Backend>, String)> {
        let url = format!("{};{}", IN_MEMORY_URL, Uuid::new_v4());
        self.create(&url)
    }

    fn live(&self, path: &str) -> Option<Rc<SqliteBackend>> {
        self.stores
            .borrow()
            .get(path)
            .and_then(Weak::upgrade)
            .filter(|b| b.shared.is_open())
    }

    /// Open (or reuse) the store at `path`
    fn open_store(&self, path: &str, create: bool) -> Result<Rc<SqliteBackend>> {
        if let Some(backend) = self.live(path) {
            return Ok(backend);
        }

        let conn = if path == MEMORY_PATH {
            Connection::open_in_memory()?
        } else {
            let file = Path::new(path);
            if !file.exists() {
                if !create {
                    return Err(StorageError::NoSuchPackage {
                        url: format!("sqlite:{}", path),
                    }
                    .into());
                }
                if let Some(parent) = file.parent().filter(|p| !p.as_os_str().is_empty()) {
                    std::fs::create_dir_all(parent)
                        .map_err(|e| StorageError::create_directory(e, parent.to_path_buf()))?;
                }
            }
            Connection::open(file)?
        };

        if needs_init(&conn)? {
            if !(create && is_empty_database(&conn)?) {
                return Err(wrong_format(path, "not a package store"));
            }
            init_schema(&conn)?;
            info!("initialized package store at {}", path);
        } else {
            match get_schema_version(&conn)? {
                Some(SCHEMA_VERSION) => {}
                other => {
                    return Err(wrong_format(
                        path,
                        &format!("unsupported schema version {:?}", other),
                    ))
                }
            }
        }

        let backend = Rc::new(SqliteBackend {
            path: path.to_string(),
            shared: Rc::new(Shared::new(path, conn, self.batch_size)),
            bound: RefCell::new(BTreeSet::new()),
            debug_checks: self.debug_checks,
        });
        self.stores
            .borrow_mut()
            .insert(path.to_string(), Rc::downgrade(&backend));
        debug!("opened store {}", path);
        Ok(backend)
    }
}

fn wrong_format(path: &str, details: &str) -> Error {
    StorageError::WrongFormat {
        path: PathBuf::from(path),
        details: details.to_string(),
    }
    .into()
}

impl BackendFactory for SqliteFactory {
    fn name(&self) -> &'static str {
        "sqlite"
    }

    fn claims_for_create(&self, url: &str) -> Claim {
        let Some((path, pid)) = parse_url(url) else {
            return Claim::inapplicable();
        };
        if let Some(backend) = self.live(&path) {
            return match backend.package_exists(&pid) {
                Ok(false) => Claim::Accept(CLAIM_SCORE),
                Ok(true) => Claim::failing(Error::model(format!("package {} already exists", url))),
                Err(e) => Claim::failing(e),
            };
        }
        if path == MEMORY_PATH || !Path::new(&path).exists() {
            return Claim::Accept(CLAIM_SCORE);
        }
        match inspect_file(&path, &pid) {
            Ok(FileState::Empty) | Ok(FileState::Store { has_package: false }) => {
                Claim::Accept(CLAIM_SCORE)
            }
            Ok(FileState::Store { has_package: true }) => {
                Claim::failing(Error::model(format!("package {} already exists", url)))
            }
            Err(e) => Claim::failing(e),
        }
    }

    fn claims_for_bind(&self, url: &str) -> Claim {
        let Some((path, pid)) = parse_url(url) else {
            return Claim::inapplicable();
        };
        if path == MEMORY_PATH && self.live(&path).is_none() {
            return Claim::failing(StorageError::NoSuchPackage { url: url.to_string() }.into());
        }
        let backend = match self.open_store(&path, false) {
            Ok(b) => b,
            Err(e) => return Claim::failing(e),
        };
        match backend.package_exists(&pid) {
            Ok(true) if backend.bound.borrow().contains(&pid) => {
                Claim::failing(Error::PackageInUse(url.to_string()))
            }
            Ok(true) => Claim::Accept(CLAIM_SCORE),
            Ok(false) => {
                Claim::failing(StorageError::NoSuchPackage { url: url.to_string() }.into())
            }
            Err(e) => Claim::failing(e),
        }
    }

    fn create(&self, url: &str) -> Result<(Rc<dyn Backend>, String)> {
        let (path, pid) =
            parse_url(url).ok_or_else(|| Error::model(format!("not a sqlite url: {}", url)))?;
        let backend = self.open_store(&path, true)?;
        backend.create_package(&pid)?;
        info!("created package {}", url);
        Ok((backend as Rc<dyn Backend>, pid))
    }

    fn bind(&self, url: &str) -> Result<(Rc<dyn Backend>, String)> {
        let (path, pid) =
            parse_url(url).ok_or_else(|| Error::model(format!("not a sqlite url: {}", url)))?;
        let backend = self.open_store(&path, false)?;
        backend.bind_package(&pid, url)?;
        debug!("bound package {}", url);
        Ok((backend as Rc<dyn Backend>, pid))
    }
}

enum FileState {
    Empty,
    Store { has_package: bool },
}

/// Look at an existing file without caching a connection to it
fn inspect_file(path: &str, pid: &str) -> Result<FileState> {
    let conn = Connection::open(path)?;
    if needs_init(&conn)? {
        return if is_empty_database(&conn)? {
            Ok(FileState::Empty)
        } else {
            Err(wrong_format(path, "not a package store"))
        };
    }
    let has_package: bool = conn.query_row(
        "SELECT EXISTS(SELECT 1 FROM Packages WHERE id = ?1)",
        [pid],
        |row| row.get(0),
    )?;
    Ok(FileState::Store { has_package })
}

/// One SQLite store, shared by every package bound on it
pub struct SqliteBackend {
    path: String,
    shared: Rc<Shared>,
    bound: RefCell<BTreeSet<String>>,
    debug_checks: bool,
}

// ==================== Row mappers ====================

fn media_row(row: &Row<'_>) -> rusqlite::Result<ElementRecord> {
    Ok(ElementRecord {
        package: row.get(0)?,
        id: row.get(1)?,
        data: RecordData::Media {
            url: row.get(2)?,
            frame_of_reference: row.get(3)?,
        },
    })
}

fn annotation_row(row: &Row<'_>) -> rusqlite::Result<ElementRecord> {
    Ok(ElementRecord {
        package: row.get(0)?,
        id: row.get(1)?,
        data: RecordData::Annotation {
            media: row.get(2)?,
            begin: row.get(3)?,
            end: row.get(4)?,
        },
    })
}

fn import_row(row: &Row<'_>) -> rusqlite::Result<ElementRecord> {
    Ok(ElementRecord {
        package: row.get(0)?,
        id: row.get(1)?,
        data: RecordData::Import {
            url: row.get(2)?,
            uri: row.get(3)?,
        },
    })
}

/// `(package, id, typ)` rows of attribute-less kinds
fn plain_row(row: &Row<'_>) -> rusqlite::Result<ElementRecord> {
    let code: String = row.get(2)?;
    let data = ElementType::from_code(&code)
        .and_then(RecordData::plain)
        .ok_or_else(|| {
            rusqlite::Error::InvalidColumnType(2, "typ".to_string(), rusqlite::types::Type::Text)
        })?;
    Ok(ElementRecord {
        package: row.get(0)?,
        id: row.get(1)?,
        data,
    })
}

fn pair_row(row: &Row<'_>) -> rusqlite::Result<(String, String)> {
    Ok((row.get(0)?, row.get(1)?))
}

fn string_row(row: &Row<'_>) -> rusqlite::Result<String> {
    row.get(0)
}

fn meta_row(row: &Row<'_>) -> rusqlite::Result<(String, MetaValue)> {
    Ok((row.get(0)?, meta_value(row, 1)?))
}

/// Decode `(is_ref, value, joined ref)` starting at column `first`
fn meta_value(row: &Row<'_>, first: usize) -> rusqlite::Result<MetaValue> {
    let is_ref: bool = row.get(first)?;
    Ok(if is_ref {
        MetaValue::Ref(row.get(first + 2)?)
    } else {
        MetaValue::Plain(row.get(first + 1)?)
    })
}

const META_COLUMNS: &str =
    "is_ref, value, CASE WHEN value_p = '' THEN value_i ELSE value_p || ':' || value_i END";

// ==================== Query builders ====================

fn media_query(pids: &[String], f: &MediaFilter) -> Query {
    let mut q = Query::new("m.package, m.id, m.url, m.foref", "Medias m", "m.package, m.id");
    q.scope("m.package", pids)
        .filter_in("m.id", &f.ids)
        .filter_eq("m.url", f.url.as_deref())
        .filter_eq("m.foref", f.frame_of_reference.as_deref());
    q
}

fn annotation_query(pids: &[String], f: &AnnotationFilter) -> Query {
    let select = format!(
        "a.package, a.id, {}, a.fbegin, a.fend",
        join_id_ref_sql("a.media_p", "a.media_i")
    );
    let mut q = Query::new(
        &select,
        "Annotations a",
        "a.fbegin, a.fend, a.media_p, a.media_i, a.package, a.id",
    );
    q.scope("a.package", pids).filter_in("a.id", &f.ids);
    if !f.media.is_empty() {
        let one = format!("({})", matches_uri_ref("a", "media_p", "media_i"));
        let condition = format!("({})", vec![one; f.media.len()].join(" OR "));
        let mut params = Vec::new();
        for uriref in &f.media {
            let (base, id) = uri_ref_parts(uriref);
            params.push(text(id));
            params.push(text(base));
        }
        q.filter(condition, params);
    }
    q.filter_int("a.fbegin", "=", f.begin)
        .filter_int("a.fbegin", ">=", f.begin_min)
        .filter_int("a.fbegin", "<=", f.begin_max)
        .filter_int("a.fend", "=", f.end)
        .filter_int("a.fend", ">=", f.end_min)
        .filter_int("a.fend", "<=", f.end_max);
    q
}

fn element_query(pids: &[String], kind: ElementType, ids: &[String]) -> Query {
    let mut q = Query::new("e.package, e.id, e.typ", "Elements e", "e.package, e.id");
    q.scope("e.package", pids)
        .filter("e.typ = ?", vec![text(kind.code())])
        .filter_in("e.id", ids);
    q
}

/// Restrict elements `e` to collections holding `uriref` (at `position`)
fn filter_contains(q: &mut Query, seq: &Sequence, uriref: Option<&str>, position: Option<usize>) {
    let Some(uriref) = uriref else {
        return;
    };
    let (base, id) = uri_ref_parts(uriref);
    let mut condition = format!(
        "EXISTS (SELECT 1 FROM {t} x WHERE x.package = e.package AND x.{o} = e.id AND {m}",
        t = seq.table,
        o = seq.owner,
        m = matches_uri_ref("x", seq.p_col, seq.i_col)
    );
    let mut params = vec![text(id), text(base)];
    if let Some(pos) = position {
        condition.push_str(" AND x.ord = ?");
        params.push(Value::Integer(pos as i64));
    }
    condition.push(')');
    q.filter(condition, params);
}

fn relation_query(pids: &[String], f: &RelationFilter) -> Query {
    let mut q = element_query(pids, ElementType::Relation, &f.ids);
    filter_contains(&mut q, &MEMBERS, f.member.as_deref(), f.position);
    q
}

fn list_query(pids: &[String], f: &ListFilter) -> Query {
    let mut q = element_query(pids, ElementType::List, &f.ids);
    filter_contains(&mut q, &ITEMS, f.item.as_deref(), f.position);
    q.filter_meta("e", &f.meta);
    q
}

fn tag_query(pids: &[String], f: &TagFilter) -> Query {
    let mut q = element_query(pids, ElementType::Tag, &f.ids);
    q.filter_meta("e", &f.meta);
    q
}

fn import_query(pids: &[String], f: &ImportFilter) -> Query {
    let mut q = Query::new("i.package, i.id, i.url, i.uri", "Imports i", "i.package, i.id");
    q.scope("i.package", pids)
        .filter_in("i.id", &f.ids)
        .filter_eq("i.url", f.url.as_deref())
        .filter_eq("i.uri", f.uri.as_deref());
    q
}

/// `(base, id)` of a uri-ref; a bare id has an empty base and matches nothing
fn uri_ref_parts(uriref: &str) -> (&str, &str) {
    split_uri_ref(uriref).unwrap_or(("", uriref))
}

fn split_ref(idref: &str) -> (&str, &str) {
    let (prefix, id) = split_id_ref(idref);
    (prefix.unwrap_or(""), id)
}

fn no_such_element(pid: &str, id: &str) -> Error {
    Error::NoSuchElement {
        package: pid.to_string(),
        id: id.to_string(),
    }
}

/// Register `id` in Elements, rejecting duplicates
fn insert_element(conn: &Connection, pid: &str, id: &str, kind: ElementType) -> Result<()> {
    let exists: bool = conn.query_row(
        "SELECT EXISTS(SELECT 1 FROM Elements WHERE package = ?1 AND id = ?2)",
        params![pid, id],
        |row| row.get(0),
    )?;
    if exists {
        return Err(Error::model(format!(
            "id '{}' already in use in package '{}'",
            id, pid
        )));
    }
    conn.execute(
        "INSERT INTO Elements (package, id, typ) VALUES (?1, ?2, ?3)",
        params![pid, id, kind.code()],
    )?;
    Ok(())
}

fn insert_content(conn: &Connection, pid: &str, id: &str, content: &ContentRecord) -> Result<()> {
    let (model_p, model_i) = split_ref(&content.model);
    conn.execute(
        "INSERT INTO Contents (package, element, mimetype, model_p, model_i, url) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![pid, id, content.mimetype, model_p, model_i, content.url],
    )?;
    Ok(())
}

impl SqliteBackend {
    fn package_exists(&self, pid: &str) -> Result<bool> {
        self.shared.read(|conn| {
            Ok(conn.query_row(
                "SELECT EXISTS(SELECT 1 FROM Packages WHERE id = ?1)",
                [pid],
                |row| row.get(0),
            )?)
        })
    }

    fn create_package(&self, pid: &str) -> Result<()> {
        if self.bound.borrow().contains(pid) {
            return Err(Error::PackageInUse(self.bound_url(pid)));
        }
        self.shared.transaction(TransactionBehavior::Exclusive, |tx| {
            let exists: bool = tx.query_row(
                "SELECT EXISTS(SELECT 1 FROM Packages WHERE id = ?1)",
                [pid],
                |row| row.get(0),
            )?;
            if exists {
                return Err(Error::model(format!(
                    "package '{}' already exists in {}",
                    pid, self.path
                )));
            }
            tx.execute("INSERT INTO Packages (id) VALUES (?1)", [pid])?;
            Ok(())
        })?;
        self.bound.borrow_mut().insert(pid.to_string());
        Ok(())
    }

    fn bind_package(&self, pid: &str, url: &str) -> Result<()> {
        if !self.package_exists(pid)? {
            return Err(StorageError::NoSuchPackage { url: url.to_string() }.into());
        }
        if !self.bound.borrow_mut().insert(pid.to_string()) {
            return Err(Error::PackageInUse(url.to_string()));
        }
        Ok(())
    }

    fn unbind(&self, pid: &str) -> Result<()> {
        let mut bound = self.bound.borrow_mut();
        bound.remove(pid);
        if bound.is_empty() {
            drop(bound);
            self.shared.release()?;
            info!("closed store {}", self.path);
        }
        Ok(())
    }

    fn rows<T: 'static>(&self, q: Query, map: RowMapper<T>) -> Result<Rows<T>> {
        let (sql, params) = q.into_parts();
        Ok(self.shared.rows(sql, params, map))
    }

    fn count(&self, q: Query) -> Result<usize> {
        self.shared.read(|conn| {
            let n: i64 = conn.query_row(&q.count_sql(), params_from_iter(q.params()), |row| {
                row.get(0)
            })?;
            Ok(n as usize)
        })
    }

    fn create_with_content(
        &self,
        pid: &str,
        id: &str,
        kind: ElementType,
        content: &ContentRecord,
    ) -> Result<()> {
        self.shared.transaction(TransactionBehavior::Immediate, |tx| {
            insert_element(tx, pid, id, kind)?;
            insert_content(tx, pid, id, content)
        })
    }

    /// With debug checks on, require own references to exist with the given type
    fn check_own(&self, conn: &Connection, pid: &str, idref: &str, kind: ElementType) -> Result<()> {
        if !self.debug_checks {
            return Ok(());
        }
        let (prefix, id) = split_id_ref(idref);
        if prefix.is_some() {
            return Ok(());
        }
        let found: bool = conn.query_row(
            "SELECT EXISTS(SELECT 1 FROM Elements WHERE package = ?1 AND id = ?2 AND typ = ?3)",
            params![pid, id, kind.code()],
            |row| row.get(0),
        )?;
        if !found {
            return Err(Error::model(format!("no {} '{}' in package '{}'", kind, id, pid)));
        }
        Ok(())
    }

    fn sequence_insert(
        &self,
        seq: &Sequence,
        pid: &str,
        id: &str,
        idref: &str,
        pos: Option<usize>,
    ) -> Result<()> {
        self.shared.transaction(TransactionBehavior::Immediate, |tx| {
            if seq.table == MEMBERS.table {
                self.check_own(tx, pid, idref, ElementType::Annotation)?;
            }
            seq.insert(tx, pid, id, idref, pos)
        })
    }

    fn sequence_rows(&self, seq: &Sequence, pid: &str, id: &str) -> Rows<String> {
        self.shared
            .rows(seq.iter_sql(), vec![text(pid), text(id)], string_row)
    }

    fn package_field(&self, pid: &str, column: &str) -> Result<String> {
        self.shared.read(|conn| {
            conn.query_row(
                &format!("SELECT {} FROM Packages WHERE id = ?1", column),
                [pid],
                |row| row.get(0),
            )
            .optional()?
            .ok_or_else(|| {
                StorageError::NoSuchPackage {
                    url: self.bound_url(pid),
                }
                .into()
            })
        })
    }

    fn set_package_field(&self, pid: &str, column: &str, value: &str) -> Result<()> {
        self.shared.write(|conn| {
            conn.execute(
                &format!("UPDATE Packages SET {} = ?2 WHERE id = ?1", column),
                params![pid, value],
            )?;
            Ok(())
        })
    }

    /// Number of iterators still holding unread rows
    #[cfg(test)]
    fn live_iterators(&self) -> usize {
        self.shared.live_iterators()
    }
}

impl Backend for SqliteBackend {
    fn bound_url(&self, pid: &str) -> String {
        if pid.is_empty() {
            format!("sqlite:{}", self.path)
        } else {
            format!("sqlite:{};{}", self.path, pid)
        }
    }

    fn is_transient(&self) -> bool {
        self.path == MEMORY_PATH
    }

    fn close(&self, pid: &str) -> Result<()> {
        if self.shared.is_open() {
            self.set_package_field(pid, "url", "")?;
        }
        self.unbind(pid)
    }

    fn delete(&self, pid: &str) -> Result<()> {
        self.shared.transaction(TransactionBehavior::Exclusive, |tx| {
            for table in [
                "Elements",
                "Medias",
                "Annotations",
                "Contents",
                "RelationMembers",
                "ListItems",
                "Imports",
                "Tagged",
                "Meta",
            ] {
                tx.execute(&format!("DELETE FROM {} WHERE package = ?1", table), [pid])?;
            }
            tx.execute("DELETE FROM Packages WHERE id = ?1", [pid])?;
            Ok(())
        })?;
        info!("deleted package {}", self.bound_url(pid));
        self.unbind(pid)
    }

    fn get_uri(&self, pid: &str) -> Result<String> {
        self.package_field(pid, "uri")
    }

    fn update_uri(&self, pid: &str, uri: &str) -> Result<()> {
        self.set_package_field(pid, "uri", uri)
    }

    fn get_url(&self, pid: &str) -> Result<String> {
        self.package_field(pid, "url")
    }

    fn update_url(&self, pid: &str, url: &str) -> Result<()> {
        self.set_package_field(pid, "url", url)
    }

    // ==================== Creation ====================

    fn create_media(&self, pid: &str, id: &str, url: &str, frame_of_reference: &str) -> Result<()> {
        self.shared.transaction(TransactionBehavior::Immediate, |tx| {
            insert_element(tx, pid, id, ElementType::Media)?;
            tx.execute(
                "INSERT INTO Medias (package, id, url, foref) VALUES (?1, ?2, ?3, ?4)",
                params![pid, id, url, frame_of_reference],
            )?;
            Ok(())
        })
    }

    fn create_annotation(
        &self,
        pid: &str,
        id: &str,
        media: &str,
        begin: i64,
        end: i64,
        content: &ContentRecord,
    ) -> Result<()> {
        self.shared.transaction(TransactionBehavior::Immediate, |tx| {
            self.check_own(tx, pid, media, ElementType::Media)?;
            insert_element(tx, pid, id, ElementType::Annotation)?;
            let (media_p, media_i) = split_ref(media);
            tx.execute(
                "INSERT INTO Annotations (package, id, media_p, media_i, fbegin, fend) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![pid, id, media_p, media_i, begin, end],
            )?;
            insert_content(tx, pid, id, content)
        })
    }

    fn create_relation(&self, pid: &str, id: &str, content: &ContentRecord) -> Result<()> {
        self.create_with_content(pid, id, ElementType::Relation, content)
    }

    fn create_view(&self, pid: &str, id: &str, content: &ContentRecord) -> Result<()> {
        self.create_with_content(pid, id, ElementType::View, content)
    }

    fn create_resource(&self, pid: &str, id: &str, content: &ContentRecord) -> Result<()> {
        self.create_with_content(pid, id, ElementType::Resource, content)
    }

    fn create_query(&self, pid: &str, id: &str, content: &ContentRecord) -> Result<()> {
        self.create_with_content(pid, id, ElementType::Query, content)
    }

    fn create_tag(&self, pid: &str, id: &str) -> Result<()> {
        self.shared.transaction(TransactionBehavior::Immediate, |tx| {
            insert_element(tx, pid, id, ElementType::Tag)
        })
    }

    fn create_list(&self, pid: &str, id: &str) -> Result<()> {
        self.shared.transaction(TransactionBehavior::Immediate, |tx| {
            insert_element(tx, pid, id, ElementType::List)
        })
    }

    fn create_import(&self, pid: &str, id: &str, url: &str, uri: &str) -> Result<()> {
        self.shared.transaction(TransactionBehavior::Immediate, |tx| {
            insert_element(tx, pid, id, ElementType::Import)?;
            tx.execute(
                "INSERT INTO Imports (package, id, url, uri) VALUES (?1, ?2, ?3, ?4)",
                params![pid, id, url, uri],
            )?;
            Ok(())
        })
    }

    // ==================== Lookup ====================

    fn has_element(&self, pid: &str, id: &str, kind: Option<ElementType>) -> Result<bool> {
        self.shared.read(|conn| {
            let typ: Option<String> = conn
                .query_row(
                    "SELECT typ FROM Elements WHERE package = ?1 AND id = ?2",
                    params![pid, id],
                    |row| row.get(0),
                )
                .optional()?;
            Ok(match (typ, kind) {
                (None, _) => false,
                (Some(_), None) => true,
                (Some(code), Some(kind)) => code == kind.code(),
            })
        })
    }

    fn get_element(&self, pid: &str, id: &str) -> Result<Option<ElementRecord>> {
        self.shared.read(|conn| {
            let typ: Option<String> = conn
                .query_row(
                    "SELECT typ FROM Elements WHERE package = ?1 AND id = ?2",
                    params![pid, id],
                    |row| row.get(0),
                )
                .optional()?;
            let Some(typ) = typ else {
                return Ok(None);
            };
            let kind = ElementType::from_code(&typ)
                .ok_or_else(|| wrong_format(&self.path, &format!("unknown element type {:?}", typ)))?;

            let record = match kind {
                ElementType::Media => conn.query_row(
                    "SELECT package, id, url, foref FROM Medias WHERE package = ?1 AND id = ?2",
                    params![pid, id],
                    media_row,
                ),
                ElementType::Annotation => conn.query_row(
                    &format!(
                        "SELECT package, id, {}, fbegin, fend FROM Annotations \
                         WHERE package = ?1 AND id = ?2",
                        join_id_ref_sql("media_p", "media_i")
                    ),
                    params![pid, id],
                    annotation_row,
                ),
                ElementType::Import => conn.query_row(
                    "SELECT package, id, url, uri FROM Imports WHERE package = ?1 AND id = ?2",
                    params![pid, id],
                    import_row,
                ),
                _ => conn.query_row(
                    "SELECT package, id, typ FROM Elements WHERE package = ?1 AND id = ?2",
                    params![pid, id],
                    plain_row,
                ),
            };
            Ok(Some(record?))
        })
    }

    // ==================== Iteration ====================

    fn iter_medias(&self, pids: &[String], filter: &MediaFilter) -> Result<Rows<ElementRecord>> {
        self.rows(media_query(pids, filter), media_row)
    }

    fn iter_annotations(
        &self,
        pids: &[String],
        filter: &AnnotationFilter,
    ) -> Result<Rows<ElementRecord>> {
        self.rows(annotation_query(pids, filter), annotation_row)
    }

    fn iter_relations(&self, pids: &[String], filter: &RelationFilter) -> Result<Rows<ElementRecord>> {
        self.rows(relation_query(pids, filter), plain_row)
    }

    fn iter_views(&self, pids: &[String], filter: &IdFilter) -> Result<Rows<ElementRecord>> {
        self.rows(element_query(pids, ElementType::View, &filter.ids), plain_row)
    }

    fn iter_resources(&self, pids: &[String], filter: &IdFilter) -> Result<Rows<ElementRecord>> {
        self.rows(element_query(pids, ElementType::Resource, &filter.ids), plain_row)
    }

    fn iter_queries(&self, pids: &[String], filter: &IdFilter) -> Result<Rows<ElementRecord>> {
        self.rows(element_query(pids, ElementType::Query, &filter.ids), plain_row)
    }

    fn iter_tags(&self, pids: &[String], filter: &TagFilter) -> Result<Rows<ElementRecord>> {
        self.rows(tag_query(pids, filter), plain_row)
    }

    fn iter_lists(&self, pids: &[String], filter: &ListFilter) -> Result<Rows<ElementRecord>> {
        self.rows(list_query(pids, filter), plain_row)
    }

    fn iter_imports(&self, pids: &[String], filter: &ImportFilter) -> Result<Rows<ElementRecord>> {
        self.rows(import_query(pids, filter), import_row)
    }

    fn count_medias(&self, pids: &[String], filter: &MediaFilter) -> Result<usize> {
        self.count(media_query(pids, filter))
    }

    fn count_annotations(&self, pids: &[String], filter: &AnnotationFilter) -> Result<usize> {
        self.count(annotation_query(pids, filter))
    }

    fn count_relations(&self, pids: &[String], filter: &RelationFilter) -> Result<usize> {
        self.count(relation_query(pids, filter))
    }

    fn count_views(&self, pids: &[String], filter: &IdFilter) -> Result<usize> {
        self.count(element_query(pids, ElementType::View, &filter.ids))
    }

    fn count_resources(&self, pids: &[String], filter: &IdFilter) -> Result<usize> {
        self.count(element_query(pids, ElementType::Resource, &filter.ids))
    }

    fn count_queries(&self, pids: &[String], filter: &IdFilter) -> Result<usize> {
        self.count(element_query(pids, ElementType::Query, &filter.ids))
    }

    fn count_tags(&self, pids: &[String], filter: &TagFilter) -> Result<usize> {
        self.count(tag_query(pids, filter))
    }

    fn count_lists(&self, pids: &[String], filter: &ListFilter) -> Result<usize> {
        self.count(list_query(pids, filter))
    }

    fn count_imports(&self, pids: &[String], filter: &ImportFilter) -> Result<usize> {
        self.count(import_query(pids, filter))
    }

    // ==================== Updates ====================

    fn update_media(&self, pid: &str, id: &str, url: &str, frame_of_reference: &str) -> Result<()> {
        self.shared.write(|conn| {
            let changed = conn.execute(
                "UPDATE Medias SET url = ?3, foref = ?4 WHERE package = ?1 AND id = ?2",
                params![pid, id, url, frame_of_reference],
            )?;
            if changed == 0 {
                return Err(no_such_element(pid, id));
            }
            Ok(())
        })
    }

    fn update_annotation(&self, pid: &str, id: &str, media: &str, begin: i64, end: i64) -> Result<()> {
        self.shared.transaction(TransactionBehavior::Immediate, |tx| {
            self.check_own(tx, pid, media, ElementType::Media)?;
            let (media_p, media_i) = split_ref(media);
            let changed = tx.execute(
                "UPDATE Annotations SET media_p = ?3, media_i = ?4, fbegin = ?5, fend = ?6 \
                 WHERE package = ?1 AND id = ?2",
                params![pid, id, media_p, media_i, begin, end],
            )?;
            if changed == 0 {
                return Err(no_such_element(pid, id));
            }
            Ok(())
        })
    }

    fn update_import(&self, pid: &str, id: &str, url: &str, uri: &str) -> Result<()> {
        self.shared.write(|conn| {
            let changed = conn.execute(
                "UPDATE Imports SET url = ?3, uri = ?4 WHERE package = ?1 AND id = ?2",
                params![pid, id, url, uri],
            )?;
            if changed == 0 {
                return Err(no_such_element(pid, id));
            }
            Ok(())
        })
    }

    fn rename_element(&self, pid: &str, old_id: &str, kind: ElementType, new_id: &str) -> Result<()> {
        self.shared.transaction(TransactionBehavior::Immediate, |tx| {
            let taken: bool = tx.query_row(
                "SELECT EXISTS(SELECT 1 FROM Elements WHERE package = ?1 AND id = ?2)",
                params![pid, new_id],
                |row| row.get(0),
            )?;
            if taken {
                return Err(Error::model(format!(
                    "id '{}' already in use in package '{}'",
                    new_id, pid
                )));
            }
            let changed = tx.execute(
                "UPDATE Elements SET id = ?3 WHERE package = ?1 AND id = ?2",
                params![pid, old_id, new_id],
            )?;
            if changed == 0 {
                return Err(no_such_element(pid, old_id));
            }

            let own_rows: &[(&str, &str)] = match kind {
                ElementType::Media => &[("Medias", "id")],
                ElementType::Annotation => &[("Annotations", "id")],
                ElementType::Relation => &[("RelationMembers", "relation")],
                ElementType::List => &[("ListItems", "list")],
                ElementType::Import => &[("Imports", "id")],
                _ => &[],
            };
            for (table, column) in own_rows {
                tx.execute(
                    &format!("UPDATE {t} SET {c} = ?3 WHERE package = ?1 AND {c} = ?2", t = table, c = column),
                    params![pid, old_id, new_id],
                )?;
            }
            if kind.has_content() {
                tx.execute(
                    "UPDATE Contents SET element = ?3 WHERE package = ?1 AND element = ?2",
                    params![pid, old_id, new_id],
                )?;
            }
            tx.execute(
                "UPDATE Meta SET element = ?3 WHERE package = ?1 AND element = ?2",
                params![pid, old_id, new_id],
            )?;
            if kind == ElementType::Import {
                references::rename_prefix(tx, pid, old_id, new_id)?;
            }
            Ok(())
        })?;
        debug!("renamed {} {} to {} in {}", kind, old_id, new_id, self.bound_url(pid));
        Ok(())
    }

    fn rename_references(&self, pids: &[String], old_uriref: &str, new_id: &str) -> Result<()> {
        if pids.is_empty() {
            return Ok(());
        }
        let (base, old_id) = uri_ref_parts(old_uriref);
        let changed = self.shared.transaction(TransactionBehavior::Immediate, |tx| {
            references::rename_references(tx, pids, base, old_id, new_id)
        })?;
        debug!("renamed {} reference(s) to {}", changed, old_uriref);
        Ok(())
    }

    fn delete_element(&self, pid: &str, id: &str, kind: ElementType) -> Result<()> {
        self.shared.transaction(TransactionBehavior::Immediate, |tx| {
            let removed = tx.execute(
                "DELETE FROM Elements WHERE package = ?1 AND id = ?2",
                params![pid, id],
            )?;
            if removed == 0 {
                return Err(no_such_element(pid, id));
            }
            let own_rows: &[(&str, &str)] = match kind {
                ElementType::Media => &[("Medias", "id")],
                ElementType::Annotation => &[("Annotations", "id"), ("Contents", "element")],
                ElementType::Relation => &[("RelationMembers", "relation"), ("Contents", "element")],
                ElementType::List => &[("ListItems", "list")],
                ElementType::Import => &[("Imports", "id")],
                ElementType::View | ElementType::Resource | ElementType::Query => {
                    &[("Contents", "element")]
                }
                ElementType::Tag => &[],
            };
            for (table, column) in own_rows {
                tx.execute(
                    &format!("DELETE FROM {} WHERE package = ?1 AND {} = ?2", table, column),
                    params![pid, id],
                )?;
            }
            tx.execute(
                "DELETE FROM Meta WHERE package = ?1 AND element = ?2",
                params![pid, id],
            )?;
            Ok(())
        })
    }

    // ==================== References ====================

    fn iter_references(&self, pids: &[String], uriref: &str) -> Result<Rows<Reference>> {
        let (base, id) = uri_ref_parts(uriref);
        let (sql, params) = references_sql(&RefTarget::UriRef { pids, base, id });
        Ok(self.shared.rows(sql, params, reference_row))
    }

    fn iter_references_with_import(&self, pid: &str, import_id: &str) -> Result<Rows<Reference>> {
        let (sql, params) = references_sql(&RefTarget::Import {
            pid,
            prefix: import_id,
        });
        Ok(self.shared.rows(sql, params, reference_row))
    }

    // ==================== Content ====================

    fn get_content_info(&self, pid: &str, id: &str) -> Result<Option<ContentRecord>> {
        self.shared.read(|conn| {
            Ok(conn
                .query_row(
                    &format!(
                        "SELECT mimetype, {}, url FROM Contents WHERE package = ?1 AND element = ?2",
                        join_id_ref_sql("model_p", "model_i")
                    ),
                    params![pid, id],
                    |row| {
                        Ok(ContentRecord {
                            mimetype: row.get(0)?,
                            model: row.get(1)?,
                            url: row.get(2)?,
                        })
                    },
                )
                .optional()?)
        })
    }

    fn update_content_info(&self, pid: &str, id: &str, content: &ContentRecord) -> Result<()> {
        let (model_p, model_i) = split_ref(&content.model);
        self.shared.write(|conn| {
            let changed = conn.execute(
                "UPDATE Contents SET mimetype = ?3, model_p = ?4, model_i = ?5, url = ?6, \
                 data = CASE WHEN ?6 != '' THEN x'' ELSE data END \
                 WHERE package = ?1 AND element = ?2",
                params![pid, id, content.mimetype, model_p, model_i, content.url],
            )?;
            if changed == 0 {
                return Err(no_such_element(pid, id));
            }
            Ok(())
        })
    }

    fn get_content_data(&self, pid: &str, id: &str) -> Result<Vec<u8>> {
        self.shared.read(|conn| {
            let data: Option<Vec<u8>> = conn
                .query_row(
                    "SELECT data FROM Contents WHERE package = ?1 AND element = ?2",
                    params![pid, id],
                    |row| row.get(0),
                )
                .optional()?;
            data.ok_or_else(|| no_such_element(pid, id))
        })
    }

    fn update_content_data(&self, pid: &str, id: &str, data: &[u8]) -> Result<()> {
        self.shared.write(|conn| {
            let changed = conn.execute(
                "UPDATE Contents SET data = ?3, url = CASE WHEN length(?3) > 0 THEN '' ELSE url END \
                 WHERE package = ?1 AND element = ?2",
                params![pid, id, data],
            )?;
            if changed == 0 {
                return Err(no_such_element(pid, id));
            }
            Ok(())
        })
    }

    fn iter_contents_with_model(
        &self,
        pids: &[String],
        model_uriref: &str,
    ) -> Result<Rows<(String, String)>> {
        let (base, id) = uri_ref_parts(model_uriref);
        let mut q = Query::new("c.package, c.element", "Contents c", "c.package, c.element");
        q.scope("c.package", pids).filter(
            matches_uri_ref("c", "model_p", "model_i"),
            vec![text(id), text(base)],
        );
        self.rows(q, pair_row)
    }

    // ==================== Metadata ====================

    fn iter_meta(&self, pid: &str, id: &str) -> Result<Rows<(String, MetaValue)>> {
        let sql = format!(
            "SELECT key, {} FROM Meta WHERE package = ? AND element = ? ORDER BY key",
            META_COLUMNS
        );
        Ok(self.shared.rows(sql, vec![text(pid), text(id)], meta_row))
    }

    fn get_meta(&self, pid: &str, id: &str, key: &str) -> Result<Option<MetaValue>> {
        self.shared.read(|conn| {
            Ok(conn
                .query_row(
                    &format!(
                        "SELECT {} FROM Meta WHERE package = ?1 AND element = ?2 AND key = ?3",
                        META_COLUMNS
                    ),
                    params![pid, id, key],
                    |row| meta_value(row, 0),
                )
                .optional()?)
        })
    }

    fn set_meta(&self, pid: &str, id: &str, key: &str, value: Option<&MetaValue>) -> Result<()> {
        self.shared.write(|conn| {
            match value {
                None => {
                    conn.execute(
                        "DELETE FROM Meta WHERE package = ?1 AND element = ?2 AND key = ?3",
                        params![pid, id, key],
                    )?;
                }
                Some(MetaValue::Plain(v)) => {
                    conn.execute(
                        "INSERT OR REPLACE INTO Meta (package, element, key, value, is_ref, value_p, value_i) \
                         VALUES (?1, ?2, ?3, ?4, 0, '', '')",
                        params![pid, id, key, v],
                    )?;
                }
                Some(MetaValue::Ref(idref)) => {
                    let (value_p, value_i) = split_ref(idref);
                    conn.execute(
                        "INSERT OR REPLACE INTO Meta (package, element, key, value, is_ref, value_p, value_i) \
                         VALUES (?1, ?2, ?3, '', 1, ?4, ?5)",
                        params![pid, id, key, value_p, value_i],
                    )?;
                }
            }
            Ok(())
        })
    }

    // ==================== Relation members ====================

    fn insert_member(&self, pid: &str, id: &str, member: &str, pos: Option<usize>) -> Result<()> {
        self.sequence_insert(&MEMBERS, pid, id, member, pos)
    }

    fn update_member(&self, pid: &str, id: &str, pos: usize, member: &str) -> Result<()> {
        self.shared.transaction(TransactionBehavior::Immediate, |tx| {
            self.check_own(tx, pid, member, ElementType::Annotation)?;
            MEMBERS.update(tx, pid, id, pos, member)
        })
    }

    fn remove_member(&self, pid: &str, id: &str, pos: usize) -> Result<()> {
        self.shared
            .transaction(TransactionBehavior::Immediate, |tx| MEMBERS.remove(tx, pid, id, pos))
    }

    fn get_member(&self, pid: &str, id: &str, pos: usize) -> Result<Option<String>> {
        self.shared.read(|conn| MEMBERS.get(conn, pid, id, pos))
    }

    fn count_members(&self, pid: &str, id: &str) -> Result<usize> {
        self.shared.read(|conn| MEMBERS.count(conn, pid, id))
    }

    fn iter_members(&self, pid: &str, id: &str) -> Result<Rows<String>> {
        Ok(self.sequence_rows(&MEMBERS, pid, id))
    }

    // ==================== List items ====================

    fn insert_item(&self, pid: &str, id: &str, item: &str, pos: Option<usize>) -> Result<()> {
        self.sequence_insert(&ITEMS, pid, id, item, pos)
    }

    fn update_item(&self, pid: &str, id: &str, pos: usize, item: &str) -> Result<()> {
        self.shared
            .transaction(TransactionBehavior::Immediate, |tx| ITEMS.update(tx, pid, id, pos, item))
    }

    fn remove_item(&self, pid: &str, id: &str, pos: usize) -> Result<()> {
        self.shared
            .transaction(TransactionBehavior::Immediate, |tx| ITEMS.remove(tx, pid, id, pos))
    }

    fn get_item(&self, pid: &str, id: &str, pos: usize) -> Result<Option<String>> {
        self.shared.read(|conn| ITEMS.get(conn, pid, id, pos))
    }

    fn count_items(&self, pid: &str, id: &str) -> Result<usize> {
        self.shared.read(|conn| ITEMS.count(conn, pid, id))
    }

    fn iter_items(&self, pid: &str, id: &str) -> Result<Rows<String>> {
        Ok(self.sequence_rows(&ITEMS, pid, id))
    }

    // ==================== Tags ====================

    fn associate_tag(&self, pid: &str, element: &str, tag: &str) -> Result<()> {
        self.shared.transaction(TransactionBehavior::Immediate, |tx| {
            self.check_own(tx, pid, tag, ElementType::Tag)?;
            let (element_p, element_i) = split_ref(element);
            let (tag_p, tag_i) = split_ref(tag);
            tx.execute(
                "INSERT OR IGNORE INTO Tagged (package, element_p, element_i, tag_p, tag_i) \
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![pid, element_p, element_i, tag_p, tag_i],
            )?;
            Ok(())
        })
    }

    fn dissociate_tag(&self, pid: &str, element: &str, tag: &str) -> Result<()> {
        let (element_p, element_i) = split_ref(element);
        let (tag_p, tag_i) = split_ref(tag);
        self.shared.write(|conn| {
            conn.execute(
                "DELETE FROM Tagged WHERE package = ?1 AND element_p = ?2 AND element_i = ?3 \
                 AND tag_p = ?4 AND tag_i = ?5",
                params![pid, element_p, element_i, tag_p, tag_i],
            )?;
            Ok(())
        })
    }

    fn iter_tags_with_element(
        &self,
        pids: &[String],
        element_uriref: &str,
    ) -> Result<Rows<(String, String)>> {
        let (base, id) = uri_ref_parts(element_uriref);
        let select = format!("t.package, {}", join_id_ref_sql("t.tag_p", "t.tag_i"));
        let mut q = Query::new(&select, "Tagged t", "1, 2");
        q.scope("t.package", pids).filter(
            matches_uri_ref("t", "element_p", "element_i"),
            vec![text(id), text(base)],
        );
        self.rows(q, pair_row)
    }

    fn iter_elements_with_tag(
        &self,
        pids: &[String],
        tag_uriref: &str,
    ) -> Result<Rows<(String, String)>> {
        let (base, id) = uri_ref_parts(tag_uriref);
        let select = format!("t.package, {}", join_id_ref_sql("t.element_p", "t.element_i"));
        let mut q = Query::new(&select, "Tagged t", "1, 2");
        q.scope("t.package", pids)
            .filter(matches_uri_ref("t", "tag_p", "tag_i"), vec![text(id), text(base)]);
        self.rows(q, pair_row)
    }

    fn iter_taggers(
        &self,
        pids: &[String],
        element_uriref: &str,
        tag_uriref: &str,
    ) -> Result<Rows<String>> {
        let (e_base, e_id) = uri_ref_parts(element_uriref);
        let (t_base, t_id) = uri_ref_parts(tag_uriref);
        let mut q = Query::new("DISTINCT t.package", "Tagged t", "1");
        q.scope("t.package", pids)
            .filter(
                matches_uri_ref("t", "element_p", "element_i"),
                vec![text(e_id), text(e_base)],
            )
            .filter(matches_uri_ref("t", "tag_p", "tag_i"), vec![text(t_id), text(t_base)]);
        self.rows(q, string_row)
    }

    fn iter_external_tagging(&self, pid: &str) -> Result<Rows<(String, String)>> {
        let select = format!(
            "{}, {}",
            join_id_ref_sql("t.element_p", "t.element_i"),
            join_id_ref_sql("t.tag_p", "t.tag_i")
        );
        let mut q = Query::new(&select, "Tagged t", "1, 2");
        q.filter("t.package = ?", vec![text(pid)])
            .filter("t.element_p != ''", Vec::new());
        self.rows(q, pair_row)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn factory() -> SqliteFactory {
        SqliteFactory::new(&Config::default())
    }

    fn collect<T>(rows: Rows<T>) -> Vec<T> {
        rows.collect::<Result<Vec<_>>>().unwrap()
    }

    fn ids(rows: Rows<ElementRecord>) -> Vec<String> {
        collect(rows).into_iter().map(|r| r.id).collect()
    }

    /// A fresh transient package with its uri set
    fn transient(factory: &SqliteFactory, uri: &str) -> (Rc<dyn Backend>, String) {
        let (backend, pid) = factory.create_transient().unwrap();
        backend.update_uri(&pid, uri).unwrap();
        (backend, pid)
    }

    #[test]
    fn test_parse_url() {
        assert_eq!(
            parse_url("sqlite:/tmp/x.db;p1"),
            Some(("/tmp/x.db".to_string(), "p1".to_string()))
        );
        assert_eq!(
            parse_url("sqlite:/tmp/x.db"),
            Some(("/tmp/x.db".to_string(), String::new()))
        );
        assert_eq!(
            parse_url("sqlite:%3Amemory%3A;a"),
            Some((":memory:".to_string(), "a".to_string()))
        );
        assert_eq!(
            parse_url("sqlite:///tmp/x.db"),
            Some(("/tmp/x.db".to_string(), String::new()))
        );
        assert_eq!(parse_url("file:/tmp/x.db"), None);
        assert_eq!(parse_url("sqlite:"), None);
    }

    #[test]
    fn test_create_then_bind_file_store() {
        let temp = TempDir::new().unwrap();
        let url = format!("sqlite:{};p1", temp.path().join("store.db").display());
        let factory = factory();

        assert!(factory.claims_for_bind(&url).score().is_none());
        assert_eq!(factory.claims_for_create(&url).score(), Some(CLAIM_SCORE));

        let (backend, pid) = factory.create(&url).unwrap();
        assert_eq!(pid, "p1");
        assert_eq!(backend.bound_url(&pid), url);
        backend.create_media(&pid, "m1", "http://x/m1.avi", "").unwrap();

        // already bound
        assert!(matches!(factory.bind(&url), Err(Error::PackageInUse(_))));
        assert!(factory.claims_for_create(&url).score().is_none());
        backend.close(&pid).unwrap();
        drop(backend);

        let (backend, pid) = factory.bind(&url).unwrap();
        assert!(backend.has_element(&pid, "m1", Some(ElementType::Media)).unwrap());
        assert!(!backend.is_transient());
    }

    #[test]
    fn test_packages_of_one_file_share_a_backend() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("store.db");
        let factory = factory();

        let (b1, p1) = factory.create(&format!("sqlite:{};a", path.display())).unwrap();
        let (b2, p2) = factory.create(&format!("sqlite:{};b", path.display())).unwrap();
        assert!(Rc::ptr_eq(&b1, &b2));

        b1.create_tag(&p1, "t").unwrap();
        assert!(!b2.has_element(&p2, "t", None).unwrap());

        // closing one package keeps the connection for the other
        b1.close(&p1).unwrap();
        b2.create_tag(&p2, "t").unwrap();
        assert!(b2.has_element(&p2, "t", None).unwrap());
    }

    #[test]
    fn test_foreign_file_is_rejected() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("notes.db");
        Connection::open(&path)
            .unwrap()
            .execute_batch("CREATE TABLE notes (id INTEGER)")
            .unwrap();
        let url = format!("sqlite:{}", path.display());

        let factory = factory();
        assert!(factory.claims_for_create(&url).score().is_none());
        assert!(matches!(
            factory.bind(&url),
            Err(Error::Storage(StorageError::WrongFormat { .. }))
        ));
    }

    #[test]
    fn test_missing_file_is_no_such_package() {
        let temp = TempDir::new().unwrap();
        let url = format!("sqlite:{}", temp.path().join("missing.db").display());
        match factory().claims_for_bind(&url) {
            Claim::Reject(failure) => assert!(matches!(
                failure.reason,
                Some(Error::Storage(StorageError::NoSuchPackage { .. }))
            )),
            Claim::Accept(_) => panic!("missing file claimed"),
        }
    }

    #[test]
    fn test_create_duplicate_id_fails() {
        let (backend, pid) = factory().create_transient().unwrap();
        backend.create_media(&pid, "m1", "http://x/m1.avi", "").unwrap();
        let err = backend.create_tag(&pid, "m1").unwrap_err();
        assert!(matches!(err, Error::Model(_)));
        assert!(backend.has_element(&pid, "m1", Some(ElementType::Media)).unwrap());
    }

    #[test]
    fn test_has_element_after_create_and_delete() {
        let (backend, pid) = factory().create_transient().unwrap();
        backend
            .create_relation(&pid, "r1", &ContentRecord::new("text/plain"))
            .unwrap();
        assert!(backend.has_element(&pid, "r1", None).unwrap());
        assert!(backend.has_element(&pid, "r1", Some(ElementType::Relation)).unwrap());
        assert!(!backend.has_element(&pid, "r1", Some(ElementType::List)).unwrap());

        backend.delete_element(&pid, "r1", ElementType::Relation).unwrap();
        assert!(!backend.has_element(&pid, "r1", None).unwrap());
        assert!(backend.get_content_info(&pid, "r1").unwrap().is_none());
    }

    #[test]
    fn test_get_element_records() {
        let (backend, pid) = factory().create_transient().unwrap();
        backend.create_media(&pid, "m1", "http://x/m1.avi", "ms").unwrap();
        backend
            .create_annotation(&pid, "a1", "m1", 10, 25, &ContentRecord::new("text/plain"))
            .unwrap();
        backend.create_import(&pid, "i", "file:/other", "urn:other").unwrap();
        backend.create_list(&pid, "l1").unwrap();

        let a1 = backend.get_element(&pid, "a1").unwrap().unwrap();
        assert_eq!(
            a1.data,
            RecordData::Annotation {
                media: "m1".to_string(),
                begin: 10,
                end: 25
            }
        );
        let i = backend.get_element(&pid, "i").unwrap().unwrap();
        assert_eq!(i.element_type(), ElementType::Import);
        assert_eq!(
            backend.get_element(&pid, "l1").unwrap().unwrap().data,
            RecordData::List
        );
        assert!(backend.get_element(&pid, "nope").unwrap().is_none());
    }

    #[test]
    fn test_annotation_order_and_filters() {
        let (backend, pid) = transient(&factory(), "urn:p");
        let plain = ContentRecord::new("text/plain");
        backend.create_media(&pid, "m1", "http://x/m1.avi", "").unwrap();
        backend.create_media(&pid, "m2", "http://x/m2.avi", "").unwrap();
        backend.create_annotation(&pid, "c", "m2", 5, 10, &plain).unwrap();
        backend.create_annotation(&pid, "b", "m1", 5, 10, &plain).unwrap();
        backend.create_annotation(&pid, "a", "m1", 20, 30, &plain).unwrap();
        backend.create_annotation(&pid, "d", "m1", 0, 40, &plain).unwrap();
        let pids = vec![pid.clone()];

        let all = ids(backend.iter_annotations(&pids, &AnnotationFilter::default()).unwrap());
        assert_eq!(all, vec!["d", "b", "c", "a"]);

        let at = ids(backend.iter_annotations(&pids, &AnnotationFilter::at(25)).unwrap());
        assert_eq!(at, vec!["d", "a"]);

        let on_m2 = AnnotationFilter::on_media("urn:p#m2");
        assert_eq!(ids(backend.iter_annotations(&pids, &on_m2).unwrap()), vec!["c"]);
        assert_eq!(backend.count_annotations(&pids, &on_m2).unwrap(), 1);

        // unknown base matches nothing
        let elsewhere = AnnotationFilter::on_media("urn:other#m2");
        assert_eq!(backend.count_annotations(&pids, &elsewhere).unwrap(), 0);
        assert_eq!(backend.count_annotations(&[], &AnnotationFilter::default()).unwrap(), 0);
    }

    #[test]
    fn test_relation_member_filter() {
        let (backend, pid) = transient(&factory(), "urn:p");
        let plain = ContentRecord::new("text/plain");
        backend.create_media(&pid, "m", "http://x/m.avi", "").unwrap();
        backend.create_annotation(&pid, "a", "m", 0, 1, &plain).unwrap();
        backend.create_annotation(&pid, "b", "m", 0, 1, &plain).unwrap();
        backend.create_relation(&pid, "r1", &plain).unwrap();
        backend.create_relation(&pid, "r2", &plain).unwrap();
        backend.insert_member(&pid, "r1", "a", None).unwrap();
        backend.insert_member(&pid, "r1", "b", None).unwrap();
        backend.insert_member(&pid, "r2", "b", None).unwrap();
        let pids = vec![pid.clone()];

        let with_b = RelationFilter {
            member: Some("urn:p#b".to_string()),
            ..Default::default()
        };
        assert_eq!(ids(backend.iter_relations(&pids, &with_b).unwrap()), vec!["r1", "r2"]);

        let b_first = RelationFilter {
            member: Some("urn:p#b".to_string()),
            position: Some(0),
            ..Default::default()
        };
        assert_eq!(ids(backend.iter_relations(&pids, &b_first).unwrap()), vec!["r2"]);
        assert_eq!(collect(backend.iter_members(&pid, "r1").unwrap()), vec!["a", "b"]);
    }

    #[test]
    fn test_tag_meta_filter() {
        let (backend, pid) = transient(&factory(), "urn:p");
        backend.create_tag(&pid, "t1").unwrap();
        backend.create_tag(&pid, "t2").unwrap();
        backend
            .set_meta(&pid, "t1", "color", Some(&MetaValue::Plain("red".to_string())))
            .unwrap();
        let pids = vec![pid.clone()];

        let red = TagFilter {
            meta: crate::backend::MetaFilter::plain("color", "red"),
            ..Default::default()
        };
        assert_eq!(ids(backend.iter_tags(&pids, &red).unwrap()), vec!["t1"]);
        let uncolored = TagFilter {
            meta: crate::backend::MetaFilter::absent("color"),
            ..Default::default()
        };
        assert_eq!(ids(backend.iter_tags(&pids, &uncolored).unwrap()), vec!["t2"]);
    }

    #[test]
    fn test_content_url_and_data_exclusive() {
        let (backend, pid) = factory().create_transient().unwrap();
        backend.create_view(&pid, "v", &ContentRecord::new("text/plain")).unwrap();

        backend.update_content_data(&pid, "v", b"hello").unwrap();
        assert_eq!(backend.get_content_data(&pid, "v").unwrap(), b"hello");

        let external = ContentRecord {
            mimetype: "text/plain".to_string(),
            model: "i:schema".to_string(),
            url: "http://x/data.txt".to_string(),
        };
        backend.update_content_info(&pid, "v", &external).unwrap();
        assert!(backend.get_content_data(&pid, "v").unwrap().is_empty());
        assert_eq!(backend.get_content_info(&pid, "v").unwrap(), Some(external));

        backend.update_content_data(&pid, "v", b"back").unwrap();
        assert_eq!(backend.get_content_info(&pid, "v").unwrap().unwrap().url, "");
    }

    #[test]
    fn test_meta_values() {
        let (backend, pid) = factory().create_transient().unwrap();
        backend.create_tag(&pid, "t").unwrap();
        backend
            .set_meta(&pid, "", "title", Some(&MetaValue::Plain("My package".to_string())))
            .unwrap();
        backend
            .set_meta(&pid, "", "schema", Some(&MetaValue::Ref("i:s1".to_string())))
            .unwrap();

        assert_eq!(
            collect(backend.iter_meta(&pid, "").unwrap()),
            vec![
                ("schema".to_string(), MetaValue::Ref("i:s1".to_string())),
                ("title".to_string(), MetaValue::Plain("My package".to_string())),
            ]
        );
        backend.set_meta(&pid, "", "title", None).unwrap();
        assert_eq!(backend.get_meta(&pid, "", "title").unwrap(), None);
        assert!(collect(backend.iter_meta(&pid, "t").unwrap()).is_empty());
    }

    #[test]
    fn test_rename_import_rewrites_prefixes() {
        let (backend, pid) = factory().create_transient().unwrap();
        backend.create_import(&pid, "i", "file:/other", "urn:other").unwrap();
        backend.create_tag(&pid, "t").unwrap();
        backend.associate_tag(&pid, "i:a1", "t").unwrap();
        backend.create_list(&pid, "l").unwrap();
        backend.insert_item(&pid, "l", "i:a1", None).unwrap();

        backend.rename_element(&pid, "i", ElementType::Import, "j").unwrap();

        assert_eq!(collect(backend.iter_items(&pid, "l").unwrap()), vec!["j:a1"]);
        assert_eq!(
            collect(backend.iter_external_tagging(&pid).unwrap()),
            vec![("j:a1".to_string(), "t".to_string())]
        );
        assert_eq!(
            ids(backend.iter_imports(&[pid.clone()], &ImportFilter::default()).unwrap()),
            vec!["j"]
        );
    }

    #[test]
    fn test_rename_references_and_tags() {
        let factory = factory();
        let (backend, p1) = transient(&factory, "urn:p1");
        let (_, p2) = transient(&factory, "urn:p2");
        backend.create_tag(&p1, "t").unwrap();
        backend.create_import(&p2, "i", "", "urn:p1").unwrap();
        backend.associate_tag(&p2, "x", "i:t").unwrap();
        backend.associate_tag(&p1, "x", "t").unwrap();
        let pids = vec![p1.clone(), p2.clone()];

        let taggers = collect(backend.iter_taggers(&pids, "urn:p1#x", "urn:p1#t").unwrap());
        assert_eq!(taggers, vec![p1.clone()]);
        assert_eq!(
            collect(backend.iter_elements_with_tag(&pids, "urn:p1#t").unwrap()).len(),
            2
        );

        backend.rename_element(&p1, "t", ElementType::Tag, "u").unwrap();
        backend.rename_references(&pids, "urn:p1#t", "u").unwrap();
        assert_eq!(
            collect(backend.iter_elements_with_tag(&pids, "urn:p1#u").unwrap()).len(),
            2
        );
        assert_eq!(collect(backend.iter_references(&pids, "urn:p1#t").unwrap()).len(), 0);
    }

    #[test]
    fn test_references_with_import() {
        let (backend, pid) = factory().create_transient().unwrap();
        backend.create_import(&pid, "i", "file:/other", "").unwrap();
        backend
            .create_resource(
                &pid,
                "res",
                &ContentRecord {
                    mimetype: "text/plain".to_string(),
                    model: "i:model".to_string(),
                    url: String::new(),
                },
            )
            .unwrap();
        let refs = collect(backend.iter_references_with_import(&pid, "i").unwrap());
        assert_eq!(refs.len(), 1);
        assert_eq!(refs[0].role, crate::backend::ReferenceRole::ContentModel);
        assert_eq!(refs[0].element, "res");

        let models = collect(
            backend
                .iter_contents_with_model(&[pid.clone()], "file:/other#model")
                .unwrap(),
        );
        assert_eq!(models, vec![(pid.clone(), "res".to_string())]);
    }

    #[test]
    fn test_write_during_iteration() {
        let config = Config {
            fetch_batch_size: 2,
            ..Config::default()
        };
        let (backend, pid) = SqliteFactory::new(&config).create_transient().unwrap();
        for i in 0..5 {
            backend.create_tag(&pid, &format!("t{}", i)).unwrap();
        }
        let pids = vec![pid.clone()];

        let mut seen = Vec::new();
        for record in backend.iter_tags(&pids, &TagFilter::default()).unwrap() {
            let record = record.unwrap();
            // each write inside the loop flushes the iterator
            backend.delete_element(&pid, &record.id, ElementType::Tag).unwrap();
            backend.create_tag(&pid, &format!("{}x", record.id)).unwrap();
            seen.push(record.id);
        }
        assert_eq!(seen, vec!["t0", "t1", "t2", "t3", "t4"]);
        assert_eq!(backend.count_tags(&pids, &TagFilter::default()).unwrap(), 5);
    }

    #[test]
    fn test_delete_package_frees_transient_store() {
        let factory = factory();
        let (backend, pid) = factory.create_transient().unwrap();
        backend.create_tag(&pid, "t").unwrap();
        assert!(backend.is_transient());
        let url = backend.bound_url(&pid);

        backend.delete(&pid).unwrap();
        assert!(factory.claims_for_bind(&url).score().is_none());
    }

    #[test]
    fn test_debug_checks_reject_dangling_media() {
        let config = Config {
            debug_checks: true,
            ..Config::default()
        };
        let (backend, pid) = SqliteFactory::new(&config).create_transient().unwrap();
        let plain = ContentRecord::new("text/plain");
        assert!(backend.create_annotation(&pid, "a", "nope", 0, 1, &plain).is_err());
        assert!(backend.create_annotation(&pid, "b", "i:elsewhere", 0, 1, &plain).is_ok());
        assert!(!backend.has_element(&pid, "a", None).unwrap());
    }

    #[test]
    fn test_iterators_are_released() {
        let factory = factory();
        let (_backend, pid) = factory.create_transient().unwrap();
        let store = factory.live(MEMORY_PATH).unwrap();
        let rows = store.iter_meta(&pid, "").unwrap();
        assert_eq!(store.live_iterators(), 1);
        drop(rows);
        assert_eq!(store.live_iterators(), 0);
    }
}
