//! Advene Core Library
//!
//! This crate provides the data layer of Advene, a video annotation tool:
//! packages of annotations on media, stored in pluggable backends and
//! importing one another.
//!
//! # Architecture
//!
//! - **Registry**: backends, parsers, serializers and content handlers,
//!   selected by claim score
//! - **Package**: own elements, named imports, routing over every reachable
//!   backend, id-ref resolution
//! - **Backend**: the storage contract, with a SQLite implementation
//!
//! # Quick Start
//!
//! ```text
//! let registry = Registry::new(Config::load()?);
//! let package = Package::create(&registry, "sqlite:/tmp/demo.db")?;
//!
//! let media = package.create_media("m", "file:/videos/a.mp4", DEFAULT_FRAME_OF_REFERENCE)?;
//! let a1 = package.create_annotation("a1", &media, 0, 1500, "text/plain")?;
//! a1.set_content_text("hello")?;
//!
//! for a in package.all().iter_annotations_at(1000)? {
//!     println!("{}", a?.id());
//! }
//! ```
//!
//! # Modules
//!
//! - `registry`: plug-in discovery (main entry point)
//! - `package`: packages, imports and routing
//! - `element`: element handles, metadata
//! - `content`: tri-state content storage and content handlers
//! - `group`: own and all collections
//! - `backend`: storage contract and SQLite backend
//! - `cam`: the Cinelab vocabulary of annotation types, relation types and schemas
//! - `config`: application configuration

pub mod backend;
pub mod cam;
pub mod config;
pub mod content;
pub mod element;
pub mod error;
pub mod events;
pub mod format;
pub mod group;
pub mod idref;
pub mod package;
pub mod registry;
pub mod urls;

pub use backend::{Backend, BackendFactory, Claim, ElementType, StorageError};
pub use cam::{CamFactory, CamGroup};
pub use config::Config;
pub use content::{ContentPolicy, OpenMode, ParsedContent, WithContent};
pub use element::{
    Annotation, Element, Facet, Import, List, Media, Query, Relation, Resource, Tag, View,
    WithMeta, DEFAULT_FRAME_OF_REFERENCE,
};
pub use error::{Error, Result};
pub use events::{Change, Phase};
pub use format::{Parser, Serializer};
pub use group::{AllGroup, Elements, Group, OwnGroup};
pub use package::{ElementFactory, Package};
pub use registry::Registry;
