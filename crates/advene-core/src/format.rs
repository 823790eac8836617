//! Parser and serializer plug-in points
//!
//! No concrete wire format lives in this crate. Formats register a
//! [`Parser`] and/or a [`Serializer`] with the [`Registry`](crate::Registry);
//! packages pick one by claim score when a url is not bound by any backend
//! or when saving.

use std::io::Write;
use std::path::Path;

use crate::backend::Claim;
use crate::error::Result;
use crate::package::Package;

/// Fills a transient package from serialized bytes
pub trait Parser {
    fn name(&self) -> &'static str;

    /// Score how well `data`, read from `url`, fits this format
    fn claims_for_parse(&self, data: &[u8], url: &str) -> Claim;

    /// Populate `package` through its creation API
    fn parse(&self, data: &[u8], url: &str, package: &Package) -> Result<()>;
}

/// Writes a package in some format
pub trait Serializer {
    fn name(&self) -> &'static str;

    /// Score how well `path` fits this format, usually by extension
    fn claims_for_serialize(&self, path: &Path) -> Claim;

    fn serialize(&self, package: &Package, out: &mut dyn Write) -> Result<()>;
}
