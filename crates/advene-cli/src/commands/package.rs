//! Package command handlers

use std::collections::BTreeMap;
use std::rc::Rc;

use anyhow::{Context, Result};
use tracing::warn;

use advene_core::backend::{
    AnnotationFilter, IdFilter, ImportFilter, ListFilter, MediaFilter, RelationFilter, TagFilter,
};
use advene_core::{ElementType, Group, Package, Registry};

use super::{open_package, package_url, package_url_or_default};
use crate::output::{ImportSummary, Output, PackageInfo};

/// Create a new, empty package
pub fn create(registry: &Rc<Registry>, url: Option<String>, output: &Output) -> Result<()> {
    let url = package_url_or_default(registry, url.as_deref())?;
    let package =
        Package::create(registry, &url).with_context(|| format!("Failed to create {}", url))?;
    let created = package.url();
    package.close()?;

    if output.is_quiet() {
        println!("{}", created);
    } else {
        output.success(&format!("Created package {}", created));
    }
    Ok(())
}

/// Show url, uri, imports and element counts of a package
pub fn info(registry: &Rc<Registry>, url: Option<String>, output: &Output) -> Result<()> {
    let url = package_url_or_default(registry, url.as_deref())?;
    let package = open_package(registry, &url)?;

    let mut imports = Vec::new();
    for import in package.own().iter_imports(&ImportFilter::default())? {
        let import = import?;
        imports.push(ImportSummary {
            name: import.id(),
            url: import.url(),
            uri: import.uri(),
            loaded: import.imported_package().is_some(),
        });
    }

    let info = PackageInfo {
        url: package.url(),
        uri: package.uri(),
        imports,
        own: counts(&package.own())?,
        all: counts(&package.all())?,
    };
    package.close()?;

    output.print_package(&info);
    Ok(())
}

/// Import the package at `imported_url` under `name`
///
/// An imported package that can not be opened is still recorded, by url.
pub fn import(
    registry: &Rc<Registry>,
    url: &str,
    name: &str,
    imported_url: &str,
    output: &Output,
) -> Result<()> {
    let package = open_package(registry, &package_url(url)?)?;
    let imported_url = package_url(imported_url)?;

    let import = match Package::open(registry, &imported_url) {
        Ok(imported) => package.create_import(name, &imported)?,
        Err(e) => {
            warn!("could not open {}: {}", imported_url, e);
            package.add_import(name, &imported_url, "")?
        }
    };
    let loaded = import.imported_package().is_some();
    package.close()?;

    if loaded {
        output.success(&format!("Imported {} as '{}'", imported_url, name));
    } else {
        output.message(&format!(
            "Recorded import '{}' of {} (not reachable yet)",
            name, imported_url
        ));
    }
    Ok(())
}

/// Element counts of a group, per kind
fn counts<G: Group>(group: &G) -> Result<BTreeMap<&'static str, usize>> {
    let ids = IdFilter::default();
    let mut counts = BTreeMap::new();
    counts.insert(
        ElementType::Media.name(),
        group.count_medias(&MediaFilter::default())?,
    );
    counts.insert(
        ElementType::Annotation.name(),
        group.count_annotations(&AnnotationFilter::default())?,
    );
    counts.insert(
        ElementType::Relation.name(),
        group.count_relations(&RelationFilter::default())?,
    );
    counts.insert(ElementType::View.name(), group.count_views(&ids)?);
    counts.insert(ElementType::Resource.name(), group.count_resources(&ids)?);
    counts.insert(ElementType::Query.name(), group.count_queries(&ids)?);
    counts.insert(
        ElementType::Tag.name(),
        group.count_tags(&TagFilter::default())?,
    );
    counts.insert(
        ElementType::List.name(),
        group.count_lists(&ListFilter::default())?,
    );
    counts.insert(
        ElementType::Import.name(),
        group.count_imports(&ImportFilter::default())?,
    );
    Ok(counts)
}

#[cfg(test)]
mod tests {
    use super::*;
    use advene_core::{Config, DEFAULT_FRAME_OF_REFERENCE};
    use tempfile::TempDir;

    #[test]
    fn test_counts_own_and_all() {
        let temp = TempDir::new().unwrap();
        let registry = Registry::new(Config::with_data_dir(temp.path()));
        let p = Package::create_transient(&registry).unwrap();
        let q = Package::create_transient(&registry).unwrap();
        let m = q.create_media("m", "http://x/m.avi", DEFAULT_FRAME_OF_REFERENCE).unwrap();
        q.create_annotation("a", &m, 0, 10, "text/plain").unwrap();
        p.create_import("q", &q).unwrap();

        let own = counts(&p.own()).unwrap();
        let all = counts(&p.all()).unwrap();
        assert_eq!(own["media"], 0);
        assert_eq!(own["import"], 1);
        assert_eq!(all["media"], 1);
        assert_eq!(all["annotation"], 1);
        assert_eq!(own.len(), 9);
    }

    #[test]
    fn test_import_records_unreachable_package() {
        let temp = TempDir::new().unwrap();
        let registry = Registry::new(Config::with_data_dir(temp.path()));
        let db = temp.path().join("p.db");
        let url = package_url(&db.to_string_lossy()).unwrap();
        Package::create(&registry, &url).unwrap().close().unwrap();

        let output = Output::new(crate::output::OutputFormat::Quiet);
        let missing = temp.path().join("missing.db");
        import(&registry, &url, "gone", &missing.to_string_lossy(), &output).unwrap();

        let p = Package::open(&registry, &url).unwrap();
        assert_eq!(p.imports(), vec![("gone".to_string(), None)]);
        p.close().unwrap();
    }
}
