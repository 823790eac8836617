//! Command handlers

pub mod config;
pub mod element;
pub mod package;

use std::path::Path;
use std::rc::Rc;

use anyhow::{Context, Result};

use advene_core::urls::has_scheme;
use advene_core::{Package, Registry};

/// Turn a package argument into a url
///
/// Urls with a scheme are kept as given; a plain path names a SQLite store.
pub fn package_url(arg: &str) -> Result<String> {
    if has_scheme(arg) {
        return Ok(arg.to_string());
    }
    let path = Path::new(arg);
    let abs = if path.is_absolute() {
        path.to_path_buf()
    } else {
        std::env::current_dir()
            .context("Failed to read current directory")?
            .join(path)
    };
    Ok(format!("sqlite:{}", abs.display()))
}

/// Url of the given package argument, or of the default store
pub fn package_url_or_default(registry: &Registry, arg: Option<&str>) -> Result<String> {
    match arg {
        Some(arg) => package_url(arg),
        None => package_url(&registry.config().default_package_path().to_string_lossy()),
    }
}

/// Open the package named on the command line
pub fn open_package(registry: &Rc<Registry>, url: &str) -> Result<Package> {
    Package::open(registry, url).with_context(|| format!("Failed to open package {}", url))
}

#[cfg(test)]
mod tests {
    use super::*;
    use advene_core::Config;
    use tempfile::TempDir;

    #[test]
    fn test_package_url_keeps_urls() {
        assert_eq!(package_url("sqlite:/tmp/a.db").unwrap(), "sqlite:/tmp/a.db");
        assert_eq!(
            package_url("http://example.com/p.xml").unwrap(),
            "http://example.com/p.xml"
        );
    }

    #[test]
    fn test_package_url_from_path() {
        assert_eq!(package_url("/tmp/a.db").unwrap(), "sqlite:/tmp/a.db");

        let relative = package_url("a.db").unwrap();
        assert!(relative.starts_with("sqlite:/"));
        assert!(relative.ends_with("/a.db"));
    }

    #[test]
    fn test_default_package_url() {
        let temp = TempDir::new().unwrap();
        let registry = Registry::new(Config::with_data_dir(temp.path()));
        let url = package_url_or_default(&registry, None).unwrap();
        assert_eq!(
            url,
            format!("sqlite:{}", temp.path().join("advene.db").display())
        );
    }
}
