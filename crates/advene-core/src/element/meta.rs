//! Metadata capability, shared by elements and packages

use crate::backend::MetaValue;
use crate::cam::CAM_SYSTEM_TYPE;
use crate::element::Element;
use crate::error::{Error, Result};
use crate::events::{Change, Phase};
use crate::package::Package;

/// Where metadata is stored and who is notified of its changes
pub struct MetaScope {
    pub(crate) package: Package,
    /// `None` for the package's own metadata
    pub(crate) element: Option<Element>,
}

impl MetaScope {
    fn element_id(&self) -> String {
        self.element.as_ref().map(Element::id).unwrap_or_default()
    }

    fn notify(&self, phase: Phase, change: &Change) {
        match &self.element {
            Some(element) => element.notify(phase, change),
            None => self.package.notify(phase, change),
        }
    }

    pub(crate) fn write(&self, key: &str, value: Option<&MetaValue>) -> Result<()> {
        let change = Change::Meta(key.to_string());
        self.notify(Phase::Pre, &change);
        self.package
            .backend()
            .set_meta(self.package.pid(), &self.element_id(), key, value)?;
        self.notify(Phase::Post, &change);
        Ok(())
    }
}

/// Key-value metadata; values are plain strings or element references
pub trait WithMeta {
    fn meta_scope(&self) -> Result<MetaScope>;

    fn meta(&self, key: &str) -> Result<Option<MetaValue>> {
        let scope = self.meta_scope()?;
        scope
            .package
            .backend()
            .get_meta(scope.package.pid(), &scope.element_id(), key)
    }

    /// Plain value of `key`; reference values read as `None`
    fn meta_str(&self, key: &str) -> Result<Option<String>> {
        Ok(match self.meta(key)? {
            Some(MetaValue::Plain(value)) => Some(value),
            _ => None,
        })
    }

    /// Element referenced by `key`; plain values read as `None`
    fn meta_element(&self, key: &str) -> Result<Option<Element>> {
        let scope = self.meta_scope()?;
        match self.meta(key)? {
            Some(MetaValue::Ref(idref)) => scope.package.get_element(&idref).map(Some),
            _ => Ok(None),
        }
    }

    fn set_meta(&self, key: &str, value: &str) -> Result<()> {
        check_key(key)?;
        self.meta_scope()?
            .write(key, Some(&MetaValue::Plain(value.to_string())))
    }

    /// Store a reference; the target must be referenceable by the package
    fn set_meta_element(&self, key: &str, target: &Element) -> Result<()> {
        check_key(key)?;
        let scope = self.meta_scope()?;
        let idref = scope.package.reference_to(target)?;
        scope.write(key, Some(&MetaValue::Ref(idref)))
    }

    fn del_meta(&self, key: &str) -> Result<()> {
        check_key(key)?;
        self.meta_scope()?.write(key, None)
    }

    /// Every key and value, sorted by key
    fn iter_meta(&self) -> Result<Vec<(String, MetaValue)>> {
        let scope = self.meta_scope()?;
        scope
            .package
            .backend()
            .iter_meta(scope.package.pid(), &scope.element_id())?
            .collect()
    }
}

/// The system type selects a facet and is only written at creation
fn check_key(key: &str) -> Result<()> {
    if key == CAM_SYSTEM_TYPE {
        return Err(Error::model(format!("{} can not be set directly", key)));
    }
    Ok(())
}

impl WithMeta for Element {
    fn meta_scope(&self) -> Result<MetaScope> {
        Ok(MetaScope {
            package: self.live_package()?,
            element: Some(self.clone()),
        })
    }
}

impl WithMeta for Package {
    fn meta_scope(&self) -> Result<MetaScope> {
        self.check_open()?;
        Ok(MetaScope {
            package: self.clone(),
            element: None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::registry::Registry;
    use tempfile::TempDir;

    #[test]
    fn test_plain_and_reference_values() {
        let temp = TempDir::new().unwrap();
        let registry = Registry::new(Config::with_data_dir(temp.path()));
        let p = Package::create_transient(&registry).unwrap();
        let t = p.create_tag("t").unwrap();

        t.set_meta("color", "red").unwrap();
        p.set_meta("title", "demo").unwrap();
        p.set_meta_element("main", &t).unwrap();

        assert_eq!(t.meta_str("color").unwrap().as_deref(), Some("red"));
        assert_eq!(p.meta_str("main").unwrap(), None);
        assert_eq!(p.meta_element("main").unwrap(), Some(t.clone().into()));
        assert_eq!(
            p.iter_meta().unwrap(),
            vec![
                ("main".to_string(), MetaValue::Ref("t".to_string())),
                ("title".to_string(), MetaValue::Plain("demo".to_string())),
            ]
        );

        t.del_meta("color").unwrap();
        assert_eq!(t.meta("color").unwrap(), None);
    }

    #[test]
    fn test_system_type_is_protected() {
        let temp = TempDir::new().unwrap();
        let registry = Registry::new(Config::with_data_dir(temp.path()));
        let p = Package::create_transient(&registry).unwrap();
        let t = p.create_tag("t").unwrap();
        assert!(matches!(t.set_meta(CAM_SYSTEM_TYPE, "schema"), Err(Error::Model(_))));
        assert!(matches!(t.del_meta(CAM_SYSTEM_TYPE), Err(Error::Model(_))));
    }
}
