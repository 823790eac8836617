//! Element command handlers

use std::rc::Rc;

use anyhow::{anyhow, Context, Result};

use advene_core::backend::{
    AnnotationFilter, IdFilter, ImportFilter, ListFilter, MediaFilter, RelationFilter, TagFilter,
};
use advene_core::cam::type_of;
use advene_core::{
    Element, ElementType, Elements, Group, Media, Package, Registry, Tag, WithContent,
    DEFAULT_FRAME_OF_REFERENCE,
};

use super::{open_package, package_url};
use crate::output::{ElementSummary, Output};

/// Arguments of `annotate`
pub struct NewAnnotation {
    pub id: String,
    /// Id-ref of the media, relative to the package
    pub media: String,
    pub begin: i64,
    pub end: i64,
    pub mimetype: String,
    pub data: Option<String>,
    /// Id-ref of the annotation type; an own type is created if missing
    pub annotation_type: Option<String>,
}

/// List elements, own only or with imports, optionally of one kind
pub fn list(
    registry: &Rc<Registry>,
    url: &str,
    all: bool,
    kind: Option<&str>,
    output: &Output,
) -> Result<()> {
    let kinds = match kind {
        Some(name) => vec![ElementType::from_name(name)
            .ok_or_else(|| anyhow!("Unknown element kind '{}'", name))?],
        None => ElementType::ALL.to_vec(),
    };

    let package = open_package(registry, &package_url(url)?)?;
    let mut summaries = Vec::new();
    for kind in kinds {
        let rows = if all {
            summarize(&package, &package.all(), kind)?
        } else {
            summarize(&package, &package.own(), kind)?
        };
        summaries.extend(rows);
    }
    package.close()?;

    output.print_elements(&summaries);
    Ok(())
}

/// Add a media
pub fn media(
    registry: &Rc<Registry>,
    url: &str,
    id: &str,
    media_url: &str,
    frame_of_reference: Option<&str>,
    output: &Output,
) -> Result<()> {
    let package = open_package(registry, &package_url(url)?)?;
    let media = package.create_media(
        id,
        media_url,
        frame_of_reference.unwrap_or(DEFAULT_FRAME_OF_REFERENCE),
    )?;
    let id = media.id();
    package.close()?;

    if output.is_quiet() {
        println!("{}", id);
    } else {
        output.success(&format!("Created media {}", id));
    }
    Ok(())
}

/// Add an annotation, typed if an annotation type is given
pub fn annotate(
    registry: &Rc<Registry>,
    url: &str,
    new: NewAnnotation,
    output: &Output,
) -> Result<()> {
    let package = open_package(registry, &package_url(url)?)?;
    let media = Media::try_from(package.get_element(&new.media)?)
        .with_context(|| format!("'{}' is not a media", new.media))?;

    let annotation = match &new.annotation_type {
        Some(type_ref) => {
            let annotation_type = match package.try_get_element(type_ref)? {
                Some(element) => Tag::try_from(element)
                    .with_context(|| format!("'{}' is not a tag", type_ref))?,
                None => package.create_annotation_type(type_ref)?,
            };
            package.create_typed_annotation(
                &new.id,
                &annotation_type,
                &media,
                new.begin,
                new.end,
                &new.mimetype,
            )?
        }
        None => package.create_annotation(&new.id, &media, new.begin, new.end, &new.mimetype)?,
    };
    if let Some(data) = &new.data {
        annotation.set_content_text(data)?;
    }
    let id = annotation.id();
    package.close()?;

    if output.is_quiet() {
        println!("{}", id);
    } else {
        output.success(&format!(
            "Created annotation {} on {} [{}, {}]",
            id, new.media, new.begin, new.end
        ));
    }
    Ok(())
}

/// Show every row referencing an element among the reachable packages
pub fn refs(registry: &Rc<Registry>, url: &str, idref: &str, output: &Output) -> Result<()> {
    let package = open_package(registry, &package_url(url)?)?;
    let element = package.get_element(idref)?;
    let references = element.iter_references()?;
    package.close()?;

    output.print_references(idref, &references);
    Ok(())
}

/// Rename an element; references in importing packages follow
pub fn rename(
    registry: &Rc<Registry>,
    url: &str,
    id: &str,
    new_id: &str,
    output: &Output,
) -> Result<()> {
    let package = open_package(registry, &package_url(url)?)?;
    let element = package.get_element(id)?;
    element.rename(new_id)?;
    package.close()?;

    output.success(&format!("Renamed {} to {}", id, new_id));
    Ok(())
}

/// One summary per element of `kind` in `group`
fn summarize<G: Group>(
    viewpoint: &Package,
    group: &G,
    kind: ElementType,
) -> Result<Vec<ElementSummary>> {
    let ids = IdFilter::default();
    match kind {
        ElementType::Media => rows(viewpoint, group.iter_medias(&MediaFilter::default())?, |m| {
            Ok(m.url())
        }),
        ElementType::Annotation => rows(
            viewpoint,
            group.iter_annotations(&AnnotationFilter::default())?,
            |a| {
                let span = format!("{} [{}, {}]", a.media_id(), a.begin(), a.end());
                Ok(match type_of(a)? {
                    Some(annotation_type) => format!("{} {}", annotation_type.id(), span),
                    None => span,
                })
            },
        ),
        ElementType::Relation => rows(
            viewpoint,
            group.iter_relations(&RelationFilter::default())?,
            |r| Ok(format!("{} member(s)", r.len()?)),
        ),
        ElementType::View => rows(viewpoint, group.iter_views(&ids)?, |v| v.content_mimetype()),
        ElementType::Resource => rows(viewpoint, group.iter_resources(&ids)?, |r| {
            r.content_mimetype()
        }),
        ElementType::Query => rows(viewpoint, group.iter_queries(&ids)?, |q| {
            q.content_mimetype()
        }),
        ElementType::Tag => rows(viewpoint, group.iter_tags(&TagFilter::default())?, |t| {
            Ok(format!("{} element(s)", viewpoint.elements_tagged(t)?.len()))
        }),
        ElementType::List => rows(viewpoint, group.iter_lists(&ListFilter::default())?, |l| {
            Ok(format!("{} item(s)", l.len()?))
        }),
        ElementType::Import => rows(
            viewpoint,
            group.iter_imports(&ImportFilter::default())?,
            |i| Ok(i.url()),
        ),
    }
}

fn rows<T: AsRef<Element>>(
    viewpoint: &Package,
    elements: Elements<T>,
    detail: impl Fn(&T) -> advene_core::Result<String>,
) -> Result<Vec<ElementSummary>> {
    let mut rows = Vec::new();
    for element in elements {
        let element = element?;
        let detail = detail(&element)?;
        let element = element.as_ref();
        rows.push(ElementSummary {
            id: id_ref(viewpoint, element)?,
            kind: element.element_type().name(),
            detail,
        });
    }
    Ok(rows)
}

/// Id-ref of `element` as seen from `viewpoint`
fn id_ref(viewpoint: &Package, element: &Element) -> Result<String> {
    match element.package() {
        Some(owner) => Ok(viewpoint.make_id_for(&owner, &element.id())?),
        None => Ok(element.id()),
    }
}
