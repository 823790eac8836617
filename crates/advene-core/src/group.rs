//! Read-only collections of a package
//!
//! - [`OwnGroup`]: elements owned by the package itself.
//! - [`AllGroup`]: elements of every package reachable through imports.
//!
//! Both issue one backend call per route: the own group has a single route
//! to the package; the all group uses the routing table, one route per
//! backend. Counts are summed over routes. Annotations of several routes
//! are merged by `(begin, end, media uri-ref)`, each backend already
//! yielding its own rows in that order.

use std::iter::Peekable;
use std::rc::Rc;

use crate::backend::{
    AnnotationFilter, Backend, ElementRecord, IdFilter, ImportFilter, ListFilter, MediaFilter,
    RelationFilter, Rows, TagFilter,
};
use crate::element::{
    Annotation, Element, Import, List, Media, Query, Relation, Resource, Tag, View,
};
use crate::error::{Error, Result};
use crate::idref::{make_uri_ref, split_id_ref};
use crate::package::{Package, Route};

/// Lazy, one-pass sequence of elements
pub type Elements<T> = Box<dyn Iterator<Item = Result<T>>>;

/// Stream typed handles out of each route's rows, one route after the other
fn fan_out<T>(
    routes: Vec<Route>,
    fetch: impl Fn(&Rc<dyn Backend>, &[String]) -> Result<Rows<ElementRecord>>,
) -> Result<Vec<Elements<T>>>
where
    T: TryFrom<Element, Error = Error> + 'static,
{
    let mut streams: Vec<Elements<T>> = Vec::with_capacity(routes.len());
    for route in routes {
        let rows = fetch(&route.backend, &route.pids())?;
        streams.push(Box::new(rows.map(move |row| {
            row.and_then(|record| route.element(record))
                .and_then(T::try_from)
        })));
    }
    Ok(streams)
}

fn chained<T: 'static>(streams: Vec<Elements<T>>) -> Elements<T> {
    Box::new(streams.into_iter().flatten())
}

fn sum(
    routes: Vec<Route>,
    count: impl Fn(&Rc<dyn Backend>, &[String]) -> Result<usize>,
) -> Result<usize> {
    routes
        .iter()
        .map(|route| count(&route.backend, &route.pids()))
        .sum()
}

/// uri-ref of the media of `annotation`, or its raw id-ref when the import
/// it goes through is not loaded
fn media_uri_ref(annotation: &Annotation) -> String {
    let media = annotation.media_id();
    let Some(owner) = annotation.package() else {
        return media;
    };
    match split_id_ref(&media) {
        (None, id) => make_uri_ref(&owner.uri_or_url(), id),
        (Some(prefix), id) => match owner.imported(prefix) {
            Some(imported) => make_uri_ref(&imported.uri_or_url(), id),
            None => media,
        },
    }
}

/// Interleaves annotation streams that are each already ordered
struct MergeAnnotations {
    streams: Vec<Peekable<Elements<Annotation>>>,
}

impl Iterator for MergeAnnotations {
    type Item = Result<Annotation>;

    fn next(&mut self) -> Option<Self::Item> {
        let mut best: Option<(usize, (i64, i64, String))> = None;
        for (i, stream) in self.streams.iter_mut().enumerate() {
            let key = match stream.peek() {
                None => continue,
                Some(Ok(a)) => (a.begin(), a.end(), media_uri_ref(a)),
                Some(Err(_)) => return stream.next(),
            };
            if best.as_ref().map_or(true, |(_, k)| key < *k) {
                best = Some((i, key));
            }
        }
        let (i, _) = best?;
        self.streams[i].next()
    }
}

/// A scope of elements, with one iterator and one count per element type
///
/// Filters referencing elements (media, member, item) take uri-refs.
pub trait Group {
    fn package(&self) -> &Package;

    /// Backends and package ids the group covers
    fn routes(&self) -> Result<Vec<Route>>;

    /// True if `element` belongs to one of the packages the group covers
    fn contains(&self, element: &Element) -> Result<bool> {
        let (Some(owner), false) = (element.package(), element.is_deleted()) else {
            return Ok(false);
        };
        let covered = self
            .routes()?
            .iter()
            .any(|route| route.package(owner.pid()).as_ref() == Some(&owner));
        Ok(covered && owner.has_element(&element.id())?)
    }

    fn iter_medias(&self, filter: &MediaFilter) -> Result<Elements<Media>> {
        let streams = fan_out(self.routes()?, |b, pids| b.iter_medias(pids, filter))?;
        Ok(chained(streams))
    }

    /// Annotations ordered by begin, end and media
    fn iter_annotations(&self, filter: &AnnotationFilter) -> Result<Elements<Annotation>> {
        let mut streams = fan_out(self.routes()?, |b, pids| b.iter_annotations(pids, filter))?;
        if streams.len() == 1 {
            return Ok(streams.remove(0));
        }
        Ok(Box::new(MergeAnnotations {
            streams: streams.into_iter().map(Iterator::peekable).collect(),
        }))
    }

    /// Annotations spanning time `t`, bounds included
    fn iter_annotations_at(&self, t: i64) -> Result<Elements<Annotation>> {
        self.iter_annotations(&AnnotationFilter::at(t))
    }

    fn iter_relations(&self, filter: &RelationFilter) -> Result<Elements<Relation>> {
        let streams = fan_out(self.routes()?, |b, pids| b.iter_relations(pids, filter))?;
        Ok(chained(streams))
    }

    fn iter_views(&self, filter: &IdFilter) -> Result<Elements<View>> {
        let streams = fan_out(self.routes()?, |b, pids| b.iter_views(pids, filter))?;
        Ok(chained(streams))
    }

    fn iter_resources(&self, filter: &IdFilter) -> Result<Elements<Resource>> {
        let streams = fan_out(self.routes()?, |b, pids| b.iter_resources(pids, filter))?;
        Ok(chained(streams))
    }

    fn iter_queries(&self, filter: &IdFilter) -> Result<Elements<Query>> {
        let streams = fan_out(self.routes()?, |b, pids| b.iter_queries(pids, filter))?;
        Ok(chained(streams))
    }

    fn iter_tags(&self, filter: &TagFilter) -> Result<Elements<Tag>> {
        let streams = fan_out(self.routes()?, |b, pids| b.iter_tags(pids, filter))?;
        Ok(chained(streams))
    }

    fn iter_lists(&self, filter: &ListFilter) -> Result<Elements<List>> {
        let streams = fan_out(self.routes()?, |b, pids| b.iter_lists(pids, filter))?;
        Ok(chained(streams))
    }

    fn iter_imports(&self, filter: &ImportFilter) -> Result<Elements<Import>> {
        let streams = fan_out(self.routes()?, |b, pids| b.iter_imports(pids, filter))?;
        Ok(chained(streams))
    }

    fn count_medias(&self, filter: &MediaFilter) -> Result<usize> {
        sum(self.routes()?, |b, pids| b.count_medias(pids, filter))
    }

    fn count_annotations(&self, filter: &AnnotationFilter) -> Result<usize> {
        sum(self.routes()?, |b, pids| b.count_annotations(pids, filter))
    }

    fn count_relations(&self, filter: &RelationFilter) -> Result<usize> {
        sum(self.routes()?, |b, pids| b.count_relations(pids, filter))
    }

    fn count_views(&self, filter: &IdFilter) -> Result<usize> {
        sum(self.routes()?, |b, pids| b.count_views(pids, filter))
    }

    fn count_resources(&self, filter: &IdFilter) -> Result<usize> {
        sum(self.routes()?, |b, pids| b.count_resources(pids, filter))
    }

    fn count_queries(&self, filter: &IdFilter) -> Result<usize> {
        sum(self.routes()?, |b, pids| b.count_queries(pids, filter))
    }

    fn count_tags(&self, filter: &TagFilter) -> Result<usize> {
        sum(self.routes()?, |b, pids| b.count_tags(pids, filter))
    }

    fn count_lists(&self, filter: &ListFilter) -> Result<usize> {
        sum(self.routes()?, |b, pids| b.count_lists(pids, filter))
    }

    fn count_imports(&self, filter: &ImportFilter) -> Result<usize> {
        sum(self.routes()?, |b, pids| b.count_imports(pids, filter))
    }
}

/// Elements owned by one package
#[derive(Debug, Clone)]
pub struct OwnGroup {
    package: Package,
}

impl Group for OwnGroup {
    fn package(&self) -> &Package {
        &self.package
    }

    fn routes(&self) -> Result<Vec<Route>> {
        self.package.check_open()?;
        Ok(vec![Route::single(&self.package)])
    }
}

/// Elements of a package and of every package it imports, transitively
#[derive(Debug, Clone)]
pub struct AllGroup {
    package: Package,
}

impl Group for AllGroup {
    fn package(&self) -> &Package {
        &self.package
    }

    fn routes(&self) -> Result<Vec<Route>> {
        self.package.routes()
    }
}

impl Package {
    pub fn own(&self) -> OwnGroup {
        OwnGroup {
            package: self.clone(),
        }
    }

    pub fn all(&self) -> AllGroup {
        AllGroup {
            package: self.clone(),
        }
    }
}
