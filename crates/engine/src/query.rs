//! Simple queries over a loaded collection
//!
//! Every query pins the datafiles with a barrier, evaluates against the
//! directory and indexes under the shared contents lock, copies the
//! matching pointers out, then reads bodies without holding the lock.
//! Skip/limit is applied to the match sequence before any body is read.

use crate::cursor::DocumentCursor;
use crate::document_collection::{read_document, Contents, Document, DocumentCollection};
use crate::primary::PrimaryIndex;
use rustc_hash::FxHashSet;
use serde_json::Value as JsonValue;
use shoal_core::{
    walk_path, CollectionType, DocumentHandle, DocumentId, EdgeDirection, Error, IndexDefinition,
    IndexId, IndexKind, IndexValue, Result,
};
use shoal_index::{
    evaluate, from_conditions, from_example, EdgeIndex, Evaluate, GeoIndex, GeoPoint,
    IndexOperator, Page, Window,
};
use shoal_storage::DocumentPointer;
use std::sync::Arc;

/// Documents returned by a query
#[derive(Debug, Clone, PartialEq)]
pub struct QueryResult<T = Document> {
    /// Returned documents, in match order
    pub documents: Vec<T>,
    /// Matches before skip/limit
    pub total: usize,
    /// Number of returned documents
    pub count: usize,
}

impl<T> QueryResult<T> {
    fn new(documents: Vec<T>, total: usize) -> Self {
        let count = documents.len();
        Self {
            documents,
            total,
            count,
        }
    }
}

/// A document with its distance from a query point, in meters
#[derive(Debug, Clone, PartialEq)]
pub struct Located {
    /// The document
    pub document: Document,
    /// Great-circle distance
    pub distance: f64,
}

fn owned(page: Page<&DocumentPointer>) -> Page<DocumentPointer> {
    Page {
        items: page.items.into_iter().cloned().collect(),
        total: page.total,
    }
}

fn expect_kind(iid: IndexId, actual: IndexKind, expected: Option<IndexKind>) -> Result<()> {
    match expected {
        Some(kind) if kind != actual => Err(Error::bad_parameter(format!(
            "index {} is a {} index, not a {} index",
            iid, actual, kind
        ))),
        _ => Ok(()),
    }
}

/// Evaluate `op` and window the live pointers it names
fn select<E: Evaluate + ?Sized>(
    contents: &Contents,
    index: &E,
    op: &IndexOperator,
    window: Window,
) -> Result<Page<DocumentPointer>> {
    let matches = evaluate(index, op)?;
    Ok(owned(window.apply(
        matches.filter_map(|did| contents.directory.lookup_live(did)),
    )))
}

impl DocumentCollection {
    // ========================================================================
    // Pointer selection
    // ========================================================================

    fn select_all(&self, window: Window) -> Page<DocumentPointer> {
        let contents = self.contents.read();
        owned(window.apply(contents.directory.iter_live()))
    }

    fn select_by_index(
        &self,
        iid: IndexId,
        kind: Option<IndexKind>,
        window: Window,
        operator: impl FnOnce(&IndexDefinition) -> Result<IndexOperator>,
    ) -> Result<Page<DocumentPointer>> {
        let contents = self.contents.read();
        if iid == IndexId::PRIMARY {
            expect_kind(iid, IndexKind::Primary, kind)?;
            let op = operator(&IndexDefinition::primary().with_id(iid))?;
            let primary = PrimaryIndex::new(self.cid, &contents.directory);
            return select(&contents, &primary, &op, window);
        }
        let index = contents.index(iid)?;
        expect_kind(iid, index.kind(), kind)?;
        let op = operator(index.definition())?;
        select(&contents, index, &op, window)
    }

    fn materialize(&self, page: Page<DocumentPointer>) -> Result<QueryResult> {
        let documents = page
            .items
            .iter()
            .map(|ptr| read_document(&self.files, self.cid, ptr))
            .collect::<Result<Vec<_>>>()?;
        Ok(QueryResult::new(documents, page.total))
    }

    fn query_index(
        &self,
        iid: IndexId,
        kind: Option<IndexKind>,
        window: Window,
        operator: impl FnOnce(&IndexDefinition) -> Result<IndexOperator>,
    ) -> Result<QueryResult> {
        let _barrier = self.barriers.acquire();
        let page = self.select_by_index(iid, kind, window, operator)?;
        self.materialize(page)
    }

    // ========================================================================
    // Full scans
    // ========================================================================

    /// Every live document, in directory order
    pub fn all(&self, window: Window) -> Result<QueryResult> {
        let _barrier = self.barriers.acquire();
        let page = self.select_all(window);
        self.materialize(page)
    }

    /// A uniformly random live document
    pub fn any(&self) -> Result<Option<Document>> {
        let _barrier = self.barriers.acquire();
        let ptr = self
            .contents
            .read()
            .directory
            .random_live(&mut rand::thread_rng())
            .cloned();
        ptr.map(|ptr| read_document(&self.files, self.cid, &ptr))
            .transpose()
    }

    /// Documents whose attributes equal every attribute of `example`
    ///
    /// Attribute names may be dotted paths into sub-objects, resolved the
    /// way index keys are extracted. A document lacking an attribute does
    /// not match.
    ///
    /// # Errors
    ///
    /// `BadParameter` if `example` is not an object.
    pub fn by_example(&self, example: &JsonValue, window: Window) -> Result<QueryResult> {
        let wanted: Vec<(&str, IndexValue)> = example
            .as_object()
            .ok_or_else(|| Error::bad_parameter("example must be an object"))?
            .iter()
            .map(|(path, value)| (path.as_str(), IndexValue::from_json(value)))
            .collect();

        let _barrier = self.barriers.acquire();
        let contents = self.contents.read();
        let mut failure = None;
        let matches = contents.directory.iter_live().filter_map(|ptr| {
            match read_document(&self.files, self.cid, ptr) {
                Ok(doc) => {
                    (doc.body.is_object() && matches_example(&doc.body, &wanted)).then_some(doc)
                }
                Err(e) => {
                    failure.get_or_insert(e);
                    None
                }
            }
        });
        let page = window.apply(matches);
        if let Some(e) = failure {
            return Err(e);
        }
        Ok(QueryResult::new(page.items, page.total))
    }

    // ========================================================================
    // Index lookups
    // ========================================================================

    /// Example lookup through a hash index
    pub fn by_example_hash(
        &self,
        iid: IndexId,
        example: &JsonValue,
        window: Window,
    ) -> Result<QueryResult> {
        self.query_index(iid, Some(IndexKind::Hash), window, |def| {
            from_example(def, example)
        })
    }

    /// Example lookup through a skiplist index, on a prefix of its fields
    pub fn by_example_skiplist(
        &self,
        iid: IndexId,
        example: &JsonValue,
        window: Window,
    ) -> Result<QueryResult> {
        self.query_index(iid, Some(IndexKind::Skiplist), window, |def| {
            from_example(def, example)
        })
    }

    /// Condition lookup through a skiplist index
    ///
    /// `conditions` maps field names to `[[op, value], ...]` lists, e.g.
    /// `{"x": [[">", 1], ["<=", 5]]}`.
    pub fn by_condition_skiplist(
        &self,
        iid: IndexId,
        conditions: &JsonValue,
        window: Window,
    ) -> Result<QueryResult> {
        self.query_index(iid, Some(IndexKind::Skiplist), window, |def| {
            from_conditions(def, conditions)
        })
    }

    /// Example lookup through a bitmask index
    pub fn by_example_bitmask(
        &self,
        iid: IndexId,
        example: &JsonValue,
        window: Window,
    ) -> Result<QueryResult> {
        self.query_index(iid, Some(IndexKind::Bitmask), window, |def| {
            from_example(def, example)
        })
    }

    /// Condition lookup through a bitmask index
    pub fn by_condition_bitmask(
        &self,
        iid: IndexId,
        conditions: &JsonValue,
        window: Window,
    ) -> Result<QueryResult> {
        self.query_index(iid, Some(IndexKind::Bitmask), window, |def| {
            from_conditions(def, conditions)
        })
    }

    /// Evaluate an operator tree against any index
    ///
    /// # Errors
    ///
    /// `NotFound` for unknown indexes; `Unsupported` or `BadParameter` when
    /// the index cannot answer the operator.
    pub fn by_operator(
        &self,
        iid: IndexId,
        operator: &IndexOperator,
        window: Window,
    ) -> Result<QueryResult> {
        self.query_index(iid, None, window, |_| Ok(operator.clone()))
    }

    // ========================================================================
    // Geo
    // ========================================================================

    fn located(
        &self,
        iid: IndexId,
        latitude: f64,
        longitude: f64,
        search: impl FnOnce(&GeoIndex, GeoPoint) -> Vec<(DocumentId, f64)>,
    ) -> Result<QueryResult<Located>> {
        let center = GeoPoint::new(latitude, longitude)?;
        let _barrier = self.barriers.acquire();
        let hits: Vec<(DocumentPointer, f64)> = {
            let contents = self.contents.read();
            let geo = contents
                .index(iid)?
                .as_geo()
                .ok_or_else(|| Error::bad_parameter(format!("index {} is not a geo index", iid)))?;
            search(geo, center)
                .into_iter()
                .filter_map(|(did, distance)| {
                    contents
                        .directory
                        .lookup_live(did)
                        .map(|ptr| (ptr.clone(), distance))
                })
                .collect()
        };
        let documents = hits
            .into_iter()
            .map(|(ptr, distance)| {
                Ok(Located {
                    document: read_document(&self.files, self.cid, &ptr)?,
                    distance,
                })
            })
            .collect::<Result<Vec<_>>>()?;
        let total = documents.len();
        Ok(QueryResult::new(documents, total))
    }

    /// The `limit` documents closest to a point, nearest first
    pub fn near(
        &self,
        iid: IndexId,
        latitude: f64,
        longitude: f64,
        limit: usize,
    ) -> Result<QueryResult<Located>> {
        self.located(iid, latitude, longitude, |geo, center| {
            geo.near(center, limit)
        })
    }

    /// Documents within `radius` meters of a point, nearest first
    ///
    /// # Errors
    ///
    /// `BadParameter` for a negative or non-finite radius.
    pub fn within(
        &self,
        iid: IndexId,
        latitude: f64,
        longitude: f64,
        radius: f64,
    ) -> Result<QueryResult<Located>> {
        if !radius.is_finite() || radius < 0.0 {
            return Err(Error::bad_parameter(format!("invalid radius {}", radius)));
        }
        self.located(iid, latitude, longitude, |geo, center| {
            geo.within(center, radius)
        })
    }

    // ========================================================================
    // Edges
    // ========================================================================

    /// Edges touching the given vertices in `direction`
    ///
    /// `vertices` is a document handle string or a list of them. A single
    /// malformed handle is an error; malformed entries of a list are
    /// skipped. Each edge is returned once.
    ///
    /// # Errors
    ///
    /// `BadParameter` on a document collection or for an unusable vertex
    /// parameter.
    pub fn edges(&self, vertices: &JsonValue, direction: EdgeDirection) -> Result<QueryResult> {
        if self.collection_type != CollectionType::Edge {
            return Err(Error::bad_parameter(format!(
                "collection {} is not an edge collection",
                self.cid
            )));
        }
        let vertices = parse_vertices(vertices)?;

        let _barrier = self.barriers.acquire();
        let pointers: Vec<DocumentPointer> = {
            let contents = self.contents.read();
            let index = edge_index(&contents)?;
            let mut seen = FxHashSet::default();
            vertices
                .iter()
                .flat_map(|vertex| index.lookup(direction, *vertex))
                .filter(|did| seen.insert(*did))
                .filter_map(|did| contents.directory.lookup_live(did).cloned())
                .collect()
        };
        let total = pointers.len();
        self.materialize(Page {
            items: pointers,
            total,
        })
    }

    /// Edges ending at the given vertices
    pub fn in_edges(&self, vertices: &JsonValue) -> Result<QueryResult> {
        self.edges(vertices, EdgeDirection::In)
    }

    /// Edges starting at the given vertices
    pub fn out_edges(&self, vertices: &JsonValue) -> Result<QueryResult> {
        self.edges(vertices, EdgeDirection::Out)
    }

    // ========================================================================
    // Cursors
    // ========================================================================

    /// Lazily read every live document
    ///
    /// The cursor holds a barrier until dropped, so the datafiles it points
    /// into stay readable.
    pub fn cursor_all(&self, window: Window) -> DocumentCursor {
        let barrier = self.barriers.acquire();
        let page = self.select_all(window);
        DocumentCursor::new(barrier, Arc::clone(&self.files), self.cid, page)
    }

    /// Lazily read the documents matching an operator tree
    pub fn cursor_by_operator(
        &self,
        iid: IndexId,
        operator: &IndexOperator,
        window: Window,
    ) -> Result<DocumentCursor> {
        let barrier = self.barriers.acquire();
        let page = self.select_by_index(iid, None, window, |_| Ok(operator.clone()))?;
        Ok(DocumentCursor::new(
            barrier,
            Arc::clone(&self.files),
            self.cid,
            page,
        ))
    }
}

fn matches_example(body: &JsonValue, wanted: &[(&str, IndexValue)]) -> bool {
    wanted.iter().all(|(path, value)| {
        walk_path(body, path).map_or(false, |found| IndexValue::from_json(found) == *value)
    })
}

fn edge_index(contents: &Contents) -> Result<&EdgeIndex> {
    contents
        .indexes
        .iter()
        .find_map(|index| index.as_edge())
        .ok_or_else(|| Error::corrupted("edge collection without an edge index"))
}

fn parse_vertices(vertices: &JsonValue) -> Result<Vec<DocumentHandle>> {
    match vertices {
        JsonValue::String(s) => DocumentHandle::parse(s)
            .map(|handle| vec![handle])
            .ok_or_else(|| Error::bad_parameter(format!("invalid document handle '{}'", s))),
        JsonValue::Array(items) => Ok(items
            .iter()
            .filter_map(JsonValue::as_str)
            .filter_map(DocumentHandle::parse)
            .collect()),
        other => Err(Error::bad_parameter(format!(
            "vertex must be a document handle or a list of handles, got {}",
            other
        ))),
    }
}

#[cfg(test)]
mod tests {
    use crate::document_collection::{DocumentCollection, LoadContext};
    use super::*;
    use serde_json::json;
    use shoal_core::{CollectionId, Shaper, TickGenerator};
    use shoal_storage::{BarrierRegistry, Compactor, DatafileOptions};
    use tempfile::TempDir;

    fn load(dir: &std::path::Path, collection_type: CollectionType) -> DocumentCollection {
        DocumentCollection::load(LoadContext {
            cid: CollectionId(7),
            collection_type,
            dir: dir.to_path_buf(),
            options: DatafileOptions {
                journal_size: 64 * 1024,
                wait_for_sync: false,
            },
            ticks: Arc::new(TickGenerator::default()),
            shaper: Arc::new(Shaper::new()),
            barriers: BarrierRegistry::new("query-test"),
            compactor: Compactor::new(0.1, true),
        })
        .unwrap()
    }

    fn xs(result: &QueryResult) -> Vec<i64> {
        let mut xs: Vec<i64> = result
            .documents
            .iter()
            .filter_map(|d| d.body["x"].as_i64())
            .collect();
        xs.sort();
        xs
    }

    // ========================================================================
    // Full scans
    // ========================================================================

    #[test]
    fn test_all_with_window() {
        let dir = TempDir::new().unwrap();
        let dc = load(dir.path(), CollectionType::Document);
        for x in 0..10 {
            dc.insert(json!({ "x": x })).unwrap();
        }

        let page = dc.all(Window::new(2, Some(3))).unwrap();
        assert_eq!(page.total, 10);
        assert_eq!(page.count, 3);

        let tail = dc.all(Window::new(-4, None)).unwrap();
        assert_eq!(tail.count, 4);
        assert_eq!(dc.all(Window::new(0, Some(0))).unwrap().count, 0);
    }

    #[test]
    fn test_any_on_empty_collection() {
        let dir = TempDir::new().unwrap();
        let dc = load(dir.path(), CollectionType::Document);
        assert!(dc.any().unwrap().is_none());
        dc.insert(json!({"x": 1})).unwrap();
        assert_eq!(dc.any().unwrap().unwrap().body["x"], 1);
    }

    #[test]
    fn test_by_example_full_scan() {
        let dir = TempDir::new().unwrap();
        let dc = load(dir.path(), CollectionType::Document);
        dc.insert(json!({"x": 5, "a": {"b": "k"}})).unwrap();
        dc.insert(json!({"x": 5})).unwrap();
        dc.insert(json!({"x": 9, "a": {"b": "k"}})).unwrap();

        let result = dc.by_example(&json!({"x": 5}), Window::all()).unwrap();
        assert_eq!(result.total, 2);

        let nested = dc
            .by_example(&json!({"a.b": "k", "x": 9}), Window::all())
            .unwrap();
        assert_eq!(xs(&nested), vec![9]);

        // Absent attributes never match, not even null.
        let none = dc.by_example(&json!({"a.b": null}), Window::all()).unwrap();
        assert_eq!(none.total, 0);
        assert!(dc.by_example(&json!(5), Window::all()).is_err());
    }

    // ========================================================================
    // Index lookups
    // ========================================================================

    #[test]
    fn test_skiplist_conditions() {
        let dir = TempDir::new().unwrap();
        let dc = load(dir.path(), CollectionType::Document);
        let (def, _) = dc.ensure_index(IndexDefinition::skiplist(["x"], false)).unwrap();
        for x in 0..10 {
            dc.insert(json!({ "x": x })).unwrap();
        }

        let range = dc
            .by_condition_skiplist(def.id, &json!({"x": [[">", 2], ["<=", 5]]}), Window::all())
            .unwrap();
        assert_eq!(xs(&range), vec![3, 4, 5]);

        let exact = dc
            .by_example_skiplist(def.id, &json!({"x": 7}), Window::all())
            .unwrap();
        assert_eq!(xs(&exact), vec![7]);

        let windowed = dc
            .by_condition_skiplist(def.id, &json!({"x": [[">=", 0]]}), Window::new(8, Some(5)))
            .unwrap();
        assert_eq!(windowed.total, 10);
        assert_eq!(xs(&windowed), vec![8, 9]);
    }

    #[test]
    fn test_kind_mismatch_is_bad_parameter() {
        let dir = TempDir::new().unwrap();
        let dc = load(dir.path(), CollectionType::Document);
        let (def, _) = dc.ensure_index(IndexDefinition::hash(["x"], false)).unwrap();
        assert!(matches!(
            dc.by_example_skiplist(def.id, &json!({"x": 1}), Window::all()),
            Err(Error::BadParameter(_))
        ));
        assert!(matches!(
            dc.by_example_hash(IndexId(999_999), &json!({"x": 1}), Window::all()),
            Err(Error::NotFound(_))
        ));
    }

    #[test]
    fn test_deleted_documents_leave_results() {
        let dir = TempDir::new().unwrap();
        let dc = load(dir.path(), CollectionType::Document);
        let (def, _) = dc.ensure_index(IndexDefinition::hash(["x"], false)).unwrap();
        let a = dc.insert(json!({"x": 1})).unwrap();
        dc.insert(json!({"x": 1})).unwrap();
        dc.remove(a.did).unwrap();

        let result = dc
            .by_operator(def.id, &IndexOperator::eq([1i64]), Window::all())
            .unwrap();
        assert_eq!(result.total, 1);
        assert_ne!(result.documents[0].did, a.did);
    }

    #[test]
    fn test_near_and_within() {
        let dir = TempDir::new().unwrap();
        let dc = load(dir.path(), CollectionType::Document);
        let (def, _) = dc.ensure_index(IndexDefinition::geo_pair("lat", "lon")).unwrap();
        dc.insert(json!({"name": "origin", "lat": 0.0, "lon": 0.0})).unwrap();
        dc.insert(json!({"name": "near", "lat": 0.0, "lon": 0.01})).unwrap();
        dc.insert(json!({"name": "far", "lat": 10.0, "lon": 10.0})).unwrap();
        dc.insert(json!({"name": "nowhere"})).unwrap();

        let near = dc.near(def.id, 0.0, 0.0, 2).unwrap();
        let names: Vec<&str> = near
            .documents
            .iter()
            .filter_map(|l| l.document.body["name"].as_str())
            .collect();
        assert_eq!(names, vec!["origin", "near"]);
        assert_eq!(near.documents[0].distance, 0.0);

        let within = dc.within(def.id, 0.0, 0.0, 5_000.0).unwrap();
        assert_eq!(within.count, 2);
        assert!(dc.within(def.id, 0.0, 0.0, -1.0).is_err());
        assert!(dc.near(def.id, 91.0, 0.0, 1).is_err());
    }

    // ========================================================================
    // Edges
    // ========================================================================

    #[test]
    fn test_edge_lookups() {
        let dir = TempDir::new().unwrap();
        let dc = load(dir.path(), CollectionType::Edge);
        dc.insert(json!({"_from": "1/1", "_to": "1/2", "x": 1})).unwrap();
        dc.insert(json!({"_from": "1/2", "_to": "1/3", "x": 2})).unwrap();
        dc.insert(json!({"_from": "1/2", "_to": "1/2", "x": 3})).unwrap();

        assert_eq!(xs(&dc.out_edges(&json!("1/2")).unwrap()), vec![2, 3]);
        assert_eq!(xs(&dc.in_edges(&json!("1/2")).unwrap()), vec![1, 3]);
        assert_eq!(
            xs(&dc.edges(&json!("1/2"), EdgeDirection::Any).unwrap()),
            vec![1, 2, 3]
        );

        // List entries are deduplicated; bad entries are skipped.
        let list = dc
            .edges(&json!(["1/1", "1/2", "junk", 4]), EdgeDirection::Any)
            .unwrap();
        assert_eq!(xs(&list), vec![1, 2, 3]);

        assert!(dc.out_edges(&json!("junk")).is_err());
        assert!(dc.out_edges(&json!(12)).is_err());
    }

    #[test]
    fn test_edges_on_document_collection() {
        let dir = TempDir::new().unwrap();
        let dc = load(dir.path(), CollectionType::Document);
        assert!(matches!(
            dc.out_edges(&json!("1/1")),
            Err(Error::BadParameter(_))
        ));
    }

    // ========================================================================
    // Cursors
    // ========================================================================

    #[test]
    fn test_cursor_holds_barrier() {
        let dir = TempDir::new().unwrap();
        let dc = load(dir.path(), CollectionType::Document);
        for x in 0..5 {
            dc.insert(json!({ "x": x })).unwrap();
        }

        let cursor = dc.cursor_all(Window::new(1, None));
        assert_eq!(cursor.total(), 5);
        assert_eq!(dc.barriers().len(), 1);
        let docs: Vec<Document> = cursor.collect::<Result<_>>().unwrap();
        assert_eq!(docs.len(), 4);
        assert!(dc.barriers().is_empty());
    }
}
