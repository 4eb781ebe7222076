//! Edge (adjacency) index
//!
//! Keyed by vertex handle. Every edge is stored twice: as outbound under its
//! `_from` vertex and as inbound under its `_to` vertex, so a lookup filters
//! by direction at query time. A self-loop is stored under the same vertex
//! in both directions and is reported once for `Any`.

use crate::eval::{Evaluate, Matches};
use crate::operator::Literal;
use crate::traits::{IndexedDocument, SecondaryIndex};
use rustc_hash::FxHashMap;
use shoal_core::{
    DocumentHandle, DocumentId, EdgeDirection, Error, IndexDefinition, IndexKind, IndexValue,
    Result,
};
use smallvec::SmallVec;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct EdgeEntry {
    did: DocumentId,
    direction: EdgeDirection,
}

/// Adjacency index of an edge collection
#[derive(Debug)]
pub struct EdgeIndex {
    definition: IndexDefinition,
    adjacency: FxHashMap<DocumentHandle, SmallVec<[EdgeEntry; 2]>>,
    edges: usize,
}

impl EdgeIndex {
    /// Create an empty index for `definition`
    pub fn new(definition: IndexDefinition) -> Self {
        Self {
            definition,
            adjacency: FxHashMap::default(),
            edges: 0,
        }
    }

    /// Edges touching `vertex` in `direction`
    pub fn lookup(
        &self,
        direction: EdgeDirection,
        vertex: DocumentHandle,
    ) -> impl Iterator<Item = DocumentId> + '_ {
        let entries = self
            .adjacency
            .get(&vertex)
            .map(|e| e.as_slice())
            .unwrap_or(&[]);
        let mut last = None;
        entries
            .iter()
            .filter(move |e| direction.accepts(e.direction))
            .filter_map(move |e| {
                // Both entries of a self-loop are adjacent.
                if direction == EdgeDirection::Any && last == Some(e.did) {
                    return None;
                }
                last = Some(e.did);
                Some(e.did)
            })
    }

    /// Number of distinct vertices with at least one edge
    pub fn vertex_count(&self) -> usize {
        self.adjacency.len()
    }

    fn add(&mut self, vertex: DocumentHandle, entry: EdgeEntry) {
        self.adjacency.entry(vertex).or_default().push(entry);
    }

    fn drop_entries(&mut self, vertex: DocumentHandle, did: DocumentId) {
        if let Some(entries) = self.adjacency.get_mut(&vertex) {
            entries.retain(|e| e.did != did);
            if entries.is_empty() {
                self.adjacency.remove(&vertex);
            }
        }
    }
}

impl Evaluate for EdgeIndex {
    fn evaluated_kind(&self) -> IndexKind {
        IndexKind::Edge
    }

    /// `EQ(handle)` returns the edges touching the vertex in either direction
    fn eval_eq<'a>(&'a self, values: &[Literal]) -> Result<Matches<'a>> {
        let vertex = match values {
            [Literal::Value(IndexValue::String(s))] => DocumentHandle::parse(s),
            _ => None,
        }
        .ok_or_else(|| Error::bad_parameter("edge index compares one vertex handle"))?;
        Ok(Box::new(self.lookup(EdgeDirection::Any, vertex)))
    }
}

impl SecondaryIndex for EdgeIndex {
    fn definition(&self) -> &IndexDefinition {
        &self.definition
    }

    fn insert(&mut self, doc: &IndexedDocument<'_>) -> Result<()> {
        let endpoints = doc
            .edge
            .ok_or_else(|| Error::bad_parameter(format!("document {} is not an edge", doc.did)))?;
        if self
            .adjacency
            .get(&endpoints.from)
            .map_or(false, |e| e.iter().any(|x| x.did == doc.did))
        {
            return Ok(());
        }
        self.add(
            endpoints.from,
            EdgeEntry {
                did: doc.did,
                direction: EdgeDirection::Out,
            },
        );
        self.add(
            endpoints.to,
            EdgeEntry {
                did: doc.did,
                direction: EdgeDirection::In,
            },
        );
        self.edges += 1;
        Ok(())
    }

    fn remove(&mut self, doc: &IndexedDocument<'_>) {
        let Some(endpoints) = doc.edge else {
            return;
        };
        let present = self
            .adjacency
            .get(&endpoints.from)
            .map_or(false, |e| e.iter().any(|x| x.did == doc.did));
        if !present {
            return;
        }
        self.drop_entries(endpoints.from, doc.did);
        self.drop_entries(endpoints.to, doc.did);
        self.edges -= 1;
    }

    fn len(&self) -> usize {
        self.edges
    }

    fn as_edge(&self) -> Option<&EdgeIndex> {
        Some(self)
    }
}
