//! Geo index
//!
//! Indexes one coordinate pair per document, read either from a single
//! attribute holding `[lat, lon]` (`[lon, lat]` with `geo_json`) or from two
//! numeric attributes. Documents without valid coordinates are not indexed.
//!
//! Distances are great-circle distances in meters (haversine on a sphere of
//! radius [`EARTH_RADIUS_METERS`]). Both lookups return results sorted by
//! ascending distance.

use crate::eval::Evaluate;
use crate::key::{KeyExtractor, MissingPolicy};
use crate::traits::{IndexedDocument, SecondaryIndex};
use rustc_hash::FxHashMap;
use serde_json::Value as JsonValue;
use shoal_core::{DocumentId, Error, IndexDefinition, IndexKind, Result, Shaper};
use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::sync::Arc;

/// Mean earth radius used for distances
pub const EARTH_RADIUS_METERS: f64 = 6_371_000.0;

/// Latitude/longitude pair in degrees
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GeoPoint {
    /// Latitude, -90..=90
    pub latitude: f64,
    /// Longitude, -180..=180
    pub longitude: f64,
}

impl GeoPoint {
    /// Validated point
    ///
    /// # Errors
    ///
    /// `BadParameter` when a coordinate is out of range or not finite.
    pub fn new(latitude: f64, longitude: f64) -> Result<Self> {
        if !(-90.0..=90.0).contains(&latitude) || !(-180.0..=180.0).contains(&longitude) {
            return Err(Error::bad_parameter(format!(
                "invalid coordinates ({}, {})",
                latitude, longitude
            )));
        }
        Ok(Self {
            latitude,
            longitude,
        })
    }

    /// Great-circle distance in meters
    pub fn distance_to(&self, other: &GeoPoint) -> f64 {
        let (lat1, lat2) = (self.latitude.to_radians(), other.latitude.to_radians());
        let dlat = lat2 - lat1;
        let dlon = (other.longitude - self.longitude).to_radians();
        let a = (dlat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (dlon / 2.0).sin().powi(2);
        2.0 * EARTH_RADIUS_METERS * a.sqrt().min(1.0).asin()
    }
}

#[derive(Debug, Clone, Copy)]
struct Candidate {
    distance: f64,
    did: DocumentId,
}

impl PartialEq for Candidate {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Candidate {}

impl PartialOrd for Candidate {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Candidate {
    fn cmp(&self, other: &Self) -> Ordering {
        self.distance
            .total_cmp(&other.distance)
            .then(self.did.cmp(&other.did))
    }
}

/// Geo-spatial index
#[derive(Debug)]
pub struct GeoIndex {
    definition: IndexDefinition,
    extractor: KeyExtractor,
    points: FxHashMap<DocumentId, GeoPoint>,
}

impl GeoIndex {
    /// Create an empty index for `definition`
    pub fn new(definition: IndexDefinition, shaper: Arc<Shaper>) -> Result<Self> {
        definition.validate()?;
        let extractor = KeyExtractor::new(shaper, &definition.fields, MissingPolicy::Skip)?;
        Ok(Self {
            definition,
            extractor,
            points: FxHashMap::default(),
        })
    }

    /// Coordinates of `body`, if valid
    pub fn point_of(&self, body: &JsonValue) -> Option<GeoPoint> {
        let values = self.extractor.values(body);
        let (lat, lon) = match values.as_slice() {
            [Some(location)] => {
                let pair = location.as_array()?;
                if pair.len() != 2 {
                    return None;
                }
                let (a, b) = (pair[0].as_f64()?, pair[1].as_f64()?);
                if self.definition.geo_json {
                    (b, a)
                } else {
                    (a, b)
                }
            }
            [Some(lat), Some(lon)] => (lat.as_f64()?, lon.as_f64()?),
            _ => return None,
        };
        GeoPoint::new(lat, lon).ok()
    }

    /// Stored coordinates of a document
    pub fn location(&self, did: DocumentId) -> Option<GeoPoint> {
        self.points.get(&did).copied()
    }

    /// Up to `limit` documents closest to `center`
    pub fn near(&self, center: GeoPoint, limit: usize) -> Vec<(DocumentId, f64)> {
        if limit == 0 {
            return Vec::new();
        }
        let mut heap: BinaryHeap<Candidate> = BinaryHeap::with_capacity(limit + 1);
        for (did, point) in &self.points {
            let candidate = Candidate {
                distance: center.distance_to(point),
                did: *did,
            };
            if heap.len() < limit {
                heap.push(candidate);
            } else if heap.peek().map_or(false, |worst| candidate < *worst) {
                heap.pop();
                heap.push(candidate);
            }
        }
        heap.into_sorted_vec()
            .into_iter()
            .map(|c| (c.did, c.distance))
            .collect()
    }

    /// Documents within `radius` meters of `center`
    pub fn within(&self, center: GeoPoint, radius: f64) -> Vec<(DocumentId, f64)> {
        let mut found: Vec<Candidate> = self
            .points
            .iter()
            .map(|(did, point)| Candidate {
                distance: center.distance_to(point),
                did: *did,
            })
            .filter(|c| c.distance <= radius)
            .collect();
        found.sort();
        found.into_iter().map(|c| (c.did, c.distance)).collect()
    }
}

impl Evaluate for GeoIndex {
    fn evaluated_kind(&self) -> IndexKind {
        IndexKind::Geo
    }
}

impl SecondaryIndex for GeoIndex {
    fn definition(&self) -> &IndexDefinition {
        &self.definition
    }

    fn insert(&mut self, doc: &IndexedDocument<'_>) -> Result<()> {
        if let Some(point) = self.point_of(doc.body) {
            self.points.insert(doc.did, point);
        }
        Ok(())
    }

    fn remove(&mut self, doc: &IndexedDocument<'_>) {
        self.points.remove(&doc.did);
    }

    fn len(&self) -> usize {
        self.points.len()
    }

    fn as_geo(&self) -> Option<&GeoIndex> {
        Some(self)
    }
}
