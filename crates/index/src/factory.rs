//! Index construction from definitions

use crate::bitmask::BitmaskIndex;
use crate::edge::EdgeIndex;
use crate::geo::GeoIndex;
use crate::hash::HashIndex;
use crate::skiplist::SkiplistIndex;
use crate::traits::SecondaryIndex;
use shoal_core::{Error, IndexDefinition, IndexKind, Result, Shaper};
use std::sync::Arc;
use tracing::debug;

/// Build an empty secondary index for `definition`
///
/// # Errors
///
/// `BadParameter` for an invalid definition or for the primary index, which
/// is the document directory rather than a secondary index.
pub fn create_index(
    definition: IndexDefinition,
    shaper: Arc<Shaper>,
) -> Result<Box<dyn SecondaryIndex>> {
    definition.validate()?;
    debug!(target: "shoal::index", id = %definition.id, kind = %definition.kind, fields = ?definition.fields, "Creating index");
    Ok(match definition.kind {
        IndexKind::Primary => {
            return Err(Error::bad_parameter(
                "the primary index is the document directory",
            ))
        }
        IndexKind::Hash => Box::new(HashIndex::new(definition, shaper)?),
        IndexKind::Skiplist => Box::new(SkiplistIndex::new(definition, shaper)?),
        IndexKind::Bitmask => Box::new(BitmaskIndex::new(definition, shaper)?),
        IndexKind::Geo => Box::new(GeoIndex::new(definition, shaper)?),
        IndexKind::Edge => Box::new(EdgeIndex::new(definition)),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_creates_every_secondary_kind() {
        let shaper = Arc::new(Shaper::new());
        let defs = [
            IndexDefinition::hash(["a"], true),
            IndexDefinition::skiplist(["a", "b"], false),
            IndexDefinition::bitmask([("c", vec![serde_json::json!(1)])], false),
            IndexDefinition::geo_pair("lat", "lon"),
            IndexDefinition::edge(),
        ];
        for def in defs {
            let kind = def.kind;
            let index = create_index(def, shaper.clone()).unwrap();
            assert_eq!(index.kind(), kind);
            assert!(index.is_empty());
        }
    }

    #[test]
    fn test_rejects_primary_and_invalid() {
        let shaper = Arc::new(Shaper::new());
        assert!(create_index(IndexDefinition::primary(), shaper.clone()).is_err());
        assert!(create_index(IndexDefinition::hash(Vec::<String>::new(), false), shaper).is_err());
    }
}
