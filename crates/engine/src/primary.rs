//! Primary index over the document directory
//!
//! Answers EQ and NE on the document id. A leaf value is either a document
//! id number or a `"<cid>/<did>"` handle; a handle of another collection
//! matches nothing. AND and OR use the generic combinators, ranges and NOT
//! are unsupported.

use shoal_core::{CollectionId, DocumentHandle, DocumentId, Error, IndexKind, IndexValue, Result};
use shoal_index::{ComparisonOp, Evaluate, IndexOperator, Literal, Matches};
use shoal_storage::DocumentDirectory;

pub(crate) struct PrimaryIndex<'a> {
    cid: CollectionId,
    directory: &'a DocumentDirectory,
}

impl<'a> PrimaryIndex<'a> {
    pub(crate) fn new(cid: CollectionId, directory: &'a DocumentDirectory) -> Self {
        Self { cid, directory }
    }

    /// Document named by a leaf; `None` for a handle of another collection
    fn target(&self, values: &[Literal]) -> Result<Option<DocumentId>> {
        let [value] = values else {
            return Err(Error::bad_parameter(format!(
                "primary index compares exactly one value, got {}",
                values.len()
            )));
        };
        match value.as_value() {
            Some(IndexValue::Number(n)) if *n >= 0.0 && n.fract() == 0.0 => {
                Ok(Some(DocumentId(*n as u64)))
            }
            Some(IndexValue::String(s)) => match DocumentHandle::parse(s) {
                Some(handle) => Ok((handle.cid == self.cid).then_some(handle.did)),
                None => s.parse::<u64>().map(|did| Some(DocumentId(did))).map_err(|_| {
                    Error::bad_parameter(format!("'{}' is not a document id or handle", s))
                }),
            },
            _ => Err(Error::bad_parameter(
                "primary index compares document ids or handles",
            )),
        }
    }
}

impl Evaluate for PrimaryIndex<'_> {
    fn evaluated_kind(&self) -> IndexKind {
        IndexKind::Primary
    }

    fn eval_eq<'b>(&'b self, values: &[Literal]) -> Result<Matches<'b>> {
        let directory = self.directory;
        let found = self
            .target(values)?
            .filter(|did| directory.lookup_live(*did).is_some());
        Ok(Box::new(found.into_iter()))
    }

    fn eval_ne<'b>(&'b self, values: &[Literal]) -> Result<Matches<'b>> {
        let target = self.target(values)?;
        Ok(Box::new(
            self.directory
                .iter_live()
                .map(|ptr| ptr.did)
                .filter(move |did| Some(*did) != target),
        ))
    }

    fn estimate(&self, op: &IndexOperator) -> Option<usize> {
        match op {
            IndexOperator::Comparison {
                op: ComparisonOp::Eq,
                ..
            } => Some(1),
            _ => None,
        }
    }
}
