//! Reference-formation guard.
//!
//! Packed storage has no stable addresses for compact fields, so taking a
//! reference into one would be meaningless at best and unsound at worst.
//! The guard walks a place expression against the classification snapshot
//! and rejects any reference that would need an address a compact layout
//! does not provide. It consumes classifications only; it never looks at
//! the planned bit positions.

use crate::descriptor::{AggregateId, AggregateTable, Compactness, FieldId, FieldType};
use crate::error::GuardError;
use crate::resolve::ClassificationTable;

/// What a place expression is rooted in.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum PlaceBase {
    /// Packed storage of the named aggregate. Projections from here are
    /// subject to the guard.
    Storage(AggregateId),
    /// A decoded temporary. Plain owned value; references into it are
    /// always fine.
    Temporary,
}

/// A place expression: a base plus a chain of field projections, outermost
/// first.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct PlaceExpr {
    /// The root of the place.
    pub base: PlaceBase,
    /// Field projections applied to the base, in order.
    pub path: Vec<FieldId>,
}

impl PlaceExpr {
    /// A place rooted in packed storage.
    pub fn storage(aggregate: AggregateId, path: Vec<FieldId>) -> Self {
        Self {
            base: PlaceBase::Storage(aggregate),
            path,
        }
    }

    /// A place rooted in a decoded temporary.
    pub fn temporary(path: Vec<FieldId>) -> Self {
        Self {
            base: PlaceBase::Temporary,
            path,
        }
    }
}

/// Checks whether a reference may be formed to `place`.
///
/// Places rooted in a temporary always pass. For storage-rooted places the
/// final projected field must be `Embed`, and no field crossed on the way
/// there may be `Squeeze`. Crossing an `Inline` field into a deeper
/// sub-field is allowed: Inline makes the field itself unaddressable, but
/// an interior field that resolves to `Embed` keeps its byte-aligned slot
/// inside the field's preserved layout.
///
/// # Panics
///
/// Panics if the path does not form a chain of aggregate-typed projections
/// starting at the base aggregate, or if a projected field was never
/// resolved.
pub fn check_reference(
    aggs: &AggregateTable,
    classes: &ClassificationTable,
    place: &PlaceExpr,
) -> Result<(), GuardError> {
    let mut current = match place.base {
        PlaceBase::Temporary => return Ok(()),
        PlaceBase::Storage(id) => id,
    };

    let mut steps = place.path.iter().peekable();
    while let Some(&fid) = steps.next() {
        assert_eq!(fid.aggregate, current, "projection leaves the place chain");
        let class = classes.classification(fid);
        let last = steps.peek().is_none();

        let illegal = match class {
            Compactness::Embed => false,
            // Referencing the Inline field itself needs its address;
            // projecting through it does not.
            Compactness::Inline => last,
            Compactness::Squeeze => true,
        };
        if illegal {
            return Err(GuardError::IllegalReference {
                field: aggs.field_name(fid).to_string(),
            });
        }

        if !last {
            current = match aggs.get(current).fields(fid.variant)[fid.field as usize].ty {
                FieldType::Aggregate(inner) => inner,
                FieldType::Prim(_) => panic!("projection through a primitive field"),
            };
        }
    }
    Ok(())
}
