//! Error taxonomy. Everything here models a compile-time diagnostic; none
//! of these conditions is recoverable or retried inside the engine.

use thiserror::Error;

/// Errors from annotation resolution and layout planning. Fatal to the
/// aggregate they name.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum LayoutError {
    /// A declaration site carries more than one explicit compactness
    /// classification.
    #[error("{site} carries more than one compactness annotation")]
    ConflictingAnnotation {
        /// Declaration site, e.g. ``field `flag` ``.
        site: String,
    },

    /// No injective packing exists for the requested annotations.
    #[error("no injective packing for `{aggregate}`: {reason}")]
    AmbiguousPacking {
        /// The aggregate that cannot be laid out.
        aggregate: String,
        /// What ran out: discriminant space, niche capacity, and so on.
        reason: String,
    },
}

/// Errors from the reference-formation guard. Reported at the offending
/// expression.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum GuardError {
    /// An address-valued reference into a compact field or into a
    /// sub-field forbidden by its classification.
    #[error("cannot take a reference into compact field `{field}`")]
    IllegalReference {
        /// The field whose classification forbids the reference.
        field: String,
    },
}

/// Errors from encoding a value into packed storage.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum EncodeError {
    /// The source bits are not a valid value of the field's type.
    #[error("bit pattern is not a valid value of field `{field}`")]
    InvalidBitPattern {
        /// The field being encoded.
        field: String,
    },

    /// A per-field write against an enum image whose discriminant selects
    /// a different variant.
    #[error("field `{field}` is not part of the active variant")]
    InactiveVariant {
        /// The requested field.
        field: String,
    },
}

/// Errors from decoding packed storage back to values.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DecodeError {
    /// The packed bits do not correspond to any legal value combination.
    /// Producing such an image is already undefined upstream; decode only
    /// classifies it.
    #[error("packed bit pattern is unreachable")]
    Unreachable,

    /// A per-field read against an enum image whose discriminant selects a
    /// different variant.
    #[error("field `{field}` is not part of the active variant")]
    InactiveVariant {
        /// The requested field.
        field: String,
    },
}
