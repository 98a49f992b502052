//! Compile-time layout engine for compact aggregates.
//!
//! Fields opt into packing through a three-state compactness
//! classification. `Embed` fields keep ordinary addressable byte slots;
//! `Inline` and `Squeeze` fields give up their addresses and may be packed
//! down to the representable bit width of their type, sharing bytes with
//! padding, discriminant bits, and each other. The pipeline is:
//!
//! 1. Register types in a [`bit_pattern::TypeTable`] and aggregates in an
//!    [`AggregateTable`].
//! 2. [`resolve`] annotations into a [`ClassificationTable`].
//! 3. Plan layouts with a [`Planner`]; the finished [`LayoutCache`] maps
//!    each aggregate to its [`PackedLayout`].
//! 4. Move values in and out of packed images with a [`Codec`]. There is
//!    no other access path; [`check_reference`] rejects address formation
//!    into compact fields.

pub mod access;
pub mod descriptor;
pub mod error;
pub mod guard;
pub mod plan;
pub mod resolve;

pub use access::{Codec, Value};
pub use descriptor::{
    AggregateDescriptor, AggregateId, AggregateKind, AggregateTable, Compactness, FieldDescriptor,
    FieldId, FieldType, VariantDescriptor,
};
pub use error::{DecodeError, EncodeError, GuardError, LayoutError};
pub use guard::{check_reference, PlaceBase, PlaceExpr};
pub use plan::{
    BitRange, DiscriminantRegion, FieldEncoding, FieldSlot, LayoutCache, PackedLayout, PlanOptions,
    Planner,
};
pub use resolve::{resolve, ClassificationTable};
