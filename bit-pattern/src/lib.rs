//! Bit-level representation facts for primitive and opaque types.
//!
//! For each modeled type this crate answers: how many bytes does it occupy,
//! how is it aligned, which bit patterns are valid values, how many bits are
//! needed to distinguish all valid values, and how does a valid natural
//! representation convert to and from its canonical compact form.
//!
//! Representation facts are computed once per distinct type and cached by
//! identity in a [`TypeTable`]; they are immutable afterward.

#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]

use core::fmt::{self, Display, Formatter};

mod mask;
pub mod types;

pub use mask::{bits_for, low_mask};
pub use types::{Inhabitants, TypeId, TypeKind, TypeTable};

/// The error type returned when asking for the representable bit width of a
/// type with zero valid bit patterns.
///
/// This is a modeling error, not a runtime condition: callers that place
/// fields must special-case uninhabited types as contributing zero bits.
#[derive(Debug, PartialEq, Eq)]
pub struct UninhabitedType(pub(crate) ());

impl Display for UninhabitedType {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        write!(f, "type has no valid bit patterns")
    }
}

impl std::error::Error for UninhabitedType {}
