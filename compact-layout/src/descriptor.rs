//! Aggregate, variant, and field descriptors.
//!
//! Descriptors mirror a resolved declaration: ordered fields, optional
//! annotations at field, variant, and aggregate level, and back-references
//! through id handles. They are registered once in an [`AggregateTable`]
//! and immutable afterward. Source order is preserved for diagnostics;
//! physical bit order is chosen later by the planner.

use core::fmt::{self, Display, Formatter};

use bit_pattern::TypeId;

/// Compactness classification of a field.
///
/// The lattice is closed and mutually exclusive: a resolved field carries
/// exactly one of these.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub enum Compactness {
    /// Default. Independently addressable; never overlaps another `Embed`
    /// field's bytes.
    Embed,
    /// The field itself cannot be referenced; its sub-fields stay
    /// addressable (and addressable once moved out).
    Inline,
    /// Neither the field nor any transitive sub-field can be referenced;
    /// maximal packing eligibility.
    Squeeze,
}

impl Display for Compactness {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        f.write_str(match self {
            Compactness::Embed => "embed",
            Compactness::Inline => "inline",
            Compactness::Squeeze => "squeeze",
        })
    }
}

/// The declared type of a field: a modeled primitive or a nested aggregate.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub enum FieldType {
    /// A primitive or opaque type from the bit-pattern model.
    Prim(TypeId),
    /// A nested aggregate registered in the same table.
    Aggregate(AggregateId),
}

/// Handle to a registered aggregate.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct AggregateId(pub(crate) u32);

impl AggregateId {
    /// Raw index, for debugging and stable map keys.
    #[inline]
    pub fn as_u32(self) -> u32 {
        self.0
    }
}

/// Identifies one field of one aggregate (optionally within a variant).
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct FieldId {
    /// The containing aggregate.
    pub aggregate: AggregateId,
    /// The containing variant index, for enum fields.
    pub variant: Option<u32>,
    /// Declaration index within the struct or variant.
    pub field: u32,
}

/// One declared field.
#[derive(Clone, Debug)]
pub struct FieldDescriptor {
    /// Field name, for diagnostics.
    pub name: String,
    /// Declared type.
    pub ty: FieldType,
    /// Explicit annotations as written. More than one is a conflict the
    /// resolver rejects.
    pub annotations: Vec<Compactness>,
}

impl FieldDescriptor {
    /// An unannotated field.
    pub fn new(name: impl Into<String>, ty: FieldType) -> Self {
        Self {
            name: name.into(),
            ty,
            annotations: Vec::new(),
        }
    }

    /// Adds an explicit annotation.
    pub fn annotated(mut self, c: Compactness) -> Self {
        self.annotations.push(c);
        self
    }
}

/// One declared enum variant.
#[derive(Clone, Debug)]
pub struct VariantDescriptor {
    /// Variant name, for diagnostics.
    pub name: String,
    /// Explicit variant-level annotations.
    pub annotations: Vec<Compactness>,
    /// Payload fields in declaration order.
    pub fields: Vec<FieldDescriptor>,
}

impl VariantDescriptor {
    /// An unannotated variant.
    pub fn new(name: impl Into<String>, fields: Vec<FieldDescriptor>) -> Self {
        Self {
            name: name.into(),
            annotations: Vec::new(),
            fields,
        }
    }

    /// Adds an explicit variant-level annotation.
    pub fn annotated(mut self, c: Compactness) -> Self {
        self.annotations.push(c);
        self
    }
}

/// Struct or enum body.
#[derive(Clone, Debug)]
pub enum AggregateKind {
    /// A struct with ordered fields.
    Struct(Vec<FieldDescriptor>),
    /// An enum with ordered variants.
    Enum(Vec<VariantDescriptor>),
}

/// One declared aggregate.
#[derive(Clone, Debug)]
pub struct AggregateDescriptor {
    /// Aggregate name, for diagnostics.
    pub name: String,
    /// Explicit aggregate-level annotations.
    pub annotations: Vec<Compactness>,
    /// The body.
    pub kind: AggregateKind,
}

impl AggregateDescriptor {
    /// An unannotated struct.
    pub fn new_struct(name: impl Into<String>, fields: Vec<FieldDescriptor>) -> Self {
        Self {
            name: name.into(),
            annotations: Vec::new(),
            kind: AggregateKind::Struct(fields),
        }
    }

    /// An unannotated enum.
    pub fn new_enum(name: impl Into<String>, variants: Vec<VariantDescriptor>) -> Self {
        Self {
            name: name.into(),
            annotations: Vec::new(),
            kind: AggregateKind::Enum(variants),
        }
    }

    /// Adds an explicit aggregate-level annotation.
    pub fn annotated(mut self, c: Compactness) -> Self {
        self.annotations.push(c);
        self
    }

    /// The fields of the struct body or of one variant.
    ///
    /// # Panics
    ///
    /// Panics if `variant` does not match the body shape.
    pub fn fields(&self, variant: Option<u32>) -> &[FieldDescriptor] {
        match (&self.kind, variant) {
            (AggregateKind::Struct(fields), None) => fields,
            (AggregateKind::Enum(variants), Some(v)) => &variants[v as usize].fields,
            _ => panic!("variant selector does not match aggregate shape"),
        }
    }
}

/// Arena owning all registered aggregates.
#[derive(Debug, Default)]
pub struct AggregateTable {
    aggregates: Vec<AggregateDescriptor>,
}

impl AggregateTable {
    /// Creates an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers an aggregate, returning its handle. Nested aggregates must
    /// be registered before the aggregates that use them as field types.
    pub fn register(&mut self, desc: AggregateDescriptor) -> AggregateId {
        let id = AggregateId(self.aggregates.len() as u32);
        self.aggregates.push(desc);
        id
    }

    /// Returns the descriptor behind a handle.
    pub fn get(&self, id: AggregateId) -> &AggregateDescriptor {
        &self.aggregates[id.0 as usize]
    }

    /// Name of a field, for diagnostics.
    pub fn field_name(&self, id: FieldId) -> &str {
        &self.get(id.aggregate).fields(id.variant)[id.field as usize].name
    }
}
