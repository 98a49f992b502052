use bit_pattern::{TypeKind, TypeTable};
use compact_layout::{
    resolve, AggregateDescriptor, AggregateId, AggregateTable, Compactness, DiscriminantRegion,
    FieldDescriptor, FieldEncoding, FieldId, FieldType, PackedLayout, Planner, VariantDescriptor,
};

struct World {
    types: TypeTable,
    aggs: AggregateTable,
}

impl World {
    fn new() -> Self {
        Self {
            types: TypeTable::new(),
            aggs: AggregateTable::new(),
        }
    }

    fn prim(&mut self, kind: TypeKind) -> FieldType {
        FieldType::Prim(self.types.intern(kind))
    }

    fn plan(&self, root: AggregateId) -> PackedLayout {
        let classes = resolve(&self.aggs, root).unwrap();
        let mut planner = Planner::new(&self.types, &self.aggs, &classes);
        planner.layout_of(root).unwrap().clone()
    }
}

fn payload(agg: AggregateId, variant: u32) -> FieldId {
    FieldId {
        aggregate: agg,
        variant: Some(variant),
        field: 0,
    }
}

// Bool(bool) | SmallInt(i32) | Null, all squeezed: a 2-bit tag plus the
// widest payload, well under the 8 bytes a tagged i32 needs naively.
#[test]
fn squeezed_enum_shares_payload_bits() {
    let mut w = World::new();
    let b = w.prim(TypeKind::Bool);
    let i32_ = w.prim(TypeKind::Int { bytes: 4 });
    let e = w.aggs.register(
        AggregateDescriptor::new_enum(
            "Json",
            vec![
                VariantDescriptor::new("Bool", vec![FieldDescriptor::new("value", b)]),
                VariantDescriptor::new("SmallInt", vec![FieldDescriptor::new("value", i32_)]),
                VariantDescriptor::new("Null", vec![]),
            ],
        )
        .annotated(Compactness::Squeeze),
    );
    let layout = w.plan(e);
    assert_eq!(layout.tag_bits, 2);
    assert_eq!(layout.tag_span, 3);
    assert_eq!(layout.size_bytes, 5);
    assert_eq!(layout.align_bytes, 1);

    // Payloads of different variants share the bits after the tag.
    assert_eq!(layout.slot(payload(e, 0)).range.start_bit(), 2);
    assert_eq!(layout.slot(payload(e, 1)).range.start_bit(), 2);
    assert_eq!(layout.slot(payload(e, 1)).range.bit_width, 32);
}

#[test]
fn unannotated_enum_keeps_byte_granular_variants() {
    let mut w = World::new();
    let i32_ = w.prim(TypeKind::Int { bytes: 4 });
    let e = w.aggs.register(AggregateDescriptor::new_enum(
        "Plain",
        vec![
            VariantDescriptor::new("Value", vec![FieldDescriptor::new("value", i32_)]),
            VariantDescriptor::new("Empty", vec![]),
        ],
    ));
    let layout = w.plan(e);
    let slot = layout.slot(payload(e, 0));
    assert_eq!(slot.encoding, FieldEncoding::Direct);
    assert_eq!(slot.range.bit_offset, 0);
    // Tag byte, padding, then the aligned payload.
    assert_eq!(slot.range.byte_offset, 4);
    assert_eq!(layout.size_bytes, 8);
}

#[test]
fn pointer_niche_absorbs_the_tag() {
    let mut w = World::new();
    let ptr = w.prim(TypeKind::Pointer { bytes: 8, align: 8 });
    let e = w.aggs.register(
        AggregateDescriptor::new_enum(
            "MaybePtr",
            vec![
                VariantDescriptor::new("None", vec![]),
                VariantDescriptor::new("Some", vec![FieldDescriptor::new("ptr", ptr)]),
            ],
        )
        .annotated(Compactness::Squeeze),
    );
    let layout = w.plan(e);
    // Same size as the bare pointer; the tag rides in its invalid patterns.
    assert_eq!(layout.size_bytes, 8);
    assert_eq!(layout.tag_bits, 0);
    match &layout.discriminant {
        DiscriminantRegion::Niche {
            payload_variant,
            unit_patterns,
            ..
        } => {
            assert_eq!(*payload_variant, 1);
            assert_eq!(unit_patterns.as_slice(), &[(0, 0)]);
        }
        other => panic!("expected a niche discriminant, got {other:?}"),
    }
}

#[test]
fn misaligned_low_bits_name_several_unit_variants() {
    let mut w = World::new();
    let ptr = w.prim(TypeKind::Pointer { bytes: 8, align: 4 });
    let e = w.aggs.register(
        AggregateDescriptor::new_enum(
            "State",
            vec![
                VariantDescriptor::new("Idle", vec![]),
                VariantDescriptor::new("Busy", vec![FieldDescriptor::new("task", ptr)]),
                VariantDescriptor::new("Done", vec![]),
                VariantDescriptor::new("Failed", vec![]),
            ],
        )
        .annotated(Compactness::Squeeze),
    );
    let layout = w.plan(e);
    assert_eq!(layout.size_bytes, 8);
    match &layout.discriminant {
        DiscriminantRegion::Niche { unit_patterns, .. } => {
            // Null plus the misaligned residues 1 and 2.
            assert_eq!(unit_patterns.as_slice(), &[(0, 0), (2, 1), (3, 2)]);
        }
        other => panic!("expected a niche discriminant, got {other:?}"),
    }
}

#[test]
fn too_many_unit_variants_fall_back_to_a_dedicated_tag() {
    let mut w = World::new();
    let ptr = w.prim(TypeKind::Pointer { bytes: 8, align: 2 });
    let mut variants = vec![VariantDescriptor::new(
        "Some",
        vec![FieldDescriptor::new("ptr", ptr)],
    )];
    // A 2-aligned pointer has two niche patterns; three unit variants do
    // not fit.
    for name in ["A", "B", "C"] {
        variants.push(VariantDescriptor::new(name, vec![]));
    }
    let e = w.aggs.register(
        AggregateDescriptor::new_enum("Crowded", variants).annotated(Compactness::Squeeze),
    );
    let layout = w.plan(e);
    assert!(matches!(
        layout.discriminant,
        DiscriminantRegion::Dedicated { .. }
    ));
    assert_eq!(layout.tag_bits, 2);
}

#[test]
fn nested_enum_tags_fuse_into_one_discriminant() {
    let mut w = World::new();
    let b = w.prim(TypeKind::Bool);
    let inner = w.aggs.register(
        AggregateDescriptor::new_enum(
            "Inner",
            vec![
                VariantDescriptor::new("A", vec![FieldDescriptor::new("flag", b)]),
                VariantDescriptor::new("B", vec![]),
            ],
        )
        .annotated(Compactness::Squeeze),
    );
    let outer = w.aggs.register(
        AggregateDescriptor::new_enum(
            "Outer",
            vec![
                VariantDescriptor::new(
                    "Wrapped",
                    vec![FieldDescriptor::new("inner", FieldType::Aggregate(inner))],
                ),
                VariantDescriptor::new("Other", vec![]),
            ],
        )
        .annotated(Compactness::Squeeze),
    );
    let layout = w.plan(outer);
    // Combined values: Wrapped+A, Wrapped+B, Other. One shared 2-bit tag
    // instead of two separate ones.
    assert_eq!(layout.tag_span, 3);
    assert_eq!(layout.tag_bits, 2);
    assert_eq!(layout.size_bytes, 1);
    match &layout.discriminant {
        DiscriminantRegion::Dedicated { table, .. } => {
            let entry = table.entry(0).unwrap();
            assert_eq!(entry.span, 2);
            assert_eq!(entry.fused, Some(payload(outer, 0)));
            assert_eq!(table.entry(1).unwrap().base, 2);
        }
        other => panic!("expected a dedicated discriminant, got {other:?}"),
    }
    // The fused slot holds the inner payload only; the inner tag lives in
    // the combined value.
    let slot = layout.slot(payload(outer, 0));
    assert_eq!(slot.range.start_bit(), 2);
    assert_eq!(slot.range.bit_width, 1);
}

#[test]
fn uninhabited_variants_claim_no_tag_values() {
    let mut w = World::new();
    let never = w.prim(TypeKind::Uninhabited);
    let b = w.prim(TypeKind::Bool);
    let e = w.aggs.register(
        AggregateDescriptor::new_enum(
            "Partial",
            vec![
                VariantDescriptor::new("Never", vec![FieldDescriptor::new("no", never)]),
                VariantDescriptor::new("Yes", vec![FieldDescriptor::new("flag", b)]),
            ],
        )
        .annotated(Compactness::Squeeze),
    );
    let layout = w.plan(e);
    // One reachable variant: no tag bits at all, just the payload.
    assert_eq!(layout.tag_bits, 0);
    assert_eq!(layout.tag_span, 1);
    assert_eq!(layout.size_bytes, 1);
    assert!(!layout.uninhabited);
    assert_eq!(layout.slot(payload(e, 1)).range.bit_width, 1);
}

#[test]
fn fully_uninhabited_enums_are_zero_sized() {
    let mut w = World::new();
    let never = w.prim(TypeKind::Uninhabited);
    let e = w.aggs.register(
        AggregateDescriptor::new_enum(
            "Void",
            vec![VariantDescriptor::new(
                "Never",
                vec![FieldDescriptor::new("no", never)],
            )],
        )
        .annotated(Compactness::Squeeze),
    );
    let layout = w.plan(e);
    assert!(layout.uninhabited);
    assert_eq!(layout.size_bytes, 0);
    assert_eq!(layout.discriminant, DiscriminantRegion::None);
}
