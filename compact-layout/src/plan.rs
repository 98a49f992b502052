//! The packing planner.
//!
//! Consumes resolved classifications plus per-type representation facts and
//! produces a [`PackedLayout`]: a bit range per field, a discriminant
//! region for enums, and the aggregate's overall size and alignment.
//!
//! Placement rules:
//!
//! - `Embed` fields get distinct naturally aligned byte ranges in
//!   declaration order, exactly the naive layout. Their value bytes never
//!   host foreign bits.
//! - `Inline`/`Squeeze` primitives are packed to their representable bit
//!   width. Packed fields land first-fit in alignment padding left by the
//!   direct pass, then in appended tail bits; candidates are sorted by
//!   descending width with declaration order breaking ties, so output is
//!   deterministic.
//! - `Inline` aggregates (and any aggregate whose own layout is not fully
//!   compact) keep a byte-aligned interior so their sub-fields stay
//!   addressable. `Squeeze` aggregates with fully compact interiors are
//!   packed as raw bit images.
//! - Enum discriminants live in a dedicated range at bit zero, in the
//!   niche patterns of a packed pointer payload (Option-like shapes), or
//!   are fused with a nested compact enum's own discriminant through a
//!   [`DiscriminantOffsetTable`].

use std::collections::HashMap;

use bit_pattern::{bits_for, TypeKind, TypeTable};
use indexmap::IndexMap;

use crate::descriptor::{
    AggregateId, AggregateKind, AggregateTable, Compactness, FieldDescriptor, FieldId, FieldType,
};
use crate::error::LayoutError;
use crate::resolve::ClassificationTable;

/// A placed bit range: `bit_width` bits starting `bit_offset` bits into the
/// byte at `byte_offset`.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct BitRange {
    /// Containing byte offset of the first bit.
    pub byte_offset: u32,
    /// Bit offset within that byte, 0 to 7.
    pub bit_offset: u8,
    /// Width in bits. Zero for fields that store nothing.
    pub bit_width: u32,
}

impl BitRange {
    /// Builds a range from an absolute start bit.
    pub fn from_bits(start_bit: u32, bit_width: u32) -> Self {
        Self {
            byte_offset: start_bit / 8,
            bit_offset: (start_bit % 8) as u8,
            bit_width,
        }
    }

    /// Absolute offset of the first bit.
    pub fn start_bit(&self) -> u32 {
        self.byte_offset * 8 + self.bit_offset as u32
    }

    /// Absolute offset one past the last bit.
    pub fn end_bit(&self) -> u32 {
        self.start_bit() + self.bit_width
    }

    fn overlaps(&self, other: &BitRange) -> bool {
        self.bit_width != 0
            && other.bit_width != 0
            && self.start_bit() < other.end_bit()
            && other.start_bit() < self.end_bit()
    }
}

/// How a placed field's storage is accessed.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum FieldEncoding {
    /// Plain natural-representation bytes. Addressable.
    Direct,
    /// Compressed to representable width; reachable only through
    /// encode/decode. A compact slot as wide as the natural storage holds
    /// the natural bits verbatim (oversized and niche-carrying fields).
    Compact,
    /// Nested aggregate with its interior layout preserved byte-aligned.
    DirectAggregate(AggregateId),
    /// Nested aggregate stored as its packed bit image.
    CompactAggregate(AggregateId),
}

/// One field's placement.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct FieldSlot {
    /// Where the bits live.
    pub range: BitRange,
    /// How they are accessed.
    pub encoding: FieldEncoding,
}

/// One inhabited variant's share of a combined discriminant.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct DiscriminantEntry {
    /// Variant index.
    pub variant: u32,
    /// First combined value belonging to this variant.
    pub base: u128,
    /// Number of combined values: 1, or the nested enum's tag span when
    /// `fused` is set.
    pub span: u128,
    /// Nested compact enum field whose own discriminant is folded in.
    pub fused: Option<FieldId>,
}

/// Injective mapping between (variant, inner discriminant) pairs and
/// combined discriminant values.
///
/// Bases are allocated cumulatively over inhabited variants in declaration
/// order, so distinct pairs always combine to distinct values and `split`
/// inverts `combine` exactly.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct DiscriminantOffsetTable {
    entries: Vec<DiscriminantEntry>,
    total: u128,
}

impl DiscriminantOffsetTable {
    fn build(spans: Vec<(u32, u128, Option<FieldId>)>) -> Option<Self> {
        let mut entries = Vec::with_capacity(spans.len());
        let mut total = 0u128;
        for (variant, span, fused) in spans {
            entries.push(DiscriminantEntry {
                variant,
                base: total,
                span,
                fused,
            });
            total = total.checked_add(span)?;
        }
        Some(Self { entries, total })
    }

    /// Combined value for an inhabited variant and an inner discriminant
    /// below its span. `None` outside the mapping's domain.
    pub fn combine(&self, variant: u32, inner: u128) -> Option<u128> {
        let entry = self.entry(variant)?;
        (inner < entry.span).then(|| entry.base + inner)
    }

    /// Inverts [`combine`](Self::combine). `None` for values at or above
    /// the total span; those packed patterns are unreachable.
    pub fn split(&self, combined: u128) -> Option<(u32, u128)> {
        if combined >= self.total {
            return None;
        }
        let i = self
            .entries
            .partition_point(|e| e.base <= combined)
            .checked_sub(1)?;
        let entry = &self.entries[i];
        Some((entry.variant, combined - entry.base))
    }

    /// Total number of combined values.
    pub fn total_span(&self) -> u128 {
        self.total
    }

    /// Entry for an inhabited variant.
    pub fn entry(&self, variant: u32) -> Option<&DiscriminantEntry> {
        self.entries.iter().find(|e| e.variant == variant)
    }

    /// Entries in declaration order.
    pub fn entries(&self) -> &[DiscriminantEntry] {
        &self.entries
    }
}

/// Where an enum's variant tag is stored.
#[derive(Clone, PartialEq, Eq, Debug)]
pub enum DiscriminantRegion {
    /// Structs and uninhabited enums.
    None,
    /// A dedicated bit range at the start of the image holding the
    /// combined discriminant.
    Dedicated {
        /// The tag bits.
        range: BitRange,
        /// Combined-value mapping, trivial when nothing is fused.
        table: DiscriminantOffsetTable,
    },
    /// The tag hides in the invalid storage patterns of a packed
    /// pointer-like payload; payload-less variants encode as null or
    /// misaligned low-bit patterns.
    Niche {
        /// The pointer field carrying the niche.
        field: FieldId,
        /// Variant owning that field.
        payload_variant: u32,
        /// The shared storage range.
        range: BitRange,
        /// Storage pattern for each payload-less inhabited variant.
        unit_patterns: Vec<(u32, u128)>,
    },
}

/// A computed physical layout for one aggregate.
///
/// Immutable once published; safe to share read-only across threads.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct PackedLayout {
    /// The aggregate this layout describes.
    pub aggregate: AggregateId,
    /// Total size in bytes, padded to `align_bytes`.
    pub size_bytes: u32,
    /// Alignment in bytes. 1 when no field needs addressable storage.
    pub align_bytes: u32,
    /// Bits actually in use before byte and alignment rounding.
    pub packed_bits: u32,
    /// Width of the dedicated tag range. Zero for structs and niche tags.
    pub tag_bits: u32,
    /// Distinct reachable tag values, counting fused inner tags. 1 for
    /// structs.
    pub tag_span: u128,
    /// True when no value of the aggregate can be constructed.
    pub uninhabited: bool,
    /// Placement per field, in declaration order.
    pub fields: IndexMap<FieldId, FieldSlot>,
    /// Variant tag storage.
    pub discriminant: DiscriminantRegion,
}

impl PackedLayout {
    /// Placement of a field.
    ///
    /// # Panics
    ///
    /// Panics if the field does not belong to this aggregate.
    pub fn slot(&self, field: FieldId) -> &FieldSlot {
        match self.fields.get(&field) {
            Some(slot) => slot,
            None => panic!("field does not belong to this layout"),
        }
    }

    /// True when no slot needs addressable byte storage, making the whole
    /// image eligible for bit-granular nesting.
    pub fn fully_compact(&self) -> bool {
        self.fields.values().all(|s| {
            matches!(
                s.encoding,
                FieldEncoding::Compact | FieldEncoding::CompactAggregate(_)
            )
        })
    }
}

/// External policy knobs. Nothing here is baked into the algorithm.
#[derive(Clone, Copy, Debug)]
pub struct PlanOptions {
    /// Fields of types larger than this many bytes keep byte-granular
    /// storage even when classified compact. `None` means no limit.
    pub pack_size_limit: Option<u32>,
}

impl Default for PlanOptions {
    fn default() -> Self {
        Self {
            pack_size_limit: None,
        }
    }
}

/// Cache of published layouts, keyed by aggregate identity.
#[derive(Debug, Default)]
pub struct LayoutCache {
    layouts: HashMap<AggregateId, PackedLayout>,
}

impl LayoutCache {
    /// Returns a published layout.
    pub fn get(&self, id: AggregateId) -> Option<&PackedLayout> {
        self.layouts.get(&id)
    }
}

/// Plans layouts for an aggregate tree. Layout computation for one
/// aggregate is strictly sequential; published results are immutable.
pub struct Planner<'a> {
    types: &'a TypeTable,
    aggs: &'a AggregateTable,
    classes: &'a ClassificationTable,
    options: PlanOptions,
    cache: LayoutCache,
}

enum Disposition {
    Direct {
        size_bytes: u32,
        align_bytes: u32,
        encoding: FieldEncoding,
    },
    Bits {
        width: u32,
        encoding: FieldEncoding,
    },
}

impl<'a> Planner<'a> {
    /// Creates a planner with default options.
    pub fn new(
        types: &'a TypeTable,
        aggs: &'a AggregateTable,
        classes: &'a ClassificationTable,
    ) -> Self {
        Self::with_options(types, aggs, classes, PlanOptions::default())
    }

    /// Creates a planner with explicit policy options.
    pub fn with_options(
        types: &'a TypeTable,
        aggs: &'a AggregateTable,
        classes: &'a ClassificationTable,
        options: PlanOptions,
    ) -> Self {
        Self {
            types,
            aggs,
            classes,
            options,
            cache: LayoutCache::default(),
        }
    }

    /// Computes (or returns the cached) layout of an aggregate.
    pub fn layout_of(&mut self, id: AggregateId) -> Result<&PackedLayout, LayoutError> {
        self.ensure(id)?;
        Ok(self.cache.get(id).unwrap())
    }

    /// Finishes planning, yielding the immutable cache.
    pub fn finish(self) -> LayoutCache {
        self.cache
    }

    fn ensure(&mut self, id: AggregateId) -> Result<(), LayoutError> {
        if self.cache.layouts.contains_key(&id) {
            return Ok(());
        }
        let layout = match &self.aggs.get(id).kind {
            AggregateKind::Struct(_) => self.plan_struct(id)?,
            AggregateKind::Enum(_) => self.plan_enum(id)?,
        };
        verify(self.aggs, &layout)?;
        self.cache.layouts.insert(id, layout);
        Ok(())
    }

    fn over_limit(&self, size_bytes: u32) -> bool {
        size_bytes > 16
            || self
                .options
                .pack_size_limit
                .is_some_and(|limit| size_bytes > limit)
    }

    fn disposition(
        &mut self,
        fid: FieldId,
        field: &FieldDescriptor,
    ) -> Result<Disposition, LayoutError> {
        let class = self.classes.classification(fid);
        match (class, field.ty) {
            (Compactness::Embed, FieldType::Prim(t)) => Ok(Disposition::Direct {
                size_bytes: self.types.size_bytes(t),
                align_bytes: self.types.align_bytes(t),
                encoding: FieldEncoding::Direct,
            }),
            (Compactness::Embed, FieldType::Aggregate(a))
            | (Compactness::Inline, FieldType::Aggregate(a)) => {
                self.ensure(a)?;
                let inner = self.cache.get(a).unwrap();
                Ok(Disposition::Direct {
                    size_bytes: inner.size_bytes,
                    align_bytes: inner.align_bytes,
                    encoding: FieldEncoding::DirectAggregate(a),
                })
            }
            (Compactness::Inline, FieldType::Prim(t))
            | (Compactness::Squeeze, FieldType::Prim(t)) => {
                let size = self.types.size_bytes(t);
                if self.over_limit(size) {
                    return Ok(Disposition::Direct {
                        size_bytes: size,
                        align_bytes: 1,
                        encoding: FieldEncoding::Compact,
                    });
                }
                let width = match self.types.representable_bit_width(t) {
                    Ok(w) => w,
                    // Zero valid patterns contribute zero bits.
                    Err(_) => 0,
                };
                Ok(Disposition::Bits {
                    width,
                    encoding: FieldEncoding::Compact,
                })
            }
            (Compactness::Squeeze, FieldType::Aggregate(a)) => {
                self.ensure(a)?;
                let inner = self.cache.get(a).unwrap();
                if !inner.fully_compact() || self.over_limit(inner.size_bytes) {
                    Ok(Disposition::Direct {
                        size_bytes: inner.size_bytes,
                        align_bytes: inner.align_bytes,
                        encoding: FieldEncoding::DirectAggregate(a),
                    })
                } else {
                    let width = if inner.uninhabited {
                        0
                    } else {
                        inner.packed_bits
                    };
                    Ok(Disposition::Bits {
                        width,
                        encoding: FieldEncoding::CompactAggregate(a),
                    })
                }
            }
        }
    }

    fn field_inhabited(&mut self, field: &FieldDescriptor) -> Result<bool, LayoutError> {
        match field.ty {
            FieldType::Prim(t) => Ok(!self.types.inhabitants(t).is_empty()),
            FieldType::Aggregate(a) => {
                self.ensure(a)?;
                Ok(!self.cache.get(a).unwrap().uninhabited)
            }
        }
    }

    fn plan_struct(&mut self, id: AggregateId) -> Result<PackedLayout, LayoutError> {
        let fields: Vec<FieldDescriptor> = match &self.aggs.get(id).kind {
            AggregateKind::Struct(fields) => fields.clone(),
            _ => unreachable!(),
        };

        let mut scope = ScopeBuilder::new(0);
        let mut uninhabited = false;
        for (i, field) in fields.iter().enumerate() {
            let fid = FieldId {
                aggregate: id,
                variant: None,
                field: i as u32,
            };
            uninhabited |= !self.field_inhabited(field)?;
            let disposition = self.disposition(fid, field)?;
            scope.add(fid, disposition);
        }
        scope.place();

        let (size_bytes, align_bytes) = round_size(scope.end_bit, scope.max_align);
        Ok(PackedLayout {
            aggregate: id,
            size_bytes,
            align_bytes,
            packed_bits: scope.end_bit,
            tag_bits: 0,
            tag_span: 1,
            uninhabited,
            fields: scope.into_slots(),
            discriminant: DiscriminantRegion::None,
        })
    }

    fn plan_enum(&mut self, id: AggregateId) -> Result<PackedLayout, LayoutError> {
        let variants = match &self.aggs.get(id).kind {
            AggregateKind::Enum(variants) => variants.clone(),
            _ => unreachable!(),
        };
        let name = self.aggs.get(id).name.clone();

        // Per-variant dispositions and inhabitedness.
        let mut plans: Vec<(Vec<(FieldId, Disposition)>, bool)> = Vec::new();
        for (v, variant) in variants.iter().enumerate() {
            let mut inhabited = true;
            let mut dispositions = Vec::new();
            for (i, field) in variant.fields.iter().enumerate() {
                let fid = FieldId {
                    aggregate: id,
                    variant: Some(v as u32),
                    field: i as u32,
                };
                inhabited &= self.field_inhabited(field)?;
                dispositions.push((fid, self.disposition(fid, field)?));
            }
            plans.push((dispositions, inhabited));
        }

        // Tag spans: 1 per inhabited variant, or the nested enum's span
        // when its discriminant can be folded into ours.
        let mut spans = Vec::new();
        for (v, (dispositions, inhabited)) in plans.iter().enumerate() {
            if !inhabited {
                continue;
            }
            let fused = match dispositions.as_slice() {
                [(fid, Disposition::Bits { encoding: FieldEncoding::CompactAggregate(a), .. })] => {
                    let inner = self.cache.get(*a).unwrap();
                    (inner.tag_bits > 0
                        && matches!(inner.discriminant, DiscriminantRegion::Dedicated { .. }))
                    .then_some((*fid, inner.tag_span))
                }
                _ => None,
            };
            match fused {
                Some((fid, span)) => spans.push((v as u32, span, Some(fid))),
                None => spans.push((v as u32, 1, None)),
            }
        }

        let table =
            DiscriminantOffsetTable::build(spans).ok_or_else(|| LayoutError::AmbiguousPacking {
                aggregate: name.clone(),
                reason: "combined discriminant space exceeds 2^128 values".to_string(),
            })?;
        let total = table.total_span();
        let enum_uninhabited = total == 0;

        if let Some(layout) = self.try_niche(id, &variants, &plans, &table)? {
            return Ok(layout);
        }

        let tag_bits = if total <= 1 { 0 } else { bits_for(total) };
        let tag_range = BitRange::from_bits(0, tag_bits);

        let mut slots = IndexMap::new();
        let mut packed_bits = tag_bits;
        let mut max_align = 1;
        for (dispositions, inhabited) in plans {
            if !inhabited {
                for (fid, _) in dispositions {
                    slots.insert(
                        fid,
                        FieldSlot {
                            range: BitRange::from_bits(0, 0),
                            encoding: FieldEncoding::Compact,
                        },
                    );
                }
                continue;
            }
            let fused_here = dispositions.len() == 1
                && table
                    .entry(dispositions[0].0.variant.unwrap())
                    .and_then(|e| e.fused)
                    == Some(dispositions[0].0);
            if fused_here {
                let (fid, disposition) = &dispositions[0];
                let a = match disposition {
                    Disposition::Bits {
                        encoding: FieldEncoding::CompactAggregate(a),
                        ..
                    } => *a,
                    _ => unreachable!(),
                };
                let inner = self.cache.get(a).unwrap();
                let payload = inner.packed_bits - inner.tag_bits;
                slots.insert(
                    *fid,
                    FieldSlot {
                        range: BitRange::from_bits(tag_bits, payload),
                        encoding: FieldEncoding::CompactAggregate(a),
                    },
                );
                packed_bits = packed_bits.max(tag_bits + payload);
                continue;
            }
            let mut scope = ScopeBuilder::new(tag_bits);
            for (fid, disposition) in dispositions {
                scope.add(fid, disposition);
            }
            scope.place();
            packed_bits = packed_bits.max(scope.end_bit);
            max_align = max_align.max(scope.max_align);
            for (fid, slot) in scope.into_slots() {
                slots.insert(fid, slot);
            }
        }

        // Even a zero-width tag keeps its table so decoding can name the
        // single reachable variant.
        let discriminant = if enum_uninhabited {
            DiscriminantRegion::None
        } else {
            DiscriminantRegion::Dedicated {
                range: tag_range,
                table,
            }
        };
        let (size_bytes, align_bytes) = round_size(packed_bits, max_align);
        Ok(PackedLayout {
            aggregate: id,
            size_bytes,
            align_bytes,
            packed_bits,
            tag_bits,
            tag_span: total,
            uninhabited: enum_uninhabited,
            fields: slots,
            discriminant,
        })
    }

    /// Recognizes Option-like shapes: one variant with a single packed
    /// pointer payload, every other inhabited variant payload-less, and
    /// enough invalid pointer patterns to name them all.
    fn try_niche(
        &mut self,
        id: AggregateId,
        variants: &[crate::descriptor::VariantDescriptor],
        plans: &[(Vec<(FieldId, Disposition)>, bool)],
        table: &DiscriminantOffsetTable,
    ) -> Result<Option<PackedLayout>, LayoutError> {
        if table.entries().iter().any(|e| e.fused.is_some()) {
            return Ok(None);
        }
        let mut payload: Option<(u32, FieldId, u32)> = None;
        let mut units = Vec::new();
        for (v, (dispositions, inhabited)) in plans.iter().enumerate() {
            if !inhabited {
                continue;
            }
            match dispositions.as_slice() {
                [] => units.push(v as u32),
                [(fid, Disposition::Bits { encoding: FieldEncoding::Compact, .. })] => {
                    let ty = match variants[v].fields[0].ty {
                        FieldType::Prim(t) => t,
                        FieldType::Aggregate(_) => return Ok(None),
                    };
                    if !matches!(self.types.kind(ty), TypeKind::Pointer { .. })
                        || payload.is_some()
                    {
                        return Ok(None);
                    }
                    payload = Some((v as u32, *fid, self.types.size_bytes(ty) * 8));
                }
                _ => return Ok(None),
            }
        }
        let (payload_variant, field, storage_bits) = match payload {
            Some(p) => p,
            None => return Ok(None),
        };
        if units.is_empty() {
            return Ok(None);
        }
        let ty = match variants[payload_variant as usize].fields[0].ty {
            FieldType::Prim(t) => t,
            FieldType::Aggregate(_) => unreachable!(),
        };
        if (units.len() as u128) > self.types.niche_count(ty) {
            return Ok(None);
        }

        // The pointer keeps its natural storage width so the low bits
        // exist to hold the niche patterns.
        let range = BitRange::from_bits(0, storage_bits);
        let base = self.types.niche_base(ty);
        let unit_patterns = units
            .iter()
            .enumerate()
            .map(|(k, &v)| (v, base + k as u128))
            .collect();

        let mut slots = IndexMap::new();
        for (dispositions, _) in plans {
            for (fid, _) in dispositions {
                let slot = if *fid == field {
                    FieldSlot {
                        range,
                        encoding: FieldEncoding::Compact,
                    }
                } else {
                    FieldSlot {
                        range: BitRange::from_bits(0, 0),
                        encoding: FieldEncoding::Compact,
                    }
                };
                slots.insert(*fid, slot);
            }
        }

        let (size_bytes, align_bytes) = round_size(storage_bits, 1);
        Ok(Some(PackedLayout {
            aggregate: id,
            size_bytes,
            align_bytes,
            packed_bits: storage_bits,
            tag_bits: 0,
            tag_span: table.total_span(),
            uninhabited: false,
            fields: slots,
            discriminant: DiscriminantRegion::Niche {
                field,
                payload_variant,
                range,
                unit_patterns,
            },
        }))
    }
}

/// Places one scope's fields: structs, or a single enum variant's payload.
struct ScopeBuilder {
    base_bit: u32,
    cursor: u32,
    end_bit: u32,
    max_align: u32,
    free: Vec<(u32, u32)>,
    direct: Vec<(FieldId, u32, u32, FieldEncoding)>,
    bits: Vec<(usize, FieldId, u32, FieldEncoding)>,
    slots: IndexMap<FieldId, FieldSlot>,
    order: Vec<FieldId>,
}

impl ScopeBuilder {
    fn new(base_bit: u32) -> Self {
        Self {
            base_bit,
            cursor: base_bit,
            end_bit: base_bit,
            max_align: 1,
            free: Vec::new(),
            direct: Vec::new(),
            bits: Vec::new(),
            slots: IndexMap::new(),
            order: Vec::new(),
        }
    }

    fn add(&mut self, fid: FieldId, disposition: Disposition) {
        self.order.push(fid);
        match disposition {
            Disposition::Direct {
                size_bytes,
                align_bytes,
                encoding,
            } => self.direct.push((fid, size_bytes, align_bytes, encoding)),
            Disposition::Bits { width, encoding } => {
                let decl = self.order.len() - 1;
                self.bits.push((decl, fid, width, encoding));
            }
        }
    }

    fn place(&mut self) {
        // Direct pass: naturally aligned byte ranges in declaration order.
        // Alignment gaps become free regions for the bit pass.
        for &(fid, size_bytes, align_bytes, encoding) in &self.direct {
            let start = round_up(self.cursor, align_bytes * 8);
            if start > self.cursor {
                self.free.push((self.cursor, start));
            }
            self.slots.insert(
                fid,
                FieldSlot {
                    range: BitRange::from_bits(start, size_bytes * 8),
                    encoding,
                },
            );
            self.cursor = start + size_bytes * 8;
            self.max_align = self.max_align.max(align_bytes);
        }
        self.end_bit = self.cursor;

        // Bit pass: widest first, declaration order breaking ties (the
        // sort is stable). First fit into free regions, then the tail.
        self.bits.sort_by_key(|&(_, _, width, _)| core::cmp::Reverse(width));
        let mut tail = self.cursor;
        for &(_, fid, width, encoding) in &self.bits {
            if width == 0 {
                self.slots.insert(
                    fid,
                    FieldSlot {
                        range: BitRange::from_bits(0, 0),
                        encoding,
                    },
                );
                continue;
            }
            let start = match self.free.iter_mut().find(|r| r.1 - r.0 >= width) {
                Some(region) => {
                    let start = region.0;
                    region.0 += width;
                    start
                }
                None => {
                    let start = tail;
                    tail += width;
                    start
                }
            };
            self.slots.insert(
                fid,
                FieldSlot {
                    range: BitRange::from_bits(start, width),
                    encoding,
                },
            );
        }
        self.end_bit = self.end_bit.max(tail).max(self.base_bit);
    }

    fn into_slots(self) -> IndexMap<FieldId, FieldSlot> {
        // Declaration order, regardless of placement order.
        let mut ordered = IndexMap::with_capacity(self.slots.len());
        for fid in &self.order {
            ordered.insert(*fid, self.slots[fid]);
        }
        ordered
    }
}

fn round_up(value: u32, to: u32) -> u32 {
    debug_assert!(to > 0);
    value.div_ceil(to) * to
}

fn round_size(packed_bits: u32, max_align: u32) -> (u32, u32) {
    let bytes = packed_bits.div_ceil(8);
    (round_up(bytes, max_align), max_align)
}

/// Re-checks the published layout's invariants: addressable slots are
/// byte-aligned on their natural alignment, and no two simultaneously
/// live ranges overlap.
fn verify(aggs: &AggregateTable, layout: &PackedLayout) -> Result<(), LayoutError> {
    let fail = |reason: String| LayoutError::AmbiguousPacking {
        aggregate: aggs.get(layout.aggregate).name.clone(),
        reason,
    };

    for (fid, slot) in &layout.fields {
        let addressable = matches!(
            slot.encoding,
            FieldEncoding::Direct | FieldEncoding::DirectAggregate(_)
        );
        if addressable && slot.range.bit_offset != 0 {
            return Err(fail(format!(
                "addressable field `{}` is not byte-aligned",
                aggs.field_name(*fid),
            )));
        }
        if slot.range.end_bit() > layout.size_bytes * 8 {
            return Err(fail(format!(
                "field `{}` extends past the aggregate",
                aggs.field_name(*fid),
            )));
        }
    }

    let ids: Vec<FieldId> = layout.fields.keys().copied().collect();
    for (i, &a) in ids.iter().enumerate() {
        for &b in &ids[i + 1..] {
            // Fields of different variants are never simultaneously live.
            if a.variant != b.variant {
                continue;
            }
            if layout.fields[&a].range.overlaps(&layout.fields[&b].range) {
                return Err(fail(format!(
                    "fields `{}` and `{}` overlap",
                    aggs.field_name(a),
                    aggs.field_name(b),
                )));
            }
        }
    }

    if let DiscriminantRegion::Dedicated { range, .. } = &layout.discriminant {
        for (fid, slot) in &layout.fields {
            if slot.range.overlaps(range) {
                return Err(fail(format!(
                    "field `{}` overlaps the discriminant",
                    aggs.field_name(*fid),
                )));
            }
        }
    }
    Ok(())
}
