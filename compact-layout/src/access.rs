//! The access transformer.
//!
//! For every compact field the planner placed, this module supplies the
//! encode (natural representation → packed bits) and decode (packed bits →
//! natural representation) procedures, and composes them into
//! whole-aggregate pack/unpack operations. Moving a value out of a compact
//! field runs decode; moving one in runs encode. These are the only access
//! operations — nothing here ever yields an address into packed storage.
//!
//! Encode rejects bit patterns that are not valid values of the field's
//! type. Decode is partial over the packed bit width: patterns no legal
//! value combination produces are classified unreachable rather than
//! handled.

use bit_pattern::{TypeId, TypeTable};
use byteorder::{ByteOrder, LittleEndian};

use crate::descriptor::{AggregateId, AggregateKind, AggregateTable, FieldId, FieldType};
use crate::error::{DecodeError, EncodeError};
use crate::plan::{
    BitRange, DiscriminantRegion, FieldEncoding, FieldSlot, LayoutCache, PackedLayout,
};

/// A value in its natural (addressable) representation.
#[derive(Clone, PartialEq, Eq, Debug)]
pub enum Value {
    /// A primitive of at most 16 bytes, as little-endian integer bits.
    Bits(u128),
    /// An opaque blob wider than 16 bytes.
    Bytes(Vec<u8>),
    /// A struct's field values in declaration order.
    Struct(Vec<Value>),
    /// An enum variant index and its payload values in declaration order.
    Variant(u32, Vec<Value>),
}

/// Encode/decode engine over published layouts.
pub struct Codec<'a> {
    types: &'a TypeTable,
    aggs: &'a AggregateTable,
    cache: &'a LayoutCache,
}

impl<'a> Codec<'a> {
    /// Creates a codec over a planner's published layouts.
    pub fn new(types: &'a TypeTable, aggs: &'a AggregateTable, cache: &'a LayoutCache) -> Self {
        Self { types, aggs, cache }
    }

    fn layout(&self, id: AggregateId) -> &PackedLayout {
        match self.cache.get(id) {
            Some(layout) => layout,
            None => panic!("layout was not planned"),
        }
    }

    fn field_type(&self, fid: FieldId) -> FieldType {
        self.aggs.get(fid.aggregate).fields(fid.variant)[fid.field as usize].ty
    }

    /// Encodes a whole value into its packed image.
    ///
    /// # Panics
    ///
    /// Panics if the value's shape does not match the aggregate or if the
    /// aggregate's layout was never planned.
    pub fn pack(&self, id: AggregateId, value: &Value) -> Result<Vec<u8>, EncodeError> {
        let layout = self.layout(id);
        let mut image = vec![0u8; layout.size_bytes as usize];
        match &self.aggs.get(id).kind {
            AggregateKind::Struct(_) => {
                let values = as_struct(value);
                assert_eq!(values.len(), layout.fields.len(), "value shape");
                for ((fid, slot), v) in layout.fields.iter().zip(values) {
                    self.encode_field(*fid, slot, v, &mut image)?;
                }
            }
            AggregateKind::Enum(_) => {
                let (variant, values) = as_variant(value);
                self.encode_variant(layout, variant, values, &mut image)?;
            }
        }
        Ok(image)
    }

    /// Decodes a packed image back into a value.
    ///
    /// # Panics
    ///
    /// Panics if the image length does not match the layout or if the
    /// layout was never planned.
    pub fn unpack(&self, id: AggregateId, image: &[u8]) -> Result<Value, DecodeError> {
        let layout = self.layout(id);
        assert_eq!(image.len(), layout.size_bytes as usize, "image size");
        match &self.aggs.get(id).kind {
            AggregateKind::Struct(_) => {
                let mut values = Vec::with_capacity(layout.fields.len());
                for (fid, slot) in &layout.fields {
                    values.push(self.decode_field(*fid, slot, image)?);
                }
                Ok(Value::Struct(values))
            }
            AggregateKind::Enum(_) => self.decode_variant(layout, image),
        }
    }

    /// Moves one field's value out of a packed image (runs decode).
    ///
    /// For enum fields the image's discriminant must select the field's
    /// variant.
    pub fn read_field(&self, id: AggregateId, image: &[u8], field: FieldId) -> Result<Value, DecodeError> {
        match self.unpack(id, image)? {
            Value::Struct(mut values) => {
                assert!(field.variant.is_none(), "field does not belong here");
                Ok(values.swap_remove(field.field as usize))
            }
            Value::Variant(active, mut values) => {
                if field.variant != Some(active) {
                    return Err(DecodeError::InactiveVariant {
                        field: self.aggs.field_name(field).to_string(),
                    });
                }
                Ok(values.swap_remove(field.field as usize))
            }
            _ => unreachable!(),
        }
    }

    /// Moves a value into one field of a packed image (runs encode).
    ///
    /// For enum fields the image's discriminant must already select the
    /// field's variant; changing variants goes through [`pack`](Self::pack).
    pub fn write_field(
        &self,
        id: AggregateId,
        image: &mut [u8],
        field: FieldId,
        value: &Value,
    ) -> Result<(), EncodeError> {
        let layout = self.layout(id);
        if let Some(v) = field.variant {
            let active = self
                .active_variant(layout, image)
                .ok_or(EncodeError::InactiveVariant {
                    field: self.aggs.field_name(field).to_string(),
                })?;
            if active != v {
                return Err(EncodeError::InactiveVariant {
                    field: self.aggs.field_name(field).to_string(),
                });
            }
            // A fused field carries part of the discriminant; re-encode it
            // through the variant path to keep the combined tag coherent.
            if let DiscriminantRegion::Dedicated { range, table } = &layout.discriminant {
                if let Some(entry) = table.entry(v) {
                    if entry.fused == Some(field) {
                        let slot = *layout.slot(field);
                        return self.encode_fused(*range, entry.base, &slot, value, image);
                    }
                }
            }
        }
        let slot = *layout.slot(field);
        self.encode_field(field, &slot, value, image)
    }

    fn active_variant(&self, layout: &PackedLayout, image: &[u8]) -> Option<u32> {
        match &layout.discriminant {
            DiscriminantRegion::None => None,
            DiscriminantRegion::Dedicated { range, table } => {
                let combined = read_bits(image, *range);
                table.split(combined).map(|(v, _)| v)
            }
            DiscriminantRegion::Niche {
                payload_variant,
                range,
                unit_patterns,
                ..
            } => {
                let raw = read_bits(image, *range);
                match unit_patterns.iter().find(|&&(_, p)| p == raw) {
                    Some(&(v, _)) => Some(v),
                    None => Some(*payload_variant),
                }
            }
        }
    }

    fn encode_variant(
        &self,
        layout: &PackedLayout,
        variant: u32,
        values: &[Value],
        image: &mut [u8],
    ) -> Result<(), EncodeError> {
        match &layout.discriminant {
            DiscriminantRegion::None => panic!("cannot construct an uninhabited enum"),
            DiscriminantRegion::Dedicated { range, table } => {
                let entry = match table.entry(variant) {
                    Some(entry) => entry,
                    None => panic!("cannot construct an uninhabited variant"),
                };
                if let Some(fused) = entry.fused {
                    let slot = *layout.slot(fused);
                    return self.encode_fused(*range, entry.base, &slot, &values[0], image);
                }
                write_bits(image, *range, entry.base);
                let fields: Vec<(FieldId, FieldSlot)> = layout
                    .fields
                    .iter()
                    .filter(|(fid, _)| fid.variant == Some(variant))
                    .map(|(fid, slot)| (*fid, *slot))
                    .collect();
                assert_eq!(fields.len(), values.len(), "value shape");
                for ((fid, slot), v) in fields.iter().zip(values) {
                    self.encode_field(*fid, slot, v, image)?;
                }
                Ok(())
            }
            DiscriminantRegion::Niche {
                field,
                payload_variant,
                range,
                unit_patterns,
            } => {
                if variant == *payload_variant {
                    let slot = *layout.slot(*field);
                    self.encode_field(*field, &slot, &values[0], image)
                } else {
                    let &(_, pattern) = unit_patterns
                        .iter()
                        .find(|&&(v, _)| v == variant)
                        .expect("cannot construct an uninhabited variant");
                    write_bits(image, *range, pattern);
                    Ok(())
                }
            }
        }
    }

    fn decode_variant(&self, layout: &PackedLayout, image: &[u8]) -> Result<Value, DecodeError> {
        match &layout.discriminant {
            DiscriminantRegion::None => Err(DecodeError::Unreachable),
            DiscriminantRegion::Dedicated { range, table } => {
                let combined = read_bits(image, *range);
                let (variant, inner_tag) =
                    table.split(combined).ok_or(DecodeError::Unreachable)?;
                let entry = table.entry(variant).unwrap();
                if let Some(fused) = entry.fused {
                    let slot = layout.slot(fused);
                    let value = self.decode_fused(inner_tag, slot, image)?;
                    return Ok(Value::Variant(variant, vec![value]));
                }
                let mut values = Vec::new();
                for (fid, slot) in &layout.fields {
                    if fid.variant == Some(variant) {
                        values.push(self.decode_field(*fid, slot, image)?);
                    }
                }
                Ok(Value::Variant(variant, values))
            }
            DiscriminantRegion::Niche {
                field,
                payload_variant,
                range,
                unit_patterns,
            } => {
                let raw = read_bits(image, *range);
                if let Some(&(variant, _)) = unit_patterns.iter().find(|&&(_, p)| p == raw) {
                    return Ok(Value::Variant(variant, vec![]));
                }
                let size = (range.bit_width / 8) as usize;
                let mut bytes = [0u8; 16];
                LittleEndian::write_u128(&mut bytes, raw);
                let ty = self.prim_type(*field);
                if !self.types.is_valid_bit_pattern(ty, &bytes[..size]) {
                    return Err(DecodeError::Unreachable);
                }
                Ok(Value::Variant(*payload_variant, vec![Value::Bits(raw)]))
            }
        }
    }

    fn encode_fused(
        &self,
        tag_range: BitRange,
        base: u128,
        slot: &FieldSlot,
        value: &Value,
        image: &mut [u8],
    ) -> Result<(), EncodeError> {
        let inner_id = match slot.encoding {
            FieldEncoding::CompactAggregate(a) => a,
            _ => unreachable!(),
        };
        let inner = self.layout(inner_id);
        let inner_image = self.pack(inner_id, value)?;
        let inner_tag = read_bits(&inner_image, BitRange::from_bits(0, inner.tag_bits));
        write_bits(image, tag_range, base + inner_tag);
        copy_bits(
            &inner_image,
            inner.tag_bits,
            image,
            slot.range.start_bit(),
            slot.range.bit_width,
        );
        Ok(())
    }

    fn decode_fused(
        &self,
        inner_tag: u128,
        slot: &FieldSlot,
        image: &[u8],
    ) -> Result<Value, DecodeError> {
        let inner_id = match slot.encoding {
            FieldEncoding::CompactAggregate(a) => a,
            _ => unreachable!(),
        };
        let inner = self.layout(inner_id);
        let mut inner_image = vec![0u8; inner.size_bytes as usize];
        write_bits(
            &mut inner_image,
            BitRange::from_bits(0, inner.tag_bits),
            inner_tag,
        );
        copy_bits(
            image,
            slot.range.start_bit(),
            &mut inner_image,
            inner.tag_bits,
            slot.range.bit_width,
        );
        self.unpack(inner_id, &inner_image)
    }

    fn prim_type(&self, fid: FieldId) -> TypeId {
        match self.field_type(fid) {
            FieldType::Prim(t) => t,
            FieldType::Aggregate(_) => panic!("expected a primitive field"),
        }
    }

    fn encode_field(
        &self,
        fid: FieldId,
        slot: &FieldSlot,
        value: &Value,
        image: &mut [u8],
    ) -> Result<(), EncodeError> {
        let invalid = || EncodeError::InvalidBitPattern {
            field: self.aggs.field_name(fid).to_string(),
        };
        match slot.encoding {
            FieldEncoding::Direct => {
                let ty = self.prim_type(fid);
                let size = self.types.size_bytes(ty) as usize;
                let offset = slot.range.byte_offset as usize;
                match value {
                    Value::Bits(v) => {
                        let mut bytes = [0u8; 16];
                        LittleEndian::write_u128(&mut bytes, *v);
                        image[offset..offset + size].copy_from_slice(&bytes[..size]);
                    }
                    Value::Bytes(bytes) => {
                        assert_eq!(bytes.len(), size, "value shape");
                        image[offset..offset + size].copy_from_slice(bytes);
                    }
                    _ => panic!("value shape"),
                }
                Ok(())
            }
            FieldEncoding::Compact => {
                let ty = self.prim_type(fid);
                let size = self.types.size_bytes(ty);
                if size > 16 {
                    // Oversized compact fields keep byte-granular storage.
                    let bytes = match value {
                        Value::Bytes(bytes) => bytes,
                        _ => panic!("value shape"),
                    };
                    assert_eq!(bytes.len(), size as usize, "value shape");
                    let offset = slot.range.byte_offset as usize;
                    image[offset..offset + size as usize].copy_from_slice(bytes);
                    return Ok(());
                }
                let v = as_bits(value);
                let mut bytes = [0u8; 16];
                LittleEndian::write_u128(&mut bytes, v);
                if !self.types.is_valid_bit_pattern(ty, &bytes[..size as usize]) {
                    return Err(invalid());
                }
                if slot.range.bit_width == size * 8 {
                    // Natural-width slot (niche carriers): verbatim bits.
                    write_bits(image, slot.range, v);
                } else {
                    let compact = self.types.compress(ty, v).ok_or_else(invalid)?;
                    write_bits(image, slot.range, compact);
                }
                Ok(())
            }
            FieldEncoding::DirectAggregate(a) => {
                let sub = self.pack(a, value)?;
                let offset = slot.range.byte_offset as usize;
                image[offset..offset + sub.len()].copy_from_slice(&sub);
                Ok(())
            }
            FieldEncoding::CompactAggregate(a) => {
                let sub = self.pack(a, value)?;
                copy_bits(&sub, 0, image, slot.range.start_bit(), slot.range.bit_width);
                Ok(())
            }
        }
    }

    fn decode_field(
        &self,
        fid: FieldId,
        slot: &FieldSlot,
        image: &[u8],
    ) -> Result<Value, DecodeError> {
        match slot.encoding {
            FieldEncoding::Direct => {
                let ty = self.prim_type(fid);
                let size = self.types.size_bytes(ty) as usize;
                let offset = slot.range.byte_offset as usize;
                if size > 16 {
                    Ok(Value::Bytes(image[offset..offset + size].to_vec()))
                } else if self.types.inhabitants(ty).is_empty() {
                    Err(DecodeError::Unreachable)
                } else {
                    let mut bytes = [0u8; 16];
                    bytes[..size].copy_from_slice(&image[offset..offset + size]);
                    Ok(Value::Bits(LittleEndian::read_u128(&bytes)))
                }
            }
            FieldEncoding::Compact => {
                let ty = self.prim_type(fid);
                let size = self.types.size_bytes(ty);
                if size > 16 {
                    let offset = slot.range.byte_offset as usize;
                    return Ok(Value::Bytes(image[offset..offset + size as usize].to_vec()));
                }
                if self.types.inhabitants(ty).is_empty() {
                    return Err(DecodeError::Unreachable);
                }
                let raw = read_bits(image, slot.range);
                if slot.range.bit_width == size * 8 {
                    Ok(Value::Bits(raw))
                } else {
                    Ok(Value::Bits(self.types.expand(ty, raw)))
                }
            }
            FieldEncoding::DirectAggregate(a) => {
                let inner = self.layout(a);
                let offset = slot.range.byte_offset as usize;
                self.unpack(a, &image[offset..offset + inner.size_bytes as usize])
            }
            FieldEncoding::CompactAggregate(a) => {
                let inner = self.layout(a);
                let mut inner_image = vec![0u8; inner.size_bytes as usize];
                copy_bits(
                    image,
                    slot.range.start_bit(),
                    &mut inner_image,
                    0,
                    slot.range.bit_width,
                );
                self.unpack(a, &inner_image)
            }
        }
    }
}

fn as_bits(value: &Value) -> u128 {
    match value {
        Value::Bits(v) => *v,
        _ => panic!("value shape"),
    }
}

fn as_struct(value: &Value) -> &[Value] {
    match value {
        Value::Struct(values) => values,
        _ => panic!("value shape"),
    }
}

fn as_variant(value: &Value) -> (u32, &[Value]) {
    match value {
        Value::Variant(v, values) => (*v, values),
        _ => panic!("value shape"),
    }
}

/// Reads `range.bit_width` bits out of an image, least significant first.
pub fn read_bits(image: &[u8], range: BitRange) -> u128 {
    debug_assert!(range.bit_width <= 128);
    let start = range.start_bit();
    let mut value = 0u128;
    for i in 0..range.bit_width {
        let bit = (start + i) as usize;
        if image[bit / 8] >> (bit % 8) & 1 != 0 {
            value |= 1 << i;
        }
    }
    value
}

/// Writes the low `range.bit_width` bits of `value` into an image.
pub fn write_bits(image: &mut [u8], range: BitRange, value: u128) {
    debug_assert!(range.bit_width <= 128);
    debug_assert!(range.bit_width == 128 || value >> range.bit_width == 0);
    let start = range.start_bit();
    for i in 0..range.bit_width {
        let bit = (start + i) as usize;
        let mask = 1u8 << (bit % 8);
        if value >> i & 1 != 0 {
            image[bit / 8] |= mask;
        } else {
            image[bit / 8] &= !mask;
        }
    }
}

/// Copies a bit run between images at arbitrary bit offsets.
pub fn copy_bits(src: &[u8], src_start: u32, dst: &mut [u8], dst_start: u32, width: u32) {
    for i in 0..width {
        let s = (src_start + i) as usize;
        let d = (dst_start + i) as usize;
        let mask = 1u8 << (d % 8);
        if src[s / 8] >> (s % 8) & 1 != 0 {
            dst[d / 8] |= mask;
        } else {
            dst[d / 8] &= !mask;
        }
    }
}
