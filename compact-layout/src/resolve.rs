//! Annotation resolution.
//!
//! Resolves every field's effective compactness from the three-state
//! lattice. Annotations may sit at field, variant, or aggregate level; the
//! closest one to a field wins, and the effective classification of an
//! aggregate-typed field cascades into the nested aggregate's own fields
//! (unless something closer overrides it there). The walk is a single
//! top-down recursion carrying the inherited classification; the result is
//! one immutable snapshot.

use indexmap::IndexMap;

use crate::descriptor::{
    AggregateId, AggregateKind, AggregateTable, Compactness, FieldId, FieldType,
};
use crate::error::LayoutError;

/// Immutable classification snapshot, insertion-ordered for deterministic
/// downstream iteration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClassificationTable {
    map: IndexMap<FieldId, Compactness>,
}

impl ClassificationTable {
    /// Effective classification of a field.
    ///
    /// # Panics
    ///
    /// Panics if the field was not part of the resolved tree.
    pub fn classification(&self, field: FieldId) -> Compactness {
        match self.map.get(&field) {
            Some(&c) => c,
            None => panic!("field was not resolved"),
        }
    }

    /// Classification of a field, if it was part of the resolved tree.
    pub fn get(&self, field: FieldId) -> Option<Compactness> {
        self.map.get(&field).copied()
    }

    /// Iterates resolved fields in resolution order.
    pub fn iter(&self) -> impl Iterator<Item = (FieldId, Compactness)> + '_ {
        self.map.iter().map(|(&id, &c)| (id, c))
    }

    /// Number of resolved fields.
    pub fn len(&self) -> usize {
        self.map.len()
    }

    /// True when nothing was resolved (an empty aggregate).
    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }
}

/// Resolves the aggregate tree rooted at `root`.
///
/// Every reachable field ends up with exactly one classification,
/// defaulting to [`Compactness::Embed`]. A declaration site carrying more
/// than one explicit annotation is rejected.
pub fn resolve(
    aggs: &AggregateTable,
    root: AggregateId,
) -> Result<ClassificationTable, LayoutError> {
    let mut map = IndexMap::new();
    resolve_into(aggs, root, Compactness::Embed, &mut map)?;
    Ok(ClassificationTable { map })
}

fn resolve_into(
    aggs: &AggregateTable,
    id: AggregateId,
    inherited: Compactness,
    map: &mut IndexMap<FieldId, Compactness>,
) -> Result<(), LayoutError> {
    let agg = aggs.get(id);
    let agg_class = explicit(&agg.annotations, "aggregate", &agg.name)?.unwrap_or(inherited);

    match &agg.kind {
        AggregateKind::Struct(fields) => {
            for (i, field) in fields.iter().enumerate() {
                let fid = FieldId {
                    aggregate: id,
                    variant: None,
                    field: i as u32,
                };
                resolve_field(aggs, fid, &field.ty, &field.annotations, &field.name, agg_class, map)?;
            }
        }
        AggregateKind::Enum(variants) => {
            for (v, variant) in variants.iter().enumerate() {
                let var_class =
                    explicit(&variant.annotations, "variant", &variant.name)?.unwrap_or(agg_class);
                for (i, field) in variant.fields.iter().enumerate() {
                    let fid = FieldId {
                        aggregate: id,
                        variant: Some(v as u32),
                        field: i as u32,
                    };
                    resolve_field(
                        aggs,
                        fid,
                        &field.ty,
                        &field.annotations,
                        &field.name,
                        var_class,
                        map,
                    )?;
                }
            }
        }
    }
    Ok(())
}

fn resolve_field(
    aggs: &AggregateTable,
    fid: FieldId,
    ty: &FieldType,
    annotations: &[Compactness],
    name: &str,
    inherited: Compactness,
    map: &mut IndexMap<FieldId, Compactness>,
) -> Result<(), LayoutError> {
    let class = explicit(annotations, "field", name)?.unwrap_or(inherited);
    match map.insert(fid, class) {
        // A nested aggregate referenced from two places must resolve
        // identically; anything else would give one field two
        // classifications.
        Some(prev) if prev != class => {
            return Err(LayoutError::ConflictingAnnotation {
                site: format!("field `{name}`"),
            });
        }
        Some(_) => return Ok(()),
        None => {}
    }
    if let FieldType::Aggregate(inner) = *ty {
        resolve_into(aggs, inner, class, map)?;
    }
    Ok(())
}

fn explicit(
    annotations: &[Compactness],
    what: &str,
    name: &str,
) -> Result<Option<Compactness>, LayoutError> {
    match annotations {
        [] => Ok(None),
        [one] => Ok(Some(*one)),
        _ => Err(LayoutError::ConflictingAnnotation {
            site: format!("{what} `{name}`"),
        }),
    }
}

#[cfg(test)]
mod tests {
    use bit_pattern::{TypeKind, TypeTable};

    use super::*;
    use crate::descriptor::{AggregateDescriptor, FieldDescriptor, VariantDescriptor};

    fn bool_ty(types: &mut TypeTable) -> FieldType {
        FieldType::Prim(types.intern(TypeKind::Bool))
    }

    #[test]
    fn default_is_embed() {
        let mut types = TypeTable::new();
        let mut aggs = AggregateTable::new();
        let b = bool_ty(&mut types);
        let s = aggs.register(AggregateDescriptor::new_struct(
            "S",
            vec![FieldDescriptor::new("a", b)],
        ));
        let classes = resolve(&aggs, s).unwrap();
        let fid = FieldId {
            aggregate: s,
            variant: None,
            field: 0,
        };
        assert_eq!(classes.classification(fid), Compactness::Embed);
    }

    #[test]
    fn aggregate_annotation_cascades() {
        let mut types = TypeTable::new();
        let mut aggs = AggregateTable::new();
        let b = bool_ty(&mut types);
        let s = aggs.register(
            AggregateDescriptor::new_struct(
                "S",
                vec![FieldDescriptor::new("a", b), FieldDescriptor::new("b", b)],
            )
            .annotated(Compactness::Squeeze),
        );
        let classes = resolve(&aggs, s).unwrap();
        for (_, c) in classes.iter() {
            assert_eq!(c, Compactness::Squeeze);
        }
    }

    #[test]
    fn field_annotation_wins_over_container() {
        let mut types = TypeTable::new();
        let mut aggs = AggregateTable::new();
        let b = bool_ty(&mut types);
        let s = aggs.register(
            AggregateDescriptor::new_struct(
                "S",
                vec![
                    FieldDescriptor::new("a", b),
                    FieldDescriptor::new("b", b).annotated(Compactness::Embed),
                ],
            )
            .annotated(Compactness::Squeeze),
        );
        let classes = resolve(&aggs, s).unwrap();
        let a = FieldId {
            aggregate: s,
            variant: None,
            field: 0,
        };
        let bf = FieldId {
            aggregate: s,
            variant: None,
            field: 1,
        };
        assert_eq!(classes.classification(a), Compactness::Squeeze);
        assert_eq!(classes.classification(bf), Compactness::Embed);
    }

    #[test]
    fn variant_annotation_sits_between() {
        let mut types = TypeTable::new();
        let mut aggs = AggregateTable::new();
        let b = bool_ty(&mut types);
        let e = aggs.register(
            AggregateDescriptor::new_enum(
                "E",
                vec![
                    VariantDescriptor::new("A", vec![FieldDescriptor::new("x", b)])
                        .annotated(Compactness::Inline),
                    VariantDescriptor::new(
                        "B",
                        vec![FieldDescriptor::new("y", b).annotated(Compactness::Embed)],
                    )
                    .annotated(Compactness::Inline),
                ],
            )
            .annotated(Compactness::Squeeze),
        );
        let classes = resolve(&aggs, e).unwrap();
        let x = FieldId {
            aggregate: e,
            variant: Some(0),
            field: 0,
        };
        let y = FieldId {
            aggregate: e,
            variant: Some(1),
            field: 0,
        };
        assert_eq!(classes.classification(x), Compactness::Inline);
        assert_eq!(classes.classification(y), Compactness::Embed);
    }

    #[test]
    fn cascade_reaches_nested_aggregates() {
        let mut types = TypeTable::new();
        let mut aggs = AggregateTable::new();
        let b = bool_ty(&mut types);
        let inner = aggs.register(AggregateDescriptor::new_struct(
            "Inner",
            vec![FieldDescriptor::new("flag", b)],
        ));
        let outer = aggs.register(
            AggregateDescriptor::new_struct(
                "Outer",
                vec![FieldDescriptor::new("inner", FieldType::Aggregate(inner))],
            )
            .annotated(Compactness::Squeeze),
        );
        let classes = resolve(&aggs, outer).unwrap();
        let nested = FieldId {
            aggregate: inner,
            variant: None,
            field: 0,
        };
        assert_eq!(classes.classification(nested), Compactness::Squeeze);
    }

    #[test]
    fn duplicate_annotations_conflict() {
        let mut types = TypeTable::new();
        let mut aggs = AggregateTable::new();
        let b = bool_ty(&mut types);
        let s = aggs.register(AggregateDescriptor::new_struct(
            "S",
            vec![FieldDescriptor::new("a", b)
                .annotated(Compactness::Inline)
                .annotated(Compactness::Squeeze)],
        ));
        assert_eq!(
            resolve(&aggs, s),
            Err(LayoutError::ConflictingAnnotation {
                site: "field `a`".to_string(),
            }),
        );
    }
}
