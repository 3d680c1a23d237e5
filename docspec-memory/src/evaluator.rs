//! Query expression evaluation for in-memory document filtering.
//!
//! Filters follow document-store matching rules: dotted paths descend into embedded
//! documents and arrays, a condition on an array field matches when any element
//! matches, and an equality against null also matches a missing field.

use std::{cmp::Ordering, collections::HashMap};

use bson::{datetime::DateTime, oid::ObjectId, Bson, Document};

use docspec_core::{
    error::{DocumentStoreError, DocumentStoreResult},
    query::{Expr, FieldOp, QueryVisitor, UpdateOp},
};

static NULL: Bson = Bson::Null;

/// Type-erased, comparable representation of BSON values.
///
/// Integers and floats are normalized to `f64` so mixed numeric types compare.
#[derive(Debug)]
pub(crate) enum Comparable<'a> {
    Null,
    Bool(bool),
    Number(f64),
    ObjectId(ObjectId),
    DateTime(DateTime),
    String(&'a str),
    Array(Vec<Comparable<'a>>),
    Map(HashMap<&'a str, Comparable<'a>>),
}

impl<'a> Comparable<'a> {
    /// Position of the value's type in the cross-type sort order.
    fn rank(&self) -> u8 {
        match self {
            Comparable::Null => 0,
            Comparable::Number(_) => 1,
            Comparable::String(_) => 2,
            Comparable::Map(_) => 3,
            Comparable::Array(_) => 4,
            Comparable::ObjectId(_) => 5,
            Comparable::Bool(_) => 6,
            Comparable::DateTime(_) => 7,
        }
    }

    /// Total order used for sorting: same-type values by value, otherwise by type rank.
    pub(crate) fn sort_cmp(&self, other: &Self) -> Ordering {
        self.partial_cmp(other)
            .unwrap_or_else(|| self.rank().cmp(&other.rank()))
    }
}

impl<'a> From<&'a Bson> for Comparable<'a> {
    fn from(bson: &'a Bson) -> Self {
        match bson {
            Bson::Boolean(value) => Comparable::Bool(*value),
            Bson::Int32(value) => Comparable::Number(*value as f64),
            Bson::Int64(value) => Comparable::Number(*value as f64),
            Bson::Double(value) => Comparable::Number(*value),
            Bson::ObjectId(value) => Comparable::ObjectId(*value),
            Bson::DateTime(value) => Comparable::DateTime(*value),
            Bson::String(value) => Comparable::String(value),
            Bson::Array(items) => Comparable::Array(items.iter().map(Comparable::from).collect()),
            Bson::Document(document) => Comparable::Map(
                document
                    .iter()
                    .map(|(key, value)| (key.as_str(), Comparable::from(value)))
                    .collect(),
            ),
            _ => Comparable::Null,
        }
    }
}

impl<'a> PartialEq for Comparable<'a> {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Comparable::Null, Comparable::Null) => true,
            (Comparable::Bool(a), Comparable::Bool(b)) => a == b,
            (Comparable::Number(a), Comparable::Number(b)) => a == b,
            (Comparable::ObjectId(a), Comparable::ObjectId(b)) => a == b,
            (Comparable::DateTime(a), Comparable::DateTime(b)) => a == b,
            (Comparable::String(a), Comparable::String(b)) => a == b,
            (Comparable::Array(a), Comparable::Array(b)) => a == b,
            (Comparable::Map(a), Comparable::Map(b)) => a == b,
            _ => false,
        }
    }
}

impl<'a> PartialOrd for Comparable<'a> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        match (self, other) {
            (Comparable::Null, Comparable::Null) => Some(Ordering::Equal),
            (Comparable::Bool(a), Comparable::Bool(b)) => a.partial_cmp(b),
            (Comparable::Number(a), Comparable::Number(b)) => a.partial_cmp(b),
            (Comparable::ObjectId(a), Comparable::ObjectId(b)) => a.partial_cmp(b),
            (Comparable::DateTime(a), Comparable::DateTime(b)) => a.partial_cmp(b),
            (Comparable::String(a), Comparable::String(b)) => a.partial_cmp(b),
            _ => None,
        }
    }
}

/// Every value found at a dotted `path`. Arrays met along the way are descended
/// element by element.
pub(crate) fn lookup<'a>(document: &'a Document, path: &str) -> Vec<&'a Bson> {
    let (head, rest) = match path.split_once('.') {
        Some((head, rest)) => (head, Some(rest)),
        None => (path, None),
    };

    match (document.get(head), rest) {
        (None, _) => Vec::new(),
        (Some(value), None) => vec![value],
        (Some(Bson::Document(child)), Some(rest)) => lookup(child, rest),
        (Some(Bson::Array(items)), Some(rest)) => items
            .iter()
            .filter_map(Bson::as_document)
            .flat_map(|child| lookup(child, rest))
            .collect(),
        (Some(_), Some(_)) => Vec::new(),
    }
}

/// The value a document sorts by for `path`: the first value found, else null.
pub(crate) fn sort_key<'a>(document: &'a Document, path: &str) -> Comparable<'a> {
    lookup(document, path)
        .first()
        .map(|value| Comparable::from(*value))
        .unwrap_or(Comparable::Null)
}

pub(crate) struct DocumentEvaluator<'a> {
    document: &'a Document,
}

impl<'a> DocumentEvaluator<'a> {
    pub fn new(document: &'a Document) -> Self {
        Self { document }
    }

    pub fn evaluate(&mut self, expr: &Expr) -> DocumentStoreResult<bool> {
        self.visit_expr(expr)
    }

    /// Values a condition on `field` is tested against: each found value, plus the
    /// elements of found arrays. A missing field tests as null.
    fn candidates(&self, field: &str) -> Vec<Comparable<'a>> {
        let found = lookup(self.document, field);

        if found.is_empty() {
            return vec![Comparable::from(&NULL)];
        }

        let mut candidates = Vec::with_capacity(found.len());
        for value in found {
            if let Bson::Array(items) = value {
                candidates.extend(items.iter().map(Comparable::from));
            }
            candidates.push(Comparable::from(value));
        }

        candidates
    }

    fn any_equal(&self, field: &str, values: &[Comparable<'_>]) -> bool {
        any_equal(&self.candidates(field), values)
    }
}

fn any_equal<'x>(candidates: &[Comparable<'x>], values: &[Comparable<'x>]) -> bool {
    candidates
        .iter()
        .any(|candidate| values.iter().any(|value| candidate == value))
}

impl<'a> QueryVisitor for DocumentEvaluator<'a> {
    type Output = bool;
    type Error = DocumentStoreError;

    fn visit_and(&mut self, exprs: &[Expr]) -> Result<Self::Output, Self::Error> {
        for expr in exprs {
            if !self.visit_expr(expr)? {
                return Ok(false);
            }
        }

        Ok(true)
    }

    fn visit_or(&mut self, exprs: &[Expr]) -> Result<Self::Output, Self::Error> {
        for expr in exprs {
            if self.visit_expr(expr)? {
                return Ok(true);
            }
        }

        Ok(false)
    }

    fn visit_not(&mut self, expr: &Expr) -> Result<Self::Output, Self::Error> {
        Ok(!self.visit_expr(expr)?)
    }

    fn visit_exists(&mut self, field: &str, should_exist: bool) -> Result<Self::Output, Self::Error> {
        Ok(lookup(self.document, field).is_empty() != should_exist)
    }

    fn visit_field(&mut self, field: &str, op: &FieldOp, value: &Bson) -> Result<Self::Output, Self::Error> {
        let target = Comparable::from(value);

        Ok(match op {
            FieldOp::Eq => self.any_equal(field, std::slice::from_ref(&target)),
            FieldOp::Ne => !self.any_equal(field, std::slice::from_ref(&target)),
            FieldOp::Gt | FieldOp::Gte | FieldOp::Lt | FieldOp::Lte => {
                self.candidates(field).iter().any(|candidate| {
                    match candidate.partial_cmp(&target) {
                        Some(ordering) => match op {
                            FieldOp::Gt => ordering == Ordering::Greater,
                            FieldOp::Gte => ordering != Ordering::Less,
                            FieldOp::Lt => ordering == Ordering::Less,
                            _ => ordering != Ordering::Greater,
                        },
                        None => false,
                    }
                })
            }
            FieldOp::Contains => self.candidates(field).iter().any(|candidate| {
                match (candidate, &target) {
                    (Comparable::String(left), Comparable::String(right)) => left.contains(right),
                    (Comparable::Array(items), needle) => items.iter().any(|item| item == needle),
                    _ => false,
                }
            }),
            FieldOp::StartsWith => self.candidates(field).iter().any(|candidate| {
                match (candidate, &target) {
                    (Comparable::String(left), Comparable::String(right)) => left.starts_with(right),
                    _ => false,
                }
            }),
            FieldOp::AnyOf | FieldOp::NoneOf => {
                let matched = match target {
                    Comparable::Array(values) => self.any_equal(field, &values),
                    single => self.any_equal(field, std::slice::from_ref(&single)),
                };
                matched == matches!(op, FieldOp::AnyOf)
            }
        })
    }
}

/// Applies update operations to one document. Returns whether the document changed.
pub(crate) fn apply_update(document: &mut Document, ops: &[UpdateOp]) -> DocumentStoreResult<bool> {
    let before = document.clone();

    for op in ops {
        match op {
            UpdateOp::Set(path, value) => {
                with_parent(document, path, true, |parent, key| {
                    parent.insert(key, value.clone());
                    Ok(())
                })
            }
            UpdateOp::Unset(path) => with_parent(document, path, false, |parent, key| {
                parent.remove(key);
                Ok(())
            }),
            UpdateOp::Inc(path, delta) => with_parent(document, path, true, |parent, key| {
                let next = match (parent.get(key), delta) {
                    (None | Some(Bson::Null), delta) => delta.clone(),
                    (Some(Bson::Int32(a)), Bson::Int32(b)) => match a.checked_add(*b) {
                        Some(sum) => Bson::Int32(sum),
                        None => Bson::Int64(*a as i64 + *b as i64),
                    },
                    (Some(Bson::Int32(a)), Bson::Int64(b)) => Bson::Int64(checked_sum(path, *a as i64, *b)?),
                    (Some(Bson::Int64(a)), Bson::Int32(b)) => Bson::Int64(checked_sum(path, *a, *b as i64)?),
                    (Some(Bson::Int64(a)), Bson::Int64(b)) => Bson::Int64(checked_sum(path, *a, *b)?),
                    (Some(current), delta) => match (number(current), number(delta)) {
                        (Some(a), Some(b)) => Bson::Double(a + b),
                        _ => {
                            return Err(DocumentStoreError::Backend(format!(
                                "cannot increment non-numeric field '{path}'"
                            )));
                        }
                    },
                };
                parent.insert(key, next);
                Ok(())
            }),
            UpdateOp::Push(path, value) => with_parent(document, path, true, |parent, key| {
                match parent.get_mut(key) {
                    None | Some(Bson::Null) => {
                        parent.insert(key, Bson::Array(vec![value.clone()]));
                    }
                    Some(Bson::Array(items)) => items.push(value.clone()),
                    Some(_) => {
                        return Err(DocumentStoreError::Backend(format!(
                            "cannot push to non-array field '{path}'"
                        )));
                    }
                }
                Ok(())
            }),
            UpdateOp::Pull(path, value) => with_parent(document, path, false, |parent, key| {
                if let Some(Bson::Array(items)) = parent.get_mut(key) {
                    let target = Comparable::from(value);
                    items.retain(|item| Comparable::from(item) != target);
                }
                Ok(())
            }),
        }?;
    }

    Ok(*document != before)
}

fn checked_sum(path: &str, a: i64, b: i64) -> DocumentStoreResult<i64> {
    a.checked_add(b)
        .ok_or_else(|| DocumentStoreError::Backend(format!("incrementing '{path}' overflows a 64-bit integer")))
}

fn number(value: &Bson) -> Option<f64> {
    match value {
        Bson::Int32(value) => Some(*value as f64),
        Bson::Int64(value) => Some(*value as f64),
        Bson::Double(value) => Some(*value),
        _ => None,
    }
}

/// Runs `apply` on the document holding the last segment of `path`. With `create`,
/// missing intermediate documents are created; otherwise a missing parent is a no-op.
fn with_parent<F>(document: &mut Document, path: &str, create: bool, apply: F) -> DocumentStoreResult<()>
where
    F: FnOnce(&mut Document, &str) -> DocumentStoreResult<()>,
{
    match path.split_once('.') {
        None => apply(document, path),
        Some((head, rest)) => {
            if create && !matches!(document.get(head), Some(Bson::Document(_))) {
                document.insert(head, Document::new());
            }

            match document.get_mut(head) {
                Some(Bson::Document(child)) => with_parent(child, rest, create, apply),
                _ => Ok(()),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bson::doc;
    use docspec_core::query::{Filter, Update};

    fn matches(document: &Document, expr: Expr) -> bool {
        DocumentEvaluator::new(document).evaluate(&expr).unwrap()
    }

    #[test]
    fn dotted_paths_descend_into_documents_and_arrays() {
        let document = doc! {
            "owner": { "name": "ada" },
            "items": [{ "sku": "a1" }, { "sku": "b2" }],
        };

        assert!(matches(&document, Filter::eq("owner.name", "ada")));
        assert!(matches(&document, Filter::eq("items.sku", "b2")));
        assert!(!matches(&document, Filter::eq("items.sku", "c3")));
        assert!(matches(&document, Filter::exists("items.sku")));
        assert!(matches(&document, Filter::not_exists("owner.age")));
    }

    #[test]
    fn array_fields_match_any_element() {
        let id = ObjectId::new();
        let document = doc! { "refs": [ObjectId::new(), id], "pair": [id, "simple"] };

        assert!(matches(&document, Filter::eq("refs", id)));
        assert!(matches(&document, Filter::any_of("refs", [id])));
        assert!(matches(&document, Filter::any_of("pair", [id])));
        assert!(!matches(&document, Filter::none_of("refs", [id])));
    }

    #[test]
    fn null_equality_matches_missing_fields() {
        let document = doc! { "a": 1 };

        assert!(matches(&document, Filter::eq("b", Bson::Null)));
        assert!(matches(&document, Filter::ne("b", 1)));
        assert!(!matches(&document, Filter::gt("b", 0)));
    }

    #[test]
    fn numbers_compare_across_types() {
        let document = doc! { "n": 5_i32, "x": 2.5 };

        assert!(matches(&document, Filter::eq("n", 5_i64)));
        assert!(matches(&document, Filter::gte("n", 5.0)));
        assert!(matches(&document, Filter::lt("x", 3_i64)));
    }

    #[test]
    fn updates_apply_in_order() {
        let mut document = doc! { "n": 1_i64, "tags": ["a"] };
        let update = Update::new()
            .inc("n", 2_i64)
            .push("tags", "b")
            .pull("tags", "a")
            .set("meta.seen", true)
            .unset("missing");

        assert!(apply_update(&mut document, update.ops()).unwrap());
        assert_eq!(document, doc! { "n": 3_i64, "tags": ["b"], "meta": { "seen": true } });
        assert!(!apply_update(&mut document, Update::new().set("n", 3_i64).ops()).unwrap());
    }

    #[test]
    fn incrementing_text_fails() {
        let mut document = doc! { "name": "ada" };
        assert!(apply_update(&mut document, Update::new().inc("name", 1).ops()).is_err());
    }

    #[test]
    fn increments_widen_or_fail_on_overflow() {
        let mut document = doc! { "small": i32::MAX, "big": i64::MAX };

        assert!(apply_update(&mut document, Update::new().inc("small", 1).ops()).unwrap());
        assert_eq!(document.get("small"), Some(&Bson::Int64(i32::MAX as i64 + 1)));

        let before = document.clone();
        assert!(matches!(
            apply_update(&mut document, Update::new().inc("big", 1_i64).ops()),
            Err(DocumentStoreError::Backend(_)),
        ));
        assert_eq!(document.get("big"), before.get("big"));
    }
}
