//! Translation of docspec filter and update expressions into MongoDB documents.

use bson::{doc, Bson, Document};

use docspec_core::{
    error::DocumentStoreError,
    query::{Expr, FieldOp, QueryVisitor, Update, UpdateOp},
};

/// Translates filter expressions into MongoDB query documents.
pub(crate) struct MongoQueryTranslator;

impl MongoQueryTranslator {
    /// Translates a filter; the match-all filter becomes the empty document.
    pub fn translate(expr: &Expr) -> Result<Document, DocumentStoreError> {
        MongoQueryTranslator.visit_expr(expr)
    }
}

impl QueryVisitor for MongoQueryTranslator {
    type Output = Document;
    type Error = DocumentStoreError;

    fn visit_and(&mut self, exprs: &[Expr]) -> Result<Self::Output, Self::Error> {
        if exprs.is_empty() {
            return Ok(doc! {});
        }

        Ok(doc! {
            "$and": exprs
                .iter()
                .map(|expr| self.visit_expr(expr))
                .collect::<Result<Vec<_>, _>>()?,
        })
    }

    fn visit_or(&mut self, exprs: &[Expr]) -> Result<Self::Output, Self::Error> {
        if exprs.is_empty() {
            return Ok(doc! { "$expr": false });
        }

        Ok(doc! {
            "$or": exprs
                .iter()
                .map(|expr| self.visit_expr(expr))
                .collect::<Result<Vec<_>, _>>()?,
        })
    }

    fn visit_not(&mut self, expr: &Expr) -> Result<Self::Output, Self::Error> {
        Ok(doc! {
            "$nor": [self.visit_expr(expr)?],
        })
    }

    fn visit_exists(&mut self, field: &str, should_exist: bool) -> Result<Self::Output, Self::Error> {
        Ok(doc! {
            field: { "$exists": should_exist },
        })
    }

    fn visit_field(&mut self, field: &str, op: &FieldOp, value: &Bson) -> Result<Self::Output, Self::Error> {
        Ok(doc! {
            field: match op {
                FieldOp::Eq => doc! { "$eq": value },
                FieldOp::Ne => doc! { "$ne": value },
                FieldOp::Gt => doc! { "$gt": value },
                FieldOp::Gte => doc! { "$gte": value },
                FieldOp::Lt => doc! { "$lt": value },
                FieldOp::Lte => doc! { "$lte": value },
                FieldOp::Contains => match value {
                    Bson::String(s) => doc! { "$regex": regex::escape(s) },
                    other => doc! { "$eq": other },
                },
                FieldOp::StartsWith => match value {
                    Bson::String(s) => doc! { "$regex": format!("^{}", regex::escape(s)) },
                    _ => return Err(DocumentStoreError::Backend("StartsWith operator requires a string value".to_string())),
                },
                FieldOp::AnyOf => match value {
                    Bson::Array(_) => doc! { "$in": value },
                    other => doc! { "$in": [other] },
                },
                FieldOp::NoneOf => match value {
                    Bson::Array(_) => doc! { "$nin": value },
                    other => doc! { "$nin": [other] },
                },
            }
        })
    }
}

/// Translates a bulk update into a MongoDB update document.
pub(crate) fn translate_update(update: &Update) -> Document {
    let mut translated = Document::new();

    for op in update.ops() {
        let (operator, field, value) = match op {
            UpdateOp::Set(field, value) => ("$set", field, value.clone()),
            UpdateOp::Unset(field) => ("$unset", field, Bson::String(String::new())),
            UpdateOp::Inc(field, value) => ("$inc", field, value.clone()),
            UpdateOp::Push(field, value) => ("$push", field, value.clone()),
            UpdateOp::Pull(field, value) => ("$pull", field, value.clone()),
        };

        match translated.get_mut(operator) {
            Some(Bson::Document(fields)) => {
                fields.insert(field.as_str(), value);
            }
            _ => {
                translated.insert(operator, doc! { field.as_str(): value });
            }
        }
    }

    translated
}

#[cfg(test)]
mod tests {
    use super::*;
    use bson::oid::ObjectId;
    use docspec_core::query::Filter;

    #[test]
    fn match_all_translates_to_an_empty_document() {
        assert_eq!(MongoQueryTranslator::translate(&Filter::all()).unwrap(), doc! {});
    }

    #[test]
    fn cascade_filters_use_in() {
        let id = ObjectId::new();

        assert_eq!(
            MongoQueryTranslator::translate(&Filter::any_of("owner", [id])).unwrap(),
            doc! { "owner": { "$in": [id] } },
        );
    }

    #[test]
    fn negation_uses_nor_and_patterns_are_escaped() {
        assert_eq!(
            MongoQueryTranslator::translate(&Filter::eq("a", 1).not()).unwrap(),
            doc! { "$nor": [{ "a": { "$eq": 1 } }] },
        );
        assert_eq!(
            MongoQueryTranslator::translate(&Filter::starts_with("name", "a.b")).unwrap(),
            doc! { "name": { "$regex": "^a\\.b" } },
        );
    }

    #[test]
    fn updates_group_by_operator() {
        let update = Update::new()
            .set("a", 1)
            .set("b", 2)
            .inc("n", 1)
            .unset("c");

        assert_eq!(
            translate_update(&update),
            doc! {
                "$set": { "a": 1, "b": 2 },
                "$inc": { "n": 1 },
                "$unset": { "c": "" },
            },
        );
    }
}
