//! Records: schema-typed value containers.
//!
//! A [`Record`] holds the values of one embedded or top-level object. Values are checked
//! against their field spec on every assignment, so a record never holds a value that
//! failed its field's rules. Fields that were never assigned report the spec's default.

use std::{collections::HashMap, sync::Arc};

use bson::Document as RawDocument;
use futures::future::{BoxFuture, FutureExt};
use tracing::{debug, warn};

use crate::{
    error::{DocumentStoreError, DocumentStoreResult, FieldValidationError, ValidationReport},
    registry::Registry,
    schema::{Schema, SchemaField, SUBTYPE_KEY},
    value::{JsonMap, Value},
};

/// Result of [`Record::populate`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PopulateOutcome {
    /// The path was followed and the references along it were loaded.
    Resolved,
    /// Nothing was loaded. Carries the reason.
    Skipped(String),
}

impl PopulateOutcome {
    pub fn is_resolved(&self) -> bool {
        matches!(self, PopulateOutcome::Resolved)
    }
}

#[derive(Debug, Clone)]
pub struct Record {
    schema: Arc<Schema>,
    values: HashMap<String, Value>,
}

impl Record {
    pub fn new(schema: &Arc<Schema>) -> Self {
        Self {
            schema: Arc::clone(schema),
            values: HashMap::new(),
        }
    }

    pub fn schema(&self) -> &Arc<Schema> {
        &self.schema
    }

    fn unknown(&self, name: &str) -> DocumentStoreError {
        DocumentStoreError::UnknownField {
            schema: self.schema.name().to_string(),
            field: name.to_string(),
        }
    }

    fn effective<'a>(&'a self, field: &'a SchemaField) -> &'a Value {
        self.values
            .get(field.name())
            .unwrap_or_else(|| field.spec().default())
    }

    /// Current value of `name`, without caching the default.
    pub fn value(&self, name: &str) -> DocumentStoreResult<&Value> {
        let field = self.schema.field(name).ok_or_else(|| self.unknown(name))?;
        Ok(self.effective(field))
    }

    /// Current value of `name`. An unassigned field caches a copy of its default, so
    /// in-place changes to a default list stay with this record.
    pub fn get(&mut self, name: &str) -> DocumentStoreResult<&Value> {
        self.get_mut(name).map(|value| &*value)
    }

    /// Mutable access to the value of `name`.
    ///
    /// Changes made through this reference are not checked until the record is validated.
    pub fn get_mut(&mut self, name: &str) -> DocumentStoreResult<&mut Value> {
        let schema = Arc::clone(&self.schema);
        let field = schema.field(name).ok_or_else(|| self.unknown(name))?;

        Ok(self
            .values
            .entry(name.to_string())
            .or_insert_with(|| field.spec().default().clone()))
    }

    /// Whether `name` holds an explicitly assigned value.
    pub fn is_set(&self, name: &str) -> bool {
        self.values.contains_key(name)
    }

    /// Assigns `value` to `name` after normalizing and validating it.
    ///
    /// # Errors
    ///
    /// [`DocumentStoreError::UnknownField`] for undeclared names and
    /// [`DocumentStoreError::FieldValidation`] when the value breaks a rule. A rejected
    /// value leaves the previous value in place.
    pub fn set(&mut self, name: &str, value: impl Into<Value>) -> DocumentStoreResult<()> {
        let schema = Arc::clone(&self.schema);
        let field = schema.field(name).ok_or_else(|| self.unknown(name))?;

        let value = field.spec().from_native(value.into());
        field.spec().validate(&value, name)?;
        self.values.insert(name.to_string(), value);

        Ok(())
    }

    /// Resets `name` to its default.
    pub fn unset(&mut self, name: &str) -> DocumentStoreResult<()> {
        if self.schema.field(name).is_none() {
            return Err(self.unknown(name));
        }
        self.values.remove(name);
        Ok(())
    }

    pub(crate) fn insert_unchecked(&mut self, name: &str, value: Value) {
        self.values.insert(name.to_string(), value);
    }

    /// Validates every field in declaration order, then the schema validators.
    ///
    /// # Errors
    ///
    /// The first failing field as [`DocumentStoreError::FieldValidation`], or
    /// [`DocumentStoreError::DocumentValidation`] with whatever the schema validators
    /// reported.
    pub fn validate(&self) -> DocumentStoreResult<()> {
        let mut errors = Vec::new();
        self.check_fields("", &mut errors, true);

        if let Some(err) = errors.into_iter().next() {
            return Err(err.into());
        }

        let mut report = ValidationReport::new();
        self.run_schema_validators(&mut report);

        match report.is_empty() {
            true => Ok(()),
            false => Err(DocumentStoreError::DocumentValidation(report)),
        }
    }

    /// Validates every field and collects all failures instead of stopping at the first.
    pub fn collect_errors(&self) -> ValidationReport {
        let mut errors = Vec::new();
        self.check_fields("", &mut errors, false);

        let mut report = ValidationReport::new();
        for err in errors {
            report.push(err.field, err.message);
        }

        if report.is_empty() {
            self.run_schema_validators(&mut report);
        }

        report
    }

    fn run_schema_validators(&self, report: &mut ValidationReport) {
        for validator in self.schema.validators() {
            validator.run(self, report);
        }
    }

    pub(crate) fn check_fields(
        &self,
        prefix: &str,
        out: &mut Vec<FieldValidationError>,
        fail_fast: bool,
    ) {
        for field in self.schema.fields() {
            let path = match prefix.is_empty() {
                true => field.name().to_string(),
                false => format!("{prefix}.{}", field.name()),
            };

            field.spec().check(self.effective(field), &path, out, fail_fast);

            if fail_fast && !out.is_empty() {
                return;
            }
        }
    }

    /// Storage representation. Transient fields are skipped and `omit_if_none` fields
    /// holding null are dropped.
    pub fn to_storage(&self) -> RawDocument {
        let mut document = RawDocument::new();

        for field in self.schema.fields() {
            if field.spec().is_transient() {
                continue;
            }

            let value = field.spec().to_storage(self.effective(field));
            if value == bson::Bson::Null && field.spec().omits_if_none() {
                continue;
            }

            document.insert(field.key(), value);
        }

        document
    }

    /// Builds a record from its storage representation.
    pub fn from_storage(schema: &Arc<Schema>, raw: &RawDocument) -> DocumentStoreResult<Self> {
        let mut record = Record::new(schema);
        record.inflate(raw)?;
        Ok(record)
    }

    /// Loads stored values into this record. Stored nulls leave the default in place.
    ///
    /// # Errors
    ///
    /// [`DocumentStoreError::InvalidDocument`] for malformed values, and for undeclared
    /// keys when the schema is strict. Otherwise undeclared keys are ignored.
    pub fn inflate(&mut self, raw: &RawDocument) -> DocumentStoreResult<()> {
        let schema = Arc::clone(&self.schema);

        for (key, raw_value) in raw {
            if key == SUBTYPE_KEY {
                continue;
            }

            let Some(field) = schema.field_by_key(key) else {
                if schema.is_strict() {
                    return Err(DocumentStoreError::InvalidDocument(format!(
                        "'{key}' is not declared by schema '{}'",
                        schema.name()
                    )));
                }
                debug!(schema = schema.name(), key = key.as_str(), "ignoring undeclared storage key");
                continue;
            };

            let value = field.spec().from_storage(raw_value)?;
            if !value.is_null() {
                self.values.insert(field.name().to_string(), value);
            }
        }

        Ok(())
    }

    /// Wire representation, keyed by each field's key.
    pub fn to_wire(&self) -> JsonMap {
        let mut wire = JsonMap::new();

        for field in self.schema.fields() {
            let value = field.spec().to_wire(self.effective(field));
            if value.is_null() && field.spec().omits_if_none() {
                continue;
            }
            wire.insert(field.key().to_string(), value);
        }

        wire
    }

    /// Applies a wire payload to this record.
    ///
    /// Non-null values are assigned through [`Record::set`]. An explicit null resets the
    /// field to its default. The update is all or nothing.
    ///
    /// # Errors
    ///
    /// A required field without a default fails when the payload sets it to null, or
    /// omits it while the record holds no value for it.
    pub fn apply_wire(&mut self, wire: &JsonMap) -> DocumentStoreResult<()> {
        let schema = Arc::clone(&self.schema);
        let mut staged = self.clone();

        for field in schema.fields() {
            let spec = field.spec();

            match wire.get(field.key()) {
                Some(raw) if !raw.is_null() => {
                    let value = spec.from_wire(raw)?;
                    staged.set(field.name(), value)?;
                }
                raw => {
                    let mandatory = spec.is_required() && spec.default().is_null();
                    let held = staged
                        .values
                        .get(field.name())
                        .is_some_and(|value| !value.is_null());

                    if mandatory && (raw.is_some() || !held) {
                        return Err(FieldValidationError::new(
                            field.name(),
                            &Value::Null,
                            "required field is missing",
                        )
                        .into());
                    }
                    if raw.is_some() {
                        staged.values.remove(field.name());
                    }
                }
            }
        }

        *self = staged;
        Ok(())
    }

    /// Builds a record from a wire payload.
    pub fn from_wire(schema: &Arc<Schema>, wire: &JsonMap) -> DocumentStoreResult<Self> {
        let mut record = Record::new(schema);
        record.apply_wire(wire)?;
        Ok(record)
    }

    /// Loads the documents referenced along a dotted `path`.
    ///
    /// The first segment names a field of this record. The remaining segments are
    /// followed inside every resolved target; list elements are each followed. This
    /// never fails: undeclared fields and store errors are logged and reported as
    /// [`PopulateOutcome::Skipped`], leaving the record unchanged.
    pub fn populate<'a>(
        &'a mut self,
        registry: &'a Registry,
        path: &'a str,
    ) -> BoxFuture<'a, PopulateOutcome> {
        async move {
            let (head, rest) = path.split_once('.').unwrap_or((path, ""));
            let schema = Arc::clone(&self.schema);

            let Some(field) = schema.field(head) else {
                warn!(schema = schema.name(), path, "populate path names an undeclared field");
                return PopulateOutcome::Skipped(format!(
                    "'{head}' is not declared by schema '{}'",
                    schema.name()
                ));
            };

            let current = self.effective(field).clone();
            match field.spec().populate(registry, current, rest).await {
                Ok(value) => {
                    self.values.insert(head.to_string(), value);
                    PopulateOutcome::Resolved
                }
                Err(err) => {
                    warn!(schema = schema.name(), path, error = %err, "failed to populate references");
                    PopulateOutcome::Skipped(err.to_string())
                }
            }
        }
        .boxed()
    }
}

impl PartialEq for Record {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.schema, &other.schema)
            && self
                .schema
                .fields()
                .iter()
                .all(|field| self.effective(field) == other.effective(field))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::field::FieldSpec;
    use bson::{doc, Bson};
    use serde_json::json;

    fn address() -> Arc<Schema> {
        Schema::builder("address")
            .field("street", FieldSpec::text().required().build().unwrap())
            .field("zip", FieldSpec::text().fixed_length(5).build().unwrap())
            .build()
            .unwrap()
    }

    fn person() -> Arc<Schema> {
        Schema::builder("person")
            .field("name", FieldSpec::text().required().build().unwrap())
            .field("age", FieldSpec::numeric().min(0).build().unwrap())
            .field("nick", FieldSpec::text().omit_if_none().build().unwrap())
            .field("scratch", FieldSpec::text().transient().build().unwrap())
            .field("tags", FieldSpec::list(FieldSpec::text().build().unwrap()).build().unwrap())
            .field("home", FieldSpec::nested(&address()).build().unwrap())
            .field("title", FieldSpec::text().key("t").build().unwrap())
            .build()
            .unwrap()
    }

    #[test]
    fn rejected_assignments_leave_the_previous_value() {
        let mut record = Record::new(&person());
        record.set("age", 30).unwrap();

        assert!(record.set("age", -1).is_err());
        assert_eq!(record.value("age").unwrap(), &Value::Int(30));
        assert!(matches!(
            record.set("missing", 1),
            Err(DocumentStoreError::UnknownField { .. }),
        ));
    }

    #[test]
    fn default_lists_are_cached_per_record() {
        let schema = person();
        let mut first = Record::new(&schema);
        let second = Record::new(&schema);

        first.get_mut("tags").unwrap().as_list_mut().unwrap().push("x".into());

        assert_eq!(first.value("tags").unwrap().len(), Some(1));
        assert_eq!(second.value("tags").unwrap().len(), Some(0));
    }

    #[test]
    fn validate_stops_at_the_first_failing_field() {
        let record = Record::new(&person());

        match record.validate() {
            Err(DocumentStoreError::FieldValidation(err)) => assert_eq!(err.field, "name"),
            other => panic!("expected a field validation error, got {other:?}"),
        }
    }

    #[test]
    fn collect_errors_descends_into_nested_records() {
        let schema = person();
        let mut home = Record::new(&address());
        home.insert_unchecked("zip", Value::from("123"));

        let mut record = Record::new(&schema);
        record.insert_unchecked("home", home.into());

        let report = record.collect_errors();
        let paths: Vec<_> = report.paths().collect();
        assert_eq!(paths, vec!["home.street", "home.zip", "name"]);
    }

    #[test]
    fn schema_validators_run_after_fields() {
        let schema = Schema::builder("range")
            .field("low", FieldSpec::numeric().build().unwrap())
            .field("high", FieldSpec::numeric().build().unwrap())
            .validator(|record, report| {
                let low = record.value("low").ok().and_then(Value::as_f64);
                let high = record.value("high").ok().and_then(Value::as_f64);
                if let (Some(low), Some(high)) = (low, high) {
                    if low > high {
                        report.push("low", "must not exceed high");
                    }
                }
            })
            .build()
            .unwrap();

        let mut record = Record::new(&schema);
        record.set("low", 5).unwrap();
        record.set("high", 1).unwrap();

        assert!(matches!(record.validate(), Err(DocumentStoreError::DocumentValidation(_))));
        assert_eq!(record.collect_errors().get("low"), Some(&["must not exceed high".to_string()][..]));
    }

    #[test]
    fn storage_skips_transient_and_omitted_fields() {
        let mut record = Record::new(&person());
        record.set("name", "Ada").unwrap();
        record.set("scratch", "temp").unwrap();
        record.set("title", "Dr").unwrap();

        let stored = record.to_storage();

        assert!(!stored.contains_key("scratch"));
        assert!(!stored.contains_key("nick"));
        assert_eq!(stored.get("t"), Some(&Bson::String("Dr".into())));
        assert_eq!(stored.get("age"), Some(&Bson::Null));

        let restored = Record::from_storage(record.schema(), &stored).unwrap();
        assert_eq!(restored.value("name").unwrap(), &Value::from("Ada"));
        assert_eq!(restored.value("scratch").unwrap(), &Value::Null);
    }

    #[test]
    fn undeclared_storage_keys_are_ignored_unless_strict() {
        let lenient = person();
        let raw = doc! { "name": "Ada", "legacy": 1, "_subtype": "x" };
        assert!(Record::from_storage(&lenient, &raw).is_ok());

        let strict = Schema::builder("strict")
            .field("name", FieldSpec::text().build().unwrap())
            .strict(true)
            .build()
            .unwrap();
        assert!(matches!(
            Record::from_storage(&strict, &raw),
            Err(DocumentStoreError::InvalidDocument(_)),
        ));
    }

    #[test]
    fn wire_payloads_require_mandatory_fields() {
        let schema = person();

        let payload = json!({ "age": 3 });
        assert!(Record::from_wire(&schema, payload.as_object().unwrap()).is_err());

        let payload = json!({ "name": "Ada", "home": { "street": "Main", "zip": "12345" }, "t": "Dr" });
        let record = Record::from_wire(&schema, payload.as_object().unwrap()).unwrap();
        assert_eq!(record.value("title").unwrap(), &Value::from("Dr"));

        let wire = record.to_wire();
        assert_eq!(wire.get("home"), Some(&json!({ "street": "Main", "zip": "12345" })));
        assert!(!wire.contains_key("nick"));
    }

    #[test]
    fn failed_wire_updates_leave_the_record_untouched() {
        let mut record = Record::new(&person());
        record.set("name", "Ada").unwrap();
        record.set("age", 3).unwrap();

        let payload = json!({ "age": 4, "name": null });
        assert!(record.apply_wire(payload.as_object().unwrap()).is_err());
        assert_eq!(record.value("age").unwrap(), &Value::Int(3));

        let payload = json!({ "age": null });
        record.apply_wire(payload.as_object().unwrap()).unwrap();
        assert_eq!(record.value("age").unwrap(), &Value::Null);
    }
}
