//! Running numbers: named counters stored in the `_number-center` collection.
//!
//! Each counter is a document holding the next value to hand out. A
//! [`RunningNumberPolicy`] decides the floor a counter jumps to (for example the
//! first number of the current month) and how the number is rendered.
//!
//! Counters are read and written with two separate round trips, so two processes
//! drawing from the same counter at once can receive the same number.
//!
//! # Example
//!
//! ```ignore
//! use docspec::sequence::{DailyPolicy, RunningNumberCenter};
//!
//! let center = RunningNumberCenter::new()?.with_policy("batch", DailyPolicy::new("B"));
//! let registry = Registry::builder()
//!     .connection("default", InMemoryStore::new())
//!     .register(center.schema())?
//!     .build()
//!     .await?;
//!
//! let number = center.new_number(&registry, "batch").await?; // "B202610190000"
//! ```

use std::{collections::HashMap, fmt::Debug, sync::Arc};

use chrono::{DateTime, Datelike, Utc};
use tracing::debug;

use docspec_core::{
    document::Document,
    error::{DocumentStoreError, DocumentStoreResult},
    field::FieldSpec,
    query::{Filter, IndexSpec, Query},
    registry::Registry,
    schema::Schema,
    value::Value,
};

/// Collection holding the counters.
pub const NUMBER_CENTER_COLLECTION: &str = "_number-center";

/// Decides the floor and rendering of numbers drawn from one counter.
pub trait RunningNumberPolicy: Send + Sync + Debug {
    /// Smallest number the counter may hand out at `now`.
    fn floor(&self, _now: DateTime<Utc>) -> i64 {
        0
    }

    fn format(&self, number: i64) -> String {
        number.to_string()
    }
}

/// Hands out 1, 2, 3, ...
#[derive(Debug, Clone, Default)]
pub struct Sequential;

impl RunningNumberPolicy for Sequential {}

/// Numbers of the form `YYYYMM####`, restarting every month.
#[derive(Debug, Clone, Default)]
pub struct MonthlyPolicy {
    pub prefix: Option<String>,
}

impl MonthlyPolicy {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self { prefix: Some(prefix.into()) }
    }
}

impl RunningNumberPolicy for MonthlyPolicy {
    fn floor(&self, now: DateTime<Utc>) -> i64 {
        (now.year() as i64 * 100 + now.month() as i64) * 10_000
    }

    fn format(&self, number: i64) -> String {
        prefixed(self.prefix.as_deref(), number)
    }
}

/// Numbers of the form `YYYYMMDD####`, restarting every day.
#[derive(Debug, Clone, Default)]
pub struct DailyPolicy {
    pub prefix: Option<String>,
}

impl DailyPolicy {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self { prefix: Some(prefix.into()) }
    }
}

impl RunningNumberPolicy for DailyPolicy {
    fn floor(&self, now: DateTime<Utc>) -> i64 {
        (now.year() as i64 * 10_000 + now.month() as i64 * 100 + now.day() as i64) * 10_000
    }

    fn format(&self, number: i64) -> String {
        prefixed(self.prefix.as_deref(), number)
    }
}

fn prefixed(prefix: Option<&str>, number: i64) -> String {
    match prefix {
        Some(prefix) => format!("{prefix}{number}"),
        None => number.to_string(),
    }
}

/// Maps counter names to their policies.
#[derive(Debug)]
pub struct RunningNumberCenter {
    schema: Arc<Schema>,
    policies: HashMap<String, Box<dyn RunningNumberPolicy>>,
}

impl RunningNumberCenter {
    pub fn new() -> DocumentStoreResult<Self> {
        let schema = Schema::document("running_number")
            .collection(NUMBER_CENTER_COLLECTION)
            .field("name", FieldSpec::text().required().build()?)
            .field("next_value", FieldSpec::numeric().default(1).build()?)
            .index(IndexSpec::on("name").unique(true))
            .build()?;

        Ok(Self {
            schema,
            policies: HashMap::new(),
        })
    }

    /// The counter schema; register it before drawing numbers.
    pub fn schema(&self) -> &Arc<Schema> {
        &self.schema
    }

    pub fn with_policy(mut self, key: impl Into<String>, policy: impl RunningNumberPolicy + 'static) -> Self {
        self.register_policy(key, policy);
        self
    }

    pub fn register_policy(&mut self, key: impl Into<String>, policy: impl RunningNumberPolicy + 'static) {
        self.policies.insert(key.into(), Box::new(policy));
    }

    /// Draws the next number of counter `key`.
    ///
    /// # Errors
    ///
    /// [`DocumentStoreError::Definition`] when no policy is registered under `key`.
    pub async fn new_number(&self, registry: &Registry, key: &str) -> DocumentStoreResult<String> {
        self.new_number_at(registry, key, Utc::now()).await
    }

    /// Draws the next number of counter `key` as if the current time were `now`.
    pub async fn new_number_at(&self, registry: &Registry, key: &str, now: DateTime<Utc>) -> DocumentStoreResult<String> {
        let policy = self.policies.get(key).ok_or_else(|| {
            DocumentStoreError::Definition(format!("'{key}' is not a registered running number policy"))
        })?;

        let query = Query::builder()
            .filter(Filter::eq("name", key))
            .limit(1)
            .build();
        let mut counter = match registry.find(NUMBER_CENTER_COLLECTION, query)?.next().await? {
            Some(counter) => counter,
            None => {
                let mut counter = Document::new(&self.schema)?;
                counter.set("name", key)?;
                counter.save(registry).await?;
                debug!(counter = key, "created running number counter");
                counter
            }
        };

        let stored = counter.value("next_value")?;
        let next = stored
            .as_i64()
            .or_else(|| stored.as_f64().map(|value| value as i64))
            .unwrap_or(1)
            .max(policy.floor(now));

        counter.set("next_value", Value::Int(next + 1))?;
        counter.save(registry).await?;

        Ok(policy.format(next))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn floors_follow_the_calendar() {
        let now = Utc.with_ymd_and_hms(2026, 10, 19, 12, 0, 0).unwrap();

        assert_eq!(Sequential.floor(now), 0);
        assert_eq!(MonthlyPolicy::default().floor(now), 202_610_0000);
        assert_eq!(DailyPolicy::new("B").floor(now), 20_261_019_0000);
        assert_eq!(DailyPolicy::new("B").format(20_261_019_0000), "B202610190000");
    }
}
