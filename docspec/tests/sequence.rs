use chrono::{TimeZone, Utc};
use docspec::{
    memory::InMemoryStore,
    prelude::*,
    sequence::{DailyPolicy, MonthlyPolicy, RunningNumberCenter, Sequential, NUMBER_CENTER_COLLECTION},
};

async fn setup() -> (RunningNumberCenter, Registry) {
    let center = RunningNumberCenter::new()
        .unwrap()
        .with_policy("plain", Sequential)
        .with_policy("invoice", MonthlyPolicy::new("INV-"))
        .with_policy("batch", DailyPolicy::default());

    let registry = Registry::builder()
        .connection("default", InMemoryStore::new())
        .register(center.schema())
        .unwrap()
        .build()
        .await
        .unwrap();

    (center, registry)
}

#[tokio::test]
async fn sequential_numbers_start_at_one() {
    let (center, registry) = setup().await;

    assert_eq!(center.new_number(&registry, "plain").await.unwrap(), "1");
    assert_eq!(center.new_number(&registry, "plain").await.unwrap(), "2");
    assert_eq!(center.new_number(&registry, "plain").await.unwrap(), "3");

    let counters = registry
        .count(NUMBER_CENTER_COLLECTION, &Filter::eq("name", "plain"))
        .await
        .unwrap();
    assert_eq!(counters, 1);
}

#[tokio::test]
async fn calendar_policies_jump_to_the_period_floor() {
    let (center, registry) = setup().await;
    let october = Utc.with_ymd_and_hms(2026, 10, 19, 8, 0, 0).unwrap();
    let november = Utc.with_ymd_and_hms(2026, 11, 2, 8, 0, 0).unwrap();

    let first = center.new_number_at(&registry, "invoice", october).await.unwrap();
    let second = center.new_number_at(&registry, "invoice", october).await.unwrap();
    let third = center.new_number_at(&registry, "invoice", november).await.unwrap();

    assert_eq!(first, "INV-2026100000");
    assert_eq!(second, "INV-2026100001");
    assert_eq!(third, "INV-2026110000");

    let batch = center.new_number_at(&registry, "batch", october).await.unwrap();
    assert_eq!(batch, "202610190000");
}

#[tokio::test]
async fn unknown_counters_are_rejected() {
    let (center, registry) = setup().await;

    assert!(matches!(
        center.new_number(&registry, "missing").await,
        Err(DocumentStoreError::Definition(_)),
    ));
    assert_eq!(
        registry.count(NUMBER_CENTER_COLLECTION, &Filter::all()).await.unwrap(),
        0
    );
}
