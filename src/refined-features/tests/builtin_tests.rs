//! Builtin features running inside a real engine.

use std::sync::Arc;
use std::time::Duration;

use chrono::{Local, TimeZone};
use pretty_assertions::assert_eq;

use refined_engine::{
    Document, Engine, EngineConfig, FeatureUpdate, MemoryDocument, MemoryStorage, NavigationContext,
    context::parse_url,
};
use refined_features::builtin_registry;
use refined_features::quiet_hours::{MUTED_ATTRIBUTE, NOTIFICATIONS_TAB};

const HOME: &str = "https://mobile.twitter.com/home";

fn at_hour(path: &str, hour: u32) -> NavigationContext {
    let url = parse_url(&format!("https://mobile.twitter.com{path}")).unwrap();
    let at = Local.with_ymd_and_hms(2024, 3, 1, hour, 0, 0).unwrap();
    NavigationContext::observed_at(url, "Twitter", at)
}

fn engine() -> (Engine, Arc<MemoryDocument>) {
    let document = Arc::new(MemoryDocument::new(HOME));
    let engine = Engine::new(
        builtin_registry().unwrap(),
        Arc::new(MemoryStorage::new()),
        document.clone(),
        EngineConfig::default(),
    )
    .unwrap();
    (engine, document)
}

#[tokio::test(start_paused = true)]
async fn test_quiet_hours_mute_and_unmute_notifications() {
    let (mut engine, document) = engine();
    document.insert_element(NOTIFICATIONS_TAB);

    let report = engine.navigate(at_hour("/home", 23));
    assert!(report.active.contains(&"quietHours".to_string()));
    assert_eq!(
        document.root_attribute("data-refined-override").as_deref(),
        Some("highlightBadges")
    );

    tokio::time::sleep(Duration::from_millis(10)).await;
    assert_eq!(
        document.element_attribute(NOTIFICATIONS_TAB, MUTED_ATTRIBUTE).as_deref(),
        Some("true")
    );

    let report = engine.navigate(at_hour("/home", 12));
    assert!(!report.active.contains(&"quietHours".to_string()));
    assert_eq!(document.element_attribute(NOTIFICATIONS_TAB, MUTED_ATTRIBUTE), None);
    assert_eq!(document.root_attribute("data-refined-override").as_deref(), Some(""));
}

#[tokio::test(start_paused = true)]
async fn test_quiet_hours_waits_for_late_tab() {
    let (mut engine, document) = engine();

    engine.navigate(at_hour("/home", 23));
    tokio::time::sleep(Duration::from_millis(150)).await;
    assert_eq!(document.element_attribute(NOTIFICATIONS_TAB, MUTED_ATTRIBUTE), None);

    document.insert_element(NOTIFICATIONS_TAB);
    tokio::time::sleep(Duration::from_secs(1)).await;
    assert_eq!(
        document.element_attribute(NOTIFICATIONS_TAB, MUTED_ATTRIBUTE).as_deref(),
        Some("true")
    );
}

#[tokio::test(start_paused = true)]
async fn test_stopped_quiet_hours_never_marks_late_tab() {
    let (mut engine, document) = engine();

    engine.navigate(at_hour("/home", 23));
    engine.navigate(at_hour("/home", 12));

    document.insert_element(NOTIFICATIONS_TAB);
    tokio::time::sleep(Duration::from_secs(10)).await;
    assert_eq!(document.element_attribute(NOTIFICATIONS_TAB, MUTED_ATTRIBUTE), None);
}

#[tokio::test]
async fn test_disabling_quiet_hours() {
    let (mut engine, _document) = engine();
    engine.navigate(at_hour("/home", 23));

    let report = engine
        .set_features(FeatureUpdate::set("quietHours", refined_engine::FeatureValue::List(Vec::new())))
        .unwrap();
    assert!(!report.active.contains(&"quietHours".to_string()));
    assert!(report.active.contains(&"highlightBadges".to_string()));
}

#[test]
fn test_quiet_hours_without_runtime_is_a_start_failure() {
    let (mut engine, _document) = engine();
    let report = engine.navigate(at_hour("/home", 23));

    assert!(report.active.contains(&"quietHours".to_string()));
    assert!(report.lifecycle.started.is_empty());
    assert_eq!(report.configuration_errors().count(), 1);
}
