//! Builtin features for Twitter Lite.
//!
//! [`builtin_registry`] is what a host normally hands to
//! [`refined_engine::Engine::new`].

pub mod quiet_hours;

use refined_engine::{FeatureDescriptor, FeatureRegistry, NavigationContext};

pub use quiet_hours::QuietWindow;

/// Paths where the two-column layout must stay untouched.
const FULL_WIDTH_PATHS: &[&str] = &["/messages", "/settings"];

fn is_full_width(context: &NavigationContext) -> bool {
    let path = context.path();
    FULL_WIDTH_PATHS
        .iter()
        .any(|prefix| path == *prefix || path.starts_with(&format!("{prefix}/")))
}

/// All builtin features, in application order.
pub fn builtin_features() -> Vec<FeatureDescriptor> {
    vec![
        FeatureDescriptor::new("singleColumn", true)
            .description("Move the timeline next to the sidebar")
            .when(|ctx| !is_full_width(ctx))
            .style("main > div > div > div { flex-direction: row-reverse !important; }")
            .style("[data-testid=\"sidebarColumn\"] { margin: 0 !important; }"),
        FeatureDescriptor::new("hideAvatars", false)
            .description("Hide profile pictures in the timeline")
            .style("[data-testid=\"tweet\"] img[src*=\"profile_images\"] { visibility: hidden !important; }"),
        FeatureDescriptor::new("readableTweets", true)
            .description("Larger, easier to read tweet text")
            .style(
                "[data-testid=\"tweet\"] [lang] { \
                 opacity: 0.9 !important; \
                 line-height: 23px !important; \
                 font-size: 16px !important; \
                 font-family: \"Helvetica Neue\",Helvetica,Arial,sans-serif !important; }",
            ),
        FeatureDescriptor::new("compactComposeButton", true)
            .description("Shrink the floating compose button into the gutter")
            .style(
                "[data-testid=\"fab-tweet\"] { \
                 right: -299px !important; \
                 width: 80px !important; \
                 height: 40px !important; }",
            ),
        FeatureDescriptor::new("highlightBadges", true)
            .description("Make unread badges stand out")
            .style(
                "[data-testid=\"AppTabBar_Notifications_Link\"] [aria-live=\"polite\"] { \
                 background-color: rgb(224, 36, 94) !important; }",
            ),
        FeatureDescriptor::new("quietHours", ["22:00", "07:00"])
            .description("Mute notifications between two times of day")
            .when_value(quiet_hours::is_quiet)
            .on_activate(quiet_hours::mute_notifications)
            .style(
                "a[data-refined-muted] [aria-live=\"polite\"] { display: none !important; }",
            )
            .affects("highlightBadges"),
    ]
}

/// Registry of [`builtin_features`].
pub fn builtin_registry() -> refined_engine::Result<FeatureRegistry> {
    FeatureRegistry::from_features(builtin_features())
}
