//! Quiet hours: mute the notifications tab inside a daily time window.

use std::sync::Arc;

use anyhow::{Context, bail};
use chrono::{NaiveTime, Timelike};
use parking_lot::Mutex;
use refined_engine::{Activation, FeatureHandle, FeatureValue, NavigationContext, PollOutcome, handle_fn, when_element};
use tracing::{debug, warn};

/// Selector of the notifications tab in the app's tab bar.
pub const NOTIFICATIONS_TAB: &str = "a[data-testid=\"AppTabBar_Notifications_Link\"]";

/// Attribute set on the tab while it is muted.
pub const MUTED_ATTRIBUTE: &str = "data-refined-muted";

/// A daily window, possibly wrapping past midnight. Both ends are inclusive
/// and compared at minute granularity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QuietWindow {
    start: NaiveTime,
    end: NaiveTime,
}

impl QuietWindow {
    pub fn new(start: NaiveTime, end: NaiveTime) -> Self {
        Self {
            start: truncate(start),
            end: truncate(end),
        }
    }

    /// Parse a `["H:MM", "H:MM"]` preference value.
    pub fn from_value(value: &FeatureValue) -> anyhow::Result<Self> {
        let Some(bounds) = value.as_list() else {
            bail!("expected a [start, end] list, got a {}", value.kind());
        };
        let [start, end] = bounds else {
            bail!("expected exactly two times, got {}", bounds.len());
        };
        Ok(Self::new(parse_time(start)?, parse_time(end)?))
    }

    pub fn start(&self) -> NaiveTime {
        self.start
    }

    pub fn end(&self) -> NaiveTime {
        self.end
    }

    pub fn wraps_midnight(&self) -> bool {
        self.start >= self.end
    }

    pub fn contains(&self, time: NaiveTime) -> bool {
        let now = truncate(time);
        let (start, end) = (self.start, self.end);
        (now >= start || (start >= end && now <= start && now <= end)) && (now <= end || end <= start)
    }
}

fn truncate(time: NaiveTime) -> NaiveTime {
    time.with_second(0)
        .and_then(|t| t.with_nanosecond(0))
        .unwrap_or(time)
}

fn parse_time(text: &str) -> anyhow::Result<NaiveTime> {
    let (hour, minute) = text
        .trim()
        .split_once(':')
        .with_context(|| format!("'{text}' is not in H:MM form"))?;
    let hour: u32 = hour.parse().with_context(|| format!("bad hour in '{text}'"))?;
    let minute: u32 = minute.parse().with_context(|| format!("bad minute in '{text}'"))?;
    NaiveTime::from_hms_opt(hour, minute, 0).with_context(|| format!("'{text}' is not a time of day"))
}

/// Predicate: the navigation happened inside the configured window.
pub fn is_quiet(context: &NavigationContext, value: &FeatureValue) -> anyhow::Result<bool> {
    let window = QuietWindow::from_value(value)?;
    Ok(window.contains(context.at().time()))
}

/// Behavior: wait for the notifications tab and mark it muted. Stopping
/// cancels the wait and unmarks the tab.
pub fn mute_notifications(activation: Activation) -> anyhow::Result<Box<dyn FeatureHandle>> {
    let runtime = tokio::runtime::Handle::try_current().context("quiet hours need a tokio runtime")?;

    let Activation {
        feature,
        document,
        cancel,
        poll,
        ..
    } = activation;

    // Held while marking and unmarking so a late match can't outlive stop.
    let stopped = Arc::new(Mutex::new(false));

    let task = runtime.spawn({
        let stopped = stopped.clone();
        let document = document.clone();
        let cancel = cancel.clone();
        async move {
            let outcome = when_element(document, NOTIFICATIONS_TAB.to_string(), poll, cancel, |doc| {
                let stopped = stopped.lock();
                if !*stopped {
                    doc.set_element_attribute(NOTIFICATIONS_TAB, MUTED_ATTRIBUTE, "true");
                }
            })
            .await;
            match outcome {
                PollOutcome::Found { attempts } => debug!(feature = %feature, attempts, "Notifications muted"),
                PollOutcome::Cancelled => debug!(feature = %feature, "Quiet hours stopped before tab appeared"),
                PollOutcome::TimedOut => warn!(feature = %feature, "Notifications tab never appeared"),
            }
        }
    });

    Ok(handle_fn(move || {
        cancel.cancel();
        let mut stopped = stopped.lock();
        *stopped = true;
        task.abort();
        document.remove_element_attribute(NOTIFICATIONS_TAB, MUTED_ATTRIBUTE);
        Ok(())
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Local, TimeZone};

    fn at(time: &str) -> NaiveTime {
        parse_time(time).unwrap()
    }

    fn window(start: &str, end: &str) -> QuietWindow {
        QuietWindow::from_value(&FeatureValue::from([start, end])).unwrap()
    }

    #[test]
    fn test_off_same_day_before() {
        assert!(!window("2:00", "3:00").contains(at("1:00")));
    }

    #[test]
    fn test_off_same_day_after() {
        assert!(!window("2:00", "3:00").contains(at("4:00")));
    }

    #[test]
    fn test_off_after_window_from_yesterday() {
        assert!(!window("21:00", "9:30").contains(at("9:40")));
    }

    #[test]
    fn test_off_before_window_into_tomorrow() {
        assert!(!window("21:00", "9:30").contains(at("20:00")));
    }

    #[test]
    fn test_on_same_day() {
        assert!(window("2:00", "4:15").contains(at("4:00")));
    }

    #[test]
    fn test_on_start_of_overnight_window() {
        assert!(window("22:00", "4:15").contains(at("22:00")));
    }

    #[test]
    fn test_on_overnight_window_after_midnight() {
        assert!(window("22:00", "4:15").contains(at("2:00")));
    }

    #[test]
    fn test_seconds_are_ignored() {
        let now = NaiveTime::from_hms_opt(4, 15, 59).unwrap();
        assert!(window("2:00", "4:15").contains(now));
    }

    #[test]
    fn test_invalid_values() {
        for value in [
            FeatureValue::Flag(true),
            FeatureValue::from(["22:00"]),
            FeatureValue::from(["22:00", "7"]),
            FeatureValue::from(["25:00", "07:00"]),
            FeatureValue::from(["22:xx", "07:00"]),
        ] {
            assert!(QuietWindow::from_value(&value).is_err(), "{value:?}");
        }
    }

    #[test]
    fn test_predicate_uses_navigation_time() {
        let url = refined_engine::context::parse_url("https://mobile.twitter.com/home").unwrap();
        let late = Local.with_ymd_and_hms(2024, 3, 1, 23, 30, 0).unwrap();
        let noon = Local.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap();
        let value = FeatureValue::from(["22:00", "07:00"]);

        let ctx = NavigationContext::observed_at(url.clone(), "Home", late);
        assert!(is_quiet(&ctx, &value).unwrap());
        let ctx = NavigationContext::observed_at(url, "Home", noon);
        assert!(!is_quiet(&ctx, &value).unwrap());
    }
}
