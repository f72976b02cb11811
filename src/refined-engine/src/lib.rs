//! # Refined Lite Engine
//!
//! Feature toggling for a single-page web application that is enhanced from
//! outside. A declarative registry of features is resolved against every
//! client-side navigation; feature CSS is compiled once and switched through
//! a marker attribute on the document root, and feature behaviors are
//! started and stopped so that at most one instance of each is alive.
//!
//! ## Features
//!
//! - **Registry**: named features with defaults, URL predicates, CSS and
//!   start/stop behaviors
//! - **Preferences**: stored values merged over defaults, persisted on change
//! - **Navigation**: history interception, mutation fallback and popstate,
//!   coalesced into one pending event
//! - **Bridge**: `setFeatures` / `refresh` messages from another script
//!   context, handled in order
//! - **Polling**: bounded waits for late-rendered elements that stop on
//!   cancellation
//!
//! ## Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use refined_engine::{
//!     Engine, EngineConfig, EngineRuntime, FeatureDescriptor, FeatureRegistry,
//!     FeatureUpdate, MemoryDocument, MemoryStorage, NavigationDetector,
//! };
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let registry = FeatureRegistry::from_features([
//!         FeatureDescriptor::new("hideAvatars", false).style("img { display: none }"),
//!     ])?;
//!     let document = Arc::new(MemoryDocument::new("https://mobile.twitter.com/home"));
//!     let engine = Engine::new(
//!         registry,
//!         Arc::new(MemoryStorage::new()),
//!         document,
//!         EngineConfig::default(),
//!     )?;
//!
//!     let (_sink, navigation) =
//!         NavigationDetector::starting_at("https://mobile.twitter.com/home", "Home")?;
//!     let runtime = EngineRuntime::spawn(engine, navigation, None);
//!
//!     let report = runtime
//!         .handle()
//!         .set_features(FeatureUpdate::set("hideAvatars", true))
//!         .await?;
//!     println!("active: {:?}", report.active);
//!     Ok(())
//! }
//! ```

pub mod bridge;
pub mod config;
pub mod context;
pub mod document;
pub mod engine;
pub mod error;
pub mod features;
pub mod lifecycle;
pub mod logging;
pub mod navigation;
pub mod poll;
pub mod preferences;
pub mod registry;
pub mod resolve;
pub mod storage;
pub mod style;

pub use bridge::{BridgeClient, BridgeMessage, Envelope, JsonChannel, LocalChannel, MessageChannel, MessageKind, Subscription};
pub use config::{EngineConfig, PollConfig};
pub use context::NavigationContext;
pub use document::{Document, MemoryDocument};
pub use engine::{CycleReport, Engine, EngineHandle, EngineRuntime, EngineState, FeatureUpdate};
pub use error::{BridgeError, EngineError, Result, StorageError};
pub use features::{
    Activation, Behavior, FeatureDescriptor, FeatureHandle, FeatureInfo, FeatureValue, ValueKind, handle_fn,
    noop_handle,
};
pub use lifecycle::{ApplyReport, LifecycleManager};
pub use logging::init_logging;
pub use navigation::{
    History, HistoryInterceptor, MemoryHistory, MutationFallback, NavigationDetector, NavigationEvent,
    NavigationReceiver, NavigationSink, NavigationSource, PopStateListener, SourceKind,
};
pub use poll::{PollOutcome, wait_for_element, when_element};
pub use preferences::{PreferenceStore, Preferences};
pub use registry::FeatureRegistry;
pub use resolve::{ActiveSet, Resolution, resolve};
pub use storage::{FileStorage, MemoryStorage, Storage};
pub use style::StyleProjector;
