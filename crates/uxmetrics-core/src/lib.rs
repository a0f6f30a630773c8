//! # uxmetrics Core Library
//!
//! Client-side instrumentation for user-experience timings. An application
//! defines named metrics, decorates them with plugins, and composes several
//! metrics into an experience whose timing envelope follows its children.
//!
//! ## Architecture
//!
//! - **Metric**: a guarded start/stop/reset state machine that emits an
//!   event for every accepted transition
//! - **Plugins**: behaviors bound to exactly one metric, dispatched in
//!   isolation so a failing plugin never breaks its siblings
//! - **Experience**: aggregation with earliest-start/latest-stop semantics,
//!   each firing exactly once
//! - **Transport**: coalescing batch upload of finished snapshots
//!
//! Everything except the transport is single-threaded: handles are `Rc`
//! based and events are delivered synchronously on the calling thread.
//!
//! ## Key Components
//!
//! - [`Metric`], [`InteractionMetric`], [`ExperienceMetric`]
//! - [`Plugin`]: Trait for lifecycle behaviors
//! - [`MetricFactory`]: Creates metrics with a configured plugin set
//! - [`BatchTransport`]: Batched HTTP reporting
//! - [`Config`]: TOML configuration

pub mod clock;
pub mod config;
pub mod error;
pub mod events;
pub mod factory;
pub mod metric;
pub mod plugin;
pub mod plugins;
pub mod transport;

pub use clock::{default_clock, Clock, ManualClock, MonotonicClock};
pub use config::Config;
pub use error::{ConfigError, CoreError, PluginError, TransportError};
pub use events::{Emitter, ListenerId, MetricEvent};
pub use factory::{MetricFactory, PluginServices};
pub use metric::{
    ChildId, ExperienceMetric, InteractionMetric, Metric, MetricSnapshot, MetricStatus, Outcome,
};
pub use plugin::{plugin_table, Plugin, PluginHandle, PluginResult, PluginTable};
pub use transport::{BatchEnvelope, BatchTransport, Transport, Visibility};
