//! # Alyx Realtime Service
//!
//! Implements C1: a subscription broker that converts the store's polled
//! change log into per-subscription delta streams delivered over
//! long-lived duplex connections, with server-side filter and rules
//! re-evaluation on every change.
//!
//! ## Modules
//!
//! | Module | Purpose | Key Types |
//! |--------|---------|-----------|
//! | [`domain`] | Subscription/delta entities | [`domain::Subscription`], [`domain::OutboundMessage`] |
//! | [`filter`] | Filter predicate evaluation | [`filter::matches_row`] |
//! | [`index`] | Subscription index | [`index::SubscriptionIndex`] |
//! | [`detector`] | Change log poller | [`detector::ChangeDetector`] |
//! | [`broker`] | Subscribe/broadcast/stop orchestration | [`broker::Broker`] |

pub mod broker;
pub mod detector;
pub mod domain;
pub mod filter;
pub mod index;

pub use broker::{Broker, Connection, Snapshot};
pub use domain::{OutboundMessage, Subscription, SubscriptionFilter};
