//! Pricing and listing-decision engine for cross-border resale.
//!
//! Leaf to root: [`rates`] resolves exchange and duty rates, [`pricing`]
//! computes landed cost and back-solves sale prices, [`zones`] and
//! [`rating`] judge the result, [`strategy`] picks a marketplace account and
//! [`batch`] runs many independent jobs under a concurrency ceiling.
//! [`engine`] chains them for one product.

pub mod batch;
pub mod config;
pub mod engine;
pub mod http;
pub mod metrics;
pub mod models;
pub mod pricing;
pub mod rates;
pub mod rating;
pub mod strategy;
pub mod supabase;
pub mod zones;

pub use engine::{Engine, EngineError, EngineErrorKind};
