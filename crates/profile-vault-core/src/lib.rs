//! # Profile Vault Core
//!
//! Pure, I/O-free logic for Profile Vault: canonical export records, the
//! delimited-text parser, schema normalization, aggregation, deterministic
//! insight generation, and the store traits the lifecycle manager talks to.
//!
//! This crate contains no tokio, sqlx, zip, or filesystem I/O. Everything
//! here is a pure function of its inputs, which is what makes aggregation
//! and deterministic reports reproducible.
//!
//! ```text
//! rows ──▶ normalize ──▶ CanonicalRecord ──▶ aggregate ──▶ AggregatedStats ──▶ insight
//! ```

pub mod aggregate;
pub mod insight;
pub mod models;
pub mod normalize;
pub mod store;
pub mod tabular;
