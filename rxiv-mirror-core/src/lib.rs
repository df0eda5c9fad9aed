#![doc = "rxiv-mirror-core: pipelines that mirror preprint MECA bundles into a dataset repository."]

//! This crate holds the pipeline logic, data models and service contracts for
//! rxiv-mirror. Concrete registry clients and CLI glue live in the binary crate.
//!
//! # Layout
//! - [`config`]: collections, extraction policy, store/registry settings
//! - [`contract`]: `BundleStore` and `DatasetRegistry` traits (mockable)
//! - [`download`]: object-store lister/fetcher and the bundle filter
//! - [`extract`]: per-bundle extraction and failure isolation
//! - [`package`]: output folder to zip
//! - [`publish`]: repository preparation and archive upload
//! - [`synchronise`]: the `Pipeline` tying the stages together

pub mod config;
pub mod contract;
pub mod download;
pub mod error;
pub mod extract;
pub mod package;
pub mod progress;
pub mod publish;
pub mod synchronise;
