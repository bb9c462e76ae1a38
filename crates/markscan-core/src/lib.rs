//! markscan-core: data model, scoring, matching and the correction engine.
//!
//! This crate defines the exam model, the per-scan results, and the pure
//! scoring and matching logic that the rest of markscan builds on. Image
//! processing lives behind the [`traits::SheetReader`] and
//! [`traits::GlyphRecognizer`] traits.

pub mod config;
pub mod engine;
pub mod error;
pub mod matcher;
pub mod model;
pub mod pages;
pub mod parser;
pub mod report;
pub mod results;
pub mod roster;
pub mod scoring;
pub mod statistics;
pub mod table;
pub mod traits;
