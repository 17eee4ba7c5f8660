//! The chartgen library
//!
//! Given chart templates, each a set of curves whose metric templates carry
//! `$macro$` variables, and a catalog of metric names, chartgen works out every
//! combination of metrics that can be plotted together: one metric per curve,
//! with curves that share a macro agreeing on its value.

#![deny(clippy::all)]
#![deny(clippy::cargo)]
#![deny(clippy::pedantic)]
#![deny(clippy::perf)]
#![deny(clippy::suspicious)]
#![deny(clippy::complexity)]
#![deny(clippy::unwrap_used)]
#![deny(clippy::dbg_macro)]
#![deny(unused_extern_crates)]
#![deny(unused_allocation)]
#![deny(unused_assignments)]
#![deny(unused_comparisons)]
#![deny(unreachable_pub)]
#![deny(missing_docs)]
#![deny(missing_debug_implementations)]
#![allow(clippy::multiple_crate_versions)]
#![allow(clippy::module_name_repetitions)]

pub mod catalog;
pub mod chart;
pub mod combination;
pub mod config;
pub mod template;

pub use catalog::{Catalog, Query, StaticCatalog};
pub use chart::{Chart, RenderedChart};
pub use combination::{Combination, Selection};
pub use template::{Curve, Template};
