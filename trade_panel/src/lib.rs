//! Aligns economic time series onto a common calendar and regresses them.
//!
//! The pipeline reads each series from a delimited file ([`loader`]),
//! resamples it to the target period ([`frequency`]), joins the series into
//! one date-indexed [`Panel`](models::panel::Panel) ([`align`]), takes logs
//! ([`transform`]) and fits an OLS model ([`regression`]). [`pipeline::run`]
//! wires the stages together from a TOML [`config`]; [`export`] and [`plot`]
//! write the results.

pub mod align;
pub mod config;
pub mod errors;
pub mod export;
pub mod frequency;
pub mod loader;
pub mod models;
pub mod pipeline;
pub mod plot;
pub mod regression;
pub mod transform;

pub use errors::Error;
