#![warn(clippy::all, clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod app;
pub mod batch;
pub mod config;
pub mod lists;
pub mod model;
pub mod observability;
pub mod pipeline;

pub(crate) mod clients;
pub(crate) mod resolve;
pub(crate) mod store;
pub(crate) mod util;
