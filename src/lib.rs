//! Floupet catalog core: Open Pet Food Facts bulk ingest and on-demand
//! barcode resolution over a shared canonical product model.

pub mod batcher;
pub mod canonical;
pub mod connector;
pub mod logging;
pub mod pipeline;
pub mod reader;
pub mod resolver;
pub mod store;
pub mod util;
