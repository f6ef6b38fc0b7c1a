//! imgsrv - disk-image catalog server
//!
//! Catalogs disk-image files discovered under a scan root, classifies each by
//! driver/category/group from configured rules, keeps a SQLite catalog
//! reconciled on a timer, and serves the catalog over HTTP.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────┐  snapshot   ┌──────────────┐  upsert/evict  ┌───────────┐
//! │ Scanner  │────────────▶│ Synchronizer │───────────────▶│ CatalogDb │
//! │ (walk +  │  (cap-1     │ (diff against│                │ (SQLite)  │
//! │ classify)│   channel)  │  stored set) │                └─────┬─────┘
//! └────▲─────┘             └──────────────┘                      │
//!      │ interval timer                              find_one/many│
//! ┌────┴─────┐                                        ┌───────────▼───┐
//! │ Pipeline │                                        │ HTTP (axum):  │
//! │          │                                        │ JSON/HTML/raw │
//! └──────────┘                                        └───────────────┘
//! ```

pub mod config;
pub mod logging;
pub mod pipeline;
pub mod render;
pub mod scanner;
pub mod server;
pub mod sync;
pub mod tree;

pub use config::Config;
pub use pipeline::{Pipeline, PipelineState};
pub use scanner::{ScanError, Scanner};
pub use sync::Synchronizer;
pub use tree::Tree;
