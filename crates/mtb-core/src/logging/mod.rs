//! JSONL campaign logs and run manifests.
//!
//! ```text
//! logs/
//! ├── raw/                         # one file per project per day
//! │   └── 2026-10-17_Plant.jsonl
//! └── sessions/                    # one manifest per finished run
//!     └── 2026-10-17T09-30-12.json
//! ```
//!
//! Console output stays with `tracing_subscriber::fmt`; [`JsonlLayer`] is
//! stacked on top when a logs directory is configured:
//!
//! ```ignore
//! use mtb_core::logging::JsonlLayer;
//! use tracing_subscriber::prelude::*;
//!
//! let subscriber = tracing_subscriber::registry()
//!     .with(JsonlLayer::new("./logs", "Plant")?)
//!     .with(tracing_subscriber::fmt::layer());
//! tracing::subscriber::set_global_default(subscriber)?;
//! ```
//!
//! Entries are plain JSON, so `jq 'select(.fields.rank == 3)' logs/raw/*.jsonl`
//! follows a single case through the campaign.

pub mod entry;
pub mod layer;
pub mod writer;

pub use entry::{CampaignLogEntry, RunManifest};
pub use layer::JsonlLayer;
pub use writer::{read_entries, write_run_manifest, CampaignLogWriter};
