//! Model Test Bench Core Library
//!
//! Provisions, runs and exports a campaign of simulation test cases on a
//! power-system simulation platform.
//!
//! ## Overview
//!
//! A case sheet lists test cases by rank plus named channels carrying a
//! per-case value. Subscriptions written in a compact binding grammar route
//! channel values into model attributes, optionally through an arithmetic
//! transform of `x`:
//!
//! ```text
//! \Plant\ctrl.ElmDsl:Pset=Pref:R~(x * 2) - 1
//! ```
//!
//! Each dynamic case becomes one study case with its own variation, is
//! appended to a single task batch, and exports its results to
//! `{export_dir}/{project}_{rank}.csv` once the batch has run.
//!
//! ## Quick Start
//!
//! ```ignore
//! use mtb_core::{Campaign, CampaignConfig, CaseSheet, MemoryPlatform};
//!
//! let config = CampaignConfig::load_from("campaign.yaml".as_ref())?;
//! let sheet = CaseSheet::load(&config.case_sheet)?;
//! let mut campaign = Campaign::new(config, sheet);
//! let report = campaign.run(|| Ok(MemoryPlatform::test_bench()))?;
//! println!("{} contexts exported", report.contexts.len());
//! ```

pub mod binding;
pub mod campaign;
pub mod case;
pub mod channel;
pub mod config;
pub mod error;
pub mod export;
pub mod expr;
pub mod logging;
pub mod platform;
pub mod provision;
pub mod resolver;
pub mod scheduler;

// Re-exports
pub use binding::{Binding, BindingKind};
pub use campaign::{Campaign, CampaignReport, CampaignState, ContextReport};
pub use case::{CaseDescriptor, CaseSheet};
pub use channel::{Channel, ChannelRegistry, SignalChannel, SignalSeries, ValueChannel};
pub use config::CampaignConfig;
pub use error::{CampaignError, CampaignResult};
pub use export::{ExportDescriptor, ResultExporter};
pub use expr::Transform;
pub use platform::{
    Activation, BridgePlatform, MemoryPlatform, ObjectHandle, Platform, Session, Value,
};
pub use provision::{ContextState, ExecutionContext};
pub use resolver::ResolveSummary;
pub use scheduler::{ScheduledTask, TaskCommand, TaskScheduler};
