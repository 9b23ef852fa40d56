//! Spec Workbench Core
//!
//! Orchestrates the guided specification workflow:
//! - Tracks the forward-only phase of a spec and the actions it enables
//! - Reconciles local edits with the backend under create-vs-update ambiguity
//! - Streams enhancements into the specification content
//! - Merges template planning defaults without clobbering user input
//! - Fans out task delegation to coding agents and aggregates the results
//!
//! All I/O goes through the [`SpecBackend`] trait.
//!
//! # Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use swb_core::{Workbench, WorkbenchConfig};
//! use swb_http::HttpBackend;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = WorkbenchConfig::new().apply_env()?;
//! let backend = Arc::new(HttpBackend::from_config(&config)?);
//! let workbench = Workbench::new_spec(backend, config);
//!
//! workbench.set_title("Todo");
//! workbench.set_content("Build a todo app");
//! workbench.specify().await?;
//! workbench.generate_plan().await?;
//! let tasks = workbench.generate_tasks().await?;
//! println!("{} tasks generated", tasks.len());
//! # Ok(())
//! # }
//! ```

pub mod api;
pub mod backend;
pub mod config;
pub mod delegation;
pub mod enhance;
pub mod error;
pub mod model;
pub mod panel;
pub mod phase;
pub mod reconciler;
pub mod template;
pub mod workbench;

// Re-exports for convenience
pub use backend::{SpecBackend, TextStream};
pub use config::{DelegationPolicy, StreamMethod, WorkbenchConfig};
pub use delegation::{AgentConfig, DelegationCoordinator, DelegationReport, TaskOutcome};
pub use enhance::{ContentSink, EnhanceSummary, StreamingIngestor};
pub use error::{BackendError, ValidationError, WorkbenchError};
pub use model::{
    DelegationResult, DevelopmentOptions, Gate, Gates, Phase, Planning, PlanningField, Spec,
    SpecId, SpecIdentity, Task, TaskId, TaskPhase, TaskPriority, Template, WorkflowMode,
};
pub use panel::DetailsPanel;
pub use phase::{Action, View};
pub use reconciler::{Reconciler, SaveKind, SaveOutcome};
pub use template::{MergeOutcome, TemplateCatalog};
pub use workbench::{BusyFlags, Workbench, WorkbenchEvent, WorkbenchSnapshot};

/// Prelude module for common imports
pub mod prelude {
    //! Common imports for working with the workbench
    pub use crate::{
        Action, AgentConfig, DelegationPolicy, Phase, Spec, SpecBackend, SpecId, Task, TaskId,
        View, Workbench, WorkbenchConfig, WorkbenchError, WorkbenchEvent,
    };
}

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
