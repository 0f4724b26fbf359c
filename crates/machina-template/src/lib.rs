//! Machina Template
//!
//! Rendering of dynamic strings using minijinja templates against the flow
//! context and current event.
//!
//! Templates feed user-facing text and actor request parameters, so the
//! rendering contract favors robustness over strictness:
//! - undefined variables render as empty string, never as literal template
//!   syntax leaking to end users
//! - malformed templates render a visible `"ERROR: <reason>"` marker instead
//!   of failing the flow
//!
//! Likely misconfiguration is instead caught ahead of time:
//! [`Renderer::validate_requirements`] reports template variables that no
//! upstream write can account for, and the compiler surfaces those as
//! warnings.
//!
//! # Scope
//!
//! Templates see `context` and (when rendering inside an event-driven
//! transition) `event`:
//!
//! ```text
//! Hello {{ context.user.name | upper }}, you owe {{ context.total | currency }}
//! ```

mod filters;
mod renderer;

pub use renderer::{Renderer, TemplateError};
