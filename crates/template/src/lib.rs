//! Request-template parsing and rendering.
//!
//! This crate is intended to be used by:
//! - `toolbridge-core` (request material for outbound tool calls)
//!
//! It is a pure function over its inputs: no I/O, no caching, no mutation of
//! the template or context. Render failures are folded into the returned
//! [`RenderOutcome`] rather than surfaced as `Err` — callers always get a
//! value they can inspect.

pub mod engine;
pub mod error;

pub use engine::{RenderOutcome, TemplateContext, TemplateVariable, parse, render};
pub use error::TemplateError;
