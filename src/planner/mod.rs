//! Plan document rendering.
//!
//! This module turns the desired resources into the stack template that is
//! uploaded before the change set is created, and decides where it is stored.

mod document;
mod handlers;

pub use document::{
    object_url, plan_key, BundleRef, PlanFormat, PlanLocation, Template, TEMPLATE_FORMAT_VERSION,
};
pub use handlers::{
    handler_for, logical_id, render_template, ApiHandler, FunctionHandler, RawHandler,
    RenderContext, ResourceHandler, HANDLERS,
};
