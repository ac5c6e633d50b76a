//! Variable resolution for node configs.
//!
//! Config values reference earlier node results with `{{source.path}}`
//! placeholders, where the source is `previous_output` (the sole graph
//! predecessor), `trigger` (the trigger node's result), or any prior
//! node's id. Database-action configs additionally use SQL-style `:name`
//! binds in their `sql` value.
//!
//! Missing paths resolve to the empty string and produce a
//! [`ResolveWarning`]; the consuming node decides whether that matters.
//! A bare `previous_output` reference on a node with more than one
//! predecessor is the one hard error - the template must name a node id.

mod error;
mod resolver;

pub use error::ResolveError;
pub use resolver::{Resolution, VariableResolver};
