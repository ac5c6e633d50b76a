use thiserror::Error;

/// Hard resolution failures. Missing variables are warnings, not errors;
/// see [`pricerun_workflow::ResolveWarning`].
#[derive(Debug, Error)]
pub enum ResolveError {
  /// `{{previous_output.*}}` is ambiguous when the node has more than
  /// one predecessor; the template must qualify by node id instead.
  #[error(
    "node '{node_id}' has {count} predecessors; reference one by node id instead of 'previous_output'"
  )]
  AmbiguousPredecessor { node_id: String, count: usize },

  /// The template itself does not parse or render.
  #[error("template error in node '{node_id}': {message}")]
  Template { node_id: String, message: String },
}
