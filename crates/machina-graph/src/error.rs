use thiserror::Error;

#[derive(Debug, Error)]
pub enum CompileError {
  #[error("flow initial state '{initial}' does not exist")]
  MissingFlowInitial { initial: String },

  #[error("compound state '{state}' declares no initial child")]
  MissingInitial { state: String },

  #[error("compound state '{state}' declares unknown initial child '{initial}'")]
  UnknownInitial { state: String, initial: String },

  #[error("state '{state}': transition target '{target}' does not exist")]
  UnknownTarget { state: String, target: String },

  #[error("state '{state}': unknown guard '{name}'")]
  UnknownGuard { state: String, name: String },

  #[error("state '{state}': unknown action '{name}'")]
  UnknownAction { state: String, name: String },

  #[error("state '{state}': unknown actor '{name}'")]
  UnknownActor { state: String, name: String },

  #[error("state '{state}': invalid guard shorthand '{text}': {reason}")]
  BadShorthand {
    state: String,
    text: String,
    reason: String,
  },

  #[error("state '{state}': invalid expression: {source}")]
  BadExpr {
    state: String,
    #[source]
    source: machina_expr::ExprError,
  },

  #[error("state '{state}': {source}")]
  Binding {
    state: String,
    #[source]
    source: machina_binding::BindingError,
  },

  #[error("duplicate state id after flattening: '{id}'")]
  DuplicateId { id: String },
}

/// Authoring-tool view of a compile: all errors and warnings as strings.
#[derive(Debug, Clone)]
pub struct ValidationReport {
  pub valid: bool,
  pub errors: Vec<String>,
  pub warnings: Vec<String>,
}
