use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;

use machina_binding::CompiledBinding;
use machina_config::{
  ActionDef, ActorDef, FlowDef, InvokeDef, StateDef, TransitionDef,
};
use machina_expr::Expr;
use machina_registry::{
  Actor, CompiledAction, DelayActor, HttpActor, InvokePlan, Registry,
};
use machina_template::Renderer;

use crate::compiled::{
  CompiledAfter, CompiledFlow, CompiledInvoke, CompiledState, CompiledTransition,
};
use crate::error::{CompileError, ValidationReport};
use crate::shorthand;

/// Compile a flow definition against a registry.
///
/// Returns every error found, not just the first; a flow that compiles is
/// fully resolved and safe to execute.
pub fn compile(def: &FlowDef, registry: &Registry) -> Result<CompiledFlow, Vec<CompileError>> {
  let (flow, errors, _warnings) = Compiler::new(def, registry).run();
  match flow {
    Some(flow) if errors.is_empty() => Ok(flow),
    _ => Err(errors),
  }
}

/// Produce the authoring-tool validation report for a definition.
pub fn validate(def: &FlowDef, registry: &Registry) -> ValidationReport {
  let (_, errors, warnings) = Compiler::new(def, registry).run();
  ValidationReport {
    valid: errors.is_empty(),
    errors: errors.iter().map(|e| e.to_string()).collect(),
    warnings,
  }
}

#[derive(Clone, Copy)]
struct NodeInfo<'a> {
  def: &'a StateDef,
}

struct Compiler<'a> {
  def: &'a FlowDef,
  registry: &'a Registry,
  renderer: Renderer,
  errors: Vec<CompileError>,
  warnings: Vec<String>,
  /// Every qualified id in the flattened tree.
  nodes: HashMap<String, NodeInfo<'a>>,
  parents: HashMap<String, Option<String>>,
  /// Qualified id -> leaf reached by descending `initial` chains.
  leaf_of: HashMap<String, Option<String>>,
}

impl<'a> Compiler<'a> {
  fn new(def: &'a FlowDef, registry: &'a Registry) -> Self {
    Self {
      def,
      registry,
      renderer: Renderer::new(),
      errors: Vec::new(),
      warnings: Vec::new(),
      nodes: HashMap::new(),
      parents: HashMap::new(),
      leaf_of: HashMap::new(),
    }
  }

  fn run(mut self) -> (Option<CompiledFlow>, Vec<CompileError>, Vec<String>) {
    let def = self.def;
    self.index(&def.states, None);
    self.resolve_initial_chains();

    let initial = if !self.nodes.contains_key(&self.def.initial) {
      self.errors.push(CompileError::MissingFlowInitial {
        initial: self.def.initial.clone(),
      });
      None
    } else {
      self.leaf_of.get(&self.def.initial).cloned().flatten()
    };

    let mut states = HashMap::new();
    let ids: Vec<String> = self.nodes.keys().cloned().collect();
    for qid in ids {
      let info = self.nodes[&qid];
      if info.def.is_compound() {
        self.check_compound_extras(&qid, info.def);
      } else {
        let state = self.compile_state(&qid, info.def);
        states.insert(qid, state);
      }
    }

    self.reachability_warnings();

    let flow = initial.map(|initial| CompiledFlow {
      id: self.def.id.clone(),
      initial,
      initial_context: self.def.context.clone(),
      states,
      warnings: self.warnings.clone(),
    });
    (flow, self.errors, self.warnings)
  }

  /// Flatten the state tree into qualified ids. Children are inline, so the
  /// only way two flattened ids collide is a literal dot in a state name
  /// aliasing a nested path: reported rather than silently merged.
  fn index(&mut self, states: &'a HashMap<String, StateDef>, prefix: Option<&str>) {
    for (name, state) in states {
      let qid = match prefix {
        Some(prefix) => format!("{prefix}.{name}"),
        None => name.clone(),
      };
      if self
        .nodes
        .insert(qid.clone(), NodeInfo { def: state })
        .is_some()
      {
        self.errors.push(CompileError::DuplicateId { id: qid.clone() });
        continue;
      }
      self
        .parents
        .insert(qid.clone(), prefix.map(str::to_string));
      if !state.states.is_empty() {
        self.index(&state.states, Some(&qid));
      }
    }
  }

  /// For every node, find the leaf its `initial` chain descends to.
  fn resolve_initial_chains(&mut self) {
    let ids: Vec<String> = self.nodes.keys().cloned().collect();
    for qid in ids {
      let mut current = qid.clone();
      let leaf = loop {
        let info = self.nodes[&current];
        if !info.def.is_compound() {
          break Some(current);
        }
        match &info.def.initial {
          None => {
            self.errors.push(CompileError::MissingInitial {
              state: current.clone(),
            });
            break None;
          }
          Some(initial) => {
            let child = format!("{current}.{initial}");
            if !self.nodes.contains_key(&child) {
              self.errors.push(CompileError::UnknownInitial {
                state: current.clone(),
                initial: initial.clone(),
              });
              break None;
            }
            current = child;
          }
        }
      };
      self.leaf_of.insert(qid, leaf);
    }
  }

  fn compile_state(&mut self, qid: &str, def: &'a StateDef) -> CompiledState {
    let parent = self.parents[qid].clone();

    let entry_actions = self.resolve_actions(qid, &def.lifecycle.on_enter);
    let exit_actions = self.resolve_actions(qid, &def.lifecycle.on_exit);

    // Own transitions first, then inherited from enclosing compound states,
    // nearest ancestor first. Relative targets resolve at the declaring
    // level.
    let mut transitions: HashMap<String, Vec<CompiledTransition>> = HashMap::new();
    let mut owner = Some((qid.to_string(), def));
    while let Some((owner_qid, owner_def)) = owner {
      let owner_parent = self.parents[&owner_qid].clone();
      for (event, candidates) in &owner_def.on {
        let compiled =
          self.compile_transitions(qid, owner_parent.as_deref(), candidates.as_slice());
        transitions.entry(event.clone()).or_default().extend(compiled);
      }
      owner = owner_parent.map(|pid| (pid.clone(), self.nodes[&pid].def));
    }

    let invokes = def
      .invoke
      .iter()
      .map(|invoke| self.compile_invoke(qid, parent.as_deref(), invoke))
      .collect();

    let afters = def
      .after
      .iter()
      .map(|after| CompiledAfter {
        delay_ms: after.delay_ms,
        candidates: self.compile_transitions(
          qid,
          parent.as_deref(),
          std::slice::from_ref(&after.transition),
        ),
      })
      .collect();

    let input_bindings = self.compile_bindings(qid, &def.binding.inputs);
    let output_bindings = self.compile_bindings(qid, &def.binding.outputs);

    CompiledState {
      id: qid.to_string(),
      is_final: def.is_final(),
      view: def.view().cloned(),
      entry_actions,
      exit_actions,
      transitions,
      invokes,
      afters,
      input_bindings,
      output_bindings,
    }
  }

  fn compile_transitions(
    &mut self,
    state: &str,
    owner_parent: Option<&str>,
    defs: &[TransitionDef],
  ) -> Vec<CompiledTransition> {
    defs
      .iter()
      .map(|def| {
        let target = def
          .target
          .as_ref()
          .and_then(|target| self.resolve_target(state, owner_parent, target));
        let guard = def
          .guard
          .as_ref()
          .and_then(|guard| self.resolve_guard(state, guard));
        let actions = self.resolve_actions(state, &def.actions);
        CompiledTransition {
          target,
          guard,
          actions,
        }
      })
      .collect()
  }

  /// Sibling ids resolve at the owner's level; anything else must be an
  /// absolute qualified id. Compound targets descend to their initial leaf.
  fn resolve_target(
    &mut self,
    state: &str,
    owner_parent: Option<&str>,
    target: &str,
  ) -> Option<String> {
    let sibling = owner_parent.map(|parent| format!("{parent}.{target}"));
    let found = sibling
      .filter(|qid| self.nodes.contains_key(qid))
      .or_else(|| self.nodes.contains_key(target).then(|| target.to_string()));

    match found {
      Some(qid) => {
        let leaf = self.leaf_of.get(&qid).cloned().flatten();
        // A compound target without a resolvable initial chain has already
        // produced its own error.
        leaf
      }
      None => {
        self.errors.push(CompileError::UnknownTarget {
          state: state.to_string(),
          target: target.to_string(),
        });
        None
      }
    }
  }

  fn resolve_guard(&mut self, state: &str, guard: &Value) -> Option<Expr> {
    match guard {
      Value::String(name) => {
        if let Some(logic) = self.def.guards.get(name) {
          return match Expr::parse(logic) {
            Ok(expr) => Some(expr),
            Err(source) => {
              self.errors.push(CompileError::BadExpr {
                state: state.to_string(),
                source,
              });
              None
            }
          };
        }
        if let Some(expr) = self.registry.guard(name) {
          return Some(expr.clone());
        }
        if shorthand::looks_like_shorthand(name) {
          return match shorthand::parse(name) {
            Ok(expr) => Some(expr),
            Err(reason) => {
              self.errors.push(CompileError::BadShorthand {
                state: state.to_string(),
                text: name.clone(),
                reason,
              });
              None
            }
          };
        }
        self.errors.push(CompileError::UnknownGuard {
          state: state.to_string(),
          name: name.clone(),
        });
        None
      }
      logic => match Expr::parse(logic) {
        Ok(expr) => Some(expr),
        Err(source) => {
          self.errors.push(CompileError::BadExpr {
            state: state.to_string(),
            source,
          });
          None
        }
      },
    }
  }

  fn resolve_actions(&mut self, state: &str, names: &[String]) -> Vec<CompiledAction> {
    names
      .iter()
      .filter_map(|name| self.resolve_action(state, name))
      .collect()
  }

  fn resolve_action(&mut self, state: &str, name: &str) -> Option<CompiledAction> {
    if let Some(def) = self.def.actions.get(name) {
      return match CompiledAction::compile(def) {
        Ok(action) => Some(action),
        Err(source) => {
          self.errors.push(CompileError::BadExpr {
            state: state.to_string(),
            source,
          });
          None
        }
      };
    }
    if self.registry.has_action(name) {
      return Some(CompiledAction::Custom(name.to_string()));
    }
    self.errors.push(CompileError::UnknownAction {
      state: state.to_string(),
      name: name.to_string(),
    });
    None
  }

  fn compile_invoke(
    &mut self,
    state: &str,
    parent: Option<&str>,
    def: &InvokeDef,
  ) -> CompiledInvoke {
    let actor: Option<Arc<dyn Actor>> = if let Some(actor_def) = self.def.actors.get(&def.actor)
    {
      self.build_actor(state, actor_def)
    } else if let Some(actor) = self.registry.actor(&def.actor) {
      Some(actor)
    } else {
      self.errors.push(CompileError::UnknownActor {
        state: state.to_string(),
        name: def.actor.clone(),
      });
      None
    };

    if def.on_error.is_none() {
      self.warnings.push(format!(
        "state '{state}': invoke '{}' has no on_error target; failures will be dropped",
        def.effective_id()
      ));
    }

    let on_done = def
      .on_done
      .as_ref()
      .map(|t| self.compile_transitions(state, parent, t.as_slice()))
      .unwrap_or_default();
    let on_error = def
      .on_error
      .as_ref()
      .map(|t| self.compile_transitions(state, parent, t.as_slice()))
      .unwrap_or_default();

    // Reference errors leave a placeholder actor; the plan is never
    // executed because compilation fails.
    let actor = actor.unwrap_or_else(|| {
      Arc::new(DelayActor {
        delay_ms: 0,
        value: Value::Null,
      })
    });

    CompiledInvoke {
      plan: InvokePlan {
        id: def.effective_id().to_string(),
        actor_name: def.actor.clone(),
        actor,
        input: def.input.clone(),
        timeout_ms: def.timeout_ms,
        retry: def.retry.clone(),
        cache_key: def.cache_key.clone(),
        cache_ttl_ms: def.cache_ttl_ms,
        result_map: def.result_map.clone(),
      },
      on_done,
      on_error,
    }
  }

  fn build_actor(&mut self, state: &str, def: &ActorDef) -> Option<Arc<dyn Actor>> {
    match def {
      ActorDef::Http {
        method,
        url,
        headers,
        body,
        expect_status,
        error_when,
      } => {
        let error_when = match error_when {
          Some(logic) => match Expr::parse(logic) {
            Ok(expr) => Some(expr),
            Err(source) => {
              self.errors.push(CompileError::BadExpr {
                state: state.to_string(),
                source,
              });
              return None;
            }
          },
          None => None,
        };
        Some(Arc::new(HttpActor::new(
          method.clone(),
          url.clone(),
          headers.clone(),
          body.clone(),
          *expect_status,
          error_when,
        )))
      }
      ActorDef::Delay { delay_ms, value } => Some(Arc::new(DelayActor {
        delay_ms: *delay_ms,
        value: value.clone(),
      })),
    }
  }

  fn compile_bindings(
    &mut self,
    state: &str,
    defs: &[machina_config::BindingDef],
  ) -> Vec<CompiledBinding> {
    defs
      .iter()
      .filter_map(|def| match CompiledBinding::compile(def, self.registry) {
        Ok(binding) => Some(binding),
        Err(source) => {
          self.errors.push(CompileError::Binding {
            state: state.to_string(),
            source,
          });
          None
        }
      })
      .collect()
  }

  /// Lifecycle hooks, invokes, timers and bindings on compound states have
  /// no runtime home in the flattened graph; only `on` transitions are
  /// inherited by descendants.
  fn check_compound_extras(&mut self, qid: &str, def: &StateDef) {
    if !def.lifecycle.is_empty()
      || !def.invoke.is_empty()
      || !def.after.is_empty()
      || !def.binding.is_empty()
    {
      self.warnings.push(format!(
        "compound state '{qid}': lifecycle/invoke/after/binding blocks are ignored; declare them on leaf states"
      ));
    }
  }

  /// Warn about template reads of context paths nothing upstream writes.
  fn reachability_warnings(&mut self) {
    let mut written: Vec<String> = Vec::new();
    collect_context_paths(&self.def.context, "context", &mut written);
    for action in self.def.actions.values() {
      for path in action.written_paths() {
        written.push(format!("context.{path}"));
      }
    }
    for info in self.nodes.values() {
      for binding in &info.def.binding.inputs {
        if binding.target.starts_with("context.") {
          written.push(binding.target.clone());
        }
      }
      for invoke in &info.def.invoke {
        for context_path in invoke.result_map.keys() {
          written.push(format!("context.{context_path}"));
        }
      }
    }

    let mut templates: Vec<String> = Vec::new();
    for action in self.def.actions.values() {
      match action {
        ActionDef::RenderTemplate { template, .. } => templates.push(template.clone()),
        ActionDef::Log { message, .. } => templates.push(message.clone()),
        _ => {}
      }
    }
    for info in self.nodes.values() {
      for invoke in &info.def.invoke {
        if let Some(key) = &invoke.cache_key {
          templates.push(key.clone());
        }
        if let Some(input) = &invoke.input {
          collect_string_leaves(input, &mut templates);
        }
      }
    }

    for template in templates {
      let Ok(missing) = self.renderer.validate_requirements(&template, &written) else {
        continue;
      };
      for var in missing {
        if var.starts_with("context.") {
          self.warnings.push(format!(
            "template reads '{var}' but no upstream write produces it"
          ));
        }
      }
    }
  }
}

fn collect_context_paths(value: &Value, prefix: &str, out: &mut Vec<String>) {
  // The bare root is never pushed: it would satisfy every read via the
  // prefix rule and silence the analysis.
  if let Value::Object(map) = value {
    for (key, child) in map {
      let path = format!("{prefix}.{key}");
      out.push(path.clone());
      collect_context_paths(child, &path, out);
    }
  }
}

fn collect_string_leaves(value: &Value, out: &mut Vec<String>) {
  match value {
    Value::String(s) => out.push(s.clone()),
    Value::Array(items) => items.iter().for_each(|v| collect_string_leaves(v, out)),
    Value::Object(map) => map.values().for_each(|v| collect_string_leaves(v, out)),
    _ => {}
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;

  fn flow(json: serde_json::Value) -> FlowDef {
    serde_json::from_value(json).unwrap()
  }

  #[test]
  fn compiles_minimal_flow() {
    let def = flow(json!({
      "id": "two-step",
      "initial": "a",
      "states": {
        "a": { "on": { "NEXT": { "target": "b" } } },
        "b": { "type": "final" }
      }
    }));
    let compiled = compile(&def, &Registry::new()).unwrap();
    assert_eq!(compiled.initial, "a");
    assert!(compiled.state("b").unwrap().is_final);
    let candidates = compiled.state("a").unwrap().candidates("NEXT");
    assert_eq!(candidates.len(), 1);
    assert_eq!(candidates[0].target.as_deref(), Some("b"));
  }

  #[test]
  fn initial_view_is_retrievable_without_events() {
    let def = flow(json!({
      "id": "viewed",
      "initial": "intake",
      "states": {
        "intake": { "meta": { "view": { "component": "IntakeForm" } } }
      }
    }));
    let compiled = compile(&def, &Registry::new()).unwrap();
    assert_eq!(
      compiled.initial_state().view,
      Some(json!({ "component": "IntakeForm" }))
    );
  }

  #[test]
  fn collects_all_errors_in_one_pass() {
    let def = flow(json!({
      "id": "broken",
      "initial": "nowhere",
      "states": {
        "a": {
          "lifecycle": { "on_enter": ["no_such_action"] },
          "on": { "GO": { "target": "missing", "guard": "no_such_guard" } },
          "invoke": [{ "actor": "no_such_actor", "on_error": { "target": "a" } }]
        }
      }
    }));
    let errors = compile(&def, &Registry::new()).unwrap_err();
    let rendered: Vec<String> = errors.iter().map(|e| e.to_string()).collect();

    assert!(rendered.iter().any(|e| e.contains("initial state 'nowhere'")), "{rendered:?}");
    assert!(rendered.iter().any(|e| e.contains("no_such_action")), "{rendered:?}");
    assert!(rendered.iter().any(|e| e.contains("'missing'")), "{rendered:?}");
    assert!(rendered.iter().any(|e| e.contains("no_such_guard")), "{rendered:?}");
    assert!(rendered.iter().any(|e| e.contains("no_such_actor")), "{rendered:?}");
    assert_eq!(errors.len(), 5);
  }

  #[test]
  fn compound_states_flatten_to_qualified_ids() {
    let def = flow(json!({
      "id": "nested",
      "initial": "risk",
      "states": {
        "risk": {
          "initial": "assessment",
          "states": {
            "assessment": {
              "initial": "evaluation",
              "states": {
                "evaluation": { "on": { "DONE": { "target": "done" } } }
              }
            }
          }
        },
        "done": { "type": "final" }
      }
    }));
    let compiled = compile(&def, &Registry::new()).unwrap();
    assert_eq!(compiled.initial, "risk.assessment.evaluation");
    assert!(compiled.state("risk.assessment.evaluation").is_some());
  }

  #[test]
  fn sibling_targets_resolve_at_their_level() {
    let def = flow(json!({
      "id": "siblings",
      "initial": "outer",
      "states": {
        "outer": {
          "initial": "first",
          "states": {
            "first": { "on": { "STEP": { "target": "second" } } },
            "second": { "on": { "JUMP": { "target": "done" } } }
          }
        },
        "done": { "type": "final" }
      }
    }));
    let compiled = compile(&def, &Registry::new()).unwrap();
    let first = compiled.state("outer.first").unwrap();
    assert_eq!(first.candidates("STEP")[0].target.as_deref(), Some("outer.second"));
    // Absolute fallback reaches across the hierarchy.
    let second = compiled.state("outer.second").unwrap();
    assert_eq!(second.candidates("JUMP")[0].target.as_deref(), Some("done"));
  }

  #[test]
  fn compound_transitions_are_inherited_by_leaves() {
    let def = flow(json!({
      "id": "inherit",
      "initial": "work",
      "states": {
        "work": {
          "initial": "draft",
          "on": { "CANCEL": { "target": "cancelled" } },
          "states": {
            "draft": { "on": { "CANCEL": { "target": "review" } } },
            "review": {}
          }
        },
        "cancelled": { "type": "final" }
      }
    }));
    let compiled = compile(&def, &Registry::new()).unwrap();
    let draft = compiled.state("work.draft").unwrap();
    // Own candidate first, inherited second.
    let candidates = draft.candidates("CANCEL");
    assert_eq!(candidates.len(), 2);
    assert_eq!(candidates[0].target.as_deref(), Some("work.review"));
    assert_eq!(candidates[1].target.as_deref(), Some("cancelled"));

    let review = compiled.state("work.review").unwrap();
    assert_eq!(review.candidates("CANCEL")[0].target.as_deref(), Some("cancelled"));
  }

  #[test]
  fn compound_without_initial_fails() {
    let def = flow(json!({
      "id": "no-initial",
      "initial": "outer",
      "states": {
        "outer": { "states": { "a": {} } }
      }
    }));
    let errors = compile(&def, &Registry::new()).unwrap_err();
    assert!(errors
      .iter()
      .any(|e| matches!(e, CompileError::MissingInitial { state } if state == "outer")));
  }

  #[test]
  fn shorthand_guards_compile() {
    let def = flow(json!({
      "id": "guarded",
      "initial": "a",
      "states": {
        "a": { "on": { "CHECK": { "target": "b", "guard": "greater_than:context.score:50" } } },
        "b": { "type": "final" }
      }
    }));
    let compiled = compile(&def, &Registry::new()).unwrap();
    let guard = compiled.state("a").unwrap().candidates("CHECK")[0]
      .guard
      .as_ref()
      .unwrap();
    assert!(guard.evaluate_bool(&json!({ "context": { "score": 60 } })).unwrap());
    assert!(!guard.evaluate_bool(&json!({ "context": { "score": 40 } })).unwrap());
  }

  #[test]
  fn named_guards_resolve_from_flow_and_registry() {
    let mut registry = Registry::new();
    registry
      .register_guard("from_registry", &json!({ "var": "context.flag" }))
      .unwrap();
    let def = flow(json!({
      "id": "named",
      "initial": "a",
      "guards": { "from_flow": { ">": [{ "var": "context.n" }, 1] } },
      "states": {
        "a": {
          "on": {
            "X": [
              { "target": "b", "guard": "from_flow" },
              { "target": "b", "guard": "from_registry" }
            ]
          }
        },
        "b": { "type": "final" }
      }
    }));
    assert!(compile(&def, &registry).is_ok());
  }

  #[test]
  fn unknown_binding_prefix_is_a_compile_error() {
    let def = flow(json!({
      "id": "bindings",
      "initial": "a",
      "states": {
        "a": {
          "binding": { "inputs": [{ "source": "cookies.id", "target": "context.id" }] }
        }
      }
    }));
    let errors = compile(&def, &Registry::new()).unwrap_err();
    assert!(errors
      .iter()
      .any(|e| matches!(e, CompileError::Binding { .. })));
  }

  #[test]
  fn invoke_without_on_error_warns() {
    let def = flow(json!({
      "id": "warned",
      "initial": "a",
      "actors": { "wait": { "type": "delay", "delay_ms": 10 } },
      "states": {
        "a": { "invoke": [{ "actor": "wait", "on_done": { "target": "b" } }] },
        "b": { "type": "final" }
      }
    }));
    let report = validate(&def, &Registry::new());
    assert!(report.valid);
    assert!(report.warnings.iter().any(|w| w.contains("no on_error")), "{:?}", report.warnings);
  }

  #[test]
  fn unaccounted_template_reads_warn() {
    let def = flow(json!({
      "id": "reads",
      "initial": "a",
      "actions": {
        "greet": { "type": "render_template", "target": "greeting", "template": "Hi {{ context.nobody.name }}" }
      },
      "states": {
        "a": { "lifecycle": { "on_enter": ["greet"] } }
      }
    }));
    let report = validate(&def, &Registry::new());
    assert!(report.valid);
    assert!(
      report.warnings.iter().any(|w| w.contains("context.nobody.name")),
      "{:?}",
      report.warnings
    );
  }

  #[test]
  fn compound_lifecycle_warns() {
    let def = flow(json!({
      "id": "compound-extras",
      "initial": "outer",
      "actions": { "noop": { "type": "log", "message": "x" } },
      "states": {
        "outer": {
          "initial": "a",
          "lifecycle": { "on_enter": ["noop"] },
          "states": { "a": {} }
        }
      }
    }));
    let report = validate(&def, &Registry::new());
    assert!(report.valid);
    assert!(report.warnings.iter().any(|w| w.contains("compound state 'outer'")));
  }
}
