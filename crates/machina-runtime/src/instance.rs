use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Value};
use tokio::sync::{mpsc, oneshot, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use machina_binding::{apply_inputs, apply_outputs, HostStores};
use machina_config::Event;
use machina_expr::path;
use machina_graph::{CompiledFlow, CompiledState, CompiledTransition};
use machina_registry::{run_action, run_invoke, InvokeCache, InvokeError, Registry};
use machina_template::Renderer;

use crate::error::RuntimeError;
use crate::observer::{FlowEvent, FlowObserver, NoopObserver};
use crate::snapshot::Snapshot;

/// Messages processed by the driver task, one at a time.
enum Msg {
  External(Event),
  InvokeSettled {
    generation: u64,
    invoke_index: usize,
    result: Result<Value, InvokeError>,
  },
  AfterFired {
    generation: u64,
    after_index: usize,
  },
  Subscribe(mpsc::UnboundedSender<Snapshot>),
  WaitIdle(oneshot::Sender<()>),
  Stop,
}

/// Entry point for running compiled flows.
pub struct FlowInstance;

impl FlowInstance {
  /// Spawn a new instance of a compiled flow.
  pub fn spawn(
    compiled: Arc<CompiledFlow>,
    registry: Arc<Registry>,
    stores: HostStores,
  ) -> FlowHandle {
    Self::spawn_with_observer(compiled, registry, stores, Arc::new(NoopObserver))
  }

  /// Spawn with a lifecycle observer.
  pub fn spawn_with_observer(
    compiled: Arc<CompiledFlow>,
    registry: Arc<Registry>,
    stores: HostStores,
    observer: Arc<dyn FlowObserver>,
  ) -> FlowHandle {
    let instance_id = uuid::Uuid::new_v4().to_string();
    let (msg_tx, msg_rx) = mpsc::unbounded_channel();
    let (watch_tx, watch_rx) = watch::channel(Snapshot {
      state_id: compiled.initial.clone(),
      context: compiled.initial_context.clone(),
    });
    let terminated = Arc::new(AtomicBool::new(false));

    let core = Core {
      instance_id: instance_id.clone(),
      context: compiled.initial_context.clone(),
      state_id: compiled.initial.clone(),
      compiled,
      registry,
      stores,
      renderer: Arc::new(Renderer::new()),
      cache: InvokeCache::new(),
      observer,
      generation: 0,
      entry_token: CancellationToken::new(),
      msg_tx: msg_tx.clone(),
      watch_tx,
      subscribers: Vec::new(),
      terminated: terminated.clone(),
    };
    tokio::spawn(core.run(msg_rx));

    FlowHandle {
      instance_id,
      sender: msg_tx,
      snapshot_rx: watch_rx,
      terminated,
    }
  }
}

/// The host's handle to a running instance.
#[derive(Clone)]
pub struct FlowHandle {
  instance_id: String,
  sender: mpsc::UnboundedSender<Msg>,
  snapshot_rx: watch::Receiver<Snapshot>,
  terminated: Arc<AtomicBool>,
}

impl FlowHandle {
  pub fn instance_id(&self) -> &str {
    &self.instance_id
  }

  /// Enqueue an external event. Events are processed in order, one at a
  /// time.
  pub fn send(&self, event: Event) -> Result<(), RuntimeError> {
    if self.terminated.load(Ordering::SeqCst) {
      return Err(RuntimeError::FlowTerminated);
    }
    self
      .sender
      .send(Msg::External(event))
      .map_err(|_| RuntimeError::InstanceClosed)
  }

  /// The most recently published `{state_id, context}`.
  pub fn snapshot(&self) -> Snapshot {
    self.snapshot_rx.borrow().clone()
  }

  /// Stream of snapshots, one per state entry or context change. Dropping
  /// the receiver unsubscribes.
  pub fn subscribe(&self) -> mpsc::UnboundedReceiver<Snapshot> {
    let (tx, rx) = mpsc::unbounded_channel();
    let _ = self.sender.send(Msg::Subscribe(tx));
    rx
  }

  /// Resolves once every message queued before the call has been processed.
  pub async fn wait_idle(&self) -> Result<(), RuntimeError> {
    let (tx, rx) = oneshot::channel();
    self
      .sender
      .send(Msg::WaitIdle(tx))
      .map_err(|_| RuntimeError::InstanceClosed)?;
    rx.await.map_err(|_| RuntimeError::InstanceClosed)
  }

  pub fn is_terminated(&self) -> bool {
    self.terminated.load(Ordering::SeqCst)
  }

  /// Tear the instance down, cancelling in-flight timers and invokes.
  pub fn stop(&self) {
    let _ = self.sender.send(Msg::Stop);
  }
}

struct Core {
  compiled: Arc<CompiledFlow>,
  registry: Arc<Registry>,
  stores: HostStores,
  renderer: Arc<Renderer>,
  cache: InvokeCache,
  observer: Arc<dyn FlowObserver>,
  instance_id: String,
  context: Value,
  state_id: String,
  /// Bumped on every state entry; messages from older generations are
  /// stale and dropped.
  generation: u64,
  /// Cancelled on state exit; timers and invokes hold child tokens.
  entry_token: CancellationToken,
  msg_tx: mpsc::UnboundedSender<Msg>,
  watch_tx: watch::Sender<Snapshot>,
  subscribers: Vec<mpsc::UnboundedSender<Snapshot>>,
  terminated: Arc<AtomicBool>,
}

impl Core {
  async fn run(mut self, mut rx: mpsc::UnboundedReceiver<Msg>) {
    info!(
      instance_id = %self.instance_id,
      flow_id = %self.compiled.id,
      initial = %self.compiled.initial,
      "flow_started"
    );
    self.observer.notify(FlowEvent::FlowStarted {
      instance_id: self.instance_id.clone(),
      flow_id: self.compiled.id.clone(),
    });
    self.enter_state(self.compiled.initial.clone(), None);

    while let Some(msg) = rx.recv().await {
      match msg {
        Msg::External(event) => self.handle_event(event),
        Msg::InvokeSettled {
          generation,
          invoke_index,
          result,
        } => self.handle_invoke_settled(generation, invoke_index, result),
        Msg::AfterFired {
          generation,
          after_index,
        } => self.handle_after_fired(generation, after_index),
        Msg::Subscribe(tx) => {
          // New subscribers immediately see the current snapshot.
          let _ = tx.send(self.current_snapshot());
          self.subscribers.push(tx);
        }
        Msg::WaitIdle(ack) => {
          let _ = ack.send(());
        }
        Msg::Stop => break,
      }
    }
    self.entry_token.cancel();
    debug!(instance_id = %self.instance_id, "flow instance stopped");
  }

  fn handle_event(&mut self, event: Event) {
    if self.terminated.load(Ordering::SeqCst) {
      return;
    }
    let compiled = self.compiled.clone();
    let Some(state) = compiled.state(&self.state_id) else {
      return;
    };
    let event_value = event.to_value();
    match self.select_transition(state.candidates(&event.name), &event_value) {
      Some(transition) => self.fire(transition, Some(&event_value)),
      None => {
        // Hosts may send speculative events; an unmatched event is a
        // no-op, not an error.
        debug!(
          instance_id = %self.instance_id,
          state_id = %self.state_id,
          event = %event.name,
          "event_ignored"
        );
        self.observer.notify(FlowEvent::EventIgnored {
          instance_id: self.instance_id.clone(),
          state_id: self.state_id.clone(),
          event: event.name,
        });
      }
    }
  }

  fn handle_invoke_settled(
    &mut self,
    generation: u64,
    invoke_index: usize,
    result: Result<Value, InvokeError>,
  ) {
    if generation != self.generation || self.terminated.load(Ordering::SeqCst) {
      debug!(instance_id = %self.instance_id, "dropping stale invoke completion");
      return;
    }
    let compiled = self.compiled.clone();
    let Some(invoke) = compiled
      .state(&self.state_id)
      .and_then(|state| state.invokes.get(invoke_index))
    else {
      return;
    };

    match result {
      Ok(value) => {
        self.observer.notify(FlowEvent::InvokeCompleted {
          instance_id: self.instance_id.clone(),
          state_id: self.state_id.clone(),
          invoke_id: invoke.plan.id.clone(),
        });
        // Project result sub-paths into context before routing.
        for (context_path, result_path) in &invoke.plan.result_map {
          let projected = path::get(&value, result_path).cloned().unwrap_or(Value::Null);
          path::set(&mut self.context, context_path, projected);
        }
        let event_value = json!({
          "type": format!("done.{}", invoke.plan.id),
          "data": value,
        });
        match self.select_transition(&invoke.on_done, &event_value) {
          Some(transition) => self.fire(transition, Some(&event_value)),
          None => self.publish(),
        }
      }
      Err(InvokeError::Cancelled) => {}
      Err(error) => {
        warn!(
          instance_id = %self.instance_id,
          state_id = %self.state_id,
          invoke_id = %invoke.plan.id,
          error = %error,
          "invoke_failed"
        );
        self.observer.notify(FlowEvent::InvokeFailed {
          instance_id: self.instance_id.clone(),
          state_id: self.state_id.clone(),
          invoke_id: invoke.plan.id.clone(),
          error: error.to_string(),
        });
        let event_value = json!({
          "type": format!("error.{}", invoke.plan.id),
          "error": error.to_value(),
        });
        if let Some(transition) = self.select_transition(&invoke.on_error, &event_value) {
          self.fire(transition, Some(&event_value));
        }
      }
    }
  }

  fn handle_after_fired(&mut self, generation: u64, after_index: usize) {
    if generation != self.generation || self.terminated.load(Ordering::SeqCst) {
      debug!(instance_id = %self.instance_id, "dropping stale timer");
      return;
    }
    let compiled = self.compiled.clone();
    let Some(after) = compiled
      .state(&self.state_id)
      .and_then(|state| state.afters.get(after_index))
    else {
      return;
    };
    let event_value = json!({ "type": "after", "delay_ms": after.delay_ms });
    if let Some(transition) = self.select_transition(&after.candidates, &event_value) {
      self.fire(transition, Some(&event_value));
    }
  }

  /// First candidate whose guard is absent or truthy wins. A guard that
  /// fails to evaluate counts as false: one bad guard must not halt the
  /// flow.
  fn select_transition<'t>(
    &self,
    candidates: &'t [CompiledTransition],
    event_value: &Value,
  ) -> Option<&'t CompiledTransition> {
    let scope = json!({ "context": self.context, "event": event_value });
    candidates.iter().find(|candidate| match &candidate.guard {
      None => true,
      Some(guard) => guard.evaluate_bool(&scope).unwrap_or_else(|e| {
        warn!(
          instance_id = %self.instance_id,
          state_id = %self.state_id,
          error = %e,
          "guard evaluation failed; treating as false"
        );
        false
      }),
    })
  }

  fn fire(&mut self, transition: &CompiledTransition, event_value: Option<&Value>) {
    match &transition.target {
      None => {
        // Internal transition: actions only, the state is kept.
        self.run_actions(&transition.actions, event_value);
        self.publish();
      }
      Some(target) => {
        let target = target.clone();
        self.exit_state(event_value);
        self.run_actions(&transition.actions, event_value);
        self.enter_state(target, event_value);
      }
    }
  }

  fn exit_state(&mut self, event_value: Option<&Value>) {
    // Cancel pending timers and invokes before anything else; their
    // completions must never land in the next state.
    self.entry_token.cancel();
    let compiled = self.compiled.clone();
    if let Some(state) = compiled.state(&self.state_id) {
      self.context = apply_outputs(
        &state.output_bindings,
        std::mem::take(&mut self.context),
        &mut self.stores,
      );
      self.run_actions(&state.exit_actions, event_value);
    }
  }

  fn enter_state(&mut self, target: String, event_value: Option<&Value>) {
    self.state_id = target;
    self.generation += 1;
    self.entry_token = CancellationToken::new();

    let compiled = self.compiled.clone();
    let Some(state) = compiled.state(&self.state_id) else {
      return;
    };

    self.context = apply_inputs(
      &state.input_bindings,
      std::mem::take(&mut self.context),
      &mut self.stores,
    );
    self.run_actions(&state.entry_actions, event_value);

    info!(
      instance_id = %self.instance_id,
      state_id = %self.state_id,
      "state_entered"
    );
    self.observer.notify(FlowEvent::StateEntered {
      instance_id: self.instance_id.clone(),
      state_id: self.state_id.clone(),
    });
    self.publish();

    if state.is_final {
      self.terminated.store(true, Ordering::SeqCst);
      info!(instance_id = %self.instance_id, state_id = %self.state_id, "flow_terminated");
      self.observer.notify(FlowEvent::FlowTerminated {
        instance_id: self.instance_id.clone(),
        state_id: self.state_id.clone(),
      });
      return;
    }

    self.arm_afters(state);
    self.start_invokes(state, event_value);
  }

  fn arm_afters(&self, state: &CompiledState) {
    for (after_index, after) in state.afters.iter().enumerate() {
      let delay = Duration::from_millis(after.delay_ms);
      let token = self.entry_token.child_token();
      let tx = self.msg_tx.clone();
      let generation = self.generation;
      tokio::spawn(async move {
        tokio::select! {
          _ = tokio::time::sleep(delay) => {
            let _ = tx.send(Msg::AfterFired { generation, after_index });
          }
          _ = token.cancelled() => {}
        }
      });
    }
  }

  fn start_invokes(&self, state: &CompiledState, event_value: Option<&Value>) {
    // All invokes of a state run in parallel; the first transition that
    // fires exits the state and cancels the rest through the entry token.
    let scope = match event_value {
      Some(event) => json!({ "context": self.context, "event": event }),
      None => json!({ "context": self.context }),
    };
    for (invoke_index, invoke) in state.invokes.iter().enumerate() {
      self.observer.notify(FlowEvent::InvokeStarted {
        instance_id: self.instance_id.clone(),
        state_id: self.state_id.clone(),
        invoke_id: invoke.plan.id.clone(),
      });
      let plan = invoke.plan.clone();
      let scope = scope.clone();
      let renderer = self.renderer.clone();
      let cache = self.cache.clone();
      let token = self.entry_token.child_token();
      let tx = self.msg_tx.clone();
      let generation = self.generation;
      tokio::spawn(async move {
        let result = run_invoke(&plan, &scope, &renderer, &cache, token).await;
        if matches!(result, Err(InvokeError::Cancelled)) {
          // The owning state was exited; nobody is waiting for this.
          return;
        }
        let _ = tx.send(Msg::InvokeSettled {
          generation,
          invoke_index,
          result,
        });
      });
    }
  }

  fn run_actions(&mut self, actions: &[machina_registry::CompiledAction], event: Option<&Value>) {
    for action in actions {
      match run_action(
        action,
        self.context.clone(),
        event,
        &self.renderer,
        &self.registry,
      ) {
        Ok(next) => self.context = next,
        Err(e) => {
          // Degrade locally: a failing action is logged and skipped so the
          // machine stays live.
          warn!(
            instance_id = %self.instance_id,
            state_id = %self.state_id,
            error = %e,
            "action failed; context unchanged"
          );
        }
      }
    }
  }

  fn current_snapshot(&self) -> Snapshot {
    Snapshot {
      state_id: self.state_id.clone(),
      context: self.context.clone(),
    }
  }

  fn publish(&mut self) {
    let snapshot = self.current_snapshot();
    let _ = self.watch_tx.send(snapshot.clone());
    self
      .subscribers
      .retain(|tx| tx.send(snapshot.clone()).is_ok());
  }
}
