//! Pull-based cooking engine.
//!
//! `evaluate` walks a node's inputs depth-first, then decides between the
//! cached output and a fresh cook. A node is current when it is `Unchanged`,
//! not time-dependent, and every upstream port revision it consumed last time
//! is still the same. Invalidation never pushes downstream; consumers see a
//! changed revision on their next pull.

use std::any::Any;
use std::collections::HashSet;
use std::panic::{self, AssertUnwindSafe};
use std::time::Instant;

use tracing::{debug, trace, warn};

use kiln_core::config::EngineConfig;
use kiln_core::error::{KilnError, Result};
use kiln_core::traits::LanguageModel;
use kiln_core::{items_size, ConnectionId, CookState, GlobalTable, Items, NodeId};

use crate::catalog::Catalog;
use crate::connection::Connection;
use crate::descriptor::{Behavior, CookContext};
use crate::environment::Environment;
use crate::looper::LoopSettings;
use crate::path;

/// State of one running looper iteration.
#[derive(Debug)]
struct LoopFrame {
    scope: String,
    index: i64,
    force: bool,
    cooked: HashSet<NodeId>,
}

/// Output of a successful cook before it is committed to the node.
struct Cooked {
    outputs: Vec<Items>,
    warnings: Vec<String>,
    loop_sensitive: bool,
}

/// Work left after the node's context has been released.
enum Prepared {
    Done(Result<Vec<Items>>),
    Loop(Result<LoopSettings>, Items),
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    payload
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| payload.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("unknown panic")
}

/// One evaluation request against an environment.
pub struct Cooker<'a> {
    env: &'a mut Environment,
    catalog: &'a Catalog,
    globals: &'a GlobalTable,
    config: &'a EngineConfig,
    model: Option<&'a dyn LanguageModel>,
    frames: Vec<LoopFrame>,
    depth: usize,
}

impl<'a> Cooker<'a> {
    pub fn new(
        env: &'a mut Environment,
        catalog: &'a Catalog,
        globals: &'a GlobalTable,
        config: &'a EngineConfig,
    ) -> Self {
        Self {
            env,
            catalog,
            globals,
            config,
            model: None,
            frames: vec![],
            depth: 0,
        }
    }

    pub fn with_model(mut self, model: Option<&'a dyn LanguageModel>) -> Self {
        self.model = model;
        self
    }

    /// Bring a node up to date. Returns `false` if it (or an input) failed;
    /// the reasons are recorded on the node.
    pub fn evaluate(&mut self, id: NodeId, requester: Option<NodeId>, force: bool) -> bool {
        let Ok(node) = self.env.node(id) else {
            return false;
        };
        let node_path = node.path.clone();
        let previous = node.state;

        if previous == CookState::Cooking {
            warn!(node = %node_path, "Re-entrant evaluation refused");
            return false;
        }
        if self.depth >= self.config.max_depth {
            let message = format!("Evaluation depth limit of {} exceeded", self.config.max_depth);
            warn!(node = %node_path, depth = self.depth, "Evaluation too deep");
            self.fail(id, vec![message], vec![]);
            return false;
        }

        let forced = force || self.loop_forces(id, &node_path);
        let dynamic = self.env.is_time_dependent(id);
        if let Ok(node) = self.env.node_mut(id) {
            node.state = CookState::Cooking;
        }

        self.depth += 1;
        let ok = self.pull_and_cook(id, &node_path, previous, forced, dynamic, requester);
        self.depth -= 1;
        ok
    }

    fn pull_and_cook(
        &mut self,
        id: NodeId,
        node_path: &str,
        previous: CookState,
        forced: bool,
        dynamic: bool,
        requester: Option<NodeId>,
    ) -> bool {
        let inputs = self.env.connections().inputs_of(id);
        for conn in &inputs {
            if !self.evaluate(conn.from, Some(id), false) {
                let source = self
                    .env
                    .node(conn.from)
                    .map(|n| n.path.clone())
                    .unwrap_or_else(|_| conn.from.to_string());
                let message = format!("Input {} from {} failed to cook", conn.to_input, source);
                self.fail(id, vec![message], vec![]);
                return false;
            }
        }

        let consumed = self.consumed(&inputs);
        let Ok(node) = self.env.node(id) else {
            return false;
        };
        if !forced && !dynamic && previous == CookState::Unchanged && consumed == node.cache.consumed {
            trace!(node = %node_path, "Cache hit");
            self.set_state(id, CookState::Unchanged);
            return true;
        }

        let start = Instant::now();
        let result = self.cook(id, &inputs, requester);
        let elapsed = start.elapsed();

        match result {
            Ok(cooked) => {
                self.commit(id, cooked, consumed, elapsed);
                if let Ok(node) = self.env.node(id) {
                    debug!(
                        node = %node_path,
                        cook_count = node.cache.cook_count,
                        elapsed_ms = elapsed.as_millis() as u64,
                        "Cooked"
                    );
                }
                true
            }
            Err((error, warnings)) => {
                warn!(node = %node_path, error = %error, "Cook failed");
                self.fail(id, vec![error.to_string()], warnings);
                if let Ok(node) = self.env.node_mut(id) {
                    node.cache.last_cook = Some(elapsed);
                }
                false
            }
        }
    }

    /// Revisions of the upstream ports feeding `inputs`.
    fn consumed(&self, inputs: &[Connection]) -> Vec<(ConnectionId, u64)> {
        inputs
            .iter()
            .map(|c| {
                let revision = self
                    .env
                    .node(c.from)
                    .map(|n| n.cache.revision(c.from_output))
                    .unwrap_or(0);
                (c.id, revision)
            })
            .collect()
    }

    fn cook(
        &mut self,
        id: NodeId,
        inputs: &[Connection],
        requester: Option<NodeId>,
    ) -> std::result::Result<Cooked, (KilnError, Vec<String>)> {
        let pressed = match self.env.node_mut(id) {
            Ok(node) => node.params.take_pressed(),
            Err(e) => return Err((e, vec![])),
        };
        let requester = requester
            .and_then(|r| self.env.node(r).ok())
            .map(|n| n.path.clone());

        let (prepared, warnings, loop_sensitive) = {
            let node = match self.env.node(id) {
                Ok(node) => node,
                Err(e) => return Err((e, vec![])),
            };
            let mut port_inputs: Vec<Vec<Items>> = vec![vec![]; node.node_type.inputs.len()];
            for conn in inputs {
                if let (Some(slot), Ok(source)) =
                    (port_inputs.get_mut(conn.to_input), self.env.node(conn.from))
                {
                    slot.push(source.cache.port(conn.from_output).to_vec());
                }
            }

            let loop_index = self.loop_index(&node.path);
            let mut ctx = CookContext::new(&node.path, &node.params, self.globals, port_inputs)
                .with_requester(requester)
                .with_pressed(pressed)
                .with_loop_index(loop_index)
                .with_model(self.model);

            let node_type = node.node_type.clone();
            let prepared = match &node_type.behavior {
                Behavior::Transform(transform) => {
                    let result = panic::catch_unwind(AssertUnwindSafe(|| transform.cook(&mut ctx)));
                    Prepared::Done(result.unwrap_or_else(|payload| {
                        let message = format!("node panicked: {}", panic_message(&*payload));
                        Err(KilnError::cook(&node.path, message))
                    }))
                }
                Behavior::LoopOutput => Prepared::Done(Ok(vec![ctx.input(0)])),
                Behavior::LoopInput => {
                    let binding = node.loop_binding.clone().unwrap_or_default();
                    Prepared::Done(Ok(vec![binding.items, vec![binding.iteration.to_string()]]))
                }
                Behavior::Looper => {
                    let settings = LoopSettings::from_context(&mut ctx);
                    Prepared::Loop(settings, ctx.input(0))
                }
            };
            let (warnings, loop_sensitive) = ctx.finish();
            (prepared, warnings, loop_sensitive)
        };

        let outputs = match prepared {
            Prepared::Done(result) => result,
            Prepared::Loop(settings, input) => settings.and_then(|s| self.run_looper(id, s, input)),
        };

        match outputs {
            Ok(outputs) => {
                let expected = self.env.node(id).map(|n| n.node_type.outputs.len()).unwrap_or(0);
                if outputs.len() != expected {
                    let path = self.env.node(id).map(|n| n.path.clone()).unwrap_or_default();
                    let error = KilnError::cook(
                        path,
                        format!("produced {} outputs, expected {}", outputs.len(), expected),
                    );
                    return Err((error, warnings));
                }
                Ok(Cooked {
                    outputs,
                    warnings,
                    loop_sensitive,
                })
            }
            Err(e) => Err((e, warnings)),
        }
    }

    fn commit(
        &mut self,
        id: NodeId,
        cooked: Cooked,
        consumed: Vec<(ConnectionId, u64)>,
        elapsed: std::time::Duration,
    ) {
        let changed: Vec<bool> = match self.env.node(id) {
            Ok(node) => cooked
                .outputs
                .iter()
                .enumerate()
                .map(|(i, items)| node.cache.output.get(i) != Some(items) || node.cache.revision(i) == 0)
                .collect(),
            Err(_) => return,
        };
        let mut revisions = Vec::with_capacity(changed.len());
        for (i, changed) in changed.iter().enumerate() {
            let previous = self.env.node(id).map(|n| n.cache.revision(i)).unwrap_or(0);
            revisions.push(if *changed { self.env.next_revision() } else { previous });
        }

        if let Ok(node) = self.env.node_mut(id) {
            let cache = &mut node.cache;
            cache.output = cooked.outputs;
            cache.revisions = revisions;
            cache.consumed = consumed;
            cache.cook_count += 1;
            cache.last_cook = Some(elapsed);
            cache.errors.clear();
            cache.warnings = cooked.warnings;
            cache.loop_sensitive = cooked.loop_sensitive;
            node.state = CookState::Unchanged;
        }
    }

    /// Record a failure. The previous output stays visible.
    fn fail(&mut self, id: NodeId, errors: Vec<String>, warnings: Vec<String>) {
        if let Ok(node) = self.env.node_mut(id) {
            node.cache.errors = errors;
            node.cache.warnings = warnings;
            node.state = CookState::Uncooked;
        }
    }

    fn set_state(&mut self, id: NodeId, state: CookState) {
        if let Ok(node) = self.env.node_mut(id) {
            node.state = state;
        }
    }

    /// Innermost running loop that owns `node_path`.
    fn frame_for(&mut self, node_path: &str) -> Option<&mut LoopFrame> {
        self.frames
            .iter_mut()
            .rev()
            .find(|f| path::is_within(node_path, &f.scope))
    }

    /// Whether a `cook_loops` frame still has to force this node in the current iteration.
    fn loop_forces(&mut self, id: NodeId, node_path: &str) -> bool {
        match self.frame_for(node_path) {
            Some(frame) if frame.force => frame.cooked.insert(id),
            _ => false,
        }
    }

    fn loop_index(&self, node_path: &str) -> Option<i64> {
        self.frames
            .iter()
            .rev()
            .find(|f| path::is_within(node_path, &f.scope))
            .map(|f| f.index)
    }

    fn run_looper(&mut self, id: NodeId, settings: LoopSettings, input: Items) -> Result<Vec<Items>> {
        let (input_id, output_id) = self.env.ensure_loop_boundaries(self.catalog, id)?;
        let scope = self.env.node(id)?.path.clone();
        let started = Instant::now();

        let mut accumulated = Items::new();
        let mut carry = input.clone();
        let mut count = 0usize;

        for index in settings.iterations(input.len()) {
            let elapsed = started.elapsed().as_secs_f64();
            if settings.timeout_limit > 0.0 && elapsed > settings.timeout_limit {
                warn!(looper = %scope, iteration = index, elapsed_secs = elapsed, "Looper timed out");
                return Err(KilnError::LoopTimeout {
                    iteration: index,
                    elapsed_secs: elapsed,
                    limit_secs: settings.timeout_limit,
                });
            }

            let bound = if settings.feedback {
                carry.clone()
            } else {
                input.clone()
            };
            self.env.bind_loop_input(input_id, bound, index);

            self.frames.push(LoopFrame {
                scope: scope.clone(),
                index,
                force: settings.cook_loops,
                cooked: HashSet::new(),
            });
            let ok = self.evaluate(output_id, Some(id), false);
            self.frames.pop();

            if !ok {
                let cause = self.root_cause(output_id);
                return Err(KilnError::cook(
                    scope,
                    format!("iteration {} failed: {}", index, cause),
                ));
            }

            let result = self.env.node(output_id)?.cache.port(0).to_vec();
            let size = if settings.feedback {
                carry = result;
                items_size(&carry)
            } else {
                accumulated.extend(result);
                items_size(&accumulated)
            };
            count += 1;
            trace!(looper = %scope, iteration = index, bytes = size, "Iteration done");

            if settings.data_limit > 0 && size > settings.data_limit {
                warn!(looper = %scope, iteration = index, bytes = size, "Looper data limit exceeded");
                return Err(KilnError::LoopDataLimit {
                    iteration: index,
                    bytes: size,
                    limit: settings.data_limit,
                });
            }
        }

        debug!(looper = %scope, iterations = count, feedback = settings.feedback, "Loop finished");
        Ok(vec![if settings.feedback { carry } else { accumulated }])
    }

    /// Follow failed inputs upstream to the node that actually failed.
    fn root_cause(&self, start: NodeId) -> String {
        let mut current = start;
        let mut seen = HashSet::new();
        while seen.insert(current) {
            let failed_input = self
                .env
                .connections()
                .inputs_of(current)
                .into_iter()
                .find(|c| {
                    self.env
                        .node(c.from)
                        .map(|n| !n.cache.errors.is_empty() && n.state == CookState::Uncooked)
                        .unwrap_or(false)
                });
            match failed_input {
                Some(conn) => current = conn.from,
                None => break,
            }
        }
        match self.env.node(current) {
            Ok(node) => format!(
                "{}: {}",
                node.path,
                node.cache.errors.first().map(String::as_str).unwrap_or("unknown error")
            ),
            Err(_) => current.to_string(),
        }
    }
}
