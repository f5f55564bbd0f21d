//! Evaluation linker.
//!
//! Compiled modules are registered into an embedded QuickJS context as
//! `(require, module, exports, __hot__)` factories; the harness's `require`
//! looks specifiers up in each module's precomputed dependency map and
//! executes factories on first demand, which yields dependency-order
//! evaluation and CommonJS cycle semantics for free. Host callbacks carry
//! console output and hot-replacement events back out, and materialize
//! built-in shims for specifiers `require` cannot find in the map -- the one
//! place lookup is allowed to side-effect the module map.

use std::sync::Arc;

use rquickjs::{Context, Ctx, Function, Runtime};
use serde_json::Value;

use crate::error::BundleError;
use crate::graph::ModuleGraph;
use crate::module::Module;
use crate::protocol::{ConsoleRecord, LogLevel, OutboundMessage, Status};
use crate::shims;
use crate::{Bundler, Inner};

const HARNESS: &str = include_str!("harness.js");

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EvalOutcome {
    Completed,
    /// A module called `hot.invalidate`; it has been reset and the caller
    /// should restart the compile before evaluating again.
    NeedsRecompile,
}

/// The evaluate thunk returned by a successful compile. Keeps one QuickJS
/// context alive across runs so hot updates re-evaluate in place; after a
/// full reload the driver constructs a fresh `Evaluator`.
pub struct Evaluator {
    runtime: Runtime,
    context: Context,
    inner: Arc<Inner>,
    started: bool,
}

impl Evaluator {
    pub fn new(bundler: &Bundler) -> Result<Self, BundleError> {
        let inner = bundler.inner();
        let runtime = Runtime::new().map_err(engine_error)?;
        let context = Context::full(&runtime).map_err(engine_error)?;
        context.with(|ctx| -> Result<(), BundleError> {
            install_host_functions(&ctx, inner.clone())?;
            eval_chunk(&ctx, HARNESS)
        })?;
        Ok(Self {
            runtime,
            context,
            inner,
            started: false,
        })
    }

    /// First invocation evaluates runtime modules in registration order and
    /// then the entry; subsequent invocations re-evaluate only dirty
    /// modules, initiators first.
    pub fn run(&mut self) -> Result<EvalOutcome, BundleError> {
        let events = self.inner.events();
        events.emit(OutboundMessage::Status {
            status: Status::Evaluating,
        });
        let result = if self.started {
            self.hot_run()
        } else {
            self.first_run()
        };
        self.drain_jobs();
        match result {
            Ok(()) => {
                self.started = true;
                let graph = self.inner.graph();
                let invalidated = graph.invalidated_modules();
                if !invalidated.is_empty() {
                    for path in &invalidated {
                        graph.reset_compilation(path);
                        graph.mark_invalidated(path, false);
                        graph.mark_dirty(path, true);
                    }
                    return Ok(EvalOutcome::NeedsRecompile);
                }
                events.emit(OutboundMessage::Status {
                    status: Status::Done,
                });
                events.emit(OutboundMessage::Done {
                    compilaton_error: false,
                });
                events.emit(OutboundMessage::Success);
                Ok(EvalOutcome::Completed)
            }
            Err(err) => {
                events.emit(OutboundMessage::Action(crate::error_to_action(&err)));
                events.emit(OutboundMessage::Status {
                    status: Status::Error,
                });
                Err(err)
            }
        }
    }

    fn first_run(&self) -> Result<(), BundleError> {
        let plan = self.inner.eval_plan();
        let modules = self.inner.graph().compiled_modules();
        self.context.with(|ctx| -> Result<(), BundleError> {
            eval_chunk(&ctx, &format!("__sandpit.setBody({});", js_str(&plan.html)))?;
            for module in &modules {
                eval_chunk(&ctx, &registration(module))?;
            }
            for runtime in &plan.runtimes {
                eval_chunk(&ctx, &format!("__sandpit.requireModule({});", js_str(runtime)))?;
            }
            if let Some(entry) = &plan.entry {
                eval_chunk(&ctx, &format!("__sandpit.requireModule({});", js_str(entry)))?;
            }
            eval_chunk(&ctx, "__sandpit.flushTimers();")
        })
    }

    fn hot_run(&self) -> Result<(), BundleError> {
        let graph = self.inner.graph();
        let dirty = graph.dirty_modules();
        if dirty.is_empty() {
            return Ok(());
        }
        let plan = self.inner.eval_plan();
        let ordered = order_initiator_first(graph, plan.entry.as_deref(), dirty);
        let accepters = find_accepters(graph, &ordered);
        for path in &ordered {
            graph.mark_hot(path, false);
        }
        self.context.with(|ctx| -> Result<(), BundleError> {
            for path in &ordered {
                if let Some(module) = graph.get(path) {
                    if module.compiled.is_some() {
                        eval_chunk(&ctx, &registration(&module))?;
                    }
                }
            }
            eval_chunk(&ctx, &format!("__sandpit.hotUpdate({});", js_array(&ordered)))?;
            eval_chunk(
                &ctx,
                &format!("__sandpit.acceptUpdate({});", js_array(&accepters)),
            )?;
            eval_chunk(&ctx, "__sandpit.flushTimers();")
        })?;
        for path in &ordered {
            graph.mark_dirty(path, false);
        }
        Ok(())
    }

    /// Drain the microtask queue (promise reactions, `nextTick`). Jobs that
    /// raise are consumed and skipped; the bound protects against jobs that
    /// enqueue forever.
    fn drain_jobs(&self) {
        let mut guard = 10_000usize;
        while guard > 0 {
            guard -= 1;
            match self.runtime.execute_pending_job() {
                Ok(true) => continue,
                Ok(false) => break,
                Err(_) => continue,
            }
        }
    }

    /// Evaluate an expression and return its JSON projection. Also the
    /// console REPL pass-through for the host's `evaluate` message.
    pub fn eval_json(&self, expr: &str) -> Result<Value, BundleError> {
        self.context.with(|ctx| -> Result<Value, BundleError> {
            let code = format!("JSON.stringify((function () {{ return ({expr}); }})())");
            match ctx.eval::<Option<String>, _>(code) {
                Ok(Some(raw)) => Ok(serde_json::from_str(&raw).unwrap_or(Value::Null)),
                Ok(None) => Ok(Value::Null),
                Err(err) => Err(catch_error(&ctx, err)),
            }
        })
    }

    /// Run a console command and emit the result as a `console` message.
    pub fn evaluate_command(&self, command: &str) {
        let events = self.inner.events();
        match self.eval_json(command) {
            Ok(value) => events.emit(OutboundMessage::Console {
                log: None,
                result: Some(value),
            }),
            Err(err) => events.emit(OutboundMessage::Console {
                log: Some(ConsoleRecord {
                    method: "error".to_string(),
                    args: vec![err.to_string()],
                }),
                result: None,
            }),
        }
    }
}

/// Ancestors before descendants: sort by dependency-hops from the entry.
fn order_initiator_first(
    graph: &ModuleGraph,
    entry: Option<&str>,
    mut dirty: Vec<String>,
) -> Vec<String> {
    use std::collections::VecDeque;

    let mut depth: rustc_hash::FxHashMap<String, usize> = rustc_hash::FxHashMap::default();
    if let Some(entry) = entry {
        let mut queue = VecDeque::new();
        depth.insert(entry.to_string(), 0);
        queue.push_back(entry.to_string());
        while let Some(current) = queue.pop_front() {
            let current_depth = depth[&current];
            if let Some(module) = graph.get(&current) {
                for dep in module.dependencies {
                    if !depth.contains_key(&dep) {
                        depth.insert(dep.clone(), current_depth + 1);
                        queue.push_back(dep);
                    }
                }
            }
        }
    }
    dirty.sort_by_key(|path| depth.get(path).copied().unwrap_or(usize::MAX));
    dirty
}

/// For each dirty module, walk initiators upward to the nearest module whose
/// last evaluation accepted updates.
fn find_accepters(graph: &ModuleGraph, dirty: &[String]) -> Vec<String> {
    let mut accepters: Vec<String> = Vec::new();
    for path in dirty {
        let mut visited: rustc_hash::FxHashSet<String> = rustc_hash::FxHashSet::default();
        let mut queue: Vec<String> = vec![path.clone()];
        while let Some(current) = queue.pop() {
            if !visited.insert(current.clone()) {
                continue;
            }
            if let Some(module) = graph.get(&current) {
                if module.hot.is_hot {
                    if !accepters.contains(&current) {
                        accepters.push(current);
                    }
                    continue;
                }
            }
            queue.extend(graph.initiators_of(&current));
        }
    }
    accepters
}

fn install_host_functions(ctx: &Ctx<'_>, inner: Arc<Inner>) -> Result<(), BundleError> {
    let emit_inner = inner.clone();
    let emit = Function::new(ctx.clone(), move |kind: String, payload: String| {
        handle_emit(&emit_inner, &kind, &payload);
    })
    .map_err(engine_error)?;
    ctx.globals()
        .set("__sandpit_emit", emit)
        .map_err(engine_error)?;

    let missing = Function::new(ctx.clone(), move |spec: String, from: String| {
        materialize_missing(&inner, &spec, &from)
    })
    .map_err(engine_error)?;
    ctx.globals()
        .set("__sandpit_missing", missing)
        .map_err(engine_error)?;
    Ok(())
}

fn handle_emit(inner: &Inner, kind: &str, payload: &str) {
    let parsed: Value = serde_json::from_str(payload).unwrap_or(Value::Null);
    match kind {
        "console" => {
            if let Ok(record) = serde_json::from_value::<ConsoleRecord>(parsed) {
                if LogLevel::for_method(&record.method) > inner.log_level() {
                    return;
                }
                inner.events().emit(OutboundMessage::Console {
                    log: Some(record),
                    result: None,
                });
            }
        }
        "hot" => {
            let path = parsed.get("path").and_then(|p| p.as_str()).unwrap_or("");
            match parsed.get("event").and_then(|e| e.as_str()) {
                Some("accepted") => inner.graph().mark_hot(path, true),
                Some("invalidated") => inner.graph().mark_invalidated(path, true),
                _ => {}
            }
        }
        other => {
            tracing::debug!(kind = other, "ignoring unknown emit from sandbox");
        }
    }
}

/// `require` fallback: materialize a built-in shim on demand and hand its
/// registration code back to the harness.
fn materialize_missing(inner: &Inner, spec: &str, from: &str) -> Option<String> {
    let path = shims::shim_path(spec)?;
    let graph = inner.graph();
    if graph.get(&path).is_none_or(|m| m.compiled.is_none()) {
        let source = inner.fs().read_sync(&path).ok()?;
        graph.upsert_source(&path, source.clone());
        graph.set_compiled(&path, source);
    }
    graph.add_dependency(from, spec, &path);
    let module = graph.get(&path)?;
    Some(format!(
        "{}\n__sandpit.link({}, {}, {});",
        registration(&module),
        js_str(from),
        js_str(spec),
        js_str(&path)
    ))
}

fn registration(module: &Module) -> String {
    let dep_map =
        serde_json::to_string(&module.dependency_map).unwrap_or_else(|_| "{}".to_string());
    let code = module.compiled.as_deref().unwrap_or("");
    format!(
        "__sandpit.register({path}, {dep_map}, function (require, module, exports, __hot__) {{\n{code}\n}});\n//# sourceURL={raw}\n",
        path = js_str(&module.path),
        dep_map = dep_map,
        code = code,
        raw = module.path,
    )
}

fn eval_chunk(ctx: &Ctx<'_>, code: &str) -> Result<(), BundleError> {
    match ctx.eval::<(), _>(code) {
        Ok(()) => Ok(()),
        Err(err) => Err(catch_error(ctx, err)),
    }
}

fn catch_error(ctx: &Ctx<'_>, err: rquickjs::Error) -> BundleError {
    match err {
        rquickjs::Error::Exception => {
            let caught = ctx.catch();
            if let Some(object) = caught.as_object() {
                let message: Option<String> = object.get("message").ok().flatten();
                let stack: Option<String> = object.get("stack").ok().flatten();
                if let Some(message) = message {
                    return BundleError::Evaluation { message, stack };
                }
            }
            BundleError::Evaluation {
                message: format!("{caught:?}"),
                stack: None,
            }
        }
        other => BundleError::Engine(other.to_string()),
    }
}

fn engine_error(err: rquickjs::Error) -> BundleError {
    BundleError::Engine(err.to_string())
}

fn js_str(value: &str) -> String {
    Value::String(value.to_string()).to_string()
}

fn js_array(items: &[String]) -> String {
    serde_json::to_string(items).unwrap_or_else(|_| "[]".to_string())
}
