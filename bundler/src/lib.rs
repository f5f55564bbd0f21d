//! # sandpit-bundler - the compilation engine
//!
//! Ingests a set of user-authored source files, compiles each through its
//! preset's transform chain, links them into a module graph with correct
//! dependency ordering, and hands back an [`Evaluator`] that runs the
//! program inside an embedded page. Subsequent compile requests recompile
//! incrementally and drive hot module replacement where the preset allows
//! it; everything else escalates to a full reload.
//!
//! The orchestrator here owns one compile request end to end:
//!
//! 1. toggle the async FS bridge, initialize the preset (first time only)
//! 2. diff the incoming files against the virtual FS and reset compilation
//!    on changed modules
//! 3. resolve the dependency manifest and preload packages when
//!    `package.json` changed
//! 4. resolve the entry, schedule the transformation closure, await it
//! 5. snapshot the transpiled module map and publish the evaluate plan
//!
//! Status transitions are monotonic per request:
//! `initializing -> installing-dependencies -> transpiling -> evaluating ->
//! done`, with `error` terminal.

pub mod error;
pub mod eval;
pub mod graph;
pub mod module;
pub mod preset;
pub mod protocol;
pub mod resolver;
pub mod scheduler;
pub mod shims;
pub mod transform;

use std::sync::Arc;

use indexmap::IndexMap;
use once_cell::sync::Lazy;
use parking_lot::{Mutex, RwLock};
use regex::Regex;
use rustc_hash::FxHashSet;
use serde_json::Value;
use tokio::sync::mpsc;
use tracing::debug;

use sandpit_registry::{dependency_signature, CdnConfig, DependencySet, PackageRegistry};
use sandpit_vfs::{path, BridgeLayer, FileSystem};

pub use error::{BundleError, SharedError};
pub use eval::{EvalOutcome, Evaluator};
pub use module::{HotState, Module};
pub use protocol::{
    ActionPayload, BundleFile, BundleFileEntry, BundlerState, ConsoleRecord, ErrorAction,
    EventSink, InboundMessage, IncomingModule, LogLevel, OutboundMessage, StackFrame, Status,
    TranspiledModule, TranspiledSource,
};

use graph::ModuleGraph;
use preset::Preset;
use protocol::OutboundMessage as Msg;
use resolver::Resolver;
use scheduler::{JobResult, SharedJob, TransformQueue};
use transform::TransformCtx;

/// One compile request from the host.
#[derive(Debug, Clone, Default)]
pub struct CompileRequest {
    /// Absolute path to file contents.
    pub files: IndexMap<String, String>,
    pub template: String,
    pub has_file_resolver: bool,
    pub log_level: Option<LogLevel>,
}

impl CompileRequest {
    pub fn from_message(message: InboundMessage) -> Option<Self> {
        match message {
            InboundMessage::Compile {
                modules,
                template,
                has_file_resolver,
                log_level,
            } => Some(Self {
                files: modules
                    .into_values()
                    .map(|module| (module.path, module.code))
                    .collect(),
                template,
                has_file_resolver,
                log_level,
            }),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
pub enum CompileStatus {
    /// The closure compiled; evaluate next.
    Ready,
    /// HTML without any JS entry: the evaluator only renders the page.
    HtmlOnly,
    /// Nothing to bundle; the host shows its empty state.
    EmptyProject,
    /// The request escalated to a full reload; reset state and compile
    /// again with a fresh evaluator.
    FullReload,
    Failed(SharedError),
}

#[derive(Debug, Clone)]
pub struct CompileOutcome {
    pub status: CompileStatus,
}

impl CompileOutcome {
    pub fn is_ready(&self) -> bool {
        matches!(self.status, CompileStatus::Ready | CompileStatus::HtmlOnly)
    }

    pub fn needs_full_reload(&self) -> bool {
        matches!(self.status, CompileStatus::FullReload)
    }

    pub fn error(&self) -> Option<&SharedError> {
        match &self.status {
            CompileStatus::Failed(err) => Some(err),
            _ => None,
        }
    }
}

/// What the evaluator runs: runtime modules first, then the entry, against
/// the page body.
#[derive(Debug, Clone, Default)]
pub(crate) struct EvalPlan {
    pub(crate) entry: Option<String>,
    pub(crate) runtimes: Vec<String>,
    pub(crate) html: String,
}

pub struct BundlerOptions {
    pub cdn: CdnConfig,
    /// Async FS bridge to an external file resolver, when the host provides
    /// one. Enabled per compile request via `hasFileResolver`.
    pub bridge: Option<BridgeLayer>,
}

impl Default for BundlerOptions {
    fn default() -> Self {
        Self {
            cdn: CdnConfig::default(),
            bridge: None,
        }
    }
}

struct CompileState {
    first_load: bool,
    dependency_signature: Option<String>,
    known_files: FxHashSet<String>,
    eval_plan: EvalPlan,
    log_level: LogLevel,
}

pub(crate) struct Inner {
    fs: FileSystem,
    registry: PackageRegistry,
    graph: ModuleGraph,
    queue: TransformQueue,
    resolver: Resolver,
    events: EventSink,
    preset: RwLock<Option<Arc<Preset>>>,
    state: Mutex<CompileState>,
}

/// The bundler instance: owns all mutable state for one sandbox. Test
/// harnesses construct fresh instances; nothing here is process-global.
pub struct Bundler {
    inner: Arc<Inner>,
}

impl Bundler {
    pub fn new(options: BundlerOptions) -> Result<Self, BundleError> {
        let registry = PackageRegistry::new(options.cdn);
        let mut builder = FileSystem::builder().memory();
        if let Some(bridge) = options.bridge {
            builder = builder.bridge(bridge);
        }
        let fs = builder.packages(registry.store()).build();
        shims::seed(&fs)?;
        let resolver = Resolver::new(fs.clone());
        Ok(Self {
            inner: Arc::new(Inner {
                fs,
                registry,
                graph: ModuleGraph::new(),
                queue: TransformQueue::default(),
                resolver,
                events: EventSink::default(),
                preset: RwLock::new(None),
                state: Mutex::new(CompileState {
                    first_load: true,
                    dependency_signature: None,
                    known_files: FxHashSet::default(),
                    eval_plan: EvalPlan::default(),
                    log_level: LogLevel::default(),
                }),
            }),
        })
    }

    pub fn with_defaults() -> Result<Self, BundleError> {
        Self::new(BundlerOptions::default())
    }

    /// Subscribe to outbound protocol messages. The `initialized` handshake
    /// arrives first.
    pub fn subscribe(&self) -> mpsc::UnboundedReceiver<OutboundMessage> {
        self.inner.events.subscribe()
    }

    /// Snapshot of one module, mainly for tests and observers.
    pub fn module(&self, path: &str) -> Option<Module> {
        self.inner.graph.get(path)
    }

    /// Schedule one module's transformation and await its settlement.
    pub async fn transform_module(&self, path: &str) -> Result<(), SharedError> {
        Inner::schedule_transform(&self.inner, path).await
    }

    /// Await the transitive compile closure rooted at `path`, surfacing the
    /// first captured compilation error.
    pub async fn module_finished(&self, path: &str) -> Result<(), SharedError> {
        self.inner.module_finished(path).await
    }

    /// Reset the bundler to a fresh first-load state. Drivers call this
    /// after a `FullReload` outcome, standing in for the host page reload.
    pub fn reset(&self) {
        self.inner.reset_for_reload();
    }

    /// Drive one compile request end to end. Infallible at the call site:
    /// failures are reported through the outcome and the message stream.
    pub async fn compile(&self, request: CompileRequest) -> CompileOutcome {
        let inner = &self.inner;
        let first_load = inner.state.lock().first_load;
        inner.events.emit(Msg::Start { first_load });
        inner.events.emit(Msg::Status {
            status: Status::Initializing,
        });
        inner.fs.set_bridge_enabled(request.has_file_resolver);
        inner.state.lock().log_level = request.log_level.unwrap_or_default();
        inner.resolver.reset_cache();

        let preset = match inner.ensure_preset(&request.template) {
            Ok(preset) => preset,
            Err(err) => return inner.fail(err),
        };
        inner.events.emit(Msg::Status {
            status: Status::InstallingDependencies,
        });

        let changed = inner.write_files(&request.files);
        let package_json_changed = changed.iter().any(|p| p == "/package.json");
        debug!(changed = changed.len(), first_load, "file diff applied");

        if !first_load && !changed.is_empty() {
            if !preset.hmr_enabled() {
                inner.events.emit(Msg::Refresh);
                inner.reset_for_reload();
                return CompileOutcome {
                    status: CompileStatus::FullReload,
                };
            }
            let mut escalate = false;
            for path in &changed {
                if !inner.graph.contains(path) {
                    continue;
                }
                if inner.is_accepted(path) {
                    inner.graph.reset_compilation(path);
                    inner.graph.mark_dirty(path, true);
                } else {
                    escalate = true;
                    break;
                }
            }
            if escalate {
                inner.events.emit(Msg::Refresh);
                inner.reset_for_reload();
                return CompileOutcome {
                    status: CompileStatus::FullReload,
                };
            }
        }

        if first_load || package_json_changed {
            if let Some(mut deps) = inner.project_dependencies().await {
                preset.augment_dependencies(&mut deps);
                let signature = dependency_signature(&deps);
                let signature_changed = {
                    let state = inner.state.lock();
                    state.dependency_signature.is_some()
                        && state.dependency_signature.as_deref() != Some(signature.as_str())
                };
                if signature_changed && !first_load {
                    inner.events.emit(Msg::Refresh);
                    inner.reset_for_reload();
                    inner.state.lock().dependency_signature = Some(signature);
                    return CompileOutcome {
                        status: CompileStatus::FullReload,
                    };
                }
                inner.state.lock().dependency_signature = Some(signature);
                if !deps.is_empty() {
                    let mut manifest = inner.registry.fetch_manifest(&deps).await;
                    if let Err(err) = inner.registry.preload_modules(&manifest).await {
                        return inner.fail(BundleError::Registry(err));
                    }
                    if let Err(err) = inner.registry.load_module_dependencies(&mut manifest).await
                    {
                        return inner.fail(BundleError::Registry(err));
                    }
                }
            }
        }

        let has_html = request.files.keys().any(|p| p.ends_with(".html"))
            || inner.fs.exists_sync("/index.html");
        let entry = match inner.detect_entry(&preset).await {
            Ok(entry) => entry,
            Err(err) if err.is_entry_point_unresolved() => {
                let html = inner.html_source(&preset).await;
                inner.state.lock().first_load = false;
                if has_html {
                    inner.set_eval_plan(EvalPlan {
                        entry: None,
                        runtimes: Vec::new(),
                        html,
                    });
                    inner.events.emit(Msg::Done {
                        compilaton_error: false,
                    });
                    return CompileOutcome {
                        status: CompileStatus::HtmlOnly,
                    };
                }
                inner.events.emit(Msg::Status {
                    status: Status::Done,
                });
                inner.events.emit(Msg::Done {
                    compilaton_error: false,
                });
                return CompileOutcome {
                    status: CompileStatus::EmptyProject,
                };
            }
            Err(err) => return inner.fail(err),
        };

        inner.events.emit(Msg::Status {
            status: Status::Transpiling,
        });
        let runtime_paths: Vec<String> = preset
            .runtimes()
            .iter()
            .map(|runtime| runtime.path.to_string())
            .collect();
        if first_load {
            for path in &runtime_paths {
                Inner::schedule_transform(&self.inner, path);
            }
        }
        // Dirty modules include the changed set from this request plus any
        // module an evaluation invalidated since the last compile.
        for path in inner.graph.dirty_modules() {
            Inner::schedule_transform(&self.inner, &path);
        }
        Inner::schedule_transform(&self.inner, &entry);
        for root in runtime_paths.iter().chain(std::iter::once(&entry)) {
            if let Err(err) = inner.module_finished(root).await {
                return inner.fail_shared(err);
            }
        }

        inner.graph.mark_entry(&entry, true);
        let html = inner.html_source(&preset).await;
        inner.set_eval_plan(EvalPlan {
            entry: Some(entry),
            runtimes: runtime_paths,
            html,
        });
        inner.events.emit(Msg::State {
            state: inner.snapshot(),
        });
        inner.state.lock().first_load = false;
        CompileOutcome {
            status: CompileStatus::Ready,
        }
    }

    pub(crate) fn inner(&self) -> Arc<Inner> {
        self.inner.clone()
    }
}

impl Inner {
    pub(crate) fn events(&self) -> &EventSink {
        &self.events
    }

    pub(crate) fn graph(&self) -> &ModuleGraph {
        &self.graph
    }

    pub(crate) fn fs(&self) -> &FileSystem {
        &self.fs
    }

    pub(crate) fn eval_plan(&self) -> EvalPlan {
        self.state.lock().eval_plan.clone()
    }

    pub(crate) fn log_level(&self) -> LogLevel {
        self.state.lock().log_level
    }

    fn set_eval_plan(&self, plan: EvalPlan) {
        self.state.lock().eval_plan = plan;
    }

    fn ensure_preset(&self, template: &str) -> Result<Arc<Preset>, BundleError> {
        let mut slot = self.preset.write();
        if let Some(preset) = slot.clone() {
            return Ok(preset);
        }
        let preset = preset::preset_for(template)?;
        if let Some(extension) = preset.template_extension() {
            self.resolver.push_extension(extension);
        }
        for runtime in preset.runtimes() {
            self.fs.write_sync(runtime.path, runtime.source)?;
        }
        *slot = Some(preset.clone());
        Ok(preset)
    }

    /// Apply the request's file set to the FS. Returns changed paths;
    /// request files that disappeared are removed and count as changes.
    fn write_files(&self, files: &IndexMap<String, String>) -> Vec<String> {
        let mut changed: Vec<String> = Vec::new();
        let normalized: FxHashSet<String> =
            files.keys().map(|p| path::normalize(p)).collect();
        {
            let mut state = self.state.lock();
            for stale in state.known_files.difference(&normalized) {
                self.fs.remove_sync(stale);
                self.graph.remove(stale);
                changed.push(stale.clone());
            }
            state.known_files = normalized;
        }
        for (file_path, code) in files {
            let file_path = path::normalize(file_path);
            let unchanged = matches!(self.fs.read_sync(&file_path), Ok(existing) if existing == *code);
            if unchanged {
                continue;
            }
            let _ = self.fs.write_sync(&file_path, code.clone());
            changed.push(file_path);
        }
        changed
    }

    /// Whether the module itself or any initiator ancestor accepted hot
    /// updates during its last evaluation.
    fn is_accepted(&self, path: &str) -> bool {
        let mut visited: FxHashSet<String> = FxHashSet::default();
        let mut queue: Vec<String> = vec![path.to_string()];
        while let Some(current) = queue.pop() {
            if !visited.insert(current.clone()) {
                continue;
            }
            if let Some(module) = self.graph.get(&current) {
                if module.hot.is_hot {
                    return true;
                }
            }
            queue.extend(self.graph.initiators_of(&current));
        }
        false
    }

    async fn project_dependencies(&self) -> Option<DependencySet> {
        let raw = self.fs.read("/package.json").await.ok()?;
        let parsed: Value = serde_json::from_str(&raw).ok()?;
        let mut deps = DependencySet::default();
        if let Some(map) = parsed.get("dependencies").and_then(|d| d.as_object()) {
            for (name, range) in map {
                if let Some(range) = range.as_str() {
                    deps.insert(name.clone(), range.to_string());
                }
            }
        }
        Some(deps)
    }

    async fn detect_entry(&self, preset: &Preset) -> Result<String, BundleError> {
        if let Ok(raw) = self.fs.read("/package.json").await {
            if let Ok(parsed) = serde_json::from_str::<Value>(&raw) {
                if let Some(main) = parsed.get("main").and_then(|m| m.as_str()) {
                    let spec = if main.starts_with("./") || main.starts_with('/') {
                        main.to_string()
                    } else {
                        format!("./{main}")
                    };
                    if let Ok(resolved) = self.resolver.resolve(&spec, "/package.json").await {
                        return Ok(resolved);
                    }
                }
            }
        }
        for candidate in preset.entry_candidates() {
            if self.fs.exists(candidate).await {
                return Ok((*candidate).to_string());
            }
        }
        Err(BundleError::EntryPointUnresolved)
    }

    async fn html_source(&self, preset: &Preset) -> String {
        match self.fs.read("/index.html").await {
            Ok(html) => html,
            Err(_) => preset.default_html().to_string(),
        }
    }

    fn snapshot(&self) -> BundlerState {
        let mut transpiled_modules = IndexMap::new();
        for module in self.graph.compiled_modules() {
            transpiled_modules.insert(
                format!("{}:", module.path),
                TranspiledModule {
                    source: TranspiledSource {
                        is_entry: module.is_entry,
                        file_name: module.path.clone(),
                        compiled_code: module.compiled.clone().unwrap_or_default(),
                    },
                },
            );
        }
        BundlerState { transpiled_modules }
    }

    fn reset_for_reload(&self) {
        self.graph.clear();
        self.queue.clear();
        self.resolver.reset_cache();
        self.fs.reset_cache();
        let mut state = self.state.lock();
        state.first_load = true;
        state.eval_plan = EvalPlan::default();
    }

    fn fail(&self, err: BundleError) -> CompileOutcome {
        self.fail_shared(Arc::new(err))
    }

    fn fail_shared(&self, err: SharedError) -> CompileOutcome {
        self.events.emit(Msg::Action(error_to_action(&err)));
        self.events.emit(Msg::Done {
            compilaton_error: true,
        });
        self.events.emit(Msg::Status {
            status: Status::Error,
        });
        self.state.lock().first_load = false;
        CompileOutcome {
            status: CompileStatus::Failed(err),
        }
    }

    /// Schedule a module's transformation unless it is already settled.
    /// Returns the (possibly shared) in-flight job.
    fn schedule_transform(inner: &Arc<Inner>, module_path: &str) -> SharedJob {
        if let Some(module) = inner.graph.get(module_path) {
            if module.is_settled() {
                return TransformQueue::ready();
            }
        }
        let work_inner = inner.clone();
        let work_path = module_path.to_string();
        inner.queue.schedule(module_path, async move {
            let result = Inner::transform_one(&work_inner, &work_path).await;
            work_inner.queue.finish(&work_path);
            result
        })
    }

    /// Read the latest source, run the preset's transform chain, register
    /// discovered dependencies, and fan out their transformations without
    /// awaiting them. Transformer and resolution failures are captured on
    /// the module so sibling compiles continue.
    async fn transform_one(inner: &Arc<Inner>, module_path: &str) -> JobResult {
        let _permit = inner.queue.acquire().await;
        let source = match inner.fs.read(module_path).await {
            Ok(source) => source,
            Err(_) => {
                inner.graph.upsert_source(module_path, String::new());
                inner.graph.set_error(
                    module_path,
                    Arc::new(BundleError::not_found(module_path, module_path)),
                );
                return Ok(());
            }
        };
        inner.graph.upsert_source(module_path, source.clone());

        let preset = inner
            .preset
            .read()
            .clone()
            .ok_or_else(|| Arc::new(BundleError::PresetMissing))?;
        let store = inner.registry.store();
        let transpiled = store.is_transpiled(module_path);
        let known_deps = if transpiled {
            store
                .file(module_path)
                .map(|file| file.deps)
                .unwrap_or_default()
        } else {
            Vec::new()
        };
        let chain = match preset.map_transformers(module_path, transpiled, known_deps) {
            Ok(chain) => chain,
            Err(failure) => {
                inner.graph.set_error(
                    module_path,
                    Arc::new(BundleError::Transform {
                        path: module_path.to_string(),
                        message: failure.message,
                    }),
                );
                return Ok(());
            }
        };

        let ctx = TransformCtx { path: module_path };
        let mut code = source;
        let mut dependencies: Vec<String> = Vec::new();
        for (transformer, config) in &chain {
            match transformer.transform(&ctx, code, config) {
                Ok(output) => {
                    code = output.code;
                    dependencies.extend(output.dependencies);
                }
                Err(failure) => {
                    inner.graph.set_error(
                        module_path,
                        Arc::new(BundleError::Transform {
                            path: module_path.to_string(),
                            message: failure.message,
                        }),
                    );
                    return Ok(());
                }
            }
        }
        inner.graph.set_compiled(module_path, code);

        let mut seen: FxHashSet<String> = FxHashSet::default();
        for spec in dependencies {
            if !seen.insert(spec.clone()) {
                continue;
            }
            let resolved = match inner.resolver.resolve(&spec, module_path).await {
                Ok(resolved) => resolved,
                Err(err) => {
                    inner.graph.set_error(module_path, Arc::new(err));
                    return Ok(());
                }
            };
            inner.graph.add_dependency(module_path, &spec, &resolved);
            Inner::schedule_transform(inner, &resolved);
        }
        Ok(())
    }

    /// Await the transitive dependency closure, cycle-safe, surfacing the
    /// first captured compilation error.
    async fn module_finished(&self, entry: &str) -> Result<(), SharedError> {
        let mut visited: FxHashSet<String> = FxHashSet::default();
        let mut stack: Vec<String> = vec![entry.to_string()];
        while let Some(current) = stack.pop() {
            if !visited.insert(current.clone()) {
                continue;
            }
            if let Some(job) = self.queue.get_in_flight(&current) {
                job.await?;
            }
            let Some(module) = self.graph.get(&current) else {
                return Err(Arc::new(BundleError::not_found(&current, entry)));
            };
            if let Some(err) = module.compilation_error {
                return Err(err);
            }
            for dep in module.dependencies {
                if !visited.contains(&dep) {
                    stack.push(dep);
                }
            }
        }
        Ok(())
    }
}

static RE_STACK_FRAME: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?m)^\s*at\s+(?:(?P<func>[\w$.<>\[\]]+)\s+\()?(?P<file>[^()\s]+?)(?::(?P<line>\d+))?(?::(?P<col>\d+))?\)?\s*$").unwrap()
});

fn parse_stack(stack: Option<&str>) -> Vec<StackFrame> {
    let Some(stack) = stack else {
        return Vec::new();
    };
    RE_STACK_FRAME
        .captures_iter(stack)
        .map(|caps| StackFrame {
            function_name: caps.name("func").map(|m| m.as_str().to_string()),
            file_name: caps.name("file").map(|m| m.as_str().to_string()),
            line_number: caps.name("line").and_then(|m| m.as_str().parse().ok()),
            column_number: caps.name("col").and_then(|m| m.as_str().parse().ok()),
        })
        .collect()
}

pub(crate) fn error_to_action(err: &BundleError) -> ErrorAction {
    let (title, error_path, frames) = match err {
        BundleError::ModuleNotFound { origin, .. } => {
            ("Module not found", Some(origin.clone()), Vec::new())
        }
        BundleError::Transform { path, .. } => ("Build error", Some(path.clone()), Vec::new()),
        BundleError::Evaluation { stack, .. } => {
            let frames = parse_stack(stack.as_deref());
            let path = frames.first().and_then(|f| f.file_name.clone());
            ("Runtime Exception", path, frames)
        }
        BundleError::EntryPointUnresolved => ("Entry point not found", None, Vec::new()),
        _ => ("Error", None, Vec::new()),
    };
    let line = frames.first().and_then(|f| f.line_number);
    let column = frames.first().and_then(|f| f.column_number);
    ErrorAction {
        action: "show-error".to_string(),
        title: title.to_string(),
        line,
        column,
        path: error_path,
        message: err.to_string(),
        payload: ActionPayload { frames },
    }
}
