// ============================================================================
// 桥接上下文
// 一个引擎实例：运行时、执行上下文、句柄表、Promise 表、已注册类
// ============================================================================

use std::cell::{Cell, RefCell};
use std::rc::{Rc, Weak};

use crossbeam_channel::{unbounded, Receiver, Sender};
use rquickjs::{Coerced, Context, Ctx, Exception, Function, Object, Persistent, Runtime, Value};

use crate::bindings::js::{call_host, print, BridgeHost, SilentHost};
use crate::bindings::marshal::Marshal;
use crate::bindings::protocol::{ClassDescriptor, HostAction, JsAction, PrintLevel, Slot};
use crate::bindings::registry::Registry;
use crate::config::BridgeConfig;
use crate::core::error::{BridgeError, BridgeResult};
use crate::core::logging::LogSink;
use crate::scripting::classes::{self, ClassTable};
use crate::scripting::console;
use crate::scripting::dispatcher::Dispatcher;
use crate::scripting::modules::{HostLoader, HostResolver};
use crate::scripting::promise::PromiseTable;

/// 宿主对象与包装函数上的令牌键
pub const TARGET_MARKER: &str = "_$tar";
/// 投影类构造函数上的类 id 键
pub const CLASS_MARKER: &str = "_$class";

const RESULT_SLOTS: usize = 1;

/// 跨调用保存的引擎引用
pub type Stored = Persistent<Value<'static>>;

/// 上下文创建时缓存的全局对象
pub(crate) struct Intrinsics {
    sentinel: Stored,
    promise_ctor: Stored,
    promise_resolve: Stored,
}

/// 引擎回调与桥接上下文共享的状态
///
/// 脚本可见的闭包只持有 `Weak<Shared>`，上下文销毁后回调会抛出内部错误。
pub struct Shared {
    pub(crate) registry: RefCell<Registry<Stored>>,
    pub(crate) promises: RefCell<PromiseTable>,
    pub(crate) classes: RefCell<ClassTable>,
    pub(crate) intrinsics: RefCell<Option<Intrinsics>>,
    pub(crate) host: RefCell<Box<dyn BridgeHost>>,
    pub(crate) log: RefCell<LogSink>,
    /// 模块求值期间暂存的未处理拒绝原因
    deferred_rejections: RefCell<Option<Vec<Stored>>>,
    pub(crate) max_arguments: usize,
    pub(crate) finalized_tx: Sender<u64>,
    finalized_rx: Receiver<u64>,
    next_token: Cell<u64>,
}

impl Shared {
    fn new(host: Box<dyn BridgeHost>, max_arguments: usize) -> Self {
        let (finalized_tx, finalized_rx) = unbounded();
        Self {
            registry: RefCell::new(Registry::new()),
            promises: RefCell::new(PromiseTable::new()),
            classes: RefCell::new(ClassTable::default()),
            intrinsics: RefCell::new(None),
            host: RefCell::new(host),
            log: RefCell::new(LogSink::new()),
            deferred_rejections: RefCell::new(None),
            max_arguments,
            finalized_tx,
            finalized_rx,
            next_token: Cell::new(0),
        }
    }

    /// 新的实例令牌，从 1 开始且不复用
    pub(crate) fn next_token(&self) -> u64 {
        let token = self.next_token.get() + 1;
        self.next_token.set(token);
        token
    }

    /// 构造哨兵：只带这一个参数的构造调用不会回到宿主
    pub(crate) fn sentinel<'js>(&self, ctx: &Ctx<'js>) -> BridgeResult<Value<'js>> {
        let intrinsics = self.intrinsics.borrow();
        let intrinsics = intrinsics.as_ref().ok_or_else(not_installed)?;
        Ok(intrinsics.sentinel.clone().restore(ctx)?)
    }

    /// `Promise` 构造函数与 `Promise.resolve`
    pub(crate) fn promise_resolve<'js>(
        &self,
        ctx: &Ctx<'js>,
    ) -> BridgeResult<(Object<'js>, Function<'js>)> {
        let intrinsics = self.intrinsics.borrow();
        let intrinsics = intrinsics.as_ref().ok_or_else(not_installed)?;
        let ctor = intrinsics
            .promise_ctor
            .clone()
            .restore(ctx)?
            .into_object()
            .ok_or(BridgeError::NotConstructor)?;
        let resolve = intrinsics
            .promise_resolve
            .clone()
            .restore(ctx)?
            .into_function()
            .ok_or(BridgeError::NotFunction)?;
        Ok((ctor, resolve))
    }

    /// 诊断文本按行转给宿主
    pub(crate) fn write_log(&self, fragment: &str) {
        let lines = self.log.borrow_mut().write(fragment);
        for line in lines {
            tracing::debug!(target: "js_script::log", "{}", line);
            print(self, PrintLevel::Log, &line);
        }
    }

    /// 未处理的 Promise 拒绝写入日志；暂存期间只记录原因
    pub(crate) fn report_rejection(&self, reason: Value<'_>) {
        if let Some(deferred) = self.deferred_rejections.borrow_mut().as_mut() {
            let ctx = reason.ctx().clone();
            deferred.push(Persistent::save(&ctx, reason));
            return;
        }
        self.write_log(&format!(
            "Possibly unhandled promise rejection: {}",
            render_thrown(&reason)
        ));
    }

    pub(crate) fn defer_rejections(&self) {
        *self.deferred_rejections.borrow_mut() = Some(Vec::new());
    }

    /// 结束暂存，补报原因不是 `handled` 的拒绝
    pub(crate) fn release_rejections<'js>(&self, ctx: &Ctx<'js>, handled: Option<&Value<'js>>) {
        let deferred = self.deferred_rejections.borrow_mut().take().unwrap_or_default();
        for stored in deferred {
            let Ok(reason) = stored.restore(ctx) else {
                continue;
            };
            if handled == Some(&reason) {
                continue;
            }
            self.report_rejection(reason);
        }
    }

    fn flush_log(&self) {
        let rest = self.log.borrow_mut().flush();
        if let Some(rest) = rest {
            tracing::debug!(target: "js_script::log", "{}", rest);
            print(self, PrintLevel::Log, &rest);
        }
    }
}

fn not_installed() -> BridgeError {
    BridgeError::Init("bridge intrinsics are not installed".to_string())
}

pub(crate) fn upgrade(ctx: &Ctx<'_>, weak: &Weak<Shared>) -> rquickjs::Result<Rc<Shared>> {
    weak.upgrade()
        .ok_or_else(|| Exception::throw_internal(ctx, "Bridge context is gone"))
}

/// 抛出值的文本：值本身、换行，若有 `stack` 再附上栈与换行
pub(crate) fn render_thrown(value: &Value<'_>) -> String {
    let mut text = match value.get::<Coerced<String>>() {
        Ok(Coerced(text)) => text,
        Err(_) => format!("[{}]", value.type_of().as_str()),
    };
    text.push('\n');
    let stack = value
        .as_object()
        .and_then(|object| object.get::<_, Value>("stack").ok())
        .filter(|stack| !stack.is_undefined() && !stack.is_null());
    if let Some(Ok(Coerced(stack))) = stack.map(|stack| stack.get::<Coerced<String>>()) {
        text.push_str(&stack);
        text.push('\n');
    }
    text
}

/// 把待处理的脚本异常取出并渲染；其他引擎错误原样保留
pub(crate) fn settle(ctx: &Ctx<'_>, err: BridgeError) -> BridgeError {
    match err {
        BridgeError::Engine(inner) if inner.is_exception() => {
            BridgeError::Exception(render_thrown(&ctx.catch()))
        }
        other => other,
    }
}

fn install(ctx: &Ctx<'_>, shared: &Rc<Shared>) -> rquickjs::Result<()> {
    let sentinel = Object::new(ctx.clone())?;
    let promise_ctor: Object = ctx.globals().get("Promise")?;
    let promise_resolve: Function = promise_ctor.get("resolve")?;
    *shared.intrinsics.borrow_mut() = Some(Intrinsics {
        sentinel: Persistent::save(ctx, sentinel.into_value()),
        promise_ctor: Persistent::save(ctx, promise_ctor.into_value()),
        promise_resolve: Persistent::save(ctx, promise_resolve.into_value()),
    });
    console::install(ctx, shared)
}

/// Bridge context
///
/// 宿主写入 `arguments`，调用 `dispatch`，再从 `results` 读取答复。
/// 字段顺序即销毁顺序：所有保存的引用在运行时之前释放。
pub struct BridgeContext {
    shared: Rc<Shared>,
    arguments: Vec<Slot>,
    results: Vec<Slot>,
    context: Context,
    runtime: Runtime,
}

impl BridgeContext {
    /// 不处理回调的上下文
    pub fn new(config: BridgeConfig) -> BridgeResult<Self> {
        Self::with_host(config, SilentHost)
    }

    pub fn with_host(config: BridgeConfig, host: impl BridgeHost + 'static) -> BridgeResult<Self> {
        config
            .validate()
            .map_err(|err| BridgeError::Init(err.to_string()))?;

        let runtime = Runtime::new().map_err(|err| BridgeError::Init(err.to_string()))?;
        if config.memory_limit > 0 {
            runtime.set_memory_limit(config.memory_limit);
        }
        if config.max_stack_size > 0 {
            runtime.set_max_stack_size(config.max_stack_size);
        }
        if config.gc_threshold > 0 {
            runtime.set_gc_threshold(config.gc_threshold);
        }
        let context = Context::full(&runtime).map_err(|err| BridgeError::Init(err.to_string()))?;

        let shared = Rc::new(Shared::new(Box::new(host), config.max_arguments));
        let weak = Rc::downgrade(&shared);
        runtime.set_loader(HostResolver::new(weak.clone()), HostLoader::new(weak.clone()));

        if config.track_unhandled_rejections {
            let weak = weak.clone();
            runtime.set_host_promise_rejection_tracker(Some(Box::new(
                move |_ctx: Ctx<'_>, _promise: Value<'_>, reason: Value<'_>, is_handled: bool| {
                    if is_handled {
                        return;
                    }
                    if let Some(shared) = weak.upgrade() {
                        shared.report_rejection(reason);
                    }
                },
            )));
        }

        context
            .with(|ctx| install(&ctx, &shared))
            .map_err(|err| BridgeError::Init(err.to_string()))?;

        tracing::info!(
            target: "js_script",
            max_arguments = config.max_arguments,
            memory_limit = config.memory_limit,
            "bridge context created"
        );

        Ok(Self {
            shared,
            arguments: vec![Slot::Null; config.max_arguments],
            results: vec![Slot::Null; RESULT_SLOTS],
            context,
            runtime,
        })
    }

    pub fn arguments(&self) -> &[Slot] {
        &self.arguments
    }

    pub fn arguments_mut(&mut self) -> &mut [Slot] {
        &mut self.arguments
    }

    pub fn results(&self) -> &[Slot] {
        &self.results
    }

    pub fn result(&self) -> &Slot {
        &self.results[0]
    }

    /// Raw protocol entry
    ///
    /// 返回 0 或 1 表示写入 `results` 的槽位数；-1 表示失败，`results[0]` 为错误文本。
    pub fn dispatch(&mut self, code: i32, argc: usize) -> i32 {
        let outcome = if argc > self.arguments.len() {
            Err(BridgeError::TooManyArguments(argc))
        } else {
            match JsAction::try_from(code) {
                Ok(action) => self.try_dispatch(action, &self.arguments[..argc]),
                Err(code) => Err(BridgeError::NotImplemented(code)),
            }
        };
        match outcome {
            Ok(None) => 0,
            Ok(Some(slot)) => {
                self.results[0] = slot;
                1
            }
            Err(err) => {
                tracing::debug!(target: "js_script::dispatch", code, argc, error = %err, "dispatch failed");
                self.results[0] = Slot::String(err.to_string());
                -1
            }
        }
    }

    /// 填好参数后分发
    pub fn dispatch_with(&mut self, code: i32, args: &[Slot]) -> i32 {
        if args.len() > self.arguments.len() {
            self.results[0] = Slot::String(BridgeError::TooManyArguments(args.len()).to_string());
            return -1;
        }
        self.arguments[..args.len()].clone_from_slice(args);
        self.dispatch(code, args.len())
    }

    /// 类型化入口，供 Rust 宿主使用
    pub fn try_dispatch(&self, action: JsAction, args: &[Slot]) -> BridgeResult<Option<Slot>> {
        tracing::debug!(target: "js_script::dispatch", ?action, argc = args.len(), "dispatch");
        let outcome = self.context.with(|ctx| {
            Dispatcher::new(&ctx, &self.shared)
                .run(action, args)
                .map_err(|err| settle(&ctx, err))
        });
        self.flush_finalized();
        outcome
    }

    /// 宿主持有一个引用
    pub fn retain(&self, slot: &Slot) -> BridgeResult<Slot> {
        self.context
            .with(|ctx| Marshal::new(&ctx, &self.shared).retain(slot))
    }

    pub fn release(&self, slot: &Slot) -> BridgeResult<()> {
        let released = self
            .context
            .with(|ctx| Marshal::new(&ctx, &self.shared).release(slot));
        self.flush_finalized();
        released
    }

    /// 释放临时缓存中的全部引用
    pub fn clear_cache(&self) {
        let freed = self.shared.registry.borrow_mut().clear_cache();
        tracing::debug!(target: "js_script::registry", count = freed.len(), "cache cleared");
        drop(freed);
        self.flush_finalized();
    }

    pub fn string_of(&self, slot: &Slot) -> BridgeResult<String> {
        self.context
            .with(|ctx| Marshal::new(&ctx, &self.shared).string_of(slot))
    }

    /// 任意值的字符串形式
    pub fn stringify(&self, slot: &Slot) -> BridgeResult<String> {
        self.context.with(|ctx| {
            Marshal::new(&ctx, &self.shared)
                .stringify(slot)
                .map_err(|err| settle(&ctx, err))
        })
    }

    /// 注册宿主类，返回宿主持有的构造函数
    pub fn register_class(&self, descriptor: &ClassDescriptor, class_id: i32) -> BridgeResult<Slot> {
        self.context.with(|ctx| {
            classes::register_class(&ctx, &self.shared, descriptor, class_id)
                .map_err(|err| settle(&ctx, err))
        })
    }

    pub fn new_promise(&self) -> BridgeResult<Slot> {
        self.context.with(|ctx| {
            let id = self.shared.promises.borrow_mut().create(&ctx)?;
            Ok(Slot::Promise(id))
        })
    }

    pub fn has_pending_job(&self) -> bool {
        self.runtime.is_job_pending()
    }

    /// 执行一个待处理任务：1 已执行，0 无任务，-1 任务抛出异常（文本在 `results[0]`）
    pub fn run_one_job(&mut self) -> i32 {
        let status = match self.runtime.execute_pending_job() {
            Ok(true) => 1,
            Ok(false) => 0,
            Err(exception) => {
                let text = exception.0.with(|ctx| render_thrown(&ctx.catch()));
                tracing::debug!(target: "js_script::jobs", %text, "job threw");
                self.results[0] = Slot::String(text);
                -1
            }
        };
        self.flush_finalized();
        status
    }

    /// 追加引擎诊断文本
    pub fn write_log(&self, fragment: &str) {
        self.shared.write_log(fragment);
    }

    /// 输出缓冲中未完成的行
    pub fn flush_log(&self) {
        self.shared.flush_log();
    }

    pub fn run_gc(&self) {
        self.runtime.run_gc();
        self.flush_finalized();
    }

    pub fn cache_len(&self) -> usize {
        self.shared.registry.borrow().cache_len()
    }

    pub fn frame_depth(&self) -> usize {
        self.shared.registry.borrow().frame_depth()
    }

    pub fn live_handles(&self) -> usize {
        self.shared.registry.borrow().len()
    }

    pub fn pending_promises(&self) -> usize {
        self.shared.promises.borrow().len()
    }

    pub fn registered_classes(&self) -> usize {
        self.shared.classes.borrow().len()
    }

    #[cfg(test)]
    pub(crate) fn with_marshal<R>(&self, f: impl for<'a, 'js> FnOnce(&Marshal<'a, 'js>) -> R) -> R {
        self.context
            .with(|ctx| f(&Marshal::new(&ctx, &self.shared)))
    }

    /// 把回收器排队的令牌作为 DELETE 通知交给宿主
    fn flush_finalized(&self) {
        loop {
            let tokens: Vec<u64> = self.shared.finalized_rx.try_iter().collect();
            if tokens.is_empty() {
                return;
            }
            self.context.with(|ctx| {
                for token in tokens {
                    tracing::debug!(target: "js_script::registry", token, "finalize notice");
                    let delivered = call_host(
                        &ctx,
                        &self.shared,
                        HostAction::Delete,
                        vec![Slot::RawPointer(token)],
                        Vec::new(),
                        |_, _| Ok(()),
                    );
                    if let Err(err) = delivered {
                        let detail = if err.is_exception() {
                            render_thrown(&ctx.catch())
                        } else {
                            err.to_string()
                        };
                        tracing::warn!(target: "js_script::registry", token, %detail, "finalize notice failed");
                    }
                }
            });
        }
    }
}

impl Drop for BridgeContext {
    fn drop(&mut self) {
        self.shared.flush_log();
        let handles = self.shared.registry.borrow_mut().drain();
        drop(handles);
        let promises = std::mem::take(&mut *self.shared.promises.borrow_mut());
        drop(promises);
        let classes = std::mem::take(&mut *self.shared.classes.borrow_mut());
        drop(classes);
        let intrinsics = self.shared.intrinsics.borrow_mut().take();
        drop(intrinsics);
        let deferred = self.shared.deferred_rejections.borrow_mut().take();
        drop(deferred);
        self.runtime.run_gc();
        self.flush_finalized();
        tracing::debug!(target: "js_script", "bridge context destroyed");
    }
}
