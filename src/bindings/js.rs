//! JavaScript host adapter
//!
//! 脚本回调宿主时经过这里：压入回调帧、编码参数、调用宿主、解码答复、弹出回调帧。

use rquickjs::{Ctx, Exception, Value};

use crate::bindings::marshal::Marshal;
use crate::bindings::protocol::{HostAction, HostReply, PrintLevel, Slot};
use crate::core::error::{BridgeError, BridgeResult};
use crate::scripting::engine::Shared;

/// Host side of the bridge
///
/// `on_action` runs synchronously on the engine thread. The scope allows
/// retaining values, stringifying, and creating promises, but not
/// dispatching actions.
pub trait BridgeHost {
    fn on_action(&mut self, scope: &HostScope<'_, '_>, action: HostAction, args: &[Slot])
        -> HostReply;

    fn print(&mut self, level: PrintLevel, message: &str) {
        match level {
            PrintLevel::Log => tracing::info!(target: "js_script::console", "{}", message),
            PrintLevel::Warn => tracing::warn!(target: "js_script::console", "{}", message),
            PrintLevel::Error => tracing::error!(target: "js_script::console", "{}", message),
        }
    }
}

/// 不处理任何回调的宿主
#[derive(Debug, Default, Clone, Copy)]
pub struct SilentHost;

impl BridgeHost for SilentHost {
    fn on_action(&mut self, _scope: &HostScope<'_, '_>, _action: HostAction, _args: &[Slot]) -> HostReply {
        HostReply::Done
    }
}

/// 回调期间宿主可用的操作
pub struct HostScope<'a, 'js> {
    marshal: Marshal<'a, 'js>,
    shared: &'a Shared,
}

impl<'a, 'js> HostScope<'a, 'js> {
    pub(crate) fn new(ctx: &'a Ctx<'js>, shared: &'a Shared) -> Self {
        Self {
            marshal: Marshal::new(ctx, shared),
            shared,
        }
    }

    /// 让宿主持有参数中的引用，回调帧释放后依然有效
    pub fn retain(&self, slot: &Slot) -> BridgeResult<Slot> {
        self.marshal.retain(slot)
    }

    pub fn release(&self, slot: &Slot) -> BridgeResult<()> {
        self.marshal.release(slot)
    }

    pub fn string_of(&self, slot: &Slot) -> BridgeResult<String> {
        self.marshal.string_of(slot)
    }

    /// 任意值的字符串形式
    pub fn stringify(&self, slot: &Slot) -> BridgeResult<String> {
        self.marshal.stringify(slot)
    }

    /// 创建一个待完成的 Promise，可直接作为答复返回给脚本
    pub fn new_promise(&self) -> BridgeResult<Slot> {
        let id = self.shared.promises.borrow_mut().create(self.marshal.ctx())?;
        Ok(Slot::Promise(id))
    }
}

/// 调用宿主并在回调帧内解释答复
pub(crate) fn call_host<'js, R>(
    ctx: &Ctx<'js>,
    shared: &Shared,
    action: HostAction,
    mut slots: Vec<Slot>,
    args: Vec<Value<'js>>,
    finish: impl FnOnce(&Marshal<'_, 'js>, HostReply) -> rquickjs::Result<R>,
) -> rquickjs::Result<R> {
    shared.registry.borrow_mut().push_frame();
    let marshal = Marshal::new(ctx, shared);
    slots.extend(marshal.encode_all(args));

    let reply = match shared.host.try_borrow_mut() {
        Ok(mut host) => {
            let scope = HostScope::new(ctx, shared);
            tracing::debug!(target: "js_script::host", ?action, argc = slots.len(), "host callback");
            Ok(host.on_action(&scope, action, &slots))
        }
        Err(_) => Err(BridgeError::HostBusy),
    };

    let result = match reply {
        Ok(reply) => finish(&marshal, reply),
        Err(err) => Err(throw_bridge(ctx, err)),
    };
    let freed = shared.registry.borrow_mut().pop_frame();
    drop(freed);
    result
}

/// 标准答复：Done 为 undefined，Value 为值，Throw 抛出值，其余负数抛出内部错误
pub(crate) fn reply_value<'js>(
    marshal: &Marshal<'_, 'js>,
    reply: HostReply,
) -> rquickjs::Result<Value<'js>> {
    let ctx = marshal.ctx();
    match reply {
        HostReply::Done => Ok(Value::new_undefined(ctx.clone())),
        HostReply::Value(slot) => marshal.decode(&slot).map_err(|err| throw_bridge(ctx, err)),
        HostReply::Throw(slot) => {
            let value = marshal.decode(&slot).map_err(|err| throw_bridge(ctx, err))?;
            Err(ctx.throw(value))
        }
        HostReply::Failure(code) => Err(Exception::throw_internal(
            ctx,
            &format!("Unknown Error ({})", code),
        )),
    }
}

/// 把桥接错误转换为脚本异常
pub(crate) fn throw_bridge(ctx: &Ctx<'_>, err: BridgeError) -> rquickjs::Error {
    match err {
        BridgeError::Engine(inner) => inner,
        other => Exception::throw_internal(ctx, &other.to_string()),
    }
}

/// 参数个数检查，超出时抛出 "Too many arguments (N)"
pub(crate) fn check_arity(ctx: &Ctx<'_>, argc: usize, limit: usize) -> rquickjs::Result<()> {
    if argc > limit {
        return Err(throw_bridge(ctx, BridgeError::TooManyArguments(argc)));
    }
    Ok(())
}

/// 把一行文本交给宿主输出；宿主正忙时退回到 tracing
pub(crate) fn print(shared: &Shared, level: PrintLevel, message: &str) {
    match shared.host.try_borrow_mut() {
        Ok(mut host) => host.print(level, message),
        Err(_) => tracing::warn!(target: "js_script::console", ?level, "{}", message),
    }
}
