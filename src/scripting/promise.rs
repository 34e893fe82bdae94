//! Promise bridge
//!
//! 宿主创建的 Promise 在完成前保存在表中，完成一次后即移除。

use std::collections::HashMap;

use rquickjs::{Ctx, Function, Persistent, Value};

use crate::bindings::protocol::PromiseId;
use crate::core::error::{BridgeError, BridgeResult};
use crate::scripting::engine::Stored;

/// Promise completion outcome
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Reject,
    Resolve,
    ResolveNull,
}

impl From<i32> for Outcome {
    fn from(code: i32) -> Self {
        match code {
            0 => Outcome::Reject,
            1 => Outcome::Resolve,
            _ => Outcome::ResolveNull,
        }
    }
}

/// 引擎可见的 Promise 及其 resolve/reject
pub struct PendingPromise {
    target: Stored,
    resolve: Stored,
    reject: Stored,
}

impl PendingPromise {
    /// 完成 Promise，消耗自身
    pub fn complete<'js>(
        self,
        ctx: &Ctx<'js>,
        outcome: Outcome,
        value: Value<'js>,
    ) -> BridgeResult<()> {
        let (continuation, value) = match outcome {
            Outcome::Reject => (self.reject, value),
            Outcome::Resolve => (self.resolve, value),
            Outcome::ResolveNull => (self.resolve, Value::new_null(ctx.clone())),
        };
        let continuation: Function = continuation
            .restore(ctx)?
            .into_function()
            .ok_or(BridgeError::NotFunction)?;
        continuation.call::<_, ()>((value,))?;
        Ok(())
    }
}

#[derive(Default)]
pub struct PromiseTable {
    pending: HashMap<PromiseId, PendingPromise>,
    next_id: u32,
}

impl PromiseTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// 创建 Promise；resolve/reject 在返回前已捕获
    pub fn create<'js>(&mut self, ctx: &Ctx<'js>) -> BridgeResult<PromiseId> {
        let (promise, resolve, reject) = ctx.promise()?;
        self.next_id += 1;
        let id = PromiseId(self.next_id);
        self.pending.insert(
            id,
            PendingPromise {
                target: Persistent::save(ctx, promise.into_value()),
                resolve: Persistent::save(ctx, resolve.into_value()),
                reject: Persistent::save(ctx, reject.into_value()),
            },
        );
        tracing::debug!(target: "js_script::promise", id = id.0, "promise created");
        Ok(id)
    }

    pub fn target<'js>(&self, ctx: &Ctx<'js>, id: PromiseId) -> BridgeResult<Value<'js>> {
        let pending = self
            .pending
            .get(&id)
            .ok_or(BridgeError::PromiseNotPending(id.0))?;
        Ok(pending.target.clone().restore(ctx)?)
    }

    /// 取出待完成的 Promise；第二次取出同一个 id 会失败
    pub fn take(&mut self, id: PromiseId) -> BridgeResult<PendingPromise> {
        self.pending
            .remove(&id)
            .ok_or(BridgeError::PromiseNotPending(id.0))
    }

    pub fn is_pending(&self, id: PromiseId) -> bool {
        self.pending.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    pub fn clear(&mut self) {
        self.pending.clear();
    }
}
