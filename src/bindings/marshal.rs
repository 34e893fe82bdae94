//! Value marshal
//!
//! `encode` 不转移所有权：引用类型暂存到临时缓存（或当前回调帧）。
//! `decode` 总是复制引用，调用方拿到的是自己的一份。

use rquickjs::{Coerced, Ctx, Object, Persistent, Type, Value};

use crate::bindings::protocol::{Handle, Slot};
use crate::core::error::{BridgeError, BridgeResult};
use crate::scripting::engine::{Shared, Stored, CLASS_MARKER, TARGET_MARKER};

/// Converts between engine values and protocol slots
pub struct Marshal<'a, 'js> {
    ctx: &'a Ctx<'js>,
    shared: &'a Shared,
}

impl<'a, 'js> Marshal<'a, 'js> {
    pub fn new(ctx: &'a Ctx<'js>, shared: &'a Shared) -> Self {
        Self { ctx, shared }
    }

    pub fn ctx(&self) -> &Ctx<'js> {
        self.ctx
    }

    /// 引擎值 -> 槽位；undefined、symbol 等无法表示的类型降级为 Null
    pub fn encode(&self, value: Value<'js>) -> Slot {
        match value.type_of() {
            Type::Int => Slot::Int32(value.as_int().unwrap_or_default()),
            Type::Float => Slot::Double(value.as_float().unwrap_or_default()),
            Type::Bool => Slot::Bool(value.as_bool().unwrap_or_default()),
            Type::BigInt => value
                .into_big_int()
                .and_then(|big| big.to_i64().ok())
                .map_or(Slot::Null, Slot::Int64),
            Type::String => Slot::JsString(self.stage(value)),
            Type::Array
            | Type::Constructor
            | Type::Function
            | Type::Promise
            | Type::Exception
            | Type::Object => Slot::JsValue(self.stage(value)),
            _ => Slot::Null,
        }
    }

    pub fn encode_all(&self, values: impl IntoIterator<Item = Value<'js>>) -> Vec<Slot> {
        values.into_iter().map(|value| self.encode(value)).collect()
    }

    /// 槽位 -> 引擎值
    pub fn decode(&self, slot: &Slot) -> BridgeResult<Value<'js>> {
        let ctx = self.ctx.clone();
        let value = match slot {
            Slot::Null => Value::new_null(ctx),
            Slot::Int32(v) => Value::new_int(ctx, *v),
            Slot::Int64(v) => match i32::try_from(*v) {
                Ok(small) => Value::new_int(ctx, small),
                Err(_) => Value::new_float(ctx, *v as f64),
            },
            Slot::Double(v) => Value::new_float(ctx, *v),
            Slot::Bool(v) => Value::new_bool(ctx, *v),
            Slot::String(text) => rquickjs::String::from_str(ctx, text)?.into_value(),
            Slot::RawPointer(_) => Value::new_undefined(ctx),
            Slot::Promise(id) => self.shared.promises.borrow().target(self.ctx, *id)?,
            Slot::JsString(handle)
            | Slot::JsValue(handle)
            | Slot::Managed(handle)
            | Slot::HostClass { handle, .. }
            | Slot::HostObject { handle, .. } => self.restore(*handle)?,
        };
        Ok(value)
    }

    pub fn decode_all(&self, slots: &[Slot]) -> BridgeResult<Vec<Value<'js>>> {
        slots.iter().map(|slot| self.decode(slot)).collect()
    }

    /// 对象参数：带句柄且当前值是对象
    pub fn object(&self, slot: &Slot) -> BridgeResult<Object<'js>> {
        let handle = slot.object_handle().ok_or(BridgeError::WrongArguments)?;
        self.restore(handle)?
            .into_object()
            .ok_or(BridgeError::WrongArguments)
    }

    /// 字符串参数的宿主文本
    pub fn string_of(&self, slot: &Slot) -> BridgeResult<String> {
        match slot {
            Slot::String(text) => Ok(text.clone()),
            Slot::JsString(handle) => {
                let value = self.restore(*handle)?;
                value
                    .as_string()
                    .ok_or(BridgeError::WrongArguments)?
                    .to_string()
                    .map_err(BridgeError::from)
            }
            _ => Err(BridgeError::WrongArguments),
        }
    }

    /// 任意槽位的字符串形式，等同于脚本中的 `String(v)`
    pub fn stringify(&self, slot: &Slot) -> BridgeResult<String> {
        let value = self.decode(slot)?;
        let Coerced(text) = value.get::<Coerced<String>>()?;
        Ok(text)
    }

    pub fn restore(&self, handle: Handle) -> BridgeResult<Value<'js>> {
        let stored = self.shared.registry.borrow().get(handle)?.clone();
        Ok(stored.restore(self.ctx)?)
    }

    /// 宿主持有一个引用，并按标记分类
    pub fn retain(&self, slot: &Slot) -> BridgeResult<Slot> {
        let handle = slot.handle().ok_or(BridgeError::WrongArguments)?;
        let value = self.restore(handle)?;
        self.shared.registry.borrow_mut().add_ref(handle)?;
        Ok(self.classify(handle, &value))
    }

    pub fn release(&self, slot: &Slot) -> BridgeResult<()> {
        let handle = slot.handle().ok_or(BridgeError::WrongArguments)?;
        let freed = self.shared.registry.borrow_mut().release(handle)?;
        drop(freed);
        Ok(())
    }

    /// 新建一个宿主持有的句柄（引用计数 1，不进入缓存）
    pub fn hold(&self, value: Value<'js>) -> Slot {
        let stored: Stored = Persistent::save(self.ctx, value.clone());
        let handle = self.shared.registry.borrow_mut().insert(stored, 1);
        self.classify(handle, &value)
    }

    /// 暂存到临时缓存并按标记分类
    pub fn stage_classified(&self, value: Value<'js>) -> Slot {
        let handle = self.stage(value.clone());
        self.classify(handle, &value)
    }

    fn classify(&self, handle: Handle, value: &Value<'js>) -> Slot {
        if value.is_string() {
            return Slot::JsString(handle);
        }
        let Some(object) = value.as_object() else {
            return Slot::Managed(handle);
        };
        if let Some(token) = marker::<f64>(object, TARGET_MARKER) {
            return Slot::HostObject {
                token: token as u64,
                handle,
            };
        }
        if let Some(class_id) = marker::<i32>(object, CLASS_MARKER) {
            return Slot::HostClass { class_id, handle };
        }
        Slot::Managed(handle)
    }

    fn stage(&self, value: Value<'js>) -> Handle {
        let stored: Stored = Persistent::save(self.ctx, value);
        self.shared.registry.borrow_mut().stage(stored)
    }
}

/// 读取对象上的标记属性，不存在或类型不符时返回 `None`
pub fn marker<'js, T: rquickjs::FromJs<'js>>(object: &Object<'js>, key: &str) -> Option<T> {
    if !object.contains_key(key).unwrap_or(false) {
        return None;
    }
    let value: Value<'js> = object.get(key).ok()?;
    if value.is_undefined() || value.is_null() {
        return None;
    }
    value.get::<T>().ok()
}
