//! Action dispatcher
//!
//! 每个动作先完整校验参数个数与槽位类型，校验通过后才接触引擎状态。

use std::rc::Rc;

use rquickjs::context::EvalOptions;
use rquickjs::function::{Args, This};
use rquickjs::object::Filter;
use rquickjs::{Atom, Ctx, Exception, Function, Module, Object, Value};

use crate::bindings::marshal::{marker, Marshal};
use crate::bindings::protocol::{JsAction, Slot};
use crate::core::error::{BridgeError, BridgeResult};
use crate::scripting::classes;
use crate::scripting::engine::{Shared, TARGET_MARKER};
use crate::scripting::modules::module_source;
use crate::scripting::promise::Outcome;

pub struct Dispatcher<'a, 'js> {
    ctx: &'a Ctx<'js>,
    shared: &'a Rc<Shared>,
    marshal: Marshal<'a, 'js>,
}

impl<'a, 'js> Dispatcher<'a, 'js> {
    pub fn new(ctx: &'a Ctx<'js>, shared: &'a Rc<Shared>) -> Self {
        Self {
            ctx,
            shared,
            marshal: Marshal::new(ctx, shared),
        }
    }

    pub fn run(&self, action: JsAction, args: &[Slot]) -> BridgeResult<Option<Slot>> {
        match action {
            JsAction::Eval => self.eval(args),
            JsAction::ToString => self.to_string(args),
            JsAction::Set => self.set(args),
            JsAction::Get => self.get(args),
            JsAction::Invoke => self.invoke(args),
            JsAction::Bind => self.bind(args),
            JsAction::PromiseComplete => self.promise_complete(args),
            JsAction::WrapFunction => classes::wrap_function(self.ctx, self.shared).map(Some),
            JsAction::Call => self.call(args),
            JsAction::Run => self.run_module(args),
            JsAction::RunPromise => self.run_promise(args),
            JsAction::PropertyNames => self.property_names(args),
            JsAction::NewObject => {
                let object = Object::new(self.ctx.clone())?;
                Ok(Some(self.marshal.encode(object.into_value())))
            }
            JsAction::IsArray => self.test_object(args, |value| value.is_array()),
            JsAction::IsFunction => self.test_object(args, |value| value.is_function()),
            JsAction::IsConstructor => self.test_object(args, |value| value.is_constructor()),
        }
    }

    /// 两个字符串参数：源码与文件名
    fn source_pair(&self, args: &[Slot]) -> BridgeResult<(String, String)> {
        match args {
            [code, filename] if code.is_string() && filename.is_string() => Ok((
                self.marshal.string_of(code)?,
                self.marshal.string_of(filename)?,
            )),
            _ => Err(BridgeError::WrongArguments),
        }
    }

    fn key(&self, slot: &Slot) -> BridgeResult<Atom<'js>> {
        let ctx = self.ctx.clone();
        match slot {
            Slot::Int32(index) => Ok(Atom::from_i32(ctx, *index)?),
            Slot::String(_) | Slot::JsString(_) => {
                let name = self.marshal.string_of(slot)?;
                Ok(Atom::from_str(ctx, &name)?)
            }
            _ => Err(BridgeError::WrongArguments),
        }
    }

    /// `count` 个尾随参数，个数必须非负且不超过剩余槽位
    fn trailing<'s>(&self, count: i32, rest: &'s [Slot]) -> BridgeResult<&'s [Slot]> {
        let count = usize::try_from(count).map_err(|_| BridgeError::WrongArguments)?;
        rest.get(..count).ok_or(BridgeError::WrongArguments)
    }

    fn eval(&self, args: &[Slot]) -> BridgeResult<Option<Slot>> {
        let (code, filename) = self.source_pair(args)?;
        tracing::debug!(target: "js_script::dispatch", %filename, bytes = code.len(), "eval");
        let mut options = EvalOptions::default();
        options.strict = false;
        let value: Value = self.ctx.eval_with_options(code, options)?;
        Ok(Some(self.marshal.encode(value)))
    }

    fn to_string(&self, args: &[Slot]) -> BridgeResult<Option<Slot>> {
        let [value] = args else {
            return Err(BridgeError::WrongArguments);
        };
        Ok(Some(Slot::String(self.marshal.stringify(value)?)))
    }

    fn set(&self, args: &[Slot]) -> BridgeResult<Option<Slot>> {
        let [target, key, value] = args else {
            return Err(BridgeError::WrongArguments);
        };
        let object = self.marshal.object(target)?;
        let key = self.key(key)?;
        let value = self.marshal.decode(value)?;
        object.set(key, value)?;
        Ok(None)
    }

    fn get(&self, args: &[Slot]) -> BridgeResult<Option<Slot>> {
        let [target, key] = args else {
            return Err(BridgeError::WrongArguments);
        };
        let object = self.marshal.object(target)?;
        let key = self.key(key)?;
        let value: Value = object.get(key)?;
        Ok(Some(self.marshal.encode(value)))
    }

    fn invoke(&self, args: &[Slot]) -> BridgeResult<Option<Slot>> {
        let [target, name, Slot::Int32(count), rest @ ..] = args else {
            return Err(BridgeError::WrongArguments);
        };
        if !name.is_string() {
            return Err(BridgeError::WrongArguments);
        }
        let object = self.marshal.object(target)?;
        let trailing = self.trailing(*count, rest)?;
        let name = self.key(name)?;
        let values = self.marshal.decode_all(trailing)?;

        let method: Value = object.get(name)?;
        let Some(method) = method.into_function() else {
            return Err(Exception::throw_type(self.ctx, "not a function").into());
        };
        let mut call = Args::new(self.ctx.clone(), values.len());
        call.this(object)?;
        call.push_args(values)?;
        let value: Value = method.call_arg(call)?;
        Ok(Some(self.marshal.encode(value)))
    }

    /// 用哨兵构造实例，跳过宿主构造回调
    fn bind(&self, args: &[Slot]) -> BridgeResult<Option<Slot>> {
        let Some(target) = args.first() else {
            return Err(BridgeError::WrongArguments);
        };
        let constructor = self
            .marshal
            .object(target)?
            .into_value()
            .into_constructor()
            .ok_or(BridgeError::NotConstructor)?;
        let sentinel = self.shared.sentinel(self.ctx)?;
        let instance: Value = constructor.construct((sentinel,))?;
        let stamped = instance
            .as_object()
            .and_then(|object| marker::<f64>(object, TARGET_MARKER))
            .is_some();
        if !stamped {
            return Err(BridgeError::WrongResult);
        }
        Ok(Some(self.marshal.stage_classified(instance)))
    }

    fn promise_complete(&self, args: &[Slot]) -> BridgeResult<Option<Slot>> {
        let [Slot::Promise(id), Slot::Int32(outcome), rest @ ..] = args else {
            return Err(BridgeError::WrongArguments);
        };
        let outcome = Outcome::from(*outcome);
        // ResolveNull 不读取值槽位
        let value = match (outcome, rest.first()) {
            (Outcome::Reject | Outcome::Resolve, Some(slot)) => self.marshal.decode(slot)?,
            _ => Value::new_undefined(self.ctx.clone()),
        };
        let pending = self.shared.promises.borrow_mut().take(*id)?;
        tracing::debug!(target: "js_script::promise", id = id.0, ?outcome, "promise completed");
        pending.complete(self.ctx, outcome, value)?;
        Ok(None)
    }

    fn call(&self, args: &[Slot]) -> BridgeResult<Option<Slot>> {
        let [target, Slot::Int32(count), rest @ ..] = args else {
            return Err(BridgeError::WrongArguments);
        };
        let object = self.marshal.object(target)?;
        let trailing = self.trailing(*count, rest)?;
        let function = object
            .into_value()
            .into_function()
            .ok_or(BridgeError::NotFunction)?;
        let values = self.marshal.decode_all(trailing)?;

        let mut call = Args::new(self.ctx.clone(), values.len());
        call.this(self.ctx.globals())?;
        call.push_args(values)?;
        let value: Value = function.call_arg(call)?;
        Ok(Some(self.marshal.encode(value)))
    }

    /// 作为模块运行，返回默认导出
    ///
    /// 求值失败的原因作为 RUN 的结果返回，不再作为未处理拒绝写入日志。
    fn run_module(&self, args: &[Slot]) -> BridgeResult<Option<Slot>> {
        let (code, filename) = self.source_pair(args)?;
        tracing::debug!(target: "js_script::dispatch", %filename, bytes = code.len(), "run module");
        self.shared.defer_rejections();
        let outcome = self.evaluate_module(filename, &code);
        let thrown = match &outcome {
            Err(BridgeError::Engine(err)) if err.is_exception() => Some(self.ctx.catch()),
            _ => None,
        };
        self.shared.release_rejections(self.ctx, thrown.as_ref());
        match thrown {
            Some(reason) => Err(self.ctx.throw(reason).into()),
            None => outcome,
        }
    }

    fn evaluate_module(&self, filename: String, code: &str) -> BridgeResult<Option<Slot>> {
        let declared = Module::declare(self.ctx.clone(), filename, module_source(code))?;
        let (module, evaluation) = declared.eval()?;
        if let Some(Err(err)) = evaluation.result::<Value>() {
            return Err(err.into());
        }
        let value: Value = module.get("default")?;
        Ok(Some(self.marshal.encode(value)))
    }

    /// `Promise.resolve(v)` 上分别挂 `then(resolve)` 与 `catch(reject)`
    fn run_promise(&self, args: &[Slot]) -> BridgeResult<Option<Slot>> {
        let [value, on_resolve, on_reject] = args else {
            return Err(BridgeError::WrongArguments);
        };
        let value = self.marshal.object(value)?;
        let on_resolve = self.marshal.object(on_resolve)?;
        let on_reject = self.marshal.object(on_reject)?;

        let (promise_ctor, resolve) = self.shared.promise_resolve(self.ctx)?;
        let resolved: Object = resolve.call((This(promise_ctor), value))?;
        let then: Function = resolved.get("then")?;
        then.call::<_, Value>((This(resolved.clone()), on_resolve))?;
        let catch: Function = resolved.get("catch")?;
        catch.call::<_, Value>((This(resolved), on_reject))?;
        Ok(None)
    }

    fn property_names(&self, args: &[Slot]) -> BridgeResult<Option<Slot>> {
        let [target] = args else {
            return Err(BridgeError::WrongArguments);
        };
        let object = self.marshal.object(target)?;
        let mut names = Vec::new();
        for key in object.own_keys::<Atom>(Filter::new().string().symbol()) {
            names.push(key?.to_string()?);
        }
        Ok(Some(Slot::String(names.join(","))))
    }

    fn test_object(
        &self,
        args: &[Slot],
        test: impl FnOnce(&Value<'js>) -> bool,
    ) -> BridgeResult<Option<Slot>> {
        let [target] = args else {
            return Err(BridgeError::WrongArguments);
        };
        let object = self.marshal.object(target)?;
        Ok(Some(Slot::Bool(test(object.as_value()))))
    }
}
