// ============================================================================
// 宿主类投影
// 宿主描述的类在脚本中表现为可 new 的原生类，成员访问回到宿主
// ============================================================================

use std::collections::HashMap;
use std::rc::{Rc, Weak};

use crossbeam_channel::Sender;
use rquickjs::class::{JsClass, Readable, Trace, Tracer};
use rquickjs::function::{Constructor, Rest, This};
use rquickjs::object::Property;
use rquickjs::{Class, Ctx, Exception, Function, JsLifetime, Object, Persistent, Value};

use crate::bindings::js::{call_host, check_arity, reply_value, throw_bridge};
use crate::bindings::marshal::{marker, Marshal};
use crate::bindings::protocol::{ClassDescriptor, HostAction, HostReply, MemberKind, Slot};
use crate::core::error::{BridgeError, BridgeResult};
use crate::scripting::engine::{upgrade, Shared, Stored, CLASS_MARKER, TARGET_MARKER};

/// 被回收时把令牌送入终结通知队列
pub struct FinalizeGuard {
    token: u64,
    finalized: Sender<u64>,
}

impl FinalizeGuard {
    pub fn new(token: u64, finalized: Sender<u64>) -> Self {
        Self { token, finalized }
    }

    pub fn token(&self) -> u64 {
        self.token
    }
}

impl Drop for FinalizeGuard {
    fn drop(&mut self) {
        // 回收器内部不回调宿主，只排队
        let _ = self.finalized.send(self.token);
    }
}

/// 投影类实例的原生数据
///
/// 所有投影类共用这一个原生类；类的身份由各自的构造函数、原型与实例中的
/// `class_id` 区分，成员调用会核对 `class_id`。
pub struct HostInstance {
    class_id: i32,
    guard: FinalizeGuard,
}

impl HostInstance {
    pub fn class_id(&self) -> i32 {
        self.class_id
    }

    pub fn token(&self) -> u64 {
        self.guard.token()
    }
}

unsafe impl<'js> JsLifetime<'js> for HostInstance {
    type Changed<'to> = HostInstance;
}

impl<'js> Trace<'js> for HostInstance {
    fn trace<'a>(&self, _tracer: Tracer<'a, 'js>) {}
}

impl<'js> JsClass<'js> for HostInstance {
    const NAME: &'static str = "HostInstance";

    type Mutable = Readable;

    fn constructor(_ctx: &Ctx<'js>) -> rquickjs::Result<Option<Constructor<'js>>> {
        Ok(None)
    }
}

/// 成员路由：magic -> 行为
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemberRoute {
    pub name: String,
    pub kind: MemberKind,
    pub is_static: bool,
}

pub struct ClassEntry {
    name: String,
    routes: Vec<Option<MemberRoute>>,
    constructor: Stored,
    prototype: Stored,
}

impl ClassEntry {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn route(&self, magic: usize) -> Option<&MemberRoute> {
        self.routes.get(magic).and_then(Option::as_ref)
    }

    pub fn prototype<'js>(&self, ctx: &Ctx<'js>) -> rquickjs::Result<Value<'js>> {
        self.prototype.clone().restore(ctx)
    }
}

/// 已注册的类，上下文销毁时统一释放
#[derive(Default)]
pub struct ClassTable {
    classes: HashMap<i32, ClassEntry>,
}

impl ClassTable {
    pub fn contains(&self, class_id: i32) -> bool {
        self.classes.contains_key(&class_id)
    }

    pub fn get(&self, class_id: i32) -> Option<&ClassEntry> {
        self.classes.get(&class_id)
    }

    pub fn route(&self, class_id: i32, magic: usize) -> Option<MemberRoute> {
        self.classes.get(&class_id)?.route(magic).cloned()
    }

    pub fn constructor<'js>(&self, ctx: &Ctx<'js>, class_id: i32) -> Option<Value<'js>> {
        let entry = self.classes.get(&class_id)?;
        entry.constructor.clone().restore(ctx).ok()
    }

    pub fn len(&self) -> usize {
        self.classes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.classes.is_empty()
    }

    pub fn clear(&mut self) {
        self.classes.clear();
    }

    fn insert(&mut self, class_id: i32, entry: ClassEntry) {
        self.classes.insert(class_id, entry);
    }
}

/// 由描述构建路由表；构造函数条目与未知条目占位为 `None`
pub fn build_routes(descriptor: &ClassDescriptor) -> Vec<Option<MemberRoute>> {
    descriptor
        .members
        .iter()
        .map(|member| {
            member.flags.kind().map(|kind| MemberRoute {
                name: member.name.clone(),
                kind,
                is_static: member.flags.is_static(),
            })
        })
        .collect()
}

/// 同名且同为静态（或同为实例）的 getter/setter 合并为一个访问器
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccessorPair {
    pub name: String,
    pub is_static: bool,
    pub getter: Option<usize>,
    pub setter: Option<usize>,
}

pub fn coalesce_accessors(routes: &[Option<MemberRoute>]) -> Vec<AccessorPair> {
    let mut pairs: Vec<AccessorPair> = Vec::new();
    for (magic, route) in routes.iter().enumerate() {
        let Some(route) = route else { continue };
        if route.kind == MemberKind::Method {
            continue;
        }
        let index = match pairs
            .iter()
            .position(|pair| pair.name == route.name && pair.is_static == route.is_static)
        {
            Some(index) => index,
            None => {
                pairs.push(AccessorPair {
                    name: route.name.clone(),
                    is_static: route.is_static,
                    getter: None,
                    setter: None,
                });
                pairs.len() - 1
            }
        };
        match route.kind {
            MemberKind::Getter => pairs[index].getter = Some(magic),
            MemberKind::Setter => pairs[index].setter = Some(magic),
            MemberKind::Method => {}
        }
    }
    pairs
}

/// 注册宿主类，返回宿主持有的构造函数句柄
pub fn register_class<'js>(
    ctx: &Ctx<'js>,
    shared: &Rc<Shared>,
    descriptor: &ClassDescriptor,
    class_id: i32,
) -> BridgeResult<Slot> {
    if shared.classes.borrow().contains(class_id) {
        return Err(BridgeError::DuplicateClass(class_id));
    }

    let weak = Rc::downgrade(shared);
    let routes = build_routes(descriptor);

    let prototype = Object::new(ctx.clone())?;
    let ctor_weak = weak.clone();
    let constructor = Function::new(
        ctx.clone(),
        move |ctx: Ctx<'js>, new_target: This<Value<'js>>, args: Rest<Value<'js>>| {
            construct(&ctx, &ctor_weak, class_id, new_target.0, args.0)
        },
    )?
    .with_name(&descriptor.name)?;
    constructor.set_constructor(true);
    constructor.prop("prototype", Property::from(prototype.clone()))?;
    prototype.prop(
        "constructor",
        Property::from(constructor.clone()).writable().configurable(),
    )?;
    constructor.prop(CLASS_MARKER, Property::from(class_id))?;

    for (magic, route) in routes.iter().enumerate() {
        let Some(route) = route else { continue };
        if route.kind != MemberKind::Method {
            continue;
        }
        let method = member_function(ctx, &weak, class_id, magic, &route.name)?;
        let target: &Object = if route.is_static { &constructor } else { &prototype };
        target.prop(
            route.name.as_str(),
            Property::from(method).writable().configurable(),
        )?;
    }

    let define_property: Function = ctx
        .globals()
        .get::<_, Object>("Object")?
        .get("defineProperty")?;
    for pair in coalesce_accessors(&routes) {
        let property = Object::new(ctx.clone())?;
        if let Some(magic) = pair.getter {
            property.set("get", member_function(ctx, &weak, class_id, magic, &pair.name)?)?;
        }
        if let Some(magic) = pair.setter {
            property.set("set", member_function(ctx, &weak, class_id, magic, &pair.name)?)?;
        }
        property.set("configurable", true)?;
        let target: Object = if pair.is_static {
            constructor.clone().into_inner()
        } else {
            prototype.clone()
        };
        define_property.call::<_, ()>((target, pair.name.as_str(), property))?;
    }

    ctx.globals().set(descriptor.name.as_str(), constructor.clone())?;

    let constructor_value = constructor.into_value();
    shared.classes.borrow_mut().insert(
        class_id,
        ClassEntry {
            name: descriptor.name.clone(),
            routes,
            constructor: Persistent::save(ctx, constructor_value.clone()),
            prototype: Persistent::save(ctx, prototype.into_value()),
        },
    );
    tracing::debug!(
        target: "js_script::classes",
        class_id,
        name = %descriptor.name,
        members = descriptor.members.len(),
        "class registered"
    );

    Ok(Marshal::new(ctx, shared).hold(constructor_value))
}

fn member_function<'js>(
    ctx: &Ctx<'js>,
    weak: &Weak<Shared>,
    class_id: i32,
    magic: usize,
    name: &str,
) -> rquickjs::Result<Function<'js>> {
    let weak = weak.clone();
    Function::new(
        ctx.clone(),
        move |ctx: Ctx<'js>, this: This<Value<'js>>, args: Rest<Value<'js>>| {
            member_call(&ctx, &weak, class_id, magic, this.0, args.0)
        },
    )?
    .with_name(name)
}

/// 通用构造函数
fn construct<'js>(
    ctx: &Ctx<'js>,
    weak: &Weak<Shared>,
    class_id: i32,
    new_target: Value<'js>,
    args: Vec<Value<'js>>,
) -> rquickjs::Result<Value<'js>> {
    let Some(target) = new_target.as_function() else {
        return Err(Exception::throw_type(
            ctx,
            "Class constructor cannot be invoked without 'new'",
        ));
    };
    let prototype: Object = target.get("prototype")?;
    let shared = upgrade(ctx, weak)?;

    let is_sentinel = match (args.as_slice(), shared.sentinel(ctx)) {
        ([only], Ok(sentinel)) => *only == sentinel,
        _ => false,
    };
    let token = shared.next_token();

    if !is_sentinel {
        check_arity(ctx, args.len(), shared.max_arguments.saturating_sub(2))?;
        let slots = vec![Slot::Int32(class_id), Slot::RawPointer(token)];
        call_host(ctx, &shared, HostAction::Constructor, slots, args, |marshal, reply| {
            match reply {
                HostReply::Done | HostReply::Value(_) => Ok(()),
                rejected => reply_value(marshal, rejected).map(|_| ()),
            }
        })?;
    }

    let instance = HostInstance {
        class_id,
        guard: FinalizeGuard::new(token, shared.finalized_tx.clone()),
    };
    let object = Class::instance_proto(instance, prototype)?.into_inner();
    object.prop(TARGET_MARKER, Property::from(token as f64))?;
    Ok(object.into_value())
}

/// 成员调用的统一入口
fn member_call<'js>(
    ctx: &Ctx<'js>,
    weak: &Weak<Shared>,
    class_id: i32,
    magic: usize,
    this: Value<'js>,
    args: Vec<Value<'js>>,
) -> rquickjs::Result<Value<'js>> {
    let shared = upgrade(ctx, weak)?;
    let route = shared
        .classes
        .borrow()
        .route(class_id, magic)
        .ok_or_else(|| throw_bridge(ctx, BridgeError::WrongArguments))?;
    let max = shared.max_arguments;
    let mut slots = vec![Slot::Int32(class_id), Slot::Int32(magic as i32)];

    if !route.is_static {
        let token = this
            .as_object()
            .filter(|object| {
                Class::<HostInstance>::from_object(object)
                    .is_some_and(|instance| {
                        let owner = instance.borrow().class_id();
                        owner == class_id
                    })
            })
            .and_then(|object| marker::<f64>(object, TARGET_MARKER))
            .ok_or_else(|| Exception::throw_type(ctx, "Illegal invocation"))?;
        slots.push(Slot::RawPointer(token as u64));
    }

    let args = match route.kind {
        MemberKind::Getter => Vec::new(),
        MemberKind::Setter => args
            .into_iter()
            .next()
            .map_or_else(|| vec![Value::new_undefined(ctx.clone())], |value| vec![value]),
        MemberKind::Method => {
            let fixed = if route.is_static { 2 } else { 3 };
            check_arity(ctx, args.len(), max.saturating_sub(fixed))?;
            args
        }
    };

    call_host(ctx, &shared, HostAction::Call, slots, args, reply_value)
}

/// 宿主函数包装：可调用，被回收时通知宿主
pub fn wrap_function<'js>(ctx: &Ctx<'js>, shared: &Rc<Shared>) -> BridgeResult<Slot> {
    let weak = Rc::downgrade(shared);
    let token = shared.next_token();
    let guard = FinalizeGuard::new(token, shared.finalized_tx.clone());
    let function = Function::new(
        ctx.clone(),
        move |ctx: Ctx<'js>, args: Rest<Value<'js>>| {
            let token = guard.token();
            let shared = upgrade(&ctx, &weak)?;
            check_arity(&ctx, args.0.len(), shared.max_arguments.saturating_sub(1))?;
            call_host(
                &ctx,
                &shared,
                HostAction::CallFunction,
                vec![Slot::RawPointer(token)],
                args.0,
                reply_value,
            )
        },
    )?;
    function.prop(TARGET_MARKER, Property::from(token as f64))?;
    tracing::debug!(target: "js_script::classes", token, "host function wrapped");
    Ok(Marshal::new(ctx, shared).stage_classified(function.into_value()))
}
