use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use js_script::config::LoggingConfig;
use js_script::plugins::{MethodCall, MethodResponse, PluginRegistry};
use js_script::plugins::builtin::JsScriptPlugin;
use js_script::{
    BridgeConfig, BridgeContext, BridgeError, BridgeHost, ClassDescriptor, HostAction, HostReply,
    HostScope, JsAction, MemberFlags, PrintLevel, Slot,
};

const POINT: i32 = 7;
const SIZE: i32 = 8;

/// 宿主侧状态
#[derive(Default)]
struct World {
    points: HashMap<u64, (i32, i32)>,
    constructed: Vec<u64>,
    deleted: Vec<u64>,
    count: i32,
    instance_count_writes: Vec<(u64, i32)>,
    printed: Vec<(PrintLevel, String)>,
    modules: HashMap<String, String>,
    kept: Option<Slot>,
    pending: Option<Slot>,
    reject_construct: bool,
}

struct TestHost(Rc<RefCell<World>>);

fn int(slot: Option<&Slot>) -> i32 {
    slot.and_then(Slot::as_i32).unwrap_or(0)
}

impl TestHost {
    fn member(world: &mut World, args: &[Slot]) -> HostReply {
        let (magic, this, rest) = match args {
            [_, Slot::Int32(magic), Slot::RawPointer(this), rest @ ..] => (*magic, Some(*this), rest),
            [_, Slot::Int32(magic), rest @ ..] => (*magic, None, rest),
            _ => return HostReply::Failure(-2),
        };
        match (magic, this) {
            (1, Some(this)) => HostReply::Value(Slot::Int32(world.points[&this].0)),
            (2, Some(this)) => {
                let x = int(rest.first());
                if let Some(point) = world.points.get_mut(&this) {
                    point.0 = x;
                }
                HostReply::Done
            }
            (3, None) => HostReply::Value(Slot::Int32(world.count)),
            (4, Some(this)) => {
                let (x, y) = world.points[&this];
                HostReply::Value(Slot::Int32(x + y + int(rest.first())))
            }
            (5, None) => HostReply::Value(Slot::from("origin")),
            (6, Some(this)) => {
                world.instance_count_writes.push((this, int(rest.first())));
                HostReply::Done
            }
            _ => HostReply::Failure(-3),
        }
    }
}

impl BridgeHost for TestHost {
    fn on_action(&mut self, scope: &HostScope<'_, '_>, action: HostAction, args: &[Slot]) -> HostReply {
        let mut world = self.0.borrow_mut();
        match action {
            HostAction::Constructor => {
                let [Slot::Int32(_), Slot::RawPointer(token), rest @ ..] = args else {
                    return HostReply::Failure(-2);
                };
                if world.reject_construct {
                    return HostReply::Throw(Slot::from("rejected"));
                }
                world.points.insert(*token, (int(rest.first()), int(rest.get(1))));
                world.constructed.push(*token);
                HostReply::Done
            }
            HostAction::Call => Self::member(&mut world, args),
            HostAction::Delete => {
                if let Some(Slot::RawPointer(token)) = args.first() {
                    world.points.remove(token);
                    world.deleted.push(*token);
                }
                HostReply::Done
            }
            HostAction::CallFunction => match args.get(1) {
                Some(slot @ Slot::JsString(_)) if scope.string_of(slot).ok().as_deref() == Some("promise") => {
                    match scope.new_promise() {
                        Ok(promise) => {
                            world.pending = Some(promise.clone());
                            HostReply::Value(promise)
                        }
                        Err(_) => HostReply::Failure(-4),
                    }
                }
                Some(slot @ Slot::JsValue(_)) => match scope.retain(slot) {
                    Ok(kept) => {
                        world.kept = Some(kept);
                        HostReply::Done
                    }
                    Err(_) => HostReply::Failure(-5),
                },
                _ => HostReply::Value(Slot::Int32(args[1..].iter().filter_map(Slot::as_i32).sum())),
            },
            HostAction::ModuleName => match args {
                [_, Slot::String(name)] if name == "virtual" => HostReply::Value(Slot::from("lib/util.js")),
                [_, Slot::String(name)] if name == "forbidden" => HostReply::Failure(-1),
                _ => HostReply::Done,
            },
            HostAction::LoadModule => match args.first() {
                Some(Slot::String(name)) => match world.modules.get(name) {
                    Some(source) => HostReply::Value(Slot::from(source.as_str())),
                    None => HostReply::Failure(-1),
                },
                _ => HostReply::Failure(-2),
            },
        }
    }

    fn print(&mut self, level: PrintLevel, message: &str) {
        self.0.borrow_mut().printed.push((level, message.to_string()));
    }
}

fn quiet() -> BridgeConfig {
    BridgeConfig {
        logging: LoggingConfig {
            log_to_console: false,
            ..Default::default()
        },
        ..BridgeConfig::default()
    }
}

fn setup(config: BridgeConfig) -> (BridgeContext, Rc<RefCell<World>>) {
    let world = Rc::new(RefCell::new(World::default()));
    let bridge = BridgeContext::with_host(config, TestHost(world.clone())).unwrap();
    (bridge, world)
}

fn point_class() -> ClassDescriptor {
    ClassDescriptor::new("Point")
        .member("Point", MemberFlags::CONSTRUCTOR)
        .member("x", MemberFlags::GETTER)
        .member("x", MemberFlags::SETTER)
        .member("count", MemberFlags::GETTER | MemberFlags::STATIC)
        .member("sum", MemberFlags::FUNCTION)
        .member("origin", MemberFlags::FUNCTION | MemberFlags::STATIC)
        .member("count", MemberFlags::SETTER)
}

fn size_class() -> ClassDescriptor {
    ClassDescriptor::new("Size")
        .member("Size", MemberFlags::CONSTRUCTOR)
        .member("width", MemberFlags::FUNCTION)
}

fn rejection_lines(world: &Rc<RefCell<World>>) -> Vec<String> {
    world
        .borrow()
        .printed
        .iter()
        .filter(|(_, line)| line.starts_with("Possibly unhandled promise rejection"))
        .map(|(_, line)| line.clone())
        .collect()
}

fn eval(bridge: &BridgeContext, source: &str) -> Result<Option<Slot>, BridgeError> {
    bridge.try_dispatch(JsAction::Eval, &[Slot::from(source), Slot::from("test.js")])
}

fn eval_text(bridge: &BridgeContext, source: &str) -> String {
    let slot = eval(bridge, source).unwrap().unwrap();
    bridge.stringify(&slot).unwrap()
}

#[test]
fn test_eval_and_stringify() {
    let (mut bridge, _) = setup(quiet());
    let code = bridge.dispatch_with(JsAction::Eval.code(), &[Slot::from("1+1"), Slot::from("a.js")]);
    assert_eq!(code, 1);
    let result = bridge.result().clone();
    assert_eq!(bridge.dispatch_with(JsAction::ToString.code(), &[result]), 1);
    assert_eq!(bridge.result(), &Slot::String("2".into()));
}

#[test]
fn test_raw_argument_slots() {
    let (mut bridge, _) = setup(quiet());
    bridge.arguments_mut()[0] = Slot::from("[1, 2, 3].length");
    bridge.arguments_mut()[1] = Slot::from("raw.js");
    assert_eq!(bridge.dispatch(JsAction::Eval.code(), 2), 1);
    assert_eq!(bridge.results()[0], Slot::Int32(3));

    assert_eq!(bridge.dispatch(JsAction::Eval.code(), 1), -1);
    assert_eq!(bridge.result(), &Slot::String("WrongArguments".into()));
}

#[test]
fn test_projected_class() -> anyhow::Result<()> {
    let (bridge, world) = setup(quiet());
    let ctor = bridge.register_class(&point_class(), POINT)?;
    assert!(matches!(ctor, Slot::HostClass { class_id: POINT, .. }));

    assert_eq!(
        eval_text(&bridge, "globalThis.p = new Point(1, 2); [p.x, p.sum(10), Point.origin()].join(',')"),
        "1,13,origin"
    );
    eval(&bridge, "p.x = 5")?;
    assert_eq!(eval(&bridge, "p.x")?, Some(Slot::Int32(5)));
    assert_eq!(eval(&bridge, "p instanceof Point")?, Some(Slot::Bool(true)));

    let instance = bridge.retain(&eval(&bridge, "p")?.unwrap())?;
    let token = world.borrow().constructed[0];
    assert!(matches!(instance, Slot::HostObject { token: t, .. } if t == token));
    Ok(())
}

#[test]
fn test_static_getter_and_instance_setter_are_independent() -> anyhow::Result<()> {
    let (bridge, world) = setup(quiet());
    bridge.register_class(&point_class(), POINT)?;
    world.borrow_mut().count = 11;

    assert_eq!(eval(&bridge, "Point.count")?, Some(Slot::Int32(11)));
    eval(&bridge, "globalThis.q = new Point(0, 0); q.count = 4; Point.count = 99;")?;
    assert_eq!(eval(&bridge, "q.count")?, Some(Slot::Null));
    assert_eq!(eval(&bridge, "Point.count")?, Some(Slot::Int32(11)));

    let token = world.borrow().constructed[0];
    assert_eq!(world.borrow().instance_count_writes, vec![(token, 4)]);
    assert_eq!(
        eval(&bridge, "typeof Object.getOwnPropertyDescriptor(Point, 'count').set")?
            .map(|slot| bridge.stringify(&slot))
            .transpose()?,
        Some("undefined".to_string())
    );
    Ok(())
}

#[test]
fn test_class_instance_finalization() -> anyhow::Result<()> {
    let (bridge, world) = setup(quiet());
    bridge.register_class(&point_class(), POINT)?;
    eval(&bridge, "(() => { new Point(3, 4); new Point(5, 6); })(); 0")?;
    bridge.run_gc();

    let world = world.borrow();
    let mut deleted = world.deleted.clone();
    deleted.sort_unstable();
    assert_eq!(deleted, world.constructed);
    assert!(world.points.is_empty());
    Ok(())
}

#[test]
fn test_constructor_rejection_and_misuse() -> anyhow::Result<()> {
    let (bridge, world) = setup(quiet());
    bridge.register_class(&point_class(), POINT)?;

    world.borrow_mut().reject_construct = true;
    let err = eval(&bridge, "new Point(1, 1)").unwrap_err();
    assert_eq!(err.to_string(), "rejected\n");
    bridge.run_gc();
    assert!(world.borrow().deleted.is_empty());

    let err = eval(&bridge, "Point(1, 1)").unwrap_err();
    assert!(err.to_string().starts_with("TypeError"));

    let err = eval(&bridge, "Point.prototype.sum.call({}, 1)").unwrap_err();
    assert!(err.to_string().starts_with("TypeError: Illegal invocation"));

    assert!(matches!(
        bridge.register_class(&point_class(), POINT),
        Err(BridgeError::DuplicateClass(POINT))
    ));
    Ok(())
}

#[test]
fn test_each_class_has_its_own_identity() -> anyhow::Result<()> {
    let (bridge, _) = setup(quiet());
    bridge.register_class(&point_class(), POINT)?;
    bridge.register_class(&size_class(), SIZE)?;

    assert_eq!(
        eval_text(&bridge, "globalThis.s = new Size(2, 3); [s instanceof Size, s instanceof Point].join(',')"),
        "true,false"
    );
    assert_eq!(eval(&bridge, "s.width()")?, Some(Slot::Int32(2)));

    // 另一个类的实例不能借用本类的成员
    let err = eval(&bridge, "Point.prototype.sum.call(s, 1)").unwrap_err();
    assert!(err.to_string().starts_with("TypeError: Illegal invocation"));
    let err = eval(&bridge, "Size.prototype.width.call(new Point(1, 1))").unwrap_err();
    assert!(err.to_string().starts_with("TypeError: Illegal invocation"));
    Ok(())
}

#[test]
fn test_bind_skips_host_constructor() -> anyhow::Result<()> {
    let (bridge, world) = setup(quiet());
    let ctor = bridge.register_class(&point_class(), POINT)?;
    let bound = bridge.try_dispatch(JsAction::Bind, &[ctor])?.unwrap();
    assert!(matches!(bound, Slot::HostObject { .. }));
    assert!(world.borrow().constructed.is_empty());
    Ok(())
}

#[test]
fn test_too_many_callback_arguments() -> anyhow::Result<()> {
    let config = BridgeConfig {
        max_arguments: 4,
        ..quiet()
    };
    let (bridge, world) = setup(config);
    bridge.register_class(&point_class(), POINT)?;
    let err = eval(&bridge, "new Point(1, 2, 3)").unwrap_err();
    assert!(err.to_string().starts_with("InternalError: Too many arguments (3)"));
    assert!(world.borrow().constructed.is_empty());

    eval(&bridge, "globalThis.r = new Point(1, 2)")?;
    let err = eval(&bridge, "r.sum(1, 2)").unwrap_err();
    assert!(err.to_string().contains("Too many arguments (2)"));
    Ok(())
}

#[test]
fn test_wrapped_host_function() -> anyhow::Result<()> {
    let (bridge, world) = setup(quiet());
    let func = bridge.try_dispatch(JsAction::WrapFunction, &[])?.unwrap();
    let caller = eval(&bridge, "(f) => f(1, 2, 3)")?.unwrap();
    let sum = bridge.try_dispatch(JsAction::Call, &[caller, Slot::Int32(1), func.clone()])?;
    assert_eq!(sum, Some(Slot::Int32(6)));

    // 宿主在回调中保留参数，回调结束后依然可用
    let keeper = eval(&bridge, "(f) => f({ name: 'kept' })")?.unwrap();
    bridge.try_dispatch(JsAction::Call, &[keeper, Slot::Int32(1), func])?;
    let kept = world.borrow_mut().kept.take().unwrap();
    assert_eq!(bridge.frame_depth(), 0);
    bridge.clear_cache();
    let name = bridge.try_dispatch(JsAction::Get, &[kept.clone(), Slot::from("name")])?.unwrap();
    assert_eq!(bridge.string_of(&name)?, "kept");

    bridge.release(&kept)?;
    assert!(matches!(
        bridge.try_dispatch(JsAction::Get, &[kept, Slot::from("name")]),
        Err(BridgeError::InvalidHandle(_))
    ));
    Ok(())
}

#[test]
fn test_host_promise_round_trip() -> anyhow::Result<()> {
    let (mut bridge, world) = setup(quiet());
    let func = bridge.try_dispatch(JsAction::WrapFunction, &[])?.unwrap();
    let caller = eval(&bridge, "(f) => { f('promise').then(v => { globalThis.got = v; }); }")?.unwrap();
    bridge.try_dispatch(JsAction::Call, &[caller, Slot::Int32(1), func])?;
    let promise = world.borrow_mut().pending.take().unwrap();
    assert_eq!(bridge.pending_promises(), 1);

    bridge.try_dispatch(JsAction::PromiseComplete, &[promise.clone(), Slot::Int32(1), Slot::Int32(9)])?;
    assert_eq!(bridge.pending_promises(), 0);
    assert_eq!(bridge.drain_jobs().errors.len(), 0);
    assert_eq!(eval(&bridge, "got")?, Some(Slot::Int32(9)));

    let again = bridge.try_dispatch(JsAction::PromiseComplete, &[promise, Slot::Int32(1), Slot::Int32(1)]);
    assert!(matches!(again, Err(BridgeError::PromiseNotPending(_))));
    assert!(!bridge.has_pending_job());
    Ok(())
}

#[test]
fn test_module_loading_through_host() -> anyhow::Result<()> {
    let (bridge, world) = setup(quiet());
    world.borrow_mut().modules.insert(
        "lib/util.js".to_string(),
        "exports.double = (x) => x * 2;".to_string(),
    );

    let relative = bridge.try_dispatch(
        JsAction::Run,
        &[
            Slot::from("import util from './util.js'; export default util.double(21);"),
            Slot::from("lib/main.js"),
        ],
    )?;
    assert_eq!(relative, Some(Slot::Int32(42)));

    let named = bridge.try_dispatch(
        JsAction::Run,
        &[
            Slot::from("import util from 'virtual'; export default util.double(2);"),
            Slot::from("app.js"),
        ],
    )?;
    assert_eq!(named, Some(Slot::Int32(4)));

    let missing = bridge.try_dispatch(
        JsAction::Run,
        &[Slot::from("import x from './none.js'; export default x;"), Slot::from("lib/m2.js")],
    );
    assert!(missing.is_err());

    let forbidden = bridge.try_dispatch(
        JsAction::Run,
        &[Slot::from("import x from 'forbidden'; export default x;"), Slot::from("m3.js")],
    );
    assert!(forbidden.is_err());
    Ok(())
}

#[test]
fn test_commonjs_detection() -> anyhow::Result<()> {
    let (bridge, _) = setup(quiet());
    let exports = bridge
        .try_dispatch(JsAction::Run, &[Slot::from("exports.x = 1;"), Slot::from("c.js")])?
        .unwrap();
    assert_eq!(
        bridge.try_dispatch(JsAction::Get, &[exports, Slot::from("x")])?,
        Some(Slot::Int32(1))
    );

    // "exported" 不是独立的 export 单词，源码仍被包装
    let wrapped = bridge.try_dispatch(
        JsAction::Run,
        &[Slot::from("var exported = 5; module.exports = exported;"), Slot::from("d.js")],
    )?;
    assert_eq!(wrapped, Some(Slot::Int32(5)));
    Ok(())
}

#[test]
fn test_console_reaches_host() -> anyhow::Result<()> {
    let (bridge, world) = setup(quiet());
    eval(&bridge, "console.log('hello', 42); console.error(new Error('e').message)")?;
    assert_eq!(
        world.borrow().printed,
        vec![
            (PrintLevel::Log, "hello,42".to_string()),
            (PrintLevel::Error, "e".to_string()),
        ]
    );
    Ok(())
}

#[test]
fn test_unhandled_rejection_reaches_host() -> anyhow::Result<()> {
    let (bridge, world) = setup(quiet());
    eval(&bridge, "Promise.reject(new Error('x')); 0")?;
    assert_eq!(
        rejection_lines(&world),
        vec!["Possibly unhandled promise rejection: Error: x".to_string()]
    );
    Ok(())
}

#[test]
fn test_failed_run_prints_nothing() {
    let (bridge, world) = setup(quiet());
    let err = bridge
        .try_dispatch(
            JsAction::Run,
            &[Slot::from("throw new Error('broken');"), Slot::from("bad.js")],
        )
        .unwrap_err();
    assert!(err.to_string().starts_with("Error: broken"));
    assert!(world.borrow().printed.is_empty());
}

#[test]
fn test_failed_run_still_reports_other_rejections() {
    let (bridge, world) = setup(quiet());
    let result = bridge.try_dispatch(
        JsAction::Run,
        &[
            Slot::from("Promise.reject(new Error('other')); throw new Error('broken');"),
            Slot::from("bad.js"),
        ],
    );
    assert!(result.is_err());
    assert_eq!(
        rejection_lines(&world),
        vec!["Possibly unhandled promise rejection: Error: other".to_string()]
    );
}

#[test]
fn test_retained_string_stays_a_string() -> anyhow::Result<()> {
    let (bridge, _) = setup(quiet());
    let text = eval(&bridge, "'abc' + 'def'")?.unwrap();
    let kept = bridge.retain(&text)?;
    assert!(matches!(kept, Slot::JsString(_)));

    bridge.clear_cache();
    assert_eq!(bridge.string_of(&kept)?, "abcdef");
    bridge.release(&kept)?;
    assert!(bridge.string_of(&kept).is_err());
    Ok(())
}

#[test]
fn test_wrong_arguments_keep_cache() -> anyhow::Result<()> {
    let (mut bridge, _) = setup(quiet());
    eval(&bridge, "({})")?;
    let before = bridge.cache_len();
    for code in [1, 3, 4, 5, 9, 10, 11, 12, 100] {
        assert_eq!(bridge.dispatch_with(code, &[Slot::Bool(true)]), -1, "code {}", code);
        assert_eq!(bridge.result(), &Slot::String("WrongArguments".into()));
        assert_eq!(bridge.cache_len(), before);
    }
    assert_eq!(bridge.dispatch_with(55, &[]), -1);
    assert_eq!(bridge.result(), &Slot::String("NotImplement".into()));
    Ok(())
}

#[test]
fn test_teardown_with_live_handles() -> anyhow::Result<()> {
    let (bridge, world) = setup(quiet());
    let ctor = bridge.register_class(&point_class(), POINT)?;
    let instance = eval(&bridge, "new Point(1, 1)")?.unwrap();
    assert!(matches!(bridge.retain(&instance)?, Slot::HostObject { .. }));
    bridge.retain(&ctor)?;
    bridge.new_promise()?;
    assert!(bridge.live_handles() >= 2);
    drop(bridge);
    assert_eq!(world.borrow().constructed.len(), 1);
    Ok(())
}

#[test]
fn test_channel_plugin() -> anyhow::Result<()> {
    let mut registry = PluginRegistry::new();
    registry.add(JsScriptPlugin::with_config(quiet()))?;
    let reply = registry.send("js_script", &MethodCall::new("getPlatformVersion", serde_json::Value::Null).encode())?;
    assert_eq!(reply, MethodResponse::NotImplemented);
    Ok(())
}

#[test]
fn test_config_file_drives_context() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("js_script.toml");
    std::fs::write(&path, "max_arguments = 6\ntrack_unhandled_rejections = false\n")?;
    let config = BridgeConfig::from_toml_file(&path)?;
    let (bridge, _) = setup(config);
    assert_eq!(bridge.arguments().len(), 6);
    Ok(())
}
