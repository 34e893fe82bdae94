//! Script globals: `console` and `global`

use std::rc::{Rc, Weak};

use rquickjs::function::Rest;
use rquickjs::object::Accessor;
use rquickjs::{Coerced, Ctx, Function, Object, Value};

use crate::bindings::js::print;
use crate::bindings::protocol::PrintLevel;
use crate::scripting::engine::{upgrade, Shared};

/// 参数的字符串形式以 `,` 连接
pub fn join_arguments(args: &[Value<'_>]) -> rquickjs::Result<String> {
    let mut parts = Vec::with_capacity(args.len());
    for arg in args {
        let Coerced(text) = arg.get::<Coerced<String>>()?;
        parts.push(text);
    }
    Ok(parts.join(","))
}

fn console_method<'js>(
    ctx: &Ctx<'js>,
    weak: &Weak<Shared>,
    level: PrintLevel,
    name: &str,
) -> rquickjs::Result<Function<'js>> {
    let weak = weak.clone();
    Function::new(ctx.clone(), move |ctx: Ctx<'js>, args: Rest<Value<'js>>| {
        let line = join_arguments(&args.0)?;
        match level {
            PrintLevel::Log => tracing::info!(target: "js_script::console", "{}", line),
            PrintLevel::Warn => tracing::warn!(target: "js_script::console", "{}", line),
            PrintLevel::Error => tracing::error!(target: "js_script::console", "{}", line),
        }
        let shared = upgrade(&ctx, &weak)?;
        print(&shared, level, &line);
        Ok::<_, rquickjs::Error>(())
    })?
    .with_name(name)
}

/// 安装 `console.log/warn/error` 与只读的 `global`
pub(crate) fn install<'js>(ctx: &Ctx<'js>, shared: &Rc<Shared>) -> rquickjs::Result<()> {
    let weak = Rc::downgrade(shared);
    let console = Object::new(ctx.clone())?;
    console.set("log", console_method(ctx, &weak, PrintLevel::Log, "log")?)?;
    console.set("warn", console_method(ctx, &weak, PrintLevel::Warn, "warn")?)?;
    console.set("error", console_method(ctx, &weak, PrintLevel::Error, "error")?)?;

    let globals = ctx.globals();
    globals.set("console", console)?;
    globals.prop("global", Accessor::new_get(|ctx: Ctx<'js>| ctx.globals()))?;
    Ok(())
}
