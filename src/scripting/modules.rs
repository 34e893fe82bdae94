//! 模块解析与加载
//!
//! 名称规范化与源码加载都交给宿主。没有 `export` 的源码按 CommonJS 片段包装成 ES 模块。

use std::rc::Weak;

use rquickjs::loader::{Loader, Resolver};
use rquickjs::module::Declared;
use rquickjs::{Ctx, Error, Module};

use crate::bindings::js::call_host;
use crate::bindings::protocol::{HostAction, HostReply, Slot};
use crate::core::error::ScriptError;
use crate::scripting::engine::{upgrade, Shared};

const EXPORT_KEYWORD: &str = "export";

fn is_word_char(c: u8) -> bool {
    c.is_ascii_alphanumeric() || c == b'_'
}

/// 源码中是否有独立的 `export` 单词
///
/// 只做整词匹配，不理解字符串与注释。
pub fn has_export(source: &str) -> bool {
    let bytes = source.as_bytes();
    let key = EXPORT_KEYWORD.len();
    source.match_indices(EXPORT_KEYWORD).any(|(index, _)| {
        let before = index == 0 || !is_word_char(bytes[index - 1]);
        let after = index + key == bytes.len() || !is_word_char(bytes[index + key]);
        before && after
    })
}

/// 把 CommonJS 片段包装为默认导出 `module.exports` 的 ES 模块
pub fn wrap_commonjs(source: &str) -> String {
    format!(
        "const module = {{exports: {{}}}}; let exports = module.exports;\n{}\nexport default module.exports;\n",
        source
    )
}

/// 需要时包装
pub fn module_source(source: &str) -> String {
    if has_export(source) {
        source.to_string()
    } else {
        wrap_commonjs(source)
    }
}

fn combine(path: &mut String, segment: &str) {
    match segment {
        "" | "." => {}
        ".." => {
            while path.ends_with('/') {
                path.pop();
            }
            let cut = path.rfind('/').unwrap_or(0);
            path.truncate(cut);
        }
        _ => {
            if !path.is_empty() && !path.ends_with('/') {
                path.push('/');
            }
            path.push_str(segment);
        }
    }
}

/// 相对说明符按基准模块所在目录解析；非相对说明符原样返回
///
/// 纯字符串运算，不访问文件系统。
pub fn normalize_specifier(base: &str, name: &str) -> String {
    if !name.starts_with('.') {
        return name.to_string();
    }
    let mut path = match base.rfind('/') {
        Some(index) => base[..index].to_string(),
        None => String::new(),
    };
    let absolute = base.starts_with('/');
    for segment in name.split('/') {
        combine(&mut path, segment);
    }
    if absolute && !path.starts_with('/') {
        path.insert(0, '/');
    }
    path
}

/// 名称规范化钩子
pub struct HostResolver {
    shared: Weak<Shared>,
}

impl HostResolver {
    pub fn new(shared: Weak<Shared>) -> Self {
        Self { shared }
    }
}

impl Resolver for HostResolver {
    fn resolve<'js>(&mut self, ctx: &Ctx<'js>, base: &str, name: &str) -> rquickjs::Result<String> {
        let shared = upgrade(ctx, &self.shared)?;
        let slots = vec![Slot::from(base), Slot::from(name)];
        let resolved = call_host(ctx, &shared, HostAction::ModuleName, slots, Vec::new(), |marshal, reply| {
            Ok(match reply {
                HostReply::Value(slot) => marshal.string_of(&slot).ok(),
                HostReply::Done => Some(normalize_specifier(base, name)),
                _ => None,
            })
        })?;
        match resolved {
            Some(path) => {
                tracing::debug!(target: "js_script::modules", base, name, %path, "module resolved");
                Ok(path)
            }
            None => {
                let err = ScriptError::Unresolved {
                    base: base.to_string(),
                    name: name.to_string(),
                };
                Err(Error::new_resolving_message(base, name, err.to_string()))
            }
        }
    }
}

/// 源码加载钩子
pub struct HostLoader {
    shared: Weak<Shared>,
}

impl HostLoader {
    pub fn new(shared: Weak<Shared>) -> Self {
        Self { shared }
    }
}

impl Loader for HostLoader {
    fn load<'js>(&mut self, ctx: &Ctx<'js>, name: &str) -> rquickjs::Result<Module<'js, Declared>> {
        let shared = upgrade(ctx, &self.shared)?;
        let source = call_host(
            ctx,
            &shared,
            HostAction::LoadModule,
            vec![Slot::from(name)],
            Vec::new(),
            |marshal, reply| {
                Ok(match reply {
                    HostReply::Value(slot) => marshal.string_of(&slot).ok(),
                    _ => None,
                })
            },
        )?;
        let Some(source) = source else {
            let err = ScriptError::NotFound(name.to_string());
            return Err(Error::new_loading_message(name, err.to_string()));
        };
        tracing::debug!(target: "js_script::modules", name, bytes = source.len(), "module loaded");
        Module::declare(ctx.clone(), name, module_source(&source))
    }
}
