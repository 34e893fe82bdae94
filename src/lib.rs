//! # js_script
//!
//! An embedded QuickJS bridge with a fixed-slot argument protocol.
//!
//! ## Features
//!
//! - **Action dispatch**: integer action codes over `arguments[]` / `results[]`
//! - **Lifetime registry**: reference-counted handles and a call-then-clear result cache
//! - **Class projection**: host-described classes exposed as native constructible classes
//! - **Promise bridge**: host-completed promises and a host-driven job loop
//! - **Module hooks**: host-side specifier normalization and source loading
//!
//! ## Example
//!
//! ```no_run
//! use js_script::{BridgeConfig, BridgeContext, JsAction, Slot};
//!
//! let mut bridge = BridgeContext::new(BridgeConfig::default()).unwrap();
//! let code = bridge.dispatch_with(JsAction::Eval.code(), &[Slot::from("1+1"), Slot::from("main.js")]);
//! assert_eq!(code, 1);
//! assert_eq!(bridge.result(), &Slot::Int32(2));
//! ```
//!
//! ## Modules
//!
//! - [`core`]: errors and logging
//! - [`config`]: bridge configuration
//! - [`bindings`]: protocol, marshal, handle registry, host interface
//! - [`scripting`]: engine context, dispatcher, classes, promises, modules
//! - [`plugins`]: host-transport channel plugins

/// Errors, logging, shared macros
#[macro_use]
pub mod core;
/// Configuration system
pub mod config;
/// Host-facing protocol and marshaling
pub mod bindings;
/// Engine side of the bridge
pub mod scripting;
/// Channel plugins
pub mod plugins;

pub use bindings::{
    BridgeHost, ClassDescriptor, Handle, HostAction, HostReply, HostScope, JsAction, MemberFlags,
    PrintLevel, PromiseId, SilentHost, Slot,
};
pub use config::BridgeConfig;
pub use crate::core::{BridgeError, BridgeResult, ScriptError};
pub use scripting::BridgeContext;
