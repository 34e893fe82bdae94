//! Host binding layer
//!
//! 宿主与引擎之间的固定槽位协议：
//!
//! ```text
//! host ── arguments[] ──> dispatch(code, argc) ──> engine
//!      <── results[]  ──
//! host <── HostAction + args ── callback ── engine
//!      ── HostReply ──>
//! ```
//!
//! - `protocol` - 槽位、动作码、类描述
//! - `registry` - 句柄表与临时缓存
//! - `marshal` - 槽位与引擎值互转
//! - `js` - 宿主回调接口

pub mod js;
pub mod marshal;
pub mod protocol;
pub mod registry;

pub use js::{BridgeHost, HostScope, SilentHost};
pub use protocol::*;
pub use registry::Registry;
