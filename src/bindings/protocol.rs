//! Fixed-slot marshaling protocol
//!
//! Host and engine exchange values through arrays of [`Slot`]s. Which slot
//! means what is decided by the action code, not by the slot itself.

use serde::{Deserialize, Serialize};

/// Key into the lifetime registry's handle table
///
/// Handles are handed out monotonically and never reused inside one context.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Handle(pub u32);

/// Key into the pending promise table
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PromiseId(pub u32);

/// Numeric slot type tags
#[repr(i32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ArgType {
    Null = 0,
    Int32 = 1,
    Int64 = 2,
    Double = 3,
    Bool = 4,
    String = 5,
    JsString = 6,
    JsValue = 7,
    HostClass = 8,
    HostObject = 9,
    RawPointer = 10,
    Promise = 11,
    Managed = 12,
}

impl TryFrom<i32> for ArgType {
    type Error = i32;

    fn try_from(value: i32) -> Result<Self, Self::Error> {
        Ok(match value {
            0 => ArgType::Null,
            1 => ArgType::Int32,
            2 => ArgType::Int64,
            3 => ArgType::Double,
            4 => ArgType::Bool,
            5 => ArgType::String,
            6 => ArgType::JsString,
            7 => ArgType::JsValue,
            8 => ArgType::HostClass,
            9 => ArgType::HostObject,
            10 => ArgType::RawPointer,
            11 => ArgType::Promise,
            12 => ArgType::Managed,
            other => return Err(other),
        })
    }
}

/// One argument or result slot
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub enum Slot {
    #[default]
    Null,
    Int32(i32),
    Int64(i64),
    Double(f64),
    Bool(bool),
    /// 宿主持有的字符串，解码时创建新的引擎字符串
    String(String),
    /// 引擎字符串，句柄属于临时缓存或回调帧
    JsString(Handle),
    /// 引擎值，不转移所有权
    JsValue(Handle),
    /// 投影类的构造函数
    HostClass { class_id: i32, handle: Handle },
    /// 投影类实例或宿主函数包装
    HostObject { token: u64, handle: Handle },
    RawPointer(u64),
    Promise(PromiseId),
    /// 宿主持有一个引用计数
    Managed(Handle),
}

impl Slot {
    pub fn arg_type(&self) -> ArgType {
        match self {
            Slot::Null => ArgType::Null,
            Slot::Int32(_) => ArgType::Int32,
            Slot::Int64(_) => ArgType::Int64,
            Slot::Double(_) => ArgType::Double,
            Slot::Bool(_) => ArgType::Bool,
            Slot::String(_) => ArgType::String,
            Slot::JsString(_) => ArgType::JsString,
            Slot::JsValue(_) => ArgType::JsValue,
            Slot::HostClass { .. } => ArgType::HostClass,
            Slot::HostObject { .. } => ArgType::HostObject,
            Slot::RawPointer(_) => ArgType::RawPointer,
            Slot::Promise(_) => ArgType::Promise,
            Slot::Managed(_) => ArgType::Managed,
        }
    }

    /// 携带的注册表句柄
    pub fn handle(&self) -> Option<Handle> {
        match self {
            Slot::JsString(h) | Slot::JsValue(h) | Slot::Managed(h) => Some(*h),
            Slot::HostClass { handle, .. } | Slot::HostObject { handle, .. } => Some(*handle),
            _ => None,
        }
    }

    /// 可以作为对象参数使用的槽位（引擎字符串除外）
    pub fn object_handle(&self) -> Option<Handle> {
        match self {
            Slot::JsString(_) => None,
            other => other.handle(),
        }
    }

    pub fn as_i32(&self) -> Option<i32> {
        match self {
            Slot::Int32(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_host_str(&self) -> Option<&str> {
        match self {
            Slot::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn is_string(&self) -> bool {
        matches!(self, Slot::String(_) | Slot::JsString(_))
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Slot::Null)
    }
}

impl From<i32> for Slot {
    fn from(value: i32) -> Self {
        Slot::Int32(value)
    }
}

impl From<i64> for Slot {
    fn from(value: i64) -> Self {
        Slot::Int64(value)
    }
}

impl From<f64> for Slot {
    fn from(value: f64) -> Self {
        Slot::Double(value)
    }
}

impl From<bool> for Slot {
    fn from(value: bool) -> Self {
        Slot::Bool(value)
    }
}

impl From<&str> for Slot {
    fn from(value: &str) -> Self {
        Slot::String(value.to_string())
    }
}

impl From<String> for Slot {
    fn from(value: String) -> Self {
        Slot::String(value)
    }
}

/// Host to engine action codes
#[repr(i32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum JsAction {
    Eval = 1,
    ToString = 2,
    Set = 3,
    Get = 4,
    Invoke = 5,
    Bind = 6,
    PromiseComplete = 7,
    WrapFunction = 8,
    Call = 9,
    Run = 10,
    RunPromise = 11,
    PropertyNames = 12,
    NewObject = 13,
    IsArray = 100,
    IsFunction = 101,
    IsConstructor = 102,
}

impl JsAction {
    pub fn code(self) -> i32 {
        self as i32
    }
}

impl TryFrom<i32> for JsAction {
    type Error = i32;

    fn try_from(value: i32) -> Result<Self, Self::Error> {
        Ok(match value {
            1 => JsAction::Eval,
            2 => JsAction::ToString,
            3 => JsAction::Set,
            4 => JsAction::Get,
            5 => JsAction::Invoke,
            6 => JsAction::Bind,
            7 => JsAction::PromiseComplete,
            8 => JsAction::WrapFunction,
            9 => JsAction::Call,
            10 => JsAction::Run,
            11 => JsAction::RunPromise,
            12 => JsAction::PropertyNames,
            13 => JsAction::NewObject,
            100 => JsAction::IsArray,
            101 => JsAction::IsFunction,
            102 => JsAction::IsConstructor,
            other => return Err(other),
        })
    }
}

/// Engine to host callback codes
#[repr(i32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum HostAction {
    Constructor = 1,
    Call = 2,
    Delete = 3,
    CallFunction = 4,
    ModuleName = 5,
    LoadModule = 6,
}

/// dispatch 返回值：脚本异常，文本在 `results[0]`
pub const RESULT_EXCEPTION: i32 = -1;

/// 宿主对回调的答复
#[derive(Debug, Clone, PartialEq)]
pub enum HostReply {
    /// 完成，脚本侧得到 undefined
    Done,
    /// 返回一个值
    Value(Slot),
    /// 抛出给定的值
    Throw(Slot),
    /// 其他负数结果码
    Failure(i32),
}

impl HostReply {
    /// 结果码，与 dispatch 的约定一致
    pub fn code(&self) -> i32 {
        match self {
            HostReply::Done => 0,
            HostReply::Value(_) => 1,
            HostReply::Throw(_) => RESULT_EXCEPTION,
            HostReply::Failure(code) => *code,
        }
    }
}

/// console 输出级别
#[repr(i32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PrintLevel {
    Log = 0,
    Warn = 1,
    Error = 2,
}

/// Member flag bits of a class descriptor entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MemberFlags(pub u32);

impl MemberFlags {
    pub const FUNCTION: MemberFlags = MemberFlags(1 << 0);
    pub const CONSTRUCTOR: MemberFlags = MemberFlags(1 << 1);
    pub const GETTER: MemberFlags = MemberFlags(1 << 2);
    pub const SETTER: MemberFlags = MemberFlags(1 << 3);
    pub const STATIC: MemberFlags = MemberFlags(1 << 4);

    pub fn contains(self, other: MemberFlags) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn is_static(self) -> bool {
        self.contains(MemberFlags::STATIC)
    }

    /// 成员种类；构造函数条目与无法识别的条目返回 `None`
    pub fn kind(self) -> Option<MemberKind> {
        if self.contains(MemberFlags::CONSTRUCTOR) {
            None
        } else if self.contains(MemberFlags::FUNCTION) {
            Some(MemberKind::Method)
        } else if self.contains(MemberFlags::GETTER) {
            Some(MemberKind::Getter)
        } else if self.contains(MemberFlags::SETTER) {
            Some(MemberKind::Setter)
        } else {
            None
        }
    }
}

impl std::ops::BitOr for MemberFlags {
    type Output = MemberFlags;

    fn bitor(self, rhs: Self) -> Self::Output {
        MemberFlags(self.0 | rhs.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MemberKind {
    Method,
    Getter,
    Setter,
}

/// Class member entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemberDescriptor {
    pub name: String,
    pub flags: MemberFlags,
}

impl MemberDescriptor {
    pub fn new(name: impl Into<String>, flags: MemberFlags) -> Self {
        Self {
            name: name.into(),
            flags,
        }
    }
}

/// Host-described class
///
/// A member's position in `members` is its dispatch magic.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClassDescriptor {
    pub name: String,
    #[serde(default)]
    pub members: Vec<MemberDescriptor>,
}

impl ClassDescriptor {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            members: Vec::new(),
        }
    }

    pub fn member(mut self, name: impl Into<String>, flags: MemberFlags) -> Self {
        self.members.push(MemberDescriptor::new(name, flags));
        self
    }

    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_arg_type_tags() {
        assert_eq!(Slot::Null.arg_type() as i32, 0);
        assert_eq!(Slot::Double(1.5).arg_type() as i32, 3);
        assert_eq!(Slot::RawPointer(9).arg_type() as i32, 10);
        assert_eq!(Slot::Managed(Handle(1)).arg_type() as i32, 12);
        for tag in 0..=12 {
            assert_eq!(ArgType::try_from(tag).unwrap() as i32, tag);
        }
        assert_eq!(ArgType::try_from(13), Err(13));
    }

    #[test]
    fn test_action_codes() {
        assert_eq!(JsAction::try_from(1), Ok(JsAction::Eval));
        assert_eq!(JsAction::try_from(102), Ok(JsAction::IsConstructor));
        assert_eq!(JsAction::try_from(14), Err(14));
        assert_eq!(JsAction::NewObject.code(), 13);
    }

    #[test]
    fn test_member_kind() {
        let getter = MemberFlags::GETTER | MemberFlags::STATIC;
        assert_eq!(getter.kind(), Some(MemberKind::Getter));
        assert!(getter.is_static());
        assert_eq!(MemberFlags::CONSTRUCTOR.kind(), None);
        assert_eq!(MemberFlags::FUNCTION.kind(), Some(MemberKind::Method));
        assert_eq!(MemberFlags(0).kind(), None);
    }

    #[test]
    fn test_descriptor_from_json() {
        let json = r#"{"name":"Point","members":[
            {"name":"x","flags":4},
            {"name":"x","flags":8},
            {"name":"length","flags":1}
        ]}"#;
        let desc = ClassDescriptor::from_json(json).unwrap();
        assert_eq!(desc.name, "Point");
        assert_eq!(desc.members.len(), 3);
        assert_eq!(desc.members[1].flags, MemberFlags::SETTER);
    }

    #[test]
    fn test_slot_handles() {
        assert_eq!(Slot::JsString(Handle(3)).handle(), Some(Handle(3)));
        assert_eq!(Slot::JsString(Handle(3)).object_handle(), None);
        let obj = Slot::HostObject {
            token: 7,
            handle: Handle(4),
        };
        assert_eq!(obj.object_handle(), Some(Handle(4)));
        assert_eq!(Slot::Int32(1).handle(), None);
    }

    #[test]
    fn test_reply_codes() {
        assert_eq!(HostReply::Done.code(), 0);
        assert_eq!(HostReply::Value(Slot::Null).code(), 1);
        assert_eq!(HostReply::Throw(Slot::Null).code(), -1);
        assert_eq!(HostReply::Failure(-7).code(), -7);
    }
}
