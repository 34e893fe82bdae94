//! Object lifetime registry
//!
//! 宿主看到的每个引擎引用都是句柄表中的一项，带引用计数。
//! 分发期间产生的引用先进入临时结果缓存，宿主回调期间的参数进入回调帧，
//! 回调返回时整帧释放。

use std::collections::HashMap;

use crate::bindings::protocol::Handle;
use crate::core::error::{BridgeError, BridgeResult};

struct Entry<T> {
    value: T,
    refs: u32,
}

/// Reference-counted handle table plus the temporary result cache
pub struct Registry<T> {
    entries: HashMap<Handle, Entry<T>>,
    next_handle: u32,
    cache: Vec<Handle>,
    frames: Vec<Vec<Handle>>,
}

impl<T> Default for Registry<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Registry<T> {
    pub fn new() -> Self {
        Self {
            entries: HashMap::new(),
            next_handle: 1,
            cache: Vec::new(),
            frames: Vec::new(),
        }
    }

    /// 新建一项，引用计数为 `refs`，不进入缓存
    pub fn insert(&mut self, value: T, refs: u32) -> Handle {
        let handle = Handle(self.next_handle);
        self.next_handle = self.next_handle.wrapping_add(1).max(1);
        self.entries.insert(handle, Entry { value, refs });
        handle
    }

    /// 暂存一个引用：有回调帧时进入栈顶帧，否则进入临时结果缓存
    pub fn stage(&mut self, value: T) -> Handle {
        let handle = self.insert(value, 1);
        match self.frames.last_mut() {
            Some(frame) => frame.push(handle),
            None => self.cache.push(handle),
        }
        tracing::trace!(target: "js_script::registry", handle = handle.0, "staged");
        handle
    }

    pub fn get(&self, handle: Handle) -> BridgeResult<&T> {
        self.entries
            .get(&handle)
            .map(|entry| &entry.value)
            .ok_or(BridgeError::InvalidHandle(handle.0))
    }

    pub fn contains(&self, handle: Handle) -> bool {
        self.entries.contains_key(&handle)
    }

    pub fn refs(&self, handle: Handle) -> Option<u32> {
        self.entries.get(&handle).map(|entry| entry.refs)
    }

    /// 增加一个引用
    pub fn add_ref(&mut self, handle: Handle) -> BridgeResult<()> {
        let entry = self
            .entries
            .get_mut(&handle)
            .ok_or(BridgeError::InvalidHandle(handle.0))?;
        entry.refs += 1;
        Ok(())
    }

    /// 释放一个引用，计数归零时移出表并交还值
    pub fn release(&mut self, handle: Handle) -> BridgeResult<Option<T>> {
        let entry = self
            .entries
            .get_mut(&handle)
            .ok_or(BridgeError::InvalidHandle(handle.0))?;
        entry.refs -= 1;
        if entry.refs > 0 {
            return Ok(None);
        }
        Ok(self.entries.remove(&handle).map(|entry| entry.value))
    }

    /// 释放缓存持有的全部引用
    pub fn clear_cache(&mut self) -> Vec<T> {
        let staged = std::mem::take(&mut self.cache);
        self.release_all(staged)
    }

    pub fn cache_len(&self) -> usize {
        self.cache.len()
    }

    pub fn push_frame(&mut self) {
        self.frames.push(Vec::new());
    }

    /// 弹出栈顶回调帧并释放其中的引用
    pub fn pop_frame(&mut self) -> Vec<T> {
        let frame = self.frames.pop().unwrap_or_default();
        self.release_all(frame)
    }

    pub fn frame_depth(&self) -> usize {
        self.frames.len()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// 清空整张表，用于上下文销毁
    pub fn drain(&mut self) -> Vec<T> {
        self.cache.clear();
        self.frames.clear();
        self.entries.drain().map(|(_, entry)| entry.value).collect()
    }

    fn release_all(&mut self, handles: Vec<Handle>) -> Vec<T> {
        let mut freed = Vec::new();
        for handle in handles {
            match self.release(handle) {
                Ok(Some(value)) => freed.push(value),
                Ok(None) => {}
                Err(err) => {
                    tracing::warn!(target: "js_script::registry", %err, "staged handle vanished")
                }
            }
        }
        freed
    }
}
