//! 自定义动作注册表
//!
//! 内置动作类型之外的可插拔处理器。注册时校验名称格式并拒绝与内置
//! 动作类型冲突的名字；是否真正执行由全局动作策略在执行时把关
//! （见 `config::ActionPolicy`）。

use crate::error::{Result, RuleError};
use crate::models::ExecutionContext;
use dashmap::DashMap;
use regex::Regex;
use serde_json::Value;
use std::sync::{Arc, LazyLock};

/// 自定义动作处理器
///
/// 处理器可以修改 data 文档；执行器会在每次自定义动作之后保守地
/// 失效记忆化缓存。
pub type CustomActionFn =
    Arc<dyn Fn(&mut Value, &ExecutionContext, &Value) -> Result<()> + Send + Sync>;

/// 与内置动作类型冲突的保留名
const RESERVED_NAMES: [&str; 5] = ["setField", "emitEvent", "throwError", "transform", "custom"];

static HANDLER_NAME_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").expect("handler name pattern is valid")
});

/// 自定义动作注册表
#[derive(Clone, Default)]
pub struct CustomActionRegistry {
    handlers: Arc<DashMap<String, CustomActionFn>>,
}

impl CustomActionRegistry {
    pub fn new() -> Self {
        Self {
            handlers: Arc::new(DashMap::new()),
        }
    }

    /// 注册处理器；名称必须是合法标识符且不与内置动作类型冲突
    pub fn register(
        &self,
        name: impl Into<String>,
        handler: impl Fn(&mut Value, &ExecutionContext, &Value) -> Result<()> + Send + Sync + 'static,
    ) -> Result<()> {
        let name = name.into();

        if !HANDLER_NAME_RE.is_match(&name) {
            return Err(RuleError::InvalidHandlerName(name));
        }
        if RESERVED_NAMES.contains(&name.as_str()) {
            return Err(RuleError::ReservedHandlerName(name));
        }

        self.handlers.insert(name, Arc::new(handler));
        Ok(())
    }

    /// 注销处理器，返回是否存在
    pub fn unregister(&self, name: &str) -> bool {
        self.handlers.remove(name).is_some()
    }

    pub fn has(&self, name: &str) -> bool {
        self.handlers.contains_key(name)
    }

    /// 已注册的处理器名称（排序后返回，保证确定性）
    pub fn list(&self) -> Vec<String> {
        let mut names: Vec<String> = self.handlers.iter().map(|e| e.key().clone()).collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    pub(crate) fn get(&self, name: &str) -> Option<CustomActionFn> {
        self.handlers.get(name).map(|e| e.value().clone())
    }
}

impl std::fmt::Debug for CustomActionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CustomActionRegistry")
            .field("handlers", &self.list())
            .finish()
    }
}
