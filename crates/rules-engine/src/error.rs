//! 规则引擎错误类型
//!
//! 注意：条件求值与动作执行中的失败属于"软失败"，只会记入追踪
//! （`Trace::errors`），不会以 `RuleError` 的形式向外传播。这里的错误
//! 覆盖的是编程接口：注册表校验、处理器执行、JSON 序列化。

use thiserror::Error;

#[derive(Debug, Error)]
pub enum RuleError {
    #[error("无效的处理器名称: {0}")]
    InvalidHandlerName(String),

    #[error("处理器名称与内置动作类型冲突: {0}")]
    ReservedHandlerName(String),

    #[error("未注册的自定义动作: {0}")]
    HandlerNotFound(String),

    #[error("自定义动作执行失败: {0}")]
    HandlerFailed(String),

    #[error("安全转换未定义: {0}")]
    UnknownTransform(String),

    #[error("JSON 序列化错误: {0}")]
    JsonError(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, RuleError>;
