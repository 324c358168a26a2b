//! 执行追踪
//!
//! 一次 `evaluate` 调用的完整可解释记录：参与的规则、命中的规则、
//! 事件、非致命错误、字段变更 diff、条件求值期间的字段读取，以及
//! 与条件树同构的 explain 树。追踪仅用于调试和可解释性展示，不参与
//! 控制流。

use crate::operators::ExplainKind;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

/// 一次求值调用的追踪记录
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Trace {
    pub started_at: DateTime<Utc>,
    /// 通过作用域过滤并截断后的规则 ID，按执行顺序排列
    pub rules_considered: Vec<String>,
    /// 条件为真的规则 ID
    pub rules_matched: Vec<String>,
    pub events: Vec<EmittedEvent>,
    /// 非致命错误（治理越界、解析失败、策略拒绝、显式 throwError）
    pub errors: Vec<TraceError>,
    pub actions_applied: Vec<AppliedAction>,
    pub action_diffs: Vec<ActionDiff>,
    /// 每条规则条件求值期间观察到的 (path, value) 读取
    pub reads_by_rule_id: HashMap<String, Vec<FieldRead>>,
    /// 每条规则的 explain 树（与条件树同构）
    pub condition_explains: HashMap<String, ExplainNode>,
}

impl Trace {
    pub fn new() -> Self {
        Self {
            started_at: Utc::now(),
            rules_considered: Vec::new(),
            rules_matched: Vec::new(),
            events: Vec::new(),
            errors: Vec::new(),
            actions_applied: Vec::new(),
            action_diffs: Vec::new(),
            reads_by_rule_id: HashMap::new(),
            condition_explains: HashMap::new(),
        }
    }

    pub fn push_error(&mut self, message: impl Into<String>) {
        self.errors.push(TraceError {
            message: message.into(),
            code: None,
            rule_id: None,
        });
    }
}

impl Default for Trace {
    fn default() -> Self {
        Self::new()
    }
}

/// 追踪中的非致命错误
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TraceError {
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rule_id: Option<String>,
}

/// emitEvent 动作产生的事件
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EmittedEvent {
    pub rule_id: String,
    pub event: String,
    pub payload: Value,
}

/// 已执行的动作记录
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppliedAction {
    pub rule_id: String,
    /// 动作类型名（setField / emitEvent / throwError / transform / custom）
    pub action: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub handler: Option<String>,
}

/// 单次字段变更的前后对照
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActionDiff {
    pub rule_id: String,
    /// 变更目标文档，当前始终为 "data"
    pub target: String,
    pub path: String,
    pub before: Value,
    pub after: Value,
    pub action: String,
}

/// 条件求值期间的一次字段读取
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldRead {
    pub path: String,
    pub value: Value,
}

/// explain 树节点，与条件树同构
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExplainNode {
    pub kind: ExplainKind,
    pub result: bool,
    /// 叶子节点的操作符（组合节点为组合类型）
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub op: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub left: Option<ExplainOperand>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub right: Option<ExplainOperand>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<ExplainNode>,
}

impl ExplainNode {
    pub fn combinator(kind_label: impl Into<String>, result: bool, children: Vec<ExplainNode>) -> Self {
        Self {
            kind: ExplainKind::Combinator,
            result,
            op: Some(kind_label.into()),
            left: None,
            right: None,
            children,
        }
    }

    pub fn leaf(
        kind: ExplainKind,
        op: impl Into<String>,
        result: bool,
        left: Option<ExplainOperand>,
        right: Option<ExplainOperand>,
    ) -> Self {
        Self {
            kind,
            result,
            op: Some(op.into()),
            left,
            right,
            children: Vec::new(),
        }
    }
}

/// explain 节点中已解析的操作数
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExplainOperand {
    /// "path" 或 "value"
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    pub value: Value,
}

impl ExplainOperand {
    pub fn path(path: impl Into<String>, value: Value) -> Self {
        Self {
            kind: "path".to_string(),
            path: Some(path.into()),
            value,
        }
    }

    pub fn value(value: Value) -> Self {
        Self {
            kind: "value".to_string(),
            path: None,
            value,
        }
    }
}
