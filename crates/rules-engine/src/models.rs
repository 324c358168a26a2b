//! 规则引擎领域模型
//!
//! 规则输入在求值期间是不可变的；引擎唯一会修改的是调用方传入的
//! data 文档。

use crate::operators::{CombinatorKind, Operator};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// 规则定义
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Rule {
    /// 唯一标识，用于排序决胜和追踪报告
    pub rule_id: String,
    #[serde(default)]
    pub priority: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scope: Option<RuleScope>,
    /// 条件缺省表示"恒真"
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub when: Option<Condition>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub actions: Vec<Action>,
}

impl Rule {
    pub fn new(rule_id: impl Into<String>) -> Self {
        Self {
            rule_id: rule_id.into(),
            priority: 0,
            scope: None,
            when: None,
            actions: Vec::new(),
        }
    }

    pub fn with_priority(mut self, priority: i64) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_scope(mut self, scope: RuleScope) -> Self {
        self.scope = Some(scope);
        self
    }

    pub fn with_when(mut self, when: Condition) -> Self {
        self.when = Some(when);
        self
    }

    pub fn with_actions(mut self, actions: Vec<Action>) -> Self {
        self.actions = actions;
        self
    }

    /// 无作用域的规则对所有上下文生效
    pub fn in_scope(&self, ctx: &ExecutionContext) -> bool {
        self.scope.as_ref().is_none_or(|s| s.matches(ctx))
    }
}

/// 规则作用域过滤器
///
/// 空列表表示该维度不设约束。
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RuleScope {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub countries: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub roles: Vec<String>,
}

impl RuleScope {
    /// 判断作用域是否匹配执行上下文
    ///
    /// roles 维度与 `{context.role} ∪ context.roles` 求交集。
    pub fn matches(&self, ctx: &ExecutionContext) -> bool {
        if !self.countries.is_empty() && !self.countries.iter().any(|c| c == &ctx.country) {
            return false;
        }

        if !self.roles.is_empty() {
            let role_match = self.roles.iter().any(|r| r == &ctx.role)
                || self.roles.iter().any(|r| ctx.roles.contains(r));
            if !role_match {
                return false;
            }
        }

        true
    }
}

/// 条件节点（组合或叶子）
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum Condition {
    Combinator {
        kind: CombinatorKind,
        children: Vec<Condition>,
    },
    Leaf {
        op: Operator,
        left: Operand,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        right: Option<Operand>,
    },
}

impl Condition {
    pub fn all(children: Vec<Condition>) -> Self {
        Self::Combinator {
            kind: CombinatorKind::All,
            children,
        }
    }

    pub fn any(children: Vec<Condition>) -> Self {
        Self::Combinator {
            kind: CombinatorKind::Any,
            children,
        }
    }

    pub fn not(child: Condition) -> Self {
        Self::Combinator {
            kind: CombinatorKind::Not,
            children: vec![child],
        }
    }

    pub fn leaf(op: Operator, left: Operand, right: Option<Operand>) -> Self {
        Self::Leaf { op, left, right }
    }
}

/// 操作数（字面量、路径引用或安全转换表达式）
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum Operand {
    Literal {
        value: Value,
    },
    /// 以 `data.` 或 `context.` 为前缀的点号路径
    Path {
        path: String,
    },
    /// 白名单内的纯函数，参数本身也是操作数
    Transform {
        name: String,
        #[serde(default)]
        args: Vec<Operand>,
    },
}

impl Operand {
    pub fn literal(value: impl Into<Value>) -> Self {
        Self::Literal {
            value: value.into(),
        }
    }

    pub fn path(path: impl Into<String>) -> Self {
        Self::Path { path: path.into() }
    }

    pub fn transform(name: impl Into<String>, args: Vec<Operand>) -> Self {
        Self::Transform {
            name: name.into(),
            args,
        }
    }
}

/// 动作定义
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum Action {
    SetField {
        path: String,
        value: Value,
    },
    EmitEvent {
        event: String,
        #[serde(default)]
        payload: Value,
    },
    ThrowError {
        message: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        code: Option<String>,
    },
    Transform {
        path: String,
        transform: TransformSpec,
    },
    Custom {
        handler: String,
        #[serde(default)]
        args: Value,
    },
}

impl Action {
    /// 动作类型名（与序列化 tag 一致）
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::SetField { .. } => "setField",
            Self::EmitEvent { .. } => "emitEvent",
            Self::ThrowError { .. } => "throwError",
            Self::Transform { .. } => "transform",
            Self::Custom { .. } => "custom",
        }
    }
}

/// 值转换动作的规格
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransformSpec {
    pub kind: TransformKind,
    pub expression: String,
    #[serde(default)]
    pub args: Value,
}

/// 值转换类别
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransformKind {
    Math,
    String,
    Date,
    Template,
}

/// 执行上下文 - 求值期间只读
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ExecutionContext {
    pub tenant_id: String,
    pub user_id: String,
    pub role: String,
    pub roles: Vec<String>,
    pub country: String,
    pub locale: String,
    pub timezone: String,
    pub device: String,
    pub permissions: Vec<String>,
    pub feature_flags: Map<String, Value>,
}
