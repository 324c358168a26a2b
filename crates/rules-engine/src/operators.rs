//! 条件操作符定义

use serde::{Deserialize, Serialize};
use std::fmt;

/// 叶子条件操作符
///
/// 序列化名称与宿主平台的 JSON 约定一致（camelCase），并为
/// 本地化别名提供 serde alias：`on` -> `dateOn`，`before` -> `dateBefore`。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Operator {
    // 通用比较
    Eq,
    Neq,

    // 数值/字符串比较
    Gt,
    Gte,
    Lt,
    Lte,

    // 包含检查
    In,
    Contains,

    // 字符串操作
    StartsWith,
    EndsWith,
    #[serde(alias = "regex")]
    Matches,

    // 存在性与空值检查
    Exists,
    IsEmpty,
    IsNotEmpty,

    // 长度检查
    Length,

    // 日期操作
    #[serde(alias = "before")]
    DateBefore,
    #[serde(alias = "after")]
    DateAfter,
    DateBetween,
    #[serde(alias = "on")]
    DateOn,
    PlusDays,
}

impl Operator {
    /// 操作符对应的 explain 节点类别
    pub fn explain_kind(self) -> ExplainKind {
        match self {
            Self::Exists | Self::IsEmpty | Self::IsNotEmpty | Self::Matches => {
                ExplainKind::Predicate
            }
            _ => ExplainKind::Compare,
        }
    }

    /// 右操作数可以缺省的操作符（存在性/空值检查）
    pub fn is_unary(self) -> bool {
        matches!(self, Self::Exists | Self::IsEmpty | Self::IsNotEmpty)
    }
}

impl fmt::Display for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Eq => "eq",
            Self::Neq => "neq",
            Self::Gt => "gt",
            Self::Gte => "gte",
            Self::Lt => "lt",
            Self::Lte => "lte",
            Self::In => "in",
            Self::Contains => "contains",
            Self::StartsWith => "startsWith",
            Self::EndsWith => "endsWith",
            Self::Matches => "matches",
            Self::Exists => "exists",
            Self::IsEmpty => "isEmpty",
            Self::IsNotEmpty => "isNotEmpty",
            Self::Length => "length",
            Self::DateBefore => "dateBefore",
            Self::DateAfter => "dateAfter",
            Self::DateBetween => "dateBetween",
            Self::DateOn => "dateOn",
            Self::PlusDays => "plusDays",
        };
        write!(f, "{}", s)
    }
}

/// 组合节点类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CombinatorKind {
    All,
    Any,
    Not,
}

impl fmt::Display for CombinatorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::All => write!(f, "all"),
            Self::Any => write!(f, "any"),
            Self::Not => write!(f, "not"),
        }
    }
}

/// explain 节点类别
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExplainKind {
    Combinator,
    Compare,
    Predicate,
}
