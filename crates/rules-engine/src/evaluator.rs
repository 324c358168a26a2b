//! 条件求值器
//!
//! 递归求值组合/叶子条件树：组合节点短路求值，叶子节点经解析器取得
//! 操作数后套用操作符。同时产出与条件树同构的 explain 树。深度越界、
//! 非法正则、无法解析的日期都只产生追踪错误并求值为 false，绝不向
//! 宿主抛异常。

use crate::models::{Condition, Operand};
use crate::operators::{CombinatorKind, ExplainKind, Operator};
use crate::resolver::{as_f64, DocumentView, EvalSink};
use crate::trace::{ExplainNode, ExplainOperand, FieldRead, TraceError};
use chrono::{DateTime, NaiveDate, NaiveDateTime};
use regex::Regex;
use serde_json::Value;

/// 一次条件求值的完整产出
#[derive(Debug, Clone)]
pub struct EvalOutcome {
    pub result: bool,
    pub explain: ExplainNode,
    pub reads: Vec<FieldRead>,
    pub errors: Vec<TraceError>,
}

/// 条件求值器
pub struct ConditionEvaluator<'a> {
    view: DocumentView<'a>,
    locale: &'a str,
    max_depth: usize,
}

impl<'a> ConditionEvaluator<'a> {
    /// `context` 是序列化后的执行上下文文档，`data` 是当前数据文档
    pub fn new(context: &'a Value, data: &'a Value, locale: &'a str, max_depth: usize) -> Self {
        Self {
            view: DocumentView::new(context, data),
            locale,
            max_depth,
        }
    }

    /// 求值整棵条件树（根节点深度为 0）
    pub fn evaluate(&self, condition: &Condition) -> EvalOutcome {
        let mut sink = EvalSink::default();
        let (result, explain) = self.eval_node(condition, 0, &mut sink);

        EvalOutcome {
            result,
            explain,
            reads: sink.reads,
            errors: sink.errors,
        }
    }

    /// 递归求值单个节点
    fn eval_node(&self, condition: &Condition, depth: usize, sink: &mut EvalSink) -> (bool, ExplainNode) {
        if depth > self.max_depth {
            sink.push_error(format!(
                "Condition depth {} exceeds maxDepth {}",
                depth, self.max_depth
            ));
            let explain = match condition {
                Condition::Combinator { kind, .. } => {
                    ExplainNode::combinator(kind.to_string(), false, Vec::new())
                }
                Condition::Leaf { op, .. } => {
                    ExplainNode::leaf(op.explain_kind(), op.to_string(), false, None, None)
                }
            };
            return (false, explain);
        }

        match condition {
            Condition::Combinator { kind, children } => {
                self.eval_combinator(*kind, children, depth, sink)
            }
            Condition::Leaf { op, left, right } => {
                self.eval_leaf(*op, left, right.as_ref(), sink)
            }
        }
    }

    /// 组合节点求值（all/any 短路；not 要求恰好一个子节点）
    fn eval_combinator(
        &self,
        kind: CombinatorKind,
        children: &[Condition],
        depth: usize,
        sink: &mut EvalSink,
    ) -> (bool, ExplainNode) {
        let mut explains = Vec::new();

        let result = match kind {
            CombinatorKind::All => {
                let mut all_true = true;
                for child in children {
                    let (matched, explain) = self.eval_node(child, depth + 1, sink);
                    explains.push(explain);
                    if !matched {
                        all_true = false;
                        break;
                    }
                }
                all_true
            }
            CombinatorKind::Any => {
                let mut any_true = false;
                for child in children {
                    let (matched, explain) = self.eval_node(child, depth + 1, sink);
                    explains.push(explain);
                    if matched {
                        any_true = true;
                        break;
                    }
                }
                any_true
            }
            CombinatorKind::Not => {
                if children.len() != 1 {
                    sink.push_error(format!(
                        "not combinator requires exactly one child, got {}",
                        children.len()
                    ));
                    false
                } else {
                    let (matched, explain) = self.eval_node(&children[0], depth + 1, sink);
                    explains.push(explain);
                    !matched
                }
            }
        };

        (result, ExplainNode::combinator(kind.to_string(), result, explains))
    }

    /// 叶子节点求值
    fn eval_leaf(
        &self,
        op: Operator,
        left_operand: &Operand,
        right_operand: Option<&Operand>,
        sink: &mut EvalSink,
    ) -> (bool, ExplainNode) {
        let left = self.view.resolve_operand(left_operand, sink);
        let right = right_operand.and_then(|o| self.view.resolve_operand(o, sink));

        let result = self.apply_operator(op, left.as_ref(), right.as_ref(), sink);

        let explain = ExplainNode::leaf(
            op.explain_kind(),
            op.to_string(),
            result,
            Some(explain_operand(left_operand, left)),
            right_operand.map(|o| explain_operand(o, right)),
        );

        (result, explain)
    }

    /// 套用操作符
    fn apply_operator(
        &self,
        op: Operator,
        left: Option<&Value>,
        right: Option<&Value>,
        sink: &mut EvalSink,
    ) -> bool {
        // 存在性/空值检查以"路径是否解析成功"为语义，单独处理
        match op {
            Operator::Exists => return left.is_some(),
            Operator::IsEmpty => return is_empty(left),
            Operator::IsNotEmpty => return !is_empty(left),
            _ => {}
        }

        // 其余操作符在左值缺失时一律为 false：缺失字段不参与任何
        // 二元比较，neq 也不例外（缺失 != x 不成立）。要区分"字段
        // 不存在"与"字段值不等"，用 exists/isEmpty
        let Some(left) = left else {
            return false;
        };

        match op {
            Operator::Eq => loose_eq(left, right.unwrap_or(&Value::Null)),
            Operator::Neq => !loose_eq(left, right.unwrap_or(&Value::Null)),
            Operator::Gt => ordered_compare(left, right, |o| o == std::cmp::Ordering::Greater),
            Operator::Gte => ordered_compare(left, right, |o| o != std::cmp::Ordering::Less),
            Operator::Lt => ordered_compare(left, right, |o| o == std::cmp::Ordering::Less),
            Operator::Lte => ordered_compare(left, right, |o| o != std::cmp::Ordering::Greater),
            Operator::In => in_collection(left, right),
            Operator::Contains => contains(left, right),
            Operator::StartsWith => starts_with(left, right),
            Operator::EndsWith => ends_with(left, right),
            Operator::Matches => self.regex_match(left, right, sink),
            Operator::Length => length_eq(left, right),
            Operator::DateBefore => self.date_compare(left, right, sink, |l, r| l < r),
            Operator::DateAfter => self.date_compare(left, right, sink, |l, r| l > r),
            Operator::DateOn => self.date_compare(left, right, sink, |l, r| l == r),
            Operator::DateBetween => self.date_between(left, right, sink),
            Operator::PlusDays => self.plus_days(left, right, sink),
            Operator::Exists | Operator::IsEmpty | Operator::IsNotEmpty => unreachable!(),
        }
    }

    /// 正则匹配；非法模式记追踪错误并判 false
    fn regex_match(&self, left: &Value, right: Option<&Value>, sink: &mut EvalSink) -> bool {
        let (Some(subject), Some(pattern)) = (left.as_str(), right.and_then(Value::as_str)) else {
            return false;
        };

        match Regex::new(pattern) {
            Ok(re) => re.is_match(subject),
            Err(e) => {
                sink.push_error(format!("Invalid regex pattern '{}': {}", pattern, e));
                false
            }
        }
    }

    fn date_compare(
        &self,
        left: &Value,
        right: Option<&Value>,
        sink: &mut EvalSink,
        cmp: impl Fn(NaiveDate, NaiveDate) -> bool,
    ) -> bool {
        let (Some(l), Some(r)) = (
            self.parse_date(left, sink),
            right.and_then(|r| self.parse_date(r, sink)),
        ) else {
            return false;
        };
        cmp(l, r)
    }

    /// dateBetween：右操作数是 [start, end] 闭区间
    fn date_between(&self, left: &Value, right: Option<&Value>, sink: &mut EvalSink) -> bool {
        let Some(range) = right.and_then(Value::as_array) else {
            sink.push_error("dateBetween expects a [start, end] array".to_string());
            return false;
        };
        if range.len() != 2 {
            sink.push_error(format!(
                "dateBetween expects a [start, end] array, got {} elements",
                range.len()
            ));
            return false;
        }

        let (Some(l), Some(start), Some(end)) = (
            self.parse_date(left, sink),
            self.parse_date(&range[0], sink),
            self.parse_date(&range[1], sink),
        ) else {
            return false;
        };

        start <= l && l <= end
    }

    /// plusDays：右操作数是 {date, days}，检查 left == date + days（天级精度）
    fn plus_days(&self, left: &Value, right: Option<&Value>, sink: &mut EvalSink) -> bool {
        let Some(spec) = right.and_then(Value::as_object) else {
            sink.push_error("plusDays expects a {date, days} object".to_string());
            return false;
        };

        let (Some(l), Some(base)) = (
            self.parse_date(left, sink),
            spec.get("date").and_then(|d| self.parse_date(d, sink)),
        ) else {
            return false;
        };

        let Some(days) = spec.get("days").and_then(as_f64) else {
            sink.push_error("plusDays expects a numeric days field".to_string());
            return false;
        };

        let shifted = chrono::Duration::try_days(days as i64)
            .and_then(|delta| base.checked_add_signed(delta));
        match shifted {
            Some(expected) => l == expected,
            None => false,
        }
    }

    /// 解析日期（天级精度），遵循 context.locale；失败记追踪错误
    fn parse_date(&self, value: &Value, sink: &mut EvalSink) -> Option<NaiveDate> {
        let Some(s) = value.as_str() else {
            sink.push_error(format!("Unparsable date: {}", value));
            return None;
        };

        match parse_date_str(s, self.locale) {
            Some(date) => Some(date),
            None => {
                sink.push_error(format!("Unparsable date: '{}'", s));
                None
            }
        }
    }
}

/// 字符串到日期的解析；datetime 输入截断到日期
pub(crate) fn parse_date_str(s: &str, locale: &str) -> Option<NaiveDate> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.date_naive());
    }
    if let Ok(dt) = NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S") {
        return Some(dt.date());
    }
    if let Ok(date) = NaiveDate::parse_from_str(s, "%Y-%m-%d") {
        return Some(date);
    }

    // 斜杠格式按 locale 解释：en-US 为 MM/DD/YYYY，其余为 DD/MM/YYYY
    if s.contains('/') {
        let format = if locale.starts_with("en-US") {
            "%m/%d/%Y"
        } else {
            "%d/%m/%Y"
        };
        if let Ok(date) = NaiveDate::parse_from_str(s, format) {
            return Some(date);
        }
    }

    None
}

/// 宽松相等：数值统一成 f64 比较，其余走深度相等
fn loose_eq(left: &Value, right: &Value) -> bool {
    if let (Some(l), Some(r)) = (as_f64(left), as_f64(right)) {
        return (l - r).abs() < f64::EPSILON;
    }
    left == right
}

/// 有序比较：优先数值，其次字符串字典序；类型不匹配为 false
fn ordered_compare(
    left: &Value,
    right: Option<&Value>,
    check: impl Fn(std::cmp::Ordering) -> bool,
) -> bool {
    let Some(right) = right else {
        return false;
    };

    if let (Some(l), Some(r)) = (as_f64(left), as_f64(right)) {
        return l.partial_cmp(&r).is_some_and(&check);
    }
    if let (Some(l), Some(r)) = (left.as_str(), right.as_str()) {
        return check(l.cmp(r));
    }

    false
}

/// in：左值是右数组的成员，或右对象的键
fn in_collection(left: &Value, right: Option<&Value>) -> bool {
    match right {
        Some(Value::Array(items)) => items.iter().any(|item| loose_eq(left, item)),
        Some(Value::Object(map)) => left.as_str().is_some_and(|key| map.contains_key(key)),
        _ => false,
    }
}

/// contains：字符串子串或数组成员
fn contains(left: &Value, right: Option<&Value>) -> bool {
    let Some(right) = right else {
        return false;
    };

    match left {
        Value::String(s) => right.as_str().is_some_and(|needle| s.contains(needle)),
        Value::Array(items) => items.iter().any(|item| loose_eq(item, right)),
        _ => false,
    }
}

fn starts_with(left: &Value, right: Option<&Value>) -> bool {
    let Some(right) = right else {
        return false;
    };

    match left {
        Value::String(s) => right.as_str().is_some_and(|prefix| s.starts_with(prefix)),
        Value::Array(items) => items.first().is_some_and(|item| loose_eq(item, right)),
        _ => false,
    }
}

fn ends_with(left: &Value, right: Option<&Value>) -> bool {
    let Some(right) = right else {
        return false;
    };

    match left {
        Value::String(s) => right.as_str().is_some_and(|suffix| s.ends_with(suffix)),
        Value::Array(items) => items.last().is_some_and(|item| loose_eq(item, right)),
        _ => false,
    }
}

/// length：字符串字符数或数组长度等于右值
fn length_eq(left: &Value, right: Option<&Value>) -> bool {
    let Some(expected) = right.and_then(as_f64) else {
        return false;
    };

    let len = match left {
        Value::String(s) => s.chars().count(),
        Value::Array(items) => items.len(),
        _ => return false,
    };

    (len as f64 - expected).abs() < f64::EPSILON
}

/// 空值判定表：undefined / null / "" / [] / {} 为"空"
fn is_empty(value: Option<&Value>) -> bool {
    match value {
        None => true,
        Some(Value::Null) => true,
        Some(Value::String(s)) => s.is_empty(),
        Some(Value::Array(arr)) => arr.is_empty(),
        Some(Value::Object(obj)) => obj.is_empty(),
        _ => false,
    }
}

/// 把操作数和解析结果折叠成 explain 操作数
fn explain_operand(operand: &Operand, resolved: Option<Value>) -> ExplainOperand {
    match operand {
        Operand::Path { path } => {
            ExplainOperand::path(path.clone(), resolved.unwrap_or(Value::Null))
        }
        _ => ExplainOperand::value(resolved.unwrap_or(Value::Null)),
    }
}
