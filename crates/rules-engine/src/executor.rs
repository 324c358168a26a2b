//! 动作执行器
//!
//! 对一条命中规则按声明顺序执行动作列表。对 data 文档的每一次写入
//! 都经过唯一的变更入口 `write_field`：记录前后对照 diff 并失效记忆
//! 化缓存。自定义动作的策略拒绝、转换失败都是非致命追踪错误；只有
//! 显式的 throwError 会要求调度器中止本轮剩余规则。

use crate::config::ActionPolicy;
use crate::evaluator::parse_date_str;
use crate::memo::MemoCache;
use crate::models::{Action, ExecutionContext, TransformKind, TransformSpec};
use crate::registry::CustomActionRegistry;
use crate::resolver::{
    as_f64, is_unsafe_segment, parse_segment, resolve_path, type_name, value_as_text,
};
use crate::trace::{ActionDiff, AppliedAction, EmittedEvent, Trace, TraceError};
use regex::{Captures, Regex};
use serde_json::{Map, Value};
use std::sync::LazyLock;
use tracing::warn;

/// 策略拒绝时写入追踪的固定文案
const POLICY_DENIED: &str = "Action not allowed by policy";

static TEMPLATE_VAR_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\{\{\s*([A-Za-z0-9_.]+)\s*\}\}").expect("template pattern is valid")
});

/// 动作执行后的控制流指示
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ActionFlow {
    Continue,
    /// throwError：中止当前规则剩余动作和整轮调度
    Abort,
}

/// 动作执行器
pub(crate) struct ActionExecutor<'a> {
    context: &'a ExecutionContext,
    policy: &'a ActionPolicy,
    registry: Option<&'a CustomActionRegistry>,
    cache: Option<&'a MemoCache>,
}

impl<'a> ActionExecutor<'a> {
    pub fn new(
        context: &'a ExecutionContext,
        policy: &'a ActionPolicy,
        registry: Option<&'a CustomActionRegistry>,
        cache: Option<&'a MemoCache>,
    ) -> Self {
        Self {
            context,
            policy,
            registry,
            cache,
        }
    }

    /// 按声明顺序执行一条规则的动作列表
    pub fn run(
        &self,
        rule_id: &str,
        actions: &[Action],
        data: &mut Value,
        trace: &mut Trace,
    ) -> ActionFlow {
        for action in actions {
            match action {
                Action::SetField { path, value } => {
                    if self.write_field(rule_id, "setField", path, value.clone(), data, trace) {
                        trace.actions_applied.push(AppliedAction {
                            rule_id: rule_id.to_string(),
                            action: "setField".to_string(),
                            path: Some(path.clone()),
                            handler: None,
                        });
                    }
                }
                Action::EmitEvent { event, payload } => {
                    trace.events.push(EmittedEvent {
                        rule_id: rule_id.to_string(),
                        event: event.clone(),
                        payload: payload.clone(),
                    });
                    trace.actions_applied.push(AppliedAction {
                        rule_id: rule_id.to_string(),
                        action: "emitEvent".to_string(),
                        path: None,
                        handler: None,
                    });
                }
                Action::ThrowError { message, code } => {
                    trace.errors.push(TraceError {
                        message: message.clone(),
                        code: code.clone(),
                        rule_id: Some(rule_id.to_string()),
                    });
                    trace.actions_applied.push(AppliedAction {
                        rule_id: rule_id.to_string(),
                        action: "throwError".to_string(),
                        path: None,
                        handler: None,
                    });
                    return ActionFlow::Abort;
                }
                Action::Transform { path, transform } => {
                    if self.apply_transform(rule_id, path, transform, data, trace) {
                        trace.actions_applied.push(AppliedAction {
                            rule_id: rule_id.to_string(),
                            action: "transform".to_string(),
                            path: Some(path.clone()),
                            handler: None,
                        });
                    }
                }
                Action::Custom { handler, args } => {
                    self.run_custom(rule_id, handler, args, data, trace);
                }
            }
        }

        ActionFlow::Continue
    }

    /// 唯一的变更入口：写入字段、记录 diff、失效缓存
    fn write_field(
        &self,
        rule_id: &str,
        action_name: &str,
        path: &str,
        new_value: Value,
        data: &mut Value,
        trace: &mut Trace,
    ) -> bool {
        // 写路径允许省略 data. 前缀
        let field_path = path.strip_prefix("data.").unwrap_or(path);

        // 先免副作用地校验整条路径，失败的写入不留下部分创建的中间节点
        let steps = match parse_steps(field_path) {
            Some(steps) if can_write(data, &steps) => steps,
            _ => {
                trace.errors.push(TraceError {
                    message: format!("Cannot write to path '{}'", path),
                    code: None,
                    rule_id: Some(rule_id.to_string()),
                });
                return false;
            }
        };

        let before = resolve_path(data, field_path).cloned().unwrap_or(Value::Null);

        let Some(slot) = ensure_path(data, &steps) else {
            trace.errors.push(TraceError {
                message: format!("Cannot write to path '{}'", path),
                code: None,
                rule_id: Some(rule_id.to_string()),
            });
            return false;
        };
        *slot = new_value.clone();

        trace.action_diffs.push(ActionDiff {
            rule_id: rule_id.to_string(),
            target: "data".to_string(),
            path: field_path.to_string(),
            before,
            after: new_value,
            action: action_name.to_string(),
        });

        // 条件可能读取任意路径，任何写入都保守地整体失效缓存
        if let Some(cache) = self.cache {
            cache.invalidate();
        }

        true
    }

    /// 值转换：读当前值、应用转换、写回
    fn apply_transform(
        &self,
        rule_id: &str,
        path: &str,
        spec: &TransformSpec,
        data: &mut Value,
        trace: &mut Trace,
    ) -> bool {
        let field_path = path.strip_prefix("data.").unwrap_or(path);
        let current = resolve_path(data, field_path).cloned().unwrap_or(Value::Null);

        let result = match spec.kind {
            TransformKind::Math => math_transform(&current, spec),
            TransformKind::String => string_transform(&current, spec),
            TransformKind::Date => self.date_transform(&current, spec),
            TransformKind::Template => Ok(render_template(&spec.expression, &spec.args)),
        };

        match result {
            Ok(value) => self.write_field(rule_id, "transform", path, value, data, trace),
            Err(message) => {
                trace.errors.push(TraceError {
                    message,
                    code: None,
                    rule_id: Some(rule_id.to_string()),
                });
                false
            }
        }
    }

    fn date_transform(&self, current: &Value, spec: &TransformSpec) -> Result<Value, String> {
        let Some(s) = current.as_str() else {
            return Err(format!(
                "Date transform expects a date string, got {}",
                type_name(current)
            ));
        };
        let Some(date) = parse_date_str(s, &self.context.locale) else {
            return Err(format!("Unparsable date: '{}'", s));
        };

        let days = spec
            .args
            .get("days")
            .and_then(as_f64)
            .ok_or_else(|| "Date transform expects a numeric days argument".to_string())?
            as i64;

        let shifted = match spec.expression.as_str() {
            "addDays" => chrono::Duration::try_days(days).and_then(|d| date.checked_add_signed(d)),
            "subtractDays" => {
                chrono::Duration::try_days(days).and_then(|d| date.checked_sub_signed(d))
            }
            other => return Err(format!("Unknown date transform: {}", other)),
        };

        shifted
            .map(|d| Value::String(d.format("%Y-%m-%d").to_string()))
            .ok_or_else(|| "Date transform out of range".to_string())
    }

    /// 自定义动作：策略把关 -> 注册表查找 -> 执行
    fn run_custom(
        &self,
        rule_id: &str,
        handler: &str,
        args: &Value,
        data: &mut Value,
        trace: &mut Trace,
    ) {
        if !self.policy.permits(handler) {
            warn!(rule_id, handler, "自定义动作被策略拒绝");
            trace.errors.push(TraceError {
                message: POLICY_DENIED.to_string(),
                code: None,
                rule_id: Some(rule_id.to_string()),
            });
            return;
        }

        let Some(handler_fn) = self.registry.and_then(|r| r.get(handler)) else {
            trace.errors.push(TraceError {
                message: format!("Custom action handler not registered: {}", handler),
                code: None,
                rule_id: Some(rule_id.to_string()),
            });
            return;
        };

        match handler_fn(data, self.context, args) {
            Ok(()) => {
                trace.actions_applied.push(AppliedAction {
                    rule_id: rule_id.to_string(),
                    action: "custom".to_string(),
                    path: None,
                    handler: Some(handler.to_string()),
                });
                // 处理器可能改写了 data，保守地失效缓存
                if let Some(cache) = self.cache {
                    cache.invalidate();
                }
            }
            Err(e) => {
                trace.errors.push(TraceError {
                    message: format!("Custom action '{}' failed: {}", handler, e),
                    code: None,
                    rule_id: Some(rule_id.to_string()),
                });
            }
        }
    }
}

fn math_transform(current: &Value, spec: &TransformSpec) -> Result<Value, String> {
    let Some(current) = as_f64(current) else {
        return Err(format!(
            "Math transform expects a number, got {}",
            type_name(current)
        ));
    };
    let operand = spec
        .args
        .get("value")
        .and_then(as_f64)
        .ok_or_else(|| "Math transform expects a numeric value argument".to_string())?;

    let result = match spec.expression.as_str() {
        "add" => current + operand,
        "subtract" => current - operand,
        "multiply" => current * operand,
        "divide" => {
            if operand == 0.0 {
                return Err("Math transform division by zero".to_string());
            }
            current / operand
        }
        other => return Err(format!("Unknown math transform: {}", other)),
    };

    serde_json::Number::from_f64(result)
        .map(Value::Number)
        .ok_or_else(|| "Math transform produced a non-finite number".to_string())
}

fn string_transform(current: &Value, spec: &TransformSpec) -> Result<Value, String> {
    let Some(current) = current.as_str() else {
        return Err(format!(
            "String transform expects a string, got {}",
            type_name(current)
        ));
    };

    let result = match spec.expression.as_str() {
        "upper" => current.to_uppercase(),
        "lower" => current.to_lowercase(),
        "trim" => current.trim().to_string(),
        "concat" => {
            let suffix = spec.args.get("value").map(value_as_text).unwrap_or_default();
            format!("{}{}", current, suffix)
        }
        other => return Err(format!("Unknown string transform: {}", other)),
    };

    Ok(Value::String(result))
}

/// mustache 风格的 `{{key}}` 替换，键在 transform.args 中查找
fn render_template(expression: &str, args: &Value) -> Value {
    let rendered = TEMPLATE_VAR_RE.replace_all(expression, |caps: &Captures<'_>| {
        args.get(&caps[1]).map(value_as_text).unwrap_or_default()
    });
    Value::String(rendered.into_owned())
}

/// 路径的写入步骤
#[derive(Debug, Clone)]
enum Step {
    Key(String),
    Index(usize),
}

/// 把写路径拆成步骤序列；不安全段或非法语法返回 None
fn parse_steps(path: &str) -> Option<Vec<Step>> {
    if path.is_empty() {
        return None;
    }

    let mut steps = Vec::new();
    for segment in path.split('.') {
        let (name, indices) = parse_segment(segment)?;
        if !name.is_empty() {
            if is_unsafe_segment(name) {
                return None;
            }
            steps.push(Step::Key(name.to_string()));
        }
        steps.extend(indices.into_iter().map(Step::Index));
    }

    if steps.is_empty() { None } else { Some(steps) }
}

/// 免副作用地检查整条路径是否可写
///
/// 与 [`ensure_path`] 的创建规则一一对应：一旦走到缺失（或显式
/// null）的节点，后续步骤必须全部是键步骤才能补建中间对象；数组
/// 索引要求元素已存在；标量中间节点不可写。写入前先走一遍该检查，
/// 失败的动作不会在文档上留下任何部分创建的中间节点。
fn can_write(root: &Value, steps: &[Step]) -> bool {
    let mut current = root;
    let mut iter = steps.iter();

    while let Some(step) = iter.next() {
        match step {
            Step::Key(key) => match current {
                Value::Object(map) => match map.get(key) {
                    Some(next) => current = next,
                    None => return remaining_all_keys(iter),
                },
                Value::Array(arr) => {
                    match key.parse::<usize>().ok().and_then(|i| arr.get(i)) {
                        Some(next) => current = next,
                        None => return false,
                    }
                }
                Value::Null => return remaining_all_keys(iter),
                _ => return false,
            },
            Step::Index(i) => match current {
                Value::Array(arr) => match arr.get(*i) {
                    Some(next) => current = next,
                    None => return false,
                },
                _ => return false,
            },
        }
    }

    true
}

fn remaining_all_keys<'s>(mut rest: impl Iterator<Item = &'s Step>) -> bool {
    rest.all(|step| matches!(step, Step::Key(_)))
}

/// 定位（必要时创建）写入槽位
///
/// 缺失的中间对象会被创建；数组只允许索引既有元素；标量中间节点
/// 不会被覆盖，定位失败。
fn ensure_path<'v>(root: &'v mut Value, steps: &[Step]) -> Option<&'v mut Value> {
    let Some((step, rest)) = steps.split_first() else {
        return Some(root);
    };

    let next = match step {
        Step::Key(key) => {
            if root.is_null() {
                *root = Value::Object(Map::new());
            }
            match root {
                Value::Object(map) => {
                    let slot = map.entry(key.clone()).or_insert(Value::Null);
                    if !rest.is_empty() && slot.is_null() {
                        *slot = Value::Object(Map::new());
                    }
                    slot
                }
                Value::Array(arr) => arr.get_mut(key.parse::<usize>().ok()?)?,
                _ => return None,
            }
        }
        Step::Index(i) => match root {
            Value::Array(arr) => arr.get_mut(*i)?,
            _ => return None,
        },
    };

    ensure_path(next, rest)
}
