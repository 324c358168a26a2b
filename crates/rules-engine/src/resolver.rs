//! 值与路径解析器
//!
//! 把点号/索引路径解析到 data 或 context 文档上，并在不执行任意
//! 宿主代码的前提下解析"安全转换"操作数（白名单纯函数）。

use crate::models::Operand;
use crate::trace::{FieldRead, TraceError};
use serde_json::Value;

/// 不允许出现在路径中的段名
const UNSAFE_SEGMENTS: [&str; 3] = ["__proto__", "constructor", "prototype"];

/// 安全转换白名单
pub const SAFE_TRANSFORMS: [&str; 7] =
    ["add", "subtract", "multiply", "lower", "upper", "trim", "concat"];

/// 条件求值期间的记录汇（错误 + 字段读取）
#[derive(Debug, Default)]
pub(crate) struct EvalSink {
    pub errors: Vec<TraceError>,
    pub reads: Vec<FieldRead>,
}

impl EvalSink {
    pub fn push_error(&mut self, message: impl Into<String>) {
        self.errors.push(TraceError {
            message: message.into(),
            code: None,
            rule_id: None,
        });
    }
}

/// 按点号路径解析值，段内支持 `[n]` 数字索引，裸数字段也可索引数组
///
/// 不安全的段名（`__proto__` 等）直接解析为 undefined。空路径返回
/// 根节点本身。
pub fn resolve_path<'a>(root: &'a Value, path: &str) -> Option<&'a Value> {
    let mut current = root;

    if path.is_empty() {
        return Some(current);
    }

    for segment in path.split('.') {
        let (name, indices) = parse_segment(segment)?;

        if !name.is_empty() {
            if UNSAFE_SEGMENTS.contains(&name) {
                return None;
            }
            current = match current {
                Value::Object(map) => map.get(name)?,
                // 裸数字段用于数组索引
                Value::Array(arr) => arr.get(name.parse::<usize>().ok()?)?,
                _ => return None,
            };
        }

        for idx in indices {
            current = current.as_array()?.get(idx)?;
        }
    }

    Some(current)
}

/// 段名是否属于禁用名单
pub(crate) fn is_unsafe_segment(name: &str) -> bool {
    UNSAFE_SEGMENTS.contains(&name)
}

/// 把 "items[0][1]" 拆成段名与索引列表；语法不合法返回 None
pub(crate) fn parse_segment(segment: &str) -> Option<(&str, Vec<usize>)> {
    let Some(bracket) = segment.find('[') else {
        return Some((segment, Vec::new()));
    };

    let name = &segment[..bracket];
    let mut indices = Vec::new();
    let mut rest = &segment[bracket..];

    while !rest.is_empty() {
        let inner = rest.strip_prefix('[')?;
        let close = inner.find(']')?;
        indices.push(inner[..close].parse::<usize>().ok()?);
        rest = &inner[close + 1..];
    }

    Some((name, indices))
}

/// 对 data / context 两个文档的只读视图
#[derive(Debug, Clone, Copy)]
pub(crate) struct DocumentView<'a> {
    pub context: &'a Value,
    pub data: &'a Value,
}

impl<'a> DocumentView<'a> {
    pub fn new(context: &'a Value, data: &'a Value) -> Self {
        Self { context, data }
    }

    /// 带前缀分发的路径解析：只接受 `data.*` 与 `context.*`
    pub fn resolve_ref(&self, path: &str) -> Option<&'a Value> {
        if let Some(rest) = strip_root(path, "data") {
            resolve_path(self.data, rest)
        } else if let Some(rest) = strip_root(path, "context") {
            resolve_path(self.context, rest)
        } else {
            None
        }
    }

    /// 解析操作数为具体值；undefined 用 None 表示
    ///
    /// 路径解析成功时在 sink 中记录一次字段读取。安全转换名不在白名单
    /// 或执行失败时记录追踪错误并返回 None，绝不抛出宿主异常。
    pub fn resolve_operand(&self, operand: &Operand, sink: &mut EvalSink) -> Option<Value> {
        match operand {
            Operand::Literal { value } => Some(value.clone()),
            Operand::Path { path } => {
                let resolved = self.resolve_ref(path)?.clone();
                sink.reads.push(FieldRead {
                    path: path.clone(),
                    value: resolved.clone(),
                });
                Some(resolved)
            }
            Operand::Transform { name, args } => {
                let resolved_args: Vec<Value> = args
                    .iter()
                    .map(|arg| self.resolve_operand(arg, sink).unwrap_or(Value::Null))
                    .collect();

                match apply_safe_transform(name, &resolved_args) {
                    Ok(value) => Some(value),
                    Err(message) => {
                        sink.push_error(message);
                        None
                    }
                }
            }
        }
    }
}

/// 剥掉 `data` / `context` 根前缀；裸根名解析整个文档
fn strip_root<'p>(path: &'p str, root: &str) -> Option<&'p str> {
    if path == root {
        Some("")
    } else {
        path.strip_prefix(root)?.strip_prefix('.')
    }
}

/// 应用白名单内的安全转换
fn apply_safe_transform(name: &str, args: &[Value]) -> Result<Value, String> {
    match name {
        "add" => numeric_fold(name, args, |acc, n| acc + n),
        "subtract" => numeric_fold(name, args, |acc, n| acc - n),
        "multiply" => numeric_fold(name, args, |acc, n| acc * n),
        "lower" => single_string(name, args).map(|s| Value::String(s.to_lowercase())),
        "upper" => single_string(name, args).map(|s| Value::String(s.to_uppercase())),
        "trim" => single_string(name, args).map(|s| Value::String(s.trim().to_string())),
        "concat" => {
            let joined: String = args.iter().map(value_as_text).collect();
            Ok(Value::String(joined))
        }
        _ => Err(format!("Unknown safe transform: {}", name)),
    }
}

fn numeric_fold(name: &str, args: &[Value], op: impl Fn(f64, f64) -> f64) -> Result<Value, String> {
    let mut nums = args.iter().map(|v| {
        as_f64(v).ok_or_else(|| {
            format!("Safe transform {} expects numeric arguments, got {}", name, type_name(v))
        })
    });

    let first = nums
        .next()
        .ok_or_else(|| format!("Safe transform {} requires at least one argument", name))??;
    let result = nums.try_fold(first, |acc, n| n.map(|n| op(acc, n)))?;

    serde_json::Number::from_f64(result)
        .map(Value::Number)
        .ok_or_else(|| format!("Safe transform {} produced a non-finite number", name))
}

fn single_string<'v>(name: &str, args: &'v [Value]) -> Result<&'v str, String> {
    match args {
        [Value::String(s)] => Ok(s),
        [other] => Err(format!(
            "Safe transform {} expects a string argument, got {}",
            name,
            type_name(other)
        )),
        _ => Err(format!("Safe transform {} expects exactly one argument", name)),
    }
}

/// 宽松的数值转换：数字直接取，数字字符串也接受
pub(crate) fn as_f64(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// 值在拼接场景下的文本表示
pub(crate) fn value_as_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

/// 值的类型名，用于错误信息
pub(crate) fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
