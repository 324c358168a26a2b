//! 规则调度器
//!
//! 单次求值的入口：按执行上下文过滤作用域、截断到规则数上限、按
//! priority 降序（ruleId 升序决胜）排序，然后逐条求值并执行动作。
//! 超时在规则边界处检查，已开始的规则不会被打断。任何失败都降级为
//! 追踪错误，`evaluate` 总是返回完整的结果与追踪。

use crate::config::{self, EngineConfig};
use crate::evaluator::{ConditionEvaluator, EvalOutcome};
use crate::executor::{ActionExecutor, ActionFlow};
use crate::memo::{MemoCache, condition_key, hash_json};
use crate::models::{Condition, ExecutionContext, Rule};
use crate::registry::CustomActionRegistry;
use crate::trace::{Trace, TraceError};
use serde_json::Value;
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, instrument, warn};

/// 截断规则列表时写入追踪的固定文案
const MAX_RULES_REACHED: &str = "Max rules limit reached";

/// 单次求值的可选项；未设置的限额落到配置存储
#[derive(Default)]
pub struct EvaluateOptions {
    pub timeout_ms: Option<u64>,
    pub max_rules: Option<usize>,
    pub max_depth: Option<usize>,
    /// 同一轮内对结构相同的条件复用求值结果
    pub memoize_condition_evaluations: bool,
    /// 跨调用共享的记忆化缓存；开启记忆化但未提供时按调用各建一个
    pub cache: Option<Arc<MemoCache>>,
    pub action_handlers: Option<Arc<CustomActionRegistry>>,
    /// 完整的配置覆盖，优先于进程级配置存储
    pub config: Option<EngineConfig>,
    /// 求值结束后回调完整追踪
    pub trace_logger: Option<Box<dyn Fn(&Trace) + Send + Sync>>,
    /// 求值结束后输出一行结构化日志
    pub log_trace: bool,
}

/// 单次求值请求
#[derive(Default)]
pub struct EvaluateRequest {
    pub rules: Vec<Rule>,
    pub context: ExecutionContext,
    pub data: Value,
    pub options: EvaluateOptions,
}

/// 求值结果：变更后的数据文档与完整追踪
#[derive(Debug)]
pub struct EvaluateOutcome {
    pub data: Value,
    pub trace: Trace,
}

/// 对一组规则执行一轮求值
#[instrument(skip_all, fields(rules = request.rules.len()))]
pub fn evaluate(request: EvaluateRequest) -> EvaluateOutcome {
    let EvaluateRequest {
        rules,
        context,
        mut data,
        options,
    } = request;

    let mut cfg = options.config.unwrap_or_else(config::current);
    if let Some(v) = options.timeout_ms {
        cfg.timeout_ms = v;
    }
    if let Some(v) = options.max_rules {
        cfg.max_rules = v;
    }
    if let Some(v) = options.max_depth {
        cfg.max_depth = v;
    }

    let mut trace = Trace::new();

    // 作用域过滤保持输入顺序，截断发生在排序之前
    let mut selected: Vec<&Rule> = rules.iter().filter(|r| r.in_scope(&context)).collect();
    if selected.len() > cfg.max_rules {
        warn!(
            selected = selected.len(),
            max_rules = cfg.max_rules,
            "规则数超出上限，截断"
        );
        selected.truncate(cfg.max_rules);
        trace.push_error(MAX_RULES_REACHED);
    }
    selected.sort_by(|a, b| {
        b.priority
            .cmp(&a.priority)
            .then_with(|| a.rule_id.cmp(&b.rule_id))
    });
    trace.rules_considered = selected.iter().map(|r| r.rule_id.clone()).collect();

    let context_doc = serde_json::to_value(&context).unwrap_or(Value::Null);
    let context_hash = hash_json(&context_doc);

    let cache = match (options.memoize_condition_evaluations, options.cache) {
        (true, Some(cache)) => Some(cache),
        (true, None) => Some(Arc::new(MemoCache::default())),
        (false, cache) => cache,
    };
    let executor = ActionExecutor::new(
        &context,
        &cfg.action_policy,
        options.action_handlers.as_deref(),
        cache.as_deref(),
    );

    let started = Instant::now();
    for rule in selected {
        // 超时只在规则边界检查，已开始的规则执行到底
        if started.elapsed().as_millis() as u64 >= cfg.timeout_ms {
            trace.push_error(format!("Evaluation timeout after {}ms", cfg.timeout_ms));
            break;
        }

        let matched = match &rule.when {
            // 条件缺省恒真，不产生 explain 和读取记录
            None => true,
            Some(condition) => {
                let outcome = evaluate_condition(
                    condition,
                    &context_doc,
                    &data,
                    &context.locale,
                    cfg.max_depth,
                    options.memoize_condition_evaluations,
                    cache.as_deref(),
                    context_hash,
                );

                for mut error in outcome.errors {
                    error.rule_id = Some(rule.rule_id.clone());
                    trace.errors.push(error);
                }
                if !outcome.reads.is_empty() {
                    trace
                        .reads_by_rule_id
                        .insert(rule.rule_id.clone(), outcome.reads);
                }
                trace
                    .condition_explains
                    .insert(rule.rule_id.clone(), outcome.explain);

                outcome.result
            }
        };

        if !matched {
            continue;
        }
        trace.rules_matched.push(rule.rule_id.clone());

        if executor.run(&rule.rule_id, &rule.actions, &mut data, &mut trace) == ActionFlow::Abort {
            break;
        }
    }

    if options.log_trace {
        info!(
            considered = trace.rules_considered.len(),
            matched = trace.rules_matched.len(),
            trace = %render_trace(&trace),
            "规则求值完成"
        );
    }
    if let Some(logger) = &options.trace_logger {
        logger(&trace);
    }

    EvaluateOutcome { data, trace }
}

/// log_trace 日志事件里携带的完整追踪 JSON
fn render_trace(trace: &Trace) -> String {
    serde_json::to_string(trace).unwrap_or_default()
}

/// 带可选记忆化的条件求值
///
/// 缓存键由条件结构、上下文哈希和缓存代标记共同决定；data 文档的
/// 任何变更都会推进代标记，旧条目自然失配。
#[allow(clippy::too_many_arguments)]
fn evaluate_condition(
    condition: &Condition,
    context_doc: &Value,
    data: &Value,
    locale: &str,
    max_depth: usize,
    memoize: bool,
    cache: Option<&MemoCache>,
    context_hash: u64,
) -> EvalOutcome {
    if memoize && let Some(cache) = cache {
        let key = condition_key(condition, context_hash, cache.generation());
        if let Some(hit) = cache.get(key) {
            return hit;
        }
        let outcome = ConditionEvaluator::new(context_doc, data, locale, max_depth)
            .evaluate(condition);
        cache.insert(key, outcome.clone());
        return outcome;
    }

    ConditionEvaluator::new(context_doc, data, locale, max_depth).evaluate(condition)
}
