//! 规则引擎集成测试
//!
//! 通过 JSON 规则定义走完整的求值工作流：作用域过滤、优先级调度、
//! 条件求值、动作执行与追踪产出。

use rules_engine::{
    ActionPolicy, CustomActionRegistry, EngineConfig, EvaluateOptions, EvaluateRequest,
    ExecutionContext, ExplainKind, MemoCache, Rule, evaluate,
};
use serde_json::{Value, json};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

fn parse_rules(value: Value) -> Vec<Rule> {
    serde_json::from_value(value).expect("rules json should deserialize")
}

fn checkout_context() -> ExecutionContext {
    serde_json::from_value(json!({
        "tenantId": "acme",
        "userId": "user-1",
        "role": "buyer",
        "roles": ["beta"],
        "country": "US",
        "locale": "en-US",
        "timezone": "America/New_York",
        "device": "mobile"
    }))
    .expect("context json should deserialize")
}

fn default_options() -> EvaluateOptions {
    EvaluateOptions {
        config: Some(EngineConfig::default()),
        timeout_ms: Some(1000),
        ..Default::default()
    }
}

// ==================== 调度顺序 ====================

#[test]
fn test_priority_tie_breaks_on_rule_id() {
    // 两条同优先级规则：A 标记客群，B 依赖该标记打折
    let rules = parse_rules(json!([
        {
            "ruleId": "B",
            "priority": 5,
            "when": {
                "type": "leaf",
                "op": "eq",
                "left": {"kind": "path", "path": "data.segment"},
                "right": {"kind": "literal", "value": "vip"}
            },
            "actions": [
                {"type": "setField", "path": "data.discount", "value": 0.2}
            ]
        },
        {
            "ruleId": "A",
            "priority": 5,
            "when": {
                "type": "leaf",
                "op": "gte",
                "left": {"kind": "path", "path": "data.total"},
                "right": {"kind": "literal", "value": 1000}
            },
            "actions": [
                {"type": "setField", "path": "data.segment", "value": "vip"}
            ]
        }
    ]));

    let outcome = evaluate(EvaluateRequest {
        rules,
        context: checkout_context(),
        data: json!({"total": 1500}),
        options: default_options(),
    });

    // ruleId 升序决胜：A 先执行，B 才能看到 segment
    assert_eq!(outcome.trace.rules_considered, vec!["A", "B"]);
    assert_eq!(outcome.trace.rules_matched, vec!["A", "B"]);
    assert_eq!(outcome.data["segment"], json!("vip"));
    assert_eq!(outcome.data["discount"], json!(0.2));
}

#[test]
fn test_matched_is_subset_of_considered() {
    let rules = parse_rules(json!([
        {"ruleId": "always", "actions": []},
        {
            "ruleId": "never",
            "when": {
                "type": "leaf",
                "op": "exists",
                "left": {"kind": "path", "path": "data.missing"}
            }
        },
        {
            "ruleId": "out-of-scope",
            "scope": {"countries": ["JP"]}
        }
    ]));

    let outcome = evaluate(EvaluateRequest {
        rules,
        context: checkout_context(),
        data: json!({}),
        options: default_options(),
    });

    assert_eq!(outcome.trace.rules_considered, vec!["always", "never"]);
    assert_eq!(outcome.trace.rules_matched, vec!["always"]);
    for id in &outcome.trace.rules_matched {
        assert!(outcome.trace.rules_considered.contains(id));
    }
}

// ==================== 幂等性 ====================

#[test]
fn test_guarded_rule_is_idempotent_across_passes() {
    let rules = parse_rules(json!([
        {
            "ruleId": "apply-once",
            "when": {
                "type": "combinator",
                "kind": "not",
                "children": [
                    {
                        "type": "leaf",
                        "op": "eq",
                        "left": {"kind": "path", "path": "data.applied"},
                        "right": {"kind": "literal", "value": true}
                    }
                ]
            },
            "actions": [
                {"type": "setField", "path": "data.applied", "value": true},
                {"type": "emitEvent", "event": "discount.applied", "payload": {}}
            ]
        }
    ]));

    let first = evaluate(EvaluateRequest {
        rules: rules.clone(),
        context: checkout_context(),
        data: json!({}),
        options: default_options(),
    });
    assert_eq!(first.trace.events.len(), 1);
    assert_eq!(first.data["applied"], json!(true));

    // 第二轮用第一轮的输出作为输入，守卫条件不再命中
    let second = evaluate(EvaluateRequest {
        rules,
        context: checkout_context(),
        data: first.data.clone(),
        options: default_options(),
    });
    assert!(second.trace.events.is_empty());
    assert_eq!(second.data, first.data);
}

// ==================== 治理限额 ====================

#[test]
fn test_depth_budget_fails_soft() {
    // 构造超过 maxDepth=2 的嵌套条件
    let rules = parse_rules(json!([
        {
            "ruleId": "too-deep",
            "when": {
                "type": "combinator",
                "kind": "all",
                "children": [
                    {
                        "type": "combinator",
                        "kind": "any",
                        "children": [
                            {
                                "type": "combinator",
                                "kind": "all",
                                "children": [
                                    {
                                        "type": "leaf",
                                        "op": "exists",
                                        "left": {"kind": "path", "path": "data.x"}
                                    }
                                ]
                            }
                        ]
                    }
                ]
            },
            "actions": [
                {"type": "setField", "path": "data.fired", "value": true}
            ]
        }
    ]));

    let outcome = evaluate(EvaluateRequest {
        rules,
        context: checkout_context(),
        data: json!({"x": 1}),
        options: EvaluateOptions {
            max_depth: Some(2),
            ..default_options()
        },
    });

    assert!(outcome.trace.rules_matched.is_empty());
    assert!(outcome.data.get("fired").is_none());
    assert!(
        outcome
            .trace
            .errors
            .iter()
            .any(|e| e.message.contains("maxDepth"))
    );
}

#[test]
fn test_timeout_stops_at_rule_boundary() {
    let rules: Vec<Rule> = (0..20)
        .map(|i| {
            serde_json::from_value(json!({
                "ruleId": format!("r{:02}", i),
                "actions": [
                    {"type": "setField", "path": format!("data.r{:02}", i), "value": true}
                ]
            }))
            .unwrap()
        })
        .collect();

    let outcome = evaluate(EvaluateRequest {
        rules,
        context: checkout_context(),
        data: json!({}),
        options: EvaluateOptions {
            timeout_ms: Some(0),
            ..default_options()
        },
    });

    assert!(outcome.trace.rules_matched.len() < 20);
    assert!(
        outcome
            .trace
            .errors
            .iter()
            .any(|e| e.message.contains("timeout"))
    );
}

#[test]
fn test_max_rules_truncation() {
    let rules: Vec<Rule> = (0..5)
        .map(|i| {
            serde_json::from_value(json!({"ruleId": format!("r{}", i)})).unwrap()
        })
        .collect();

    let outcome = evaluate(EvaluateRequest {
        rules,
        context: checkout_context(),
        data: json!({}),
        options: EvaluateOptions {
            max_rules: Some(3),
            ..default_options()
        },
    });

    assert_eq!(outcome.trace.rules_considered.len(), 3);
    assert!(
        outcome
            .trace
            .errors
            .iter()
            .any(|e| e.message == "Max rules limit reached")
    );
}

// ==================== 中止语义 ====================

#[test]
fn test_throw_error_aborts_rest_of_pass() {
    let rules = parse_rules(json!([
        {
            "ruleId": "a-emit",
            "priority": 3,
            "actions": [
                {"type": "emitEvent", "event": "checkout.started", "payload": {"step": 1}}
            ]
        },
        {
            "ruleId": "b-block",
            "priority": 2,
            "actions": [
                {"type": "throwError", "message": "Blocked by fraud check", "code": "FRAUD_BLOCK"}
            ]
        },
        {
            "ruleId": "c-after",
            "priority": 1,
            "actions": [
                {"type": "setField", "path": "data.after", "value": true}
            ]
        }
    ]));

    let outcome = evaluate(EvaluateRequest {
        rules,
        context: checkout_context(),
        data: json!({}),
        options: default_options(),
    });

    assert_eq!(outcome.trace.events.len(), 1);
    assert_eq!(outcome.trace.events[0].event, "checkout.started");
    let blocked = outcome
        .trace
        .errors
        .iter()
        .find(|e| e.code.as_deref() == Some("FRAUD_BLOCK"))
        .expect("throwError should surface in trace");
    assert_eq!(blocked.rule_id.as_deref(), Some("b-block"));
    assert!(outcome.data.get("after").is_none());
}

// ==================== 日期与区间 ====================

#[test]
fn test_date_between_campaign_window() {
    let rules = parse_rules(json!([
        {
            "ruleId": "summer-sale",
            "when": {
                "type": "leaf",
                "op": "dateBetween",
                "left": {"kind": "path", "path": "data.orderDate"},
                "right": {"kind": "literal", "value": ["2024-06-01", "2024-08-31"]}
            },
            "actions": [
                {"type": "setField", "path": "data.campaign", "value": "summer"}
            ]
        }
    ]));

    // 闭区间：边界日期命中
    let hit = evaluate(EvaluateRequest {
        rules: rules.clone(),
        context: checkout_context(),
        data: json!({"orderDate": "2024-08-31"}),
        options: default_options(),
    });
    assert_eq!(hit.data["campaign"], json!("summer"));

    let miss = evaluate(EvaluateRequest {
        rules,
        context: checkout_context(),
        data: json!({"orderDate": "2024-09-01"}),
        options: default_options(),
    });
    assert!(miss.data.get("campaign").is_none());
}

// ==================== 自定义动作 ====================

#[test]
fn test_custom_action_with_policy() {
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = calls.clone();

    let registry = CustomActionRegistry::new();
    registry
        .register("recordAudit", move |data, ctx, args| {
            counter.fetch_add(1, Ordering::SeqCst);
            data["audit"] = json!({
                "tenant": ctx.tenant_id,
                "reason": args.get("reason").cloned().unwrap_or(Value::Null),
            });
            Ok(())
        })
        .unwrap();

    let rules = parse_rules(json!([
        {
            "ruleId": "audit",
            "actions": [
                {"type": "custom", "handler": "recordAudit", "args": {"reason": "large order"}}
            ]
        }
    ]));

    let mut config = EngineConfig::default();
    config.action_policy = ActionPolicy::allow_all();

    let outcome = evaluate(EvaluateRequest {
        rules: rules.clone(),
        context: checkout_context(),
        data: json!({}),
        options: EvaluateOptions {
            action_handlers: Some(Arc::new(registry.clone())),
            config: Some(config),
            timeout_ms: Some(1000),
            ..Default::default()
        },
    });

    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(outcome.data["audit"]["tenant"], json!("acme"));
    assert_eq!(outcome.trace.actions_applied.len(), 1);
    assert_eq!(
        outcome.trace.actions_applied[0].handler.as_deref(),
        Some("recordAudit")
    );

    // 默认策略关闭自定义动作：同一条规则被拒绝且处理器不再被调用
    let denied = evaluate(EvaluateRequest {
        rules,
        context: checkout_context(),
        data: json!({}),
        options: EvaluateOptions {
            action_handlers: Some(Arc::new(registry)),
            ..default_options()
        },
    });
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert!(
        denied
            .trace
            .errors
            .iter()
            .any(|e| e.message == "Action not allowed by policy")
    );
}

// ==================== 记忆化 ====================

#[test]
fn test_memoized_pass_sees_mutations() {
    // 两条规则共享同一条件；第一条把 total 改到阈值之下，
    // 第二条必须重新求值而不是复用缓存
    let condition = json!({
        "type": "leaf",
        "op": "gt",
        "left": {"kind": "path", "path": "data.total"},
        "right": {"kind": "literal", "value": 100}
    });
    let rules = parse_rules(json!([
        {
            "ruleId": "a-discount",
            "priority": 2,
            "when": condition.clone(),
            "actions": [
                {"type": "setField", "path": "data.total", "value": 50}
            ]
        },
        {
            "ruleId": "b-check",
            "priority": 1,
            "when": condition,
            "actions": [
                {"type": "setField", "path": "data.stillHigh", "value": true}
            ]
        }
    ]));

    let cache = Arc::new(MemoCache::new(32));
    let outcome = evaluate(EvaluateRequest {
        rules,
        context: checkout_context(),
        data: json!({"total": 150}),
        options: EvaluateOptions {
            memoize_condition_evaluations: true,
            cache: Some(cache),
            ..default_options()
        },
    });

    assert_eq!(outcome.trace.rules_matched, vec!["a-discount"]);
    assert_eq!(outcome.data["total"], json!(50));
    assert!(outcome.data.get("stillHigh").is_none());
}

#[test]
fn test_failed_write_leaves_document_and_cache_intact() {
    // 三条规则：两次检查夹着一次写不进去的 setField。
    // 失败的写入既不能留下残余中间节点，也不能让第二次检查
    // 命中已过期的缓存结果
    let exists_a = json!({
        "type": "leaf",
        "op": "exists",
        "left": {"kind": "path", "path": "data.a"}
    });
    let rules = parse_rules(json!([
        {
            "ruleId": "1-check",
            "priority": 3,
            "when": exists_a.clone(),
            "actions": [
                {"type": "setField", "path": "data.seenBefore", "value": true}
            ]
        },
        {
            "ruleId": "2-bad-write",
            "priority": 2,
            "actions": [
                {"type": "setField", "path": "data.a[0]", "value": 1}
            ]
        },
        {
            "ruleId": "3-recheck",
            "priority": 1,
            "when": exists_a,
            "actions": [
                {"type": "setField", "path": "data.seenAfter", "value": true}
            ]
        }
    ]));

    let cache = Arc::new(MemoCache::new(32));
    let outcome = evaluate(EvaluateRequest {
        rules,
        context: checkout_context(),
        data: json!({}),
        options: EvaluateOptions {
            memoize_condition_evaluations: true,
            cache: Some(cache),
            ..default_options()
        },
    });

    // 文档上没有写失败留下的空对象
    assert!(outcome.data.get("a").is_none());
    assert!(outcome.data.get("seenBefore").is_none());
    assert!(outcome.data.get("seenAfter").is_none());
    assert_eq!(outcome.trace.rules_matched, vec!["2-bad-write"]);
    assert!(
        outcome
            .trace
            .errors
            .iter()
            .any(|e| e.message.contains("Cannot write"))
    );
}

// ==================== 追踪产出 ====================

#[test]
fn test_explain_tree_and_reads() {
    let rules = parse_rules(json!([
        {
            "ruleId": "vip-check",
            "when": {
                "type": "combinator",
                "kind": "all",
                "children": [
                    {
                        "type": "leaf",
                        "op": "gte",
                        "left": {"kind": "path", "path": "data.total"},
                        "right": {"kind": "literal", "value": 1000}
                    },
                    {
                        "type": "leaf",
                        "op": "eq",
                        "left": {"kind": "path", "path": "context.role"},
                        "right": {"kind": "literal", "value": "buyer"}
                    }
                ]
            },
            "actions": []
        }
    ]));

    let outcome = evaluate(EvaluateRequest {
        rules,
        context: checkout_context(),
        data: json!({"total": 1500}),
        options: default_options(),
    });

    let explain = outcome
        .trace
        .condition_explains
        .get("vip-check")
        .expect("explain tree should be recorded");
    assert_eq!(explain.kind, ExplainKind::Combinator);
    assert!(explain.result);
    assert_eq!(explain.children.len(), 2);
    assert_eq!(explain.children[0].kind, ExplainKind::Compare);

    let reads = outcome
        .trace
        .reads_by_rule_id
        .get("vip-check")
        .expect("reads should be recorded");
    assert!(reads.iter().any(|r| r.path == "data.total" && r.value == json!(1500)));
    assert!(reads.iter().any(|r| r.path == "context.role" && r.value == json!("buyer")));
}

#[test]
fn test_transform_action_pipeline() {
    let rules = parse_rules(json!([
        {
            "ruleId": "surcharge",
            "actions": [
                {
                    "type": "transform",
                    "path": "data.total",
                    "transform": {"kind": "math", "expression": "multiply", "args": {"value": 1.1}}
                },
                {
                    "type": "transform",
                    "path": "data.shipDate",
                    "transform": {"kind": "date", "expression": "addDays", "args": {"days": 2}}
                }
            ]
        }
    ]));

    let outcome = evaluate(EvaluateRequest {
        rules,
        context: checkout_context(),
        data: json!({"total": 100, "shipDate": "2024-06-15"}),
        options: default_options(),
    });

    let total = outcome.data["total"].as_f64().unwrap();
    assert!((total - 110.0).abs() < 1e-9);
    assert_eq!(outcome.data["shipDate"], json!("2024-06-17"));
    assert_eq!(outcome.trace.action_diffs.len(), 2);
    assert_eq!(outcome.trace.action_diffs[0].before, json!(100));
}
