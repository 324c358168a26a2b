//! 配置存储
//!
//! 进程级的可调限额（超时、规则数上限、嵌套深度上限、动作策略）。
//! 提供全局默认实例（启动时读取环境变量），同时每个引擎入口都接受
//! 显式的配置覆盖，测试隔离时无需动全局状态。

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::sync::LazyLock;

/// 引擎限额配置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct EngineConfig {
    /// 单次求值的墙钟超时（毫秒），在规则边界处检查
    pub timeout_ms: u64,
    /// 单次求值最多参与的规则数
    pub max_rules: usize,
    /// 条件树最大嵌套深度（根节点深度为 0）
    pub max_depth: usize,
    pub action_policy: ActionPolicy,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            timeout_ms: 50,
            max_rules: 1000,
            max_depth: 10,
            action_policy: ActionPolicy::default(),
        }
    }
}

impl EngineConfig {
    /// 从环境变量构建配置（RULE_ENGINE_ 前缀）
    ///
    /// 无法解析的值按缺省处理：
    /// - RULE_ENGINE_TIMEOUT_MS
    /// - RULE_ENGINE_MAX_RULES
    /// - RULE_ENGINE_MAX_DEPTH
    /// - RULE_ENGINE_ALLOW_CUSTOM_ACTIONS（true/false）
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Some(v) = env_parse::<u64>("RULE_ENGINE_TIMEOUT_MS") {
            config.timeout_ms = v;
        }
        if let Some(v) = env_parse::<usize>("RULE_ENGINE_MAX_RULES") {
            config.max_rules = v;
        }
        if let Some(v) = env_parse::<usize>("RULE_ENGINE_MAX_DEPTH") {
            config.max_depth = v;
        }
        if let Some(v) = env_parse::<bool>("RULE_ENGINE_ALLOW_CUSTOM_ACTIONS") {
            config.action_policy.allow_custom_actions = v;
        }

        config
    }

    /// 应用部分覆盖
    pub fn merge(&mut self, patch: ConfigPatch) {
        if let Some(v) = patch.timeout_ms {
            self.timeout_ms = v;
        }
        if let Some(v) = patch.max_rules {
            self.max_rules = v;
        }
        if let Some(v) = patch.max_depth {
            self.max_depth = v;
        }
        if let Some(v) = patch.action_policy {
            self.action_policy = v;
        }
    }
}

/// 自定义动作的全局策略
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ActionPolicy {
    pub allow_custom_actions: bool,
    /// 允许的处理器名称白名单；为空表示在开关打开时放行全部
    pub allowed_action_types: Vec<String>,
}

impl ActionPolicy {
    /// 判断某个自定义处理器是否被策略放行
    pub fn permits(&self, handler: &str) -> bool {
        if !self.allow_custom_actions {
            return false;
        }
        self.allowed_action_types.is_empty()
            || self.allowed_action_types.iter().any(|t| t == handler)
    }

    pub fn allow_all() -> Self {
        Self {
            allow_custom_actions: true,
            allowed_action_types: Vec::new(),
        }
    }
}

/// 配置的部分覆盖
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ConfigPatch {
    pub timeout_ms: Option<u64>,
    pub max_rules: Option<usize>,
    pub max_depth: Option<usize>,
    pub action_policy: Option<ActionPolicy>,
}

static GLOBAL_CONFIG: LazyLock<RwLock<EngineConfig>> =
    LazyLock::new(|| RwLock::new(EngineConfig::from_env()));

/// 合并部分配置到进程级实例，返回合并后的快照
pub fn configure(patch: ConfigPatch) -> EngineConfig {
    let mut config = GLOBAL_CONFIG.write();
    config.merge(patch);
    config.clone()
}

/// 当前进程级配置的快照
pub fn current() -> EngineConfig {
    GLOBAL_CONFIG.read().clone()
}

/// 恢复文档化的默认值（不重新读取环境变量），用于测试隔离
pub fn reset() {
    *GLOBAL_CONFIG.write() = EngineConfig::default();
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    std::env::var(name).ok().and_then(|v| v.parse().ok())
}
