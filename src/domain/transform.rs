// ==========================================
// 库存表格批量导入系统 - 转换规则领域模型
// ==========================================
// 职责: 声明式转换规则（条件 + 字段 + 操作）
// 红线: 仅在提交时应用，纯函数，不回写会话原始/修正数据
// ==========================================

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

// ==========================================
// TransformationRule - 转换规则
// ==========================================
// 规则按列表顺序依次应用，后一条规则看到前一条的输出
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransformationRule {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub predicate: RulePredicate,
    pub field: String,
    pub operation: RuleOperation,
}

impl TransformationRule {
    pub fn new(field: &str, operation: RuleOperation) -> Self {
        Self {
            name: None,
            predicate: RulePredicate::Always,
            field: field.to_string(),
            operation,
        }
    }

    pub fn when(mut self, predicate: RulePredicate) -> Self {
        self.predicate = predicate;
        self
    }

    pub fn named(mut self, name: &str) -> Self {
        self.name = Some(name.to_string());
        self
    }
}

// ==========================================
// RulePredicate - 规则生效条件
// ==========================================
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RulePredicate {
    #[default]
    Always,
    FieldEquals { field: String, value: String },
    FieldEmpty { field: String },
    FieldNotEmpty { field: String },
    FieldMatches { field: String, pattern: String },
}

// ==========================================
// RuleOperation - 单元格操作
// ==========================================
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RuleOperation {
    Trim,
    Uppercase,
    Lowercase,
    /// 正则替换
    Replace {
        pattern: String,
        #[serde(default)]
        value: String,
    },
    SetValue { value: String },
    DefaultIfEmpty { value: String },
    EnsurePrefix { value: String },
    EnsureSuffix { value: String },
    /// 小数四舍五入到指定位数（非数值保持不变）
    RoundDecimal { places: u32 },
    /// 查表映射
    Map {
        mapping: BTreeMap<String, String>,
        #[serde(default)]
        case_insensitive: bool,
    },
}
