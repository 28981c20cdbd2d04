// ==========================================
// 库存表格批量导入系统 - 转换规则执行器
// ==========================================
// 职责: 提交时对映射行应用有序转换规则
// 红线: 纯函数，输入行只读，输出新行；不回写会话
// ==========================================

use crate::domain::schema::TargetSchema;
use crate::domain::session::MappedRow;
use crate::domain::transform::{RuleOperation, RulePredicate, TransformationRule};
use crate::importer::error::{ImportError, ImportResult};
use regex::Regex;
use tracing::debug;

// ==========================================
// CompiledRule - 预编译规则（正则只编译一次）
// ==========================================
#[derive(Debug, Clone)]
pub struct CompiledRule {
    rule: TransformationRule,
    predicate_regex: Option<Regex>,
    operation_regex: Option<Regex>,
}

fn compile_regex(field: &str, pattern: &str) -> ImportResult<Regex> {
    Regex::new(pattern).map_err(|e| ImportError::InvalidRule {
        field: field.to_string(),
        message: format!("正则表达式无效 '{}': {}", pattern, e),
    })
}

impl CompiledRule {
    pub fn compile(rule: &TransformationRule) -> ImportResult<Self> {
        let predicate_regex = match &rule.predicate {
            RulePredicate::FieldMatches { field, pattern } => Some(compile_regex(field, pattern)?),
            _ => None,
        };
        let operation_regex = match &rule.operation {
            RuleOperation::Replace { pattern, .. } => Some(compile_regex(&rule.field, pattern)?),
            _ => None,
        };

        Ok(Self {
            rule: rule.clone(),
            predicate_regex,
            operation_regex,
        })
    }

    fn matches(&self, row: &MappedRow) -> bool {
        let value_of = |field: &str| row.get(field).map(|v| v.as_str()).unwrap_or("");
        match &self.rule.predicate {
            RulePredicate::Always => true,
            RulePredicate::FieldEquals { field, value } => value_of(field) == value.as_str(),
            RulePredicate::FieldEmpty { field } => value_of(field).trim().is_empty(),
            RulePredicate::FieldNotEmpty { field } => !value_of(field).trim().is_empty(),
            RulePredicate::FieldMatches { field, .. } => self
                .predicate_regex
                .as_ref()
                .map(|re| re.is_match(value_of(field)))
                .unwrap_or(false),
        }
    }

    fn apply_operation(&self, value: &str) -> String {
        match &self.rule.operation {
            RuleOperation::Trim => value.trim().to_string(),
            RuleOperation::Uppercase => value.to_uppercase(),
            RuleOperation::Lowercase => value.to_lowercase(),
            RuleOperation::Replace { value: replacement, .. } => match &self.operation_regex {
                Some(re) => re.replace_all(value, replacement.as_str()).into_owned(),
                None => value.to_string(),
            },
            RuleOperation::SetValue { value: new_value } => new_value.clone(),
            RuleOperation::DefaultIfEmpty { value: default } => {
                if value.trim().is_empty() {
                    default.clone()
                } else {
                    value.to_string()
                }
            }
            RuleOperation::EnsurePrefix { value: prefix } => {
                if value.is_empty() || value.starts_with(prefix.as_str()) {
                    value.to_string()
                } else {
                    format!("{}{}", prefix, value)
                }
            }
            RuleOperation::EnsureSuffix { value: suffix } => {
                if value.is_empty() || value.ends_with(suffix.as_str()) {
                    value.to_string()
                } else {
                    format!("{}{}", value, suffix)
                }
            }
            RuleOperation::RoundDecimal { places } => match value.trim().parse::<f64>() {
                Ok(number) if number.is_finite() => format!("{:.*}", *places as usize, number),
                _ => value.to_string(),
            },
            RuleOperation::Map {
                mapping,
                case_insensitive,
            } => {
                let hit = if *case_insensitive {
                    mapping
                        .iter()
                        .find(|(from, _)| from.to_lowercase() == value.to_lowercase())
                        .map(|(_, to)| to)
                } else {
                    mapping.get(value)
                };
                hit.cloned().unwrap_or_else(|| value.to_string())
            }
        }
    }

    /// 对单行应用规则（条件不满足时原样返回）
    pub fn apply(&self, row: &MappedRow) -> MappedRow {
        let mut out = row.clone();
        if self.matches(row) {
            let current = row.get(&self.rule.field).map(|v| v.as_str()).unwrap_or("");
            out.insert(self.rule.field.clone(), self.apply_operation(current));
        }
        out
    }
}

// ==========================================
// 规则检查 / 批量应用
// ==========================================

/// 检查规则是否可用（字段存在、正则可编译）
pub fn check_rules(rules: &[TransformationRule], schema: &TargetSchema) -> ImportResult<()> {
    for rule in rules {
        if schema.field(&rule.field).is_none() {
            return Err(ImportError::InvalidRule {
                field: rule.field.clone(),
                message: format!("目标字段不存在于 Schema {}", schema.name),
            });
        }
        CompiledRule::compile(rule)?;
    }
    Ok(())
}

pub fn compile_rules(rules: &[TransformationRule]) -> ImportResult<Vec<CompiledRule>> {
    rules.iter().map(CompiledRule::compile).collect()
}

/// 对单行依次应用全部规则
pub fn transform_row(row: &MappedRow, compiled: &[CompiledRule]) -> MappedRow {
    compiled
        .iter()
        .fold(row.clone(), |current, rule| rule.apply(&current))
}

/// 对行集合依次应用规则，返回新行集合
pub fn apply_transformation_rules(
    rows: &[MappedRow],
    rules: &[TransformationRule],
) -> ImportResult<Vec<MappedRow>> {
    let compiled = compile_rules(rules)?;
    debug!(rows = rows.len(), rules = compiled.len(), "应用转换规则");
    Ok(rows.iter().map(|row| transform_row(row, &compiled)).collect())
}
