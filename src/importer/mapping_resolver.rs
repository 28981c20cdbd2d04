// ==========================================
// 库存表格批量导入系统 - 列映射解析器
// ==========================================
// 职责: 源列 → 目标字段 的建议 / 应用 / 覆盖检查
// 红线: 建议不自动生效；生效映射必须显式提交
// ==========================================

use crate::domain::schema::{SchemaField, TargetSchema};
use crate::domain::session::{FieldMapping, ImportSession, MappingTarget};
use crate::domain::types::LogLevel;
use crate::importer::error::{ImportResult, MappingError};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use tracing::{debug, warn};

// 匹配得分档位
const SCORE_EXACT: f64 = 1.0;
const SCORE_HEADER_CONTAINS: f64 = 0.8;
const SCORE_FIELD_CONTAINS: f64 = 0.6;
const SCORE_TOKEN_OVERLAP: f64 = 0.4;

/// 子串匹配的最短长度（过短的 ID 子串误配率高）
const MIN_SUBSTRING_LEN: usize = 3;

// ==========================================
// 建议 / 映射条目
// ==========================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MappingCandidate {
    pub field_id: String,
    pub label: String,
    pub confidence: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MappingSuggestion {
    pub header: String,
    pub candidates: Vec<MappingCandidate>, // 置信度降序
}

impl MappingSuggestion {
    pub fn best(&self) -> Option<&MappingCandidate> {
        self.candidates.first()
    }
}

/// 显式映射条目（按提交顺序生效）
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MappingEntry {
    pub column: String,
    pub target: MappingTarget,
}

impl MappingEntry {
    pub fn field(column: &str, field_id: &str) -> Self {
        Self {
            column: column.to_string(),
            target: MappingTarget::Field(field_id.to_string()),
        }
    }

    pub fn ignore(column: &str) -> Self {
        Self {
            column: column.to_string(),
            target: MappingTarget::Ignore,
        }
    }
}

// ==========================================
// 文本规整
// ==========================================

/// 小写 + 去除非字母数字
fn normalize(text: &str) -> String {
    text.chars()
        .filter(|c| c.is_alphanumeric())
        .flat_map(|c| c.to_lowercase())
        .collect()
}

fn tokens(text: &str) -> HashSet<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(|t| t.to_lowercase())
        .collect()
}

/// 单个表头对单个字段的匹配得分（0 表示不匹配）
fn score(header: &str, field: &SchemaField) -> f64 {
    let nh = normalize(header);
    if nh.is_empty() {
        return 0.0;
    }

    let names: Vec<String> = std::iter::once(field.id.as_str())
        .chain(std::iter::once(field.label.as_str()))
        .chain(field.aliases.iter().map(|a| a.as_str()))
        .map(normalize)
        .filter(|n| !n.is_empty())
        .collect();

    if names.iter().any(|n| *n == nh) {
        return SCORE_EXACT;
    }

    let long_enough = |s: &str| s.chars().count() >= MIN_SUBSTRING_LEN;
    if names.iter().any(|n| long_enough(n) && nh.contains(n.as_str())) {
        return SCORE_HEADER_CONTAINS;
    }
    if long_enough(&nh) && names.iter().any(|n| n.contains(nh.as_str())) {
        return SCORE_FIELD_CONTAINS;
    }

    let header_tokens = tokens(header);
    let field_tokens: HashSet<String> = std::iter::once(field.id.as_str())
        .chain(std::iter::once(field.label.as_str()))
        .chain(field.aliases.iter().map(|a| a.as_str()))
        .flat_map(tokens)
        .collect();
    if !header_tokens.is_disjoint(&field_tokens) {
        return SCORE_TOKEN_OVERLAP;
    }

    0.0
}

// ==========================================
// suggest - 纯函数映射建议
// ==========================================

/// 为每个表头生成候选字段（置信度降序，同分按 Schema 字段顺序）
pub fn suggest(
    headers: &[String],
    schema: &TargetSchema,
    min_confidence: f64,
) -> Vec<MappingSuggestion> {
    headers
        .iter()
        .map(|header| {
            let mut candidates: Vec<MappingCandidate> = schema
                .fields
                .iter()
                .filter_map(|field| {
                    let confidence = score(header, field);
                    (confidence > 0.0 && confidence >= min_confidence).then(|| MappingCandidate {
                        field_id: field.id.clone(),
                        label: field.label.clone(),
                        confidence,
                    })
                })
                .collect();

            // 稳定排序：同分保持 Schema 字段顺序
            candidates.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));

            MappingSuggestion {
                header: header.clone(),
                candidates,
            }
        })
        .collect()
}

/// 将建议转为显式映射条目
///
/// 贪心分配：置信度高者优先占用字段，一个字段只分配给一列；
/// 未分配到字段的列映射为 Ignore。
pub fn accept_suggestions(
    suggestions: &[MappingSuggestion],
    schema: &TargetSchema,
) -> Vec<MappingEntry> {
    let mut pairs: Vec<(usize, &MappingCandidate)> = suggestions
        .iter()
        .enumerate()
        .flat_map(|(idx, s)| s.candidates.iter().map(move |c| (idx, c)))
        .collect();

    pairs.sort_by(|(ia, a), (ib, b)| {
        b.confidence
            .total_cmp(&a.confidence)
            .then(ia.cmp(ib))
            .then(
                schema
                    .field_position(&a.field_id)
                    .cmp(&schema.field_position(&b.field_id)),
            )
    });

    let mut assigned: BTreeMap<usize, &str> = BTreeMap::new();
    let mut taken: HashSet<&str> = HashSet::new();
    for (idx, candidate) in pairs {
        if assigned.contains_key(&idx) || taken.contains(candidate.field_id.as_str()) {
            continue;
        }
        assigned.insert(idx, candidate.field_id.as_str());
        taken.insert(candidate.field_id.as_str());
    }

    suggestions
        .iter()
        .enumerate()
        .map(|(idx, s)| match assigned.get(&idx) {
            Some(field_id) => MappingEntry::field(&s.header, field_id),
            None => MappingEntry::ignore(&s.header),
        })
        .collect()
}

// ==========================================
// apply - 应用显式映射
// ==========================================

/// 按顺序应用映射条目，返回新会话与非致命警告
///
/// 同一目标字段被多次映射时，后者生效，先前的列降级为 Ignore。
/// 阶段守卫由 session_flow 负责。
pub fn apply(
    mut session: ImportSession,
    schema: &TargetSchema,
    entries: &[MappingEntry],
) -> ImportResult<(ImportSession, Vec<String>)> {
    // 先整体校验，避免部分生效
    for entry in entries {
        if session.column_index(&entry.column).is_none() {
            return Err(MappingError::UnknownColumn(entry.column.clone()).into());
        }
        if let Some(field_id) = entry.target.field_id() {
            if schema.field(field_id).is_none() {
                return Err(MappingError::UnknownField(field_id.to_string()).into());
            }
        }
    }

    let mut warnings = Vec::new();
    for entry in entries {
        if let Some(field_id) = entry.target.field_id() {
            let previous: Vec<String> = session
                .mapping
                .iter()
                .filter(|(column, target)| {
                    *column != &entry.column && target.field_id() == Some(field_id)
                })
                .map(|(column, _)| column.clone())
                .collect();

            for column in previous {
                let message = format!(
                    "字段 {} 重新映射: 列 '{}' → '{}'，原列改为忽略",
                    field_id, column, entry.column
                );
                warn!(session_id = %session.session_id, "{}", message);
                session.mapping.insert(column, MappingTarget::Ignore);
                warnings.push(message);
            }
        }
        session
            .mapping
            .insert(entry.column.clone(), entry.target.clone());
    }

    for message in &warnings {
        session.log(LogLevel::Warning, message.clone());
    }
    let mapped = session
        .mapping
        .values()
        .filter(|t| t.field_id().is_some())
        .count();
    session.log(
        LogLevel::Info,
        format!("更新列映射 {} 项，当前已映射字段 {} 个", entries.len(), mapped),
    );
    debug!(session_id = %session.session_id, mapping = ?session.mapping, "映射已更新");

    Ok((session, warnings))
}

// ==========================================
// check_coverage - 必填字段覆盖检查
// ==========================================
pub fn check_coverage(mapping: &FieldMapping, schema: &TargetSchema) -> Result<(), MappingError> {
    let mut missing = Vec::new();
    for field in schema.required_fields() {
        let columns: Vec<String> = mapping
            .iter()
            .filter(|(_, target)| target.field_id() == Some(field.id.as_str()))
            .map(|(column, _)| column.clone())
            .collect();

        match columns.len() {
            0 => missing.push(field.id.clone()),
            1 => {}
            _ => {
                return Err(MappingError::AmbiguousMapping {
                    field: field.id.clone(),
                    columns,
                })
            }
        }
    }

    if missing.is_empty() {
        Ok(())
    } else {
        Err(MappingError::UnmappedRequired(missing))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::session::{ImportOptions, SourceFileMeta};

    fn headers(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    fn make_session(cols: &[&str]) -> ImportSession {
        let meta = SourceFileMeta {
            file_name: "t.csv".to_string(),
            extension: "csv".to_string(),
            byte_size: 0,
            encoding: None,
            delimiter: None,
            sheet_name: None,
        };
        ImportSession::new(
            "inventory",
            meta,
            headers(cols),
            vec![vec![String::new(); cols.len()]],
            ImportOptions::default(),
        )
    }

    #[test]
    fn test_suggest_exact_alias_first() {
        let schema = TargetSchema::inventory();
        let result = suggest(&headers(&["Qty", "Unit Price", "Item Code"]), &schema, 0.4);

        assert_eq!(result[0].best().unwrap().field_id, "quantity");
        assert_eq!(result[0].best().unwrap().confidence, 1.0);
        assert_eq!(result[1].best().unwrap().field_id, "unit_price");
        assert_eq!(result[2].best().unwrap().field_id, "sku");
    }

    #[test]
    fn test_suggest_is_deterministic() {
        let schema = TargetSchema::inventory();
        let hs = headers(&["Product Description", "Stock Qty", "Misc"]);
        assert_eq!(suggest(&hs, &schema, 0.4), suggest(&hs, &schema, 0.4));
    }

    #[test]
    fn test_suggest_unmatched_header_has_no_candidates() {
        let schema = TargetSchema::inventory();
        let result = suggest(&headers(&["zzz"]), &schema, 0.4);
        assert!(result[0].candidates.is_empty());
    }

    #[test]
    fn test_accept_assigns_each_field_once() {
        let schema = TargetSchema::inventory();
        let suggestions = suggest(&headers(&["Price", "Unit Price"]), &schema, 0.4);
        let entries = accept_suggestions(&suggestions, &schema);

        let mapped: Vec<_> = entries
            .iter()
            .filter(|e| e.target.field_id() == Some("unit_price"))
            .collect();
        assert_eq!(mapped.len(), 1);
        // 同分时先出现的列优先
        assert_eq!(mapped[0].column, "Price");
    }

    #[test]
    fn test_apply_last_mapping_wins_with_warning() {
        let schema = TargetSchema::inventory();
        let session = make_session(&["A", "B"]);
        let (session, warnings) = apply(
            session,
            &schema,
            &[MappingEntry::field("A", "sku"), MappingEntry::field("B", "sku")],
        )
        .unwrap();

        assert_eq!(warnings.len(), 1);
        assert_eq!(session.mapping.get("A"), Some(&MappingTarget::Ignore));
        assert_eq!(session.column_for_field("sku"), Some("B"));
    }

    #[test]
    fn test_apply_rejects_unknown_column() {
        let schema = TargetSchema::inventory();
        let session = make_session(&["A"]);
        let result = apply(session, &schema, &[MappingEntry::field("Nope", "sku")]);
        assert!(result.is_err());
    }

    #[test]
    fn test_check_coverage_lists_missing_required() {
        let schema = TargetSchema::inventory();
        let mut mapping = FieldMapping::new();
        mapping.insert("A".to_string(), MappingTarget::Field("sku".to_string()));

        match check_coverage(&mapping, &schema) {
            Err(MappingError::UnmappedRequired(missing)) => {
                assert_eq!(missing, vec!["name".to_string(), "quantity".to_string()]);
            }
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn test_check_coverage_ambiguous() {
        let schema = TargetSchema::inventory();
        let mut mapping = FieldMapping::new();
        for (col, field) in [("A", "sku"), ("B", "sku"), ("C", "name"), ("D", "quantity")] {
            mapping.insert(col.to_string(), MappingTarget::Field(field.to_string()));
        }
        assert!(matches!(
            check_coverage(&mapping, &schema),
            Err(MappingError::AmbiguousMapping { field, .. }) if field == "sku"
        ));
    }
}
