// ==========================================
// 库存表格批量导入系统 - 目标 Schema 注册表
// ==========================================
// 职责: 声明导入必须填充的目标字段（id/标签/必填/类型）
// 红线: SchemaField 由外部提供，导入流程只读
// ==========================================

use crate::domain::types::FieldType;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// 内置库存 Schema 名称
pub const INVENTORY_SCHEMA: &str = "inventory";

// ==========================================
// SchemaField - 目标字段
// ==========================================
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SchemaField {
    pub id: String,                // 字段 ID（稳定键）
    pub label: String,             // 显示名
    #[serde(default)]
    pub required: bool,            // 是否必填
    #[serde(rename = "type")]
    pub field_type: FieldType,     // 基础类型
    #[serde(default)]
    pub precision: Option<u32>,    // 小数精度覆盖（仅 Decimal）
    #[serde(default)]
    pub aliases: Vec<String>,      // 列名别名（映射建议使用）
}

impl SchemaField {
    pub fn new(id: &str, label: &str, field_type: FieldType, required: bool) -> Self {
        Self {
            id: id.to_string(),
            label: label.to_string(),
            required,
            field_type,
            precision: None,
            aliases: Vec::new(),
        }
    }

    pub fn with_aliases(mut self, aliases: &[&str]) -> Self {
        self.aliases = aliases.iter().map(|a| a.to_string()).collect();
        self
    }

    pub fn with_precision(mut self, precision: u32) -> Self {
        self.precision = Some(precision);
        self
    }
}

// ==========================================
// TargetSchema - 目标数据集声明
// ==========================================
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TargetSchema {
    pub name: String,
    pub fields: Vec<SchemaField>,
    /// 自然键（重复检测使用）；为空则不做重复检测
    #[serde(default)]
    pub natural_key: Vec<String>,
}

impl TargetSchema {
    pub fn field(&self, id: &str) -> Option<&SchemaField> {
        self.fields.iter().find(|f| f.id == id)
    }

    /// 字段在 Schema 中的顺序（错误排序使用）
    pub fn field_position(&self, id: &str) -> usize {
        self.fields
            .iter()
            .position(|f| f.id == id)
            .unwrap_or(usize::MAX)
    }

    pub fn required_fields(&self) -> impl Iterator<Item = &SchemaField> {
        self.fields.iter().filter(|f| f.required)
    }

    pub fn is_key_field(&self, id: &str) -> bool {
        self.natural_key.iter().any(|k| k == id)
    }

    /// 校验 Schema 自身一致性（字段 ID 唯一、自然键字段存在）
    pub fn check(&self) -> Result<(), String> {
        let mut seen = std::collections::HashSet::new();
        for field in &self.fields {
            if field.id.trim().is_empty() {
                return Err(format!("Schema {} 存在空字段 ID", self.name));
            }
            if !seen.insert(field.id.as_str()) {
                return Err(format!("Schema {} 字段 ID 重复: {}", self.name, field.id));
            }
        }
        for key in &self.natural_key {
            if self.field(key).is_none() {
                return Err(format!("Schema {} 自然键字段不存在: {}", self.name, key));
            }
        }
        Ok(())
    }

    /// 内置库存 Schema
    ///
    /// 自然键取 `sku`：同一文件内 SKU 重复视为重复行。
    pub fn inventory() -> Self {
        Self {
            name: INVENTORY_SCHEMA.to_string(),
            fields: vec![
                SchemaField::new("sku", "SKU", FieldType::Text, true)
                    .with_aliases(&["item code", "item no", "product code", "物料编码", "货号"]),
                SchemaField::new("name", "Product Name", FieldType::Text, true)
                    .with_aliases(&["description", "item name", "title", "品名", "名称"]),
                SchemaField::new("quantity", "Quantity", FieldType::Integer, true)
                    .with_aliases(&["qty", "stock", "on hand", "数量", "库存"]),
                SchemaField::new("unit_price", "Unit Price", FieldType::Decimal, false)
                    .with_aliases(&["price", "cost", "单价", "价格"]),
                SchemaField::new("category", "Category", FieldType::Text, false)
                    .with_aliases(&["group", "type", "类别", "分类"]),
                SchemaField::new("location", "Location", FieldType::Text, false)
                    .with_aliases(&["warehouse", "bin", "库位", "仓库"]),
                SchemaField::new("received_date", "Received Date", FieldType::Date, false)
                    .with_aliases(&["date", "received", "入库日期"]),
                SchemaField::new("active", "Active", FieldType::Boolean, false)
                    .with_aliases(&["enabled", "status", "启用"]),
            ],
            natural_key: vec!["sku".to_string()],
        }
    }
}

// ==========================================
// SchemaRegistry - Schema 注册表
// ==========================================
#[derive(Debug, Clone, Default)]
pub struct SchemaRegistry {
    schemas: BTreeMap<String, TargetSchema>,
}

impl SchemaRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// 含内置库存 Schema 的注册表
    pub fn with_builtin() -> Self {
        let mut registry = Self::new();
        registry
            .schemas
            .insert(INVENTORY_SCHEMA.to_string(), TargetSchema::inventory());
        registry
    }

    /// 从 JSON 加载（单个 Schema 或 Schema 数组）
    pub fn from_json_str(json: &str) -> Result<Self, String> {
        let value: serde_json::Value =
            serde_json::from_str(json).map_err(|e| format!("Schema JSON 解析失败: {}", e))?;

        let schemas: Vec<TargetSchema> = if value.is_array() {
            serde_json::from_value(value).map_err(|e| format!("Schema 格式错误: {}", e))?
        } else {
            vec![serde_json::from_value(value).map_err(|e| format!("Schema 格式错误: {}", e))?]
        };

        let mut registry = Self::new();
        for schema in schemas {
            registry.register(schema)?;
        }
        Ok(registry)
    }

    pub fn register(&mut self, schema: TargetSchema) -> Result<(), String> {
        schema.check()?;
        self.schemas.insert(schema.name.clone(), schema);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&TargetSchema> {
        self.schemas.get(name)
    }

    pub fn names(&self) -> Vec<&str> {
        self.schemas.keys().map(|k| k.as_str()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_inventory_schema_is_consistent() {
        let schema = TargetSchema::inventory();
        assert!(schema.check().is_ok());
        assert_eq!(schema.natural_key, vec!["sku".to_string()]);
        let required: Vec<_> = schema.required_fields().map(|f| f.id.as_str()).collect();
        assert_eq!(required, vec!["sku", "name", "quantity"]);
    }

    #[test]
    fn test_registry_from_json() {
        let json = r#"{
            "name": "parts",
            "fields": [
                {"id": "part_no", "label": "Part No", "required": true, "type": "text"},
                {"id": "weight", "label": "Weight", "type": "decimal", "precision": 3}
            ],
            "natural_key": ["part_no"]
        }"#;

        let registry = SchemaRegistry::from_json_str(json).unwrap();
        let schema = registry.get("parts").unwrap();
        assert_eq!(schema.fields.len(), 2);
        assert_eq!(schema.field("weight").unwrap().precision, Some(3));
        assert!(!schema.field("weight").unwrap().required);
    }

    #[test]
    fn test_registry_rejects_unknown_natural_key() {
        let json = r#"{"name": "x", "fields": [], "natural_key": ["missing"]}"#;
        assert!(SchemaRegistry::from_json_str(json).is_err());
    }
}
