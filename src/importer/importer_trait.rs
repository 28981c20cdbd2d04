// ==========================================
// 库存表格批量导入系统 - 导入层 Trait
// ==========================================
// 职责: 定义文件解析接口（不包含实现）
// 实现者: CsvParser / ExcelParser
// ==========================================

use crate::importer::error::ParseError;

// ==========================================
// ParsedTable - 解析产出
// ==========================================
// 红线: 单元格保持字符串，不做语义解释
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedTable {
    pub headers: Vec<String>,
    pub rows: Vec<Vec<String>>,
    pub encoding: Option<String>,
    pub delimiter: Option<char>,
    pub sheet_name: Option<String>,
}

// ==========================================
// FileParser Trait
// ==========================================
pub trait FileParser: Send + Sync {
    /// 将上传的字节解析为 表头 + 有序行
    ///
    /// # 返回
    /// - Ok(ParsedTable): 行宽已对齐表头，全空行已跳过
    /// - Err(ParseError): 文件损坏/无表头/编码无法识别
    fn parse_bytes(&self, bytes: &[u8]) -> Result<ParsedTable, ParseError>;
}
