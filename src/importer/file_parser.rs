// ==========================================
// 库存表格批量导入系统 - 文件解析器实现
// ==========================================
// 阶段 0: 上传字节 → 表头 + 原始字符串行
// 支持: Excel (.xlsx/.xlsm/.xls) / 分隔文本 (.csv/.tsv/.txt)
// ==========================================

use crate::importer::error::ParseError;
use crate::importer::importer_trait::{FileParser, ParsedTable};
use calamine::{Reader, Xls, Xlsx};
use csv::ReaderBuilder;
use std::collections::HashMap;
use std::io::Cursor;
use tracing::{debug, info};

/// 分隔符候选（按优先级）
const DELIMITER_CANDIDATES: [char; 4] = [',', ';', '\t', '|'];

// ==========================================
// 编码探测与解码
// ==========================================

/// 探测字节编码（chardet），统一编码名称
pub fn detect_encoding(bytes: &[u8]) -> String {
    if std::str::from_utf8(bytes).is_ok() {
        return "utf-8".to_string();
    }

    let (charset, _confidence, _language) = chardet::detect(bytes);
    match charset.to_lowercase().as_str() {
        "ascii" | "utf-8" | "utf8" => "utf-8".to_string(),
        "iso-8859-1" | "iso-8859-15" | "latin-1" | "latin1" => "iso-8859-1".to_string(),
        "windows-1252" | "cp1252" => "windows-1252".to_string(),
        "gb2312" | "gbk" | "gb18030" => "gb18030".to_string(),
        other => other.to_string(),
    }
}

/// 按编码解码为字符串（去除 UTF-8 BOM）
pub fn decode_content(bytes: &[u8], encoding: &str) -> Result<String, ParseError> {
    let text = match encoding {
        "utf-8" => String::from_utf8(bytes.to_vec())
            .map_err(|e| ParseError::Encoding(e.to_string()))?,
        other => {
            let enc = encoding_rs::Encoding::for_label(other.as_bytes())
                .unwrap_or(encoding_rs::WINDOWS_1252);
            let (decoded, _, had_errors) = enc.decode(bytes);
            if had_errors {
                return Err(ParseError::Encoding(format!("{} 解码存在非法字节", other)));
            }
            decoded.into_owned()
        }
    };

    Ok(text.trim_start_matches('\u{feff}').to_string())
}

/// 以首行分隔符出现次数探测分隔符
pub fn detect_delimiter(content: &str) -> char {
    let first_line = content.lines().next().unwrap_or("");

    let mut best = ',';
    let mut best_count = 0;
    for sep in DELIMITER_CANDIDATES {
        let count = first_line.matches(sep).count();
        if count > best_count {
            best_count = count;
            best = sep;
        }
    }
    best
}

// ==========================================
// 公共: 表头/行规整
// ==========================================

/// 表头去空白、补空名、重名追加序号
fn normalize_headers(raw: Vec<String>) -> Result<Vec<String>, ParseError> {
    if raw.iter().all(|h| h.trim().is_empty()) {
        return Err(ParseError::NoHeaders);
    }

    let mut seen: HashMap<String, usize> = HashMap::new();
    let headers = raw
        .into_iter()
        .enumerate()
        .map(|(idx, h)| {
            let base = match h.trim() {
                "" => format!("Column {}", idx + 1),
                trimmed => trimmed.to_string(),
            };
            let count = seen.entry(base.clone()).or_insert(0);
            *count += 1;
            if *count > 1 {
                format!("{} ({})", base, count)
            } else {
                base
            }
        })
        .collect();

    Ok(headers)
}

/// 行宽对齐表头；全空行返回 None
fn normalize_row(cells: Vec<String>, width: usize) -> Option<Vec<String>> {
    let mut row: Vec<String> = cells.into_iter().map(|c| c.trim().to_string()).collect();
    row.resize(width, String::new());

    if row.iter().all(|v| v.is_empty()) {
        None
    } else {
        Some(row)
    }
}

// ==========================================
// CSV Parser 实现
// ==========================================
#[derive(Debug, Clone, Default)]
pub struct CsvParser {
    /// 指定分隔符（None 表示自动探测）
    pub delimiter: Option<char>,
}

impl CsvParser {
    pub fn with_delimiter(delimiter: char) -> Self {
        Self {
            delimiter: Some(delimiter),
        }
    }
}

impl FileParser for CsvParser {
    fn parse_bytes(&self, bytes: &[u8]) -> Result<ParsedTable, ParseError> {
        if bytes.is_empty() {
            return Err(ParseError::EmptyFile);
        }

        let encoding = detect_encoding(bytes);
        let content = decode_content(bytes, &encoding)?;
        if content.trim().is_empty() {
            return Err(ParseError::EmptyFile);
        }

        let delimiter = self.delimiter.unwrap_or_else(|| detect_delimiter(&content));
        debug!(encoding = %encoding, delimiter = ?delimiter, "CSV 编码/分隔符");

        let mut reader = ReaderBuilder::new()
            .has_headers(true)
            .flexible(true) // 允许行长度不一致
            .delimiter(delimiter as u8)
            .from_reader(content.as_bytes());

        // 读取表头
        let headers = normalize_headers(reader.headers()?.iter().map(|h| h.to_string()).collect())?;

        // 读取所有行
        let mut rows = Vec::new();
        for result in reader.records() {
            let record = result?;
            // 跳过完全空白的行
            if let Some(row) =
                normalize_row(record.iter().map(|v| v.to_string()).collect(), headers.len())
            {
                rows.push(row);
            }
        }

        Ok(ParsedTable {
            headers,
            rows,
            encoding: Some(encoding),
            delimiter: Some(delimiter),
            sheet_name: None,
        })
    }
}

// ==========================================
// Excel Parser 实现
// ==========================================
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExcelFormat {
    Xlsx,
    Xls,
}

#[derive(Debug, Clone)]
pub struct ExcelParser {
    pub format: ExcelFormat,
}

impl ExcelParser {
    pub fn new(format: ExcelFormat) -> Self {
        Self { format }
    }

    /// 读取第一个工作表
    fn read_first_sheet<R>(mut workbook: R) -> Result<ParsedTable, ParseError>
    where
        R: Reader<Cursor<Vec<u8>>>,
        R::Error: std::fmt::Display,
    {
        let sheet_names = workbook.sheet_names();
        let sheet_name = sheet_names
            .first()
            .cloned()
            .ok_or_else(|| ParseError::Corrupt("Excel 文件无工作表".to_string()))?;

        let range = workbook
            .worksheet_range(&sheet_name)
            .map_err(|e| ParseError::Corrupt(e.to_string()))?;

        // 提取表头（第一行）
        let mut rows_iter = range.rows();
        let header_row = rows_iter.next().ok_or(ParseError::NoHeaders)?;
        let headers = normalize_headers(header_row.iter().map(|c| c.to_string()).collect())?;

        // 读取数据行
        let rows = rows_iter
            .filter_map(|data_row| {
                normalize_row(data_row.iter().map(|c| c.to_string()).collect(), headers.len())
            })
            .collect();

        Ok(ParsedTable {
            headers,
            rows,
            encoding: None,
            delimiter: None,
            sheet_name: Some(sheet_name),
        })
    }
}

impl FileParser for ExcelParser {
    fn parse_bytes(&self, bytes: &[u8]) -> Result<ParsedTable, ParseError> {
        if bytes.is_empty() {
            return Err(ParseError::EmptyFile);
        }

        let cursor = Cursor::new(bytes.to_vec());
        match self.format {
            ExcelFormat::Xlsx => {
                let workbook: Xlsx<_> =
                    Xlsx::new(cursor).map_err(|e| ParseError::Corrupt(e.to_string()))?;
                Self::read_first_sheet(workbook)
            }
            ExcelFormat::Xls => {
                let workbook: Xls<_> =
                    Xls::new(cursor).map_err(|e| ParseError::Corrupt(e.to_string()))?;
                Self::read_first_sheet(workbook)
            }
        }
    }
}

// ==========================================
// 通用文件解析器（根据扩展名自动选择）
// ==========================================
pub struct UniversalFileParser;

impl UniversalFileParser {
    /// 从文件名取小写扩展名
    pub fn extension_of(file_name: &str) -> String {
        std::path::Path::new(file_name)
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or("")
            .to_lowercase()
    }

    pub fn parser_for(extension: &str) -> Result<Box<dyn FileParser>, ParseError> {
        match extension.to_lowercase().as_str() {
            "csv" | "txt" => Ok(Box::new(CsvParser::default())),
            "tsv" => Ok(Box::new(CsvParser::with_delimiter('\t'))),
            "xlsx" | "xlsm" => Ok(Box::new(ExcelParser::new(ExcelFormat::Xlsx))),
            "xls" => Ok(Box::new(ExcelParser::new(ExcelFormat::Xls))),
            other => Err(ParseError::UnsupportedFormat(other.to_string())),
        }
    }

    /// parse(bytes, extension) -> 表头 + 行
    pub fn parse(&self, bytes: &[u8], extension: &str) -> Result<ParsedTable, ParseError> {
        let parser = Self::parser_for(extension)?;
        let table = parser.parse_bytes(bytes)?;

        info!(
            extension = %extension,
            columns = table.headers.len(),
            rows = table.rows.len(),
            "文件解析完成"
        );
        Ok(table)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_csv_parser_valid_file() {
        let csv = "SKU,Qty,Price\nA-1,3,9.50\nA-2,4,1.25\n";
        let table = CsvParser::default().parse_bytes(csv.as_bytes()).unwrap();

        assert_eq!(table.headers, vec!["SKU", "Qty", "Price"]);
        assert_eq!(table.rows.len(), 2);
        assert_eq!(table.rows[0], vec!["A-1", "3", "9.50"]);
        assert_eq!(table.delimiter, Some(','));
    }

    #[test]
    fn test_csv_parser_skip_empty_rows() {
        let csv = "SKU,Qty\nA-1,3\n,\nA-2,4\n";
        let table = CsvParser::default().parse_bytes(csv.as_bytes()).unwrap();

        // 应跳过空行
        assert_eq!(table.rows.len(), 2);
    }

    #[test]
    fn test_csv_parser_pads_short_rows() {
        let csv = "SKU,Qty,Price\nA-1,3\n";
        let table = CsvParser::default().parse_bytes(csv.as_bytes()).unwrap();
        assert_eq!(table.rows[0], vec!["A-1", "3", ""]);
    }

    #[test]
    fn test_csv_semicolon_autodetect() {
        let csv = "SKU;Name;Qty\nA-1;Bolt;3\n";
        let table = CsvParser::default().parse_bytes(csv.as_bytes()).unwrap();
        assert_eq!(table.delimiter, Some(';'));
        assert_eq!(table.rows[0][1], "Bolt");
    }

    #[test]
    fn test_csv_latin1_decoding() {
        // "Café" in ISO-8859-1
        let mut bytes = b"SKU,Name\nA-1,Caf".to_vec();
        bytes.push(0xE9);
        bytes.push(b'\n');

        let table = CsvParser::default().parse_bytes(&bytes).unwrap();
        assert_ne!(table.encoding.as_deref(), Some("utf-8"));
        assert!(table.rows[0][1].starts_with("Caf"));
        assert_eq!(table.rows[0][1].chars().count(), 4);
    }

    #[test]
    fn test_duplicate_headers_are_suffixed() {
        let csv = "Qty,Qty,\n1,2,3\n";
        let table = CsvParser::default().parse_bytes(csv.as_bytes()).unwrap();
        assert_eq!(table.headers, vec!["Qty", "Qty (2)", "Column 3"]);
    }

    #[test]
    fn test_unsupported_extension() {
        let result = UniversalFileParser.parse(b"whatever", "pdf");
        assert!(matches!(result, Err(ParseError::UnsupportedFormat(ext)) if ext == "pdf"));
    }

    #[test]
    fn test_empty_bytes() {
        let result = UniversalFileParser.parse(b"", "csv");
        assert!(matches!(result, Err(ParseError::EmptyFile)));
    }

    #[test]
    fn test_corrupt_xlsx() {
        let result = UniversalFileParser.parse(b"not a zip archive", "xlsx");
        assert!(matches!(result, Err(ParseError::Corrupt(_))));
    }

    #[test]
    fn test_extension_of() {
        assert_eq!(UniversalFileParser::extension_of("Stock.XLSX"), "xlsx");
        assert_eq!(UniversalFileParser::extension_of("noext"), "");
    }
}
