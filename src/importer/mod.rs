// ==========================================
// 库存表格批量导入系统 - 导入层
// ==========================================
// 流程: 解析 → 映射 → 校验 → 修正/转换 → 提交 → (回滚)
// 支持: CSV / TSV / TXT, Excel (xlsx/xlsm/xls)
// ==========================================

// 模块声明
pub mod commit_executor;
pub mod correction;
pub mod error;
pub mod file_parser;
pub mod importer_trait;
pub mod mapping_resolver;
pub mod session_flow;
pub mod transformer;
pub mod validator;

// 重导出核心类型
pub use commit_executor::{CancelFlag, CommitExecutor};
pub use error::{ImportError, ImportResult, MappingError, ParseError, SessionError};
pub use file_parser::{CsvParser, ExcelParser, UniversalFileParser};
pub use mapping_resolver::{MappingCandidate, MappingEntry, MappingSuggestion};
pub use validator::ValidationPolicy;

// 重导出 Trait 接口
pub use importer_trait::{FileParser, ParsedTable};
