use reglens_core::HistoryParams;
use reglens_error::{RegError, Result};

/// 查询文本长度上限（按字符计）
pub const MAX_QUERY_CHARS: usize = 5000;
pub const MAX_PAGE_SIZE: u32 = 100;

/// 查询文本校验。空白与超长都在网关就地拒绝，不打后端。
pub fn query_text(text: &str) -> Result<()> {
    if text.trim().is_empty() {
        return Err(RegError::Validation {
            field: "text".into(),
            reason: "查询内容不能为空".into(),
        });
    }
    if text.chars().count() > MAX_QUERY_CHARS {
        return Err(RegError::Validation {
            field: "text".into(),
            reason: format!("查询内容超过 {MAX_QUERY_CHARS} 字符上限"),
        });
    }
    Ok(())
}

pub fn history_params(params: &HistoryParams) -> Result<()> {
    if let Some(page) = params.page {
        if page < 1 {
            return Err(RegError::Validation {
                field: "page".into(),
                reason: "页码从 1 开始".into(),
            });
        }
    }
    if let Some(page_size) = params.page_size {
        if page_size < 1 || page_size > MAX_PAGE_SIZE {
            return Err(RegError::Validation {
                field: "pageSize".into(),
                reason: format!("每页条数须在 1..={MAX_PAGE_SIZE} 之间"),
            });
        }
    }
    Ok(())
}

/// 上传准入策略：后缀白名单 + 体积上限，二者都在转发前判定
#[derive(Debug, Clone)]
pub struct UploadPolicy {
    pub max_bytes: u64,
    pub allowed_extensions: Vec<String>,
}

impl UploadPolicy {
    pub fn check(&self, file_name: &str, size: u64) -> Result<()> {
        let ext = file_name
            .rsplit_once('.')
            .map(|(_, ext)| ext.to_ascii_lowercase())
            .unwrap_or_default();
        if !self.allowed_extensions.iter().any(|a| a == &ext) {
            return Err(RegError::Validation {
                field: "file".into(),
                reason: format!(
                    "不支持的文件类型 .{ext}，允许: {}",
                    self.allowed_extensions.join(", ")
                ),
            });
        }
        if size > self.max_bytes {
            return Err(RegError::PayloadTooLarge {
                limit_bytes: self.max_bytes,
            });
        }
        Ok(())
    }
}
