//! Geographic partitions (static reference data)

use serde::{Deserialize, Serialize};

/// A geographic unit the upstream site scopes search results by.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Partition {
    pub id: i64,
    pub sido: String,
    pub sigungu: Option<String>,
    pub dong: String,
    /// Locale parameter passed to the marketplace as `in=`.
    pub param: String,
    pub dong_id: Option<i64>,
}

impl Partition {
    /// 표시용 이름 (시도 시군구 동)
    #[must_use]
    pub fn display_name(&self) -> String {
        match &self.sigungu {
            Some(sigungu) if !sigungu.is_empty() => {
                format!("{} {} {}", self.sido, sigungu, self.dong)
            }
            _ => format!("{} {}", self.sido, self.dong),
        }
    }
}

/// Partition row as imported from a reference file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewPartition {
    pub sido: String,
    #[serde(default)]
    pub sigungu: Option<String>,
    pub dong: String,
    pub param: String,
    #[serde(default)]
    pub dong_id: Option<i64>,
}
