//! The three-field keyword record pushed downstream.

use serde::{Deserialize, Serialize};

/// One reconciled row: a free-text keyword and its optional classification.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Record {
    pub keyword: String,
    pub line: String,
    pub item: String,
}

impl Record {
    pub fn new(
        keyword: impl Into<String>,
        line: impl Into<String>,
        item: impl Into<String>,
    ) -> Self {
        Self {
            keyword: keyword.into(),
            line: line.into(),
            item: item.into(),
        }
    }

    /// True when all three fields are empty.
    pub fn is_blank(&self) -> bool {
        self.keyword.is_empty() && self.line.is_empty() && self.item.is_empty()
    }

    /// True when all three fields are non-empty.
    pub fn is_complete(&self) -> bool {
        !self.keyword.is_empty() && !self.line.is_empty() && !self.item.is_empty()
    }

    /// An item is only meaningful under its parent line.
    pub fn item_has_line(&self) -> bool {
        self.item.is_empty() || !self.line.is_empty()
    }
}
