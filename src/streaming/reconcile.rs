//! Column reconciliation onto the canonical `keyword, line, item` schema.
//!
//! Headers are matched case- and whitespace-insensitively against a fixed
//! alias list per canonical column. The first header matching an alias wins.
//! Canonical columns with no match are synthesized as empty strings.

use std::collections::HashMap;

use crate::record::Record;
use crate::streaming::workbook::Table;

/// The three columns every reconciled dataset carries, in output order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CanonicalColumn {
    Keyword,
    Line,
    Item,
}

impl CanonicalColumn {
    pub const ALL: [CanonicalColumn; 3] = [
        CanonicalColumn::Keyword,
        CanonicalColumn::Line,
        CanonicalColumn::Item,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            CanonicalColumn::Keyword => "keyword",
            CanonicalColumn::Line => "line",
            CanonicalColumn::Item => "item",
        }
    }

    /// Accepted spellings, in priority order. Spaced spellings are covered
    /// by normalization.
    fn aliases(self) -> &'static [&'static str] {
        match self {
            CanonicalColumn::Keyword => &[
                "keyword", "key_word", "key-word", "keyw", "keywrd", "keyword(s)",
            ],
            CanonicalColumn::Line => &["u_line", "uline", "line", "u-line"],
            CanonicalColumn::Item => &["item", "items"],
        }
    }
}

/// Lower-cases a header and strips all whitespace.
pub fn normalize_header(header: &str) -> String {
    header
        .chars()
        .filter(|c| !c.is_whitespace())
        .flat_map(char::to_lowercase)
        .collect()
}

/// Cell values treated as blank after trimming.
const NULL_TOKENS: &[&str] = &["nan", "NaN", "None", "null"];

/// Trims a cell and maps null-like tokens to the empty string.
pub fn clean_cell(value: &str) -> String {
    let trimmed = value.trim();
    if NULL_TOKENS.contains(&trimmed) {
        String::new()
    } else {
        trimmed.to_string()
    }
}

/// Maps canonical columns to the index of the header that matched them.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ColumnMap {
    indices: HashMap<CanonicalColumn, usize>,
}

impl ColumnMap {
    pub fn get(&self, column: CanonicalColumn) -> Option<usize> {
        self.indices.get(&column).copied()
    }

    pub fn contains(&self, column: CanonicalColumn) -> bool {
        self.indices.contains_key(&column)
    }

    /// Canonical columns with no matching header.
    pub fn missing(&self) -> Vec<CanonicalColumn> {
        CanonicalColumn::ALL
            .into_iter()
            .filter(|c| !self.contains(*c))
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.indices.is_empty()
    }
}

/// Builds the header mapping. Never fails; unmatched columns are simply absent.
///
/// For each canonical column the aliases are tried in order, and for each
/// alias the first header that normalizes to it wins.
pub fn build_column_map<S: AsRef<str>>(headers: &[S]) -> ColumnMap {
    let normalized: Vec<String> = headers.iter().map(|h| normalize_header(h.as_ref())).collect();
    let mut indices = HashMap::new();

    for column in CanonicalColumn::ALL {
        let found = column
            .aliases()
            .iter()
            .map(|alias| normalize_header(alias))
            .find_map(|alias| normalized.iter().position(|h| *h == alias));
        if let Some(idx) = found {
            indices.insert(column, idx);
        }
    }

    ColumnMap { indices }
}

/// Projects every row of `table` onto the canonical schema, cleaning cells.
pub fn reconcile(table: &Table) -> (Vec<Record>, ColumnMap) {
    let map = build_column_map(&table.headers);

    let pick = |row: &[String], column: CanonicalColumn| -> String {
        map.get(column)
            .and_then(|idx| row.get(idx))
            .map(|v| clean_cell(v))
            .unwrap_or_default()
    };

    let records = table
        .rows
        .iter()
        .map(|row| Record {
            keyword: pick(row, CanonicalColumn::Keyword),
            line: pick(row, CanonicalColumn::Line),
            item: pick(row, CanonicalColumn::Item),
        })
        .collect();

    (records, map)
}

/// Builds a three-column table named `sheet_name` from records.
pub fn records_to_table(records: &[Record], sheet_name: &str) -> Table {
    let headers = CanonicalColumn::ALL
        .iter()
        .map(|c| c.as_str().to_string())
        .collect();
    let mut table = Table::new(sheet_name, headers);
    for r in records {
        table.push_row(vec![r.keyword.clone(), r.line.clone(), r.item.clone()]);
    }
    table
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn every_alias_normalizes_to_a_distinct_key() {
        let mut seen = HashSet::new();
        for column in CanonicalColumn::ALL {
            for alias in column.aliases() {
                assert!(
                    seen.insert(normalize_header(alias)),
                    "alias {:?} of {} repeats an earlier spelling",
                    alias,
                    column.as_str()
                );
            }
        }
    }

    #[test]
    fn normalize_strips_case_and_whitespace() {
        assert_eq!(normalize_header(" Key Word "), "keyword");
        assert_eq!(normalize_header("U\tLine"), "uline");
        assert_eq!(normalize_header("ITEMS"), "items");
    }

    #[test]
    fn alias_spellings_resolve() {
        for header in ["Key Word", "key_word", "KEYW", "Keyword(s)", "keywor d", "key-word"] {
            let map = build_column_map(&[header]);
            assert_eq!(map.get(CanonicalColumn::Keyword), Some(0), "header {}", header);
        }
        for header in ["u_line", "U Line", "uline", "u-line", "LINE"] {
            let map = build_column_map(&[header]);
            assert_eq!(map.get(CanonicalColumn::Line), Some(0), "header {}", header);
        }
        let map = build_column_map(&["Items"]);
        assert_eq!(map.get(CanonicalColumn::Item), Some(0));
    }

    #[test]
    fn any_permutation_maps_to_canonical() {
        let permutations: [[&str; 3]; 6] = [
            ["Key Word", "U Line", "Item"],
            ["Key Word", "Item", "U Line"],
            ["U Line", "Key Word", "Item"],
            ["U Line", "Item", "Key Word"],
            ["Item", "Key Word", "U Line"],
            ["Item", "U Line", "Key Word"],
        ];

        for headers in permutations {
            let mut table = Table::new("S", headers.iter().map(|h| h.to_string()).collect());
            let mut row = vec![String::new(); 3];
            for (i, h) in headers.iter().enumerate() {
                row[i] = match *h {
                    "Key Word" => "kw".into(),
                    "U Line" => "ln".into(),
                    _ => "it".into(),
                };
            }
            table.push_row(row);

            let (records, map) = reconcile(&table);
            assert!(map.missing().is_empty());
            assert_eq!(records, vec![Record::new("kw", "ln", "it")]);
        }
    }

    #[test]
    fn first_matching_alias_wins() {
        // "u_line" precedes "line" in the alias order
        let map = build_column_map(&["Line", "U_Line"]);
        assert_eq!(map.get(CanonicalColumn::Line), Some(1));

        // Same alias twice: first header wins
        let map = build_column_map(&["Item", "item"]);
        assert_eq!(map.get(CanonicalColumn::Item), Some(0));
    }

    #[test]
    fn unrecognized_headers_synthesize_empty_columns() {
        let mut table = Table::new("S", vec!["foo".into(), "bar".into()]);
        table.push_row(vec!["1".into(), "2".into()]);

        let (records, map) = reconcile(&table);

        assert!(map.is_empty());
        assert_eq!(map.missing().len(), 3);
        assert_eq!(records, vec![Record::default()]);
    }

    #[test]
    fn cells_are_trimmed_and_null_tokens_blanked() {
        assert_eq!(clean_cell("  shoes "), "shoes");
        assert_eq!(clean_cell("nan"), "");
        assert_eq!(clean_cell(" NaN "), "");
        assert_eq!(clean_cell("None"), "");
        assert_eq!(clean_cell("null"), "");
        assert_eq!(clean_cell("nancy"), "nancy");
    }

    #[test]
    fn records_to_table_has_canonical_headers() {
        let table = records_to_table(&[Record::new("a", "b", "")], "Merged");
        assert_eq!(table.headers, vec!["keyword", "line", "item"]);
        assert_eq!(table.sheet_name, "Merged");
        assert_eq!(table.rows[0], vec!["a", "b", ""]);
    }
}
