// Copyright 2026 Google LLC
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//      http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! SQL text for keyset-paginated reads.

use crate::domain::errors::{ExportError, Result};

/// Quotes an identifier. Unquoted Oracle names are stored upper case, so the
/// name is upper-cased before quoting.
pub fn quote_ident(name: &str) -> Result<String> {
    let name = name.trim();
    if name.is_empty() || name.contains('"') || name.contains('\0') {
        return Err(ExportError::ConfigError(format!(
            "invalid identifier: {:?}",
            name
        )));
    }
    Ok(format!("\"{}\"", name.to_uppercase()))
}

/// `"SCHEMA"."TABLE"`.
pub fn qualified_table(schema: &str, table: &str) -> Result<String> {
    Ok(format!("{}.{}", quote_ident(schema)?, quote_ident(table)?))
}

/// `*`, or the quoted column list.
pub fn select_list(columns: Option<&[String]>) -> Result<String> {
    match columns {
        None => Ok("*".to_string()),
        Some(cols) => Ok(cols
            .iter()
            .map(|c| quote_ident(c))
            .collect::<Result<Vec<_>>>()?
            .join(", ")),
    }
}

/// The first page. Binds `:1` = page size.
pub fn first_page_sql(table: &str, columns: &str, id_column: &str) -> String {
    format!(
        "SELECT {} FROM {} ORDER BY {} FETCH FIRST :1 ROWS ONLY",
        columns, table, id_column
    )
}

/// Every later page. Binds `:1` = last id seen, `:2` = page size.
pub fn next_page_sql(table: &str, columns: &str, id_column: &str) -> String {
    format!(
        "SELECT {} FROM {} WHERE {} > :1 ORDER BY {} FETCH FIRST :2 ROWS ONLY",
        columns, table, id_column, id_column
    )
}

pub fn count_sql(table: &str) -> String {
    format!("SELECT COUNT(*) FROM {}", table)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quote_ident() {
        assert_eq!(quote_ident("books").unwrap(), "\"BOOKS\"");
        assert!(quote_ident("").is_err());
        assert!(quote_ident("a\"b").is_err());
    }

    #[test]
    fn test_paged_queries() {
        let table = qualified_table("shop", "books").unwrap();
        let cols = select_list(Some(&["id".to_string(), "title".to_string()])).unwrap();
        let id = quote_ident("id").unwrap();

        assert_eq!(
            first_page_sql(&table, &cols, &id),
            "SELECT \"ID\", \"TITLE\" FROM \"SHOP\".\"BOOKS\" ORDER BY \"ID\" FETCH FIRST :1 ROWS ONLY"
        );
        assert_eq!(
            next_page_sql(&table, "*", &id),
            "SELECT * FROM \"SHOP\".\"BOOKS\" WHERE \"ID\" > :1 ORDER BY \"ID\" FETCH FIRST :2 ROWS ONLY"
        );
        assert_eq!(count_sql(&table), "SELECT COUNT(*) FROM \"SHOP\".\"BOOKS\"");
    }
}
