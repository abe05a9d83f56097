//! Parameterized SQL fragment builders.
//!
//! # Responsibility
//! - Quote identifiers and qualify table names.
//! - Emit positional placeholders, SET clauses and IN-lists whose order
//!   matches the bound values.
//! - Assemble paged SELECT and COUNT statements.
//!
//! # Invariants
//! - Filter, sort and projection text is inserted verbatim; it is never
//!   parsed or sanitized here.
//! - OFFSET is emitted only for non-negative skips.
//! - LIMIT never exceeds the configured max page size.

use crate::error::{PersistenceError, PersistenceResult};
use once_cell::sync::Lazy;
use regex::Regex;

static IDENTIFIER_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").expect("valid identifier regex"));

/// Checks that a configured table/schema name is a plain identifier.
pub fn validate_identifier(name: &str) -> PersistenceResult<()> {
    if IDENTIFIER_RE.is_match(name) {
        Ok(())
    } else {
        Err(PersistenceError::Configuration(format!(
            "`{name}` is not a valid SQL identifier"
        )))
    }
}

/// Wraps `name` in double quotes, doubling embedded quotes.
pub fn quote_identifier(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// Returns `"schema"."table"`, or `"table"` without a schema.
pub fn qualified_table_name(schema: Option<&str>, table: &str) -> String {
    match schema {
        Some(schema) => format!("{}.{}", quote_identifier(schema), quote_identifier(table)),
        None => quote_identifier(table),
    }
}

/// Quoted, comma-joined column list.
pub fn column_list<S: AsRef<str>>(columns: &[S]) -> String {
    columns
        .iter()
        .map(|column| quote_identifier(column.as_ref()))
        .collect::<Vec<_>>()
        .join(", ")
}

/// `?1, ?2, ..., ?n`.
pub fn placeholders(count: usize) -> String {
    in_list(1, count)
}

/// `?start, ..., ?(start + count - 1)`; empty for zero.
pub fn in_list(start: usize, count: usize) -> String {
    (start..start + count)
        .map(|index| format!("?{index}"))
        .collect::<Vec<_>>()
        .join(", ")
}

/// Builds `"col"=?k` pairs for every column except `id_column`.
///
/// Returns the clause and the columns in binding order. Placeholders start
/// at `?1`.
pub fn set_clause<S: AsRef<str>>(columns: &[S], id_column: &str) -> (String, Vec<String>) {
    let bound = columns
        .iter()
        .map(AsRef::as_ref)
        .filter(|column| *column != id_column)
        .map(str::to_string)
        .collect::<Vec<_>>();
    let clause = bound
        .iter()
        .enumerate()
        .map(|(index, column)| format!("{}=?{}", quote_identifier(column), index + 1))
        .collect::<Vec<_>>()
        .join(", ");
    (clause, bound)
}

/// `"col"=excluded."col"` pairs used by `ON CONFLICT DO UPDATE`.
pub fn upsert_assignments<S: AsRef<str>>(columns: &[S], id_column: &str) -> String {
    columns
        .iter()
        .map(AsRef::as_ref)
        .filter(|column| *column != id_column)
        .map(|column| {
            let quoted = quote_identifier(column);
            format!("{quoted}=excluded.{quoted}")
        })
        .collect::<Vec<_>>()
        .join(", ")
}

/// Clamps `take` into `[0, max_page_size]`; absent means the max.
pub fn normalize_take(take: Option<i64>, max_page_size: i64) -> i64 {
    match take {
        Some(value) => value.clamp(0, max_page_size),
        None => max_page_size,
    }
}

/// Negative skips mean "no offset".
pub fn normalize_skip(skip: Option<i64>) -> Option<i64> {
    skip.filter(|value| *value >= 0)
}

/// `SELECT COUNT(*) FROM table [WHERE filter]`.
pub fn count_sql(table: &str, filter: Option<&str>) -> String {
    let mut sql = format!("SELECT COUNT(*) FROM {table}");
    push_where(&mut sql, filter);
    sql
}

/// `DELETE FROM table [WHERE filter]`.
pub fn delete_sql(table: &str, filter: Option<&str>) -> String {
    let mut sql = format!("DELETE FROM {table}");
    push_where(&mut sql, filter);
    sql
}

fn push_where(sql: &mut String, filter: Option<&str>) {
    if let Some(filter) = non_blank(filter) {
        sql.push_str(" WHERE ");
        sql.push_str(filter);
    }
}

fn non_blank(text: Option<&str>) -> Option<&str> {
    text.filter(|value| !value.trim().is_empty())
}

/// Caller-supplied fragments for filtered reads.
///
/// Each fragment is trusted SQL text: `filter` goes after WHERE, `sort`
/// after ORDER BY, `projection` replaces `*`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FilterQuery {
    pub filter: Option<String>,
    pub sort: Option<String>,
    pub projection: Option<String>,
}

impl FilterQuery {
    /// Matches every row.
    pub fn all() -> Self {
        Self::default()
    }

    pub fn filtered(filter: impl Into<String>) -> Self {
        Self {
            filter: Some(filter.into()),
            ..Self::default()
        }
    }

    pub fn sorted_by(mut self, sort: impl Into<String>) -> Self {
        self.sort = Some(sort.into());
        self
    }

    pub fn projected(mut self, projection: impl Into<String>) -> Self {
        self.projection = Some(projection.into());
        self
    }
}

/// SELECT statement assembled from raw caller fragments.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SelectQuery {
    table: String,
    projection: Option<String>,
    filter: Option<String>,
    sort: Option<String>,
    limit: Option<i64>,
    offset: Option<i64>,
}

impl SelectQuery {
    /// `table` must already be quoted/qualified.
    pub fn from_table(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            ..Self::default()
        }
    }

    pub fn projection(mut self, projection: Option<&str>) -> Self {
        self.projection = non_blank(projection).map(str::to_string);
        self
    }

    pub fn filter(mut self, filter: Option<&str>) -> Self {
        self.filter = non_blank(filter).map(str::to_string);
        self
    }

    pub fn sort(mut self, sort: Option<&str>) -> Self {
        self.sort = non_blank(sort).map(str::to_string);
        self
    }

    pub fn limit(mut self, limit: i64) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Negative offsets are dropped.
    pub fn offset(mut self, offset: Option<i64>) -> Self {
        self.offset = normalize_skip(offset);
        self
    }

    /// Applies the paging window, clamping `take` to `max_page_size`.
    pub fn page(self, skip: Option<i64>, take: Option<i64>, max_page_size: i64) -> Self {
        self.limit(normalize_take(take, max_page_size)).offset(skip)
    }

    pub fn to_sql(&self) -> String {
        let projection = self.projection.as_deref().unwrap_or("*");
        let mut sql = format!("SELECT {projection} FROM {}", self.table);
        push_where(&mut sql, self.filter.as_deref());
        if let Some(sort) = self.sort.as_deref() {
            sql.push_str(" ORDER BY ");
            sql.push_str(sort);
        }
        match (self.limit, self.offset) {
            (Some(limit), Some(offset)) => {
                sql.push_str(&format!(" LIMIT {limit} OFFSET {offset}"));
            }
            (Some(limit), None) => sql.push_str(&format!(" LIMIT {limit}")),
            // SQLite only accepts OFFSET after a LIMIT.
            (None, Some(offset)) => sql.push_str(&format!(" LIMIT -1 OFFSET {offset}")),
            (None, None) => {}
        }
        sql
    }
}

#[cfg(test)]
mod tests {
    use super::{
        column_list, count_sql, in_list, normalize_take, placeholders, qualified_table_name,
        quote_identifier, set_clause, upsert_assignments, validate_identifier, SelectQuery,
    };

    #[test]
    fn quoting_doubles_embedded_quotes() {
        assert_eq!(quote_identifier("key"), "\"key\"");
        assert_eq!(quote_identifier("we\"ird"), "\"we\"\"ird\"");
        assert_eq!(qualified_table_name(None, "dummies"), "\"dummies\"");
        assert_eq!(
            qualified_table_name(Some("main"), "dummies"),
            "\"main\".\"dummies\""
        );
    }

    #[test]
    fn column_list_and_placeholders_line_up() {
        let columns = ["id", "key", "content"];
        assert_eq!(column_list(&columns), "\"id\", \"key\", \"content\"");
        assert_eq!(placeholders(3), "?1, ?2, ?3");
        assert_eq!(placeholders(0), "");
        assert_eq!(in_list(4, 2), "?4, ?5");
    }

    #[test]
    fn set_clause_skips_id_column() {
        let (clause, bound) = set_clause(&["id", "key", "content"], "id");
        assert_eq!(clause, "\"key\"=?1, \"content\"=?2");
        assert_eq!(bound, vec!["key".to_string(), "content".to_string()]);
        assert_eq!(
            upsert_assignments(&["id", "key"], "id"),
            "\"key\"=excluded.\"key\""
        );
    }

    #[test]
    fn select_emits_offset_only_for_non_negative_skip() {
        let sql = SelectQuery::from_table("\"t\"")
            .filter(Some("key = 'A'"))
            .sort(Some("key DESC"))
            .page(Some(10), Some(5), 100)
            .to_sql();
        assert_eq!(
            sql,
            "SELECT * FROM \"t\" WHERE key = 'A' ORDER BY key DESC LIMIT 5 OFFSET 10"
        );

        let sql = SelectQuery::from_table("\"t\"")
            .page(Some(-1), None, 50)
            .to_sql();
        assert_eq!(sql, "SELECT * FROM \"t\" LIMIT 50");
    }

    #[test]
    fn select_keeps_projection_and_ignores_blank_fragments() {
        let sql = SelectQuery::from_table("\"t\"")
            .projection(Some("id, key"))
            .filter(Some("  "))
            .sort(None)
            .offset(Some(3))
            .to_sql();
        assert_eq!(sql, "SELECT id, key FROM \"t\" LIMIT -1 OFFSET 3");
    }

    #[test]
    fn take_is_clamped_to_page_bounds() {
        assert_eq!(normalize_take(Some(500), 100), 100);
        assert_eq!(normalize_take(Some(-3), 100), 0);
        assert_eq!(normalize_take(None, 20), 20);
    }

    #[test]
    fn count_and_identifier_validation() {
        assert_eq!(
            count_sql("\"t\"", Some("a > 1")),
            "SELECT COUNT(*) FROM \"t\" WHERE a > 1"
        );
        assert!(validate_identifier("dummies_2").is_ok());
        assert!(validate_identifier("2bad").is_err());
        assert!(validate_identifier("drop table").is_err());
    }
}
