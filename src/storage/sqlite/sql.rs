//! SQL building helpers.

/// Escapes `SQLite` LIKE wildcards (`%`, `_`) and the escape character.
///
/// Use with `LIKE ? ESCAPE '\'`.
#[must_use]
pub fn escape_like_wildcards(s: &str) -> String {
    let mut result = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '%' | '_' | '\\' => {
                result.push('\\');
                result.push(c);
            },
            _ => result.push(c),
        }
    }
    result
}

/// Returns `count` numbered placeholders starting at `?start`, comma separated.
#[must_use]
pub fn numbered_placeholders(start: usize, count: usize) -> String {
    (start..start + count)
        .map(|i| format!("?{i}"))
        .collect::<Vec<_>>()
        .join(", ")
}

/// Dynamic WHERE clause builder with numbered parameters.
#[derive(Default)]
pub struct WhereBuilder {
    conditions: Vec<String>,
    params: Vec<Box<dyn rusqlite::ToSql>>,
}

impl WhereBuilder {
    /// Creates an empty builder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the index the next parameter will take.
    #[must_use]
    pub fn next_index(&self) -> usize {
        self.params.len() + 1
    }

    /// Adds a condition that uses no parameters.
    pub fn push_raw(&mut self, condition: impl Into<String>) {
        self.conditions.push(condition.into());
    }

    /// Adds a condition with one parameter. `{}` in `template` is replaced by its placeholder.
    pub fn push<T: rusqlite::ToSql + 'static>(&mut self, template: &str, value: T) {
        let placeholder = format!("?{}", self.next_index());
        self.conditions.push(template.replace("{}", &placeholder));
        self.params.push(Box::new(value));
    }

    /// Adds `column IN (...)` over `values`. Empty input adds nothing.
    pub fn push_in<T: rusqlite::ToSql + 'static>(
        &mut self,
        column: &str,
        values: impl IntoIterator<Item = T>,
    ) {
        let values: Vec<T> = values.into_iter().collect();
        if values.is_empty() {
            return;
        }
        let placeholders = numbered_placeholders(self.next_index(), values.len());
        self.conditions.push(format!("{column} IN ({placeholders})"));
        for value in values {
            self.params.push(Box::new(value));
        }
    }

    /// Adds `column IN (...)` over `values` bound as a single JSON array.
    ///
    /// The statement uses one parameter however many values there are, so
    /// large id sets stay under `SQLite`'s bound-variable limit. Empty input
    /// adds nothing.
    pub fn push_in_list(&mut self, column: &str, values: impl IntoIterator<Item = String>) {
        let values: Vec<String> = values.into_iter().collect();
        if values.is_empty() {
            return;
        }
        let list = self.bind_list(values);
        self.conditions
            .push(format!("{column} IN (SELECT value FROM json_each({list}))"));
    }

    /// Binds `values` as one JSON array parameter, readable with `json_each`.
    pub fn bind_list(&mut self, values: impl IntoIterator<Item = String>) -> String {
        let array = serde_json::Value::from(values.into_iter().collect::<Vec<_>>());
        self.bind(array.to_string())
    }

    /// Adds a bound parameter that is referenced elsewhere in the statement.
    pub fn bind<T: rusqlite::ToSql + 'static>(&mut self, value: T) -> String {
        let placeholder = format!("?{}", self.next_index());
        self.params.push(Box::new(value));
        placeholder
    }

    /// Returns `WHERE ...` or an empty string.
    #[must_use]
    pub fn clause(&self) -> String {
        if self.conditions.is_empty() {
            String::new()
        } else {
            format!("WHERE {}", self.conditions.join(" AND "))
        }
    }

    /// Returns the parameters as references for `query_map`.
    #[must_use]
    pub fn params(&self) -> Vec<&dyn rusqlite::ToSql> {
        self.params.iter().map(AsRef::as_ref).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_escape_like_wildcards() {
        assert_eq!(escape_like_wildcards("100%"), "100\\%");
        assert_eq!(escape_like_wildcards("src/my_mod"), "src/my\\_mod");
        assert_eq!(escape_like_wildcards("a\\b"), "a\\\\b");
        assert_eq!(escape_like_wildcards("plain"), "plain");
    }

    #[test]
    fn test_numbered_placeholders() {
        assert_eq!(numbered_placeholders(3, 3), "?3, ?4, ?5");
        assert_eq!(numbered_placeholders(1, 0), "");
    }

    #[test]
    fn test_where_builder() {
        let mut builder = WhereBuilder::new();
        assert_eq!(builder.clause(), "");

        builder.push("name = {}", "parse".to_string());
        builder.push_in("type", vec!["function".to_string(), "class".to_string()]);
        builder.push_in::<String>("source", Vec::new());
        builder.push_raw("validTo IS NULL");

        assert_eq!(
            builder.clause(),
            "WHERE name = ?1 AND type IN (?2, ?3) AND validTo IS NULL"
        );
        assert_eq!(builder.params().len(), 3);
        assert_eq!(builder.bind(10_i64), "?4");
    }

    #[test]
    fn test_push_in_list_binds_one_parameter() {
        let mut builder = WhereBuilder::new();
        builder.push_in_list("id", (0..50_000).map(|i| format!("e{i}")));
        builder.push_in_list("type", Vec::new());
        assert_eq!(
            builder.clause(),
            "WHERE id IN (SELECT value FROM json_each(?1))"
        );
        assert_eq!(builder.params().len(), 1);
    }

    #[test]
    fn test_list_matches_in_sqlite() {
        let conn = rusqlite::Connection::open_in_memory().unwrap();
        conn.execute_batch(
            "CREATE TABLE t (id TEXT); INSERT INTO t VALUES ('a'), ('b'), ('c');",
        )
        .unwrap();
        let mut builder = WhereBuilder::new();
        builder.push_in_list("id", ["a".to_string(), "c".to_string(), "it's".to_string()]);
        let sql = format!("SELECT count(*) FROM t {}", builder.clause());
        let count: i64 = conn
            .query_row(&sql, builder.params().as_slice(), |row| row.get(0))
            .unwrap();
        assert_eq!(count, 2);
    }
}
