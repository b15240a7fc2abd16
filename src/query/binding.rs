//! # Bound Parameter Placeholders
//!
//! Rendered statements refer to bound params by name (`:username`). Drivers
//! bind positionally, so each statement is rewritten into the backend's
//! positional dialect and the referenced names are recorded in order.
//!
//! Quoted strings, quoted identifiers, dollar-quoted bodies (`$$...$$`,
//! `$fn$...$fn$`), comments and `::` casts are left untouched. A colon directly
//! after an identifier character or a bracket is an array slice (`a[1:n]`),
//! not a placeholder.

use serde_json::{Map, Value};

/// Positional placeholder dialect of a backend
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaceholderStyle {
    /// `$1`, `$2`, ... (Postgres)
    Dollar,
    /// `?1`, `?2`, ... (SQLite)
    Question,
}

impl PlaceholderStyle {
    fn write(self, out: &mut String, position: usize) {
        match self {
            PlaceholderStyle::Dollar => out.push('$'),
            PlaceholderStyle::Question => out.push('?'),
        }
        out.push_str(&position.to_string());
    }
}

/// A statement rewritten to positional placeholders
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BoundStatement {
    /// Statement text in the backend dialect
    pub sql: String,
    /// Param names by position (position `i + 1` binds `names[i]`)
    pub names: Vec<String>,
}

impl BoundStatement {
    /// Rewrite `:name` placeholders in `sql`
    ///
    /// A name used twice reuses its first position.
    pub fn parse(sql: &str, style: PlaceholderStyle) -> Self {
        let mut out = String::with_capacity(sql.len());
        let mut names: Vec<String> = Vec::new();
        let mut chars = sql.char_indices().peekable();

        while let Some((index, c)) = chars.next() {
            match c {
                '\'' | '"' => {
                    out.push(c);
                    for (_, inner) in chars.by_ref() {
                        out.push(inner);
                        if inner == c {
                            break;
                        }
                    }
                }
                '-' if matches!(chars.peek(), Some((_, '-'))) => {
                    out.push(c);
                    for (_, inner) in chars.by_ref() {
                        out.push(inner);
                        if inner == '\n' {
                            break;
                        }
                    }
                }
                '/' if matches!(chars.peek(), Some((_, '*'))) => {
                    out.push(c);
                    let mut previous = '\0';
                    for (_, inner) in chars.by_ref() {
                        out.push(inner);
                        if previous == '*' && inner == '/' {
                            break;
                        }
                        previous = inner;
                    }
                }
                '$' if !follows_word(&out) => match dollar_tag(&sql[index..]) {
                    Some(tag) => {
                        let body = index + tag.len();
                        let end = sql[body..]
                            .find(tag)
                            .map_or(sql.len(), |at| body + at + tag.len());
                        out.push_str(&sql[index..end]);
                        while matches!(chars.peek(), Some((i, _)) if *i < end) {
                            chars.next();
                        }
                    }
                    None => out.push(c),
                },
                ':' => match chars.peek() {
                    Some((_, ':')) => {
                        out.push_str("::");
                        chars.next();
                    }
                    Some((_, next))
                        if (next.is_ascii_alphabetic() || *next == '_') && !follows_operand(&out) =>
                    {
                        let mut name = String::new();
                        while let Some((_, next)) = chars.peek() {
                            if next.is_ascii_alphanumeric() || *next == '_' {
                                name.push(*next);
                                chars.next();
                            } else {
                                break;
                            }
                        }
                        let position = match names.iter().position(|n| *n == name) {
                            Some(index) => index + 1,
                            None => {
                                names.push(name);
                                names.len()
                            }
                        };
                        style.write(&mut out, position);
                    }
                    _ => out.push(c),
                },
                _ => out.push(c),
            }
        }

        Self { sql: out, names }
    }

    /// Resolve positional values from the bound params
    ///
    /// Returns the first referenced name without a value on failure.
    pub fn values(&self, params: &Map<String, Value>) -> Result<Vec<Value>, String> {
        self.names
            .iter()
            .map(|name| params.get(name).cloned().ok_or_else(|| name.clone()))
            .collect()
    }
}

fn follows_word(out: &str) -> bool {
    out.chars()
        .next_back()
        .is_some_and(|ch| ch.is_alphanumeric() || ch == '_')
}

/// Identifier, digit or bracket: the colon belongs to a slice
fn follows_operand(out: &str) -> bool {
    follows_word(out) || matches!(out.chars().next_back(), Some('[' | ']'))
}

/// Opening delimiter (`$$` or `$tag$`) when `rest` starts a dollar quote
fn dollar_tag(rest: &str) -> Option<&str> {
    let len = rest[1..].find('$')?;
    let tag = &rest[1..=len];
    let valid = tag.chars().enumerate().all(|(i, ch)| {
        ch == '_' || if i == 0 { ch.is_alphabetic() } else { ch.is_alphanumeric() }
    });
    valid.then(|| &rest[..len + 2])
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_dollar_style() {
        let bound = BoundStatement::parse(
            "INSERT INTO users VALUES (:username, crypt(:password, gen_salt('bf', 8)))",
            PlaceholderStyle::Dollar,
        );
        assert_eq!(
            bound.sql,
            "INSERT INTO users VALUES ($1, crypt($2, gen_salt('bf', 8)))"
        );
        assert_eq!(bound.names, vec!["username", "password"]);
    }

    #[test]
    fn test_question_style() {
        let bound = BoundStatement::parse(
            "SELECT * FROM t WHERE a = :a AND b = :b",
            PlaceholderStyle::Question,
        );
        assert_eq!(bound.sql, "SELECT * FROM t WHERE a = ?1 AND b = ?2");
    }

    #[test]
    fn test_repeated_name_reuses_position() {
        let bound = BoundStatement::parse(
            "SELECT * FROM t WHERE a = :x OR b = :x OR c = :y",
            PlaceholderStyle::Dollar,
        );
        assert_eq!(bound.sql, "SELECT * FROM t WHERE a = $1 OR b = $1 OR c = $2");
        assert_eq!(bound.names, vec!["x", "y"]);
    }

    #[test]
    fn test_casts_quotes_and_comments_untouched() {
        let sql = "SELECT ':nope', \"col:umn\", x::text -- :comment\n/* :block */ FROM t WHERE id = :id";
        let bound = BoundStatement::parse(sql, PlaceholderStyle::Dollar);
        assert_eq!(
            bound.sql,
            "SELECT ':nope', \"col:umn\", x::text -- :comment\n/* :block */ FROM t WHERE id = $1"
        );
        assert_eq!(bound.names, vec!["id"]);
    }

    #[test]
    fn test_lone_colon_and_digits_untouched() {
        let bound = BoundStatement::parse("SELECT a[1:2], ': ', 1 :9", PlaceholderStyle::Dollar);
        assert_eq!(bound.sql, "SELECT a[1:2], ': ', 1 :9");
        assert!(bound.names.is_empty());
    }

    #[test]
    fn test_dollar_quoted_bodies_untouched() {
        let sql = "CREATE FUNCTION f() RETURNS int AS $$ SELECT :inner $$ LANGUAGE sql; \
                   DO $body$ BEGIN PERFORM :also; END $body$; SELECT :outer";
        let bound = BoundStatement::parse(sql, PlaceholderStyle::Dollar);
        assert!(bound.sql.contains("$$ SELECT :inner $$"));
        assert!(bound.sql.contains("$body$ BEGIN PERFORM :also; END $body$"));
        assert!(bound.sql.ends_with("SELECT $1"));
        assert_eq!(bound.names, vec!["outer"]);
    }

    #[test]
    fn test_unterminated_dollar_quote_runs_to_end() {
        let bound = BoundStatement::parse("SELECT $q$ :a", PlaceholderStyle::Dollar);
        assert_eq!(bound.sql, "SELECT $q$ :a");
        assert!(bound.names.is_empty());
    }

    #[test]
    fn test_positional_dollar_is_not_a_quote() {
        let bound = BoundStatement::parse("SELECT $1, :a, $2", PlaceholderStyle::Dollar);
        assert_eq!(bound.sql, "SELECT $1, $1, $2");
        assert_eq!(bound.names, vec!["a"]);
    }

    #[test]
    fn test_array_slices_untouched() {
        let bound = BoundStatement::parse(
            "SELECT arr[1:n], arr[lo:hi], arr[:n], m[1][x:y] FROM t WHERE id = :id",
            PlaceholderStyle::Dollar,
        );
        assert_eq!(
            bound.sql,
            "SELECT arr[1:n], arr[lo:hi], arr[:n], m[1][x:y] FROM t WHERE id = $1"
        );
        assert_eq!(bound.names, vec!["id"]);
    }

    #[test]
    fn test_values_in_position_order() {
        let bound = BoundStatement::parse("VALUES (:b, :a)", PlaceholderStyle::Dollar);
        let params = json!({"a": 1, "b": "two", "unused": true});
        let values = bound.values(params.as_object().unwrap()).unwrap();
        assert_eq!(values, vec![json!("two"), json!(1)]);
    }

    #[test]
    fn test_missing_value_named() {
        let bound = BoundStatement::parse("VALUES (:a, :b)", PlaceholderStyle::Dollar);
        let params = json!({"a": 1});
        assert_eq!(bound.values(params.as_object().unwrap()), Err("b".to_string()));
    }
}
