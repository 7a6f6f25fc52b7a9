use serde_json::Value;

/// Query language understood by [`super::ContentIndex::search`].
#[derive(Debug, Clone, PartialEq)]
pub enum Query {
    /// Every document in the index.
    MatchAll,
    /// Exact equality on a single field.
    Term { field: String, value: Value },
    /// Case-insensitive substring match on any of the string `fields`.
    Contains { fields: Vec<String>, term: String },
    /// All sub-queries must match.
    And(Vec<Query>),
}

impl Query {
    pub fn term(field: &str, value: impl Into<Value>) -> Self {
        Query::Term {
            field: field.to_string(),
            value: value.into(),
        }
    }

    pub fn contains(fields: &[&str], term: &str) -> Self {
        Query::Contains {
            fields: fields.iter().map(|f| f.to_string()).collect(),
            term: term.to_string(),
        }
    }

    pub fn matches(&self, doc: &Value) -> bool {
        match self {
            Query::MatchAll => true,
            Query::Term { field, value } => doc.get(field) == Some(value),
            Query::Contains { fields, term } => {
                let needle = term.to_lowercase();
                fields.iter().any(|field| {
                    doc.get(field)
                        .and_then(Value::as_str)
                        .map(|s| s.to_lowercase().contains(&needle))
                        .unwrap_or(false)
                })
            }
            Query::And(parts) => parts.iter().all(|q| q.matches(doc)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn term_is_exact() {
        let doc = json!({"hash": "abc", "size": 3});
        assert!(Query::term("hash", "abc").matches(&doc));
        assert!(!Query::term("hash", "ab").matches(&doc));
        assert!(Query::term("size", 3).matches(&doc));
        assert!(!Query::term("missing", "abc").matches(&doc));
    }

    #[test]
    fn contains_is_case_insensitive_substring() {
        let doc = json!({"filename": "Report.PDF", "file_type": "PDF"});
        assert!(Query::contains(&["filename"], "port.p").matches(&doc));
        assert!(Query::contains(&["hash", "file_type"], "pdf").matches(&doc));
        assert!(!Query::contains(&["filename"], "xls").matches(&doc));
    }

    #[test]
    fn and_requires_all() {
        let doc = json!({"user_id": "a", "filename": "x.txt"});
        let q = Query::And(vec![Query::term("user_id", "a"), Query::contains(&["filename"], "x")]);
        assert!(q.matches(&doc));
        let q = Query::And(vec![Query::term("user_id", "b"), Query::contains(&["filename"], "x")]);
        assert!(!q.matches(&doc));
    }
}
