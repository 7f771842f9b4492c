//! Candidate predicates over document attributes.
//!
//! A [`Filter`] has two interpreters: [`Filter::to_sql`] renders it as a parameterised Cosmos SQL
//! query for the server, and [`Filter::matches`] evaluates it against a document in process.

use serde::Serialize;
use serde_json::Value;

use crate::document::Document;

#[derive(Debug, Clone, PartialEq)]
pub enum Filter {
    /// Attribute is present and equal to the value
    Equals { attribute: String, value: Value },
    /// Attribute is present (any value, including `null`)
    Defined(String),
    Not(Box<Filter>),
    And(Vec<Filter>),
}

impl Filter {
    pub fn equals(attribute: impl Into<String>, value: impl Into<Value>) -> Self {
        Filter::Equals {
            attribute: attribute.into(),
            value: value.into(),
        }
    }

    pub fn defined(attribute: impl Into<String>) -> Self {
        Filter::Defined(attribute.into())
    }

    pub fn not_defined(attribute: impl Into<String>) -> Self {
        Filter::Not(Box::new(Filter::defined(attribute)))
    }

    pub fn matches(&self, document: &Document) -> bool {
        match self {
            Filter::Equals { attribute, value } => document.get(attribute) == Some(value),
            Filter::Defined(attribute) => document.get(attribute).is_some(),
            Filter::Not(inner) => !inner.matches(document),
            Filter::And(clauses) => clauses.iter().all(|clause| clause.matches(document)),
        }
    }

    /// Render as `SELECT * FROM c WHERE ...` with values bound as `@p0`, `@p1`, ...
    pub fn to_sql(&self) -> SqlQuery {
        let mut parameters = Vec::new();
        let mut condition = String::new();
        self.write_condition(&mut condition, &mut parameters);

        let query = if condition.is_empty() {
            "SELECT * FROM c".to_string()
        } else {
            format!("SELECT * FROM c WHERE {condition}")
        };

        SqlQuery { query, parameters }
    }

    fn write_condition(&self, out: &mut String, parameters: &mut Vec<SqlParameter>) {
        match self {
            Filter::Equals { attribute, value } => {
                let name = format!("@p{}", parameters.len());
                out.push_str(&format!("{} = {name}", attribute_ref(attribute)));
                parameters.push(SqlParameter {
                    name,
                    value: value.clone(),
                });
            }
            Filter::Defined(attribute) => {
                out.push_str(&format!("IS_DEFINED({})", attribute_ref(attribute)));
            }
            Filter::Not(inner) => {
                out.push_str("NOT ");
                if matches!(inner.as_ref(), Filter::And(clauses) if clauses.len() > 1) {
                    out.push('(');
                    inner.write_condition(out, parameters);
                    out.push(')');
                } else {
                    inner.write_condition(out, parameters);
                }
            }
            Filter::And(clauses) => {
                for (i, clause) in clauses.iter().enumerate() {
                    if i > 0 {
                        out.push_str(" AND ");
                    }
                    clause.write_condition(out, parameters);
                }
            }
        }
    }
}

fn attribute_ref(attribute: &str) -> String {
    let plain = attribute
        .chars()
        .next()
        .is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
        && attribute.chars().all(|c| c.is_ascii_alphanumeric() || c == '_');

    if plain {
        format!("c.{attribute}")
    } else {
        format!("c[\"{}\"]", attribute.replace('\\', "\\\\").replace('"', "\\\""))
    }
}

/// Cosmos SQL query body.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SqlQuery {
    pub query: String,
    pub parameters: Vec<SqlParameter>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SqlParameter {
    pub name: String,
    pub value: Value,
}
