//! Tagged parameter values bound into prepared statements.
//!
//! The source system this runtime models binds arbitrary dynamically typed
//! values into SQL parameters. Here binding is centralized on a small
//! closed set of variants instead, with type inference happening once, in
//! [`Value::infer`].

/// A bound parameter value.
///
/// Parameter type inference (used by [`crate::executer::QueryExecuter::bind`])
/// maps Rust values onto this set: integers become [`Value::Int`], bools
/// become [`Value::Bool`], `None`/unit become [`Value::Null`], everything
/// else is stringified into [`Value::Str`].
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Int(i64),
    Bool(bool),
    Str(String),
    Null,
}

impl Value {
    /// Binds `self` onto a `sqlx::Any` query, in argument position.
    pub(crate) fn bind_any<'q>(
        &'q self,
        query: sqlx::query::Query<'q, sqlx::Any, sqlx::any::AnyArguments<'q>>,
    ) -> sqlx::query::Query<'q, sqlx::Any, sqlx::any::AnyArguments<'q>> {
        match self {
            Value::Int(i) => query.bind(*i),
            Value::Bool(b) => query.bind(*b),
            Value::Str(s) => query.bind(s.as_str()),
            Value::Null => query.bind(Option::<String>::None),
        }
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Int(v as i64)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Str(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Str(v.to_owned())
    }
}

impl<T> From<Option<T>> for Value
where
    T: Into<Value>,
{
    fn from(v: Option<T>) -> Self {
        match v {
            Some(v) => v.into(),
            None => Value::Null,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn infers_from_conversions() {
        assert_eq!(Value::from(5i64), Value::Int(5));
        assert_eq!(Value::from(true), Value::Bool(true));
        assert_eq!(Value::from("a"), Value::Str("a".into()));
        assert_eq!(Value::from(Option::<i64>::None), Value::Null);
        assert_eq!(Value::from(Some(3i64)), Value::Int(3));
    }
}
