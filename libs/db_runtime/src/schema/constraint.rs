//! Constraint Model (C8): value-typed constraint descriptors with fluent
//! refinement.

/// The closed set of constraint kinds a declared [`Constraint`] can carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub enum ConstraintKind {
    Unique,
    Index,
    Primary,
    AutoIncrement,
    ForeignKey,
    Check,
    Fulltext,
}

impl ConstraintKind {
    pub fn label(self) -> &'static str {
        match self {
            ConstraintKind::Unique => "unique",
            ConstraintKind::Index => "index",
            ConstraintKind::Primary => "primary",
            ConstraintKind::AutoIncrement => "autoIncrement",
            ConstraintKind::ForeignKey => "foreignKey",
            ConstraintKind::Check => "check",
            ConstraintKind::Fulltext => "fulltext",
        }
    }
}

/// `ON DELETE`/`ON UPDATE` referential action, normalized from whatever
/// free-form string the caller passes (e.g. `"set null"` -> `SetNull`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReferentialAction {
    Cascade,
    Restrict,
    SetNull,
    NoAction,
}

impl ReferentialAction {
    /// Accepts free-form input, case- and separator-insensitive. Anything
    /// unrecognized input falls back to `Restrict`.
    pub fn parse_free_form(input: &str) -> Self {
        let normalized = input.to_uppercase().replace(['-', '_'], " ");
        match normalized.trim() {
            "CASCADE" => ReferentialAction::Cascade,
            "SET NULL" | "SETNULL" => ReferentialAction::SetNull,
            "NO ACTION" | "NOACTION" => ReferentialAction::NoAction,
            _ => ReferentialAction::Restrict,
        }
    }

    /// Rendered with a space (`SET_NULL` -> `SET NULL`) per §6.
    pub fn render(self) -> &'static str {
        match self {
            ReferentialAction::Cascade => "CASCADE",
            ReferentialAction::Restrict => "RESTRICT",
            ReferentialAction::SetNull => "SET NULL",
            ReferentialAction::NoAction => "NO ACTION",
        }
    }
}

/// A plain record: the only thing [`crate::schema::SchemaReconciler`]
/// actually consumes.
#[derive(Debug, Clone, serde::Serialize)]
pub struct ConstraintDescriptor {
    pub kind: ConstraintKind,
    pub columns: Vec<String>,
    pub expression: Option<String>,
    pub name: Option<String>,
    pub on_delete: Option<ReferentialAction>,
    pub on_update: Option<ReferentialAction>,
    pub unique: bool,
    pub references: Option<(String, String)>,
}

/// Fluent builder for a declared constraint. Every variant supports
/// `.name(..)`; `foreign_key` additionally supports `.on_delete(..)` /
/// `.on_update(..)`; `index` supports `.unique()`.
#[derive(Debug, Clone)]
pub struct Constraint {
    descriptor: ConstraintDescriptor,
}

impl Constraint {
    fn base(kind: ConstraintKind, columns: Vec<String>) -> ConstraintDescriptor {
        ConstraintDescriptor {
            kind,
            columns,
            expression: None,
            name: None,
            on_delete: None,
            on_update: None,
            unique: false,
            references: None,
        }
    }

    pub fn unique(columns: impl IntoColumns) -> Self {
        Self {
            descriptor: Self::base(ConstraintKind::Unique, columns.into_columns()),
        }
    }

    pub fn index(columns: impl IntoColumns) -> Self {
        Self {
            descriptor: Self::base(ConstraintKind::Index, columns.into_columns()),
        }
    }

    pub fn primary(columns: impl IntoColumns) -> Self {
        Self {
            descriptor: Self::base(ConstraintKind::Primary, columns.into_columns()),
        }
    }

    pub fn auto_increment(column: impl Into<String>) -> Self {
        Self {
            descriptor: Self::base(ConstraintKind::AutoIncrement, vec![column.into()]),
        }
    }

    /// `references` is `"table.column"`.
    pub fn foreign_key(column: impl Into<String>, references: &str) -> Self {
        let mut descriptor = Self::base(ConstraintKind::ForeignKey, vec![column.into()]);
        if let Some((table, col)) = references.split_once('.') {
            descriptor.references = Some((table.to_string(), col.to_string()));
        }
        Self { descriptor }
    }

    pub fn check(expression: impl Into<String>) -> Self {
        let mut descriptor = Self::base(ConstraintKind::Check, Vec::new());
        descriptor.expression = Some(expression.into());
        Self { descriptor }
    }

    pub fn fulltext(columns: impl IntoColumns) -> Self {
        Self {
            descriptor: Self::base(ConstraintKind::Fulltext, columns.into_columns()),
        }
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.descriptor.name = Some(name.into());
        self
    }

    /// Only meaningful on [`Constraint::index`].
    pub fn unique_index(mut self) -> Self {
        self.descriptor.unique = true;
        self
    }

    /// Only meaningful on [`Constraint::foreign_key`].
    pub fn on_delete(mut self, action: &str) -> Self {
        self.descriptor.on_delete = Some(ReferentialAction::parse_free_form(action));
        self
    }

    /// Only meaningful on [`Constraint::foreign_key`].
    pub fn on_update(mut self, action: &str) -> Self {
        self.descriptor.on_update = Some(ReferentialAction::parse_free_form(action));
        self
    }

    pub fn to_descriptor(&self) -> ConstraintDescriptor {
        self.descriptor.clone()
    }
}

/// Accepts either a single column name or an ordered sequence, matching
/// §3's "`columns` is one column name or an ordered sequence."
pub trait IntoColumns {
    fn into_columns(self) -> Vec<String>;
}

impl IntoColumns for &str {
    fn into_columns(self) -> Vec<String> {
        vec![self.to_string()]
    }
}

impl IntoColumns for Vec<&str> {
    fn into_columns(self) -> Vec<String> {
        self.into_iter().map(str::to_string).collect()
    }
}

impl IntoColumns for Vec<String> {
    fn into_columns(self) -> Vec<String> {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fluent_foreign_key_round_trips() {
        let descriptor = Constraint::foreign_key("user_id", "users.id")
            .on_delete("set null")
            .name("fk_user")
            .to_descriptor();
        assert_eq!(descriptor.columns, vec!["user_id"]);
        assert_eq!(
            descriptor.references,
            Some(("users".to_string(), "id".to_string()))
        );
        assert_eq!(descriptor.on_delete, Some(ReferentialAction::SetNull));
        assert_eq!(descriptor.name.as_deref(), Some("fk_user"));
    }

    #[test]
    fn free_form_action_defaults_to_restrict() {
        assert_eq!(ReferentialAction::parse_free_form("whatever"), ReferentialAction::Restrict);
        assert_eq!(ReferentialAction::parse_free_form("CASCADE"), ReferentialAction::Cascade);
    }

    #[test]
    fn unique_accepts_multi_column() {
        let descriptor = Constraint::unique(vec!["a", "b"]).to_descriptor();
        assert_eq!(descriptor.columns, vec!["a", "b"]);
    }
}
