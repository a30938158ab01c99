//! SQL rendering of queries against registry metadata.
//!
//! Dotted field paths become LEFT JOINs aliased by the path they follow
//! (`"user__profile"`). One-to-many and many-to-many values are fetched with
//! correlated sub-selects aggregated into `|`-joined identifier lists. Values
//! are always bound as positional parameters.

use std::collections::HashSet;
use std::sync::OnceLock;

use regex::Regex;
use rowset_core::{
    Error, FieldInfo, FieldMap, FieldType, ID_COLUMN, ID_FIELD, ModelInfo, Registry, Result,
    Value, is_valid_path, snake_case,
};

use crate::condition::{Condition, Node, Predicate};
use crate::expr::{Dialect, Operator};
use crate::query::Query;

/// A rendered statement: SQL text and its positional parameters.
pub type Statement = (String, Vec<Value>);

fn order_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"^\s*([A-Za-z_][A-Za-z0-9_]*(?:\.[A-Za-z_][A-Za-z0-9_]*)*)(?:\s+((?i:asc|desc)))?\s*$",
        )
        .expect("static order-by regex")
    })
}

/// Renders statements for one model.
#[derive(Debug, Clone, Copy)]
pub struct QueryRenderer<'r> {
    registry: &'r Registry,
    model: &'r ModelInfo,
    dialect: Dialect,
}

impl<'r> QueryRenderer<'r> {
    /// Create a renderer for `model`.
    pub fn new(registry: &'r Registry, model: &str, dialect: Dialect) -> Result<Self> {
        Ok(Self {
            registry,
            model: registry.get(model)?,
            dialect,
        })
    }

    /// The model statements are rendered for.
    pub fn model(&self) -> &'r ModelInfo {
        self.model
    }

    fn scope(&self) -> Scope<'r> {
        Scope {
            registry: self.registry,
            dialect: self.dialect,
            base_model: self.model,
            base_alias: self.model.table_name().to_string(),
            joins: Vec::new(),
            joined: HashSet::new(),
            params: Vec::new(),
        }
    }

    /// SELECT of `fields` (names or dotted paths), one column per field in
    /// the given order.
    ///
    /// Fields without a retrievable value (computed, not stored) are an
    /// error here; callers drop them first and compute them after the fetch.
    pub fn select<S: AsRef<str>>(&self, query: &Query, fields: &[S]) -> Result<Statement> {
        let mut scope = self.scope();
        let base = scope.base_alias.clone();
        let mut columns = Vec::with_capacity(fields.len());
        for field in fields {
            let field = field.as_ref();
            let (alias, model, info) = scope.target(&base, self.model, field)?;
            let expr = scope.value_expr(&alias, model, info)?;
            columns.push(format!("{expr} AS {}", scope.quote(field)));
        }
        let where_sql = scope.where_clause(query.condition())?;
        let group_sql = scope.group_clause(query.group_exprs())?;
        let order_sql = scope.order_clause(query.order_exprs(), query.group_exprs().is_empty())?;

        let sql = format!(
            "SELECT {}{} FROM {}{}{}{}{}{}",
            if query.is_distinct() { "DISTINCT " } else { "" },
            columns.join(", "),
            scope.quote(&base),
            scope.joins.concat(),
            where_sql,
            group_sql,
            order_sql,
            self.dialect.limit_offset(query.limit_value(), query.offset_value()),
        );
        tracing::trace!(model = self.model.name(), sql = %sql, params = scope.params.len(), "Rendered SELECT");
        Ok((sql, scope.params))
    }

    /// SELECT COUNT(*) with the query's condition. Ordering, grouping and
    /// paging are ignored.
    pub fn count(&self, query: &Query) -> Result<Statement> {
        let mut scope = self.scope();
        let where_sql = scope.where_clause(query.condition())?;
        let sql = format!(
            "SELECT COUNT(*) FROM {}{}{}",
            scope.quote(&scope.base_alias),
            scope.joins.concat(),
            where_sql
        );
        tracing::trace!(model = self.model.name(), sql = %sql, "Rendered COUNT");
        Ok((sql, scope.params))
    }

    /// INSERT of the column fields present in `data`. `ID` and fields
    /// without a column are skipped; unknown names are an error.
    pub fn insert(&self, data: &FieldMap) -> Result<Statement> {
        let mut scope = self.scope();
        let mut columns = Vec::new();
        let mut placeholders = Vec::new();
        for (name, value) in data.iter() {
            let Some(field) = self.column_field(name)? else {
                continue;
            };
            let value = self.coerce(field, value.clone())?;
            columns.push(scope.quote(&field.column));
            placeholders.push(scope.bind(value));
        }
        let mut sql = format!("INSERT INTO {}", scope.quote(self.model.table_name()));
        if columns.is_empty() {
            sql.push_str(self.dialect.default_values());
        } else {
            sql.push_str(&format!(
                " ({}) VALUES ({})",
                columns.join(", "),
                placeholders.join(", ")
            ));
        }
        if let Some(returning) = self.dialect.returning_id(ID_COLUMN) {
            sql.push_str(&returning);
        }
        tracing::trace!(model = self.model.name(), sql = %sql, "Rendered INSERT");
        Ok((sql, scope.params))
    }

    /// UPDATE of the column fields present in `data` for the rows matching
    /// the query. `None` when `data` has no column to set.
    pub fn update(&self, query: &Query, data: &FieldMap) -> Result<Option<Statement>> {
        self.ensure_bounded(query, "UPDATE")?;
        let mut scope = self.scope();
        let mut sets = Vec::new();
        for (name, value) in data.iter() {
            let Some(field) = self.column_field(name)? else {
                continue;
            };
            let value = self.coerce(field, value.clone())?;
            let placeholder = scope.bind(value);
            sets.push(format!("{} = {placeholder}", scope.quote(&field.column)));
        }
        if sets.is_empty() {
            return Ok(None);
        }
        let where_sql = scope.scoped_where(query.condition())?;
        let sql = format!(
            "UPDATE {} SET {}{}",
            scope.quote(self.model.table_name()),
            sets.join(", "),
            where_sql
        );
        tracing::trace!(model = self.model.name(), sql = %sql, "Rendered UPDATE");
        Ok(Some((sql, scope.params)))
    }

    /// DELETE of the rows matching the query.
    pub fn delete(&self, query: &Query) -> Result<Statement> {
        self.ensure_bounded(query, "DELETE")?;
        let mut scope = self.scope();
        let where_sql = scope.scoped_where(query.condition())?;
        let sql = format!(
            "DELETE FROM {}{}",
            scope.quote(self.model.table_name()),
            where_sql
        );
        tracing::trace!(model = self.model.name(), sql = %sql, "Rendered DELETE");
        Ok((sql, scope.params))
    }

    /// Refuse to render a statement touching every row of the table.
    fn ensure_bounded(&self, query: &Query, verb: &str) -> Result<()> {
        if query.is_unbounded() {
            tracing::error!(model = self.model.name(), verb, "Statement without condition");
            return Err(Error::InvalidExpression(format!(
                "{verb} of `{}` without condition",
                self.model.name()
            )));
        }
        Ok(())
    }

    /// DELETE of the link rows of many-to-many `field` owned by `owners`.
    pub fn unlink_many2many(&self, field: &str, owners: &[i64]) -> Result<Option<Statement>> {
        let (table, local, _) = self.link_of(field)?;
        Ok(self.delete_links(&table, &local, owners))
    }

    /// DELETE of the link rows of many-to-many `field` pointing to `targets`.
    pub fn unlink_many2many_targets(
        &self,
        field: &str,
        targets: &[i64],
    ) -> Result<Option<Statement>> {
        let (table, _, remote) = self.link_of(field)?;
        Ok(self.delete_links(&table, &remote, targets))
    }

    fn delete_links(&self, table: &str, column: &str, ids: &[i64]) -> Option<Statement> {
        if ids.is_empty() {
            return None;
        }
        let mut scope = self.scope();
        let placeholders: Vec<_> = ids.iter().map(|id| scope.bind(Value::Int(*id))).collect();
        let sql = format!(
            "DELETE FROM {} WHERE {} IN ({})",
            scope.quote(table),
            scope.quote(column),
            placeholders.join(", ")
        );
        Some((sql, scope.params))
    }

    /// INSERT of link rows tying `owner` to each of `targets`.
    pub fn link_many2many(
        &self,
        field: &str,
        owner: i64,
        targets: &[i64],
    ) -> Result<Option<Statement>> {
        if targets.is_empty() {
            return Ok(None);
        }
        let (table, local, remote) = self.link_of(field)?;
        let mut scope = self.scope();
        let mut rows = Vec::with_capacity(targets.len());
        for target in targets {
            let a = scope.bind(Value::Int(owner));
            let b = scope.bind(Value::Int(*target));
            rows.push(format!("({a}, {b})"));
        }
        let sql = format!(
            "INSERT INTO {} ({}, {}) VALUES {}",
            scope.quote(&table),
            scope.quote(&local),
            scope.quote(&remote),
            rows.join(", ")
        );
        Ok(Some((sql, scope.params)))
    }

    fn link_of(&self, field: &str) -> Result<(String, String, String)> {
        let info = self.model.field_info(field)?;
        match &info.field_type {
            FieldType::Many2Many {
                link: Some(link), ..
            } => Ok((
                link.table.clone(),
                link.local_column.clone(),
                link.remote_column.clone(),
            )),
            _ => Err(Error::InvalidPath {
                model: self.model.name().to_string(),
                path: field.to_string(),
                reason: "not a many-to-many field".to_string(),
            }),
        }
    }

    fn column_field(&self, name: &str) -> Result<Option<&'r FieldInfo>> {
        let field = self.model.field_info(name)?;
        Ok((field.name != ID_FIELD && field.has_column()).then_some(field))
    }

    fn coerce(&self, field: &FieldInfo, value: Value) -> Result<Value> {
        field.field_type.coerce(value).map_err(|message| {
            tracing::error!(
                model = self.model.name(),
                field = %field.name,
                error = %message,
                "Value does not fit field"
            );
            Error::conversion(self.model.name(), &field.name, message)
        })
    }
}

/// Per-statement rendering state: joins seen so far and bound parameters.
struct Scope<'r> {
    registry: &'r Registry,
    dialect: Dialect,
    base_model: &'r ModelInfo,
    base_alias: String,
    joins: Vec<String>,
    joined: HashSet<String>,
    params: Vec<Value>,
}

impl<'r> Scope<'r> {
    fn quote(&self, ident: &str) -> String {
        self.dialect.quote(ident)
    }

    fn col(&self, alias: &str, column: &str) -> String {
        format!("{}.{}", self.quote(alias), self.quote(column))
    }

    fn bind(&mut self, value: Value) -> String {
        self.params.push(value);
        self.dialect.placeholder(self.params.len())
    }

    /// Resolve `path` from `model` at `alias`, joining every many-to-one hop
    /// and following related fields to the field that holds the value.
    fn target(
        &mut self,
        alias: &str,
        model: &'r ModelInfo,
        path: &str,
    ) -> Result<(String, &'r ModelInfo, &'r FieldInfo)> {
        let registry = self.registry;
        let steps = registry.resolve_path(model.name(), path)?;
        let mut alias = alias.to_string();
        let (last, hops) = steps.split_last().ok_or_else(|| Error::InvalidPath {
            model: model.name().to_string(),
            path: path.to_string(),
            reason: "empty path".to_string(),
        })?;
        for hop in hops {
            alias = self.join(&alias, hop.field)?;
        }
        match &last.field.related {
            Some(related) => self.target(&alias, last.model, related),
            None => Ok((alias, last.model, last.field)),
        }
    }

    fn join(&mut self, from: &str, field: &FieldInfo) -> Result<String> {
        let FieldType::Many2One { model } = &field.field_type else {
            return Err(Error::InvalidPath {
                model: self.base_model.name().to_string(),
                path: field.name.clone(),
                reason: "only many-to-one fields can be joined".to_string(),
            });
        };
        let target = self.registry.get(model)?;
        let alias = format!("{from}__{}", snake_case(&field.name));
        if self.joined.insert(alias.clone()) {
            let join = format!(
                " LEFT JOIN {} AS {} ON {} = {}",
                self.quote(target.table_name()),
                self.quote(&alias),
                self.col(&alias, ID_COLUMN),
                self.col(from, &field.column)
            );
            self.joins.push(join);
        }
        Ok(alias)
    }

    /// Expression yielding the value of `field` on the row at `alias`.
    fn value_expr(&self, alias: &str, model: &ModelInfo, field: &FieldInfo) -> Result<String> {
        match &field.field_type {
            FieldType::One2Many {
                model: target,
                reverse_field,
            } => {
                let target = self.registry.get(target)?;
                let reverse = target.field_info(reverse_field)?;
                let sub = format!("{alias}__{}", snake_case(&field.name));
                Ok(format!(
                    "(SELECT {} FROM {} AS {} WHERE {} = {})",
                    self.dialect.aggregate_ids(&self.col(&sub, ID_COLUMN)),
                    self.quote(target.table_name()),
                    self.quote(&sub),
                    self.col(&sub, &reverse.column),
                    self.col(alias, ID_COLUMN)
                ))
            }
            FieldType::Many2Many {
                link: Some(link), ..
            } => Ok(format!(
                "(SELECT {} FROM {} WHERE {} = {})",
                self.dialect.aggregate_ids(&self.col(&link.table, &link.remote_column)),
                self.quote(&link.table),
                self.col(&link.table, &link.local_column),
                self.col(alias, ID_COLUMN)
            )),
            _ if field.has_column() => Ok(self.col(alias, &field.column)),
            _ => Err(Error::InvalidPath {
                model: model.name().to_string(),
                path: field.name.clone(),
                reason: "field has no stored value to select".to_string(),
            }),
        }
    }

    fn where_clause(&mut self, cond: &Condition) -> Result<String> {
        match cond.root() {
            None => Ok(String::new()),
            Some(root) => Ok(format!(" WHERE {}", self.node(root)?)),
        }
    }

    /// WHERE clause for UPDATE/DELETE, which cannot carry joins: conditions
    /// over dotted paths are moved into an `id IN (SELECT ...)` sub-select.
    fn scoped_where(&mut self, cond: &Condition) -> Result<String> {
        let where_sql = self.where_clause(cond)?;
        if self.joins.is_empty() {
            return Ok(where_sql);
        }
        let base = self.quote(&self.base_alias);
        let id = self.col(&self.base_alias, ID_COLUMN);
        Ok(format!(
            " WHERE {id} IN (SELECT {id} FROM {base}{}{where_sql})",
            self.joins.concat()
        ))
    }

    fn node(&mut self, node: &Node) -> Result<String> {
        match node {
            Node::Leaf(predicate) => self.predicate(predicate),
            Node::And(l, r) => {
                let l = self.node(l)?;
                let r = self.node(r)?;
                Ok(format!("({l} AND {r})"))
            }
            Node::Or(l, r) => {
                let l = self.node(l)?;
                let r = self.node(r)?;
                Ok(format!("({l} OR {r})"))
            }
            Node::Not(n) => Ok(format!("NOT ({})", self.node(n)?)),
        }
    }

    fn predicate(&mut self, p: &Predicate) -> Result<String> {
        let base = self.base_alias.clone();
        let (alias, model, field) = self.target(&base, self.base_model, &p.field)?;
        if field.field_type.is_x2many() {
            return self.x2many_predicate(&alias, model, field, p);
        }
        let lhs = self.value_expr(&alias, model, field)?;
        Ok(self.compare(&lhs, p.operator, &p.value))
    }

    fn compare(&mut self, lhs: &str, op: Operator, value: &Value) -> String {
        let op = match (op, value) {
            (Operator::Equals, Value::Ids(_)) => Operator::In,
            (Operator::NotEquals, Value::Ids(_)) => Operator::NotIn,
            _ => op,
        };
        match op {
            Operator::IsNull => format!("{lhs} IS NULL"),
            Operator::IsNotNull => format!("{lhs} IS NOT NULL"),
            Operator::Equals if value.is_null() => format!("{lhs} IS NULL"),
            Operator::NotEquals if value.is_null() => format!("{lhs} IS NOT NULL"),
            Operator::In | Operator::NotIn => {
                let items = list_items(value);
                let negated = op == Operator::NotIn;
                if items.is_empty() {
                    return if negated { "1=1" } else { "1=0" }.to_string();
                }
                let placeholders: Vec<_> = items.into_iter().map(|v| self.bind(v)).collect();
                format!(
                    "{lhs} {}IN ({})",
                    if negated { "NOT " } else { "" },
                    placeholders.join(", ")
                )
            }
            Operator::Like | Operator::NotLike => {
                let placeholder = self.bind(like_pattern(value));
                let not = if op == Operator::NotLike { "NOT " } else { "" };
                format!("{lhs} {not}LIKE {placeholder}")
            }
            Operator::ILike | Operator::NotILike => {
                let placeholder = self.bind(like_pattern(value));
                self.dialect.ilike(lhs, &placeholder, op == Operator::NotILike)
            }
            _ => {
                let placeholder = self.bind(value.clone());
                let symbol = op.sql_symbol().unwrap_or("=");
                format!("{lhs} {symbol} {placeholder}")
            }
        }
    }

    /// Filters on one-to-many and many-to-many fields compare the related
    /// identifiers: `Tags in [1, 2]` keeps records linked to tag 1 or 2.
    fn x2many_predicate(
        &mut self,
        alias: &str,
        model: &ModelInfo,
        field: &FieldInfo,
        p: &Predicate,
    ) -> Result<String> {
        let (table, owner_col, related_col, extra) = match &field.field_type {
            FieldType::One2Many {
                model: target,
                reverse_field,
            } => {
                let target = self.registry.get(target)?;
                let reverse = target.field_info(reverse_field)?;
                (
                    target.table_name().to_string(),
                    reverse.column.clone(),
                    ID_COLUMN.to_string(),
                    format!(" AND {} IS NOT NULL", self.quote(&reverse.column)),
                )
            }
            FieldType::Many2Many {
                link: Some(link), ..
            } => (
                link.table.clone(),
                link.local_column.clone(),
                link.remote_column.clone(),
                String::new(),
            ),
            _ => {
                return Err(Error::Registry(format!(
                    "many-to-many field `{}.{}` has no link table",
                    model.name(),
                    field.name
                )));
            }
        };
        let id = self.col(alias, ID_COLUMN);
        let owners = |filter: &str| {
            format!(
                "SELECT {} FROM {} WHERE {}{}",
                self.quote(&owner_col),
                self.quote(&table),
                filter,
                extra
            )
        };
        let any = owners("1=1");
        let ids = list_items(&p.value);
        let sql = match p.operator {
            Operator::IsNull => format!("{id} NOT IN ({any})"),
            Operator::IsNotNull => format!("{id} IN ({any})"),
            Operator::Equals | Operator::In | Operator::NotEquals | Operator::NotIn => {
                let negated = matches!(p.operator, Operator::NotEquals | Operator::NotIn);
                if ids.is_empty() {
                    // `Tags = []` means "has no tags".
                    return Ok(if p.operator == Operator::Equals {
                        format!("{id} NOT IN ({any})")
                    } else if p.operator == Operator::NotEquals {
                        format!("{id} IN ({any})")
                    } else if negated {
                        "1=1".to_string()
                    } else {
                        "1=0".to_string()
                    });
                }
                let placeholders: Vec<_> = ids.into_iter().map(|v| self.bind(v)).collect();
                let filter = format!(
                    "{} IN ({})",
                    self.quote(&related_col),
                    placeholders.join(", ")
                );
                let sub = format!(
                    "SELECT {} FROM {} WHERE {}{}",
                    self.quote(&owner_col),
                    self.quote(&table),
                    filter,
                    extra
                );
                format!("{id} {}IN ({sub})", if negated { "NOT " } else { "" })
            }
            other => {
                tracing::error!(
                    model = model.name(),
                    field = %field.name,
                    operator = %other,
                    "Operator not supported on relational list fields"
                );
                return Err(Error::InvalidOperator(format!(
                    "{other} on {}.{}",
                    model.name(),
                    field.name
                )));
            }
        };
        Ok(sql)
    }

    fn order_clause(&mut self, exprs: &[String], default_to_id: bool) -> Result<String> {
        if exprs.is_empty() {
            return Ok(if default_to_id {
                format!(" ORDER BY {}", self.col(&self.base_alias, ID_COLUMN))
            } else {
                String::new()
            });
        }
        let base = self.base_alias.clone();
        let mut parts = Vec::with_capacity(exprs.len());
        for expr in exprs {
            let caps = order_regex().captures(expr).ok_or_else(|| {
                tracing::error!(expr = %expr, "Invalid ORDER BY expression");
                Error::InvalidExpression(expr.clone())
            })?;
            let path = caps.get(1).map_or("", |m| m.as_str());
            let (alias, model, field) = self.target(&base, self.base_model, path)?;
            let column = self.value_expr(&alias, model, field)?;
            match caps.get(2) {
                Some(dir) => parts.push(format!("{column} {}", dir.as_str().to_uppercase())),
                None => parts.push(column),
            }
        }
        Ok(format!(" ORDER BY {}", parts.join(", ")))
    }

    fn group_clause(&mut self, exprs: &[String]) -> Result<String> {
        if exprs.is_empty() {
            return Ok(String::new());
        }
        let base = self.base_alias.clone();
        let mut parts = Vec::with_capacity(exprs.len());
        for expr in exprs {
            let path = expr.trim();
            if !is_valid_path(path) {
                tracing::error!(expr = %expr, "Invalid GROUP BY expression");
                return Err(Error::InvalidExpression(expr.clone()));
            }
            let (alias, model, field) = self.target(&base, self.base_model, path)?;
            parts.push(self.value_expr(&alias, model, field)?);
        }
        Ok(format!(" GROUP BY {}", parts.join(", ")))
    }
}

fn list_items(value: &Value) -> Vec<Value> {
    match value {
        Value::Ids(ids) => ids.iter().copied().map(Value::Int).collect(),
        Value::Null => Vec::new(),
        other => vec![other.clone()],
    }
}

fn like_pattern(value: &Value) -> Value {
    match value {
        Value::Text(s) => Value::Text(format!("%{s}%")),
        other => Value::Text(format!("%{other}%")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rowset_core::{LinkTable, RegistryBuilder};

    fn registry() -> Registry {
        RegistryBuilder::new()
            .model(
                ModelInfo::new("User")
                    .field(FieldInfo::text("UserName"))
                    .field(FieldInfo::text("Email"))
                    .field(FieldInfo::many2one("Profile", "Profile"))
                    .field(FieldInfo::one2many("Posts", "Post", "User"))
                    .field(FieldInfo::related("Age", "Profile.Age"))
                    .field(FieldInfo::boolean("IsStaff")),
            )
            .model(
                ModelInfo::new("Profile")
                    .field(FieldInfo::integer("Age"))
                    .field(FieldInfo::float("Money")),
            )
            .model(
                ModelInfo::new("Post")
                    .field(FieldInfo::many2one("User", "User"))
                    .field(FieldInfo::text("Title"))
                    .field(
                        FieldInfo::many2many("Tags", "Tag")
                            .link_table(LinkTable::new("post_tags", "post_id", "tag_id")),
                    ),
            )
            .model(ModelInfo::new("Tag").field(FieldInfo::text("Name")))
            .finalize()
            .unwrap()
    }

    fn renderer<'a>(registry: &'a Registry, model: &str) -> QueryRenderer<'a> {
        QueryRenderer::new(registry, model, Dialect::Sqlite).unwrap()
    }

    #[test]
    fn test_select_with_condition() {
        let reg = registry();
        let query = Query::new().filter(
            &Condition::new()
                .and("UserName", Operator::Equals, "jane")
                .and("IsStaff", Operator::Equals, true),
        );
        let (sql, params) = renderer(&reg, "User")
            .select(&query, &["ID", "UserName"])
            .unwrap();
        assert_eq!(
            sql,
            "SELECT \"user\".\"id\" AS \"ID\", \"user\".\"user_name\" AS \"UserName\" FROM \"user\" \
             WHERE (\"user\".\"user_name\" = ?1 AND \"user\".\"is_staff\" = ?2) ORDER BY \"user\".\"id\""
        );
        assert_eq!(params, vec![Value::from("jane"), Value::Bool(true)]);
    }

    #[test]
    fn test_dotted_paths_join_once() {
        let reg = registry();
        let query = Query::new()
            .filter(&Condition::leaf("User.Profile.Age", Operator::Greater, 30))
            .order_by(&["User.Profile.Money desc"]);
        let (sql, params) = renderer(&reg, "Post")
            .select(&query, &["ID", "User.Profile.Age"])
            .unwrap();
        assert_eq!(sql.matches("LEFT JOIN").count(), 2);
        assert!(sql.contains(
            "LEFT JOIN \"user\" AS \"post__user\" ON \"post__user\".\"id\" = \"post\".\"user_id\""
        ));
        assert!(sql.contains(
            "LEFT JOIN \"profile\" AS \"post__user__profile\" ON \"post__user__profile\".\"id\" = \"post__user\".\"profile_id\""
        ));
        assert!(sql.contains("WHERE \"post__user__profile\".\"age\" > ?1"));
        assert!(sql.ends_with("ORDER BY \"post__user__profile\".\"money\" DESC"));
        assert_eq!(params, vec![Value::Int(30)]);
    }

    #[test]
    fn test_related_field_selects_through_join() {
        let reg = registry();
        let (sql, _) = renderer(&reg, "User")
            .select(&Query::new(), &["ID", "Age"])
            .unwrap();
        assert!(sql.contains("\"user__profile\".\"age\" AS \"Age\""));
        assert!(sql.contains("LEFT JOIN \"profile\" AS \"user__profile\""));
    }

    #[test]
    fn test_x2many_fields_are_aggregated() {
        let reg = registry();
        let (sql, _) = renderer(&reg, "User")
            .select(&Query::new(), &["ID", "Posts"])
            .unwrap();
        assert!(sql.contains(
            "(SELECT group_concat(\"user__posts\".\"id\", '|') FROM \"post\" AS \"user__posts\" \
             WHERE \"user__posts\".\"user_id\" = \"user\".\"id\") AS \"Posts\""
        ));

        let (sql, _) = renderer(&reg, "Post")
            .select(&Query::new(), &["Tags"])
            .unwrap();
        assert!(sql.contains(
            "(SELECT group_concat(\"post_tags\".\"tag_id\", '|') FROM \"post_tags\" \
             WHERE \"post_tags\".\"post_id\" = \"post\".\"id\")"
        ));
    }

    #[test]
    fn test_null_and_empty_list_rendering() {
        let reg = registry();
        let query = Query::new().filter(
            &Condition::new()
                .and("Email", Operator::Equals, Value::Null)
                .and("Profile", Operator::NotEquals, Value::Null)
                .and("ID", Operator::In, Vec::<i64>::new())
                .or("ID", Operator::NotIn, Vec::<i64>::new()),
        );
        let (sql, params) = renderer(&reg, "User")
            .select(&query, &["ID"])
            .unwrap();
        assert!(sql.contains("\"user\".\"email\" IS NULL"));
        assert!(sql.contains("\"user\".\"profile_id\" IS NOT NULL"));
        assert!(sql.contains("1=0"));
        assert!(sql.contains("1=1"));
        assert!(params.is_empty());
    }

    #[test]
    fn test_like_wraps_value_and_not_nests() {
        let reg = registry();
        let query = Query::new().filter(
            &Condition::new()
                .and("UserName", Operator::ILike, "an")
                .and_not("Email", Operator::Like, "spam"),
        );
        let (sql, params) = QueryRenderer::new(&reg, "User", Dialect::Postgres)
            .unwrap()
            .select(&query, &["ID"])
            .unwrap();
        assert!(sql.contains("\"user\".\"user_name\" ILIKE $1"));
        assert!(sql.contains("NOT (\"user\".\"email\" LIKE $2)"));
        assert_eq!(params, vec![Value::from("%an%"), Value::from("%spam%")]);
    }

    #[test]
    fn test_x2many_filter() {
        let reg = registry();
        let query = Query::new().filter(&Condition::leaf("Tags", Operator::In, vec![1_i64, 2]));
        let (sql, params) = renderer(&reg, "Post").select(&query, &["ID"]).unwrap();
        assert!(sql.contains(
            "WHERE \"post\".\"id\" IN (SELECT \"post_id\" FROM \"post_tags\" WHERE \"tag_id\" IN (?1, ?2))"
        ));
        assert_eq!(params.len(), 2);

        let bad = Query::new().filter(&Condition::leaf("Tags", Operator::Greater, 1));
        assert!(matches!(
            renderer(&reg, "Post").select(&bad, &["ID"]),
            Err(Error::InvalidOperator(_))
        ));
    }

    #[test]
    fn test_paging_and_distinct() {
        let reg = registry();
        let query = Query::new().limit(10).offset(20).distinct(true);
        let (sql, _) = renderer(&reg, "Tag").select(&query, &["Name"]).unwrap();
        assert!(sql.starts_with("SELECT DISTINCT "));
        assert!(sql.ends_with(" LIMIT 10 OFFSET 20"));
    }

    #[test]
    fn test_group_by_drops_default_order() {
        let reg = registry();
        let query = Query::new().group_by(&["Title"]);
        let (sql, _) = renderer(&reg, "Post").select(&query, &["Title"]).unwrap();
        assert!(sql.ends_with(" GROUP BY \"post\".\"title\""));
    }

    #[test]
    fn test_invalid_order_expression() {
        let reg = registry();
        let query = Query::new().order_by(&["Name; DROP TABLE tag"]);
        assert!(matches!(
            renderer(&reg, "Tag").select(&query, &["ID"]),
            Err(Error::InvalidExpression(_))
        ));
    }

    #[test]
    fn test_count_ignores_shape() {
        let reg = registry();
        let query = Query::new()
            .filter(&Condition::leaf("Name", Operator::Equals, "rust"))
            .order_by(&["Name"])
            .limit(1);
        let (sql, params) = renderer(&reg, "Tag").count(&query).unwrap();
        assert_eq!(sql, "SELECT COUNT(*) FROM \"tag\" WHERE \"tag\".\"name\" = ?1");
        assert_eq!(params, vec![Value::from("rust")]);
    }

    #[test]
    fn test_insert_skips_id_and_non_column_fields() {
        let reg = registry();
        let data = FieldMap::new()
            .with("ID", 99)
            .with("UserName", "jane")
            .with("Posts", vec![1_i64])
            .with("Age", 40)
            .with("profile_id", 3);
        let (sql, params) = renderer(&reg, "User").insert(&data).unwrap();
        assert_eq!(
            sql,
            "INSERT INTO \"user\" (\"user_name\", \"profile_id\") VALUES (?1, ?2)"
        );
        assert_eq!(params, vec![Value::from("jane"), Value::Int(3)]);

        let (sql, _) = QueryRenderer::new(&reg, "Tag", Dialect::Postgres)
            .unwrap()
            .insert(&FieldMap::new())
            .unwrap();
        assert_eq!(sql, "INSERT INTO \"tag\" DEFAULT VALUES RETURNING \"id\"");
    }

    #[test]
    fn test_insert_rejects_unknown_and_mistyped_fields() {
        let reg = registry();
        let unknown = FieldMap::new().with("Nickname", "x");
        assert!(matches!(
            renderer(&reg, "User").insert(&unknown),
            Err(Error::UnknownField { .. })
        ));
        let mistyped = FieldMap::new().with("Age", "old");
        assert!(matches!(
            renderer(&reg, "Profile").insert(&mistyped),
            Err(Error::Conversion { .. })
        ));
    }

    #[test]
    fn test_update_and_delete_are_scoped() {
        let reg = registry();
        let query = Query::for_ids(&[4, 5]);
        let data = FieldMap::new().with("Title", "new");
        let (sql, params) = renderer(&reg, "Post")
            .update(&query, &data)
            .unwrap()
            .unwrap();
        assert_eq!(
            sql,
            "UPDATE \"post\" SET \"title\" = ?1 WHERE \"post\".\"id\" IN (?2, ?3)"
        );
        assert_eq!(params, vec![Value::from("new"), Value::Int(4), Value::Int(5)]);

        assert!(renderer(&reg, "Post")
            .update(&query, &FieldMap::new().with("Tags", vec![1_i64]))
            .unwrap()
            .is_none());

        let (sql, _) = renderer(&reg, "Post").delete(&query).unwrap();
        assert_eq!(sql, "DELETE FROM \"post\" WHERE \"post\".\"id\" IN (?1, ?2)");
    }

    #[test]
    fn test_update_and_delete_require_a_condition() {
        let reg = registry();
        let everything = Query::new().limit(1);
        assert!(matches!(
            renderer(&reg, "Post").delete(&everything),
            Err(Error::InvalidExpression(_))
        ));
        assert!(matches!(
            renderer(&reg, "Post").update(&everything, &FieldMap::new().with("Title", "x")),
            Err(Error::InvalidExpression(_))
        ));
    }

    #[test]
    fn test_delete_over_dotted_path_uses_subselect() {
        let reg = registry();
        let query = Query::new().filter(&Condition::leaf("User.UserName", Operator::Equals, "x"));
        let (sql, _) = renderer(&reg, "Post").delete(&query).unwrap();
        assert!(sql.starts_with(
            "DELETE FROM \"post\" WHERE \"post\".\"id\" IN (SELECT \"post\".\"id\" FROM \"post\" LEFT JOIN"
        ));
    }

    #[test]
    fn test_many2many_link_maintenance() {
        let reg = registry();
        let r = renderer(&reg, "Post");
        let (sql, params) = r.unlink_many2many("Tags", &[1, 2]).unwrap().unwrap();
        assert_eq!(sql, "DELETE FROM \"post_tags\" WHERE \"post_id\" IN (?1, ?2)");
        assert_eq!(params.len(), 2);

        let (sql, params) = r.link_many2many("Tags", 7, &[3, 4]).unwrap().unwrap();
        assert_eq!(
            sql,
            "INSERT INTO \"post_tags\" (\"post_id\", \"tag_id\") VALUES (?1, ?2), (?3, ?4)"
        );
        assert_eq!(
            params,
            vec![Value::Int(7), Value::Int(3), Value::Int(7), Value::Int(4)]
        );
        assert!(r.link_many2many("Tags", 7, &[]).unwrap().is_none());
        assert!(r.unlink_many2many("Title", &[1]).is_err());

        let (sql, _) = r.unlink_many2many_targets("Tags", &[3]).unwrap().unwrap();
        assert_eq!(sql, "DELETE FROM \"post_tags\" WHERE \"tag_id\" IN (?1)");
    }
}
