//! The finalized model registry.
//!
//! Models are declared with [`ModelInfo`] and handed to a
//! [`RegistryBuilder`]. [`RegistryBuilder::finalize`] checks every relation,
//! resolves related fields and link tables, rejects dependency cycles and
//! precomputes the reverse dependency map used to keep stored computed
//! fields up to date. The resulting [`Registry`] is immutable and meant to be
//! shared as `Arc<Registry>`.

use std::collections::{BTreeMap, HashMap, HashSet};

use crate::error::{Error, Result};
use crate::field::{FieldInfo, FieldType, LinkTable};
use crate::identifiers::{is_valid_identifier, is_valid_path, snake_case};

/// Name of the identifier field every model carries.
pub const ID_FIELD: &str = "ID";

/// Column of the identifier field.
pub const ID_COLUMN: &str = "id";

/// Metadata for one model.
#[derive(Debug, Clone)]
pub struct ModelInfo {
    name: String,
    table: String,
    fields: Vec<FieldInfo>,
}

impl ModelInfo {
    /// Declare a model. The table defaults to the snake-case name and the
    /// `ID` field is added automatically.
    pub fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            table: snake_case(&name),
            fields: vec![FieldInfo::integer(ID_FIELD).column(ID_COLUMN)],
            name,
        }
    }

    /// Set the table name.
    pub fn table(mut self, table: impl Into<String>) -> Self {
        self.table = table.into();
        self
    }

    /// Add a field.
    pub fn field(mut self, field: FieldInfo) -> Self {
        self.fields.push(field);
        self
    }

    /// Model name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Table name.
    pub fn table_name(&self) -> &str {
        &self.table
    }

    /// All fields, `ID` first.
    pub fn fields(&self) -> &[FieldInfo] {
        &self.fields
    }

    /// Look a field up by declared or column name.
    pub fn find_field(&self, name: &str) -> Option<&FieldInfo> {
        self.fields.iter().find(|f| f.answers_to(name))
    }

    /// Look a field up, failing loudly when it does not exist.
    pub fn field_info(&self, name: &str) -> Result<&FieldInfo> {
        self.find_field(name).ok_or_else(|| {
            tracing::error!(model = %self.name, field = name, "Unknown field in model");
            Error::unknown_field(&self.name, name)
        })
    }

    /// Declared names of every field, `ID` first.
    pub fn field_names(&self) -> Vec<String> {
        self.fields.iter().map(|f| f.name.clone()).collect()
    }
}

/// A stored computed field to recompute when a dependency changes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Trigger {
    /// Model owning the computed field.
    pub model: String,
    /// The stored computed field.
    pub field: String,
    /// Many-to-one path from `model` to the changed records, `None` when the
    /// dependency is a field of the same record.
    pub path: Option<String>,
    /// True for stored computed fields, which must be recomputed and
    /// persisted. Other triggers only make cached values stale.
    pub stored: bool,
}

/// One hop of a resolved path.
#[derive(Debug, Clone, Copy)]
pub struct PathStep<'a> {
    /// Model the field belongs to.
    pub model: &'a ModelInfo,
    /// The field.
    pub field: &'a FieldInfo,
}

/// Collects model declarations until [`finalize`](Self::finalize).
#[derive(Debug, Default)]
pub struct RegistryBuilder {
    models: Vec<ModelInfo>,
}

impl RegistryBuilder {
    /// Create an empty builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a model declaration.
    pub fn model(mut self, model: ModelInfo) -> Self {
        self.models.push(model);
        self
    }

    /// Validate declarations and build the immutable registry.
    pub fn finalize(self) -> Result<Registry> {
        let mut models = BTreeMap::new();
        for model in self.models {
            check_model(&model)?;
            let name = model.name.clone();
            if models.insert(name.clone(), model).is_some() {
                return Err(Error::Registry(format!("model `{name}` declared twice")));
            }
        }

        let mut registry = Registry {
            models,
            triggers: HashMap::new(),
        };
        registry.resolve_relations()?;
        registry.resolve_related_fields()?;
        registry.check_cycles()?;
        registry.build_triggers()?;

        tracing::debug!(
            models = registry.models.len(),
            triggers = registry.triggers.values().map(Vec::len).sum::<usize>(),
            "Model registry finalized"
        );
        Ok(registry)
    }
}

fn check_model(model: &ModelInfo) -> Result<()> {
    if !is_valid_identifier(&model.name) || !is_valid_identifier(&model.table) {
        return Err(Error::Registry(format!(
            "invalid model or table name `{}`/`{}`",
            model.name, model.table
        )));
    }
    let mut seen = HashSet::new();
    for field in &model.fields {
        if !is_valid_identifier(&field.name) || !is_valid_identifier(&field.column) {
            return Err(Error::Registry(format!(
                "invalid field name `{}` in model `{}`",
                field.name, model.name
            )));
        }
        if !seen.insert(field.name.as_str()) {
            return Err(Error::Registry(format!(
                "field `{}` declared twice in model `{}`",
                field.name, model.name
            )));
        }
    }
    Ok(())
}

/// Immutable, finalized model metadata.
#[derive(Debug)]
pub struct Registry {
    models: BTreeMap<String, ModelInfo>,
    triggers: HashMap<(String, String), Vec<Trigger>>,
}

impl Registry {
    /// Start declaring models.
    pub fn builder() -> RegistryBuilder {
        RegistryBuilder::new()
    }

    /// Look a model up, failing loudly when it does not exist.
    pub fn get(&self, model: &str) -> Result<&ModelInfo> {
        self.models.get(model).ok_or_else(|| {
            tracing::error!(model, "Unknown model");
            Error::UnknownModel {
                model: model.to_string(),
            }
        })
    }

    /// True if the model is declared.
    pub fn contains(&self, model: &str) -> bool {
        self.models.contains_key(model)
    }

    /// Names of all models.
    pub fn model_names(&self) -> impl Iterator<Item = &str> {
        self.models.keys().map(String::as_str)
    }

    /// Resolve a dotted path from `model`. Every hop but the last must be a
    /// many-to-one field.
    pub fn resolve_path<'a>(&'a self, model: &str, path: &str) -> Result<Vec<PathStep<'a>>> {
        let invalid = |reason: String| Error::InvalidPath {
            model: model.to_string(),
            path: path.to_string(),
            reason,
        };
        if !is_valid_path(path) {
            return Err(invalid("not a dotted identifier path".to_string()));
        }
        let mut current = self.get(model)?;
        let mut steps = Vec::new();
        let segments: Vec<&str> = path.split('.').collect();
        for (i, segment) in segments.iter().enumerate() {
            let field = current.field_info(segment)?;
            steps.push(PathStep {
                model: current,
                field,
            });
            if i + 1 < segments.len() {
                match &field.field_type {
                    FieldType::Many2One { model: target } if field.related.is_none() => {
                        current = self.get(target)?;
                    }
                    _ => {
                        return Err(invalid(format!(
                            "`{segment}` is not a many-to-one field and cannot be traversed"
                        )));
                    }
                }
            }
        }
        Ok(steps)
    }

    /// Computed and related fields affected when `field` of `model` changes.
    pub fn triggers(&self, model: &str, field: &str) -> &[Trigger] {
        self.triggers
            .get(&(model.to_string(), field.to_string()))
            .map_or(&[], Vec::as_slice)
    }

    /// Fields of any model whose cached value mirrors rows of `model`
    /// through a relation: one-to-many fields whose reverse lives in `model`,
    /// and many-to-many fields targeting `model`.
    pub fn referencing_fields(&self, model: &str) -> Vec<(String, String)> {
        let mut out = Vec::new();
        for other in self.models.values() {
            for field in &other.fields {
                if field.field_type.is_x2many() && field.field_type.relation_model() == Some(model)
                {
                    out.push((other.name.clone(), field.name.clone()));
                }
            }
        }
        out
    }

    /// One-to-many fields mirroring the many-to-one `field` of `model`.
    pub fn inverse_one2many(&self, model: &str, field: &str) -> Vec<(String, String)> {
        let mut out = Vec::new();
        for other in self.models.values() {
            for candidate in &other.fields {
                if let FieldType::One2Many {
                    model: target,
                    reverse_field,
                } = &candidate.field_type
                {
                    if target == model && reverse_field == field {
                        out.push((other.name.clone(), candidate.name.clone()));
                    }
                }
            }
        }
        out
    }

    fn resolve_relations(&mut self) -> Result<()> {
        let names: HashSet<String> = self.models.keys().cloned().collect();
        let snapshot = self.models.clone();
        for model in self.models.values_mut() {
            let owner = model.name.clone();
            for field in &mut model.fields {
                let Some(target) = field.field_type.relation_model().map(str::to_string) else {
                    continue;
                };
                if !names.contains(&target) {
                    return Err(Error::Registry(format!(
                        "field `{owner}.{}` targets unknown model `{target}`",
                        field.name
                    )));
                }
                match &mut field.field_type {
                    FieldType::One2Many { reverse_field, .. } => {
                        let reverse = snapshot[&target].find_field(reverse_field);
                        let points_back = reverse.is_some_and(|r| {
                            matches!(&r.field_type, FieldType::Many2One { model } if *model == owner)
                        });
                        if !points_back {
                            return Err(Error::Registry(format!(
                                "field `{owner}.{}`: `{target}.{reverse_field}` is not a many-to-one to `{owner}`",
                                field.name
                            )));
                        }
                    }
                    FieldType::Many2Many { link, .. } if link.is_none() => {
                        if target == owner {
                            return Err(Error::Registry(format!(
                                "field `{owner}.{}` relates a model to itself and needs an explicit link table",
                                field.name
                            )));
                        }
                        *link = Some(default_link_table(&owner, &target));
                    }
                    _ => {}
                }
            }
        }
        Ok(())
    }

    fn resolve_related_fields(&mut self) -> Result<()> {
        let mut resolved = Vec::new();
        for model in self.models.values() {
            for field in &model.fields {
                let Some(path) = &field.related else { continue };
                let steps = self.resolve_path(&model.name, path)?;
                let target = steps
                    .last()
                    .map(|s| s.field)
                    .ok_or_else(|| Error::Registry(format!("empty related path on `{}`", field.name)))?;
                if target.related.is_some() || (target.compute.is_some() && !target.stored) {
                    return Err(Error::Registry(format!(
                        "related field `{}.{}` must point to a retrievable field",
                        model.name, field.name
                    )));
                }
                resolved.push((model.name.clone(), field.name.clone(), target.field_type.clone()));
            }
        }
        for (model, field, field_type) in resolved {
            if let Some(model) = self.models.get_mut(&model) {
                if let Some(info) = model.fields.iter_mut().find(|f| f.name == field) {
                    info.field_type = field_type;
                }
            }
        }
        Ok(())
    }

    /// Dependency paths of a computed or related field, with non-stored
    /// computed and related dependencies replaced by their own paths.
    fn expanded_depends(&self, model: &str, field: &FieldInfo) -> Result<Vec<String>> {
        let direct = match &field.related {
            Some(path) => vec![path.clone()],
            None => field.depends.clone(),
        };
        let mut out = Vec::new();
        for dep in direct {
            let steps = self.resolve_path(model, &dep)?;
            out.push(dep);
            let Some((last, hops)) = steps.split_last() else {
                continue;
            };
            let derived = last.field.compute.is_some() || last.field.related.is_some();
            if derived && !last.field.stored {
                let prefix: Vec<&str> = hops.iter().map(|s| s.field.name.as_str()).collect();
                for inner in self.expanded_depends(&last.model.name, last.field)? {
                    out.push(if prefix.is_empty() {
                        inner
                    } else {
                        format!("{}.{inner}", prefix.join("."))
                    });
                }
            }
        }
        Ok(out)
    }

    fn build_triggers(&mut self) -> Result<()> {
        let mut triggers: HashMap<(String, String), Vec<Trigger>> = HashMap::new();
        for model in self.models.values() {
            for field in &model.fields {
                if field.compute.is_none() && field.related.is_none() {
                    continue;
                }
                for dep in self.expanded_depends(&model.name, field)? {
                    let steps = self.resolve_path(&model.name, &dep)?;
                    // Every hop of the path is a dependency: changing
                    // `Profile` on a user matters as much as changing `Age`
                    // on the profile.
                    for (i, step) in steps.iter().enumerate() {
                        let path = (i > 0).then(|| {
                            steps[..i]
                                .iter()
                                .map(|s| s.field.name.as_str())
                                .collect::<Vec<_>>()
                                .join(".")
                        });
                        let trigger = Trigger {
                            model: model.name.clone(),
                            field: field.name.clone(),
                            path,
                            stored: field.stored && field.compute.is_some(),
                        };
                        let entry = triggers
                            .entry((step.model.name.clone(), step.field.name.clone()))
                            .or_default();
                        if !entry.contains(&trigger) {
                            entry.push(trigger);
                        }
                    }
                }
            }
        }
        self.triggers = triggers;
        Ok(())
    }

    fn check_cycles(&self) -> Result<()> {
        let mut visiting = HashSet::new();
        let mut done = HashSet::new();
        for model in self.models.values() {
            for field in &model.fields {
                if field.compute.is_some() {
                    self.visit(
                        (model.name.clone(), field.name.clone()),
                        &mut visiting,
                        &mut done,
                    )?;
                }
            }
        }
        Ok(())
    }

    // Edge: computed field -> computed field it depends on.
    fn visit(
        &self,
        node: (String, String),
        visiting: &mut HashSet<(String, String)>,
        done: &mut HashSet<(String, String)>,
    ) -> Result<()> {
        if done.contains(&node) {
            return Ok(());
        }
        if !visiting.insert(node.clone()) {
            return Err(Error::Registry(format!(
                "dependency cycle through `{}.{}`",
                node.0, node.1
            )));
        }
        let model = self.get(&node.0)?;
        let field = model.field_info(&node.1)?;
        for dep in &field.depends {
            let steps = self.resolve_path(&node.0, dep)?;
            if let Some(last) = steps.last() {
                if last.field.compute.is_some() {
                    self.visit(
                        (last.model.name.clone(), last.field.name.clone()),
                        visiting,
                        done,
                    )?;
                }
            }
        }
        visiting.remove(&node);
        done.insert(node);
        Ok(())
    }
}

/// Link table used when a many-to-many field does not name one: both table
/// names in alphabetical order, suffixed with `_rel`.
pub fn default_link_table(owner: &str, target: &str) -> LinkTable {
    let (a, b) = (snake_case(owner), snake_case(target));
    let table = if a <= b {
        format!("{a}_{b}_rel")
    } else {
        format!("{b}_{a}_rel")
    };
    LinkTable::new(table, format!("{a}_id"), format!("{b}_id"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::Value;

    fn blog() -> RegistryBuilder {
        Registry::builder()
            .model(
                ModelInfo::new("User")
                    .field(FieldInfo::text("UserName"))
                    .field(FieldInfo::many2one("Profile", "Profile"))
                    .field(FieldInfo::one2many("Posts", "Post", "User"))
                    .field(FieldInfo::related("Age", "Profile.Age"))
                    .field(
                        FieldInfo::integer("Decorated")
                            .compute(&["Profile.Age"], |m| {
                                Ok(m.get("Profile.Age").cloned().unwrap_or(Value::Null))
                            })
                            .stored(true),
                    ),
            )
            .model(ModelInfo::new("Profile").field(FieldInfo::integer("Age")))
            .model(
                ModelInfo::new("Post")
                    .field(FieldInfo::text("Title"))
                    .field(FieldInfo::many2one("User", "User"))
                    .field(FieldInfo::many2many("Tags", "Tag")),
            )
            .model(ModelInfo::new("Tag").field(FieldInfo::text("Name")))
    }

    #[test]
    fn test_finalize_resolves_metadata() {
        let registry = blog().finalize().unwrap();
        let user = registry.get("User").unwrap();
        assert_eq!(user.table_name(), "user");
        assert_eq!(user.field_info("user_name").unwrap().name, "UserName");
        assert_eq!(user.field_info("Age").unwrap().field_type, FieldType::Integer);

        let post = registry.get("Post").unwrap();
        match &post.field_info("Tags").unwrap().field_type {
            FieldType::Many2Many { link: Some(link), .. } => {
                assert_eq!(link.table, "post_tag_rel");
                assert_eq!(link.local_column, "post_id");
                assert_eq!(link.remote_column, "tag_id");
            }
            other => panic!("unexpected type {other:?}"),
        }
    }

    #[test]
    fn test_reverse_dependencies() {
        let registry = blog().finalize().unwrap();
        let triggers = registry.triggers("Profile", "Age");
        assert!(triggers.contains(&Trigger {
            model: "User".into(),
            field: "Decorated".into(),
            path: Some("Profile".into()),
            stored: true,
        }));
        assert!(triggers.contains(&Trigger {
            model: "User".into(),
            field: "Age".into(),
            path: Some("Profile".into()),
            stored: false,
        }));
        let hop = registry.triggers("User", "Profile");
        assert!(hop.iter().any(|t| t.field == "Decorated" && t.path.is_none()));
        assert!(registry.triggers("User", "UserName").is_empty());
    }

    #[test]
    fn test_non_stored_dependencies_are_expanded() {
        let registry = Registry::builder()
            .model(
                ModelInfo::new("Item")
                    .field(FieldInfo::integer("Qty"))
                    .field(FieldInfo::integer("Twice").compute(&["Qty"], |_| Ok(Value::Null)))
                    .field(
                        FieldInfo::integer("Total")
                            .compute(&["Twice"], |_| Ok(Value::Null))
                            .stored(true),
                    ),
            )
            .finalize()
            .unwrap();
        let triggers = registry.triggers("Item", "Qty");
        assert!(triggers.iter().any(|t| t.field == "Total" && t.stored));
        assert!(triggers.iter().any(|t| t.field == "Twice" && !t.stored));
    }

    #[test]
    fn test_inverse_one2many() {
        let registry = blog().finalize().unwrap();
        assert_eq!(
            registry.inverse_one2many("Post", "User"),
            vec![("User".to_string(), "Posts".to_string())]
        );
        assert!(registry.inverse_one2many("Post", "Title").is_empty());
    }

    #[test]
    fn test_resolve_path() {
        let registry = blog().finalize().unwrap();
        let steps = registry.resolve_path("Post", "User.Profile.Age").unwrap();
        assert_eq!(steps.len(), 3);
        assert_eq!(steps[2].model.name(), "Profile");

        let err = registry.resolve_path("Post", "Title.Foo").unwrap_err();
        assert!(matches!(err, Error::InvalidPath { .. }));
        assert!(matches!(
            registry.resolve_path("Post", "User.Nope"),
            Err(Error::UnknownField { model, .. }) if model == "User"
        ));
    }

    #[test]
    fn test_unknown_relation_target_is_rejected() {
        let err = Registry::builder()
            .model(ModelInfo::new("Post").field(FieldInfo::many2one("User", "User")))
            .finalize()
            .unwrap_err();
        assert!(matches!(err, Error::Registry(_)));
    }

    #[test]
    fn test_dependency_cycle_is_rejected() {
        let err = Registry::builder()
            .model(
                ModelInfo::new("Loop")
                    .field(FieldInfo::integer("A").compute(&["B"], |_| Ok(Value::Null)).stored(true))
                    .field(FieldInfo::integer("B").compute(&["A"], |_| Ok(Value::Null)).stored(true)),
            )
            .finalize()
            .unwrap_err();
        assert!(err.to_string().contains("cycle"));
    }

    #[test]
    fn test_referencing_fields() {
        let registry = blog().finalize().unwrap();
        assert_eq!(
            registry.referencing_fields("Post"),
            vec![("User".to_string(), "Posts".to_string())]
        );
        assert_eq!(
            registry.referencing_fields("Tag"),
            vec![("Post".to_string(), "Tags".to_string())]
        );
    }

    #[test]
    fn test_unknown_model() {
        let registry = blog().finalize().unwrap();
        assert!(matches!(registry.get("Nope"), Err(Error::UnknownModel { .. })));
    }
}
