//! View composition: root resolution, inheritance, gating, validation.

use std::collections::{BTreeMap, BTreeSet};

use serde::Serialize;
use serde_json::{json, Value};

use crate::error::CoreError;
use crate::registry::FieldType;
use crate::security::{check_access, user_groups, Operation};
use crate::store::RecordId;
use crate::transaction::Reader;
use crate::xml::{parse_xml, to_string, Element};

use super::apply::{annotate_root, apply_patches, strip_origins};
use super::branding::apply_branding;
use super::gating::gate_groups;
use super::patch::parse_patches;
use super::validate::validate_arch;
use super::view::{load_views, View, ViewMode};

/// Final architecture handed to the UI layer.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AssembledView {
    pub arch: String,
    pub model: String,
    /// Descriptors of every field named in the arch
    pub fields: BTreeMap<String, Value>,
    /// 0 for a generated default view
    pub view_id: RecordId,
}

/// Composes views for one user over one store snapshot.
pub struct ViewEngine<'a> {
    reader: Reader<'a>,
    views: BTreeMap<RecordId, View>,
    groups: BTreeSet<RecordId>,
    validate: bool,
}

impl<'a> ViewEngine<'a> {
    pub fn new(reader: Reader<'a>) -> Self {
        let groups = user_groups(&reader, reader.uid);
        Self::with_groups(reader, groups)
    }

    /// Engine for a user whose group closure is already known.
    pub fn with_groups(reader: Reader<'a>, groups: BTreeSet<RecordId>) -> Self {
        Self {
            views: load_views(reader.store),
            groups,
            reader,
            validate: true,
        }
    }

    pub fn with_validation(mut self, validate: bool) -> Self {
        self.validate = validate;
        self
    }

    /// Groups of the engine's user, closed over implication.
    pub fn user_groups(&self) -> &BTreeSet<RecordId> {
        &self.groups
    }

    pub fn view(&self, id: RecordId) -> Result<&View, CoreError> {
        self.views.get(&id).ok_or_else(|| CoreError::RecordNotFound {
            model: super::view::VIEW_MODEL.to_string(),
            id,
        })
    }

    /// Primary view reached from `id` by following extension parents.
    pub fn root_of(&self, id: RecordId) -> Result<&View, CoreError> {
        let mut visited = BTreeSet::new();
        let mut current = self.view(id)?;
        while current.mode == ViewMode::Extension {
            if !visited.insert(current.id) {
                return Err(self.cycle(&visited));
            }
            let Some(parent) = current.inherit_id else { break };
            current = self.view(parent)?;
        }
        Ok(current)
    }

    /// Active extensions of `parent` on `model` visible to the user,
    /// ordered by (priority, id).
    pub fn extensions_of(&self, parent: RecordId, model: &str) -> Vec<&View> {
        let mut children: Vec<&View> = self
            .views
            .values()
            .filter(|v| {
                v.inherit_id == Some(parent)
                    && v.mode == ViewMode::Extension
                    && v.active
                    && v.model == model
                    && self.visible(v)
            })
            .collect();
        children.sort_by_key(|v| v.sort_key());
        children
    }

    /// Every view inheriting transitively from `root`, whatever its state.
    pub fn inheritance_closure(&self, root: RecordId) -> BTreeSet<RecordId> {
        let mut closure = BTreeSet::from([root]);
        let mut stack = vec![root];
        while let Some(id) = stack.pop() {
            for view in self.views.values() {
                if view.inherit_id == Some(id) && closure.insert(view.id) {
                    stack.push(view.id);
                }
            }
        }
        closure
    }

    fn visible(&self, view: &View) -> bool {
        view.groups.is_empty() || view.groups.iter().any(|g| self.groups.contains(g))
    }

    /// Composes the root of `view_id` with every applicable extension. The
    /// returned tree still carries origin markers.
    pub fn compose_with_origins(&self, view_id: RecordId) -> Result<Element, CoreError> {
        let root = self.root_of(view_id)?;
        let mut stack = BTreeSet::new();
        self.compose_primary(root, &mut stack).map_err(|e| {
            tracing::error!(view = %root.label(), error = %e, "view composition failed");
            e
        })
    }

    fn compose_primary(&self, view: &View, stack: &mut BTreeSet<RecordId>) -> Result<Element, CoreError> {
        if !stack.insert(view.id) {
            return Err(self.cycle(stack));
        }
        let mut tree = match view.inherit_id {
            Some(parent) => {
                let parent_root = self.root_of(parent)?;
                let mut tree = self.compose_primary(parent_root, stack)?;
                let arch = parse_xml(&view.arch, &view.label())?;
                apply_patches(&mut tree, &parse_patches(&arch, &view.label())?, view)?;
                tree
            }
            None => {
                let mut tree = parse_xml(&view.arch, &view.label())?;
                annotate_root(&mut tree, view.id);
                tree
            }
        };
        self.apply_extensions(&mut tree, view, &view.model, stack)?;
        stack.remove(&view.id);
        Ok(tree)
    }

    /// Applies the extensions of `parent` depth-first: each extension's own
    /// extensions right after it.
    fn apply_extensions(
        &self,
        tree: &mut Element,
        parent: &View,
        model: &str,
        stack: &mut BTreeSet<RecordId>,
    ) -> Result<(), CoreError> {
        for child in self.extensions_of(parent.id, model) {
            if !stack.insert(child.id) {
                return Err(self.cycle(stack));
            }
            let arch = parse_xml(&child.arch, &child.label())?;
            let patches = parse_patches(&arch, &child.label())?;
            apply_patches(tree, &patches, child)?;
            self.apply_extensions(tree, child, model, stack)?;
            stack.remove(&child.id);
        }
        Ok(())
    }

    fn cycle(&self, ids: &BTreeSet<RecordId>) -> CoreError {
        CoreError::CyclicDependency {
            kind: "views",
            members: ids
                .iter()
                .map(|id| self.views.get(id).map(View::label).unwrap_or_else(|| id.to_string()))
                .collect(),
        }
    }

    /// Lowest (priority, id) active primary view without parent.
    pub fn default_view(&self, model: &str, view_type: &str) -> Option<&View> {
        self.views
            .values()
            .filter(|v| {
                v.model == model
                    && v.view_type == view_type
                    && v.active
                    && v.mode == ViewMode::Primary
                    && v.inherit_id.is_none()
            })
            .min_by_key(|v| v.sort_key())
    }

    /// Composes, gates and validates a view for the engine's user.
    ///
    /// # Arguments
    /// * `view_id` - any view; extensions resolve to their primary root
    /// * `branding` - annotate elements with their origin
    ///
    /// # Returns
    /// The assembled view, `AccessDenied` when the user may not read the
    /// model or see the root view.
    pub fn assemble(&self, view_id: RecordId, branding: bool) -> Result<AssembledView, CoreError> {
        let root = self.root_of(view_id)?;
        if !self.visible(root) {
            return Err(CoreError::AccessDenied {
                message: format!("view {} is restricted to other groups", root.label()),
            });
        }
        self.require_read(&root.model)?;
        let mut tree = self.compose_with_origins(view_id)?;
        if branding {
            apply_branding(&mut tree);
        }
        self.finish(tree, &root.model, &root.view_type, &root.label(), root.id)
    }

    /// Assembles the default view of `model`, generating one when the model
    /// has none of that type.
    pub fn assemble_default(&self, model: &str, view_type: &str, branding: bool) -> Result<AssembledView, CoreError> {
        if let Some(view) = self.default_view(model, view_type) {
            return self.assemble(view.id, branding);
        }
        self.require_read(model)?;
        let tree = self.generated_arch(model, view_type)?;
        let label = format!("{} default {} view", model, view_type);
        self.finish(tree, model, view_type, &label, 0)
    }

    fn require_read(&self, model: &str) -> Result<(), CoreError> {
        self.reader.registry.model(model)?;
        if check_access(&self.reader, model, self.reader.uid, Operation::Read) {
            return Ok(());
        }
        Err(CoreError::AccessDenied {
            message: format!("user {} may not read '{}'", self.reader.uid, model),
        })
    }

    fn finish(
        &self,
        mut tree: Element,
        model: &str,
        view_type: &str,
        label: &str,
        view_id: RecordId,
    ) -> Result<AssembledView, CoreError> {
        gate_groups(&mut tree, &self.reader, &self.groups, model)?;
        strip_origins(&mut tree);
        if self.validate {
            validate_arch(&tree, model, view_type, self.reader.registry, self.reader.store, label).map_err(|e| {
                tracing::error!(view = label, error = %e, "composed view is invalid");
                e
            })?;
        }
        let fields = self.field_descriptors(&tree, model);
        Ok(AssembledView {
            arch: to_string(&tree),
            model: model.to_string(),
            fields,
            view_id,
        })
    }

    /// Descriptors of the fields named in `el`, with the fields of nested
    /// subviews under `views`.
    fn field_descriptors(&self, el: &Element, model: &str) -> BTreeMap<String, Value> {
        let mut fields = BTreeMap::new();
        self.collect_fields(el, model, &mut fields);
        fields
    }

    fn collect_fields(&self, el: &Element, model: &str, out: &mut BTreeMap<String, Value>) {
        for child in el.child_elements() {
            if child.tag != "field" {
                self.collect_fields(child, model, out);
                continue;
            }
            let Some(field) = child.attr("name").and_then(|n| self.reader.registry.field(model, n).ok()) else {
                continue;
            };
            let mut desc = field.describe();
            if let Some(comodel) = &field.comodel {
                let mut views = serde_json::Map::new();
                for sub in child.child_elements() {
                    let sub_fields = self.field_descriptors(sub, comodel);
                    views.insert(sub.tag.clone(), json!({ "fields": sub_fields }));
                }
                if !views.is_empty() {
                    desc["views"] = Value::Object(views);
                }
            }
            out.insert(field.name.clone(), desc);
        }
    }

    fn generated_arch(&self, model: &str, view_type: &str) -> Result<Element, CoreError> {
        let model_desc = self.reader.registry.model(model)?;
        let visible_fields = || {
            model_desc
                .ordered_fields()
                .filter(|f| f.store && f.groups.is_empty() && !f.inherited)
        };
        let field = |name: &str| Element::new("field").with_attr("name", name);
        Ok(match view_type {
            "form" => {
                let mut group = Element::new("group");
                for f in visible_fields() {
                    group = group.with_child(field(&f.name));
                }
                Element::new("form").with_child(Element::new("sheet").with_child(group))
            }
            "list" => {
                let mut list = Element::new("list");
                match model_desc.display_field() {
                    Some(name) => list = list.with_child(field(name)),
                    None => {
                        for f in visible_fields().filter(|f| f.field_type == FieldType::Char) {
                            list = list.with_child(field(&f.name));
                        }
                    }
                }
                list
            }
            "search" => {
                let mut search = Element::new("search");
                for f in visible_fields().filter(|f| f.field_type == FieldType::Char) {
                    search = search.with_child(field(&f.name));
                }
                search
            }
            other => {
                return Err(CoreError::ValidationError {
                    view: format!("{} default view", model),
                    message: format!("no default '{}' view can be generated", other),
                })
            }
        })
    }
}
