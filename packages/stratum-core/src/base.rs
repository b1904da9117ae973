//! The `base` module: meta models, views, groups, users and access rules.
//!
//! Every database installs it first. Its models describe the registry itself
//! (`ir.model*`), hold view definitions and carry the security tables.

use serde_json::json;

use crate::module::{Module, BASE_MODULE};
use crate::registry::{FieldDecl, ModelDecl, OnDelete};

const BASE_DATA: &str = include_str!("../data/base_data.xml");

/// Selection of view types.
pub const VIEW_TYPES: &[(&str, &str)] = &[
    ("form", "Form"),
    ("list", "List"),
    ("kanban", "Kanban"),
    ("search", "Search"),
    ("graph", "Graph"),
    ("pivot", "Pivot"),
    ("calendar", "Calendar"),
    ("qweb", "QWeb"),
];

/// Builds the base module.
pub fn base_module() -> Module {
    Module::new(BASE_MODULE)
        .with_model(ir_model())
        .with_model(ir_model_fields())
        .with_model(ir_model_fields_selection())
        .with_model(ir_model_constraint())
        .with_model(ir_model_relation())
        .with_model(ir_ui_view())
        .with_model(ir_actions_act_window())
        .with_model(res_groups())
        .with_model(res_users())
        .with_model(ir_model_access())
        .with_model(ir_rule())
        .with_data("data/base_data.xml", BASE_DATA)
}

fn ir_model() -> ModelDecl {
    ModelDecl::new("ir.model")
        .description("Models")
        .order("model")
        .field(FieldDecl::char("name").string("Model Description").required(true))
        .field(FieldDecl::char("model").required(true).index(true))
        .field(FieldDecl::text("info"))
        .field(FieldDecl::char("order"))
        .field(FieldDecl::char("modules").readonly(true))
        .field(FieldDecl::one2many("field_id", "ir.model.fields", "model_id"))
        .sql_constraint("obj_name_uniq", "unique(model)", "Each model must have a unique name.")
}

fn ir_model_fields() -> ModelDecl {
    ModelDecl::new("ir.model.fields")
        .description("Fields")
        .order("model, name")
        .field(
            FieldDecl::many2one("model_id", "ir.model")
                .required(true)
                .index(true)
                .ondelete(OnDelete::Cascade),
        )
        .field(FieldDecl::char("model").required(true))
        .field(FieldDecl::char("name").required(true).index(true))
        .field(FieldDecl::char("field_description"))
        .field(FieldDecl::char("help"))
        .field(FieldDecl::char("ttype").string("Field Type").required(true))
        .field(FieldDecl::char("relation").string("Related Model"))
        .field(FieldDecl::char("relation_field"))
        .field(FieldDecl::char("relation_table"))
        .field(FieldDecl::char("related"))
        .field(FieldDecl::char("depends"))
        .field(FieldDecl::char("compute"))
        .field(FieldDecl::char("groups"))
        .field(FieldDecl::boolean("store").default(json!(true)))
        .field(FieldDecl::boolean("required"))
        .field(FieldDecl::boolean("readonly"))
        .field(FieldDecl::boolean("index"))
        .field(FieldDecl::boolean("translate"))
        .field(FieldDecl::selection(
            "on_delete",
            &[("cascade", "Cascade"), ("set null", "Set NULL"), ("restrict", "Restrict")],
        ))
        .field(FieldDecl::char("modules").readonly(true))
        .field(FieldDecl::one2many("selection_ids", "ir.model.fields.selection", "field_id"))
        .sql_constraint("name_unique", "unique(model, name)", "Field names must be unique per model.")
}

fn ir_model_fields_selection() -> ModelDecl {
    ModelDecl::new("ir.model.fields.selection")
        .description("Fields Selection")
        .order("sequence, id")
        .field(
            FieldDecl::many2one("field_id", "ir.model.fields")
                .required(true)
                .ondelete(OnDelete::Cascade),
        )
        .field(FieldDecl::char("value").required(true))
        .field(FieldDecl::char("name").required(true))
        .field(FieldDecl::integer("sequence").default(json!(1000)))
        .sql_constraint(
            "selection_field_uniq",
            "unique(field_id, value)",
            "Selections values must be unique per field",
        )
}

fn ir_model_constraint() -> ModelDecl {
    ModelDecl::new("ir.model.constraint")
        .description("Model Constraint")
        .field(FieldDecl::char("name").string("Constraint").required(true))
        .field(
            FieldDecl::many2one("model", "ir.model")
                .required(true)
                .ondelete(OnDelete::Cascade),
        )
        .field(FieldDecl::char("module").required(true))
        .field(FieldDecl::selection("type", &[("f", "Foreign Key"), ("u", "Unique"), ("c", "Check")]))
        .field(FieldDecl::text("definition"))
        .field(FieldDecl::text("message"))
        .sql_constraint(
            "module_name_uniq",
            "unique(name, module)",
            "Constraints with the same name are unique per module.",
        )
}

fn ir_model_relation() -> ModelDecl {
    ModelDecl::new("ir.model.relation")
        .description("Relation Model")
        .field(FieldDecl::char("name").string("Relation Name").required(true))
        .field(
            FieldDecl::many2one("model", "ir.model")
                .required(true)
                .ondelete(OnDelete::Cascade),
        )
        .field(FieldDecl::char("module").required(true))
}

fn ir_ui_view() -> ModelDecl {
    ModelDecl::new("ir.ui.view")
        .description("View")
        .order("priority, name, id")
        .field(FieldDecl::char("name").string("View Name").required(true))
        .field(FieldDecl::char("model").index(true))
        .field(FieldDecl::char("key"))
        .field(FieldDecl::integer("priority").default(json!(16)).required(true))
        .field(FieldDecl::selection("type", VIEW_TYPES).string("View Type"))
        .field(FieldDecl::text("arch").string("View Architecture"))
        .field(
            FieldDecl::many2one("inherit_id", "ir.ui.view")
                .string("Inherited View")
                .index(true)
                .ondelete(OnDelete::Cascade),
        )
        .field(FieldDecl::one2many("inherit_children_ids", "ir.ui.view", "inherit_id"))
        .field(
            FieldDecl::selection("mode", &[("primary", "Base view"), ("extension", "Extension View")])
                .default(json!("primary"))
                .required(true),
        )
        .field(FieldDecl::boolean("active").default(json!(true)))
        .field(
            FieldDecl::many2many("groups_id", "res.groups")
                .relation_table("ir_ui_view_group_rel")
                .string("Groups"),
        )
}

fn ir_actions_act_window() -> ModelDecl {
    ModelDecl::new("ir.actions.act_window")
        .description("Action Window")
        .field(FieldDecl::char("name").required(true))
        .field(FieldDecl::char("res_model").required(true))
        .field(FieldDecl::char("view_mode").default(json!("list,form")))
        .field(FieldDecl::many2one("view_id", "ir.ui.view").ondelete(OnDelete::SetNull))
        .field(FieldDecl::text("domain"))
        .field(FieldDecl::text("context").default(json!("{}")))
}

fn res_groups() -> ModelDecl {
    ModelDecl::new("res.groups")
        .description("Access Groups")
        .order("name")
        .field(FieldDecl::char("name").required(true).translate(true))
        .field(FieldDecl::text("comment"))
        .field(
            FieldDecl::many2many("implied_ids", "res.groups")
                .relation_table("res_groups_implied_rel")
                .string("Inherits")
                .help("Users of this group automatically inherit those groups"),
        )
        .sql_constraint("name_uniq", "unique(name)", "The name of the group must be unique!")
}

fn res_users() -> ModelDecl {
    ModelDecl::new("res.users")
        .description("User")
        .order("login")
        .field(FieldDecl::char("name").required(true))
        .field(FieldDecl::char("login").required(true))
        .field(FieldDecl::boolean("active").default(json!(true)))
        .field(
            FieldDecl::many2many("groups_id", "res.groups")
                .relation_table("res_groups_users_rel")
                .string("Groups"),
        )
        .sql_constraint("login_key", "unique(login)", "You can not have two users with the same login!")
}

fn ir_model_access() -> ModelDecl {
    ModelDecl::new("ir.model.access")
        .description("Model Access")
        .order("model_id, group_id, name, id")
        .field(FieldDecl::char("name").required(true))
        .field(
            FieldDecl::many2one("model_id", "ir.model")
                .string("Model")
                .required(true)
                .ondelete(OnDelete::Cascade),
        )
        .field(FieldDecl::many2one("group_id", "res.groups").ondelete(OnDelete::Restrict))
        .field(FieldDecl::boolean("perm_read"))
        .field(FieldDecl::boolean("perm_write"))
        .field(FieldDecl::boolean("perm_create"))
        .field(FieldDecl::boolean("perm_unlink"))
}

fn ir_rule() -> ModelDecl {
    ModelDecl::new("ir.rule")
        .description("Record Rule")
        .order("model_id desc, id")
        .field(FieldDecl::char("name"))
        .field(
            FieldDecl::many2one("model_id", "ir.model")
                .required(true)
                .ondelete(OnDelete::Cascade),
        )
        .field(FieldDecl::many2many("groups", "res.groups").relation_table("rule_group_rel"))
        .field(FieldDecl::text("domain_force").string("Domain"))
        .field(FieldDecl::boolean("active").default(json!(true)))
        .field(FieldDecl::boolean("perm_read").default(json!(true)))
        .field(FieldDecl::boolean("perm_write").default(json!(true)))
        .field(FieldDecl::boolean("perm_create").default(json!(true)))
        .field(FieldDecl::boolean("perm_unlink").default(json!(true)))
}
