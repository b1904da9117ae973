//! Shared fixtures: small modules and database setup.

use serde_json::json;
use stratum_core::module::Module;
use stratum_core::registry::{FieldDecl, ModelDecl, OnDelete};
use stratum_core::store::RecordId;
use stratum_core::transaction::SUPERUSER_ID;
use stratum_core::{CoreConfig, Database};

pub const WIDGETS_DATA: &str = r#"<odoo>
    <record model="res.groups" id="group_widget_manager">
        <field name="name">Widget Manager</field>
        <field name="implied_ids" eval="[(4, ref('base.group_user'))]"/>
    </record>
    <record model="ir.model.access" id="access_widget_user">
        <field name="name">widget user</field>
        <field name="model_id" ref="model_widget"/>
        <field name="group_id" ref="base.group_user"/>
        <field name="perm_read" eval="True"/>
    </record>
    <record model="ir.ui.view" id="widget_form">
        <field name="name">widget.form</field>
        <field name="model">widget</field>
        <field name="type">form</field>
        <field name="arch" type="xml"><form><group><field name="name"/></group><button name="archive" groups="base.group_system"/></form></field>
    </record>
    <record model="widget" id="widget_sprocket">
        <field name="name">Sprocket</field>
        <field name="price" eval="2.5"/>
    </record>
</odoo>"#;

pub const WIDGET_TAX_DATA: &str = r#"<odoo>
    <record model="ir.ui.view" id="widget_form_tax">
        <field name="name">widget.form.tax</field>
        <field name="model">widget</field>
        <field name="inherit_id" ref="widgets.widget_form"/>
        <field name="arch" type="xml"><xpath expr="//field[@name='name']" position="after"><field name="tax"/></xpath></field>
    </record>
</odoo>"#;

/// `widgets`: model `widget {name, price}`, a form view and one record.
pub fn widgets_module() -> Module {
    Module::new("widgets")
        .depends(&["base"])
        .with_model(
            ModelDecl::new("widget")
                .description("Widget")
                .order("name")
                .field(FieldDecl::char("name").required(true))
                .field(FieldDecl::float("price").groups("widgets.group_widget_manager")),
        )
        .with_data("data/widgets.xml", WIDGETS_DATA)
}

/// `widget_tax`: adds `tax` to `widget` and extends its form.
pub fn widget_tax_module() -> Module {
    Module::new("widget_tax")
        .depends(&["widgets"])
        .with_model(ModelDecl::extend("widget").field(FieldDecl::float("tax")))
        .with_data("data/views.xml", WIDGET_TAX_DATA)
}

/// `library`: books cascade-delete with their shelf.
pub fn library_module() -> Module {
    Module::new("library")
        .depends(&["base"])
        .with_model(ModelDecl::new("lib.shelf").field(FieldDecl::char("name").required(true)))
        .with_model(
            ModelDecl::new("lib.book")
                .field(FieldDecl::char("name").required(true))
                .field(
                    FieldDecl::many2one("shelf_id", "lib.shelf")
                        .required(true)
                        .ondelete(OnDelete::Cascade),
                ),
        )
        .with_data(
            "data/library.xml",
            r#"<odoo>
    <record model="lib.shelf" id="shelf_poetry"><field name="name">Poetry</field></record>
    <record model="lib.book" id="book_odes">
        <field name="name">Odes</field>
        <field name="shelf_id" ref="shelf_poetry"/>
    </record>
    <record model="lib.book" id="book_elegies">
        <field name="name">Elegies</field>
        <field name="shelf_id" ref="shelf_poetry"/>
    </record>
</odoo>"#,
        )
}

/// `cyc_a` and `cyc_b`: records of each refer to the other through
/// restricting links.
pub fn cyclic_modules() -> Vec<Module> {
    vec![
        Module::new("cyc_a")
            .depends(&["base"])
            .with_model(ModelDecl::new("a.rec").field(FieldDecl::char("name")))
            .with_data(
                "data/a.xml",
                r#"<odoo><record model="a.rec" id="a1"><field name="name">A1</field></record></odoo>"#,
            ),
        Module::new("cyc_b")
            .depends(&["cyc_a"])
            .with_model(
                ModelDecl::new("b.rec")
                    .field(FieldDecl::char("name"))
                    .field(FieldDecl::many2one("a_id", "a.rec").ondelete(OnDelete::Restrict)),
            )
            .with_model(
                ModelDecl::extend("a.rec").field(FieldDecl::many2one("b_id", "b.rec").ondelete(OnDelete::Restrict)),
            )
            .with_data(
                "data/b.xml",
                r#"<odoo>
    <record model="b.rec" id="b1">
        <field name="name">B1</field>
        <field name="a_id" ref="cyc_a.a1"/>
    </record>
    <record model="a.rec" id="cyc_a.a1">
        <field name="b_id" ref="b1"/>
    </record>
</odoo>"#,
            ),
    ]
}

pub fn open(modules: Vec<Module>) -> Database {
    Database::with_modules(CoreConfig::default(), modules).unwrap()
}

pub fn admin(db: &Database) -> RecordId {
    db.xmlid_to_res_id("base.user_admin").unwrap()
}

/// Creates a user belonging to `groups` (external ids).
pub fn create_user(db: &Database, login: &str, groups: &[&str]) -> RecordId {
    let group_ids: Vec<RecordId> = groups.iter().map(|g| db.xmlid_to_res_id(g).unwrap()).collect();
    db.transaction(SUPERUSER_ID, |tx| {
        tx.create(
            "res.users",
            json!({ "name": login, "login": login, "groups_id": group_ids }),
        )
    })
    .unwrap()
}
