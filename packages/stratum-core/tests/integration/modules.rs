//! Modules read from addons directories, and upgrades.

use std::fs;
use std::path::Path;

use ntest::timeout;
use serde_json::json;
use stratum_core::domain::Domain;
use stratum_core::module::Module;
use stratum_core::registry::{FieldDecl, ModelDecl};
use stratum_core::transaction::SUPERUSER_ID;
use stratum_core::{CoreConfig, Database};

use super::helpers::*;

fn write_inventory_module(root: &Path) {
    let dir = root.join("inventory");
    fs::create_dir_all(dir.join("models")).unwrap();
    fs::create_dir_all(dir.join("data")).unwrap();
    fs::write(
        dir.join("__manifest__.toml"),
        r#"version = "1.2"
depends = ["base"]
models = ["models/item.xml"]
data = ["data/items.xml"]
"#,
    )
    .unwrap();
    fs::write(
        dir.join("models/item.xml"),
        r#"<models>
    <model name="inv.item" description="Inventory Item" order="name">
        <field name="name" type="char" required="1"/>
        <field name="quantity" type="integer" default="0"/>
    </model>
</models>"#,
    )
    .unwrap();
    fs::write(
        dir.join("data/items.xml"),
        r#"<odoo>
    <record model="inv.item" id="item_bolt">
        <field name="name">Bolt</field>
        <field name="quantity" eval="12"/>
    </record>
</odoo>"#,
    )
    .unwrap();
}

#[timeout(5000)]
#[test]
fn test_install_from_addons_directory() {
    let dir = tempfile::tempdir().unwrap();
    write_inventory_module(dir.path());
    let config = CoreConfig {
        addons_paths: vec![dir.path().to_path_buf()],
        ..CoreConfig::default()
    };
    let db = Database::open(config).unwrap();

    let available = db.available_modules().unwrap();
    let inventory = available.iter().find(|m| m.name == "inventory").unwrap();
    assert_eq!(inventory.version, "1.2");
    assert!(!db.installed_modules().unwrap().contains("inventory"));

    let added = db.install(&["inventory"]).unwrap();
    assert!(added.contains("inventory"));
    assert_eq!(db.registry().model("inv.item").unwrap().description, "Inventory Item");

    let items = db.model_records("inv.item", &Domain::True, None, 0, None).unwrap();
    let bolt = db.xmlid_to_res_id("inventory.item_bolt").unwrap();
    assert_eq!(items, vec![bolt]);
    let quantity = db
        .read(SUPERUSER_ID, |r| Ok(r.browse("inv.item", bolt)?.get("quantity").clone()))
        .unwrap();
    assert_eq!(quantity, json!(12));

    // installing again adds nothing
    assert!(db.install(&["inventory"]).unwrap().is_empty());
}

fn notes_v1() -> Module {
    Module::new("notes")
        .depends(&["base"])
        .with_model(
            ModelDecl::new("note")
                .field(FieldDecl::char("name").required(true))
                .field(FieldDecl::char("legacy")),
        )
        .with_data(
            "data/notes.xml",
            r#"<odoo>
    <record model="note" id="note_welcome">
        <field name="name">Welcome</field>
        <field name="legacy">old style</field>
    </record>
    <record model="note" id="note_old"><field name="name">Old</field></record>
    <data noupdate="1">
        <record model="note" id="note_pinned"><field name="name">Pinned</field></record>
    </data>
</odoo>"#,
        )
}

fn notes_v2() -> Module {
    Module::new("notes")
        .depends(&["base"])
        .with_model(ModelDecl::new("note").field(FieldDecl::char("name").required(true)))
        .with_data(
            "data/notes.xml",
            r#"<odoo>
    <record model="note" id="note_welcome"><field name="name">Hello</field></record>
    <data noupdate="1">
        <record model="note" id="note_pinned"><field name="name">Pinned again</field></record>
    </data>
</odoo>"#,
        )
}

#[timeout(5000)]
#[test]
fn test_upgrade_applies_the_new_definition() {
    let db = open(vec![notes_v1()]);
    db.install(&["notes"]).unwrap();
    let welcome = db.xmlid_to_res_id("notes.note_welcome").unwrap();
    let pinned = db.xmlid_to_res_id("notes.note_pinned").unwrap();
    db.transaction(SUPERUSER_ID, |tx| tx.write("note", &[pinned], json!({ "name": "Mine" })))
        .unwrap();

    db.register_module(notes_v2()).unwrap();
    let report = db.upgrade(&["notes"]).unwrap();
    assert!(report.residue.is_empty(), "residue: {:?}", report.residue);

    // the record dropped from the data file went away
    assert!(db.xmlid_to_res_id("notes.note_old").is_err());
    let notes = db.model_records("note", &Domain::True, None, 0, Some("id")).unwrap();
    assert_eq!(notes, vec![welcome, pinned]);

    let (welcome_name, pinned_name, has_legacy) = db
        .read(SUPERUSER_ID, |r| {
            let record = r.browse("note", welcome)?;
            Ok((
                record.get("name").clone(),
                r.browse("note", pinned)?.get("name").clone(),
                record.values.contains_key("legacy"),
            ))
        })
        .unwrap();
    assert_eq!(welcome_name, json!("Hello"));
    // noupdate records keep local edits
    assert_eq!(pinned_name, json!("Mine"));
    assert!(!has_legacy);
    assert!(!db.fields("note").unwrap().contains_key("legacy"));
    assert!(db.xmlid_to_res_id("notes.field_note__legacy").is_err());
}

#[timeout(5000)]
#[test]
fn test_upgrade_of_uninstalled_module_fails() {
    let db = open(vec![notes_v1()]);
    let err = db.upgrade(&["notes"]).unwrap_err();
    assert_eq!(err.kind(), "ModuleNotFound");
}
