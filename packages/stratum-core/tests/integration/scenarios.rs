//! End-to-end scenarios: field addition, view patch, group gating,
//! uninstall order, uninstall cycle and view cache invalidation.

use std::collections::BTreeSet;
use std::sync::Arc;

use ntest::timeout;
use serde_json::json;
use serde_json::{Map, Value};
use stratum_core::domain::Domain;
use stratum_core::module::Module;
use stratum_core::registry::{ids_arg, Call, FieldDecl, ModelDecl};
use stratum_core::transaction::SUPERUSER_ID;
use stratum_core::CoreError;

use super::helpers::*;

fn field_names(db: &stratum_core::Database, model: &str) -> BTreeSet<String> {
    db.fields(model).unwrap().into_keys().collect()
}

#[timeout(5000)]
#[test]
fn test_classical_field_addition() {
    let db = open(vec![widgets_module(), widget_tax_module()]);
    db.install(&["widgets"]).unwrap();
    assert_eq!(field_names(&db, "widget"), BTreeSet::from(["name".to_string(), "price".to_string()]));

    db.install(&["widget_tax"]).unwrap();
    assert_eq!(
        field_names(&db, "widget"),
        BTreeSet::from(["name".to_string(), "price".to_string(), "tax".to_string()])
    );
    let tax = db.registry().field("widget", "tax").unwrap().clone();
    assert_eq!(tax.modules, vec!["widget_tax"]);

    // the dependency cannot go first
    let err = db.uninstall(&["widgets"]).unwrap_err();
    let CoreError::ModuleInUse { module, dependents } = err else {
        panic!("expected ModuleInUse, got {:?}", err);
    };
    assert_eq!(module, "widgets");
    assert_eq!(dependents, vec!["widget_tax"]);

    let sprocket = db.xmlid_to_res_id("widgets.widget_sprocket").unwrap();
    db.transaction(SUPERUSER_ID, |tx| tx.write("widget", &[sprocket], json!({ "tax": 0.2 })))
        .unwrap();

    let report = db.uninstall(&["widget_tax"]).unwrap();
    assert!(report.residue.is_empty(), "residue: {:?}", report.residue);
    assert_eq!(field_names(&db, "widget"), BTreeSet::from(["name".to_string(), "price".to_string()]));
    assert!(report.released.contains(&"widget_tax.model_widget".to_string()));

    // the column went with the field
    let has_tax = db
        .read(SUPERUSER_ID, |r| Ok(r.store.record("widget", sprocket).map(|rec| rec.values.contains_key("tax"))))
        .unwrap();
    assert_eq!(has_tax, Some(false));
    assert!(db.xmlid_to_res_id("widget_tax.widget_form_tax").is_err());
}

#[timeout(5000)]
#[test]
fn test_view_patch() {
    let db = open(vec![widgets_module(), widget_tax_module()]);
    db.install(&["widget_tax"]).unwrap();
    let view_id = db.xmlid_to_res_id("widgets.widget_form").unwrap();

    let view = db.assemble(view_id, admin(&db), None, false).unwrap();
    assert_eq!(
        view.arch,
        r#"<form><group><field name="name"/><field name="tax"/></group><button name="archive"/></form>"#
    );
    assert_eq!(view.model, "widget");
    assert_eq!(view.view_id, view_id);
    assert_eq!(view.fields.keys().collect::<Vec<_>>(), vec!["name", "tax"]);
    assert_eq!(view.fields["tax"]["type"], json!("float"));

    // requesting the extension assembles its root
    let ext_id = db.xmlid_to_res_id("widget_tax.widget_form_tax").unwrap();
    let same = db.assemble(ext_id, admin(&db), None, false).unwrap();
    assert_eq!(same.arch, view.arch);
    assert_eq!(same.view_id, view_id);
}

#[timeout(5000)]
#[test]
fn test_group_gating() {
    let db = open(vec![widgets_module()]);
    db.install(&["widgets"]).unwrap();
    let view_id = db.xmlid_to_res_id("widgets.widget_form").unwrap();
    let clerk = create_user(&db, "clerk", &["base.group_user"]);

    let for_clerk = db.assemble(view_id, clerk, None, false).unwrap();
    assert_eq!(for_clerk.arch, r#"<form><group><field name="name"/></group></form>"#);

    let for_admin = db.assemble(view_id, admin(&db), None, false).unwrap();
    assert_eq!(
        for_admin.arch,
        r#"<form><group><field name="name"/></group><button name="archive"/></form>"#
    );

    // no group grants read access to a user without groups
    let guest = create_user(&db, "guest", &[]);
    let err = db.assemble(view_id, guest, None, false).unwrap_err();
    assert_eq!(err.kind(), "AccessDenied");
}

#[timeout(5000)]
#[test]
fn test_uninstall_order() {
    let db = open(vec![library_module()]);
    db.install(&["library"]).unwrap();
    let books = db.model_records("lib.book", &Domain::True, None, 0, None).unwrap();
    assert_eq!(books.len(), 2);

    let report = db.uninstall(&["library"]).unwrap();
    assert!(report.residue.is_empty(), "residue: {:?}", report.residue);
    assert!(report.undeletable.is_empty());

    let position = |pred: &dyn Fn(&str) -> bool| {
        report
            .steps
            .iter()
            .position(|s| pred(s))
            .unwrap_or_else(|| panic!("missing step in {:?}", report.steps))
    };
    let books_step = position(&|s| s == "records of lib.book");
    let shelves_step = position(&|s| s == "records of lib.shelf");
    let shelf_field = position(&|s| s.starts_with("ir.model.fields#") && s.ends_with("(lib.book.shelf_id)"));
    let shelf_model = position(&|s| s.starts_with("ir.model#") && s.ends_with("(lib.shelf)"));
    assert!(books_step < shelves_step);
    assert!(shelves_step < shelf_field);
    assert!(shelf_field < shelf_model);

    assert!(!db.registry().has_model("lib.book"));
    assert!(db.read(SUPERUSER_ID, |r| Ok(!r.store.has_table("lib.shelf"))).unwrap());
}

#[timeout(5000)]
#[test]
fn test_uninstall_cycle() {
    let db = open(cyclic_modules());
    db.install(&["cyc_b"]).unwrap();
    let a1 = db.xmlid_to_res_id("cyc_a.a1").unwrap();
    let b1 = db.xmlid_to_res_id("cyc_b.b1").unwrap();

    let err = db.uninstall(&["cyc_a", "cyc_b"]).unwrap_err();
    let CoreError::UninstallCyclic { nodes } = err else {
        panic!("expected UninstallCyclic, got {:?}", err);
    };
    assert!(nodes.iter().any(|n| n.starts_with("records of a.rec <- [") && n.contains("records of b.rec")));
    assert!(nodes.iter().any(|n| n.starts_with("records of b.rec <- [") && n.contains("records of a.rec")));

    // nothing changed
    let installed = db.installed_modules().unwrap();
    assert!(installed.contains("cyc_a") && installed.contains("cyc_b"));
    assert_eq!(db.model_records("a.rec", &Domain::True, None, 0, None).unwrap(), vec![a1]);
    assert_eq!(db.model_records("b.rec", &Domain::True, None, 0, None).unwrap(), vec![b1]);
}

#[timeout(5000)]
#[test]
fn test_view_cache_invalidation() {
    let db = open(vec![widgets_module(), widget_tax_module()]);
    db.install(&["widget_tax"]).unwrap();
    let view_id = db.xmlid_to_res_id("widgets.widget_form").unwrap();
    let ext_id = db.xmlid_to_res_id("widget_tax.widget_form_tax").unwrap();
    let uid = admin(&db);

    let first = db.assemble(view_id, uid, None, false).unwrap();
    let again = db.assemble(view_id, uid, None, false).unwrap();
    assert!(Arc::ptr_eq(&first, &again));

    db.transaction(SUPERUSER_ID, |tx| {
        tx.write(
            "ir.ui.view",
            &[ext_id],
            json!({ "arch": r#"<xpath expr="//field[@name='name']" position="before"><field name="tax"/></xpath>"# }),
        )
    })
    .unwrap();
    let fresh = db.assemble(view_id, uid, None, false).unwrap();
    assert!(!Arc::ptr_eq(&first, &fresh));
    assert_eq!(
        fresh.arch,
        r#"<form><group><field name="tax"/><field name="name"/></group><button name="archive"/></form>"#
    );

    // branding and language are separate entries
    let branded = db.assemble(view_id, uid, Some("fr_FR"), true).unwrap();
    assert!(branded.arch.contains(r#"data-oe-model="ir.ui.view""#));
    assert!(!Arc::ptr_eq(&fresh, &branded));
}

#[timeout(5000)]
#[test]
fn test_removed_target_names_the_later_view() {
    let db = open(vec![widgets_module(), widget_tax_module()]);
    db.install(&["widget_tax"]).unwrap();
    let view_id = db.xmlid_to_res_id("widgets.widget_form").unwrap();
    db.transaction(SUPERUSER_ID, |tx| {
        tx.create(
            "ir.ui.view",
            json!({
                "name": "widget.form.hide",
                "model": "widget",
                "inherit_id": view_id,
                "mode": "extension",
                "priority": 1,
                "arch": r#"<xpath expr="//field[@name='name']" position="replace"/>"#,
            }),
        )
    })
    .unwrap();

    let err = db.assemble(view_id, admin(&db), None, false).unwrap_err();
    let CoreError::PatchTargetNotFound { view, module, .. } = err else {
        panic!("expected PatchTargetNotFound, got {:?}", err);
    };
    assert_eq!(view, "widget_tax.widget_form_tax");
    assert_eq!(module, "widget_tax");
}

fn compute_alpha_total(call: &Call<'_>, args: Value) -> Result<Value, CoreError> {
    let mut out = Map::new();
    for id in ids_arg(&args) {
        let record = call.record(id)?;
        let total = record.get("price").as_f64().unwrap_or_default() + record.get("zeta").as_f64().unwrap_or_default();
        out.insert(id.to_string(), json!(total));
    }
    Ok(Value::Object(out))
}

/// `widget_scoring`: `zeta` plus a stored `alpha_total` computed from it.
fn widget_scoring_module() -> Module {
    Module::new("widget_scoring").depends(&["widgets"]).with_model(
        ModelDecl::extend("widget")
            .method("_compute_alpha_total", compute_alpha_total)
            .field(FieldDecl::float("zeta"))
            .field(FieldDecl::float("alpha_total").compute("_compute_alpha_total", &["price", "zeta"], true)),
    )
}

#[timeout(5000)]
#[test]
fn test_computed_field_goes_before_its_dependency() {
    let db = open(vec![widgets_module(), widget_scoring_module()]);
    db.install(&["widget_scoring"]).unwrap();
    let sprocket = db.xmlid_to_res_id("widgets.widget_sprocket").unwrap();
    db.transaction(SUPERUSER_ID, |tx| tx.write("widget", &[sprocket], json!({ "zeta": 1.5 })))
        .unwrap();
    let total = db
        .read(SUPERUSER_ID, |r| Ok(r.browse("widget", sprocket)?.get("alpha_total").clone()))
        .unwrap();
    assert_eq!(total, json!(4.0));

    // the dependency was reflected first, so id order alone would delete it first
    let zeta = db.xmlid_to_res_id("widget_scoring.field_widget__zeta").unwrap();
    let alpha_total = db.xmlid_to_res_id("widget_scoring.field_widget__alpha_total").unwrap();
    assert!(zeta < alpha_total);

    let report = db.uninstall(&["widget_scoring"]).unwrap();
    assert!(report.residue.is_empty(), "residue: {:?}", report.residue);
    let position = |label: &str| {
        report
            .steps
            .iter()
            .position(|s| s.starts_with("ir.model.fields#") && s.ends_with(label))
            .unwrap_or_else(|| panic!("missing {} in {:?}", label, report.steps))
    };
    assert!(position("(widget.alpha_total)") < position("(widget.zeta)"));
    assert_eq!(field_names(&db, "widget"), BTreeSet::from(["name".to_string(), "price".to_string()]));
}

#[timeout(5000)]
#[test]
fn test_users_sharing_groups_share_cached_views() {
    let db = open(vec![widgets_module()]);
    db.install(&["widgets"]).unwrap();
    let view_id = db.xmlid_to_res_id("widgets.widget_form").unwrap();
    let first = create_user(&db, "first", &["base.group_user"]);
    let second = create_user(&db, "second", &["base.group_user"]);

    let for_first = db.assemble(view_id, first, None, false).unwrap();
    let (hits, _) = db.view_cache().stats();
    let for_second = db.assemble(view_id, second, None, false).unwrap();
    assert!(Arc::ptr_eq(&for_first, &for_second));
    assert_eq!(db.view_cache().stats().0, hits + 1);

    let for_admin = db.assemble(view_id, admin(&db), None, false).unwrap();
    assert!(!Arc::ptr_eq(&for_first, &for_admin));
}

#[timeout(5000)]
#[test]
fn test_fields_restricted_to_other_groups_leave_the_view() {
    let db = open(vec![widgets_module()]);
    db.install(&["widgets"]).unwrap();
    let view_id = db.xmlid_to_res_id("widgets.widget_form").unwrap();
    db.transaction(SUPERUSER_ID, |tx| {
        tx.write(
            "ir.ui.view",
            &[view_id],
            json!({ "arch": r#"<form><group><field name="name"/><label for="price"/><field name="price"/></group></form>"# }),
        )
    })
    .unwrap();
    let clerk = create_user(&db, "clerk", &["base.group_user"]);
    let manager = create_user(&db, "manager", &["widgets.group_widget_manager"]);

    let for_clerk = db.assemble(view_id, clerk, None, false).unwrap();
    assert_eq!(for_clerk.arch, r#"<form><group><field name="name"/></group></form>"#);
    assert!(!for_clerk.fields.contains_key("price"));

    let for_manager = db.assemble(view_id, manager, None, false).unwrap();
    assert_eq!(
        for_manager.arch,
        r#"<form><group><field name="name"/><label for="price"/><field name="price"/></group></form>"#
    );
    assert!(for_manager.fields.contains_key("price"));
}
