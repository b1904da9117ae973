//! Quantified invariants and round-trip laws.

use std::collections::{BTreeMap, BTreeSet};

use ntest::timeout;
use serde_json::json;
use stratum_core::module::Module;
use stratum_core::registry::{FieldDecl, ModelDecl, OnDelete};
use stratum_core::security::user_groups;
use stratum_core::store::RecordId;
use stratum_core::transaction::{Reader, SUPERUSER_ID};
use stratum_core::uninstall::uninstall_records;
use stratum_core::views::{ViewEngine, ORIGIN_ATTR};
use stratum_core::{CoreError, Database};

use super::helpers::*;

fn loans_module() -> Module {
    Module::new("loans")
        .depends(&["library"])
        .with_model(
            ModelDecl::new("lib.loan")
                .field(FieldDecl::char("borrower"))
                .field(FieldDecl::many2one("book_id", "lib.book").ondelete(OnDelete::Restrict)),
        )
        .with_data(
            "data/loans.xml",
            r#"<odoo>
    <record model="lib.loan" id="loan_odes">
        <field name="borrower">Horace</field>
        <field name="book_id" ref="library.book_odes"/>
    </record>
</odoo>"#,
        )
}

/// Table sizes and external ids, enough to compare two databases.
fn snapshot(db: &Database) -> (BTreeMap<String, usize>, BTreeSet<String>) {
    db.read(SUPERUSER_ID, |r| {
        let tables = r
            .store
            .table_names()
            .map(|name| (name.to_string(), r.store.table(name).map_or(0, |t| t.len())))
            .collect();
        let xmlids = r.store.xmlids().iter().map(|x| x.full_name()).collect();
        Ok((tables, xmlids))
    })
    .unwrap()
}

#[timeout(5000)]
#[test]
fn test_every_field_has_a_contributing_module() {
    let db = open(vec![widgets_module(), widget_tax_module(), library_module()]);
    db.install(&["widget_tax", "library"]).unwrap();
    let installed = db.installed_modules().unwrap();
    let registry = db.registry();
    for model in registry.models() {
        assert!(!model.modules.is_empty(), "model {} has no module", model.name);
        for field in model.fields.values() {
            assert!(!field.modules.is_empty(), "field {}.{} has no module", model.name, field.name);
            for module in &field.modules {
                assert!(installed.contains(module), "{}.{} from {}", model.name, field.name, module);
                assert!(model.modules.contains(module));
            }
        }
    }
}

#[timeout(5000)]
#[test]
fn test_composed_elements_trace_to_the_inheritance_closure() {
    let db = open(vec![widgets_module(), widget_tax_module()]);
    db.install(&["widget_tax"]).unwrap();
    let root = db.xmlid_to_res_id("widgets.widget_form").unwrap();
    let ext = db.xmlid_to_res_id("widget_tax.widget_form_tax").unwrap();

    let origins = db
        .read(admin(&db), |reader: &Reader<'_>| {
            let engine = ViewEngine::new(*reader);
            let tree = engine.compose_with_origins(root)?;
            let closure = engine.inheritance_closure(root);
            let mut origins = Vec::new();
            tree.walk(&mut |_, el| {
                let origin: Option<RecordId> = el.attr(ORIGIN_ATTR).and_then(|o| o.parse().ok());
                origins.push(origin);
            });
            assert!(origins.iter().all(|o| o.is_some_and(|id| closure.contains(&id))));
            Ok(origins)
        })
        .unwrap();
    assert!(origins.contains(&Some(ext)));
    assert!(origins.contains(&Some(root)));
}

#[timeout(5000)]
#[test]
fn test_group_membership_is_closed_over_implication() {
    let db = open(Vec::new());
    let (low, mid, high, other) = db
        .transaction(SUPERUSER_ID, |tx| {
            let low = tx.create("res.groups", json!({ "name": "Low" }))?;
            let mid = tx.create("res.groups", json!({ "name": "Mid", "implied_ids": [low] }))?;
            let high = tx.create("res.groups", json!({ "name": "High", "implied_ids": [mid] }))?;
            let other = tx.create("res.groups", json!({ "name": "Other" }))?;
            Ok((low, mid, high, other))
        })
        .unwrap();
    let top = db
        .transaction(SUPERUSER_ID, |tx| {
            tx.create("res.users", json!({ "name": "Top", "login": "top", "groups_id": [high] }))
        })
        .unwrap();
    let bottom = db
        .transaction(SUPERUSER_ID, |tx| {
            tx.create("res.users", json!({ "name": "Bottom", "login": "bottom", "groups_id": [low] }))
        })
        .unwrap();

    db.read(SUPERUSER_ID, |r| {
        let all: Vec<RecordId> = r.all_ids("res.groups");
        for uid in [top, bottom] {
            let member = user_groups(r, uid);
            let direct = r.browse("res.users", uid)?.get_ids("groups_id");
            for group in &all {
                let implied_by_member = member
                    .iter()
                    .any(|g| r.store.record("res.groups", *g).is_some_and(|rec| rec.get_ids("implied_ids").contains(group)));
                assert_eq!(member.contains(group), direct.contains(group) || implied_by_member);
            }
        }
        let top_groups = user_groups(r, top);
        assert!(top_groups.contains(&low) && top_groups.contains(&mid) && top_groups.contains(&high));
        assert!(!top_groups.contains(&other));
        assert_eq!(user_groups(r, bottom), BTreeSet::from([low]));
        Ok(())
    })
    .unwrap();
}

#[timeout(5000)]
#[test]
fn test_uninstall_partitions_its_input() {
    let db = open(vec![library_module(), loans_module()]);
    db.install(&["loans"]).unwrap();
    let odes = db.xmlid_to_res_id("library.book_odes").unwrap();
    let elegies = db.xmlid_to_res_id("library.book_elegies").unwrap();
    let input = BTreeMap::from([("lib.book".to_string(), BTreeSet::from([odes, elegies]))]);

    let result: Result<(), CoreError> = db.transaction(SUPERUSER_ID, |tx| {
        let report = uninstall_records(tx, input.clone(), db.config())?;
        assert_eq!(report.deleted, 1);
        assert_eq!(report.residue, vec!["library.book_odes"]);
        for (model, ids) in &input {
            for id in ids {
                let deleted = !tx.exists(model, *id);
                let xmlid = tx.store().xmlids().for_record(model, *id).first().map(|x| x.full_name());
                let in_residue = xmlid.is_some_and(|x| report.residue.contains(&x));
                assert!(deleted != in_residue, "record {},{} must be deleted or residue", model, id);
            }
        }
        assert_eq!(report.undeletable[0].display_name, "Odes");
        Ok(())
    });
    result.unwrap();
    assert!(db.xmlid_to_res_id("library.book_elegies").is_err());
}

#[timeout(5000)]
#[test]
fn test_install_then_uninstall_restores_the_database() {
    let pristine = open(Vec::new());
    let db = open(vec![widgets_module()]);
    let before = snapshot(&db);
    assert_eq!(before, snapshot(&pristine));

    db.install(&["widgets"]).unwrap();
    assert_ne!(snapshot(&db), before);
    let report = db.uninstall(&["widgets"]).unwrap();
    assert!(report.residue.is_empty(), "residue: {:?}", report.residue);
    assert_eq!(snapshot(&db), before);
    assert!(!db.registry().has_model("widget"));
}
