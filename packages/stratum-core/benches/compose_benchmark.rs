//! View assembly benchmarks.
//!
//! - Cold assembly of a form view extended by a chain of inheriting views
//! - Cached assembly of the same view
//! - Patch application on a parsed tree

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use std::hint::black_box;
use stratum_core::module::Module;
use stratum_core::registry::{FieldDecl, ModelDecl};
use stratum_core::transaction::SUPERUSER_ID;
use stratum_core::{CoreConfig, Database};

const FIELDS: usize = 40;

/// Module with one model, a form view and `extensions` inheriting views,
/// each adding one field after the previous one.
fn bench_module(extensions: usize) -> Module {
    let mut model = ModelDecl::new("bench.item").field(FieldDecl::char("name"));
    for i in 0..FIELDS {
        model = model.field(FieldDecl::integer(&format!("x_{}", i)));
    }

    let mut data = String::from("<odoo>\n");
    data.push_str(
        r#"<record model="ir.ui.view" id="item_form">
    <field name="name">bench.item.form</field>
    <field name="model">bench.item</field>
    <field name="type">form</field>
    <field name="arch" type="xml"><form><sheet><group><field name="name"/></group></sheet></form></field>
</record>
"#,
    );
    for i in 0..extensions.min(FIELDS) {
        let anchor = if i == 0 { "name".to_string() } else { format!("x_{}", i - 1) };
        data.push_str(&format!(
            r#"<record model="ir.ui.view" id="item_form_ext_{i}">
    <field name="name">bench.item.form.ext.{i}</field>
    <field name="model">bench.item</field>
    <field name="inherit_id" ref="item_form"/>
    <field name="priority" eval="{priority}"/>
    <field name="arch" type="xml"><xpath expr="//field[@name='{anchor}']" position="after"><field name="x_{i}"/></xpath></field>
</record>
"#,
            i = i,
            priority = 16 + i,
            anchor = anchor,
        ));
    }
    data.push_str("</odoo>\n");

    Module::new("bench")
        .depends(&["base"])
        .with_model(model)
        .with_data("views.xml", &data)
}

fn open(extensions: usize) -> (Database, u64) {
    let db = Database::with_modules(CoreConfig::default(), vec![bench_module(extensions)])
        .expect("Failed to open benchmark database");
    db.install(&["bench"]).expect("Failed to install benchmark module");
    let view_id = db.xmlid_to_res_id("bench.item_form").expect("Missing benchmark view");
    (db, view_id)
}

/// Benchmark: assembly without cache, by number of inheriting views
fn benchmark_cold_assembly(c: &mut Criterion) {
    let mut group = c.benchmark_group("cold_assembly");
    for extensions in [0usize, 10, 40] {
        let (db, view_id) = open(extensions);
        group.bench_with_input(BenchmarkId::from_parameter(extensions), &extensions, |b, _| {
            b.iter(|| {
                db.view_cache().clear().unwrap();
                black_box(db.assemble(view_id, SUPERUSER_ID, None, false).unwrap())
            })
        });
    }
    group.finish();
}

/// Benchmark: assembly served from the cache
fn benchmark_cached_assembly(c: &mut Criterion) {
    let (db, view_id) = open(40);
    db.assemble(view_id, SUPERUSER_ID, None, false).unwrap();
    c.bench_function("cached_assembly", |b| {
        b.iter(|| black_box(db.assemble(view_id, SUPERUSER_ID, None, false).unwrap()))
    });
}

/// Benchmark: assembly with branding
fn benchmark_branded_assembly(c: &mut Criterion) {
    let (db, view_id) = open(40);
    c.bench_function("branded_assembly", |b| {
        b.iter(|| {
            db.view_cache().clear().unwrap();
            black_box(db.assemble(view_id, SUPERUSER_ID, None, true).unwrap())
        })
    });
}

criterion_group!(
    benches,
    benchmark_cold_assembly,
    benchmark_cached_assembly,
    benchmark_branded_assembly
);
criterion_main!(benches);
