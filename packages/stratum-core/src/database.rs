//! Database container: module catalogue, live registry, record store and
//! view cache.
//!
//! The registry is swapped atomically after every install, upgrade or
//! uninstall. Readers keep the `Arc<Registry>` they loaded, so in-flight
//! work completes against the registry it started with.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Mutex, RwLock};

use arc_swap::ArcSwap;
use serde_json::Value;

use crate::base::base_module;
use crate::config::CoreConfig;
use crate::data::{load_data_file, reflect_registry, LoadMode, LoadTracker};
use crate::domain::Domain;
use crate::error::CoreError;
use crate::module::{Manifest, Module, ModuleCatalog, BASE_MODULE};
use crate::registry::Registry;
use crate::security::{self, rule_domain, Operation};
use crate::store::{RecordId, Store};
use crate::transaction::{Reader, Transaction, SUPERUSER_ID};
use crate::uninstall::{uninstall_modules, uninstall_records, UninstallReport, GROUPS_MODEL};
use crate::views::{AssembledView, CacheKey, CacheStamp, ViewCache, ViewEngine};

/// Database container holding the registry, the records and the caches.
pub struct Database {
    config: CoreConfig,
    catalog: RwLock<ModuleCatalog>,
    registry: ArcSwap<Registry>,
    store: RwLock<Store>,
    installed: RwLock<BTreeSet<String>>,
    view_cache: ViewCache,
    /// Serialises registry reloads
    reload_lock: Mutex<()>,
}

impl Database {
    /// Scans the configured addons paths and installs `base`.
    ///
    /// # Arguments
    /// * `config` - Core configuration
    ///
    /// # Returns
    /// `Result<Database, CoreError>` with `base` installed.
    pub fn open(config: CoreConfig) -> Result<Self, CoreError> {
        let mut catalog = ModuleCatalog::scan(&config.addons_paths, &config.manifest_file)?;
        catalog.add(base_module());
        Self::with_catalog(config, catalog)
    }

    /// Like [`open`](Self::open), with extra programmatic modules.
    pub fn with_modules(config: CoreConfig, modules: Vec<Module>) -> Result<Self, CoreError> {
        let mut catalog = ModuleCatalog::scan(&config.addons_paths, &config.manifest_file)?;
        catalog.add(base_module());
        for module in modules {
            catalog.add(module);
        }
        Self::with_catalog(config, catalog)
    }

    fn with_catalog(config: CoreConfig, catalog: ModuleCatalog) -> Result<Self, CoreError> {
        let db = Self {
            view_cache: ViewCache::new(config.view_cache_capacity),
            config,
            catalog: RwLock::new(catalog),
            registry: ArcSwap::from_pointee(Registry::empty()),
            store: RwLock::new(Store::new()),
            installed: RwLock::new(BTreeSet::new()),
            reload_lock: Mutex::new(()),
        };
        db.install(&[BASE_MODULE])?;
        Ok(db)
    }

    pub fn config(&self) -> &CoreConfig {
        &self.config
    }

    /// Adds a module to the catalogue, replacing one of the same name. An
    /// installed module only picks the new version up on upgrade.
    pub fn register_module(&self, module: Module) -> Result<(), CoreError> {
        let mut catalog = self.catalog.write().map_err(|_| CoreError::LockPoisoned)?;
        catalog.add(module);
        Ok(())
    }

    /// Manifests of the catalogue's modules, by name.
    pub fn available_modules(&self) -> Result<Vec<Manifest>, CoreError> {
        let catalog = self.catalog.read().map_err(|_| CoreError::LockPoisoned)?;
        Ok(catalog.modules().map(|m| m.manifest.clone()).collect())
    }

    pub fn installed_modules(&self) -> Result<BTreeSet<String>, CoreError> {
        Ok(self.installed.read().map_err(|_| CoreError::LockPoisoned)?.clone())
    }

    /// Current registry. The returned handle stays valid across reloads.
    pub fn registry(&self) -> Arc<Registry> {
        self.registry.load_full()
    }

    /// Installs `names` with their dependencies and the auto-install
    /// modules they enable.
    ///
    /// # Returns
    /// The newly installed modules. On failure neither the registry nor
    /// the records change.
    pub fn install(&self, names: &[&str]) -> Result<BTreeSet<String>, CoreError> {
        let _reload = self.reload_lock.lock().map_err(|_| CoreError::LockPoisoned)?;
        let installed = self.installed_modules()?;
        let catalog = self.catalog.read().map_err(|_| CoreError::LockPoisoned)?;
        let target = catalog.install_closure(names, &installed)?;
        let added: BTreeSet<String> = target.difference(&installed).cloned().collect();
        if added.is_empty() {
            tracing::debug!(requested = ?names, "modules already installed");
            return Ok(added);
        }
        tracing::info!(modules = ?added, "installing modules");

        let ordered = catalog.ordered(&target)?;
        let registry = Arc::new(Registry::build(&ordered, self.next_generation())?);
        let mut store = self.store.write().map_err(|_| CoreError::LockPoisoned)?;
        let mut tx = self.begin(&mut store, Arc::clone(&registry), SUPERUSER_ID);
        let mut tracker = LoadTracker::new();
        reflect_registry(&mut tx, &mut tracker)?;
        for module in ordered.iter().filter(|m| added.contains(m.name())) {
            for file in &module.data_files {
                let count = load_data_file(&mut tx, module.name(), file, LoadMode::Install, &mut tracker)?;
                tracing::debug!(module = %module.name(), file = %file.name, records = count, "data file loaded");
            }
        }
        validate_groups(&tx)?;
        tx.commit()?;
        self.publish(registry, target)?;
        tracing::info!(modules = ?added, "modules installed");
        Ok(added)
    }

    /// Rebuilds the registry from the catalogue and reloads the data of
    /// `names`. Records the reload no longer produces are removed.
    ///
    /// # Returns
    /// The report of the stale record removal.
    pub fn upgrade(&self, names: &[&str]) -> Result<UninstallReport, CoreError> {
        let _reload = self.reload_lock.lock().map_err(|_| CoreError::LockPoisoned)?;
        let installed = self.installed_modules()?;
        let upgraded: BTreeSet<String> = names.iter().map(|n| n.to_string()).collect();
        if let Some(missing) = upgraded.iter().find(|n| !installed.contains(*n)) {
            return Err(CoreError::ModuleNotFound { module: missing.clone() });
        }
        tracing::info!(modules = ?upgraded, "upgrading modules");

        let catalog = self.catalog.read().map_err(|_| CoreError::LockPoisoned)?;
        let ordered = catalog.ordered(&installed)?;
        let registry = Arc::new(Registry::build(&ordered, self.next_generation())?);
        let mut store = self.store.write().map_err(|_| CoreError::LockPoisoned)?;
        let mut tx = self.begin(&mut store, Arc::clone(&registry), SUPERUSER_ID);
        let mut tracker = LoadTracker::new();
        reflect_registry(&mut tx, &mut tracker)?;
        for module in ordered.iter().filter(|m| upgraded.contains(m.name())) {
            for file in &module.data_files {
                load_data_file(&mut tx, module.name(), file, LoadMode::Update, &mut tracker)?;
            }
        }

        let mut stale: BTreeMap<String, BTreeSet<RecordId>> = BTreeMap::new();
        let forgotten: Vec<_> = tx
            .store()
            .xmlids()
            .iter()
            .filter(|x| upgraded.contains(&x.module) && !tracker.contains(&x.full_name()))
            .cloned()
            .collect();
        for xmlid in forgotten {
            let still_owned = tx
                .store()
                .xmlids()
                .for_record(&xmlid.model, xmlid.res_id)
                .iter()
                .any(|other| tracker.contains(&other.full_name()));
            if still_owned {
                tx.store_mut().remove_xmlid(&xmlid.full_name());
            } else {
                stale.entry(xmlid.model.clone()).or_default().insert(xmlid.res_id);
            }
        }
        let report = uninstall_records(&mut tx, stale, &self.config)?;
        validate_groups(&tx)?;
        tx.commit()?;
        self.publish(registry, installed)?;
        tracing::info!(modules = ?upgraded, removed = report.deleted, residue = report.residue.len(), "modules upgraded");
        Ok(report)
    }

    /// Uninstalls `names`: deletes what they own, then rebuilds the
    /// registry without them.
    ///
    /// # Returns
    /// The uninstall report; records that could not be deleted are listed
    /// as residue. `ModuleInUse` when a remaining module depends on one of
    /// `names`, `UninstallCyclic` when the deletion order cannot be
    /// resolved (nothing is deleted then).
    pub fn uninstall(&self, names: &[&str]) -> Result<UninstallReport, CoreError> {
        let _reload = self.reload_lock.lock().map_err(|_| CoreError::LockPoisoned)?;
        let installed = self.installed_modules()?;
        let removed: BTreeSet<String> = names.iter().map(|n| n.to_string()).collect();
        if let Some(missing) = removed.iter().find(|n| !installed.contains(*n)) {
            return Err(CoreError::ModuleNotFound { module: missing.clone() });
        }

        let catalog = self.catalog.read().map_err(|_| CoreError::LockPoisoned)?;
        for name in &removed {
            let blocking: Vec<String> = catalog
                .dependents(name, &installed)
                .difference(&removed)
                .cloned()
                .collect();
            if !blocking.is_empty() {
                tracing::error!(module = %name, dependents = ?blocking, "module still required");
                return Err(CoreError::ModuleInUse {
                    module: name.clone(),
                    dependents: blocking,
                });
            }
        }
        let remaining: BTreeSet<String> = installed.difference(&removed).cloned().collect();
        let ordered = catalog.ordered(&remaining)?;
        let registry = Arc::new(Registry::build(&ordered, self.next_generation())?);

        let mut store = self.store.write().map_err(|_| CoreError::LockPoisoned)?;
        let mut tx = self.begin(&mut store, self.registry(), SUPERUSER_ID);
        let report = uninstall_modules(&mut tx, &removed, &self.config)?;
        tx.switch_registry(Arc::clone(&registry))?;
        reflect_registry(&mut tx, &mut LoadTracker::new())?;
        tx.commit()?;
        self.publish(registry, remaining)?;
        Ok(report)
    }

    /// Field descriptors of `model`.
    pub fn fields(&self, model: &str) -> Result<BTreeMap<String, Value>, CoreError> {
        let registry = self.registry();
        let fields = registry.fields_of(model)?;
        Ok(fields.iter().map(|(name, f)| (name.clone(), f.describe())).collect())
    }

    /// Descriptor of one field, `UnknownField` when absent.
    pub fn field(&self, model: &str, name: &str) -> Result<Value, CoreError> {
        Ok(self.registry().field(model, name)?.describe())
    }

    pub fn check_access(&self, model: &str, uid: RecordId, operation: Operation) -> Result<bool, CoreError> {
        self.read(uid, |reader| Ok(security::check_access(reader, model, uid, operation)))
    }

    /// Ids of the records of `model` matching `domain`, without record rules.
    pub fn model_records(
        &self,
        model: &str,
        domain: &Domain,
        limit: Option<usize>,
        offset: usize,
        order: Option<&str>,
    ) -> Result<Vec<RecordId>, CoreError> {
        self.read(SUPERUSER_ID, |reader| reader.search(model, domain, limit, offset, order))
    }

    /// Like [`model_records`](Self::model_records) on behalf of `uid`: the
    /// read permission is required and record rules narrow the result.
    pub fn model_records_for_user(
        &self,
        uid: RecordId,
        model: &str,
        domain: &Domain,
        limit: Option<usize>,
        offset: usize,
        order: Option<&str>,
    ) -> Result<Vec<RecordId>, CoreError> {
        self.read(uid, |reader| {
            security::require_access(reader, model, uid, Operation::Read)?;
            let rules = rule_domain(reader, model, uid, Operation::Read)?;
            let domain = Domain::and(vec![domain.clone(), rules]);
            reader.search(model, &domain, limit, offset, order)
        })
    }

    /// Record id an external identifier points at.
    pub fn xmlid_to_res_id(&self, xmlid: &str) -> Result<RecordId, CoreError> {
        let store = self.store.read().map_err(|_| CoreError::LockPoisoned)?;
        store
            .xmlid(xmlid)
            .map(|x| x.res_id)
            .ok_or_else(|| CoreError::UnknownExternalId { xmlid: xmlid.to_string() })
    }

    /// Runs a model method as `uid`.
    pub fn call(&self, uid: RecordId, model: &str, method: &str, args: Value) -> Result<Value, CoreError> {
        self.read(uid, |reader| reader.call(model, method, args))
    }

    /// Runs `f` with read access to the current registry and records.
    pub fn read<F, R>(&self, uid: RecordId, f: F) -> Result<R, CoreError>
    where
        F: FnOnce(&Reader<'_>) -> Result<R, CoreError>,
    {
        let registry = self.registry();
        let store = self.store.read().map_err(|_| CoreError::LockPoisoned)?;
        let reader = Reader::new(&store, &registry, uid);
        f(&reader)
    }

    /// Runs `f` in a transaction acting as `uid`, committed when `f`
    /// succeeds and rolled back otherwise.
    ///
    /// # Returns
    /// `Result<R, CoreError>` with the value returned by `f`.
    pub fn transaction<F, R>(&self, uid: RecordId, f: F) -> Result<R, CoreError>
    where
        F: FnOnce(&mut Transaction<'_>) -> Result<R, CoreError>,
    {
        let registry = self.registry();
        let mut store = self.store.write().map_err(|_| CoreError::LockPoisoned)?;
        let mut tx = self.begin(&mut store, registry, uid);
        let result = f(&mut tx)?;
        tx.commit()?;
        Ok(result)
    }

    /// Assembles a view for `uid`, served from the cache when nothing it
    /// depends on changed since.
    ///
    /// # Arguments
    /// * `view_id` - any view; extensions resolve to their root
    /// * `uid` - user the view is gated for
    /// * `lang` - language of the request
    /// * `branding` - annotate nodes with their origin
    pub fn assemble(
        &self,
        view_id: RecordId,
        uid: RecordId,
        lang: Option<&str>,
        branding: bool,
    ) -> Result<Arc<AssembledView>, CoreError> {
        let registry = self.registry();
        let store = self.store.read().map_err(|_| CoreError::LockPoisoned)?;
        let reader = Reader::new(&store, &registry, uid);
        let groups = security::user_groups(&reader, uid);
        let stamp = CacheStamp::of(&registry, &store);
        let key = CacheKey {
            view_id,
            groups,
            lang: lang.map(str::to_string),
            branding,
        };
        if let Some(hit) = self.view_cache.get(&key, stamp)? {
            // model access is not part of the key
            security::require_access(&reader, &hit.model, uid, Operation::Read)?;
            return Ok(hit);
        }
        let engine = ViewEngine::with_groups(reader, key.groups.clone()).with_validation(self.config.validate_views);
        let view = Arc::new(engine.assemble(view_id, branding)?);
        self.view_cache.insert(key, stamp, Arc::clone(&view))?;
        Ok(view)
    }

    /// Assembles the default view of a type for `model`.
    pub fn assemble_default(
        &self,
        model: &str,
        view_type: &str,
        uid: RecordId,
        branding: bool,
    ) -> Result<AssembledView, CoreError> {
        let registry = self.registry();
        let store = self.store.read().map_err(|_| CoreError::LockPoisoned)?;
        let engine = ViewEngine::new(Reader::new(&store, &registry, uid)).with_validation(self.config.validate_views);
        engine.assemble_default(model, view_type, branding)
    }

    pub fn view_cache(&self) -> &ViewCache {
        &self.view_cache
    }

    fn begin<'s>(&self, store: &'s mut Store, registry: Arc<Registry>, uid: RecordId) -> Transaction<'s> {
        Transaction::new(store, registry, uid).with_max_recompute_rounds(self.config.max_recompute_rounds)
    }

    fn next_generation(&self) -> u64 {
        self.registry.load().generation() + 1
    }

    /// Makes `registry` current for `installed`.
    fn publish(&self, registry: Arc<Registry>, installed: BTreeSet<String>) -> Result<(), CoreError> {
        let generation = registry.generation();
        self.registry.store(registry);
        *self.installed.write().map_err(|_| CoreError::LockPoisoned)? = installed;
        self.view_cache.clear()?;
        tracing::info!(generation, "registry swapped");
        Ok(())
    }
}

/// Every group named by a field declaration must exist as a record.
fn validate_groups(tx: &Transaction<'_>) -> Result<(), CoreError> {
    let store = tx.store();
    tx.registry().validate_groups(|name| {
        store
            .xmlid(name)
            .is_some_and(|x| x.model == GROUPS_MODEL && store.exists(GROUPS_MODEL, x.res_id))
    })
}
