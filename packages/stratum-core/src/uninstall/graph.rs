//! Deletion-order graph over the records of an uninstall.
//!
//! An edge `a -> b` means every record of `a` must be deleted before any
//! record of `b`.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use crate::config::CoreConfig;
use crate::registry::{FieldType, OnDelete};
use crate::store::RecordId;
use crate::transaction::Reader;

/// Model of the groups whose records go after every other data record.
pub const GROUPS_MODEL: &str = "res.groups";

/// Kinds of metadata records, deleted after all data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum MetaClass {
    Constraints,
    Relations,
    Selections,
    Fields,
    Models,
}

impl MetaClass {
    pub const ALL: [MetaClass; 5] = [
        MetaClass::Constraints,
        MetaClass::Relations,
        MetaClass::Selections,
        MetaClass::Fields,
        MetaClass::Models,
    ];

    /// Model holding the metadata records of this class.
    pub fn model(&self) -> &'static str {
        match self {
            MetaClass::Constraints => "ir.model.constraint",
            MetaClass::Relations => "ir.model.relation",
            MetaClass::Selections => "ir.model.fields.selection",
            MetaClass::Fields => "ir.model.fields",
            MetaClass::Models => "ir.model",
        }
    }

    pub fn of_model(model: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|c| c.model() == model)
    }
}

/// Node of the graph.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum NodeKey {
    /// Data records of one model
    Records(String),
    /// Barrier between data records and group records
    Groups,
    /// Barrier in front of every metadata record of a class
    Class(MetaClass),
    /// One metadata record
    Meta { class: MetaClass, id: RecordId },
}

impl fmt::Display for NodeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NodeKey::Records(model) => write!(f, "records of {}", model),
            NodeKey::Groups => write!(f, "groups class"),
            NodeKey::Class(class) => write!(f, "{} class", class.model()),
            NodeKey::Meta { class, id } => write!(f, "{}#{}", class.model(), id),
        }
    }
}

/// Deletion graph.
#[derive(Debug, Default)]
pub struct UninstallGraph {
    /// Record ids of each node; empty for barriers
    nodes: BTreeMap<NodeKey, Vec<RecordId>>,
    /// Successors of each node
    edges: BTreeMap<NodeKey, BTreeSet<NodeKey>>,
    /// Human-readable node names
    labels: BTreeMap<NodeKey, String>,
}

impl UninstallGraph {
    /// Builds the graph for deleting `input` (model to record ids).
    pub fn build(reader: &Reader<'_>, input: &BTreeMap<String, BTreeSet<RecordId>>, config: &CoreConfig) -> Self {
        let mut graph = Self::default();
        for (model, ids) in input {
            if ids.is_empty() {
                continue;
            }
            match MetaClass::of_model(model) {
                Some(class) => {
                    graph.add_node(NodeKey::Class(class), Vec::new());
                    for id in ids {
                        let key = NodeKey::Meta { class, id: *id };
                        graph.labels.insert(key.clone(), meta_label(reader, class, *id));
                        graph.add_node(key.clone(), vec![*id]);
                        graph.add_edge(NodeKey::Class(class), key);
                    }
                }
                None => graph.add_node(NodeKey::Records(model.clone()), ids.iter().copied().collect()),
            }
        }
        if graph.nodes.is_empty() {
            return graph;
        }
        graph.add_barriers();
        graph.add_link_edges(reader, config);
        graph.add_owner_edges(reader);
        graph
    }

    fn add_node(&mut self, key: NodeKey, ids: Vec<RecordId>) {
        self.edges.entry(key.clone()).or_default();
        self.nodes.entry(key).or_default().extend(ids);
    }

    /// Adds `before -> after` between two existing nodes.
    pub fn add_edge(&mut self, before: NodeKey, after: NodeKey) {
        if before != after && self.nodes.contains_key(&before) && self.nodes.contains_key(&after) {
            self.edges.entry(before).or_default().insert(after);
        }
    }

    /// Data, then the groups barrier, then group records, then metadata.
    fn add_barriers(&mut self) {
        self.add_node(NodeKey::Groups, Vec::new());
        let groups = NodeKey::Records(GROUPS_MODEL.to_string());
        let data: Vec<NodeKey> = self
            .nodes
            .keys()
            .filter(|k| matches!(k, NodeKey::Records(_)) && **k != groups)
            .cloned()
            .collect();
        for key in data {
            self.add_edge(key, NodeKey::Groups);
        }
        self.add_edge(NodeKey::Groups, groups.clone());
        for class in MetaClass::ALL {
            self.add_edge(NodeKey::Groups, NodeKey::Class(class));
            self.add_edge(groups.clone(), NodeKey::Class(class));
        }
    }

    /// Referring data before referenced data, for cascade and restrict
    /// many2one links and allow-listed links, when a reference exists.
    fn add_link_edges(&mut self, reader: &Reader<'_>, config: &CoreConfig) {
        let data: Vec<(String, Vec<RecordId>)> = self
            .nodes
            .iter()
            .filter_map(|(k, ids)| match k {
                NodeKey::Records(model) => Some((model.clone(), ids.clone())),
                _ => None,
            })
            .collect();
        for (model, ids) in &data {
            let Ok(model_def) = reader.registry.model(model) else { continue };
            for field in model_def.ordered_fields() {
                let Some(comodel) = field.comodel.as_deref() else { continue };
                if field.field_type != FieldType::Many2one || !field.store || comodel == model {
                    continue;
                }
                let ordering = field.ondelete != OnDelete::SetNull || config.is_allow_listed(model, &field.name);
                let Some(targets) = self.nodes.get(&NodeKey::Records(comodel.to_string())) else { continue };
                if !ordering {
                    continue;
                }
                let referenced = ids.iter().any(|id| {
                    reader
                        .store
                        .record(model, *id)
                        .and_then(|r| r.get_id(&field.name))
                        .is_some_and(|target| targets.contains(&target))
                });
                if referenced {
                    self.add_edge(NodeKey::Records(model.clone()), NodeKey::Records(comodel.to_string()));
                }
            }
        }
    }

    /// Metadata goes innermost first: selections before their field,
    /// fields and constraints and relations before their model, one2many
    /// fields before their inverse, dependent fields before what they
    /// depend on.
    fn add_owner_edges(&mut self, reader: &Reader<'_>) {
        let field_ids: BTreeMap<(String, String), RecordId> = reader
            .store
            .table(MetaClass::Fields.model())
            .map(|t| {
                t.iter()
                    .filter_map(|r| {
                        let model = r.get_str("model")?.to_string();
                        let name = r.get_str("name")?.to_string();
                        Some(((model, name), r.id))
                    })
                    .collect()
            })
            .unwrap_or_default();
        let meta = |class: MetaClass, id: RecordId| NodeKey::Meta { class, id };

        let keys: Vec<NodeKey> = self.nodes.keys().cloned().collect();
        for key in keys {
            let NodeKey::Meta { class, id } = key else { continue };
            let Some(record) = reader.store.record(class.model(), id) else { continue };
            match class {
                MetaClass::Selections => {
                    if let Some(field) = record.get_id("field_id") {
                        self.add_edge(key.clone(), meta(MetaClass::Fields, field));
                    }
                }
                MetaClass::Constraints | MetaClass::Relations => {
                    if let Some(model) = record.get_id("model") {
                        self.add_edge(key.clone(), meta(MetaClass::Models, model));
                    }
                }
                MetaClass::Fields => {
                    if let Some(model) = record.get_id("model_id") {
                        self.add_edge(key.clone(), meta(MetaClass::Models, model));
                    }
                    let (Some(model), Some(name)) = (record.get_str("model"), record.get_str("name")) else {
                        continue;
                    };
                    let Ok(field) = reader.registry.field(model, name) else { continue };
                    if field.field_type == FieldType::One2many {
                        if let (Some(comodel), Some(inverse)) = (&field.comodel, &field.inverse_name) {
                            if let Some(target) = field_ids.get(&(comodel.clone(), inverse.clone())) {
                                self.add_edge(key.clone(), meta(MetaClass::Fields, *target));
                            }
                        }
                    }
                    let mut paths: Vec<Vec<String>> = Vec::new();
                    if let Some(compute) = &field.compute {
                        paths.extend(compute.depends.iter().map(|d| d.split('.').map(str::to_string).collect()));
                    }
                    if let Some(related) = &field.related {
                        paths.push(related.clone());
                    }
                    for path in paths {
                        let mut current = model.to_string();
                        for segment in path {
                            if let Some(target) = field_ids.get(&(current.clone(), segment.clone())) {
                                self.add_edge(key.clone(), meta(MetaClass::Fields, *target));
                            }
                            match reader.registry.field(&current, &segment).ok().and_then(|f| f.comodel.clone()) {
                                Some(next) => current = next,
                                None => break,
                            }
                        }
                    }
                }
                MetaClass::Models => {}
            }
        }
    }

    pub fn nodes(&self) -> impl Iterator<Item = (&NodeKey, &[RecordId])> {
        self.nodes.iter().map(|(k, ids)| (k, ids.as_slice()))
    }

    pub fn successors(&self, key: &NodeKey) -> impl Iterator<Item = &NodeKey> {
        self.edges.get(key).into_iter().flatten()
    }

    pub fn has_edge(&self, before: &NodeKey, after: &NodeKey) -> bool {
        self.edges.get(before).is_some_and(|s| s.contains(after))
    }

    /// Number of unfinished predecessors of every node.
    pub fn in_degrees(&self) -> BTreeMap<NodeKey, usize> {
        let mut degrees: BTreeMap<NodeKey, usize> = self.nodes.keys().map(|k| (k.clone(), 0)).collect();
        for successors in self.edges.values() {
            for succ in successors {
                if let Some(count) = degrees.get_mut(succ) {
                    *count += 1;
                }
            }
        }
        degrees
    }

    /// Predecessors of `key` within `among`.
    pub fn predecessors_in<'g>(&'g self, key: &'g NodeKey, among: &'g BTreeSet<NodeKey>) -> impl Iterator<Item = &'g NodeKey> {
        self.edges
            .iter()
            .filter(move |(pred, succ)| among.contains(*pred) && succ.contains(key))
            .map(|(pred, _)| pred)
    }

    pub fn label(&self, key: &NodeKey) -> String {
        self.labels.get(key).cloned().unwrap_or_else(|| key.to_string())
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}

fn meta_label(reader: &Reader<'_>, class: MetaClass, id: RecordId) -> String {
    let Some(record) = reader.store.record(class.model(), id) else {
        return format!("{}#{}", class.model(), id);
    };
    let detail = match class {
        MetaClass::Models => record.get_str("model").unwrap_or_default().to_string(),
        MetaClass::Fields => format!(
            "{}.{}",
            record.get_str("model").unwrap_or_default(),
            record.get_str("name").unwrap_or_default()
        ),
        MetaClass::Selections => record.get_str("value").unwrap_or_default().to_string(),
        MetaClass::Constraints | MetaClass::Relations => record.get_str("name").unwrap_or_default().to_string(),
    };
    format!("{}#{} ({})", class.model(), id, detail)
}
