//! Pairwise graph scoring model.
//!
//! Scores an assignment of labels to graph nodes as the sum of weights of
//! `(label_a, label_b, relation)` features over the query's arcs. Training
//! uses margin-augmented inference with a structured perceptron update;
//! inference is an iterated conditional sweep over the inferred nodes.

use std::collections::HashMap;
use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::PathBuf;
use std::sync::RwLock;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::ModelError;
use crate::model::ScoringModel;
use crate::stats::PrecisionStats;

const INFERENCE_SWEEPS: usize = 8;
/// Scales the per-update L2 decay derived from the regularization constant.
const REG_DECAY_SCALE: f64 = 0.01;

/// One arc of a query graph: directed pair of node ids plus a relation.
#[derive(Clone, Debug)]
pub struct QueryArc {
    pub a: u64,
    pub b: u64,
    pub rel: String,
}

/// Parsed query: the arc list of one record.
#[derive(Clone, Debug, Default)]
pub struct Query {
    pub arcs: Vec<QueryArc>,
}

/// A node label, interned when the model vocabulary knows the string.
///
/// A given string always parses to the same variant (`Id` iff interned),
/// so derived equality is exact string equality.
#[derive(Clone, Debug, PartialEq, Eq)]
enum Label {
    Id(u32),
    Raw(String),
}

#[derive(Clone, Debug)]
struct Slot {
    node: u64,
    label: Option<Label>,
    given: bool,
}

/// Arc with endpoints resolved to slot indices of one assignment.
#[derive(Clone, Debug)]
struct ResolvedArc {
    a_slot: Option<usize>,
    b_slot: Option<usize>,
    rel: String,
}

/// Parsed assignment: labeled slots plus the query arcs resolved against
/// them, so the assignment can be scored on its own.
#[derive(Clone, Debug)]
pub struct Assignment {
    slots: Vec<Slot>,
    arcs: Vec<ResolvedArc>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
struct ArcFeature {
    a: u32,
    b: u32,
    rel: u32,
}

#[derive(Clone, Debug, Default)]
struct Interner {
    by_name: HashMap<String, u32>,
    names: Vec<String>,
}

impl Interner {
    fn intern(&mut self, name: &str) -> u32 {
        if let Some(&id) = self.by_name.get(name) {
            return id;
        }
        let id = self.names.len() as u32;
        self.names.push(name.to_string());
        self.by_name.insert(name.to_string(), id);
        id
    }

    fn get(&self, name: &str) -> Option<u32> {
        self.by_name.get(name).copied()
    }

    fn name(&self, id: u32) -> &str {
        &self.names[id as usize]
    }
}

#[derive(Debug, Default)]
struct Structure {
    labels: Interner,
    relations: Interner,
    feature_index: HashMap<ArcFeature, usize>,
    /// f64 bit patterns; updated lock-free during Hogwild passes.
    weights: Vec<AtomicU64>,
    /// Label ids eligible as inference candidates, sorted.
    candidates: Vec<u32>,
}

impl Structure {
    fn weight(&self, feature: ArcFeature) -> f64 {
        match self.feature_index.get(&feature) {
            Some(&idx) => f64::from_bits(self.weights[idx].load(Ordering::Relaxed)),
            None => 0.0,
        }
    }
}

/// Reads shared state without write contention during passes; structural
/// writes happen only in the init phase and between passes.
pub struct PairwiseModel {
    structure: RwLock<Structure>,
    regularization: f64,
    margin: f64,
}

impl Default for PairwiseModel {
    fn default() -> Self {
        Self::new()
    }
}

impl PairwiseModel {
    pub fn new() -> Self {
        Self { structure: RwLock::new(Structure::default()), regularization: 0.0, margin: 0.0 }
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, Structure> {
        self.structure.read().unwrap_or_else(|p| p.into_inner())
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, Structure> {
        self.structure.write().unwrap_or_else(|p| p.into_inner())
    }

    fn structure_mut(&mut self) -> &mut Structure {
        match self.structure.get_mut() {
            Ok(s) => s,
            Err(p) => p.into_inner(),
        }
    }
}

/// Add `delta` to a weight cell. Deliberately not a compare-and-swap loop:
/// concurrent Hogwild updates may overwrite each other and lose a step,
/// which the optimization tolerates. Keep this confined to weight cells.
fn hogwild_add(cell: &AtomicU64, delta: f64) {
    let current = f64::from_bits(cell.load(Ordering::Relaxed));
    cell.store((current + delta).to_bits(), Ordering::Relaxed);
}

fn hogwild_scale(cell: &AtomicU64, factor: f64) {
    let current = f64::from_bits(cell.load(Ordering::Relaxed));
    cell.store((current * factor).to_bits(), Ordering::Relaxed);
}

fn label_value(raw: &Value) -> Option<String> {
    match raw {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

impl PairwiseModel {
    fn label_id(&self, structure: &Structure, label: &Label) -> Option<u32> {
        match label {
            Label::Id(id) => Some(*id),
            Label::Raw(name) => structure.labels.get(name),
        }
    }

    /// Current label ids per slot (None for unlabeled or unknown labels).
    fn slot_label_ids(&self, structure: &Structure, assign: &Assignment) -> Vec<Option<u32>> {
        assign
            .slots
            .iter()
            .map(|slot| slot.label.as_ref().and_then(|l| self.label_id(structure, l)))
            .collect()
    }

    /// Score contribution of all arcs touching `slot` if it took `label`,
    /// with the other endpoints labeled as in `labels`.
    fn node_score(
        &self,
        structure: &Structure,
        assign: &Assignment,
        rel_ids: &[Option<u32>],
        labels: &[Option<u32>],
        slot: usize,
        label: u32,
    ) -> f64 {
        let mut score = 0.0;
        for (arc_idx, arc) in assign.arcs.iter().enumerate() {
            let Some(rel) = rel_ids[arc_idx] else { continue };
            if arc.a_slot == Some(slot) {
                if let Some(other) = arc.b_slot.and_then(|s| labels[s]) {
                    score += structure.weight(ArcFeature { a: label, b: other, rel });
                }
            }
            if arc.b_slot == Some(slot) {
                if let Some(other) = arc.a_slot.and_then(|s| labels[s]) {
                    score += structure.weight(ArcFeature { a: other, b: label, rel });
                }
            }
        }
        score
    }

    /// Iterated conditional sweeps: each inferred slot takes the candidate
    /// label maximizing its local score (minus `margin` for keeping the
    /// reference label, when loss-augmented). Runs until stable or the
    /// sweep limit.
    fn run_inference(
        &self,
        structure: &Structure,
        assign: &mut Assignment,
        reference: Option<&[Option<u32>]>,
        margin: f64,
    ) {
        let rel_ids: Vec<Option<u32>> =
            assign.arcs.iter().map(|arc| structure.relations.get(&arc.rel)).collect();
        let mut labels = self.slot_label_ids(structure, assign);

        for _ in 0..INFERENCE_SWEEPS {
            let mut changed = false;
            for slot in 0..assign.slots.len() {
                if assign.slots[slot].given {
                    continue;
                }
                let mut best = labels[slot];
                let mut best_score = match labels[slot] {
                    Some(current) => {
                        self.node_score(structure, assign, &rel_ids, &labels, slot, current)
                            - margin_penalty(reference, margin, slot, current)
                    }
                    None => f64::NEG_INFINITY,
                };
                for &cand in &structure.candidates {
                    if Some(cand) == labels[slot] {
                        continue;
                    }
                    let score =
                        self.node_score(structure, assign, &rel_ids, &labels, slot, cand)
                            - margin_penalty(reference, margin, slot, cand);
                    if score > best_score {
                        best_score = score;
                        best = Some(cand);
                    }
                }
                if best != labels[slot] {
                    labels[slot] = best;
                    changed = true;
                }
            }
            if !changed {
                break;
            }
        }

        for (slot, label) in assign.slots.iter_mut().zip(labels) {
            if !slot.given {
                slot.label = label.map(Label::Id);
            }
        }
    }
}

fn margin_penalty(reference: Option<&[Option<u32>]>, margin: f64, slot: usize, label: u32) -> f64 {
    match reference {
        Some(refs) if refs[slot] == Some(label) => margin,
        _ => 0.0,
    }
}

impl ScoringModel for PairwiseModel {
    type Query = Query;
    type Assignment = Assignment;
    type Snapshot = Vec<f64>;

    fn parse_query(&self, raw: &Value) -> Result<Query, ModelError> {
        let entries = raw
            .as_array()
            .ok_or_else(|| ModelError::MalformedQuery("query is not an array".to_string()))?;
        let mut arcs = Vec::new();
        for entry in entries {
            // Non-arc entries (no a/b/f2 triple) are metadata; ignore them.
            let (Some(a), Some(b), Some(rel)) =
                (entry["a"].as_u64(), entry["b"].as_u64(), entry["f2"].as_str())
            else {
                continue;
            };
            arcs.push(QueryArc { a, b, rel: rel.to_string() });
        }
        Ok(Query { arcs })
    }

    fn parse_assignment(&self, query: &Query, raw: &Value) -> Result<Assignment, ModelError> {
        let entries = raw.as_array().ok_or_else(|| {
            ModelError::MalformedAssignment("assignment is not an array".to_string())
        })?;
        let structure = self.read();
        let mut slots = Vec::with_capacity(entries.len());
        let mut by_node = HashMap::with_capacity(entries.len());
        for entry in entries {
            let node = entry["v"].as_u64().ok_or_else(|| {
                ModelError::MalformedAssignment(format!("entry without node id: {entry}"))
            })?;
            let (value, given) = if !entry["giv"].is_null() {
                (&entry["giv"], true)
            } else {
                (&entry["inf"], false)
            };
            let name = label_value(value).ok_or_else(|| {
                ModelError::MalformedAssignment(format!("entry without label: {entry}"))
            })?;
            let label = match structure.labels.get(&name) {
                Some(id) => Label::Id(id),
                None => Label::Raw(name),
            };
            by_node.entry(node).or_insert(slots.len());
            slots.push(Slot { node, label: Some(label), given });
        }
        let arcs = query
            .arcs
            .iter()
            .map(|arc| ResolvedArc {
                a_slot: by_node.get(&arc.a).copied(),
                b_slot: by_node.get(&arc.b).copied(),
                rel: arc.rel.clone(),
            })
            .collect();
        Ok(Assignment { slots, arcs })
    }

    fn add_query(&self, _query: &Query, assign: &Assignment) {
        let mut structure = self.write();
        // Resolve label strings before interning so Raw labels from the
        // first records enter the vocabulary.
        let names: Vec<Option<String>> = assign
            .slots
            .iter()
            .map(|slot| {
                slot.label.as_ref().map(|l| match l {
                    Label::Id(id) => structure.labels.name(*id).to_string(),
                    Label::Raw(name) => name.clone(),
                })
            })
            .collect();
        for (slot, name) in assign.slots.iter().zip(&names) {
            if let Some(name) = name {
                let id = structure.labels.intern(name);
                if !slot.given {
                    structure.candidates.push(id);
                }
            }
        }
        for arc in &assign.arcs {
            let (Some(a_slot), Some(b_slot)) = (arc.a_slot, arc.b_slot) else { continue };
            let (Some(a_name), Some(b_name)) = (&names[a_slot], &names[b_slot]) else { continue };
            let a = structure.labels.intern(a_name);
            let b = structure.labels.intern(b_name);
            let rel = structure.relations.intern(&arc.rel);
            let feature = ArcFeature { a, b, rel };
            if !structure.feature_index.contains_key(&feature) {
                let idx = structure.weights.len();
                structure.weights.push(AtomicU64::new(0f64.to_bits()));
                structure.feature_index.insert(feature, idx);
            }
        }
    }

    fn prepare_for_inference(&mut self) {
        let structure = self.structure_mut();
        structure.candidates.sort_unstable();
        structure.candidates.dedup();
    }

    fn ssvm_init(&mut self, regularization: f64, margin: f64) {
        self.regularization = regularization;
        self.margin = margin;
    }

    fn ssvm_learn(
        &self,
        _query: &Query,
        assign: &Assignment,
        learning_rate: f64,
        stats: &PrecisionStats,
    ) {
        let structure = self.read();
        let reference = self.slot_label_ids(&structure, assign);

        let mut predicted = assign.clone();
        self.clear_inferred(&mut predicted);
        self.run_inference(&structure, &mut predicted, Some(reference.as_slice()), self.margin);
        let prediction = self.slot_label_ids(&structure, &predicted);

        let mut correct = 0u64;
        let mut incorrect = 0u64;
        for (slot, (pred, reference)) in
            assign.slots.iter().zip(prediction.iter().zip(&reference))
        {
            if slot.given {
                continue;
            }
            if pred == reference {
                correct += 1;
            } else {
                incorrect += 1;
            }
        }
        stats.record(correct, incorrect);

        // Structured perceptron step: reward reference features, penalize
        // predicted features, then decay the touched reference weights.
        let decay = 1.0 - learning_rate * self.regularization * REG_DECAY_SCALE;
        let rel_ids: Vec<Option<u32>> =
            assign.arcs.iter().map(|arc| structure.relations.get(&arc.rel)).collect();
        for (arc_idx, arc) in assign.arcs.iter().enumerate() {
            let Some(rel) = rel_ids[arc_idx] else { continue };
            let (Some(a_slot), Some(b_slot)) = (arc.a_slot, arc.b_slot) else { continue };
            let ref_feature = match (reference[a_slot], reference[b_slot]) {
                (Some(a), Some(b)) => Some(ArcFeature { a, b, rel }),
                _ => None,
            };
            let pred_feature = match (prediction[a_slot], prediction[b_slot]) {
                (Some(a), Some(b)) => Some(ArcFeature { a, b, rel }),
                _ => None,
            };
            if ref_feature == pred_feature {
                continue;
            }
            if let Some(feature) = ref_feature {
                if let Some(&idx) = structure.feature_index.get(&feature) {
                    hogwild_add(&structure.weights[idx], learning_rate);
                    hogwild_scale(&structure.weights[idx], decay);
                }
            }
            if let Some(feature) = pred_feature {
                if let Some(&idx) = structure.feature_index.get(&feature) {
                    hogwild_add(&structure.weights[idx], -learning_rate);
                }
            }
        }
    }

    fn assignment_score(&self, assign: &Assignment) -> f64 {
        let structure = self.read();
        let labels = self.slot_label_ids(&structure, assign);
        let mut score = 0.0;
        for arc in &assign.arcs {
            let Some(rel) = structure.relations.get(&arc.rel) else { continue };
            let (Some(a), Some(b)) = (
                arc.a_slot.and_then(|s| labels[s]),
                arc.b_slot.and_then(|s| labels[s]),
            ) else {
                continue;
            };
            score += structure.weight(ArcFeature { a, b, rel });
        }
        score
    }

    fn map_inference(&self, _query: &Query, assign: &mut Assignment) {
        let structure = self.read();
        self.run_inference(&structure, assign, None, 0.0);
    }

    fn clear_inferred(&self, assign: &mut Assignment) {
        for slot in assign.slots.iter_mut() {
            if !slot.given {
                slot.label = None;
            }
        }
    }

    fn compare_assignments(
        &self,
        assign: &Assignment,
        reference: &Assignment,
        stats: &PrecisionStats,
    ) {
        let mut correct = 0u64;
        let mut incorrect = 0u64;
        for (slot, ref_slot) in assign.slots.iter().zip(&reference.slots) {
            if ref_slot.given {
                continue;
            }
            if slot.label == ref_slot.label {
                correct += 1;
            } else {
                incorrect += 1;
            }
        }
        stats.record(correct, incorrect);
    }

    fn snapshot(&self) -> Vec<f64> {
        let structure = self.read();
        structure.weights.iter().map(|w| f64::from_bits(w.load(Ordering::Relaxed))).collect()
    }

    fn restore(&mut self, snapshot: Vec<f64>) {
        let structure = self.structure_mut();
        debug_assert_eq!(structure.weights.len(), snapshot.len());
        for (cell, value) in structure.weights.iter().zip(snapshot) {
            cell.store(value.to_bits(), Ordering::Relaxed);
        }
    }

    fn save(&self, prefix: &str) -> Result<(), ModelError> {
        let path = PathBuf::from(format!("{prefix}.json"));
        let io_err = |source| ModelError::Io { path: path.clone(), source };
        let structure = self.read();

        let mut features: Vec<(&ArcFeature, usize)> =
            structure.feature_index.iter().map(|(f, &idx)| (f, idx)).collect();
        features.sort_by_key(|&(_, idx)| idx);

        let file = File::create(&path).map_err(io_err)?;
        let mut writer = BufWriter::new(file);
        let header = ModelHeader {
            version: MODEL_FORMAT_VERSION,
            labels: structure.labels.names.clone(),
            relations: structure.relations.names.clone(),
            candidates: structure.candidates.clone(),
            features: features.len(),
        };
        serde_json::to_writer(&mut writer, &header)
            .map_err(|e| io_err(std::io::Error::other(e)))?;
        writeln!(writer).map_err(io_err)?;
        for (feature, idx) in features {
            let line = FeatureLine {
                a: feature.a,
                b: feature.b,
                f: feature.rel,
                w: f64::from_bits(structure.weights[idx].load(Ordering::Relaxed)),
            };
            serde_json::to_writer(&mut writer, &line)
                .map_err(|e| io_err(std::io::Error::other(e)))?;
            writeln!(writer).map_err(io_err)?;
        }
        writer.flush().map_err(io_err)?;
        Ok(())
    }

    fn load(&mut self, prefix: &str) -> Result<(), ModelError> {
        let path = PathBuf::from(format!("{prefix}.json"));
        let io_err = |source| ModelError::Io { path: path.clone(), source };
        let corrupted = |reason: String| ModelError::Corrupted { path: path.clone(), reason };

        let file = File::open(&path).map_err(io_err)?;
        let mut lines = BufReader::new(file).lines();
        let header_line = lines
            .next()
            .ok_or_else(|| corrupted("missing header".to_string()))?
            .map_err(io_err)?;
        let header: ModelHeader = serde_json::from_str(&header_line)
            .map_err(|e| corrupted(format!("bad header: {e}")))?;
        if header.version != MODEL_FORMAT_VERSION {
            return Err(corrupted(format!("unsupported version {}", header.version)));
        }

        let mut structure = Structure {
            labels: Interner::default(),
            relations: Interner::default(),
            feature_index: HashMap::with_capacity(header.features),
            weights: Vec::with_capacity(header.features),
            candidates: header.candidates,
        };
        for name in &header.labels {
            structure.labels.intern(name);
        }
        for name in &header.relations {
            structure.relations.intern(name);
        }
        for line in lines {
            let line = line.map_err(io_err)?;
            if line.trim().is_empty() {
                continue;
            }
            let feature: FeatureLine = serde_json::from_str(&line)
                .map_err(|e| corrupted(format!("bad feature line: {e}")))?;
            let idx = structure.weights.len();
            structure.weights.push(AtomicU64::new(feature.w.to_bits()));
            structure
                .feature_index
                .insert(ArcFeature { a: feature.a, b: feature.b, rel: feature.f }, idx);
        }
        if structure.weights.len() != header.features {
            return Err(corrupted(format!(
                "expected {} features, found {}",
                header.features,
                structure.weights.len()
            )));
        }
        *self.structure_mut() = structure;
        Ok(())
    }
}

const MODEL_FORMAT_VERSION: u32 = 1;

#[derive(Serialize, Deserialize)]
struct ModelHeader {
    version: u32,
    labels: Vec<String>,
    relations: Vec<String>,
    candidates: Vec<u32>,
    features: usize,
}

#[derive(Serialize, Deserialize)]
struct FeatureLine {
    a: u32,
    b: u32,
    f: u32,
    w: f64,
}
