// SPDX-License-Identifier: AGPL-3.0-or-later
// © 2025 Ryo ∴ SpiralArchitect (kishkavsesvit@icloud.com)
// Part of SpiralTorch — Licensed under AGPL-3.0-or-later.
// Unauthorized derivative works or closed redistribution prohibited under AGPL §13.

//! Feature-bearing examples, interaction expansion and the weight tables the
//! matrix builder reads from.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::warn;

/// Multiplier used when hashing interaction terms together.
pub const FNV_PRIME: u64 = 16_777_619;

/// Widest parameter table either weight store accepts.
pub const MAX_WEIGHT_BITS: u32 = 32;

fn clamp_bits(bits: u32) -> u32 {
    if bits > MAX_WEIGHT_BITS {
        warn!(bits, max = MAX_WEIGHT_BITS, "clamping weight table width");
    }
    bits.min(MAX_WEIGHT_BITS)
}

/// Single hashed feature activation inside a namespace.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Feature {
    pub index: u64,
    pub value: f32,
}

impl Feature {
    pub fn new(index: u64, value: f32) -> Self {
        Self { index, value }
    }
}

/// Group of features sharing a namespace index.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Namespace {
    pub index: u8,
    pub features: Vec<Feature>,
}

impl Namespace {
    pub fn new(index: u8, features: Vec<Feature>) -> Self {
        Self { index, features }
    }
}

/// Cost label attached to the action that was played.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct CbLabel {
    pub cost: f32,
    pub probability: f32,
}

/// One example of a multi-line batch: either the shared context or an action.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Example {
    pub namespaces: Vec<Namespace>,
    pub label: Option<CbLabel>,
}

impl Example {
    pub fn new(namespaces: Vec<Namespace>) -> Self {
        Self {
            namespaces,
            label: None,
        }
    }

    pub fn with_label(mut self, cost: f32, probability: f32) -> Self {
        self.label = Some(CbLabel { cost, probability });
        self
    }

    /// Total number of linear features across all namespaces.
    pub fn feature_count(&self) -> usize {
        self.namespaces.iter().map(|ns| ns.features.len()).sum()
    }
}

/// Predicted score for one action. `action` indexes [`ActionBatch::actions`].
///
/// Scores follow the cost convention of the base learner: lower is better.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct ActionScore {
    pub action: u32,
    pub score: f32,
}

impl ActionScore {
    pub fn new(action: u32, score: f32) -> Self {
        Self { action, score }
    }
}

/// Ordered batch handed to the reduction. The optional shared example is not
/// a matrix row; its namespaces are merged into every action while expanding.
#[derive(Clone, Debug, Default)]
pub struct ActionBatch {
    pub shared: Option<Example>,
    pub actions: Vec<Example>,
    pub predictions: Vec<ActionScore>,
}

impl ActionBatch {
    pub fn new(shared: Option<Example>, actions: Vec<Example>) -> Self {
        Self {
            shared,
            actions,
            predictions: Vec::new(),
        }
    }

    pub fn action_count(&self) -> usize {
        self.actions.len()
    }
}

/// Namespace interaction terms expanded on top of the linear features.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Interactions {
    terms: Vec<Vec<u8>>,
}

impl Interactions {
    pub fn new(terms: Vec<Vec<u8>>) -> Self {
        Self {
            terms: terms.into_iter().filter(|term| term.len() >= 2).collect(),
        }
    }

    /// Builds pairwise terms from namespace characters, e.g. `["ab", "ac"]`.
    pub fn quadratic<S: AsRef<str>>(pairs: &[S]) -> Self {
        Self::new(
            pairs
                .iter()
                .map(|pair| pair.as_ref().bytes().collect())
                .collect(),
        )
    }

    pub fn terms(&self) -> &[Vec<u8>] {
        &self.terms
    }

    pub fn is_empty(&self) -> bool {
        self.terms.is_empty()
    }

    /// True when every term is a pair, the only shape the explicit vector
    /// kernel of the one-pass engine is tuned for.
    pub fn is_quadratic_only(&self) -> bool {
        self.terms.iter().all(|term| term.len() == 2)
    }

    /// Enumerates every activation of `example` with `shared` merged in:
    /// linear features first, then each interaction term in order.
    pub fn for_each_activation<F>(&self, example: &Example, shared: Option<&Example>, mut f: F)
    where
        F: FnMut(u64, f32),
    {
        let parts: [Option<&Example>; 2] = [Some(example), shared];
        for part in parts.iter().flatten() {
            for ns in &part.namespaces {
                for feature in &ns.features {
                    f(feature.index, feature.value);
                }
            }
        }

        for term in &self.terms {
            let mut partial: Vec<(u64, f32)> = namespace_features(&parts, term[0])
                .map(|feature| (feature.index, feature.value))
                .collect();
            for &ns in &term[1..] {
                if partial.is_empty() {
                    break;
                }
                let mut next = Vec::with_capacity(partial.len());
                for &(hash, value) in &partial {
                    for feature in namespace_features(&parts, ns) {
                        next.push((
                            hash.wrapping_mul(FNV_PRIME) ^ feature.index,
                            value * feature.value,
                        ));
                    }
                }
                partial = next;
            }
            for (index, value) in partial {
                f(index, value);
            }
        }
    }
}

fn namespace_features<'a>(
    parts: &'a [Option<&'a Example>; 2],
    ns: u8,
) -> impl Iterator<Item = &'a Feature> + 'a {
    parts
        .iter()
        .flatten()
        .flat_map(|part| part.namespaces.iter())
        .filter(move |namespace| namespace.index == ns)
        .flat_map(|namespace| namespace.features.iter())
}

/// Read-only view over the learned parameter table.
pub trait WeightTable: Send + Sync {
    /// Mask truncating raw feature indices to the table size.
    fn mask(&self) -> u64;

    /// Weight stored at `index & mask()`.
    fn weight(&self, index: u64) -> f32;

    /// Logical number of slots in the table.
    fn table_size(&self) -> u64 {
        self.mask() + 1
    }
}

/// Dense `2^bits` parameter table.
#[derive(Clone, Debug)]
pub struct DenseWeights {
    bits: u32,
    weights: Vec<f32>,
}

impl DenseWeights {
    /// `bits` above [`MAX_WEIGHT_BITS`] is clamped.
    pub fn new(bits: u32) -> Self {
        let bits = clamp_bits(bits);
        Self {
            bits,
            weights: vec![0.0; 1usize << bits],
        }
    }

    pub fn bits(&self) -> u32 {
        self.bits
    }

    pub fn set(&mut self, index: u64, value: f32) {
        let slot = (index & self.mask()) as usize;
        self.weights[slot] = value;
    }

    pub fn add(&mut self, index: u64, delta: f32) {
        let slot = (index & self.mask()) as usize;
        self.weights[slot] += delta;
    }
}

impl WeightTable for DenseWeights {
    fn mask(&self) -> u64 {
        (1u64 << self.bits) - 1
    }

    fn weight(&self, index: u64) -> f32 {
        self.weights[(index & self.mask()) as usize]
    }
}

/// Hash-map backed `2^bits` parameter table for very wide feature spaces.
#[derive(Clone, Debug, Default)]
pub struct SparseWeights {
    bits: u32,
    weights: HashMap<u64, f32>,
}

impl SparseWeights {
    /// `bits` above [`MAX_WEIGHT_BITS`] is clamped.
    pub fn new(bits: u32) -> Self {
        Self {
            bits: clamp_bits(bits),
            weights: HashMap::new(),
        }
    }

    pub fn bits(&self) -> u32 {
        self.bits
    }

    pub fn set(&mut self, index: u64, value: f32) {
        let slot = index & self.mask();
        if value == 0.0 {
            self.weights.remove(&slot);
        } else {
            self.weights.insert(slot, value);
        }
    }

    pub fn add(&mut self, index: u64, delta: f32) {
        let slot = index & self.mask();
        *self.weights.entry(slot).or_insert(0.0) += delta;
    }

    /// Number of explicitly stored slots.
    pub fn stored(&self) -> usize {
        self.weights.len()
    }
}

impl WeightTable for SparseWeights {
    fn mask(&self) -> u64 {
        (1u64 << self.bits) - 1
    }

    fn weight(&self, index: u64) -> f32 {
        self.weights
            .get(&(index & self.mask()))
            .copied()
            .unwrap_or(0.0)
    }
}
