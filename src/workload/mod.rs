pub mod gcd;

use std::{fmt, sync::Arc};

use rand::{rngs::StdRng, Rng, SeedableRng};

use crate::orchestra::WorkloadError;

/// Upper bound (exclusive) of the randomly generated operands.
pub const MAX_OPERAND: i64 = i32::MAX as i64;

/// A workload function, shared by reference between the registry and its worker.
pub type Compute = Arc<dyn Fn(i64, i64) -> Result<i64, WorkloadError> + Send + Sync>;

/// The operand pairs every workload of a registry iterates over.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Inputs {
    pairs: Vec<(i64, i64)>,
}

impl Inputs {
    pub fn new(pairs: Vec<(i64, i64)>) -> Self {
        Self { pairs }
    }

    /// Draws `iterations` operand pairs uniformly from `[0, MAX_OPERAND)`.
    ///
    /// # Arguments
    /// * `iterations` - The amount of pairs to generate.
    /// * `seed` - Makes the draw reproducible, a fresh seed is picked and logged when absent.
    pub fn random(iterations: usize, seed: Option<u64>) -> Self {
        let seed = seed.unwrap_or_else(|| rand::rng().random());
        log::debug!("generating {iterations} input pairs with seed {seed}");

        let mut rng = StdRng::seed_from_u64(seed);
        let pairs = (0..iterations)
            .map(|_| {
                (
                    rng.random_range(0..MAX_OPERAND),
                    rng.random_range(0..MAX_OPERAND),
                )
            })
            .collect();

        Self { pairs }
    }

    pub fn pairs(&self) -> &[(i64, i64)] {
        &self.pairs
    }

    pub fn len(&self) -> usize {
        self.pairs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }
}

/// A named workload function bound to the inputs it runs over.
#[derive(Clone)]
pub struct WorkloadEntry {
    name: Arc<str>,
    compute: Compute,
    inputs: Arc<Inputs>,
}

impl WorkloadEntry {
    /// Creates a new `WorkloadEntry`.
    ///
    /// # Arguments
    /// * `name` - Identifies the workload in progress events and reports.
    /// * `compute` - The function invoked once per input pair.
    /// * `inputs` - The operand pairs, usually shared with the rest of the registry.
    pub fn new<F>(name: impl Into<Arc<str>>, compute: F, inputs: Arc<Inputs>) -> Self
    where
        F: Fn(i64, i64) -> Result<i64, WorkloadError> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            compute: Arc::new(compute),
            inputs,
        }
    }

    pub fn name(&self) -> &Arc<str> {
        &self.name
    }

    pub fn inputs(&self) -> &Arc<Inputs> {
        &self.inputs
    }

    pub fn compute(&self, a: i64, b: i64) -> Result<i64, WorkloadError> {
        (self.compute)(a, b)
    }
}

impl fmt::Debug for WorkloadEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkloadEntry")
            .field("name", &self.name)
            .field("inputs", &self.inputs.len())
            .finish_non_exhaustive()
    }
}

/// Ordered list of workloads, one worker is launched per entry.
#[derive(Debug, Clone, Default)]
pub struct Registry {
    entries: Vec<WorkloadEntry>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// The four GCD variants over the same inputs.
    pub fn gcd(inputs: Arc<Inputs>) -> Self {
        let entry = |name: &str, compute: fn(i64, i64) -> Result<i64, WorkloadError>| {
            WorkloadEntry::new(name, compute, Arc::clone(&inputs))
        };

        Self::new()
            .with(entry("iterative_euclid", gcd::iterative_euclid))
            .with(entry("recursive_euclid", gcd::recursive_euclid))
            .with(entry("big_integer", gcd::big_integer))
            .with(entry("binary", gcd::binary))
    }

    /// Appends an entry, builder style.
    pub fn with(mut self, entry: WorkloadEntry) -> Self {
        self.entries.push(entry);
        self
    }

    pub fn push(&mut self, entry: WorkloadEntry) {
        self.entries.push(entry);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &WorkloadEntry> {
        self.entries.iter()
    }

    pub fn names(&self) -> Vec<String> {
        self.entries.iter().map(|e| e.name.to_string()).collect()
    }
}

impl IntoIterator for Registry {
    type Item = WorkloadEntry;
    type IntoIter = std::vec::IntoIter<WorkloadEntry>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.into_iter()
    }
}
