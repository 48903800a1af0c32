//! Construction of overlapping patches by sweeping through the domain.
use crate::error::PatchError;
use crate::options::Options;
use crate::topology::{Topology, GHOST_LABEL};
use log::{debug, info, warn};
use nalgebra::DVector;
use ordered_float::OrderedFloat;
use rayon::prelude::*;
use std::collections::BTreeMap;
use std::fmt;
use std::fmt::Debug;
use std::str::FromStr;
use std::sync::Arc;

/// Option holding the sweeps of the plane smoother, e.g. `0+2:1-3`.
pub const SWEEPS_OPTION: &str = "pc_patch_construct_ps_sweeps";

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum SweepDirection {
    Ascending,
    Descending,
}

/// A sweep along a coordinate axis, cutting the domain into `divisions` slabs.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct Sweep {
    pub axis: usize,
    pub direction: SweepDirection,
    pub divisions: usize,
}

impl FromStr for Sweep {
    type Err = eyre::Report;

    /// Parses `<axis><+|-><divisions>`, e.g. `1-3`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let malformed = || {
            PatchError::configuration(format!(
                "Malformed sweep \"{}\", expected <axis><+|-><divisions>",
                s
            ))
        };
        let sign = s.find(|c: char| c == '+' || c == '-').ok_or_else(malformed)?;
        let (axis, rest) = s.split_at(sign);
        let direction = if rest.starts_with('+') {
            SweepDirection::Ascending
        } else {
            SweepDirection::Descending
        };
        let axis: usize = axis.parse().map_err(|_| malformed())?;
        let divisions: usize = rest[1..].parse().map_err(|_| malformed())?;
        if divisions == 0 {
            return Err(PatchError::configuration(format!(
                "Sweep \"{}\" must have at least one division",
                s
            )));
        }
        Ok(Self {
            axis,
            direction,
            divisions,
        })
    }
}

impl fmt::Display for Sweep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sign = match self.direction {
            SweepDirection::Ascending => '+',
            SweepDirection::Descending => '-',
        };
        write!(f, "{}{}{}", self.axis, sign, self.divisions)
    }
}

/// Parses a colon-separated list of sweeps.
pub fn parse_sweeps(sweeps: &str) -> eyre::Result<Vec<Sweep>> {
    sweeps.split(':').map(str::parse).collect()
}

/// Ordered patches of mesh points together with the order in which to visit them.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PatchCollection {
    pub patches: Vec<Vec<usize>>,
    pub iteration_order: Vec<usize>,
}

impl PatchCollection {
    /// Visits the patches in the order they are given.
    pub fn from_patches(patches: Vec<Vec<usize>>) -> Self {
        let iteration_order = (0..patches.len()).collect();
        Self {
            patches,
            iteration_order,
        }
    }

    pub fn len(&self) -> usize {
        self.patches.len()
    }

    pub fn is_empty(&self) -> bool {
        self.patches.is_empty()
    }
}

/// Builds patches from a topology, reading its parameters from a prefixed options view.
pub trait PatchConstructionStrategy: Debug + Send + Sync {
    fn construct(&self, topology: &dyn Topology, options: &Options<'_>) -> eyre::Result<PatchCollection>;
}

/// Cuts the domain into slabs orthogonal to a coordinate axis.
///
/// Every sweep sorts the eligible points by their centroid along the sweep axis and divides
/// the coordinate range into equally wide slabs, each of which becomes a patch. Points carrying
/// the exclusion label are never part of a patch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlaneSmoother {
    pub exclude_label: Option<String>,
}

impl Default for PlaneSmoother {
    fn default() -> Self {
        Self {
            exclude_label: Some(GHOST_LABEL.to_string()),
        }
    }
}

type Centroids = Vec<(usize, DVector<f64>)>;

impl PlaneSmoother {
    fn eligible_entities(&self, topology: &dyn Topology) -> Centroids {
        let exclude = self.exclude_label.as_deref();
        topology
            .chart()
            .into_par_iter()
            .filter(|&p| exclude.map_or(true, |label| topology.label_value(label, p).is_none()))
            .map(|p| (p, topology.closure_centroid(p)))
            .collect()
    }

    /// Sorts the eligible points of `topology` along the sweep and divides them into slabs.
    pub fn sort_entities(&self, topology: &dyn Topology, sweep: &Sweep) -> eyre::Result<Vec<Vec<usize>>> {
        let entities = self.eligible_entities(topology);
        divide(&entities, topology.geometric_dim(), sweep)
    }

    /// Concatenates the slabs of all sweeps, in sweep order.
    pub fn build_patches(&self, topology: &dyn Topology, sweeps: &[Sweep]) -> eyre::Result<PatchCollection> {
        let entities = self.eligible_entities(topology);
        let dim = topology.geometric_dim();
        let mut patches = Vec::new();
        for sweep in sweeps {
            let bins = divide(&entities, dim, sweep)?;
            debug!("Sweep {} produced bins of sizes {:?}", sweep, bins.iter().map(Vec::len).collect::<Vec<_>>());
            patches.extend(bins);
        }
        info!(
            "Constructed {} patches from {} sweeps over {} points",
            patches.len(),
            sweeps.len(),
            entities.len()
        );
        Ok(PatchCollection::from_patches(patches))
    }
}

impl PatchConstructionStrategy for PlaneSmoother {
    fn construct(&self, topology: &dyn Topology, options: &Options<'_>) -> eyre::Result<PatchCollection> {
        let sweeps = parse_sweeps(options.require(SWEEPS_OPTION)?)?;
        self.build_patches(topology, &sweeps)
    }
}

fn divide(entities: &Centroids, dim: usize, sweep: &Sweep) -> eyre::Result<Vec<Vec<usize>>> {
    let Sweep { axis, direction, divisions } = *sweep;
    if axis >= dim {
        return Err(PatchError::configuration(format!(
            "Sweep {} runs along axis {}, but the domain has dimension {}",
            sweep, axis, dim
        )));
    }
    if divisions == 0 {
        return Err(PatchError::configuration(format!("Sweep {} has no divisions", sweep)));
    }
    if entities.is_empty() {
        return Err(PatchError::configuration("No points are eligible for patches"));
    }
    if divisions > entities.len() {
        return Err(PatchError::configuration(format!(
            "Sweep {} has more divisions than the {} eligible points",
            sweep,
            entities.len()
        )));
    }

    // Ties on the sweep axis are broken by the remaining coordinates in axis order
    let key = |x: &DVector<f64>| {
        std::iter::once(x[axis])
            .chain((0..dim).filter(|&i| i != axis).map(|i| x[i]))
            .map(OrderedFloat)
            .collect::<Vec<_>>()
    };
    let mut sorted: Vec<(Vec<OrderedFloat<f64>>, usize)> = entities.iter().map(|(p, x)| (key(x), *p)).collect();
    sorted.sort_unstable();

    let coords: Vec<f64> = sorted.iter().map(|(k, _)| k[0].into_inner()).collect();
    let min = coords[0];
    let max = coords[coords.len() - 1];
    let width = (max - min) / divisions as f64;

    let mut bounds = Vec::with_capacity(divisions + 1);
    bounds.push(0);
    for k in 1..divisions {
        let threshold = min + width * k as f64;
        bounds.push(coords.partition_point(|&c| c < threshold));
    }
    bounds.push(coords.len());

    let mut bins: Vec<Vec<usize>> = bounds
        .windows(2)
        .map(|w| sorted[w[0]..w[1]].iter().map(|(_, p)| *p).collect())
        .collect();
    if direction == SweepDirection::Descending {
        bins.reverse();
        for bin in &mut bins {
            bin.reverse();
        }
    }

    for (i, bin) in bins.iter().enumerate() {
        if bin.is_empty() {
            warn!("Bin {} of sweep {} is empty", i, sweep);
        }
    }
    Ok(bins)
}

/// Patch construction strategies by name.
#[derive(Debug, Clone)]
pub struct StrategyRegistry {
    strategies: BTreeMap<String, Arc<dyn PatchConstructionStrategy>>,
}

impl Default for StrategyRegistry {
    fn default() -> Self {
        let mut registry = Self::empty();
        registry.register("plane_smoother", Arc::new(PlaneSmoother::default()));
        registry
    }
}

impl StrategyRegistry {
    pub fn empty() -> Self {
        Self {
            strategies: BTreeMap::new(),
        }
    }

    /// Registers a strategy, replacing any strategy previously registered under the same name.
    pub fn register(&mut self, name: impl Into<String>, strategy: Arc<dyn PatchConstructionStrategy>) {
        self.strategies.insert(name.into(), strategy);
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.strategies.keys().map(String::as_str)
    }

    pub fn resolve(&self, name: &str) -> eyre::Result<Arc<dyn PatchConstructionStrategy>> {
        self.strategies.get(name).cloned().ok_or_else(|| {
            PatchError::configuration(format!(
                "Unknown patch construction type \"{}\", known types are: {}",
                name,
                self.names().collect::<Vec<_>>().join(", ")
            ))
        })
    }
}
