//! Sweep configuration space and its resumable enumeration.
//!
//! The space is visited in a fixed nested order:
//! device → tile size → variant → inner tuning axes (declared order, last
//! axis fastest). Inner axes are generic descriptors; an axis that does not
//! apply to a variant collapses to a single "absent" step so the variant is
//! still visited once.

use anyhow::{anyhow, bail, Result};
use kernelsweep_kernels::config::{CoarseFactor, Configuration, Device, KernelBuild, MatmulProblem, TuningParams};
use kernelsweep_kernels::variant::Variant;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum InnerAxisKind {
    UnrollStep,
    CoarseFactor,
}

/// One optional tuning axis nested inside the variant loop.
#[derive(Clone)]
pub struct InnerAxis {
    pub kind: InnerAxisKind,
    pub values: Vec<u32>,
    applies: fn(&Variant) -> bool,
}

impl fmt::Debug for InnerAxis {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InnerAxis")
            .field("kind", &self.kind)
            .field("values", &self.values)
            .finish()
    }
}

impl InnerAxis {
    pub fn new(kind: InnerAxisKind, values: Vec<u32>, applies: fn(&Variant) -> bool) -> Self {
        Self {
            kind,
            values,
            applies,
        }
    }

    /// Unroll steps, applicable to `unroll` variants. A step of 0 means no unrolling.
    pub fn unroll_steps(values: Vec<u32>) -> Self {
        Self::new(InnerAxisKind::UnrollStep, values, Variant::needs_unroll)
    }

    pub fn coarse_factors(values: Vec<u32>) -> Self {
        Self::new(InnerAxisKind::CoarseFactor, values, Variant::needs_coarsening)
    }

    pub fn applies_to(&self, variant: &Variant) -> bool {
        (self.applies)(variant) && !self.values.is_empty()
    }

    /// Number of iterations for `variant`; never zero.
    pub fn steps(&self, variant: &Variant) -> usize {
        if self.applies_to(variant) {
            self.values.len()
        } else {
            1
        }
    }

    fn value_at(&self, variant: &Variant, index: usize) -> Option<u32> {
        if self.applies_to(variant) {
            self.values.get(index).copied()
        } else {
            None
        }
    }

    fn apply(&self, params: TuningParams, value: Option<u32>) -> TuningParams {
        match (self.kind, value) {
            (_, None) => params,
            (InnerAxisKind::UnrollStep, Some(step)) => params.with_unroll_step(step),
            (InnerAxisKind::CoarseFactor, Some(factor)) => {
                params.with_coarse_factor(CoarseFactor::Uniform(factor))
            }
        }
    }
}

/// Position within the nested enumeration.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct SweepCursor {
    pub device: usize,
    pub tile_size: usize,
    pub variant: usize,
    /// One index per inner axis; missing entries count as 0.
    pub inner: Vec<usize>,
}

impl SweepCursor {
    pub fn new(device: usize, tile_size: usize, variant: usize) -> Self {
        Self {
            device,
            tile_size,
            variant,
            inner: Vec::new(),
        }
    }
}

impl fmt::Display for SweepCursor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = if self.inner.is_empty() {
            "-".to_string()
        } else {
            self.inner
                .iter()
                .map(usize::to_string)
                .collect::<Vec<_>>()
                .join("/")
        };
        write!(
            f,
            "device: {}, tile_size: {}, variant: {}, inner: {}",
            self.device, self.tile_size, self.variant, inner
        )
    }
}

impl FromStr for SweepCursor {
    type Err = anyhow::Error;

    /// Parses the checkpoint line format. `file` is accepted as an alias of
    /// `variant` and `inner` is optional, so older sweep logs still resume.
    fn from_str(line: &str) -> Result<Self> {
        let mut device = None;
        let mut tile_size = None;
        let mut variant = None;
        let mut inner = Vec::new();

        for field in line.split(',') {
            let (key, value) = field
                .split_once(':')
                .ok_or_else(|| anyhow!("checkpoint field `{}` has no value", field.trim()))?;
            let value = value.trim();
            match key.trim() {
                "device" => device = Some(parse_index(value)?),
                "tile_size" => tile_size = Some(parse_index(value)?),
                "variant" | "file" => variant = Some(parse_index(value)?),
                "inner" if value == "-" => inner.clear(),
                "inner" => {
                    inner = value
                        .split('/')
                        .map(parse_index)
                        .collect::<Result<Vec<_>>>()?
                }
                other => bail!("unknown checkpoint field `{other}`"),
            }
        }

        Ok(Self {
            device: device.ok_or_else(|| anyhow!("checkpoint line lacks `device`"))?,
            tile_size: tile_size.ok_or_else(|| anyhow!("checkpoint line lacks `tile_size`"))?,
            variant: variant.ok_or_else(|| anyhow!("checkpoint line lacks `variant`"))?,
            inner,
        })
    }
}

fn parse_index(value: &str) -> Result<usize> {
    value
        .trim()
        .parse()
        .map_err(|err| anyhow!("invalid checkpoint index `{value}`: {err}"))
}

/// One unit of sweep work: a build plus the cursor that addresses it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SweepStep {
    pub cursor: SweepCursor,
    pub build: KernelBuild,
}

#[derive(Debug, Clone, Default)]
pub struct SweepSpace {
    devices: Vec<Device>,
    tile_sizes: Vec<u32>,
    variants: Vec<Variant>,
    inner_axes: Vec<InnerAxis>,
    problems: Vec<MatmulProblem>,
}

impl SweepSpace {
    pub fn new(devices: Vec<Device>, tile_sizes: Vec<u32>, variants: Vec<Variant>) -> Self {
        Self {
            devices,
            tile_sizes,
            variants,
            inner_axes: Vec::new(),
            problems: Vec::new(),
        }
    }

    pub fn with_inner_axis(mut self, axis: InnerAxis) -> Self {
        self.inner_axes.push(axis);
        self
    }

    pub fn with_problems(mut self, problems: Vec<MatmulProblem>) -> Self {
        self.problems = problems;
        self
    }

    pub fn devices(&self) -> &[Device] {
        &self.devices
    }

    pub fn tile_sizes(&self) -> &[u32] {
        &self.tile_sizes
    }

    pub fn variants(&self) -> &[Variant] {
        &self.variants
    }

    pub fn inner_axes(&self) -> &[InnerAxis] {
        &self.inner_axes
    }

    pub fn problems(&self) -> &[MatmulProblem] {
        &self.problems
    }

    pub fn is_empty(&self) -> bool {
        self.devices.is_empty() || self.tile_sizes.is_empty() || self.variants.is_empty()
    }

    /// Total number of build steps in a from-scratch enumeration.
    pub fn len(&self) -> usize {
        let per_tile: usize = self.variants.iter().map(|v| self.inner_steps(v)).sum();
        self.devices.len() * self.tile_sizes.len() * per_tile
    }

    pub fn iter(&self) -> SweepIter<'_> {
        self.iter_from(SweepCursor::default())
    }

    /// Enumerates from `start`, visiting exactly the tail of a from-scratch
    /// enumeration. Inner indices that are out of range for the resumed
    /// variant reset to 0; outer indices past the end of their axis carry
    /// into the next outer position.
    pub fn iter_from(&self, start: SweepCursor) -> SweepIter<'_> {
        SweepIter {
            space: self,
            next: self.normalize(start),
        }
    }

    /// Expands a step into one configuration per problem size.
    pub fn configurations<'a>(&'a self, step: &'a SweepStep) -> impl Iterator<Item = Configuration> + 'a {
        self.problems
            .iter()
            .map(move |problem| Configuration::new(step.build.clone(), *problem))
    }

    fn inner_steps(&self, variant: &Variant) -> usize {
        self.inner_axes.iter().map(|axis| axis.steps(variant)).product()
    }

    fn normalize(&self, mut cursor: SweepCursor) -> Option<SweepCursor> {
        if self.is_empty() {
            return None;
        }
        if cursor.variant >= self.variants.len() {
            cursor.variant = 0;
            cursor.tile_size += 1;
            cursor.inner.clear();
        }
        if cursor.tile_size >= self.tile_sizes.len() {
            cursor.tile_size = 0;
            cursor.variant = 0;
            cursor.inner.clear();
            cursor.device += 1;
        }
        if cursor.device >= self.devices.len() {
            return None;
        }

        let variant = &self.variants[cursor.variant];
        cursor.inner.resize(self.inner_axes.len(), 0);
        for (index, axis) in cursor.inner.iter_mut().zip(&self.inner_axes) {
            if *index >= axis.steps(variant) {
                *index = 0;
            }
        }
        Some(cursor)
    }

    fn build_at(&self, cursor: &SweepCursor) -> KernelBuild {
        let variant = &self.variants[cursor.variant];
        let mut params = TuningParams::default().with_tile_size(self.tile_sizes[cursor.tile_size]);
        for (axis, index) in self.inner_axes.iter().zip(&cursor.inner) {
            params = axis.apply(params, axis.value_at(variant, *index));
        }
        KernelBuild::new(self.devices[cursor.device], variant.clone(), params)
    }

    fn advance(&self, cursor: &SweepCursor) -> Option<SweepCursor> {
        let variant = &self.variants[cursor.variant];
        let mut next = cursor.clone();

        for pos in (0..self.inner_axes.len()).rev() {
            next.inner[pos] += 1;
            if next.inner[pos] < self.inner_axes[pos].steps(variant) {
                return Some(next);
            }
            next.inner[pos] = 0;
        }

        next.variant += 1;
        if next.variant < self.variants.len() {
            return Some(next);
        }
        next.variant = 0;

        next.tile_size += 1;
        if next.tile_size < self.tile_sizes.len() {
            return Some(next);
        }
        next.tile_size = 0;

        next.device += 1;
        (next.device < self.devices.len()).then_some(next)
    }
}

pub struct SweepIter<'a> {
    space: &'a SweepSpace,
    next: Option<SweepCursor>,
}

impl SweepIter<'_> {
    /// Position the next call to `next()` will visit, if any.
    pub fn peek_cursor(&self) -> Option<&SweepCursor> {
        self.next.as_ref()
    }
}

impl Iterator for SweepIter<'_> {
    type Item = SweepStep;

    fn next(&mut self) -> Option<SweepStep> {
        let cursor = self.next.take()?;
        let build = self.space.build_at(&cursor);
        self.next = self.space.advance(&cursor);
        Some(SweepStep { cursor, build })
    }
}
