//! # MapSpec — Axis Patterns and Shape Algebra
//!
//! A mapspec such as `x[i], y[i, j] -> z[i, j]` binds input parameters to
//! named axes and derives the output's external shape from the inputs.
//! Axes sharing a name are zipped (and must agree in length); distinct names
//! broadcast into a higher-dimensional output. The `:` sentinel marks an
//! input dimension that one call consumes whole (a reduction axis).
//!
//! This module owns the grammar ([`parser`]), the shape computation
//! ([`MapSpec::shape`]), per-cell key enumeration ([`MapSpec::input_keys`],
//! [`MapSpec::output_key`]), and the pipeline-wide axis consistency check
//! ([`validate_consistent_axes`]).

mod parser;

pub use parser::parse_mapspec;

use crate::shape::{unravel_index, Key};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Mapspec errors
#[derive(Error, Debug)]
pub enum MapSpecError {
    /// Malformed mapspec text
    #[error("parse error at offset {pos} in `{spec}`: {message}")]
    Parse {
        spec: String,
        pos: usize,
        message: String,
    },

    /// An output axis that no input provides
    #[error("output axis `{axis}` does not appear in any input")]
    FabricatedAxis { axis: String },

    /// Outputs of one mapspec must share a single axis tuple
    #[error("all outputs must share the same axes; `{first}` and `{second}` differ")]
    OutputAxesDiffer { first: String, second: String },

    /// `:` is only meaningful on the input side
    #[error("output `{name}` uses the reduce sentinel `:`; outputs must name every axis")]
    ReducedOutputAxis { name: String },

    /// The same axis twice in one array spec
    #[error("axis `{axis}` appears more than once in `{array}`")]
    DuplicateAxis { axis: String, array: String },

    /// Zipped axes disagree in length at shape time
    #[error("axis `{axis}` has incompatible lengths: `{first_name}` gives {first_len}, `{second_name}` gives {second_len}")]
    AxisMismatch {
        axis: String,
        first_name: String,
        first_len: usize,
        second_name: String,
        second_len: usize,
    },

    /// A named input axis the outputs do not carry (reductions use `:`)
    #[error("input axis `{axis}` does not appear in the output axes; use `:` to reduce a dimension")]
    UnusedInputAxis { axis: String },

    /// An array used with conflicting axes across the pipeline
    #[error("array `{name}` is used with conflicting axes: `{first}` vs `{second}`")]
    AxisConflict {
        name: String,
        first: String,
        second: String,
    },

    /// An input's actual rank disagrees with its declared axes
    #[error("array `{name}` is declared with {declared} axes but has shape of rank {actual}")]
    WrongRank {
        name: String,
        declared: usize,
        actual: usize,
    },

    /// Internal: shape() called without a declared input's shape
    #[error("no shape available for mapspec input `{0}`")]
    MissingInputShape(String),
}

/// Result type for mapspec operations
pub type MapSpecResult<T> = Result<T, MapSpecError>;

/// One axis slot of an [`ArraySpec`].
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Axis {
    /// A named dimension, shared across the DAG by name.
    Named(String),
    /// The `:` sentinel: the call consumes this whole dimension.
    Reduced,
}

impl Axis {
    pub fn name(&self) -> Option<&str> {
        match self {
            Axis::Named(name) => Some(name),
            Axis::Reduced => None,
        }
    }
}

impl fmt::Display for Axis {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Axis::Named(name) => write!(f, "{name}"),
            Axis::Reduced => write!(f, ":"),
        }
    }
}

/// A named array with an ordered axis tuple, e.g. `y[i, :]`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArraySpec {
    pub name: String,
    pub axes: Vec<Axis>,
}

impl ArraySpec {
    /// Number of declared dimensions.
    pub fn rank(&self) -> usize {
        self.axes.len()
    }

    fn validate_unique_axes(&self) -> MapSpecResult<()> {
        for (i, axis) in self.axes.iter().enumerate() {
            if let Axis::Named(name) = axis {
                let repeated = self.axes[i + 1..]
                    .iter()
                    .any(|other| other.name() == Some(name));
                if repeated {
                    return Err(MapSpecError::DuplicateAxis {
                        axis: name.clone(),
                        array: self.to_string(),
                    });
                }
            }
        }
        Ok(())
    }
}

impl fmt::Display for ArraySpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}[", self.name)?;
        for (i, axis) in self.axes.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{axis}")?;
        }
        write!(f, "]")
    }
}

/// A validated `inputs -> outputs` axis pattern.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MapSpec {
    inputs: Vec<ArraySpec>,
    outputs: Vec<ArraySpec>,
}

impl MapSpec {
    /// Build a mapspec, enforcing the structural invariants:
    /// no `:` on outputs, identical axis tuples across outputs, unique axes
    /// within each array, and every output axis present in some input.
    pub fn new(inputs: Vec<ArraySpec>, outputs: Vec<ArraySpec>) -> MapSpecResult<Self> {
        for spec in inputs.iter().chain(&outputs) {
            spec.validate_unique_axes()?;
        }
        for output in &outputs {
            if output.axes.iter().any(|a| *a == Axis::Reduced) {
                return Err(MapSpecError::ReducedOutputAxis {
                    name: output.name.clone(),
                });
            }
        }
        if let Some(first) = outputs.first() {
            for other in &outputs[1..] {
                if other.axes != first.axes {
                    return Err(MapSpecError::OutputAxesDiffer {
                        first: first.to_string(),
                        second: other.to_string(),
                    });
                }
            }
            for axis in &first.axes {
                let provided = inputs
                    .iter()
                    .flat_map(|spec| &spec.axes)
                    .any(|a| a.name() == axis.name());
                if !provided {
                    return Err(MapSpecError::FabricatedAxis {
                        axis: axis.to_string(),
                    });
                }
            }
            for axis in inputs.iter().flat_map(|spec| &spec.axes) {
                let Some(name) = axis.name() else { continue };
                if !first.axes.iter().any(|a| a.name() == Some(name)) {
                    return Err(MapSpecError::UnusedInputAxis {
                        axis: name.to_string(),
                    });
                }
            }
        }
        Ok(MapSpec { inputs, outputs })
    }

    pub fn inputs(&self) -> &[ArraySpec] {
        &self.inputs
    }

    pub fn outputs(&self) -> &[ArraySpec] {
        &self.outputs
    }

    /// Input parameter names, order preserved, de-duplicated.
    pub fn parameters(&self) -> Vec<&str> {
        let mut names: Vec<&str> = Vec::new();
        for spec in &self.inputs {
            if !names.contains(&spec.name.as_str()) {
                names.push(&spec.name);
            }
        }
        names
    }

    /// Output array names in declaration order.
    pub fn output_names(&self) -> Vec<&str> {
        self.outputs.iter().map(|spec| spec.name.as_str()).collect()
    }

    /// The shared external axis tuple of the outputs.
    pub fn external_axes(&self) -> &[Axis] {
        &self.outputs[0].axes
    }

    /// Compute the external output shape from actual input shapes.
    ///
    /// Every occurrence of a named axis pins its extent; disagreeing
    /// occurrences are an [`MapSpecError::AxisMismatch`]. `:` positions only
    /// require the dimension to exist.
    pub fn shape(&self, input_shapes: &HashMap<String, Vec<usize>>) -> MapSpecResult<Vec<usize>> {
        // axis name -> (extent, first array that pinned it)
        let mut extents: HashMap<&str, (usize, &str)> = HashMap::new();

        for spec in &self.inputs {
            let shape = input_shapes
                .get(&spec.name)
                .ok_or_else(|| MapSpecError::MissingInputShape(spec.name.clone()))?;
            if shape.len() != spec.rank() {
                return Err(MapSpecError::WrongRank {
                    name: spec.name.clone(),
                    declared: spec.rank(),
                    actual: shape.len(),
                });
            }
            for (axis, &dim) in spec.axes.iter().zip(shape) {
                let Some(name) = axis.name() else { continue };
                match extents.get(name) {
                    Some(&(existing, first_name)) if existing != dim => {
                        return Err(MapSpecError::AxisMismatch {
                            axis: name.to_string(),
                            first_name: first_name.to_string(),
                            first_len: existing,
                            second_name: spec.name.clone(),
                            second_len: dim,
                        });
                    }
                    Some(_) => {}
                    None => {
                        extents.insert(name, (dim, &spec.name));
                    }
                }
            }
        }

        Ok(self
            .external_axes()
            .iter()
            .map(|axis| {
                let name = axis.name().expect("outputs carry named axes only");
                extents[name].0
            })
            .collect())
    }

    /// Per-parameter key tuples for one cell of the external iteration.
    ///
    /// `linear` is unravelled against `external_shape`; each input then maps
    /// its named axes to the matching output-axis index and its `:` axes to
    /// [`Key::Slice`].
    pub fn input_keys(&self, external_shape: &[usize], linear: usize) -> Vec<(String, Vec<Key>)> {
        let index = unravel_index(linear, external_shape);
        let position: HashMap<&str, usize> = self
            .external_axes()
            .iter()
            .enumerate()
            .filter_map(|(i, axis)| axis.name().map(|name| (name, i)))
            .collect();

        self.inputs
            .iter()
            .map(|spec| {
                let keys = spec
                    .axes
                    .iter()
                    .map(|axis| match axis.name() {
                        Some(name) => Key::Index(index[position[name]]),
                        None => Key::Slice,
                    })
                    .collect();
                (spec.name.clone(), keys)
            })
            .collect()
    }

    /// The multi-index of one cell in the outputs' external axes.
    pub fn output_key(&self, external_shape: &[usize], linear: usize) -> Vec<usize> {
        unravel_index(linear, external_shape)
    }
}

impl fmt::Display for MapSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, spec) in self.inputs.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{spec}")?;
        }
        write!(f, " -> ")?;
        for (i, spec) in self.outputs.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{spec}")?;
        }
        Ok(())
    }
}

impl FromStr for MapSpec {
    type Err = MapSpecError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        parse_mapspec(s)
    }
}

/// Check that every array name carries consistent axes across the pipeline.
///
/// For each array the rank must agree everywhere it appears, and at each
/// position two named axes must match. A `:` is compatible with any named
/// axis at the same position (the consumer reduces a dimension the producer
/// names).
pub fn validate_consistent_axes(mapspecs: &[MapSpec]) -> MapSpecResult<()> {
    // array name -> (axes as seen first, rendered spec for error context)
    let mut seen: HashMap<&str, &ArraySpec> = HashMap::new();

    for mapspec in mapspecs {
        for spec in mapspec.inputs.iter().chain(&mapspec.outputs) {
            match seen.get(spec.name.as_str()) {
                None => {
                    seen.insert(&spec.name, spec);
                }
                Some(first) => {
                    let compatible = first.rank() == spec.rank()
                        && first.axes.iter().zip(&spec.axes).all(|(a, b)| {
                            match (a.name(), b.name()) {
                                (Some(x), Some(y)) => x == y,
                                _ => true,
                            }
                        });
                    if !compatible {
                        return Err(MapSpecError::AxisConflict {
                            name: spec.name.clone(),
                            first: first.to_string(),
                            second: spec.to_string(),
                        });
                    }
                }
            }
        }
    }

    Ok(())
}

/// Required dimensionality of every array referenced by any mapspec.
pub fn mapspec_dimensions(mapspecs: &[MapSpec]) -> HashMap<String, usize> {
    let mut dims = HashMap::new();
    for mapspec in mapspecs {
        for spec in mapspec.inputs.iter().chain(&mapspec.outputs) {
            dims.entry(spec.name.clone()).or_insert_with(|| spec.rank());
        }
    }
    dims
}
