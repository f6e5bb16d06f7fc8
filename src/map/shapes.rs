//! Shape Resolution
//!
//! Propagates shapes from root inputs through the DAG, generation by
//! generation. Each resolved shape carries a mask separating *external* axes
//! (the broadcast/zip dimensions the scheduler iterates) from *internal* axes
//! (dimensions produced inside one call's return value).
//!
//! Internal dims cannot be inferred from inputs; they come from the caller's
//! `internal_shapes` override and are appended after the external dims.

use crate::errors::{Result, RunError};
use crate::mapspec::mapspec_dimensions;
use crate::pipeline::Pipeline;
use crate::value::Value;
use std::collections::{BTreeMap, HashMap, HashSet};

/// The resolver's output: full shapes and external/internal masks for every
/// array that participates in a mapspec.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResolvedShapes {
    pub shapes: BTreeMap<String, Vec<usize>>,
    pub masks: BTreeMap<String, Vec<bool>>,
}

impl ResolvedShapes {
    fn record(&mut self, name: &str, shape: Vec<usize>, mask: Vec<bool>) {
        self.shapes.insert(name.to_string(), shape);
        self.masks.insert(name.to_string(), mask);
    }
}

/// Resolve shapes and masks for all mapped arrays in the pipeline.
pub fn resolve_map_shapes(
    pipeline: &Pipeline,
    inputs: &HashMap<String, Value>,
    internal_shapes: &HashMap<String, Vec<usize>>,
) -> Result<ResolvedShapes> {
    let mapped: HashSet<String> = pipeline.mapspec_names();
    let dimensions = mapspec_dimensions(
        &pipeline.mapspecs().into_iter().cloned().collect::<Vec<_>>(),
    );
    let mut resolved = ResolvedShapes::default();

    // Root inputs: structural shape of the supplied value, truncated to the
    // rank the mapspecs address (deeper nesting belongs to the element).
    for name in pipeline.root_args_all() {
        if !mapped.contains(name) {
            continue;
        }
        let value = inputs
            .get(name)
            .or_else(|| pipeline.defaults().get(name))
            .ok_or_else(|| RunError::MissingInputs(name.clone()))?;
        let mut shape = value.shape();
        if let Some(&ndim) = dimensions.get(name) {
            shape.truncate(ndim);
        }
        let mask = vec![true; shape.len()];
        resolved.record(name, shape, mask);
    }

    for generation in pipeline.topological_generations() {
        for func in generation {
            let names = func.output_name().names();

            let Some(mapspec) = func.mapspec() else {
                // An unmapped function whose output feeds a downstream
                // mapspec: the full shape is internal by definition.
                for name in names {
                    if !mapped.contains(name.as_str()) {
                        continue;
                    }
                    let shape = internal_shapes
                        .get(name.as_str())
                        .ok_or_else(|| RunError::MissingShape(name.clone()))?
                        .clone();
                    let mask = vec![false; shape.len()];
                    resolved.record(name, shape, mask);
                }
                continue;
            };

            let mut input_shapes = HashMap::new();
            for param in mapspec.parameters() {
                let shape = resolved
                    .shapes
                    .get(param)
                    .ok_or_else(|| RunError::MissingShape(param.to_string()))?;
                input_shapes.insert(param.to_string(), shape.clone());
            }
            let external = mapspec.shape(&input_shapes)?;

            // Internal dims are shared by every output of the function.
            let internal = names
                .iter()
                .find_map(|n| internal_shapes.get(n.as_str()))
                .cloned()
                .unwrap_or_default();

            let mut shape = external.clone();
            shape.extend(&internal);
            let mut mask = vec![true; external.len()];
            mask.extend(vec![false; internal.len()]);

            for name in names {
                resolved.record(name, shape.clone(), mask.clone());
            }
        }
    }

    Ok(resolved)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::PipeFunc;

    fn doubler(mapspec: &str) -> PipeFunc {
        PipeFunc::new("double", &["x"], "y", |kw| Ok(Value::Int(kw.int("x")? * 2)))
            .with_mapspec(mapspec)
            .unwrap()
    }

    #[test]
    fn test_root_input_shape_and_mask() {
        let pipeline = Pipeline::new(vec![doubler("x[i] -> y[i]")]).unwrap();
        let inputs = HashMap::from([("x".to_string(), Value::from(vec![1i64, 2, 3]))]);
        let resolved = resolve_map_shapes(&pipeline, &inputs, &HashMap::new()).unwrap();
        assert_eq!(resolved.shapes["x"], vec![3]);
        assert_eq!(resolved.masks["x"], vec![true]);
        assert_eq!(resolved.shapes["y"], vec![3]);
        assert_eq!(resolved.masks["y"], vec![true]);
    }

    #[test]
    fn test_broadcast_output_shape() {
        let add = PipeFunc::new("add", &["x", "y"], "z", |kw| {
            Ok(Value::Int(kw.int("x")? + kw.int("y")?))
        })
        .with_mapspec("x[i], y[j] -> z[i, j]")
        .unwrap();
        let pipeline = Pipeline::new(vec![add]).unwrap();
        let inputs = HashMap::from([
            ("x".to_string(), Value::from(vec![1i64, 2, 3])),
            ("y".to_string(), Value::from(vec![4i64, 5])),
        ]);
        let resolved = resolve_map_shapes(&pipeline, &inputs, &HashMap::new()).unwrap();
        assert_eq!(resolved.shapes["z"], vec![3, 2]);
    }

    #[test]
    fn test_unmapped_producer_needs_internal_shape() {
        let generate = PipeFunc::new("generate", &["n"], "x", |kw| {
            let n = kw.int("n")?;
            Ok(Value::List((0..n).map(Value::Int).collect()))
        });
        let pipeline = Pipeline::new(vec![generate, doubler("x[i] -> y[i]")]).unwrap();
        let inputs = HashMap::from([("n".to_string(), Value::Int(4))]);

        let err = resolve_map_shapes(&pipeline, &inputs, &HashMap::new()).unwrap_err();
        assert!(matches!(err, RunError::MissingShape(name) if name == "x"));

        let internal = HashMap::from([("x".to_string(), vec![4])]);
        let resolved = resolve_map_shapes(&pipeline, &inputs, &internal).unwrap();
        assert_eq!(resolved.shapes["x"], vec![4]);
        assert_eq!(resolved.masks["x"], vec![false]);
        assert_eq!(resolved.shapes["y"], vec![4]);
        assert_eq!(resolved.masks["y"], vec![true]);
    }

    #[test]
    fn test_mapped_output_with_internal_dims() {
        let expand = PipeFunc::new("expand", &["x"], "rows", |kw| {
            let x = kw.int("x")?;
            Ok(Value::from(vec![x, x + 1]))
        })
        .with_mapspec("x[i] -> rows[i]")
        .unwrap();
        let pipeline = Pipeline::new(vec![expand]).unwrap();
        let inputs = HashMap::from([("x".to_string(), Value::from(vec![1i64, 2, 3]))]);
        let internal = HashMap::from([("rows".to_string(), vec![2])]);

        let resolved = resolve_map_shapes(&pipeline, &inputs, &internal).unwrap();
        assert_eq!(resolved.shapes["rows"], vec![3, 2]);
        assert_eq!(resolved.masks["rows"], vec![true, false]);
    }

    #[test]
    fn test_input_shape_truncated_to_mapspec_rank() {
        // Each x[i] is itself a pair; the structural shape is (3, 2) but the
        // mapspec addresses one axis.
        let pipeline = Pipeline::new(vec![doubler("x[i] -> y[i]")]).unwrap();
        let pairs = Value::List(vec![
            Value::from(vec![1i64, 2]),
            Value::from(vec![3i64, 4]),
            Value::from(vec![5i64, 6]),
        ]);
        let inputs = HashMap::from([("x".to_string(), pairs)]);
        let resolved = resolve_map_shapes(&pipeline, &inputs, &HashMap::new()).unwrap();
        assert_eq!(resolved.shapes["x"], vec![3]);
    }

    #[test]
    fn test_zipped_mismatch_propagates() {
        let add = PipeFunc::new("add", &["x", "y"], "r", |kw| {
            Ok(Value::Int(kw.int("x")? + kw.int("y")?))
        })
        .with_mapspec("x[i], y[i] -> r[i]")
        .unwrap();
        let pipeline = Pipeline::new(vec![add]).unwrap();
        let inputs = HashMap::from([
            ("x".to_string(), Value::from(vec![1i64, 2])),
            ("y".to_string(), Value::from(vec![4i64, 5, 6])),
        ]);
        let err = resolve_map_shapes(&pipeline, &inputs, &HashMap::new()).unwrap_err();
        assert!(matches!(err, RunError::MapSpec(_)));
    }
}
