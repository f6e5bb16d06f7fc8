//! Pipeline Model
//!
//! A [`Pipeline`] is a DAG of [`PipeFunc`]s wired by name: a function's
//! parameter either matches another function's output (an edge) or is a root
//! argument the caller must supply. Construction stratifies the DAG into
//! topological generations, detects cycles, and validates that every array
//! name carries consistent mapspec axes across the whole pipeline.
//!
//! The producer lookup (`output -> function`) is an index, not an owner:
//! functions are owned once, by the pipeline's function list.

pub mod lazy;

use crate::mapspec::{validate_consistent_axes, MapSpec, MapSpecError};
use crate::value::{Kwargs, Value};
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

/// Pipeline construction errors
#[derive(Error, Debug)]
pub enum PipelineError {
    /// Two functions claim the same output name
    #[error("output `{name}` is produced by both `{first}` and `{second}`")]
    DuplicateOutput {
        name: String,
        first: String,
        second: String,
    },

    /// The function graph contains a cycle
    #[error("cyclic dependency involving functions: {0}")]
    CyclicGraph(String),

    /// No function produces the named output
    #[error("unknown output `{0}`")]
    UnknownOutput(String),

    /// A function's mapspec disagrees with its parameters or output names
    #[error("mapspec of `{function}` {detail}")]
    MapSpecMismatch { function: String, detail: String },

    /// A mapspec failed to parse or validate
    #[error(transparent)]
    MapSpec(#[from] MapSpecError),
}

/// Result type for pipeline operations
pub type PipelineResult<T> = Result<T, PipelineError>;

/// The callable wrapped by a [`PipeFunc`].
pub type FuncBody = Arc<dyn Fn(&Kwargs) -> anyhow::Result<Value> + Send + Sync>;

/// Splits a multi-output aggregate: `(aggregate, output_name) -> component`.
pub type OutputPicker = Arc<dyn Fn(&Value, &str) -> anyhow::Result<Value> + Send + Sync>;

/// A function's output: one name, or a tuple of names split from a single
/// returned aggregate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutputName {
    Single(String),
    Multi(Vec<String>),
}

impl OutputName {
    /// All names, in declaration order.
    pub fn names(&self) -> &[String] {
        match self {
            OutputName::Single(name) => std::slice::from_ref(name),
            OutputName::Multi(names) => names,
        }
    }

    pub fn is_multi(&self) -> bool {
        matches!(self, OutputName::Multi(_))
    }

    /// The single name, used for shape-table keys shared by tuple outputs.
    pub fn first(&self) -> &str {
        &self.names()[0]
    }
}

impl fmt::Display for OutputName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OutputName::Single(name) => write!(f, "{name}"),
            OutputName::Multi(names) => write!(f, "({})", names.join(", ")),
        }
    }
}

/// One node of the DAG: an opaque callable plus its wiring metadata.
#[derive(Clone)]
pub struct PipeFunc {
    name: String,
    parameters: Vec<String>,
    output: OutputName,
    mapspec: Option<MapSpec>,
    picker: Option<OutputPicker>,
    body: FuncBody,
}

impl PipeFunc {
    /// A single-output function.
    pub fn new<F>(name: &str, parameters: &[&str], output_name: &str, body: F) -> Self
    where
        F: Fn(&Kwargs) -> anyhow::Result<Value> + Send + Sync + 'static,
    {
        PipeFunc {
            name: name.to_string(),
            parameters: parameters.iter().map(|p| (*p).to_string()).collect(),
            output: OutputName::Single(output_name.to_string()),
            mapspec: None,
            picker: None,
            body: Arc::new(body),
        }
    }

    /// A multi-output function. The returned aggregate is stored once per
    /// call and split per name: through `picker` when given, positionally
    /// from a returned list otherwise.
    pub fn new_multi<F>(name: &str, parameters: &[&str], output_names: &[&str], body: F) -> Self
    where
        F: Fn(&Kwargs) -> anyhow::Result<Value> + Send + Sync + 'static,
    {
        PipeFunc {
            name: name.to_string(),
            parameters: parameters.iter().map(|p| (*p).to_string()).collect(),
            output: OutputName::Multi(output_names.iter().map(|n| (*n).to_string()).collect()),
            mapspec: None,
            picker: None,
            body: Arc::new(body),
        }
    }

    /// Attach a mapspec, parsed and validated.
    pub fn with_mapspec(mut self, spec: &str) -> PipelineResult<Self> {
        self.mapspec = Some(spec.parse::<MapSpec>()?);
        Ok(self)
    }

    /// Attach an output picker for multi-output functions.
    pub fn with_output_picker<F>(mut self, picker: F) -> Self
    where
        F: Fn(&Value, &str) -> anyhow::Result<Value> + Send + Sync + 'static,
    {
        self.picker = Some(Arc::new(picker));
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn parameters(&self) -> &[String] {
        &self.parameters
    }

    pub fn output_name(&self) -> &OutputName {
        &self.output
    }

    pub fn mapspec(&self) -> Option<&MapSpec> {
        self.mapspec.as_ref()
    }

    /// Invoke the callable.
    pub fn call(&self, kwargs: &Kwargs) -> anyhow::Result<Value> {
        (self.body)(kwargs)
    }

    /// Extract the component for `output_name` from a raw return value.
    pub fn pick(&self, raw: &Value, output_name: &str) -> anyhow::Result<Value> {
        if let Some(picker) = &self.picker {
            return picker(raw, output_name);
        }
        match &self.output {
            OutputName::Single(_) => Ok(raw.clone()),
            OutputName::Multi(names) => {
                let position = names
                    .iter()
                    .position(|n| n == output_name)
                    .ok_or_else(|| anyhow::anyhow!("`{output_name}` is not an output of `{}`", self.name))?;
                let items = raw.as_list().map_err(|_| {
                    anyhow::anyhow!(
                        "`{}` returned {raw} but has {} outputs and no output picker",
                        self.name,
                        names.len()
                    )
                })?;
                items.get(position).cloned().ok_or_else(|| {
                    anyhow::anyhow!(
                        "`{}` returned {} components for {} outputs",
                        self.name,
                        items.len(),
                        names.len()
                    )
                })
            }
        }
    }
}

impl fmt::Debug for PipeFunc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PipeFunc")
            .field("name", &self.name)
            .field("parameters", &self.parameters)
            .field("output", &self.output)
            .field("mapspec", &self.mapspec.as_ref().map(ToString::to_string))
            .finish_non_exhaustive()
    }
}

/// A validated DAG of functions, stratified into topological generations.
pub struct Pipeline {
    functions: Vec<PipeFunc>,
    output_to_func: HashMap<String, usize>,
    root_args: Vec<String>,
    generations: Vec<Vec<usize>>,
    defaults: HashMap<String, Value>,
}

impl Pipeline {
    pub fn new(functions: Vec<PipeFunc>) -> PipelineResult<Self> {
        let mut output_to_func: HashMap<String, usize> = HashMap::new();
        for (i, func) in functions.iter().enumerate() {
            for name in func.output_name().names() {
                if let Some(&prev) = output_to_func.get(name) {
                    return Err(PipelineError::DuplicateOutput {
                        name: name.clone(),
                        first: functions[prev].name.clone(),
                        second: func.name.clone(),
                    });
                }
                output_to_func.insert(name.clone(), i);
            }
        }

        let mut root_args: Vec<String> = Vec::new();
        for func in &functions {
            for param in &func.parameters {
                if !output_to_func.contains_key(param) && !root_args.contains(param) {
                    root_args.push(param.clone());
                }
            }
        }

        for func in &functions {
            validate_mapspec_wiring(func)?;
        }

        let generations = stratify(&functions, &output_to_func)?;

        let pipeline = Pipeline {
            functions,
            output_to_func,
            root_args,
            generations,
            defaults: HashMap::new(),
        };
        validate_consistent_axes(&pipeline.mapspecs().into_iter().cloned().collect::<Vec<_>>())?;
        Ok(pipeline)
    }

    /// Register a fallback value for a parameter absent from the inputs.
    pub fn with_default(mut self, name: &str, value: Value) -> Self {
        self.defaults.insert(name.to_string(), value);
        self
    }

    pub fn functions(&self) -> &[PipeFunc] {
        &self.functions
    }

    pub fn defaults(&self) -> &HashMap<String, Value> {
        &self.defaults
    }

    /// Root argument names: parameters no function produces.
    pub fn root_args_all(&self) -> &[String] {
        &self.root_args
    }

    /// Root arguments reachable from `output_name`, or all of them.
    pub fn root_args(&self, output_name: Option<&str>) -> PipelineResult<Vec<String>> {
        let Some(output_name) = output_name else {
            return Ok(self.root_args.clone());
        };
        let &start = self
            .output_to_func
            .get(output_name)
            .ok_or_else(|| PipelineError::UnknownOutput(output_name.to_string()))?;

        let mut roots = Vec::new();
        let mut stack = vec![start];
        let mut visited = HashSet::new();
        while let Some(i) = stack.pop() {
            if !visited.insert(i) {
                continue;
            }
            for param in &self.functions[i].parameters {
                match self.output_to_func.get(param) {
                    Some(&producer) => stack.push(producer),
                    None => {
                        if !roots.contains(param) {
                            roots.push(param.clone());
                        }
                    }
                }
            }
        }
        Ok(roots)
    }

    /// Producer of the named output.
    pub fn output_to_func(&self, output_name: &str) -> Option<&PipeFunc> {
        self.output_to_func
            .get(output_name)
            .map(|&i| &self.functions[i])
    }

    /// Functions stratified so each generation depends only on earlier ones.
    pub fn topological_generations(&self) -> Vec<Vec<&PipeFunc>> {
        self.generations
            .iter()
            .map(|gen| gen.iter().map(|&i| &self.functions[i]).collect())
            .collect()
    }

    /// All functions in topological order.
    pub fn sorted_functions(&self) -> Vec<&PipeFunc> {
        self.generations
            .iter()
            .flat_map(|gen| gen.iter().map(|&i| &self.functions[i]))
            .collect()
    }

    /// Mapspecs in topological order.
    pub fn mapspecs(&self) -> Vec<&MapSpec> {
        self.sorted_functions()
            .into_iter()
            .filter_map(PipeFunc::mapspec)
            .collect()
    }

    pub fn mapspecs_as_strings(&self) -> Vec<String> {
        self.mapspecs().iter().map(ToString::to_string).collect()
    }

    /// Every parameter or output name referenced by any mapspec.
    pub fn mapspec_names(&self) -> HashSet<String> {
        let mut names = HashSet::new();
        for mapspec in self.mapspecs() {
            names.extend(mapspec.parameters().iter().map(ToString::to_string));
            names.extend(mapspec.output_names().iter().map(ToString::to_string));
        }
        names
    }
}

impl fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pipeline")
            .field("functions", &self.functions)
            .field("root_args", &self.root_args)
            .field("generations", &self.generations)
            .finish_non_exhaustive()
    }
}

/// A mapspec's input side must reference declared parameters and its output
/// side must name exactly the function's outputs.
fn validate_mapspec_wiring(func: &PipeFunc) -> PipelineResult<()> {
    let Some(mapspec) = func.mapspec() else {
        return Ok(());
    };
    for param in mapspec.parameters() {
        if !func.parameters.iter().any(|p| p == param) {
            return Err(PipelineError::MapSpecMismatch {
                function: func.name.clone(),
                detail: format!("references `{param}`, which is not a parameter"),
            });
        }
    }
    let declared = func.output.names();
    let mapped = mapspec.output_names();
    if declared.len() != mapped.len()
        || declared.iter().zip(&mapped).any(|(d, m)| d.as_str() != *m)
    {
        return Err(PipelineError::MapSpecMismatch {
            function: func.name.clone(),
            detail: format!(
                "produces [{}] but the function declares [{}]",
                mapped.join(", "),
                declared.join(", ")
            ),
        });
    }
    Ok(())
}

/// Kahn's algorithm by levels: a function joins the earliest generation in
/// which every producer of its parameters has already been placed.
fn stratify(
    functions: &[PipeFunc],
    output_to_func: &HashMap<String, usize>,
) -> PipelineResult<Vec<Vec<usize>>> {
    let mut generations: Vec<Vec<usize>> = Vec::new();
    let mut placed: HashSet<usize> = HashSet::new();

    while placed.len() < functions.len() {
        let mut level: Vec<usize> = Vec::new();
        for (i, func) in functions.iter().enumerate() {
            if placed.contains(&i) {
                continue;
            }
            let ready = func.parameters.iter().all(|param| {
                match output_to_func.get(param) {
                    Some(producer) => placed.contains(producer),
                    None => true, // root argument
                }
            });
            if ready {
                level.push(i);
            }
        }
        if level.is_empty() {
            let stuck: Vec<&str> = functions
                .iter()
                .enumerate()
                .filter(|(i, _)| !placed.contains(i))
                .map(|(_, f)| f.name.as_str())
                .collect();
            return Err(PipelineError::CyclicGraph(stuck.join(", ")));
        }
        placed.extend(level.iter().copied());
        generations.push(level);
    }

    Ok(generations)
}
