//! Template parsing and execution.
//!
//! A [`Template`] is parsed once from a source file or inline contents
//! and executed many times against the Brain. Execution returns the
//! rendered output together with the set of dependencies the template
//! touched and the subset that had no cached value yet; the output is
//! provisional until the missing set is empty.

mod exec;
mod funcs;
mod parser;
mod scratch;
mod value;

pub use value::Value;

use std::collections::BTreeMap;
use std::path::PathBuf;

use sha2::{Digest, Sha256};

use self::exec::EvalContext;
use self::parser::Node;
use crate::brain::Brain;
use crate::config::TemplateConfig;
use crate::constants::{DEFAULT_LEFT_DELIM, DEFAULT_RIGHT_DELIM};
use crate::dependency::Dep;
use crate::errors::TemplateError;


/// A parsed template and its execution policy.
#[derive(Debug)]
pub struct Template {
    id: String,
    source: String,
    nodes: Vec<Node>,
    strict: bool,
    sandbox: Option<PathBuf>,
    denylist: Vec<String>,
}

/// What one execute call produced.
#[derive(Clone, Debug)]
pub struct ExecuteResult {
    pub output: String,
    /// Every dependency the template touched, keyed by fingerprint.
    pub used: BTreeMap<String, Dep>,
    /// The used dependencies that had no value in the Brain.
    pub missing: BTreeMap<String, Dep>,
}

impl Template {
    pub fn new(config: &TemplateConfig) -> Result<Self, TemplateError> {
        let source = match (&config.source, &config.contents) {
            (Some(path), _) => {
                std::fs::read_to_string(path).map_err(|source| TemplateError::Source {
                    path: path.clone(),
                    source,
                })?
            }
            (None, Some(contents)) => contents.clone(),
            (None, None) => String::new(),
        };

        let left = config.left_delimiter.as_deref().unwrap_or(DEFAULT_LEFT_DELIM);
        let right = config
            .right_delimiter
            .as_deref()
            .unwrap_or(DEFAULT_RIGHT_DELIM);
        let nodes = parser::parse(&source, left, right)?;

        let mut hasher = Sha256::new();
        hasher.update(source.as_bytes());
        let id = hex::encode(hasher.finalize());

        Ok(Self {
            id,
            source,
            nodes,
            strict: config.error_on_missing_key,
            sandbox: config.sandbox_path.clone(),
            denylist: config.function_denylist.clone(),
        })
    }

    /// Content hash, stable across processes for identical sources.
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    /// Runs the template against the Brain. `env_overrides` shadows the
    /// process environment for `env` lookups and the `.Env` map.
    pub fn execute(
        &self,
        brain: &Brain,
        env_overrides: &BTreeMap<String, String>,
    ) -> Result<ExecuteResult, TemplateError> {
        let mut env: BTreeMap<String, String> = std::env::vars().collect();
        for (k, v) in env_overrides {
            env.insert(k.clone(), v.clone());
        }

        let mut ctx = EvalContext {
            brain,
            env,
            used: BTreeMap::new(),
            missing: BTreeMap::new(),
            scratch: Default::default(),
            local: Default::default(),
            strict: self.strict,
            sandbox: self.sandbox.clone(),
            denylist: &self.denylist,
        };
        let output = exec::execute(&self.nodes, &mut ctx)?;
        Ok(ExecuteResult {
            output,
            used: ctx.used,
            missing: ctx.missing,
        })
    }
}
