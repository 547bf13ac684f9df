//! Tree-walking template evaluator.
//!
//! Executes a parsed node list against the Brain. Helper calls are
//! dispatched through [`super::funcs`]; the context threads the used
//! and missing dependency sets that drive the Runner's convergence
//! loop.

use std::collections::BTreeMap;
use std::path::PathBuf;

use super::funcs;
use super::parser::{Command, Expr, Node, Pipeline};
use super::scratch::{Scratch, TemplateMap};
use super::value::Value;
use crate::brain::Brain;
use crate::dependency::Dep;
use crate::errors::TemplateError;

pub(crate) struct EvalContext<'a> {
    pub brain: &'a Brain,
    /// Ambient environment: process env plus per-template overrides.
    pub env: BTreeMap<String, String>,
    pub used: BTreeMap<String, Dep>,
    pub missing: BTreeMap<String, Dep>,
    pub scratch: Scratch,
    pub local: TemplateMap,
    /// `error_on_missing_key`: failed map lookups error instead of
    /// rendering the no-value sentinel.
    pub strict: bool,
    pub sandbox: Option<PathBuf>,
    pub denylist: &'a [String],
}

impl<'a> EvalContext<'a> {
    /// Records a dependency as used and returns its cached value, or
    /// marks it missing.
    pub fn depend(&mut self, dep: Dep) -> Option<Value> {
        let fingerprint = dep.fingerprint().to_string();
        self.used.insert(fingerprint.clone(), Dep::clone(&dep));
        match self.brain.recall(&fingerprint) {
            Some(value) => Some(value),
            None => {
                self.missing.insert(fingerprint, dep);
                None
            }
        }
    }
}

pub(crate) fn execute(
    nodes: &[Node],
    ctx: &mut EvalContext<'_>,
) -> Result<String, TemplateError> {
    let root = root_context(ctx);
    let mut ev = Evaluator {
        ctx,
        vars: Vec::new(),
        out: String::new(),
    };
    ev.exec_nodes(nodes, &root)?;
    Ok(ev.out)
}

fn root_context(ctx: &EvalContext<'_>) -> Value {
    let env = ctx
        .env
        .iter()
        .map(|(k, v)| (k.clone(), Value::from(v.as_str())))
        .collect::<BTreeMap<_, _>>();
    Value::map_from(vec![("Env", Value::Map(env))])
}

struct Evaluator<'a, 'b> {
    ctx: &'b mut EvalContext<'a>,
    vars: Vec<(String, Value)>,
    out: String,
}

impl Evaluator<'_, '_> {
    fn exec_nodes(&mut self, nodes: &[Node], dot: &Value) -> Result<(), TemplateError> {
        for node in nodes {
            match node {
                Node::Text(t) => self.out.push_str(t),
                Node::Action(pipe) => {
                    let value = self.eval_pipeline(pipe, dot)?;
                    self.out.push_str(&value.render());
                }
                Node::If { cond, then, els } => {
                    let value = self.eval_pipeline(cond, dot)?;
                    if value.is_truthy() {
                        self.exec_nodes(then, dot)?;
                    } else {
                        self.exec_nodes(els, dot)?;
                    }
                }
                Node::With { pipe, body, els } => {
                    let value = self.eval_pipeline(pipe, dot)?;
                    if value.is_truthy() {
                        self.exec_nodes(body, &value)?;
                    } else {
                        self.exec_nodes(els, dot)?;
                    }
                }
                Node::Range {
                    decls,
                    pipe,
                    body,
                    els,
                } => {
                    self.exec_range(decls, pipe, body, els, dot)?;
                }
            }
        }
        Ok(())
    }

    fn exec_range(
        &mut self,
        decls: &[String],
        pipe: &Pipeline,
        body: &[Node],
        els: &[Node],
        dot: &Value,
    ) -> Result<(), TemplateError> {
        let value = self.eval_pipeline(pipe, dot)?;
        let entries: Vec<(Value, Value)> = match &value {
            Value::List(items) => items
                .iter()
                .enumerate()
                .map(|(i, v)| (Value::Int(i as i64), v.clone()))
                .collect(),
            Value::Map(m) => m
                .iter()
                .map(|(k, v)| (Value::from(k.as_str()), v.clone()))
                .collect(),
            Value::Null => Vec::new(),
            other => {
                return Err(TemplateError::Exec(format!(
                    "range over non-iterable value {}",
                    other
                )))
            }
        };

        if entries.is_empty() {
            return self.exec_nodes(els, dot);
        }
        let depth = self.vars.len();
        for (key, elem) in entries {
            self.vars.truncate(depth);
            match decls {
                [v] => self.vars.push((v.clone(), elem.clone())),
                [k, v] => {
                    self.vars.push((k.clone(), key));
                    self.vars.push((v.clone(), elem.clone()));
                }
                _ => {}
            }
            self.exec_nodes(body, &elem)?;
        }
        self.vars.truncate(depth);
        Ok(())
    }

    fn eval_pipeline(&mut self, pipe: &Pipeline, dot: &Value) -> Result<Value, TemplateError> {
        let mut piped: Option<Value> = None;
        for cmd in &pipe.cmds {
            piped = Some(self.eval_command(cmd, dot, piped)?);
        }
        // Pipelines are never empty after parsing.
        Ok(piped.unwrap_or(Value::Null))
    }

    fn eval_command(
        &mut self,
        cmd: &Command,
        dot: &Value,
        piped: Option<Value>,
    ) -> Result<Value, TemplateError> {
        if let Expr::Ident(name) = &cmd.args[0] {
            let mut args = Vec::with_capacity(cmd.args.len());
            for arg in &cmd.args[1..] {
                args.push(self.eval_expr(arg, dot)?);
            }
            // A piped value becomes the final argument.
            if let Some(v) = piped {
                args.push(v);
            }
            return funcs::call(name, args, self.ctx);
        }

        if cmd.args.len() != 1 {
            return Err(TemplateError::Exec(format!(
                "{:?} is not a function",
                cmd.args[0]
            )));
        }
        if piped.is_some() {
            return Err(TemplateError::Exec(
                "cannot pipe into a non-function value".to_string(),
            ));
        }
        self.eval_expr(&cmd.args[0], dot)
    }

    fn eval_expr(&mut self, expr: &Expr, dot: &Value) -> Result<Value, TemplateError> {
        match expr {
            Expr::Literal(v) => Ok(v.clone()),
            Expr::Dot => Ok(dot.clone()),
            Expr::Field(fields) => self.resolve_fields(dot.clone(), fields),
            Expr::Variable(name, fields) => {
                let base = self
                    .vars
                    .iter()
                    .rev()
                    .find(|(n, _)| n == name)
                    .map(|(_, v)| v.clone())
                    .ok_or_else(|| {
                        TemplateError::Exec(format!("undefined variable ${}", name))
                    })?;
                self.resolve_fields(base, fields)
            }
            Expr::Ident(name) => funcs::call(name, Vec::new(), self.ctx),
            Expr::SubPipeline(pipe) => self.eval_pipeline(pipe, dot),
        }
    }

    fn resolve_fields(
        &self,
        base: Value,
        fields: &[String],
    ) -> Result<Value, TemplateError> {
        let mut current = base;
        for field in fields {
            match current.field(field) {
                Some(v) => current = v.clone(),
                None => {
                    if self.ctx.strict {
                        return Err(TemplateError::MissingKey {
                            key: field.clone(),
                        });
                    }
                    return Ok(Value::Null);
                }
            }
        }
        Ok(current)
    }
}
