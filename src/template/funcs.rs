//! Template helper functions.
//!
//! Dependency accessors wrap the typed query constructors: they record
//! the dependency as used, return the Brain's cached value when one
//! exists, and otherwise record it as missing and return the type's
//! zero value. Everything else is pure string, numeric or structural
//! manipulation.
//!
//! Piped values arrive as the final argument, so argument orders follow
//! the pipe-friendly convention (`{{ 10 | subtract 2 }}` is `10 - 2`).

use std::collections::BTreeMap;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use base64::Engine;
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;

use super::exec::EvalContext;
use super::value::Value;
use crate::dependency::{
    CatalogNode, CatalogNodes, CatalogServices, FileQuery, HealthService, KvGet, KvList,
    NomadService, NomadServices, NomadVar, NomadVarList, StatusFilter, VaultList, VaultRead,
};
use crate::errors::TemplateError;

type FResult = Result<Value, TemplateError>;

pub(crate) fn call(name: &str, args: Vec<Value>, ctx: &mut EvalContext<'_>) -> FResult {
    if ctx.denylist.iter().any(|d| d == name) {
        return Err(exec_err(format!("function {:?} is disabled", name)));
    }
    match name {
        // Dependency accessors
        "key" => key(&args, ctx),
        "keyExists" => key_exists(&args, ctx),
        "keyOrDefault" => key_or_default(&args, ctx),
        "ls" => kv_listing(name, &args, ctx, false),
        "tree" => kv_listing(name, &args, ctx, true),
        "service" => service(&args, ctx),
        "services" => services(&args, ctx),
        "node" => node(&args, ctx),
        "nodes" => nodes(&args, ctx),
        "file" => file(&args, ctx),
        "secret" => secret(&args, ctx),
        "secrets" => secrets(&args, ctx),
        "nomadServices" => nomad_services(&args, ctx),
        "nomadService" => nomad_service(&args, ctx),
        "nomadVar" => nomad_var(&args, ctx),
        "nomadVarList" => nomad_var_list(&args, ctx),

        // Strings and encodings
        "split" => split(&args),
        "join" => join(&args),
        "replaceAll" => replace_all(&args),
        "regexReplaceAll" => regex_replace_all(&args),
        "regexMatch" => regex_match(&args),
        "toLower" => map_text(name, &args, |s| s.to_lowercase()),
        "toUpper" => map_text(name, &args, |s| s.to_uppercase()),
        "toTitle" => map_text(name, &args, title_case),
        "trimSpace" => map_text(name, &args, |s| s.trim().to_string()),
        "indent" => indent(&args),
        "base64Encode" => base64_apply(name, &args, Base64Op::Encode, false),
        "base64Decode" => base64_apply(name, &args, Base64Op::Decode, false),
        "base64URLEncode" => base64_apply(name, &args, Base64Op::Encode, true),
        "base64URLDecode" => base64_apply(name, &args, Base64Op::Decode, true),
        "toJSON" => to_json(&args, false),
        "toJSONPretty" => to_json(&args, true),
        "parseJSON" => parse_json(&args),
        "toYAML" => to_yaml(&args),
        "parseYAML" => parse_yaml(&args),
        "toTOML" => to_toml(&args),
        "parseBool" => parse_bool(&args),
        "parseInt" => parse_int(&args, false),
        "parseUint" => parse_int(&args, true),
        "parseFloat" => parse_float(&args),

        // Structural
        "explode" => explode(&args),
        "explodeMap" => explode_map(&args),
        "byKey" => by_key(&args),
        "byTag" => by_tag(&args),

        // Set predicates
        "in" => in_list(&args),
        "contains" => contains(&args),
        "containsAll" => contains_set(name, &args, SetPredicate::All),
        "containsAny" => contains_set(name, &args, SetPredicate::Any),
        "containsNone" => contains_set(name, &args, SetPredicate::None),
        "containsNotAll" => contains_set(name, &args, SetPredicate::NotAll),

        // Numeric
        "add" => arith(name, &args, |a, b| a.checked_add(b), |a, b| a + b),
        "multiply" => arith(name, &args, |a, b| a.checked_mul(b), |a, b| a * b),
        "subtract" => arith(name, &args, |b, a| a.checked_sub(b), |b, a| a - b),
        "divide" => divide(&args),
        "modulo" => modulo(&args),
        "minimum" => min_max(name, &args, true),
        "maximum" => min_max(name, &args, false),

        // Iteration and control
        "loop" => loop_range(&args),
        "env" => env(&args, ctx),
        "timestamp" => timestamp(&args),

        // Comparison and logic
        "eq" => eq(&args, false),
        "ne" => eq(&args, true),
        "not" => not(&args),
        "and" => Ok(and_or(args, true)),
        "or" => Ok(and_or(args, false)),
        "len" => len(&args),

        // Scratch pad
        "scratch.Set" => scratch_set(&args, ctx, false),
        "scratch.SetX" => scratch_set(&args, ctx, true),
        "scratch.Get" => {
            want(name, &args, 1)?;
            Ok(ctx.scratch.get(&text_arg(name, &args, 0)?))
        }
        "scratch.Key" => {
            want(name, &args, 1)?;
            Ok(Value::Bool(ctx.scratch.key(&text_arg(name, &args, 0)?)))
        }
        "scratch.MapSet" => scratch_map_set(&args, ctx, false),
        "scratch.MapSetX" => scratch_map_set(&args, ctx, true),
        "scratch.MapValues" => {
            want(name, &args, 1)?;
            Ok(ctx.scratch.map_values(&text_arg(name, &args, 0)?))
        }

        // Local map
        "localMap.Clear" => {
            want(name, &args, 0)?;
            ctx.local.clear();
            Ok(Value::from(""))
        }
        "localMap.ContainsKey" => {
            want(name, &args, 1)?;
            Ok(Value::Bool(ctx.local.contains_key(&text_arg(name, &args, 0)?)))
        }
        "localMap.ContainsValue" => {
            want(name, &args, 1)?;
            Ok(Value::Bool(ctx.local.contains_value(&args[0])))
        }
        "localMap.Get" => {
            want(name, &args, 1)?;
            Ok(ctx.local.get(&text_arg(name, &args, 0)?))
        }
        "localMap.IsEmpty" => {
            want(name, &args, 0)?;
            Ok(Value::Bool(ctx.local.is_empty()))
        }
        "localMap.KeySet" => {
            want(name, &args, 0)?;
            Ok(ctx.local.key_set())
        }
        "localMap.Put" => {
            want(name, &args, 2)?;
            let key = text_arg(name, &args, 0)?;
            Ok(ctx.local.put(&key, args[1].clone()))
        }
        "localMap.PutAll" => {
            want(name, &args, 1)?;
            let map = args[0]
                .as_map()
                .ok_or_else(|| exec_err("localMap.PutAll expects a map"))?;
            ctx.local.put_all(map);
            Ok(Value::from(""))
        }
        "localMap.Remove" => {
            want(name, &args, 1)?;
            let key = text_arg(name, &args, 0)?;
            Ok(ctx.local.remove(&key))
        }
        "localMap.Size" => {
            want(name, &args, 0)?;
            Ok(Value::Int(ctx.local.size()))
        }
        "localMap.Values" => {
            want(name, &args, 0)?;
            Ok(ctx.local.values())
        }
        "localMap.ParseJSON" => {
            want(name, &args, 1)?;
            ctx.local.parse_json(&text_arg(name, &args, 0)?)?;
            Ok(Value::from(""))
        }
        "localMap.ToJSON" => {
            want(name, &args, 0)?;
            Ok(Value::String(ctx.local.to_json()?))
        }

        other => Err(exec_err(format!("unknown function {:?}", other))),
    }
}

fn exec_err(msg: impl Into<String>) -> TemplateError {
    TemplateError::Exec(msg.into())
}

fn want(name: &str, args: &[Value], n: usize) -> Result<(), TemplateError> {
    if args.len() != n {
        return Err(exec_err(format!(
            "{} expects {} argument(s), got {}",
            name,
            n,
            args.len()
        )));
    }
    Ok(())
}

/// String coercion for scalar arguments. Lists and maps are rejected.
fn text_of(name: &str, v: &Value) -> Result<String, TemplateError> {
    match v {
        Value::String(s) => Ok(s.clone()),
        Value::Bool(_) | Value::Int(_) | Value::Float(_) => Ok(v.to_string()),
        Value::Null => Ok(String::new()),
        _ => Err(exec_err(format!("{} expects a string argument", name))),
    }
}

fn text_arg(name: &str, args: &[Value], i: usize) -> Result<String, TemplateError> {
    text_of(name, &args[i])
}

// ---------------------------------------------------------------------------
// Dependency accessors

fn key(args: &[Value], ctx: &mut EvalContext<'_>) -> FResult {
    want("key", args, 1)?;
    let path = text_arg("key", args, 0)?;
    let dep = Arc::new(KvGet::blocking(&path, None, None));
    match ctx.depend(dep) {
        Some(Value::Null) | None => Ok(Value::from("")),
        Some(v) => Ok(v),
    }
}

fn key_exists(args: &[Value], ctx: &mut EvalContext<'_>) -> FResult {
    want("keyExists", args, 1)?;
    let path = text_arg("keyExists", args, 0)?;
    let dep = Arc::new(KvGet::new(&path, None, None));
    Ok(Value::Bool(matches!(
        ctx.depend(dep),
        Some(v) if v != Value::Null
    )))
}

fn key_or_default(args: &[Value], ctx: &mut EvalContext<'_>) -> FResult {
    want("keyOrDefault", args, 2)?;
    let path = text_arg("keyOrDefault", args, 0)?;
    let dep = Arc::new(KvGet::new(&path, None, None));
    match ctx.depend(dep) {
        Some(Value::Null) | None => Ok(args[1].clone()),
        Some(v) => Ok(v),
    }
}

/// `ls` keeps only direct children; `tree` keeps the whole subtree.
fn kv_listing(name: &str, args: &[Value], ctx: &mut EvalContext<'_>, recurse: bool) -> FResult {
    want(name, args, 1)?;
    let prefix = text_arg(name, args, 0)?;
    let dep = Arc::new(KvList::new(&prefix, None, None));
    let Some(Value::List(pairs)) = ctx.depend(dep) else {
        return Ok(Value::List(Vec::new()));
    };
    let kept = pairs
        .into_iter()
        .filter(|p| match p.field("Key").and_then(Value::as_str) {
            Some(k) => !k.is_empty() && (recurse || !k.contains('/')),
            None => false,
        })
        .collect();
    Ok(Value::List(kept))
}

fn service(args: &[Value], ctx: &mut EvalContext<'_>) -> FResult {
    if args.is_empty() || args.len() > 2 {
        return Err(exec_err("service expects a query and optional status filter"));
    }
    let query = text_arg("service", args, 0)?;
    let filter = if args.len() == 2 {
        StatusFilter::parse(&text_arg("service", args, 1)?).map_err(exec_err)?
    } else {
        StatusFilter::parse("").map_err(exec_err)?
    };
    let (tag, name, dc) = parse_service_query(&query);
    let dep = Arc::new(HealthService::new(&name, tag.as_deref(), filter, dc.as_deref()));
    Ok(ctx.depend(dep).unwrap_or_else(|| Value::List(Vec::new())))
}

/// Splits `[tag.]name[@dc]`.
fn parse_service_query(query: &str) -> (Option<String>, String, Option<String>) {
    let (rest, dc) = match query.split_once('@') {
        Some((r, d)) => (r, Some(d.to_string())),
        None => (query, None),
    };
    match rest.split_once('.') {
        Some((tag, name)) => (Some(tag.to_string()), name.to_string(), dc),
        None => (None, rest.to_string(), dc),
    }
}

fn services(args: &[Value], ctx: &mut EvalContext<'_>) -> FResult {
    let dc = optional_dc("services", args)?;
    let dep = Arc::new(CatalogServices::new(dc.as_deref()));
    Ok(ctx
        .depend(dep)
        .unwrap_or_else(|| Value::Map(BTreeMap::new())))
}

fn node(args: &[Value], ctx: &mut EvalContext<'_>) -> FResult {
    want("node", args, 1)?;
    let query = text_arg("node", args, 0)?;
    let (name, dc) = match query.split_once('@') {
        Some((n, d)) => (n.to_string(), Some(d.to_string())),
        None => (query, None),
    };
    let dep = Arc::new(CatalogNode::new(&name, dc.as_deref()));
    Ok(ctx.depend(dep).unwrap_or(Value::Null))
}

fn nodes(args: &[Value], ctx: &mut EvalContext<'_>) -> FResult {
    let dc = optional_dc("nodes", args)?;
    let dep = Arc::new(CatalogNodes::new(dc.as_deref()));
    Ok(ctx.depend(dep).unwrap_or_else(|| Value::List(Vec::new())))
}

/// Optional `"@dc"` argument shared by `services` and `nodes`.
fn optional_dc(name: &str, args: &[Value]) -> Result<Option<String>, TemplateError> {
    match args {
        [] => Ok(None),
        [v] => {
            let s = text_of(name, v)?;
            Ok(Some(s.trim_start_matches('@').to_string()))
        }
        _ => Err(exec_err(format!("{} expects at most one argument", name))),
    }
}

fn file(args: &[Value], ctx: &mut EvalContext<'_>) -> FResult {
    want("file", args, 1)?;
    let raw = text_arg("file", args, 0)?;
    let path = match &ctx.sandbox {
        Some(root) => sandboxed_path(root, &raw)?,
        None => PathBuf::from(&raw),
    };
    let dep = Arc::new(FileQuery::new(&path.to_string_lossy()));
    match ctx.depend(dep) {
        Some(Value::Null) | None => Ok(Value::from("")),
        Some(v) => Ok(v),
    }
}

/// Joins `path` under `root` and refuses results that escape it after
/// symlink resolution. Paths that do not exist yet are normalized
/// lexically instead.
fn sandboxed_path(root: &Path, path: &str) -> Result<PathBuf, TemplateError> {
    let joined = root.join(path.trim_start_matches('/'));
    let resolved = joined
        .canonicalize()
        .unwrap_or_else(|_| lexical_clean(&joined));
    let root = root.canonicalize().unwrap_or_else(|_| root.to_path_buf());
    if resolved.starts_with(&root) {
        Ok(resolved)
    } else {
        Err(TemplateError::Sandbox {
            path: resolved,
            root,
        })
    }
}

fn lexical_clean(path: &Path) -> PathBuf {
    let mut clean = PathBuf::new();
    for component in path.components() {
        match component {
            Component::ParentDir => {
                clean.pop();
            }
            Component::CurDir => {}
            other => clean.push(other),
        }
    }
    clean
}

fn secret(args: &[Value], ctx: &mut EvalContext<'_>) -> FResult {
    want("secret", args, 1)?;
    let path = text_arg("secret", args, 0)?;
    let dep = Arc::new(VaultRead::new(&path));
    Ok(ctx.depend(dep).unwrap_or(Value::Null))
}

fn secrets(args: &[Value], ctx: &mut EvalContext<'_>) -> FResult {
    want("secrets", args, 1)?;
    let path = text_arg("secrets", args, 0)?;
    let dep = Arc::new(VaultList::new(&path));
    Ok(ctx.depend(dep).unwrap_or_else(|| Value::List(Vec::new())))
}

fn nomad_services(args: &[Value], ctx: &mut EvalContext<'_>) -> FResult {
    want("nomadServices", args, 0)?;
    let dep = Arc::new(NomadServices::new());
    Ok(ctx.depend(dep).unwrap_or_else(|| Value::List(Vec::new())))
}

fn nomad_service(args: &[Value], ctx: &mut EvalContext<'_>) -> FResult {
    want("nomadService", args, 1)?;
    let name = text_arg("nomadService", args, 0)?;
    let dep = Arc::new(NomadService::new(&name));
    Ok(ctx.depend(dep).unwrap_or_else(|| Value::List(Vec::new())))
}

fn nomad_var(args: &[Value], ctx: &mut EvalContext<'_>) -> FResult {
    want("nomadVar", args, 1)?;
    let path = text_arg("nomadVar", args, 0)?;
    let dep = Arc::new(NomadVar::new(&path));
    Ok(ctx.depend(dep).unwrap_or(Value::Null))
}

fn nomad_var_list(args: &[Value], ctx: &mut EvalContext<'_>) -> FResult {
    want("nomadVarList", args, 1)?;
    let prefix = text_arg("nomadVarList", args, 0)?;
    let dep = Arc::new(NomadVarList::new(&prefix));
    Ok(ctx.depend(dep).unwrap_or_else(|| Value::List(Vec::new())))
}

// ---------------------------------------------------------------------------
// Strings and encodings

fn split(args: &[Value]) -> FResult {
    want("split", args, 2)?;
    let sep = text_arg("split", args, 0)?;
    let s = text_arg("split", args, 1)?;
    if s.is_empty() {
        return Ok(Value::List(Vec::new()));
    }
    Ok(Value::List(
        s.split(sep.as_str()).map(Value::from).collect(),
    ))
}

fn join(args: &[Value]) -> FResult {
    want("join", args, 2)?;
    let sep = text_arg("join", args, 0)?;
    let list = args[1]
        .as_list()
        .ok_or_else(|| exec_err("join expects a list"))?;
    let parts = list
        .iter()
        .map(|v| text_of("join", v))
        .collect::<Result<Vec<_>, _>>()?;
    Ok(Value::String(parts.join(&sep)))
}

fn replace_all(args: &[Value]) -> FResult {
    want("replaceAll", args, 3)?;
    let old = text_arg("replaceAll", args, 0)?;
    let new = text_arg("replaceAll", args, 1)?;
    let s = text_arg("replaceAll", args, 2)?;
    Ok(Value::String(s.replace(&old, &new)))
}

fn regex_replace_all(args: &[Value]) -> FResult {
    want("regexReplaceAll", args, 3)?;
    let pattern = text_arg("regexReplaceAll", args, 0)?;
    let repl = text_arg("regexReplaceAll", args, 1)?;
    let s = text_arg("regexReplaceAll", args, 2)?;
    let re = regex::Regex::new(&pattern)
        .map_err(|e| exec_err(format!("invalid regex: {}", e)))?;
    Ok(Value::String(re.replace_all(&s, repl.as_str()).into_owned()))
}

fn regex_match(args: &[Value]) -> FResult {
    want("regexMatch", args, 2)?;
    let pattern = text_arg("regexMatch", args, 0)?;
    let s = text_arg("regexMatch", args, 1)?;
    let re = regex::Regex::new(&pattern)
        .map_err(|e| exec_err(format!("invalid regex: {}", e)))?;
    Ok(Value::Bool(re.is_match(&s)))
}

fn map_text(name: &str, args: &[Value], f: impl Fn(&str) -> String) -> FResult {
    want(name, args, 1)?;
    let s = text_arg(name, args, 0)?;
    Ok(Value::String(f(&s)))
}

fn title_case(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut at_boundary = true;
    for c in s.chars() {
        if at_boundary {
            out.extend(c.to_uppercase());
        } else {
            out.push(c);
        }
        at_boundary = !c.is_alphanumeric();
    }
    out
}

fn indent(args: &[Value]) -> FResult {
    want("indent", args, 2)?;
    let n = args[0]
        .as_int()
        .ok_or_else(|| exec_err("indent expects a count"))?;
    if n < 0 {
        return Err(exec_err("indent count must be non-negative"));
    }
    let s = text_arg("indent", args, 1)?;
    let pad = " ".repeat(n as usize);
    Ok(Value::String(format!(
        "{}{}",
        pad,
        s.replace('\n', &format!("\n{}", pad))
    )))
}

enum Base64Op {
    Encode,
    Decode,
}

fn base64_apply(name: &str, args: &[Value], op: Base64Op, url: bool) -> FResult {
    want(name, args, 1)?;
    let s = text_arg(name, args, 0)?;
    if url {
        base64_run(name, &s, op, &base64::engine::general_purpose::URL_SAFE)
    } else {
        base64_run(name, &s, op, &base64::engine::general_purpose::STANDARD)
    }
}

fn base64_run(name: &str, s: &str, op: Base64Op, engine: &impl Engine) -> FResult {
    match op {
        Base64Op::Encode => Ok(Value::String(engine.encode(s.as_bytes()))),
        Base64Op::Decode => {
            let bytes = engine
                .decode(s.as_bytes())
                .map_err(|e| exec_err(format!("{}: {}", name, e)))?;
            String::from_utf8(bytes)
                .map(Value::String)
                .map_err(|_| exec_err(format!("{}: decoded bytes are not UTF-8", name)))
        }
    }
}

fn to_json(args: &[Value], pretty: bool) -> FResult {
    if args.len() != 1 {
        return Err(exec_err("toJSON expects one argument"));
    }
    let encoded = if pretty {
        serde_json::to_string_pretty(&args[0])
    } else {
        serde_json::to_string(&args[0])
    };
    encoded
        .map(Value::String)
        .map_err(|e| exec_err(format!("JSON encoding failed: {}", e)))
}

fn parse_json(args: &[Value]) -> FResult {
    want("parseJSON", args, 1)?;
    let s = text_arg("parseJSON", args, 0)?;
    if s.is_empty() {
        return Ok(Value::Null);
    }
    serde_json::from_str(&s).map_err(|e| exec_err(format!("invalid JSON: {}", e)))
}

fn to_yaml(args: &[Value]) -> FResult {
    want("toYAML", args, 1)?;
    serde_yaml::to_string(&args[0])
        .map(|s| Value::String(s.trim_end().to_string()))
        .map_err(|e| exec_err(format!("YAML encoding failed: {}", e)))
}

fn parse_yaml(args: &[Value]) -> FResult {
    want("parseYAML", args, 1)?;
    let s = text_arg("parseYAML", args, 0)?;
    if s.is_empty() {
        return Ok(Value::Null);
    }
    serde_yaml::from_str(&s).map_err(|e| exec_err(format!("invalid YAML: {}", e)))
}

fn to_toml(args: &[Value]) -> FResult {
    want("toTOML", args, 1)?;
    toml::to_string(&args[0])
        .map(Value::String)
        .map_err(|e| exec_err(format!("TOML encoding failed: {}", e)))
}

fn parse_bool(args: &[Value]) -> FResult {
    want("parseBool", args, 1)?;
    if let Value::Bool(b) = args[0] {
        return Ok(Value::Bool(b));
    }
    let s = text_arg("parseBool", args, 0)?;
    match s.as_str() {
        "1" | "t" | "T" | "true" | "TRUE" | "True" => Ok(Value::Bool(true)),
        "0" | "f" | "F" | "false" | "FALSE" | "False" => Ok(Value::Bool(false)),
        other => Err(exec_err(format!("cannot parse {:?} as bool", other))),
    }
}

fn parse_int(args: &[Value], unsigned: bool) -> FResult {
    let name = if unsigned { "parseUint" } else { "parseInt" };
    want(name, args, 1)?;
    if let Some(i) = args[0].as_int() {
        if unsigned && i < 0 {
            return Err(exec_err(format!("cannot parse {} as uint", i)));
        }
        return Ok(Value::Int(i));
    }
    let s = text_arg(name, args, 0)?;
    let n: i64 = s
        .trim()
        .parse()
        .map_err(|_| exec_err(format!("cannot parse {:?} as int", s)))?;
    if unsigned && n < 0 {
        return Err(exec_err(format!("cannot parse {:?} as uint", s)));
    }
    Ok(Value::Int(n))
}

fn parse_float(args: &[Value]) -> FResult {
    want("parseFloat", args, 1)?;
    if let Value::Float(f) = args[0] {
        return Ok(Value::Float(f));
    }
    let s = text_arg("parseFloat", args, 0)?;
    s.trim()
        .parse::<f64>()
        .map(Value::Float)
        .map_err(|_| exec_err(format!("cannot parse {:?} as float", s)))
}

// ---------------------------------------------------------------------------
// Structural

/// Turns a flat pair listing into a nested map, splitting keys on `/`.
fn explode(args: &[Value]) -> FResult {
    want("explode", args, 1)?;
    let list = args[0]
        .as_list()
        .ok_or_else(|| exec_err("explode expects a pair listing"))?;
    let mut root = BTreeMap::new();
    for pair in list {
        let key = pair
            .field("Key")
            .and_then(Value::as_str)
            .unwrap_or_default();
        let value = pair.field("Value").cloned().unwrap_or(Value::Null);
        if !key.is_empty() {
            nested_insert(&mut root, key, value);
        }
    }
    Ok(Value::Map(root))
}

fn explode_map(args: &[Value]) -> FResult {
    want("explodeMap", args, 1)?;
    let map = args[0]
        .as_map()
        .ok_or_else(|| exec_err("explodeMap expects a map"))?;
    let mut root = BTreeMap::new();
    for (key, value) in map {
        if !key.is_empty() {
            nested_insert(&mut root, key, value.clone());
        }
    }
    Ok(Value::Map(root))
}

fn nested_insert(map: &mut BTreeMap<String, Value>, key: &str, value: Value) {
    match key.split_once('/') {
        None => {
            map.insert(key.to_string(), value);
        }
        Some((head, rest)) => {
            let slot = map
                .entry(head.to_string())
                .or_insert_with(|| Value::Map(BTreeMap::new()));
            if !matches!(slot, Value::Map(_)) {
                *slot = Value::Map(BTreeMap::new());
            }
            if let Value::Map(inner) = slot {
                nested_insert(inner, rest, value);
            }
        }
    }
}

/// Groups a pair listing by the first segment of each key, rewriting
/// the key to the remainder. Pairs with no remainder are dropped.
fn by_key(args: &[Value]) -> FResult {
    want("byKey", args, 1)?;
    let list = args[0]
        .as_list()
        .ok_or_else(|| exec_err("byKey expects a pair listing"))?;
    let mut groups: BTreeMap<String, Value> = BTreeMap::new();
    for pair in list {
        let key = pair
            .field("Key")
            .and_then(Value::as_str)
            .unwrap_or_default();
        let Some((top, rest)) = key.split_once('/') else {
            continue;
        };
        if rest.is_empty() {
            continue;
        }
        let mut rewritten = pair
            .as_map()
            .cloned()
            .unwrap_or_default();
        rewritten.insert("Key".to_string(), Value::from(rest));
        let slot = groups
            .entry(top.to_string())
            .or_insert_with(|| Value::Map(BTreeMap::new()));
        if let Value::Map(inner) = slot {
            inner.insert(rest.to_string(), Value::Map(rewritten));
        }
    }
    Ok(Value::Map(groups))
}

/// Groups service entries by tag.
fn by_tag(args: &[Value]) -> FResult {
    want("byTag", args, 1)?;
    let list = args[0]
        .as_list()
        .ok_or_else(|| exec_err("byTag expects a service list"))?;
    let mut groups: BTreeMap<String, Value> = BTreeMap::new();
    for entry in list {
        let tags = match entry.field("Tags").and_then(Value::as_list) {
            Some(tags) => tags,
            None => continue,
        };
        for tag in tags {
            let Some(tag) = tag.as_str() else { continue };
            let slot = groups
                .entry(tag.to_string())
                .or_insert_with(|| Value::List(Vec::new()));
            if let Value::List(members) = slot {
                members.push(entry.clone());
            }
        }
    }
    Ok(Value::Map(groups))
}

// ---------------------------------------------------------------------------
// Set predicates

fn list_has(list: &[Value], needle: &Value) -> bool {
    list.iter().any(|v| values_equal(v, needle))
}

fn in_list(args: &[Value]) -> FResult {
    want("in", args, 2)?;
    let list = args[0]
        .as_list()
        .ok_or_else(|| exec_err("in expects a list"))?;
    Ok(Value::Bool(list_has(list, &args[1])))
}

fn contains(args: &[Value]) -> FResult {
    want("contains", args, 2)?;
    let list = args[1]
        .as_list()
        .ok_or_else(|| exec_err("contains expects a list"))?;
    Ok(Value::Bool(list_has(list, &args[0])))
}

enum SetPredicate {
    All,
    Any,
    None,
    NotAll,
}

fn contains_set(name: &str, args: &[Value], predicate: SetPredicate) -> FResult {
    want(name, args, 2)?;
    let required = args[0]
        .as_list()
        .ok_or_else(|| exec_err(format!("{} expects a list of needles", name)))?;
    let list = args[1]
        .as_list()
        .ok_or_else(|| exec_err(format!("{} expects a list", name)))?;
    let present = required.iter().filter(|n| list_has(list, n)).count();
    let result = match predicate {
        SetPredicate::All => present == required.len(),
        SetPredicate::Any => !required.is_empty() && present > 0,
        SetPredicate::None => present == 0,
        SetPredicate::NotAll => present < required.len(),
    };
    Ok(Value::Bool(result))
}

// ---------------------------------------------------------------------------
// Numeric

fn values_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Int(i), Value::Float(f)) | (Value::Float(f), Value::Int(i)) => *i as f64 == *f,
        _ => a == b,
    }
}

enum Num {
    Int(i64),
    Float(f64),
}

fn num_of(name: &str, v: &Value) -> Result<Num, TemplateError> {
    match v {
        Value::Int(i) => Ok(Num::Int(*i)),
        Value::Float(f) => Ok(Num::Float(*f)),
        Value::String(s) => {
            if let Ok(i) = s.parse::<i64>() {
                Ok(Num::Int(i))
            } else if let Ok(f) = s.parse::<f64>() {
                Ok(Num::Float(f))
            } else {
                Err(exec_err(format!("{} expects a number, got {:?}", name, s)))
            }
        }
        other => Err(exec_err(format!("{} expects a number, got {}", name, other))),
    }
}

fn arith(
    name: &str,
    args: &[Value],
    int_op: impl Fn(i64, i64) -> Option<i64>,
    float_op: impl Fn(f64, f64) -> f64,
) -> FResult {
    want(name, args, 2)?;
    let a = num_of(name, &args[0])?;
    let b = num_of(name, &args[1])?;
    match (a, b) {
        (Num::Int(a), Num::Int(b)) => int_op(a, b)
            .map(Value::Int)
            .ok_or_else(|| exec_err(format!("{} overflows", name))),
        (a, b) => Ok(Value::Float(float_op(float_of(a), float_of(b)))),
    }
}

fn float_of(n: Num) -> f64 {
    match n {
        Num::Int(i) => i as f64,
        Num::Float(f) => f,
    }
}

/// `divide b a` is `a / b`, matching the pipe order.
fn divide(args: &[Value]) -> FResult {
    want("divide", args, 2)?;
    let b = num_of("divide", &args[0])?;
    let a = num_of("divide", &args[1])?;
    match (a, b) {
        (Num::Int(_), Num::Int(0)) => Err(exec_err("division by zero")),
        (Num::Int(a), Num::Int(b)) => Ok(Value::Int(a / b)),
        (a, b) => Ok(Value::Float(float_of(a) / float_of(b))),
    }
}

fn modulo(args: &[Value]) -> FResult {
    want("modulo", args, 2)?;
    let b = num_of("modulo", &args[0])?;
    let a = num_of("modulo", &args[1])?;
    match (a, b) {
        (Num::Int(_), Num::Int(0)) => Err(exec_err("modulo by zero")),
        (Num::Int(a), Num::Int(b)) => Ok(Value::Int(a % b)),
        (a, b) => Ok(Value::Float(float_of(a) % float_of(b))),
    }
}

fn min_max(name: &str, args: &[Value], minimum: bool) -> FResult {
    want(name, args, 2)?;
    let a = num_of(name, &args[0])?;
    let b = num_of(name, &args[1])?;
    match (a, b) {
        (Num::Int(a), Num::Int(b)) => {
            Ok(Value::Int(if minimum { a.min(b) } else { a.max(b) }))
        }
        (a, b) => {
            let (a, b) = (float_of(a), float_of(b));
            Ok(Value::Float(if minimum { a.min(b) } else { a.max(b) }))
        }
    }
}

// ---------------------------------------------------------------------------
// Iteration and control

/// `loop n` counts `[0, n)`; `loop start stop` counts `[start, stop)`.
fn loop_range(args: &[Value]) -> FResult {
    let (start, stop) = match args {
        [n] => (0, n.as_int().ok_or_else(|| exec_err("loop expects integers"))?),
        [a, b] => (
            a.as_int().ok_or_else(|| exec_err("loop expects integers"))?,
            b.as_int().ok_or_else(|| exec_err("loop expects integers"))?,
        ),
        _ => return Err(exec_err("loop expects one or two arguments")),
    };
    Ok(Value::List((start..stop).map(Value::Int).collect()))
}

fn env(args: &[Value], ctx: &EvalContext<'_>) -> FResult {
    want("env", args, 1)?;
    let name = text_arg("env", args, 0)?;
    Ok(Value::String(
        ctx.env.get(&name).cloned().unwrap_or_default(),
    ))
}

fn timestamp(args: &[Value]) -> FResult {
    let now = OffsetDateTime::now_utc();
    match args {
        [] => now
            .format(&Rfc3339)
            .map(Value::String)
            .map_err(|e| exec_err(format!("timestamp formatting failed: {}", e))),
        [v] if v.as_str() == Some("unix") => {
            Ok(Value::String(now.unix_timestamp().to_string()))
        }
        _ => Err(exec_err("timestamp accepts no argument or \"unix\"")),
    }
}

// ---------------------------------------------------------------------------
// Comparison and logic

fn eq(args: &[Value], negate: bool) -> FResult {
    if args.len() < 2 {
        return Err(exec_err("eq expects at least two arguments"));
    }
    let equal = args[1..].iter().any(|v| values_equal(&args[0], v));
    Ok(Value::Bool(if negate { !equal } else { equal }))
}

fn not(args: &[Value]) -> FResult {
    want("not", args, 1)?;
    Ok(Value::Bool(!args[0].is_truthy()))
}

/// Eager and/or: returns the first falsy (resp. truthy) argument, or
/// the last one.
fn and_or(args: Vec<Value>, and: bool) -> Value {
    let mut last = Value::Bool(and);
    for v in args {
        if v.is_truthy() != and {
            return v;
        }
        last = v;
    }
    last
}

fn len(args: &[Value]) -> FResult {
    want("len", args, 1)?;
    let n = match &args[0] {
        Value::String(s) => s.chars().count(),
        Value::List(l) => l.len(),
        Value::Map(m) => m.len(),
        other => return Err(exec_err(format!("len of {}", other))),
    };
    Ok(Value::Int(n as i64))
}

// ---------------------------------------------------------------------------
// Scratch pad

fn scratch_set(args: &[Value], ctx: &mut EvalContext<'_>, if_absent: bool) -> FResult {
    let name = if if_absent { "scratch.SetX" } else { "scratch.Set" };
    want(name, args, 2)?;
    let key = text_arg(name, args, 0)?;
    if if_absent {
        ctx.scratch.set_x(&key, args[1].clone());
    } else {
        ctx.scratch.set(&key, args[1].clone());
    }
    Ok(Value::from(""))
}

fn scratch_map_set(args: &[Value], ctx: &mut EvalContext<'_>, if_absent: bool) -> FResult {
    let name = if if_absent { "scratch.MapSetX" } else { "scratch.MapSet" };
    want(name, args, 3)?;
    let map = text_arg(name, args, 0)?;
    let key = text_arg(name, args, 1)?;
    if if_absent {
        ctx.scratch.map_set_x(&map, &key, args[2].clone());
    } else {
        ctx.scratch.map_set(&map, &key, args[2].clone());
    }
    Ok(Value::from(""))
}
