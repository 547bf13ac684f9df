use std::fmt;

use async_trait::async_trait;

use super::{fingerprint_of, DepKind, Dependency, Fetched};
use crate::clients::{ClientSet, NomadServiceEntry, QueryOptions};
use crate::errors::FetchError;
use crate::template::Value;

fn entry_value(e: &NomadServiceEntry) -> Value {
    let mut tags = e.tags.clone();
    tags.sort();
    Value::map_from(vec![
        ("ID", Value::from(e.id.as_str())),
        ("Name", Value::from(e.name.as_str())),
        ("Node", Value::from(e.node.as_str())),
        ("Address", Value::from(e.address.as_str())),
        ("Port", Value::Int(i64::from(e.port))),
        (
            "Tags",
            Value::List(tags.into_iter().map(Value::from).collect()),
        ),
    ])
}

/// All Nomad service registrations: name -> sorted tag list.
#[derive(Debug)]
pub struct NomadServices {
    fingerprint: String,
}

impl NomadServices {
    pub fn new() -> Self {
        Self {
            fingerprint: "nomad.services".to_string(),
        }
    }
}

impl Default for NomadServices {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Dependency for NomadServices {
    fn fingerprint(&self) -> &str {
        &self.fingerprint
    }

    fn kind(&self) -> DepKind {
        DepKind::Nomad
    }

    async fn fetch(&self, clients: &ClientSet, opts: &QueryOptions) -> Result<Fetched, FetchError> {
        let nomad = clients.nomad()?;
        let (services, meta) = nomad.services(opts).await?;
        let map = services
            .into_iter()
            .map(|(name, mut tags)| {
                tags.sort();
                (name, Value::List(tags.into_iter().map(Value::from).collect()))
            })
            .collect();
        Ok((Value::Map(map), meta))
    }
}

impl fmt::Display for NomadServices {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.fingerprint)
    }
}

/// Instances of one Nomad service.
#[derive(Debug)]
pub struct NomadService {
    name: String,
    fingerprint: String,
}

impl NomadService {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            fingerprint: fingerprint_of("nomad.service", name, None),
        }
    }
}

#[async_trait]
impl Dependency for NomadService {
    fn fingerprint(&self) -> &str {
        &self.fingerprint
    }

    fn kind(&self) -> DepKind {
        DepKind::Nomad
    }

    async fn fetch(&self, clients: &ClientSet, opts: &QueryOptions) -> Result<Fetched, FetchError> {
        let nomad = clients.nomad()?;
        let (entries, meta) = nomad.service(&self.name, opts).await?;
        Ok((Value::List(entries.iter().map(entry_value).collect()), meta))
    }
}

impl fmt::Display for NomadService {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.fingerprint)
    }
}

/// Items of one Nomad variable. Null when the path does not exist.
#[derive(Debug)]
pub struct NomadVar {
    path: String,
    fingerprint: String,
}

impl NomadVar {
    pub fn new(path: &str) -> Self {
        Self {
            path: path.to_string(),
            fingerprint: fingerprint_of("nomad.var.get", path, None),
        }
    }
}

#[async_trait]
impl Dependency for NomadVar {
    fn fingerprint(&self) -> &str {
        &self.fingerprint
    }

    fn kind(&self) -> DepKind {
        DepKind::Nomad
    }

    async fn fetch(&self, clients: &ClientSet, opts: &QueryOptions) -> Result<Fetched, FetchError> {
        let nomad = clients.nomad()?;
        let (items, meta) = nomad.var_get(&self.path, opts).await?;
        let value = match items {
            Some(map) => Value::Map(
                map.into_iter()
                    .map(|(k, v)| (k, Value::String(v)))
                    .collect(),
            ),
            None => Value::Null,
        };
        Ok((value, meta))
    }
}

impl fmt::Display for NomadVar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.fingerprint)
    }
}

/// Variable paths under a prefix.
#[derive(Debug)]
pub struct NomadVarList {
    prefix: String,
    fingerprint: String,
}

impl NomadVarList {
    pub fn new(prefix: &str) -> Self {
        Self {
            prefix: prefix.to_string(),
            fingerprint: fingerprint_of("nomad.var.list", prefix, None),
        }
    }
}

#[async_trait]
impl Dependency for NomadVarList {
    fn fingerprint(&self) -> &str {
        &self.fingerprint
    }

    fn kind(&self) -> DepKind {
        DepKind::Nomad
    }

    async fn fetch(&self, clients: &ClientSet, opts: &QueryOptions) -> Result<Fetched, FetchError> {
        let nomad = clients.nomad()?;
        let (mut paths, meta) = nomad.var_list(&self.prefix, opts).await?;
        paths.sort();
        Ok((
            Value::List(paths.into_iter().map(Value::from).collect()),
            meta,
        ))
    }
}

impl fmt::Display for NomadVarList {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.fingerprint)
    }
}
