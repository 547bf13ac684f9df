use std::fmt;

use async_trait::async_trait;

use super::{fingerprint_of, DepKind, Dependency, Fetched};
use crate::clients::{CatalogRegistration, ClientSet, NodeInfo, QueryOptions};
use crate::errors::FetchError;
use crate::template::Value;

fn registration_value(r: &CatalogRegistration) -> Value {
    let mut tags = r.tags.clone();
    tags.sort();
    Value::map_from(vec![
        ("ID", Value::from(r.id.as_str())),
        ("Node", Value::from(r.node.as_str())),
        ("NodeAddress", Value::from(r.node_address.as_str())),
        ("Name", Value::from(r.service_name.as_str())),
        ("Address", Value::from(r.address.as_str())),
        ("Port", Value::Int(i64::from(r.port))),
        (
            "Tags",
            Value::List(tags.into_iter().map(Value::from).collect()),
        ),
    ])
}

fn node_value(n: &NodeInfo) -> Value {
    Value::map_from(vec![
        ("Node", Value::from(n.name.as_str())),
        ("Address", Value::from(n.address.as_str())),
    ])
}

/// All known services: service-name -> sorted tag list.
#[derive(Debug)]
pub struct CatalogServices {
    datacenter: Option<String>,
    fingerprint: String,
}

impl CatalogServices {
    pub fn new(datacenter: Option<&str>) -> Self {
        Self {
            datacenter: datacenter.map(str::to_string),
            fingerprint: fingerprint_of("catalog.services", "", datacenter),
        }
    }
}

#[async_trait]
impl Dependency for CatalogServices {
    fn fingerprint(&self) -> &str {
        &self.fingerprint
    }

    fn kind(&self) -> DepKind {
        DepKind::Consul
    }

    async fn fetch(&self, clients: &ClientSet, opts: &QueryOptions) -> Result<Fetched, FetchError> {
        let consul = clients.consul()?;
        let opts = QueryOptions {
            datacenter: self.datacenter.clone(),
            ..opts.clone()
        };
        let (services, meta) = consul.catalog_services(&opts).await?;
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

impl fmt::Display for CatalogServices {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.fingerprint)
    }
}

/// Registrations of one service, optionally restricted to a tag.
#[derive(Debug)]
pub struct CatalogService {
    name: String,
    tag: Option<String>,
    datacenter: Option<String>,
    fingerprint: String,
}

impl CatalogService {
    pub fn new(name: &str, tag: Option<&str>, datacenter: Option<&str>) -> Self {
        let tag = tag.filter(|t| !t.is_empty());
        let param = match tag {
            Some(t) => format!("{}.{}", t, name),
            None => name.to_string(),
        };
        Self {
            name: name.to_string(),
            tag: tag.map(str::to_string),
            datacenter: datacenter.map(str::to_string),
            fingerprint: fingerprint_of("catalog.service", &param, datacenter),
        }
    }
}

#[async_trait]
impl Dependency for CatalogService {
    fn fingerprint(&self) -> &str {
        &self.fingerprint
    }

    fn kind(&self) -> DepKind {
        DepKind::Consul
    }

    async fn fetch(&self, clients: &ClientSet, opts: &QueryOptions) -> Result<Fetched, FetchError> {
        let consul = clients.consul()?;
        let opts = QueryOptions {
            datacenter: self.datacenter.clone(),
            ..opts.clone()
        };
        let (regs, meta) = consul
            .catalog_service(&self.name, self.tag.as_deref(), &opts)
            .await?;
        let list = regs.iter().map(registration_value).collect();
        Ok((Value::List(list), meta))
    }
}

impl fmt::Display for CatalogService {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.fingerprint)
    }
}

/// Node enumeration for a datacenter.
#[derive(Debug)]
pub struct CatalogNodes {
    datacenter: Option<String>,
    fingerprint: String,
}

impl CatalogNodes {
    pub fn new(datacenter: Option<&str>) -> Self {
        Self {
            datacenter: datacenter.map(str::to_string),
            fingerprint: fingerprint_of("catalog.nodes", "", datacenter),
        }
    }
}

#[async_trait]
impl Dependency for CatalogNodes {
    fn fingerprint(&self) -> &str {
        &self.fingerprint
    }

    fn kind(&self) -> DepKind {
        DepKind::Consul
    }

    async fn fetch(&self, clients: &ClientSet, opts: &QueryOptions) -> Result<Fetched, FetchError> {
        let consul = clients.consul()?;
        let opts = QueryOptions {
            datacenter: self.datacenter.clone(),
            ..opts.clone()
        };
        let (mut nodes, meta) = consul.catalog_nodes(&opts).await?;
        nodes.sort_by(|a, b| a.name.cmp(&b.name));
        let list = nodes.iter().map(node_value).collect();
        Ok((Value::List(list), meta))
    }
}

impl fmt::Display for CatalogNodes {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.fingerprint)
    }
}

/// A single node and the services registered on it.
#[derive(Debug)]
pub struct CatalogNode {
    name: String,
    datacenter: Option<String>,
    fingerprint: String,
}

impl CatalogNode {
    pub fn new(name: &str, datacenter: Option<&str>) -> Self {
        Self {
            name: name.to_string(),
            datacenter: datacenter.map(str::to_string),
            fingerprint: fingerprint_of("catalog.node", name, datacenter),
        }
    }
}

#[async_trait]
impl Dependency for CatalogNode {
    fn fingerprint(&self) -> &str {
        &self.fingerprint
    }

    fn kind(&self) -> DepKind {
        DepKind::Consul
    }

    async fn fetch(&self, clients: &ClientSet, opts: &QueryOptions) -> Result<Fetched, FetchError> {
        let consul = clients.consul()?;
        let opts = QueryOptions {
            datacenter: self.datacenter.clone(),
            ..opts.clone()
        };
        let (detail, meta) = consul.catalog_node(&self.name, &opts).await?;
        let value = match detail {
            Some(d) => Value::map_from(vec![
                ("Node", node_value(&d.node)),
                (
                    "Services",
                    Value::List(d.services.iter().map(registration_value).collect()),
                ),
            ]),
            None => Value::Null,
        };
        Ok((value, meta))
    }
}

impl fmt::Display for CatalogNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.fingerprint)
    }
}
