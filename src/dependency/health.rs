use std::fmt;

use async_trait::async_trait;

use super::{fingerprint_of, DepKind, Dependency, Fetched};
use crate::clients::{ClientSet, HealthEntry, HealthStatus, QueryOptions};
use crate::errors::FetchError;
use crate::template::Value;

/// Which aggregate statuses a health query accepts.
///
/// `Any` (spelled `"any"` in the filter string) is equivalent to no
/// filter at all and may not be combined with concrete statuses.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum StatusFilter {
    Any,
    Only(Vec<HealthStatus>),
}

impl StatusFilter {
    /// Parses `"passing,warning"` style filter strings. An empty string
    /// means passing-only, matching the `service` helper's default.
    pub fn parse(s: &str) -> Result<Self, String> {
        let s = s.trim();
        if s.is_empty() {
            return Ok(StatusFilter::Only(vec![HealthStatus::Passing]));
        }
        let mut statuses = Vec::new();
        let mut any = false;
        for part in s.split(',') {
            match part.trim() {
                "any" => any = true,
                "passing" => statuses.push(HealthStatus::Passing),
                "warning" => statuses.push(HealthStatus::Warning),
                "critical" => statuses.push(HealthStatus::Critical),
                "maintenance" => statuses.push(HealthStatus::Maintenance),
                other => return Err(format!("invalid health status {:?}", other)),
            }
        }
        if any {
            if !statuses.is_empty() {
                return Err("cannot combine \"any\" with other statuses".to_string());
            }
            return Ok(StatusFilter::Any);
        }
        statuses.sort();
        statuses.dedup();
        Ok(StatusFilter::Only(statuses))
    }

    pub fn accepts(&self, status: HealthStatus) -> bool {
        match self {
            StatusFilter::Any => true,
            StatusFilter::Only(list) => list.contains(&status),
        }
    }

    fn canonical(&self) -> String {
        match self {
            StatusFilter::Any => "[any]".to_string(),
            StatusFilter::Only(list) => {
                let names: Vec<&str> = list.iter().map(HealthStatus::as_str).collect();
                format!("[{}]", names.join(","))
            }
        }
    }
}

/// Health-checked instances of one service, filtered by status.
#[derive(Debug)]
pub struct HealthService {
    name: String,
    tag: Option<String>,
    filter: StatusFilter,
    datacenter: Option<String>,
    fingerprint: String,
}

impl HealthService {
    pub fn new(
        name: &str,
        tag: Option<&str>,
        mut filter: StatusFilter,
        datacenter: Option<&str>,
    ) -> Self {
        if let StatusFilter::Only(list) = &mut filter {
            list.sort();
            list.dedup();
        }
        let tag = tag.filter(|t| !t.is_empty());
        let base = match tag {
            Some(t) => format!("{}.{}", t, name),
            None => name.to_string(),
        };
        let param = format!("{} {}", base, filter.canonical());
        Self {
            name: name.to_string(),
            tag: tag.map(str::to_string),
            filter,
            datacenter: datacenter.map(str::to_string),
            fingerprint: fingerprint_of("health.service", &param, datacenter),
        }
    }

    fn entry_value(e: &HealthEntry) -> Value {
        let mut tags = e.tags.clone();
        tags.sort();
        Value::map_from(vec![
            ("ID", Value::from(e.id.as_str())),
            ("Node", Value::from(e.node.as_str())),
            ("NodeAddress", Value::from(e.node_address.as_str())),
            ("Name", Value::from(e.service_name.as_str())),
            ("Address", Value::from(e.address.as_str())),
            ("Port", Value::Int(i64::from(e.port))),
            (
                "Tags",
                Value::List(tags.into_iter().map(Value::from).collect()),
            ),
            ("Status", Value::from(e.status.as_str())),
        ])
    }
}

#[async_trait]
impl Dependency for HealthService {
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
        let (entries, meta) = consul
            .health_service(&self.name, self.tag.as_deref(), &opts)
            .await?;
        let list = entries
            .iter()
            .filter(|e| self.filter.accepts(e.status))
            .map(Self::entry_value)
            .collect();
        Ok((Value::List(list), meta))
    }
}

impl fmt::Display for HealthService {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.fingerprint)
    }
}
