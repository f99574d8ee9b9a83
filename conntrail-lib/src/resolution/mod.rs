//! Name resolution table built from observed DNS answers.
//!
//! The forward map is keyed by the query name and owns every
//! [`ResolutionRecord`]. The reverse map points from the last address a record
//! resolved to back at the forward key, so a connection's destination can be
//! labelled with the name chain that produced it.

use std::fmt;
use std::net::Ipv4Addr;

use ahash::AHashMap;
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, trace};

use crate::packet::{dns, AnswerData, DnsAnswer, DnsMessage};

/// Diagnostics raised while processing a DNS answer. None of them are fatal.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DnsError {
    #[error("no question")]
    NoQuestion,
    #[error("{name} -> no answer")]
    EmptyAnswer { name: String },
    #[error("{name} -> not type A query ({query_type})")]
    UnsupportedQueryType { name: String, query_type: u16 },
    #[error("{name} -> no A or CNAME answer")]
    NoUsableAnswer { name: String },
    #[error("undecodable payload from {server}")]
    Malformed { server: Ipv4Addr },
}

/// Where a tracked name currently points.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "state", content = "address")]
pub enum Resolved {
    /// Query observed, no usable answer yet.
    Pending,
    Address(Ipv4Addr),
    /// The resolver answered NXDOMAIN.
    NxDomain,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResolutionRecord {
    names: Vec<String>,
    resolved: Resolved,
}

impl ResolutionRecord {
    fn new(name: &str) -> Self {
        Self { names: vec![name.to_string()], resolved: Resolved::Pending }
    }

    /// Query name followed by every alias seen while resolving it.
    pub fn names(&self) -> &[String] {
        &self.names
    }

    pub fn query_name(&self) -> &str {
        // names is never empty: it is created with the query name and only
        // ever truncated back to it
        self.names.first().map(String::as_str).unwrap_or_default()
    }

    pub fn aliases(&self) -> &[String] {
        self.names.get(1..).unwrap_or_default()
    }

    pub fn resolved(&self) -> Resolved {
        self.resolved
    }

    pub fn address(&self) -> Option<Ipv4Addr> {
        match self.resolved {
            Resolved::Address(addr) => Some(addr),
            Resolved::Pending | Resolved::NxDomain => None,
        }
    }

    fn push_alias(&mut self, alias: &str) {
        if !self.names.iter().any(|n| n == alias) {
            self.names.push(alias.to_string());
        }
    }
}

impl fmt::Display for ResolutionRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.names.join(" -> "))?;
        match self.resolved {
            Resolved::Address(addr) => write!(f, " -> {addr}"),
            Resolved::NxDomain => write!(f, " -> NXDOMAIN"),
            Resolved::Pending => Ok(()),
        }
    }
}

/// Result of feeding one DNS message to the table.
#[derive(Debug, PartialEq, Eq)]
pub enum DnsOutcome<'a> {
    /// An answer was applied; the record reflects the new state.
    Updated(&'a ResolutionRecord),
    /// Query types that are consumed silently (PTR, AAAA, HTTPS).
    Ignored { query_type: u16 },
}

#[derive(Debug, Default)]
pub struct ResolutionTable {
    records: AHashMap<String, ResolutionRecord>,
    by_address: AHashMap<Ipv4Addr, String>,
}

impl ResolutionTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start tracking `name`. Repeated queries for a known name are no-ops.
    pub fn record_query(&mut self, name: &str) -> &ResolutionRecord {
        self.records
            .entry(name.to_string())
            .or_insert_with(|| ResolutionRecord::new(name))
    }

    /// Apply an answer section for `name`.
    ///
    /// NXDOMAIN resets the alias chain and leaves the reverse index alone.
    /// Otherwise answers are walked in order: aliases are appended until the
    /// first address, which becomes the resolution and is reverse-indexed. An
    /// answer section holding neither is reported and changes nothing.
    pub fn record_answer(
        &mut self,
        name: &str,
        response_code: u16,
        answers: &[DnsAnswer],
    ) -> Result<&ResolutionRecord, DnsError> {
        let record = self
            .records
            .entry(name.to_string())
            .or_insert_with(|| ResolutionRecord::new(name));

        if response_code == dns::RCODE_NXDOMAIN {
            record.names.truncate(1);
            record.resolved = Resolved::NxDomain;
            debug!(%name, "NXDOMAIN");
            return Ok(&*record);
        }

        if answers.is_empty() {
            return Err(DnsError::EmptyAnswer { name: name.to_string() });
        }

        let mut address = None;
        let mut usable = false;
        for answer in answers {
            match &answer.data {
                AnswerData::Address(addr) => {
                    address = Some(*addr);
                    usable = true;
                    break;
                }
                AnswerData::Alias(alias) => {
                    record.push_alias(alias);
                    usable = true;
                }
                AnswerData::Other(record_type) => {
                    trace!(%name, record_type, "skipping answer record");
                }
            }
        }

        if !usable {
            return Err(DnsError::NoUsableAnswer { name: name.to_string() });
        }

        if let Some(addr) = address {
            record.resolved = Resolved::Address(addr);
            if let Some(previous) = self.by_address.insert(addr, name.to_string()) {
                if previous != name {
                    debug!(%addr, %previous, current = %name, "reverse entry reassigned");
                }
            }
        }

        Ok(&*record)
    }

    /// Feed a whole DNS message: question checks, query type filtering, then
    /// [`record_query`](Self::record_query) and
    /// [`record_answer`](Self::record_answer) for the first question.
    pub fn process(&mut self, message: &DnsMessage) -> Result<DnsOutcome<'_>, DnsError> {
        let question = message.questions.first().ok_or(DnsError::NoQuestion)?;

        match question.query_type {
            dns::TYPE_A => {}
            dns::TYPE_PTR | dns::TYPE_AAAA | dns::TYPE_HTTPS => {
                return Ok(DnsOutcome::Ignored { query_type: question.query_type });
            }
            query_type => {
                return Err(DnsError::UnsupportedQueryType {
                    name: question.name.clone(),
                    query_type,
                });
            }
        }

        self.record_query(&question.name);
        self.record_answer(&question.name, message.response_code, &message.answers)
            .map(DnsOutcome::Updated)
    }

    /// Record whose last resolution produced `addr`, if any.
    pub fn lookup_by_address(&self, addr: Ipv4Addr) -> Option<&ResolutionRecord> {
        self.by_address
            .get(&addr)
            .and_then(|name| self.records.get(name))
    }

    pub fn lookup_by_name(&self, name: &str) -> Option<&ResolutionRecord> {
        self.records.get(name)
    }

    /// Number of tracked names.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}
