// Copyright 2020 LEXUGE
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License
// along with this program.  If not, see <http://www.gnu.org/licenses/>.

//! Precomputed, read-mostly lookup from normalized name + query type to answer records.

use crate::config::{Configuration, HostRecord};
use arc_swap::ArcSwap;
use bytes::Bytes;
use domain::base::iana::Rtype;
use domain::base::{Dname, Record};
use domain::rdata::{Aaaa, AllRecordData, A};
use std::collections::HashMap;
use std::net::{Ipv4Addr, Ipv6Addr};
use std::str::FromStr;
use std::sync::Arc;

/// A single pre-materialized answer record. Readers receive shared references; the data must
/// never be mutated after construction.
pub type AnswerRecord = Record<Dname<Bytes>, AllRecordData<Bytes, Dname<Bytes>>>;

/// The query types this index (and the local-answer path of `QueryHandler`) knows how to serve.
/// Everything else falls through to upstream forwarding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum QType {
    /// A record.
    A,
    /// AAAA record.
    Aaaa,
}

impl QType {
    /// Translate from the wire `Rtype`. Returns `None` for any type other than A/AAAA, which
    /// `HostIndex` never answers locally.
    pub fn from_rtype(rtype: Rtype) -> Option<Self> {
        match rtype {
            Rtype::A => Some(QType::A),
            Rtype::Aaaa => Some(QType::Aaaa),
            _ => None,
        }
    }
}

/// Normalize a DNS name for indexing/lookup: lowercase, trailing dot stripped.
pub fn normalize(name: &str) -> String {
    name.trim_end_matches('.').to_ascii_lowercase()
}

struct Table {
    // Keyed by (normalized name, qtype). No per-request parsing or allocation beyond the
    // normalized key string and the returned Vec clone of shared Arc pointers.
    answers: HashMap<(String, QType), Vec<Arc<AnswerRecord>>>,
    hosts: HashMap<String, HostRecord>,
}

impl Table {
    fn empty() -> Self {
        Self {
            answers: HashMap::new(),
            hosts: HashMap::new(),
        }
    }
}

/// Read-mostly lookup table from normalized name + query type to pre-built answer records.
///
/// Rebuilds publish a fresh immutable `Table` via `ArcSwap`, so concurrent readers never block
/// on a rebuild and never observe a half-built table.
pub struct HostIndex {
    table: ArcSwap<Table>,
}

impl HostIndex {
    /// Build an index with no configured hosts.
    pub fn empty() -> Self {
        Self {
            table: ArcSwap::from_pointee(Table::empty()),
        }
    }

    /// Build an index from a `Configuration`.
    pub fn new(config: &Configuration) -> Self {
        let index = Self::empty();
        index.rebuild(config);
        index
    }

    /// Atomically replace the lookup table. Readers in flight continue to see the table they
    /// acquired at request entry; later lookups see the new one.
    pub fn rebuild(&self, config: &Configuration) {
        self.table.store(Arc::new(build_table(config)));
    }

    /// Return the (possibly empty) ordered list of pre-built answers for `name`/`qtype`.
    /// Normalizes `name` but otherwise performs no parsing or allocation beyond the lookup key
    /// and cloning the shared `Arc<AnswerRecord>` pointers.
    pub fn lookup_answers(&self, name: &str, qtype: QType) -> Vec<Arc<AnswerRecord>> {
        let key = (normalize(name), qtype);
        let table = self.table.load();
        table.answers.get(&key).cloned().unwrap_or_default()
    }

    /// Return the raw configured `HostRecord` for `name`, if any (by full or short form).
    pub fn lookup_host(&self, name: &str) -> Option<HostRecord> {
        let key = normalize(name);
        self.table.load().hosts.get(&key).cloned()
    }
}

fn build_table(config: &Configuration) -> Table {
    let home = config.home_dns_domain.trim_end_matches('.').to_ascii_lowercase();
    let mut answers: HashMap<(String, QType), Vec<Arc<AnswerRecord>>> = HashMap::new();
    let mut hosts: HashMap<String, HostRecord> = HashMap::new();

    for host in &config.hosts {
        let full = if host.hostname.contains('.') {
            host.hostname.trim_end_matches('.').to_ascii_lowercase()
        } else {
            format!("{}.{}", host.hostname.to_ascii_lowercase(), home)
        };
        let short = host.hostname.trim_end_matches('.').to_ascii_lowercase();

        let owner = match Dname::<Bytes>::from_str(&full) {
            Ok(d) => d,
            Err(_) => continue,
        };

        if !host.ipv4.is_empty() {
            let records: Vec<Arc<AnswerRecord>> = host
                .ipv4
                .iter()
                .map(|ip| Arc::new(make_a_record(owner.clone(), config.dns.ttl, *ip)))
                .collect();
            insert_under_all_variants(&mut answers, &full, &short, QType::A, &records);
        }

        if !host.ipv6.is_empty() {
            let records: Vec<Arc<AnswerRecord>> = host
                .ipv6
                .iter()
                .map(|ip| Arc::new(make_aaaa_record(owner.clone(), config.dns.ttl, *ip)))
                .collect();
            insert_under_all_variants(&mut answers, &full, &short, QType::Aaaa, &records);
        }

        hosts.insert(full.clone(), host.clone());
        hosts.insert(short.clone(), host.clone());
    }

    Table { answers, hosts }
}

fn insert_under_all_variants(
    answers: &mut HashMap<(String, QType), Vec<Arc<AnswerRecord>>>,
    full: &str,
    short: &str,
    qtype: QType,
    records: &[Arc<AnswerRecord>],
) {
    // Index under both the full and short forms; `normalize()` already strips trailing dots on
    // lookup, so there is no need for separate "with dot" variants here.
    answers.insert((full.to_owned(), qtype), records.to_vec());
    answers.insert((short.to_owned(), qtype), records.to_vec());
}

fn make_a_record(owner: Dname<Bytes>, ttl: u32, ip: Ipv4Addr) -> AnswerRecord {
    Record::new(owner, domain::base::iana::Class::In, ttl, AllRecordData::A(A::new(ip)))
}

fn make_aaaa_record(owner: Dname<Bytes>, ttl: u32, ip: Ipv6Addr) -> AnswerRecord {
    Record::new(
        owner,
        domain::base::iana::Class::In,
        ttl,
        AllRecordData::Aaaa(Aaaa::new(ip)),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Configuration, HostRecord};

    fn cfg_with_hosts(hosts: Vec<HostRecord>) -> Configuration {
        Configuration {
            hosts,
            ..Configuration::default()
        }
    }

    #[test]
    fn bare_hostname_gets_home_suffix_and_both_forms_resolve() {
        let cfg = cfg_with_hosts(vec![HostRecord {
            hostname: "laptop".into(),
            ipv4: vec!["192.168.1.101".parse().unwrap()],
            ipv6: vec![],
        }]);
        let idx = HostIndex::new(&cfg);

        let full = idx.lookup_answers("laptop.home.", QType::A);
        let short = idx.lookup_answers("LAPTOP.", QType::A);
        assert_eq!(full.len(), 1);
        assert_eq!(short.len(), 1);
        assert_eq!(full[0].data(), short[0].data());
        assert_eq!(full[0].ttl(), 300);
    }

    #[test]
    fn qualified_hostname_is_not_suffixed() {
        let cfg = cfg_with_hosts(vec![HostRecord {
            hostname: "nas.lab".into(),
            ipv4: vec!["192.168.1.20".parse().unwrap()],
            ipv6: vec![],
        }]);
        let idx = HostIndex::new(&cfg);

        assert_eq!(idx.lookup_answers("nas.lab.", QType::A).len(), 1);
        assert_eq!(idx.lookup_answers("nas.lab.home.", QType::A).len(), 0);
    }

    #[test]
    fn aaaa_only_host_has_no_a_answers() {
        let cfg = cfg_with_hosts(vec![HostRecord {
            hostname: "v6only".into(),
            ipv4: vec![],
            ipv6: vec!["2001:db8::1".parse().unwrap()],
        }]);
        let idx = HostIndex::new(&cfg);

        assert_eq!(idx.lookup_answers("v6only.home.", QType::A).len(), 0);
        assert_eq!(idx.lookup_answers("v6only.home.", QType::Aaaa).len(), 1);
    }

    #[test]
    fn rebuild_is_idempotent() {
        let cfg = cfg_with_hosts(vec![HostRecord {
            hostname: "laptop".into(),
            ipv4: vec!["192.168.1.101".parse().unwrap()],
            ipv6: vec![],
        }]);
        let idx = HostIndex::new(&cfg);
        let before = idx.lookup_answers("laptop.home.", QType::A);
        idx.rebuild(&cfg);
        let after = idx.lookup_answers("laptop.home.", QType::A);
        assert_eq!(before.len(), after.len());
    }
}
