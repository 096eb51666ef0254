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

//! End-to-end request handling against the concrete scenarios this resolver is expected to
//! satisfy, exercised through `QueryHandler::handle` with real wire-format messages.

use bytes::{Bytes, BytesMut};
use domain::base::iana::{Class, Rcode, Rtype};
use domain::base::{Dname, Message, MessageBuilder};
use resolver_core::config::{Configuration, DnsConfig, HostRecord};
use resolver_core::handler::QueryHandler;
use resolver_core::{Blocklist, HostIndex, UpstreamClient};
use std::str::FromStr;
use std::sync::Arc;

fn query(name: &str, qtype: Rtype) -> Bytes {
    let dname = Dname::<Bytes>::from_str(name).unwrap();
    let mut builder = MessageBuilder::from_target(BytesMut::with_capacity(64)).unwrap();
    builder.header_mut().set_id(0x1234);
    builder.header_mut().set_rd(true);
    let mut builder = builder.question();
    builder.push((&dname, qtype)).unwrap();
    builder.into_message().into_octets().freeze()
}

fn handler(config: Configuration) -> QueryHandler {
    let host_index = Arc::new(HostIndex::new(&config));
    let blocklist = Arc::new(Blocklist::new(&config));
    let upstream = Arc::new(UpstreamClient::new());
    QueryHandler::new(&config, host_index, blocklist, upstream)
}

fn hosts_config(hosts: Vec<HostRecord>) -> Configuration {
    Configuration {
        hosts,
        dns: DnsConfig {
            enable_recursion: false,
            ..DnsConfig::default()
        },
        ..Configuration::default()
    }
}

#[tokio::test]
async fn s1_local_a_answer_case_insensitive_short_form() {
    let cfg = hosts_config(vec![HostRecord {
        hostname: "laptop".into(),
        ipv4: vec!["192.168.1.101".parse().unwrap()],
        ipv6: vec![],
    }]);
    let h = handler(cfg);

    let req = query("laptop.home.", Rtype::A);
    let resp = h.handle(req).await.expect("request decodes");
    let msg = Message::from_octets(resp).unwrap();
    assert!(msg.header().aa());
    assert_eq!(msg.header().rcode(), Rcode::NoError);
    let answers: Vec<_> = msg.answer().unwrap().into_iter().collect();
    assert_eq!(answers.len(), 1);

    let req = query("LAPTOP.", Rtype::A);
    let resp = h.handle(req).await.expect("request decodes");
    let msg = Message::from_octets(resp).unwrap();
    let answers: Vec<_> = msg.answer().unwrap().into_iter().collect();
    assert_eq!(answers.len(), 1);
}

#[tokio::test]
async fn s2_aaaa_only_host() {
    let cfg = hosts_config(vec![HostRecord {
        hostname: "v6only".into(),
        ipv4: vec![],
        ipv6: vec!["2001:db8::1".parse().unwrap()],
    }]);
    let h = handler(cfg);

    let resp = h.handle(query("v6only.home.", Rtype::A)).await.unwrap();
    let msg = Message::from_octets(resp).unwrap();
    assert_eq!(msg.answer().unwrap().into_iter().count(), 0);
    assert_eq!(msg.header().rcode(), Rcode::NoError);

    let resp = h.handle(query("v6only.home.", Rtype::Aaaa)).await.unwrap();
    let msg = Message::from_octets(resp).unwrap();
    assert_eq!(msg.answer().unwrap().into_iter().count(), 1);
}

#[tokio::test]
async fn s3_blocklist_nxdomain_without_upstream_call() {
    let cfg = Configuration {
        dns: DnsConfig {
            block_list: vec!["evil.com".into()],
            enable_recursion: false,
            ..DnsConfig::default()
        },
        ..Configuration::default()
    };
    let h = handler(cfg);

    for name in ["sub.evil.com.", "evil.com."] {
        let resp = h.handle(query(name, Rtype::A)).await.unwrap();
        let msg = Message::from_octets(resp).unwrap();
        assert_eq!(msg.header().rcode(), Rcode::NXDomain);
        assert_eq!(msg.answer().unwrap().into_iter().count(), 0);
    }

    // Not on the blocklist, recursion disabled -> NOERROR with no answers, not NXDOMAIN.
    let resp = h.handle(query("notevil.com.", Rtype::A)).await.unwrap();
    let msg = Message::from_octets(resp).unwrap();
    assert_eq!(msg.header().rcode(), Rcode::NoError);
}

#[tokio::test]
async fn s5_recursion_disabled_no_local_match() {
    let cfg = hosts_config(vec![]);
    let h = handler(cfg);

    let resp = h.handle(query("google.com.", Rtype::A)).await.unwrap();
    let msg = Message::from_octets(resp).unwrap();
    assert_eq!(msg.header().rcode(), Rcode::NoError);
    assert_eq!(msg.answer().unwrap().into_iter().count(), 0);
}

#[tokio::test]
async fn s6_qualified_hostname_not_suffixed() {
    let cfg = hosts_config(vec![HostRecord {
        hostname: "nas.lab".into(),
        ipv4: vec!["192.168.1.20".parse().unwrap()],
        ipv6: vec![],
    }]);
    let h = handler(cfg);

    let resp = h.handle(query("nas.lab.", Rtype::A)).await.unwrap();
    let msg = Message::from_octets(resp).unwrap();
    assert_eq!(msg.answer().unwrap().into_iter().count(), 1);

    let resp = h.handle(query("nas.lab.home.", Rtype::A)).await.unwrap();
    let msg = Message::from_octets(resp).unwrap();
    assert_eq!(msg.answer().unwrap().into_iter().count(), 0);
    assert_eq!(msg.header().rcode(), Rcode::NoError);
}

#[tokio::test]
async fn malformed_request_is_dropped_not_answered() {
    let h = handler(Configuration::default());
    let garbage = Bytes::from_static(&[0u8, 1, 2]);
    assert!(h.handle(garbage).await.is_none());
}

#[tokio::test]
async fn answer_class_is_internet() {
    let cfg = hosts_config(vec![HostRecord {
        hostname: "laptop".into(),
        ipv4: vec!["192.168.1.101".parse().unwrap()],
        ipv6: vec![],
    }]);
    let h = handler(cfg);
    let resp = h.handle(query("laptop.home.", Rtype::A)).await.unwrap();
    let msg = Message::from_octets(resp).unwrap();
    let record = msg
        .answer()
        .unwrap()
        .into_iter()
        .next()
        .unwrap()
        .unwrap();
    assert_eq!(record.class(), Class::In);
}
