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

//! Upstream failover against real (loopback) UDP mock servers: a silent upstream (simulating a
//! timeout), an upstream that answers with an empty answer section, and one that answers with a
//! real record. Only the last should end up in the response.

use bytes::{Bytes, BytesMut};
use domain::base::iana::{Class, Rtype};
use domain::base::{Dname, Message, MessageBuilder};
use domain::rdata::{AllRecordData, A};
use resolver_core::config::{Configuration, DnsConfig, Protocol, UpstreamServer};
use resolver_core::handler::QueryHandler;
use resolver_core::{Blocklist, HostIndex, UpstreamClient};
use std::net::Ipv4Addr;
use std::str::FromStr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::net::UdpSocket;

/// A server that never replies, standing in for a timed-out upstream.
async fn silent_upstream() -> u16 {
    let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let port = socket.local_addr().unwrap().port();
    tokio::spawn(async move {
        let mut buf = [0u8; 512];
        // Receive and drop forever; never responds.
        loop {
            if socket.recv_from(&mut buf).await.is_err() {
                break;
            }
        }
    });
    port
}

/// A server that replies with a syntactically valid but answer-less NOERROR response.
async fn empty_answer_upstream(hits: Arc<AtomicUsize>) -> u16 {
    let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let port = socket.local_addr().unwrap().port();
    tokio::spawn(async move {
        let mut buf = [0u8; 512];
        loop {
            let (len, peer) = match socket.recv_from(&mut buf).await {
                Ok(v) => v,
                Err(_) => break,
            };
            hits.fetch_add(1, Ordering::SeqCst);
            let request = match Message::from_octets(Bytes::copy_from_slice(&buf[..len])) {
                Ok(m) => m,
                Err(_) => continue,
            };
            let builder = MessageBuilder::from_target(BytesMut::with_capacity(64)).unwrap();
            let answer = builder
                .start_answer(&request, domain::base::iana::Rcode::NoError)
                .unwrap();
            let response = answer.into_message();
            let _ = socket.send_to(response.as_slice(), peer).await;
        }
    });
    port
}

/// A server that answers every A query with a fixed address.
async fn answering_upstream(hits: Arc<AtomicUsize>, ip: Ipv4Addr) -> u16 {
    let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let port = socket.local_addr().unwrap().port();
    tokio::spawn(async move {
        let mut buf = [0u8; 512];
        loop {
            let (len, peer) = match socket.recv_from(&mut buf).await {
                Ok(v) => v,
                Err(_) => break,
            };
            hits.fetch_add(1, Ordering::SeqCst);
            let request = match Message::from_octets(Bytes::copy_from_slice(&buf[..len])) {
                Ok(m) => m,
                Err(_) => continue,
            };
            let question = request.sole_question().unwrap();
            let name: Dname<Bytes> = Dname::from_str(&question.qname().to_string()).unwrap();

            let builder = MessageBuilder::from_target(BytesMut::with_capacity(128)).unwrap();
            let mut answer = builder
                .start_answer(&request, domain::base::iana::Rcode::NoError)
                .unwrap();
            let record = domain::base::Record::new(name, Class::In, 300, AllRecordData::A(A::new(ip)));
            answer.push(record).unwrap();
            let response = answer.into_message();
            let _ = socket.send_to(response.as_slice(), peer).await;
        }
    });
    port
}

fn query(name: &str) -> Bytes {
    let dname = Dname::<Bytes>::from_str(name).unwrap();
    let mut builder = MessageBuilder::from_target(BytesMut::with_capacity(64)).unwrap();
    builder.header_mut().set_id(0x4242);
    builder.header_mut().set_rd(true);
    let mut builder = builder.question();
    builder.push((&dname, Rtype::A)).unwrap();
    builder.into_message().into_octets().freeze()
}

#[tokio::test]
async fn s4_failover_skips_timeout_and_empty_answer() {
    let u1_port = silent_upstream().await;
    let u2_hits = Arc::new(AtomicUsize::new(0));
    let u2_port = empty_answer_upstream(u2_hits.clone()).await;
    let u3_hits = Arc::new(AtomicUsize::new(0));
    let expected_ip: Ipv4Addr = "93.184.216.34".parse().unwrap();
    let u3_port = answering_upstream(u3_hits.clone(), expected_ip).await;

    let cfg = Configuration {
        upstream: vec![
            UpstreamServer {
                name: Some("u1".into()),
                address: "127.0.0.1".into(),
                protocol: Protocol::Udp,
                port: Some(u1_port as u32),
                path: None,
                verify: true,
            },
            UpstreamServer {
                name: Some("u2".into()),
                address: "127.0.0.1".into(),
                protocol: Protocol::Udp,
                port: Some(u2_port as u32),
                path: None,
                verify: true,
            },
            UpstreamServer {
                name: Some("u3".into()),
                address: "127.0.0.1".into(),
                protocol: Protocol::Udp,
                port: Some(u3_port as u32),
                path: None,
                verify: true,
            },
        ],
        dns: DnsConfig { enable_recursion: true, ..DnsConfig::default() },
        ..Configuration::default()
    };

    let host_index = Arc::new(HostIndex::new(&cfg));
    let blocklist = Arc::new(Blocklist::new(&cfg));
    let upstream = Arc::new(UpstreamClient::new());
    let handler = QueryHandler::new(&cfg, host_index, blocklist, upstream);

    let resp = handler.handle(query("example.com.")).await.expect("request decodes");
    let msg = Message::from_octets(resp).unwrap();
    let answers: Vec<_> = msg.answer().unwrap().into_iter().collect();
    assert_eq!(answers.len(), 1);

    assert_eq!(u2_hits.load(Ordering::SeqCst), 1);
    assert_eq!(u3_hits.load(Ordering::SeqCst), 1);
}
