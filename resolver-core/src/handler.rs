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

//! Per-request pipeline: blocklist check, local lookup, upstream forwarding with failover.

use crate::blocklist::Blocklist;
use crate::config::{Configuration, UpstreamServer};
use crate::hostindex::{HostIndex, QType};
use crate::upstream::UpstreamClient;
use bytes::{Bytes, BytesMut};
use domain::base::iana::Rcode;
use domain::base::{Dname, Message, MessageBuilder, ParsedDname, Rtype};
use domain::rdata::AllRecordData;
use log::{debug, warn};
use std::str::FromStr;
use std::sync::Arc;

const MAX_LEN: usize = 4096;

/// Answers inbound DNS requests by combining a local host index, a blocklist and forwarded
/// upstream resolution, per the question-by-question algorithm described for this resolver.
pub struct QueryHandler {
    host_index: Arc<HostIndex>,
    blocklist: Arc<Blocklist>,
    upstream: Arc<UpstreamClient>,
    upstreams: Vec<UpstreamServer>,
    enable_recursion: bool,
}

impl QueryHandler {
    pub fn new(
        config: &Configuration,
        host_index: Arc<HostIndex>,
        blocklist: Arc<Blocklist>,
        upstream: Arc<UpstreamClient>,
    ) -> Self {
        Self {
            host_index,
            blocklist,
            upstream,
            upstreams: config.upstream.clone(),
            enable_recursion: config.dns.enable_recursion,
        }
    }

    /// Decode, answer and re-encode a single request datagram/stream chunk. Returns the wire
    /// bytes of the response, or `None` if the request could not be decoded (the caller should
    /// drop it; decode failures are logged, not answered).
    pub async fn handle(&self, request: Bytes) -> Option<Bytes> {
        let request = match Message::from_octets(request) {
            Ok(msg) => msg,
            Err(e) => {
                warn!("failed to decode DNS request: {e}");
                return None;
            }
        };

        Some(self.answer(&request).await)
    }

    async fn answer(&self, request: &Message<Bytes>) -> Bytes {
        // Pre-resolve every question before a single byte of the response is written, since
        // the rcode to start the answer with depends on whether any question was blocked.
        let mut resolved = Vec::new();
        let mut rcode = Rcode::NoError;

        for question in request.question() {
            let question = match question {
                Ok(q) => q,
                Err(_) => continue,
            };
            let qname = question.qname().to_string();
            let qtype = question.qtype();

            if self.blocklist.is_blocked(&qname) {
                debug!("blocklist denied {qname}");
                rcode = Rcode::NXDomain;
                resolved.push(Resolved::Blocked);
                continue;
            }

            if let Some(local_qtype) = QType::from_rtype(qtype) {
                let local = self.host_index.lookup_answers(&qname, local_qtype);
                if !local.is_empty() {
                    resolved.push(Resolved::Local(local));
                    continue;
                }
            }

            if self.enable_recursion {
                match self.forward(&qname, qtype).await {
                    Some(response) => resolved.push(Resolved::Forwarded(response)),
                    None => resolved.push(Resolved::Empty),
                }
            } else {
                resolved.push(Resolved::Empty);
            }
        }

        self.build_response(request, rcode, resolved)
    }

    /// Try each configured upstream in order; the first that returns a non-empty answer section
    /// wins. All failures (transport, timeout, parse, HTTP, empty-answer) are equivalent: move
    /// on to the next upstream.
    async fn forward(&self, qname: &str, qtype: Rtype) -> Option<Message<Bytes>> {
        let query = match build_query(qname, qtype) {
            Ok(q) => q,
            Err(e) => {
                warn!("failed to build upstream query for {qname}: {e}");
                return None;
            }
        };

        for server in &self.upstreams {
            let label = server.name.as_deref().unwrap_or(server.address.as_str());
            match self.upstream.query(server, &query).await {
                Ok(response) => {
                    if has_answers(&response) {
                        return Some(response);
                    }
                    debug!("upstream {label} returned an empty answer section, trying next");
                }
                Err(e) => {
                    debug!("upstream {label} failed: {e}");
                }
            }
        }
        None
    }

    fn build_response(&self, request: &Message<Bytes>, rcode: Rcode, resolved: Vec<Resolved>) -> Bytes {
        let builder = match MessageBuilder::from_target(BytesMut::with_capacity(MAX_LEN)) {
            Ok(b) => b,
            Err(_) => return Bytes::new(),
        };
        let mut answer = match builder.start_answer(request, rcode) {
            Ok(a) => a,
            Err(_) => return Bytes::new(),
        };

        {
            let header = answer.header_mut();
            // Preserved for behavioral fidelity even though a forwarded answer is not, strictly
            // speaking, authoritative (see open questions).
            header.set_aa(true);
            header.set_ra(self.enable_recursion);
        }

        for item in resolved {
            match item {
                Resolved::Blocked | Resolved::Empty => {}
                Resolved::Local(records) => {
                    for record in records {
                        let _ = answer.push((*record).clone());
                    }
                }
                Resolved::Forwarded(response) => {
                    if let Ok(section) = response.answer() {
                        for item in section {
                            if let Ok(Some(record)) =
                                item.and_then(|r| r.into_record::<AllRecordData<Bytes, ParsedDname<Bytes>>>())
                            {
                                let _ = answer.push(record);
                            }
                        }
                    }
                }
            }
        }

        answer.into_message().into_octets().freeze()
    }
}

enum Resolved {
    Blocked,
    Empty,
    Local(Vec<Arc<crate::hostindex::AnswerRecord>>),
    Forwarded(Message<Bytes>),
}

fn build_query(qname: &str, qtype: Rtype) -> Result<Message<Bytes>, Box<dyn std::error::Error>> {
    let name = Dname::<Bytes>::from_str(qname)?;
    let mut builder = MessageBuilder::from_target(BytesMut::with_capacity(64))?;
    builder.header_mut().set_random_id();
    builder.header_mut().set_rd(true);
    let mut builder = builder.question();
    builder.push((&name, qtype))?;
    Ok(builder.into_message())
}

fn has_answers(response: &Message<Bytes>) -> bool {
    match response.answer() {
        Ok(section) => section.into_iter().any(|item| item.is_ok()),
        Err(_) => false,
    }
}
