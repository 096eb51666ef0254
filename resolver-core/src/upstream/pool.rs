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

//! Generic deadpool-backed connection pool for the connection-oriented transports
//! (UDP/TCP/TLS). Each `ConnPool<T>` wraps a `ConnInitiator` and hands out pooled connections,
//! recycling ones that fail a reusability check rather than closing and reopening on every
//! query.

use super::{ConnInitiator, QHandle};
use crate::error::UpstreamError;
use async_trait::async_trait;
use bytes::Bytes;
use deadpool::managed::{self, Manager, Pool, RecycleError};
use deadpool::Runtime;
use domain::base::Message;
use std::time::Duration;

const MAX_POOL_SIZE: usize = 8;
const WAIT_TIMEOUT: Duration = Duration::from_secs(5);

struct InitiatorManager<T: ConnInitiator>(T);

#[async_trait]
impl<T: ConnInitiator> Manager for InitiatorManager<T> {
    type Type = T::Connection;
    type Error = std::io::Error;

    async fn create(&self) -> Result<Self::Type, Self::Error> {
        self.0.create().await
    }

    async fn recycle(&self, conn: &mut Self::Type) -> managed::RecycleResult<Self::Error> {
        match conn.query(&DUMMY_QUERY).await {
            Ok(_) => Ok(()),
            Err(_) => Err(RecycleError::StaticMessage("connection failed reuse check")),
        }
    }
}

/// A throwaway query used only to probe whether a pooled connection is still usable before
/// handing it back out.
static DUMMY_QUERY: once_cell::sync::Lazy<Message<Bytes>> = once_cell::sync::Lazy::new(|| {
    use bytes::BytesMut;
    use domain::base::{Dname, MessageBuilder, Rtype};
    use std::str::FromStr;

    let name = Dname::<Bytes>::from_str("example.com").unwrap();
    let mut builder = MessageBuilder::from_target(BytesMut::with_capacity(64)).unwrap();
    builder.header_mut().set_id(0);
    let mut builder = builder.question();
    builder.push((&name, Rtype::A)).unwrap();
    builder.into_message()
});

/// Adapts any `ConnInitiator` into a pooled `QHandle`.
pub struct ConnPool<T: ConnInitiator> {
    pool: Pool<InitiatorManager<T>>,
}

impl<T: ConnInitiator> ConnPool<T> {
    pub fn new(initiator: T) -> Result<Self, UpstreamError> {
        let pool = Pool::builder(InitiatorManager(initiator))
            .max_size(MAX_POOL_SIZE)
            .wait_timeout(Some(WAIT_TIMEOUT))
            .runtime(Runtime::Tokio1)
            .build()
            .map_err(|e| UpstreamError::Pool(e.to_string()))?;
        Ok(Self { pool })
    }
}

#[async_trait]
impl<T: ConnInitiator> QHandle for ConnPool<T> {
    async fn query(&self, msg: &Message<Bytes>) -> Result<Message<Bytes>, UpstreamError> {
        let conn = self
            .pool
            .get()
            .await
            .map_err(|e| UpstreamError::Pool(e.to_string()))?;
        conn.query(msg).await
    }
}
