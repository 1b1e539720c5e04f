use crate::channel::{NResult, NotnetsChannel, UnaryChannel};
use crate::config::Config;
use crate::connection::dialer::Dialer;
use crate::connection::ShmAddr;
use crate::context::CallContext;
use crate::errors::ConnectionError;
use crate::messages::Message;
use crate::options::CallOptions;
use async_trait::async_trait;
use bb8::{ErrorSink, Pool, State};
use log::{debug, error};
use std::fmt::Debug;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Several channels to one server, for calls running in parallel.
///
/// Every pooled channel owns its own queue pair, opened from a distinct local
/// address `<local>-<n>`.
#[derive(Debug)]
pub struct ChannelPool {
    remote: ShmAddr,
    pool: Pool<ChannelManager>,
}

impl ChannelPool {
    pub async fn new<L: Into<ShmAddr>, R: Into<ShmAddr>>(
        dialer: Dialer,
        config: &Config,
        local: L,
        remote: R,
    ) -> NResult<ChannelPool> {
        let remote = remote.into();
        debug!("Creating channel pool for '{}'", remote);
        let pool = Pool::builder()
            .max_lifetime(*config.lifetime())
            .max_size(*config.max_connections())
            .test_on_check_out(*config.test_connection())
            .error_sink(Box::new(ChannelPoolLogger))
            .build(ChannelManager {
                dialer,
                local: local.into(),
                remote: remote.clone(),
                next_id: AtomicUsize::new(0),
            })
            .await?;
        Ok(ChannelPool { remote, pool })
    }

    pub fn remote_addr(&self) -> &ShmAddr {
        &self.remote
    }

    pub fn state(&self) -> State {
        self.pool.state()
    }
}

#[async_trait]
impl UnaryChannel for ChannelPool {
    async fn invoke<REQ: Message, RES: Message>(
        &self,
        context: &CallContext,
        method: &str,
        request: &REQ,
        options: &mut CallOptions,
    ) -> NResult<RES> {
        context.check()?;
        let channel = self.pool.get().await?;
        channel.invoke(context, method, request, options).await
    }
}

#[derive(Debug)]
struct ChannelManager {
    dialer: Dialer,
    local: ShmAddr,
    remote: ShmAddr,
    next_id: AtomicUsize,
}

#[async_trait]
impl bb8::ManageConnection for ChannelManager {
    type Connection = NotnetsChannel;
    type Error = ConnectionError;

    async fn connect(&self) -> Result<Self::Connection, Self::Error> {
        let local = format!("{}-{}", self.local, self.next_id.fetch_add(1, Ordering::Relaxed));
        debug!("Connecting {} to {}", local, self.remote);
        self.dialer.dial(local, self.remote.clone()).await
    }

    async fn is_valid(&self, channel: &mut Self::Connection) -> Result<(), Self::Error> {
        if channel.is_broken() {
            return Err(ConnectionError::Error(format!(
                "Channel to {} is broken",
                self.remote
            )));
        }
        Ok(())
    }

    fn has_broken(&self, channel: &mut Self::Connection) -> bool {
        channel.is_broken()
    }
}

#[derive(Debug, Clone, Copy, Default)]
struct ChannelPoolLogger;

impl<E> ErrorSink<E> for ChannelPoolLogger
where
    E: Debug,
{
    fn sink(&self, error: E) {
        error!("Channel pool error {:?}", error)
    }

    fn boxed_clone(&self) -> Box<dyn ErrorSink<E>> {
        Box::new(*self)
    }
}
