//! Shared server state handed to every handler.

use std::sync::Arc;

use crate::auth::AuthManager;
use crate::config::Config;
use crate::lookup::IpLookup;
use crate::metrics::Collector;
use crate::stream::StreamDispatcher;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub auth: Arc<AuthManager>,
    pub collector: Collector,
    pub dispatcher: Arc<StreamDispatcher>,
    pub ip_lookup: IpLookup,
    /// Our own pid; signals aimed at it are refused.
    pub self_pid: u32,
}

impl AppState {
    pub fn new(
        config: Config,
        auth: AuthManager,
        collector: Collector,
    ) -> Result<Self, crate::error::SourceError> {
        let dispatcher =
            StreamDispatcher::new(Arc::new(collector.clone()), config.refresh.intervals());
        Ok(Self {
            config: Arc::new(config),
            auth: Arc::new(auth),
            collector,
            dispatcher: Arc::new(dispatcher),
            ip_lookup: IpLookup::new()?,
            self_pid: std::process::id(),
        })
    }
}
