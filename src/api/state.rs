use std::sync::Arc;

use crate::config::Config;
use crate::exec::JobRunner;
use crate::hostlist::HostListStore;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub hostlists: Arc<HostListStore>,
    pub runner: JobRunner,
}

impl AppState {
    pub fn new(config: Config, hostlists: HostListStore, runner: JobRunner) -> Self {
        Self {
            config: Arc::new(config),
            hostlists: Arc::new(hostlists),
            runner,
        }
    }
}
