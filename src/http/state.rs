use std::sync::Arc;

use crate::architecture::ArchitectureTracker;
use crate::broadcaster::Broadcaster;
use crate::config::Config;
use crate::correlator::Correlator;
use crate::ingest::Ingest;
use crate::query::Query;
use crate::store::Store;
use crate::supervisor::Supervisor;

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<Store>,
    pub broadcaster: Arc<Broadcaster>,
    pub supervisor: Arc<Supervisor>,
    pub ingest: Arc<Ingest>,
    pub query: Arc<Query>,
    pub architecture: Arc<ArchitectureTracker>,
    pub correlator: Arc<Correlator>,
    pub config: Arc<Config>,
}
