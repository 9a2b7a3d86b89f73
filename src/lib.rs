//! EPG merge engine and scheduling core (§1-§9). This crate has no GUI or
//! desktop shell — it is the process that runs the Scheduler loop and the
//! Facade's HTTP surface side by side.

pub mod archive;
pub mod config;
pub mod facade;
pub mod feed_cache;
pub mod merge;
pub mod notifier;
pub mod scheduler;
pub mod server;
pub mod store;

use std::sync::Arc;

use archive::ArchiveManager;
use config::Config;
use facade::ContractFacade;
use feed_cache::FeedCache;
use merge::MergeEngine;
use scheduler::Scheduler;
use store::Store;

/// Everything the process needs to run, wired up once at startup (§9
/// "Global mutable state": an explicit context object replacing hidden
/// module-level singletons).
pub struct AppContext {
    pub config: Config,
    pub store: Arc<Store>,
    pub feed_cache: Arc<FeedCache>,
    pub merge_engine: Arc<MergeEngine>,
    pub archive_manager: Arc<ArchiveManager>,
    pub scheduler: Arc<Scheduler>,
    pub facade: Arc<ContractFacade>,
}

impl AppContext {
    /// Open the Store, run migrations, and assemble the component graph
    /// (§4 "Data flow for a merge"). The single-flight merge lock (§5 I1)
    /// is constructed here and shared between the Scheduler and the Facade.
    pub fn bootstrap(config: Config) -> anyhow::Result<Self> {
        config.paths.ensure_exist()?;
        std::fs::create_dir_all(&config.config_dir)?;

        let pool = store::build_pool(&config.db_path)?;
        let store = Arc::new(Store::new(pool, config.paths.clone()));

        let feed_cache = Arc::new(FeedCache::new(config.paths.cache_dir.clone()));
        let merge_engine = Arc::new(MergeEngine::new(feed_cache.clone(), config.paths.tmp_dir.clone()));
        let archive_manager = Arc::new(ArchiveManager::new(store.clone(), &config.paths));

        let merge_lock = Arc::new(tokio::sync::Mutex::new(()));
        let scheduler = Arc::new(Scheduler::new(
            store.clone(),
            merge_engine.clone(),
            archive_manager.clone(),
            config.paths.clone(),
            config.tz,
            merge_lock,
        ));

        let facade = Arc::new(ContractFacade::new(
            store.clone(),
            feed_cache.clone(),
            merge_engine.clone(),
            archive_manager.clone(),
            scheduler.clone(),
            config.paths.clone(),
        ));

        Ok(Self { config, store, feed_cache, merge_engine, archive_manager, scheduler, facade })
    }
}
