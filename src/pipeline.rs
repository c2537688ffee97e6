use crate::access::InMemoryTeamDirectory;
use crate::cache::TaskCache;
use crate::config::TaskerConfig;
use crate::coordinator::{CoordinatorParts, CoordinatorSettings, MutationCoordinator};
use crate::events::{
    EventFanout, EventSubscriber, HistorySubscriber, InMemoryHistoryStore,
    InMemoryNotificationDispatcher, InMemorySearchIndex, NotificationSubscriber,
    RecordingEmailSender, SearchIndexSubscriber,
};
use crate::locking::{DistributedLockManager, InMemoryKeyValueStore};
use crate::persistence::InMemoryTaskRepository;
use crate::workflows::{InMemoryWorkflowStore, WorkflowEngine};
use std::sync::Arc;
use tracing::info;

/// A fully wired single-process pipeline: in-memory stores behind every contract, the
/// three standard subscribers on the fan-out, and handles to inspect each of them.
///
/// Must be built inside a tokio runtime since the fan-out spawns its workers immediately.
pub struct InMemoryPipeline {
    pub coordinator: Arc<MutationCoordinator>,
    pub directory: Arc<InMemoryTeamDirectory>,
    pub workflow: Arc<WorkflowEngine>,
    pub repository: Arc<InMemoryTaskRepository>,
    pub locks: Arc<DistributedLockManager>,
    pub fanout: Arc<EventFanout>,
    pub history: Arc<InMemoryHistoryStore>,
    pub search: Arc<InMemorySearchIndex>,
    pub dispatcher: Arc<InMemoryNotificationDispatcher>,
    pub email: Arc<RecordingEmailSender>,
    pub cache: Arc<TaskCache>,
}

impl InMemoryPipeline {
    pub fn new(config: &TaskerConfig) -> Self {
        Self::with_subscribers(config, Vec::new())
    }

    /// Same as [`InMemoryPipeline::new`], with `extra` subscribers registered after the
    /// standard ones
    pub fn with_subscribers(config: &TaskerConfig, extra: Vec<Arc<dyn EventSubscriber>>) -> Self {
        let directory = Arc::new(InMemoryTeamDirectory::new());
        let repository = Arc::new(InMemoryTaskRepository::new());
        let locks = Arc::new(DistributedLockManager::new(
            Arc::new(InMemoryKeyValueStore::new()),
            config.locking.key_prefix.clone(),
        ));
        let history = Arc::new(InMemoryHistoryStore::new());
        let workflow = Arc::new(
            WorkflowEngine::new(
                Arc::new(InMemoryWorkflowStore::new()),
                directory.clone(),
                directory.clone(),
            )
            .with_audit_log(history.clone()),
        );

        let search = Arc::new(InMemorySearchIndex::new());
        let dispatcher = Arc::new(InMemoryNotificationDispatcher::new());
        let email = Arc::new(RecordingEmailSender::new());

        let mut subscribers: Vec<Arc<dyn EventSubscriber>> = vec![
            Arc::new(HistorySubscriber::new(history.clone())),
            Arc::new(NotificationSubscriber::new(
                dispatcher.clone(),
                Some(email.clone()),
                &config.notifications,
            )),
            Arc::new(SearchIndexSubscriber::new(search.clone())),
        ];
        subscribers.extend(extra);
        let fanout = Arc::new(EventFanout::new(subscribers));

        let cache = Arc::new(TaskCache::new(&config.cache));
        let coordinator = Arc::new(MutationCoordinator::new(
            CoordinatorParts {
                repository: repository.clone(),
                locks: locks.clone(),
                workflow: workflow.clone(),
                authorizer: directory.clone(),
                directory: directory.clone(),
                publisher: fanout.clone(),
                cache: cache.clone(),
            },
            CoordinatorSettings::from(config),
        ));
        info!("In-memory task pipeline assembled");

        Self {
            coordinator,
            directory,
            workflow,
            repository,
            locks,
            fanout,
            history,
            search,
            dispatcher,
            email,
            cache,
        }
    }
}
