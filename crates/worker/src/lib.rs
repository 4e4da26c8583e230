//! The geo-targeted notification engine.
//!
//! A notification has an origin, a radius and optional target criteria.
//! Each process pass finds the users it reaches ([`eligibility`]), filters
//! them through their preferences ([`gate`]) and fans out over the allowed
//! channels ([`dispatcher`]). Everything is coordinated through a
//! [`NotificationStore`]; the engine itself holds no shared state.

pub mod config;
pub mod dispatcher;
pub mod eligibility;
pub mod gate;
pub mod interaction;
pub mod jobs;
pub mod producer;
pub mod stats;
pub mod store;

use std::sync::Arc;

use geonotify_core::clock::Clock;
use geonotify_events::ChannelSenders;
use tokio_util::sync::CancellationToken;

pub use config::WorkerConfig;
pub use dispatcher::{DeliveryDispatcher, DispatchOutcome, DispatchSettings};
pub use store::{MemoryStore, NotificationStore, PgStore, StoreError};

use interaction::InteractionRecorder;
use jobs::{CleanupPass, JobRunner, ProcessPass, QueueConsumer, Retention};
use producer::NotificationProducer;
use stats::StatisticsAggregator;

/// Every engine component wired to one store, sender set and clock.
///
/// Cancelling [`Engine::shutdown_token`] stops passes from starting new
/// notifications or recipients; sends already in flight are finished.
pub struct Engine {
    pub store: Arc<dyn NotificationStore>,
    pub clock: Arc<dyn Clock>,
    pub dispatcher: Arc<DeliveryDispatcher>,
    pub producer: NotificationProducer,
    pub interactions: InteractionRecorder,
    pub stats: StatisticsAggregator,
    pub runner: Arc<JobRunner>,
    config: WorkerConfig,
    shutdown: CancellationToken,
}

impl Engine {
    pub fn new(
        config: WorkerConfig,
        store: Arc<dyn NotificationStore>,
        senders: ChannelSenders,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let shutdown = CancellationToken::new();
        let dispatcher = Arc::new(
            DeliveryDispatcher::new(
                Arc::clone(&store),
                senders,
                Arc::clone(&clock),
                DispatchSettings::from_config(&config),
            )
            .with_cancellation(shutdown.clone()),
        );
        let process = ProcessPass::new(
            Arc::clone(&store),
            Arc::clone(&dispatcher),
            Arc::clone(&clock),
            config.due_batch_size,
            config.dispatch_concurrency,
        )
        .with_cancellation(shutdown.clone());
        let cleanup = CleanupPass::new(
            Arc::clone(&store),
            Arc::clone(&clock),
            Retention::from_config(&config),
        );
        let runner = Arc::new(
            JobRunner::new(process, cleanup).with_backoff(config.job_backoff.clone()),
        );

        Self {
            producer: NotificationProducer::new(
                Arc::clone(&store),
                Arc::clone(&dispatcher),
                Arc::clone(&clock),
            ),
            interactions: InteractionRecorder::new(Arc::clone(&store), Arc::clone(&clock)),
            stats: StatisticsAggregator::new(Arc::clone(&store)),
            dispatcher,
            runner,
            store,
            clock,
            config,
            shutdown,
        }
    }

    pub fn config(&self) -> &WorkerConfig {
        &self.config
    }

    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    pub fn queue_consumer(&self) -> QueueConsumer {
        QueueConsumer::new(
            Arc::clone(&self.store),
            Arc::clone(&self.runner),
            Arc::clone(&self.clock),
            self.config.queue_poll_interval,
            self.config.job_claim_timeout,
            self.shutdown.clone(),
        )
    }
}
