//! 应用装配：由配置与存储集合构建各能力组件，并在 handler 间共享。

use hms_config::{AppConfig, ChannelClassConfig, OverflowPolicyKind};
use hms_escalation::{EscalationResolver, OrgEventHandler};
use hms_hierarchy::OrgHierarchyIndex;
use hms_normalize::NormalizeConfig;
use hms_notify::{
    ClassPolicy, NotificationChannel, NotificationChannelManager, NotifyConfig, OverflowPolicy,
    PriorityDispatchQueue, QueueConfig,
};
use hms_pipeline::{AlertPipeline, ManagerDispatcher, PipelineConfig, PipelineStores};
use hms_rules::{RuleCache, RuleEngineConfig};
use hms_storage::{
    AlertRuleStore, AlertStore, ClosureStore, ManagerStore, NotificationTaskStore, OrgNodeStore,
    SubjectStore, ThrottleStore,
};
use hms_telemetry::{MonitorThresholds, MonitoringFeedback, TelemetryMetrics};
use std::sync::Arc;
use std::time::Duration;

/// 装配所需的全部存储（Postgres/Redis 或内存实现）。
#[derive(Clone)]
pub struct Stores {
    pub org_nodes: Arc<dyn OrgNodeStore>,
    pub closure: Arc<dyn ClosureStore>,
    pub managers: Arc<dyn ManagerStore>,
    pub subjects: Arc<dyn SubjectStore>,
    pub rules: Arc<dyn AlertRuleStore>,
    pub alerts: Arc<dyn AlertStore>,
    pub tasks: Arc<dyn NotificationTaskStore>,
    pub throttle: Arc<dyn ThrottleStore>,
}

#[derive(Clone)]
pub struct AppState {
    pub pipeline: AlertPipeline,
    pub notify: Arc<NotificationChannelManager>,
    pub index: Arc<OrgHierarchyIndex>,
    pub resolver: Arc<EscalationResolver>,
    pub org_events: Arc<OrgEventHandler>,
    pub alerts: Arc<dyn AlertStore>,
    pub tasks: Arc<dyn NotificationTaskStore>,
    pub metrics: Arc<TelemetryMetrics>,
    pub monitor: Arc<MonitoringFeedback>,
}

impl AppState {
    /// 构建组件图；通知工作池由调用方通过 `notify.start()` 启动。
    pub fn assemble(
        config: &AppConfig,
        stores: Stores,
        channels: Vec<Arc<dyn NotificationChannel>>,
    ) -> Self {
        let metrics = Arc::new(TelemetryMetrics::new());
        let index = Arc::new(OrgHierarchyIndex::new(stores.closure, stores.org_nodes));
        let resolver = Arc::new(EscalationResolver::new(index.clone(), stores.managers));
        let org_events = Arc::new(OrgEventHandler::new(index.clone(), resolver.clone()));

        let queue = Arc::new(PriorityDispatchQueue::new(queue_config(config)));
        let mut manager = NotificationChannelManager::new(
            notify_config(config),
            queue,
            stores.alerts.clone(),
            stores.tasks.clone(),
            resolver.clone(),
            metrics.clone(),
        );
        for channel in channels {
            manager = manager.with_channel(channel);
        }
        let notify = Arc::new(manager);

        let pipeline = AlertPipeline::new(
            pipeline_config(config),
            Arc::new(RuleCache::new(stores.rules)),
            PipelineStores {
                subjects: stores.subjects,
                alerts: stores.alerts.clone(),
                throttle: stores.throttle,
            },
            Arc::new(ManagerDispatcher::new(notify.clone())),
            metrics.clone(),
        );
        let monitor = Arc::new(MonitoringFeedback::new(
            metrics.clone(),
            notify.clone(),
            MonitorThresholds {
                queue_depth: config.monitor_queue_depth_threshold,
                latency_ms: config.monitor_latency_ms_threshold,
                error_rate: config.monitor_error_rate_threshold,
                utilization: config.monitor_utilization_threshold,
            },
        ));

        Self {
            pipeline,
            notify,
            index,
            resolver,
            org_events,
            alerts: stores.alerts,
            tasks: stores.tasks,
            metrics,
            monitor,
        }
    }

    pub fn monitor_interval(config: &AppConfig) -> Duration {
        Duration::from_secs(config.monitor_interval_seconds.max(1))
    }
}

fn class_policy(config: &ChannelClassConfig) -> ClassPolicy {
    ClassPolicy {
        workers: config.workers,
        max_attempts: config.max_attempts,
        backoff_base_ms: config.backoff_base_ms,
        backoff_cap_ms: config.backoff_cap_ms,
    }
}

fn notify_config(config: &AppConfig) -> NotifyConfig {
    NotifyConfig {
        escalation_role: config.escalation_role.clone(),
        realtime: class_policy(&config.realtime),
        async_class: class_policy(&config.async_class),
        third_party: class_policy(&config.third_party),
    }
}

fn queue_config(config: &AppConfig) -> QueueConfig {
    QueueConfig {
        capacity: config.queue_capacity,
        overflow: match config.overflow_policy {
            OverflowPolicyKind::DropLowest => OverflowPolicy::DropLowest,
            OverflowPolicyKind::Reject => OverflowPolicy::Reject,
        },
    }
}

fn pipeline_config(config: &AppConfig) -> PipelineConfig {
    PipelineConfig {
        throttle_window: Duration::from_secs(config.throttle_window_seconds),
        normalize: NormalizeConfig {
            max_future_skew_ms: config.event_max_future_skew_ms,
        },
        engine: RuleEngineConfig::default(),
    }
}
