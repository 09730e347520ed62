//! 多通道通知管理：按通道分类的工作池消费派发队列，投递结果经消息通道回到单一处理循环。
//!
//! 每条告警维护一个派发状态：当前升级层级、各接收人的通道进度、失败原因与升级计时器。
//! 确认与升级都以告警存储上的比较并交换为准，先提交者生效。

use crate::NotifyError;
use crate::channel::{ChannelError, ChannelMessage, NotificationChannel, channel_profile};
use crate::queue::{DispatchItem, EnqueueOutcome, PriorityDispatchQueue, QueueReservation};
use domain::{
    AlertRecord, AlertStatus, ChannelClass, ChannelFailure, ChannelKind, DeliveryStatus,
    NotificationTask, TenantContext,
};
use hms_escalation::{EscalationChain, EscalationResolver};
use hms_storage::{AlertStore, NotificationTaskStore};
use hms_telemetry::{MonitorProbe, MonitoringError, TelemetryMetrics, now_epoch_ms};
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// 存储暂时不可用时，升级/过期判定的重试间隔。
const ADVANCE_RETRY: Duration = Duration::from_secs(30);

/// 单类通道的工作池规模与重试参数。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClassPolicy {
    pub workers: usize,
    pub max_attempts: u32,
    pub backoff_base_ms: u64,
    pub backoff_cap_ms: u64,
}

impl ClassPolicy {
    /// 第 `retry` 次重试前的等待时间（指数退避，封顶）。
    pub fn backoff(&self, retry: u32) -> Duration {
        let shift = retry.saturating_sub(1).min(20);
        let delay = self
            .backoff_base_ms
            .saturating_mul(1u64 << shift)
            .min(self.backoff_cap_ms);
        Duration::from_millis(delay)
    }
}

#[derive(Debug, Clone)]
pub struct NotifyConfig {
    /// 解析升级链时使用的负责人角色
    pub escalation_role: String,
    pub realtime: ClassPolicy,
    pub async_class: ClassPolicy,
    pub third_party: ClassPolicy,
}

impl Default for NotifyConfig {
    fn default() -> Self {
        Self {
            escalation_role: "manager".to_string(),
            realtime: ClassPolicy {
                workers: 8,
                max_attempts: 3,
                backoff_base_ms: 200,
                backoff_cap_ms: 2_000,
            },
            async_class: ClassPolicy {
                workers: 4,
                max_attempts: 5,
                backoff_base_ms: 2_000,
                backoff_cap_ms: 60_000,
            },
            third_party: ClassPolicy {
                workers: 2,
                max_attempts: 5,
                backoff_base_ms: 5_000,
                backoff_cap_ms: 120_000,
            },
        }
    }
}

impl NotifyConfig {
    pub fn policy(&self, class: ChannelClass) -> &ClassPolicy {
        match class {
            ChannelClass::Realtime => &self.realtime,
            ChannelClass::Async => &self.async_class,
            ChannelClass::ThirdParty => &self.third_party,
        }
    }
}

/// 一次派发（初次或升级）的结果摘要。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatchReport {
    pub alert_id: String,
    pub level: u32,
    pub recipients: Vec<String>,
    pub enqueued: usize,
    pub dropped: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AdvanceCause {
    Deadline,
    AllChannelsFailed,
}

#[derive(Debug, Clone, Copy)]
struct RecipientProgress {
    channel_index: usize,
    settled: bool,
}

struct AlertDispatch {
    alert: AlertRecord,
    channels: Vec<ChannelKind>,
    chain: Arc<EscalationChain>,
    level: u32,
    recipients: HashMap<String, RecipientProgress>,
    /// 本告警全部未归档任务的最新快照
    tasks: HashMap<String, NotificationTask>,
    failures: Vec<ChannelFailure>,
    delivered: bool,
    deadline_ms: i64,
    timer: Option<JoinHandle<()>>,
}

struct DeliveryOutcome {
    item: DispatchItem,
    result: Result<(), ChannelError>,
}

pub struct NotificationChannelManager {
    config: NotifyConfig,
    queue: Arc<PriorityDispatchQueue>,
    channels: HashMap<ChannelKind, Arc<dyn NotificationChannel>>,
    alerts: Arc<dyn AlertStore>,
    tasks: Arc<dyn NotificationTaskStore>,
    resolver: Arc<EscalationResolver>,
    metrics: Arc<TelemetryMetrics>,
    dispatches: Mutex<HashMap<String, AlertDispatch>>,
    outcomes: std::sync::Mutex<Option<mpsc::UnboundedSender<DeliveryOutcome>>>,
    workers: AtomicUsize,
    busy: AtomicUsize,
}

impl NotificationChannelManager {
    pub fn new(
        config: NotifyConfig,
        queue: Arc<PriorityDispatchQueue>,
        alerts: Arc<dyn AlertStore>,
        tasks: Arc<dyn NotificationTaskStore>,
        resolver: Arc<EscalationResolver>,
        metrics: Arc<TelemetryMetrics>,
    ) -> Self {
        Self {
            config,
            queue,
            channels: HashMap::new(),
            alerts,
            tasks,
            resolver,
            metrics,
            dispatches: Mutex::new(HashMap::new()),
            outcomes: std::sync::Mutex::new(None),
            workers: AtomicUsize::new(0),
            busy: AtomicUsize::new(0),
        }
    }

    /// 注册通道实现；同类通道后注册者覆盖先注册者。
    pub fn with_channel(mut self, channel: Arc<dyn NotificationChannel>) -> Self {
        self.channels.insert(channel.kind(), channel);
        self
    }

    pub fn queue(&self) -> &Arc<PriorityDispatchQueue> {
        &self.queue
    }

    /// 启动各分类工作池与结果处理循环。
    pub fn start(self: &Arc<Self>) -> Vec<JoinHandle<()>> {
        let (tx, mut rx) = mpsc::unbounded_channel::<DeliveryOutcome>();
        if let Ok(mut outcomes) = self.outcomes.lock() {
            *outcomes = Some(tx.clone());
        }
        let mut handles = Vec::new();
        for class in ChannelClass::ALL {
            let workers = self.config.policy(class).workers.max(1);
            for _ in 0..workers {
                self.workers.fetch_add(1, Ordering::Relaxed);
                let manager = self.clone();
                let tx = tx.clone();
                handles.push(tokio::spawn(async move {
                    manager.run_worker(class, tx).await;
                }));
            }
            info!(
                target: "hms.notify",
                class = class.as_str(),
                workers = workers,
                "worker_pool_started"
            );
        }
        drop(tx);
        let manager = self.clone();
        handles.push(tokio::spawn(async move {
            while let Some(outcome) = rx.recv().await {
                manager.handle_outcome(outcome).await;
            }
        }));
        handles
    }

    /// 停止接收新任务，工作池在队列关闭后退出。
    pub fn shutdown(&self) {
        self.queue.close();
        if let Ok(mut outcomes) = self.outcomes.lock() {
            outcomes.take();
        }
    }

    async fn run_worker(self: Arc<Self>, class: ChannelClass, tx: mpsc::UnboundedSender<DeliveryOutcome>) {
        while let Some(item) = self.queue.pop_class(class).await {
            self.busy.fetch_add(1, Ordering::Relaxed);
            let result = match self.channels.get(&item.task.channel) {
                Some(channel) => channel.send(&item.message).await,
                None => Err(ChannelError::Permanent(format!(
                    "channel {} not configured",
                    item.task.channel.as_str()
                ))),
            };
            self.busy.fetch_sub(1, Ordering::Relaxed);
            self.metrics.record_delivery_attempt(result.is_ok());
            if tx.send(DeliveryOutcome { item, result }).is_err() {
                break;
            }
        }
    }

    fn report(&self, outcome: DeliveryOutcome) -> bool {
        match self.outcomes.lock() {
            Ok(outcomes) => outcomes
                .as_ref()
                .map(|tx| tx.send(outcome).is_ok())
                .unwrap_or(false),
            Err(_) => false,
        }
    }

    /// 为组织 `org_id` 下即将新建的 `alerts` 条告警预留首层通知所需的队列槽位。
    ///
    /// 槽位数按第 0 层接收人数计算，全部可用才成功；`Reject` 策略下不足时返回
    /// `QueueFull`，调用方据此向接入层回传背压。
    pub async fn reserve_dispatch(
        &self,
        tenant_id: &str,
        org_id: &str,
        alerts: usize,
    ) -> Result<QueueReservation, NotifyError> {
        let chain = self
            .resolver
            .resolve_chain(tenant_id, org_id, &self.config.escalation_role)
            .await?;
        let recipients = chain
            .level(0)
            .map(|level| level.recipients.len())
            .unwrap_or(0);
        let slots = recipients.saturating_mul(alerts);
        match self.queue.reserve(slots) {
            Ok(reservation) => Ok(reservation),
            Err(err) => {
                warn!(
                    target: "hms.notify",
                    tenant_id = %tenant_id,
                    org_id = %org_id,
                    slots = slots,
                    error = %err,
                    "queue_reservation_rejected"
                );
                Err(err)
            }
        }
    }

    /// 为新建告警派发通知：解析升级链，向第 0 层接收人按首选通道入队，并启动确认计时。
    pub async fn dispatch_alert(
        self: &Arc<Self>,
        alert: &AlertRecord,
        channels: &[ChannelKind],
    ) -> Result<DispatchReport, NotifyError> {
        self.dispatch_inner(alert, channels, None).await
    }

    /// 同 [`dispatch_alert`](Self::dispatch_alert)，首层任务优先使用预留槽位入队。
    pub async fn dispatch_alert_reserved(
        self: &Arc<Self>,
        alert: &AlertRecord,
        channels: &[ChannelKind],
        reservation: &mut QueueReservation,
    ) -> Result<DispatchReport, NotifyError> {
        self.dispatch_inner(alert, channels, Some(reservation)).await
    }

    async fn dispatch_inner(
        self: &Arc<Self>,
        alert: &AlertRecord,
        channels: &[ChannelKind],
        reservation: Option<&mut QueueReservation>,
    ) -> Result<DispatchReport, NotifyError> {
        let mut ordered: Vec<ChannelKind> = Vec::new();
        for channel in channels {
            if !ordered.contains(channel) {
                ordered.push(*channel);
            }
        }
        if ordered.is_empty() {
            ordered.push(ChannelKind::InApp);
        }

        let chain = self
            .resolver
            .resolve_chain(&alert.tenant_id, &alert.org_id, &self.config.escalation_role)
            .await?;
        let ctx = TenantContext::system(&alert.tenant_id);
        let mut alert = alert.clone();
        if self
            .alerts
            .transition_status(&ctx, &alert.alert_id, &[AlertStatus::New], AlertStatus::Pending)
            .await?
        {
            alert.status = AlertStatus::Pending;
        }

        let mut dispatches = self.dispatches.lock().await;
        let mut dispatch = AlertDispatch {
            level: alert.escalation_level,
            alert,
            channels: ordered,
            chain,
            recipients: HashMap::new(),
            tasks: HashMap::new(),
            failures: Vec::new(),
            delivered: false,
            deadline_ms: 0,
            timer: None,
        };
        let report = self.start_level(&mut dispatch, reservation).await;
        dispatches.insert(dispatch.alert.alert_id.clone(), dispatch);
        Ok(report)
    }

    /// 向当前层级的接收人入队首选通道任务，并重新计时。
    async fn start_level(
        self: &Arc<Self>,
        dispatch: &mut AlertDispatch,
        mut reservation: Option<&mut QueueReservation>,
    ) -> DispatchReport {
        let level = dispatch.level;
        let timeout = dispatch.alert.severity.urgency().escalation_timeout();
        dispatch.deadline_ms = now_epoch_ms() + timeout.as_millis() as i64;
        dispatch.recipients.clear();
        dispatch.delivered = false;

        let recipients: Vec<String> = dispatch
            .chain
            .level(level as usize)
            .map(|entry| entry.recipients.clone())
            .unwrap_or_default();
        let mut enqueued = 0;
        let mut dropped = 0;
        for recipient in &recipients {
            dispatch.recipients.insert(
                recipient.clone(),
                RecipientProgress {
                    channel_index: 0,
                    settled: false,
                },
            );
            if self
                .enqueue(dispatch, recipient, 0, reservation.as_deref_mut())
                .await
            {
                enqueued += 1;
            } else {
                dropped += 1;
            }
        }

        if recipients.is_empty() {
            let channel = dispatch.channels[0];
            dispatch.failures.push(ChannelFailure {
                channel,
                reason: format!("no recipients at escalation level {}", level),
            });
            self.persist_delivery(dispatch, DeliveryStatus::Failed).await;
            warn!(
                target: "hms.notify",
                tenant_id = %dispatch.alert.tenant_id,
                alert_id = %dispatch.alert.alert_id,
                org_id = %dispatch.alert.org_id,
                level = level,
                "no_recipients"
            );
        }

        self.arm_timer(dispatch, level, timeout);
        info!(
            target: "hms.notify",
            tenant_id = %dispatch.alert.tenant_id,
            alert_id = %dispatch.alert.alert_id,
            level = level,
            recipients = recipients.len(),
            enqueued = enqueued,
            deadline_ms = dispatch.deadline_ms,
            "alert_dispatched"
        );
        DispatchReport {
            alert_id: dispatch.alert.alert_id.clone(),
            level,
            recipients,
            enqueued,
            dropped,
        }
    }

    fn arm_timer(self: &Arc<Self>, dispatch: &mut AlertDispatch, level: u32, after: Duration) {
        if let Some(previous) = dispatch.timer.take() {
            previous.abort();
        }
        let manager = self.clone();
        let alert_id = dispatch.alert.alert_id.clone();
        dispatch.timer = Some(tokio::spawn(async move {
            tokio::time::sleep(after).await;
            manager
                .advance(&alert_id, level, AdvanceCause::Deadline)
                .await;
        }));
    }

    /// 为接收人创建指定通道的新任务并入队，返回是否成功进入队列。
    async fn enqueue(
        &self,
        dispatch: &mut AlertDispatch,
        recipient: &str,
        channel_index: usize,
        reservation: Option<&mut QueueReservation>,
    ) -> bool {
        let channel = dispatch.channels[channel_index];
        let alert = &dispatch.alert;
        let task = NotificationTask {
            task_id: uuid::Uuid::new_v4().to_string(),
            tenant_id: alert.tenant_id.clone(),
            alert_id: alert.alert_id.clone(),
            recipient_id: recipient.to_string(),
            channel,
            urgency: alert.severity.urgency(),
            priority_weight: channel_profile(channel).priority_weight,
            delivery_status: DeliveryStatus::Pending,
            retry_count: 0,
            escalation_level: dispatch.level,
            escalation_deadline_ms: dispatch.deadline_ms,
            enqueued_at_ms: now_epoch_ms(),
            last_error: None,
        };
        let message = ChannelMessage {
            task_id: task.task_id.clone(),
            tenant_id: alert.tenant_id.clone(),
            alert_id: alert.alert_id.clone(),
            recipient_id: recipient.to_string(),
            subject_id: alert.subject_id.clone(),
            org_id: alert.org_id.clone(),
            metric: alert.metric.clone(),
            value: alert.value,
            severity: alert.severity,
            escalation_level: dispatch.level,
            created_at_ms: alert.created_at_ms,
        };
        self.save_task(&task).await;
        dispatch.tasks.insert(task.task_id.clone(), task.clone());
        self.push_item(DispatchItem { task, message }, reservation)
    }

    /// 入队；溢出时被挤出或被丢弃的任务作为通道失败回到结果处理循环。
    fn push_item(&self, item: DispatchItem, reservation: Option<&mut QueueReservation>) -> bool {
        let alert_id = item.task.alert_id.clone();
        let pushed = match reservation {
            Some(reservation) => self.queue.push_reserved(item.clone(), reservation),
            None => self.queue.push(item.clone()),
        };
        match pushed {
            Ok(EnqueueOutcome::Enqueued) => {
                self.metrics.record_enqueued();
                true
            }
            Ok(EnqueueOutcome::Displaced(evicted)) => {
                self.metrics.record_enqueued();
                self.metrics.record_queue_dropped();
                warn!(
                    target: "hms.notify",
                    alert_id = %evicted.task.alert_id,
                    task_id = %evicted.task.task_id,
                    urgency = evicted.task.urgency.as_str(),
                    "queue_overflow_evicted"
                );
                self.report(DeliveryOutcome {
                    item: *evicted,
                    result: Err(ChannelError::Permanent("evicted: dispatch queue full".to_string())),
                });
                true
            }
            Ok(EnqueueOutcome::Dropped(dropped)) => {
                self.metrics.record_queue_dropped();
                warn!(
                    target: "hms.notify",
                    alert_id = %alert_id,
                    task_id = %dropped.task.task_id,
                    "queue_overflow_dropped"
                );
                self.report(DeliveryOutcome {
                    item: *dropped,
                    result: Err(ChannelError::Permanent("dropped: dispatch queue full".to_string())),
                });
                false
            }
            Err(err) => {
                self.metrics.record_backpressure();
                warn!(
                    target: "hms.notify",
                    alert_id = %alert_id,
                    error = %err,
                    "queue_push_rejected"
                );
                self.report(DeliveryOutcome {
                    item,
                    result: Err(ChannelError::Permanent(err.to_string())),
                });
                false
            }
        }
    }

    async fn save_task(&self, task: &NotificationTask) {
        let ctx = TenantContext::system(&task.tenant_id);
        if let Err(err) = self.tasks.save_task(&ctx, task).await {
            warn!(
                target: "hms.notify",
                tenant_id = %task.tenant_id,
                task_id = %task.task_id,
                error = %err,
                "task_save_failed"
            );
        }
    }

    async fn persist_delivery(&self, dispatch: &AlertDispatch, status: DeliveryStatus) {
        let ctx = TenantContext::system(&dispatch.alert.tenant_id);
        if let Err(err) = self
            .alerts
            .update_delivery(&ctx, &dispatch.alert.alert_id, status, &dispatch.failures)
            .await
        {
            warn!(
                target: "hms.notify",
                tenant_id = %dispatch.alert.tenant_id,
                alert_id = %dispatch.alert.alert_id,
                error = %err,
                "delivery_status_update_failed"
            );
        }
    }

    async fn handle_outcome(self: &Arc<Self>, outcome: DeliveryOutcome) {
        let DeliveryOutcome { item, result } = outcome;
        let DispatchItem { mut task, message } = item;
        let channel = task.channel;
        if result.is_ok() {
            self.metrics.record_delivered(channel);
        }

        let mut escalate_from: Option<u32> = None;
        {
            let mut dispatches = self.dispatches.lock().await;
            let Some(dispatch) = dispatches.get_mut(&task.alert_id) else {
                debug!(
                    target: "hms.notify",
                    alert_id = %task.alert_id,
                    task_id = %task.task_id,
                    "outcome_after_close"
                );
                return;
            };
            if task.escalation_level != dispatch.level {
                // 上一层级的迟到结果只更新任务本身
                task.delivery_status = match &result {
                    Ok(()) => DeliveryStatus::Delivered,
                    Err(_) => DeliveryStatus::Failed,
                };
                task.last_error = result.as_ref().err().map(|err| err.reason().to_string());
                self.save_task(&task).await;
                dispatch.tasks.insert(task.task_id.clone(), task);
                return;
            }

            match result {
                Ok(()) => {
                    task.delivery_status = DeliveryStatus::Delivered;
                    self.save_task(&task).await;
                    if let Some(progress) = dispatch.recipients.get_mut(&task.recipient_id) {
                        progress.settled = true;
                    }
                    let first = !dispatch.delivered;
                    dispatch.delivered = true;
                    if first {
                        self.persist_delivery(dispatch, DeliveryStatus::Delivered).await;
                    }
                    info!(
                        target: "hms.notify",
                        tenant_id = %task.tenant_id,
                        alert_id = %task.alert_id,
                        recipient_id = %task.recipient_id,
                        channel = channel.as_str(),
                        retries = task.retry_count,
                        "notification_delivered"
                    );
                    dispatch.tasks.insert(task.task_id.clone(), task);
                }
                Err(err) => {
                    task.last_error = Some(err.reason().to_string());
                    let policy = *self.config.policy(channel.class());
                    if matches!(err, ChannelError::Transient(_))
                        && task.retry_count + 1 < policy.max_attempts
                    {
                        task.delivery_status = DeliveryStatus::Failed;
                        self.save_task(&task).await;
                        task.retry_count += 1;
                        task.delivery_status = DeliveryStatus::Pending;
                        let delay = policy.backoff(task.retry_count);
                        debug!(
                            target: "hms.notify",
                            alert_id = %task.alert_id,
                            task_id = %task.task_id,
                            channel = channel.as_str(),
                            retry = task.retry_count,
                            delay_ms = delay.as_millis() as u64,
                            "notification_retry_scheduled"
                        );
                        dispatch.tasks.insert(task.task_id.clone(), task.clone());
                        self.schedule_retry(DispatchItem { task, message }, delay);
                        return;
                    }

                    task.delivery_status = DeliveryStatus::Failed;
                    self.save_task(&task).await;
                    self.metrics.record_failed(channel);
                    dispatch.failures.push(ChannelFailure {
                        channel,
                        reason: err.reason().to_string(),
                    });
                    warn!(
                        target: "hms.notify",
                        tenant_id = %task.tenant_id,
                        alert_id = %task.alert_id,
                        recipient_id = %task.recipient_id,
                        channel = channel.as_str(),
                        error = %err,
                        "notification_channel_failed"
                    );
                    let recipient = task.recipient_id.clone();
                    dispatch.tasks.insert(task.task_id.clone(), task);

                    let next_channel = match dispatch.recipients.get_mut(&recipient) {
                        Some(progress) if progress.channel_index + 1 < dispatch.channels.len() => {
                            progress.channel_index += 1;
                            Some(progress.channel_index)
                        }
                        Some(progress) => {
                            progress.settled = true;
                            None
                        }
                        None => None,
                    };
                    if let Some(index) = next_channel {
                        self.metrics.record_fallback();
                        info!(
                            target: "hms.notify",
                            alert_id = %dispatch.alert.alert_id,
                            recipient_id = %recipient,
                            channel = dispatch.channels[index].as_str(),
                            "notification_fallback"
                        );
                        self.enqueue(dispatch, &recipient, index, None).await;
                    }

                    let all_settled = dispatch.recipients.values().all(|progress| progress.settled);
                    if !dispatch.delivered && all_settled {
                        self.persist_delivery(dispatch, DeliveryStatus::Failed).await;
                        warn!(
                            target: "hms.notify",
                            tenant_id = %dispatch.alert.tenant_id,
                            alert_id = %dispatch.alert.alert_id,
                            level = dispatch.level,
                            failures = dispatch.failures.len(),
                            "alert_delivery_failed"
                        );
                        escalate_from = Some(dispatch.level);
                    }
                }
            }
        }

        if let Some(level) = escalate_from {
            self.advance(&message.alert_id, level, AdvanceCause::AllChannelsFailed)
                .await;
        }
    }

    fn schedule_retry(self: &Arc<Self>, item: DispatchItem, delay: Duration) {
        let manager = self.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            manager.requeue(item).await;
        });
    }

    async fn requeue(&self, mut item: DispatchItem) {
        let dispatches = self.dispatches.lock().await;
        let current = dispatches
            .get(&item.task.alert_id)
            .map(|dispatch| dispatch.level == item.task.escalation_level)
            .unwrap_or(false);
        drop(dispatches);
        if !current {
            // 告警已关闭或已升级，重试作废
            if item
                .task
                .delivery_status
                .can_transition_to(DeliveryStatus::Cancelled)
            {
                item.task.delivery_status = DeliveryStatus::Cancelled;
                self.save_task(&item.task).await;
            }
            return;
        }
        self.save_task(&item.task).await;
        self.push_item(item, None);
    }

    /// 层级截止或整层投递失败时推进升级；升级链耗尽且截止时间已到则过期。
    async fn advance(self: &Arc<Self>, alert_id: &str, expected_level: u32, cause: AdvanceCause) {
        let mut dispatches = self.dispatches.lock().await;
        let Some(dispatch) = dispatches.get_mut(alert_id) else {
            return;
        };
        if dispatch.level != expected_level {
            return;
        }
        let next = expected_level + 1;
        let has_next = dispatch.chain.level(next as usize).is_some();
        if !has_next && cause == AdvanceCause::AllChannelsFailed {
            // 没有更高层级，等待截止时间到达后过期
            return;
        }
        match dispatch.timer.take() {
            Some(timer) if cause != AdvanceCause::Deadline => timer.abort(),
            _ => {}
        }

        let ctx = TenantContext::system(&dispatch.alert.tenant_id);
        let committed = if has_next {
            self.alerts.escalate(&ctx, alert_id, expected_level).await
        } else {
            self.alerts
                .transition_status(
                    &ctx,
                    alert_id,
                    &[AlertStatus::New, AlertStatus::Pending],
                    AlertStatus::Expired,
                )
                .await
        };

        match committed {
            Ok(true) if has_next => {
                dispatch.level = next;
                dispatch.alert.escalation_level = next;
                dispatch.alert.status = AlertStatus::Pending;
                self.metrics.record_escalation();
                info!(
                    target: "hms.notify",
                    tenant_id = %dispatch.alert.tenant_id,
                    alert_id = %alert_id,
                    level = next,
                    cause = ?cause,
                    "alert_escalated"
                );
                self.start_level(dispatch, None).await;
            }
            Ok(true) => {
                self.metrics.record_expiration();
                info!(
                    target: "hms.notify",
                    tenant_id = %dispatch.alert.tenant_id,
                    alert_id = %alert_id,
                    level = expected_level,
                    "alert_expired"
                );
                if let Some(dispatch) = dispatches.remove(alert_id) {
                    self.persist_delivery(&dispatch, DeliveryStatus::Expired).await;
                    self.close_dispatch(dispatch, DeliveryStatus::Expired).await;
                }
            }
            Ok(false) => {
                // 确认或解决已先提交
                let status = match self.alerts.find_alert(&ctx, alert_id).await {
                    Ok(Some(alert)) if alert.status == AlertStatus::Acked => {
                        DeliveryStatus::Acknowledged
                    }
                    _ => DeliveryStatus::Cancelled,
                };
                debug!(
                    target: "hms.notify",
                    alert_id = %alert_id,
                    level = expected_level,
                    "escalation_superseded"
                );
                if let Some(dispatch) = dispatches.remove(alert_id) {
                    self.close_dispatch(dispatch, status).await;
                }
            }
            Err(err) => {
                warn!(
                    target: "hms.notify",
                    alert_id = %alert_id,
                    level = expected_level,
                    error = %err,
                    "escalation_commit_failed"
                );
                self.arm_timer(dispatch, expected_level, ADVANCE_RETRY);
            }
        }
    }

    /// 关闭派发状态：撤回排队任务，未决任务迁移到 `status`。
    async fn close_dispatch(&self, mut dispatch: AlertDispatch, status: DeliveryStatus) {
        if let Some(timer) = dispatch.timer.take() {
            timer.abort();
        }
        let withdrawn = self.queue.remove_alert(&dispatch.alert.alert_id);
        for item in &withdrawn {
            dispatch
                .tasks
                .entry(item.task.task_id.clone())
                .or_insert_with(|| item.task.clone());
        }
        for task in dispatch.tasks.values_mut() {
            let target = match (task.delivery_status, status) {
                (DeliveryStatus::Pending, DeliveryStatus::Acknowledged) => DeliveryStatus::Cancelled,
                (_, target) => target,
            };
            if task.delivery_status.can_transition_to(target) {
                task.delivery_status = target;
                self.save_task(task).await;
            }
        }
        debug!(
            target: "hms.notify",
            alert_id = %dispatch.alert.alert_id,
            withdrawn = withdrawn.len(),
            status = status.as_str(),
            "dispatch_closed"
        );
    }

    /// 确认告警：仅在告警仍开放时成功；成功后取消升级计时与未发送任务。
    pub async fn acknowledge(
        &self,
        ctx: &TenantContext,
        alert_id: &str,
        user_id: &str,
    ) -> Result<bool, NotifyError> {
        let acked = self
            .alerts
            .acknowledge(ctx, alert_id, user_id, now_epoch_ms())
            .await?;
        if !acked {
            debug!(
                target: "hms.notify",
                tenant_id = %ctx.tenant_id,
                alert_id = %alert_id,
                "acknowledge_rejected"
            );
            return Ok(false);
        }
        self.metrics.record_acknowledgement();
        let dispatch = self.dispatches.lock().await.remove(alert_id);
        let failures = dispatch
            .as_ref()
            .map(|dispatch| dispatch.failures.clone())
            .unwrap_or_default();
        if let Some(dispatch) = dispatch {
            self.close_dispatch(dispatch, DeliveryStatus::Acknowledged).await;
        }
        self.alerts
            .update_delivery(ctx, alert_id, DeliveryStatus::Acknowledged, &failures)
            .await?;
        info!(
            target: "hms.notify",
            tenant_id = %ctx.tenant_id,
            alert_id = %alert_id,
            user_id = %user_id,
            "alert_acknowledged"
        );
        Ok(true)
    }

    /// 解决告警（开放或已确认状态均可）。
    pub async fn resolve(&self, ctx: &TenantContext, alert_id: &str) -> Result<bool, NotifyError> {
        let resolved = self
            .alerts
            .transition_status(
                ctx,
                alert_id,
                &[AlertStatus::New, AlertStatus::Pending, AlertStatus::Acked],
                AlertStatus::Resolved,
            )
            .await?;
        if !resolved {
            return Ok(false);
        }
        let dispatch = self.dispatches.lock().await.remove(alert_id);
        if let Some(dispatch) = dispatch {
            let failures = dispatch.failures.clone();
            self.close_dispatch(dispatch, DeliveryStatus::Cancelled).await;
            self.alerts
                .update_delivery(ctx, alert_id, DeliveryStatus::Cancelled, &failures)
                .await?;
        }
        info!(
            target: "hms.notify",
            tenant_id = %ctx.tenant_id,
            alert_id = %alert_id,
            "alert_resolved"
        );
        Ok(true)
    }

    /// 仍在派发中的告警数。
    pub async fn active_alerts(&self) -> usize {
        self.dispatches.lock().await.len()
    }

    /// 告警当前的升级层级（未在派发中返回 `None`）。
    pub async fn current_level(&self, alert_id: &str) -> Option<u32> {
        self.dispatches
            .lock()
            .await
            .get(alert_id)
            .map(|dispatch| dispatch.level)
    }
}

impl MonitorProbe for NotificationChannelManager {
    fn queue_depth(&self) -> Result<usize, MonitoringError> {
        Ok(self.queue.len())
    }

    fn worker_utilization(&self) -> Result<f64, MonitoringError> {
        let workers = self.workers.load(Ordering::Relaxed);
        if workers == 0 {
            return Ok(0.0);
        }
        Ok(self.busy.load(Ordering::Relaxed) as f64 / workers as f64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_doubles_until_cap() {
        let policy = ClassPolicy {
            workers: 1,
            max_attempts: 5,
            backoff_base_ms: 100,
            backoff_cap_ms: 500,
        };
        assert_eq!(policy.backoff(1), Duration::from_millis(100));
        assert_eq!(policy.backoff(2), Duration::from_millis(200));
        assert_eq!(policy.backoff(3), Duration::from_millis(400));
        assert_eq!(policy.backoff(4), Duration::from_millis(500));
        assert_eq!(policy.backoff(60), Duration::from_millis(500));
    }

    #[test]
    fn default_policies_by_class() {
        let config = NotifyConfig::default();
        assert!(config.policy(ChannelClass::Realtime).max_attempts <= config.policy(ChannelClass::ThirdParty).max_attempts);
        assert!(config.policy(ChannelClass::Realtime).backoff_cap_ms < config.policy(ChannelClass::Async).backoff_cap_ms);
    }
}
