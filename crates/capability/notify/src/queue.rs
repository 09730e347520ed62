//! 有界优先级派发队列。
//!
//! 排序：紧急程度降序，其次入队时间升序；同一时刻入队的按序号先后。
//! 各通道分类各自出队，容量在全部分类间共享。

use crate::NotifyError;
use crate::channel::ChannelMessage;
use domain::{ChannelClass, NotificationTask, Urgency};
use std::cmp::Reverse;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::Notify;

/// 队列满时的处理策略。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OverflowPolicy {
    /// 丢弃优先级最低的一项（可能是新来的这一项）
    DropLowest,
    /// 拒绝入队并向上游回传背压
    Reject,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueConfig {
    pub capacity: usize,
    pub overflow: OverflowPolicy,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            capacity: 10_000,
            overflow: OverflowPolicy::DropLowest,
        }
    }
}

/// 队列中的一项：任务快照与待发送内容。
#[derive(Debug, Clone, PartialEq)]
pub struct DispatchItem {
    pub task: NotificationTask,
    pub message: ChannelMessage,
}

#[derive(Debug, Clone, PartialEq)]
pub enum EnqueueOutcome {
    Enqueued,
    /// 已入队，但挤出了一项更低优先级的任务
    Displaced(Box<DispatchItem>),
    /// 新任务本身优先级最低，被丢弃
    Dropped(Box<DispatchItem>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
struct QueueKey {
    urgency: Reverse<Urgency>,
    enqueued_at_ms: i64,
    seq: u64,
}

#[derive(Default)]
struct QueueState {
    classes: [BTreeMap<QueueKey, DispatchItem>; 3],
    seq: u64,
    /// 已预留但尚未入队的槽位数
    reserved: usize,
}

impl QueueState {
    fn len(&self) -> usize {
        self.classes.iter().map(BTreeMap::len).sum()
    }

    fn key(&mut self, task: &NotificationTask) -> QueueKey {
        self.seq += 1;
        QueueKey {
            urgency: Reverse(task.urgency),
            enqueued_at_ms: task.enqueued_at_ms,
            seq: self.seq,
        }
    }

    /// 全队列优先级最低的一项所在分类及其键。
    fn lowest(&self) -> Option<(usize, QueueKey)> {
        self.classes
            .iter()
            .enumerate()
            .filter_map(|(index, items)| items.last_key_value().map(|(key, _)| (index, *key)))
            .max_by_key(|(_, key)| *key)
    }
}

fn class_slot(class: ChannelClass) -> usize {
    match class {
        ChannelClass::Realtime => 0,
        ChannelClass::Async => 1,
        ChannelClass::ThirdParty => 2,
    }
}

/// 预留的队列槽位；未用完的部分在释放时归还。
///
/// 仅 `Reject` 策略下占用容量：预留成功后，凭此入队的任务不会因队列已满被拒绝。
pub struct QueueReservation {
    queue: Arc<PriorityDispatchQueue>,
    slots: usize,
}

impl QueueReservation {
    /// 尚未使用的槽位数
    pub fn remaining(&self) -> usize {
        self.slots
    }
}

impl std::fmt::Debug for QueueReservation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueueReservation")
            .field("slots", &self.slots)
            .finish()
    }
}

impl Drop for QueueReservation {
    fn drop(&mut self) {
        if self.slots > 0 {
            let slots = self.slots;
            self.queue
                .with_state(|state| state.reserved = state.reserved.saturating_sub(slots));
        }
    }
}

pub struct PriorityDispatchQueue {
    config: QueueConfig,
    state: Mutex<QueueState>,
    ready: [Notify; 3],
    closed: AtomicBool,
}

impl PriorityDispatchQueue {
    pub fn new(config: QueueConfig) -> Self {
        Self {
            config: QueueConfig {
                capacity: config.capacity.max(1),
                overflow: config.overflow,
            },
            state: Mutex::new(QueueState::default()),
            ready: [Notify::new(), Notify::new(), Notify::new()],
            closed: AtomicBool::new(false),
        }
    }

    pub fn config(&self) -> QueueConfig {
        self.config
    }

    fn with_state<R>(&self, f: impl FnOnce(&mut QueueState) -> R) -> R {
        let mut state = match self.state.lock() {
            Ok(state) => state,
            Err(poisoned) => poisoned.into_inner(),
        };
        f(&mut state)
    }

    pub fn push(&self, item: DispatchItem) -> Result<EnqueueOutcome, NotifyError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(NotifyError::Closed);
        }
        let slot = class_slot(item.task.channel.class());
        let outcome = self.with_state(|state| {
            let key = state.key(&item.task);
            if state.len() + state.reserved < self.config.capacity {
                state.classes[slot].insert(key, item);
                return Ok(EnqueueOutcome::Enqueued);
            }
            match self.config.overflow {
                OverflowPolicy::Reject => Err(NotifyError::QueueFull(self.config.capacity)),
                OverflowPolicy::DropLowest => match state.lowest() {
                    Some((lowest_slot, lowest_key)) if key < lowest_key => {
                        let evicted = state.classes[lowest_slot].remove(&lowest_key);
                        state.classes[slot].insert(key, item);
                        Ok(match evicted {
                            Some(evicted) => EnqueueOutcome::Displaced(Box::new(evicted)),
                            None => EnqueueOutcome::Enqueued,
                        })
                    }
                    _ => Ok(EnqueueOutcome::Dropped(Box::new(item))),
                },
            }
        })?;
        if !matches!(outcome, EnqueueOutcome::Dropped(_)) {
            self.ready[slot].notify_one();
        }
        Ok(outcome)
    }

    /// 一次性预留 `count` 个槽位，全部可用才成功。
    ///
    /// `DropLowest` 策略下溢出由挤出处理，预留总是成功且不占容量。
    pub fn reserve(self: &Arc<Self>, count: usize) -> Result<QueueReservation, NotifyError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(NotifyError::Closed);
        }
        let slots = match self.config.overflow {
            OverflowPolicy::DropLowest => 0,
            OverflowPolicy::Reject => self.with_state(|state| {
                if state.len() + state.reserved + count > self.config.capacity {
                    return Err(NotifyError::QueueFull(self.config.capacity));
                }
                state.reserved += count;
                Ok(count)
            })?,
        };
        Ok(QueueReservation {
            queue: self.clone(),
            slots,
        })
    }

    /// 优先使用预留槽位入队；预留用尽后按普通入队处理。
    pub fn push_reserved(
        &self,
        item: DispatchItem,
        reservation: &mut QueueReservation,
    ) -> Result<EnqueueOutcome, NotifyError> {
        if reservation.slots == 0 {
            return self.push(item);
        }
        if self.closed.load(Ordering::Acquire) {
            return Err(NotifyError::Closed);
        }
        let slot = class_slot(item.task.channel.class());
        self.with_state(|state| {
            let key = state.key(&item.task);
            state.reserved = state.reserved.saturating_sub(1);
            state.classes[slot].insert(key, item);
        });
        reservation.slots -= 1;
        self.ready[slot].notify_one();
        Ok(EnqueueOutcome::Enqueued)
    }

    /// 立即取出指定分类中优先级最高的一项。
    pub fn try_pop_class(&self, class: ChannelClass) -> Option<DispatchItem> {
        self.with_state(|state| {
            state.classes[class_slot(class)]
                .pop_first()
                .map(|(_, item)| item)
        })
    }

    /// 跨分类取出优先级最高的一项。
    pub fn try_pop(&self) -> Option<DispatchItem> {
        self.with_state(|state| {
            let slot = state
                .classes
                .iter()
                .enumerate()
                .filter_map(|(index, items)| items.first_key_value().map(|(key, _)| (index, *key)))
                .min_by_key(|(_, key)| *key)
                .map(|(index, _)| index)?;
            state.classes[slot].pop_first().map(|(_, item)| item)
        })
    }

    /// 等待指定分类的下一项；队列关闭后返回 `None`。
    pub async fn pop_class(&self, class: ChannelClass) -> Option<DispatchItem> {
        let slot = class_slot(class);
        loop {
            let notified = self.ready[slot].notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if let Some(item) = self.try_pop_class(class) {
                return Some(item);
            }
            if self.closed.load(Ordering::Acquire) {
                return None;
            }
            notified.await;
        }
    }

    /// 移除某条告警仍在排队的全部任务。
    pub fn remove_alert(&self, alert_id: &str) -> Vec<DispatchItem> {
        self.with_state(|state| {
            let mut removed = Vec::new();
            for items in state.classes.iter_mut() {
                let keys: Vec<QueueKey> = items
                    .iter()
                    .filter(|(_, item)| item.task.alert_id == alert_id)
                    .map(|(key, _)| *key)
                    .collect();
                for key in keys {
                    if let Some(item) = items.remove(&key) {
                        removed.push(item);
                    }
                }
            }
            removed
        })
    }

    pub fn len(&self) -> usize {
        self.with_state(|state| state.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn len_class(&self, class: ChannelClass) -> usize {
        self.with_state(|state| state.classes[class_slot(class)].len())
    }

    /// 是否还能无损接收 `count` 项（已预留的槽位视为占用）。
    pub fn has_capacity(&self, count: usize) -> bool {
        self.with_state(|state| state.len() + state.reserved + count <= self.config.capacity)
    }

    pub fn reserved(&self) -> usize {
        self.with_state(|state| state.reserved)
    }

    /// 关闭队列并唤醒所有等待者。
    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
        for ready in &self.ready {
            ready.notify_waiters();
        }
    }
}
