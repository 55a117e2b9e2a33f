//! 进程内发布/订阅事件总线。
//!
//! 生产者与消费者之间唯一的同步点：每个订阅者持有自己的有界队列，
//! 发布永不阻塞；队列满时丢弃该订阅者最旧的事件并计数。
//! 订阅句柄以弱引用登记，丢弃后在下次发布时自动清理。

use domain::{CanonicalRecord, PipelineFault, StatusChange, YieldSample};
use fab_telemetry::{record_bus_overflow, record_bus_published};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};
use tokio::sync::Notify;
use tracing::debug;

/// 总线主题。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Topic {
    /// 规范化采样记录
    TelemetryProcessed,
    /// 设备状态变更
    DeviceStatus,
    /// 良率更新
    YieldUpdated,
    /// 流水线级故障
    PipelineError,
}

impl Topic {
    pub const ALL: [Topic; 4] = [
        Topic::TelemetryProcessed,
        Topic::DeviceStatus,
        Topic::YieldUpdated,
        Topic::PipelineError,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Topic::TelemetryProcessed => "telemetry.processed",
            Topic::DeviceStatus => "device.status",
            Topic::YieldUpdated => "yield.updated",
            Topic::PipelineError => "pipeline.error",
        }
    }

    fn index(&self) -> usize {
        match self {
            Topic::TelemetryProcessed => 0,
            Topic::DeviceStatus => 1,
            Topic::YieldUpdated => 2,
            Topic::PipelineError => 3,
        }
    }
}

/// 总线事件。采样记录以 `Arc` 共享，订阅者只读。
#[derive(Debug, Clone)]
pub enum BusEvent {
    Record(Arc<CanonicalRecord>),
    Status(StatusChange),
    Yield(YieldSample),
    Fault(PipelineFault),
}

/// 订阅者私有队列。
struct SubQueue {
    queue: Mutex<VecDeque<BusEvent>>,
    notify: Notify,
    overflow: AtomicU64,
    closed: AtomicBool,
    capacity: usize,
}

impl SubQueue {
    fn new(capacity: usize) -> Self {
        Self {
            queue: Mutex::new(VecDeque::with_capacity(capacity)),
            notify: Notify::new(),
            overflow: AtomicU64::new(0),
            closed: AtomicBool::new(false),
            capacity,
        }
    }

    /// 入队；满则丢弃最旧。返回是否发生了溢出。
    fn push(&self, event: BusEvent) -> bool {
        let mut queue = match self.queue.lock() {
            Ok(queue) => queue,
            Err(_) => return false,
        };
        let mut overflowed = false;
        if queue.len() >= self.capacity {
            queue.pop_front();
            self.overflow.fetch_add(1, Ordering::Relaxed);
            overflowed = true;
        }
        queue.push_back(event);
        drop(queue);
        self.notify.notify_one();
        overflowed
    }

    fn pop(&self) -> Option<BusEvent> {
        self.queue.lock().ok().and_then(|mut queue| queue.pop_front())
    }

    fn close(&self) {
        self.closed.store(true, Ordering::Release);
        self.notify.notify_waiters();
    }
}

/// 订阅句柄。丢弃即取消订阅。
pub struct Subscription {
    topic: Topic,
    queue: Arc<SubQueue>,
}

impl Subscription {
    /// 接收下一个事件。总线关闭且队列取空后返回 `None`。
    pub async fn recv(&self) -> Option<BusEvent> {
        loop {
            let notified = self.queue.notify.notified();
            if let Some(event) = self.queue.pop() {
                return Some(event);
            }
            if self.queue.closed.load(Ordering::Acquire) {
                // 关闭与入队可能交错，最后再取一次
                return self.queue.pop();
            }
            notified.await;
        }
    }

    /// 非阻塞取事件。
    pub fn try_recv(&self) -> Option<BusEvent> {
        self.queue.pop()
    }

    /// 该订阅者因队列溢出而丢弃的事件数。
    pub fn overflow_count(&self) -> u64 {
        self.queue.overflow.load(Ordering::Relaxed)
    }

    pub fn topic(&self) -> Topic {
        self.topic
    }
}

/// 总线统计。
#[derive(Debug, Clone, Copy, Default)]
pub struct BusStats {
    pub published: u64,
    pub delivered: u64,
    pub dropped: u64,
}

struct BusInner {
    topics: [Mutex<Vec<Weak<SubQueue>>>; 4],
    capacity: usize,
    closed: AtomicBool,
    published: AtomicU64,
    delivered: AtomicU64,
    dropped: AtomicU64,
}

/// 事件总线。进程启动时构造一次，`Clone` 共享。
#[derive(Clone)]
pub struct EventBus {
    inner: Arc<BusInner>,
}

impl EventBus {
    /// 创建总线；`queue_capacity` 为每个订阅者队列的容量。
    pub fn new(queue_capacity: usize) -> Self {
        let capacity = queue_capacity.max(1);
        Self {
            inner: Arc::new(BusInner {
                topics: [
                    Mutex::new(Vec::new()),
                    Mutex::new(Vec::new()),
                    Mutex::new(Vec::new()),
                    Mutex::new(Vec::new()),
                ],
                capacity,
                closed: AtomicBool::new(false),
                published: AtomicU64::new(0),
                delivered: AtomicU64::new(0),
                dropped: AtomicU64::new(0),
            }),
        }
    }

    /// 订阅主题。返回的流不可重启，丢弃即退订。
    pub fn subscribe(&self, topic: Topic) -> Subscription {
        let queue = Arc::new(SubQueue::new(self.inner.capacity));
        if self.inner.closed.load(Ordering::Acquire) {
            queue.close();
        }
        if let Ok(mut subscribers) = self.inner.topics[topic.index()].lock() {
            subscribers.push(Arc::downgrade(&queue));
        }
        Subscription { topic, queue }
    }

    /// 发布事件。对发布者永不阻塞；慢消费者只影响自己的队列。
    pub fn publish(&self, topic: Topic, event: BusEvent) {
        if self.inner.closed.load(Ordering::Acquire) {
            return;
        }
        let mut subscribers = match self.inner.topics[topic.index()].lock() {
            Ok(subscribers) => subscribers,
            Err(_) => return,
        };
        // 清理已丢弃的订阅者
        subscribers.retain(|weak| weak.strong_count() > 0);
        let mut delivered = 0u64;
        for weak in subscribers.iter() {
            let Some(queue) = weak.upgrade() else { continue };
            if queue.push(event.clone()) {
                self.inner.dropped.fetch_add(1, Ordering::Relaxed);
                record_bus_overflow();
            }
            delivered += 1;
        }
        drop(subscribers);

        self.inner.published.fetch_add(1, Ordering::Relaxed);
        self.inner.delivered.fetch_add(delivered, Ordering::Relaxed);
        record_bus_published();
        debug!(target: "fab.bus", topic = topic.as_str(), delivered, "event_published");
    }

    /// 关闭总线：关闭全部订阅者队列，此后的发布被忽略。
    pub fn close(&self) {
        self.inner.closed.store(true, Ordering::Release);
        for subscribers in self.inner.topics.iter() {
            if let Ok(subscribers) = subscribers.lock() {
                for weak in subscribers.iter() {
                    if let Some(queue) = weak.upgrade() {
                        queue.close();
                    }
                }
            }
        }
    }

    /// 主题当前存活的订阅者数量。
    pub fn subscriber_count(&self, topic: Topic) -> usize {
        self.inner.topics[topic.index()]
            .lock()
            .map(|subscribers| {
                subscribers
                    .iter()
                    .filter(|weak| weak.strong_count() > 0)
                    .count()
            })
            .unwrap_or(0)
    }

    pub fn stats(&self) -> BusStats {
        BusStats {
            published: self.inner.published.load(Ordering::Relaxed),
            delivered: self.inner.delivered.load(Ordering::Relaxed),
            dropped: self.inner.dropped.load(Ordering::Relaxed),
        }
    }
}
