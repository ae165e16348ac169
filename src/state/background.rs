//! 后台策略通道
//!
//! 每个字段一条 FIFO 通道（mpsc + worker task，首次使用时在当前 tokio runtime 上创建）：
//! 同一字段的后台策略链按触发顺序依次执行，互不重叠；不同字段之间并行。
//! 链中任一策略产出值时，最后的值在一致性锁内写回（不再经过策略链）。

use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures_util::FutureExt;
use parking_lot::Mutex;
use serde_json::Value;
use tokio::runtime::Handle;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::state::field::describe_value;
use crate::state::policy::run_background_chain;
use crate::state::{Event, FieldType, Policy, StateField};

/// 受一致性锁保护的字段值
pub(crate) type SharedValues = Arc<Mutex<HashMap<String, Value>>>;

struct Job {
    event: Event,
    kind: FieldType,
    policies: Vec<Arc<dyn Policy>>,
}

pub(crate) struct BackgroundLanes {
    values: SharedValues,
    lanes: Mutex<HashMap<String, mpsc::UnboundedSender<Job>>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    /// 已入队但未完成的任务数
    pending: Arc<watch::Sender<usize>>,
    cancel: CancellationToken,
}

impl BackgroundLanes {
    pub(crate) fn new(values: SharedValues) -> Self {
        let (pending, _) = watch::channel(0usize);
        Self {
            values,
            lanes: Mutex::new(HashMap::new()),
            workers: Mutex::new(Vec::new()),
            pending: Arc::new(pending),
            cancel: CancellationToken::new(),
        }
    }

    /// 将字段的后台策略链排入该字段的通道；没有策略或没有 runtime 时直接跳过
    pub(crate) fn schedule(&self, field: &StateField, event: Event) {
        if field.policies.is_empty() || self.cancel.is_cancelled() {
            return;
        }
        let handle = match Handle::try_current() {
            Ok(h) => h,
            Err(_) => {
                tracing::warn!(field = %field.name, "no tokio runtime, background policies skipped");
                return;
            }
        };

        let job = Job {
            event,
            kind: field.kind,
            policies: field.policies.clone(),
        };
        self.pending.send_modify(|n| *n += 1);

        let mut lanes = self.lanes.lock();
        let job = match lanes.get(&field.name) {
            Some(tx) => match tx.send(job) {
                Ok(()) => return,
                Err(mpsc::error::SendError(job)) => job,
            },
            None => job,
        };
        let tx = self.spawn_lane(&handle, &field.name);
        if tx.send(job).is_err() {
            self.pending.send_modify(|n| *n = n.saturating_sub(1));
            tracing::warn!(field = %field.name, "background lane closed, job dropped");
            return;
        }
        lanes.insert(field.name.clone(), tx);
    }

    fn spawn_lane(&self, handle: &Handle, field: &str) -> mpsc::UnboundedSender<Job> {
        let (tx, mut rx) = mpsc::unbounded_channel::<Job>();
        let values = self.values.clone();
        let pending = self.pending.clone();
        let cancel = self.cancel.clone();
        let field = field.to_string();

        let worker = handle.spawn(async move {
            loop {
                let job = tokio::select! {
                    _ = cancel.cancelled() => break,
                    job = rx.recv() => match job {
                        Some(job) => job,
                        None => break,
                    },
                };
                let outcome = AssertUnwindSafe(run_background_chain(&job.policies, &job.event))
                    .catch_unwind()
                    .await;
                match outcome {
                    Ok(Some(value)) => write_back(&values, &field, job.kind, value),
                    Ok(None) => {}
                    Err(_) => tracing::error!(field = %field, "background policy panicked"),
                }
                pending.send_modify(|n| *n = n.saturating_sub(1));
            }
            tracing::debug!(field = %field, "background lane stopped");
        });
        self.workers.lock().push(worker);
        tx
    }

    /// 等待所有已排队的后台任务完成
    pub(crate) async fn drain(&self) {
        let mut rx = self.pending.subscribe();
        let _ = rx.wait_for(|n| *n == 0).await;
    }

    pub(crate) fn pending(&self) -> usize {
        *self.pending.borrow()
    }

    /// 取消所有通道，丢弃未执行的任务
    pub(crate) fn shutdown(&self) {
        self.cancel.cancel();
        for worker in self.workers.lock().drain(..) {
            worker.abort();
        }
        self.lanes.lock().clear();
        self.pending.send_replace(0);
    }
}

impl Drop for BackgroundLanes {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

fn write_back(values: &SharedValues, field: &str, kind: FieldType, value: Value) {
    if !kind.accepts(&value) {
        tracing::warn!(
            field = %field,
            expected = %kind,
            found = describe_value(&value),
            "background write rejected"
        );
        return;
    }
    values.lock().insert(field.to_string(), value);
    tracing::debug!(field = %field, "background write applied");
}
