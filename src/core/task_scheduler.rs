//! 调度：限制同一轮内工具 / 子 Agent 调用的并发数
//!
//! max_concurrent_calls = 1 时退化为严格串行；结果记录顺序由执行循环保证，与完成顺序无关。

use std::sync::Arc;

use tokio::sync::{OwnedSemaphorePermit, Semaphore};

/// 调用调度器（可廉价 clone，共享同一个 Semaphore）
#[derive(Clone, Debug)]
pub struct TaskScheduler {
    call_semaphore: Arc<Semaphore>,
    max_concurrent: usize,
}

impl TaskScheduler {
    pub fn new(max_concurrent_calls: usize) -> Self {
        let max = max_concurrent_calls.max(1);
        Self {
            call_semaphore: Arc::new(Semaphore::new(max)),
            max_concurrent: max,
        }
    }

    /// 获取调用许可；Semaphore 被关闭时返回 None（调用方按无限制处理）
    pub async fn acquire_call(&self) -> Option<OwnedSemaphorePermit> {
        self.call_semaphore.clone().acquire_owned().await.ok()
    }

    pub fn max_concurrent(&self) -> usize {
        self.max_concurrent
    }

    /// 是否并发分发同一轮的调用
    pub fn is_concurrent(&self) -> bool {
        self.max_concurrent > 1
    }
}

impl Default for TaskScheduler {
    fn default() -> Self {
        Self::new(1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zero_is_clamped_to_sequential() {
        let scheduler = TaskScheduler::new(0);
        assert_eq!(scheduler.max_concurrent(), 1);
        assert!(!scheduler.is_concurrent());
    }

    #[tokio::test]
    async fn test_permits_are_bounded() {
        let scheduler = TaskScheduler::new(2);
        let a = scheduler.acquire_call().await;
        let b = scheduler.acquire_call().await;
        assert!(a.is_some() && b.is_some());
        let third = tokio::time::timeout(
            std::time::Duration::from_millis(20),
            scheduler.acquire_call(),
        )
        .await;
        assert!(third.is_err());
        drop(a);
        assert!(scheduler.acquire_call().await.is_some());
    }
}
