use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, Instant};
use thiserror::Error;

/// 停止信号已触发。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("stop requested")]
pub struct Stopped;

/// 协作式停止信号：所有轮询等待都通过它睡眠，触发后立刻唤醒。
///
/// 克隆得到的句柄共享同一个标志；一旦触发不可撤销，新一轮运行需创建新的信号。
#[derive(Debug, Clone, Default)]
pub struct StopSignal {
    inner: Arc<(Mutex<bool>, Condvar)>,
}

impl StopSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn trigger(&self) {
        let (lock, cvar) = &*self.inner;
        let mut stopped = lock.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        *stopped = true;
        cvar.notify_all();
    }

    pub fn is_set(&self) -> bool {
        let (lock, _) = &*self.inner;
        *lock.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// 最多等待 `timeout`；返回 `true` 表示期间收到停止信号。
    pub fn wait(&self, timeout: Duration) -> bool {
        let (lock, cvar) = &*self.inner;
        let deadline = Instant::now() + timeout;
        let mut stopped = lock.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        while !*stopped {
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            stopped = match cvar.wait_timeout(stopped, deadline - now) {
                Ok((guard, _)) => guard,
                Err(poisoned) => poisoned.into_inner().0,
            };
        }
        true
    }

    pub fn checkpoint(&self) -> Result<(), Stopped> {
        if self.is_set() {
            Err(Stopped)
        } else {
            Ok(())
        }
    }

    /// 可中断的等待，期间收到停止信号返回 `Stopped`。
    pub fn pause(&self, timeout: Duration) -> Result<(), Stopped> {
        if self.wait(timeout) {
            Err(Stopped)
        } else {
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{StopSignal, Stopped};
    use std::thread;
    use std::time::{Duration, Instant};

    #[test]
    fn wait_times_out_without_trigger() {
        let stop = StopSignal::new();
        assert!(!stop.wait(Duration::from_millis(20)));
        assert!(!stop.is_set());
    }

    #[test]
    fn trigger_wakes_sleeping_waiter() {
        let stop = StopSignal::new();
        let remote = stop.clone();
        let started = Instant::now();
        let handle = thread::spawn(move || remote.wait(Duration::from_secs(10)));
        thread::sleep(Duration::from_millis(50));
        stop.trigger();
        assert!(handle.join().unwrap());
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[test]
    fn already_set_returns_immediately() {
        let stop = StopSignal::new();
        stop.trigger();
        assert!(stop.wait(Duration::from_secs(10)));
        assert!(stop.wait(Duration::ZERO));
    }

    #[test]
    fn pause_and_checkpoint_report_stop() {
        let stop = StopSignal::new();
        assert_eq!(stop.checkpoint(), Ok(()));
        assert_eq!(stop.pause(Duration::ZERO), Ok(()));
        stop.trigger();
        assert_eq!(stop.checkpoint(), Err(Stopped));
        assert_eq!(stop.pause(Duration::from_secs(10)), Err(Stopped));
    }
}
