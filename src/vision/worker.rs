//! Long-lived call worker for blocking perception backends
//!
//! OCR and remote classification are host calls that may stall. Each
//! backend gets one worker thread; a call waits for its answer at most a
//! bounded time, and while an abandoned call is still running further calls
//! are refused instead of queued.

use std::io;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, SyncSender, TrySendError};
use std::sync::Arc;
use std::time::Duration;

/// Why a call produced no answer
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum CallError {
    #[error("previous call still in flight")]
    Busy,
    #[error("call timed out")]
    TimedOut,
    #[error("worker is gone")]
    Closed,
}

struct Job<Req, Resp> {
    request: Req,
    reply: mpsc::Sender<Resp>,
}

/// Single-flight worker thread around a blocking function
pub struct CallWorker<Req, Resp> {
    jobs: SyncSender<Job<Req, Resp>>,
    in_flight: Arc<AtomicBool>,
}

impl<Req, Resp> Clone for CallWorker<Req, Resp> {
    fn clone(&self) -> Self {
        Self {
            jobs: self.jobs.clone(),
            in_flight: Arc::clone(&self.in_flight),
        }
    }
}

impl<Req, Resp> CallWorker<Req, Resp>
where
    Req: Send + 'static,
    Resp: Send + 'static,
{
    /// Spawn the worker thread. It exits once every handle is dropped and
    /// the current call has returned.
    pub fn spawn<F>(name: &str, call: F) -> io::Result<Self>
    where
        F: Fn(Req) -> Resp + Send + 'static,
    {
        let (jobs, rx) = mpsc::sync_channel::<Job<Req, Resp>>(1);
        let in_flight = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&in_flight);
        let thread_name = name.to_string();

        std::thread::Builder::new().name(thread_name.clone()).spawn(move || {
            while let Ok(job) = rx.recv() {
                let outcome = panic::catch_unwind(AssertUnwindSafe(|| call(job.request)));
                flag.store(false, Ordering::SeqCst);
                match outcome {
                    // The caller may have given up already
                    Ok(response) => {
                        let _ = job.reply.send(response);
                    }
                    Err(_) => log::error!("Backend call on '{}' panicked", thread_name),
                }
            }
            log::debug!("Worker '{}' exiting", thread_name);
        })?;

        Ok(Self { jobs, in_flight })
    }

    /// Whether a call (possibly abandoned) is still running
    pub fn in_flight(&self) -> bool {
        self.in_flight.load(Ordering::SeqCst)
    }

    /// Run `request` on the worker, waiting at most `timeout`
    pub fn call(&self, request: Req, timeout: Duration) -> Result<Resp, CallError> {
        if self
            .in_flight
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(CallError::Busy);
        }

        let (reply, answer) = mpsc::channel();
        match self.jobs.try_send(Job { request, reply }) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => {
                self.in_flight.store(false, Ordering::SeqCst);
                return Err(CallError::Busy);
            }
            Err(TrySendError::Disconnected(_)) => {
                self.in_flight.store(false, Ordering::SeqCst);
                return Err(CallError::Closed);
            }
        }

        answer.recv_timeout(timeout).map_err(|e| match e {
            mpsc::RecvTimeoutError::Timeout => CallError::TimedOut,
            mpsc::RecvTimeoutError::Disconnected => CallError::Closed,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU32;
    use std::sync::Mutex;
    use std::time::Instant;

    fn wait_idle<Req: Send + 'static, Resp: Send + 'static>(worker: &CallWorker<Req, Resp>) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while worker.in_flight() {
            assert!(Instant::now() < deadline, "worker never finished");
            std::thread::sleep(Duration::from_millis(5));
        }
    }

    #[test]
    fn test_call_returns_value() {
        let worker = CallWorker::spawn("double", |x: u32| x * 2).unwrap();
        assert_eq!(worker.call(21, Duration::from_secs(1)), Ok(42));
        assert_eq!(worker.call(5, Duration::from_secs(1)), Ok(10));
        assert!(!worker.in_flight());
    }

    #[test]
    fn test_stalled_call_blocks_further_calls() {
        let calls = Arc::new(AtomicU32::new(0));
        let (release, gate) = mpsc::channel::<()>();
        let gate = Mutex::new(gate);
        let counter = Arc::clone(&calls);
        let worker = CallWorker::spawn("stall", move |_: ()| {
            counter.fetch_add(1, Ordering::SeqCst);
            let _ = gate.lock().unwrap().recv();
        })
        .unwrap();

        assert_eq!(worker.call((), Duration::from_millis(20)), Err(CallError::TimedOut));
        for _ in 0..5 {
            assert_eq!(worker.call((), Duration::from_millis(20)), Err(CallError::Busy));
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(worker.in_flight());

        drop(release);
        wait_idle(&worker);
        assert_eq!(worker.call((), Duration::from_secs(1)), Ok(()));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_panicking_call_frees_worker() {
        let worker = CallWorker::spawn("flaky", |x: u32| {
            if x == 0 {
                panic!("bad input");
            }
            x
        })
        .unwrap();

        assert_eq!(worker.call(0, Duration::from_secs(1)), Err(CallError::Closed));
        wait_idle(&worker);
        assert_eq!(worker.call(3, Duration::from_secs(1)), Ok(3));
    }
}
