//! Task runner for detached background work

use std::io;
use std::thread;

/// A unit of detached work
pub type Task = Box<dyn FnOnce() + Send + 'static>;

/// Runs tasks independently of the submitting call
pub trait TaskRunner: Send + Sync {
    /// Start `task`; it must outlive the caller's stack frame
    fn submit(&self, name: String, task: Task) -> io::Result<()>;
}

/// Runs each task on its own named, detached thread
#[derive(Debug, Clone, Copy, Default)]
pub struct ThreadRunner;

impl TaskRunner for ThreadRunner {
    fn submit(&self, name: String, task: Task) -> io::Result<()> {
        // detached: the join handle is dropped
        thread::Builder::new().name(name).spawn(task).map(|_| ())
    }
}

/// Runs tasks inline on the submitting thread
#[derive(Debug, Clone, Copy, Default)]
pub struct InlineRunner;

impl TaskRunner for InlineRunner {
    fn submit(&self, _name: String, task: Task) -> io::Result<()> {
        task();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc::channel;
    use std::time::Duration;

    #[test]
    fn thread_runner_runs_detached() {
        let (tx, rx) = channel();
        ThreadRunner
            .submit(
                "test-task".to_string(),
                Box::new(move || {
                    let name = thread::current().name().map(str::to_string);
                    tx.send(name).unwrap();
                }),
            )
            .unwrap();

        let name = rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!(name.as_deref(), Some("test-task"));
    }

    #[test]
    fn inline_runner_runs_before_returning() {
        let (tx, rx) = channel();
        InlineRunner
            .submit("inline".to_string(), Box::new(move || tx.send(1).unwrap()))
            .unwrap();
        assert_eq!(rx.try_recv().unwrap(), 1);
    }
}
