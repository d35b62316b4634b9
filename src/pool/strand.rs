//! Single-writer actor serialising access to shared pool state.
//!
//! The state value is moved into a dedicated task. Callers submit closures
//! that run against `&mut T` one at a time, in submission order, and await
//! the closure's return value. No lock guards shared state; exclusivity
//! comes from the actor being the only owner.

use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;

use super::PoolError;

type Job<T> = Box<dyn FnOnce(&mut T) + Send>;

/// Capacity of the job queue. Submitters wait when it is full.
const JOB_QUEUE_CAPACITY: usize = 256;

/// Handle to a running strand.
///
/// Cloning the handle shares the same actor. The actor stops once
/// [`Strand::close`] is called or every handle has been dropped.
pub(crate) struct Strand<T> {
    jobs: mpsc::Sender<Job<T>>,
    closed: CancellationToken,
}

impl<T> Clone for Strand<T> {
    fn clone(&self) -> Self {
        Self {
            jobs: self.jobs.clone(),
            closed: self.closed.clone(),
        }
    }
}

impl<T: Send + 'static> Strand<T> {
    /// Move `state` into a new actor task.
    ///
    /// Must be called from within a Tokio runtime.
    pub(crate) fn spawn(state: T) -> Self {
        let (jobs, rx) = mpsc::channel(JOB_QUEUE_CAPACITY);
        let closed = CancellationToken::new();
        tokio::spawn(run_actor(state, rx, closed.clone()));
        Self { jobs, closed }
    }

    /// Run `job` against the state and return its result.
    ///
    /// # Errors
    ///
    /// Returns [`PoolError::Closed`] if the actor has stopped, either before
    /// the job was queued or before it ran.
    pub(crate) async fn run<R, F>(&self, job: F) -> Result<R, PoolError>
    where
        F: FnOnce(&mut T) -> R + Send + 'static,
        R: Send + 'static,
    {
        if self.closed.is_cancelled() {
            return Err(PoolError::Closed);
        }
        let (reply_tx, reply_rx) = oneshot::channel();
        let job: Job<T> = Box::new(move |state| {
            let _ = reply_tx.send(job(state));
        });
        self.jobs.send(job).await.map_err(|_| PoolError::Closed)?;
        reply_rx.await.map_err(|_| PoolError::Closed)
    }

    /// Stop the actor. Queued jobs that have not yet run are dropped and
    /// their submitters receive [`PoolError::Closed`].
    pub(crate) fn close(&self) { self.closed.cancel(); }

    /// Whether [`Strand::close`] has been called.
    pub(crate) fn is_closed(&self) -> bool { self.closed.is_cancelled() }
}

async fn run_actor<T>(mut state: T, mut jobs: mpsc::Receiver<Job<T>>, closed: CancellationToken) {
    loop {
        tokio::select! {
            biased;

            () = closed.cancelled() => break,
            job = jobs.recv() => match job {
                Some(job) => job(&mut state),
                None => break,
            },
        }
    }
    jobs.close();
}

#[cfg(test)]
mod tests {
    use super::Strand;
    use crate::pool::PoolError;

    #[tokio::test]
    async fn jobs_run_in_submission_order() {
        let strand = Strand::spawn(Vec::new());
        for i in 0..10 {
            strand
                .run(move |log: &mut Vec<i32>| log.push(i))
                .await
                .expect("strand running");
        }
        let log = strand.run(|log| log.clone()).await.expect("strand running");
        assert_eq!(log, (0..10).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn concurrent_submissions_are_serialised() {
        let strand = Strand::spawn(0_u64);
        let mut handles = Vec::new();
        for _ in 0..32 {
            let strand = strand.clone();
            handles.push(tokio::spawn(async move {
                strand
                    .run(|count: &mut u64| {
                        let seen = *count;
                        *count = seen + 1;
                    })
                    .await
            }));
        }
        for handle in handles {
            handle.await.expect("join").expect("strand running");
        }
        assert_eq!(strand.run(|count| *count).await.expect("strand running"), 32);
    }

    #[tokio::test]
    async fn closed_strand_rejects_jobs() {
        let strand = Strand::spawn(());
        strand.close();
        assert!(strand.is_closed());
        let err = strand.run(|()| ()).await.unwrap_err();
        assert!(matches!(err, PoolError::Closed));
    }

    #[tokio::test]
    async fn panicking_job_stops_the_actor() {
        let strand = Strand::spawn(());
        let err = strand
            .run(|()| -> u8 { panic!("job failed") })
            .await
            .unwrap_err();
        assert!(matches!(err, PoolError::Closed));
        assert!(matches!(
            strand.run(|()| ()).await.unwrap_err(),
            PoolError::Closed
        ));
    }
}
