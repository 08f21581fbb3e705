//
// mailmirror - jobs executor
//
// This file is part of mailmirror.
//
// mailmirror is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// mailmirror is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License
// along with mailmirror. If not, see <http://www.gnu.org/licenses/>.
//
// SPDX-License-Identifier: EUPL-1.2 OR GPL-3.0-or-later

//! Single worker job queue.
//!
//! A [`JobQueue`] owns one resource (the index writer, the local cache) and
//! exactly one thread that is allowed to touch it. Jobs are closures over
//! that resource, executed strictly in submission order. Submitting never
//! blocks; the caller gets a [`JoinHandle`] to cancel the job or wait for its
//! result.
//!
//! Job states follow `Submitted → Running → {Succeeded, Failed, Cancelled}`.
//! A job cancelled before it starts is discarded without running. A running
//! job observes cancellation through [`JobContext::is_canceled`] between its
//! own units of work.

use std::{
    borrow::Cow,
    panic::{catch_unwind, AssertUnwindSafe},
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Mutex,
    },
    thread,
};

use crossbeam::channel::{unbounded, Receiver, Sender};
pub use futures::channel::oneshot;
use indexmap::IndexMap;
use uuid::Uuid;

use crate::{
    error::{Error, ErrorKind, Result},
    utils::datetime::{self, UnixTimestamp},
};

macro_rules! uuid_hash_type {
    ($n:ident) => {
        #[derive(PartialEq, Hash, Eq, Copy, Clone, Ord, PartialOrd, Serialize, Deserialize)]
        pub struct $n(Uuid);

        impl std::fmt::Debug for $n {
            fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl std::fmt::Display for $n {
            fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl Default for $n {
            fn default() -> Self {
                Self::new()
            }
        }

        impl $n {
            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }

            pub fn null() -> Self {
                Self(Uuid::nil())
            }
        }
    };
}
uuid_hash_type!(JobId);

/// A resource exclusively owned by the worker of a [`JobQueue`].
pub trait QueueResource: Send + 'static {
    /// Called once on the worker thread after the last job has run.
    fn close(self) -> Result<()>;
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum JobStatus {
    Submitted,
    Running,
    Succeeded,
    Failed,
    Cancelled,
}

/// A job's metadata for book-keeping. Entries are dropped from the queue's
/// job map once the job completes.
#[derive(Clone, Debug)]
pub struct JobMetadata {
    id: JobId,
    desc: Cow<'static, str>,
    started: UnixTimestamp,
    status: JobStatus,
    cancel: Arc<AtomicBool>,
}

impl JobMetadata {
    pub fn id(&self) -> &JobId {
        &self.id
    }

    pub fn description(&self) -> &str {
        &self.desc
    }

    /// Submission time.
    pub fn started(&self) -> UnixTimestamp {
        self.started
    }

    pub fn status(&self) -> JobStatus {
        self.status
    }
}

type JobMap = Arc<Mutex<IndexMap<JobId, JobMetadata>>>;

type JobFn<S> = Box<dyn FnOnce(&mut S, &JobContext<S>) + Send + 'static>;

struct QueuedJob<S> {
    id: JobId,
    desc: Cow<'static, str>,
    cancel: Arc<AtomicBool>,
    run: JobFn<S>,
}

/// Cloneable submission side of a [`JobQueue`].
pub struct Submitter<S> {
    sender: Arc<Mutex<Option<Sender<QueuedJob<S>>>>>,
    jobs: JobMap,
    shutdown: Arc<AtomicBool>,
}

impl<S> Clone for Submitter<S> {
    fn clone(&self) -> Self {
        Self {
            sender: self.sender.clone(),
            jobs: self.jobs.clone(),
            shutdown: self.shutdown.clone(),
        }
    }
}

impl<S> std::fmt::Debug for Submitter<S> {
    fn fmt(&self, fmt: &mut std::fmt::Formatter) -> std::fmt::Result {
        fmt.debug_struct(stringify!(Submitter))
            .field("shutdown", &self.shutdown.load(Ordering::SeqCst))
            .finish()
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

impl<S: 'static> Submitter<S> {
    /// Queues `job` and returns immediately.
    ///
    /// Fails with [`ErrorKind::Cancelled`] if the queue has been shut down.
    pub fn spawn<F, R>(&self, desc: Cow<'static, str>, job: F) -> Result<JoinHandle<R>>
    where
        F: FnOnce(&mut S, &JobContext<S>) -> Result<R> + Send + 'static,
        R: Send + 'static,
    {
        let (sender, receiver) = oneshot::channel();
        let job_id = JobId::new();
        let cancel = Arc::new(AtomicBool::new(false));
        let jobs = self.jobs.clone();
        let run: JobFn<S> = {
            let desc = desc.clone();
            Box::new(move |resource: &mut S, ctx: &JobContext<S>| {
                log::trace!("Job {} {:?} started", job_id, desc);
                let res = match catch_unwind(AssertUnwindSafe(|| job(resource, ctx))) {
                    Ok(res) => res,
                    Err(payload) => Err(Error::new(format!(
                        "Job {:?} panicked: {}",
                        desc,
                        panic_message(payload.as_ref())
                    ))
                    .set_kind(ErrorKind::Bug)),
                };
                let status = match &res {
                    Ok(_) => JobStatus::Succeeded,
                    Err(err) if err.kind.is_cancelled() => JobStatus::Cancelled,
                    Err(_) => JobStatus::Failed,
                };
                match (&res, status) {
                    (Err(err), JobStatus::Failed) => {
                        log::error!("Job {} {:?} failed: {}", job_id, desc, err)
                    }
                    (Err(err), _) => {
                        log::debug!("Job {} {:?} was cancelled: {}", job_id, desc, err.summary)
                    }
                    (Ok(_), _) => log::trace!("Job {} {:?} finished", job_id, desc),
                };
                // Drop the entry before waking the waiter so completion is
                // visible through `outstanding()` as soon as `wait()` returns.
                if let Ok(mut lck) = jobs.lock() {
                    lck.shift_remove(&job_id);
                }
                _ = sender.send(res);
            })
        };

        let sender_lck = self.sender.lock()?;
        let Some(tx) = sender_lck.as_ref() else {
            return Err(Error::new(format!(
                "Could not submit job {:?}: queue is shut down.",
                desc
            ))
            .set_kind(ErrorKind::Cancelled));
        };
        self.jobs.lock()?.insert(
            job_id,
            JobMetadata {
                id: job_id,
                desc: desc.clone(),
                started: datetime::now(),
                status: JobStatus::Submitted,
                cancel: cancel.clone(),
            },
        );
        if tx
            .send(QueuedJob {
                id: job_id,
                desc: desc.clone(),
                cancel: cancel.clone(),
                run,
            })
            .is_err()
        {
            self.jobs.lock()?.shift_remove(&job_id);
            return Err(Error::new(format!(
                "Could not submit job {:?}: queue worker has exited.",
                desc
            ))
            .set_kind(ErrorKind::Cancelled));
        }
        log::trace!("Job {} {:?} submitted", job_id, desc);

        Ok(JoinHandle {
            chan: receiver,
            cancel,
            job_id,
        })
    }

    pub fn is_shutdown(&self) -> bool {
        self.shutdown.load(Ordering::SeqCst)
    }
}

/// Handed to every running job.
pub struct JobContext<S> {
    job_id: JobId,
    cancel: Arc<AtomicBool>,
    submitter: Submitter<S>,
}

impl<S: 'static> JobContext<S> {
    pub fn job_id(&self) -> JobId {
        self.job_id
    }

    /// True once this job was cancelled or its queue is shutting down.
    pub fn is_canceled(&self) -> bool {
        self.cancel.load(Ordering::SeqCst) || self.submitter.is_shutdown()
    }

    /// Returns a [`ErrorKind::Cancelled`] error if the job should stop.
    pub fn check_canceled(&self) -> Result<()> {
        if self.is_canceled() {
            return Err(
                Error::new(format!("Job {} was cancelled.", self.job_id))
                    .set_kind(ErrorKind::Cancelled),
            );
        }
        Ok(())
    }

    pub fn submitter(&self) -> &Submitter<S> {
        &self.submitter
    }

    /// Queues a follow-up job behind every job already submitted.
    pub fn spawn<F, R>(&self, desc: Cow<'static, str>, job: F) -> Result<JoinHandle<R>>
    where
        F: FnOnce(&mut S, &JobContext<S>) -> Result<R> + Send + 'static,
        R: Send + 'static,
    {
        self.submitter.spawn(desc, job)
    }
}

pub type JobChannel<T> = oneshot::Receiver<Result<T>>;

/// `JoinHandle` for a submitted job that allows us to cancel it.
///
/// Dropping the handle does not cancel the job.
#[derive(Debug)]
pub struct JoinHandle<T> {
    pub chan: JobChannel<T>,
    pub cancel: Arc<AtomicBool>,
    pub job_id: JobId,
}

impl<T> JoinHandle<T> {
    /// Requests cancellation. Returns `true` if this call cancelled the job.
    pub fn cancel(&self) -> bool {
        !self.cancel.swap(true, Ordering::SeqCst)
    }

    pub fn is_canceled(&self) -> bool {
        self.cancel.load(Ordering::SeqCst)
    }

    pub fn job_id(&self) -> JobId {
        self.job_id
    }

    /// Blocks until the job has completed. A job discarded before running
    /// yields an [`ErrorKind::Cancelled`] error.
    pub fn wait(self) -> Result<T> {
        futures::executor::block_on(self.chan)?
    }
}

impl<T> std::cmp::PartialEq<JobId> for JoinHandle<T> {
    fn eq(&self, other: &JobId) -> bool {
        self.job_id == *other
    }
}

pub struct JobQueue<S> {
    name: Cow<'static, str>,
    submitter: Submitter<S>,
    worker: Mutex<Option<thread::JoinHandle<Result<()>>>>,
    closed: AtomicBool,
}

impl<S> std::fmt::Debug for JobQueue<S> {
    fn fmt(&self, fmt: &mut std::fmt::Formatter) -> std::fmt::Result {
        fmt.debug_struct(stringify!(JobQueue))
            .field("name", &self.name)
            .field("closed", &self.closed.load(Ordering::SeqCst))
            .finish()
    }
}

impl<S: QueueResource> JobQueue<S> {
    /// Starts the worker thread, handing it ownership of `resource`.
    pub fn new(name: impl Into<Cow<'static, str>>, resource: S) -> Result<Self> {
        let name = name.into();
        let (tx, rx) = unbounded();
        let submitter = Submitter {
            sender: Arc::new(Mutex::new(Some(tx))),
            jobs: Arc::new(Mutex::new(IndexMap::default())),
            shutdown: Arc::new(AtomicBool::new(false)),
        };
        let worker = {
            let submitter = submitter.clone();
            let name = name.clone();
            thread::Builder::new()
                .name(format!("mailmirror-{}", name))
                .spawn(move || Self::worker_loop(&name, resource, rx, submitter))
                .map_err(|err| {
                    Error::new("Could not spawn queue worker thread.")
                        .set_kind(ErrorKind::Platform)
                        .set_source(Some(Arc::new(err)))
                })?
        };
        Ok(Self {
            name,
            submitter,
            worker: Mutex::new(Some(worker)),
            closed: AtomicBool::new(false),
        })
    }

    fn worker_loop(
        name: &str,
        mut resource: S,
        receiver: Receiver<QueuedJob<S>>,
        submitter: Submitter<S>,
    ) -> Result<()> {
        log::trace!("Queue {} worker started", name);
        for job in receiver.iter() {
            let QueuedJob {
                id,
                desc,
                cancel,
                run,
            } = job;
            if cancel.load(Ordering::SeqCst) || submitter.is_shutdown() {
                log::debug!("Queue {}: discarding cancelled job {} {:?}", name, id, desc);
                if let Ok(mut lck) = submitter.jobs.lock() {
                    lck.shift_remove(&id);
                }
                continue;
            }
            if let Ok(mut lck) = submitter.jobs.lock() {
                if let Some(entry) = lck.get_mut(&id) {
                    entry.status = JobStatus::Running;
                }
            }
            let ctx = JobContext {
                job_id: id,
                cancel,
                submitter: submitter.clone(),
            };
            run(&mut resource, &ctx);
        }
        log::trace!("Queue {} worker closing its resource", name);
        resource.close()
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn submitter(&self) -> Submitter<S> {
        self.submitter.clone()
    }

    pub fn spawn<F, R>(&self, desc: Cow<'static, str>, job: F) -> Result<JoinHandle<R>>
    where
        F: FnOnce(&mut S, &JobContext<S>) -> Result<R> + Send + 'static,
        R: Send + 'static,
    {
        self.submitter.spawn(desc, job)
    }

    /// Snapshot of every job that has not completed yet, in submission order.
    pub fn jobs(&self) -> Vec<JobMetadata> {
        self.submitter
            .jobs
            .lock()
            .map(|lck| lck.values().cloned().collect())
            .unwrap_or_default()
    }

    pub fn outstanding(&self) -> usize {
        self.submitter.jobs.lock().map(|lck| lck.len()).unwrap_or(0)
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Blocks until no job is outstanding, including follow-ups submitted by
    /// running jobs. Must not be called from inside a job of this queue.
    pub fn wait_idle(&self) -> Result<()> {
        while self.outstanding() > 0 {
            self.spawn("wait idle".into(), |_, _| Ok(()))?.wait()?;
        }
        Ok(())
    }

    /// Cancels every outstanding job, stops accepting new ones, then waits
    /// for the worker to close its resource. Later calls do nothing.
    pub fn shutdown(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        log::debug!("Queue {} shutting down", self.name);
        self.submitter.shutdown.store(true, Ordering::SeqCst);
        {
            let jobs = self.submitter.jobs.lock()?;
            for entry in jobs.values() {
                entry.cancel.store(true, Ordering::SeqCst);
            }
            if !jobs.is_empty() {
                log::debug!(
                    "Queue {}: cancelled {} outstanding jobs",
                    self.name,
                    jobs.len()
                );
            }
        }
        // Dropping the only sender ends the worker loop once the channel
        // drains.
        drop(self.submitter.sender.lock()?.take());
        let Some(worker) = self.worker.lock()?.take() else {
            return Ok(());
        };
        match worker.join() {
            Ok(res) => res,
            Err(payload) => Err(Error::new(format!(
                "Queue {} worker panicked: {}",
                self.name,
                panic_message(payload.as_ref())
            ))
            .set_kind(ErrorKind::Bug)),
        }
    }
}

impl<S> Drop for JobQueue<S> {
    fn drop(&mut self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.submitter.shutdown.store(true, Ordering::SeqCst);
        if let Ok(mut lck) = self.submitter.sender.lock() {
            lck.take();
        }
        if let Ok(mut lck) = self.worker.lock() {
            if let Some(worker) = lck.take() {
                match worker.join() {
                    Ok(Err(err)) => log::error!("Queue {} closed with error: {}", self.name, err),
                    Err(_) => log::error!("Queue {} worker panicked", self.name),
                    Ok(Ok(())) => {}
                }
            }
        }
    }
}
