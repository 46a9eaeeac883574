//! Job graph scheduler
//!
//! A composite run is one parent job (the weighted sum) with one child job
//! per layer (its normalization). Children run in the background on an
//! [`Executor`] and report back over a channel; the parent is dispatched
//! once every child has reached a terminal state, over the children that
//! succeeded.
//!
//! The scheduler itself is single-threaded: job records are only touched
//! from [`Scheduler::poll`], [`Scheduler::wait`] and [`Scheduler::cancel`].

mod executor;
mod job;

pub use executor::{Executor, Task, ThreadExecutor};
#[cfg(feature = "parallel")]
pub use executor::RayonExecutor;
pub use job::{CancelToken, Completion, JobId, JobInfo, JobStatus};

use crossbeam_channel::{unbounded, Receiver, Sender};
use std::collections::BTreeMap;
use std::panic::{self, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use suitability_core::io::{Metadata, META_AUTHOR, META_DESCRIPTION};
use suitability_core::DataType;

use crate::algebra::MAX_INPUTS;
use crate::composite::{self, SumParams};
use crate::config::EngineConfig;
use crate::error::{EngineError, Result};
use crate::layer::{clean_name, short_name, Plan};
use crate::normalize::{self, NormalizeParams};
use crate::stats::WindowedStatsEngine;
use crate::LOG_TARGET;
use job::{Event, JobKind, JobRecord};

type CompletionCallback = Box<dyn FnMut(&Completion) + Send>;

/// A composite run to schedule
#[derive(Debug, Clone)]
pub struct CompositeRequest {
    pub plan: Plan,
    /// Final weighted-sum raster
    pub output: PathBuf,
    /// No-data of the final raster; NaN when `None`
    pub nodata: Option<f64>,
    pub data_type: DataType,
}

pub struct Scheduler {
    executor: Arc<dyn Executor>,
    stats: WindowedStatsEngine,
    config: EngineConfig,
    jobs: BTreeMap<JobId, JobRecord>,
    next_id: u64,
    tx: Sender<Event>,
    rx: Receiver<Event>,
    on_completion: Option<CompletionCallback>,
}

impl Scheduler {
    pub fn new(executor: Arc<dyn Executor>, stats: WindowedStatsEngine, config: EngineConfig) -> Self {
        let (tx, rx) = unbounded();
        Self {
            executor,
            stats,
            config,
            jobs: BTreeMap::new(),
            next_id: 1,
            tx,
            rx,
            on_completion: None,
        }
    }

    /// Called once for every job that reaches a terminal state
    pub fn on_completion(&mut self, callback: impl FnMut(&Completion) + Send + 'static) {
        self.on_completion = Some(Box::new(callback));
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Schedule a composite run and return the parent job.
    ///
    /// Children are dispatched immediately; the parent waits for them.
    pub fn submit(&mut self, request: CompositeRequest) -> Result<JobId> {
        let CompositeRequest {
            plan,
            output,
            nodata,
            data_type,
        } = request;

        if plan.layers.is_empty() {
            return Err(EngineError::NoViableLayers(
                "the plan has no layers".to_string(),
            ));
        }
        if plan.layers.len() > MAX_INPUTS {
            return Err(EngineError::TooManyInputs {
                max: MAX_INPUTS,
                got: plan.layers.len(),
            });
        }
        if plan.window.is_empty() {
            return Err(EngineError::EmptyWindowIntersection);
        }

        let parent_id = self.alloc_id();
        let description = format!("Weighted Sum of {} normalized rasters", plan.layers.len());
        info!(target: LOG_TARGET, "Starting parent task \"{}\"", description);

        let params = SumParams {
            weights: None,
            window: None,
            nodata,
            data_type,
            metadata: Metadata::new(),
        };
        let mut parent = JobRecord::new(parent_id, description, JobKind::Composite { params }, None);
        parent.target = Some(output);
        self.jobs.insert(parent_id, parent);

        let mut children = Vec::with_capacity(plan.layers.len());
        for planned in &plan.layers {
            let id = self.alloc_id();
            let values = planned.args.values_string();
            let mut description = format!("Normalize {} {}", short_name(&planned.name), planned.method);
            let mut tag = format!("{} {}", clean_name(&planned.name), planned.method);
            if !values.is_empty() {
                description.push(' ');
                description.push_str(&values);
                tag.push(' ');
                tag.push_str(&clean_name(&values));
            }

            let mut metadata = Metadata::new();
            metadata.insert(META_DESCRIPTION.to_string(), tag);
            metadata.insert(META_AUTHOR.to_string(), self.config.author.clone());

            let params = NormalizeParams {
                method: planned.method,
                args: planned.args.clone(),
                range: planned.range,
                window: Some(plan.window),
                nodata: None,
                data_type: self.config.intermediate_dtype,
                metadata,
            };
            let kind = JobKind::Normalize {
                input: planned.filepath.clone(),
                params,
                weight: planned.weight,
                name: clean_name(&planned.name),
            };

            info!(
                target: LOG_TARGET,
                "Adding task \"{}\". Weight: {}%",
                description,
                planned.weight
            );
            self.jobs
                .insert(id, JobRecord::new(id, description, kind, Some(parent_id)));
            children.push(id);
        }
        if let Some(parent) = self.jobs.get_mut(&parent_id) {
            parent.children = children.clone();
        }

        // Every child is registered before any of them can finish
        for id in children {
            self.dispatch_child(id);
        }
        Ok(parent_id)
    }

    /// Apply every pending job event without blocking; returns how many
    /// were applied
    pub fn poll(&mut self) -> usize {
        let mut applied = 0;
        while let Ok(event) = self.rx.try_recv() {
            self.apply(event);
            applied += 1;
        }
        applied
    }

    /// Block until `id` reaches a terminal state
    pub fn wait(&mut self, id: JobId) -> Result<JobStatus> {
        loop {
            match self.status(id) {
                None => return Err(EngineError::UnknownJob(id.0)),
                Some(status) if status.is_terminal() => return Ok(status),
                Some(_) => {}
            }
            match self.rx.recv() {
                Ok(event) => self.apply(event),
                Err(_) => return Err(EngineError::Canceled),
            }
        }
    }

    /// Cancel a job.
    ///
    /// Canceling a parent cancels its unfinished children and it never
    /// starts. Canceling a child drops its contribution from the sum.
    /// Terminal jobs are left alone.
    pub fn cancel(&mut self, id: JobId) -> Result<()> {
        let (status, parent, children) = match self.jobs.get(&id) {
            Some(rec) => (rec.status, rec.parent, rec.children.clone()),
            None => return Err(EngineError::UnknownJob(id.0)),
        };
        if status.is_terminal() {
            return Ok(());
        }

        match parent {
            None => {
                for child in children {
                    if self.status(child).is_some_and(|s| !s.is_terminal()) {
                        self.mark_canceled(child);
                    }
                }
                let dispatched = self.jobs.get(&id).is_some_and(|r| r.dispatched);
                self.mark_canceled(id);
                // A dispatched sum may still read the intermediates; its
                // late result triggers the cleanup
                if !dispatched {
                    self.cleanup_children(id);
                }
            }
            Some(parent) => {
                self.mark_canceled(id);
                self.check_barrier(parent);
            }
        }
        Ok(())
    }

    pub fn status(&self, id: JobId) -> Option<JobStatus> {
        self.jobs.get(&id).map(|r| r.status)
    }

    pub fn job(&self, id: JobId) -> Option<JobInfo> {
        self.jobs.get(&id).map(JobRecord::info)
    }

    pub fn children(&self, id: JobId) -> Vec<JobId> {
        self.jobs
            .get(&id)
            .map(|r| r.children.clone())
            .unwrap_or_default()
    }

    /// No job is pending or running
    pub fn is_idle(&self) -> bool {
        self.jobs.values().all(|r| r.status.is_terminal())
    }

    fn alloc_id(&mut self) -> JobId {
        let id = JobId(self.next_id);
        self.next_id += 1;
        id
    }

    fn dispatch_child(&mut self, id: JobId) {
        let target = match self
            .config
            .temp_file("norm_")
            .and_then(|f| f.into_temp_path().keep().map_err(|e| e.error))
        {
            Ok(path) => path,
            Err(e) => {
                self.finish(id, Err(format!("cannot create temporary file: {}", e)));
                return;
            }
        };

        let Some(rec) = self.jobs.get_mut(&id) else {
            return;
        };
        let (input, params) = match &rec.kind {
            JobKind::Normalize { input, params, .. } => (input.clone(), params.clone()),
            JobKind::Composite { .. } => return,
        };
        rec.target = Some(target.clone());
        rec.dispatched = true;

        let token = rec.token.clone();
        let stats = self.stats.clone();
        let tx = self.tx.clone();
        debug!(target: LOG_TARGET, "Dispatching {} \"{}\"", id, rec.description);

        self.executor.execute(Box::new(move || {
            run_job(id, &tx, &token, || {
                normalize::normalize(&stats, &input, &target, &params).map(|o| o.path)
            })
        }));
    }

    fn dispatch_composite(&mut self, id: JobId, inputs: Vec<PathBuf>, weights: Vec<f64>, names: Vec<String>) {
        let author = self.config.author.clone();
        let source = Arc::clone(self.stats.source());
        let tx = self.tx.clone();

        let Some(rec) = self.jobs.get_mut(&id) else {
            return;
        };
        let JobKind::Composite { params } = &mut rec.kind else {
            return;
        };
        let Some(output) = rec.target.clone() else {
            return;
        };

        params.weights = Some(weights.clone());
        params.metadata.insert(
            META_DESCRIPTION.to_string(),
            format!("Summary: {}", composite::summary(&weights, &names)),
        );
        params.metadata.insert(META_AUTHOR.to_string(), author);

        let params = params.clone();
        rec.dispatched = true;
        let token = rec.token.clone();
        debug!(target: LOG_TARGET, "Dispatching {} \"{}\"", id, rec.description);

        self.executor.execute(Box::new(move || {
            run_job(id, &tx, &token, || {
                composite::weighted_sum(source.as_ref(), &inputs, &output, &params).map(|o| o.path)
            })
        }));
    }

    fn apply(&mut self, event: Event) {
        match event {
            Event::Started(id) => {
                if let Some(rec) = self.jobs.get_mut(&id) {
                    if rec.status == JobStatus::Pending {
                        rec.status = JobStatus::Running;
                        debug!(target: LOG_TARGET, "Task \"{}\" started", rec.description);
                    }
                }
            }
            Event::Finished { id, outcome } => {
                let Some(rec) = self.jobs.get(&id) else {
                    warn!(target: LOG_TARGET, "Result for unknown job {}", id);
                    return;
                };
                if rec.status.is_terminal() {
                    info!(
                        target: LOG_TARGET,
                        "Discarding late result of task \"{}\"",
                        rec.description
                    );
                    if let Ok(path) = &outcome {
                        remove_file(path);
                    }
                    if rec.parent.is_none() {
                        self.cleanup_children(id);
                    }
                    return;
                }
                self.finish(id, outcome);
            }
        }
    }

    fn finish(&mut self, id: JobId, outcome: std::result::Result<PathBuf, String>) {
        let Some(rec) = self.jobs.get_mut(&id) else {
            return;
        };
        match outcome {
            Ok(path) => {
                rec.status = JobStatus::Succeeded;
                info!(
                    target: LOG_TARGET,
                    outcome = "success",
                    "Task \"{}\" finished: {}",
                    rec.description,
                    path.display()
                );
                rec.output = Some(path);
            }
            Err(reason) => {
                rec.status = JobStatus::Failed;
                warn!(
                    target: LOG_TARGET,
                    "Task \"{}\" finished unsuccessfully",
                    rec.description
                );
                error!(
                    target: LOG_TARGET,
                    "Task \"{}\" failed: {}",
                    rec.description,
                    reason
                );
                if rec.parent.is_some() {
                    if let Some(target) = &rec.target {
                        remove_file(target);
                    }
                }
                rec.error = Some(reason);
            }
        }
        let parent = rec.parent;
        self.notify(id);

        match parent {
            Some(parent) => self.check_barrier(parent),
            None => self.cleanup_children(id),
        }
    }

    fn mark_canceled(&mut self, id: JobId) {
        let Some(rec) = self.jobs.get_mut(&id) else {
            return;
        };
        rec.status = JobStatus::Canceled;
        rec.token.cancel();
        info!(target: LOG_TARGET, "Task \"{}\" canceled", rec.description);
        if rec.parent.is_some() {
            if let Some(target) = &rec.target {
                remove_file(target);
            }
        }
        self.notify(id);
    }

    /// Dispatch or fail the parent once every child is terminal
    fn check_barrier(&mut self, parent: JobId) {
        let Some(rec) = self.jobs.get(&parent) else {
            return;
        };
        if rec.status != JobStatus::Pending {
            return;
        }
        let children: Vec<&JobRecord> = rec
            .children
            .iter()
            .filter_map(|c| self.jobs.get(c))
            .collect();
        if children.iter().any(|c| !c.status.is_terminal()) {
            return;
        }

        if let Some(failed) = children.iter().find(|c| c.status == JobStatus::Failed) {
            let reason = EngineError::ChildJobFailed {
                description: failed.description.clone(),
                reason: failed.error.clone().unwrap_or_default(),
            };
            self.finish(parent, Err(reason.to_string()));
            return;
        }

        let canceled = children
            .iter()
            .filter(|c| c.status == JobStatus::Canceled)
            .count();
        let mut inputs = Vec::new();
        let mut weights = Vec::new();
        let mut names = Vec::new();
        for child in children.iter().filter(|c| c.status == JobStatus::Succeeded) {
            if let (Some(path), JobKind::Normalize { weight, name, .. }) = (&child.output, &child.kind) {
                inputs.push(path.clone());
                weights.push(*weight);
                names.push(name.clone());
            }
        }

        if inputs.is_empty() {
            let reason = EngineError::NoViableLayers("every subtask was canceled".to_string());
            self.finish(parent, Err(reason.to_string()));
            return;
        }
        if canceled > 0 {
            info!(
                target: LOG_TARGET,
                "Dropping {} canceled subtask(s) from the weighted sum",
                canceled
            );
        }
        self.dispatch_composite(parent, inputs, weights, names);
    }

    /// Delete the intermediates of a terminal parent
    fn cleanup_children(&mut self, parent: JobId) {
        if self.config.keep_intermediates {
            return;
        }
        let children = self.children(parent);
        for child in children {
            if let Some(rec) = self.jobs.get(&child) {
                if let Some(path) = &rec.output {
                    remove_file(path);
                }
            }
        }
    }

    fn notify(&mut self, id: JobId) {
        let Some(rec) = self.jobs.get(&id) else {
            return;
        };
        let completion = rec.completion();
        if let Some(callback) = self.on_completion.as_mut() {
            callback(&completion);
        }
    }
}

/// Run `job` on the current thread and report the outcome.
///
/// A panic in the job is reported as a failure.
fn run_job<F>(id: JobId, tx: &Sender<Event>, token: &CancelToken, job: F)
where
    F: FnOnce() -> Result<PathBuf>,
{
    if token.is_canceled() {
        let _ = tx.send(Event::Finished {
            id,
            outcome: Err(EngineError::Canceled.to_string()),
        });
        return;
    }
    let _ = tx.send(Event::Started(id));

    let outcome = match panic::catch_unwind(AssertUnwindSafe(job)) {
        Ok(Ok(path)) => Ok(path),
        Ok(Err(e)) => Err(e.to_string()),
        Err(payload) => {
            let message = payload
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| payload.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "unknown panic".to_string());
            Err(format!("job panicked: {}", message))
        }
    };
    let _ = tx.send(Event::Finished { id, outcome });
}

fn remove_file(path: &Path) {
    if let Err(e) = std::fs::remove_file(path) {
        if e.kind() != std::io::ErrorKind::NotFound {
            warn!(target: LOG_TARGET, "Cannot remove {}: {}", path.display(), e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::executor::ManualExecutor;
    use super::*;
    use crate::catalog::{MethodArgs, UtilityKind};
    use crate::layer::PlannedLayer;
    use approx::assert_relative_eq;
    use std::sync::Mutex;
    use suitability_core::io::{read_geotiff, read_metadata, write_geotiff, GeoTiffSource};
    use suitability_core::{Extent, GeoTransform, Raster};
    use tempfile::{tempdir, TempDir};

    struct Fixture {
        dir: TempDir,
        executor: Arc<ManualExecutor>,
        scheduler: Scheduler,
        completions: Arc<Mutex<Vec<Completion>>>,
    }

    impl Fixture {
        fn new() -> Self {
            let dir = tempdir().unwrap();
            let config = EngineConfig {
                temp_dir: Some(dir.path().to_path_buf()),
                intermediate_dtype: DataType::Float64,
                ..EngineConfig::default()
            };
            let executor = Arc::new(ManualExecutor::default());
            let stats = WindowedStatsEngine::new(Arc::new(GeoTiffSource), &config);
            let mut scheduler = Scheduler::new(executor.clone(), stats, config);
            let completions = Arc::new(Mutex::new(Vec::new()));
            let sink = completions.clone();
            scheduler.on_completion(move |c| sink.lock().unwrap().push(c.clone()));
            Self {
                dir,
                executor,
                scheduler,
                completions,
            }
        }

        /// 3x4 raster with values `offset + 0..12`
        fn raster(&self, name: &str, offset: f64) -> PathBuf {
            let data: Vec<f64> = (0..12).map(|v| v as f64 + offset).collect();
            let mut raster = Raster::from_vec(data, 3, 4).unwrap();
            raster.set_transform(GeoTransform::new(0.0, 3.0, 1.0, -1.0));
            raster.set_nodata(Some(-1.0));
            let path = self.dir.path().join(format!("{}.tif", name));
            write_geotiff(&raster, &path, None).unwrap();
            path
        }

        fn layer(&self, name: &str, weight: f64) -> PlannedLayer {
            PlannedLayer {
                id: name.to_string(),
                name: name.to_string(),
                filepath: self.raster(name, 0.0),
                method: UtilityKind::StepUp,
                args: MethodArgs::Threshold(6.0),
                range: None,
                weight,
            }
        }

        fn request(&self, layers: Vec<PlannedLayer>) -> CompositeRequest {
            CompositeRequest {
                plan: Plan {
                    layers,
                    window: Extent::new(0.0, 0.0, 4.0, 3.0),
                    excluded: Vec::new(),
                },
                output: self.dir.path().join("suitability.tif"),
                nodata: Some(-9999.0),
                data_type: DataType::Float64,
            }
        }

        fn intermediates(&self) -> usize {
            std::fs::read_dir(self.dir.path())
                .unwrap()
                .filter(|e| {
                    e.as_ref()
                        .unwrap()
                        .file_name()
                        .to_string_lossy()
                        .starts_with("norm_")
                })
                .count()
        }

        fn drain(&mut self) {
            loop {
                self.executor.run_all();
                if self.scheduler.poll() == 0 {
                    break;
                }
            }
        }
    }

    #[test]
    fn test_pipeline_succeeds() {
        let mut fx = Fixture::new();
        let layers = vec![fx.layer("slope", 40.0), fx.layer("soil", 60.0)];
        let request = fx.request(layers);
        let output = request.output.clone();
        let parent = fx.scheduler.submit(request).unwrap();

        let children = fx.scheduler.children(parent);
        assert_eq!(children.len(), 2);
        assert_eq!(fx.executor.len(), 2);
        let info = fx.scheduler.job(children[0]).unwrap();
        assert_eq!(info.description, "Normalize slope stepup 6");
        assert_eq!(
            fx.scheduler.job(parent).unwrap().description,
            "Weighted Sum of 2 normalized rasters"
        );

        fx.drain();
        assert_eq!(fx.scheduler.status(parent), Some(JobStatus::Succeeded));
        assert!(fx.scheduler.is_idle());

        let r: Raster<f64> = read_geotiff(&output).unwrap();
        // 0..5 below threshold, 6..11 above
        assert_relative_eq!(r.get(0, 0).unwrap(), 0.0);
        assert_relative_eq!(r.get(2, 3).unwrap(), 1.0, epsilon = 1e-12);
        assert_eq!(r.nodata(), Some(-9999.0));

        let meta = read_metadata(&output).unwrap();
        assert_eq!(
            meta.get(META_DESCRIPTION).map(String::as_str),
            Some("Summary: 0.40000 x slope + 0.60000 x soil")
        );
        assert_eq!(fx.intermediates(), 0);

        let completions = fx.completions.lock().unwrap();
        assert_eq!(completions.len(), 3);
        assert!(completions.iter().all(|c| c.success));
        assert_eq!(completions.last().unwrap().job, parent);
    }

    #[test]
    fn test_keep_intermediates() {
        let mut fx = Fixture::new();
        fx.scheduler.config.keep_intermediates = true;
        let request = fx.request(vec![fx.layer("a", 100.0)]);
        let parent = fx.scheduler.submit(request).unwrap();
        fx.drain();
        assert_eq!(fx.scheduler.status(parent), Some(JobStatus::Succeeded));

        let child = fx.scheduler.children(parent)[0];
        let path = fx.scheduler.job(child).unwrap().output.unwrap();
        let meta = read_metadata(&path).unwrap();
        assert_eq!(meta.get(META_DESCRIPTION).map(String::as_str), Some("a stepup 6"));
        assert_eq!(fx.intermediates(), 1);
    }

    #[test]
    fn test_cancel_parent_cascades() {
        let mut fx = Fixture::new();
        let request = fx.request(vec![fx.layer("a", 50.0), fx.layer("b", 50.0)]);
        let output = request.output.clone();
        let parent = fx.scheduler.submit(request).unwrap();

        fx.scheduler.cancel(parent).unwrap();
        for child in fx.scheduler.children(parent) {
            assert_eq!(fx.scheduler.status(child), Some(JobStatus::Canceled));
        }
        assert_eq!(fx.scheduler.status(parent), Some(JobStatus::Canceled));

        // Queued children see the token and stop; the parent never runs
        fx.drain();
        assert_eq!(fx.scheduler.status(parent), Some(JobStatus::Canceled));
        assert_eq!(fx.executor.len(), 0);
        assert!(!output.exists());
        assert_eq!(fx.intermediates(), 0);
    }

    #[test]
    fn test_cancel_dispatched_sum_defers_cleanup() {
        let mut fx = Fixture::new();
        let request = fx.request(vec![fx.layer("a", 50.0), fx.layer("b", 50.0)]);
        let output = request.output.clone();
        let parent = fx.scheduler.submit(request).unwrap();

        fx.executor.run_all();
        fx.scheduler.poll();
        // Both children done, the sum is queued but hasn't started
        assert_eq!(fx.executor.len(), 1);
        assert_eq!(fx.scheduler.status(parent), Some(JobStatus::Pending));

        fx.scheduler.cancel(parent).unwrap();
        assert_eq!(fx.scheduler.status(parent), Some(JobStatus::Canceled));
        assert_eq!(fx.intermediates(), 2);

        fx.drain();
        assert_eq!(fx.intermediates(), 0);
        assert!(!output.exists());
    }

    #[test]
    fn test_late_sum_output_is_removed() {
        let mut fx = Fixture::new();
        let request = fx.request(vec![fx.layer("a", 50.0)]);
        let output = request.output.clone();
        let parent = fx.scheduler.submit(request).unwrap();

        fx.executor.run_all();
        fx.scheduler.poll();
        // The sum writes its output before the cancel is seen
        assert!(fx.executor.run_next());
        assert!(output.exists());
        fx.scheduler.cancel(parent).unwrap();

        fx.scheduler.poll();
        assert_eq!(fx.scheduler.status(parent), Some(JobStatus::Canceled));
        assert!(fx.scheduler.job(parent).unwrap().output.is_none());
        assert!(!output.exists());
        assert_eq!(fx.intermediates(), 0);
    }

    #[test]
    fn test_cancel_child_drops_its_weight() {
        let mut fx = Fixture::new();
        let request = fx.request(vec![fx.layer("a", 40.0), fx.layer("b", 60.0)]);
        let output = request.output.clone();
        let parent = fx.scheduler.submit(request).unwrap();
        let children = fx.scheduler.children(parent);

        fx.scheduler.cancel(children[1]).unwrap();
        fx.drain();

        assert_eq!(fx.scheduler.status(parent), Some(JobStatus::Succeeded));
        let r: Raster<f64> = read_geotiff(&output).unwrap();
        // Only 0.4 x a remains, not rebalanced
        assert_relative_eq!(r.get(2, 3).unwrap(), 0.4, epsilon = 1e-12);
        let meta = read_metadata(&output).unwrap();
        assert_eq!(
            meta.get(META_DESCRIPTION).map(String::as_str),
            Some("Summary: 0.40000 x a")
        );
    }

    #[test]
    fn test_all_children_canceled() {
        let mut fx = Fixture::new();
        let request = fx.request(vec![fx.layer("a", 50.0), fx.layer("b", 50.0)]);
        let output = request.output.clone();
        let parent = fx.scheduler.submit(request).unwrap();

        for child in fx.scheduler.children(parent) {
            fx.scheduler.cancel(child).unwrap();
        }
        assert_eq!(fx.scheduler.status(parent), Some(JobStatus::Failed));
        let error = fx.scheduler.job(parent).unwrap().error.unwrap();
        assert!(error.contains("every subtask was canceled"), "{}", error);

        fx.drain();
        assert!(!output.exists());
    }

    #[test]
    fn test_late_result_is_discarded() {
        let mut fx = Fixture::new();
        let request = fx.request(vec![fx.layer("a", 50.0), fx.layer("b", 50.0)]);
        let parent = fx.scheduler.submit(request).unwrap();
        let children = fx.scheduler.children(parent);

        // The first child completes before the cancel is seen
        assert!(fx.executor.run_next());
        fx.scheduler.cancel(children[0]).unwrap();
        fx.scheduler.poll();

        assert_eq!(fx.scheduler.status(children[0]), Some(JobStatus::Canceled));
        assert!(fx.scheduler.job(children[0]).unwrap().output.is_none());

        fx.drain();
        assert_eq!(fx.scheduler.status(parent), Some(JobStatus::Succeeded));
        assert_eq!(fx.intermediates(), 0);
    }

    #[test]
    fn test_child_failure_fails_parent() {
        let mut fx = Fixture::new();
        let mut missing = fx.layer("gone", 50.0);
        missing.filepath = fx.dir.path().join("gone-missing.tif");
        let request = fx.request(vec![fx.layer("a", 50.0), missing]);
        let output = request.output.clone();
        let parent = fx.scheduler.submit(request).unwrap();

        fx.drain();
        assert_eq!(fx.scheduler.status(parent), Some(JobStatus::Failed));
        let error = fx.scheduler.job(parent).unwrap().error.unwrap();
        assert!(error.contains("Normalize gone stepup 6"), "{}", error);
        assert!(!output.exists());
        assert_eq!(fx.intermediates(), 0);

        let completions = fx.completions.lock().unwrap();
        let last = completions.last().unwrap();
        assert_eq!(last.job, parent);
        assert!(!last.success);
    }

    #[test]
    fn test_submit_rejects_empty_plans() {
        let mut fx = Fixture::new();
        let empty = fx.request(Vec::new());
        let err = fx.scheduler.submit(empty).unwrap_err();
        assert!(matches!(err, EngineError::NoViableLayers(_)));

        let mut request = fx.request(vec![fx.layer("a", 50.0)]);
        request.plan.window = Extent::new(5.0, 5.0, 5.0, 5.0);
        let err = fx.scheduler.submit(request).unwrap_err();
        assert!(matches!(err, EngineError::EmptyWindowIntersection));
        assert!(fx.scheduler.is_idle());
        assert_eq!(fx.executor.len(), 0);
    }

    #[test]
    fn test_unknown_job() {
        let mut fx = Fixture::new();
        assert!(matches!(
            fx.scheduler.cancel(JobId(42)),
            Err(EngineError::UnknownJob(42))
        ));
        assert!(fx.scheduler.status(JobId(42)).is_none());
    }

    #[test]
    fn test_panicking_job_reports_failure() {
        let (tx, rx) = unbounded();
        run_job(JobId(7), &tx, &CancelToken::default(), || panic!("boom"));

        assert!(matches!(rx.try_recv().unwrap(), Event::Started(JobId(7))));
        match rx.try_recv().unwrap() {
            Event::Finished { id, outcome } => {
                assert_eq!(id, JobId(7));
                assert!(outcome.unwrap_err().contains("boom"));
            }
            other => panic!("unexpected event {:?}", other),
        }
    }

    #[test]
    fn test_wait_with_threads() {
        let dir = tempdir().unwrap();
        let config = EngineConfig {
            temp_dir: Some(dir.path().to_path_buf()),
            ..EngineConfig::default()
        };
        let stats = WindowedStatsEngine::new(Arc::new(GeoTiffSource), &config);
        let mut scheduler = Scheduler::new(Arc::new(ThreadExecutor), stats, config);

        let fx = Fixture::new();
        let mut request = fx.request(vec![fx.layer("a", 100.0)]);
        request.output = dir.path().join("out.tif");
        let parent = scheduler.submit(request).unwrap();

        assert_eq!(scheduler.wait(parent).unwrap(), JobStatus::Succeeded);
        assert!(dir.path().join("out.tif").exists());
    }
}
