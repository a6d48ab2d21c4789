use std::collections::HashMap;
use std::sync::Arc;

use bytes::Bytes;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use zl_manifest::{Module, ModuleId, ZiplineFile};

use crate::error::Error;
use crate::fetch::FetchPipeline;
use crate::listener::{LoadListener, NoopListener};
use crate::sink::LinkerContext;

/// A pluggable pre-link step: the base spec represents signatures in the manifest but does not
/// wire verification into the loader. A caller that needs it supplies one of these; `None` (the
/// default) skips verification entirely.
pub type SignatureVerifier = Arc<dyn Fn(&zl_manifest::Manifest) -> Result<(), Error> + Send + Sync>;

/// Caller-supplied knobs for a single [`Loader::load`] call.
pub struct LoadOptions {
    pub app_name: String,
    pub listener: Arc<dyn LoadListener>,
    pub verify_signatures: Option<SignatureVerifier>,
}

impl LoadOptions {
    pub fn new(app_name: impl Into<String>) -> Self {
        Self {
            app_name: app_name.into(),
            listener: Arc::new(NoopListener),
            verify_signatures: None,
        }
    }
}

#[derive(Clone)]
enum TaskOutcome {
    Pending,
    Done,
    Failed(Arc<Error>),
}

/// Orchestrates a manifest's modules into the engine in dependency order, overlapping fetch with
/// link: every module's fetch starts immediately, only the link step waits on upstream
/// dependencies' link completion.
pub struct Loader {
    pipeline: Arc<FetchPipeline>,
}

impl Loader {
    pub fn new(pipeline: Arc<FetchPipeline>) -> Self {
        Self { pipeline }
    }

    pub async fn load(
        &self,
        linker: Arc<LinkerContext>,
        manifest_url: &str,
        options: LoadOptions,
    ) -> Result<(), Error> {
        let manifest = self
            .pipeline
            .fetch_manifest(manifest_url, options.listener.as_ref(), &options.app_name)
            .await?;

        if let Some(verify) = &options.verify_signatures {
            if let Err(e) = verify(&manifest) {
                options
                    .listener
                    .on_signature_verification_failed(&options.app_name, &e);
                return Err(e);
            }
        }

        let token = CancellationToken::new();
        let mut receivers: HashMap<ModuleId, watch::Receiver<TaskOutcome>> = HashMap::new();
        let mut handles = Vec::with_capacity(manifest.modules().len());

        for (module_id, module) in manifest.modules() {
            let (tx, rx) = watch::channel(TaskOutcome::Pending);
            let dep_rxs: Vec<_> = module
                .depends_on_ids
                .iter()
                .map(|dep| {
                    receivers
                        .get(dep)
                        .cloned()
                        .expect("manifest invariant M1 guarantees deps precede dependents")
                })
                .collect();
            receivers.insert(module_id.clone(), rx);

            let pipeline = self.pipeline.clone();
            let linker = linker.clone();
            let listener = options.listener.clone();
            let app_name = options.app_name.clone();
            let token = token.clone();
            let module = module.clone();
            let module_id = module_id.clone();
            let manifest_url = manifest_url.to_string();

            handles.push(tokio::spawn(async move {
                let result = run_task(
                    &pipeline,
                    &linker,
                    &manifest_url,
                    &module_id,
                    &module,
                    dep_rxs,
                    token.clone(),
                )
                .await;
                if let Err(e) = &result {
                    listener.on_module_failed(&app_name, &module_id, e);
                    token.cancel();
                    let _ = tx.send(TaskOutcome::Failed(Arc::new(clone_for_dependents(e))));
                } else {
                    let _ = tx.send(TaskOutcome::Done);
                }
                result
            }));
        }

        let mut first_err = None;
        for handle in handles {
            match handle.await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    first_err.get_or_insert(e);
                }
                Err(_join_err) => {
                    first_err.get_or_insert(Error::Cancelled);
                }
            }
        }
        match first_err {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

/// `Error` can't derive `Clone` (it wraps non-`Clone` `reqwest`/`rusqlite` errors), but
/// dependents only need to know *that* an upstream failed and be able to report it, not the exact
/// original value, so this renders it down to a stable, cloneable summary.
fn clone_for_dependents(e: &Error) -> Error {
    Error::DependencyFailed(Arc::new(match e {
        Error::DependencyFailed(inner) => return Error::DependencyFailed(inner.clone()),
        other => Error::EngineError {
            module_id: String::new(),
            message: other.to_string(),
        },
    }))
}

async fn run_task(
    pipeline: &Arc<FetchPipeline>,
    linker: &Arc<LinkerContext>,
    manifest_url: &str,
    module_id: &ModuleId,
    module: &Module,
    mut deps: Vec<watch::Receiver<TaskOutcome>>,
    token: CancellationToken,
) -> Result<(), Error> {
    let bytes = tokio::select! {
        biased;
        _ = token.cancelled() => return Err(Error::Cancelled),
        result = pipeline.resolve_module_bytes(manifest_url, module) => result?,
    };

    let zipline = ZiplineFile::read_from(&mut bytes.as_slice())?;

    for dep in &mut deps {
        tokio::select! {
            biased;
            _ = token.cancelled() => return Err(Error::Cancelled),
            result = wait_for_dependency(dep) => result?,
        }
    }

    tokio::select! {
        biased;
        _ = token.cancelled() => Err(Error::Cancelled),
        result = linker.install(module_id.clone(), Bytes::from(zipline.bytecode)) => result,
    }
}

async fn wait_for_dependency(rx: &mut watch::Receiver<TaskOutcome>) -> Result<(), Error> {
    loop {
        {
            let outcome = rx.borrow();
            match &*outcome {
                TaskOutcome::Done => return Ok(()),
                TaskOutcome::Failed(e) => return Err(Error::DependencyFailed(e.clone())),
                TaskOutcome::Pending => {}
            }
        }
        if rx.changed().await.is_err() {
            return Err(Error::Cancelled);
        }
    }
}
