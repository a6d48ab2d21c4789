use bytes::Bytes;
use tokio::sync::{mpsc, oneshot};

use zl_manifest::ModuleId;

use crate::error::Error;

/// The host JavaScript engine, treated as an opaque sink that accepts compiled bytecode for a
/// module id. Implementations are not assumed to be thread-safe; [`LinkerContext`] is what
/// guarantees calls land on a single dispatcher thread.
pub trait EngineSink: Send + Sync {
    fn install(&self, module_id: &ModuleId, bytecode: &[u8]) -> Result<(), String>;
}

struct LinkRequest {
    module_id: ModuleId,
    bytecode: Bytes,
    respond: oneshot::Sender<Result<(), Error>>,
}

/// The single designated execution context engine sink calls happen on. Implemented as a
/// dedicated OS thread running a single-threaded Tokio runtime that drains an `mpsc` channel --
/// the `#[tokio::main(flavor = "current_thread")]` idiom used throughout the pack's binaries
/// (`peoci/src/bin/ocidist.rs`, `peimage-service/src/main.rs`), generalized from "the whole
/// process is single-threaded" to "one dedicated actor thread is single-threaded, fetch and link
/// stay concurrent on the general pool."
pub struct LinkerContext {
    tx: Option<mpsc::UnboundedSender<LinkRequest>>,
    handle: Option<std::thread::JoinHandle<()>>,
}

impl LinkerContext {
    pub fn spawn(sink: Box<dyn EngineSink>) -> Self {
        let (tx, mut rx) = mpsc::unbounded_channel::<LinkRequest>();
        let handle = std::thread::Builder::new()
            .name("zl-linker".to_string())
            .spawn(move || {
                let rt = tokio::runtime::Builder::new_current_thread()
                    .enable_all()
                    .build()
                    .expect("failed to build linker runtime");
                rt.block_on(async move {
                    while let Some(req) = rx.recv().await {
                        let result =
                            sink.install(&req.module_id, &req.bytecode)
                                .map_err(|message| Error::EngineError {
                                    module_id: req.module_id.to_string(),
                                    message,
                                });
                        let _ = req.respond.send(result);
                    }
                });
            })
            .expect("failed to spawn linker thread");
        Self {
            tx: Some(tx),
            handle: Some(handle),
        }
    }

    pub async fn install(&self, module_id: ModuleId, bytecode: Bytes) -> Result<(), Error> {
        let (respond_tx, respond_rx) = oneshot::channel();
        self.tx
            .as_ref()
            .expect("LinkerContext used after drop")
            .send(LinkRequest {
                module_id: module_id.clone(),
                bytecode,
                respond: respond_tx,
            })
            .map_err(|_| Error::EngineError {
                module_id: module_id.to_string(),
                message: "linker dispatcher is gone".to_string(),
            })?;
        respond_rx.await.map_err(|_| Error::EngineError {
            module_id: module_id.to_string(),
            message: "linker dropped the response channel".to_string(),
        })?
    }
}

impl Drop for LinkerContext {
    fn drop(&mut self) {
        self.tx.take();
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    type InstallLog = Arc<Mutex<Vec<(String, Vec<u8>)>>>;

    struct RecordingSink {
        installs: InstallLog,
    }

    impl EngineSink for RecordingSink {
        fn install(&self, module_id: &ModuleId, bytecode: &[u8]) -> Result<(), String> {
            self.installs
                .lock()
                .unwrap()
                .push((module_id.to_string(), bytecode.to_vec()));
            Ok(())
        }
    }

    struct RejectingSink;

    impl EngineSink for RejectingSink {
        fn install(&self, _module_id: &ModuleId, _bytecode: &[u8]) -> Result<(), String> {
            Err("engine refused module".to_string())
        }
    }

    #[tokio::test]
    async fn installs_are_serialized_and_recorded() {
        let installs = Arc::new(Mutex::new(Vec::new()));
        let linker = LinkerContext::spawn(Box::new(RecordingSink {
            installs: installs.clone(),
        }));

        linker
            .install(ModuleId::new("alpha"), Bytes::from_static(b"abc"))
            .await
            .unwrap();
        linker
            .install(ModuleId::new("bravo"), Bytes::from_static(b"def"))
            .await
            .unwrap();

        let recorded = installs.lock().unwrap();
        assert_eq!(
            *recorded,
            vec![
                ("alpha".to_string(), b"abc".to_vec()),
                ("bravo".to_string(), b"def".to_vec()),
            ]
        );
    }

    #[tokio::test]
    async fn engine_rejection_surfaces_as_engine_error() {
        let linker = LinkerContext::spawn(Box::new(RejectingSink));
        let err = linker
            .install(ModuleId::new("alpha"), Bytes::from_static(b"abc"))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::EngineError { .. }));
    }
}
