//! Event dispatch - routes decoded events to detectors, ancestry tracking and
//! the publisher for one analysis task

use crate::events::{
    Event, File, NetworkFlow, Process, Registry, RegistryValue, ScriptExecution,
};
use crate::notify::{
    FileBody, JavascriptBody, NetflowBody, Notification, ProcessBody, ProcessMeta, RegistryBody,
    SignatureBody,
};
use crate::plugins::{Detection, Detector, Publisher, TriggerSink};
use crate::process_tree::SharedProcessTree;
use base64::prelude::*;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// Dispatch statistics
#[derive(Debug, Clone, Default)]
pub struct DispatchStats {
    /// Events dispatched
    pub events: u64,
    /// Detections forwarded
    pub detections: u64,
    /// Notifications the publisher rejected
    pub publish_errors: u64,
    /// Script events with no meaningful hook
    pub scripts_ignored: u64,
}

/// Per-task dispatcher
pub struct Dispatcher {
    task_id: u64,
    detectors: Vec<Box<dyn Detector>>,
    tree: SharedProcessTree,
    publisher: Arc<dyn Publisher>,
    detections: mpsc::UnboundedReceiver<Detection>,
    stats: DispatchStats,
}

impl Dispatcher {
    /// Create a dispatcher for a task. Detectors are wired to the trigger sink
    /// and initialised in registration order.
    pub fn new(
        task_id: u64,
        mut detectors: Vec<Box<dyn Detector>>,
        tree: SharedProcessTree,
        publisher: Arc<dyn Publisher>,
    ) -> Self {
        let (sink, detections) = TriggerSink::channel();
        for detector in &mut detectors {
            detector.set_trigger(sink.clone());
            detector.init();
        }

        Self {
            task_id,
            detectors,
            tree,
            publisher,
            detections,
            stats: DispatchStats::default(),
        }
    }

    pub fn task_id(&self) -> u64 {
        self.task_id
    }

    pub fn stats(&self) -> &DispatchStats {
        &self.stats
    }

    /// Dispatch one event
    pub async fn dispatch(&mut self, event: Event) {
        self.stats.events += 1;

        match event {
            Event::Process(process) => self.process(process).await,
            Event::File(file) => self.file(file).await,
            Event::Registry(registry) => self.registry(registry).await,
            Event::NetworkFlow(flow) => self.network_flow(flow).await,
            Event::Script(script) => self.script(script).await,
        }
    }

    async fn process(&mut self, process: Process) {
        self.tree.lock().track(process.clone());

        for detector in &mut self.detectors {
            detector.process(&process);
        }

        let body = ProcessBody {
            task_id: self.task_id,
            ts: process.ts,
            pid: process.pid,
            ppid: process.ppid,
            status: process.status_name(),
            image: process.image,
            command: process.command,
            orig: process.orig,
        };
        self.emit(Notification::Process(body)).await;

        self.forward_detections().await;
    }

    async fn file(&mut self, file: File) {
        let body = FileBody {
            task_id: self.task_id,
            ts: file.ts,
            pid: file.pid,
            operation: file.operation(),
            dstpath: file.destination().map(str::to_string),
            path: file.srcpath,
        };
        self.emit(Notification::File(body)).await;
    }

    async fn registry(&mut self, registry: Registry) {
        let operation = registry.operation();
        let (valuei, values) = match registry.registry_kind().map(|kind| kind.value()) {
            Some(RegistryValue::Integer) => (Some(registry.valuei), None),
            Some(RegistryValue::Text) => (None, Some(registry.values)),
            Some(RegistryValue::Binary) => {
                (None, Some(BASE64_STANDARD.encode(&registry.valued)))
            }
            Some(RegistryValue::None) => (None, None),
            // Unknown operation, forward whatever the monitor sent
            None => (Some(registry.valuei), Some(registry.values)),
        };

        let body = RegistryBody {
            task_id: self.task_id,
            ts: registry.ts,
            pid: registry.pid,
            operation,
            path: registry.path,
            valuei,
            values,
        };
        self.emit(Notification::Registry(body)).await;
    }

    async fn network_flow(&mut self, flow: NetworkFlow) {
        let process = self.process_meta(flow.pid);
        let body = NetflowBody {
            task_id: self.task_id,
            ts: Some(flow.ts),
            proto: flow.proto,
            srcip: flow.source().to_string(),
            dstip: flow.destination().to_string(),
            srcport: flow.srcport,
            dstport: flow.dstport,
            process,
        };
        self.emit(Notification::Netflow(body)).await;
    }

    async fn script(&mut self, script: ScriptExecution) {
        let Some(code) = script.code() else {
            self.stats.scripts_ignored += 1;
            return;
        };

        let body = JavascriptBody {
            task_id: self.task_id,
            code: code.code.to_string(),
            meta: code.context.unwrap_or_default().to_string(),
            process: self.process_meta(script.pid()),
        };
        self.emit(Notification::Javascript(body)).await;
    }

    /// Best-effort process metadata; untracked pids yield nothing
    fn process_meta(&self, pid: u64) -> Option<ProcessMeta> {
        let tree = self.tree.lock();
        let process = tree.get(pid)?;
        Some(ProcessMeta {
            pid: process.pid,
            ppid: process.ppid,
            image: process.image.clone(),
            parent_image: tree.parent(pid).map(|parent| parent.image.clone()),
        })
    }

    async fn forward_detections(&mut self) {
        while let Ok(detection) = self.detections.try_recv() {
            self.stats.detections += 1;
            debug!(
                task_id = self.task_id,
                signature = %detection.signature,
                "Detection raised"
            );
            let body = SignatureBody {
                task_id: self.task_id,
                signature: detection.signature,
                description: detection.description,
                ioc: detection.ioc,
            };
            self.emit(Notification::Signature(body)).await;
        }
    }

    async fn emit(&mut self, notification: Notification) {
        if let Err(e) = self.publisher.publish(notification).await {
            self.stats.publish_errors += 1;
            warn!(
                task_id = self.task_id,
                "Publisher {} failed: {}",
                self.publisher.name(),
                e
            );
        }
    }
}
