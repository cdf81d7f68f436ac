//! Child process legitimacy check
//!
//! Flags any process started by a tracked process unless it is one of the
//! helpers its parent browser is known to spawn, or a generally benign utility.

use crate::allowlist::{
    browser_for, is_generic_child, IE_CLEAR_TRACKS, INTERNET_EXPLORER, RUNDLL32,
};
use sandwatch_core::events::{Process, ProcessStatus};
use sandwatch_core::plugins::{Detector, TriggerSink};
use std::collections::HashMap;
use tracing::{debug, trace};

pub const SIGNATURE: &str = "child_process";
pub const DESCRIPTION: &str = "A malicious process was started";

/// Detector for unexpected child processes
#[derive(Debug, Default)]
pub struct ChildProcess {
    trigger: Option<TriggerSink>,
    images: HashMap<u64, String>,
}

impl ChildProcess {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether `process` is an expected child of `parent_image`
    fn is_whitelisted(process: &Process, parent_image: &str) -> bool {
        if let Some(browser) = browser_for(parent_image) {
            if browser.allows_child(&process.image) {
                debug!("Whitelisted {} child: {}", browser.name, process.image);
                return true;
            }
            if browser.name == INTERNET_EXPLORER.name
                && process.image == RUNDLL32
                && IE_CLEAR_TRACKS.is_match(&process.command)
            {
                debug!("Whitelisted {} child: {}", browser.name, process.image);
                return true;
            }
        }

        if is_generic_child(&process.image) {
            debug!("Whitelisted generic: {}", process.image);
            return true;
        }

        false
    }
}

impl Detector for ChildProcess {
    fn name(&self) -> &str {
        SIGNATURE
    }

    fn set_trigger(&mut self, trigger: TriggerSink) {
        self.trigger = Some(trigger);
    }

    fn init(&mut self) {
        self.images = HashMap::new();
    }

    fn process(&mut self, process: &Process) {
        match process.process_status() {
            Some(ProcessStatus::New) => {}
            Some(ProcessStatus::Terminated) => {
                self.images.remove(&process.pid);
                return;
            }
            Some(ProcessStatus::Existing) | Some(ProcessStatus::Ignore) => return,
            None => {
                trace!(pid = process.pid, status = process.status, "Unknown process status");
                return;
            }
        }

        self.images.insert(process.pid, process.image.clone());

        // Browsers are the expected roots of an analysis
        if browser_for(&process.image).is_some() {
            return;
        }

        // Untracked parent, not enough context to judge
        let Some(parent_image) = self.images.get(&process.ppid) else {
            return;
        };

        if Self::is_whitelisted(process, parent_image) {
            return;
        }

        if let Some(trigger) = &self.trigger {
            trigger.trigger(SIGNATURE, DESCRIPTION, process.command.clone());
        }
    }
}
