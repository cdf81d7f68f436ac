//! Signature detectors for Sandwatch
//!
//! Detectors are registered in a fixed order; every task gets a fresh set.

pub mod allowlist;
pub mod child_process;

pub use child_process::ChildProcess;

use sandwatch_core::plugins::Detector;

/// Build the registered detectors for a new task
pub fn detectors() -> Vec<Box<dyn Detector>> {
    vec![Box::new(ChildProcess::new())]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registration_order() {
        let names: Vec<String> = detectors().iter().map(|d| d.name().to_string()).collect();
        assert_eq!(names, vec!["child_process"]);
    }
}
