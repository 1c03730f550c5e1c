use std::io::{self, Write};
use std::time::Instant;

use serde::Serialize;
use tracing::info;

/// Ordered, human-readable record of the steps a job went through. It is handed back to
/// the caller whether the job succeeds or fails.
#[derive(Debug)]
pub struct StatusTrail {
    echo: bool,
    t0: Instant,
    steps: Vec<StatusStep>,
}

#[derive(Clone, Debug, Serialize)]
pub struct StatusStep {
    pub elapsed: String,
    pub message: String,
}

impl StatusTrail {
    /// `echo` additionally prints each step to stderr.
    pub fn new(echo: bool) -> Self {
        Self {
            echo,
            t0: Instant::now(),
            steps: Vec::new(),
        }
    }

    pub fn step(&mut self, msg: impl Into<String>) {
        let message = msg.into();
        let elapsed = fmt_elapsed(self.t0.elapsed().as_secs_f64());
        info!(elapsed = %elapsed, "{message}");
        if self.echo {
            let mut stderr = io::stderr().lock();
            let _ = writeln!(stderr, "[{elapsed}] {message}");
        }
        self.steps.push(StatusStep { elapsed, message });
    }

    pub fn progress(&mut self, label: &str, current: usize, total: usize) {
        let total = total.max(1);
        let current = current.min(total);
        let pct = (current as f64 / total as f64) * 100.0;
        self.step(format!("{label} {current}/{total} ({pct:5.1}%)"));
    }

    pub fn messages(&self) -> Vec<String> {
        self.steps.iter().map(|s| s.message.clone()).collect()
    }

    pub fn into_steps(self) -> Vec<StatusStep> {
        self.steps
    }
}

fn fmt_elapsed(seconds: f64) -> String {
    let seconds = seconds.max(0.0) as u64;
    let h = seconds / 3600;
    let m = (seconds % 3600) / 60;
    let s = seconds % 60;
    if h > 0 {
        format!("{h:02}:{m:02}:{s:02}")
    } else {
        format!("{m:02}:{s:02}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn steps_are_kept_in_order() {
        let mut trail = StatusTrail::new(false);
        trail.step("load");
        trail.progress("patch", 3, 4);
        trail.progress("patch", 9, 0);
        assert_eq!(
            trail.messages(),
            vec!["load", "patch 3/4 ( 75.0%)", "patch 1/1 (100.0%)"]
        );
    }

    #[test]
    fn elapsed_format() {
        assert_eq!(fmt_elapsed(65.0), "01:05");
        assert_eq!(fmt_elapsed(3725.0), "01:02:05");
    }
}
