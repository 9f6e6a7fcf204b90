//! Deploy scripts.
//!
//! A script is an ordered list of steps, each an action plus the simulated
//! time it takes. Two actions render from live state when they run: the
//! `Released vN` banner and the final "app is live" line.

use std::time::Duration;

/// Public URL prefix of deployed applications.
pub const LIVE_URL_BASE: &str = "https://berahost.up.railway.app";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepAction {
    /// Emit a fixed build log line.
    Log(String),
    /// Emit `Released v{count + 1}` using the release count at emission time.
    ReleaseBanner,
    /// Emit `-----> App is live at <base>/<app_id>`.
    LiveBanner,
    /// Abort the deploy with this reason.
    Fail(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Step {
    pub action: StepAction,
    pub delay: Duration,
}

impl Step {
    pub fn log(line: impl Into<String>, delay: Duration) -> Self {
        Self {
            action: StepAction::Log(line.into()),
            delay,
        }
    }
}

const STANDARD_LINES: &[&str] = &[
    "-----> Building source...",
    "-----> Cloning repository...",
    "-----> Detected environment: Node.js",
    "-----> Installing dependencies...",
    "       Running: npm install",
    "       Added 452 packages in 4s",
    "-----> Building assets...",
    "       Running: npm run build",
    "       Build successful (1.2s)",
    "-----> Discovering process types",
    "       Procfile declares types: web",
    "-----> Compressing...",
    "       Done: 42.5MB",
    "-----> Launching...",
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeployScript {
    steps: Vec<Step>,
}

impl DeployScript {
    pub fn new(steps: Vec<Step>) -> Self {
        Self { steps }
    }

    /// The standard Node.js build: 16 lines, `delay` apart.
    pub fn standard(delay: Duration) -> Self {
        let mut steps: Vec<Step> = STANDARD_LINES
            .iter()
            .map(|line| Step::log(*line, delay))
            .collect();
        steps.push(Step {
            action: StepAction::ReleaseBanner,
            delay,
        });
        steps.push(Step {
            action: StepAction::LiveBanner,
            delay,
        });
        Self { steps }
    }

    /// Insert a failing step before position `index` (clamped to the end).
    pub fn with_failure_at(mut self, index: usize, reason: impl Into<String>) -> Self {
        let index = index.min(self.steps.len());
        self.steps.insert(
            index,
            Step {
                action: StepAction::Fail(reason.into()),
                delay: Duration::ZERO,
            },
        );
        self
    }

    pub fn steps(&self) -> &[Step] {
        &self.steps
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn standard_script_shape() {
        let script = DeployScript::standard(Duration::from_millis(800));
        assert_eq!(script.len(), 16);
        assert_eq!(
            script.steps()[0].action,
            StepAction::Log("-----> Building source...".into())
        );
        assert_eq!(script.steps()[14].action, StepAction::ReleaseBanner);
        assert_eq!(script.steps()[15].action, StepAction::LiveBanner);
        assert!(script.steps().iter().all(|s| s.delay == Duration::from_millis(800)));
    }

    #[test]
    fn failure_insertion_is_clamped() {
        let script = DeployScript::standard(Duration::ZERO).with_failure_at(100, "boom");
        assert_eq!(script.len(), 17);
        assert_eq!(script.steps()[16].action, StepAction::Fail("boom".into()));

        let early = DeployScript::standard(Duration::ZERO).with_failure_at(3, "npm exploded");
        assert_eq!(early.steps()[3].action, StepAction::Fail("npm exploded".into()));
    }
}
