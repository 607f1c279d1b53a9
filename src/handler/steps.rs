//! Task steps and the typed outcomes they hand back to the driver.

/// A named step of the task sequence.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Step {
    CheckPermission,
    ReadInput,
    PerformOperation,
    ReturnOutput,
}

impl Step {
    pub const DEFAULT: [Step; 4] = [
        Step::CheckPermission,
        Step::ReadInput,
        Step::PerformOperation,
        Step::ReturnOutput,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Step::CheckPermission => "check_permission",
            Step::ReadInput => "read_input",
            Step::PerformOperation => "perform_operation",
            Step::ReturnOutput => "return_output",
        }
    }

    pub fn from_name(name: &str) -> Option<Step> {
        Step::DEFAULT.into_iter().find(|s| s.name() == name)
    }

    /// Steps named by the `task` list. Unknown names are skipped; an empty
    /// result falls back to the default sequence.
    pub fn sequence(tasks: &[String]) -> Vec<Step> {
        let steps: Vec<Step> = tasks
            .iter()
            .filter_map(|t| {
                let step = Step::from_name(t.trim());
                if step.is_none() {
                    tracing::warn!(task = %t, "unknown task step, skipping");
                }
                step
            })
            .collect();
        if steps.is_empty() {
            Step::DEFAULT.to_vec()
        } else {
            steps
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SignalKind {
    NotFound,
    AuthRequired,
    ServerError,
}

/// A failure outcome with its detail and an optional view to render instead
/// of the default for its kind.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Signal {
    pub kind: SignalKind,
    pub detail: String,
    pub view: Option<String>,
}

impl Signal {
    fn new(kind: SignalKind, detail: impl Into<String>) -> Self {
        Signal {
            kind,
            detail: detail.into(),
            view: None,
        }
    }

    pub fn not_found(detail: impl Into<String>) -> Self {
        Signal::new(SignalKind::NotFound, detail)
    }

    pub fn auth_required(detail: impl Into<String>) -> Self {
        Signal::new(SignalKind::AuthRequired, detail)
    }

    pub fn server_error(detail: impl Into<String>) -> Self {
        Signal::new(SignalKind::ServerError, detail)
    }

    pub fn with_view(mut self, view: &str) -> Self {
        self.view = Some(view.to_string());
        self
    }
}

/// What a step tells the driver.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Flow {
    Continue,
    /// Stop and render now.
    Finish {
        view: Option<String>,
        message: Option<String>,
    },
    Fail(Signal),
    Redirect(String),
}

impl Flow {
    pub fn not_found(detail: impl Into<String>) -> Flow {
        Flow::Fail(Signal::not_found(detail))
    }

    pub fn auth_required(detail: impl Into<String>) -> Flow {
        Flow::Fail(Signal::auth_required(detail))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn task_list_overrides_the_sequence() {
        let tasks = vec!["read_input".to_string(), "bogus".to_string(), "return_output".to_string()];
        assert_eq!(Step::sequence(&tasks), vec![Step::ReadInput, Step::ReturnOutput]);
        assert_eq!(Step::sequence(&["nope".to_string()]), Step::DEFAULT.to_vec());
        assert_eq!(Step::sequence(&[]), Step::DEFAULT.to_vec());
    }
}
