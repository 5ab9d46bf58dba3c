//! Step templates: a task's declared kind expands into a fixed list of
//! steps at submission time.

use serde_json::Value;
use workcell_core::{StepAction, TaskSpec, TaskStep};

const DEFAULT_SETTLE_MS: u64 = 1000;

/// Generate the step list for a task spec.
///
/// Known kinds get their fixed template; anything else becomes exactly one
/// generic `evaluate` step carrying the free-text instructions. Missing
/// parameters are passed through as empty strings and surface later as soft
/// `missing_param` step failures.
pub fn steps_for(spec: &TaskSpec) -> Vec<TaskStep> {
    match spec.kind.as_str() {
        "web_scrape" => web_scrape_steps(&spec.params),
        "form_fill" => form_fill_steps(&spec.params),
        "api_request" => api_request_steps(&spec.params),
        _ => generic_steps(&spec.params),
    }
}

fn str_param(params: &Value, key: &str) -> String {
    params
        .get(key)
        .and_then(|v| v.as_str())
        .unwrap_or_default()
        .to_string()
}

fn web_scrape_steps(params: &Value) -> Vec<TaskStep> {
    let url = str_param(params, "url");
    let selector = params
        .get("selector")
        .and_then(|v| v.as_str())
        .unwrap_or("body")
        .to_string();
    vec![
        TaskStep::new(StepAction::Navigate { url }),
        TaskStep::new(StepAction::Wait {
            duration_ms: DEFAULT_SETTLE_MS,
        }),
        TaskStep::new(StepAction::Extract {
            selector,
            attribute: None,
        }),
        TaskStep::new(StepAction::Screenshot { full_page: true }),
    ]
}

fn form_fill_steps(params: &Value) -> Vec<TaskStep> {
    let url = str_param(params, "url");
    let mut steps = vec![
        TaskStep::new(StepAction::Navigate { url }),
        TaskStep::new(StepAction::Wait {
            duration_ms: DEFAULT_SETTLE_MS,
        }),
    ];

    // Relies on serde_json's preserve_order feature: fields are typed in
    // the order the caller declared them.
    if let Some(fields) = params.get("fields").and_then(|v| v.as_object()) {
        for (selector, value) in fields {
            steps.push(TaskStep::new(StepAction::Type {
                selector: selector.clone(),
                text: value.as_str().unwrap_or_default().to_string(),
            }));
        }
    }

    let submit = params
        .get("submitSelector")
        .and_then(|v| v.as_str())
        .unwrap_or("button[type=submit]")
        .to_string();
    steps.push(TaskStep::new(StepAction::Click { selector: submit }));
    steps
}

fn api_request_steps(params: &Value) -> Vec<TaskStep> {
    vec![TaskStep::new(StepAction::HttpRequest {
        url: str_param(params, "url"),
        method: params
            .get("method")
            .and_then(|v| v.as_str())
            .unwrap_or("GET")
            .to_string(),
        body: params.get("body").cloned(),
    })]
}

fn generic_steps(params: &Value) -> Vec<TaskStep> {
    let instructions = params
        .get("instructions")
        .and_then(|v| v.as_str())
        .unwrap_or("no instructions provided")
        .to_string();
    vec![TaskStep::new(StepAction::Evaluate {
        script: instructions,
    })]
}
