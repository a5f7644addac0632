//! Converts a pytest `--json-report` document into the tree-shaped
//! [`Report`] the engine stores, so CI steps that only know how to emit
//! pytest JSON can still report into the job's log.

use gitdeploy_types::Report;
use serde::Deserialize;

#[derive(Debug, Deserialize)]
pub struct PytestResult {
    pub exitcode: i32,
    #[serde(default)]
    pub tests: Vec<PytestCase>,
}

#[derive(Debug, Deserialize)]
pub struct PytestCase {
    pub nodeid: String,
    pub outcome: String,
}

pub fn pytest_to_report(result: PytestResult) -> Report {
    let mut failed = false;
    let results = result
        .tests
        .iter()
        .map(|case| {
            if case.outcome != "passed" {
                failed = true;
            }
            Report {
                name: case.nodeid.clone(),
                status: case.outcome.clone(),
                ..Default::default()
            }
        })
        .collect();

    Report {
        name: "pytest".to_string(),
        status: if failed { "failed".to_string() } else { "passed".to_string() },
        message: Some(format!("Exited with status code {}", result.exitcode)),
        detail: None,
        results,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn all_passed_yields_passed_status() {
        let result = PytestResult {
            exitcode: 0,
            tests: vec![
                PytestCase { nodeid: "test_a".to_string(), outcome: "passed".to_string() },
                PytestCase { nodeid: "test_b".to_string(), outcome: "passed".to_string() },
            ],
        };
        let report = pytest_to_report(result);
        assert_eq!(report.status, "passed");
        assert_eq!(report.results.len(), 2);
    }

    #[test]
    fn any_non_passed_outcome_yields_failed_status() {
        let result = PytestResult {
            exitcode: 1,
            tests: vec![
                PytestCase { nodeid: "test_a".to_string(), outcome: "passed".to_string() },
                PytestCase { nodeid: "test_b".to_string(), outcome: "failed".to_string() },
            ],
        };
        let report = pytest_to_report(result);
        assert_eq!(report.status, "failed");
        assert_eq!(report.message, Some("Exited with status code 1".to_string()));
    }
}
