//! Validation issues, result reports and the outcome aggregator.
//!
//! The validation engine produces a [`ResultReport`] tree whose shape mirrors
//! the assertion tree that was evaluated. [`OutcomeReport::from_report`]
//! flattens that tree depth-first, drops duplicate issues while keeping the
//! first occurrence, and computes the overall outcome.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Issue severity, ordered from least to most severe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Information,
    Warning,
    Error,
    Fatal,
}

impl Severity {
    /// Whether an issue of this severity makes the outcome a failure.
    pub fn is_failure(self) -> bool {
        matches!(self, Severity::Error | Severity::Fatal)
    }
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Severity::Information => "information",
            Severity::Warning => "warning",
            Severity::Error => "error",
            Severity::Fatal => "fatal",
        };
        f.write_str(s)
    }
}

/// Broad classification of issues.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum IssueCategory {
    Structural,
    Reference,
    Binding,
    Invariant,
    Fatal,
    Profile,
}

/// Error codes for profile validation (rendered as `FS####`)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum IssueCode {
    UnknownElement = 1001,
    UnresolvableSchema = 1002,
    WrongType = 1006,
    SlicingUnmatched = 1007,
    SlicingOrder = 1008,
    SliceCardinality = 1009,
    InvariantViolation = 1010,
    CardinalityViolation = 1011,
    BindingViolation = 1012,
    FixedValueMismatch = 1013,
    PatternMismatch = 1014,
    MaxLengthExceeded = 1015,
    MinValueViolation = 1016,
    MaxValueViolation = 1017,
    IncomparableValue = 1018,
    RegexMismatch = 1019,
    InvalidCanonical = 1020,
    NoMatchingOption = 1021,
    CycleLimitExceeded = 1022,
    ExternalReferenceUnresolved = 1023,
    InvariantEvaluationFailed = 1024,
    MalformedProfile = 1025,
    Cancelled = 1026,
    InternalContractViolation = 1027,
    IncompatibleValueType = 1028,
    DuplicateInvariantKey = 1029,
}

impl IssueCode {
    pub fn category(self) -> IssueCategory {
        use IssueCode::*;
        match self {
            UnknownElement | WrongType | SlicingUnmatched | SlicingOrder | SliceCardinality
            | CardinalityViolation | FixedValueMismatch | PatternMismatch | MaxLengthExceeded
            | MinValueViolation | MaxValueViolation | IncomparableValue | RegexMismatch
            | InvalidCanonical | NoMatchingOption => IssueCategory::Structural,
            UnresolvableSchema | CycleLimitExceeded | ExternalReferenceUnresolved => {
                IssueCategory::Reference
            }
            BindingViolation => IssueCategory::Binding,
            InvariantViolation | InvariantEvaluationFailed => IssueCategory::Invariant,
            MalformedProfile | Cancelled | InternalContractViolation => IssueCategory::Fatal,
            IncompatibleValueType | DuplicateInvariantKey => IssueCategory::Profile,
        }
    }
}

impl std::fmt::Display for IssueCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "FS{:04}", *self as u32)
    }
}

/// A single validation issue.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Issue {
    pub severity: Severity,
    pub code: IssueCode,
    pub message: String,
    /// Instance location (e.g. `Patient.name[0].given[1]`)
    pub location: String,
}

impl Issue {
    /// Codes in the [`IssueCategory::Fatal`] category are always fatal,
    /// whatever severity is requested.
    pub fn new(
        severity: Severity,
        code: IssueCode,
        message: impl Into<String>,
        location: impl Into<String>,
    ) -> Self {
        let severity = match code.category() {
            IssueCategory::Fatal => Severity::Fatal,
            _ => severity,
        };
        Self {
            severity,
            code,
            message: message.into(),
            location: location.into(),
        }
    }

    pub fn error(code: IssueCode, message: impl Into<String>, location: impl Into<String>) -> Self {
        Self::new(Severity::Error, code, message, location)
    }

    pub fn warning(
        code: IssueCode,
        message: impl Into<String>,
        location: impl Into<String>,
    ) -> Self {
        Self::new(Severity::Warning, code, message, location)
    }

    pub fn fatal(code: IssueCode, message: impl Into<String>, location: impl Into<String>) -> Self {
        Self::new(Severity::Fatal, code, message, location)
    }
}

impl std::fmt::Display for Issue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "[{}] {} at {}: {}",
            self.severity, self.code, self.location, self.message
        )
    }
}

/// Overall outcome of evaluating an assertion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Outcome {
    Success,
    Failure,
}

/// One piece of evidence inside a report.
#[derive(Debug, Clone, PartialEq)]
pub enum Evidence {
    Issue(Issue),
    Report(ResultReport),
}

/// Result of evaluating an assertion (sub)tree against an instance.
#[derive(Debug, Clone, PartialEq)]
pub struct ResultReport {
    pub outcome: Outcome,
    pub evidence: Vec<Evidence>,
}

impl ResultReport {
    /// A successful report without evidence.
    pub fn success() -> Self {
        Self {
            outcome: Outcome::Success,
            evidence: Vec::new(),
        }
    }

    /// A report holding one issue; failing iff the issue is an error or fatal.
    pub fn from_issue(issue: Issue) -> Self {
        let outcome = if issue.severity.is_failure() {
            Outcome::Failure
        } else {
            Outcome::Success
        };
        Self {
            outcome,
            evidence: vec![Evidence::Issue(issue)],
        }
    }

    /// Combine reports with all-of semantics: success iff every report succeeded.
    /// Empty successful reports are dropped to keep the tree small.
    pub fn combine(reports: impl IntoIterator<Item = ResultReport>) -> Self {
        let mut outcome = Outcome::Success;
        let mut evidence = Vec::new();
        for report in reports {
            if !report.is_success() {
                outcome = Outcome::Failure;
            }
            if report.evidence.is_empty() {
                continue;
            }
            if report.evidence.len() == 1 {
                evidence.extend(report.evidence);
            } else {
                evidence.push(Evidence::Report(report));
            }
        }
        Self { outcome, evidence }
    }

    pub fn is_success(&self) -> bool {
        self.outcome == Outcome::Success
    }

    /// Whether any fatal issue occurs in this report.
    pub fn has_fatal(&self) -> bool {
        self.issues().any(|issue| issue.severity == Severity::Fatal)
    }

    /// Depth-first iterator over all issues in the report tree.
    pub fn issues(&self) -> impl Iterator<Item = &Issue> {
        let mut out = Vec::new();
        self.collect_issues(&mut out);
        out.into_iter()
    }

    fn collect_issues<'a>(&'a self, out: &mut Vec<&'a Issue>) {
        for evidence in &self.evidence {
            match evidence {
                Evidence::Issue(issue) => out.push(issue),
                Evidence::Report(report) => report.collect_issues(out),
            }
        }
    }

    /// Number of issues in the report tree.
    pub fn issue_count(&self) -> usize {
        self.issues().count()
    }
}

impl Default for ResultReport {
    fn default() -> Self {
        Self::success()
    }
}

/// Deduplicated, flattened projection of a [`ResultReport`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct OutcomeReport {
    /// Whether validation succeeded (no fatal or error issues remain)
    pub success: bool,
    /// Ordered, deduplicated issues
    #[serde(default)]
    pub issues: Vec<Issue>,
}

impl OutcomeReport {
    /// Flatten and deduplicate a report tree.
    ///
    /// When `warnings_as_errors` is set, warnings also make the outcome a failure.
    pub fn from_report(report: &ResultReport, warnings_as_errors: bool) -> Self {
        Self::from_issues(report.issues().cloned(), warnings_as_errors)
    }

    /// Build an outcome from a flat issue list, deduplicating in first-seen order.
    pub fn from_issues(issues: impl IntoIterator<Item = Issue>, warnings_as_errors: bool) -> Self {
        let mut seen = HashSet::new();
        let issues: Vec<Issue> = issues
            .into_iter()
            .filter(|issue| seen.insert(issue.clone()))
            .collect();
        let success = !issues.iter().any(|issue| {
            issue.severity.is_failure()
                || (warnings_as_errors && issue.severity == Severity::Warning)
        });
        Self { success, issues }
    }

    pub fn errors(&self) -> impl Iterator<Item = &Issue> {
        self.issues.iter().filter(|i| i.severity.is_failure())
    }

    pub fn warnings(&self) -> impl Iterator<Item = &Issue> {
        self.issues
            .iter()
            .filter(|i| i.severity == Severity::Warning)
    }

    /// Issues carrying the given code.
    pub fn with_code(&self, code: IssueCode) -> Vec<&Issue> {
        self.issues.iter().filter(|i| i.code == code).collect()
    }

    pub fn has_code(&self, code: IssueCode) -> bool {
        self.issues.iter().any(|i| i.code == code)
    }
}
