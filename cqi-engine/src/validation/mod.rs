//! Aggregate validation: rule catalog, scoring, recommendations and auto-fix

pub mod autofix;
pub mod engine;
pub mod recommendations;
pub mod rules;
pub mod score;

pub use autofix::{is_auto_fixable, AppliedFix, AUTO_FIXABLE};
pub use engine::{
    FindingStatus, OverallStatus, ValidationEngine, ValidationFinding, ValidationReport,
    ValidationRunRecord, ValidationSummary,
};
pub use recommendations::{Priority, Recommendation};
pub use rules::{catalog, RuleCategory, Severity, ValidationRule};
pub use score::{grade_for, QualityScore};
