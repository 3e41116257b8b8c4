//! Built-in indicator catalog
//!
//! Registration order of the catalog is the order in which batch runs visit
//! indicators.

use serde::{Deserialize, Serialize};

/// Category assigned to templates that have no catalog entry
pub const UNCATEGORIZED: &str = "uncategorized";

/// One clinical quality metric
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndicatorDefinition {
    pub id: String,
    pub display_name: String,
    pub category: String,
}

impl IndicatorDefinition {
    pub fn new(
        id: impl Into<String>,
        display_name: impl Into<String>,
        category: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            display_name: display_name.into(),
            category: category.into(),
        }
    }

    /// Definition for a template id unknown to the catalog
    pub fn uncatalogued(id: &str) -> Self {
        Self::new(id, id, UNCATEGORIZED)
    }
}

/// (id, display name, category)
const CATALOG: &[(&str, &str, &str)] = &[
    ("1_percentage_died", "1. Percentage of ART patients who died", "mortality"),
    ("2_percentage_lost_to_followup", "2. Percentage of ART patients lost to follow-up", "retention"),
    ("3_reengaged_within_28", "3. Percentage of missed-appointment patients re-engaged within 28 days", "retention"),
    ("4_reengaged_over_28", "4. Percentage of lost patients re-engaged after 28 days", "retention"),
    ("5_late_visits_beyond_buffer", "5. Percentage of visits late beyond the buffer period", "retention"),
    ("6_late_visits_within_buffer", "6. Percentage of visits late within the buffer period", "retention"),
    ("7_visits_on_schedule", "7. Percentage of visits on schedule", "retention"),
    ("8_same_day_art", "8. Percentage of newly diagnosed patients initiated on ART the same day", "treatment"),
    ("9_art_1_to_7_days", "9. Percentage initiated on ART within 1-7 days", "treatment"),
    ("10_art_over_7_days", "10. Percentage initiated on ART after more than 7 days", "treatment"),
    ("11_newly_initiated", "11. Number of patients newly initiated on ART", "treatment"),
    ("12_tpt_started", "12. Percentage of eligible patients started on TPT", "prevention"),
    ("13_tpt_completed", "13. Percentage of TPT starters who completed TPT", "prevention"),
    ("14_vl_tested_12_months", "14. Percentage of patients with a viral load test in the last 12 months", "viral_load"),
    ("15_vl_suppressed", "15. Percentage of viral load tests suppressed (<1000 copies/mL)", "viral_load"),
    ("16_vl_unsuppressed_eac", "16. Percentage of unsuppressed patients receiving enhanced adherence counselling", "viral_load"),
    ("17_repeat_vl_suppressed", "17. Percentage suppressed on repeat viral load after counselling", "viral_load"),
    ("18_eac_completed", "18. Percentage of patients completing enhanced adherence counselling", "viral_load"),
    ("19_switched_second_line", "19. Percentage of confirmed failures switched to second line", "treatment"),
    ("20_multi_month_dispensing", "20. Percentage of stable patients on multi-month dispensing", "treatment"),
    ("21_tld_regimen", "21. Percentage of patients on a TLD regimen", "treatment"),
    ("22_cd4_tested_baseline", "22. Percentage of new patients with a baseline CD4 test", "clinical"),
    ("23_cd4_below_200", "23. Percentage of new patients with CD4 below 200", "clinical"),
    ("24_cotrimoxazole_prophylaxis", "24. Percentage of eligible patients on cotrimoxazole prophylaxis", "prophylaxis"),
    ("25_fluconazole_prophylaxis", "25. Percentage of eligible patients on fluconazole prophylaxis", "prophylaxis"),
    ("26_transferred_in", "26. Number of patients transferred in", "retention"),
    ("27_transferred_out", "27. Percentage of ART patients transferred out", "retention"),
    ("28_pediatric_on_art", "28. Number of children (0-14) active on ART", "treatment"),
];

/// All catalog definitions in registration order
pub fn builtin_definitions() -> Vec<IndicatorDefinition> {
    CATALOG
        .iter()
        .map(|(id, name, category)| IndicatorDefinition::new(*id, *name, *category))
        .collect()
}
