//! Result normalizer
//!
//! Indicator queries return differently shaped rows (a mortality query reports
//! `Deaths`, a viral-load query `VL_Suppressed`, and so on). Every row is mapped
//! onto one fixed `CanonicalResult`: absent or unreadable columns become zero,
//! unknown columns are dropped, and the children/adults totals are always
//! derived from the sex × age breakdown.

use serde::{Deserialize, Serialize};

use crate::sites::{RawRow, RawValue};

/// Uniform indicator result record
///
/// Field names serialize as the column names indicator queries use.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CanonicalResult {
    #[serde(rename = "Indicator")]
    pub indicator: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub indicator_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    #[serde(rename = "TOTAL")]
    pub total: i64,
    #[serde(rename = "Numerator")]
    pub numerator: i64,
    #[serde(rename = "Denominator")]
    pub denominator: i64,
    #[serde(rename = "Percentage")]
    pub percentage: f64,

    #[serde(rename = "Male_0_14")]
    pub male_0_14: i64,
    #[serde(rename = "Female_0_14")]
    pub female_0_14: i64,
    #[serde(rename = "Male_over_14")]
    pub male_over_14: i64,
    #[serde(rename = "Female_over_14")]
    pub female_over_14: i64,
    #[serde(rename = "Children_Total")]
    pub children_total: i64,
    #[serde(rename = "Adults_Total")]
    pub adults_total: i64,

    #[serde(rename = "Deaths")]
    pub deaths: i64,
    #[serde(rename = "Lost_to_Followup")]
    pub lost_to_followup: i64,
    #[serde(rename = "Reengaged_Within_28")]
    pub reengaged_within_28: i64,
    #[serde(rename = "Reengaged_Over_28")]
    pub reengaged_over_28: i64,
    #[serde(rename = "Late_Visits_Beyond_Buffer")]
    pub late_visits_beyond_buffer: i64,
    #[serde(rename = "Late_Visits_Within_Buffer")]
    pub late_visits_within_buffer: i64,
    #[serde(rename = "Visits_On_Schedule")]
    pub visits_on_schedule: i64,
    #[serde(rename = "Total_Visits")]
    pub total_visits: i64,

    #[serde(rename = "Same_Day_ART")]
    pub same_day_art: i64,
    #[serde(rename = "ART_1_7_Days")]
    pub art_1_7_days: i64,
    #[serde(rename = "ART_Over_7_Days")]
    pub art_over_7_days: i64,
    #[serde(rename = "New_Initiated")]
    pub new_initiated: i64,

    #[serde(rename = "TPT_Started")]
    pub tpt_started: i64,
    #[serde(rename = "TPT_Completed")]
    pub tpt_completed: i64,

    #[serde(rename = "VL_Tested")]
    pub vl_tested: i64,
    #[serde(rename = "VL_Suppressed")]
    pub vl_suppressed: i64,
    #[serde(rename = "VL_Unsuppressed")]
    pub vl_unsuppressed: i64,
    #[serde(rename = "EAC_Received")]
    pub eac_received: i64,
    #[serde(rename = "EAC_Completed")]
    pub eac_completed: i64,
    #[serde(rename = "Repeat_VL_Suppressed")]
    pub repeat_vl_suppressed: i64,

    #[serde(rename = "Switched_Second_Line")]
    pub switched_second_line: i64,
    #[serde(rename = "MMD_Patients")]
    pub mmd_patients: i64,
    #[serde(rename = "TLD_Patients")]
    pub tld_patients: i64,

    #[serde(rename = "CD4_Tested")]
    pub cd4_tested: i64,
    #[serde(rename = "CD4_Below_200")]
    pub cd4_below_200: i64,
    #[serde(rename = "Cotrimoxazole_Given")]
    pub cotrimoxazole_given: i64,
    #[serde(rename = "Fluconazole_Given")]
    pub fluconazole_given: i64,

    #[serde(rename = "Transferred_In")]
    pub transferred_in: i64,
    #[serde(rename = "Transferred_Out")]
    pub transferred_out: i64,
}

/// Map one raw row onto the canonical schema
///
/// Never fails. The demographic totals are recomputed even when the row
/// carries its own `Children_Total` / `Adults_Total`.
pub fn normalize(row: &RawRow) -> CanonicalResult {
    let r = RowReader(row);

    let mut result = CanonicalResult {
        indicator: r.text(&["Indicator"]),
        indicator_id: String::new(),
        error: None,

        total: r.count(&["TOTAL", "Total"]),
        numerator: r.count(&["Numerator", "numerator"]),
        denominator: r.count(&["Denominator", "denominator"]),
        percentage: r.percentage(&["Percentage", "percentage", "Percent"]),

        male_0_14: r.count(&["Male_0_14"]),
        female_0_14: r.count(&["Female_0_14"]),
        male_over_14: r.count(&["Male_over_14"]),
        female_over_14: r.count(&["Female_over_14"]),
        children_total: 0,
        adults_total: 0,

        deaths: r.count(&["Deaths"]),
        lost_to_followup: r.count(&["Lost_to_Followup", "LTFU"]),
        reengaged_within_28: r.count(&["Reengaged_Within_28"]),
        reengaged_over_28: r.count(&["Reengaged_Over_28"]),
        late_visits_beyond_buffer: r.count(&["Late_Visits_Beyond_Buffer"]),
        late_visits_within_buffer: r.count(&["Late_Visits_Within_Buffer"]),
        visits_on_schedule: r.count(&["Visits_On_Schedule", "On_Schedule_Visits"]),
        total_visits: r.count(&["Total_Visits"]),

        same_day_art: r.count(&["Same_Day_ART"]),
        art_1_7_days: r.count(&["ART_1_7_Days"]),
        art_over_7_days: r.count(&["ART_Over_7_Days"]),
        new_initiated: r.count(&["New_Initiated", "Newly_Initiated"]),

        tpt_started: r.count(&["TPT_Started"]),
        tpt_completed: r.count(&["TPT_Completed"]),

        vl_tested: r.count(&["VL_Tested"]),
        vl_suppressed: r.count(&["VL_Suppressed"]),
        vl_unsuppressed: r.count(&["VL_Unsuppressed"]),
        eac_received: r.count(&["EAC_Received"]),
        eac_completed: r.count(&["EAC_Completed"]),
        repeat_vl_suppressed: r.count(&["Repeat_VL_Suppressed"]),

        switched_second_line: r.count(&["Switched_Second_Line"]),
        mmd_patients: r.count(&["MMD_Patients"]),
        tld_patients: r.count(&["TLD_Patients"]),

        cd4_tested: r.count(&["CD4_Tested"]),
        cd4_below_200: r.count(&["CD4_Below_200"]),
        cotrimoxazole_given: r.count(&["Cotrimoxazole_Given"]),
        fluconazole_given: r.count(&["Fluconazole_Given"]),

        transferred_in: r.count(&["Transferred_In"]),
        transferred_out: r.count(&["Transferred_Out"]),
    };
    result.derive_totals();
    result
}

impl CanonicalResult {
    /// Zero-metric stand-in for an indicator whose execution failed
    pub fn placeholder(display_name: &str, indicator_id: &str, error: impl Into<String>) -> Self {
        Self {
            indicator: display_name.to_string(),
            indicator_id: indicator_id.to_string(),
            error: Some(error.into()),
            ..Self::default()
        }
    }

    /// Recompute children/adults totals from the sex × age breakdown
    pub fn derive_totals(&mut self) {
        self.children_total = self.male_0_14.saturating_add(self.female_0_14);
        self.adults_total = self.male_over_14.saturating_add(self.female_over_14);
    }

    /// Recompute `percentage` from numerator/denominator (two decimals)
    pub fn recompute_percentage(&mut self) {
        self.percentage = percentage_of(self.numerator, self.denominator);
    }

    /// Add every count of `other` into `self`
    ///
    /// Percentage is left untouched; callers recompute it once accumulation
    /// is complete.
    pub fn accumulate(&mut self, other: &CanonicalResult) {
        macro_rules! add {
            ($($field:ident),* $(,)?) => {
                $( self.$field = self.$field.saturating_add(other.$field); )*
            };
        }
        add!(
            total,
            numerator,
            denominator,
            male_0_14,
            female_0_14,
            male_over_14,
            female_over_14,
            deaths,
            lost_to_followup,
            reengaged_within_28,
            reengaged_over_28,
            late_visits_beyond_buffer,
            late_visits_within_buffer,
            visits_on_schedule,
            total_visits,
            same_day_art,
            art_1_7_days,
            art_over_7_days,
            new_initiated,
            tpt_started,
            tpt_completed,
            vl_tested,
            vl_suppressed,
            vl_unsuppressed,
            eac_received,
            eac_completed,
            repeat_vl_suppressed,
            switched_second_line,
            mmd_patients,
            tld_patients,
            cd4_tested,
            cd4_below_200,
            cotrimoxazole_given,
            fluconazole_given,
            transferred_in,
            transferred_out,
        );
        self.derive_totals();
    }

    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }
}

/// `numerator * 100 / denominator` rounded to two decimals; 0 when denominator is 0
pub fn percentage_of(numerator: i64, denominator: i64) -> f64 {
    if denominator == 0 {
        return 0.0;
    }
    round2(numerator as f64 * 100.0 / denominator as f64)
}

pub fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// Column lookup with synonym and case-insensitive fallback
struct RowReader<'a>(&'a RawRow);

impl RowReader<'_> {
    /// First non-null value among `names`, exact match first
    fn lookup(&self, names: &[&str]) -> Option<&RawValue> {
        for name in names {
            if let Some(value) = self.0.get(*name) {
                if !value.is_null() {
                    return Some(value);
                }
            }
        }
        names.iter().find_map(|name| {
            self.0
                .iter()
                .find(|(column, value)| column.eq_ignore_ascii_case(name) && !value.is_null())
                .map(|(_, value)| value)
        })
    }

    fn count(&self, names: &[&str]) -> i64 {
        match self.lookup(names) {
            Some(RawValue::Int(v)) => *v,
            Some(RawValue::Float(v)) if v.is_finite() => v.round() as i64,
            Some(RawValue::Text(text)) => parse_count(text),
            _ => 0,
        }
    }

    fn percentage(&self, names: &[&str]) -> f64 {
        match self.lookup(names) {
            Some(RawValue::Int(v)) => *v as f64,
            Some(RawValue::Float(v)) if v.is_finite() => *v,
            Some(RawValue::Text(text)) => text
                .trim()
                .trim_end_matches('%')
                .trim()
                .parse::<f64>()
                .ok()
                .filter(|v| v.is_finite())
                .unwrap_or(0.0),
            _ => 0.0,
        }
    }

    fn text(&self, names: &[&str]) -> String {
        match self.lookup(names) {
            Some(RawValue::Text(text)) => text.clone(),
            Some(RawValue::Int(v)) => v.to_string(),
            Some(RawValue::Float(v)) => v.to_string(),
            _ => String::new(),
        }
    }
}

fn parse_count(text: &str) -> i64 {
    let text = text.trim();
    if let Ok(v) = text.parse::<i64>() {
        return v;
    }
    if text.eq_ignore_ascii_case("true") {
        return 1;
    }
    match text.parse::<f64>() {
        Ok(v) if v.is_finite() => v.round() as i64,
        _ => 0,
    }
}
