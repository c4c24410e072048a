//! # Logical Table Mapping
//!
//! The lookup table mapping a logical table "type" to the physical table that
//! backs it. Data-source-backed rows resolve through the dashboard domain's
//! naming scheme; dashboard-owned aggregate tables keep their raw names. The
//! mapping is refreshed by upsert at the start of every run so new rows never
//! need to be added by hand on production servers.

use serde::{Deserialize, Serialize};

/// One static row of the mapping registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TableMapping {
    pub table_type: &'static str,
    pub name: &'static str,
    /// Whether the physical name is resolved through the configurable
    /// data-source naming scheme or used verbatim.
    pub is_datasource: bool,
}

/// A mapping row with its physical name resolved for a concrete domain,
/// ready for upsert.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolvedTableMapping {
    pub table_type: String,
    pub table_name: String,
}

pub const TABLE_NAME_MAPPINGS: [TableMapping; 18] = [
    TableMapping { table_type: "awc_location", name: "static-awc_location", is_datasource: true },
    TableMapping { table_type: "daily_feeding", name: "static-daily_feeding_forms", is_datasource: true },
    TableMapping { table_type: "household", name: "static-household_cases", is_datasource: true },
    TableMapping { table_type: "infrastructure", name: "static-infrastructure_form", is_datasource: true },
    TableMapping { table_type: "person", name: "static-person_cases_v3", is_datasource: true },
    TableMapping { table_type: "usage", name: "static-usage_forms", is_datasource: true },
    TableMapping { table_type: "vhnd", name: "static-vhnd_form", is_datasource: true },
    TableMapping { table_type: "complementary_feeding", name: "icds_dashboard_comp_feed_form", is_datasource: false },
    TableMapping { table_type: "aww_user", name: "static-commcare_user_cases", is_datasource: true },
    TableMapping { table_type: "child_tasks", name: "static-child_tasks_cases", is_datasource: true },
    TableMapping { table_type: "pregnant_tasks", name: "static-pregnant-tasks_cases", is_datasource: true },
    TableMapping { table_type: "thr_form", name: "icds_dashboard_child_health_thr_forms", is_datasource: false },
    TableMapping { table_type: "child_list", name: "static-child_health_cases", is_datasource: true },
    TableMapping { table_type: "ccs_record_list", name: "static-ccs_record_cases", is_datasource: true },
    TableMapping { table_type: "ls_vhnd", name: "static-ls_vhnd_form", is_datasource: true },
    TableMapping { table_type: "ls_home_visits", name: "static-ls_home_visit_forms_filled", is_datasource: true },
    TableMapping { table_type: "ls_awc_mgt", name: "static-awc_mgt_forms", is_datasource: true },
    TableMapping { table_type: "cbe_form", name: "static-cbe_form", is_datasource: true },
];

/// Physical table name for one mapping row under `domain`.
pub fn physical_table_name(domain: &str, mapping: &TableMapping) -> String {
    if mapping.is_datasource {
        format!("{}_{}", domain, mapping.name)
    } else {
        mapping.name.to_owned()
    }
}

/// The full mapping resolved for `domain`, in registry order.
pub fn mapping_rows(domain: &str) -> Vec<ResolvedTableMapping> {
    TABLE_NAME_MAPPINGS
        .iter()
        .map(|mapping| ResolvedTableMapping {
            table_type: mapping.table_type.to_owned(),
            table_name: physical_table_name(domain, mapping),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn mapping_types_are_unique() {
        let types: HashSet<_> = TABLE_NAME_MAPPINGS.iter().map(|m| m.table_type).collect();
        assert_eq!(types.len(), TABLE_NAME_MAPPINGS.len());
    }

    #[test]
    fn datasource_rows_are_domain_prefixed_and_dashboard_rows_are_not() {
        let rows = mapping_rows("icds-cas");
        assert_eq!(rows.len(), 18);

        let location = rows.iter().find(|r| r.table_type == "awc_location").unwrap();
        assert_eq!(location.table_name, "icds-cas_static-awc_location");

        let thr = rows.iter().find(|r| r.table_type == "thr_form").unwrap();
        assert_eq!(thr.table_name, "icds_dashboard_child_health_thr_forms");
    }
}
