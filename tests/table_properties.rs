//! Property tests for the observable table schema

use eventflow_rs::observable::{ObservableType, ScalarKind};
use eventflow_rs::{ObservableId, ObservableTable, TypeRegistry};
use proptest::prelude::*;
use std::collections::HashSet;
use std::sync::Arc;

const TYPES: [&str; 5] = ["double", "int", "long", "string", "vector<double>"];

fn table() -> ObservableTable {
    ObservableTable::new("props", Arc::new(TypeRegistry::with_defaults()))
}

fn registrations() -> impl Strategy<Value = Vec<(String, usize)>> {
    prop::collection::vec(("[a-e]{1,2}", 0..TYPES.len()), 0..40)
}

proptest! {
    #[test]
    fn schema_has_unique_names_in_first_registration_order(regs in registrations()) {
        let mut t = table();
        let mut first_seen: Vec<String> = Vec::new();
        for (name, ty) in &regs {
            let id = t.add_observable(name, TYPES[*ty], "");
            prop_assert!(id.is_valid());
            if !first_seen.contains(name) {
                prop_assert_eq!(id, ObservableId(first_seen.len() as u32));
                first_seen.push(name.clone());
            }
        }

        let names: Vec<&str> = t.observables().iter().map(|info| info.name.as_str()).collect();
        let unique: HashSet<&str> = names.iter().copied().collect();
        prop_assert_eq!(unique.len(), names.len());
        prop_assert_eq!(names, first_seen.iter().map(String::as_str).collect::<Vec<_>>());
    }

    #[test]
    fn re_registration_keeps_index_and_takes_last_type(name in "[a-z]{1,8}", a in 0..TYPES.len(), b in 0..TYPES.len()) {
        let mut t = table();
        let first = t.add_observable(&name, TYPES[a], "");
        let second = t.add_observable(&name, TYPES[b], "");
        prop_assert_eq!(first, second);
        prop_assert_eq!(t.len(), 1);

        let expected = ObservableType::resolve(TYPES[b], &TypeRegistry::with_defaults()).unwrap();
        prop_assert_eq!(t.observable_type(&name), Some(&expected));
    }

    #[test]
    fn locked_table_rejects_new_names(known in "[a-z]{1,6}", fresh in "[A-Z]{1,6}") {
        let mut t = table();
        let id = t.add_observable(&known, "double", "");
        t.lock();

        prop_assert_eq!(t.add_observable(&fresh, "double", ""), ObservableId::INVALID);
        prop_assert_eq!(t.len(), 1);
        prop_assert!(!t.contains(&fresh));
        // Known names still resolve
        prop_assert_eq!(t.add_observable(&known, "double", ""), id);
    }

    #[test]
    fn double_round_trip(v in any::<f64>().prop_filter("not NaN", |v| !v.is_nan())) {
        let mut t = table();
        let id = t.add_observable("v", "double", "");
        t.set_value(id, v).unwrap();
        prop_assert_eq!(t.value::<f64>(id).unwrap(), v);
    }

    #[test]
    fn int_round_trip(v in any::<i32>()) {
        let mut t = table();
        let id = t.add_observable("v", "int", "");
        t.set_value(id, v).unwrap();
        prop_assert_eq!(t.value::<i32>(id).unwrap(), v);
    }

    #[test]
    fn string_round_trip(v in ".{0,32}") {
        let mut t = table();
        let id = t.add_observable("v", "string", "");
        t.set_value(id, v.clone()).unwrap();
        prop_assert_eq!(t.value::<String>(id).unwrap(), v);
    }

    #[test]
    fn vector_round_trip(v in prop::collection::vec(-1e6f64..1e6, 0..16)) {
        let mut t = table();
        let id = t.add_observable("v", "vector<double>", "");
        t.set_value(id, v.clone()).unwrap();
        prop_assert_eq!(t.value::<Vec<f64>>(id).unwrap(), v);
    }

    #[test]
    fn mismatched_write_leaves_cell_unchanged(v in any::<i32>(), w in -1e6f64..1e6) {
        let mut t = table();
        let id = t.add_observable("v", "int", "");
        t.set_value(id, v).unwrap();
        prop_assert!(t.set_value(id, w).is_err());
        prop_assert_eq!(t.value::<i32>(id).unwrap(), v);
        prop_assert_eq!(t.value_or_default::<f64>(id), 0.0);
    }
}

#[test]
fn unknown_type_gives_invalid_index() {
    let mut t = table();
    assert_eq!(t.add_observable("v", "TH1D", ""), ObservableId::INVALID);
    assert!(t.is_empty());
    assert_eq!(
        ObservableType::resolve("int", &TypeRegistry::with_defaults()),
        Some(ObservableType::Scalar(ScalarKind::Int))
    );
}
