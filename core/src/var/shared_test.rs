use std::sync::Arc;
use std::thread;

use crate::config::PoolConfig;
use crate::rt::{ActivityId, ReservationState};
use crate::val::Val;
use crate::var::{ObjectVariables, SharedDictionary, VariableDictionary};

#[test]
fn scopes_are_created_once_and_chained() {
    let config = PoolConfig::default();
    let vars = ObjectVariables::new();
    let base = Val::str("Base");
    let derived = Val::str("Derived");
    assert!(vars.find(&base).is_none());

    let base_dict = vars.get_or_create(&base, &config);
    let derived_dict = vars.get_or_create(&derived, &config);
    assert!(Arc::ptr_eq(&base_dict, &vars.get_or_create(&base, &config)));

    let chain = vars.dictionaries();
    assert_eq!(chain.len(), 2);
    assert!(Arc::ptr_eq(&chain[0], &derived_dict));
    assert!(Arc::ptr_eq(chain[0].next().unwrap(), &base_dict));
    assert!(base_dict.next().is_none());
    assert_eq!(base_dict.with(|dict| dict.table().primary_size()), config.scope_size);
}

#[test]
fn scopes_match_by_identity() {
    let config = PoolConfig::default();
    let vars = ObjectVariables::new();
    let scope = Val::str("Same");
    vars.get_or_create(&scope, &config);
    // Equal content, different scope object.
    assert!(vars.find(&Val::str("Same")).is_none());
    assert!(vars.find(&scope).is_some());
}

#[test]
fn access_reserves_for_its_lifetime() {
    let shared = SharedDictionary::new(VariableDictionary::with_sizes(None, 3, 3), None);
    let a = ActivityId::next();
    {
        let access = shared.access(a).unwrap();
        assert_eq!(access.activity(), a);
        assert_eq!(shared.state(), ReservationState::Held { activity: a, count: 1 });
        access.with(|dict| dict.assign("x", Val::Int(1)).unwrap());
        // Nested access by the holder.
        let nested = shared.access(a).unwrap();
        assert_eq!(nested.with(|dict| dict.value("x")), Some(Val::Int(1)));
    }
    assert_eq!(shared.state(), ReservationState::Free);
}

#[test]
fn activities_update_a_scope_in_turn() {
    let config = PoolConfig::default();
    let obj = Val::object("Counter");
    let scope = Val::str("Counter");
    let shared = obj
        .as_object()
        .unwrap()
        .variables()
        .get_or_create(&scope, &config);
    shared.with(|dict| dict.assign("count", Val::Int(0)).unwrap());

    let handles: Vec<_> = (0..4)
        .map(|_| {
            let shared = shared.clone();
            thread::spawn(move || {
                let activity = ActivityId::next();
                for _ in 0..25 {
                    let access = shared.access(activity).unwrap();
                    let current = access.with(|dict| dict.value("count").and_then(|v| v.as_int()).unwrap());
                    thread::yield_now();
                    access.with(|dict| dict.assign("count", Val::Int(current + 1)).unwrap());
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }
    assert_eq!(shared.with(|dict| dict.value("count")), Some(Val::Int(100)));
    assert_eq!(shared.reservation().waiting(), 0);
}
