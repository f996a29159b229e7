//! Switch cardinality rules: `AtMostOne` holds after every update,
//! `OneOfMany` is left to the driver.

use rust_indi::error::IndiError;
use rust_indi::property::{Members, PropertyVector, SwitchMember, SwitchRule, SwitchState};

fn switches(rule: SwitchRule, n: usize) -> PropertyVector {
    let members = (0..n)
        .map(|i| SwitchMember::new(format!("S{i}"), "", SwitchState::Off).unwrap())
        .collect();
    PropertyVector::builder("Filter", "SLOT")
        .build(Members::Switch { rule, members })
        .unwrap()
}

fn on_count(v: &PropertyVector) -> usize {
    v.switches().unwrap().iter().filter(|m| m.is_on()).count()
}

/// Deterministic xorshift so every run covers the same sequence.
struct Rng(u64);

impl Rng {
    fn next(&mut self) -> u64 {
        self.0 ^= self.0 << 13;
        self.0 ^= self.0 >> 7;
        self.0 ^= self.0 << 17;
        self.0
    }
}

#[test]
fn at_most_one_holds_after_any_update() {
    let names: Vec<String> = (0..5).map(|i| format!("S{i}")).collect();
    let mut v = switches(SwitchRule::AtMostOne, 5);
    let mut rng = Rng(0x9e37_79b9_7f4a_7c15);

    for _ in 0..2_000 {
        let count = (rng.next() % 4) as usize;
        let mut request = Vec::with_capacity(count);
        for _ in 0..count {
            let name = names[(rng.next() % 5) as usize].as_str();
            let state = if rng.next() % 2 == 0 { SwitchState::On } else { SwitchState::Off };
            request.push((name, state));
        }

        let before = v.clone();
        match v.update_switches(&request) {
            Ok(()) => {}
            Err(IndiError::RuleViolation { .. }) => assert_eq!(v, before),
            Err(other) => panic!("unexpected error {other}"),
        }
        assert!(on_count(&v) <= 1);
    }
}

#[test]
fn at_most_one_accepts_moving_the_on_switch_in_one_update() {
    let mut v = switches(SwitchRule::AtMostOne, 3);
    v.update_switches(&[("S0", SwitchState::On)]).unwrap();
    v.update_switches(&[("S0", SwitchState::Off), ("S2", SwitchState::On)]).unwrap();
    assert_eq!(v.find_on_switch_index(), Some(2));

    let err = v.update_switches(&[("S1", SwitchState::On)]).unwrap_err();
    assert!(matches!(err, IndiError::RuleViolation { .. }));
    assert_eq!(v.find_on_switch_index(), Some(2));
}

#[test]
fn one_of_many_is_not_enforced_automatically() {
    let mut v = switches(SwitchRule::OneOfMany, 3);
    v.update_switches(&[("S0", SwitchState::On)]).unwrap();
    v.update_switches(&[("S1", SwitchState::On)]).unwrap();
    // The layer accepts two On members; the driver must reset first.
    assert_eq!(on_count(&v), 2);
}

#[test]
fn one_of_many_with_driver_reset() {
    let mut v = switches(SwitchRule::OneOfMany, 3);
    v.reset_switches().unwrap();
    v.update_switches(&[("S1", SwitchState::On)]).unwrap();
    let states: Vec<SwitchState> = v.switches().unwrap().iter().map(|m| *m.value()).collect();
    assert_eq!(states, [SwitchState::Off, SwitchState::On, SwitchState::Off]);
}

#[test]
fn any_of_many_allows_everything_on() {
    let mut v = switches(SwitchRule::AnyOfMany, 3);
    v.update_switches(&[("S0", SwitchState::On), ("S1", SwitchState::On), ("S2", SwitchState::On)])
        .unwrap();
    assert_eq!(on_count(&v), 3);
    assert_eq!(v.find_on_switch().unwrap().name(), "S0");
}

#[test]
fn reset_on_non_switch_vector_is_a_kind_mismatch() {
    use rust_indi::property::NumberMember;
    let mut v = PropertyVector::builder("Filter", "OFFSET")
        .build(Members::Number(vec![NumberMember::new("X", "", "%g", 0.0, 1.0, 0.0, 0.0).unwrap()]))
        .unwrap();
    assert!(matches!(v.reset_switches(), Err(IndiError::KindMismatch { .. })));
}
