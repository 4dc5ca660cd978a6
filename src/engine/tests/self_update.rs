use pretty_assertions::assert_eq;

use super::{monitored, origin_of, plain, value_of, wire};
use crate::model::{Namespace, Severity, Value, VariableBuilder};

#[test]
fn reference_tracks_its_source() {
    let ns = Namespace::new("SIM");
    ns.add(plain("osc_freq", 8_000_000i64)).unwrap();
    ns.add(
        monitored("bus_clock", 0i64)
            .reference("osc_freq / 2")
            .build()
            .unwrap(),
    )
    .unwrap();

    let graph = wire(&ns);
    assert_eq!(value_of(&ns, "bus_clock"), Value::Int(4_000_000));

    graph
        .set_value(&ns, "osc_freq", Value::Int(16_000_000))
        .unwrap();
    assert_eq!(value_of(&ns, "bus_clock"), Value::Int(8_000_000));
}

#[test]
fn constant_reference_is_marked_fixed() {
    let ns = Namespace::new("SIM");
    ns.add(
        monitored("bus_clock", 0i64)
            .reference("48_000_000 / 2")
            .build()
            .unwrap(),
    )
    .unwrap();

    wire(&ns);
    assert_eq!(value_of(&ns, "bus_clock"), Value::Int(24_000_000));
    assert_eq!(origin_of(&ns, "bus_clock"), "[Fixed]");
}

#[test]
fn named_clock_primary_names_the_origin() {
    let ns = Namespace::new("SIM");
    ns.add(
        VariableBuilder::default()
            .key("osc_clock")
            .name("OSCCLK")
            .value(Value::Int(8_000_000))
            .named_clock(true)
            .build()
            .unwrap(),
    )
    .unwrap();
    ns.add(
        monitored("bus_clock", 0i64)
            .reference("osc_clock / 4")
            .build()
            .unwrap(),
    )
    .unwrap();

    wire(&ns);
    assert_eq!(origin_of(&ns, "bus_clock"), "OSCCLK");
}

#[test]
fn secondary_sources_are_listed_as_modifiers() {
    let ns = Namespace::new("SIM");
    ns.add(plain("base", 10i64)).unwrap();
    ns.add(plain("divider", 2i64)).unwrap();
    ns.add(
        monitored("derived", 0i64)
            .reference("base / divider")
            .build()
            .unwrap(),
    )
    .unwrap();

    wire(&ns);
    // The primary is inherited from, not a modifier of, the result.
    let origin = origin_of(&ns, "derived");
    assert!(origin.contains("[modified by divider]"));
    assert!(!origin.contains("base"));
}

#[test]
fn enabled_by_gates_the_variable() {
    let ns = Namespace::new("FTM");
    ns.add(plain("master_enable", true)).unwrap();
    ns.add(
        monitored("prescaler", 1i64)
            .enabled_by("master_enable")
            .build()
            .unwrap(),
    )
    .unwrap();

    let graph = wire(&ns);
    assert!(ns.snapshot("prescaler").unwrap().is_enabled());

    graph
        .set_value(&ns, "master_enable", Value::Bool(false))
        .unwrap();
    let var = ns.snapshot("prescaler").unwrap();
    assert!(!var.is_enabled());
    let status = var.status().unwrap();
    assert_eq!(status.severity(), Severity::Info);
    assert_eq!(status.message(), "Disabled by 'master_enable'");

    graph
        .set_value(&ns, "master_enable", Value::Bool(true))
        .unwrap();
    let var = ns.snapshot("prescaler").unwrap();
    assert!(var.is_enabled());
    assert_eq!(var.status(), None);
}

#[test]
fn disabled_primary_is_not_overridden_by_the_gate() {
    let ns = Namespace::new("SIM");
    ns.add(
        VariableBuilder::default()
            .key("source")
            .value(Value::Int(4))
            .enabled(false)
            .build()
            .unwrap(),
    )
    .unwrap();
    ns.add(
        monitored("derived", 0i64)
            .reference("source")
            .enabled_by("true")
            .build()
            .unwrap(),
    )
    .unwrap();

    wire(&ns);
    // The gate passing must not re-enable what the primary disabled.
    let var = ns.snapshot("derived").unwrap();
    assert_eq!(var.value(), &Value::Int(4));
    assert!(!var.is_enabled());
}

#[test]
fn blank_reference_clears_stale_origin() {
    let ns = Namespace::new("SIM");
    ns.add(
        monitored("derived", 5i64)
            .reference("hint#")
            .origin("left over")
            .build()
            .unwrap(),
    )
    .unwrap();

    wire(&ns);
    let var = ns.snapshot("derived").unwrap();
    assert_eq!(var.origin(), None);
    assert_eq!(var.value(), &Value::Int(5));
    assert!(var.is_enabled());
}

#[test]
fn custom_disabled_message_is_used() {
    let ns = Namespace::new("FTM");
    ns.add(plain("master_enable", false)).unwrap();
    ns.add(
        monitored("prescaler", 1i64)
            .enabled_by("master_enable")
            .enabled_by_message("Enable the timer first")
            .build()
            .unwrap(),
    )
    .unwrap();

    wire(&ns);
    let var = ns.snapshot("prescaler").unwrap();
    assert_eq!(var.status().unwrap().message(), "Enable the timer first");
}

#[test_log::test]
fn error_condition_outranks_the_disabled_reason() {
    let ns = Namespace::new("FTM");
    ns.add(plain("master_enable", false)).unwrap();
    ns.add(plain("conflict", true)).unwrap();
    ns.add(
        monitored("prescaler", 1i64)
            .enabled_by("master_enable")
            .error_if("conflict")
            .error_if_message("Prescaler conflicts with the selected mode")
            .build()
            .unwrap(),
    )
    .unwrap();

    let graph = wire(&ns);
    let var = ns.snapshot("prescaler").unwrap();
    assert!(!var.is_enabled());
    assert_eq!(var.status().unwrap().severity(), Severity::Error);
    assert_eq!(
        var.status().unwrap().message(),
        "Prescaler conflicts with the selected mode"
    );

    // With the error gone the informational reason is visible again.
    graph.set_value(&ns, "conflict", Value::Bool(false)).unwrap();
    let var = ns.snapshot("prescaler").unwrap();
    assert_eq!(var.status().unwrap().severity(), Severity::Info);
}

#[test]
fn unlocked_by_controls_the_lock() {
    let ns = Namespace::new("FTM");
    ns.add(plain("advanced_mode", false)).unwrap();
    ns.add(
        monitored("dead_time", 0i64)
            .unlocked_by("advanced_mode")
            .build()
            .unwrap(),
    )
    .unwrap();

    let graph = wire(&ns);
    assert!(ns.snapshot("dead_time").unwrap().is_locked());

    graph
        .set_value(&ns, "advanced_mode", Value::Bool(true))
        .unwrap();
    assert!(!ns.snapshot("dead_time").unwrap().is_locked());
}

#[test]
fn bound_expressions_clamp_the_value() {
    let ns = Namespace::new("FTM");
    ns.add(plain("lower", 0i64)).unwrap();
    ns.add(plain("upper", 50i64)).unwrap();
    ns.add(
        monitored("period", 100i64)
            .min_expression("lower")
            .max_expression("upper")
            .build()
            .unwrap(),
    )
    .unwrap();

    let graph = wire(&ns);
    let var = ns.snapshot("period").unwrap();
    assert_eq!(var.min(), Some(0));
    assert_eq!(var.max(), Some(50));
    assert_eq!(var.value(), &Value::Int(50));

    // Loosening the bound does not move the value back.
    graph.set_value(&ns, "upper", Value::Int(200)).unwrap();
    assert_eq!(value_of(&ns, "period"), Value::Int(50));

    graph.set_value(&ns, "lower", Value::Int(80)).unwrap();
    assert_eq!(value_of(&ns, "period"), Value::Int(80));
}

#[test]
fn target_with_its_own_gate_stays_disabled() {
    let ns = Namespace::new("MCG");
    ns.add(plain("gate", false)).unwrap();
    ns.add(
        VariableBuilder::default()
            .key("pll_input")
            .value(Value::Int(0))
            .enabled_by("gate")
            .build()
            .unwrap(),
    )
    .unwrap();
    ns.add(
        monitored("clock_source", "8")
            .target("pll_input")
            .build()
            .unwrap(),
    )
    .unwrap();

    wire(&ns);
    // The reference enables the target, its own gate still vetoes.
    let target = ns.snapshot("pll_input").unwrap();
    assert_eq!(target.value(), &Value::Int(8));
    assert!(!target.is_enabled());
}
