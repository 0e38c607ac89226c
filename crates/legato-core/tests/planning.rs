use legato_core::{
    Axes, AxesLocation, AxisConfig, AxisId, Boundary, Clock, CompletionType, Driver, ManualClock,
    Motion, MotionOptions, MotionProfile, Planner, PlannerConfig, PlannerStrategy, ProfileLimits,
    ProfileOptions, SimulatedDriver,
};
use std::sync::Arc;

fn solved(s1: f64) -> MotionProfile {
    let mut profile = MotionProfile::new(
        Boundary::at(0.0),
        Boundary::at(s1),
        ProfileLimits::new(1000.0, 700.0, 2000.0),
        ProfileOptions::new(),
    );
    profile.solve();
    profile
}

#[test]
fn long_move_has_seven_segments() {
    let profile = solved(600.0);
    assert_eq!(profile.check_validity(), None, "{profile}");
    assert!(profile.profile_velocity() <= 1000.0 + 1e-6);
    assert!(profile.time() > 0.6);
    let end = profile.momentary_location(profile.time());
    assert!((end - 600.0).abs() < 1e-6);
}

#[test]
fn short_move_never_reaches_the_velocity_limit() {
    let profile = solved(10.0);
    assert_eq!(profile.check_validity(), None, "{profile}");
    assert!(profile.profile_velocity() < 1000.0);
    assert!(profile.time() > solved(5.0).time());
}

fn axes() -> Axes {
    Axes::new([
        AxisConfig::linear("X")
            .with_limits(500.0, 2000.0, 15000.0)
            .with_soft_limits(Some(-10.0), Some(300.0)),
        AxisConfig::linear("Y").with_limits(300.0, 1000.0, 10000.0),
    ])
}

fn xy(x: f64, y: f64) -> AxesLocation {
    [(AxisId::linear("X"), x), (AxisId::linear("Y"), y)]
        .into_iter()
        .collect()
}

struct Machine {
    planner: Planner,
    driver: Arc<SimulatedDriver>,
    clock: Arc<ManualClock>,
}

fn machine(strategy: PlannerStrategy) -> Machine {
    let axes = axes();
    let driver = Arc::new(SimulatedDriver::new("sim", axes.ids().cloned()));
    let clock = Arc::new(ManualClock::new(0.0));
    let drivers: Vec<Arc<dyn Driver>> = vec![driver.clone()];
    let config = PlannerConfig {
        strategy,
        ..PlannerConfig::default()
    };
    Machine {
        planner: Planner::new(axes, drivers, clock.clone(), config),
        driver,
        clock,
    }
}

#[test]
fn uncoordinated_axes_share_one_duration() {
    let axes = axes();
    let motion = Motion::new(
        &axes,
        &xy(0.0, 0.0),
        &xy(200.0, 10.0),
        1.0,
        MotionOptions::new().with_uncoordinated_motion(),
    )
    .unwrap();
    let times: Vec<_> = motion.profiles().values().map(|p| p.time()).collect();
    assert_eq!(times.len(), 2);
    assert!((times[0] - times[1]).abs() < 1e-6, "{times:?}");
    assert!((motion.time() - times[0]).abs() < 1e-6);
    motion.check_validity().unwrap();
}

#[test]
fn executed_sequence_reaches_every_target() {
    let m = machine(PlannerStrategy::Simple);
    for (x, y) in [(100.0, 0.0), (100.0, 100.0), (0.0, 50.0)] {
        m.planner
            .move_to(&xy(x, y), 1.0, MotionOptions::new())
            .unwrap();
    }
    m.planner
        .wait_for_completion(None, CompletionType::WaitForStillstand)
        .unwrap();

    let plan = m.planner.plan_snapshot();
    let keys: Vec<_> = plan.entries().iter().map(|e| e.time).collect();
    assert!(keys.windows(2).all(|w| w[0] < w[1]), "{keys:?}");
    assert_eq!(m.driver.motions().len(), 3);
    let reported = m.driver.reported_location();
    assert!(reported.matches(&xy(0.0, 50.0), m.planner.axes()));

    // Queries between the motions stay on the planned path.
    let middle = plan.entries()[1].start_time() + 0.5 * plan.entries()[1].motion.time();
    let location = m.planner.momentary_location(middle);
    let x = location.coordinate(&AxisId::linear("X"));
    assert!((x - 100.0).abs() < 1e-6);
    assert_eq!(m.planner.momentary_location(middle), location);
    assert!(m.clock.now() >= plan.entries()[2].time);
}

#[test]
fn soft_limit_violation_is_reported() {
    let m = machine(PlannerStrategy::Simple);
    let err = m
        .planner
        .move_to(&xy(301.0, 0.0), 1.0, MotionOptions::new())
        .unwrap_err();
    insta::assert_snapshot!(err.to_string(), @"can't move X to 301, higher than soft limit 300");
    assert!(m.planner.pending_motions().is_empty());
}

#[test]
fn blended_path_is_not_slower_than_stop_and_go() {
    let total = |strategy| {
        let m = machine(strategy);
        let blend = MotionOptions::new().with_blend();
        m.planner.move_to(&xy(100.0, 0.0), 1.0, blend).unwrap();
        m.planner.move_to(&xy(200.0, 5.0), 1.0, blend).unwrap();
        m.planner
        .move_to(&xy(250.0, 5.0), 1.0, MotionOptions::new())
        .unwrap();
        m.planner
            .pending_motions()
            .iter()
            .map(|motion| motion.time())
            .sum::<f64>()
    };
    let simple = total(PlannerStrategy::Simple);
    let advanced = total(PlannerStrategy::Advanced);
    assert!(advanced <= simple + 1e-9, "{advanced} > {simple}");
}
