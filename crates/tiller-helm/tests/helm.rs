//! End-to-end scenarios for the decision engine, driven from YAML configs.

#![allow(
    missing_docs,
    clippy::unwrap_used,
    clippy::indexing_slicing,
    clippy::too_many_lines
)]

mod support;

use support::{config, engine, names};
use tiller_helm::{BehaviorSpec, HaltReason, InfoBuffer, LifeEventKind, TimeSource};
use tiller_ivp::{Degree, Domain, ObjectiveFunction, Piece, PiecewiseMap, codec};

const SPEED_HELM: &str = r"
domain:
  - name: speed
    low: 0
    high: 5
    points: 6
behaviors:
  - kind: tent
    params:
      name: slow
      var: speed
      peak: 2
      pwt: 100
  - kind: tent
    params:
      name: fast
      var: speed
      peak: 4
      pwt: 50
";

fn close(a: f64, b: f64) -> bool {
    (a - b).abs() < 1e-9
}

#[test]
fn heavier_behavior_pulls_the_decision() {
    let mut helm = engine(&config(SPEED_HELM));
    let report = helm.run_tick(&InfoBuffer::new());

    assert!(!report.is_halted());
    let speed = report.decision("speed").unwrap();
    assert!((speed - 2.0).abs() < (speed - 4.0).abs());
    assert!(close(speed, 2.0));
    assert_eq!(names(&report.active), vec!["slow", "fast"]);
    assert_eq!(report.ofnum, 2);
    assert!(report.warnings.is_empty());
}

#[test]
fn unknown_variable_halts_the_tick() {
    let torque = Domain::new().with_variable("torque", 0.0, 10.0, 11).unwrap();
    let map = PiecewiseMap::from_pieces(
        torque.clone(),
        Degree::Constant,
        vec![Piece::universe(&torque, Degree::Constant)],
    )
    .unwrap();
    let ipf = codec::encode(&ObjectiveFunction::new(map, 10.0));

    let mut cfg = config(SPEED_HELM);
    cfg.behaviors.push(
        BehaviorSpec::new("fixed")
            .with_param("name", "twist")
            .with_param("ipf", &ipf),
    );
    let mut helm = engine(&cfg);
    let report = helm.run_tick(&InfoBuffer::new());

    assert!(report.is_halted());
    assert!(report.halt_message().contains("torque"));
    assert!(report.decisions.is_empty());
    assert!(report.to_string().contains("halted=true"));
}

#[test]
fn broken_behavior_halts_the_tick() {
    let mut cfg = config(SPEED_HELM);
    cfg.behaviors.push(
        BehaviorSpec::new("fixed")
            .with_param("name", "gauge")
            .with_param("fail", "true"),
    );
    let mut helm = engine(&cfg);
    let report = helm.run_tick(&InfoBuffer::new());

    assert_eq!(
        report.halt,
        Some(HaltReason::BehaviorError {
            behavior: "gauge".to_owned()
        })
    );
    assert!(
        report
            .postings
            .iter()
            .any(|p| p.var == "BHV_ERROR" && p.value == "sensor lost")
    );
    // Every level-0 behavior was still stepped.
    assert_eq!(names(&report.active), vec!["slow", "fast"]);
}

#[test]
fn second_level_sees_the_unfiltered_decision() {
    let yaml = r"
domain:
  - name: speed
    low: 0
    high: 5
    points: 6
behaviors:
  - kind: tent
    params:
      name: slow
      var: speed
      peak: 2
      pwt: 100
  - kind: tent
    params:
      name: escort
      var: speed
      peak: 4
      pwt: 1000
      filter_level: 1
      watch: DESIRED_SPEED_UNFILTERED
";
    let mut helm = engine(&config(yaml));
    let report = helm.run_tick(&InfoBuffer::new());

    assert!(close(report.unfiltered_decision("speed").unwrap(), 2.0));
    assert!(close(report.decision("speed").unwrap(), 4.0));
    assert!(
        report
            .postings
            .iter()
            .any(|p| p.var == "DESIRED_SPEED_UNFILTERED" && p.value == "2")
    );
    assert!(
        report
            .postings
            .iter()
            .any(|p| p.var == "WATCHED" && p.value == "2")
    );
    assert_eq!(names(&report.active), vec!["slow", "escort"]);
}

#[test]
fn single_level_helm_publishes_no_unfiltered_decision() {
    let mut helm = engine(&config(SPEED_HELM));
    let report = helm.run_tick(&InfoBuffer::new());
    assert!(report.unfiltered.is_empty());
    assert!(
        !report
            .postings
            .iter()
            .any(|p| p.var.ends_with("_UNFILTERED"))
    );
}

#[test]
fn mandatory_variables_must_be_decided() {
    let yaml = |optional: bool| {
        format!(
            "
domain:
  - name: course
    low: 0
    high: 359
    points: 360
    optional: {optional}
  - name: speed
    low: 0
    high: 5
    points: 6
behaviors:
  - kind: tent
    params:
      name: slow
      var: speed
      peak: 2
"
        )
    };

    let mut strict = engine(&config(&yaml(false)));
    let report = strict.run_tick(&InfoBuffer::new());
    assert_eq!(
        report.halt,
        Some(HaltReason::MissingDecision {
            variables: vec!["course".to_owned()]
        })
    );

    let mut relaxed = engine(&config(&yaml(true)));
    let report = relaxed.run_tick(&InfoBuffer::new());
    assert!(!report.is_halted());
    assert!(close(report.decision("speed").unwrap(), 2.0));
    assert!(report.to_string().contains("var=course:varbalk,var=speed:2,"));
}

#[test]
fn templates_spawn_update_and_abort() {
    let yaml = r"
domain:
  - name: speed
    low: 0
    high: 5
    points: 6
behaviors:
  - kind: tent
    params:
      name: slow
      var: speed
      peak: 2
      pwt: 100
  - kind: tent
    template: true
    params:
      updates: NEW_TENT
      var: speed
      pwt: 300
      max_spawns: 1
";
    let mut helm = engine(&config(yaml));
    let mut info = InfoBuffer::new();

    info.set_text("NEW_TENT", "name=rush#peak=5");
    let report = helm.run_tick(&info);
    let spawn = report.life_events.first().unwrap();
    assert_eq!(spawn.event, LifeEventKind::Spawn);
    assert_eq!(spawn.behavior, "rush");
    assert_eq!(spawn.spawn_string, "name=rush#peak=5");
    assert_eq!(names(&report.active), vec!["slow", "rush"]);
    assert!(close(report.decision("speed").unwrap(), 5.0));

    // Prefix of an existing name.
    info.clear_deltas();
    info.set_text("NEW_TENT", "name=rush_2#peak=1");
    let report = helm.run_tick(&info);
    assert_eq!(report.life_events.first().unwrap().event, LifeEventKind::Abort);
    assert!(report.warnings.contains(&"Behavior spawn aborted: rush_2".to_owned()));

    // Template already spent its one spawn.
    info.clear_deltas();
    info.set_text("NEW_TENT", "name=other#peak=1");
    let report = helm.run_tick(&info);
    assert_eq!(report.life_events.first().unwrap().event, LifeEventKind::Abort);
    assert_eq!(helm.registry().names().collect::<Vec<_>>(), vec!["slow", "rush"]);

    // A string naming an existing instance updates it.
    info.clear_deltas();
    info.set_text("NEW_TENT", "name=rush#peak=0");
    let report = helm.run_tick(&info);
    assert!(report.life_events.is_empty());
    assert!(close(report.decision("speed").unwrap(), 0.0));
    let rush = report.active.iter().find(|e| e.name == "rush").unwrap();
    assert_eq!(rush.updates, "1/1");
}

#[test]
fn expired_behaviors_complete_once_and_are_swept() {
    let yaml = r"
domain:
  - name: speed
    low: 0
    high: 5
    points: 6
behaviors:
  - kind: tent
    params:
      name: slow
      var: speed
      peak: 2
  - kind: tent
    params:
      name: brief
      var: speed
      peak: 5
      duration: 1
      endflag: BRIEF_DONE=true
";
    let mut helm = engine(&config(yaml));
    let info = InfoBuffer::new();

    let first = helm.run_tick(&info);
    assert_eq!(names(&first.active), vec!["slow", "brief"]);

    helm.clock_mut().advance(2.0);
    let second = helm.run_tick(&info);
    assert_eq!(names(&second.completed), vec!["brief"]);
    assert_eq!(names(&second.active), vec!["slow"]);
    assert!(
        second
            .postings
            .iter()
            .any(|p| p.var == "BRIEF_DONE" && p.value == "true")
    );
    let death = second.life_events.last().unwrap();
    assert_eq!(death.event, LifeEventKind::Death);
    assert_eq!(death.behavior, "brief");
    assert!(close(death.time, helm.clock().current_time()));

    helm.clock_mut().advance(1.0);
    let third = helm.run_tick(&info);
    assert!(third.completed.is_empty());
    assert_eq!(names(&third.active), vec!["slow"]);
    assert!(helm.registry().behavior("brief").is_none());
    assert_eq!(
        helm.registry()
            .life_events()
            .iter()
            .filter(|e| e.behavior == "brief")
            .count(),
        2
    );
}

#[test]
fn conditions_flags_and_updates() {
    let yaml = r"
domain:
  - name: speed
    low: 0
    high: 5
    points: 6
behaviors:
  - kind: tent
    params:
      name: hold
      var: speed
      peak: 1
      condition: MODE=go
      updates: HOLD_UPDATES
      activeflag: HOLD_STATE=$[BHVNAME]_on
      idleflag: HOLD_STATE=idle
";
    let mut helm = engine(&config(yaml));
    let mut info = InfoBuffer::new();

    let report = helm.run_tick(&info);
    assert_eq!(names(&report.idle), vec!["hold"]);
    assert_eq!(report.halt, Some(HaltReason::NoFunctions));
    assert!(
        report
            .postings
            .iter()
            .any(|p| p.var == "HOLD_STATE" && p.value == "idle")
    );

    info.set_text("MODE", "GO");
    info.set_text("HOLD_UPDATES", "peak=3");
    let report = helm.run_tick(&info);
    assert_eq!(names(&report.active), vec!["hold"]);
    assert!(close(report.decision("speed").unwrap(), 3.0));
    assert!(
        report
            .postings
            .iter()
            .any(|p| p.var == "HOLD_STATE" && p.value == "hold_on")
    );
    assert_eq!(report.active.first().unwrap().updates, "1/1");

    info.clear_deltas();
    info.set_text("HOLD_UPDATES", "peak=fast");
    let report = helm.run_tick(&info);
    assert!(close(report.decision("speed").unwrap(), 3.0));
    assert_eq!(report.active.first().unwrap().updates, "1/2");
    assert_eq!(report.warnings.len(), 1);
    assert!(report.postings.iter().any(|p| p.var == "BHV_WARNING"));
    // Still active: no repeated flag.
    assert!(!report.postings.iter().any(|p| p.var == "HOLD_STATE"));
}

#[test]
fn reports_render_and_serialize() {
    let mut helm = engine(&config(SPEED_HELM));
    let info = InfoBuffer::new();
    let first = helm.run_tick(&info);
    let second = helm.run_tick(&info);

    let full = first.to_string();
    assert!(full.starts_with("iter=1,utc_time=0.00,ofnum=2,warnings=0,"));
    assert!(full.contains(",active_bhvs=slow$0.00$100.00000$"));
    assert!(full.contains(",ivpdomain=\"speed,0,5,6\","));

    let diff = second.render(Some(&first));
    assert!(diff.starts_with("iter=2,utc_time=0.00"));
    assert!(!diff.contains("ivpdomain"));
    assert!(!diff.contains("var=speed"));
    assert!(!second.changed_behaviors(&first));

    let json = serde_json::to_value(&first).unwrap();
    assert_eq!(json["iteration"], 1);
    assert_eq!(json["active"][0]["name"], "slow");
    assert_eq!(json["decisions"][0][0], "speed");
    assert!(json["halt"].is_null());
    assert_eq!(
        helm.registry().life_events().iter().next().unwrap().spawn_string,
        "helm_startup"
    );
}
