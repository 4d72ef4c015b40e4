//! End-to-end staging, generator and scene behaviour through `SynthesisEngine`.

use std::collections::BTreeMap;

use ensemble_engine::{
    AudioCommand, EngineConfig, EngineError, Inbound, RecordingSink, SceneBank, SynthesisEngine,
};

fn engine() -> SynthesisEngine {
    SynthesisEngine::new(EngineConfig::default().with_seed(17))
}

fn send(e: &mut SynthesisEngine, sink: &mut RecordingSink, json: &str) {
    e.handle(Inbound::from_json(json).unwrap(), sink).unwrap();
}

fn start(sink: &RecordingSink, param: &str) -> f64 {
    sink.last_envelope(param).map(|e| e.start_value).unwrap()
}

const PROGRAM: &str = r#"{
    "type": "PROGRAM_UPDATE",
    "frequency": {
        "interpolation": "step",
        "startValueGenerator": {"type": "periodic", "numerators": "1-3", "denominators": "1",
                                "numeratorBehavior": "ascending", "baseValue": 220}
    },
    "amp": {
        "startValueGenerator": {"type": "normalised", "range": {"min": 0, "max": 1}, "sequenceBehavior": "static"}
    },
    "ratio": {
        "startValueGenerator": {"type": "periodic", "numerators": "1-5", "denominators": "1",
                                "numeratorBehavior": "shuffle", "baseValue": 1}
    }
}"#;

#[test]
fn ascending_harmonics_across_boundaries() {
    let mut e = engine();
    let mut sink = RecordingSink::new();
    send(&mut e, &mut sink, PROGRAM);
    e.set_playing(true, &mut sink);
    let mut got = Vec::new();
    for c in 1..=4 {
        e.on_cycle_boundary(c, &mut sink);
        got.push(start(&sink, "frequency"));
    }
    assert_eq!(got, vec![220.0, 440.0, 660.0, 220.0]);
}

#[test]
fn normalised_static_holds_until_reresolve() {
    let mut e = engine();
    let mut sink = RecordingSink::new();
    send(&mut e, &mut sink, PROGRAM);
    let v = start(&sink, "amp");
    e.set_playing(true, &mut sink);
    for c in 1..=20 {
        e.on_cycle_boundary(c, &mut sink);
        assert_eq!(start(&sink, "amp"), v);
    }
    send(&mut e, &mut sink, r#"{"type":"RERESOLVE_AT_EOC"}"#);
    // not before the boundary
    assert_eq!(start(&sink, "amp"), v);
    e.on_cycle_boundary(21, &mut sink);
    assert_ne!(start(&sink, "amp"), v);
}

#[test]
fn shuffle_visits_each_element_once_per_permutation() {
    let mut e = engine();
    let mut sink = RecordingSink::new();
    send(&mut e, &mut sink, PROGRAM);
    e.set_playing(true, &mut sink);
    for round in 0..3 {
        let mut seen: Vec<u32> = (0..5)
            .map(|i| {
                e.on_cycle_boundary(round * 5 + i + 1, &mut sink);
                start(&sink, "ratio") as u32
            })
            .collect();
        seen.sort_unstable();
        assert_eq!(seen, vec![1, 2, 3, 4, 5]);
    }
}

#[test]
fn staged_change_is_invisible_until_the_boundary() {
    let mut e = engine();
    let mut sink = RecordingSink::new();
    send(&mut e, &mut sink, PROGRAM);
    e.set_playing(true, &mut sink);
    e.on_cycle_boundary(1, &mut sink);
    let before = sink.commands.len();

    send(&mut e, &mut sink, r#"{"type":"SUB_PARAM_UPDATE","path":"frequency.startValueGenerator.baseValue","value":100}"#);
    send(&mut e, &mut sink, r#"{"type":"PARAM_VALUE","param":"amp","value":0.25}"#);
    send(&mut e, &mut sink, r#"{"type":"ROUTING","param":"ratio","mode":"constant","value":7}"#);
    assert_eq!(sink.commands.len(), before);
    assert_eq!(e.staging().pending().len(), 1);

    e.on_cycle_boundary(2, &mut sink);
    match sink.commands.last() {
        Some(AudioCommand::SetAllEnv { params }) => {
            assert_eq!(params["frequency"].start_value, 200.0);
            assert_eq!(params["amp"].start_value, 0.25);
            assert_eq!(params["ratio"].start_value, 7.0);
            assert!(params.values().all(|env| env.portamento_ms == 0.0));
        }
        other => panic!("expected a boundary batch, got {other:?}"),
    }
    assert!(e.staging().is_empty());
}

#[test]
fn save_then_load_without_boundary_is_identical() {
    let mut e = engine();
    let mut sink = RecordingSink::new();
    send(&mut e, &mut sink, PROGRAM);
    e.set_playing(true, &mut sink);
    for c in 1..=3 {
        e.on_cycle_boundary(c, &mut sink);
    }
    e.set_playing(false, &mut sink);

    let peeked = |e: &SynthesisEngine| -> BTreeMap<String, f64> {
        e.params().keys().map(|k| (k.clone(), e.current_value(k))).collect()
    };
    let before = peeked(&e);
    send(&mut e, &mut sink, r#"{"type":"SAVE_SCENE","slot":1}"#);
    send(&mut e, &mut sink, r#"{"type":"LOAD_SCENE","slot":1,"portamentoMs":25}"#);
    assert_eq!(peeked(&e), before);
    match sink.commands.last() {
        Some(AudioCommand::SetAllEnv { params }) => {
            assert_eq!(params["frequency"].start_value, before["frequency"]);
            assert_eq!(params["frequency"].portamento_ms, 25.0);
        }
        other => panic!("expected restore batch, got {other:?}"),
    }
}

#[test]
fn restore_clamps_cursor_into_a_shortened_list() {
    let mut e = engine();
    let mut sink = RecordingSink::new();
    send(&mut e, &mut sink, PROGRAM);
    e.set_playing(true, &mut sink);
    e.on_cycle_boundary(1, &mut sink);
    e.on_cycle_boundary(2, &mut sink);
    e.set_playing(false, &mut sink);
    // ascending cursor now at index 2 of [1, 2, 3]
    e.capture(4);

    let mut bank: serde_json::Value = serde_json::from_str(&e.scenes().to_json().unwrap()).unwrap();
    bank["scenes"]["4"]["parameterConfigs"]["frequency"]["startGenerator"]["numerators"] = "1-2".into();
    e.set_scenes(SceneBank::from_json(&bank.to_string()).unwrap());

    e.restore(4, None, &mut sink).unwrap();
    assert_eq!(e.current_value("frequency"), 440.0);
}

#[test]
fn load_while_playing_waits_for_the_boundary() {
    let mut e = engine();
    let mut sink = RecordingSink::new();
    send(&mut e, &mut sink, PROGRAM);
    send(&mut e, &mut sink, r#"{"type":"SAVE_SCENE","slot":2}"#);
    let saved_freq = e.current_value("frequency");
    e.set_playing(true, &mut sink);
    e.on_cycle_boundary(1, &mut sink);
    e.on_cycle_boundary(2, &mut sink);

    let before = sink.commands.len();
    send(&mut e, &mut sink, r#"{"type":"LOAD_SCENE","slot":2}"#);
    send(&mut e, &mut sink, r#"{"type":"CLEAR_BANKS"}"#);
    assert_eq!(sink.commands.len(), before);

    e.on_cycle_boundary(3, &mut sink);
    assert_eq!(start(&sink, "frequency"), saved_freq);
    assert!(e.scenes().is_empty());
}

#[test]
fn bad_scene_version_is_a_hard_failure() {
    let mut e = engine();
    let mut sink = RecordingSink::new();
    send(&mut e, &mut sink, PROGRAM);
    e.capture(1);
    let mut bank: serde_json::Value = serde_json::from_str(&e.scenes().to_json().unwrap()).unwrap();
    bank["scenes"]["1"]["version"] = 99.into();
    let err = SceneBank::from_json(&bank.to_string()).unwrap_err();
    assert!(matches!(err, EngineError::UnsupportedSceneVersion { found: 99, .. }));
    // the live bank and parameters are untouched
    assert_eq!(e.scenes().len(), 1);
    assert_eq!(e.params().len(), 3);
}

#[test]
fn control_errors_do_not_stop_boundaries() {
    let mut e = engine();
    let mut sink = RecordingSink::new();
    send(&mut e, &mut sink, PROGRAM);
    e.set_playing(true, &mut sink);
    let bad = Inbound::from_json(r#"{"type":"SUB_PARAM_UPDATE","path":"frequency.start.nonsense","value":1}"#).unwrap();
    assert!(e.handle(bad, &mut sink).is_err());
    let missing = Inbound::from_json(r#"{"type":"LOAD_SCENE","slot":9}"#).unwrap();
    assert!(matches!(e.handle(missing, &mut sink), Err(EngineError::EmptySlot(9))));
    e.on_cycle_boundary(1, &mut sink);
    assert_eq!(start(&sink, "frequency"), 220.0);
}
