//! End-to-end campaign scenarios against the in-memory platform.
//!
//! ## What These Tests Verify
//!
//! - Context naming and rank ordering
//! - Subscription entries reaching model attributes and parameter events
//! - Fatal configuration and validation errors stop before any mutation
//! - Deferred export paths and non-dynamic case skipping

use mtb_core::config::SlotConfig;
use mtb_core::platform::ProjectFolder;
use mtb_core::{
    Campaign, CampaignConfig, CampaignError, CampaignState, CaseSheet, ContextState,
    MemoryPlatform, ObjectHandle, Platform, Value,
};
use serde_json::json;
use tempfile::TempDir;

fn sheet(cases: serde_json::Value, channels: serde_json::Value) -> CaseSheet {
    let doc = json!({ "project": "Plant", "cases": cases, "channels": channels });
    CaseSheet::from_json(&doc.to_string()).unwrap()
}

/// Test bench with an extra `Bus1` terminal directly below the network data.
fn bench() -> MemoryPlatform {
    let mut platform = MemoryPlatform::test_bench();
    let netdat = platform
        .project_folder(ProjectFolder::NetworkData)
        .unwrap()
        .unwrap();
    platform.add(Some(netdat), "ElmTerm", "Bus1");
    platform
}

fn config(dir: &TempDir, subscriptions: &str) -> CampaignConfig {
    let mut config = CampaignConfig::new(dir.path().join("cases.json"), dir.path().join("export"));
    config.subscriptions = subscriptions.to_string();
    config
}

fn find(platform: &mut MemoryPlatform, path: &str) -> ObjectHandle {
    let netdat = platform
        .project_folder(ProjectFolder::NetworkData)
        .unwrap()
        .unwrap();
    platform.search(netdat, path).unwrap().unwrap()
}

fn writes_of(platform: &MemoryPlatform, object: ObjectHandle, attribute: &str) -> Vec<Value> {
    platform
        .attribute_writes()
        .iter()
        .filter(|w| w.object == object && w.attribute == attribute)
        .map(|w| w.value.clone())
        .collect()
}

fn finished_platform(campaign: Campaign<MemoryPlatform>) -> MemoryPlatform {
    campaign.into_session().unwrap().into_platform()
}

#[test]
fn test_context_names_padded_to_largest_rank() {
    let dir = TempDir::new().unwrap();
    let cases = json!([
        {"rank": 10, "name": "y", "rms": true},
        {"rank": 1, "name": "x", "rms": true},
    ]);
    let mut campaign = Campaign::new(config(&dir, ""), sheet(cases, json!([])));
    let report = campaign.run(|| Ok(bench())).unwrap();

    let names: Vec<_> = campaign.contexts().iter().map(|c| c.name.as_str()).collect();
    assert_eq!(names, vec!["01_x", "10_y"]);
    let ranks: Vec<_> = report.contexts.iter().map(|c| c.rank).collect();
    assert_eq!(ranks, vec![1, 10]);

    let mut platform = finished_platform(campaign);
    let study = platform
        .project_folder(ProjectFolder::StudyCases)
        .unwrap()
        .unwrap();
    assert!(platform.search(study, "01_x.IntCase").unwrap().is_some());
    assert!(platform.search(study, "10_y.IntCase").unwrap().is_some());
}

#[test]
fn test_scaled_signal_reaches_destination() {
    let dir = TempDir::new().unwrap();
    let cases = json!([
        {"rank": 1, "name": "a", "rms": true},
        {"rank": 2, "name": "b", "rms": true},
    ]);
    let channels = json!([{
        "kind": "signal",
        "name": "mtb_s_1",
        "values": {"1": [[0.0, 0.5]], "2": [[0.0, 0.75], [1.0, 1.0]]},
    }]);
    let mut campaign = Campaign::new(
        config(&dir, "Bus1:u0=mtb_s_1:s~2.0 * x"),
        sheet(cases, channels),
    );
    let report = campaign.run(|| Ok(bench())).unwrap();
    assert_eq!(report.bindings.registered, 1);

    let mut platform = finished_platform(campaign);
    let bus = find(&mut platform, "Bus1.ElmTerm");
    assert_eq!(
        writes_of(&platform, bus, "u0"),
        vec![Value::Float(1.0), Value::Float(1.5)]
    );

    let events = platform.objects_of_class("EvtParam");
    assert_eq!(events.len(), 1);
    let event = events[0];
    assert_eq!(platform.attribute(event, "time"), Some(&Value::Float(1.0)));
    assert_eq!(platform.attribute(event, "p_target"), Some(&Value::Object(bus)));
    assert_eq!(platform.attribute(event, "variable"), Some(&Value::Text("u0".into())));
    assert_eq!(platform.attribute(event, "value"), Some(&Value::Text("2".into())));
}

#[test]
fn test_unknown_channel_aborts_before_provisioning() {
    let dir = TempDir::new().unwrap();
    let cases = json!([{"rank": 1, "name": "a", "rms": true}]);
    let mut campaign = Campaign::new(
        config(&dir, "Bus1:u0=doesNotExist:S~x"),
        sheet(cases, json!([])),
    );
    let err = campaign.run(|| Ok(bench())).unwrap_err();

    assert!(matches!(err, CampaignError::UnknownChannel(ref name) if name == "doesNotExist"));
    assert_eq!(
        campaign.history(),
        &[
            CampaignState::Connecting,
            CampaignState::Validating,
            CampaignState::Failed
        ]
    );
    assert!(campaign.contexts().is_empty());

    let platform = finished_platform(campaign);
    assert_eq!(platform.objects_of_class("IntCase").len(), 1);
    assert!(platform.versions().is_empty());
}

#[test]
fn test_no_calc_relevant_grid_aborts_at_validation() {
    let dir = TempDir::new().unwrap();
    let cases = json!([{"rank": 1, "name": "a", "rms": true}]);
    let mut campaign = Campaign::new(config(&dir, ""), sheet(cases, json!([])));
    let err = campaign
        .run(|| {
            let mut platform = bench();
            for grid in ["Plant.ElmNet", "MTB.ElmNet"] {
                let handle = find(&mut platform, grid);
                platform.set(handle, "calc_relevant", Value::Int(0));
            }
            Ok(platform)
        })
        .unwrap_err();

    assert!(matches!(err, CampaignError::NoActiveGrids));
    assert_eq!(campaign.state(), CampaignState::Failed);
    let platform = finished_platform(campaign);
    assert!(platform.versions().is_empty());
    assert_eq!(platform.objects_of_class("IntCase").len(), 1);
}

#[test]
fn test_each_callback_applied_once_per_case() {
    let dir = TempDir::new().unwrap();
    let cases = json!([
        {"rank": 1, "name": "a", "rms": true},
        {"rank": 2, "name": "b", "rms": true},
    ]);
    let channels = json!([
        {"kind": "signal", "name": "mtb_s_1", "values": {"1": [[0.0, 1.0]], "2": [[0.0, 3.0]]}},
        {"kind": "signal", "name": "mtb_s_2"},
        {"kind": "constant", "name": "mtb_c_kp"},
    ]);
    let mut campaign = Campaign::new(
        config(&dir, "Bus1:u0=mtb_s_1:S~2.0 * x;Bus1:u1=mtb_s_1:S0~x + 1"),
        sheet(cases, channels),
    );
    campaign.run(|| Ok(bench())).unwrap();

    let sheet = campaign.sheet();
    assert_eq!(sheet.channels.get("mtb_s_1").unwrap().binding_count(), 2);
    assert_eq!(sheet.channels.get("mtb_s_2").unwrap().binding_count(), 0);
    assert_eq!(sheet.channels.get("mtb_c_kp").unwrap().binding_count(), 0);

    let mut platform = finished_platform(campaign);
    let bus = find(&mut platform, "Bus1.ElmTerm");
    assert_eq!(
        writes_of(&platform, bus, "u0"),
        vec![Value::Float(2.0), Value::Float(6.0)]
    );
    assert_eq!(
        writes_of(&platform, bus, "u1"),
        vec![Value::Float(2.0), Value::Float(4.0)]
    );
    assert!(platform.objects_of_class("EvtParam").is_empty());
}

#[test]
fn test_ramp_creates_ramped_events() {
    let dir = TempDir::new().unwrap();
    let cases = json!([{"rank": 1, "name": "a", "rms": true}]);
    let channels = json!([{
        "kind": "signal",
        "name": "mtb_s_pref_pu",
        "default": [[0.0, 0.5], [2.0, 1.0]],
    }]);
    let mut campaign = Campaign::new(
        config(&dir, r"Plant\ctrl.ElmDsl:e:Pset=mtb_s_pref_pu:R~x"),
        sheet(cases, channels),
    );
    campaign.run(|| Ok(bench())).unwrap();

    let mut platform = finished_platform(campaign);
    let ctrl = find(&mut platform, r"Plant\ctrl.ElmDsl");
    assert_eq!(writes_of(&platform, ctrl, "e:Pset"), vec![Value::Float(0.5)]);

    let events = platform.objects_of_class("EvtParam");
    assert_eq!(events.len(), 1);
    assert_eq!(platform.name_of(events[0]), Some("mtb_s_pref_pu_1"));
    assert_eq!(platform.attribute(events[0], "variable"), Some(&Value::Text("Pset".into())));
    assert_eq!(platform.attribute(events[0], "time"), Some(&Value::Float(0.0)));
    assert_eq!(platform.attribute(events[0], "i_rampe"), Some(&Value::Int(1)));
    assert_eq!(platform.attribute(events[0], "ramptime"), Some(&Value::Float(2.0)));
}

#[test]
fn test_value_channels_set_attributes_directly() {
    let dir = TempDir::new().unwrap();
    let cases = json!([{"rank": 1, "name": "a", "rms": true}]);
    let channels = json!([
        {"kind": "constant", "name": "mtb_c_scr", "values": {"1": 3.5}},
        {"kind": "object", "name": "mtb_o_bus", "default": "Plant\\Bus1"},
        {"kind": "string", "name": "mtb_t_mode", "default": "grid-forming"},
    ]);
    let subscriptions = "Bus1:scr=mtb_c_scr:C~x;Bus1:pbus=mtb_o_bus:C~x;Bus1:mode=mtb_t_mode:C~x";
    let mut campaign = Campaign::new(config(&dir, subscriptions), sheet(cases, channels));
    campaign.run(|| Ok(bench())).unwrap();

    let mut platform = finished_platform(campaign);
    let bus = find(&mut platform, "Bus1.ElmTerm");
    let plant_bus = find(&mut platform, r"Plant\Bus1");
    assert_eq!(platform.attribute(bus, "scr"), Some(&Value::Float(3.5)));
    assert_eq!(platform.attribute(bus, "pbus"), Some(&Value::Object(plant_bus)));
    assert_eq!(
        platform.attribute(bus, "mode"),
        Some(&Value::Text("grid-forming".into()))
    );
}

#[test]
fn test_slot_redirects_reference_signal() {
    let dir = TempDir::new().unwrap();
    let cases = json!([{"rank": 1, "name": "a", "rms": true}]);
    let channels = json!([{"kind": "signal", "name": "mtb_s_pref_pu", "default": [[0.0, 0.8]]}]);
    let mut config = config(&dir, "");
    config.slots.pref = Some(SlotConfig {
        object: r"user\Plant.IntPrj\Network Model\Network Data\Plant\ctrl.ElmDsl".to_string(),
        attribute: "e:Pref".to_string(),
        scale: 0.5,
    });
    let mut campaign = Campaign::new(config, sheet(cases, channels));
    let report = campaign.run(|| Ok(bench())).unwrap();
    assert_eq!(report.bindings.registered, 1);
    assert_eq!(report.bindings.ignored, 6);

    let mut platform = finished_platform(campaign);
    let ctrl = find(&mut platform, r"Plant\ctrl.ElmDsl");
    assert_eq!(writes_of(&platform, ctrl, "e:Pref"), vec![Value::Float(0.4)]);
}

#[test]
fn test_exports_follow_project_and_rank() {
    let dir = TempDir::new().unwrap();
    let cases = json!([
        {"rank": 1, "name": "FRT", "rms": true},
        {"rank": 2, "name": "EMT only", "rms": false, "emt": true},
        {"rank": 3, "name": "Step", "rms": true},
    ]);
    let mut campaign = Campaign::new(config(&dir, ""), sheet(cases, json!([])));
    let report = campaign.run(|| Ok(bench())).unwrap();

    let export = dir.path().join("export");
    assert_eq!(report.skipped, vec![2]);
    assert_eq!(report.tasks, 4);
    assert_eq!(
        report.contexts.iter().map(|c| c.export_path.clone()).collect::<Vec<_>>(),
        vec![
            export.join("Plant_1.csv").display().to_string(),
            export.join("Plant_3.csv").display().to_string(),
        ]
    );
    assert!(campaign
        .contexts()
        .iter()
        .all(|c| c.state == ContextState::Exported));

    assert!(!export.join("Plant_2.csv").exists());
    let content = std::fs::read_to_string(export.join("Plant_3.csv")).unwrap();
    assert!(content.starts_with("b:tnow;measurements\\s:Ia_pu;"));
    assert!(content.lines().next().unwrap().ends_with("mtb_s_10\\s:yo"));

    let platform = finished_platform(campaign);
    assert_eq!(platform.commands_on("ComRes", "Execute").len(), 2);
    assert!(platform.echo());
}

#[test]
fn test_initializer_copy_shim_runs_once_per_grid() {
    let dir = TempDir::new().unwrap();
    let cases = json!([
        {"rank": 1, "name": "a", "rms": true},
        {"rank": 2, "name": "b", "rms": true},
    ]);
    let mut config = config(&dir, "");
    config.copy_grid = Some("Plant".to_string());
    let mut campaign = Campaign::new(config, sheet(cases, json!([])));
    campaign.run(|| Ok(bench())).unwrap();

    let mut platform = finished_platform(campaign);
    let copies = platform.objects_of_class("ElmQdsl");
    assert_eq!(copies.len(), 2);
    let original = find(&mut platform, r"MTB\MTB\initializer_qdsl.ElmQdsl");
    assert_eq!(platform.attribute(original, "outserv"), Some(&Value::Int(1)));
    assert!(find(&mut platform, r"Plant\initializer_qdsl.ElmQdsl") != original);
}
