mod common;

use common::{MockTransport, device, dps, eventually, manager, refreshing_valve, switch_pair};
use serde_json::json;
use tuya_lan_session::{
    Cid, DpMap, DpValue, DpView, Dp, EntityAdapter, EntityHooks, EntityKey, Error, RefreshRequest,
    RestoredState,
};

#[derive(Default)]
struct Recorder {
    updates: Vec<DpMap>,
    restored: Option<RestoredState>,
}

impl EntityHooks for Recorder {
    fn status_updated(&mut self, view: &DpView<'_>) {
        self.updates.push(view.status().clone());
    }

    fn status_restored(&mut self, restored: &RestoredState) {
        self.restored = Some(restored.clone());
    }
}

fn key(s: &str) -> EntityKey {
    s.parse().unwrap()
}

fn revision(entity: &EntityAdapter<Recorder>) -> u64 {
    *entity.presentation_updates().borrow()
}

fn updates(entity: &EntityAdapter<Recorder>) -> usize {
    entity.with_hooks(|h| h.updates.len())
}

#[tokio::test]
async fn flat_payload_never_satisfies_sub_device_entity() {
    common::init_tracing();
    let transport = MockTransport::new();
    transport.reply(None, dps(json!({"1": "on", "2": "off"})));
    let session = manager(switch_pair(), &transport);

    let a = EntityAdapter::new(&session, key("1"), Recorder::default()).unwrap();
    let b = EntityAdapter::new(&session, key("26_2"), Recorder::default()).unwrap();
    a.attach(None);
    b.attach(None);
    session.connect();

    eventually(|| a.available() && revision(&b) > 0).await;
    assert_eq!(a.dp(Dp(1)), Some(DpValue::from("on")));
    assert_eq!(updates(&a), 1);
    assert!(!b.available());
    assert_eq!(updates(&b), 0);
}

#[tokio::test]
async fn refresh_echo_skips_status_hook() {
    let transport = MockTransport::new();
    let session = manager(refreshing_valve(), &transport);
    let valve = EntityAdapter::new(&session, key("30_3"), Recorder::default()).unwrap();
    valve.attach(None);
    session.connect();
    eventually(|| session.is_connected()).await;
    let cid = Cid::new("30");

    transport.push(dps(json!({"101": true})), Some("30"));
    assert!(!session.refresh_coordinator().is_pending(&cid));

    // The follow-up query gets no reply, so only this push reaches the entity.
    eventually(|| transport.queries().len() == 1).await;
    transport.push(dps(json!({"3": true, "101": false})), Some("30"));
    eventually(|| updates(&valve) == 1).await;
    assert!(valve.available());
    assert_eq!(valve.dp(Dp(101)), Some(DpValue::Bool(false)));
}

#[tokio::test]
async fn republished_snapshot_leaves_refresh_pending() {
    let transport = MockTransport::new();
    let session = manager(refreshing_valve(), &transport);
    let valve = EntityAdapter::new(&session, key("30_3"), Recorder::default()).unwrap();
    valve.attach(None);
    let cid = Cid::new("30");

    session.on_status(dps(json!({"3": true})), Some(cid.clone()));
    eventually(|| revision(&valve) == 1).await;
    assert_eq!(updates(&valve), 1);

    let descriptor = session.config().entities[0]
        .sub_device
        .as_ref()
        .and_then(|s| s.refresh.clone())
        .unwrap();
    session
        .refresh_coordinator()
        .arm(RefreshRequest::new(cid.clone(), &descriptor));

    // Pushes for other scopes republish the snapshot that still holds cid 30.
    session.on_status(dps(json!({"9": 1})), None);
    session.on_status(dps(json!({"2": "off"})), Some(Cid::new("26")));
    tokio::time::sleep(std::time::Duration::from_millis(20)).await;
    assert!(session.refresh_coordinator().is_pending(&cid));
    assert_eq!(updates(&valve), 1);
    assert_eq!(revision(&valve), 1);

    // The first push addressed to 30 is the echo: dropped, refresh completed.
    session.on_status(dps(json!({"101": true, "3": "echo"})), Some(cid.clone()));
    assert!(!session.refresh_coordinator().is_pending(&cid));
    assert_eq!(
        session.status().sub_device(&cid).unwrap().get(&Dp(3)),
        Some(&DpValue::Bool(true))
    );

    session.on_status(dps(json!({"3": false})), Some(cid.clone()));
    eventually(|| updates(&valve) == 2).await;
    assert_eq!(valve.dp(Dp(3)), Some(DpValue::Bool(false)));
}

#[tokio::test]
async fn disconnect_marks_entities_unavailable() {
    let transport = MockTransport::new();
    transport.reply(None, dps(json!({"1": "on"})));
    let session = manager(switch_pair(), &transport);
    let a = EntityAdapter::new(&session, key("1"), Recorder::default()).unwrap();
    a.attach(None);
    session.connect();
    eventually(|| revision(&a) == 1).await;
    assert!(a.available());

    transport.drop_link();
    eventually(|| revision(&a) == 2).await;
    assert!(!a.available());
    assert!(a.status().is_empty());
    assert_eq!(updates(&a), 1);
}

#[tokio::test]
async fn restored_state_applied_before_updates() {
    let transport = MockTransport::new();
    let session = manager(switch_pair(), &transport);
    let a = EntityAdapter::new(&session, key("1"), Recorder::default()).unwrap();
    let restored = RestoredState {
        state: "on".to_string(),
        ..Default::default()
    };

    a.attach(Some(&restored));
    assert!(a.is_attached());
    assert_eq!(a.with_hooks(|h| h.restored.clone()), Some(restored));
    assert!(!a.available());
}

#[tokio::test]
async fn detached_entity_stops_listening() {
    let transport = MockTransport::new();
    let session = manager(switch_pair(), &transport);
    let a = EntityAdapter::new(&session, key("1"), Recorder::default()).unwrap();
    a.attach(None);
    a.detach();
    assert!(!a.is_attached());
    eventually(|| session.bus().subscriber_count(session.device_id()) == 0).await;

    session.on_status(dps(json!({"1": "on"})), None);
    tokio::time::sleep(std::time::Duration::from_millis(20)).await;
    assert_eq!(updates(&a), 0);
}

#[tokio::test]
async fn missing_datapoints_read_as_none() {
    let transport = MockTransport::new();
    let config = device(json!([
        {"id": "1", "platform": "climate", "friendly_name": "Thermostat",
         "target_temperature_dp": "2", "preset_mode_dp": "-1", "hvac_mode_dp": null},
    ]));
    let session = manager(config, &transport);
    let a = EntityAdapter::new(&session, key("1"), Recorder::default()).unwrap();
    a.attach(None);
    session.on_status(dps(json!({"1": true})), None);
    eventually(|| a.available()).await;

    assert_eq!(a.dp(Dp(42)), None);
    assert_eq!(a.dp_by_config("target_temperature_dp"), None);
    assert_eq!(a.dp_by_config("preset_mode_dp"), None);
    assert!(a.has_config("target_temperature_dp"));
    assert!(!a.has_config("preset_mode_dp"));
    assert!(!a.has_config("hvac_mode_dp"));
}

#[tokio::test]
async fn writes_are_scoped_to_entity_cid() {
    let transport = MockTransport::new();
    let session = manager(switch_pair(), &transport);
    let b = EntityAdapter::new(&session, key("26_2"), Recorder::default()).unwrap();
    session.connect();
    eventually(|| session.is_connected()).await;

    b.set_dp(true, Dp(2)).await;
    b.set_dps(dps(json!({"2": false, "5": 10}))).await;

    let writes = transport.writes();
    assert_eq!(writes[0], (Some(Cid::new("26")), dps(json!({"2": true}))));
    assert_eq!(writes[1], (Some(Cid::new("26")), dps(json!({"2": false, "5": 10}))));
}

#[tokio::test]
async fn identity_follows_device_and_scope() {
    let transport = MockTransport::new();
    let session = manager(switch_pair(), &transport);
    let a = EntityAdapter::new(&session, key("1"), Recorder::default()).unwrap();
    let b = EntityAdapter::new(&session, key("26_2"), Recorder::default()).unwrap();

    assert_eq!(a.unique_id(), "local_bf0123_1");
    assert_eq!(b.unique_id(), "local_bf0123_26");
    assert_eq!(b.name(), "Relay");

    let info = a.device_info();
    assert_eq!(info.identifiers, "local_bf0123");
    assert_eq!(info.name, "Hallway");
    assert_eq!(info.manufacturer, "Unknown");
    assert_eq!(info.model, "Tuya generic");
    assert_eq!(info.sw_version, "3.3");
}

#[tokio::test]
async fn unknown_entity_is_rejected() {
    let transport = MockTransport::new();
    let session = manager(switch_pair(), &transport);

    let err = EntityAdapter::new(&session, key("9"), Recorder::default())
        .err()
        .unwrap();
    assert!(matches!(err, Error::UnknownEntity { dp: Dp(9), cid: None }));
    assert!(EntityAdapter::new(&session, key("31_2"), Recorder::default()).is_err());
}
