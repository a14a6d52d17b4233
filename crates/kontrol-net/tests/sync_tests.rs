//! End-to-end synchronization over loopback UDP

use std::sync::Arc;
use std::time::Duration;

use tokio::net::UdpSocket;
use tokio::time::{sleep, timeout};

use kontrol_core::{ChangeSource, EntityId, KontrolModel, ParamValue, Rack};
use kontrol_net::{OscBroadcaster, OscReceiver, Role};
use kontrol_osc::{KontrolMessage, MAX_PACKET_SIZE};

/// A model with one module, two params, a page, a CC mapping, and a
/// live value change.
fn populated_model(host: &str, port: u16) -> Arc<KontrolModel> {
    let model = Arc::new(KontrolModel::new(host, port));
    let src = ChangeSource::Local;
    let rack_id = model.local_rack_id().clone();
    let m1 = EntityId::new("m1");

    model
        .create_module(src, &rack_id, m1.clone(), "Filter", "flt")
        .unwrap();
    model
        .create_param(
            src,
            &rack_id,
            &m1,
            vec![
                ParamValue::from("float"),
                ParamValue::from("cutoff"),
                ParamValue::from("Cutoff"),
                ParamValue::Float(0.0),
                ParamValue::Float(1.0),
                ParamValue::Float(0.5),
            ],
        )
        .unwrap();
    model
        .create_param(
            src,
            &rack_id,
            &m1,
            vec![
                ParamValue::from("float"),
                ParamValue::from("res"),
                ParamValue::from("Resonance"),
                ParamValue::Float(0.0),
                ParamValue::Float(1.0),
                ParamValue::Float(0.1),
            ],
        )
        .unwrap();
    model
        .create_page(
            src,
            &rack_id,
            &m1,
            EntityId::new("pg1"),
            "Main",
            vec![EntityId::new("cutoff"), EntityId::new("res")],
        )
        .unwrap();
    model
        .assign_midi_cc(src, &rack_id, &m1, &EntityId::new("cutoff"), 74)
        .unwrap();
    model
        .change_param(
            src,
            &rack_id,
            &m1,
            &EntityId::new("cutoff"),
            ParamValue::Float(0.75),
        )
        .unwrap();
    model
}

async fn recv_message(socket: &UdpSocket) -> Option<KontrolMessage> {
    let mut buf = vec![0u8; MAX_PACKET_SIZE];
    match timeout(Duration::from_millis(500), socket.recv(&mut buf)).await {
        Ok(Ok(len)) => KontrolMessage::decode(&buf[..len]).unwrap(),
        _ => None,
    }
}

async fn wait_for(mut check: impl FnMut() -> bool) -> bool {
    for _ in 0..200 {
        if check() {
            return true;
        }
        sleep(Duration::from_millis(10)).await;
    }
    false
}

fn assert_rack_synced(expected: &Rack, actual: &Rack) {
    assert_eq!(expected.host(), actual.host());
    assert_eq!(expected.port(), actual.port());
    assert_eq!(expected.modules().count(), actual.modules().count());

    for module in expected.modules() {
        let synced = actual.module(module.id()).expect("module synced");
        assert_eq!(module.display_name(), synced.display_name());
        assert_eq!(module.module_type(), synced.module_type());

        assert_eq!(module.params().count(), synced.params().count());
        for param in module.params() {
            let p = synced.param(param.id()).expect("param synced");
            assert_eq!(param.create_args(), p.create_args());
            assert_eq!(param.current(), p.current());
        }

        assert_eq!(module.pages(), synced.pages());
        assert_eq!(
            module.midi_mapping().collect::<Vec<_>>(),
            synced.midi_mapping().collect::<Vec<_>>()
        );
    }
}

/// The master pushes the full world state, in order, when a peer
/// transitions to active.
#[tokio::test]
async fn test_master_snapshot_order() {
    let observer = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let port_a = observer.local_addr().unwrap().port();

    let model_b = populated_model("127.0.0.2", 9001);
    let b_cast = Arc::new(OscBroadcaster::new(
        model_b.clone(),
        ChangeSource::RemoteOsc,
        5,
        Role::Master,
    ));
    assert!(b_cast.connect("127.0.0.1", port_a).await);
    model_b.add_callback(b_cast.clone());

    model_b.ping(ChangeSource::RemoteOsc, "127.0.0.1", port_a, 5);

    let mut kinds = Vec::new();
    while let Some(msg) = recv_message(&observer).await {
        kinds.push(msg);
    }

    let addresses: Vec<_> = kinds.iter().map(|m| m.address()).collect();
    assert_eq!(
        addresses,
        vec![
            "/Kontrol/rack",
            "/Kontrol/module",
            "/Kontrol/param",
            "/Kontrol/param",
            "/Kontrol/page",
            "/Kontrol/changed",
            "/Kontrol/changed",
            "/Kontrol/assignMidiCC",
        ]
    );

    // current values, not defaults
    let KontrolMessage::Changed { param_id, value, .. } = &kinds[5] else {
        panic!("expected changed message");
    };
    assert_eq!(param_id.as_str(), "cutoff");
    assert_eq!(value, &ParamValue::Float(0.75));

    b_cast.stop().await;
}

/// A second ping from an already-active peer with nonzero keep-alive
/// must not trigger another snapshot; a keep-alive of zero always does.
#[tokio::test]
async fn test_snapshot_fires_only_on_activation() {
    let observer = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let port_a = observer.local_addr().unwrap().port();

    let model_b = populated_model("127.0.0.2", 9001);
    let b_cast = Arc::new(OscBroadcaster::new(
        model_b.clone(),
        ChangeSource::RemoteOsc,
        5,
        Role::Master,
    ));
    assert!(b_cast.connect("127.0.0.1", port_a).await);

    b_cast.ping(ChangeSource::RemoteOsc, "127.0.0.1", port_a, 5);
    let mut first = 0;
    while recv_message(&observer).await.is_some() {
        first += 1;
    }
    assert_eq!(first, 8);

    b_cast.ping(ChangeSource::RemoteOsc, "127.0.0.1", port_a, 5);
    assert!(recv_message(&observer).await.is_none());

    // "always on" peers get the snapshot on every ping
    b_cast.ping(ChangeSource::RemoteOsc, "127.0.0.1", port_a, 0);
    assert!(recv_message(&observer).await.is_some());

    b_cast.stop().await;
}

/// Node A (slave) pings node B (master); B republishes its rack and
/// A's model converges to B's contents.
#[tokio::test]
async fn test_slave_converges_to_master_snapshot() {
    let model_b = populated_model("127.0.0.2", 9001);
    let b_recv = OscReceiver::new(model_b.clone());
    assert!(b_recv.listen(0).await);
    let port_b = b_recv.port();

    let model_a = Arc::new(KontrolModel::new("127.0.0.1", 9000));
    let a_recv = OscReceiver::new(model_a.clone());
    assert!(a_recv.listen(0).await);
    let port_a = a_recv.port();

    let b_cast = Arc::new(OscBroadcaster::new(
        model_b.clone(),
        ChangeSource::RemoteOsc,
        5,
        Role::Master,
    ));
    assert!(b_cast.connect("127.0.0.1", port_a).await);
    model_b.add_callback(b_cast.clone());

    let a_cast = Arc::new(OscBroadcaster::new(
        model_a.clone(),
        ChangeSource::RemoteOsc,
        5,
        Role::Slave,
    ));
    assert!(a_cast.connect("127.0.0.1", port_b).await);
    model_a.add_callback(a_cast.clone());

    // A announces itself; B sees A transition to active and fans out.
    a_cast.send_ping(port_a);

    let b_rack_id = model_b.local_rack_id().clone();
    assert!(
        wait_for(|| {
            model_a
                .rack(&b_rack_id)
                .is_some_and(|r| r.modules().count() == 1)
        })
        .await
    );
    // let the trailing snapshot messages land
    let m1 = EntityId::new("m1");
    assert!(
        wait_for(|| {
            model_a.rack(&b_rack_id).is_some_and(|r| {
                r.module(&m1)
                    .is_some_and(|m| m.midi_mapping().count() == 1)
            })
        })
        .await
    );

    let expected = model_b.rack(&b_rack_id).unwrap();
    let actual = model_a.rack(&b_rack_id).unwrap();
    assert_rack_synced(&expected, &actual);

    // B also learned about A as a rack, from the ping alone.
    assert!(
        model_b
            .rack(&EntityId::for_rack("127.0.0.1", port_a))
            .is_some()
    );

    a_cast.stop().await;
    b_cast.stop().await;
    a_recv.stop().await;
    b_recv.stop().await;
}

/// A slave whose master pings it republishes its own metadata, and an
/// incremental change then flows without echoing back.
#[tokio::test]
async fn test_slave_republish_and_echo_suppression() {
    let model_a = populated_model("127.0.0.1", 9000);
    let a_recv = OscReceiver::new(model_a.clone());
    assert!(a_recv.listen(0).await);
    let port_a = a_recv.port();

    let model_b = Arc::new(KontrolModel::new("127.0.0.2", 9001));
    let b_recv = OscReceiver::new(model_b.clone());
    assert!(b_recv.listen(0).await);
    let port_b = b_recv.port();

    let a_cast = Arc::new(OscBroadcaster::new(
        model_a.clone(),
        ChangeSource::RemoteOsc,
        5,
        Role::Slave,
    ));
    assert!(a_cast.connect("127.0.0.1", port_b).await);
    model_a.add_callback(a_cast.clone());

    // B pings A directly; A sees its peer become active and
    // republishes its own metadata toward B.
    model_a.ping(ChangeSource::RemoteOsc, "127.0.0.1", port_b, 5);

    let a_rack_id = model_a.local_rack_id().clone();
    assert!(
        wait_for(|| {
            model_b
                .rack(&a_rack_id)
                .is_some_and(|r| r.modules().count() == 1)
        })
        .await
    );

    // an incremental local change on A flows to B
    let m1 = EntityId::new("m1");
    model_a
        .change_param(
            ChangeSource::Local,
            &a_rack_id,
            &m1,
            &EntityId::new("res"),
            ParamValue::Float(0.9),
        )
        .unwrap();
    assert!(
        wait_for(|| {
            model_b.rack(&a_rack_id).is_some_and(|r| {
                r.module(&m1).and_then(|m| m.param(&EntityId::new("res")).cloned())
                    .is_some_and(|p| p.current() == &ParamValue::Float(0.9))
            })
        })
        .await
    );

    // the same mutation arriving from the network is not re-broadcast
    assert!(!a_cast.broadcast_change(ChangeSource::RemoteOsc));
    assert!(a_cast.broadcast_change(ChangeSource::Local));

    a_cast.stop().await;
    a_recv.stop().await;
    b_recv.stop().await;
}
