use super::*;
use crate::{delta::compose, FlowMap};
use flow_sensor_core::{NetworkFlow, INFINITE_FUTURE};
use pretty_assertions::assert_eq;

fn flow_map(entries: impl IntoIterator<Item = (FlowIndicator, Timestamp)>) -> FlowMap {
    entries.into_iter().collect()
}

fn a_to(dst: Entity, port: u16) -> FlowIndicator {
    indicator(deployment("ns/Deployment/a"), dst, port)
}

#[test]
fn identical_states_produce_no_updates() {
    let state = flow_map([
        (a_to(Entity::Internet, 443), INFINITE_FUTURE),
        (a_to(deployment("ns/Deployment/b"), 8080), ts(5)),
    ]);
    assert!(compose(&state, &state).is_empty());
    assert!(compose(&FlowMap::default(), &FlowMap::default()).is_empty());
}

#[test]
fn reports_only_changed_flows() {
    let unchanged = a_to(deployment("ns/Deployment/b"), 8080);
    let appeared = a_to(deployment("ns/Deployment/c"), 9090);
    let advanced = a_to(Entity::Internet, 443);
    let vanished = a_to(Entity::Node("node-0".to_string()), 10250);

    let previous = flow_map([
        (unchanged.clone(), INFINITE_FUTURE),
        (advanced.clone(), ts(5)),
        (vanished.clone(), ts(7)),
    ]);
    let current = flow_map([
        (unchanged, INFINITE_FUTURE),
        (appeared.clone(), INFINITE_FUTURE),
        (advanced.clone(), ts(9)),
    ]);

    // Flows are ordered by destination entity since they share a source.
    assert_eq!(
        compose(&current, &previous),
        vec![
            appeared.into_flow(INFINITE_FUTURE),
            vanished.into_flow(ts(7)),
            advanced.into_flow(ts(9)),
        ]
    );
}

#[test]
fn earlier_timestamps_are_not_reported() {
    // An open flow whose connections have all closed is reported once it disappears.
    let flow = a_to(Entity::Internet, 443);
    let previous = flow_map([(flow.clone(), INFINITE_FUTURE)]);
    let current = flow_map([(flow.clone(), ts(3))]);
    assert!(compose(&current, &previous).is_empty());

    assert_eq!(
        compose(&FlowMap::default(), &current),
        vec![NetworkFlow {
            src_entity: deployment("ns/Deployment/a"),
            dst_entity: Entity::Internet,
            dst_port: 443,
            protocol: Protocol::Tcp,
            last_seen: Some(ts(3)),
        }]
    );
}
