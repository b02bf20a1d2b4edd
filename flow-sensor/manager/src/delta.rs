use crate::FlowMap;
use flow_sensor_core::NetworkFlow;

/// Computes the flows that changed between the `previous` and `current` cycles.
///
/// A flow is reported with its current timestamp if it is new or its timestamp advanced, and with
/// its previous timestamp if it disappeared. Flows are ordered by indicator.
pub(crate) fn compose(current: &FlowMap, previous: &FlowMap) -> Vec<NetworkFlow> {
    let updated = current
        .iter()
        .filter(|(indicator, ts)| previous.get(*indicator).map_or(true, |prior| prior < *ts));
    let removed = previous
        .iter()
        .filter(|(indicator, _)| !current.contains_key(*indicator));

    let mut changes = updated.chain(removed).collect::<Vec<_>>();
    changes.sort_unstable_by(|(a, _), (b, _)| a.cmp(b));
    changes
        .into_iter()
        .map(|(indicator, ts)| indicator.clone().into_flow(*ts))
        .collect()
}
