use crate::SharedIndex;
use prometheus_client::{
    collector::Collector,
    encoding::{DescriptorEncoder, EncodeMetric},
    metrics::{gauge::ConstGauge, MetricType},
    registry::Registry,
};

#[derive(Debug)]
struct Instrumented(SharedIndex);

/// Reports the size of the index.
pub fn register(reg: &mut Registry, index: SharedIndex) {
    reg.register_collector(Box::new(Instrumented(index)));
}

impl Collector for Instrumented {
    fn encode(&self, mut encoder: DescriptorEncoder<'_>) -> Result<(), std::fmt::Error> {
        let (pods, services, nodes) = {
            let index = self.0.read();
            let pods = index.pods.values().map(|pods| pods.len()).sum::<usize>();
            (pods, index.services.len(), index.nodes.len())
        };

        for (name, help, size) in [
            ("pods", "The number of pods in the index", pods),
            ("services", "The number of services in the index", services),
            ("nodes", "The number of nodes in the index", nodes),
        ] {
            let gauge = ConstGauge::new(size as i64);
            let metric_encoder = encoder.encode_descriptor(name, help, None, MetricType::Gauge)?;
            gauge.encode(metric_encoder)?;
        }
        Ok(())
    }
}
