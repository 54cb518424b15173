// Instances supplied by the builder's instantiator
use routekit::{controller, Controller};

pub struct Metrics {
    hits: std::sync::atomic::AtomicU64,
}

#[controller(provided)]
impl Metrics {
    #[get("/metrics")]
    fn metrics(&self) -> String {
        self.hits
            .load(std::sync::atomic::Ordering::Relaxed)
            .to_string()
    }
}

fn main() {
    assert!(Metrics::create().is_none());
    assert!(Metrics::sub_router().is_none());
}
