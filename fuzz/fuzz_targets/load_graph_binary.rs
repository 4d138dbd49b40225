#![no_main]

use libfuzzer_sys::fuzz_target;
use yakhnsw::{DistanceKind, Graph};

fuzz_target!(|data: &[u8]| {
    if let Ok(graph) = Graph::<String>::from_binary(data, DistanceKind::Euclidean) {
        let dims = graph.dims();
        let _ = graph.search(&vec![0.0; dims], 4);
    }
});
