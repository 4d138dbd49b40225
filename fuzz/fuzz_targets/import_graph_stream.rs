#![no_main]

use libfuzzer_sys::fuzz_target;
use yakhnsw::Graph;

fuzz_target!(|data: &[u8]| {
    if let Ok(graph) = Graph::<u64>::import(data) {
        let dims = graph.dims();
        let _ = graph.search(&vec![0.0; dims], 4);
    }
});
