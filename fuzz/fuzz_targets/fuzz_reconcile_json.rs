#![no_main]

use libfuzzer_sys::fuzz_target;
use weft_core::Heap;
use weft_preserve::{PreserveOptions, reconcile};

// Input is two JSON documents separated by a NUL byte.
fuzz_target!(|data: &[u8]| {
    if data.len() > 8192 {
        return;
    }
    let Some(split) = data.iter().position(|b| *b == 0) else {
        return;
    };
    let (Ok(old), Ok(new)) = (
        std::str::from_utf8(&data[..split]),
        std::str::from_utf8(&data[split + 1..]),
    ) else {
        return;
    };

    let heap = Heap::new();
    let (Ok(old), Ok(new)) = (heap.parse_json(old), heap.parse_json(new)) else {
        return;
    };
    let Ok(expected) = heap.to_json(&new) else {
        return;
    };
    // Identity errors are fine; anything that merges must end up shaped like `new`.
    if let Ok(merged) = reconcile(&heap, &old, &new, &PreserveOptions::default()) {
        assert_eq!(heap.to_json(&merged).ok(), Some(expected));
    }
});
