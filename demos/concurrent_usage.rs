//! Concurrent Fragment Cache Usage
//!
//! Simulates a burst of page requests for a handful of expensive fragments and
//! shows that each fragment is rendered once per TTL, no matter how many
//! threads ask for it.
//!
//! Run with: cargo run --example concurrent_usage

use fragment_cache::{
    fetch_or_produce, CacheMetrics, FetchOptions, Fetched, FragmentCacheRegistry, FragmentStore,
    FragmentStoreConfig,
};
use std::convert::Infallible;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

const FRAGMENTS: [&str; 4] = ["header", "sidebar", "feed", "footer"];

fn render(name: &str, renders: &AtomicUsize) -> Result<String, Infallible> {
    renders.fetch_add(1, Ordering::SeqCst);
    thread::sleep(Duration::from_millis(100));
    Ok(format!("<section id=\"{name}\">...</section>"))
}

fn main() {
    println!("Fragment Cache Concurrent Usage");
    println!("===============================\n");

    burst_of_requests();
    condition_invalidation();
    registry_switch();
}

fn burst_of_requests() {
    println!("1. Burst of 32 requests for 4 fragments");

    let store = Arc::new(
        FragmentStore::init(
            FragmentStoreConfig::new().with_sweep_interval(Some(Duration::from_secs(1))),
        )
        .expect("valid config"),
    );
    let renders = Arc::new(AtomicUsize::new(0));
    let start = Instant::now();

    let handles: Vec<_> = (0..32)
        .map(|i| {
            let store = Arc::clone(&store);
            let renders = Arc::clone(&renders);
            thread::spawn(move || {
                let name = FRAGMENTS[i % FRAGMENTS.len()];
                let options = FetchOptions::new(Duration::from_secs(30));
                fetch_or_produce(&*store, name, &options, || render(name, &renders))
            })
        })
        .collect();

    let mut produced = 0;
    for handle in handles {
        if let Ok(Fetched::Produced(_)) = handle.join().expect("request thread panicked") {
            produced += 1;
        }
    }

    println!("   requests:  32");
    println!("   renders:   {}", renders.load(Ordering::SeqCst));
    println!("   producers: {produced}");
    println!("   elapsed:   {:?}", start.elapsed());
    for (name, value) in store.metrics() {
        println!("   {name:<24} {value}");
    }
    store.destroy();
    println!();
}

fn condition_invalidation() {
    println!("2. Condition-based invalidation");

    let store = FragmentStore::init(FragmentStoreConfig::new().without_reclaimer())
        .expect("valid config");
    let renders = AtomicUsize::new(0);

    for version in ["v1", "v1", "v2", "v2", "v3"] {
        let options = FetchOptions::new(Duration::from_secs(3600)).with_condition(Some(version));
        let fetched = fetch_or_produce(&store, "feed", &options, || render("feed", &renders))
            .expect("render is infallible");
        let how = if fetched.was_produced() { "rendered" } else { "cached" };
        println!("   data {version}: {how}");
    }
    println!("   total renders: {}\n", renders.load(Ordering::SeqCst));
}

fn registry_switch() {
    println!("3. Registry with caching switched off and on");

    let registry = FragmentCacheRegistry::new();
    let store = FragmentStore::init(FragmentStoreConfig::new().without_reclaimer())
        .expect("valid config");
    registry.register_strategy("memory", Arc::new(store));
    let renders = AtomicUsize::new(0);

    for enabled in [false, true] {
        if enabled {
            registry.enable();
        }
        for _ in 0..3 {
            registry
                .fetch(None, "header", None, Duration::from_secs(60), false, || {
                    render("header", &renders)
                })
                .expect("render is infallible");
        }
        println!(
            "   enabled={enabled}: {} renders so far",
            renders.load(Ordering::SeqCst)
        );
    }
    registry.destroy();
}
