//! Benchmark for nodespec expansion over a populated datastore

use armada::domain::model::{
    BootFrom, LockedState, Nic, Node, NodeState,
};
use armada::{Datastore, NodeSpec};
use chrono::Utc;
use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};

fn node(name: &str) -> Node {
    Node {
        id: 0,
        name: name.to_string(),
        state: NodeState::Installed,
        locked: LockedState::Unlocked,
        is_idle: false,
        boot_from: BootFrom::Disk,
        add_host_session: None,
        rack: None,
        rank: None,
        vcpus: Some(4),
        hardware_profile: 1,
        software_profile: Some(1),
        nics: vec![Nic {
            ip: Some("10.0.0.1".to_string()),
            mac: None,
            boot: true,
        }],
        tags: Vec::new(),
        instance: None,
        last_update: Utc::now(),
    }
}

fn populated_store(count: usize) -> std::sync::Arc<Datastore> {
    let store = Datastore::new();
    let mut txn = store.begin();
    for i in 0..count {
        let rack = i % 8;
        txn.insert_node(node(&format!("compute-r{rack}-{i:04}.cluster")))
            .unwrap();
    }
    txn.commit();
    store
}

fn bench_parse(c: &mut Criterion) {
    let mut group = c.benchmark_group("nodespec");
    group.throughput(Throughput::Elements(1));

    group.bench_function("parse", |b| {
        b.iter(|| NodeSpec::parse(black_box("compute-r3-*, compute-r5-00??.cluster")).unwrap());
    });

    group.finish();
}

fn bench_expand(c: &mut Criterion) {
    let mut group = c.benchmark_group("nodespec");

    for count in [100usize, 1000, 5000] {
        let store = populated_store(count);
        let spec = NodeSpec::parse("compute-r3-*").unwrap();

        group.throughput(Throughput::Elements(count as u64));
        group.bench_function(format!("expand_{count}_nodes"), |b| {
            b.iter(|| {
                store.read(|state| {
                    state
                        .node_list(&[])
                        .into_iter()
                        .filter(|n| spec.matches(black_box(&n.name)))
                        .count()
                })
            });
        });
    }

    group.finish();
}

criterion_group!(benches, bench_parse, bench_expand);
criterion_main!(benches);
