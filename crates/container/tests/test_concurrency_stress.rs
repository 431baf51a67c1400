#![cfg(feature = "extended-tests")]

mod common;

use container::{Container, LifetimeKind};
use crate::common::*;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Barrier};
use std::thread;

#[test]
fn child_containers_stress_no_lost_disposals() {
    let threads: usize = 16;
    let rounds: usize = 200;
    let closed = Arc::new(AtomicUsize::new(0));
    let root = Arc::new(
        Container::with_provider(Default::default(), catalog_with(Arc::clone(&closed))).expect("valid"),
    );
    root.register_type::<Connection>(None, LifetimeKind::ContainerTransient, vec![])
        .expect("register");
    root.register_type::<Logger>(None, LifetimeKind::Singleton, vec![])
        .expect("register");

    let barrier = Arc::new(Barrier::new(threads));
    let handles: Vec<_> = (0..threads)
        .map(|_| {
            let root = Arc::clone(&root);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                for _ in 0..rounds {
                    let child = root.create_child();
                    child.resolve::<Connection>().expect("connection");
                    child.resolve::<Repository>().expect("repository");
                }
            })
        })
        .collect();

    for h in handles {
        h.join().expect("worker thread");
    }

    // Каждый дочерний контейнер освободил свое соединение при drop
    assert_eq!(closed.load(Ordering::SeqCst), threads * rounds);
}

#[test]
fn array_snapshot_stress_under_registration() {
    let threads: usize = 8;
    let container = Arc::new(container());
    let barrier = Arc::new(Barrier::new(threads));

    let handles: Vec<_> = (0..threads)
        .map(|n| {
            let container = Arc::clone(&container);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                let mut last = 0;
                for i in 0..100 {
                    if n == 0 {
                        let name = format!("entry-{}", i);
                        container
                            .register_instance(Some(name.as_str()), i as u32)
                            .expect("register");
                    }
                    let len = container.resolve_all::<u32>().expect("array").len();
                    // Снимок никогда не уменьшается
                    assert!(len >= last, "array shrank from {} to {}", last, len);
                    last = len;
                }
            })
        })
        .collect();

    for h in handles {
        h.join().expect("worker thread");
    }
    assert_eq!(container.resolve_all::<u32>().expect("array").len(), 100);
}
