//! A two-rank graph where a keymap routes even keys to rank 0 and odd
//! keys to rank 1, exercising the cross-rank forwarding path in
//! `transport::RankTransport` end to end.

use std::sync::{Arc, Mutex};

use ttg::{Capability, TTBuilder, TTDyn};
use ttg_communication::{Configuration, Keymap};

#[test]
fn even_and_odd_keys_route_to_their_owning_rank() {
    let guards = ttg::initialize(Configuration::Process(2), 1, |world| {
        let keymap: Arc<dyn Keymap<i32>> = Arc::new(|k: &i32| (*k % 2) as usize);
        let fired: Arc<Mutex<Vec<i32>>> = Arc::new(Mutex::new(Vec::new()));

        let mut x_builder = TTBuilder::<i32>::new("X", keymap);
        let x_in = x_builder.input::<i32>("in", Capability::Read);
        let fired_for_x = fired.clone();
        x_builder.body(move |key, mut slots| {
            let _ = slots.remove(0).into_read::<i32>();
            fired_for_x.lock().unwrap().push(*key);
            Ok(())
        });
        let x = x_builder.build(world.scheduler(), world.sender());

        let seed: Arc<dyn TTDyn> = x.clone();
        ttg::make_graph_executable(&seed);

        if world.rank() == 0 {
            for key in 0..10 {
                x_in.deliver_by_ref(key, ttg::DataCopy::new(key)).unwrap();
            }
        }

        ttg::fence(world, &seed);
        let mut keys = fired.lock().unwrap().clone();
        keys.sort();
        ttg::finalize(world);
        keys
    })
    .unwrap();

    let mut all: Vec<i32> = guards.join().into_iter().map(|r| r.unwrap()).flatten().collect();
    all.sort();
    assert_eq!(all, (0..10).collect::<Vec<i32>>());
}

#[test]
fn broadcast_groups_remote_keys_by_owning_rank() {
    let guards = ttg::initialize(Configuration::Process(2), 1, |world| {
        let keymap: Arc<dyn Keymap<i32>> = Arc::new(|k: &i32| (*k % 2) as usize);
        let fired: Arc<Mutex<Vec<i32>>> = Arc::new(Mutex::new(Vec::new()));

        let mut x_builder = TTBuilder::<i32>::new("X", keymap);
        let x_in = x_builder.input::<i32>("in", Capability::Read);
        let fired_for_x = fired.clone();
        x_builder.body(move |key, mut slots| {
            let _ = slots.remove(0).into_read::<i32>();
            fired_for_x.lock().unwrap().push(*key);
            Ok(())
        });
        let x = x_builder.build(world.scheduler(), world.sender());

        let producer: ttg::OutTerminal<i32, i32> = ttg::OutTerminal::new("producer.out");
        producer.connect(x_in);

        let seed: Arc<dyn TTDyn> = x.clone();
        ttg::make_graph_executable(&seed);

        if world.rank() == 0 {
            let keys: Vec<i32> = (0..10).collect();
            producer.broadcast(&keys, 99).unwrap();
        }

        ttg::fence(world, &seed);
        let mut keys = fired.lock().unwrap().clone();
        keys.sort();
        ttg::finalize(world);
        keys
    })
    .unwrap();

    let mut all: Vec<i32> = guards.join().into_iter().map(|r| r.unwrap()).flatten().collect();
    all.sort();
    assert_eq!(all, (0..10).collect::<Vec<i32>>());
}
