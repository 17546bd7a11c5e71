//! End-to-end activation scenarios exercising a single rank: a linear
//! chain, a multi-slot fan-in, and a single-producer broadcast.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::collections::HashMap;

use ttg::{Capability, TTBuilder, TTDyn};
use ttg_communication::{Configuration, SingleRank};

#[test]
fn linear_chain_propagates_a_single_key_through_three_tasks() {
    ttg::initialize(Configuration::Thread, 1, |world| {
        let sink: Arc<Mutex<HashMap<i32, String>>> = Arc::new(Mutex::new(HashMap::new()));

        let mut c_builder = TTBuilder::<i32>::new("C", Arc::new(SingleRank));
        let c_in = c_builder.input::<String>("in", Capability::Read);
        let sink_for_c = sink.clone();
        c_builder.body(move |key, mut slots| {
            let value = slots.remove(0).into_read::<String>();
            sink_for_c.lock().unwrap().insert(*key, value.get().clone());
            Ok(())
        });
        let _c = c_builder.build(world.scheduler(), world.sender());

        let mut b_builder = TTBuilder::<i32>::new("B", Arc::new(SingleRank));
        let b_in = b_builder.input::<String>("in", Capability::Read);
        let b_out = b_builder.output::<String>("out");
        b_out.connect(c_in);
        let b_out_for_body = b_out.clone();
        b_builder.body(move |key, mut slots| {
            let _ = slots.remove(0).into_read::<String>();
            b_out_for_body.send(*key, "X".to_string())
        });
        let _b = b_builder.build(world.scheduler(), world.sender());

        let mut a_builder = TTBuilder::<i32>::new("A", Arc::new(SingleRank));
        let a_in = a_builder.input::<i32>("seed", Capability::Read);
        let a_out = a_builder.output::<String>("out");
        a_out.connect(b_in);
        let a_out_for_body = a_out.clone();
        a_builder.body(move |key, mut slots| {
            let _ = slots.remove(0).into_read::<i32>();
            a_out_for_body.send(*key, "x".to_string())
        });
        let a = a_builder.build(world.scheduler(), world.sender());

        let seed: Arc<dyn TTDyn> = a.clone();
        ttg::make_graph_executable(&seed);

        a_in.deliver_by_ref(0, ttg::DataCopy::new(0)).unwrap();

        ttg::fence(world, &seed);
        assert_eq!(sink.lock().unwrap().get(&0), Some(&"X".to_string()));
        ttg::finalize(world);
    })
    .unwrap()
    .join();
}

#[test]
fn reduction_fan_in_sums_three_consumed_slots_into_one_activation() {
    ttg::initialize(Configuration::Thread, 2, |world| {
        let sum: Arc<Mutex<Option<i32>>> = Arc::new(Mutex::new(None));
        let exclusive_mutations = Arc::new(AtomicUsize::new(0));

        let mut r_builder = TTBuilder::<i32>::new("R", Arc::new(SingleRank));
        let r_in0 = r_builder.input::<i32>("a", Capability::Consume);
        let r_in1 = r_builder.input::<i32>("b", Capability::Consume);
        let r_in2 = r_builder.input::<i32>("c", Capability::Consume);
        let sum_for_r = sum.clone();
        let exclusive_for_r = exclusive_mutations.clone();
        r_builder.body(move |_key, mut slots| {
            let mut total = 0;
            for _ in 0..3 {
                let mut handle = slots.remove(0).into_consume::<i32>();
                if handle.try_get_mut().is_some() {
                    exclusive_for_r.fetch_add(1, Ordering::SeqCst);
                }
                total += *handle.get();
            }
            *sum_for_r.lock().unwrap() = Some(total);
            Ok(())
        });
        let r = r_builder.build(world.scheduler(), world.sender());

        let seed: Arc<dyn TTDyn> = r.clone();
        ttg::make_graph_executable(&seed);

        for (terminal, value) in [(r_in0, 1), (r_in1, 2), (r_in2, 3)] {
            terminal.deliver_by_move(7, ttg::DataCopy::new(value)).unwrap();
        }

        ttg::fence(world, &seed);
        assert_eq!(*sum.lock().unwrap(), Some(6));
        assert_eq!(exclusive_mutations.load(Ordering::SeqCst), 3);
        ttg::finalize(world);
    })
    .unwrap()
    .join();
}

#[test]
fn broadcast_to_three_keys_elides_to_a_single_move_at_the_last_key() {
    ttg::initialize(Configuration::Thread, 1, |world| {
        let mutable_sightings = Arc::new(AtomicUsize::new(0));
        let deliveries = Arc::new(AtomicUsize::new(0));

        let mut c_builder = TTBuilder::<i32>::new("C", Arc::new(SingleRank));
        let c_in = c_builder.input::<String>("in", Capability::Consume);
        c_builder.inlinemap(|_key| true);
        let mutable_for_c = mutable_sightings.clone();
        let deliveries_for_c = deliveries.clone();
        c_builder.body(move |_key, mut slots| {
            let mut handle = slots.remove(0).into_consume::<String>();
            deliveries_for_c.fetch_add(1, Ordering::SeqCst);
            if handle.try_get_mut().is_some() {
                mutable_for_c.fetch_add(1, Ordering::SeqCst);
            }
            Ok(())
        });
        let c = c_builder.build(world.scheduler(), world.sender());

        let p_out: ttg::OutTerminal<i32, String> = ttg::OutTerminal::new("P.out");
        p_out.connect(c_in);

        let seed: Arc<dyn TTDyn> = c.clone();
        ttg::make_graph_executable(&seed);

        p_out.broadcast(&[1, 2, 3], "v".to_string()).unwrap();

        ttg::fence(world, &seed);
        assert_eq!(deliveries.load(Ordering::SeqCst), 3);
        assert_eq!(mutable_sightings.load(Ordering::SeqCst), 1);
        ttg::finalize(world);
    })
    .unwrap()
    .join();
}
