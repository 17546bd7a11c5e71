//! A single template task wired back to its own input: each activation
//! carries the running pair `(F_n, F_{n-1})` and either forwards the
//! next pair to itself or stops once the sequence passes a limit.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use ttg::{Capability, TTBuilder, TTDyn};
use ttg_communication::{Configuration, SingleRank};

const LIMIT: u64 = 100;

#[test]
fn fibonacci_self_loop_terminates_at_the_configured_limit() {
    ttg::initialize(Configuration::Thread, 1, |world| {
        let printed: Arc<Mutex<Option<u64>>> = Arc::new(Mutex::new(None));
        let fired = Arc::new(AtomicUsize::new(0));

        let mut f_builder = TTBuilder::<u64>::new("fib", Arc::new(SingleRank));
        let f_in = f_builder.input::<(u64, u64)>("state", Capability::Consume);
        let f_loop = f_builder.output::<(u64, u64)>("loop");
        f_loop.connect(f_in.clone());

        let printed_for_body = printed.clone();
        let fired_for_body = fired.clone();
        let loop_for_body = f_loop.clone();
        f_builder.body(move |key, mut slots| {
            fired_for_body.fetch_add(1, Ordering::SeqCst);
            let pair = slots.remove(0).into_consume::<(u64, u64)>();
            let (a, b) = *pair.get();
            let next = a + b;
            if next < LIMIT {
                loop_for_body.send(*key + 1, (next, a))
            } else {
                *printed_for_body.lock().unwrap() = Some(a);
                Ok(())
            }
        });
        let f = f_builder.build(world.scheduler(), world.sender());

        let seed: Arc<dyn TTDyn> = f.clone();
        ttg::make_graph_executable(&seed);

        f_in.deliver_by_move(1, ttg::DataCopy::new((1u64, 0u64))).unwrap();

        ttg::fence(world, &seed);
        // F_1..F_10 forward, F_11 (89+55=144 >= LIMIT) stops and prints 89.
        assert_eq!(*printed.lock().unwrap(), Some(89));
        assert_eq!(fired.load(Ordering::SeqCst), 11);
        ttg::finalize(world);
    })
    .unwrap()
    .join();
}
