//! A device task that pins its input, computes through `wait`, and
//! forwards the result downstream through `DeviceContext`.

use std::sync::{Arc, Mutex};

use ttg::{Capability, ExecutionSpace, TTBuilder, TTDyn};
use ttg_communication::{Configuration, SingleRank};

#[test]
fn device_task_increments_through_select_wait_and_forward() {
    ttg::initialize(Configuration::Thread, 1, |world| {
        let observed: Arc<Mutex<Option<i32>>> = Arc::new(Mutex::new(None));

        let mut sink_builder = TTBuilder::<i32>::new("sink", Arc::new(SingleRank));
        let sink_in = sink_builder.input::<i32>("in", Capability::Read);
        let observed_for_sink = observed.clone();
        sink_builder.body(move |_key, mut slots| {
            let value = slots.remove(0).into_read::<i32>();
            *observed_for_sink.lock().unwrap() = Some(*value.get());
            Ok(())
        });
        let _sink = sink_builder.build(world.scheduler(), world.sender());

        let mut inc_builder = TTBuilder::<i32>::new("inc", Arc::new(SingleRank));
        let inc_in = inc_builder.input::<i32>("in", Capability::Consume);
        let inc_out = inc_builder.output::<i32>("out");
        inc_out.connect(sink_in);
        let out_for_device = inc_out.clone();
        inc_builder.device_body(move |key, mut slots, ctx| {
            let handle = slots.remove(0).into_consume::<i32>();
            let data = handle.into_data_copy();
            let pin = ctx.select(data)?;
            let incremented = ctx.wait(|| *pin.get() + 1);
            drop(pin);
            let key = *key;
            let out = out_for_device.clone();
            let delivery: Box<dyn FnOnce() -> Result<(), ttg::Error> + Send> =
                Box::new(move || out.send(key, incremented));
            ctx.forward(vec![delivery])
        });
        let inc = inc_builder.build(world.scheduler(), world.sender());
        assert_eq!(inc.execution_space(), ExecutionSpace::Device);

        let seed: Arc<dyn TTDyn> = inc.clone();
        ttg::make_graph_executable(&seed);

        inc_in.deliver_by_move(0, ttg::DataCopy::new(5)).unwrap();

        ttg::fence(world, &seed);
        assert_eq!(*observed.lock().unwrap(), Some(6));
        ttg::finalize(world);
    })
    .unwrap()
    .join();
}
