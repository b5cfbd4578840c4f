use std::rc::Rc;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use lwmav_vehicle::Continuation;
use tracing::info;

use crate::cmd::monitor::{install_ctrlc_handler, pump, Feed, Inbox};
use crate::cmd::{parse_duration, parse_msgid, IntervalArgs, LinkArgs};
use crate::exit::{vehicle_error, CliResult, SUCCESS};
use crate::output::{print_message, OutputFormat};

pub fn run(args: IntervalArgs, link: &LinkArgs, format: OutputFormat) -> CliResult<i32> {
    let period = parse_duration(&args.period)?;
    let mut vehicle = link.open()?;
    let dialect = vehicle.connection().dialect().clone();
    let msgid = parse_msgid(&args.msgid, &dialect)?;

    let inbox = Inbox::default();
    let sink = Rc::clone(&inbox);
    let mut command = vehicle
        .request_message_periodic(msgid, period, move |_, msg| {
            sink.borrow_mut().push_back(msg.clone());
            Continuation::Continue
        })
        .map_err(|err| vehicle_error("interval request", err))?;

    let running = Arc::new(AtomicBool::new(true));
    install_ctrlc_handler(running.clone())?;
    let printed = pump(&mut vehicle, &Feed::Inbox(inbox), &running, args.count, |msg| {
        print_message(msg, &dialect, format)
    });

    command.cancel(&mut vehicle);
    let printed = printed?;
    info!(msgid, printed, "interval stream closed");
    Ok(SUCCESS)
}
