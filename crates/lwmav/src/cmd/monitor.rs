use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use lwmav_frame::Message;
use lwmav_vehicle::Vehicle;
use tracing::debug;

use crate::cmd::{parse_msgid, LinkArgs, MonitorArgs};
use crate::exit::{vehicle_error, CliError, CliResult, INTERNAL, SUCCESS};
use crate::output::{print_message, OutputFormat};

pub(crate) type Inbox = Rc<RefCell<VecDeque<Message>>>;

/// Where printed messages come from.
pub(crate) enum Feed {
    /// Whatever subscribed handlers pushed.
    Inbox(Inbox),
    /// Every message received, subscribed or not.
    All,
}

pub fn run(args: MonitorArgs, link: &LinkArgs, format: OutputFormat) -> CliResult<i32> {
    let mut vehicle = link.open()?;
    let dialect = vehicle.connection().dialect().clone();

    let feed = match &args.msgid {
        Some(list) => {
            let msgids = list
                .iter()
                .map(|name| parse_msgid(name, &dialect))
                .collect::<CliResult<Vec<_>>>()?;
            let inbox = Inbox::default();
            for msgid in &msgids {
                let sink = Rc::clone(&inbox);
                vehicle
                    .subscribe(*msgid, move |_, msg| sink.borrow_mut().push_back(msg.clone()))
                    .map_err(|err| vehicle_error("subscribe failed", err))?;
            }
            debug!(subscriptions = msgids.len(), "monitoring");
            Feed::Inbox(inbox)
        }
        None => {
            debug!("monitoring every message");
            Feed::All
        }
    };

    let running = Arc::new(AtomicBool::new(true));
    install_ctrlc_handler(running.clone())?;
    pump(&mut vehicle, &feed, &running, args.count, |msg| {
        print_message(msg, &dialect, format)
    })?;
    Ok(SUCCESS)
}

/// Spin until interrupted or `count` messages have been printed.
pub(crate) fn pump(
    vehicle: &mut Vehicle,
    feed: &Feed,
    running: &AtomicBool,
    count: Option<usize>,
    mut print: impl FnMut(&Message),
) -> CliResult<usize> {
    let mut printed = 0usize;
    while running.load(Ordering::SeqCst) {
        let received = vehicle
            .next_message()
            .map_err(|err| vehicle_error("receive failed", err))?;
        let batch: Vec<Message> = match feed {
            Feed::All => received.into_iter().collect(),
            Feed::Inbox(inbox) => inbox.borrow_mut().drain(..).collect(),
        };

        for msg in &batch {
            print(msg);
            printed = printed.saturating_add(1);
            if count.is_some_and(|count| printed >= count) {
                return Ok(printed);
            }
        }
    }
    Ok(printed)
}

pub(crate) fn install_ctrlc_handler(running: Arc<AtomicBool>) -> CliResult<()> {
    ctrlc::set_handler(move || {
        running.store(false, Ordering::SeqCst);
    })
    .map_err(|err| CliError::new(INTERNAL, format!("signal handler setup failed: {err}")))
}
