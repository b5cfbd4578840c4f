//! Battery fence: watch position and battery, switch to RTL once the
//! remaining range no longer covers the way home.
//!
//! Run against an autopilot (or SITL) streaming to UDP 14550:
//!   cargo run --example battery-fence -- 14550

use std::cell::RefCell;
use std::rc::Rc;
use std::time::{Duration, Instant};

use lwmav::frame::common::{BATTERY_STATUS_DATA, GLOBAL_POSITION_INT_DATA};
use lwmav::frame::MessageData;
use lwmav::transport::TransportParams;
use lwmav::{Continuation, CopterMode, Vehicle};
use tracing::{info, warn};

const STREAM_INTERVAL: Duration = Duration::from_secs(1);
const REPORT_INTERVAL: Duration = Duration::from_secs(1);
/// Percent subtracted from the reported level before estimating range.
const BATTERY_BUFFER: i32 = 7;
/// Distance to cover before the consumption estimate is trusted, m.
const MIN_SAMPLE_DISTANCE: f64 = 300.0;

#[derive(Default)]
struct Telemetry {
    position: Option<GLOBAL_POSITION_INT_DATA>,
    battery: Option<BATTERY_STATUS_DATA>,
    updated: bool,
}

/// Flat-earth distance between two degE7 coordinates, in metres.
fn distance_m(lat1: i32, lon1: i32, lat2: i32, lon2: i32) -> f64 {
    let dlat = f64::from(lat1) - f64::from(lat2);
    let dlon = f64::from(lon1) - f64::from(lon2);
    (dlat * dlat + dlon * dlon).sqrt() * 1.113195e5 / 1e7
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt().with_writer(std::io::stderr).init();

    let port = match std::env::args().nth(1) {
        Some(arg) => arg.parse()?,
        None => 14550,
    };

    let mut vehicle = Vehicle::new();
    vehicle.open(&TransportParams::Udp { port })?;
    info!(port, "listening for vehicle");

    let home = vehicle.get_home_position()?;
    info!(
        lat = f64::from(home.latitude) / 1e7,
        lon = f64::from(home.longitude) / 1e7,
        alt_m = f64::from(home.altitude) / 1e3,
        "home position"
    );

    let telemetry = Rc::new(RefCell::new(Telemetry::default()));

    let sink = Rc::clone(&telemetry);
    let _position = vehicle.request_message_periodic(
        GLOBAL_POSITION_INT_DATA::ID,
        STREAM_INTERVAL,
        move |_, msg| {
            if let Ok(position) = msg.decode::<GLOBAL_POSITION_INT_DATA>() {
                let mut telemetry = sink.borrow_mut();
                telemetry.position = Some(position);
                telemetry.updated = true;
            }
            Continuation::Continue
        },
    )?;

    let sink = Rc::clone(&telemetry);
    let _battery = vehicle.request_message_periodic(
        BATTERY_STATUS_DATA::ID,
        STREAM_INTERVAL,
        move |_, msg| {
            if let Ok(battery) = msg.decode::<BATTERY_STATUS_DATA>() {
                let mut telemetry = sink.borrow_mut();
                telemetry.battery = Some(battery);
                telemetry.updated = true;
            }
            Continuation::Continue
        },
    )?;

    vehicle.spin_until(|| {
        let telemetry = telemetry.borrow();
        telemetry.position.is_some() && telemetry.battery.is_some()
    })?;

    let (Some(mut previous), Some(initial)) = ({
        let telemetry = telemetry.borrow();
        (telemetry.position.clone(), telemetry.battery.clone())
    }) else {
        return Err("telemetry streams did not start".into());
    };
    let initial_level = i32::from(initial.battery_remaining);

    let mut traveled = 0.0;
    let mut returning = false;
    let mut next_report = Instant::now() + REPORT_INTERVAL;

    loop {
        vehicle.spin_until(|| telemetry.borrow().updated)?;

        let (position, battery) = {
            let mut telemetry = telemetry.borrow_mut();
            telemetry.updated = false;
            match (&telemetry.position, &telemetry.battery) {
                (Some(position), Some(battery)) => (position.clone(), battery.clone()),
                _ => continue,
            }
        };

        let report = Instant::now() >= next_report;
        if report {
            next_report = Instant::now() + REPORT_INTERVAL;
        }

        let step = distance_m(position.lat, position.lon, previous.lat, previous.lon);
        traveled += step;
        let to_home = distance_m(position.lat, position.lon, home.latitude, home.longitude);
        previous = position;
        if report {
            info!(step_m = step, traveled_m = traveled, to_home_m = to_home, "position");
        }

        let remaining = i32::from(battery.battery_remaining);
        let buffered = (remaining - BATTERY_BUFFER).max(0);
        let consumed = f64::from(initial_level - buffered);
        if traveled <= MIN_SAMPLE_DISTANCE || consumed <= 0.0 {
            continue;
        }

        let metres_per_percent = traveled / consumed;
        let range = f64::from(buffered) * metres_per_percent;
        if report {
            info!(
                remaining,
                buffered,
                metres_per_percent,
                range_m = range,
                to_home_m = to_home,
                "battery"
            );
        }

        if returning {
            if report {
                info!("returning to home");
            }
        } else if range < to_home {
            warn!(range_m = range, to_home_m = to_home, "range below distance home, switching to RTL");
            vehicle.set_mode_arducopter(CopterMode::Rtl)?;
            returning = true;
        }
    }
}
