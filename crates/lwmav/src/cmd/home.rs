use serde::Serialize;

use crate::cmd::LinkArgs;
use crate::exit::{vehicle_error, CliResult, SUCCESS};
use crate::output::{print_record, OutputFormat};

#[derive(Serialize)]
struct HomeOutput {
    latitude_deg: f64,
    longitude_deg: f64,
    altitude_m: f64,
    latitude: i32,
    longitude: i32,
    altitude_mm: i32,
}

pub fn run(link: &LinkArgs, format: OutputFormat) -> CliResult<i32> {
    let mut vehicle = link.open()?;
    let home = vehicle
        .get_home_position()
        .map_err(|err| vehicle_error("home position", err))?;

    let out = HomeOutput {
        latitude_deg: f64::from(home.latitude) / 1e7,
        longitude_deg: f64::from(home.longitude) / 1e7,
        altitude_m: f64::from(home.altitude) / 1e3,
        latitude: home.latitude,
        longitude: home.longitude,
        altitude_mm: home.altitude,
    };
    print_record("Home Position", &out, format);
    Ok(SUCCESS)
}
