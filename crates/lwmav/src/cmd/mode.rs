use lwmav_vehicle::CopterMode;
use serde::Serialize;

use crate::cmd::{LinkArgs, ModeArgs};
use crate::exit::{vehicle_error, CliError, CliResult, SUCCESS};
use crate::output::{print_record, OutputFormat};

#[derive(Serialize)]
struct ModeOutput {
    mode: CopterMode,
    custom_mode: u32,
    acknowledged: bool,
}

pub fn run(args: ModeArgs, link: &LinkArgs, format: OutputFormat) -> CliResult<i32> {
    let mode: CopterMode = args
        .mode
        .parse()
        .map_err(|err| CliError::usage(format!("{err}")))?;
    let mut vehicle = link.open()?;

    let result = if args.no_wait {
        vehicle.set_mode_arducopter_async(mode)
    } else {
        vehicle.set_mode_arducopter(mode)
    };
    result.map_err(|err| vehicle_error("set mode", err))?;

    let out = ModeOutput {
        mode,
        custom_mode: mode.code(),
        acknowledged: !args.no_wait,
    };
    print_record("Flight Mode", &out, format);
    Ok(SUCCESS)
}
